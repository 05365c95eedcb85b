use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// In-memory writer whose clones share one buffer.
#[derive(Clone, Default)]
pub(crate) struct SharedBuf {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuf {
    pub(crate) fn contents(&self) -> String {
        let buf = self.inner.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub(crate) fn json_lines(&self) -> Vec<serde_json::Value> {
        self.contents()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("mutex poisoned"))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
