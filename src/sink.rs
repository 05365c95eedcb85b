use crate::record::LogRecord;
use std::io::{self, Write};
use std::sync::Mutex;

/// Error returned by a sink when a record could not be delivered.
///
/// The layer never hands these back to the code that emitted the event;
/// it only counts them.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("write failed: {0}")]
    Io(#[from] io::Error),

    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("writer lock poisoned")]
    Poisoned,
}

/// Synchronous destination for [`LogRecord`]s produced by the logging layer.
///
/// Every configured sink receives every record that passes the level
/// filter, one after another on the thread that emitted the event.
pub trait LogSink: Send + Sync {
    /// Deliver a single record.
    ///
    /// **Returns**
    /// - `Ok(())` if the record was written.
    /// - `Err(..)` if encoding or I/O failed. The record is dropped.
    fn send(&self, record: &LogRecord) -> Result<(), SinkError>;

    /// Flush buffered output, if the sink buffers at all.
    ///
    /// Default implementation is a no-op.
    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Turns a record into bytes for a [`WriterSink`].
pub trait RecordEncoder: Send + Sync {
    /// Append the encoded record, including its trailing newline, to `buf`.
    fn encode(&self, record: &LogRecord, buf: &mut Vec<u8>) -> Result<(), SinkError>;
}

/// Sink that encodes records with `E` and writes them to any byte stream:
/// stdout, stderr, an open file, or an in-memory buffer.
pub struct WriterSink<E> {
    encoder: E,
    out: Mutex<Box<dyn Write + Send>>,
}

impl<E: RecordEncoder> WriterSink<E> {
    pub fn new<W>(encoder: E, out: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self::from_boxed(encoder, Box::new(out))
    }

    pub fn from_boxed(encoder: E, out: Box<dyn Write + Send>) -> Self {
        WriterSink {
            encoder,
            out: Mutex::new(out),
        }
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }
}

impl<E: RecordEncoder> LogSink for WriterSink<E> {
    fn send(&self, record: &LogRecord) -> Result<(), SinkError> {
        let mut buf = Vec::with_capacity(256);
        self.encoder.encode(record, &mut buf)?;
        let mut out = self.out.lock().map_err(|_| SinkError::Poisoned)?;
        // One write per record keeps lines whole when the handle is shared.
        out.write_all(&buf)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        let mut out = self.out.lock().map_err(|_| SinkError::Poisoned)?;
        out.flush()?;
        Ok(())
    }
}
