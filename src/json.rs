use crate::record::{LogRecord, CALLER_FIELD};
use crate::sink::{RecordEncoder, SinkError};

/// Machine-readable encoder: one compact JSON object per line.
#[derive(Clone, Debug)]
pub struct JsonEncoder {
    with_caller: bool,
}

impl Default for JsonEncoder {
    fn default() -> Self {
        JsonEncoder { with_caller: true }
    }
}

impl JsonEncoder {
    /// Whether the `caller` key is written. Defaults to `true`.
    pub fn with_caller(mut self, enabled: bool) -> Self {
        self.with_caller = enabled;
        self
    }
}

impl RecordEncoder for JsonEncoder {
    fn encode(&self, record: &LogRecord, buf: &mut Vec<u8>) -> Result<(), SinkError> {
        if self.with_caller || record.caller.is_none() {
            serde_json::to_writer(&mut *buf, record)?;
        } else {
            let mut value = serde_json::to_value(record)?;
            if let Some(obj) = value.as_object_mut() {
                obj.shift_remove(CALLER_FIELD);
            }
            serde_json::to_writer(&mut *buf, &value)?;
        }
        buf.push(b'\n');
        Ok(())
    }
}
