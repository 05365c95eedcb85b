pub mod record;
pub mod stack;
pub mod sink;
pub mod layer;

pub mod console;
pub mod json;

pub mod env;
pub mod init;
pub mod recover;

#[cfg(test)]
mod testing;

pub use console::{ColorChoice, ConsoleEncoder, Target};
pub use init::{Logger, LoggerBuilder, LoggerConfig};
pub use record::LogRecord;
pub use recover::{recover, recover_future, report};
pub use stack::{ResultExt, StackError, StackFrame};
