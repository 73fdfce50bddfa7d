pub mod clock;
pub mod destination;
pub mod encode;
pub mod error;
pub mod formatter;
pub mod record;
pub mod visitor;

pub mod env;
pub mod init;

pub use destination::RotatingDestination;
pub use formatter::JsonRecordFormatter;
pub use record::{ExceptionInfo, FieldValue, LogRecord, Message};
