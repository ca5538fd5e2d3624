pub mod log;
pub mod op;

pub use self::log::RecordLog;
pub use self::op::{Op, StoredRow};
