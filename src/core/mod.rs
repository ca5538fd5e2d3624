pub mod error;
pub mod key;
pub mod value;

pub use error::{Result, StoreError};
pub use key::{Ids, RowKey};
pub use value::{DataType, Value};
