pub mod error;
pub mod types;
pub mod value;

pub use error::{Result, SentryError};
pub use types::{Column, Record, Schema};
pub use value::{DataType, Value};
