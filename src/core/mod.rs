pub mod error;
pub mod types;
pub mod value;

pub use error::{GateError, Result};
pub use types::{ColumnMeta, Dialect, ResultSet};
pub use value::SqlValue;
