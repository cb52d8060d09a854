pub mod enums;

pub use enums::*;

use thiserror::Error;

/// A string that does not name any variant of a closed enum.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {field} value: {value}")]
pub struct InvalidEnumValue {
    pub field: String,
    pub value: String,
}
