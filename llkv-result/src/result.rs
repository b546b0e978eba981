use crate::error::Error;

/// Result type alias used throughout LLKV.
///
/// Shorthand for `std::result::Result<T, Error>`. Every fallible operation in the
/// storage and transaction crates returns this type.
pub type Result<T> = std::result::Result<T, Error>;
