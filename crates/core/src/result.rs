//! Result type definition and extension traits.
//!
//! Provides combinators for Result types, enabling clean error handling
//! without unwrap/expect/panic.

use crate::error::Error;

/// The standard Result type for notready's process-level operations.
///
/// Use the `?` operator, `match`, or combinator methods to handle results.
///
/// # Examples
///
/// ```ignore
/// fn load() -> Result<Settings> {
///     let settings = Settings::from_file(path)?;
///     Ok(settings)
/// }
/// ```
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing safe combinators for Results.
pub trait ResultExt<T> {
    /// Inspect the error without consuming the Result.
    #[must_use]
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref e) = self {
            f(e);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_inspect_error() {
        let result: Result<i32> = Err(Error::invalid_config("test"));
        let mut called = false;
        let _ = result.inspect_error(|_| {
            called = true;
        });
        assert!(called);
    }

    #[test]
    fn test_result_inspect_error_skips_ok() {
        let result: Result<i32> = Ok(1);
        let mut called = false;
        let _ = result.inspect_error(|_| {
            called = true;
        });
        assert!(!called);
    }
}
