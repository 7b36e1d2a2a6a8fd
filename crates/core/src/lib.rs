//! Core types, errors, and utilities shared across the notready workspace.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod result;

pub use error::Error;
pub use result::{Result, ResultExt};
