#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # notready
//!
//! Deletes NodeClaims whose Node has carried the unreachable taint for longer
//! than a configured timeout.
//!
//! This library holds the binary's process plumbing (CLI, settings,
//! snapshots, dry-run reports) and re-exports the workspace crates.

// Re-export all crates
pub use notready_core;
pub use notready_reconciler;

pub mod cli;
pub mod config;
pub mod report;
pub mod snapshot;
pub mod types;
