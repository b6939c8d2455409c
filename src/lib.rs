//! Capability test runner for Wayland compositors
//!
//! This library provides the pieces the `captest` binary is built from: a
//! wire protocol client, a VM monitor bridge, fixture resolution, and the
//! test registry and executor.

pub mod capabilities;
pub mod cli;
pub mod commands;
pub mod common;
pub mod fixtures;
pub mod monitor;
pub mod testing;
pub mod wire;

// Re-export commonly used types for tests
pub use common::{Error, ErrorClass, Result};
pub use testing::{CapabilityTest, TestInfo};
