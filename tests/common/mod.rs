//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - A recording, failure-injecting collection wrapper
//! - Record fixtures and a temp-dir harness for lock/checkpoint files

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_store;

pub use fixtures::*;
pub use mock_store::*;
