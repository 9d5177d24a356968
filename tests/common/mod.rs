//! Shared test utilities for pipeline, chaos and integration tests.
//!
//! This module provides:
//! - Redis testcontainer setup with source/target helpers
//! - In-memory change source, snapshot, target and checkpoint doubles that
//!   record calls and can inject failures
//! - Customer fixtures

#![allow(dead_code)] // Each test binary uses a different subset

pub mod containers;
pub mod doubles;

pub use containers::*;
pub use doubles::*;
