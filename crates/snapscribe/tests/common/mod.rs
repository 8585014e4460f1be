//! Shared test utilities for snapscribe integration tests.
//!
//! - `TestHarness` wires in-memory stores, a scripted recognizer and an
//!   optional recording merger around one `ExtractionRunner`
//! - builders for image names and services

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
