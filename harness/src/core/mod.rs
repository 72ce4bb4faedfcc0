//! Deterministic, pure logic shared by the harness phases.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod catalog;
pub mod decision;
pub mod scoring;
pub mod selector;
pub mod types;
