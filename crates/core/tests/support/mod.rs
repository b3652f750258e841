//! Shared test helpers for `qrgen-core` integration tests.
//!
//! In-memory implementations of the core ports. Each keeps its state behind
//! one mutex so claims are atomic the same way the SQL statements are.

#![allow(dead_code)]

pub mod stores;
pub mod transport;
