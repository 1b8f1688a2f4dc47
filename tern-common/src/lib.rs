//! Shared primitives used by all `tern-rs` crates.
//!
//! This crate sits at the bottom of the dependency graph and stays
//! dependency-light: identifier aliases, the unified error model, hybrid
//! timestamps, and injected configuration.

pub mod config;
pub mod error;
pub mod hybrid_time;
pub mod ids;
