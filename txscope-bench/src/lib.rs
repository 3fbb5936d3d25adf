//! txscope Benchmark Library
//!
//! Provides fixtures for measuring the overhead of transaction demarcation, propagation
//! and synchronization on top of the in-memory resource.

pub mod config;
pub mod stores;
