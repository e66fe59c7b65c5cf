//! Common test utilities for crawl-control integration tests

#[allow(dead_code)]
pub mod fixtures;

pub use fixtures::*;
