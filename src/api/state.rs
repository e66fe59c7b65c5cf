//! Application state for the API server

use crate::{Config, CrawlControl};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request (cheap Arc clone).
#[derive(Clone)]
pub struct AppState {
    /// The control plane
    pub control: Arc<CrawlControl>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(control: Arc<CrawlControl>, config: Arc<Config>) -> Self {
        Self { control, config }
    }
}
