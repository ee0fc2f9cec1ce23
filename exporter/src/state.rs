//! Application state shared across handlers.

use std::sync::Arc;

use crate::exporter::Exporter;

#[derive(Clone)]
pub struct AppState {
    pub exporter: Arc<Exporter>,
}

impl AppState {
    pub fn new(exporter: Arc<Exporter>) -> Self {
        Self { exporter }
    }
}
