use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use scoutline_core::JobRegistry;

/// Shared handler state. Cloned per request; everything inside is
/// reference-counted.
#[derive(Clone)]
pub struct AppState {
    pub registry: JobRegistry,
    pub started_at: Arc<DateTime<Utc>>,
}

impl AppState {
    pub fn new(registry: JobRegistry) -> Self {
        Self {
            registry,
            started_at: Arc::new(Utc::now()),
        }
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}
