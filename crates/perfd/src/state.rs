//! Shared application state of the HTTP server.

use std::sync::atomic::AtomicUsize;

use chrono::{DateTime, Utc};

use perfd_core::service::TransportService;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) service: TransportService,
    pub(crate) started_at: DateTime<Utc>,
}

impl AppState {
    pub(crate) fn new(service: TransportService, started_at: DateTime<Utc>) -> Self {
        Self {
            service,
            started_at,
        }
    }
}

/// Number of open event streams.
pub(crate) static SSE_CONNECTIONS: AtomicUsize = AtomicUsize::new(0);
