//! HTTP API for the event relay

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;

use crate::relay::Relay;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
}

impl AppState {
    pub fn new(relay: Relay) -> Self {
        Self {
            relay: Arc::new(relay),
        }
    }
}
