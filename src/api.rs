//! REST channel
//!
//! Thin axum layer over the agent: one webhook for user messages plus a few
//! conversation inspection endpoints.

mod handlers;
mod types;

pub use handlers::create_router;

use crate::agent::Agent;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<Agent>,
}

impl AppState {
    pub fn new(agent: Agent) -> Self {
        Self {
            agent: Arc::new(agent),
        }
    }
}
