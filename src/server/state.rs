//! Server application state shared across handlers

use crate::registry::SessionRegistry;
use crate::shutdown::ShutdownState;
use std::sync::Arc;

#[derive(Clone)]
pub struct ServerAppState {
    /// Bearer token required on /api and /ws routes
    pub auth_token: String,

    pub registry: Arc<SessionRegistry>,

    pub shutdown_state: ShutdownState,
}

impl ServerAppState {
    /// Create the state and start the registry's cleanup task
    pub fn new(
        auth_token: String,
        registry: Arc<SessionRegistry>,
        shutdown_state: ShutdownState,
    ) -> Self {
        SessionRegistry::start_cleanup_task(registry.clone());

        Self {
            auth_token,
            registry,
            shutdown_state,
        }
    }
}
