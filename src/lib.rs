// Clippy allows for reasonable defaults
#![allow(clippy::too_many_arguments)] // Actor constructors take their collaborators explicitly
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::derivable_impls)] // Explicit Default impls can be clearer
#![allow(clippy::field_reassign_with_default)] // Builder pattern is clearer

// Module declarations
pub mod agent_port;
pub mod channel;
pub mod config;
pub mod coordinator;
pub mod interview;
pub mod models;
pub mod registry;
pub mod session;
pub mod shutdown;

// Server module (HTTP/WebSocket API)
pub mod server;

pub use models::*;
pub use registry::{CreatedSession, RegistryConfig, RegistryError, SessionRegistry};
pub use session::{SessionError, SessionSnapshot};
