//! Online web server for lmsync.
//!
//! Hosts the central side of the peering protocol over HTTP: agents
//! register a public key, then authenticate every call with a signed
//! machine token to push events, collect acknowledgements and pull the
//! events addressed to their facility.

pub mod auth;
pub mod config;
pub mod controller;
pub mod error;
pub mod handler;
pub mod registry;
pub mod router;
pub mod server;
pub mod transport;

pub use auth::{token_from_headers, verify_token, MachineIdentity};
pub use config::ServerConfig;
pub use controller::OnlineWebController;
pub use error::{ServerError, ServerResult};
pub use registry::{AgentRegistry, RegisteredAgent};
pub use router::build_router;
pub use server::LmsyncServer;
pub use transport::InProcessTransport;
