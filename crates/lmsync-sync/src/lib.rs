//! Synchronization engine for lmsync.
//!
//! Moves events between a facility-local agent and the online web:
//!
//! - [`EventPublisher`] appends locally emitted events to the store
//! - [`EventImporter`] stores received events and replays them through the
//!   [`ReplayRegistry`], recording failures instead of aborting
//! - [`LocalAgentController`] runs the agent side of the peering protocol
//!   over a [`PeerTransport`] such as [`HttpTransport`], or moves events
//!   through files when offline
//! - [`JobScheduler`] runs periodic jobs under lease locks

pub mod agent;
pub mod config;
pub mod error;
pub mod http;
pub mod importer;
pub mod publisher;
pub mod replay;
pub mod scheduler;
pub mod status;
pub mod transport;

pub use agent::{AgentState, LocalAgentController};
pub use config::AgentConfig;
pub use error::{SyncError, SyncResult};
pub use http::HttpTransport;
pub use importer::{EventImporter, ImportReport};
pub use publisher::EventPublisher;
pub use replay::{
    DomainState, MasterDataMirror, MasterDataReplayer, ReplayOutcome, ReplayRegistry, Replayer,
    RequisitionBook, RequisitionReplayer,
};
pub use scheduler::JobScheduler;
pub use status::{CycleReport, LocalSyncResults, SyncStatus};
pub use transport::PeerTransport;
