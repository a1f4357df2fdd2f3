//! Foundation types for lmsync.
//!
//! Every other lmsync crate depends on `lmsync-types`. It carries the
//! identifiers that travel inside events and the explicit [`MachineContext`]
//! that tells a component which node it is running on.
//!
//! # Key Types
//!
//! - [`EventId`]: UUID v7 event identifier, the idempotence key for replay
//! - [`FacilityId`]: a facility, the sender/receiver address of an event
//! - [`AgentId`]: a registered local machine
//! - [`GroupId`]: causal ordering group for events
//! - [`MachineContext`] / [`NodeRole`]: which side of the peering this node is

pub mod context;
pub mod error;
pub mod ids;

pub use context::{MachineContext, NodeRole};
pub use error::TypeError;
pub use ids::{AgentId, EventId, FacilityId, GroupId};
