//! Replay dispatch: applying stored events to domain state.
//!
//! Every payload type has at most one [`Replayer`], looked up by
//! discriminator in an explicit [`ReplayRegistry`]. Replayers must be
//! idempotent: replaying an event whose effect is already present is a
//! [`ReplayOutcome::Skipped`], never a second application.

pub mod master_data;
pub mod requisition;

use std::collections::HashMap;
use std::sync::Arc;

use lmsync_event::Event;

use crate::error::{SyncError, SyncResult};

pub use master_data::{MasterDataMirror, MasterDataReplayer, MirrorRow};
pub use requisition::{
    Notification, Requisition, RequisitionBook, RequisitionReplayer, RequisitionStatus,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplayOutcome {
    Applied,
    /// The effect was already present.
    Skipped,
}

/// Applies one payload type to domain state.
pub trait Replayer: Send + Sync {
    /// The discriminator this replayer handles.
    fn payload_type(&self) -> &'static str;

    /// Apply `event`. Either every effect lands or none does.
    fn replay(&self, event: &Event) -> SyncResult<ReplayOutcome>;
}

/// Discriminator to replayer table.
#[derive(Default)]
pub struct ReplayRegistry {
    replayers: HashMap<&'static str, Arc<dyn Replayer>>,
}

impl ReplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a replayer, replacing any previous one for the same type.
    pub fn register(&mut self, replayer: Arc<dyn Replayer>) {
        self.replayers.insert(replayer.payload_type(), replayer);
    }

    pub fn with(mut self, replayer: Arc<dyn Replayer>) -> Self {
        self.register(replayer);
        self
    }

    pub fn get(&self, payload_type: &str) -> Option<&Arc<dyn Replayer>> {
        self.replayers.get(payload_type)
    }

    pub fn payload_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.replayers.keys().copied().collect();
        types.sort_unstable();
        types
    }

    pub fn dispatch(&self, event: &Event) -> SyncResult<ReplayOutcome> {
        let replayer = self
            .get(event.payload_type())
            .ok_or_else(|| SyncError::NoReplayer(event.payload_type().to_string()))?;
        replayer.replay(event)
    }
}

/// Domain state a node replays events into.
#[derive(Clone, Default)]
pub struct DomainState {
    pub requisitions: Arc<RequisitionBook>,
    pub master_data: Arc<MasterDataMirror>,
}

impl DomainState {
    /// A registry with a replayer for every known payload type.
    pub fn replay_registry(&self) -> ReplayRegistry {
        let mut registry = ReplayRegistry::new();
        for replayer in RequisitionReplayer::all(self.requisitions.clone()) {
            registry.register(replayer);
        }
        registry.with(Arc::new(MasterDataReplayer::new(self.master_data.clone())))
    }
}

impl std::fmt::Debug for ReplayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayRegistry")
            .field("payload_types", &self.payload_types())
            .finish()
    }
}
