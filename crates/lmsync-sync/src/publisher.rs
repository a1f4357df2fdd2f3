use std::sync::Arc;

use tokio::sync::Notify;
use tracing::debug;

use lmsync_event::{Event, EventDraft, EventPayload, MasterDataEventRecord};
use lmsync_store::EventStore;
use lmsync_types::{FacilityId, GroupId, MachineContext};

use crate::error::SyncResult;

/// Turns domain payloads into durably stored events.
///
/// The sender is always this machine's facility, taken from the explicit
/// [`MachineContext`].
pub struct EventPublisher {
    store: Arc<dyn EventStore>,
    context: MachineContext,
    notify: Option<Arc<Notify>>,
}

impl EventPublisher {
    pub fn new(store: Arc<dyn EventStore>, context: MachineContext) -> Self {
        Self {
            store,
            context,
            notify: None,
        }
    }

    /// Wake `notify` after every append, so an online sync loop can ship
    /// the event right away.
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = Some(notify);
        self
    }

    pub fn context(&self) -> &MachineContext {
        &self.context
    }

    /// Emit an event in `group_id`, addressed to `receiver_id` (or to the
    /// online web only when `None`).
    pub fn emit_group_event(
        &self,
        group_id: Option<GroupId>,
        receiver_id: Option<FacilityId>,
        payload: EventPayload,
    ) -> SyncResult<Event> {
        let draft = EventDraft::new(self.context.facility_id, payload)
            .in_group(group_id)
            .to_receiver(receiver_id);
        self.publish(draft)
    }

    /// Emit a master data change for `facility_id`.
    ///
    /// All master data for one facility shares a group so it replays in
    /// capture order.
    pub fn emit_master_data_event(
        &self,
        record: MasterDataEventRecord,
        facility_id: FacilityId,
    ) -> SyncResult<Event> {
        self.emit_group_event(
            Some(GroupId::master_data(&facility_id)),
            Some(facility_id),
            EventPayload::MasterData(record),
        )
    }

    fn publish(&self, draft: EventDraft) -> SyncResult<Event> {
        let event = self.store.append_local(draft)?;
        debug!(
            event_id = %event.id,
            payload_type = event.payload_type(),
            group_sequence = event.group_sequence,
            "event published"
        );
        if let Some(notify) = &self.notify {
            notify.notify_one();
        }
        Ok(event)
    }
}
