//! Requisition lifecycle replay over an in-memory book.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use lmsync_event::{payload_types, Event, EventPayload, LineItem};
use lmsync_types::EventId;

use super::{ReplayOutcome, Replayer};
use crate::error::{SyncError, SyncResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequisitionStatus {
    Submitted,
    Approved,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requisition {
    pub id: Uuid,
    pub program_code: String,
    pub status: RequisitionStatus,
    pub submitted_by: String,
    pub line_items: Vec<LineItem>,
    pub approved_items: Vec<LineItem>,
    pub rejection_reason: Option<String>,
    /// Events already applied, oldest first.
    pub history: Vec<EventId>,
}

/// A message queued for the requisition's submitter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub requisition_id: Uuid,
    pub recipient: String,
    pub message: String,
    pub event_id: EventId,
}

#[derive(Default)]
struct BookState {
    requisitions: HashMap<Uuid, Requisition>,
    outbox: Vec<Notification>,
}

/// Requisitions known on this machine plus the notification outbox.
#[derive(Default)]
pub struct RequisitionBook {
    state: RwLock<BookState>,
}

impl RequisitionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Uuid) -> Option<Requisition> {
        self.state
            .read()
            .expect("lock poisoned")
            .requisitions
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("lock poisoned").requisitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn outbox(&self) -> Vec<Notification> {
        self.state.read().expect("lock poisoned").outbox.clone()
    }

    /// Compute the new requisition on a copy, then commit it and its
    /// notification under one write guard.
    fn apply(
        &self,
        event: &Event,
        change: impl FnOnce(Option<&Requisition>) -> SyncResult<Option<(Requisition, Notification)>>,
    ) -> SyncResult<ReplayOutcome> {
        let mut state = self.state.write().expect("lock poisoned");
        let current = event
            .payload
            .requisition_id()
            .and_then(|id| state.requisitions.get(&id));
        if current.is_some_and(|r| r.history.contains(&event.id)) {
            return Ok(ReplayOutcome::Skipped);
        }
        match change(current)? {
            Some((mut next, notification)) => {
                next.history.push(event.id);
                state.requisitions.insert(next.id, next);
                state.outbox.push(notification);
                Ok(ReplayOutcome::Applied)
            }
            None => Ok(ReplayOutcome::Skipped),
        }
    }
}

impl std::fmt::Debug for RequisitionBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequisitionBook")
            .field("requisitions", &self.len())
            .finish()
    }
}

/// Replays one requisition payload type into a shared [`RequisitionBook`].
pub struct RequisitionReplayer {
    book: Arc<RequisitionBook>,
    payload_type: &'static str,
}

impl RequisitionReplayer {
    /// One replayer per requisition payload type, all over `book`.
    pub fn all(book: Arc<RequisitionBook>) -> Vec<Arc<dyn Replayer>> {
        [
            payload_types::REQUISITION_SUBMITTED,
            payload_types::REQUISITION_APPROVED,
            payload_types::REQUISITION_REJECTED,
        ]
        .into_iter()
        .map(|payload_type| {
            Arc::new(Self {
                book: book.clone(),
                payload_type,
            }) as Arc<dyn Replayer>
        })
        .collect()
    }

    fn wrong_state(&self, req: &Requisition) -> SyncError {
        SyncError::replay(
            self.payload_type,
            format!("requisition {} is {:?}", req.id, req.status),
        )
    }
}

impl Replayer for RequisitionReplayer {
    fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    fn replay(&self, event: &Event) -> SyncResult<ReplayOutcome> {
        let outcome = match &event.payload {
            EventPayload::RequisitionSubmitted(p) => self.book.apply(event, |current| {
                if let Some(req) = current {
                    match req.status {
                        RequisitionStatus::Rejected => {}
                        RequisitionStatus::Submitted => return Ok(None),
                        RequisitionStatus::Approved => return Err(self.wrong_state(req)),
                    }
                }
                let mut next = current.cloned().unwrap_or_else(|| Requisition {
                    id: p.requisition_id,
                    program_code: p.program_code.clone(),
                    status: RequisitionStatus::Submitted,
                    submitted_by: p.submitted_by.clone(),
                    line_items: Vec::new(),
                    approved_items: Vec::new(),
                    rejection_reason: None,
                    history: Vec::new(),
                });
                next.status = RequisitionStatus::Submitted;
                next.line_items = p.line_items.clone();
                next.rejection_reason = None;
                let notification = Notification {
                    requisition_id: p.requisition_id,
                    recipient: p.submitted_by.clone(),
                    message: format!("requisition for {} submitted", p.program_code),
                    event_id: event.id,
                };
                Ok(Some((next, notification)))
            })?,
            EventPayload::RequisitionApproved(p) => self.book.apply(event, |current| {
                let req = current.ok_or_else(|| {
                    SyncError::replay(
                        self.payload_type,
                        format!("unknown requisition {}", p.requisition_id),
                    )
                })?;
                match req.status {
                    RequisitionStatus::Approved => return Ok(None),
                    RequisitionStatus::Rejected => return Err(self.wrong_state(req)),
                    RequisitionStatus::Submitted => {}
                }
                let mut next = req.clone();
                next.status = RequisitionStatus::Approved;
                next.approved_items = p.approved_items.clone();
                let notification = Notification {
                    requisition_id: req.id,
                    recipient: req.submitted_by.clone(),
                    message: format!("requisition approved by {}", p.approved_by),
                    event_id: event.id,
                };
                Ok(Some((next, notification)))
            })?,
            EventPayload::RequisitionRejected(p) => self.book.apply(event, |current| {
                let req = current.ok_or_else(|| {
                    SyncError::replay(
                        self.payload_type,
                        format!("unknown requisition {}", p.requisition_id),
                    )
                })?;
                match req.status {
                    RequisitionStatus::Rejected => return Ok(None),
                    RequisitionStatus::Approved => return Err(self.wrong_state(req)),
                    RequisitionStatus::Submitted => {}
                }
                let mut next = req.clone();
                next.status = RequisitionStatus::Rejected;
                next.rejection_reason = Some(p.reason.clone());
                let notification = Notification {
                    requisition_id: req.id,
                    recipient: req.submitted_by.clone(),
                    message: format!("requisition rejected by {}: {}", p.rejected_by, p.reason),
                    event_id: event.id,
                };
                Ok(Some((next, notification)))
            })?,
            EventPayload::MasterData(_) => {
                return Err(SyncError::replay(
                    self.payload_type,
                    "not a requisition payload",
                ))
            }
        };
        debug!(event_id = %event.id, ?outcome, "requisition event replayed");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmsync_event::{EventDraft, RequisitionApproved, RequisitionRejected, RequisitionSubmitted};
    use lmsync_types::{FacilityId, GroupId};

    use crate::replay::ReplayRegistry;

    fn registry(book: &Arc<RequisitionBook>) -> ReplayRegistry {
        let mut registry = ReplayRegistry::new();
        for r in RequisitionReplayer::all(book.clone()) {
            registry.register(r);
        }
        registry
    }

    fn event(payload: EventPayload, seq: u64) -> Event {
        EventDraft::new(FacilityId::random(), payload)
            .in_group(Some(GroupId::random()))
            .into_event(seq)
    }

    fn submitted(id: Uuid) -> Event {
        event(
            EventPayload::RequisitionSubmitted(RequisitionSubmitted {
                requisition_id: id,
                program_code: "FP".into(),
                submitted_by: "clerk@hc01".into(),
                line_items: vec![LineItem {
                    product_code: "C-10".into(),
                    quantity: 40,
                }],
            }),
            1,
        )
    }

    fn approved(id: Uuid) -> Event {
        event(
            EventPayload::RequisitionApproved(RequisitionApproved {
                requisition_id: id,
                approved_by: "district".into(),
                approved_items: vec![LineItem {
                    product_code: "C-10".into(),
                    quantity: 30,
                }],
            }),
            2,
        )
    }

    #[test]
    fn lifecycle_applies_once() {
        let book = Arc::new(RequisitionBook::new());
        let registry = registry(&book);
        let id = Uuid::new_v4();
        let s = submitted(id);
        let a = approved(id);

        assert_eq!(registry.dispatch(&s).unwrap(), ReplayOutcome::Applied);
        assert_eq!(registry.dispatch(&a).unwrap(), ReplayOutcome::Applied);
        let after_once = book.get(&id).unwrap();
        let outbox_once = book.outbox();

        assert_eq!(registry.dispatch(&s).unwrap(), ReplayOutcome::Skipped);
        assert_eq!(registry.dispatch(&a).unwrap(), ReplayOutcome::Skipped);
        assert_eq!(book.get(&id).unwrap(), after_once);
        assert_eq!(book.outbox(), outbox_once);

        assert_eq!(after_once.status, RequisitionStatus::Approved);
        assert_eq!(after_once.approved_items[0].quantity, 30);
        assert_eq!(outbox_once.len(), 2);
    }

    #[test]
    fn approval_of_unknown_requisition_fails_without_effect() {
        let book = Arc::new(RequisitionBook::new());
        let registry = registry(&book);
        let err = registry.dispatch(&approved(Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, SyncError::ReplayFailed { .. }));
        assert!(book.is_empty());
        assert!(book.outbox().is_empty());
    }

    #[test]
    fn rejected_requisition_can_be_resubmitted() {
        let book = Arc::new(RequisitionBook::new());
        let registry = registry(&book);
        let id = Uuid::new_v4();
        registry.dispatch(&submitted(id)).unwrap();
        let rejected = event(
            EventPayload::RequisitionRejected(RequisitionRejected {
                requisition_id: id,
                rejected_by: "district".into(),
                reason: "missing stock counts".into(),
            }),
            2,
        );
        registry.dispatch(&rejected).unwrap();
        assert_eq!(book.get(&id).unwrap().status, RequisitionStatus::Rejected);

        // approving a rejected requisition is refused
        assert!(registry.dispatch(&approved(id)).is_err());

        registry.dispatch(&submitted(id)).unwrap();
        let req = book.get(&id).unwrap();
        assert_eq!(req.status, RequisitionStatus::Submitted);
        assert_eq!(req.rejection_reason, None);
        assert_eq!(req.history.len(), 3);
    }
}
