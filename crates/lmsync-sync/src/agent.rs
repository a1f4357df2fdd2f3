use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use lmsync_crypto::{MachineToken, SigningKey, VerifyingKey};
use lmsync_event::EventCodec;
use lmsync_pack::{read_event_files, Compression, EventFileChain, EventResource, EventResourcePacker};
use lmsync_protocol::{
    AgentRegistration, EventBatch, EventIdsRequest, ExternalEventDtoMapper, RegistrationProof,
};
use lmsync_store::EventStore;
use lmsync_types::{AgentId, MachineContext};

use crate::error::{SyncError, SyncResult};
use crate::importer::{EventImporter, ImportReport};
use crate::replay::ReplayRegistry;
use crate::scheduler::JobScheduler;
use crate::status::{CycleReport, LocalSyncResults};
use crate::transport::PeerTransport;

/// Lifecycle of the agent side of the peering protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Unactivated,
    Activated,
    Syncing,
    Idle,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unactivated => write!(f, "unactivated"),
            Self::Activated => write!(f, "activated"),
            Self::Syncing => write!(f, "syncing"),
            Self::Idle => write!(f, "idle"),
        }
    }
}

struct AgentInner {
    state: AgentState,
    signing_key: Option<Arc<SigningKey>>,
    last_successful_sync_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Drives synchronization from a facility-local machine.
pub struct LocalAgentController {
    context: MachineContext,
    agent_id: AgentId,
    store: Arc<dyn EventStore>,
    importer: EventImporter,
    transport: Option<Arc<dyn PeerTransport>>,
    codec: EventCodec,
    mapper: ExternalEventDtoMapper,
    enrollment_secret: Option<String>,
    status_file: Option<PathBuf>,
    inner: Mutex<AgentInner>,
}

impl LocalAgentController {
    /// An agent without a link to the online web; it can still move events
    /// through files. Fails if `context` carries no agent id.
    pub fn new(
        context: MachineContext,
        store: Arc<dyn EventStore>,
        registry: Arc<ReplayRegistry>,
    ) -> SyncResult<Self> {
        let agent_id = context.require_agent()?;
        Ok(Self {
            context,
            agent_id,
            importer: EventImporter::new(store.clone(), registry),
            store,
            transport: None,
            codec: EventCodec::default(),
            mapper: ExternalEventDtoMapper::default(),
            enrollment_secret: None,
            status_file: None,
            inner: Mutex::new(AgentInner {
                state: AgentState::Unactivated,
                signing_key: None,
                last_successful_sync_at: None,
                last_error: None,
            }),
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn PeerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Resume with a key registered in an earlier run.
    pub fn with_signing_key(self, key: SigningKey) -> Self {
        {
            let mut inner = self.inner.lock().expect("lock poisoned");
            inner.signing_key = Some(Arc::new(key));
            inner.state = AgentState::Activated;
        }
        self
    }

    /// Operator secret for the first registration with the online web.
    pub fn with_enrollment_secret(mut self, secret: Option<String>) -> Self {
        self.enrollment_secret = secret;
        self
    }

    /// Keep the sync results in `path` so they outlive this process. The
    /// last snapshot found there seeds the results.
    pub fn with_status_file(mut self, path: impl Into<PathBuf>) -> SyncResult<Self> {
        let path = path.into();
        if let Some(snapshot) = LocalSyncResults::load(&path)? {
            let mut inner = self.inner.lock().expect("lock poisoned");
            inner.last_successful_sync_at = snapshot.last_successful_sync_at;
            inner.last_error = snapshot.last_error;
        }
        self.status_file = Some(path);
        Ok(self)
    }

    pub fn context(&self) -> &MachineContext {
        &self.context
    }

    pub fn importer(&self) -> &EventImporter {
        &self.importer
    }

    fn transport(&self) -> SyncResult<&Arc<dyn PeerTransport>> {
        self.transport.as_ref().ok_or(SyncError::NoTransport)
    }

    pub fn state(&self) -> AgentState {
        self.inner.lock().expect("lock poisoned").state
    }

    /// Generate a key pair and register its public half with the online web.
    ///
    /// An agent that already holds a key proves it by signing a token with
    /// the old key; a new agent presents the enrollment secret. Returns the
    /// signing key so the caller can persist it.
    pub async fn activate(&self) -> SyncResult<Arc<SigningKey>> {
        let transport = self.transport()?;
        let previous = {
            let inner = self.inner.lock().expect("lock poisoned");
            if inner.state == AgentState::Syncing {
                return Err(SyncError::SyncInProgress);
            }
            inner.signing_key.clone()
        };
        let key = Arc::new(SigningKey::generate());
        let registration = AgentRegistration {
            agent_id: self.agent_id,
            facility_id: self.context.facility_id,
            public_key: key.verifying_key().to_hex(),
        };
        let mut proof = RegistrationProof {
            operator_secret: self.enrollment_secret.clone(),
            token: None,
        };
        if let Some(old) = previous {
            proof.token = Some(self.token_for(&old)?);
        }
        transport.register(&registration, &proof).await?;

        let mut inner = self.inner.lock().expect("lock poisoned");
        inner.signing_key = Some(key.clone());
        inner.state = AgentState::Activated;
        info!(agent_id = %self.agent_id, facility_id = %self.context.facility_id, "agent activated");
        Ok(key)
    }

    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        let inner = self.inner.lock().expect("lock poisoned");
        inner.signing_key.as_ref().map(|k| k.verifying_key())
    }

    /// A fresh machine token for calls made outside a sync cycle.
    pub fn issue_token(&self) -> SyncResult<String> {
        let key = self
            .inner
            .lock()
            .expect("lock poisoned")
            .signing_key
            .clone()
            .ok_or(SyncError::NotActivated)?;
        self.token_for(&key)
    }

    fn token_for(&self, key: &SigningKey) -> SyncResult<String> {
        Ok(MachineToken::issue_now(self.agent_id, self.context.facility_id, key)?.encode())
    }

    /// One full exchange with the online web:
    ///
    /// 1. push pending local events
    /// 2. pull owed acks, confirm phase 1, ship them back, confirm phase 2
    /// 3. pull events addressed to this facility, import, confirm receipt
    /// 4. prune what every party has confirmed
    ///
    /// Every step is safe to repeat, so a cycle that fails midway is simply
    /// run again.
    pub async fn sync_cycle(&self) -> SyncResult<CycleReport> {
        let key = self.begin_cycle()?;
        let result = self.run_cycle(&key).await;

        {
            let mut inner = self.inner.lock().expect("lock poisoned");
            inner.state = AgentState::Idle;
            match &result {
                Ok(report) => {
                    inner.last_successful_sync_at = Some(Utc::now());
                    inner.last_error = None;
                    info!(
                        pushed = report.pushed,
                        acked = report.acked,
                        pulled = report.pulled,
                        pruned = report.pruned,
                        "sync cycle finished"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "sync cycle failed");
                    inner.last_error = Some(e.to_string());
                }
            }
        }
        self.persist_status();
        result
    }

    fn persist_status(&self) {
        let Some(path) = &self.status_file else {
            return;
        };
        if let Err(e) = self.status().and_then(|status| status.save(path)) {
            warn!(error = %e, path = %path.display(), "sync status not saved");
        }
    }

    /// Run [`Self::sync_cycle`] every `period` under the `sync` lease, and
    /// early whenever `wake` is notified (see
    /// [`crate::EventPublisher::with_notify`]).
    pub fn spawn_sync_loop(
        self: &Arc<Self>,
        scheduler: &JobScheduler,
        period: Duration,
        wake: Option<Arc<Notify>>,
    ) -> JoinHandle<()> {
        let agent = self.clone();
        scheduler.spawn_periodic("sync", period, wake, move || {
            let agent = agent.clone();
            async move { agent.sync_cycle().await.map(|_| ()) }
        })
    }

    fn begin_cycle(&self) -> SyncResult<Arc<SigningKey>> {
        let mut inner = self.inner.lock().expect("lock poisoned");
        match inner.state {
            AgentState::Unactivated => return Err(SyncError::NotActivated),
            AgentState::Syncing => return Err(SyncError::SyncInProgress),
            AgentState::Activated | AgentState::Idle => {}
        }
        let key = inner.signing_key.clone().ok_or(SyncError::NotActivated)?;
        inner.state = AgentState::Syncing;
        Ok(key)
    }

    async fn run_cycle(&self, key: &SigningKey) -> SyncResult<CycleReport> {
        let transport = self.transport()?;
        let token = self.token_for(key)?;
        let mut report = CycleReport::default();

        let pending = self.store.pending_for_online_web()?;
        if !pending.is_empty() {
            let batch = EventBatch {
                events: self.mapper.to_dtos(&pending)?,
            };
            let response = transport.push_events(&token, batch).await?;
            report.pushed = pending.len().saturating_sub(response.failed.len());
            report.push_failed = response.failed;
        }

        let acks = transport.fetch_acks(&token).await?;
        let ids = acks.event_ids();
        if !ids.is_empty() {
            self.store.confirm_received_to_online_web(&ids)?;
            transport
                .confirm_acks_shipped(&token, &EventIdsRequest::new(ids.clone()))
                .await?;
            report.acked = self.store.confirm_ack_shipped(&ids)?;
        }

        let batch = transport.fetch_peering_events(&token).await?;
        if !batch.events.is_empty() {
            let events = self.mapper.from_dtos(batch.events)?;
            let imported = self.importer.import_events(&events)?;
            let confirmable = imported.confirmable_ids();
            if !confirmable.is_empty() {
                transport
                    .confirm_received(&token, &EventIdsRequest::new(confirmable.clone()))
                    .await?;
                self.store
                    .confirm_received_by_receiver(&self.context.facility_id, &confirmable)?;
            }
            report.pulled = confirmable.len();
            report.pull_failed = imported.failed;
        }

        report.pruned = self.store.prune()?;
        Ok(report)
    }

    /// Write every event still pending for the online web into a chain of
    /// event files of at most `capacity` bytes each (one event may overflow
    /// a file, never split). Returns the files in order.
    pub fn export_to_files(
        &self,
        dir: &Path,
        capacity: u64,
        compression: Compression,
    ) -> SyncResult<Vec<PathBuf>> {
        std::fs::create_dir_all(dir)?;
        let pending = self.store.pending_for_online_web()?;
        let prefix = format!("{}", self.context.facility_id);
        let mut chain =
            EventFileChain::with_compression(dir, &prefix, capacity, self.codec.clone(), compression);
        for event in &pending {
            chain.write(event)?;
        }
        let files = chain.finish()?;
        info!(events = pending.len(), files = files.len(), dir = %dir.display(), "events exported");
        Ok(files)
    }

    /// Pack pending events into one resource for `POST /events/import`.
    /// Events beyond `capacity` wait for the next upload.
    pub fn pending_resource(
        &self,
        capacity: u64,
        compression: Compression,
    ) -> SyncResult<EventResource> {
        let mut packer =
            EventResourcePacker::with_compression(capacity, self.codec.clone(), compression);
        for event in self.store.pending_for_online_web()? {
            if packer.is_full() {
                break;
            }
            packer.write_get_remaining_capacity(&event)?;
        }
        Ok(packer.to_resource()?)
    }

    /// Import event files carried in by hand.
    pub fn import_from_files(
        &self,
        paths: &[PathBuf],
        compression: Compression,
    ) -> SyncResult<ImportReport> {
        let events = read_event_files(paths, &self.codec, compression)?;
        self.importer.import_events(&events)
    }

    pub fn status(&self) -> SyncResult<LocalSyncResults> {
        let pending = self.store.pending_for_online_web()?.len();
        let errors = self.store.sync_errors()?;
        let inner = self.inner.lock().expect("lock poisoned");
        Ok(LocalSyncResults::evaluate(
            inner.last_successful_sync_at,
            inner.last_error.clone(),
            pending,
            errors,
        ))
    }
}

impl fmt::Debug for LocalAgentController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAgentController")
            .field("agent_id", &self.agent_id)
            .field("facility_id", &self.context.facility_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lmsync_event::{EventPayload, LineItem, RequisitionSubmitted};
    use lmsync_protocol::{
        AcksResponse, ConfirmResponse, ImportResponse, RegistrationResponse,
    };
    use lmsync_store::InMemoryEventStore;
    use lmsync_types::{FacilityId, GroupId, NodeRole};

    use crate::publisher::EventPublisher;
    use crate::replay::{RequisitionBook, RequisitionReplayer};
    use crate::status::SyncStatus;

    /// Online web that accepts registration and is unreachable afterwards.
    #[derive(Default)]
    struct Offline {
        proofs: Mutex<Vec<RegistrationProof>>,
    }

    #[async_trait]
    impl PeerTransport for Offline {
        async fn register(
            &self,
            registration: &AgentRegistration,
            proof: &RegistrationProof,
        ) -> SyncResult<RegistrationResponse> {
            self.proofs.lock().unwrap().push(proof.clone());
            Ok(RegistrationResponse {
                agent_id: registration.agent_id,
                facility_id: registration.facility_id,
                registered_at: Utc::now(),
            })
        }

        async fn push_events(&self, _token: &str, _batch: EventBatch) -> SyncResult<ImportResponse> {
            Err(SyncError::Transport("connection refused".into()))
        }

        async fn fetch_acks(&self, _token: &str) -> SyncResult<AcksResponse> {
            Err(SyncError::Transport("connection refused".into()))
        }

        async fn confirm_acks_shipped(
            &self,
            _token: &str,
            _request: &EventIdsRequest,
        ) -> SyncResult<ConfirmResponse> {
            Err(SyncError::Transport("connection refused".into()))
        }

        async fn fetch_peering_events(&self, _token: &str) -> SyncResult<EventBatch> {
            Err(SyncError::Transport("connection refused".into()))
        }

        async fn confirm_received(
            &self,
            _token: &str,
            _request: &EventIdsRequest,
        ) -> SyncResult<ConfirmResponse> {
            Err(SyncError::Transport("connection refused".into()))
        }
    }

    fn agent(store: Arc<InMemoryEventStore>) -> (LocalAgentController, Arc<RequisitionBook>) {
        let book = Arc::new(RequisitionBook::new());
        let mut registry = ReplayRegistry::new();
        for r in RequisitionReplayer::all(book.clone()) {
            registry.register(r);
        }
        let context = MachineContext::agent(FacilityId::random(), AgentId::random());
        let controller = LocalAgentController::new(context, store, Arc::new(registry))
            .unwrap()
            .with_transport(Arc::new(Offline::default()));
        (controller, book)
    }

    fn agent_store() -> Arc<InMemoryEventStore> {
        Arc::new(InMemoryEventStore::in_memory(
            NodeRole::Agent,
            EventCodec::default(),
        ))
    }

    fn submit(publisher: &EventPublisher, n: usize) {
        let group = Some(GroupId::random());
        for i in 0..n {
            publisher
                .emit_group_event(
                    group,
                    None,
                    EventPayload::RequisitionSubmitted(RequisitionSubmitted {
                        requisition_id: uuid::Uuid::new_v4(),
                        program_code: "TB".into(),
                        submitted_by: format!("clerk-{i}"),
                        line_items: vec![LineItem {
                            product_code: "RHZE".into(),
                            quantity: 100,
                        }],
                    }),
                )
                .unwrap();
        }
    }

    #[test]
    fn context_without_agent_is_rejected() {
        let result = LocalAgentController::new(
            MachineContext::online_web(FacilityId::random()),
            agent_store(),
            Arc::new(ReplayRegistry::new()),
        );
        assert!(matches!(result, Err(SyncError::Context(_))));
    }

    #[tokio::test]
    async fn sync_without_transport_fails() {
        let context = MachineContext::agent(FacilityId::random(), AgentId::random());
        let controller =
            LocalAgentController::new(context, agent_store(), Arc::new(ReplayRegistry::new()))
                .unwrap()
                .with_signing_key(SigningKey::generate());
        assert!(matches!(
            controller.sync_cycle().await,
            Err(SyncError::NoTransport)
        ));
        assert_eq!(controller.state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn sync_requires_activation() {
        let (controller, _) = agent(agent_store());
        assert_eq!(controller.state(), AgentState::Unactivated);
        assert!(matches!(
            controller.sync_cycle().await,
            Err(SyncError::NotActivated)
        ));
    }

    #[tokio::test]
    async fn failed_cycle_is_reported_in_status() {
        let store = agent_store();
        let (controller, _) = agent(store.clone());
        let publisher = EventPublisher::new(store, controller.context().clone());
        submit(&publisher, 2);

        assert_eq!(controller.status().unwrap().status, SyncStatus::Pending);
        controller.activate().await.unwrap();
        assert!(controller.verifying_key().is_some());
        assert!(controller.sync_cycle().await.is_err());

        let status = controller.status().unwrap();
        assert_eq!(controller.state(), AgentState::Idle);
        assert_eq!(status.status, SyncStatus::Error);
        assert_eq!(status.pending_outgoing, 2);
        assert!(status.last_error.unwrap().contains("connection refused"));
    }

    #[test]
    fn events_travel_by_file() {
        let dir = tempfile::tempdir().unwrap();
        let sender_store = agent_store();
        let (sender, _) = agent(sender_store.clone());
        let publisher = EventPublisher::new(sender_store, sender.context().clone());
        submit(&publisher, 25);

        let files = sender
            .export_to_files(dir.path(), 1024, Compression::None)
            .unwrap();
        assert!(files.len() > 1);

        let (receiver, book) = agent(agent_store());
        let report = receiver
            .import_from_files(&files, Compression::None)
            .unwrap();
        assert_eq!(report.imported.len(), 25);
        assert_eq!(book.len(), 25);

        let again = receiver
            .import_from_files(&files, Compression::None)
            .unwrap();
        assert_eq!(again.duplicates.len(), 25);
        assert_eq!(book.outbox().len(), 25);
    }

    #[tokio::test]
    async fn reactivation_is_signed_with_the_old_key() {
        let offline = Arc::new(Offline::default());
        let context = MachineContext::agent(FacilityId::random(), AgentId::random());
        let controller =
            LocalAgentController::new(context, agent_store(), Arc::new(ReplayRegistry::new()))
                .unwrap()
                .with_transport(offline.clone())
                .with_enrollment_secret(Some("enroll".into()));

        let first = controller.activate().await.unwrap();
        controller.activate().await.unwrap();

        let proofs = offline.proofs.lock().unwrap().clone();
        assert_eq!(proofs.len(), 2);
        assert_eq!(proofs[0].operator_secret.as_deref(), Some("enroll"));
        assert!(proofs[0].token.is_none());
        let token = MachineToken::decode(proofs[1].token.as_deref().unwrap()).unwrap();
        token
            .verify_fresh(&first.verifying_key(), Utc::now(), chrono::Duration::minutes(1))
            .unwrap();
    }

    #[tokio::test]
    async fn status_file_outlives_the_controller() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync-status.json");
        let store = agent_store();
        let context = MachineContext::agent(FacilityId::random(), AgentId::random());
        let controller = LocalAgentController::new(
            context.clone(),
            store.clone(),
            Arc::new(ReplayRegistry::new()),
        )
        .unwrap()
        .with_transport(Arc::new(Offline::default()))
        .with_signing_key(SigningKey::generate())
        .with_status_file(&path)
        .unwrap();
        assert!(controller.sync_cycle().await.is_err());
        drop(controller);

        let reopened = LocalAgentController::new(context, store, Arc::new(ReplayRegistry::new()))
            .unwrap()
            .with_status_file(&path)
            .unwrap();
        let status = reopened.status().unwrap();
        assert_eq!(status.status, SyncStatus::Error);
        assert!(status.last_error.unwrap().contains("connection refused"));
    }

    #[test]
    fn pending_resource_is_bounded() {
        let store = agent_store();
        let (controller, _) = agent(store.clone());
        let publisher = EventPublisher::new(store, controller.context().clone());
        submit(&publisher, 20);

        let resource = controller.pending_resource(600, Compression::Zstd).unwrap();
        assert!(resource.count > 0 && resource.count < 20);
        assert_eq!(resource.compression, Compression::Zstd);
        let events = resource.read_events(&EventCodec::default()).unwrap();
        assert_eq!(events.len(), resource.count);
        assert!(events.iter().all(|e| e.sender_id == controller.context().facility_id));
    }
}
