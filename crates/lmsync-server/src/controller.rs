use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use lmsync_event::EventCodec;
use lmsync_pack::{read_resource, Compression, EventResource, EventResourcePacker};
use lmsync_protocol::{
    AckDto, AcksResponse, AgentRegistration, ConfirmResponse, EventBatch, EventIdsRequest,
    ExternalEventDtoMapper, ImportResponse, RegistrationProof, RegistrationResponse,
};
use lmsync_event::Event;
use lmsync_store::EventStore;
use lmsync_sync::{EventImporter, EventPublisher, LocalSyncResults, ReplayRegistry};
use lmsync_types::{EventId, MachineContext, NodeRole};

use crate::auth::{verify_token, MachineIdentity};
use crate::error::{ServerError, ServerResult};
use crate::registry::AgentRegistry;

/// Server side of the peering protocol, independent of HTTP.
pub struct OnlineWebController {
    context: MachineContext,
    store: Arc<dyn EventStore>,
    importer: EventImporter,
    publisher: EventPublisher,
    agents: AgentRegistry,
    mapper: ExternalEventDtoMapper,
    codec: EventCodec,
    token_max_age: Duration,
    export_capacity: u64,
    export_compression: Compression,
    operator_secret: Option<String>,
    last_exchange_at: RwLock<Option<DateTime<Utc>>>,
}

impl OnlineWebController {
    pub fn new(
        context: MachineContext,
        store: Arc<dyn EventStore>,
        replayers: Arc<ReplayRegistry>,
        agents: AgentRegistry,
    ) -> ServerResult<Self> {
        if context.role != NodeRole::OnlineWeb || store.role() != NodeRole::OnlineWeb {
            return Err(ServerError::Config(
                "online web controller needs an online web context and store".into(),
            ));
        }
        Ok(Self {
            importer: EventImporter::new(store.clone(), replayers),
            publisher: EventPublisher::new(store.clone(), context.clone()),
            context,
            store,
            agents,
            mapper: ExternalEventDtoMapper::default(),
            codec: EventCodec::default(),
            token_max_age: Duration::minutes(15),
            export_capacity: 4 * 1024 * 1024,
            export_compression: Compression::None,
            operator_secret: None,
            last_exchange_at: RwLock::new(None),
        })
    }

    pub fn with_token_max_age(mut self, max_age: Duration) -> Self {
        self.token_max_age = max_age;
        self
    }

    pub fn with_export(mut self, capacity: u64, compression: Compression) -> Self {
        self.export_capacity = capacity;
        self.export_compression = compression;
        self
    }

    /// Secret an operator presents to register new agents over HTTP and to
    /// read the server status. Without one, agents are only registered
    /// offline through the registry file.
    pub fn with_operator_secret(mut self, secret: Option<String>) -> Self {
        self.operator_secret = secret.filter(|s| !s.is_empty());
        self
    }

    pub fn context(&self) -> &MachineContext {
        &self.context
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Emits events from the online web itself (master data, approvals).
    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn importer(&self) -> &EventImporter {
        &self.importer
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn export_compression(&self) -> Compression {
        self.export_compression
    }

    /// Register an agent's public key.
    ///
    /// An unknown agent needs the operator secret. A known agent may repeat
    /// its registration freely, but moving to a new key takes a token signed
    /// with the key on file (or the operator secret, for a lost key). An
    /// agent never moves to another facility.
    pub fn register_agent(
        &self,
        registration: &AgentRegistration,
        proof: &RegistrationProof,
    ) -> ServerResult<RegistrationResponse> {
        let agent = match self.agents.get(&registration.agent_id) {
            Some(known) if known.facility_id != registration.facility_id => {
                return Err(ServerError::Forbidden(format!(
                    "agent {} is registered for facility {}",
                    known.agent_id, known.facility_id
                )));
            }
            Some(known) if known.public_key.eq_ignore_ascii_case(&registration.public_key) => known,
            Some(known) => {
                if let Some(token) = proof.token.as_deref() {
                    let identity = self.authenticate(token)?;
                    if identity.agent_id != known.agent_id {
                        return Err(ServerError::Forbidden(format!(
                            "token of agent {} cannot change the key of agent {}",
                            identity.agent_id, known.agent_id
                        )));
                    }
                } else {
                    self.check_operator(proof.operator_secret.as_deref())?;
                }
                warn!(agent_id = %known.agent_id, "agent key replaced");
                self.agents.register(
                    registration.agent_id,
                    registration.facility_id,
                    &registration.public_key,
                )?
            }
            None => {
                self.check_operator(proof.operator_secret.as_deref())?;
                self.agents.register(
                    registration.agent_id,
                    registration.facility_id,
                    &registration.public_key,
                )?
            }
        };
        Ok(RegistrationResponse {
            agent_id: agent.agent_id,
            facility_id: agent.facility_id,
            registered_at: agent.registered_at,
        })
    }

    /// Accept `presented` only if it matches the configured operator secret.
    pub fn check_operator(&self, presented: Option<&str>) -> ServerResult<()> {
        let Some(expected) = self.operator_secret.as_deref() else {
            return Err(ServerError::Forbidden(
                "no operator secret configured; register agents offline with `lmsync register`"
                    .into(),
            ));
        };
        match presented {
            Some(secret) if secret == expected => Ok(()),
            Some(_) => Err(ServerError::Unauthorized("wrong operator secret".into())),
            None => Err(ServerError::Unauthorized("operator secret required".into())),
        }
    }

    /// Sync results of the online web: replay errors and events some
    /// facility has not confirmed yet. The last successful sync is the last
    /// authenticated exchange with any agent.
    pub fn status(&self) -> ServerResult<LocalSyncResults> {
        let last = *self.last_exchange_at.read().expect("lock poisoned");
        Ok(LocalSyncResults::evaluate(
            last,
            None,
            self.store.undelivered()?,
            self.store.sync_errors()?,
        ))
    }

    fn touch(&self) {
        *self.last_exchange_at.write().expect("lock poisoned") = Some(Utc::now());
    }

    pub fn authenticate(&self, token: &str) -> ServerResult<MachineIdentity> {
        verify_token(&self.agents, token, Utc::now(), self.token_max_age)
    }

    /// Store and replay events pushed by an agent. Every event must name
    /// the caller's facility as sender.
    pub fn push_events(
        &self,
        caller: &MachineIdentity,
        batch: EventBatch,
    ) -> ServerResult<ImportResponse> {
        let events = self.mapper.from_dtos(batch.events)?;
        let response = self.import_from(caller, &events)?;
        self.touch();
        Ok(response)
    }

    /// Events addressed to the caller that it has not confirmed yet.
    pub fn peering_events(&self, caller: &MachineIdentity) -> ServerResult<EventBatch> {
        let events = self.store.events_for_receiver(&caller.facility_id)?;
        debug!(facility_id = %caller.facility_id, count = events.len(), "peering events served");
        self.touch();
        Ok(EventBatch {
            events: self.mapper.to_dtos(&events)?,
        })
    }

    /// The caller holds these events; stop delivering them.
    pub fn confirm_received(
        &self,
        caller: &MachineIdentity,
        request: &EventIdsRequest,
    ) -> ServerResult<ConfirmResponse> {
        let confirmed = self
            .store
            .confirm_received_by_receiver(&caller.facility_id, &request.event_ids)?;
        Ok(ConfirmResponse { confirmed })
    }

    /// Phase-1 acknowledgements owed to the caller for events it pushed.
    pub fn acks(&self, caller: &MachineIdentity) -> ServerResult<AcksResponse> {
        let acks = self.store.acks_for_event_sender(&caller.facility_id)?;
        Ok(AcksResponse {
            acks: acks.into_iter().map(AckDto::from).collect(),
        })
    }

    /// Phase 2: the caller recorded our acknowledgements. Only ids of
    /// events the caller sent are accepted.
    pub fn confirm_acks_shipped(
        &self,
        caller: &MachineIdentity,
        request: &EventIdsRequest,
    ) -> ServerResult<ConfirmResponse> {
        let mut own: Vec<EventId> = Vec::with_capacity(request.event_ids.len());
        for id in &request.event_ids {
            if let Some(record) = self.store.get(id)? {
                if record.event.sender_id == caller.facility_id {
                    own.push(*id);
                }
            }
        }
        let confirmed = self.store.confirm_ack_shipped(&own)?;
        Ok(ConfirmResponse { confirmed })
    }

    /// Pack the caller's pending events into one bounded resource.
    ///
    /// Events that do not fit stay pending for the next export.
    pub fn export_events(&self, caller: &MachineIdentity) -> ServerResult<EventResource> {
        let mut packer = EventResourcePacker::with_compression(
            self.export_capacity,
            self.codec.clone(),
            self.export_compression,
        );
        for event in self.store.events_for_receiver(&caller.facility_id)? {
            if packer.write_get_remaining_capacity(&event)? <= 0 {
                break;
            }
        }
        let resource = packer.to_resource()?;
        info!(
            facility_id = %caller.facility_id,
            events = resource.count,
            bytes = resource.len(),
            "events exported"
        );
        Ok(resource)
    }

    /// Import an event resource produced by an agent.
    pub fn import_events(
        &self,
        caller: &MachineIdentity,
        bytes: &[u8],
        compression: Compression,
    ) -> ServerResult<ImportResponse> {
        let events = read_resource(bytes, &self.codec, compression)?;
        let response = self.import_from(caller, &events)?;
        self.touch();
        Ok(response)
    }

    pub fn prune(&self) -> ServerResult<usize> {
        Ok(self.store.prune()?)
    }

    fn import_from(&self, caller: &MachineIdentity, events: &[Event]) -> ServerResult<ImportResponse> {
        if let Some(foreign) = events.iter().find(|e| e.sender_id != caller.facility_id) {
            return Err(ServerError::InvalidRequest(format!(
                "event {} was sent by {}, not by {}",
                foreign.id, foreign.sender_id, caller.facility_id
            )));
        }
        let report = self.importer.import_events(events)?;
        Ok(ImportResponse::from(&report))
    }
}

impl std::fmt::Debug for OnlineWebController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnlineWebController")
            .field("facility_id", &self.context.facility_id)
            .field("agents", &self.agents.len())
            .finish()
    }
}
