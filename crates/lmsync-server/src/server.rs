use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use lmsync_event::EventCodec;
use lmsync_store::{EventStore, FileEventStore, InMemoryLeaseStore};
use lmsync_sync::{DomainState, JobScheduler};
use lmsync_types::{MachineContext, NodeRole};

use crate::config::ServerConfig;
use crate::controller::OnlineWebController;
use crate::error::{ServerError, ServerResult};
use crate::registry::AgentRegistry;
use crate::router::build_router;

/// The online web: journaled event store, agent registry and HTTP API.
pub struct LmsyncServer {
    config: ServerConfig,
    store: Arc<FileEventStore>,
    controller: Arc<OnlineWebController>,
    domain: DomainState,
}

impl LmsyncServer {
    /// Open the data directory named by `config`, creating it if needed.
    pub fn open(config: ServerConfig) -> ServerResult<Self> {
        let facility_id = config
            .facility_id
            .ok_or_else(|| ServerError::Config("facility_id must be set".into()))?;
        std::fs::create_dir_all(&config.data_dir)?;

        let store = Arc::new(FileEventStore::open(
            &config.journal_path(),
            NodeRole::OnlineWeb,
            EventCodec::default(),
            config.sync_mode,
        )?);
        let agents = AgentRegistry::open(&config.registry_path())?;
        let domain = DomainState::default();
        let controller = OnlineWebController::new(
            MachineContext::online_web(facility_id),
            store.clone(),
            Arc::new(domain.replay_registry()),
            agents,
        )?
        .with_token_max_age(config.token_max_age())
        .with_export(config.export_capacity_bytes, config.export_compression)
        .with_operator_secret(config.operator_secret.clone());

        let retried = controller.importer().retry_unreplayed()?;
        info!(
            events = store.len()?,
            agents = controller.agents().len(),
            replayed = retried.imported.len(),
            "online web opened"
        );
        Ok(Self {
            config,
            store,
            controller: Arc::new(controller),
            domain,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<OnlineWebController> {
        &self.controller
    }

    pub fn domain(&self) -> &DomainState {
        &self.domain
    }

    /// Build the router (useful for testing).
    pub fn router(&self) -> axum::Router {
        build_router(self.controller.clone())
    }

    /// Start the prune and compaction jobs.
    pub fn spawn_maintenance(&self, scheduler: &JobScheduler) -> Vec<JoinHandle<()>> {
        let store = self.store.clone();
        let prune = scheduler.spawn_periodic(
            "prune",
            Duration::from_secs(self.config.prune_interval_secs),
            None,
            move || {
                let store = store.clone();
                async move {
                    let pruned = store.prune()?;
                    if pruned > 0 {
                        info!(pruned, "events pruned");
                    }
                    Ok(())
                }
            },
        );
        let store = self.store.clone();
        let compact = scheduler.spawn_periodic(
            "compact",
            Duration::from_secs(self.config.compact_interval_secs),
            None,
            move || {
                let store = store.clone();
                async move {
                    let ops = store.compact()?;
                    info!(ops, "journal compacted");
                    Ok(())
                }
            },
        );
        vec![prune, compact]
    }

    /// Start serving requests, with maintenance jobs in the background.
    pub async fn serve(self) -> ServerResult<()> {
        let scheduler = JobScheduler::new(
            Arc::new(InMemoryLeaseStore::new()),
            format!("online-web-{}", self.controller.context().facility_id),
            chrono::Duration::seconds(self.config.prune_interval_secs.max(60) as i64),
        );
        let jobs = self.spawn_maintenance(&scheduler);

        let app = self.router();
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(addr = %self.config.bind_addr, "lmsync server listening");
        let served = axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()));
        for job in jobs {
            job.abort();
        }
        served
    }
}
