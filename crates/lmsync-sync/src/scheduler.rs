use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use lmsync_store::LeaseStore;

use crate::error::SyncResult;

/// Runs singleton background jobs under named leases.
///
/// A job only runs while its lease is held; when another holder owns the
/// lease the run is skipped, not failed.
#[derive(Clone)]
pub struct JobScheduler {
    leases: Arc<dyn LeaseStore>,
    holder: String,
    ttl: chrono::Duration,
}

impl JobScheduler {
    pub fn new(leases: Arc<dyn LeaseStore>, holder: impl Into<String>, ttl: chrono::Duration) -> Self {
        Self {
            leases,
            holder: holder.into(),
            ttl,
        }
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Run `job` once if the lease `name` can be taken. Returns `None` when
    /// skipped.
    pub async fn run<F, Fut, T>(&self, name: &str, job: F) -> SyncResult<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        if self
            .leases
            .try_acquire(name, &self.holder, self.ttl, Utc::now())
            .is_none()
        {
            warn!(job = name, holder = %self.holder, "job skipped, lease held elsewhere");
            return Ok(None);
        }
        debug!(job = name, holder = %self.holder, "job started");
        let result = job().await;
        self.leases.release(name, &self.holder);
        result.map(Some)
    }

    /// Run `job` every `period`, or sooner when `wake` is notified.
    /// Failures are logged and the loop keeps going.
    pub fn spawn_periodic<F, Fut>(
        &self,
        name: &'static str,
        period: Duration,
        wake: Option<Arc<Notify>>,
        job: F,
    ) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SyncResult<()>> + Send + 'static,
    {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                match &wake {
                    Some(notify) => {
                        tokio::select! {
                            _ = ticker.tick() => {}
                            _ = notify.notified() => {}
                        }
                    }
                    None => {
                        ticker.tick().await;
                    }
                }
                if let Err(e) = scheduler.run(name, &job).await {
                    warn!(job = name, error = %e, "scheduled job failed");
                }
            }
        })
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("holder", &self.holder)
            .field("ttl", &self.ttl)
            .finish()
    }
}
