use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;
use zkpanel_core::{Config, Workspace};
use zkpanel_kernel::Kernel;

use crate::scheduler::{SchedulerOptions, SessionSnapshot, WorkspaceScheduler};
use crate::transport::SyncTransport;

/// One scheduler per workspace. Schedulers share the store and the transport
/// but no timers or session state.
pub struct SchedulerRegistry {
    schedulers: BTreeMap<Workspace, WorkspaceScheduler>,
}

impl SchedulerRegistry {
    pub fn new(kernel: Kernel, transport: Arc<dyn SyncTransport>, config: &Config) -> Self {
        let schedulers = Workspace::ALL
            .into_iter()
            .map(|ws| {
                let options = SchedulerOptions {
                    interval_secs: config.sync.interval_secs,
                    default_credentials: config.workspaces.credentials(ws).cloned(),
                };
                let scheduler =
                    WorkspaceScheduler::new(ws, kernel.clone(), transport.clone(), options);
                (ws, scheduler)
            })
            .collect();
        Self { schedulers }
    }

    pub fn get(&self, workspace: Workspace) -> &WorkspaceScheduler {
        // Every workspace gets a scheduler in `new`.
        &self.schedulers[&workspace]
    }

    /// Restore each workspace from its persisted settings. A workspace whose
    /// flag is on but whose credentials no longer validate stays disabled.
    pub async fn rehydrate(&self) {
        for (ws, scheduler) in &self.schedulers {
            if let Err(err) = scheduler.hydrate().await {
                warn!(
                    target: "zkpanel::sync",
                    workspace = %ws,
                    code = err.code(),
                    "could not restore sync schedule: {}", err
                );
            }
        }
    }

    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        self.schedulers.values().map(|s| s.snapshot()).collect()
    }

    pub fn dispose_all(&self) {
        for scheduler in self.schedulers.values() {
            scheduler.dispose();
        }
    }
}
