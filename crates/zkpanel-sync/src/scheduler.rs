use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use zkpanel_core::{Credentials, Respondent, Workspace, DEFAULT_SYNC_INTERVAL_SECS};
use zkpanel_kernel::Kernel;
use zkpanel_protocol::SyncRequest;

use crate::error::SyncError;
use crate::transport::{validate_credentials, SyncTransport};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub interval_secs: u64,
    /// Used when no credentials were stored for the workspace.
    pub default_credentials: Option<Credentials>,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            default_credentials: None,
        }
    }
}

/// Live view of one workspace's sync session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub workspace: Workspace,
    pub enabled: bool,
    pub interval_seconds: u64,
    /// Seconds until the next scheduled fire, in `1..=interval_seconds`.
    pub countdown: u64,
    pub in_flight: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOrigin {
    Manual,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTrigger {
    pub origin: SyncOrigin,
    /// Silent syncs leave `last_error` untouched on failure.
    pub silent: bool,
}

impl SyncTrigger {
    pub fn manual() -> Self {
        Self {
            origin: SyncOrigin::Manual,
            silent: false,
        }
    }

    pub fn scheduled() -> Self {
        Self {
            origin: SyncOrigin::Scheduled,
            silent: true,
        }
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub success: bool,
    pub added_count: usize,
    pub received_count: usize,
    /// `dataPoints.respondentsAdded` as reported by the panel.
    pub reported_added: u64,
    pub synced_at: DateTime<Utc>,
}

struct Inner {
    workspace: Workspace,
    interval_secs: u64,
    kernel: Kernel,
    transport: Arc<dyn SyncTransport>,
    default_credentials: Option<Credentials>,
    stored_credentials: Mutex<Option<Credentials>>,
    state: watch::Sender<SessionSnapshot>,
    // Guards the timer handle; enable/disable bookkeeping happens under it.
    timer: Mutex<Option<JoinHandle<()>>>,
    generation: AtomicU64,
    flight: Arc<tokio::sync::Mutex<()>>,
    // Held across the stale check and the merge; disable waits on it.
    merge_gate: tokio::sync::Mutex<()>,
    // Serializes enable/disable so the last call decides timers and flag.
    toggle: tokio::sync::Mutex<()>,
}

/// Periodic sync for one workspace.
///
/// While enabled, a tick timer decrements the countdown every second and a
/// fire timer calls the panel every `interval_secs`, both started at the same
/// instant. At most one call is in flight; a fire that finds one running is
/// skipped.
#[derive(Clone)]
pub struct WorkspaceScheduler {
    inner: Arc<Inner>,
}

impl WorkspaceScheduler {
    pub fn new(
        workspace: Workspace,
        kernel: Kernel,
        transport: Arc<dyn SyncTransport>,
        options: SchedulerOptions,
    ) -> Self {
        let interval_secs = options.interval_secs.max(1);
        let (state, _) = watch::channel(SessionSnapshot {
            workspace,
            enabled: false,
            interval_seconds: interval_secs,
            countdown: interval_secs,
            in_flight: false,
            last_sync_at: None,
            last_error: None,
            consecutive_failures: 0,
        });
        Self {
            inner: Arc::new(Inner {
                workspace,
                interval_secs,
                kernel,
                transport,
                default_credentials: options.default_credentials,
                stored_credentials: Mutex::new(None),
                state,
                timer: Mutex::new(None),
                generation: AtomicU64::new(0),
                flight: Arc::new(tokio::sync::Mutex::new(())),
                merge_gate: tokio::sync::Mutex::new(()),
                toggle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn workspace(&self) -> Workspace {
        self.inner.workspace
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.state.subscribe()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.state.borrow().enabled
    }

    /// Load persisted credentials and last sync time; restart the schedule if
    /// the persisted flag is on.
    pub async fn hydrate(&self) -> Result<SessionSnapshot, SyncError> {
        let settings = self
            .inner
            .kernel
            .sync_settings_async(self.inner.workspace)
            .await?;
        *lock(&self.inner.stored_credentials) = settings.credentials;
        self.inner
            .state
            .send_modify(|s| s.last_sync_at = settings.last_sync_at);
        if settings.enabled {
            self.set_enabled(true).await
        } else {
            Ok(self.snapshot())
        }
    }

    /// Turn the schedule on or off. Both directions are idempotent.
    pub async fn set_enabled(&self, enabled: bool) -> Result<SessionSnapshot, SyncError> {
        let _toggle = self.inner.toggle.lock().await;
        if enabled {
            self.enable().await
        } else {
            self.disable().await
        }
    }

    async fn enable(&self) -> Result<SessionSnapshot, SyncError> {
        if self.is_enabled() {
            return Ok(self.snapshot());
        }
        self.inner.credentials()?;
        self.inner
            .kernel
            .set_sync_enabled_async(self.inner.workspace, true)
            .await?;
        if self.start_timers() {
            info!(
                target: "zkpanel::sync",
                workspace = %self.inner.workspace,
                interval_secs = self.inner.interval_secs,
                "sync schedule enabled"
            );
        }
        Ok(self.snapshot())
    }

    async fn disable(&self) -> Result<SessionSnapshot, SyncError> {
        let stopped = self.stop_timers();
        // A merge that passed its stale check before the stop finishes first.
        drop(self.inner.merge_gate.lock().await);
        self.inner
            .kernel
            .set_sync_enabled_async(self.inner.workspace, false)
            .await?;
        if stopped {
            info!(
                target: "zkpanel::sync",
                workspace = %self.inner.workspace,
                "sync schedule disabled"
            );
        }
        Ok(self.snapshot())
    }

    /// Stop the timers without touching the persisted flag.
    pub fn dispose(&self) {
        if self.stop_timers() {
            debug!(target: "zkpanel::sync", workspace = %self.inner.workspace, "scheduler disposed");
        }
    }

    /// Validate and store credentials for later syncs.
    pub async fn set_credentials(&self, credentials: Credentials) -> Result<(), SyncError> {
        validate_credentials(&credentials).map_err(|reason| SyncError::Config {
            workspace: self.inner.workspace,
            reason,
        })?;
        self.inner
            .kernel
            .set_credentials_async(self.inner.workspace, credentials.clone())
            .await?;
        *lock(&self.inner.stored_credentials) = Some(credentials);
        Ok(())
    }

    /// Run one sync now.
    ///
    /// Returns `InFlight` without calling the panel if another sync is
    /// running. If the workspace was enabled at dispatch and is disabled (or
    /// re-enabled) before the response arrives, the response is dropped and
    /// `Discarded` is returned.
    pub async fn trigger_sync(&self, trigger: SyncTrigger) -> Result<SyncReport, SyncError> {
        self.dispatch(trigger, None).await
    }

    /// Sync started by the fire timer of `generation`. It counts as
    /// dispatched while enabled, so a later disable discards it.
    async fn trigger_scheduled(&self, generation: u64) -> Result<SyncReport, SyncError> {
        self.dispatch(SyncTrigger::scheduled(), Some(generation)).await
    }

    async fn dispatch(
        &self,
        trigger: SyncTrigger,
        fired_by: Option<u64>,
    ) -> Result<SyncReport, SyncError> {
        let Ok(slot) = self.inner.flight.clone().try_lock_owned() else {
            debug!(
                target: "zkpanel::sync",
                workspace = %self.inner.workspace,
                origin = ?trigger.origin,
                "sync skipped; previous call still in flight"
            );
            return Err(SyncError::InFlight);
        };
        let _flight = FlightGuard::start(self.inner.clone(), slot);

        let (generation, enabled_at_dispatch) = match fired_by {
            Some(generation) => (generation, true),
            None => {
                let _timer = lock(&self.inner.timer);
                (
                    self.inner.generation.load(Ordering::SeqCst),
                    self.inner.state.borrow().enabled,
                )
            }
        };

        let result = if enabled_at_dispatch && !self.inner.is_current(generation) {
            Err(SyncError::Discarded)
        } else {
            self.run(generation, enabled_at_dispatch).await
        };
        self.record_outcome(trigger, &result);
        result
    }

    async fn run(
        &self,
        generation: u64,
        enabled_at_dispatch: bool,
    ) -> Result<SyncReport, SyncError> {
        let inner = &self.inner;
        let credentials = inner.credentials()?;
        let request = SyncRequest {
            user_id: credentials.user_id.clone(),
            workspace_id: credentials.workspace_id.clone(),
            timestamp: Utc::now(),
        };
        let response = inner.transport.sync(&credentials, &request).await?;

        let _gate = inner.merge_gate.lock().await;
        if enabled_at_dispatch && !inner.is_current(generation) {
            return Err(SyncError::Discarded);
        }

        let synced_at = Utc::now();
        let received_count = response.respondents.len();
        let batch: Vec<Respondent> = response
            .respondents
            .into_iter()
            .map(|remote| Respondent::from_remote(remote, synced_at))
            .collect();
        let added_count = inner
            .kernel
            .merge_sync_batch_async(inner.workspace, batch, synced_at)
            .await?;

        Ok(SyncReport {
            success: true,
            added_count,
            received_count,
            reported_added: response.data_points.respondents_added,
            synced_at,
        })
    }

    fn record_outcome(&self, trigger: SyncTrigger, result: &Result<SyncReport, SyncError>) {
        let inner = &self.inner;
        match result {
            Ok(report) => {
                inner.state.send_modify(|s| {
                    s.last_sync_at = Some(report.synced_at);
                    s.countdown = inner.interval_secs;
                    s.last_error = None;
                    s.consecutive_failures = 0;
                });
                info!(
                    target: "zkpanel::sync",
                    workspace = %inner.workspace,
                    origin = ?trigger.origin,
                    added = report.added_count,
                    received = report.received_count,
                    "sync merged"
                );
            }
            Err(SyncError::Discarded) => {
                debug!(
                    target: "zkpanel::sync",
                    workspace = %inner.workspace,
                    origin = ?trigger.origin,
                    "workspace disabled during sync; result discarded"
                );
            }
            Err(err) => {
                inner.state.send_modify(|s| {
                    s.consecutive_failures = s.consecutive_failures.saturating_add(1);
                    if !trigger.silent {
                        s.last_error = Some(err.to_string());
                    }
                });
                if trigger.silent {
                    debug!(
                        target: "zkpanel::sync",
                        workspace = %inner.workspace,
                        code = err.code(),
                        "scheduled sync failed: {}", err
                    );
                } else {
                    warn!(
                        target: "zkpanel::sync",
                        workspace = %inner.workspace,
                        code = err.code(),
                        "sync failed: {}", err
                    );
                }
            }
        }
    }

    /// Returns false if the timers were already running.
    fn start_timers(&self) -> bool {
        let inner = &self.inner;
        let mut timer = lock(&inner.timer);
        if timer.is_some() {
            return false;
        }
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        inner.state.send_modify(|s| {
            s.enabled = true;
            s.countdown = inner.interval_secs;
        });
        *timer = Some(spawn_timers(
            Arc::downgrade(inner),
            generation,
            inner.interval_secs,
        ));
        true
    }

    /// Returns false if no timers were running.
    fn stop_timers(&self) -> bool {
        let inner = &self.inner;
        let mut timer = lock(&inner.timer);
        inner.generation.fetch_add(1, Ordering::SeqCst);
        inner.state.send_modify(|s| {
            s.enabled = false;
            s.countdown = inner.interval_secs;
        });
        match timer.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

impl Inner {
    fn credentials(&self) -> Result<Credentials, SyncError> {
        let credentials = lock(&self.stored_credentials)
            .clone()
            .or_else(|| self.default_credentials.clone())
            .ok_or_else(|| SyncError::Config {
                workspace: self.workspace,
                reason: "no panel credentials configured".into(),
            })?;
        validate_credentials(&credentials).map_err(|reason| SyncError::Config {
            workspace: self.workspace,
            reason,
        })?;
        Ok(credentials)
    }

    fn is_current(&self, generation: u64) -> bool {
        let _timer = lock(&self.timer);
        self.generation.load(Ordering::SeqCst) == generation && self.state.borrow().enabled
    }

    fn on_tick(&self) {
        let interval = self.interval_secs;
        self.state.send_modify(|s| {
            s.countdown = if s.countdown <= 1 {
                interval
            } else {
                s.countdown - 1
            };
        });
    }
}

/// Clears `in_flight` even if the sync future is dropped mid-call.
struct FlightGuard {
    inner: Arc<Inner>,
    _slot: OwnedMutexGuard<()>,
}

impl FlightGuard {
    fn start(inner: Arc<Inner>, slot: OwnedMutexGuard<()>) -> Self {
        inner.state.send_modify(|s| s.in_flight = true);
        Self { inner, _slot: slot }
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.inner.state.send_modify(|s| s.in_flight = false);
    }
}

fn spawn_timers(inner: Weak<Inner>, generation: u64, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = Instant::now();
        let period = Duration::from_secs(interval_secs);
        let mut tick = interval_at(start + TICK, TICK);
        let mut fire = interval_at(start + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        fire.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = tick.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.on_tick();
                }
                _ = fire.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    if inner.generation.load(Ordering::SeqCst) != generation {
                        break;
                    }
                    let scheduler = WorkspaceScheduler { inner };
                    tokio::spawn(async move {
                        // Failures are recorded on the session; the cadence continues.
                        let _ = scheduler.trigger_scheduled(generation).await;
                    });
                }
            }
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
