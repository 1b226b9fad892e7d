//! Periodic panel synchronization.
//!
//! Each workspace owns a [`WorkspaceScheduler`] that, while enabled, calls the
//! panel's sync endpoint on a fixed cadence and appends previously unseen
//! respondents to the workspace collection. A [`SchedulerRegistry`] owns one
//! scheduler per workspace; they share no timers or state.

mod error;
mod registry;
mod scheduler;
mod transport;

pub use error::SyncError;
pub use registry::SchedulerRegistry;
pub use scheduler::{
    SchedulerOptions, SessionSnapshot, SyncOrigin, SyncReport, SyncTrigger, WorkspaceScheduler,
};
pub use transport::{sync_endpoint, validate_credentials, HttpTransport, SyncTransport};
