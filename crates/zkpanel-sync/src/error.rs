use thiserror::Error;
use zkpanel_core::Workspace;

/// Failure taxonomy of a sync attempt. Every variant is recoverable: the
/// scheduler never stops its cadence because of one.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("workspace {workspace} cannot sync: {reason}")]
    Config { workspace: Workspace, reason: String },
    #[error("panel unreachable: {0}")]
    Transport(String),
    #[error("panel rejected the sync (HTTP {status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("panel returned an unusable response: {0}")]
    InvalidResponse(String),
    #[error("a sync is already in flight for this workspace")]
    InFlight,
    #[error("workspace was disabled while the sync was in flight; result discarded")]
    Discarded,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl SyncError {
    /// Stable machine-readable code for problem payloads.
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Config { .. } => "sync.config",
            SyncError::Transport(_) => "sync.transport",
            SyncError::Rejected { .. } => "sync.rejected",
            SyncError::InvalidResponse(_) => "sync.invalid_response",
            SyncError::InFlight => "sync.in_flight",
            SyncError::Discarded => "sync.discarded",
            SyncError::Store(_) => "sync.store",
        }
    }

    /// Transport failures and remote rejections share handling; the status
    /// code is informational only.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_) | SyncError::Rejected { .. } | SyncError::InvalidResponse(_)
        )
    }
}
