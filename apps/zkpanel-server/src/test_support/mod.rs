use std::sync::{Arc, Once};

use async_trait::async_trait;
use serde_json::json;
use zkpanel_core::{Config, Credentials, Workspace};
use zkpanel_kernel::Kernel;
use zkpanel_protocol::{DataPoints, SyncRequest, SyncResponse};
use zkpanel_sync::{SchedulerRegistry, SyncError, SyncTransport};

use crate::AppState;

pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(zkpanel_otel::init);
}

/// Answers every sync with the same batch, or with a fixed HTTP failure.
pub(crate) struct FixedTransport {
    ids: Vec<String>,
    fail_status: Option<u16>,
}

#[async_trait]
impl SyncTransport for FixedTransport {
    async fn sync(
        &self,
        _credentials: &Credentials,
        _request: &SyncRequest,
    ) -> Result<SyncResponse, SyncError> {
        if let Some(status) = self.fail_status {
            return Err(SyncError::Rejected {
                status,
                detail: "fixture failure".into(),
            });
        }
        let respondents = self
            .ids
            .iter()
            .map(|id| {
                serde_json::from_value(json!({"id": id, "hashedData": format!("digest-{id}")}))
                    .expect("fixture respondent")
            })
            .collect::<Vec<_>>();
        Ok(SyncResponse {
            success: Some(true),
            data_points: DataPoints {
                respondents_added: respondents.len() as u64,
            },
            respondents,
            synced_at: None,
            message: None,
        })
    }
}

pub(crate) struct TestHarness {
    _dir: tempfile::TempDir,
    pub(crate) state: AppState,
}

impl TestHarness {
    pub(crate) fn new(ids: &[&str]) -> Self {
        Self::with_transport(FixedTransport {
            ids: ids.iter().map(|id| id.to_string()).collect(),
            fail_status: None,
        })
    }

    pub(crate) fn failing(status: u16) -> Self {
        Self::with_transport(FixedTransport {
            ids: Vec::new(),
            fail_status: Some(status),
        })
    }

    fn with_transport(transport: FixedTransport) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let kernel = Kernel::open(dir.path()).expect("kernel");
        let registry = Arc::new(SchedulerRegistry::new(
            kernel.clone(),
            Arc::new(transport),
            &Config::default(),
        ));
        Self {
            _dir: dir,
            state: AppState::new(kernel, registry),
        }
    }

    pub(crate) async fn store_credentials(&self, workspace: Workspace) {
        self.state
            .registry()
            .get(workspace)
            .set_credentials(Credentials {
                base_url: "http://127.0.0.1:8081".into(),
                api_key: "demo-key".into(),
                user_id: "u-1".into(),
                workspace_id: format!("{workspace}-remote"),
            })
            .await
            .expect("store credentials");
    }
}
