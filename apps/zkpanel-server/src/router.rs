use axum::{
    routing::{get, post, put},
    Router,
};

use crate::{api, AppState};

pub(crate) mod paths {
    pub const HEALTHZ: &str = "/healthz";
    pub const WORKSPACE_SYNC: &str = "/workspaces/{workspace}/sync";
    pub const WORKSPACE_SYNC_NOW: &str = "/workspaces/{workspace}/sync/now";
    pub const WORKSPACE_CREDENTIALS: &str = "/workspaces/{workspace}/credentials";
    pub const WORKSPACE_RESPONDENTS: &str = "/workspaces/{workspace}/respondents";
}

pub(crate) fn build(state: AppState) -> Router {
    Router::new()
        .route(paths::HEALTHZ, get(api::healthz))
        .route(
            paths::WORKSPACE_SYNC,
            get(api::sync_status).put(api::sync_toggle),
        )
        .route(paths::WORKSPACE_SYNC_NOW, post(api::sync_now))
        .route(paths::WORKSPACE_CREDENTIALS, put(api::put_credentials))
        .route(paths::WORKSPACE_RESPONDENTS, get(api::respondents))
        .with_state(state)
}
