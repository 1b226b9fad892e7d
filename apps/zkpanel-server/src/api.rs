use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use zkpanel_core::{Credentials, Workspace};
use zkpanel_sync::SyncTrigger;

use crate::{responses, AppState};

fn workspace_from_path(raw: &str) -> Result<Workspace, Response> {
    raw.parse::<Workspace>()
        .map_err(|_| responses::unknown_workspace(raw))
}

pub(crate) async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "workspaces": state.registry().snapshots(),
    }))
}

pub(crate) async fn sync_status(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
) -> Response {
    let ws = match workspace_from_path(&workspace) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    Json(state.registry().get(ws).snapshot()).into_response()
}

#[derive(Debug, Deserialize)]
pub(crate) struct SyncToggle {
    pub enabled: bool,
}

pub(crate) async fn sync_toggle(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
    Json(body): Json<SyncToggle>,
) -> Response {
    let ws = match workspace_from_path(&workspace) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    match state.registry().get(ws).set_enabled(body.enabled).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => {
            warn!(target: "zkpanel::server", workspace = %ws, "sync toggle refused: {err}");
            responses::sync_error(&err)
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct SyncNow {
    #[serde(default)]
    pub silent: bool,
}

/// Body is optional; `{ "silent": true }` keeps a failure out of `lastError`.
pub(crate) async fn sync_now(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
    body: Bytes,
) -> Response {
    let ws = match workspace_from_path(&workspace) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let opts = if body.iter().all(u8::is_ascii_whitespace) {
        SyncNow::default()
    } else {
        match serde_json::from_slice::<SyncNow>(&body) {
            Ok(opts) => opts,
            Err(err) => {
                return responses::problem_response(
                    StatusCode::BAD_REQUEST,
                    "Invalid Request",
                    Some(&err.to_string()),
                )
            }
        }
    };
    let trigger = SyncTrigger::manual().silent(opts.silent);
    match state.registry().get(ws).trigger_sync(trigger).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => responses::sync_error(&err),
    }
}

pub(crate) async fn put_credentials(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
    Json(credentials): Json<Credentials>,
) -> Response {
    let ws = match workspace_from_path(&workspace) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    match state.registry().get(ws).set_credentials(credentials).await {
        Ok(()) => {
            info!(target: "zkpanel::server", workspace = %ws, "panel credentials updated");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => responses::sync_error(&err),
    }
}

pub(crate) async fn respondents(
    State(state): State<AppState>,
    Path(workspace): Path<String>,
) -> Response {
    let ws = match workspace_from_path(&workspace) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    match state.kernel().list_respondents_async(ws).await {
        Ok(items) => Json(json!({
            "workspace": ws,
            "count": items.len(),
            "respondents": items,
        }))
        .into_response(),
        Err(err) => responses::problem_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to load respondents",
            Some(&err.to_string()),
        ),
    }
}
