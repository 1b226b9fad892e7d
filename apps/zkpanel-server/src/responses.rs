use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use zkpanel_protocol::ProblemDetails;
use zkpanel_sync::SyncError;

pub fn problem_response(status: StatusCode, title: &str, detail: Option<&str>) -> Response {
    let mut body = ProblemDetails::new(status.as_u16(), title);
    if let Some(detail) = detail {
        body = body.with_detail(detail);
    }
    (
        status,
        [(header::CONTENT_TYPE, "application/problem+json")],
        Json(body),
    )
        .into_response()
}

pub fn unknown_workspace(raw: &str) -> Response {
    problem_response(
        StatusCode::NOT_FOUND,
        "Unknown Workspace",
        Some(&format!("no workspace named `{raw}`")),
    )
}

pub fn sync_error(err: &SyncError) -> Response {
    let (status, title) = match err {
        SyncError::Config { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "Sync Not Configured"),
        SyncError::InFlight => (StatusCode::CONFLICT, "Sync In Flight"),
        SyncError::Discarded => (StatusCode::CONFLICT, "Sync Discarded"),
        SyncError::Transport(_) | SyncError::Rejected { .. } | SyncError::InvalidResponse(_) => {
            (StatusCode::BAD_GATEWAY, "Panel Sync Failed")
        }
        SyncError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Store Error"),
    };
    let mut body = ProblemDetails::new(status.as_u16(), title)
        .with_detail(err.to_string())
        .with_code(err.code());
    body.r#type = format!("urn:zkpanel:{}", err.code());
    (
        status,
        [(header::CONTENT_TYPE, "application/problem+json")],
        Json(body),
    )
        .into_response()
}
