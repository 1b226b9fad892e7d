use chrono::Utc;
use httpmock::prelude::*;
use serde_json::json;
use zkpanel_core::{Credentials, SyncConfig};
use zkpanel_protocol::SyncRequest;
use zkpanel_sync::{HttpTransport, SyncError, SyncTransport};

fn creds(base_url: String) -> Credentials {
    Credentials {
        base_url,
        api_key: "demo-key".into(),
        user_id: "user-1".into(),
        workspace_id: "ws-1".into(),
    }
}

fn request() -> SyncRequest {
    SyncRequest {
        user_id: "user-1".into(),
        workspace_id: "ws-1".into(),
        timestamp: Utc::now(),
    }
}

#[tokio::test]
async fn posts_bearer_authenticated_sync_and_decodes_batch() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/sync")
                .header("authorization", "Bearer demo-key")
                .json_body_partial(r#"{"userId":"user-1","workspaceId":"ws-1"}"#);
            then.status(200).json_body(json!({
                "success": true,
                "respondents": [
                    {"id": "r-1", "hashedData": "aa", "zkpResult": "yes"},
                    {"id": "r-2", "hashedData": "bb"}
                ],
                "dataPoints": {"respondentsAdded": 2}
            }));
        })
        .await;

    let transport = HttpTransport::new(&SyncConfig::default()).expect("client");
    let resp = transport
        .sync(&creds(server.base_url()), &request())
        .await
        .expect("sync");
    mock.assert_async().await;
    assert_eq!(resp.respondents.len(), 2);
    assert_eq!(resp.data_points.respondents_added, 2);
    assert_eq!(resp.respondents[0].id, "r-1");
}

#[tokio::test]
async fn non_success_status_is_rejected_with_detail() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/api/sync");
            then.status(401)
                .header("content-type", "application/problem+json")
                .json_body(json!({"type": "about:blank", "title": "Unauthorized", "status": 401, "detail": "unknown api key"}));
        })
        .await;

    let transport = HttpTransport::new(&SyncConfig::default()).expect("client");
    let err = transport
        .sync(&creds(server.base_url()), &request())
        .await
        .unwrap_err();
    match err {
        SyncError::Rejected { status, detail } => {
            assert_eq!(status, 401);
            assert_eq!(detail, "unknown api key");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn success_false_and_garbage_bodies_are_errors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/tenant/api/sync");
            then.status(200)
                .json_body(json!({"success": false, "message": "quota exceeded"}));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/broken/api/sync");
            then.status(200).body("<html>not json</html>");
        })
        .await;

    let transport = HttpTransport::new(&SyncConfig::default()).expect("client");
    let err = transport
        .sync(&creds(server.url("/tenant")), &request())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Rejected { status: 200, ref detail } if detail == "quota exceeded"));

    let err = transport
        .sync(&creds(server.url("/broken/")), &request())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::InvalidResponse(_)), "{err:?}");
}

#[tokio::test]
async fn unreachable_panel_is_a_transport_error() {
    // Reserve a port, then release it so nothing listens there.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let transport = HttpTransport::new(&SyncConfig::default()).expect("client");
    let err = transport
        .sync(&creds(format!("http://127.0.0.1:{port}")), &request())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)), "{err:?}");
    assert!(err.is_remote());
}
