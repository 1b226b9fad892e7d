//! Mock external panel API.
//!
//! Serves the sync endpoint the scheduler talks to, generating small batches
//! of respondents with salted commitments and a pre-evaluated query, plus two
//! helper endpoints exposing the commitment generator and query evaluator.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use zkpanel_core::{
    commit, evaluate, parse_query, AttributeRecord, QueryResult, QuerySpec, Salt,
};
use zkpanel_protocol::{DataPoints, ProblemDetails, RemoteRespondent, SyncRequest, SyncResponse};

pub const DEFAULT_PORT: u16 = 8081;

/// Query texts attached to generated respondents.
pub const PRESET_QUERIES: &[&str] = &[
    "age > 25 AND occupation = 'Doctor'",
    "income >= 50000 OR education = 'PhD'",
    "country = 'India' AND age < 40",
    "occupation != 'Student'",
    "age >= 30 AND income > 80000",
];

const OCCUPATIONS: &[&str] = &[
    "Doctor", "Engineer", "Teacher", "Student", "Designer", "Lawyer", "Nurse",
];
const COUNTRIES: &[&str] = &["India", "USA", "UK", "Germany", "Brazil", "Kenya"];
const EDUCATION: &[&str] = &["High School", "Bachelor", "Master", "PhD"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PanelSettings {
    /// When set, bearer tokens must match exactly; otherwise any non-empty
    /// token is accepted.
    pub api_key: Option<String>,
    /// Probability in `0..=1` that a sync answers 503.
    pub failure_rate: f64,
}

impl PanelSettings {
    /// Read `MOCK_PANEL_API_KEY` and `MOCK_PANEL_FAILURE_RATE`.
    pub fn from_env() -> Self {
        let api_key = std::env::var("MOCK_PANEL_API_KEY")
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let failure_rate = std::env::var("MOCK_PANEL_FAILURE_RATE")
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|r| r.is_finite())
            .map(|r| r.clamp(0.0, 1.0))
            .unwrap_or(0.0);
        Self {
            api_key,
            failure_rate,
        }
    }
}

pub fn router(settings: PanelSettings) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/sync", post(sync))
        .route("/api/commitments", post(commitments))
        .route("/api/query/evaluate", post(evaluate_query))
        .with_state(Arc::new(settings))
}

fn problem(status: StatusCode, title: &str, detail: impl Into<String>) -> Response {
    let body = ProblemDetails::new(status.as_u16(), title).with_detail(detail);
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/problem+json")],
        Json(body),
    )
        .into_response()
}

async fn healthz() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "mock-panel",
        "generated": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    }))
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

async fn sync(
    State(settings): State<Arc<PanelSettings>>,
    headers: HeaderMap,
    Json(req): Json<SyncRequest>,
) -> Response {
    let Some(token) = bearer(&headers) else {
        return problem(StatusCode::UNAUTHORIZED, "Unauthorized", "missing bearer token");
    };
    if settings.api_key.as_deref().is_some_and(|k| k != token) {
        return problem(StatusCode::UNAUTHORIZED, "Unauthorized", "unknown api key");
    }
    if settings.failure_rate > 0.0 && rand::rng().random_bool(settings.failure_rate) {
        debug!(target: "zkpanel::mock", workspace_id = %req.workspace_id, "injected sync failure");
        return problem(
            StatusCode::SERVICE_UNAVAILABLE,
            "Panel Unavailable",
            "injected failure",
        );
    }

    let respondents = generate_batch();
    info!(
        target: "zkpanel::mock",
        user_id = %req.user_id,
        workspace_id = %req.workspace_id,
        count = respondents.len(),
        "served sync batch"
    );
    Json(SyncResponse {
        success: Some(true),
        data_points: DataPoints {
            respondents_added: respondents.len() as u64,
        },
        respondents,
        synced_at: Some(Utc::now()),
        message: None,
    })
    .into_response()
}

/// One to three respondents, each under its own fresh salt.
pub fn generate_batch() -> Vec<RemoteRespondent> {
    let count = rand::rng().random_range(1..=3);
    (0..count).map(|_| generate_respondent()).collect()
}

fn random_record() -> AttributeRecord {
    let mut rng = rand::rng();
    let mut record = AttributeRecord::new();
    record.insert("age".into(), json!(rng.random_range(18..=70)));
    record.insert(
        "income".into(),
        json!(rng.random_range(15..=250) * 1000),
    );
    for (name, pool) in [
        ("occupation", OCCUPATIONS),
        ("country", COUNTRIES),
        ("education", EDUCATION),
    ] {
        if let Some(value) = pool.choose(&mut rng) {
            record.insert(name.into(), json!(value));
        }
    }
    record
}

fn generate_respondent() -> RemoteRespondent {
    let record = random_record();
    let commitment = commit(&record, &Salt::generate());

    let mut rng = rand::rng();
    let mut requiring: Vec<String> = record
        .keys()
        .filter(|_| rng.random_bool(0.5))
        .cloned()
        .collect();
    if requiring.is_empty() {
        requiring.push("age".to_string());
    }

    let query_text = PRESET_QUERIES.choose(&mut rng).copied().unwrap_or(PRESET_QUERIES[0]);
    let result = parse_query(query_text)
        .map(|spec| QueryResult::from(evaluate(&record, &spec)))
        .unwrap_or_default();

    RemoteRespondent {
        id: format!("resp-{}", uuid::Uuid::new_v4().simple()),
        hashed_data: commitment.record_digest,
        proof_status: Some("pending".into()),
        attributes_requiring_proof: requiring,
        attribute_hashes: commitment.attribute_digests,
        synced_at: Some(Utc::now()),
        zkp_query: Some(Value::String(query_text.to_string())),
        zkp_result: Some(Value::String(result.as_str().to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct CommitBody {
    record: AttributeRecord,
    #[serde(default)]
    salt: Option<String>,
}

async fn commitments(Json(body): Json<CommitBody>) -> Response {
    let salt = match body.salt.as_deref() {
        Some(raw) => match Salt::from_hex(raw) {
            Ok(salt) => salt,
            Err(err) => return problem(StatusCode::BAD_REQUEST, "Invalid Salt", err.to_string()),
        },
        None => Salt::generate(),
    };
    Json(commit(&body.record, &salt)).into_response()
}

#[derive(Debug, Deserialize)]
struct EvaluateBody {
    record: AttributeRecord,
    query: Value,
}

fn query_from_body(query: Value) -> Result<QuerySpec, String> {
    match query {
        Value::String(text) => parse_query(&text).map_err(|e| e.to_string()),
        other @ Value::Object(_) => serde_json::from_value(other).map_err(|e| e.to_string()),
        _ => Err("query must be a string or an object".into()),
    }
}

async fn evaluate_query(Json(body): Json<EvaluateBody>) -> Response {
    let spec = match query_from_body(body.query) {
        Ok(spec) => spec,
        Err(detail) => return problem(StatusCode::BAD_REQUEST, "Invalid Query", detail),
    };
    Json(json!({
        "result": evaluate(&body.record, &spec),
        "query": spec.to_string(),
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_parse() {
        for text in PRESET_QUERIES {
            assert!(parse_query(text).is_ok(), "{text}");
        }
    }

    #[test]
    fn generated_respondents_are_self_consistent() {
        for _ in 0..20 {
            let batch = generate_batch();
            assert!((1..=3).contains(&batch.len()));
            for r in batch {
                assert_eq!(r.hashed_data.len(), 64);
                assert_eq!(r.attribute_hashes.len(), 5);
                assert!(!r.attributes_requiring_proof.is_empty());
                assert!(r
                    .attributes_requiring_proof
                    .iter()
                    .all(|a| r.attribute_hashes.contains_key(a)));
                let result = r.zkp_result.as_ref().and_then(Value::as_str);
                assert!(matches!(result, Some("yes") | Some("no")));
            }
        }
    }

    #[test]
    fn bearer_requires_scheme_and_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer(&headers), None);
        headers.insert(AUTHORIZATION, "Bearer  abc ".parse().unwrap());
        assert_eq!(bearer(&headers), Some("abc"));
        headers.insert(AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer(&headers), None);
        headers.insert(AUTHORIZATION, "Bearer ".parse().unwrap());
        assert_eq!(bearer(&headers), None);
    }

    #[test]
    fn query_body_accepts_text_and_structured_forms() {
        assert!(query_from_body(json!("age > 1")).is_ok());
        assert!(query_from_body(json!({
            "combinator": "AND",
            "conditions": [{"attribute": "age", "operator": ">", "value": 1}]
        }))
        .is_ok());
        assert!(query_from_body(json!("age >")).is_err());
        assert!(query_from_body(json!(5)).is_err());
    }

    mod env {
        use super::*;
        use serial_test::serial;

        #[test]
        #[serial]
        fn settings_from_env_clamp_and_trim() {
            std::env::set_var("MOCK_PANEL_API_KEY", "  secret ");
            std::env::set_var("MOCK_PANEL_FAILURE_RATE", "4");
            let settings = PanelSettings::from_env();
            assert_eq!(settings.api_key.as_deref(), Some("secret"));
            assert_eq!(settings.failure_rate, 1.0);

            std::env::set_var("MOCK_PANEL_API_KEY", " ");
            std::env::set_var("MOCK_PANEL_FAILURE_RATE", "often");
            assert_eq!(PanelSettings::from_env(), PanelSettings::default());
            std::env::remove_var("MOCK_PANEL_API_KEY");
            std::env::remove_var("MOCK_PANEL_FAILURE_RATE");
        }
    }
}
