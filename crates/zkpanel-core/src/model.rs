use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use zkpanel_protocol::RemoteRespondent;

use crate::query::{self, QuerySpec};

/// Plaintext attributes keyed by name. Sorted keys keep the JSON form stable.
pub type AttributeRecord = BTreeMap<String, Value>;

/// Panel API access for one workspace.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Credentials {
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub workspace_id: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("workspace_id", &self.workspace_id)
            .finish()
    }
}

/// Independent scheduling domain with its own credentials, enable flag and
/// respondent collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Workspace {
    Panel,
    Insight,
}

impl Workspace {
    pub const ALL: [Workspace; 2] = [Workspace::Panel, Workspace::Insight];

    pub fn as_str(&self) -> &'static str {
        match self {
            Workspace::Panel => "panel",
            Workspace::Insight => "insight",
        }
    }
}

impl fmt::Display for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown workspace `{0}`")]
pub struct UnknownWorkspace(pub String);

impl FromStr for Workspace {
    type Err = UnknownWorkspace;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "panel" => Ok(Workspace::Panel),
            "insight" => Ok(Workspace::Insight),
            _ => Err(UnknownWorkspace(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofStatus {
    #[default]
    Pending,
    Partial,
    Verified,
    Failed,
}

impl ProofStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofStatus::Pending => "pending",
            ProofStatus::Partial => "partial",
            ProofStatus::Verified => "verified",
            ProofStatus::Failed => "failed",
        }
    }

    pub fn from_slug(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "partial" => ProofStatus::Partial,
            "verified" => ProofStatus::Verified,
            "failed" => ProofStatus::Failed,
            _ => ProofStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryResult {
    #[default]
    Pending,
    Yes,
    No,
}

impl QueryResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryResult::Pending => "pending",
            QueryResult::Yes => "yes",
            QueryResult::No => "no",
        }
    }

    pub fn from_slug(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" => QueryResult::Yes,
            "no" | "false" => QueryResult::No,
            _ => QueryResult::Pending,
        }
    }

    /// Panels report the result either as a slug or as a JSON boolean.
    pub fn from_wire(value: &Value) -> Self {
        match value {
            Value::Bool(true) => QueryResult::Yes,
            Value::Bool(false) => QueryResult::No,
            Value::String(s) => QueryResult::from_slug(s),
            _ => QueryResult::Pending,
        }
    }
}

impl From<bool> for QueryResult {
    fn from(value: bool) -> Self {
        if value {
            QueryResult::Yes
        } else {
            QueryResult::No
        }
    }
}

/// Query attached to a respondent: the human-readable text, the structured
/// form, or both.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RespondentQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<QuerySpec>,
}

impl RespondentQuery {
    pub fn from_spec(spec: QuerySpec) -> Self {
        Self {
            text: Some(spec.to_string()),
            spec: Some(spec),
        }
    }

    /// Accepts a text query, a structured query, or an object carrying
    /// `text` next to the structured fields. Text that fails to parse is kept
    /// as text only.
    pub fn from_wire(value: &Value) -> Option<Self> {
        match value {
            Value::String(text) if text.trim().is_empty() => None,
            Value::String(text) => Some(Self {
                text: Some(text.clone()),
                spec: query::parse(text).ok(),
            }),
            Value::Object(map) => {
                let text = map
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let spec = serde_json::from_value::<QuerySpec>(value.clone()).ok();
                match (text, spec) {
                    (None, None) => None,
                    (None, Some(spec)) => Some(Self::from_spec(spec)),
                    (Some(text), spec) => Some(Self {
                        spec: spec.or_else(|| query::parse(&text).ok()),
                        text: Some(text),
                    }),
                }
            }
            _ => None,
        }
    }
}

/// Respondent as held in a workspace collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Respondent {
    pub id: String,
    pub commitment: String,
    pub proof_status: ProofStatus,
    #[serde(default)]
    pub attributes_pending_proof: BTreeSet<String>,
    #[serde(default)]
    pub attribute_commitments: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<RespondentQuery>,
    #[serde(default)]
    pub query_result: QueryResult,
    pub synced_at: DateTime<Utc>,
    #[serde(default)]
    pub email_sent: bool,
}

impl Respondent {
    /// Build the local record for a respondent seen for the first time in a
    /// sync merged at `synced_at`.
    pub fn from_remote(remote: RemoteRespondent, synced_at: DateTime<Utc>) -> Self {
        Self {
            proof_status: remote
                .proof_status
                .as_deref()
                .map(ProofStatus::from_slug)
                .unwrap_or_default(),
            attributes_pending_proof: remote.attributes_requiring_proof.into_iter().collect(),
            attribute_commitments: remote.attribute_hashes,
            query: remote.zkp_query.as_ref().and_then(RespondentQuery::from_wire),
            query_result: remote
                .zkp_result
                .as_ref()
                .map(QueryResult::from_wire)
                .unwrap_or_default(),
            id: remote.id,
            commitment: remote.hashed_data,
            synced_at,
            email_sent: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote(value: Value) -> RemoteRespondent {
        serde_json::from_value(value).expect("remote respondent")
    }

    #[test]
    fn workspace_slugs_round_trip() {
        for ws in Workspace::ALL {
            assert_eq!(ws.as_str().parse::<Workspace>(), Ok(ws));
        }
        assert_eq!(" Insight ".parse::<Workspace>(), Ok(Workspace::Insight));
        assert!("admin".parse::<Workspace>().is_err());
    }

    #[test]
    fn from_remote_defaults_local_fields() {
        let now = Utc::now();
        let rec = Respondent::from_remote(
            remote(json!({
                "id": "resp-1",
                "hashedData": "f00d",
                "proofStatus": "PARTIAL",
                "attributesRequiringProof": ["age", "income", "age"],
                "attributeHashes": {"age": "aa", "income": "bb"},
                "zkpQuery": "age > 25 AND occupation = 'Doctor'",
                "zkpResult": true
            })),
            now,
        );
        assert_eq!(rec.id, "resp-1");
        assert_eq!(rec.commitment, "f00d");
        assert_eq!(rec.proof_status, ProofStatus::Partial);
        assert_eq!(rec.attributes_pending_proof.len(), 2);
        assert_eq!(rec.attribute_commitments.get("income").map(String::as_str), Some("bb"));
        assert_eq!(rec.query_result, QueryResult::Yes);
        assert!(!rec.email_sent);
        assert_eq!(rec.synced_at, now);
        let query = rec.query.expect("query");
        assert_eq!(query.spec.expect("parsed spec").conditions.len(), 2);
    }

    #[test]
    fn structured_wire_query_gets_text() {
        let query = RespondentQuery::from_wire(&json!({
            "combinator": "OR",
            "conditions": [{"attribute": "age", "operator": "<", "value": 30}]
        }))
        .expect("query");
        assert_eq!(query.text.as_deref(), Some("age < 30"));
    }

    #[test]
    fn unparseable_text_query_is_kept_verbatim() {
        let query = RespondentQuery::from_wire(&json!("people I like")).expect("query");
        assert_eq!(query.text.as_deref(), Some("people I like"));
        assert!(query.spec.is_none());
        assert!(RespondentQuery::from_wire(&json!("  ")).is_none());
        assert!(RespondentQuery::from_wire(&json!(7)).is_none());
    }

    #[test]
    fn query_result_wire_forms() {
        assert_eq!(QueryResult::from_wire(&json!("no")), QueryResult::No);
        assert_eq!(QueryResult::from_wire(&json!(false)), QueryResult::No);
        assert_eq!(QueryResult::from_wire(&json!("maybe")), QueryResult::Pending);
        assert_eq!(QueryResult::from_wire(&json!(null)), QueryResult::Pending);
    }
}
