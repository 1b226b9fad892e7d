//! Domain types and the pure helpers behind panel sync: the respondent model,
//! the attribute commitment generator, the flat query evaluator and the
//! service configuration.

pub mod commitment;
mod config;
pub mod model;
pub mod query;
pub mod util;

pub use commitment::{commit, AttributeCommitment, Salt};
pub use config::{
    config_schema_json, load_config, write_schema_file, Config, RuntimeConfig,
    SyncConfig, WorkspacesConfig, DEFAULT_SYNC_INTERVAL_SECS,
};
pub use model::{
    AttributeRecord, Credentials, ProofStatus, QueryResult, Respondent, RespondentQuery, Workspace,
    UnknownWorkspace,
};
pub use query::{evaluate, parse as parse_query, Combinator, Condition, Operator, QueryError, QuerySpec};
