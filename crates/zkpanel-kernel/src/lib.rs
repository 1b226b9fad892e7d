use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use zkpanel_core::{
    Credentials, ProofStatus, QueryResult, Respondent, RespondentQuery, Workspace,
};

/// SQLite-backed store for workspace respondent collections and sync settings.
#[derive(Clone)]
pub struct Kernel {
    db_path: PathBuf,
}

/// Persisted per-workspace sync preferences.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    pub workspace: Workspace,
    pub enabled: bool,
    pub credentials: Option<Credentials>,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl SyncSettings {
    fn empty(workspace: Workspace) -> Self {
        Self {
            workspace,
            enabled: false,
            credentials: None,
            last_sync_at: None,
        }
    }
}

const RESPONDENT_COLUMNS: &str = "id,commitment,proof_status,attributes_pending,attribute_commitments,query,query_result,synced_at,email_sent";

impl Kernel {
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create state dir {}", dir.display()))?;
        let db_path = dir.join("zkpanel.sqlite");
        let kernel = Self { db_path };
        let conn = kernel.conn()?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");
        Self::init_schema(&conn)?;
        Ok(kernel)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- Ordered, workspace-qualified respondent collections. Rows are
            -- appended by sync merges and never rewritten by them.
            CREATE TABLE IF NOT EXISTS respondents (
              seq INTEGER PRIMARY KEY AUTOINCREMENT,
              workspace TEXT NOT NULL,
              id TEXT NOT NULL,
              commitment TEXT NOT NULL,
              proof_status TEXT NOT NULL,
              attributes_pending TEXT NOT NULL,     -- JSON array
              attribute_commitments TEXT NOT NULL,  -- JSON object
              query TEXT,                           -- JSON {text?, spec?}
              query_result TEXT NOT NULL,
              synced_at TEXT NOT NULL,
              email_sent INTEGER NOT NULL DEFAULT 0,
              UNIQUE(workspace, id)
            );
            CREATE INDEX IF NOT EXISTS idx_respondents_ws ON respondents(workspace, seq);

            CREATE TABLE IF NOT EXISTS sync_settings (
              workspace TEXT PRIMARY KEY,
              enabled INTEGER NOT NULL DEFAULT 0,
              base_url TEXT,
              api_key TEXT,
              user_id TEXT,
              remote_workspace_id TEXT,
              last_sync_at TEXT
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        // Busy timeout (default 5000ms; override with ZKPANEL_SQLITE_BUSY_MS)
        let busy_ms: u64 = std::env::var("ZKPANEL_SQLITE_BUSY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000);
        conn.busy_timeout(std::time::Duration::from_millis(busy_ms))?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------------- Respondents ----------------

    /// Append respondents whose id is not yet present in `workspace`.
    ///
    /// Reading the existing ids, filtering and inserting happen in one
    /// immediate transaction, so concurrent mergers cannot interleave. The
    /// first occurrence of an id wins, both against stored rows and inside the
    /// batch. Returns the number of rows added.
    pub fn merge_respondents(&self, workspace: Workspace, batch: &[Respondent]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let added = insert_new_respondents(&tx, workspace, batch)?;
        tx.commit()?;
        debug!(
            target: "zkpanel::kernel",
            workspace = %workspace,
            received = batch.len(),
            added,
            "respondents merged"
        );
        Ok(added)
    }

    /// Merge a sync batch and record `synced_at` as the workspace's last sync
    /// time in the same transaction. Either both land or neither does.
    pub fn merge_sync_batch(
        &self,
        workspace: Workspace,
        batch: &[Respondent],
        synced_at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let added = insert_new_respondents(&tx, workspace, batch)?;
        upsert_last_sync_at(&tx, workspace, synced_at)?;
        tx.commit()?;
        debug!(
            target: "zkpanel::kernel",
            workspace = %workspace,
            received = batch.len(),
            added,
            "sync batch merged"
        );
        Ok(added)
    }

    pub fn list_respondents(&self, workspace: Workspace) -> Result<Vec<Respondent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RESPONDENT_COLUMNS} FROM respondents WHERE workspace=? ORDER BY seq ASC"
        ))?;
        let mut rows = stmt.query(params![workspace.as_str()])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(respondent_from_row(row)?);
        }
        Ok(out)
    }

    pub fn get_respondent(&self, workspace: Workspace, id: &str) -> Result<Option<Respondent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RESPONDENT_COLUMNS} FROM respondents WHERE workspace=? AND id=?"
        ))?;
        let mut rows = stmt.query(params![workspace.as_str(), id])?;
        match rows.next()? {
            Some(row) => Ok(Some(respondent_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn count_respondents(&self, workspace: Workspace) -> Result<usize> {
        let conn = self.conn()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM respondents WHERE workspace=?",
            params![workspace.as_str()],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as usize)
    }

    /// Written by the verification flow once a respondent's proof completes.
    pub fn set_proof_status(
        &self,
        workspace: Workspace,
        id: &str,
        status: ProofStatus,
    ) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE respondents SET proof_status=? WHERE workspace=? AND id=?",
            params![status.as_str(), workspace.as_str(), id],
        )?;
        Ok(n > 0)
    }

    /// Written by the notification flow after the respondent was emailed.
    pub fn mark_email_sent(&self, workspace: Workspace, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let n = conn.execute(
            "UPDATE respondents SET email_sent=1 WHERE workspace=? AND id=?",
            params![workspace.as_str(), id],
        )?;
        Ok(n > 0)
    }

    // ---------------- Sync settings ----------------

    pub fn sync_settings(&self, workspace: Workspace) -> Result<SyncSettings> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT enabled,base_url,api_key,user_id,remote_workspace_id,last_sync_at FROM sync_settings WHERE workspace=?",
                params![workspace.as_str()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((enabled, base_url, api_key, user_id, remote_ws, last_sync)) = row else {
            return Ok(SyncSettings::empty(workspace));
        };
        let credentials = match (base_url, api_key) {
            (Some(base_url), Some(api_key)) => Some(Credentials {
                base_url,
                api_key,
                user_id: user_id.unwrap_or_default(),
                workspace_id: remote_ws.unwrap_or_default(),
            }),
            _ => None,
        };
        let last_sync_at = last_sync.as_deref().map(parse_time).transpose()?;
        Ok(SyncSettings {
            workspace,
            enabled: enabled != 0,
            credentials,
            last_sync_at,
        })
    }

    pub fn set_sync_enabled(&self, workspace: Workspace, enabled: bool) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_settings(workspace,enabled) VALUES (?,?) ON CONFLICT(workspace) DO UPDATE SET enabled=excluded.enabled",
            params![workspace.as_str(), enabled],
        )?;
        Ok(())
    }

    pub fn set_credentials(&self, workspace: Workspace, creds: &Credentials) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_settings(workspace,base_url,api_key,user_id,remote_workspace_id) VALUES (?,?,?,?,?) \
             ON CONFLICT(workspace) DO UPDATE SET base_url=excluded.base_url, api_key=excluded.api_key, user_id=excluded.user_id, remote_workspace_id=excluded.remote_workspace_id",
            params![
                workspace.as_str(),
                creds.base_url,
                creds.api_key,
                creds.user_id,
                creds.workspace_id
            ],
        )?;
        Ok(())
    }

    pub fn set_last_sync_at(&self, workspace: Workspace, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        upsert_last_sync_at(&conn, workspace, at)
    }

    // ---------------- Async wrappers (spawn_blocking) ----------------
    // These helpers offload rusqlite work from async executors.

    pub async fn merge_respondents_async(
        &self,
        workspace: Workspace,
        batch: Vec<Respondent>,
    ) -> Result<usize> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.merge_respondents(workspace, &batch))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn merge_sync_batch_async(
        &self,
        workspace: Workspace,
        batch: Vec<Respondent>,
        synced_at: DateTime<Utc>,
    ) -> Result<usize> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.merge_sync_batch(workspace, &batch, synced_at))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn list_respondents_async(&self, workspace: Workspace) -> Result<Vec<Respondent>> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.list_respondents(workspace))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn sync_settings_async(&self, workspace: Workspace) -> Result<SyncSettings> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.sync_settings(workspace))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn set_sync_enabled_async(&self, workspace: Workspace, enabled: bool) -> Result<()> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.set_sync_enabled(workspace, enabled))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }

    pub async fn set_credentials_async(
        &self,
        workspace: Workspace,
        creds: Credentials,
    ) -> Result<()> {
        let k = self.clone();
        tokio::task::spawn_blocking(move || k.set_credentials(workspace, &creds))
            .await
            .map_err(|e| anyhow!("join error: {}", e))?
    }
}

/// Reads existing ids, filters and inserts. The first occurrence of an id
/// wins, both against stored rows and inside the batch.
fn insert_new_respondents(
    conn: &Connection,
    workspace: Workspace,
    batch: &[Respondent],
) -> Result<usize> {
    let mut seen: HashSet<String> = {
        let mut stmt = conn.prepare("SELECT id FROM respondents WHERE workspace=?")?;
        let ids = stmt.query_map(params![workspace.as_str()], |row| row.get::<_, String>(0))?;
        ids.collect::<rusqlite::Result<_>>()?
    };
    let mut insert = conn.prepare(
        "INSERT OR IGNORE INTO respondents(workspace,id,commitment,proof_status,attributes_pending,attribute_commitments,query,query_result,synced_at,email_sent) VALUES (?,?,?,?,?,?,?,?,?,?)",
    )?;
    let mut added = 0usize;
    for rec in batch {
        if !seen.insert(rec.id.clone()) {
            continue;
        }
        let query = rec
            .query
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        added += insert.execute(params![
            workspace.as_str(),
            rec.id,
            rec.commitment,
            rec.proof_status.as_str(),
            serde_json::to_string(&rec.attributes_pending_proof)?,
            serde_json::to_string(&rec.attribute_commitments)?,
            query,
            rec.query_result.as_str(),
            rec.synced_at.to_rfc3339(),
            rec.email_sent,
        ])?;
    }
    Ok(added)
}

fn upsert_last_sync_at(conn: &Connection, workspace: Workspace, at: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO sync_settings(workspace,last_sync_at) VALUES (?,?) ON CONFLICT(workspace) DO UPDATE SET last_sync_at=excluded.last_sync_at",
        params![workspace.as_str(), at.to_rfc3339()],
    )?;
    Ok(())
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp `{raw}`"))?
        .with_timezone(&Utc))
}

fn respondent_from_row(row: &rusqlite::Row<'_>) -> Result<Respondent> {
    let id: String = row.get(0)?;
    let attributes_pending: String = row.get(3)?;
    let attribute_commitments: String = row.get(4)?;
    let query: Option<String> = row.get(5)?;
    let synced_at: String = row.get(7)?;
    Ok(Respondent {
        commitment: row.get(1)?,
        proof_status: ProofStatus::from_slug(&row.get::<_, String>(2)?),
        attributes_pending_proof: serde_json::from_str(&attributes_pending)
            .with_context(|| format!("respondent {id}: attributes_pending"))?,
        attribute_commitments: serde_json::from_str(&attribute_commitments)
            .with_context(|| format!("respondent {id}: attribute_commitments"))?,
        query: query
            .as_deref()
            .map(serde_json::from_str::<RespondentQuery>)
            .transpose()
            .with_context(|| format!("respondent {id}: query"))?,
        query_result: QueryResult::from_slug(&row.get::<_, String>(6)?),
        synced_at: parse_time(&synced_at)?,
        email_sent: row.get::<_, i64>(8)? != 0,
        id,
    })
}
