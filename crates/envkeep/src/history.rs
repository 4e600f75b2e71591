//! History log - append-only snapshots per identity
//!
//! Storage: `{root}/{namespace}/{environment}.history.jsonl`, one JSON
//! object per line. Each line carries the full variable map encrypted on
//! its own, so listing never decrypts and fetching decrypts one record.

use crate::codec::Cipher;
use crate::current::{decode_variables, Variables};
use crate::error::{Result, StoreError};
use crate::gate::LockRegistry;
use crate::identity::EnvId;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What produced a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotAction {
    Create,
    Update,
    Delete,
    BulkReplace,
    Rollback,
    ApplyTemplate,
}

impl SnapshotAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotAction::Create => "CREATE",
            SnapshotAction::Update => "UPDATE",
            SnapshotAction::Delete => "DELETE",
            SnapshotAction::BulkReplace => "BULK_REPLACE",
            SnapshotAction::Rollback => "ROLLBACK",
            SnapshotAction::ApplyTemplate => "APPLY_TEMPLATE",
        }
    }
}

impl fmt::Display for SnapshotAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A history entry without its variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub action: SnapshotAction,
    pub description: String,
}

/// A history entry with its variables decrypted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub action: SnapshotAction,
    pub description: String,
    pub variables: Variables,
}

/// On-disk line: `variables` is an armored age file
#[derive(Debug, Serialize, Deserialize)]
struct HistoryRecord {
    id: String,
    timestamp: DateTime<Utc>,
    user_id: String,
    action: SnapshotAction,
    description: String,
    variables: String,
}

/// Append-only snapshot logs, one per identity
pub struct HistoryLog {
    root: PathBuf,
    cipher: Arc<Cipher>,
    gate: Arc<LockRegistry>,
    /// Newest timestamp written per log, so stamps never go backwards
    last_stamps: Mutex<HashMap<PathBuf, DateTime<Utc>>>,
}

impl HistoryLog {
    pub fn new(root: &Path, cipher: Arc<Cipher>, gate: Arc<LockRegistry>) -> Self {
        Self {
            root: root.to_path_buf(),
            cipher,
            gate,
            last_stamps: Mutex::new(HashMap::new()),
        }
    }

    pub fn path_for(&self, id: &EnvId) -> PathBuf {
        self.root
            .join(id.namespace())
            .join(format!("{}.history.jsonl", id.environment()))
    }

    /// Record the full state. Returns the new snapshot id, or `None` if the
    /// record could not be written; the primary write has already committed
    /// by then, so the failure is only logged.
    pub fn append_snapshot(
        &self,
        id: &EnvId,
        variables: &Variables,
        user_id: &str,
        action: SnapshotAction,
        description: &str,
    ) -> Option<String> {
        match self.try_append(id, variables, user_id, action, description) {
            Ok(snapshot_id) => {
                info!(env = %id, %action, "Saved history snapshot {}", snapshot_id);
                Some(snapshot_id)
            }
            Err(e) => {
                warn!(env = %id, %action, "Failed to save history snapshot: {}", e);
                None
            }
        }
    }

    fn try_append(
        &self,
        id: &EnvId,
        variables: &Variables,
        user_id: &str,
        action: SnapshotAction,
        description: &str,
    ) -> Result<String> {
        let path = self.path_for(id);
        let payload = serde_json::to_vec(variables)?;
        let encrypted = self.cipher.encrypt_to_string(&payload)?;
        let snapshot_id = Uuid::new_v4().to_string();

        self.gate.with_exclusive(&path, || -> Result<String> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            let record = HistoryRecord {
                id: snapshot_id.clone(),
                timestamp: self.next_timestamp(&path),
                user_id: user_id.to_string(),
                action,
                description: description.to_string(),
                variables: encrypted,
            };
            let mut line = serde_json::to_string(&record)?;
            line.push('\n');

            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.write_all(line.as_bytes())?;
            file.flush()?;
            Ok(snapshot_id)
        })
    }

    /// Summaries newest first, at most `limit`. Unreadable logs list as empty.
    pub fn list_summaries(&self, id: &EnvId, limit: usize) -> Vec<SnapshotSummary> {
        let content = match self.read_log(id) {
            Ok(Some(content)) => content,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(env = %id, "Failed to read history: {}", e);
                return Vec::new();
            }
        };

        let mut summaries: Vec<SnapshotSummary> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<SnapshotSummary>(line) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    debug!(env = %id, "Skipping corrupt history line: {}", e);
                    None
                }
            })
            .collect();

        summaries.reverse();
        summaries.truncate(limit);
        summaries
    }

    /// Fetch one snapshot by id and decrypt its variables
    pub fn get_snapshot(&self, id: &EnvId, snapshot_id: &str) -> Result<Option<Snapshot>> {
        let Some(content) = self.read_log(id)? else {
            return Ok(None);
        };

        let record = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<HistoryRecord>(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!(env = %id, "Skipping corrupt history line: {}", e);
                    None
                }
            })
            .find(|record| record.id == snapshot_id);

        let Some(record) = record else {
            return Ok(None);
        };

        let decrypted = self.cipher.decrypt_str(&record.variables)?;
        let variables = decode_variables(&decrypted)?.unwrap_or_default();

        Ok(Some(Snapshot {
            id: record.id,
            timestamp: record.timestamp,
            user_id: record.user_id,
            action: record.action,
            description: record.description,
            variables,
        }))
    }

    fn read_log(&self, id: &EnvId) -> Result<Option<String>> {
        let path = self.path_for(id);
        self.gate.with_exclusive(&path, || -> Result<Option<String>> {
            if !path.exists() {
                return Ok(None);
            }
            fs::read_to_string(&path).map(Some).map_err(StoreError::from)
        })
    }

    /// Caller holds the gate for `path`
    fn next_timestamp(&self, path: &Path) -> DateTime<Utc> {
        let now = Utc::now();
        let known = self.last_stamps.lock().get(path).copied();
        let floor = known.or_else(|| last_timestamp_in(path));
        let stamp = floor.map_or(now, |floor| now.max(floor));
        self.last_stamps.lock().insert(path.to_path_buf(), stamp);
        stamp
    }
}

fn last_timestamp_in(path: &Path) -> Option<DateTime<Utc>> {
    let content = fs::read_to_string(path).ok()?;
    content
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<SnapshotSummary>(line).ok())
        .map(|summary| summary.timestamp)
}
