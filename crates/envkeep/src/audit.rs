//! Audit logging for variable changes and access events
//!
//! Every mutation is logged for accountability. Values never reach the
//! log, only their fingerprints.
//! Storage: `{audit_dir}/audit.jsonl` (JSON lines, one global file)

use crate::error::{Result, StoreError};
use crate::gate::LockRegistry;
use crate::identity::EnvId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error};

/// Events returned by a query when no limit is given
pub const DEFAULT_AUDIT_LIMIT: usize = 100;

/// Fixed-length, non-reversible stand-in for a secret value
pub fn fingerprint(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(&digest[..8])
}

/// Kind of audited event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    CreateVariable,
    UpdateVariable,
    DeleteVariable,
    BulkReplace,
    Rollback,
    ApplyTemplate,
    ExportVariables,
    LoginSuccess,
    LoginFailure,
    Logout,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreateVariable => "CREATE_VARIABLE",
            AuditAction::UpdateVariable => "UPDATE_VARIABLE",
            AuditAction::DeleteVariable => "DELETE_VARIABLE",
            AuditAction::BulkReplace => "BULK_REPLACE",
            AuditAction::Rollback => "ROLLBACK",
            AuditAction::ApplyTemplate => "APPLY_TEMPLATE",
            AuditAction::ExportVariables => "EXPORT_VARIABLES",
            AuditAction::LoginSuccess => "LOGIN_SUCCESS",
            AuditAction::LoginFailure => "LOGIN_FAILURE",
            AuditAction::Logout => "LOGOUT",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let action = match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "CREATE_VARIABLE" => AuditAction::CreateVariable,
            "UPDATE_VARIABLE" => AuditAction::UpdateVariable,
            "DELETE_VARIABLE" => AuditAction::DeleteVariable,
            "BULK_REPLACE" => AuditAction::BulkReplace,
            "ROLLBACK" => AuditAction::Rollback,
            "APPLY_TEMPLATE" => AuditAction::ApplyTemplate,
            "EXPORT_VARIABLES" => AuditAction::ExportVariables,
            "LOGIN_SUCCESS" => AuditAction::LoginSuccess,
            "LOGIN_FAILURE" => AuditAction::LoginFailure,
            "LOGOUT" => AuditAction::Logout,
            _ => return Err(format!("unknown audit action: {}", s)),
        };
        Ok(action)
    }
}

/// Who performed an operation, as reported by the calling layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub ip_address: String,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, ip_address: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ip_address: ip_address.into(),
        }
    }

    /// The local user of a command-line session
    pub fn local() -> Self {
        let user = std::env::var("USER")
            .ok()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| "cli".to_string());
        Self::new(user, "local")
    }
}

/// A single audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub namespace: String,
    pub environment: String,
    /// Variable key, export target or other affected resource
    pub resource: String,
    pub user_id: String,
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl AuditEvent {
    /// Bare event; prefer the specific constructors
    pub fn new(action: AuditAction, id: &EnvId, resource: &str, actor: &Actor) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            namespace: id.namespace().to_string(),
            environment: id.environment().to_string(),
            resource: resource.to_string(),
            user_id: actor.user_id.clone(),
            ip_address: actor.ip_address.clone(),
            value_hash: None,
            old_value_hash: None,
            new_value_hash: None,
            details: Map::new(),
        }
    }

    /// Attach a detail field
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn variable_created(id: &EnvId, actor: &Actor, key: &str, value: &str) -> Self {
        let mut event = Self::new(AuditAction::CreateVariable, id, key, actor)
            .with_detail("key_length", key.chars().count())
            .with_detail("value_length", value.chars().count());
        event.value_hash = Some(fingerprint(value));
        event
    }

    pub fn variable_updated(id: &EnvId, actor: &Actor, key: &str, old: &str, new: &str) -> Self {
        let mut event = Self::new(AuditAction::UpdateVariable, id, key, actor)
            .with_detail("value_changed", old != new)
            .with_detail("old_length", old.chars().count())
            .with_detail("new_length", new.chars().count());
        event.old_value_hash = Some(fingerprint(old));
        event.new_value_hash = Some(fingerprint(new));
        event
    }

    pub fn variable_deleted(id: &EnvId, actor: &Actor, key: &str, value: &str) -> Self {
        let mut event = Self::new(AuditAction::DeleteVariable, id, key, actor);
        event.value_hash = Some(fingerprint(value));
        event
    }

    pub fn bulk_replace(id: &EnvId, actor: &Actor, count: usize) -> Self {
        Self::new(
            AuditAction::BulkReplace,
            id,
            &format!("{} variables", count),
            actor,
        )
        .with_detail("variables_count", count)
    }

    pub fn rollback(
        id: &EnvId,
        actor: &Actor,
        snapshot_id: &str,
        restored_from: DateTime<Utc>,
        count: usize,
    ) -> Self {
        Self::new(AuditAction::Rollback, id, snapshot_id, actor)
            .with_detail("restored_from", restored_from.to_rfc3339())
            .with_detail("variables_count", count)
    }

    pub fn template_applied(
        id: &EnvId,
        actor: &Actor,
        template_key: &str,
        template_name: &str,
        count: usize,
    ) -> Self {
        Self::new(AuditAction::ApplyTemplate, id, template_key, actor)
            .with_detail("template_name", template_name)
            .with_detail("vars_count", count)
    }

    pub fn exported(id: &EnvId, actor: &Actor, format: &str) -> Self {
        Self::new(
            AuditAction::ExportVariables,
            id,
            &format!("export.{}", format),
            actor,
        )
        .with_detail("format", format)
    }

    pub fn login_success(id: &EnvId, actor: &Actor) -> Self {
        Self::new(AuditAction::LoginSuccess, id, "authentication", actor)
    }

    pub fn login_failure(id: &EnvId, ip_address: &str, reason: &str) -> Self {
        Self::new(
            AuditAction::LoginFailure,
            id,
            "authentication",
            &Actor::new("anonymous", ip_address),
        )
        .with_detail("reason", reason)
    }

    pub fn logout(id: &EnvId, actor: &Actor) -> Self {
        Self::new(AuditAction::Logout, id, "authentication", actor)
    }
}

/// Global append-only audit log
pub struct AuditLog {
    log_path: PathBuf,
    gate: Arc<LockRegistry>,
}

impl AuditLog {
    /// Log at `{dir}/audit.jsonl`
    pub fn new(dir: &Path, gate: Arc<LockRegistry>) -> Self {
        Self::with_path(dir.join("audit.jsonl"), gate)
    }

    /// Create with custom path
    pub fn with_path(log_path: PathBuf, gate: Arc<LockRegistry>) -> Self {
        Self { log_path, gate }
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Append an event. Failures are logged and reported as `false`, never
    /// raised: the audited operation has already happened.
    pub fn append(&self, event: &AuditEvent) -> bool {
        match self.try_append(event) {
            Ok(()) => true,
            Err(e) => {
                error!(action = %event.action, "Failed to write audit log: {}", e);
                false
            }
        }
    }

    fn try_append(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        self.gate.with_exclusive(&self.log_path, || -> Result<()> {
            if let Some(parent) = self.log_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)?;
            file.write_all(line.as_bytes())?;
            file.flush()?;
            Ok(())
        })
    }

    /// Most recent events across all identities
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        self.query(&AuditQuery::default().limit(limit))
    }

    /// Scan from the oldest line, keep the first `limit` matches, and return
    /// them newest first. Corrupt lines are skipped.
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        let limit = query.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
        if limit == 0 {
            return Vec::new();
        }

        let content = match self.read_all() {
            Ok(Some(content)) => content,
            Ok(None) => return Vec::new(),
            Err(e) => {
                error!("Failed to read audit log: {}", e);
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let event: AuditEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(e) => {
                    debug!("Skipping corrupt audit line: {}", e);
                    continue;
                }
            };

            if !query.matches(&event) {
                continue;
            }

            events.push(event);
            if events.len() >= limit {
                break;
            }
        }

        events.reverse();
        events
    }

    fn read_all(&self) -> Result<Option<String>> {
        self.gate.with_exclusive(&self.log_path, || {
            if !self.log_path.exists() {
                return Ok(None);
            }
            fs::read_to_string(&self.log_path)
                .map(Some)
                .map_err(StoreError::from)
        })
    }
}

/// Query parameters for the audit log
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    namespace: Option<String>,
    environment: Option<String>,
    action: Option<AuditAction>,
    limit: Option<usize>,
}

impl AuditQuery {
    /// Events of one identity
    pub fn for_env(id: &EnvId) -> Self {
        Self::default()
            .namespace(id.namespace())
            .environment(id.environment())
    }

    /// Filter by namespace
    pub fn namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Filter by environment
    pub fn environment(mut self, environment: &str) -> Self {
        self.environment = Some(environment.to_string());
        self
    }

    /// Filter by action
    pub fn action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Limit results
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if an event matches every given filter
    fn matches(&self, event: &AuditEvent) -> bool {
        if let Some(ref namespace) = self.namespace {
            if event.namespace != *namespace {
                return false;
            }
        }

        if let Some(ref environment) = self.environment {
            if event.environment != *environment {
                return false;
            }
        }

        if let Some(action) = self.action {
            if event.action != action {
                return false;
            }
        }

        true
    }
}
