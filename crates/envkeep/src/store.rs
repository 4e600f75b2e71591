//! EnvStore - the write paths over current state, history and audit
//!
//! Each mutation reads, modifies, persists, snapshots and audits inside one
//! gate acquisition on the identity's state file, so concurrent callers
//! never lose each other's updates and both logs follow write order.

use crate::audit::{Actor, AuditEvent, AuditLog, AuditQuery};
use crate::codec::Cipher;
use crate::current::{sanitize, CurrentStore, EnvMetadata, Variables};
use crate::diff::VariableDiff;
use crate::error::{Result, StoreError};
use crate::export::{parse_env_lines, ExportFormat};
use crate::gate::LockRegistry;
use crate::history::{HistoryLog, Snapshot, SnapshotAction, SnapshotSummary};
use crate::identity::{is_valid_key, EnvId};
use crate::template::Template;
use envkeep_core::Settings;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Result of setting one variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub key: String,
    /// Value before the change, `None` when the key was created
    pub previous: Option<String>,
    /// History entry recorded for the change, if it could be written
    pub snapshot_id: Option<String>,
}

impl Change {
    pub fn is_update(&self) -> bool {
        self.previous.is_some()
    }
}

/// Encrypted, versioned variable store
pub struct EnvStore {
    cipher: Arc<Cipher>,
    current: CurrentStore,
    history: HistoryLog,
    audit: AuditLog,
    gate: Arc<LockRegistry>,
}

impl fmt::Debug for EnvStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvStore")
            .field("cipher", &self.cipher)
            .field("audit", &self.audit.path())
            .finish_non_exhaustive()
    }
}

impl EnvStore {
    /// Open a store; directories are created on first write
    pub fn open(data_dir: &Path, audit_dir: &Path, cipher: Cipher) -> Self {
        let cipher = Arc::new(cipher);
        let gate = Arc::new(LockRegistry::new());

        Self {
            current: CurrentStore::new(data_dir, Arc::clone(&cipher), Arc::clone(&gate)),
            history: HistoryLog::new(data_dir, Arc::clone(&cipher), Arc::clone(&gate)),
            audit: AuditLog::new(audit_dir, Arc::clone(&gate)),
            cipher,
            gate,
        }
    }

    /// Open using configured directories and key. Fails without a key.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let key = settings
            .encryption_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| StoreError::MissingKey("no encryption key configured".to_string()))?;
        let cipher = Cipher::from_key(key)?;

        Ok(Self::open(&settings.data_dir, &settings.audit_dir, cipher))
    }

    pub fn current(&self) -> &CurrentStore {
        &self.current
    }

    pub fn history_log(&self) -> &HistoryLog {
        &self.history
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn variables(&self, id: &EnvId) -> Result<Variables> {
        self.current.read(id)
    }

    pub fn metadata(&self, id: &EnvId) -> Result<EnvMetadata> {
        self.current.metadata(id)
    }

    pub fn environments(&self) -> Result<BTreeMap<String, Vec<String>>> {
        self.current.environments()
    }

    pub fn history(&self, id: &EnvId, limit: usize) -> Vec<SnapshotSummary> {
        self.history.list_summaries(id, limit)
    }

    pub fn snapshot(&self, id: &EnvId, snapshot_id: &str) -> Result<Option<Snapshot>> {
        self.history.get_snapshot(id, snapshot_id)
    }

    pub fn audit(&self, query: &AuditQuery) -> Vec<AuditEvent> {
        self.audit.query(query)
    }

    /// Create or update one variable
    pub fn set_variable(&self, id: &EnvId, key: &str, value: &str, actor: &Actor) -> Result<Change> {
        if !is_valid_key(key) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }

        self.locked(id, || {
            let mut variables = self.current.load_locked(id)?;
            let previous = variables.insert(key.to_string(), value.to_string());

            let (action, description, event) = match previous.as_deref() {
                Some(old) => (
                    SnapshotAction::Update,
                    format!("Updated variable '{}'", key),
                    AuditEvent::variable_updated(id, actor, key, old, value),
                ),
                None => (
                    SnapshotAction::Create,
                    format!("Created variable '{}'", key),
                    AuditEvent::variable_created(id, actor, key, value),
                ),
            };
            let snapshot_id = self.commit_locked(id, &variables, actor, action, &description)?;
            self.audit.append(&event);

            Ok(Change {
                key: key.to_string(),
                previous,
                snapshot_id,
            })
        })
    }

    /// Remove one variable, returning its value if it existed. The deletion
    /// attempt is audited either way.
    pub fn delete_variable(&self, id: &EnvId, key: &str, actor: &Actor) -> Result<Option<String>> {
        self.locked(id, || {
            let mut variables = self.current.load_locked(id)?;
            let removed = variables.remove(key);

            if removed.is_some() {
                let description = format!("Deleted variable '{}'", key);
                self.commit_locked(id, &variables, actor, SnapshotAction::Delete, &description)?;
            }

            let value = removed.as_deref().unwrap_or_default();
            self.audit
                .append(&AuditEvent::variable_deleted(id, actor, key, value));

            Ok(removed)
        })
    }

    /// Replace the whole environment. Does not read the old state, so it
    /// also overwrites a blob that no longer decrypts.
    pub fn replace_all(&self, id: &EnvId, variables: &Variables, actor: &Actor) -> Result<usize> {
        let variables = sanitize(variables);
        let count = variables.len();

        self.locked(id, || {
            let description = format!("Bulk replaced {} variables", count);
            self.commit_locked(id, &variables, actor, SnapshotAction::BulkReplace, &description)?;
            self.audit
                .append(&AuditEvent::bulk_replace(id, actor, count));
            Ok(count)
        })
    }

    /// Overlay `variables` onto the current state, returning how many were given
    pub fn merge(&self, id: &EnvId, variables: &Variables, actor: &Actor) -> Result<usize> {
        let incoming = sanitize(variables);
        let count = incoming.len();

        self.locked(id, || {
            let mut merged = self.current.load_locked(id)?;
            merged.extend(incoming);
            let description = format!("Merged {} variables", count);
            self.commit_locked(id, &merged, actor, SnapshotAction::Update, &description)?;
            self.audit
                .append(&AuditEvent::bulk_replace(id, actor, count).with_detail("mode", "merge"));
            Ok(count)
        })
    }

    /// Replace the environment with parsed `.env` content
    pub fn import_dotenv(&self, id: &EnvId, text: &str, actor: &Actor) -> Result<usize> {
        let variables = parse_env_lines(text);
        if variables.is_empty() {
            return Err(StoreError::EmptyImport);
        }
        self.replace_all(id, &variables, actor)
    }

    /// Make a past snapshot the current state again
    pub fn rollback(&self, id: &EnvId, snapshot_id: &str, actor: &Actor) -> Result<Snapshot> {
        let snapshot = self
            .history
            .get_snapshot(id, snapshot_id)?
            .ok_or_else(|| StoreError::NotFound(format!("{} snapshot {}", id, snapshot_id)))?;

        self.locked(id, || {
            let description = format!("Rolled back to version from {}", snapshot.timestamp.to_rfc3339());
            self.commit_locked(id, &snapshot.variables, actor, SnapshotAction::Rollback, &description)?;
            self.audit.append(&AuditEvent::rollback(
                id,
                actor,
                &snapshot.id,
                snapshot.timestamp,
                snapshot.variables.len(),
            ));
            Ok(())
        })?;

        Ok(snapshot)
    }

    /// Merge a template's variables over the current state, generating any
    /// placeholder secrets. Returns how many variables the template set.
    pub fn apply_template(
        &self,
        id: &EnvId,
        template_key: &str,
        template: &Template,
        actor: &Actor,
    ) -> Result<usize> {
        let generated = sanitize(&template.materialize());
        let count = generated.len();

        self.locked(id, || {
            let mut merged = self.current.load_locked(id)?;
            merged.extend(generated);
            let description = format!("Applied template: {}", template.name);
            self.commit_locked(id, &merged, actor, SnapshotAction::ApplyTemplate, &description)?;
            self.audit.append(&AuditEvent::template_applied(
                id,
                actor,
                template_key,
                &template.name,
                count,
            ));
            Ok(count)
        })
    }

    /// Render the current state for download
    pub fn export(&self, id: &EnvId, format: ExportFormat, actor: &Actor) -> Result<String> {
        let variables = self.current.read(id)?;
        let rendered = format.render(&variables)?;

        self.audit
            .append(&AuditEvent::exported(id, actor, format.as_str()));

        Ok(rendered)
    }

    /// What changed between a snapshot and the current state
    pub fn compare_snapshot(&self, id: &EnvId, snapshot_id: &str) -> Result<VariableDiff> {
        let snapshot = self
            .history
            .get_snapshot(id, snapshot_id)?
            .ok_or_else(|| StoreError::NotFound(format!("{} snapshot {}", id, snapshot_id)))?;
        let current = self.current.read(id)?;

        Ok(VariableDiff::between(&snapshot.variables, &current))
    }

    /// Side-by-side comparison of two identities
    pub fn compare_environments(&self, source: &EnvId, target: &EnvId) -> Result<VariableDiff> {
        let left = self.current.read(source)?;
        let right = self.current.read(target)?;

        Ok(VariableDiff::between(&left, &right))
    }

    /// Run `f` under the state gate. History and audit appends made inside
    /// take their own path locks after this one, never before.
    fn locked<T, F>(&self, id: &EnvId, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.gate.with_exclusive(&self.current.path_for(id), f)
    }

    /// Persist then snapshot. Caller holds the state gate, so snapshot order
    /// follows write order.
    fn commit_locked(
        &self,
        id: &EnvId,
        variables: &Variables,
        actor: &Actor,
        action: SnapshotAction,
        description: &str,
    ) -> Result<Option<String>> {
        let variables = sanitize(variables);
        self.current.persist_locked(id, &variables)?;

        Ok(self
            .history
            .append_snapshot(id, &variables, &actor.user_id, action, description))
    }
}
