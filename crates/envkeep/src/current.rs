//! Current-state store
//!
//! One encrypted blob per identity at `{root}/{namespace}/{environment}.enc`
//! holding the live variables as compact JSON with sorted keys. Every write
//! replaces the whole map; merging happens in the caller's write path.

use crate::codec::Cipher;
use crate::error::{Result, StoreError};
use crate::gate::LockRegistry;
use crate::identity::{is_valid_key, is_valid_segment, EnvId};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};

/// Live key/value mapping for one identity
pub type Variables = BTreeMap<String, String>;

const STATE_EXTENSION: &str = "enc";

/// File metadata for one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvMetadata {
    pub last_modified: Option<DateTime<Utc>>,
    pub variable_count: usize,
}

/// Reads and replaces the encrypted current state
pub struct CurrentStore {
    root: PathBuf,
    cipher: Arc<Cipher>,
    gate: Arc<LockRegistry>,
}

impl CurrentStore {
    pub fn new(root: &Path, cipher: Arc<Cipher>, gate: Arc<LockRegistry>) -> Self {
        Self {
            root: root.to_path_buf(),
            cipher,
            gate,
        }
    }

    /// Path of the encrypted blob for an identity
    pub fn path_for(&self, id: &EnvId) -> PathBuf {
        self.root
            .join(id.namespace())
            .join(format!("{}.{}", id.environment(), STATE_EXTENSION))
    }

    /// Empty when nothing was ever written, [`StoreError::Decryption`] when
    /// the blob exists but cannot be authenticated.
    pub fn read(&self, id: &EnvId) -> Result<Variables> {
        let path = self.path_for(id);
        self.gate.with_exclusive(&path, || self.load_locked(id))
    }

    /// Replace the whole mapping. Invalid keys are dropped silently.
    pub fn write(&self, id: &EnvId, variables: &Variables) -> Result<()> {
        let path = self.path_for(id);
        self.gate
            .with_exclusive(&path, || self.persist_locked(id, variables))
    }

    pub fn metadata(&self, id: &EnvId) -> Result<EnvMetadata> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(EnvMetadata {
                last_modified: None,
                variable_count: 0,
            });
        }

        let modified = fs::metadata(&path)?.modified()?;
        let variable_count = self.read(id)?.len();

        Ok(EnvMetadata {
            last_modified: Some(DateTime::<Utc>::from(modified)),
            variable_count,
        })
    }

    /// Every stored identity, grouped by namespace
    pub fn environments(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut envs: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if !self.root.exists() {
            return Ok(envs);
        }

        for ns_entry in fs::read_dir(&self.root)? {
            let ns_entry = ns_entry?;
            if !ns_entry.file_type()?.is_dir() {
                continue;
            }
            let namespace = ns_entry.file_name().to_string_lossy().to_string();
            if !is_valid_segment(&namespace) {
                continue;
            }

            for entry in fs::read_dir(ns_entry.path())? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                let Some(environment) = name.strip_suffix(".enc") else {
                    continue;
                };
                if is_valid_segment(environment) {
                    envs.entry(namespace.clone())
                        .or_default()
                        .push(environment.to_string());
                }
            }
        }

        for list in envs.values_mut() {
            list.sort();
        }

        Ok(envs)
    }

    /// Load the state. Caller must hold the gate for [`Self::path_for`].
    pub(crate) fn load_locked(&self, id: &EnvId) -> Result<Variables> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(Variables::new());
        }

        let encrypted = fs::read(&path)?;
        let decrypted = self.cipher.decrypt(&encrypted).map_err(|e| {
            error!(env = %id, "Decryption failure: {}", e);
            e
        })?;

        match decode_variables(&decrypted) {
            Ok(Some(variables)) => Ok(variables),
            Ok(None) => {
                warn!(env = %id, "State payload is not an object, treating as empty");
                Ok(Variables::new())
            }
            Err(e) => {
                warn!(env = %id, "Invalid JSON payload, treating as empty: {}", e);
                Ok(Variables::new())
            }
        }
    }

    /// Encrypt and atomically replace the state. Caller must hold the gate.
    pub(crate) fn persist_locked(&self, id: &EnvId, variables: &Variables) -> Result<()> {
        let path = self.path_for(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let payload = serde_json::to_vec(&sanitize(variables))?;
        let encrypted = self.cipher.encrypt(&payload)?;

        let tmp_path = path.with_extension(format!("{}.tmp", STATE_EXTENSION));
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&encrypted)?;
            file.sync_all()?;
        }
        set_private(&tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(StoreError::from)
    }
}

/// Parse a decrypted variable map. Non-string values are kept in their
/// JSON text form; `None` when the payload is not an object.
pub(crate) fn decode_variables(payload: &[u8]) -> serde_json::Result<Option<Variables>> {
    let Value::Object(map) = serde_json::from_slice::<Value>(payload)? else {
        return Ok(None);
    };

    let variables = map
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => (key, s),
            other => (key, other.to_string()),
        })
        .collect();

    Ok(Some(variables))
}

/// Only the entries whose keys may be persisted
pub fn sanitize(variables: &Variables) -> Variables {
    variables
        .iter()
        .filter(|(key, _)| is_valid_key(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(unix)]
fn set_private(path: &Path) -> std::io::Result<()> {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_private(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tests::tamper;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::{tempdir, TempDir};

    fn temp_store() -> (CurrentStore, TempDir) {
        let dir = tempdir().unwrap();
        let (cipher, _) = Cipher::generate();
        let store = CurrentStore::new(
            &dir.path().join("data"),
            Arc::new(cipher),
            Arc::new(LockRegistry::new()),
        );
        (store, dir)
    }

    fn vars(pairs: &[(&str, &str)]) -> Variables {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn acme_prod() -> EnvId {
        EnvId::new("acme", "prod").unwrap()
    }

    #[test]
    fn test_missing_blob_reads_empty() {
        let (store, _dir) = temp_store();
        assert!(store.read(&acme_prod()).unwrap().is_empty());
    }

    #[test]
    fn test_write_read_round_trip() {
        let (store, _dir) = temp_store();
        let id = acme_prod();
        let expected = vars(&[
            ("DATABASE_URL", "postgres://db/app"),
            ("MULTILINE", "line1\nline2"),
            ("EMPTY", ""),
        ]);

        store.write(&id, &expected).unwrap();
        assert_eq!(store.read(&id).unwrap(), expected);
        assert!(store.path_for(&id).ends_with("acme/prod.enc"));
    }

    #[test]
    fn test_write_is_idempotent() {
        let (store, _dir) = temp_store();
        let id = acme_prod();
        let expected = vars(&[("A", "1"), ("B", "2")]);

        store.write(&id, &expected).unwrap();
        assert_eq!(store.read(&id).unwrap(), expected);
        store.write(&id, &expected).unwrap();
        assert_eq!(store.read(&id).unwrap(), expected);
    }

    #[test]
    fn test_invalid_keys_are_dropped() {
        let (store, _dir) = temp_store();
        let id = acme_prod();

        store
            .write(&id, &vars(&[("GOOD", "1"), ("bad key", "2"), ("-x", "3")]))
            .unwrap();

        assert_eq!(store.read(&id).unwrap(), vars(&[("GOOD", "1")]));
    }

    #[test]
    fn test_blob_is_not_plaintext() {
        let (store, _dir) = temp_store();
        let id = acme_prod();
        store.write(&id, &vars(&[("TOKEN", "hunter2")])).unwrap();

        let raw = fs::read_to_string(store.path_for(&id)).unwrap();
        assert!(!raw.contains("hunter2"));
        assert!(!raw.contains("TOKEN"));
    }

    #[test]
    fn test_tampered_blob_is_decryption_failure() {
        let (store, _dir) = temp_store();
        let id = acme_prod();
        store.write(&id, &vars(&[("A", "1")])).unwrap();

        let path = store.path_for(&id);
        let raw = fs::read(&path).unwrap();
        fs::write(&path, tamper(&raw)).unwrap();

        let err = store.read(&id).unwrap_err();
        assert!(err.is_decryption());
    }

    #[test]
    fn test_foreign_key_is_decryption_failure() {
        let (store, dir) = temp_store();
        let id = acme_prod();
        store.write(&id, &vars(&[("A", "1")])).unwrap();

        let (other, _) = Cipher::generate();
        let reader = CurrentStore::new(
            &dir.path().join("data"),
            Arc::new(other),
            Arc::new(LockRegistry::new()),
        );
        assert!(reader.read(&id).unwrap_err().is_decryption());
    }

    #[test]
    fn test_non_object_payload_reads_empty() {
        let (store, _dir) = temp_store();
        let id = acme_prod();
        let path = store.path_for(&id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, store.cipher.encrypt(b"[1, 2, 3]").unwrap()).unwrap();

        assert!(store.read(&id).unwrap().is_empty());
    }

    #[test]
    fn test_scalar_values_read_as_text() {
        let (store, _dir) = temp_store();
        let id = acme_prod();
        let path = store.path_for(&id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let payload = br#"{"A":"1","PORT":8080,"DEBUG":true,"RATIO":0.5,"NONE":null}"#;
        fs::write(&path, store.cipher.encrypt(payload).unwrap()).unwrap();

        assert_eq!(
            store.read(&id).unwrap(),
            vars(&[
                ("A", "1"),
                ("DEBUG", "true"),
                ("NONE", "null"),
                ("PORT", "8080"),
                ("RATIO", "0.5"),
            ])
        );
    }

    #[test]
    fn test_invalid_json_reads_empty() {
        let (store, _dir) = temp_store();
        let id = acme_prod();
        let path = store.path_for(&id);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, store.cipher.encrypt(b"{ not json").unwrap()).unwrap();

        assert!(store.read(&id).unwrap().is_empty());
    }

    #[test]
    fn test_metadata() {
        let (store, _dir) = temp_store();
        let id = acme_prod();

        let empty = store.metadata(&id).unwrap();
        assert_eq!(empty.last_modified, None);
        assert_eq!(empty.variable_count, 0);

        store.write(&id, &vars(&[("A", "1"), ("B", "2")])).unwrap();
        let meta = store.metadata(&id).unwrap();
        assert!(meta.last_modified.is_some());
        assert_eq!(meta.variable_count, 2);
    }

    #[test]
    fn test_environments() {
        let (store, _dir) = temp_store();
        store
            .write(&EnvId::new("acme", "prod").unwrap(), &vars(&[("A", "1")]))
            .unwrap();
        store
            .write(&EnvId::new("acme", "dev").unwrap(), &vars(&[("A", "1")]))
            .unwrap();
        store
            .write(&EnvId::new("beta", "main").unwrap(), &Variables::new())
            .unwrap();

        let envs = store.environments().unwrap();
        assert_eq!(envs["acme"], vec!["dev".to_string(), "prod".to_string()]);
        assert_eq!(envs["beta"], vec!["main".to_string()]);
    }

    #[test]
    fn test_concurrent_writes_leave_one_mapping() {
        let (store, _dir) = temp_store();
        let store = Arc::new(store);
        let id = acme_prod();
        let writers = 16;
        let barrier = Arc::new(Barrier::new(writers));

        let attempts: Vec<Variables> = (0..writers)
            .map(|i| {
                (0..20)
                    .map(|k| (format!("KEY_{}", k), format!("writer-{}-{}", i, "x".repeat(i * 10))))
                    .collect()
            })
            .collect();

        let handles: Vec<_> = attempts
            .iter()
            .cloned()
            .map(|mapping| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let id = id.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.write(&id, &mapping).unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let result = store.read(&id).unwrap();
        assert!(attempts.contains(&result), "final state must be one attempted mapping");
        assert!(!store.path_for(&id).with_extension("enc.tmp").exists());
    }
}
