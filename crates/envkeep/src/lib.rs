//! envkeep - Encrypted, versioned store for secret configuration
//!
//! Each (namespace, environment) pair owns one encrypted blob holding its
//! live variables and one append-only history log of full snapshots.
//! A single global audit log records who changed what, with values
//! reduced to fingerprints.
//!
//! Uses age encryption (X25519 + ChaCha20-Poly1305).

pub mod audit;
pub mod codec;
pub mod current;
pub mod diff;
pub mod error;
pub mod export;
pub mod gate;
pub mod history;
pub mod identity;
pub mod store;
pub mod template;

pub use audit::{Actor, AuditAction, AuditEvent, AuditLog, AuditQuery};
pub use codec::Cipher;
pub use current::{CurrentStore, EnvMetadata, Variables};
pub use diff::VariableDiff;
pub use error::{Result, StoreError};
pub use export::ExportFormat;
pub use gate::LockRegistry;
pub use history::{HistoryLog, Snapshot, SnapshotAction, SnapshotSummary};
pub use identity::EnvId;
pub use store::{Change, EnvStore};
pub use template::{Template, TemplateCatalog};
