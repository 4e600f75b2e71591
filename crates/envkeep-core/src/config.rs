//! Configuration management for envkeep
//!
//! Settings come from `config.json` in the config directory, then
//! `ENVKEEP_*` environment variables override individual fields.

use crate::paths::Paths;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime settings for the store and its tools
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the per-namespace state and history files
    pub data_dir: PathBuf,

    /// Directory holding the global audit log
    pub audit_dir: PathBuf,

    /// Variable templates catalog
    pub templates_file: PathBuf,

    /// Export file name, `{namespace}` and `{environment}` are expanded
    pub export_filename: String,

    /// Default number of history entries listed
    pub history_limit: usize,

    /// Default number of audit events returned
    pub audit_limit: usize,

    /// Default tracing filter directive
    pub log_level: String,

    /// Age identity used for all encryption. Prefer the environment
    /// variable over storing it in the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_paths(&Paths::new())
    }
}

impl Settings {
    /// Defaults laid out under the given paths
    pub fn for_paths(paths: &Paths) -> Self {
        Self {
            data_dir: paths.state("data"),
            audit_dir: paths.state("audit_logs"),
            templates_file: paths.config.join("templates.json"),
            export_filename: "{namespace}-{environment}.env".to_string(),
            history_limit: 50,
            audit_limit: 100,
            log_level: "info".to_string(),
            encryption_key: None,
        }
    }

    /// Load settings from file
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse settings: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    /// Load from the standard location and apply process environment overrides
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::load(&Paths::new().config_file())?;
        settings.apply_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Save settings to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Override fields from `ENVKEEP_*` variables resolved through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = lookup("ENVKEEP_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("ENVKEEP_AUDIT_DIR") {
            self.audit_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("ENVKEEP_TEMPLATES_FILE") {
            self.templates_file = PathBuf::from(file);
        }
        if let Some(name) = lookup("ENVKEEP_EXPORT_FILENAME") {
            self.export_filename = name;
        }
        if let Some(level) = lookup("ENVKEEP_LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        if let Some(key) = lookup("ENVKEEP_ENCRYPTION_KEY") {
            self.encryption_key = Some(key);
        }
    }

    /// The configured key. Startup must stop here if there is none.
    pub fn encryption_key(&self) -> Result<&str> {
        match self.encryption_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => Ok(key),
            _ => bail!("Missing encryption key - set ENVKEEP_ENCRYPTION_KEY (generate one with 'envkeep keygen')"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_for_paths() {
        let paths = Paths::rooted("/tmp/ek");
        let settings = Settings::for_paths(&paths);
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/ek/data/data"));
        assert_eq!(settings.audit_dir, PathBuf::from("/tmp/ek/data/audit_logs"));
        assert_eq!(settings.history_limit, 50);
        assert_eq!(settings.audit_limit, 100);
        assert!(settings.encryption_key().is_err());
    }

    #[test]
    fn test_overrides() {
        let mut settings = Settings::for_paths(&Paths::rooted("/tmp/ek"));
        let env: HashMap<&str, &str> = [
            ("ENVKEEP_DATA_DIR", "/srv/data"),
            ("ENVKEEP_LOG_LEVEL", "DEBUG"),
            ("ENVKEEP_ENCRYPTION_KEY", "AGE-SECRET-KEY-1TEST"),
            ("ENVKEEP_AUDIT_DIR", "  "),
        ]
        .into_iter()
        .collect();

        settings.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(settings.data_dir, PathBuf::from("/srv/data"));
        assert_eq!(settings.audit_dir, PathBuf::from("/tmp/ek/data/audit_logs"));
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.encryption_key().unwrap(), "AGE-SECRET-KEY-1TEST");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut settings = Settings::for_paths(&Paths::rooted(dir.path()));
        settings.history_limit = 7;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.history_limit, 7);
        assert_eq!(loaded.data_dir, settings.data_dir);
        assert!(loaded.encryption_key.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"audit_limit": 5}"#).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.audit_limit, 5);
        assert_eq!(loaded.history_limit, 50);
        assert_eq!(loaded.export_filename, "{namespace}-{environment}.env");
    }
}
