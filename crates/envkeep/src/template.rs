//! Variable templates
//!
//! A catalog file maps template keys to a named set of default variables:
//!
//! ```json
//! { "django": { "name": "Django", "variables": { "SECRET_KEY": "__GENERATE__" } } }
//! ```
//!
//! Values equal to `__GENERATE__` are replaced with a fresh random token
//! each time the template is applied.

use crate::current::Variables;
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Placeholder replaced by a generated secret
pub const GENERATE_PLACEHOLDER: &str = "__GENERATE__";

/// A named set of default variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub variables: Variables,
}

impl Template {
    /// Variables with every placeholder replaced by a new random token
    pub fn materialize(&self) -> Variables {
        self.variables
            .iter()
            .map(|(key, value)| {
                let value = if value == GENERATE_PLACEHOLDER {
                    generate_secret()
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect()
    }
}

/// 32 random bytes, hex encoded
pub fn generate_secret() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// Templates keyed by their catalog key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, Template>,
}

impl TemplateCatalog {
    /// Load the catalog; a missing file is an empty catalog
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| StoreError::Template(format!("{}: {}", path.display(), e)))
    }

    pub fn get(&self, key: &str) -> Result<&Template> {
        self.templates
            .get(key)
            .ok_or_else(|| StoreError::Template(format!("unknown template '{}'", key)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Template)> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_catalog() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("templates.json");
        fs::write(
            &path,
            r#"{
                "django": {
                    "name": "Django",
                    "description": "Web defaults",
                    "variables": {"DEBUG": "false", "SECRET_KEY": "__GENERATE__"}
                },
                "empty": {"name": "Empty"}
            }"#,
        )
        .unwrap();

        let catalog = TemplateCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("django").unwrap().name, "Django");
        assert!(catalog.get("empty").unwrap().variables.is_empty());
        assert!(matches!(catalog.get("rails"), Err(StoreError::Template(_))));
    }

    #[test]
    fn test_missing_and_broken_catalog() {
        let dir = tempdir().unwrap();
        assert!(TemplateCatalog::load(&dir.path().join("none.json"))
            .unwrap()
            .is_empty());

        let path = dir.path().join("broken.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(matches!(TemplateCatalog::load(&path), Err(StoreError::Template(_))));
    }

    #[test]
    fn test_materialize_generates_fresh_secrets() {
        let template = Template {
            name: "Web".to_string(),
            description: String::new(),
            variables: [
                ("PORT".to_string(), "8080".to_string()),
                ("SECRET_KEY".to_string(), GENERATE_PLACEHOLDER.to_string()),
            ]
            .into_iter()
            .collect(),
        };

        let first = template.materialize();
        let second = template.materialize();

        assert_eq!(first["PORT"], "8080");
        assert_eq!(first["SECRET_KEY"].len(), 64);
        assert_ne!(first["SECRET_KEY"], GENERATE_PLACEHOLDER);
        assert_ne!(first["SECRET_KEY"], second["SECRET_KEY"]);
    }
}
