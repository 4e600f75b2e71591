//! Standard paths used by envkeep

use std::path::PathBuf;

/// Standard envkeep paths
pub struct Paths {
    /// Data directory (~/.local/share/envkeep)
    pub data: PathBuf,
    /// Config directory (~/.config/envkeep)
    pub config: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("envkeep");

        let config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("envkeep");

        Self { data, config }
    }

    /// Paths rooted somewhere other than the user directories
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            data: root.join("data"),
            config: root.join("config"),
        }
    }

    /// Settings file location
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.json")
    }

    /// Get state directory for a component
    pub fn state(&self, component: &str) -> PathBuf {
        self.data.join(component)
    }
}
