//! Plain-text renderings of a variable map, and `.env` parsing for import

use crate::current::Variables;
use crate::error::Result;
use crate::identity::{is_valid_key, EnvId};
use std::fmt;
use std::str::FromStr;

/// Output format for exports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Env,
    Json,
    Yaml,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Env => "env",
            ExportFormat::Json => "json",
            ExportFormat::Yaml => "yaml",
        }
    }

    pub fn render(&self, variables: &Variables) -> Result<String> {
        match self {
            ExportFormat::Env => Ok(to_env_lines(variables)),
            ExportFormat::Json => to_json(variables),
            ExportFormat::Yaml => to_yaml(variables),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "env" | "dotenv" => Ok(ExportFormat::Env),
            "json" => Ok(ExportFormat::Json),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            other => Err(format!("unknown export format: {}", other)),
        }
    }
}

/// `KEY=value` lines sorted by key. Newlines in values are escaped; keys
/// that could not be stored are skipped.
pub fn to_env_lines(variables: &Variables) -> String {
    variables
        .iter()
        .filter(|(key, _)| is_valid_key(key))
        .map(|(key, value)| format!("{}={}", key, value.replace('\n', "\\n")))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn to_json(variables: &Variables) -> Result<String> {
    Ok(serde_json::to_string_pretty(variables)?)
}

pub fn to_yaml(variables: &Variables) -> Result<String> {
    Ok(serde_yaml::to_string(variables)?)
}

/// Parse pasted `.env` content. Blank lines, `#` comments, lines without
/// `=` and invalid keys are ignored; the first `=` splits key from value.
pub fn parse_env_lines(text: &str) -> Variables {
    let mut variables = Variables::new();

    for line in text.lines() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if !is_valid_key(key) {
            continue;
        }
        variables.insert(key.to_string(), value.trim().to_string());
    }

    variables
}

/// Expand `{namespace}` and `{environment}` in an export file name template
pub fn export_filename(template: &str, id: &EnvId) -> String {
    template
        .replace("{namespace}", id.namespace())
        .replace("{environment}", id.environment())
}
