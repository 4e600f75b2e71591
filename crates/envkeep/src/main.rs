//! envkeep - Encrypted, versioned secret configuration
//!
//! Variables live per (namespace, environment), encrypted with age.
//! Every change is snapshotted and audited.
//!
//! Commands:
//! - keygen: Generate a new encryption key
//! - list / get / set / delete: Work with the live variables
//! - import <FILE> / export: Move variables in and out as .env, JSON or YAML
//! - history / show / diff / rollback: Inspect and restore snapshots
//! - templates / apply-template <KEY>: Merge template defaults
//! - audit: Show who changed what
//! - envs / compare <NS> <ENV>: Look across environments

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use envkeep::export::export_filename;
use envkeep::{
    Actor, AuditAction, AuditQuery, Cipher, EnvId, EnvStore, ExportFormat, TemplateCatalog,
    VariableDiff,
};
use envkeep_core::format::{relative_time, timestamp, timestamp_or_never, truncate};
use envkeep_core::Settings;
use std::fs;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "envkeep")]
#[command(about = "Encrypted, versioned store for per-environment secret configuration")]
#[command(version)]
#[command(after_help = r#"CONFIGURATION:
    ENVKEEP_ENCRYPTION_KEY   age identity used for all data (envkeep keygen)
    ENVKEEP_DATA_DIR         State and history files
    ENVKEEP_AUDIT_DIR        Audit log directory
    ENVKEEP_TEMPLATES_FILE   Template catalog (JSON)
    ENVKEEP_LOG_LEVEL        Default log filter (RUST_LOG wins)

SECURITY:
    - State and history are encrypted with age (X25519 + ChaCha20-Poly1305)
    - The audit log stores value fingerprints, never values"#)]
struct Cli {
    /// Namespace (project or team)
    #[arg(short, long, global = true, default_value = "default")]
    namespace: String,

    /// Environment within the namespace
    #[arg(short, long, global = true, default_value = "development")]
    environment: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new encryption key
    Keygen,

    /// List variable names (values hidden)
    List {
        /// Output as JSON for scripting
        #[arg(long)]
        json: bool,
    },

    /// Print one variable's value
    Get {
        /// Don't print trailing newline (useful for piping)
        #[arg(long)]
        no_newline: bool,
        key: String,
    },

    /// Create or update a variable
    Set { key: String, value: String },

    /// Delete a variable
    Delete { key: String },

    /// Replace all variables with the contents of a .env file
    Import { file: PathBuf },

    /// Render variables as env, json or yaml
    Export {
        #[arg(long, default_value = "env")]
        format: ExportFormat,
        /// Write to a file (a directory gets the configured file name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List snapshots, newest first
    History {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show the variables of one snapshot
    Show { id: String },

    /// Compare a snapshot with the current variables
    Diff { id: String },

    /// Restore a snapshot as the current variables
    Rollback { id: String },

    /// List available templates
    Templates,

    /// Merge a template's variables into the environment
    ApplyTemplate { key: String },

    /// Show audit events, newest first
    Audit {
        /// Filter by action (e.g. update-variable)
        #[arg(long)]
        action: Option<AuditAction>,
        #[arg(long)]
        limit: Option<usize>,
        /// Include every namespace and environment
        #[arg(long)]
        all: bool,
    },

    /// List every stored namespace and environment
    Envs,

    /// Compare this environment with another
    Compare {
        /// Namespace to compare against
        target_namespace: String,
        /// Environment to compare against
        target_environment: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Key generation needs no store
    if matches!(cli.command, Some(Commands::Keygen)) {
        return cmd_keygen();
    }

    let id = EnvId::new(&cli.namespace, &cli.environment)
        .with_context(|| format!("Invalid identity: {}/{}", cli.namespace, cli.environment))?;
    settings.encryption_key()?;
    let store = EnvStore::from_settings(&settings)?;
    let actor = Actor::local();

    match cli.command {
        Some(Commands::Keygen) => cmd_keygen(),
        Some(Commands::List { json }) => cmd_list(&store, &id, json),
        Some(Commands::Get { no_newline, key }) => cmd_get(&store, &id, &key, no_newline),
        Some(Commands::Set { key, value }) => cmd_set(&store, &id, &key, &value, &actor),
        Some(Commands::Delete { key }) => cmd_delete(&store, &id, &key, &actor),
        Some(Commands::Import { file }) => cmd_import(&store, &id, &file, &actor),
        Some(Commands::Export { format, output }) => {
            cmd_export(&store, &settings, &id, format, output, &actor)
        }
        Some(Commands::History { limit }) => {
            cmd_history(&store, &id, limit.unwrap_or(settings.history_limit))
        }
        Some(Commands::Show { id: snapshot_id }) => cmd_show(&store, &id, &snapshot_id),
        Some(Commands::Diff { id: snapshot_id }) => cmd_diff(&store, &id, &snapshot_id),
        Some(Commands::Rollback { id: snapshot_id }) => {
            cmd_rollback(&store, &id, &snapshot_id, &actor)
        }
        Some(Commands::Templates) => cmd_templates(&settings),
        Some(Commands::ApplyTemplate { key }) => {
            cmd_apply_template(&store, &settings, &id, &key, &actor)
        }
        Some(Commands::Audit { action, limit, all }) => {
            let mut query = if all {
                AuditQuery::default()
            } else {
                AuditQuery::for_env(&id)
            };
            if let Some(action) = action {
                query = query.action(action);
            }
            cmd_audit(&store, query.limit(limit.unwrap_or(settings.audit_limit)))
        }
        Some(Commands::Envs) => cmd_envs(&store),
        Some(Commands::Compare {
            target_namespace,
            target_environment,
        }) => {
            let target = EnvId::new(&target_namespace, &target_environment)?;
            cmd_compare(&store, &id, &target)
        }
        None => {
            // Default to listing variables
            cmd_list(&store, &id, false)
        }
    }
}

/// Generate a key
fn cmd_keygen() -> Result<()> {
    let (cipher, secret) = Cipher::generate();

    println!("{}", secret);
    eprintln!();
    eprintln!("Public key: {}", cipher.public_key());
    eprintln!("Keep this secret. Export it as ENVKEEP_ENCRYPTION_KEY to use it.");

    Ok(())
}

/// List variable names
fn cmd_list(store: &EnvStore, id: &EnvId, json: bool) -> Result<()> {
    let variables = store.variables(id)?;

    if json {
        let keys: Vec<&str> = variables.keys().map(String::as_str).collect();
        println!("{}", serde_json::to_string_pretty(&keys)?);
        return Ok(());
    }

    if variables.is_empty() {
        println!("No variables in {}. Add one with: envkeep set <KEY> <VALUE>", id);
        return Ok(());
    }

    let meta = store.metadata(id)?;
    println!("Variables in {} ({})", id, timestamp_or_never(meta.last_modified));
    println!();

    for key in variables.keys() {
        println!("  {}", key);
    }

    Ok(())
}

/// Print one value
fn cmd_get(store: &EnvStore, id: &EnvId, key: &str, no_newline: bool) -> Result<()> {
    let variables = store.variables(id)?;
    let Some(value) = variables.get(key) else {
        bail!("Variable not found: {}", key);
    };

    if no_newline {
        print!("{}", value);
    } else {
        println!("{}", value);
    }

    Ok(())
}

fn cmd_set(store: &EnvStore, id: &EnvId, key: &str, value: &str, actor: &Actor) -> Result<()> {
    let change = store.set_variable(id, key, value, actor)?;

    if change.is_update() {
        println!("success: Updated {} in {}", key, id);
    } else {
        println!("success: Created {} in {}", key, id);
    }

    Ok(())
}

fn cmd_delete(store: &EnvStore, id: &EnvId, key: &str, actor: &Actor) -> Result<()> {
    match store.delete_variable(id, key, actor)? {
        Some(_) => println!("success: Deleted {} from {}", key, id),
        None => println!("warning: {} was not set in {}", key, id),
    }
    Ok(())
}

/// Replace the environment from a .env file
fn cmd_import(store: &EnvStore, id: &EnvId, file: &PathBuf, actor: &Actor) -> Result<()> {
    if !file.exists() {
        bail!("Import file not found: {}", file.display());
    }

    let text = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let count = store.import_dotenv(id, &text, actor)?;

    println!("success: Imported {} variables into {}", count, id);

    Ok(())
}

fn cmd_export(
    store: &EnvStore,
    settings: &Settings,
    id: &EnvId,
    format: ExportFormat,
    output: Option<PathBuf>,
    actor: &Actor,
) -> Result<()> {
    let rendered = store.export(id, format, actor)?;

    let Some(mut path) = output else {
        println!("{}", rendered);
        return Ok(());
    };

    if path.is_dir() {
        path = path.join(export_filename(&settings.export_filename, id));
    }
    fs::write(&path, format!("{}\n", rendered))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("success: Exported {} to {}", id, path.display());

    Ok(())
}

fn cmd_history(store: &EnvStore, id: &EnvId, limit: usize) -> Result<()> {
    let history = store.history(id, limit);

    if history.is_empty() {
        println!("No history for {}", id);
        return Ok(());
    }

    println!("History of {}", id);
    println!();

    for entry in &history {
        println!(
            "  {}  {:<14} {:<12} {}  ({})",
            entry.id,
            entry.action.as_str(),
            truncate(&entry.user_id, 12),
            entry.description,
            relative_time(entry.timestamp)
        );
    }

    Ok(())
}

fn cmd_show(store: &EnvStore, id: &EnvId, snapshot_id: &str) -> Result<()> {
    let Some(snapshot) = store.snapshot(id, snapshot_id)? else {
        bail!("Snapshot not found: {}", snapshot_id);
    };

    println!("{}  {}", snapshot.action, timestamp(snapshot.timestamp));
    println!("{} by {}", snapshot.description, snapshot.user_id);
    println!();

    for (key, value) in &snapshot.variables {
        println!("  {}={}", key, value);
    }

    Ok(())
}

fn cmd_diff(store: &EnvStore, id: &EnvId, snapshot_id: &str) -> Result<()> {
    let diff = store.compare_snapshot(id, snapshot_id)?;
    print_diff(&diff, "snapshot", "current");
    Ok(())
}

fn cmd_rollback(store: &EnvStore, id: &EnvId, snapshot_id: &str, actor: &Actor) -> Result<()> {
    let snapshot = store.rollback(id, snapshot_id, actor)?;

    println!(
        "success: Restored {} variables from {}",
        snapshot.variables.len(),
        timestamp(snapshot.timestamp)
    );

    Ok(())
}

fn cmd_templates(settings: &Settings) -> Result<()> {
    let catalog = TemplateCatalog::load(&settings.templates_file)?;

    if catalog.is_empty() {
        println!("No templates in {}", settings.templates_file.display());
        return Ok(());
    }

    println!("Templates");
    println!();

    for (key, template) in catalog.iter() {
        println!(
            "  {:<16} {} ({} variables) {}",
            key,
            template.name,
            template.variables.len(),
            truncate(&template.description, 50)
        );
    }

    Ok(())
}

fn cmd_apply_template(
    store: &EnvStore,
    settings: &Settings,
    id: &EnvId,
    key: &str,
    actor: &Actor,
) -> Result<()> {
    let catalog = TemplateCatalog::load(&settings.templates_file)?;
    let template = catalog.get(key)?;
    let count = store.apply_template(id, key, template, actor)?;

    println!("success: Applied {} ({} variables) to {}", template.name, count, id);

    Ok(())
}

fn cmd_audit(store: &EnvStore, query: AuditQuery) -> Result<()> {
    let events = store.audit(&query);

    if events.is_empty() {
        println!("No audit events");
        return Ok(());
    }

    for event in &events {
        println!(
            "  {}  {:<18} {}/{}  {}  {}@{}",
            timestamp(event.timestamp),
            event.action.as_str(),
            event.namespace,
            event.environment,
            truncate(&event.resource, 32),
            event.user_id,
            event.ip_address
        );
    }

    Ok(())
}

fn cmd_envs(store: &EnvStore) -> Result<()> {
    let envs = store.environments()?;

    if envs.is_empty() {
        println!("No environments stored yet");
        return Ok(());
    }

    for (namespace, environments) in &envs {
        println!("{}", namespace);
        for environment in environments {
            println!("  {}", environment);
        }
    }

    Ok(())
}

fn cmd_compare(store: &EnvStore, source: &EnvId, target: &EnvId) -> Result<()> {
    let diff = store.compare_environments(source, target)?;
    print_diff(&diff, &source.to_string(), &target.to_string());
    Ok(())
}

fn print_diff(diff: &VariableDiff, left: &str, right: &str) {
    if diff.is_empty() {
        println!("{} and {} are identical ({} variables)", left, right, diff.unchanged.len());
        return;
    }

    for key in &diff.added {
        println!("  + {}  (only in {})", key, right);
    }
    for key in &diff.removed {
        println!("  - {}  (only in {})", key, left);
    }
    for key in &diff.changed {
        println!("  ~ {}", key);
    }
    println!();
    println!("{} unchanged", diff.unchanged.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["envkeep", "keygen"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Keygen)));
        assert_eq!(cli.namespace, "default");
        assert_eq!(cli.environment, "development");

        let cli = Cli::try_parse_from(["envkeep", "-n", "acme", "-e", "prod", "set", "API_KEY", "v"])
            .unwrap();
        assert_eq!(cli.namespace, "acme");
        assert_eq!(cli.environment, "prod");
        if let Some(Commands::Set { key, value }) = cli.command {
            assert_eq!(key, "API_KEY");
            assert_eq!(value, "v");
        } else {
            panic!("Expected Set command");
        }

        let cli = Cli::try_parse_from(["envkeep", "get", "--no-newline", "API_KEY", "-n", "acme"])
            .unwrap();
        assert_eq!(cli.namespace, "acme");
        if let Some(Commands::Get { key, no_newline }) = cli.command {
            assert_eq!(key, "API_KEY");
            assert!(no_newline);
        } else {
            panic!("Expected Get command");
        }
    }

    #[test]
    fn test_cli_export_and_audit() {
        let cli = Cli::try_parse_from(["envkeep", "export", "--format", "yaml"]).unwrap();
        if let Some(Commands::Export { format, output }) = cli.command {
            assert_eq!(format, ExportFormat::Yaml);
            assert!(output.is_none());
        } else {
            panic!("Expected Export command");
        }

        let cli = Cli::try_parse_from(["envkeep", "audit", "--action", "update-variable", "--all"])
            .unwrap();
        if let Some(Commands::Audit { action, limit, all }) = cli.command {
            assert_eq!(action, Some(AuditAction::UpdateVariable));
            assert_eq!(limit, None);
            assert!(all);
        } else {
            panic!("Expected Audit command");
        }

        let cli = Cli::try_parse_from(["envkeep", "compare", "acme", "staging"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Compare { ref target_namespace, .. }) if target_namespace == "acme"
        ));

        assert!(Cli::try_parse_from(["envkeep", "export", "--format", "toml"]).is_err());
    }
}
