//! kvbridge CLI
//!
//! Hosts one engine per process against a redb (or in-memory) backend and
//! runs a single command against it. The session store lives only as long
//! as the process, so every run starts from the durable snapshot.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use kvbridge_common::BridgeConfig;
use kvbridge_common::config::BackendKind;
use kvbridge_engine::{BridgedStorage, LoadOutcome, StorageMethod, StorageOptions, StorageRecord};
use kvbridge_store::{BackendConnector, MemoryConnector, MemorySessionStore, RedbConnector};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "kvbridge")]
#[command(about = "Synchronous key-value store over a durable backend")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "KVBRIDGE_CONFIG", default_value = "kvbridge.toml")]
    config: PathBuf,

    /// Directory holding backend files
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Backend implementation
    #[arg(long, value_parser = parse_backend)]
    backend: Option<BackendKind>,

    /// Backend (database) name
    #[arg(long)]
    name: Option<String>,

    /// Partition within the backend
    #[arg(long)]
    partition: Option<String>,

    /// Log level
    #[arg(long, env = "KVBRIDGE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the value stored under KEY
    Get { key: String },
    /// Store VALUE under KEY
    Set { key: String, value: String },
    /// Remove KEY
    Remove { key: String },
    /// Remove every entry
    Clear,
    /// List keys in insertion order
    Keys,
    /// Print the number of entries
    Len,
    /// Print every entry as a JSON object
    Dump,
    /// Store every entry of a JSON object file
    Import { file: PathBuf },
}

fn parse_backend(s: &str) -> std::result::Result<BackendKind, String> {
    match s {
        "redb" => Ok(BackendKind::Redb),
        "memory" => Ok(BackendKind::Memory),
        other => Err(format!("unknown backend \"{other}\" (expected redb or memory)")),
    }
}

/// Command line flags take precedence over the file
fn apply_overrides(config: &mut BridgeConfig, args: &Args) {
    if let Some(dir) = &args.data_dir {
        config.storage.data_dir = dir.clone();
    }
    if let Some(backend) = args.backend {
        config.storage.backend = backend;
    }
    if let Some(name) = &args.name {
        config.storage.name = name.clone();
    }
    if let Some(partition) = &args.partition {
        config.storage.partition = partition.clone();
    }
    if let Some(level) = &args.log_level {
        config.logging.level = level.clone();
    }
}

/// Entries of a JSON object file; non-string values are stored as JSON text
fn read_import(path: &Path) -> Result<Vec<(String, String)>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let object: IndexMap<String, Value> = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a JSON object", path.display()))?;
    Ok(object
        .into_iter()
        .map(|(k, v)| match v {
            Value::String(s) => (k, s),
            other => (k, other.to_string()),
        })
        .collect())
}

async fn run(record: &StorageRecord, command: Commands) -> Result<()> {
    let storage = record.storage();
    match command {
        Commands::Get { key } => match record.invoke(StorageMethod::GetItem, &[key.as_str()])? {
            Some(value) => println!("{value}"),
            None => bail!("key \"{key}\" not found"),
        },
        Commands::Set { key, value } => {
            record.invoke(StorageMethod::SetItem, &[key.as_str(), value.as_str()])?;
        }
        Commands::Remove { key } => {
            record.invoke(StorageMethod::RemoveItem, &[key.as_str()])?;
        }
        Commands::Clear => {
            record.invoke(StorageMethod::Clear, &[])?;
        }
        Commands::Keys => {
            for key in storage.keys() {
                println!("{key}");
            }
        }
        Commands::Len => println!("{}", storage.len()),
        Commands::Dump => println!("{}", serde_json::to_string_pretty(&storage.entries())?),
        Commands::Import { file } => {
            let entries = read_import(&file)?;
            let count = entries.len();
            for (key, value) in entries {
                storage.set_item(key, value);
            }
            info!("Imported {} entries from {}", count, file.display());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = BridgeConfig::load(&args.config)?;
    apply_overrides(&mut config, &args);

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let connector: Arc<dyn BackendConnector> = match config.storage.backend {
        BackendKind::Redb => Arc::new(RedbConnector::new(&config.storage.data_dir)),
        BackendKind::Memory => Arc::new(MemoryConnector::new()),
    };
    let storage = BridgedStorage::open(
        config.storage.name.clone(),
        connector,
        Arc::new(MemorySessionStore::new()),
        StorageOptions::from(&config),
    );
    let record = StorageRecord::new(storage.clone());
    let command = args.command;

    let result = tokio::select! {
        result = async {
            if storage.wait_ready().await == LoadOutcome::Degraded {
                bail!("backend \"{}\" is unavailable", config.storage.name);
            }
            run(&record, command).await
        } => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, flushing queued writes");
            Ok(())
        }
    };

    storage.flush_and_close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "kvbridge",
            "--backend",
            "memory",
            "--partition",
            "panel",
            "get",
            "k",
        ]);
        let mut config = BridgeConfig::default();
        apply_overrides(&mut config, &args);

        assert_eq!(config.storage.backend, BackendKind::Memory);
        assert_eq!(config.storage.partition, "panel");
        assert_eq!(config.storage.name, "kvbridge");
        assert!(matches!(args.command, Commands::Get { ref key } if key == "k"));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(Args::try_parse_from(["kvbridge", "--backend", "sqlite", "len"]).is_err());
    }

    #[test]
    fn test_read_import_keeps_order_and_coerces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, r#"{"z": "1", "a": 2, "flag": false}"#).unwrap();

        let entries = read_import(&path).unwrap();
        assert_eq!(
            entries,
            vec![
                ("z".to_string(), "1".to_string()),
                ("a".to_string(), "2".to_string()),
                ("flag".to_string(), "false".to_string()),
            ]
        );
    }

    #[test]
    fn test_read_import_rejects_non_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();
        assert!(read_import(&path).is_err());
    }

    #[tokio::test]
    async fn test_commands_round_trip_through_redb() {
        let dir = tempdir().unwrap();
        let connector: Arc<dyn BackendConnector> = Arc::new(RedbConnector::new(dir.path()));

        let open = || {
            BridgedStorage::open(
                "cli",
                connector.clone(),
                Arc::new(MemorySessionStore::new()),
                StorageOptions::default(),
            )
        };

        let storage = open();
        storage.wait_ready().await;
        let record = StorageRecord::new(storage.clone());
        run(&record, Commands::Set { key: "k".into(), value: "v".into() })
            .await
            .unwrap();
        storage.flush_and_close().await;

        let storage = open();
        storage.wait_ready().await;
        let record = StorageRecord::new(storage.clone());
        run(&record, Commands::Get { key: "k".into() }).await.unwrap();
        assert!(run(&record, Commands::Get { key: "missing".into() }).await.is_err());
        storage.flush_and_close().await;
    }
}
