//! # reveille-diag
//!
//! Prints the health snapshot, pending actions and sync cursors of a
//! device's queue.
//!
//! ```text
//! reveille-diag [--db PATH] [--config PATH] [--kind KIND] [--clear]
//!
//!   --db PATH       SQLite file (default: platform data dir / reveille.db)
//!   --config PATH   engine.toml to load (default: platform config dir)
//!   --kind KIND     only list actions and cursors of this entity kind
//!   --clear         drop every queued action and cursor first
//! ```
//!
//! The engine is built offline with an unreachable remote, so nothing is
//! ever submitted from here.

use reveille_core::{HealthSnapshot, QueuedAction, SyncCursor};
use reveille_sync::{EngineConfig, SyncEngineBuilder, UnreachableRemote};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: reveille-diag [--db PATH] [--config PATH] [--kind KIND] [--clear]";

#[derive(Debug, Default, PartialEq)]
struct Args {
    db: Option<PathBuf>,
    config: Option<PathBuf>,
    kind: Option<String>,
    clear: bool,
}

fn parse_args<I>(args: I) -> Result<Args, String>
where
    I: IntoIterator<Item = String>,
{
    let mut parsed = Args::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| args.next().ok_or_else(|| format!("{} needs a value", flag));
        match arg.as_str() {
            "--db" => parsed.db = Some(PathBuf::from(value("--db")?)),
            "--config" => parsed.config = Some(PathBuf::from(value("--config")?)),
            "--kind" => parsed.kind = Some(value("--kind")?),
            "--clear" => parsed.clear = true,
            other => return Err(format!("unknown argument: {}", other)),
        }
    }

    Ok(parsed)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    health: HealthSnapshot,
    pending: Vec<QueuedAction>,
    cursors: Vec<SyncCursor>,
}

/// Logs go to stderr so stdout stays valid JSON.
///
/// - `RUST_LOG=debug` for per-action detail
/// - Default: INFO for reveille crates, WARN for sqlx
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}\n{}", message, USAGE);
            std::process::exit(2);
        }
    };

    init_tracing();

    let mut config = match args.config {
        Some(path) => EngineConfig::load(Some(path))?,
        None => EngineConfig::load_or_default(None),
    };
    config.network.start_online = false;
    if let Some(db) = args.db {
        config.storage.database_path = Some(db);
    }

    info!(database = ?config.database_path(), "Opening action queue");

    let engine = SyncEngineBuilder::new(config)
        .with_remote(Arc::new(UnreachableRemote))
        .build()
        .await?;

    if args.clear {
        let removed = engine.clear_queue().await;
        info!(removed, "Queue cleared");
    }

    let report = Report {
        health: engine.get_health_snapshot().await,
        pending: engine.get_pending_actions(args.kind.as_deref()).await?,
        cursors: engine.get_sync_cursors(args.kind.as_deref()).await?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, String> {
        parse_args(args.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_defaults() {
        assert_eq!(parse(&[]).unwrap(), Args::default());
    }

    #[test]
    fn test_parse_all_flags() {
        let args = parse(&["--db", "/tmp/q.db", "--kind", "battle", "--clear"]).unwrap();
        assert_eq!(args.db, Some(PathBuf::from("/tmp/q.db")));
        assert_eq!(args.kind.as_deref(), Some("battle"));
        assert!(args.clear);
        assert!(args.config.is_none());
    }

    #[test]
    fn test_parse_rejects_missing_value_and_unknown_flag() {
        assert!(parse(&["--db"]).is_err());
        assert!(parse(&["--verbose"]).is_err());
    }
}
