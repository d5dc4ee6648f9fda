//! `mozo-replay`: run a transport trace through a reconciliation engine.
//!
//! Reads a JSON-lines trace of push messages, realtime writes and roster
//! attachments, replays it against an in-memory realtime database and prints
//! the reconciled store as JSON.
//!
//! # Usage
//!
//! ```
//! mozo-replay trace.jsonl
//! mozo-replay --kind staff-request --config mozo.toml trace.jsonl
//! ```
//!
//! Paths can be overridden in the config file or with `MOZO_`-prefixed
//! environment variables (e.g. `MOZO_ROSTER_PATH=businesses/{subject}`).

mod trace;

use std::{
  io,
  path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use mozo_core::kind::{Call, EntityKind, StaffRequest};
use mozo_realtime_memory::MemoryDatabase;
use mozo_reconcile::{EngineConfig, ReconciliationEngine};
use serde_json::json;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
  Call,
  StaffRequest,
}

#[derive(Parser)]
#[command(author, version, about = "Replay a Mozo transport trace")]
struct Cli {
  /// JSON-lines trace file.
  trace: PathBuf,

  /// Which entities the trace describes.
  #[arg(short, long, value_enum, default_value_t = Kind::Call)]
  kind: Kind,

  /// Path to an optional TOML configuration file.
  #[arg(short, long, default_value = "mozo.toml")]
  config: PathBuf,
}

fn main() -> anyhow::Result<()> {
  // Logs go to stderr so stdout stays valid JSON.
  tracing_subscriber::fmt()
    .with_writer(io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  match cli.kind {
    Kind::Call => replay::<Call>(&cli),
    Kind::StaffRequest => replay::<StaffRequest>(&cli),
  }
}

/// Layer the kind's defaults, the config file and the environment.
fn load_config<K: EntityKind>(path: &Path) -> anyhow::Result<EngineConfig> {
  let defaults = EngineConfig::for_kind::<K>();
  let mut builder = config::Config::builder()
    .set_default("roster_path", defaults.roster_path)?
    .set_default("stats_field", defaults.stats_field)?
    .set_default("change_buffer", defaults.change_buffer as i64)?;
  for (key, value) in [
    ("entity_path", defaults.entity_path),
    ("roster_ids_field", defaults.roster_ids_field),
    ("feed_path", defaults.feed_path),
  ] {
    if let Some(value) = value {
      builder = builder.set_default(key, value)?;
    }
  }

  let settings = builder
    .add_source(config::File::from(path).required(false))
    .add_source(config::Environment::with_prefix("MOZO"))
    .build()
    .context("failed to read config file")?;

  settings
    .try_deserialize()
    .context("failed to deserialise EngineConfig")
}

fn replay<K: EntityKind>(cli: &Cli) -> anyhow::Result<()> {
  let config = load_config::<K>(&cli.config)?;
  tracing::info!(
    kind = K::NAME,
    entity_path = config.entity_path.as_deref(),
    roster_path = %config.roster_path,
    feed_path = config.feed_path.as_deref(),
    "replaying {}",
    cli.trace.display()
  );

  let raw = std::fs::read_to_string(&cli.trace)
    .with_context(|| format!("reading trace {}", cli.trace.display()))?;
  let steps = trace::parse(&raw)?;

  let db = MemoryDatabase::new();
  let mut engine: ReconciliationEngine<K, _> =
    ReconciliationEngine::new(db.clone(), config);
  for step in steps {
    trace::apply(&mut engine, &db, step)?;
  }

  let report = json!({
    "kind": K::NAME,
    "entities": engine.store().list_recent(),
    "active": engine.store().active().count(),
    "stats": engine.stats(),
    "subscribed": engine.subscribed(),
  });
  engine.shutdown();

  serde_json::to_writer_pretty(io::stdout().lock(), &report)
    .context("writing report")?;
  println!();
  Ok(())
}
