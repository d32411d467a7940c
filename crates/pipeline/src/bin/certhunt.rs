//! certhunt — match a certificate-transparency stream against Sigma rules.
//!
//! Reads newline-delimited certstream JSON from stdin or a file, evaluates
//! every loaded rule against each certificate update, and records matched
//! domains as attributes:
//! - appended to the attribute log
//! - published on the broadcast topic (`attributes` by default)
//! - suppressed for the dedup TTL once emitted

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

use certhunt_core::config::{self, BroadcastBackend, DedupBackend};
use certhunt_core::Config;
use certhunt_eisenbahn::{EventPublisher, NoopPublisher, RedisPublisher, Transport, ZmqPublisher};
use certhunt_pipeline::{
    AttributeEmitter, AttributeLog, DedupStore, JsonLinesSource, Matcher, MemoryDedupStore,
    Pipeline, RedisDedupStore, ShutdownTrigger, Sink,
};
use certhunt_rules::RuleLoader;

// ── CLI ─────────────────────────────────────────────────────────────

/// Certificate-transparency hunting with Sigma rules.
///
/// Flags override the environment only when given on the command line; the
/// environment itself is read through the profiled `Config`.
#[derive(Parser, Debug)]
#[command(name = "certhunt", version, about)]
struct Cli {
    /// Directory of Sigma rule YAML files (searched recursively).
    #[arg(long)]
    rules_dir: Option<PathBuf>,

    /// Certstream JSON lines input; `-` reads stdin.
    #[arg(long)]
    input: Option<String>,

    /// Append-only attribute log path.
    #[arg(long)]
    attribute_log: Option<PathBuf>,

    /// Number of rule-matching workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Load and validate the rules, print their titles, then exit.
    #[arg(long)]
    validate_only: bool,
}

impl Cli {
    fn apply(self, config: &mut Config) -> bool {
        if let Some(dir) = self.rules_dir {
            config.rules.dir = dir;
        }
        if let Some(input) = self.input {
            config.stream.input = input;
        }
        if let Some(path) = self.attribute_log {
            config.sink.attribute_log = path;
        }
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        self.validate_only
    }
}

// ── Backends ────────────────────────────────────────────────────────

async fn dedup_store(config: &Config) -> anyhow::Result<Arc<dyn DedupStore>> {
    match config.sink.dedup_backend {
        DedupBackend::Redis => {
            let store = RedisDedupStore::connect(&config.redis.url)
                .await
                .with_context(|| format!("connecting dedup store at {}", config.redis.redacted_url()))?;
            Ok(Arc::new(store))
        }
        DedupBackend::Memory => {
            warn!("in-memory dedup store: suppression does not survive restarts");
            Ok(Arc::new(MemoryDedupStore::new()))
        }
    }
}

async fn publisher(config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    match config.broadcast.backend {
        BroadcastBackend::Redis => {
            let publisher = RedisPublisher::connect(&config.redis.url)
                .await
                .with_context(|| format!("connecting publisher at {}", config.redis.redacted_url()))?;
            Ok(Arc::new(publisher))
        }
        BroadcastBackend::Zmq => {
            let transport: Transport = config.broadcast.zmq_endpoint.parse()?;
            let publisher = ZmqPublisher::bind(&transport)
                .await
                .with_context(|| format!("binding publisher on {transport}"))?;
            Ok(Arc::new(publisher))
        }
        BroadcastBackend::None => Ok(Arc::new(NoopPublisher)),
    }
}

// ── Signals ─────────────────────────────────────────────────────────

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
async fn os_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

fn shutdown_on_signal(trigger: ShutdownTrigger) {
    tokio::spawn(async move {
        match os_signal().await {
            Ok(()) => {
                info!("signal received, draining pipeline");
                trigger.trigger();
            }
            Err(e) => error!(error = %e, "failed to register signal handlers"),
        }
    });
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    config::load_dotenv();
    let cli = Cli::parse();
    let mut config = Config::from_env();
    let validate_only = cli.apply(&mut config);
    config.log_summary();

    let loader = RuleLoader::new(&config.rules.dir);
    let rules = loader
        .load()
        .with_context(|| format!("loading rules from {}", config.rules.dir.display()))?;
    info!(count = rules.len(), dir = %config.rules.dir.display(), "rules loaded");

    if validate_only {
        for title in rules.titles() {
            println!("{title}");
        }
        return Ok(());
    }

    let store = dedup_store(&config).await?;
    let publisher = publisher(&config).await?;
    let log = AttributeLog::open(&config.sink.attribute_log)
        .await
        .with_context(|| format!("opening attribute log {}", config.sink.attribute_log.display()))?;

    let matcher = Matcher::new(
        rules,
        AttributeEmitter::new(config.sink.parent_event.clone()),
        config.rules.emit_field.clone(),
        config.rules.emit_mode,
    );
    let sink = Sink::new(
        log,
        publisher,
        store,
        config.broadcast.topic.clone(),
        config.sink.dedup_ttl(),
    );
    let source = Box::new(JsonLinesSource::from_arg(&config.stream.input));

    let handle = Pipeline::new(source, matcher, sink).configure(&config).spawn();
    shutdown_on_signal(handle.shutdown_trigger());

    let stats = handle.join().await?;
    info!(
        events = stats.events_seen,
        written = stats.attributes_written,
        suppressed = stats.attributes_suppressed,
        "certhunt exited cleanly"
    );
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn unset_flags_keep_profiled_config() {
        env::set_var("CLITEST_RULES_DIR", "/srv/profiled");
        env::set_var("RULES_DIR", "/srv/plain");
        let mut config = Config::for_profile("clitest");

        let cli = Cli::parse_from(["certhunt"]);
        assert!(!cli.apply(&mut config));
        assert_eq!(config.rules.dir, PathBuf::from("/srv/profiled"));

        env::remove_var("CLITEST_RULES_DIR");
        env::remove_var("RULES_DIR");
    }

    #[test]
    fn command_line_flags_override_config() {
        let mut config = Config::for_profile("clitest_flags");
        let cli = Cli::parse_from([
            "certhunt",
            "--rules-dir",
            "/srv/cli",
            "--workers",
            "8",
            "--validate-only",
        ]);
        assert!(cli.apply(&mut config));
        assert_eq!(config.rules.dir, PathBuf::from("/srv/cli"));
        assert_eq!(config.pipeline.workers, 8);
    }
}
