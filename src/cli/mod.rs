//! Command-line interface. The bare invocation runs the daemon; read-only
//! subcommands open their own store handles.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};

use crate::config::{self, Config};
use crate::event::Tier;
use crate::pipeline;
use crate::reporter::{self, NtfyReporter};
use crate::store::{EventFilter, Store};
use crate::{logging, format};

#[derive(Parser, Debug)]
#[command(name = "logtriage", about = "Watches system logs for failures and reports root causes")]
pub struct Cli {
    /// Path to the config file (default: ~/.config/logtriage/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print stored events
    Query(QueryArgs),
    /// Build an aggregated digest, optionally sending it to ntfy
    Digest(DigestArgs),
    /// Show configuration and event store status
    Status,
    /// Send a test notification and exit
    TestNtfy,
    /// Print version and exit
    Version,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Look-back window, e.g. "24h" or "7d"
    #[arg(long, default_value = "7d")]
    pub last: String,

    /// Restrict to one tier (T1..T5)
    #[arg(long)]
    pub tier: Option<String>,

    /// Restrict to one instance id
    #[arg(long)]
    pub instance: Option<String>,

    /// Maximum number of events to print
    #[arg(long, default_value_t = 50)]
    pub limit: u32,
}

#[derive(Args, Debug)]
pub struct DigestArgs {
    /// Aggregation window, e.g. "7d"
    #[arg(long, default_value = "7d")]
    pub last: String,

    /// Send the digest to the configured topic instead of only printing it
    #[arg(long)]
    pub send: bool,
}

/// Entry point used by main; exit code 1 on any returned error.
pub fn process_cli() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Command::Version)) {
        println!("logtriage {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(cli.config.as_deref())?;
    logging::init(&config.log.level);

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;

    match cli.command {
        None => runtime.block_on(pipeline::run(config)),
        Some(Command::Query(args)) => run_query(&config, &args),
        Some(Command::Digest(args)) => runtime.block_on(run_digest(&config, &args)),
        Some(Command::Status) => run_status(&config),
        Some(Command::TestNtfy) => runtime.block_on(run_test_ntfy(&config)),
        Some(Command::Version) => unreachable!("handled before config load"),
    }
}

fn open_store(config: &Config) -> Result<Store> {
    let path = config.db.resolved_path()?;
    Store::open(&path).with_context(|| format!("opening event store {}", path.display()))
}

fn run_query(config: &Config, args: &QueryArgs) -> Result<()> {
    let last = config::parse_duration(&args.last)
        .with_context(|| format!("invalid --last value {:?}", args.last))?;
    let tier = args
        .tier
        .as_deref()
        .map(Tier::from_str)
        .transpose()
        .context("invalid --tier value")?;

    let store = open_store(config)?;
    let events = store.query(&EventFilter {
        since: Some(Utc::now() - last),
        until: None,
        tier,
        instance_id: args.instance.clone(),
        limit: Some(args.limit),
    })?;

    if events.is_empty() {
        println!("No events in the last {}.", args.last);
        return Ok(());
    }

    for ev in &events {
        let subject = if !ev.unit.is_empty() {
            &ev.unit
        } else {
            &ev.process
        };
        println!(
            "{}  {:3} {:8} {}  {}",
            ev.timestamp.format("%Y-%m-%d %H:%M:%S"),
            ev.tier.as_str(),
            ev.severity.as_str(),
            ev.summary,
            subject,
        );
    }
    println!("\n{} event(s).", events.len());
    Ok(())
}

async fn run_digest(config: &Config, args: &DigestArgs) -> Result<()> {
    let last = config::parse_duration(&args.last)
        .with_context(|| format!("invalid --last value {:?}", args.last))?;
    let until = Utc::now();
    let since = until - last;

    let store = open_store(config)?;
    let events = store.query(&EventFilter {
        since: Some(since),
        until: Some(until),
        ..EventFilter::default()
    })?;

    let digest = reporter::build_digest(&config.instance.id, &events, since, until);
    let body = reporter::format_digest(&digest);
    print!("{body}");

    if args.send {
        let title = reporter::format_digest_title(since, until);
        NtfyReporter::new(config.clone())
            .send_digest(&title, &body)
            .await?;
        println!("\nDigest sent.");
    }
    Ok(())
}

fn run_status(config: &Config) -> Result<()> {
    let db_path = config.db.resolved_path()?;
    let store = open_store(config)?;

    println!("Instance:     {} ({})", config.instance.id, config.instance.role);
    println!("Config file:  {}", config::default_config_path().display());
    println!("Database:     {}", db_path.display());
    if let Ok(meta) = std::fs::metadata(&db_path) {
        println!("DB size:      {}", format::bytes(meta.len() as i64));
    }
    println!("Events:       {}", store.count()?);
    println!(
        "Ntfy:         {}",
        if config.ntfy.url.is_empty() {
            "not configured"
        } else {
            &config.ntfy.url
        }
    );
    println!("Alert tiers:  {}", config.ntfy.alert_tiers.join(", "));
    println!(
        "Monitors:     psi={} smart={} gpu={}",
        config.psi.enabled, config.smart.enabled, config.gpu.enabled
    );
    Ok(())
}

async fn run_test_ntfy(config: &Config) -> Result<()> {
    if config.ntfy.url.is_empty() {
        bail!("ntfy.url not configured");
    }

    let reporter = NtfyReporter::new(config.clone());
    reporter.report(&reporter::test_event(&config.instance.id)).await?;
    println!("Test notification sent successfully.");
    Ok(())
}
