// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! canopy-watch
//!
//! Mirrors an orchestrator's service tree. By default it polls `/services`
//! on the configured interval and logs what each delta changed; `once` prints
//! the tree after a single full sync; `start`/`stop`/`restart` send a
//! run-state command.
//!
//! Settings come from `watch.json` in the user config dir (written with
//! defaults on first run) and can be overridden per invocation.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use canopy_config::{ConfigService, FsConfigStore, WatchSettings};
use canopy_tree::{
    CycleOutcome, CycleReport, HealthAggregator, HttpTransport, NoHealth, PollRegistry,
    ServiceCommand, SyncEngine, Transport, TreeStore,
};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SERVICES_POLL: &str = "services";

#[derive(Parser, Debug)]
#[command(author, version, about = "Live mirror of an orchestrator's service tree")]
struct Args {
    /// Base URL of the service API (e.g. http://localhost:8080)
    #[arg(long)]
    base_url: Option<String>,
    /// Milliseconds between polls
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Milliseconds added to every delta window
    #[arg(long)]
    margin_ms: Option<u64>,
    /// Per-request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Read and write settings here instead of the user config dir
    #[arg(long)]
    config_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll until interrupted (default)
    Watch,
    /// Sync once and print the tree
    Once,
    /// Start a service
    Start(Target),
    /// Stop a service
    Stop(Target),
    /// Restart a service
    Restart(Target),
}

#[derive(clap::Args, Debug)]
struct Target {
    /// Service id, or a service name when no id matches
    service: String,
    /// Leave child services alone
    #[arg(long)]
    skip_children: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let settings = resolve_settings(&args)?;
    info!(base_url = %settings.base_url, "canopy-watch starting");

    let transport = HttpTransport::new(settings.base_url.clone(), settings.request_timeout())
        .context("build http client")?;
    let mut engine = SyncEngine::with_margin(transport, NoHealth, settings.safety_margin());

    match args.command.unwrap_or(Command::Watch) {
        Command::Watch => watch(engine, &settings).await,
        Command::Once => {
            let report = engine.update().await.context("sync services")?;
            log_cycle(&report, engine.store());
            log_tree(engine.store());
            log_endpoints(engine.store_mut());
            Ok(())
        }
        Command::Start(target) => send(&mut engine, ServiceCommand::Start, target).await,
        Command::Stop(target) => send(&mut engine, ServiceCommand::Stop, target).await,
        Command::Restart(target) => send(&mut engine, ServiceCommand::Restart, target).await,
    }
}

/// Stored settings (or defaults), persisted on first run, then CLI overrides.
fn resolve_settings(args: &Args) -> Result<WatchSettings> {
    let store = match &args.config_dir {
        Some(dir) => FsConfigStore::at(dir),
        None => FsConfigStore::new(),
    };
    let mut settings = match store {
        Ok(store) => {
            let config = ConfigService::new(store);
            let settings = config.load_watch().unwrap_or_else(|err| {
                warn!(%err, "stored settings unusable, using defaults");
                WatchSettings::default()
            });
            match config.save_watch_if_absent(&settings) {
                Ok(true) => info!(dir = %config.store().base().display(), "wrote default settings"),
                Ok(false) => {}
                Err(err) => warn!(%err, "could not persist settings"),
            }
            settings
        }
        Err(err) => {
            warn!(%err, "no config dir, using defaults");
            WatchSettings::default()
        }
    };

    if let Some(url) = &args.base_url {
        settings.base_url.clone_from(url);
    }
    if let Some(ms) = args.interval_ms {
        settings.poll_interval_ms = ms;
    }
    if let Some(ms) = args.margin_ms {
        settings.safety_margin_ms = ms;
    }
    if let Some(ms) = args.timeout_ms {
        settings.request_timeout_ms = ms;
    }
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

async fn watch(engine: SyncEngine<HttpTransport, NoHealth>, settings: &WatchSettings) -> Result<()> {
    let engine = Arc::new(Mutex::new(engine));
    let mut polls = PollRegistry::new();
    let shared = Arc::clone(&engine);
    polls.register(SERVICES_POLL, settings.poll_interval(), move || {
        let engine = Arc::clone(&shared);
        async move {
            let mut engine = engine.lock().await;
            match engine.update().await {
                Ok(report) => log_cycle(&report, engine.store()),
                Err(err) => warn!(%err, "sync failed"),
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("install ctrl-c handler")?;
    polls.cancel_all();
    let summary = engine.lock().await.store().summary();
    info!(services = summary.services, "canopy-watch stopped");
    Ok(())
}

async fn send<T, H>(
    engine: &mut SyncEngine<T, H>,
    command: ServiceCommand,
    target: Target,
) -> Result<()>
where
    T: Transport,
    H: HealthAggregator,
{
    engine.update().await.context("sync services")?;
    let id = match engine.store().get(&target.service) {
        Some(node) => node.id().to_owned(),
        None => engine
            .store()
            .find_by_name(&target.service)
            .map(|node| node.id().to_owned())
            .with_context(|| format!("no service named {}", target.service))?,
    };
    engine
        .command(&id, command, target.skip_children)
        .await
        .with_context(|| format!("{} {id}", command.action()))?;
    info!(service = %id, action = command.action(), "command sent");
    Ok(())
}

fn log_cycle(report: &CycleReport, store: &TreeStore) {
    let summary = store.summary();
    match &report.outcome {
        CycleOutcome::Applied { delta, removed } => info!(
            since_ms = report.ticket.since_ms,
            created = delta.created,
            updated = delta.updated,
            reparented = delta.reparented,
            skipped = delta.skipped,
            removed = removed.len(),
            services = summary.services,
            orphans = summary.orphans,
            "synced"
        ),
        CycleOutcome::Stale => warn!(seq = report.ticket.seq, "stale response dropped"),
    }
}

fn log_tree(store: &TreeStore) {
    for node in store.walk() {
        info!(
            "{:indent$}{} [{}] {:?}",
            "",
            node.name(),
            node.id(),
            node.desired_state(),
            indent = node.depth() * 2
        );
    }
    for id in store.orphan_ids() {
        if let Some(node) = store.get(id) {
            let parent = node.snapshot().parent_id().unwrap_or_default();
            warn!(service = %id, name = node.name(), %parent, "orphan");
        }
    }
}

/// Addresses and virtual hosts under every root.
fn log_endpoints(store: &mut TreeStore) {
    for id in store.root_ids().to_vec() {
        if let Some(addresses) = store.addresses(&id) {
            for address in addresses.iter() {
                info!(
                    service = %address.service_name,
                    endpoint = %address.endpoint_name,
                    ip = %address.ip_addr,
                    port = address.port,
                    "address"
                );
            }
        }
        if let Some(hosts) = store.hosts(&id) {
            for host in hosts.iter() {
                info!(vhost = %host.name, target = %host.value, "virtual host");
            }
        }
    }
}
