//! OpenFlow overlay renderer entry point.
//!
//! Loads the renderer configuration and a startup snapshot, then runs the
//! reconciliation daemon against an in-memory device-state store.

use anyhow::Context;
use clap::Parser;
use log::{error, info, warn};
use ofoverlay_renderer::audit::{self, AuditCategory, AuditOutcome, AuditRecord};
use ofoverlay_renderer::audit_log;
use ofoverlay_renderer::config::{RendererConfig, Snapshot};
use ofoverlay_renderer::policy::OrdinalTable;
use ofoverlay_renderer::{
    EndpointRegistry, InMemoryDeviceStore, RendererContext, RendererDaemon, RendererDaemonConfig,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// OpenFlow overlay renderer
#[derive(Parser, Debug)]
#[command(name = "ofoverlay-renderer")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Renderer configuration file (YAML, or JSON by extension)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Startup snapshot with endpoints, policy and tunnels
    #[arg(short = 's', long)]
    snapshot: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Emit logs and audit records as JSON
    #[arg(long)]
    json_logs: bool,

    /// Reconcile every device once, print the programmed state and exit
    #[arg(long)]
    once: bool,

    /// Override the reconciliation interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,
}

fn build_context(config: RendererConfig, snapshot: Snapshot) -> (RendererContext, Arc<InMemoryDeviceStore>) {
    let ordinals = Arc::new(OrdinalTable::new());
    for (device, ordinal) in snapshot.device_ordinals {
        ordinals.assign_device(device, ordinal);
    }

    let store = Arc::new(InMemoryDeviceStore::new());
    let ctx = RendererContext {
        config: Arc::new(config),
        registry: Arc::new(EndpointRegistry::new()),
        ordinals,
        policy: Arc::new(snapshot.policy),
        tunnels: Arc::new(snapshot.tunnels),
        store: store.clone(),
    };
    (ctx, store)
}

/// Loads the configuration and applies command-line overrides before
/// validating the result.
fn resolve_config(args: &Args) -> anyhow::Result<RendererConfig> {
    let mut config = match &args.config {
        Some(path) => RendererConfig::from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => RendererConfig::default(),
    };
    if let Some(interval) = args.interval_ms {
        config.sync_interval_ms = interval;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = resolve_config(&args)?;
    let mut snapshot = match &args.snapshot {
        Some(path) => Snapshot::load(path)
            .with_context(|| format!("loading snapshot {}", path.display()))?,
        None => Snapshot::default(),
    };

    info!("Tables: {:?}", config.tables);
    info!("Router MAC: {}", config.router_mac);
    info!("Sync interval: {}ms", config.sync_interval_ms);
    info!("Store timeout: {}ms", config.store_timeout_ms);

    audit_log!(AuditRecord::new(
        AuditCategory::ConfigurationChange,
        "main",
        "configuration_loaded"
    )
    .with_outcome(AuditOutcome::Success)
    .with_details(serde_json::json!({
        "config": args.config.as_ref().map(|p| p.display().to_string()),
        "snapshot": args.snapshot.as_ref().map(|p| p.display().to_string()),
        "endpoints": snapshot.endpoints.len(),
    })));

    let endpoints = std::mem::take(&mut snapshot.endpoints);
    let daemon_config = RendererDaemonConfig::from(&config);
    let (ctx, store) = build_context(config, snapshot);
    let daemon = Arc::new(RendererDaemon::with_default_tables(ctx.clone(), daemon_config));

    for record in &endpoints {
        ctx.registry.upsert(None, Some(record));
    }
    info!(
        "Loaded {} endpoints on {} devices",
        ctx.registry.len(),
        ctx.registry.devices().len()
    );

    if args.once {
        let reports = daemon.reconcile_all().await;
        let failed = reports.iter().filter(|r| r.status.is_failure()).count();
        println!("{}", serde_json::to_string_pretty(&store.snapshot().await)?);
        if failed > 0 {
            anyhow::bail!("{} table passes failed", failed);
        }
        return Ok(());
    }

    let daemon_clone = Arc::clone(&daemon);
    let shutdown_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received SIGINT, shutting down gracefully...");
                daemon_clone.stop();
            }
            Err(err) => {
                error!("Failed to listen for ctrl-c: {}", err);
            }
        }
    });

    daemon.run().await;
    shutdown_handle.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.json_logs {
        audit::init_logging(&args.log_level);
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
            .init();
    }

    info!("====================================================================");
    info!("Starting OpenFlow overlay renderer");
    info!("====================================================================");

    if let Err(e) = run(args).await {
        error!("Renderer failed: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!("====================================================================");
    info!("OpenFlow overlay renderer shutdown complete");
    info!("====================================================================");

    ExitCode::SUCCESS
}
