//! # domstatsd
//!
//! Metrics aggregation daemon for a virtualization host.
//!
//! Plugins publish datasource payloads either as files under the plugin
//! directory or through pages granted from another domain. Every cycle
//! the daemon polls all registered plugins, folds the samples into
//! in-memory RRDs for the host and each resident guest, and
//! periodically archives the whole table to disk. On shutdown the host
//! RRD is additionally shipped to the pool master so history survives
//! the restart.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use domstats::config::{ConfigError, ConfigLoader, DaemonConfig, LogConfig};
use domstats::consts::{DEFAULT_CONFIG_PATH, HOST_RRD_ID};
use domstatsd::context::DaemonContext;
use domstatsd::sync::{self, BackupPolicy, HttpTransport};

/// domstatsd: virtualization host metrics aggregation daemon
#[derive(Parser, Debug)]
#[command(name = "domstatsd")]
#[command(version)]
#[command(about = "Aggregates plugin-published metrics into per-host and per-guest RRDs")]
struct Args {
    /// Path to the daemon configuration TOML.
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();

    let (config, defaulted) = match DaemonConfig::load(&args.config) {
        Ok(config) => (config, false),
        Err(ConfigError::FileNotFound) => (DaemonConfig::default(), true),
        Err(e) => {
            eprintln!("domstatsd: cannot load {}: {e}", args.config.display());
            process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("domstatsd: {e}");
        process::exit(1);
    }

    setup_tracing(&args, &config.log);

    info!("domstatsd v{} starting...", env!("CARGO_PKG_VERSION"));
    if defaulted {
        warn!(
            path = %args.config.display(),
            "no config file, running on built-in defaults"
        );
    }

    if let Err(e) = run(config) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("domstatsd shutdown complete");
}

fn run(config: DaemonConfig) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Arc::new(DaemonContext::new(config));
    let transport = HttpTransport::new()?;

    info!(
        rrd_root = %ctx.config.paths.rrd_root.display(),
        plugin_dir = %ctx.config.paths.plugin_dir.display(),
        cycle_seconds = ctx.config.sampling.cycle_seconds,
        is_master = ctx.config.pool.is_master,
        "config OK"
    );

    // Recover the host RRD the previous run archived, or pull it from
    // the master when this host is a pool member.
    if let Some(info) = sync::load_rrd(
        &transport,
        &ctx.config.pool,
        &ctx.config.paths.rrd_root,
        HOST_RRD_ID,
    ) {
        info!("recovered host RRD from archive");
        ctx.store.set_host(Some(info));
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    // Periodic backup runs on its own thread; sampling stays on this one
    // so a slow disk never delays a cycle.
    let backup_ctx = Arc::clone(&ctx);
    let backup_running = Arc::clone(&running);
    let backup_thread = thread::spawn(move || backup_loop(&backup_ctx, &backup_running));

    sampling_loop(&ctx, &running);

    if backup_thread.join().is_err() {
        error!("backup thread panicked");
    }

    // Final flush: archive everything locally, then ship the host RRD to
    // the master when we have one.
    sync::backup_all(
        &ctx.store,
        &ctx.config.paths.rrd_root,
        BackupPolicy::default(),
    );
    if let Some(master) = ctx.config.pool.master_address.as_deref() {
        sync::archive_host_rrd(&ctx.store, &transport, master, None, HOST_RRD_ID);
    }

    Ok(())
}

/// Poll, fold, mark the cycle boundary; repeat until shutdown.
fn sampling_loop(ctx: &DaemonContext, running: &AtomicBool) {
    let cycle = Duration::from_secs_f64(ctx.config.sampling.cycle_seconds);
    while running.load(Ordering::SeqCst) {
        ctx.sample_once(unix_now());
        interruptible_sleep(cycle, running);
    }
}

/// Archive the store to disk on the configured interval.
fn backup_loop(ctx: &DaemonContext, running: &AtomicBool) {
    let interval = Duration::from_secs(ctx.config.sampling.backup_interval_seconds);
    loop {
        interruptible_sleep(interval, running);
        if !running.load(Ordering::SeqCst) {
            // The shutdown path takes the final backup.
            return;
        }
        sync::backup_all(
            &ctx.store,
            &ctx.config.paths.rrd_root,
            BackupPolicy::default(),
        );
    }
}

/// Sleep in short slices so a shutdown request is honored promptly.
fn interruptible_sleep(total: Duration, running: &AtomicBool) {
    let slice = Duration::from_millis(250);
    let mut remaining = total;
    while !remaining.is_zero() && running.load(Ordering::SeqCst) {
        let step = remaining.min(slice);
        thread::sleep(step);
        remaining -= step;
    }
}

/// Seconds since the epoch, used as the sample timestamp for a cycle.
fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Setup tracing subscriber from CLI arguments and the log table.
/// `--verbose` wins over the configured level.
fn setup_tracing(args: &Args, log: &LogConfig) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        log.level.as_level()
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json || log.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
