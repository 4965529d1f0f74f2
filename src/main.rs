use clap::Parser;
use env_logger::Env;
use log::info;
use std::time::Duration;

use hazard_scan::balance::balance_document;
use hazard_scan::classify::{parse_hex_color, MarkerSpec};
use hazard_scan::cli::{Args, BalanceArgs, Command, ScanArgs};
use hazard_scan::io::{read_feature_document, write_feature_document};
use hazard_scan::wms::{WmsClient, WmsConfig};
use hazard_scan::{BatchOrchestrator, Result, ScanConfig};

fn scan(args: ScanArgs) -> Result<()> {
    let marker = MarkerSpec::new(parse_hex_color(&args.marker_color)?, args.tolerance)?;
    let mut config = ScanConfig {
        tile_size: args.tile_size,
        marker,
        dispatch_interval: Duration::from_millis(args.interval_ms),
        burst: args.burst,
        max_retries: args.retries,
        retry_backoff: Duration::from_millis(args.retry_backoff_ms),
        progress_every: args.progress_every,
        ..ScanConfig::default()
    };
    if let Some(workers) = args.workers {
        config.workers = workers;
    }

    let mut wms = WmsConfig::new(args.wms_url, args.layer, args.style);
    wms.timeout = Duration::from_secs(args.timeout_secs);
    info!("WMS endpoint: {} (layer {})", wms.base_url, wms.layer);

    let orchestrator = BatchOrchestrator::new(WmsClient::new(wms)?, config)?;
    let summary = orchestrator.scan_file(&args.input, &args.output)?;
    info!("{}", summary);
    Ok(())
}

fn balance(args: BalanceArgs) -> Result<()> {
    let document = read_feature_document(&args.input)?;
    let (balanced, stats) = balance_document(&document, args.seed);
    write_feature_document(&args.output, &balanced)?;
    info!(
        "Wrote {} buildings ({} marked, {} unmarked)",
        balanced.len(),
        stats.kept_per_class,
        stats.kept_per_class
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    info!("=== Hazard Scan ===");

    // Set thread pool size if specified
    if let Some(n_threads) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build_global()?;
        info!("Using {} threads for pixel scanning", n_threads);
    }

    match args.command {
        Command::Scan(scan_args) => scan(scan_args)?,
        Command::Balance(balance_args) => balance(balance_args)?,
    }

    info!("=== Done! ===");
    Ok(())
}
