use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hazard-scan")]
#[command(about = "Classify building footprints against a WMS hazard-marker layer")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Number of threads for pixel scanning (default: all available)
    #[arg(short, long, global = true, value_name = "N")]
    pub threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify every building of a GeoJSON collection
    Scan(ScanArgs),
    /// Write an equal number of marked and unmarked buildings
    Balance(BalanceArgs),
}

#[derive(ClapArgs, Debug)]
pub struct ScanArgs {
    /// Input GeoJSON with building polygons
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Output GeoJSON (input annotated with classification)
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// WMS endpoint serving the hazard layer
    #[arg(long, env = "HAZARD_WMS_URL", value_name = "URL")]
    pub wms_url: String,

    /// WMS layer id of the hazard markers
    #[arg(long, env = "HAZARD_WMS_LAYER", value_name = "LAYER")]
    pub layer: String,

    /// WMS style id for the layer
    #[arg(long, env = "HAZARD_WMS_STYLE", default_value = "", value_name = "STYLE")]
    pub style: String,

    /// Concurrent workers (default: number of CPUs)
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,

    /// Minimum milliseconds between imagery requests
    #[arg(long, default_value_t = 50, value_name = "MS")]
    pub interval_ms: u64,

    /// Requests allowed back-to-back before pacing applies
    #[arg(long, default_value_t = 1, value_name = "N")]
    pub burst: u32,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30, value_name = "SECS")]
    pub timeout_secs: u64,

    /// Retries for timeouts, transport errors, 429 and 5xx responses
    #[arg(long, default_value_t = 2, value_name = "N")]
    pub retries: u32,

    /// Base backoff between retries in milliseconds (multiplied by attempt)
    #[arg(long, default_value_t = 5000, value_name = "MS")]
    pub retry_backoff_ms: u64,

    /// Marker color of the hazard layer
    #[arg(long, default_value = "#FF0000", value_name = "#RRGGBB")]
    pub marker_color: String,

    /// Maximum RGB distance from the marker color
    #[arg(long, default_value_t = 60.0, value_name = "DIST")]
    pub tolerance: f64,

    /// Requested tile edge in pixels
    #[arg(long, default_value_t = 256, value_name = "PX")]
    pub tile_size: u32,

    /// Log progress every N buildings
    #[arg(long, default_value_t = 100, value_name = "N")]
    pub progress_every: usize,
}

#[derive(ClapArgs, Debug)]
pub struct BalanceArgs {
    /// Annotated GeoJSON produced by `scan`
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Balanced output GeoJSON
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Shuffle seed
    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}
