use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Dynamic-noise contrast threshold staircase (2IFC)")]
pub struct Args {
    /// Path to config TOML; defaults are used when the file is missing
    #[arg(long, default_value = "vss.toml")]
    pub config: PathBuf,

    /// Run headless against a simulated observer instead of opening a window
    #[arg(long, default_value_t = false)]
    pub simulate: bool,

    /// Simulated observer threshold, percent of range
    #[arg(long, default_value_t = 6.0, requires = "simulate")]
    pub observer_threshold: f64,

    /// Simulated observer psychometric slope
    #[arg(long, default_value_t = 3.5, requires = "simulate")]
    pub observer_slope: f64,

    /// Simulated observer lapse rate
    #[arg(long, default_value_t = 0.02, requires = "simulate")]
    pub observer_lapse: f64,

    /// Pace the simulation in real time instead of on a virtual clock
    #[arg(long, default_value_t = false, requires = "simulate")]
    pub realtime: bool,

    /// Simulated vsync rate
    #[arg(long, default_value_t = 60.0)]
    pub refresh_hz: f64,

    /// Seed for trial randomisation; entropy-seeded when omitted
    #[arg(long)]
    pub seed: Option<u64>,

    /// Write the session report as JSON here when a session ends
    #[arg(long)]
    pub results: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `vss_experiment=trace`; RUST_LOG wins when set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
