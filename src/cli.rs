use clap::Parser;
use std::time::Duration;

/// Traceroute every address in a range, map the routers and flag divergent paths
#[derive(Parser, Debug, Clone)]
#[command(name = "route-mapper")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// First address of the range (inclusive)
    pub start: String,

    /// Last address of the range (inclusive)
    pub end: String,

    /// Maximum hop limit probed per target
    #[arg(short = 'm', long = "max-hops", default_value = "30")]
    pub max_hops: u8,

    /// Per-probe timeout in seconds
    #[arg(long = "timeout", default_value = "1")]
    pub timeout: f64,

    /// Targets probed concurrently
    #[arg(short = 'w', long = "workers", default_value = "16")]
    pub workers: usize,

    /// Stop all probing after this many seconds
    #[arg(long = "deadline")]
    pub deadline: Option<f64>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    /// Get timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::ZERO)
    }

    /// Get deadline as Duration
    pub fn deadline_duration(&self) -> Option<Duration> {
        self.deadline
            .map(|secs| Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO))
    }
}
