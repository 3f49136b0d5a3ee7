//! Run configuration
//!
//! Everything tunable is collected into one immutable [`RunConfig`] built at
//! startup and shared read-only across all workers.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Sites visited per session when `--websites` is not given.
pub const DEFAULT_WEBSITES: usize = 3;
/// Concurrent sessions when `--instances` is not given.
pub const DEFAULT_INSTANCES: usize = 10;

/// Wall-clock budget for the candidate-search phase of each page action.
pub const ELEMENT_SEARCH_TIMEOUT: Duration = Duration::from_secs(3);
/// Navigation deadline per site.
pub const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Command-line surface.
#[derive(Parser, Debug)]
#[command(
    name = "meander",
    version,
    about = "Concurrent human-like browsing sessions against a fixed site pool"
)]
pub struct Cli {
    /// Number of sites each session visits
    #[arg(short = 'w', long = "websites", value_name = "COUNT", default_value_t = DEFAULT_WEBSITES)]
    pub websites: usize,

    /// Number of concurrent browsing sessions
    #[arg(short = 'i', long = "instances", value_name = "COUNT", default_value_t = DEFAULT_INSTANCES)]
    pub instances: usize,
}

/// Immutable run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Distinct sites sampled per worker.
    pub websites_to_visit: usize,
    /// Number of concurrent session workers.
    pub instances_count: usize,
    /// Budget for the search phase of each best-effort action.
    pub element_search_timeout: Duration,
    /// Navigation deadline per site.
    pub page_load_timeout: Duration,
    /// The fixed site pool workers sample from.
    pub websites: Vec<String>,
    /// Directory holding per-worker storage-state records.
    pub sessions_dir: PathBuf,
    /// Directory holding per-worker interaction log streams.
    pub logs_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            websites_to_visit: DEFAULT_WEBSITES,
            instances_count: DEFAULT_INSTANCES,
            element_search_timeout: ELEMENT_SEARCH_TIMEOUT,
            page_load_timeout: PAGE_LOAD_TIMEOUT,
            websites: vec![
                "https://www.w3schools.com".to_string(),
                "https://www.geeksforgeeks.org".to_string(),
                "https://www.learnpython.org".to_string(),
                "https://stackoverflow.com".to_string(),
                "https://www.codechef.com".to_string(),
                "https://www.reddit.com".to_string(),
            ],
            sessions_dir: PathBuf::from("sessions"),
            logs_dir: PathBuf::from("logs"),
        }
    }
}

impl RunConfig {
    /// Build the run configuration from parsed command-line flags.
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            websites_to_visit: cli.websites,
            instances_count: cli.instances,
            ..Self::default()
        }
    }
}
