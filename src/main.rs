use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use meander::config::{Cli, RunConfig};
use meander::driver::cdp::CdpDriver;
use meander::driver::BrowserDriver;
use meander::persist::{InteractionLog, SessionStore};
use meander::{init_logging, orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(RunConfig::from_cli(&cli));

    let _guard = init_logging(&config.logs_dir);

    info!(
        "starting meander: {} instances, {} sites per session, pool of {}",
        config.instances_count,
        config.websites_to_visit,
        config.websites.len()
    );

    let driver: Arc<dyn BrowserDriver> = Arc::new(CdpDriver::new());
    let store = Arc::new(SessionStore::new(&config.sessions_dir));
    let log = Arc::new(InteractionLog::new(&config.logs_dir));

    let summary = orchestrator::run_all(driver, config, store, log).await;

    if summary.completed == 0 && summary.launched > 0 {
        anyhow::bail!("all {} workers failed", summary.launched);
    }

    Ok(())
}
