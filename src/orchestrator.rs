//! Worker orchestration
//!
//! Launches every session worker under one shared driver instance and waits
//! for all of them. Each worker is its own failure domain: a fatal error or
//! panic in one never cancels the others.

use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tracing::{error, info};

use crate::config::RunConfig;
use crate::driver::BrowserDriver;
use crate::persist::{InteractionLog, SessionStore};
use crate::worker::SessionWorker;

/// Outcome of a full run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Workers launched.
    pub launched: usize,
    /// Workers that ran their site list to completion.
    pub completed: usize,
}

/// Launch all configured workers concurrently and wait for every one of them
/// to finish, successfully or not.
pub async fn run_all(
    driver: Arc<dyn BrowserDriver>,
    config: Arc<RunConfig>,
    store: Arc<SessionStore>,
    log: Arc<InteractionLog>,
) -> RunSummary {
    let launched = config.instances_count;
    info!("launching {} session workers ({} sites each)", launched, config.websites_to_visit);

    let mut handles = Vec::with_capacity(launched);
    for index in 0..launched {
        handles.push(spawn_worker_task_safe(
            index,
            driver.clone(),
            config.clone(),
            store.clone(),
            log.clone(),
        ));
    }

    let results = join_all(handles).await;
    let completed = results.into_iter().filter(|r| matches!(r, Ok(true))).count();

    info!("run complete: {}/{} workers finished cleanly", completed, launched);
    RunSummary { launched, completed }
}

/// Spawn one worker task with panic containment: a panicking worker is logged
/// and counted as failed, nothing more.
fn spawn_worker_task_safe(
    index: usize,
    driver: Arc<dyn BrowserDriver>,
    config: Arc<RunConfig>,
    store: Arc<SessionStore>,
    log: Arc<InteractionLog>,
) -> tokio::task::JoinHandle<bool> {
    tokio::spawn(async move {
        let worker = SessionWorker::new(index, driver, config, store, log.handle(index));

        let guarded = std::panic::AssertUnwindSafe(worker.run());
        match guarded.catch_unwind().await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("worker {} could not run: {}", index, e);
                false
            }
            Err(panic_info) => {
                let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "unknown panic".to_string()
                };
                error!("worker {} panicked: {}", index, msg);
                false
            }
        }
    })
}
