//! Session worker
//!
//! One worker owns one browser session end to end: identity draw, prior
//! state restore, site iteration, persistence, teardown. Site-level failures
//! become log entries and the worker moves on; only failing to open a
//! session at all is fatal, and then only for this worker.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::browsing::BrowsingLoop;
use crate::config::RunConfig;
use crate::driver::{BrowserDriver, DriverError, DriverSession};
use crate::identity::IdentityPool;
use crate::persist::{Action, LogHandle, SessionStore};

/// Pause before releasing session resources, letting in-flight browser work
/// settle.
const DRAIN_DELAY: Duration = Duration::from_secs(2);

/// Cadence of the secondary-tab watchdog.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);

/// One simulated browsing session.
pub struct SessionWorker {
    index: usize,
    driver: Arc<dyn BrowserDriver>,
    config: Arc<RunConfig>,
    store: Arc<SessionStore>,
    log: LogHandle,
}

impl SessionWorker {
    pub fn new(
        index: usize,
        driver: Arc<dyn BrowserDriver>,
        config: Arc<RunConfig>,
        store: Arc<SessionStore>,
        log: LogHandle,
    ) -> Self {
        Self { index, driver, config, store, log }
    }

    /// Run the worker to completion with an entropy-seeded RNG.
    pub async fn run(self) -> Result<(), DriverError> {
        self.run_with_rng(StdRng::from_entropy()).await
    }

    /// Run the worker to completion. Tests inject a seeded RNG here to pin
    /// down identity draw, site sampling and action choices.
    pub async fn run_with_rng<R: Rng + Send>(self, mut rng: R) -> Result<(), DriverError> {
        let identity = IdentityPool::builtin().pick(&mut rng);
        info!(
            "worker {} starting as {:?} ({} sites to visit)",
            self.index, identity.os_type, self.config.websites_to_visit
        );

        let prior_state = self.store.load(self.index);
        if prior_state.is_some() {
            debug!("worker {} restoring prior session state", self.index);
        }

        let session = self.driver.open_session(&identity, prior_state).await?;

        let watchdog = spawn_tab_watchdog(self.index, session.clone());

        let sites: Vec<String> = self
            .config
            .websites
            .choose_multiple(&mut rng, self.config.websites_to_visit)
            .cloned()
            .collect();

        for site in &sites {
            self.visit(session.as_ref(), &mut rng, site).await;
        }

        match session.export_storage().await {
            Ok(state) => {
                if let Err(e) = self.store.save(self.index, &state) {
                    warn!("worker {} failed to save session state: {}", self.index, e);
                }
            }
            Err(e) => warn!("worker {} failed to export session state: {}", self.index, e),
        }

        tokio::time::sleep(DRAIN_DELAY).await;

        // The watchdog is scoped to this worker; stop it before teardown so
        // it can never outlive the session it polls.
        watchdog.abort();

        if let Err(e) = session.close().await {
            warn!("worker {} session close failed: {}", self.index, e);
        }

        info!("worker {} finished ({} sites)", self.index, sites.len());
        Ok(())
    }

    /// Visit one site. Every failure here ends up as a single `error` log
    /// entry; the caller always proceeds to the next site.
    async fn visit<R: Rng + Send>(&self, session: &dyn DriverSession, rng: &mut R, site: &str) {
        let started = Instant::now();

        match session.navigate(site, self.config.page_load_timeout).await {
            Ok(()) => {
                self.log.append(site, Action::Visited, json!({ "url": site })).await;

                BrowsingLoop::run(session, rng, &self.log, site, &self.config).await;

                let seconds = started.elapsed().as_secs_f64();
                self.log.append(site, Action::TimeSpent, json!({ "seconds": seconds })).await;
            }
            Err(DriverError::PageLoadTimeout(_)) => {
                warn!("worker {} page load timeout on {}", self.index, site);
                self.log.append(site, Action::Error, json!({ "error": "page load timeout" })).await;
            }
            Err(e) => {
                warn!("worker {} failed on {}: {}", self.index, site, e);
                self.log.append(site, Action::Error, json!({ "error": e.to_string() })).await;
            }
        }
    }
}

/// Background task that keeps the session at exactly one open page, closing
/// any popups/tabs pages manage to spawn.
fn spawn_tab_watchdog(index: usize, session: Arc<dyn DriverSession>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(WATCHDOG_INTERVAL).await;

            match session.page_count().await {
                Ok(open) if open > 1 => {
                    debug!("worker {} closing {} secondary tabs", index, open - 1);
                    if let Err(e) = session.close_extra_pages().await {
                        debug!("worker {} tab cleanup failed: {}", index, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("worker {} tab watchdog poll failed: {}", index, e);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{FakeDriver, FakeSession};
    use crate::persist::InteractionLog;
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;

    struct Fixture {
        _dir: tempfile::TempDir,
        config: Arc<RunConfig>,
        store: Arc<SessionStore>,
        log: Arc<InteractionLog>,
    }

    fn fixture(websites: usize) -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Arc::new(RunConfig {
            websites_to_visit: websites,
            instances_count: 1,
            ..RunConfig::default()
        });
        let store = Arc::new(SessionStore::new(dir.path().join("sessions")));
        let log = Arc::new(InteractionLog::new(dir.path().join("logs")));
        Fixture { _dir: dir, config, store, log }
    }

    fn worker(f: &Fixture, index: usize, driver: Arc<FakeDriver>) -> SessionWorker {
        SessionWorker::new(index, driver, f.config.clone(), f.store.clone(), f.log.handle(index))
    }

    #[tokio::test(start_paused = true)]
    async fn visits_exactly_the_requested_number_of_distinct_sites() {
        let f = fixture(2);
        let session = Arc::new(FakeSession::new());
        let driver = Arc::new(FakeDriver::returning(session.clone()));

        worker(&f, 0, driver)
            .run_with_rng(StdRng::seed_from_u64(21))
            .await
            .expect("worker run");

        let entries = f.log.read_all(0);
        let visited: Vec<_> = entries.iter().filter(|e| e.action == Action::Visited).collect();
        let spent: Vec<_> = entries.iter().filter(|e| e.action == Action::TimeSpent).collect();
        assert_eq!(visited.len(), 2);
        assert_eq!(spent.len(), 2);

        let distinct: HashSet<_> = visited.iter().map(|e| e.site.as_str()).collect();
        assert_eq!(distinct.len(), 2, "sites are sampled without replacement");
        assert!(session.closed.load(Ordering::Relaxed));
    }

    #[tokio::test(start_paused = true)]
    async fn navigation_timeout_logs_one_error_and_continues() {
        let f = fixture(2);
        // Time out every site in the pool so each visit fails fast.
        let mut session = FakeSession::new();
        for site in &f.config.websites {
            session = session.with_timeout_site(site);
        }
        let session = Arc::new(session);
        let driver = Arc::new(FakeDriver::returning(session.clone()));

        worker(&f, 0, driver)
            .run_with_rng(StdRng::seed_from_u64(22))
            .await
            .expect("worker run");

        let entries = f.log.read_all(0);
        let errors: Vec<_> = entries.iter().filter(|e| e.action == Action::Error).collect();
        assert_eq!(errors.len(), 2, "one error entry per timed-out site");
        assert!(errors.iter().all(|e| e.details["error"] == "page load timeout"));
        assert!(entries.iter().all(|e| e.action != Action::Visited));
        // Both sites were still attempted.
        assert_eq!(session.visited().len(), 2);
        assert!(session.closed.load(Ordering::Relaxed));
    }

    #[tokio::test(start_paused = true)]
    async fn other_navigation_failures_carry_the_failure_message() {
        let f = fixture(2);
        let mut session = FakeSession::new();
        for site in &f.config.websites {
            session = session.with_failing_site(site);
        }
        let session = Arc::new(session);
        let driver = Arc::new(FakeDriver::returning(session));

        worker(&f, 0, driver)
            .run_with_rng(StdRng::seed_from_u64(23))
            .await
            .expect("worker run");

        let entries = f.log.read_all(0);
        assert!(!entries.is_empty());
        assert!(entries
            .iter()
            .all(|e| e.action == Action::Error
                && e.details["error"].as_str().unwrap_or("").contains("connection reset")));
    }

    #[tokio::test(start_paused = true)]
    async fn session_state_is_saved_on_completion() {
        let f = fixture(1);
        let exported = serde_json::json!({"cookies": [{"name": "sid", "value": "1"}], "origins": []});
        let session = Arc::new(FakeSession::new().with_exported(exported.clone()));
        let driver = Arc::new(FakeDriver::returning(session));

        worker(&f, 0, driver)
            .run_with_rng(StdRng::seed_from_u64(24))
            .await
            .expect("worker run");

        assert_eq!(f.store.load(0), Some(exported));
    }

    #[tokio::test(start_paused = true)]
    async fn prior_session_state_is_handed_to_the_driver() {
        let f = fixture(1);
        let prior = serde_json::json!({"cookies": [], "origins": []});
        f.store.save(0, &prior).expect("seed store");

        let session = Arc::new(FakeSession::new());
        let driver = Arc::new(FakeDriver::returning(session));

        worker(&f, 0, driver.clone())
            .run_with_rng(StdRng::seed_from_u64(25))
            .await
            .expect("worker run");

        let opened = driver.opened_with.lock().unwrap();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0], Some(prior));
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_is_fatal_for_the_worker_only() {
        let f = fixture(1);
        let session = Arc::new(FakeSession::new());
        let driver = Arc::new(FakeDriver::failing_first(1, session.clone()));

        let err = worker(&f, 0, driver)
            .run_with_rng(StdRng::seed_from_u64(26))
            .await
            .expect_err("open failure must surface");
        assert!(matches!(err, DriverError::LaunchFailed(_)));
        assert!(f.log.read_all(0).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_closes_secondary_tabs_during_the_run() {
        let f = fixture(1);
        let session = Arc::new(FakeSession::new());
        // Pretend a page spawned two popup tabs before the run starts.
        session.pages_open.store(3, Ordering::Relaxed);
        let driver = Arc::new(FakeDriver::returning(session.clone()));

        worker(&f, 0, driver)
            .run_with_rng(StdRng::seed_from_u64(27))
            .await
            .expect("worker run");

        assert_eq!(session.extra_pages_closed.load(Ordering::Relaxed), 2);
        assert_eq!(session.pages_open.load(Ordering::Relaxed), 1);
    }
}
