//! Per-site browsing loop
//!
//! Time-boxes one visit and keeps sampling actions until the visit budget is
//! spent. Action failures are already contained inside the action library, so
//! nothing here ends a visit early.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::actions::BrowserActions;
use crate::config::RunConfig;
use crate::driver::DriverSession;
use crate::persist::{Action, LogHandle};

/// What a single browsing turn does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Scroll,
    Hover,
    Click,
    Typing,
}

const TURNS: [Turn; 4] = [Turn::Scroll, Turn::Hover, Turn::Click, Turn::Typing];

/// Drives one time-boxed visit on the session's current page.
pub struct BrowsingLoop;

impl BrowsingLoop {
    /// Browse the current page for a randomized 35-45s window, choosing
    /// uniformly among scroll/hover/click/typing each turn with a 2-5s pause
    /// between turns.
    ///
    /// Scroll and typing turns additionally append a coarse loop-level marker
    /// entry on top of the action's own logging; downstream analytics count
    /// turns from those markers.
    pub async fn run<R: Rng + Send>(
        session: &dyn DriverSession,
        rng: &mut R,
        log: &LogHandle,
        site: &str,
        config: &RunConfig,
    ) {
        let budget = Duration::from_secs_f64(rng.gen_range(35.0..45.0));
        let deadline = Instant::now() + budget;

        debug!("worker {} browsing {} for {:.1}s", log.worker(), site, budget.as_secs_f64());

        while Instant::now() < deadline {
            let turn = *TURNS.choose(rng).unwrap_or(&Turn::Scroll);

            match turn {
                Turn::Scroll => {
                    BrowserActions::random_scroll(session, rng).await;
                    log.append(site, Action::Scroll, json!({})).await;
                }
                Turn::Hover => {
                    BrowserActions::random_hover(session, rng, log, site, config.element_search_timeout).await;
                }
                Turn::Click => {
                    BrowserActions::random_click(session, rng, log, site, config.element_search_timeout).await;
                }
                Turn::Typing => {
                    BrowserActions::realistic_typing(session, rng, log, site, config.element_search_timeout).await;
                    log.append(site, Action::Typing, json!({})).await;
                }
            }

            BrowserActions::pause(rng, 2000, 5000).await;
        }
    }
}
