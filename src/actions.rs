//! Best-effort page actions
//!
//! Every behavior here is search-then-act under an explicit time budget: the
//! deadline bounds candidate scanning so a page with few or no matching
//! elements cannot stall the worker. Failures never cross the action
//! boundary; they surface only as log entries.

use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio::time::Instant;
use tracing::debug;

use crate::driver::{DriverError, DriverSession, QueryTarget};
use crate::persist::{Action, LogHandle};

/// Phrases that mark an element as a popup/consent control.
const DISMISS_PHRASES: &[&str] = &["accept", "agree", "okay", "close", "x", "dismiss"];

/// Fixed probe text typed into search boxes and comment fields.
const TYPING_PROBE: &str = "What are C++ pointers?";

/// Pause between candidate-scan iterations.
const SEARCH_POLL: Duration = Duration::from_millis(50);

/// Page actions mimicking a human visitor.
pub struct BrowserActions;

impl BrowserActions {
    /// Click the first visible popup/consent control whose text matches the
    /// dismissal phrase set. Returns whether a dismissal happened; every
    /// failure is swallowed into "no dismissal".
    pub async fn dismiss_popups<R: Rng + Send>(session: &dyn DriverSession, rng: &mut R) -> bool {
        let candidates = match session.query(QueryTarget::DismissCandidates).await {
            Ok(c) => c,
            Err(_) => return false,
        };

        for element in &candidates {
            let text = match element.inner_text().await {
                Ok(t) => t.to_lowercase(),
                Err(_) => continue,
            };

            if DISMISS_PHRASES.iter().any(|phrase| text.contains(phrase)) {
                if element.click().await.is_ok() {
                    Self::pause(rng, 500, 1000).await;
                    return true;
                }
                return false;
            }
        }

        false
    }

    /// A few randomized wheel scrolls with reading pauses. Scrolling an empty
    /// page is a no-op, so there is no failure path.
    pub async fn random_scroll<R: Rng + Send>(session: &dyn DriverSession, rng: &mut R) {
        let rounds = rng.gen_range(3..=6);
        for _ in 0..rounds {
            let delta_y = rng.gen_range(200..=800) as f64;
            let _ = session.wheel(0.0, delta_y).await;
            Self::pause(rng, 1000, 3000).await;
        }
    }

    /// Hover a random actionable element. Logs exactly one entry per call:
    /// `hover` with the element's tag and text, or `error` when nothing
    /// hoverable turned up within the search budget.
    pub async fn random_hover<R: Rng + Send>(
        session: &dyn DriverSession,
        rng: &mut R,
        log: &LogHandle,
        site: &str,
        search_timeout: Duration,
    ) {
        Self::dismiss_popups(session, rng).await;

        let deadline = Instant::now() + search_timeout;
        let outcome: Result<Option<(String, String)>, DriverError> = async {
            let candidates = session.query(QueryTarget::Actionable).await?;
            if candidates.is_empty() {
                return Ok(None);
            }

            while Instant::now() < deadline {
                let element = &candidates[rng.gen_range(0..candidates.len())];

                if element.is_visible().await? && element.is_enabled().await? {
                    if element.pointer_events_disabled().await? {
                        tokio::time::sleep(SEARCH_POLL).await;
                        continue;
                    }

                    element.scroll_into_view().await?;
                    element.hover().await?;

                    let tag = element.tag_name().await?;
                    let text = Self::display_text(element.inner_text().await?);
                    return Ok(Some((tag, text)));
                }

                tokio::time::sleep(SEARCH_POLL).await;
            }

            Ok(None)
        }
        .await;

        match outcome {
            Ok(Some((tag, text))) => {
                debug!("worker {} hovered <{}> on {}", log.worker(), tag, site);
                log.append(site, Action::Hover, json!({ "tag": tag, "text": text })).await;
            }
            Ok(None) => {
                log.append(site, Action::Error, json!({ "error": "hover element not found" })).await;
            }
            Err(e) => {
                log.append(site, Action::Error, json!({ "error": e.to_string() })).await;
            }
        }
    }

    /// Click a random text field and type the probe string with human typing
    /// cadence. One `typing` or `error` entry per call.
    pub async fn realistic_typing<R: Rng + Send>(
        session: &dyn DriverSession,
        rng: &mut R,
        log: &LogHandle,
        site: &str,
        search_timeout: Duration,
    ) {
        Self::dismiss_popups(session, rng).await;

        let deadline = Instant::now() + search_timeout;
        let outcome: Result<bool, DriverError> = async {
            let candidates = session.query(QueryTarget::TextInputs).await?;
            if candidates.is_empty() {
                return Ok(false);
            }

            while Instant::now() < deadline {
                let field = &candidates[rng.gen_range(0..candidates.len())];

                if field.is_visible().await? && field.is_enabled().await? {
                    field.scroll_into_view().await?;
                    field.click().await?;

                    for c in TYPING_PROBE.chars() {
                        session.type_char(c).await?;
                        Self::pause(rng, 50, 200).await;
                    }

                    return Ok(true);
                }

                tokio::time::sleep(SEARCH_POLL).await;
            }

            Ok(false)
        }
        .await;

        match outcome {
            Ok(true) => {
                debug!("worker {} typed probe text on {}", log.worker(), site);
                log.append(site, Action::Typing, json!({ "text": TYPING_PROBE })).await;
            }
            Ok(false) => {
                log.append(site, Action::Error, json!({ "error": "typing element not found" })).await;
            }
            Err(e) => {
                log.append(site, Action::Error, json!({ "error": e.to_string() })).await;
            }
        }
    }

    /// Up to 4 attempts to click a random actionable element, skipping
    /// occluded targets, with a pointer approach path before the click.
    /// One `click` or `error` entry per call.
    pub async fn random_click<R: Rng + Send>(
        session: &dyn DriverSession,
        rng: &mut R,
        log: &LogHandle,
        site: &str,
        search_timeout: Duration,
    ) {
        Self::dismiss_popups(session, rng).await;

        let deadline = Instant::now() + search_timeout;
        let outcome: Result<Option<(String, String)>, DriverError> = async {
            let candidates = session.query(QueryTarget::Actionable).await?;
            if candidates.is_empty() {
                return Ok(None);
            }

            for _ in 0..4 {
                if Instant::now() >= deadline {
                    return Ok(None);
                }

                let element = &candidates[rng.gen_range(0..candidates.len())];

                if !(element.is_visible().await? && element.is_enabled().await?) {
                    tokio::time::sleep(SEARCH_POLL).await;
                    continue;
                }

                if let Some(bbox) = element.bounding_box().await? {
                    if element.is_occluded().await? {
                        tokio::time::sleep(SEARCH_POLL).await;
                        continue;
                    }

                    let (x, y) = bbox.center();
                    let steps = rng.gen_range(10..=30);
                    session.mouse_move(x, y, steps).await?;
                    Self::pause(rng, 200, 1000).await;
                }

                let tag = element.tag_name().await?;
                let text = Self::display_text(element.inner_text().await?);
                element.click().await?;
                return Ok(Some((tag, text)));
            }

            Ok(None)
        }
        .await;

        match outcome {
            Ok(Some((tag, text))) => {
                debug!("worker {} clicked <{}> on {}", log.worker(), tag, site);
                log.append(site, Action::Click, json!({ "tag": tag, "text": text })).await;
                Self::pause(rng, 1000, 3000).await;
            }
            Ok(None) => {
                log.append(site, Action::Error, json!({ "error": "click element not found" })).await;
            }
            Err(e) => {
                log.append(site, Action::Error, json!({ "error": e.to_string() })).await;
            }
        }
    }

    fn display_text(text: String) -> String {
        if text.trim().is_empty() {
            "No text".to_string()
        } else {
            text
        }
    }

    /// Randomized pause in `[min_ms, max_ms]`.
    pub async fn pause<R: Rng + Send>(rng: &mut R, min_ms: u64, max_ms: u64) {
        let delay = rng.gen_range(min_ms..=max_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}
