//! Browser-driver seam
//!
//! The automation engine is consumed through these traits so the behavior
//! engine never depends on a concrete browser. [`cdp`] implements them over
//! chromiumoxide; tests script a fake session instead.

pub mod cdp;

#[cfg(test)]
pub(crate) mod fake;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::identity::Identity;

/// Driver-level errors.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("page load timed out after {0:?}")]
    PageLoadTimeout(Duration),

    #[error("script evaluation failed: {0}")]
    EvaluationFailed(String),

    #[error("element is gone: {0}")]
    ElementGone(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Axis-aligned element geometry in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Visual center of the box.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// The candidate sets the action library scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryTarget {
    /// Anything that might be a consent/notification popup control.
    DismissCandidates,
    /// Links, enabled buttons and button-like containers.
    Actionable,
    /// Visible free-text entry fields.
    TextInputs,
}

impl QueryTarget {
    /// CSS selector for this candidate set.
    pub fn selector(self) -> &'static str {
        match self {
            QueryTarget::DismissCandidates => "button, a, div",
            QueryTarget::Actionable => {
                "a[href], button:not([disabled]), div[role='button'], span[role='button']"
            }
            QueryTarget::TextInputs => "input[type='text'], textarea",
        }
    }
}

/// A handle to one element on the current page.
#[async_trait]
pub trait PageElement: Send + Sync {
    async fn is_visible(&self) -> Result<bool, DriverError>;
    async fn is_enabled(&self) -> Result<bool, DriverError>;
    /// Whether computed style resolves `pointer-events: none`.
    async fn pointer_events_disabled(&self) -> Result<bool, DriverError>;
    /// Point-based hit test: the topmost element at this element's visual
    /// center is something else.
    async fn is_occluded(&self) -> Result<bool, DriverError>;
    async fn bounding_box(&self) -> Result<Option<BoundingBox>, DriverError>;
    async fn tag_name(&self) -> Result<String, DriverError>;
    async fn inner_text(&self) -> Result<String, DriverError>;
    async fn scroll_into_view(&self) -> Result<(), DriverError>;
    async fn hover(&self) -> Result<(), DriverError>;
    async fn click(&self) -> Result<(), DriverError>;
}

/// One isolated browsing session with a single active page.
#[async_trait]
pub trait DriverSession: Send + Sync {
    /// Navigate the active page and wait for content-loaded readiness within
    /// the deadline. Exceeding the deadline yields
    /// [`DriverError::PageLoadTimeout`].
    async fn navigate(&self, url: &str, load_timeout: Duration) -> Result<(), DriverError>;

    /// Enumerate the current candidates for a query target.
    async fn query(&self, target: QueryTarget) -> Result<Vec<Box<dyn PageElement>>, DriverError>;

    /// Move the pointer to viewport coordinates along a stepped path.
    async fn mouse_move(&self, x: f64, y: f64, steps: u32) -> Result<(), DriverError>;

    /// Dispatch one mouse-wheel event.
    async fn wheel(&self, delta_x: f64, delta_y: f64) -> Result<(), DriverError>;

    /// Type one character into the focused element.
    async fn type_char(&self, c: char) -> Result<(), DriverError>;

    /// Number of open pages (tabs/windows) in the session.
    async fn page_count(&self) -> Result<usize, DriverError>;

    /// Close everything except the session's main page.
    async fn close_extra_pages(&self) -> Result<(), DriverError>;

    /// Export the session's storage state (cookies, local storage) as an
    /// opaque record for [`crate::persist::SessionStore`].
    async fn export_storage(&self) -> Result<Value, DriverError>;

    /// Release the session's resources.
    async fn close(&self) -> Result<(), DriverError>;
}

/// The automation engine: opens isolated sessions.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open a session configured with the identity's fingerprint fields and
    /// an optional prior storage state.
    async fn open_session(
        &self,
        identity: &Identity,
        storage: Option<Value>,
    ) -> Result<Arc<dyn DriverSession>, DriverError>;
}
