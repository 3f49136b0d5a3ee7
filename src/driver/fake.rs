//! Scripted in-memory driver for unit tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{BoundingBox, BrowserDriver, DriverError, DriverSession, PageElement, QueryTarget};
use crate::identity::Identity;

#[derive(Clone)]
pub(crate) struct FakeElement {
    pub tag: String,
    pub text: String,
    pub visible: bool,
    pub enabled: bool,
    pub pointer_events_none: bool,
    pub occluded: bool,
    pub bbox: Option<BoundingBox>,
    clicks: Arc<AtomicUsize>,
    hovers: Arc<AtomicUsize>,
}

impl FakeElement {
    pub fn labeled(tag: &str, text: &str) -> Self {
        Self {
            tag: tag.to_string(),
            text: text.to_string(),
            visible: true,
            enabled: true,
            pointer_events_none: false,
            occluded: false,
            bbox: Some(BoundingBox { x: 10.0, y: 10.0, width: 100.0, height: 20.0 }),
            clicks: Arc::new(AtomicUsize::new(0)),
            hovers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn invisible(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn occluded(mut self) -> Self {
        self.occluded = true;
        self
    }

    pub fn click_count(&self) -> usize {
        self.clicks.load(Ordering::Relaxed)
    }

    pub fn hover_count(&self) -> usize {
        self.hovers.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PageElement for FakeElement {
    async fn is_visible(&self) -> Result<bool, DriverError> {
        Ok(self.visible)
    }

    async fn is_enabled(&self) -> Result<bool, DriverError> {
        Ok(self.enabled)
    }

    async fn pointer_events_disabled(&self) -> Result<bool, DriverError> {
        Ok(self.pointer_events_none)
    }

    async fn is_occluded(&self) -> Result<bool, DriverError> {
        Ok(self.occluded)
    }

    async fn bounding_box(&self) -> Result<Option<BoundingBox>, DriverError> {
        Ok(self.bbox)
    }

    async fn tag_name(&self) -> Result<String, DriverError> {
        Ok(self.tag.clone())
    }

    async fn inner_text(&self) -> Result<String, DriverError> {
        Ok(self.text.clone())
    }

    async fn scroll_into_view(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn hover(&self) -> Result<(), DriverError> {
        self.hovers.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn click(&self) -> Result<(), DriverError> {
        self.clicks.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

pub(crate) struct FakeSession {
    pub dismiss: Mutex<Vec<FakeElement>>,
    pub actionable: Mutex<Vec<FakeElement>>,
    pub inputs: Mutex<Vec<FakeElement>>,
    pub timeout_sites: Mutex<HashSet<String>>,
    pub failing_sites: Mutex<HashSet<String>>,
    pub navigations: Mutex<Vec<String>>,
    pub wheel_events: AtomicUsize,
    pub mouse_moves: AtomicUsize,
    pub typed: Mutex<String>,
    pub pages_open: AtomicUsize,
    pub extra_pages_closed: AtomicUsize,
    pub exported: Mutex<Value>,
    pub closed: AtomicBool,
}

impl FakeSession {
    pub fn new() -> Self {
        Self {
            dismiss: Mutex::new(Vec::new()),
            actionable: Mutex::new(Vec::new()),
            inputs: Mutex::new(Vec::new()),
            timeout_sites: Mutex::new(HashSet::new()),
            failing_sites: Mutex::new(HashSet::new()),
            navigations: Mutex::new(Vec::new()),
            wheel_events: AtomicUsize::new(0),
            mouse_moves: AtomicUsize::new(0),
            typed: Mutex::new(String::new()),
            pages_open: AtomicUsize::new(1),
            extra_pages_closed: AtomicUsize::new(0),
            exported: Mutex::new(Value::Null),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_dismiss(self, elements: Vec<FakeElement>) -> Self {
        *self.dismiss.lock().unwrap() = elements;
        self
    }

    pub fn with_actionable(self, elements: Vec<FakeElement>) -> Self {
        *self.actionable.lock().unwrap() = elements;
        self
    }

    pub fn with_inputs(self, elements: Vec<FakeElement>) -> Self {
        *self.inputs.lock().unwrap() = elements;
        self
    }

    pub fn with_timeout_site(self, site: &str) -> Self {
        self.timeout_sites.lock().unwrap().insert(site.to_string());
        self
    }

    pub fn with_failing_site(self, site: &str) -> Self {
        self.failing_sites.lock().unwrap().insert(site.to_string());
        self
    }

    pub fn with_exported(self, value: Value) -> Self {
        *self.exported.lock().unwrap() = value;
        self
    }

    pub fn visited(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn typed_text(&self) -> String {
        self.typed.lock().unwrap().clone()
    }
}

#[async_trait]
impl DriverSession for FakeSession {
    async fn navigate(&self, url: &str, load_timeout: Duration) -> Result<(), DriverError> {
        self.navigations.lock().unwrap().push(url.to_string());
        if self.timeout_sites.lock().unwrap().contains(url) {
            return Err(DriverError::PageLoadTimeout(load_timeout));
        }
        if self.failing_sites.lock().unwrap().contains(url) {
            return Err(DriverError::NavigationFailed("connection reset".into()));
        }
        Ok(())
    }

    async fn query(&self, target: QueryTarget) -> Result<Vec<Box<dyn PageElement>>, DriverError> {
        let source = match target {
            QueryTarget::DismissCandidates => &self.dismiss,
            QueryTarget::Actionable => &self.actionable,
            QueryTarget::TextInputs => &self.inputs,
        };
        Ok(source
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(|e| Box::new(e) as Box<dyn PageElement>)
            .collect())
    }

    async fn mouse_move(&self, _x: f64, _y: f64, _steps: u32) -> Result<(), DriverError> {
        self.mouse_moves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn wheel(&self, _delta_x: f64, _delta_y: f64) -> Result<(), DriverError> {
        self.wheel_events.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn type_char(&self, c: char) -> Result<(), DriverError> {
        self.typed.lock().unwrap().push(c);
        Ok(())
    }

    async fn page_count(&self) -> Result<usize, DriverError> {
        Ok(self.pages_open.load(Ordering::Relaxed))
    }

    async fn close_extra_pages(&self) -> Result<(), DriverError> {
        let open = self.pages_open.load(Ordering::Relaxed);
        if open > 1 {
            self.extra_pages_closed.fetch_add(open - 1, Ordering::Relaxed);
            self.pages_open.store(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn export_storage(&self) -> Result<Value, DriverError> {
        Ok(self.exported.lock().unwrap().clone())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Driver that hands every worker the same scripted session, optionally
/// failing the first N opens.
pub(crate) struct FakeDriver {
    session: Arc<FakeSession>,
    fail_opens: AtomicUsize,
    pub opened_with: Mutex<Vec<Option<Value>>>,
}

impl FakeDriver {
    pub fn returning(session: Arc<FakeSession>) -> Self {
        Self {
            session,
            fail_opens: AtomicUsize::new(0),
            opened_with: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_first(n: usize, session: Arc<FakeSession>) -> Self {
        Self {
            session,
            fail_opens: AtomicUsize::new(n),
            opened_with: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn open_session(
        &self,
        _identity: &Identity,
        storage: Option<Value>,
    ) -> Result<Arc<dyn DriverSession>, DriverError> {
        self.opened_with.lock().unwrap().push(storage);

        let should_fail = self
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(DriverError::LaunchFailed("no browser available".into()));
        }

        Ok(self.session.clone())
    }
}
