//! chromiumoxide-backed driver
//!
//! Launches one headless Chrome per session with the identity's fingerprint
//! applied through CDP emulation overrides, and implements the element and
//! input primitives over DevTools commands.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::HeadlessMode;
use chromiumoxide::cdp::browser_protocol::browser::{GrantPermissionsParams, PermissionType};
use chromiumoxide::cdp::browser_protocol::emulation::{
    MediaFeature, SetDeviceMetricsOverrideParams, SetEmulatedMediaParams,
    SetGeolocationOverrideParams, SetTimezoneOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchKeyEventParams, DispatchKeyEventType, DispatchMouseEventParams,
    DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, GetCookiesParams, Headers, SetCookiesParams, SetExtraHttpHeadersParams,
};
use chromiumoxide::cdp::browser_protocol::target::TargetId;
use chromiumoxide::{Browser, BrowserConfig, Element, Page};
use futures::StreamExt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{BoundingBox, BrowserDriver, DriverError, DriverSession, PageElement, QueryTarget};
use crate::identity::Identity;

/// Sequential session naming (session-1, session-2, ...).
static SESSION_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Injected before any page script runs: strips WebRTC media and data-channel
/// capability so pages cannot leak the real network path.
const WEBRTC_DISABLE_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'mediaDevices', {
    get: () => ({
        getUserMedia: () => Promise.reject(new Error('WebRTC disabled')),
        enumerateDevices: () => Promise.resolve([]),
        getDisplayMedia: () => Promise.reject(new Error('Screen sharing blocked')),
    })
});

window.RTCPeerConnection = function() { return null; };
window.RTCDataChannel = function() { return null; };
"#;

/// Find a Chrome/Chromium executable on the system.
fn find_chrome() -> Option<PathBuf> {
    let candidates: Vec<PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = vec![
            PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(PathBuf::from(format!(r"{}\Google\Chrome\Application\chrome.exe", local)));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome")]
    } else {
        vec![
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// Storage state carried between runs: cookies plus a snapshot of the last
/// page's local storage.
#[derive(Debug, Serialize, Deserialize)]
struct StorageState {
    cookies: Vec<CookieParam>,
    origins: Vec<OriginState>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OriginState {
    origin: String,
    entries: BTreeMap<String, String>,
}

/// The automation engine. One instance is shared by all workers; each
/// `open_session` launches an isolated browser with its own profile dir.
pub struct CdpDriver {
    headless: bool,
    chrome_path: Option<PathBuf>,
    data_root: PathBuf,
}

impl CdpDriver {
    pub fn new() -> Self {
        Self {
            headless: true,
            chrome_path: find_chrome(),
            data_root: std::env::temp_dir().join("meander").join("browser_data"),
        }
    }

    /// Run with a visible browser window (debugging aid).
    pub fn with_head(mut self) -> Self {
        self.headless = false;
        self
    }
}

impl Default for CdpDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserDriver for CdpDriver {
    async fn open_session(
        &self,
        identity: &Identity,
        storage: Option<Value>,
    ) -> Result<Arc<dyn DriverSession>, DriverError> {
        let session = CdpSession::launch(self, identity, storage).await?;
        Ok(Arc::new(session))
    }
}

/// One live browser session with a single active page.
pub struct CdpSession {
    id: String,
    browser: Mutex<Option<Browser>>,
    page: Page,
    main_target: TargetId,
    alive: Arc<AtomicBool>,
}

impl CdpSession {
    async fn launch(
        driver: &CdpDriver,
        identity: &Identity,
        storage: Option<Value>,
    ) -> Result<Self, DriverError> {
        let session_id = format!("session-{}", SESSION_COUNTER.fetch_add(1, Ordering::Relaxed));

        if driver.chrome_path.is_none() {
            return Err(DriverError::LaunchFailed(
                "no Chrome/Chromium executable found on this system".to_string(),
            ));
        }

        info!(
            "launching {} ({:?}, {}x{}, tz {})",
            session_id, identity.os_type, identity.screen.width, identity.screen.height, identity.timezone
        );

        let user_data_dir = driver.data_root.join(&session_id);
        std::fs::create_dir_all(&user_data_dir)?;

        let mut builder = BrowserConfig::builder()
            .headless_mode(if driver.headless { HeadlessMode::New } else { HeadlessMode::False })
            .user_data_dir(&user_data_dir)
            .window_size(identity.screen.width, identity.screen.height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-default-browser-check")
            .arg("--disable-infobars")
            .arg("--disable-session-crashed-bubble")
            .arg("--disable-restore-session-state")
            .arg("--disable-notifications")
            .arg("--disable-domain-reliability")
            .arg("--disable-component-update")
            // Required when running as root (Docker, plain VPS)
            .arg("--no-sandbox");

        if let Some(ref path) = driver.chrome_path {
            builder = builder.chrome_executable(path);
        }

        let browser_config = builder
            .build()
            .map_err(DriverError::LaunchFailed)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| DriverError::LaunchFailed(e.to_string()))?;

        // Drain CDP events in the background; when the stream ends, Chrome is
        // gone and the session is marked dead.
        let alive = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive.clone();
        let handler_id = session_id.clone();
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            warn!("{} browser disconnected (event handler ended)", handler_id);
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        // Chrome opens with one blank tab; take it as the main page and drop
        // any extras.
        let page = {
            let mut pages = browser
                .pages()
                .await
                .map_err(|e| DriverError::LaunchFailed(e.to_string()))?;

            let main_page = if !pages.is_empty() {
                pages.remove(0)
            } else {
                browser
                    .new_page("about:blank")
                    .await
                    .map_err(|e| DriverError::LaunchFailed(e.to_string()))?
            };

            for extra in pages {
                debug!("{} closing extra blank tab", session_id);
                let _ = extra.close().await;
            }

            main_page
        };

        Self::apply_identity(&page, identity).await?;
        Self::inject_webrtc_hardening(&page).await?;
        Self::restore_storage(&session_id, &page, storage).await;

        let main_target = page.target_id().clone();

        info!("{} ready", session_id);

        Ok(Self {
            id: session_id,
            browser: Mutex::new(Some(browser)),
            page,
            main_target,
            alive,
        })
    }

    /// Whether the underlying browser process is still connected.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// Apply the identity's fingerprint fields through CDP emulation, so the
    /// overrides hold at the engine level without any script-visible patching.
    async fn apply_identity(page: &Page, identity: &Identity) -> Result<(), DriverError> {
        let ua = SetUserAgentOverrideParams::builder()
            .user_agent(identity.user_agent.as_str())
            .platform(identity.os_type.platform())
            .build()
            .map_err(DriverError::LaunchFailed)?;
        page.execute(ua)
            .await
            .map_err(|e| DriverError::LaunchFailed(format!("failed to set user agent: {}", e)))?;

        page.execute(SetTimezoneOverrideParams::new(identity.timezone.as_str()))
            .await
            .map_err(|e| DriverError::LaunchFailed(format!("failed to set timezone: {}", e)))?;

        let mut geo = SetGeolocationOverrideParams::default();
        geo.latitude = Some(identity.geolocation.latitude);
        geo.longitude = Some(identity.geolocation.longitude);
        geo.accuracy = Some(100.0);
        page.execute(geo)
            .await
            .map_err(|e| DriverError::LaunchFailed(format!("failed to set geolocation: {}", e)))?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(identity.screen.width as i64)
            .height(identity.screen.height as i64)
            .device_scale_factor(1.0)
            .mobile(identity.os_type.is_mobile())
            .build()
            .map_err(DriverError::LaunchFailed)?;
        page.execute(metrics)
            .await
            .map_err(|e| DriverError::LaunchFailed(format!("failed to set viewport: {}", e)))?;

        // Sessions alternate light/dark preference like a real device mix.
        let scheme = if rand::thread_rng().gen_bool(0.5) { "light" } else { "dark" };
        let mut media = SetEmulatedMediaParams::default();
        media.features = Some(vec![MediaFeature {
            name: "prefers-color-scheme".to_string(),
            value: scheme.to_string(),
        }]);
        page.execute(media)
            .await
            .map_err(|e| DriverError::LaunchFailed(format!("failed to set color scheme: {}", e)))?;

        let headers = serde_json::json!({ "Referer": "https://www.google.com" });
        page.execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
            .await
            .map_err(|e| DriverError::LaunchFailed(format!("failed to set headers: {}", e)))?;

        // Geolocation permission grant is best-effort; the coordinate
        // override above works either way.
        if let Ok(grant) = GrantPermissionsParams::builder()
            .permissions(vec![PermissionType::Geolocation])
            .build()
        {
            if let Err(e) = page.execute(grant).await {
                debug!("geolocation permission grant not applied: {}", e);
            }
        }

        Ok(())
    }

    /// Register the WebRTC-disable script to run before any page script.
    async fn inject_webrtc_hardening(page: &Page) -> Result<(), DriverError> {
        page.evaluate_on_new_document(WEBRTC_DISABLE_SCRIPT)
            .await
            .map_err(|e| DriverError::LaunchFailed(format!("failed to inject WebRTC hardening: {}", e)))?;

        Ok(())
    }

    /// Re-apply cookies from a prior run. Unreadable state means a fresh
    /// session, never a failure.
    async fn restore_storage(session_id: &str, page: &Page, storage: Option<Value>) {
        let Some(value) = storage else { return };

        match serde_json::from_value::<StorageState>(value) {
            Ok(state) if !state.cookies.is_empty() => {
                let count = state.cookies.len();
                match page.execute(SetCookiesParams::new(state.cookies)).await {
                    Ok(_) => debug!("{} restored {} cookies", session_id, count),
                    Err(e) => warn!("{} cookie restore failed, continuing fresh: {}", session_id, e),
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("{} prior storage state unreadable, starting fresh: {}", session_id, e);
            }
        }
    }
}

#[async_trait]
impl DriverSession for CdpSession {
    async fn navigate(&self, url: &str, load_timeout: Duration) -> Result<(), DriverError> {
        debug!("{} navigating to {}", self.id, url);

        let nav = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| DriverError::NavigationFailed(e.to_string()))?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| DriverError::NavigationFailed(e.to_string()))?;
            Ok(())
        };

        tokio::time::timeout(load_timeout, nav)
            .await
            .map_err(|_| DriverError::PageLoadTimeout(load_timeout))?
    }

    async fn query(&self, target: QueryTarget) -> Result<Vec<Box<dyn PageElement>>, DriverError> {
        let elements = self
            .page
            .find_elements(target.selector())
            .await
            .map_err(|e| DriverError::EvaluationFailed(e.to_string()))?;

        Ok(elements
            .into_iter()
            .map(|inner| {
                Box::new(CdpElement { inner, page: self.page.clone() }) as Box<dyn PageElement>
            })
            .collect())
    }

    async fn mouse_move(&self, x: f64, y: f64, steps: u32) -> Result<(), DriverError> {
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::from_entropy();

        let start_x: f64 = rng.gen_range(100.0..800.0);
        let start_y: f64 = rng.gen_range(100.0..500.0);

        // Cubic bezier path with jittered control points; straight-line
        // pointer travel is a classic automation tell.
        let cp1_x = start_x + (x - start_x) * 0.25 + rng.gen_range(-50.0..50.0);
        let cp1_y = start_y + (y - start_y) * 0.25 + rng.gen_range(-40.0..40.0);
        let cp2_x = x + rng.gen_range(-15.0..15.0);
        let cp2_y = y + rng.gen_range(-15.0..15.0);

        let steps = steps.max(2);
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let mt = 1.0 - t;

            let px = mt.powi(3) * start_x
                + 3.0 * mt.powi(2) * t * cp1_x
                + 3.0 * mt * t.powi(2) * cp2_x
                + t.powi(3) * x;
            let py = mt.powi(3) * start_y
                + 3.0 * mt.powi(2) * t * cp1_y
                + 3.0 * mt * t.powi(2) * cp2_y
                + t.powi(3) * y;

            let move_event = DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MouseMoved)
                .x(px)
                .y(py)
                .button(MouseButton::None)
                .build()
                .unwrap();
            if let Err(e) = self.page.execute(move_event).await {
                return Err(DriverError::EvaluationFailed(format!("mouse move failed: {}", e)));
            }

            // Ease in/out: fastest mid-path.
            let speed = 1.0 - (2.0 * t - 1.0).abs();
            let delay = (8.0 + 12.0 * (1.0 - speed) + rng.gen_range(0.0..5.0)) as u64;
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        Ok(())
    }

    async fn wheel(&self, delta_x: f64, delta_y: f64) -> Result<(), DriverError> {
        let scroll = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(400.0)
            .y(300.0)
            .button(MouseButton::None)
            .delta_x(delta_x)
            .delta_y(delta_y)
            .build()
            .unwrap();

        self.page
            .execute(scroll)
            .await
            .map_err(|e| DriverError::EvaluationFailed(format!("wheel failed: {}", e)))?;
        Ok(())
    }

    async fn type_char(&self, c: char) -> Result<(), DriverError> {
        let key_down = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyDown)
            .text(c.to_string())
            .build()
            .unwrap();
        self.page
            .execute(key_down)
            .await
            .map_err(|e| DriverError::EvaluationFailed(format!("keyDown failed: {}", e)))?;

        let key_up = DispatchKeyEventParams::builder()
            .r#type(DispatchKeyEventType::KeyUp)
            .build()
            .unwrap();
        self.page
            .execute(key_up)
            .await
            .map_err(|e| DriverError::EvaluationFailed(format!("keyUp failed: {}", e)))?;

        Ok(())
    }

    async fn page_count(&self) -> Result<usize, DriverError> {
        let browser = self.browser.lock().await;
        let browser = browser
            .as_ref()
            .ok_or_else(|| DriverError::ConnectionLost("session already closed".into()))?;

        let pages = browser
            .pages()
            .await
            .map_err(|e| DriverError::ConnectionLost(e.to_string()))?;
        Ok(pages.len())
    }

    async fn close_extra_pages(&self) -> Result<(), DriverError> {
        let pages = {
            let browser = self.browser.lock().await;
            let browser = browser
                .as_ref()
                .ok_or_else(|| DriverError::ConnectionLost("session already closed".into()))?;
            browser
                .pages()
                .await
                .map_err(|e| DriverError::ConnectionLost(e.to_string()))?
        };

        for page in pages {
            if *page.target_id() != self.main_target {
                debug!("{} closing secondary tab", self.id);
                let _ = page.close().await;
            }
        }

        Ok(())
    }

    async fn export_storage(&self) -> Result<Value, DriverError> {
        let resp = self
            .page
            .execute(GetCookiesParams::default())
            .await
            .map_err(|e| DriverError::EvaluationFailed(format!("cookie export failed: {}", e)))?;

        let cookies: Vec<CookieParam> = resp
            .result
            .cookies
            .iter()
            .filter_map(|c| {
                let mut builder = CookieParam::builder()
                    .name(c.name.as_str())
                    .value(c.value.as_str())
                    .domain(c.domain.as_str())
                    .path(c.path.as_str())
                    .secure(c.secure)
                    .http_only(c.http_only);
                if let Some(same_site) = c.same_site.clone() {
                    builder = builder.same_site(same_site);
                }
                builder.build().ok()
            })
            .collect();

        let origins = match self.page.evaluate(LOCAL_STORAGE_SNAPSHOT_JS).await {
            Ok(result) => result
                .into_value::<OriginState>()
                .ok()
                .filter(|o| !o.entries.is_empty())
                .map(|o| vec![o])
                .unwrap_or_default(),
            Err(e) => {
                debug!("{} local storage snapshot unavailable: {}", self.id, e);
                Vec::new()
            }
        };

        serde_json::to_value(StorageState { cookies, origins })
            .map_err(|e| DriverError::EvaluationFailed(e.to_string()))
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.alive.store(false, Ordering::Relaxed);

        let _ = self.page.clone().close().await;

        if let Some(mut browser) = self.browser.lock().await.take() {
            // Graceful close first, then force kill so no Chrome child
            // processes linger.
            let _ = browser.close().await;
            tokio::time::sleep(Duration::from_millis(500)).await;
            let _ = browser.kill().await;
        }

        info!("{} closed", self.id);
        Ok(())
    }
}

const LOCAL_STORAGE_SNAPSHOT_JS: &str = r#"(() => {
    const entries = {};
    try {
        for (let i = 0; i < localStorage.length; i++) {
            const key = localStorage.key(i);
            entries[key] = localStorage.getItem(key);
        }
    } catch (e) {}
    return { origin: window.location.origin, entries };
})()"#;

/// Element handle backed by a CDP remote object.
struct CdpElement {
    inner: Element,
    page: Page,
}

impl CdpElement {
    async fn js_bool(&self, function: &str) -> Result<bool, DriverError> {
        let ret = self
            .inner
            .call_js_fn(function, false)
            .await
            .map_err(|e| DriverError::ElementGone(e.to_string()))?;
        Ok(ret.result.value.as_ref().and_then(|v| v.as_bool()).unwrap_or(false))
    }
}

#[async_trait]
impl PageElement for CdpElement {
    async fn is_visible(&self) -> Result<bool, DriverError> {
        self.js_bool(
            r#"function() {
                const rect = this.getBoundingClientRect();
                if (rect.width <= 0 || rect.height <= 0) return false;
                const style = window.getComputedStyle(this);
                return style.visibility !== 'hidden' && style.display !== 'none' && style.opacity !== '0';
            }"#,
        )
        .await
    }

    async fn is_enabled(&self) -> Result<bool, DriverError> {
        self.js_bool(
            r#"function() {
                return !(this.disabled || this.getAttribute('aria-disabled') === 'true');
            }"#,
        )
        .await
    }

    async fn pointer_events_disabled(&self) -> Result<bool, DriverError> {
        self.js_bool(
            r#"function() {
                return window.getComputedStyle(this).pointerEvents === 'none';
            }"#,
        )
        .await
    }

    async fn is_occluded(&self) -> Result<bool, DriverError> {
        self.js_bool(
            r#"function() {
                const rect = this.getBoundingClientRect();
                const top = document.elementFromPoint(rect.x + rect.width / 2, rect.y + rect.height / 2);
                return top !== this;
            }"#,
        )
        .await
    }

    async fn bounding_box(&self) -> Result<Option<BoundingBox>, DriverError> {
        let ret = self
            .inner
            .call_js_fn(
                r#"function() {
                    const rect = this.getBoundingClientRect();
                    if (rect.width === 0 && rect.height === 0) return null;
                    return { x: rect.x, y: rect.y, width: rect.width, height: rect.height };
                }"#,
                false,
            )
            .await
            .map_err(|e| DriverError::ElementGone(e.to_string()))?;

        let Some(value) = ret.result.value else { return Ok(None) };
        if value.is_null() {
            return Ok(None);
        }

        let get = |key: &str| value.get(key).and_then(|v| v.as_f64()).unwrap_or(0.0);
        Ok(Some(BoundingBox {
            x: get("x"),
            y: get("y"),
            width: get("width"),
            height: get("height"),
        }))
    }

    async fn tag_name(&self) -> Result<String, DriverError> {
        let ret = self
            .inner
            .call_js_fn("function() { return this.tagName; }", false)
            .await
            .map_err(|e| DriverError::ElementGone(e.to_string()))?;
        Ok(ret
            .result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn inner_text(&self) -> Result<String, DriverError> {
        let text = self
            .inner
            .inner_text()
            .await
            .map_err(|e| DriverError::ElementGone(e.to_string()))?;
        Ok(text.unwrap_or_default())
    }

    async fn scroll_into_view(&self) -> Result<(), DriverError> {
        self.inner
            .scroll_into_view()
            .await
            .map_err(|e| DriverError::ElementGone(e.to_string()))?;
        Ok(())
    }

    async fn hover(&self) -> Result<(), DriverError> {
        let point = self
            .inner
            .clickable_point()
            .await
            .map_err(|e| DriverError::ElementGone(e.to_string()))?;

        let move_event = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(point.x)
            .y(point.y)
            .button(MouseButton::None)
            .build()
            .unwrap();
        self.page
            .execute(move_event)
            .await
            .map_err(|e| DriverError::EvaluationFailed(format!("hover failed: {}", e)))?;

        Ok(())
    }

    async fn click(&self) -> Result<(), DriverError> {
        self.inner
            .click()
            .await
            .map_err(|e| DriverError::ElementGone(e.to_string()))?;
        Ok(())
    }
}
