//! Device/browser identity profiles
//!
//! A hand-curated pool of fingerprint profiles, one drawn at random per
//! session. The pool is static and never empty, so drawing has no error path.

use once_cell::sync::Lazy;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Operating-system family a profile claims to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OsType {
    Windows,
    Linux,
    Mac,
    Ios,
    Android,
}

impl OsType {
    /// Whether sessions with this profile emulate a mobile viewport.
    pub fn is_mobile(self) -> bool {
        matches!(self, OsType::Ios | OsType::Android)
    }

    /// The `navigator.platform` string reported for this family.
    pub fn platform(self) -> &'static str {
        match self {
            OsType::Windows => "Win32",
            OsType::Linux => "Linux x86_64",
            OsType::Mac => "MacIntel",
            OsType::Ios => "iPhone",
            OsType::Android => "Linux armv8l",
        }
    }
}

/// Viewport dimensions in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

/// Geographic coordinates for the geolocation override.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// One complete identity profile, copied by value into each worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_agent: String,
    pub os_type: OsType,
    /// IANA timezone name, e.g. "Europe/Berlin".
    pub timezone: String,
    pub screen: ScreenSize,
    pub geolocation: GeoPoint,
}

static BUILTIN: Lazy<IdentityPool> = Lazy::new(|| {
    IdentityPool {
        profiles: vec![
            Identity {
                user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/98.0.4758.102 Safari/537.36"
                    .to_string(),
                os_type: OsType::Windows,
                timezone: "America/New_York".to_string(),
                screen: ScreenSize { width: 1920, height: 1080 },
                geolocation: GeoPoint { latitude: 40.7128, longitude: -74.0060 },
            },
            Identity {
                user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/94.0.4606.61 Safari/537.36"
                    .to_string(),
                os_type: OsType::Linux,
                timezone: "Europe/Berlin".to_string(),
                screen: ScreenSize { width: 1366, height: 768 },
                geolocation: GeoPoint { latitude: 52.5200, longitude: 13.4050 },
            },
            Identity {
                user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/96.0.4664.110 Safari/537.36"
                    .to_string(),
                os_type: OsType::Mac,
                timezone: "Europe/London".to_string(),
                screen: ScreenSize { width: 1440, height: 900 },
                geolocation: GeoPoint { latitude: 51.5074, longitude: -0.1278 },
            },
            Identity {
                user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/537.36"
                    .to_string(),
                os_type: OsType::Ios,
                timezone: "America/Los_Angeles".to_string(),
                screen: ScreenSize { width: 375, height: 812 },
                geolocation: GeoPoint { latitude: 34.0522, longitude: -118.2437 },
            },
            Identity {
                user_agent: "Mozilla/5.0 (Linux; Android 10; SM-G975F) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/91.0.4472.164 Mobile Safari/537.36"
                    .to_string(),
                os_type: OsType::Android,
                timezone: "Asia/Tokyo".to_string(),
                screen: ScreenSize { width: 414, height: 896 },
                geolocation: GeoPoint { latitude: 35.6895, longitude: 139.6917 },
            },
            Identity {
                user_agent: "Mozilla/5.0 (Linux; Android 11; Pixel 4) AppleWebKit/537.36 \
                             (KHTML, like Gecko) Chrome/90.0.4430.210 Mobile Safari/537.36"
                    .to_string(),
                os_type: OsType::Android,
                timezone: "Asia/Hong_Kong".to_string(),
                screen: ScreenSize { width: 414, height: 896 },
                geolocation: GeoPoint { latitude: 22.3193, longitude: 114.1694 },
            },
        ],
    }
});

/// Fixed set of identity profiles with uniform random draw.
pub struct IdentityPool {
    profiles: Vec<Identity>,
}

impl IdentityPool {
    /// The built-in pool, at least one profile per supported OS family.
    pub fn builtin() -> &'static IdentityPool {
        &BUILTIN
    }

    /// Uniform draw with replacement. The pool is never empty by
    /// construction, so this cannot fail.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Identity {
        self.profiles[rng.gen_range(0..self.profiles.len())].clone()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
