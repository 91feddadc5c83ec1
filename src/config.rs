//! Startup configuration
//!
//! Everything the loop needs is fixed before the browser starts: the booking
//! request, wait bounds, the retry policy, and the browser launch options.
//! Values come from an optional TOML file layered under command-line options.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::BrowserConfig;

/// Host the availability page is served from
pub const DEFAULT_HOST: &str = "www.recreation.gov";

/// The permit, date, and party the loop pursues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub permit_id: String,
    pub target_date: NaiveDate,
    pub party_size: NonZeroU32,
    /// Display name of the permit row, e.g. "High Sierra Trail"
    pub permit_name: String,
}

impl BookingRequest {
    pub fn new(
        permit_id: impl Into<String>,
        target_date: NaiveDate,
        party_size: u32,
        permit_name: impl Into<String>,
    ) -> Result<Self> {
        let permit_id = permit_id.into();
        let permit_name = permit_name.into();

        if permit_id.trim().is_empty() {
            return Err(Error::Config("permit_id must not be empty".into()));
        }
        if !permit_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Config(format!(
                "permit_id must be alphanumeric, got '{}'",
                permit_id
            )));
        }
        if permit_name.trim().is_empty() {
            return Err(Error::Config("permit_name must not be empty".into()));
        }
        let party_size = NonZeroU32::new(party_size)
            .ok_or_else(|| Error::Config("party_size must be a positive integer".into()))?;

        Ok(Self {
            permit_id,
            target_date,
            party_size,
            permit_name: permit_name.trim().to_string(),
        })
    }

    /// Detailed-availability URL for this request
    pub fn availability_url(&self, host: &str) -> String {
        format!(
            "https://{}/permits/{}/registration/detailed-availability?date={}&type=overnight-permit",
            host,
            self.permit_id,
            self.date_iso()
        )
    }

    /// Target date as `YYYY-MM-DD`, the format of the hidden date field
    pub fn date_iso(&self) -> String {
        self.target_date.format("%Y-%m-%d").to_string()
    }

    /// Accessible label of the calendar day cell, e.g. "Friday, July 31, 2026"
    pub fn day_label(&self) -> String {
        self.target_date.format("%A, %B %-d, %Y").to_string()
    }

    /// Calendar month heading, e.g. "July 2026"
    pub fn month_label(&self) -> String {
        self.target_date.format("%B %Y").to_string()
    }
}

/// Bounds for every wait the page actions perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Application root after a navigation
    pub app: Duration,
    /// Controls such as the guest counter and date toggle
    pub control: Duration,
    /// Availability grid and permit row
    pub grid: Duration,
    /// Read-back confirmation after an interaction
    pub confirm: Duration,
    /// Delay between polls inside a wait
    pub poll_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            app: Duration::from_secs(30),
            control: Duration::from_secs(15),
            grid: Duration::from_secs(20),
            confirm: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Delay schedule between a no-slot outcome and the next reload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Reload immediately
    None,
    /// Same delay every time
    Fixed(Duration),
    /// `initial * factor^n`, capped at `max`
    Exponential {
        initial: Duration,
        max: Duration,
        factor: f64,
    },
}

/// Admission control for the availability loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub backoff: Backoff,
    /// Fraction of the delay added or removed at random (0.0 disables)
    pub jitter: f64,
    /// Give up after this many iterations
    pub max_attempts: Option<u32>,
    /// Give up once this much wall-clock time has passed
    pub max_duration: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::Fixed(Duration::from_secs(2)),
            jitter: 0.2,
            max_attempts: None,
            max_duration: None,
        }
    }
}

impl RetryPolicy {
    /// Reload as fast as the page allows, forever
    pub fn unbounded() -> Self {
        Self {
            backoff: Backoff::None,
            jitter: 0.0,
            max_attempts: None,
            max_duration: None,
        }
    }

    /// Delay before the `reload`-th reload (0-based), before jitter
    pub fn delay_for(&self, reload: u32) -> Duration {
        match self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => d,
            Backoff::Exponential {
                initial,
                max,
                factor,
            } => {
                let scaled = initial.as_secs_f64() * factor.max(1.0).powi(reload.min(64) as i32);
                if !scaled.is_finite() || scaled >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(scaled)
                }
            }
        }
    }

    /// Whether `attempts` iterations have used up the attempt budget
    pub fn attempts_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Whether `elapsed` has used up the time budget
    pub fn duration_exhausted(&self, elapsed: Duration) -> bool {
        self.max_duration.is_some_and(|max| elapsed >= max)
    }
}

/// Fully resolved settings for one run
#[derive(Debug, Clone)]
pub struct Settings {
    pub request: BookingRequest,
    pub browser: BrowserConfig,
    pub retry: RetryPolicy,
    pub timeouts: Timeouts,
    pub host: String,
}

impl Settings {
    /// Availability URL for the configured request and host
    pub fn url(&self) -> String {
        self.request.availability_url(&self.host)
    }
}

/// `[booking]` table
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BookingSection {
    pub permit_id: Option<String>,
    pub target_date: Option<NaiveDate>,
    pub party_size: Option<u32>,
    pub permit_name: Option<String>,
}

/// `[browser]` table
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BrowserSection {
    pub profile: Option<PathBuf>,
    pub chrome_path: Option<PathBuf>,
    pub headless: Option<bool>,
    pub block_images: Option<bool>,
    pub host: Option<String>,
}

/// `[retry]` table
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub backoff_ms: Option<u64>,
    pub exponential: Option<bool>,
    pub max_backoff_ms: Option<u64>,
    pub jitter: Option<f64>,
    pub max_attempts: Option<u32>,
    pub max_duration_secs: Option<u64>,
}

/// `[timeouts]` table, all in milliseconds
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSection {
    pub app_ms: Option<u64>,
    pub control_ms: Option<u64>,
    pub grid_ms: Option<u64>,
    pub confirm_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

/// Partial configuration as read from a file or the command line
///
/// Layers are combined with [`FileConfig::merge`]; the result is checked and
/// turned into [`Settings`] by [`FileConfig::resolve`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub booking: BookingSection,
    pub browser: BrowserSection,
    pub retry: RetrySection,
    pub timeouts: TimeoutSection,
}

macro_rules! overlay {
    ($base:expr, $top:expr, $($field:ident),+) => {
        $( if $top.$field.is_some() { $base.$field = $top.$field; } )+
    };
}

impl FileConfig {
    /// Parse a TOML document
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    /// Layer `top` over `self`; any value set in `top` wins
    pub fn merge(mut self, top: FileConfig) -> Self {
        overlay!(
            self.booking,
            top.booking,
            permit_id,
            target_date,
            party_size,
            permit_name
        );
        overlay!(
            self.browser,
            top.browser,
            profile,
            chrome_path,
            headless,
            block_images,
            host
        );
        overlay!(
            self.retry,
            top.retry,
            backoff_ms,
            exponential,
            max_backoff_ms,
            jitter,
            max_attempts,
            max_duration_secs
        );
        overlay!(
            self.timeouts,
            top.timeouts,
            app_ms,
            control_ms,
            grid_ms,
            confirm_ms,
            poll_interval_ms
        );
        self
    }

    /// Check required values and build the run settings
    pub fn resolve(self) -> Result<Settings> {
        let b = self.booking;
        let missing = |name: &str| Error::Config(format!("missing required option '{}'", name));

        let request = BookingRequest::new(
            b.permit_id.ok_or_else(|| missing("permit_id"))?,
            b.target_date.ok_or_else(|| missing("target_date"))?,
            b.party_size.ok_or_else(|| missing("party_size"))?,
            b.permit_name.ok_or_else(|| missing("permit_name"))?,
        )?;

        let profile_path = self.browser.profile.ok_or_else(|| missing("profile_path"))?;
        let defaults = BrowserConfig::new(&profile_path);
        let browser = BrowserConfig {
            chrome_path: self.browser.chrome_path,
            headless: self.browser.headless.unwrap_or(defaults.headless),
            block_images: self.browser.block_images.unwrap_or(defaults.block_images),
            ..defaults
        };

        let host = self
            .browser
            .host
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        Ok(Settings {
            request,
            browser,
            retry: resolve_retry(self.retry)?,
            timeouts: resolve_timeouts(self.timeouts),
            host,
        })
    }
}

fn resolve_retry(r: RetrySection) -> Result<RetryPolicy> {
    let defaults = RetryPolicy::default();

    let backoff = match (r.backoff_ms, r.exponential.unwrap_or(false)) {
        (None, false) => defaults.backoff,
        (Some(0), false) => Backoff::None,
        (Some(ms), false) => Backoff::Fixed(Duration::from_millis(ms)),
        (initial, true) => Backoff::Exponential {
            initial: Duration::from_millis(initial.unwrap_or(2_000).max(1)),
            max: Duration::from_millis(r.max_backoff_ms.unwrap_or(60_000)),
            factor: 2.0,
        },
    };

    let jitter = r.jitter.unwrap_or(defaults.jitter);
    if !(0.0..=1.0).contains(&jitter) {
        return Err(Error::Config(format!(
            "jitter must be between 0 and 1, got {}",
            jitter
        )));
    }
    if r.max_attempts == Some(0) {
        return Err(Error::Config("max_attempts must be at least 1".into()));
    }

    Ok(RetryPolicy {
        backoff,
        jitter,
        max_attempts: r.max_attempts,
        max_duration: r.max_duration_secs.map(Duration::from_secs),
    })
}

fn resolve_timeouts(t: TimeoutSection) -> Timeouts {
    let d = Timeouts::default();
    let ms = |v: Option<u64>, fallback: Duration| v.map(Duration::from_millis).unwrap_or(fallback);
    Timeouts {
        app: ms(t.app_ms, d.app),
        control: ms(t.control_ms, d.control),
        grid: ms(t.grid_ms, d.grid),
        confirm: ms(t.confirm_ms, d.confirm),
        poll_interval: ms(t.poll_interval_ms, d.poll_interval),
    }
}
