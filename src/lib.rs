//! # permitgrab
//!
//! Browser-driven availability poller for backcountry wilderness permits.
//!
//! permitgrab opens the permit's detailed-availability page in a real Chrome
//! bound to your logged-in profile, applies party size and date, and keeps
//! reloading until a slot for the named permit row can be selected. It then
//! clicks "Book Now" and leaves checkout to you.
//!
//! The browser is driven over a small hand-written CDP client. Page actions
//! only see the [`PageDriver`] trait, so the loop runs the same against a
//! live [`Page`] or an in-process fake.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chrono::NaiveDate;
//! use permitgrab::{Browser, BookingRequest, BrowserConfig, PollLoop, RetryPolicy, Timeouts};
//!
//! #[tokio::main]
//! async fn main() -> permitgrab::Result<()> {
//!     let request = BookingRequest::new(
//!         "445857",
//!         NaiveDate::from_ymd_opt(2026, 7, 31).unwrap(),
//!         5,
//!         "High Sierra Trail",
//!     )?;
//!
//!     let config = BrowserConfig::new("/path/to/chrome/profile");
//!     config.ensure_profile()?;
//!     let browser = Browser::launch(config).await?;
//!     let page = browser.open_page().await?;
//!
//!     let url = request.availability_url(permitgrab::config::DEFAULT_HOST);
//!     let poll = PollLoop::new(&page, request, url, Timeouts::default(), RetryPolicy::default());
//!     let report = poll.run().await;
//!     println!("{}", report.summary());
//!
//!     browser.close().await?;
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod browser;
pub mod cdp;
pub mod config;
pub mod driver;
pub mod error;
pub mod page;
pub mod poll;

use std::path::{Path, PathBuf};

// Re-exports
pub use actions::PageActions;
pub use browser::Browser;
pub use config::{Backoff, BookingRequest, FileConfig, RetryPolicy, Settings, Timeouts};
pub use driver::{Locator, PageDriver};
pub use error::{AttemptOutcome, Error, Result};
pub use page::{Page, RemoteElement};
pub use poll::{LoopReport, PollLoop, Terminal};

/// Configuration for launching Chrome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserConfig {
    /// Persisted user data directory holding the logged-in session
    pub profile_path: PathBuf,
    /// Path to Chrome/Chromium binary (None = search well-known locations)
    pub chrome_path: Option<PathBuf>,
    /// Headless mode
    pub headless: bool,
    /// Skip image downloads
    pub block_images: bool,
    /// Window width
    pub window_width: u32,
    /// Window height
    pub window_height: u32,
    /// Additional command line switches
    pub extra_args: Vec<String>,
}

impl BrowserConfig {
    /// Visible browser on the given profile with images blocked
    pub fn new(profile_path: impl AsRef<Path>) -> Self {
        Self {
            profile_path: profile_path.as_ref().to_path_buf(),
            chrome_path: None,
            headless: false,
            block_images: true,
            window_width: 1920,
            window_height: 1080,
            extra_args: Vec::new(),
        }
    }

    /// Fail fast when the profile directory is missing or is not a directory
    pub fn ensure_profile(&self) -> Result<()> {
        if !self.profile_path.exists() {
            return Err(Error::ProfileNotFound(self.profile_path.clone()));
        }
        if !self.profile_path.is_dir() {
            return Err(Error::ProfileNotADirectory(self.profile_path.clone()));
        }
        Ok(())
    }
}
