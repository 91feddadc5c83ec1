//! Browser Launcher
//!
//! Finds Chrome, launches it on the persisted profile with a DevTools port,
//! and hands out the tab the poller drives.

use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::cdp::{Connection, Transport};
use crate::error::{Error, Result};
use crate::page::Page;
use crate::BrowserConfig;

/// Chrome features that only add prefetch, preload, or background traffic
const DISABLED_FEATURES: &[&str] = &[
    "NetworkPrediction",
    "NoStatePrefetch",
    "Prerender2",
    "PreloadMediaEngagementData",
    "MediaRouter",
    "OptimizationHints",
    "PushMessaging",
];

/// Command line switches for a poller run
fn launch_args(config: &BrowserConfig) -> Vec<String> {
    let mut args = vec![
        format!("--user-data-dir={}", config.profile_path.display()),
        "--no-first-run".into(),
        "--no-default-browser-check".into(),
        // Fewer background requests competing with the reload loop
        "--disable-background-networking".into(),
        "--disable-component-update".into(),
        "--dns-prefetch-disable".into(),
        format!("--disable-features={}", DISABLED_FEATURES.join(",")),
        "--disable-notifications".into(),
        "--disable-remote-fonts".into(),
        "--force-prefers-reduced-motion".into(),
        "--autoplay-policy=user-gesture-required".into(),
        "--start-maximized".into(),
        format!(
            "--window-size={},{}",
            config.window_width, config.window_height
        ),
    ];

    if config.block_images {
        args.push("--blink-settings=imagesEnabled=false".into());
    }

    if config.headless {
        args.push("--headless=new".into());
    }

    args.extend(config.extra_args.iter().cloned());
    args
}

/// Find a Chrome/Chromium binary in the usual install locations
pub fn find_chrome() -> Result<PathBuf> {
    let candidates = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        vec![]
    };

    for candidate in candidates {
        let path = Path::new(candidate);
        if path.exists() {
            return Ok(path.to_path_buf());
        }
    }

    Err(Error::ChromeNotFound)
}

/// Pull the WebSocket URL out of a "DevTools listening on ws://..." line
fn devtools_url(line: &str) -> Option<String> {
    if !line.contains("DevTools listening on") {
        return None;
    }
    line.find("ws://")
        .map(|start| line[start..].trim().to_string())
}

/// Launch Chrome and wait for it to announce its DevTools endpoint
pub fn launch_chrome(path: &Path, args: &[String]) -> Result<(Child, String)> {
    let mut cmd = Command::new(path);
    cmd.args(args)
        .args(["--remote-debugging-port=0"]) // Let Chrome pick a free port
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped()); // We need stderr to get the DevTools URL

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::Launch(format!("{}: {}", path.display(), e)))?;

    let stderr = child
        .stderr
        .take()
        .ok_or(Error::Launch("No stderr from Chrome".into()))?;

    let mut lines = BufReader::new(stderr).lines();
    let mut ws_url = None;

    // Chrome prints: DevTools listening on ws://127.0.0.1:PORT/devtools/browser/GUID
    for line in lines.by_ref() {
        let Ok(line) = line else { break };
        tracing::trace!("Chrome stderr: {}", line);
        if let Some(url) = devtools_url(&line) {
            ws_url = Some(url);
            break;
        }
    }

    let Some(ws_url) = ws_url else {
        let _ = child.kill();
        return Err(Error::Launch(
            "Chrome exited without a DevTools URL (is another Chrome already using this profile?)"
                .into(),
        ));
    };

    // Keep draining stderr so a chatty Chrome never blocks on a full pipe
    std::thread::Builder::new()
        .name("chrome-stderr".into())
        .spawn(move || {
            for line in lines.map_while(std::result::Result::ok) {
                tracing::trace!("Chrome stderr: {}", line);
            }
        })
        .map_err(|e| Error::Launch(format!("Failed to spawn stderr reader: {}", e)))?;

    tracing::info!("Chrome DevTools URL: {}", ws_url);
    Ok((child, ws_url))
}

/// A Chrome instance bound to the user's profile
pub struct Browser {
    connection: Connection,
}

impl Browser {
    /// Launch Chrome on the configured profile
    ///
    /// The profile directory is used in place and never removed.
    pub async fn launch(config: BrowserConfig) -> Result<Self> {
        config.ensure_profile()?;

        let chrome_path = match &config.chrome_path {
            Some(p) => p.clone(),
            None => find_chrome()?,
        };

        let args = launch_args(&config);

        tracing::info!(
            "Launching Chrome from {:?} with profile {:?}",
            chrome_path,
            config.profile_path
        );
        let (child, ws_url) = launch_chrome(&chrome_path, &args)?;

        let transport = Transport::new(child, &ws_url)?;
        let connection = Connection::new(transport);

        let version = connection.version().await?;
        tracing::info!("Connected to Chrome: {}", version.product);

        Ok(Self { connection })
    }

    /// Open a fresh tab at about:blank
    pub async fn open_page(&self) -> Result<Page> {
        let target_id = self.connection.create_target("about:blank").await?;
        let session = self.connection.attach_to_target(&target_id).await?;
        session.page_enable().await?;
        Ok(Page::new(session))
    }

    /// Get the browser version
    pub async fn version(&self) -> Result<String> {
        let v = self.connection.version().await?;
        Ok(v.product)
    }

    /// Close the browser
    pub async fn close(self) -> Result<()> {
        self.connection.close().await
    }
}
