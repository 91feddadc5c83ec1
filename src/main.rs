//! permitgrab command line
//!
//! Run with: permitgrab --config permit.toml
//! Or: permitgrab --permit-id 445857 --date 2026-07-31 --party-size 5 \
//!         --permit-name "High Sierra Trail" --profile ~/.config/permitgrab/chrome

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use permitgrab::config::{BookingSection, BrowserSection, RetrySection};
use permitgrab::{Browser, FileConfig, LoopReport, PollLoop, Settings};

/// Poll recreation.gov until a wilderness permit slot opens, then stop at checkout.
#[derive(Parser, Debug)]
#[command(name = "permitgrab", version, about)]
struct Cli {
    /// TOML file with [booking], [browser], [retry], and [timeouts] tables
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Permit identifier from the permit's URL
    #[arg(long, env = "PERMITGRAB_PERMIT_ID")]
    permit_id: Option<String>,

    /// Entry date (YYYY-MM-DD)
    #[arg(long, env = "PERMITGRAB_DATE")]
    date: Option<NaiveDate>,

    /// Number of people in the group
    #[arg(long, env = "PERMITGRAB_PARTY_SIZE")]
    party_size: Option<u32>,

    /// Exact row name in the availability grid, e.g. "High Sierra Trail"
    #[arg(long, env = "PERMITGRAB_PERMIT_NAME")]
    permit_name: Option<String>,

    /// Chrome user data directory holding a logged-in session
    #[arg(long, env = "PERMITGRAB_PROFILE", value_name = "PATH")]
    profile: Option<PathBuf>,

    /// Site host
    #[arg(long)]
    host: Option<String>,

    /// Chrome/Chromium binary (default: search well-known locations)
    #[arg(long, value_name = "PATH")]
    chrome: Option<PathBuf>,

    /// Run Chrome headless (checkout then has to happen elsewhere)
    #[arg(long)]
    headless: bool,

    /// Load images (blocked by default)
    #[arg(long)]
    show_images: bool,

    /// Delay before each reload, in milliseconds (0 reloads immediately)
    #[arg(long, value_name = "MS")]
    backoff_ms: Option<u64>,

    /// Double the reload delay each time, up to --max-backoff-ms
    #[arg(long)]
    exponential: bool,

    /// Cap for exponential backoff, in milliseconds
    #[arg(long, value_name = "MS")]
    max_backoff_ms: Option<u64>,

    /// Give up after this many attempts
    #[arg(long, value_name = "N")]
    max_attempts: Option<u32>,

    /// Give up after this many seconds
    #[arg(long, value_name = "S")]
    max_duration_secs: Option<u64>,

    /// Close the browser without waiting for Enter
    #[arg(long)]
    no_wait: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Command line values as the top configuration layer
    fn overlay(&self) -> FileConfig {
        FileConfig {
            booking: BookingSection {
                permit_id: self.permit_id.clone(),
                target_date: self.date,
                party_size: self.party_size,
                permit_name: self.permit_name.clone(),
            },
            browser: BrowserSection {
                profile: self.profile.clone(),
                chrome_path: self.chrome.clone(),
                headless: self.headless.then_some(true),
                block_images: self.show_images.then_some(false),
                host: self.host.clone(),
            },
            retry: RetrySection {
                backoff_ms: self.backoff_ms,
                exponential: self.exponential.then_some(true),
                max_backoff_ms: self.max_backoff_ms,
                max_attempts: self.max_attempts,
                max_duration_secs: self.max_duration_secs,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn settings(&self) -> permitgrab::Result<Settings> {
        let base = match &self.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        base.merge(self.overlay()).resolve()
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "permitgrab=debug" } else { "permitgrab=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn wait_for_enter() -> anyhow::Result<()> {
    println!("Press Enter to close the browser...");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("reading stdin")?;
    Ok(())
}

async fn run(settings: Settings, no_wait: bool) -> anyhow::Result<LoopReport> {
    let url = settings.url();
    println!(
        "[permitgrab] '{}' on {} for a party of {}",
        settings.request.permit_name,
        settings.request.date_iso(),
        settings.request.party_size
    );
    println!("[permitgrab] {}", url);

    let browser = Browser::launch(settings.browser.clone())
        .await
        .context("launching Chrome")?;
    let page = browser.open_page().await.context("opening a tab")?;

    let poll = PollLoop::new(
        &page,
        settings.request.clone(),
        url,
        settings.timeouts,
        settings.retry,
    );
    let report = poll.run().await;
    println!("[permitgrab] {}", report.summary());

    if let Err(e) = page.bring_to_front().await {
        tracing::debug!("Could not raise the tab: {}", e);
    }

    if !no_wait {
        tracing::info!("Leaving browser open for checkout");
        wait_for_enter().await?;
    }

    browser.close().await.context("closing Chrome")?;
    Ok(report)
}

/// A run that reached a terminal outcome was confirmed and closed, whatever
/// the outcome; only a session that never got that far exits non-zero
fn exit_code(run: &anyhow::Result<LoopReport>) -> ExitCode {
    match run {
        Ok(report) => {
            tracing::debug!("Exiting after {}", report.terminal);
            ExitCode::SUCCESS
        }
        Err(_) => ExitCode::from(1),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = match cli.settings() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            return ExitCode::from(2);
        }
    };

    // Fail before any browser starts
    if let Err(e) = settings.browser.ensure_profile() {
        eprintln!("ERROR: {}", e);
        return ExitCode::from(1);
    }

    let outcome = run(settings, cli.no_wait).await;
    if let Err(e) = &outcome {
        eprintln!("ERROR: {:#}", e);
    }
    exit_code(&outcome)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use permitgrab::{Error, Terminal};

    use super::*;

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig::parse(
            r#"
            [booking]
            permit_id = "445857"
            target_date = "2026-07-30"
            party_size = 4
            permit_name = "High Sierra Trail"

            [browser]
            profile = "/tmp/profile"
            "#,
        )
        .unwrap();

        let cli = Cli::parse_from([
            "permitgrab",
            "--date",
            "2026-07-31",
            "--party-size",
            "5",
            "--max-attempts",
            "10",
        ]);
        let settings = file.merge(cli.overlay()).resolve().unwrap();

        assert_eq!(settings.request.permit_id, "445857");
        assert_eq!(settings.request.date_iso(), "2026-07-31");
        assert_eq!(settings.request.party_size.get(), 5);
        assert_eq!(settings.retry.max_attempts, Some(10));
        assert!(settings.browser.block_images);
        assert!(!settings.browser.headless);
    }

    fn report(terminal: Terminal) -> LoopReport {
        LoopReport {
            terminal,
            iterations: 1,
            reloads: 0,
            elapsed: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_every_terminal_outcome_exits_zero() {
        let fatal = Ok(report(Terminal::Fatal(Error::ActionFailed("detached".into()))));
        assert_eq!(exit_code(&fatal), ExitCode::SUCCESS);

        let gave_up = Ok(report(Terminal::GaveUp {
            reason: "no slot after 3 attempt(s)".into(),
        }));
        assert_eq!(exit_code(&gave_up), ExitCode::SUCCESS);

        assert_eq!(exit_code(&Ok(report(Terminal::Booked))), ExitCode::SUCCESS);
    }

    #[test]
    fn test_session_failure_exits_one() {
        let failed: anyhow::Result<LoopReport> = Err(anyhow::anyhow!("launching Chrome"));
        assert_eq!(exit_code(&failed), ExitCode::from(1));
    }
}
