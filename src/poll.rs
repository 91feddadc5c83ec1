//! Availability loop
//!
//! Configure the page once, then repeat: select a slot and click "Book Now".
//! A no-slot outcome reloads the page (after the backoff delay) and
//! re-applies party size and date; anything else ends the loop.

use std::fmt;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::actions::PageActions;
use crate::config::{BookingRequest, RetryPolicy, Timeouts};
use crate::driver::PageDriver;
use crate::error::{Error, Result};

pub use crate::error::AttemptOutcome;

/// How the loop ended
#[derive(Debug)]
pub enum Terminal {
    /// "Book Now" was clicked; checkout is up to the human
    Booked,
    /// An action failed for a reason other than availability
    Fatal(Error),
    /// The retry budget ran out while the permit stayed unavailable
    GaveUp { reason: String },
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Booked => write!(f, "booked"),
            Terminal::Fatal(e) => write!(f, "failed: {}", e),
            Terminal::GaveUp { reason } => write!(f, "gave up: {}", reason),
        }
    }
}

/// Summary of one loop run
#[derive(Debug)]
pub struct LoopReport {
    pub terminal: Terminal,
    /// Attempts made (select slot + book)
    pub iterations: u32,
    /// Reloads performed after a no-slot outcome
    pub reloads: u32,
    pub elapsed: Duration,
}

impl LoopReport {
    pub fn is_booked(&self) -> bool {
        matches!(self.terminal, Terminal::Booked)
    }

    /// One-line status for the console
    pub fn summary(&self) -> String {
        format!(
            "{} after {} attempt(s), {} reload(s) in {:.2}s",
            self.terminal,
            self.iterations,
            self.reloads,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Drives the configure / attempt / reload cycle against one page
pub struct PollLoop<'a, D: PageDriver> {
    driver: &'a D,
    request: BookingRequest,
    url: String,
    timeouts: Timeouts,
    retry: RetryPolicy,
}

impl<'a, D: PageDriver> PollLoop<'a, D> {
    pub fn new(
        driver: &'a D,
        request: BookingRequest,
        url: impl Into<String>,
        timeouts: Timeouts,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            driver,
            request,
            url: url.into(),
            timeouts,
            retry,
        }
    }

    fn actions(&self) -> PageActions<'_, D> {
        PageActions::new(self.driver, &self.request, self.timeouts)
    }

    /// Load the availability page and apply party size and date
    pub async fn prepare(&self) -> Result<()> {
        self.driver.navigate(&self.url).await?;
        let actions = self.actions();
        actions.wait_for_app().await?;
        actions.apply_filters().await
    }

    /// One iteration: select a slot, then click "Book Now"
    pub async fn attempt(&self) -> Result<()> {
        let actions = self.actions();
        actions.select_slot().await?;
        actions.click_book_now().await
    }

    /// Full navigation back to the availability page, then re-apply filters
    pub async fn reload_and_reconfigure(&self) -> Result<()> {
        tracing::debug!("Reloading {}", self.url);
        self.prepare().await
    }

    /// Prepare the page and poll until booked, failed, or out of budget
    pub async fn run(&self) -> LoopReport {
        let start = Instant::now();

        if let Err(e) = self.prepare().await {
            tracing::error!("Initial page setup failed: {}", e);
            return LoopReport {
                terminal: Terminal::Fatal(e),
                iterations: 0,
                reloads: 0,
                elapsed: start.elapsed(),
            };
        }

        self.poll(start).await
    }

    /// Poll an already prepared page
    pub async fn poll(&self, start: Instant) -> LoopReport {
        let mut iterations = 0u32;
        let mut reloads = 0u32;

        tracing::info!(
            "Polling '{}' on {} for a party of {}",
            self.request.permit_name,
            self.request.date_iso(),
            self.request.party_size
        );

        let terminal = loop {
            iterations += 1;
            let iteration_start = Instant::now();

            let step = self.step(iterations, &mut reloads, start).await;

            tracing::info!(
                "Iteration {} completed in {:.2}s",
                iterations,
                iteration_start.elapsed().as_secs_f64()
            );

            if let Some(terminal) = step {
                break terminal;
            }
        };

        LoopReport {
            terminal,
            iterations,
            reloads,
            elapsed: start.elapsed(),
        }
    }

    /// One pass through the loop body; `Some` ends the loop
    async fn step(&self, iteration: u32, reloads: &mut u32, start: Instant) -> Option<Terminal> {
        let err = match self.attempt().await {
            Ok(()) => {
                tracing::info!("Booking stage reached on attempt {}", iteration);
                return Some(Terminal::Booked);
            }
            Err(e) => e,
        };

        let outcome = err.outcome();
        if outcome.is_terminal() {
            tracing::error!("Attempt {} ended the loop: {:?}", iteration, outcome);
            return Some(Terminal::Fatal(err));
        }

        tracing::info!("No reservations available, refreshing");

        if self.retry.attempts_exhausted(iteration) {
            return Some(Terminal::GaveUp {
                reason: format!("no slot after {} attempt(s)", iteration),
            });
        }

        let delay = jittered(self.retry.delay_for(*reloads), self.retry.jitter);
        if self.retry.duration_exhausted(start.elapsed() + delay) {
            return Some(Terminal::GaveUp {
                reason: format!(
                    "no slot within {:.0}s",
                    self.retry.max_duration.unwrap_or_default().as_secs_f64()
                ),
            });
        }
        if !delay.is_zero() {
            tracing::debug!("Backing off {}ms", delay.as_millis());
            tokio::time::sleep(delay).await;
        }

        if let Err(e) = self.reload_and_reconfigure().await {
            tracing::error!("Reload failed: {}", e);
            return Some(Terminal::Fatal(e));
        }
        *reloads += 1;
        None
    }
}

/// Spread `delay` by up to `fraction` either way
fn jittered(delay: Duration, fraction: f64) -> Duration {
    if delay.is_zero() || fraction <= 0.0 {
        return delay;
    }
    let fraction = fraction.min(1.0);
    let factor = rand::thread_rng().gen_range(1.0 - fraction..=1.0 + fraction);
    delay.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_stays_in_band() {
        let base = Duration::from_secs(2);
        for _ in 0..200 {
            let d = jittered(base, 0.25);
            assert!(d >= Duration::from_millis(1500) && d <= Duration::from_millis(2500));
        }
        assert_eq!(jittered(base, 0.0), base);
        assert_eq!(jittered(Duration::ZERO, 0.5), Duration::ZERO);
    }

    #[test]
    fn test_summary_line() {
        let report = LoopReport {
            terminal: Terminal::GaveUp {
                reason: "no slot after 3 attempt(s)".into(),
            },
            iterations: 3,
            reloads: 2,
            elapsed: Duration::from_millis(4250),
        };
        assert!(!report.is_booked());
        assert_eq!(
            report.summary(),
            "gave up: no slot after 3 attempt(s) after 3 attempt(s), 2 reload(s) in 4.25s"
        );
    }
}
