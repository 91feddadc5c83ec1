//! Page actions for the detailed-availability page
//!
//! Each action drives one UI element and confirms the result by reading it
//! back. Actions return [`Error::NoSlotAvailable`] only from
//! [`PageActions::select_slot`]; every other failure is terminal for the loop.

pub mod selectors;

use std::cmp::Ordering;

use chrono::{Datelike, NaiveDate};

use crate::config::{BookingRequest, Timeouts};
use crate::driver::{poll_until, wait_for, wait_for_clickable, PageDriver, Wait};
use crate::error::{Error, Result};

/// Actions bound to one page and one booking request
pub struct PageActions<'a, D: PageDriver> {
    driver: &'a D,
    request: &'a BookingRequest,
    timeouts: Timeouts,
}

impl<'a, D: PageDriver> PageActions<'a, D> {
    pub fn new(driver: &'a D, request: &'a BookingRequest, timeouts: Timeouts) -> Self {
        Self {
            driver,
            request,
            timeouts,
        }
    }

    fn wait(&self, timeout: std::time::Duration) -> Wait {
        Wait::new(timeout, self.timeouts.poll_interval)
    }

    /// Wait for the single-page app root to mount
    pub async fn wait_for_app(&self) -> Result<()> {
        wait_for(
            self.driver,
            None,
            &selectors::app_root(),
            self.wait(self.timeouts.app),
        )
        .await?;
        tracing::debug!("Application root is present");
        Ok(())
    }

    /// Apply party size then date
    pub async fn apply_filters(&self) -> Result<()> {
        self.set_party_size().await?;
        self.set_date().await
    }

    /// Raise the group size to the requested party size
    ///
    /// The counter only has an increment control, so an applied value above
    /// the target fails with [`Error::UnsupportedDecrease`] before anything is
    /// clicked.
    pub async fn set_party_size(&self) -> Result<()> {
        let driver = self.driver;
        let target = self.request.party_size.get();
        let control = self.wait(self.timeouts.control);

        let counter = wait_for_clickable(driver, None, &selectors::guest_counter(), control).await?;
        let applied = first_number(&driver.text(&counter).await?).unwrap_or(0);

        match applied.cmp(&target) {
            Ordering::Greater => {
                return Err(Error::UnsupportedDecrease {
                    current: applied,
                    target,
                })
            }
            Ordering::Equal => {
                tracing::debug!("Party size already {}", target);
                return Ok(());
            }
            Ordering::Less => {}
        }

        driver.click(&counter).await?;
        let popup = wait_for(driver, None, &selectors::guest_popup(), control).await?;

        let field = wait_for(driver, Some(&popup), &selectors::people_field(), control).await?;
        let raw = driver.attribute(&field, "value").await?.unwrap_or_default();
        let current = first_number(&raw).ok_or_else(|| {
            Error::ActionFailed(format!("unreadable people count '{}'", raw))
        })?;
        if current > target {
            return Err(Error::UnsupportedDecrease { current, target });
        }

        let add = wait_for_clickable(driver, Some(&popup), &selectors::add_people(), control).await?;
        for _ in current..target {
            driver.click(&add).await?;
        }

        let close =
            wait_for_clickable(driver, Some(&popup), &selectors::close_popup(), control).await?;
        driver.click(&close).await?;

        let counter_locator = selectors::guest_counter();
        let counter_locator = &counter_locator;
        poll_until(
            self.wait(self.timeouts.confirm),
            "party size confirmation",
            move || async move {
                let Some(counter) = driver.find(None, counter_locator).await? else {
                    return Ok(None);
                };
                let text = driver.text(&counter).await?;
                Ok((first_number(&text) == Some(target)).then_some(()))
            },
        )
        .await?;

        tracing::info!("Party size set to {}", target);
        Ok(())
    }

    /// Pick the target date on the calendar widget
    pub async fn set_date(&self) -> Result<()> {
        let driver = self.driver;
        let iso = self.request.date_iso();
        let control = self.wait(self.timeouts.control);

        if let Some(hidden) = driver.find(None, &selectors::date_hidden()).await? {
            if driver.attribute(&hidden, "value").await?.as_deref() == Some(iso.as_str()) {
                tracing::debug!("Date already {}", iso);
                return Ok(());
            }
        }

        let toggle = wait_for_clickable(driver, None, &selectors::date_toggle(), control).await?;
        driver.click(&toggle).await?;
        let calendar = wait_for(driver, None, &selectors::calendar(), control).await?;

        self.show_target_month(&calendar).await?;

        let label = self.request.day_label();
        let day = wait_for_clickable(
            driver,
            Some(&calendar),
            &selectors::day_cell(&label),
            self.wait(self.timeouts.confirm),
        )
        .await?;
        driver.click(&day).await?;

        let hidden_locator = selectors::date_hidden();
        let hidden_locator = &hidden_locator;
        let iso_ref = iso.as_str();
        poll_until(
            self.wait(self.timeouts.confirm),
            "date confirmation",
            move || async move {
                let Some(hidden) = driver.find(None, hidden_locator).await? else {
                    return Ok(None);
                };
                let value = driver.attribute(&hidden, "value").await?;
                Ok((value.as_deref() == Some(iso_ref)).then_some(()))
            },
        )
        .await?;

        tracing::info!("Date set to {}", iso);
        Ok(())
    }

    /// Page the calendar until its first month is the target month
    async fn show_target_month(&self, calendar: &D::Element) -> Result<()> {
        let driver = self.driver;
        let control = self.wait(self.timeouts.control);
        let target = first_of_month(self.request.target_date);
        let heading_locator = selectors::month_heading();

        for _ in 0..selectors::MAX_MONTH_STEPS {
            let heading = wait_for(driver, Some(calendar), &heading_locator, control).await?;
            let text = driver.text(&heading).await?;
            let shown = parse_month(&text).ok_or_else(|| {
                Error::ActionFailed(format!("unrecognised calendar heading '{}'", text))
            })?;

            let step = match shown.cmp(&target) {
                Ordering::Equal => return Ok(()),
                Ordering::Less => selectors::next_month(),
                Ordering::Greater => selectors::previous_month(),
            };
            let button = wait_for_clickable(driver, Some(calendar), &step, control).await?;
            driver.click(&button).await?;

            // The heading re-renders; don't read the old month twice
            let heading_locator = &heading_locator;
            let previous = text.as_str();
            poll_until(
                self.wait(self.timeouts.confirm),
                "calendar month change",
                move || async move {
                    let Some(heading) = driver.find(Some(calendar), heading_locator).await? else {
                        return Ok(None);
                    };
                    let now = driver.text(&heading).await?;
                    Ok((now != previous).then_some(()))
                },
            )
            .await?;
        }

        Err(Error::ActionFailed(format!(
            "calendar did not reach {} within {} steps",
            self.request.month_label(),
            selectors::MAX_MONTH_STEPS
        )))
    }

    /// Select the first bookable slot in the permit's row
    ///
    /// Returns [`Error::NoSlotAvailable`] when the row has no slot controls or
    /// every control is marked unavailable.
    pub async fn select_slot(&self) -> Result<()> {
        let driver = self.driver;
        let grid_wait = self.wait(self.timeouts.grid);

        let grid = wait_for(driver, None, &selectors::availability_grid(), grid_wait).await?;
        let row = wait_for(
            driver,
            Some(&grid),
            &selectors::permit_row(&self.request.permit_name),
            grid_wait,
        )
        .await?;

        let controls = driver.find_all(Some(&row), &selectors::slot_controls()).await?;
        if controls.is_empty() {
            tracing::debug!("No slot controls in row '{}'", self.request.permit_name);
            return Err(Error::no_slot(&self.request.permit_name));
        }

        let mut chosen = None;
        for (i, control) in controls.iter().enumerate() {
            let label = driver.attribute(control, "aria-label").await?.unwrap_or_default();
            if label.contains(selectors::NO_ONLINE_RESERVATIONS) {
                tracing::trace!("Slot control {} unavailable: {}", i, label);
                continue;
            }
            if driver.attribute(control, "disabled").await?.is_some() {
                tracing::trace!("Slot control {} disabled", i);
                continue;
            }
            chosen = Some(control);
            break;
        }
        let Some(slot) = chosen else {
            return Err(Error::no_slot(&self.request.permit_name));
        };

        driver.run_script(slot, selectors::SCROLL_INTO_VIEW).await?;
        match driver.click(slot).await {
            Ok(()) => {}
            Err(Error::ClickIntercepted { by, .. }) => {
                tracing::warn!("Slot click intercepted by {}, using script click", by);
                driver.run_script(slot, selectors::SCRIPT_CLICK).await?;
            }
            Err(e) => return Err(e),
        }

        let selected_locator = selectors::selected_cell();
        let selected_locator = &selected_locator;
        let row = &row;
        poll_until(
            self.wait(self.timeouts.confirm),
            "slot selection",
            move || async move { Ok(driver.find(Some(row), selected_locator).await?.map(|_| ())) },
        )
        .await?;

        tracing::info!("Selected a slot for '{}'", self.request.permit_name);
        Ok(())
    }

    /// Click "Book Now" once it is clickable
    pub async fn click_book_now(&self) -> Result<()> {
        let button = wait_for_clickable(
            self.driver,
            None,
            &selectors::book_now(),
            self.wait(self.timeouts.confirm),
        )
        .await?;
        self.driver.click(&button).await?;
        tracing::info!("Clicked Book Now");
        Ok(())
    }
}

/// First run of ASCII digits in `text`
fn first_number(text: &str) -> Option<u32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let digits: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// "July 2026" as the first of that month
fn parse_month(text: &str) -> Option<NaiveDate> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words.windows(2).find_map(|pair| {
        NaiveDate::parse_from_str(&format!("1 {} {}", pair[0], pair[1]), "%d %B %Y").ok()
    })
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_number() {
        assert_eq!(first_number("5 People"), Some(5));
        assert_eq!(first_number("Guests: 12"), Some(12));
        assert_eq!(first_number("Add Guests"), None);
        assert_eq!(first_number(""), None);
    }

    #[test]
    fn test_parse_month() {
        let july = NaiveDate::from_ymd_opt(2026, 7, 1).unwrap();
        assert_eq!(parse_month("July 2026"), Some(july));
        assert_eq!(parse_month("  July 2026 "), Some(july));
        assert_eq!(parse_month("Calendar July 2026"), Some(july));
        assert_eq!(parse_month("Availability"), None);
    }

    #[test]
    fn test_first_of_month() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 31).unwrap();
        assert_eq!(first_of_month(date), NaiveDate::from_ymd_opt(2026, 7, 1).unwrap());
    }
}
