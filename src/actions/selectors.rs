//! Locators for the recreation.gov detailed-availability page

use crate::driver::Locator;

/// aria-label on a slot control the site will not sell online
pub const NO_ONLINE_RESERVATIONS: &str = "No online reservations available";

/// Calendar months to page through before giving up
pub const MAX_MONTH_STEPS: u32 = 36;

pub fn app_root() -> Locator {
    Locator::css("#recApp")
}

// Party size

pub fn guest_counter() -> Locator {
    Locator::css("#guest-counter")
}

pub fn guest_popup() -> Locator {
    Locator::css("#guest-counter-popup")
}

pub fn people_field() -> Locator {
    Locator::css("#guest-counter-number-field-People")
}

pub fn add_people() -> Locator {
    Locator::css("button[aria-label='Add Peoples']")
}

pub fn close_popup() -> Locator {
    Locator::xpath(".//button[.//text()[contains(., 'Close')]]")
}

// Date

pub fn date_hidden() -> Locator {
    Locator::css("#single-date-hidden")
}

pub fn date_toggle() -> Locator {
    Locator::css("#single-date-toggle")
}

pub fn calendar() -> Locator {
    Locator::css(".sarsa--calendar")
}

pub fn month_heading() -> Locator {
    Locator::css("h2.rec-sr-only")
}

pub fn next_month() -> Locator {
    Locator::css("button[aria-label='Next']")
}

pub fn previous_month() -> Locator {
    Locator::css("button[aria-label='Previous']")
}

/// Day cell by its accessible label, e.g. "Friday, July 31, 2026"
pub fn day_cell(label: &str) -> Locator {
    Locator::css(format!(
        "div[role='button'][aria-label={}]",
        css_string(label)
    ))
}

// Availability grid

pub fn availability_grid() -> Locator {
    Locator::xpath(
        "//div[@role='grid' and contains(@class, 'detailed-availability-grid-new')]",
    )
}

/// Grid row whose header button reads exactly `permit_name`
pub fn permit_row(permit_name: &str) -> Locator {
    Locator::xpath(format!(
        ".//div[@role='row'][.//button[normalize-space()={}]]",
        xpath_literal(permit_name)
    ))
}

pub fn slot_controls() -> Locator {
    Locator::xpath(
        ".//div[contains(@class, 'rec-grid-grid-cell')]//button[contains(@class, 'rec-availability-date')]",
    )
}

pub fn selected_cell() -> Locator {
    Locator::css("div.rec-grid-grid-cell.selected")
}

pub fn book_now() -> Locator {
    Locator::xpath("//button[.//text()[contains(., 'Book Now')]]")
}

/// Script click, bypassing hit testing
pub const SCRIPT_CLICK: &str = "function() { this.click(); return true; }";

pub const SCROLL_INTO_VIEW: &str =
    "function() { this.scrollIntoView({ block: 'center', inline: 'center' }); return true; }";

/// Quote a string as an XPath 1.0 literal
///
/// XPath has no escapes, so a value holding both quote kinds is spliced
/// together with concat().
pub fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        return format!("'{}'", s);
    }
    if !s.contains('"') {
        return format!("\"{}\"", s);
    }
    let parts: Vec<String> = s
        .split('\'')
        .map(|part| format!("'{}'", part))
        .collect();
    format!("concat({})", parts.join(", \"'\", "))
}

/// Quote a string as a CSS attribute value
pub fn css_string(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xpath_literal() {
        assert_eq!(xpath_literal("High Sierra Trail"), "'High Sierra Trail'");
        assert_eq!(xpath_literal("Devil's Postpile"), "\"Devil's Postpile\"");
        assert_eq!(
            xpath_literal(r#"The "Bear's" Den"#),
            r#"concat('The "Bear', "'", 's" Den')"#
        );
    }

    #[test]
    fn test_day_cell_label() {
        assert_eq!(
            day_cell("Friday, July 31, 2026"),
            Locator::Css("div[role='button'][aria-label='Friday, July 31, 2026']".into())
        );
    }

    #[test]
    fn test_permit_row_matches_exact_name() {
        assert_eq!(
            permit_row("High Sierra Trail"),
            Locator::XPath(
                ".//div[@role='row'][.//button[normalize-space()='High Sierra Trail']]".into()
            )
        );
    }
}
