//! Error types for permitgrab

use std::path::PathBuf;

use thiserror::Error;

/// Result type for permitgrab operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for permitgrab
#[derive(Debug, Error)]
pub enum Error {
    /// The target date currently has no bookable slot for the permit
    #[error("No online reservations available for '{permit}'")]
    NoSlotAvailable { permit: String },

    /// The party-size control only supports increments
    #[error("Decrementing party size is not supported (applied {current}, wanted {target})")]
    UnsupportedDecrease { current: u32, target: u32 },

    /// Any other condition a page action signals explicitly
    #[error("Action failed: {0}")]
    ActionFailed(String),

    /// Timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Failed to launch Chrome
    #[error("Failed to launch Chrome: {0}")]
    Launch(String),

    /// Chrome not found
    #[error("Chrome not found")]
    ChromeNotFound,

    /// Browser profile directory is missing
    #[error("Base profile path does not exist: {}", .0.display())]
    ProfileNotFound(PathBuf),

    /// Browser profile path exists but Chrome cannot use it as a user data dir
    #[error("Base profile path is not a directory: {}", .0.display())]
    ProfileNotADirectory(PathBuf),

    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport error
    #[error("Transport error: {context}")]
    Transport {
        context: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// CDP protocol error
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// JavaScript threw while running against the page
    #[error("Script error: {0}")]
    Script(String),

    /// Navigation error
    #[error("Navigation error: {0}")]
    Navigation(String),

    /// Element not found in DOM
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Element exists in DOM but is not rendered
    #[error("Element not visible: '{0}' exists in DOM but is not rendered")]
    ElementNotVisible(String),

    /// Another element sits on top of the click target
    #[error("Click intercepted: '{target}' is covered by {by}")]
    ClickIntercepted { target: String, by: String },

    /// Element handle no longer attached to the document
    #[error("Stale element: {0}")]
    StaleElement(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result of one poll iteration, as seen by the availability loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The booking button was clicked; checkout is up to the human
    Booked,
    /// Nothing bookable yet, reload and try again
    NoSlotAvailable,
    /// A page action failed for a reason other than availability
    ActionFailed(String),
    /// A bounded wait ran out
    Timeout(String),
}

impl AttemptOutcome {
    /// Whether the loop should stop after this outcome
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptOutcome::NoSlotAvailable)
    }
}

impl Error {
    /// Create a transport error with context
    pub fn transport(context: impl Into<String>) -> Self {
        Self::Transport {
            context: context.into(),
            source: None,
        }
    }

    /// Create a transport error with IO source
    pub fn transport_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source: Some(source),
        }
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a no-slot error for the named permit
    pub fn no_slot(permit: impl Into<String>) -> Self {
        Self::NoSlotAvailable {
            permit: permit.into(),
        }
    }

    /// Create an intercepted-click error
    pub fn intercepted(target: impl Into<String>, by: impl Into<String>) -> Self {
        Self::ClickIntercepted {
            target: target.into(),
            by: by.into(),
        }
    }

    /// Check if this is the recoverable "no slot" condition
    pub fn is_no_slot(&self) -> bool {
        matches!(self, Error::NoSlotAvailable { .. })
    }

    /// Errors a bounded wait keeps polling through (the page may still be rendering)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::ElementNotFound(_)
                | Error::ElementNotVisible(_)
                | Error::StaleElement(_)
                | Error::Script(_)
                | Error::Cdp { .. }
        )
    }

    /// Convert CDP box model errors to friendlier ElementNotVisible
    pub fn clarify(self, target: &str) -> Self {
        match &self {
            Error::Cdp { message, .. } if message.contains("box model") => {
                Error::ElementNotVisible(target.to_string())
            }
            _ => self,
        }
    }

    /// Classify this error for the availability loop
    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            Error::NoSlotAvailable { .. } => AttemptOutcome::NoSlotAvailable,
            Error::Timeout(detail) => AttemptOutcome::Timeout(detail.clone()),
            other => AttemptOutcome::ActionFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        assert_eq!(
            Error::no_slot("High Sierra Trail").outcome(),
            AttemptOutcome::NoSlotAvailable
        );
        assert_eq!(
            Error::Timeout("grid".into()).outcome(),
            AttemptOutcome::Timeout("grid".into())
        );
        assert!(matches!(
            Error::UnsupportedDecrease {
                current: 6,
                target: 5
            }
            .outcome(),
            AttemptOutcome::ActionFailed(_)
        ));
    }

    #[test]
    fn test_no_slot_is_the_only_non_terminal_outcome() {
        assert!(!AttemptOutcome::NoSlotAvailable.is_terminal());
        assert!(AttemptOutcome::Booked.is_terminal());
        assert!(AttemptOutcome::ActionFailed("x".into()).is_terminal());
        assert!(AttemptOutcome::Timeout("x".into()).is_terminal());
    }

    #[test]
    fn test_error_text_does_not_drive_classification() {
        // An action error whose message mentions availability is still fatal
        let err = Error::ActionFailed("No online reservations available".into());
        assert!(!err.is_no_slot());
        assert!(matches!(err.outcome(), AttemptOutcome::ActionFailed(_)));
    }

    #[test]
    fn test_clarify_box_model() {
        let err = Error::cdp("DOM.getBoxModel", -32000, "Could not compute box model.");
        assert!(matches!(
            err.clarify("#guest-counter"),
            Error::ElementNotVisible(ref s) if s == "#guest-counter"
        ));
    }
}
