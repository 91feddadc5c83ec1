//! Page driver abstraction
//!
//! Page actions only need five things from a browser: navigate, look up
//! elements (and wait for them), click, read text/attributes, and run a
//! script against an element. [`PageDriver`] is that seam; [`crate::Page`]
//! implements it over CDP and the test suite implements it over a fake grid.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// How to find elements
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// CSS selector
    Css(String),
    /// XPath expression, evaluated relative to the scope element when given
    XPath(String),
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css(selector.into())
    }

    pub fn xpath(expression: impl Into<String>) -> Self {
        Locator::XPath(expression.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Css(s) => write!(f, "css:{}", s),
            Locator::XPath(s) => write!(f, "xpath:{}", s),
        }
    }
}

/// A controllable browser page
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Handle to an element on the current document
    type Element: Clone + fmt::Debug + Send + Sync;

    /// Load `url` as a full navigation (never a soft refresh)
    async fn navigate(&self, url: &str) -> Result<()>;

    /// All elements matching `locator`, in document order
    async fn find_all(
        &self,
        scope: Option<&Self::Element>,
        locator: &Locator,
    ) -> Result<Vec<Self::Element>>;

    /// Click the element as a user would
    ///
    /// Returns [`Error::ClickIntercepted`] when something else would receive
    /// the click.
    async fn click(&self, element: &Self::Element) -> Result<()>;

    /// Rendered text, trimmed
    async fn text(&self, element: &Self::Element) -> Result<String>;

    /// Attribute value (for `value`, the live property)
    async fn attribute(&self, element: &Self::Element, name: &str) -> Result<Option<String>>;

    /// Run `function` with `this` bound to the element and return its result
    async fn run_script(
        &self,
        element: &Self::Element,
        function: &str,
    ) -> Result<serde_json::Value>;

    /// Rendered, enabled, and attached
    async fn is_clickable(&self, element: &Self::Element) -> Result<bool>;

    /// First element matching `locator`, if any
    async fn find(
        &self,
        scope: Option<&Self::Element>,
        locator: &Locator,
    ) -> Result<Option<Self::Element>> {
        Ok(self.find_all(scope, locator).await?.into_iter().next())
    }
}

/// A wait bound and the interval it polls at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wait {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Wait {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }
}

/// Poll `probe` until it yields a value or `wait.timeout` passes
///
/// Transient errors (element missing, stale, not rendered) count as "not yet";
/// anything else ends the wait immediately.
pub async fn poll_until<T, F, Fut>(wait: Wait, what: &str, mut probe: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    let mut last_error: Option<Error> = None;

    loop {
        match probe().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) if e.is_transient() => last_error = Some(e),
            Err(e) => return Err(e),
        }

        if start.elapsed() >= wait.timeout {
            let detail = match last_error {
                Some(e) => format!(" (last error: {})", e),
                None => String::new(),
            };
            return Err(Error::Timeout(format!(
                "{} not satisfied within {}ms{}",
                what,
                wait.timeout.as_millis(),
                detail
            )));
        }

        tokio::time::sleep(wait.interval).await;
    }
}

/// Wait for an element to be present
pub async fn wait_for<D: PageDriver>(
    driver: &D,
    scope: Option<&D::Element>,
    locator: &Locator,
    wait: Wait,
) -> Result<D::Element> {
    let what = format!("presence of {}", locator);
    poll_until(wait, &what, move || async move { driver.find(scope, locator).await }).await
}

/// Wait for an element to be present and clickable
pub async fn wait_for_clickable<D: PageDriver>(
    driver: &D,
    scope: Option<&D::Element>,
    locator: &Locator,
    wait: Wait,
) -> Result<D::Element> {
    let what = format!("clickable {}", locator);
    poll_until(wait, &what, move || async move {
        for element in driver.find_all(scope, locator).await? {
            if driver.is_clickable(&element).await? {
                return Ok(Some(element));
            }
        }
        Ok(None)
    })
    .await
}
