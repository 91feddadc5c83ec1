//! Page Abstraction
//!
//! A browser tab driven over CDP. Elements are Runtime remote objects held in
//! one object group, so a navigation can drop every handle at once.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::cdp::types::{CallArgument, RemoteObject};
use crate::cdp::{MouseButton, MouseEventType, Session};
use crate::driver::{Locator, PageDriver};
use crate::error::{Error, Result};

/// How long a navigation may take to reach readyState "complete"
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Collect matches for a CSS selector or XPath relative to `this`.
/// Returns null when `this` has been detached from the document.
const QUERY_FN: &str = r#"function(kind, expr) {
    if (this.nodeType !== Node.DOCUMENT_NODE && !this.isConnected) return null;
    if (kind === 'css') return Array.from(this.querySelectorAll(expr));
    const doc = this.ownerDocument || this;
    const snap = doc.evaluate(expr, this, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
    const out = [];
    for (let i = 0; i < snap.snapshotLength; i++) out.push(snap.snapshotItem(i));
    return out;
}"#;

/// Scroll into view; false when detached
const PREPARE_CLICK_FN: &str = r#"function() {
    if (!this.isConnected) return false;
    this.scrollIntoView({ block: 'center', inline: 'center', behavior: 'instant' });
    return true;
}"#;

/// Empty string when a click at (x, y) lands on `this`, else a short
/// description of whatever sits on top
const HIT_TEST_FN: &str = r#"function(x, y) {
    const hit = document.elementFromPoint(x, y);
    if (!hit || hit === this || this.contains(hit)) return '';
    let d = hit.tagName.toLowerCase();
    if (hit.id) d += '#' + hit.id;
    if (typeof hit.className === 'string' && hit.className.trim()) {
        d += '.' + hit.className.trim().split(/\s+/).join('.');
    }
    return d;
}"#;

const TEXT_FN: &str = r#"function() {
    if (!this.isConnected) return null;
    return (this.innerText || this.textContent || '').trim();
}"#;

const ATTRIBUTE_FN: &str = r#"function(name) {
    if (!this.isConnected) return { stale: true };
    if (name === 'value' && 'value' in this) return { value: String(this.value) };
    return { value: this.getAttribute(name) };
}"#;

const CLICKABLE_FN: &str = r#"function() {
    if (!this.isConnected) return false;
    if (this.disabled || this.getAttribute('aria-disabled') === 'true') return false;
    const style = window.getComputedStyle(this);
    if (style.visibility === 'hidden' || style.display === 'none') return false;
    const rect = this.getBoundingClientRect();
    return rect.width > 0 && rect.height > 0;
}"#;

/// Handle to an element on the page's current document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteElement {
    object_id: String,
    description: String,
}

impl RemoteElement {
    fn from_remote(object: RemoteObject) -> Option<Self> {
        let object_id = object.object_id?;
        Some(Self {
            object_id,
            description: object.description.unwrap_or_else(|| "element".into()),
        })
    }

    /// The CDP remote object id
    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    /// Chrome's short description (e.g. `button.rec-availability-date`)
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// A browser page
pub struct Page {
    session: Session,
}

impl Page {
    /// Create a new Page wrapping a CDP session
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// Navigate to a URL and wait for the load to complete
    pub async fn goto(&self, url: &str) -> Result<()> {
        // Handles into the old document are useless after this point
        if let Err(e) = self.session.release_elements().await {
            tracing::debug!("Releasing element handles failed: {}", e);
        }

        let result = self.session.navigate(url).await?;
        if let Some(error) = result.error_text {
            return Err(Error::Navigation(format!("{}: {}", url, error)));
        }
        // Let the old document unload before polling readyState
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.wait_for_navigation().await
    }

    /// Wait until document.readyState is "complete"
    pub async fn wait_for_navigation(&self) -> Result<()> {
        let start = Instant::now();
        let poll_interval = Duration::from_millis(50);

        loop {
            match self.session.evaluate("document.readyState").await {
                Ok(result) => {
                    if result.value.as_ref().and_then(|v| v.as_str()) == Some("complete") {
                        return Ok(());
                    }
                }
                Err(_) => {
                    // Execution context is being swapped, keep waiting
                }
            }

            if start.elapsed() > NAVIGATION_TIMEOUT {
                return Err(Error::Timeout(format!(
                    "Navigation did not complete within {}ms",
                    NAVIGATION_TIMEOUT.as_millis()
                )));
            }

            tokio::time::sleep(poll_interval).await;
        }
    }

    // =========================================================================
    // Window
    // =========================================================================

    /// Raise this tab in the browser window
    pub async fn bring_to_front(&self) -> Result<()> {
        self.session.bring_to_front().await
    }

    // =========================================================================
    // Interaction
    // =========================================================================

    /// Click at coordinates
    pub async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.session
            .dispatch_mouse_event(MouseEventType::MouseMoved, x, y, None, None)
            .await?;

        self.session
            .dispatch_mouse_event(
                MouseEventType::MousePressed,
                x,
                y,
                Some(MouseButton::Left),
                Some(1),
            )
            .await?;

        tokio::time::sleep(Duration::from_millis(50)).await;

        self.session
            .dispatch_mouse_event(
                MouseEventType::MouseReleased,
                x,
                y,
                Some(MouseButton::Left),
                Some(1),
            )
            .await?;

        Ok(())
    }

    /// Center of the element's content box, in viewport coordinates
    async fn center_of(&self, element: &RemoteElement) -> Result<(f64, f64)> {
        let model = self
            .session
            .get_box_model(&element.object_id)
            .await
            .map_err(|e| e.clarify(&element.description))?;
        model
            .center()
            .ok_or_else(|| Error::ElementNotVisible(element.description.clone()))
    }

    async fn call(
        &self,
        element: &RemoteElement,
        function: &str,
        arguments: Vec<CallArgument>,
    ) -> Result<serde_json::Value> {
        let result = self
            .session
            .call_function_on(&element.object_id, function, arguments, true)
            .await
            .map_err(|e| stale_if_gone(e, element))?;
        Ok(result.value.unwrap_or(serde_json::Value::Null))
    }
}

#[async_trait]
impl PageDriver for Page {
    type Element = RemoteElement;

    async fn navigate(&self, url: &str) -> Result<()> {
        tracing::debug!("Navigating to {}", url);
        self.goto(url).await
    }

    async fn find_all(
        &self,
        scope: Option<&RemoteElement>,
        locator: &Locator,
    ) -> Result<Vec<RemoteElement>> {
        let root = match scope {
            Some(element) => element.object_id.clone(),
            None => self
                .session
                .evaluate_handle("document")
                .await?
                .object_id
                .ok_or_else(|| Error::Script("document has no object id".into()))?,
        };

        let (kind, expr) = match locator {
            Locator::Css(s) => ("css", s.as_str()),
            Locator::XPath(s) => ("xpath", s.as_str()),
        };

        let array = self
            .session
            .call_function_on(
                &root,
                QUERY_FN,
                vec![CallArgument::value(kind), CallArgument::value(expr)],
                false,
            )
            .await;
        let array = match (array, scope) {
            (Ok(array), _) => array,
            (Err(e), Some(element)) => return Err(stale_if_gone(e, element)),
            (Err(e), None) => return Err(e),
        };

        let Some(array_id) = array.object_id else {
            // QUERY_FN returned null: the scope element left the document
            let scope = scope.map(|e| e.description.as_str()).unwrap_or("document");
            return Err(Error::StaleElement(scope.to_string()));
        };

        let mut indexed: Vec<(usize, RemoteElement)> = self
            .session
            .get_properties(&array_id)
            .await?
            .into_iter()
            .filter_map(|prop| {
                let index = prop.name.parse::<usize>().ok()?;
                let element = RemoteElement::from_remote(prop.value?)?;
                Some((index, element))
            })
            .collect();
        indexed.sort_by_key(|(i, _)| *i);

        Ok(indexed.into_iter().map(|(_, e)| e).collect())
    }

    async fn click(&self, element: &RemoteElement) -> Result<()> {
        let attached = self.call(element, PREPARE_CLICK_FN, vec![]).await?;
        if attached != serde_json::Value::Bool(true) {
            return Err(Error::StaleElement(element.description.clone()));
        }

        let (x, y) = self.center_of(element).await?;

        let covering = self
            .call(
                element,
                HIT_TEST_FN,
                vec![CallArgument::value(x), CallArgument::value(y)],
            )
            .await?;
        if let Some(by) = covering.as_str().filter(|s| !s.is_empty()) {
            return Err(Error::intercepted(&element.description, by));
        }

        tracing::trace!("Clicking {} at ({:.0}, {:.0})", element.description, x, y);
        self.click_at(x, y).await
    }

    async fn text(&self, element: &RemoteElement) -> Result<String> {
        match self.call(element, TEXT_FN, vec![]).await? {
            serde_json::Value::String(s) => Ok(s),
            _ => Err(Error::StaleElement(element.description.clone())),
        }
    }

    async fn attribute(&self, element: &RemoteElement, name: &str) -> Result<Option<String>> {
        let result = self
            .call(element, ATTRIBUTE_FN, vec![CallArgument::value(name)])
            .await?;
        if result.get("stale").is_some() {
            return Err(Error::StaleElement(element.description.clone()));
        }
        Ok(result
            .get("value")
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    async fn run_script(
        &self,
        element: &RemoteElement,
        function: &str,
    ) -> Result<serde_json::Value> {
        self.call(element, function, vec![]).await
    }

    async fn is_clickable(&self, element: &RemoteElement) -> Result<bool> {
        let result = self.call(element, CLICKABLE_FN, vec![]).await?;
        Ok(result.as_bool().unwrap_or(false))
    }
}

/// A handle from a released group or a replaced document comes back as a
/// CDP lookup failure; report it as a stale element
fn stale_if_gone(err: Error, element: &RemoteElement) -> Error {
    match &err {
        Error::Cdp { message, .. }
            if message.contains("Could not find object") || message.contains("Cannot find context") =>
        {
            Error::StaleElement(element.description.clone())
        }
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_element_requires_object_id() {
        let object = RemoteObject {
            r#type: "object".into(),
            subtype: Some("node".into()),
            description: Some("button.rec-availability-date".into()),
            object_id: Some("{\"injectedScriptId\":1,\"id\":7}".into()),
            ..Default::default()
        };
        let element = RemoteElement::from_remote(object).unwrap();
        assert_eq!(element.description(), "button.rec-availability-date");

        assert!(RemoteElement::from_remote(RemoteObject::default()).is_none());
    }

    #[test]
    fn test_lookup_failure_becomes_stale() {
        let element = RemoteElement {
            object_id: "1".into(),
            description: "div.rec-grid-grid-cell".into(),
        };
        let err = Error::cdp(
            "Runtime.callFunctionOn",
            -32000,
            "Could not find object with given id",
        );
        assert!(matches!(
            stale_if_gone(err, &element),
            Error::StaleElement(ref d) if d == "div.rec-grid-grid-cell"
        ));

        let other = Error::cdp("Runtime.callFunctionOn", -32602, "Invalid parameters");
        assert!(matches!(stale_if_gone(other, &element), Error::Cdp { .. }));
    }
}
