//! CDP Connection/Session Management
//!
//! `Connection` talks to the browser target; `Session` to one attached tab.

use std::sync::Arc;

use super::transport::Transport;
use super::types::*;
use crate::error::{Error, Result};

/// Object group every element handle is allocated in, released on navigation
pub const ELEMENT_GROUP: &str = "permitgrab";

/// A CDP connection to Chrome
pub struct Connection {
    transport: Arc<Transport>,
}

impl Connection {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Get browser version info
    pub async fn version(&self) -> Result<BrowserGetVersionResult> {
        self.transport
            .send(None, "Browser.getVersion", &BrowserGetVersion {})
            .await
    }

    /// Create a new tab
    pub async fn create_target(&self, url: &str) -> Result<String> {
        let result: TargetCreateTargetResult = self
            .transport
            .send(
                None,
                "Target.createTarget",
                &TargetCreateTarget {
                    url: url.to_string(),
                },
            )
            .await?;
        Ok(result.target_id)
    }

    /// Attach to a tab with a flattened session
    pub async fn attach_to_target(&self, target_id: &str) -> Result<Session> {
        let result: TargetAttachToTargetResult = self
            .transport
            .send(
                None,
                "Target.attachToTarget",
                &TargetAttachToTarget {
                    target_id: target_id.to_string(),
                    flatten: true,
                },
            )
            .await?;

        Ok(Session {
            transport: Arc::clone(&self.transport),
            session_id: result.session_id,
        })
    }

    /// Close the browser
    pub async fn close(&self) -> Result<()> {
        let _ = self
            .transport
            .send::<_, serde_json::Value>(None, "Browser.close", &BrowserClose {})
            .await;
        self.transport.close().await
    }
}

/// A CDP session attached to a specific tab
pub struct Session {
    transport: Arc<Transport>,
    session_id: String,
}

impl Session {
    /// Send a command to this session
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        self.transport
            .send(Some(&self.session_id), method, params)
            .await
    }

    /// Enable page events
    pub async fn page_enable(&self) -> Result<()> {
        self.send::<_, serde_json::Value>("Page.enable", &PageEnable {})
            .await?;
        Ok(())
    }

    /// Raise the tab so the human sees it at checkout
    pub async fn bring_to_front(&self) -> Result<()> {
        self.send::<_, serde_json::Value>("Page.bringToFront", &PageBringToFront {})
            .await?;
        Ok(())
    }

    /// Navigate to a URL
    pub async fn navigate(&self, url: &str) -> Result<PageNavigateResult> {
        self.send(
            "Page.navigate",
            &PageNavigate {
                url: url.to_string(),
            },
        )
        .await
    }

    /// Evaluate an expression and return the result by value
    pub async fn evaluate(&self, expression: &str) -> Result<RemoteObject> {
        let result: RuntimeEvaluateResult = self
            .send(
                "Runtime.evaluate",
                &RuntimeEvaluate {
                    expression: expression.to_string(),
                    object_group: None,
                    return_by_value: true,
                    await_promise: false,
                },
            )
            .await?;
        check_exception(result)
    }

    /// Evaluate an expression and keep the result as a remote object
    pub async fn evaluate_handle(&self, expression: &str) -> Result<RemoteObject> {
        let result: RuntimeEvaluateResult = self
            .send(
                "Runtime.evaluate",
                &RuntimeEvaluate {
                    expression: expression.to_string(),
                    object_group: Some(ELEMENT_GROUP.to_string()),
                    return_by_value: false,
                    await_promise: false,
                },
            )
            .await?;
        check_exception(result)
    }

    /// Call a function with `this` bound to a remote object
    pub async fn call_function_on(
        &self,
        object_id: &str,
        function_declaration: &str,
        arguments: Vec<CallArgument>,
        return_by_value: bool,
    ) -> Result<RemoteObject> {
        let result: RuntimeEvaluateResult = self
            .send(
                "Runtime.callFunctionOn",
                &RuntimeCallFunctionOn {
                    function_declaration: function_declaration.to_string(),
                    object_id: object_id.to_string(),
                    arguments,
                    object_group: (!return_by_value).then(|| ELEMENT_GROUP.to_string()),
                    return_by_value,
                    await_promise: false,
                },
            )
            .await?;
        check_exception(result)
    }

    /// Own properties of a remote object (used to enumerate arrays)
    pub async fn get_properties(&self, object_id: &str) -> Result<Vec<PropertyDescriptor>> {
        let result: RuntimeGetPropertiesResult = self
            .send(
                "Runtime.getProperties",
                &RuntimeGetProperties {
                    object_id: object_id.to_string(),
                    own_properties: true,
                },
            )
            .await?;
        Ok(result.result)
    }

    /// Drop every element handle handed out so far
    pub async fn release_elements(&self) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Runtime.releaseObjectGroup",
            &RuntimeReleaseObjectGroup {
                object_group: ELEMENT_GROUP.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    /// Get the box model for an element
    pub async fn get_box_model(&self, object_id: &str) -> Result<BoxModel> {
        let result: DOMGetBoxModelResult = self
            .send(
                "DOM.getBoxModel",
                &DOMGetBoxModel {
                    object_id: object_id.to_string(),
                },
            )
            .await?;
        Ok(result.model)
    }

    /// Dispatch a mouse event
    pub async fn dispatch_mouse_event(
        &self,
        event_type: MouseEventType,
        x: f64,
        y: f64,
        button: Option<MouseButton>,
        click_count: Option<i32>,
    ) -> Result<()> {
        self.send::<_, serde_json::Value>(
            "Input.dispatchMouseEvent",
            &InputDispatchMouseEvent {
                r#type: event_type,
                x,
                y,
                button,
                click_count,
            },
        )
        .await?;
        Ok(())
    }
}

fn check_exception(result: RuntimeEvaluateResult) -> Result<RemoteObject> {
    match result.exception_details {
        Some(details) => Err(Error::Script(details.message())),
        None => Ok(result.result),
    }
}
