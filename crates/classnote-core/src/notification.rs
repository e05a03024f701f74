//! Push messages and the notifications built from them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkerError;

/// Title used when a push message does not carry one.
pub const DEFAULT_TITLE: &str = "ClassNote";

const ICON: &str = "./icon-192.png";
const BADGE: &str = "./icon-72.png";
const VIBRATE_PATTERN: [u32; 3] = [100, 50, 100];

pub const ACTION_OPEN: &str = "open";
pub const ACTION_CLOSE: &str = "close";

/// Expected JSON shape of a push message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: String,
    pub data: Option<Value>,
}

impl PushPayload {
    pub fn parse(raw: &[u8]) -> Result<Self, WorkerError> {
        serde_json::from_slice(raw).map_err(|e| WorkerError::invalid_payload(raw, &e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: Value,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    pub fn from_payload(payload: PushPayload) -> Self {
        Self {
            title: payload.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            body: payload.body,
            icon: ICON.to_string(),
            badge: BADGE.to_string(),
            vibrate: VIBRATE_PATTERN.to_vec(),
            data: payload.data.unwrap_or_else(|| Value::Object(Default::default())),
            actions: vec![
                NotificationAction {
                    action: ACTION_OPEN.to_string(),
                    title: "Abrir ClassNote".to_string(),
                },
                NotificationAction {
                    action: ACTION_CLOSE.to_string(),
                    title: "Fechar".to_string(),
                },
            ],
        }
    }
}

/// A click on a shown notification, optionally on one of its actions.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationClick {
    pub notification: Notification,
    pub action: Option<String>,
}

impl NotificationClick {
    /// Clicking the body (no action) counts as opening the app.
    pub fn opens_app(&self) -> bool {
        match self.action.as_deref() {
            None | Some("") => true,
            Some(action) => action == ACTION_OPEN,
        }
    }
}
