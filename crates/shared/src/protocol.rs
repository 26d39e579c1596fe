//! Wire protocol: normalized API responses, realtime socket frames and
//! channel names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::try_error_message;

/// Normalized outcome of a REST call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ApiStatus {
    Ok,
    Error,
    AuthenticationFailed,
    SessionExpired,
}

/// HTTP status the backend uses for an expired session.
pub const HTTP_SESSION_EXPIRED: u16 = 440;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse {
    pub status: ApiStatus,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            status: ApiStatus::Ok,
            data,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::Error,
            data: Value::Array(Vec::new()),
            message: Some(message.into()),
        }
    }

    pub fn authentication_failed() -> Self {
        Self {
            status: ApiStatus::AuthenticationFailed,
            data: Value::Array(Vec::new()),
            message: None,
        }
    }

    pub fn session_expired() -> Self {
        Self {
            status: ApiStatus::SessionExpired,
            data: Value::Array(Vec::new()),
            message: None,
        }
    }

    /// Map an HTTP status code and its decoded JSON body.
    ///
    /// 200 is OK, 401/403 an authentication failure, 440 an expired session;
    /// any other status is an error only when the body carries `error`.
    pub fn from_http(code: u16, body: Value) -> Option<Self> {
        match code {
            200 => Some(Self::ok(body)),
            401 | 403 => Some(Self::authentication_failed()),
            HTTP_SESSION_EXPIRED => Some(Self::session_expired()),
            _ => try_error_message(&body).map(Self::error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ApiStatus::Ok
    }

    pub fn is_session_expired(&self) -> bool {
        self.status == ApiStatus::SessionExpired
    }
}

// --- Realtime socket frames ---

pub const EVENT_HANDSHAKE: &str = "#handshake";
pub const EVENT_AUTHENTICATE: &str = "#authenticate";
pub const EVENT_SUBSCRIBE: &str = "#subscribe";
pub const EVENT_UNSUBSCRIBE: &str = "#unsubscribe";
pub const EVENT_PUBLISH: &str = "#publish";
pub const EVENT_REMOVE_AUTH_TOKEN: &str = "#removeAuthToken";

/// Keep-alive ping sent by the server as a bare text frame.
pub const PING: &str = "#1";
pub const PONG: &str = "#2";

/// One JSON frame on the realtime connection.
///
/// Requests carry `cid`, replies echo it back as `rid`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SocketFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl SocketFrame {
    pub fn request(event: &str, data: Option<Value>, cid: u64) -> Self {
        Self {
            event: Some(event.to_string()),
            data,
            cid: Some(cid),
            ..Self::default()
        }
    }

    /// An event the sender does not expect a reply to.
    pub fn emit(event: &str, data: Option<Value>) -> Self {
        Self {
            event: Some(event.to_string()),
            data,
            ..Self::default()
        }
    }

    pub fn reply(rid: u64, data: Option<Value>) -> Self {
        Self {
            rid: Some(rid),
            data,
            ..Self::default()
        }
    }

    pub fn publish(channel: &str, data: Value) -> Self {
        Self::emit(
            EVENT_PUBLISH,
            Some(serde_json::json!({ "channel": channel, "data": data })),
        )
    }

    pub fn is_event(&self, event: &str) -> bool {
        self.event.as_deref() == Some(event)
    }
}

/// Payload of a `#publish` frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Publication {
    pub channel: String,
    #[serde(default)]
    pub data: Value,
}

/// Channel names and the module/permission flags that gate them.
pub mod channels {
    pub const PORTCALLS_CHANGED: &str = "portcalls-changed";
    pub const NOTIFICATIONS_CHANGED: &str = "notifications-changed";
    pub const LOGISTICS_CHANGED: &str = "logistics-changed";
    pub const QUEUE_PORTCALLS_CHANGED: &str = "queue-portcalls-changed";

    /// Per-user variant of a channel, e.g. `notifications-changed-42`.
    pub fn for_user(channel: &str, user_id: &str) -> String {
        format!("{}-{}", channel, user_id)
    }

    pub const ACTIVITY_MODULE: &str = "activity_module";
    pub const LOGISTICS_MODULE: &str = "logistics_module";

    pub const ADD_MANUAL_TIMESTAMP: &str = "add_manual_timestamp";
}
