//! Per-endpoint REST wrappers. Paths are relative to the API root.

use chrono::{DateTime, Utc};
use portcall_shared::{try_error_message, ApiResponse, Imo, NotificationType, TimeType};
use serde::Serialize;
use serde_json::{json, Value};

use crate::api_client::{Api, Method};
use crate::capabilities::PushRegistration;

pub const LOGIN_PATH: &str = "login";
pub const VALIDATE_SESSION_PATH: &str = "session";
pub const REGISTER_PATH: &str = "register";
pub const REGISTER_PUSH_TOKEN_PATH: &str = "register-push-token";
pub const REQUEST_PASSWORD_RESET_PATH: &str = "request-password-reset";
pub const RESET_PASSWORD_PATH: &str = "reset-password";

pub const PORTCALL_PATH: &str = "port-calls/by-imo";
pub const PORTCALLS_PATH: &str = "ongoing-port-calls";
pub const ALL_LOGISTICS_PATH: &str = "logistics-timestamps";
pub const SEARCH_PORT_CALLS_PATH: &str = "search-port-calls";
pub const SEARCH_TRUCKS_PATH: &str = "search-trucks";
pub const PINNED_VESSEL_IDS_PATH: &str = "pinned-vessel-ids";
pub const TIMESTAMP_DEFINITIONS_PATH: &str = "timestamp-definitions";
pub const VESSELS_PATH: &str = "vessels?limit=1000";

pub const NOTIFICATIONS_PATH: &str = "notifications";
pub const SEND_TIMESTAMP_PATH: &str = "timestamps";
pub const SLOT_RESERVATIONS_PATH: &str = "dashboard-slot-reservations?limit=100&offset=0";

/// The body of a 200 response, or `None` for anything else.
fn ok_data(response: Option<ApiResponse>) -> Option<Value> {
    response.filter(ApiResponse::is_ok).map(|r| r.data)
}

// --- Anonymous calls ---

pub async fn login(api: &dyn Api, email: &str, password: &str) -> Option<Value> {
    let body = json!({ "email": email, "password": password });
    ok_data(api.call(Method::Post, LOGIN_PATH, Some(&body), None).await)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Registration {
    pub first_name: String,
    pub last_name: String,
    pub code: String,
    pub email: String,
    pub password: String,
}

pub async fn register(api: &dyn Api, registration: &Registration) -> Option<Value> {
    let body = serde_json::to_value(registration).ok()?;
    ok_data(api.call(Method::Post, REGISTER_PATH, Some(&body), None).await)
}

pub async fn request_password_reset(api: &dyn Api, email: &str, port: &str) -> Option<Value> {
    let body = json!({ "email": email, "port": port });
    ok_data(api.call(Method::Post, REQUEST_PASSWORD_RESET_PATH, Some(&body), None).await)
}

pub async fn reset_password(api: &dyn Api, password: &str, token: &str) -> Option<Value> {
    let body = json!({ "password": password, "token": token });
    ok_data(api.call(Method::Post, RESET_PASSWORD_PATH, Some(&body), None).await)
}

// --- Session-scoped calls ---

pub async fn validate_session(api: &dyn Api, session_id: Option<&str>) -> Option<ApiResponse> {
    api.call(Method::Get, VALIDATE_SESSION_PATH, None, session_id).await
}

/// `true` only when the backend accepted the token.
pub async fn register_push_token(
    api: &dyn Api,
    session_id: Option<&str>,
    registration: &PushRegistration,
) -> bool {
    let Ok(body) = serde_json::to_value(registration) else {
        return false;
    };
    matches!(
        api.call(Method::Post, REGISTER_PUSH_TOKEN_PATH, Some(&body), session_id).await,
        Some(r) if r.is_ok() && try_error_message(&r.data).is_none()
    )
}

pub async fn ongoing_portcalls(api: &dyn Api, session_id: Option<&str>) -> Option<ApiResponse> {
    api.call(Method::Get, PORTCALLS_PATH, None, session_id).await
}

pub async fn portcall_by_imo(
    api: &dyn Api,
    session_id: Option<&str>,
    imo: Imo,
) -> Option<ApiResponse> {
    let path = format!("{PORTCALL_PATH}/{imo}");
    api.call(Method::Get, &path, None, session_id).await
}

pub async fn search_port_calls(
    api: &dyn Api,
    session_id: Option<&str>,
    text: &str,
) -> Option<ApiResponse> {
    let body = json!({ "text": text });
    api.call(Method::Post, SEARCH_PORT_CALLS_PATH, Some(&body), session_id)
        .await
}

/// Ship search is served from the ongoing port calls and filtered locally.
pub async fn search_ships(api: &dyn Api, session_id: Option<&str>) -> Option<ApiResponse> {
    ongoing_portcalls(api, session_id).await
}

pub async fn search_trucks(
    api: &dyn Api,
    session_id: Option<&str>,
    text: &str,
) -> Option<ApiResponse> {
    let body = json!({ "text": text });
    api.call(Method::Post, SEARCH_TRUCKS_PATH, Some(&body), session_id)
        .await
}

pub async fn set_pinned_vessels(
    api: &dyn Api,
    session_id: Option<&str>,
    vessel_ids: &[Imo],
) -> Option<ApiResponse> {
    let body = json!({ "vessel_ids": vessel_ids });
    api.call(Method::Put, PINNED_VESSEL_IDS_PATH, Some(&body), session_id)
        .await
}

pub async fn vessels(api: &dyn Api, session_id: Option<&str>) -> Option<ApiResponse> {
    api.call(Method::Get, VESSELS_PATH, None, session_id).await
}

pub async fn timestamp_definitions(
    api: &dyn Api,
    session_id: Option<&str>,
) -> Option<ApiResponse> {
    api.call(Method::Get, TIMESTAMP_DEFINITIONS_PATH, None, session_id)
        .await
}

pub async fn notifications(
    api: &dyn Api,
    session_id: Option<&str>,
    limit: usize,
) -> Option<ApiResponse> {
    let path = format!("{NOTIFICATIONS_PATH}/{limit}");
    api.call(Method::Get, &path, None, session_id).await
}

pub async fn send_notification(
    api: &dyn Api,
    session_id: Option<&str>,
    kind: NotificationType,
    message: &str,
    ship_imo: Option<Imo>,
) -> Option<ApiResponse> {
    let body = json!({ "type": kind, "message": message, "ship_imo": ship_imo });
    api.call(Method::Post, NOTIFICATIONS_PATH, Some(&body), session_id)
        .await
}

/// A manually entered timestamp.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewTimestamp {
    pub imo: Imo,
    pub vessel_name: String,
    pub time_type: TimeType,
    pub state: String,
    pub time: DateTime<Utc>,
    pub payload: Value,
}

pub async fn send_timestamp(
    api: &dyn Api,
    session_id: Option<&str>,
    timestamp: &NewTimestamp,
) -> Option<ApiResponse> {
    let body = serde_json::to_value(timestamp).ok()?;
    api.call(Method::Post, SEND_TIMESTAMP_PATH, Some(&body), session_id)
        .await
}

pub async fn logistics_timestamps(
    api: &dyn Api,
    session_id: Option<&str>,
    limit: usize,
) -> Option<ApiResponse> {
    let path = format!("{ALL_LOGISTICS_PATH}/{limit}");
    api.call(Method::Get, &path, None, session_id).await
}

pub async fn slot_reservations(api: &dyn Api, session_id: Option<&str>) -> Option<ApiResponse> {
    api.call(Method::Get, SLOT_RESERVATIONS_PATH, None, session_id)
        .await
}
