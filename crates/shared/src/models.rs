//! Shared data models for sessions, port calls and notifications.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// International Maritime Organization ship number, the stable ship key.
pub type Imo = u64;

pub type NotificationId = i64;

pub type Extra = serde_json::Map<String, serde_json::Value>;

// --- Lenient identifiers ---

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Signed(i64),
    String(String),
}

/// IMO numbers arrive both as JSON numbers and as numeric strings
/// (push payloads carry them as strings).
pub fn de_imo<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Imo, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Signed(n) => u64::try_from(n).map_err(serde::de::Error::custom),
        NumberOrString::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

pub fn de_opt_imo<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Imo>, D::Error> {
    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrString::Number(n)) => Ok(Some(n)),
        Some(NumberOrString::Signed(n)) => Ok(u64::try_from(n).ok()),
        Some(NumberOrString::String(s)) if s.trim().is_empty() => Ok(None),
        Some(NumberOrString::String(s)) => s.trim().parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn de_opt_id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<NumberOrString>::deserialize(deserializer)? {
        None => None,
        Some(NumberOrString::Number(n)) => Some(n.to_string()),
        Some(NumberOrString::Signed(n)) => Some(n.to_string()),
        Some(NumberOrString::String(s)) => Some(s),
    })
}

// --- Session ---

/// Feature module flag as delivered by the server (`"enabled"` / `"disabled"`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    Enabled,
    #[serde(other)]
    Disabled,
}

pub type Modules = HashMap<String, ModuleState>;

/// The signed-in identity. The anonymous session is `Session::default()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Session {
    pub id: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub permissions: BTreeSet<String>,
    pub modules: Modules,
    pub session_id: Option<String>,
    pub signed_auth_token: Option<String>,
    /// Server-side session details, kept opaque.
    #[serde(rename = "session")]
    pub details: serde_json::Value,
}

impl Session {
    /// Build a session from a login or registration payload.
    ///
    /// Returns `None` when the payload carries no `user` object.
    pub fn from_login(response: &LoginResponse) -> Option<Self> {
        let user = response.user.as_ref()?;
        Some(Self {
            id: user.id.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role.clone(),
            permissions: user.permissions.iter().cloned().collect(),
            modules: response.modules.clone(),
            session_id: response.session_id.clone(),
            signed_auth_token: response.jwt.clone().filter(|t| !t.is_empty()),
            details: response.session.clone(),
        })
    }

    /// A session id is required for any authenticated call.
    pub fn is_authenticated(&self) -> bool {
        self.session_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn is_module_enabled(&self, module: &str) -> bool {
        matches!(self.modules.get(module), Some(ModuleState::Enabled))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LoginUser {
    #[serde(deserialize_with = "de_opt_id_string")]
    pub id: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub permissions: Vec<String>,
}

/// Body returned by the `login` and `register` endpoints.
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LoginResponse {
    pub session_id: Option<String>,
    pub user: Option<LoginUser>,
    pub modules: Modules,
    pub session: serde_json::Value,
    pub jwt: Option<String>,
}

// --- Port calls ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NextEvent {
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShipInfo {
    #[serde(deserialize_with = "de_imo")]
    pub imo: Imo,
    #[serde(default)]
    pub vessel_name: String,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub badges: Vec<serde_json::Value>,
    #[serde(default)]
    pub next_event: NextEvent,
    #[serde(default)]
    pub from_port: Option<String>,
    #[serde(default)]
    pub to_port: Option<String>,
    #[serde(default)]
    pub next_port: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl ShipInfo {
    pub fn new(imo: Imo, vessel_name: impl Into<String>) -> Self {
        Self {
            imo,
            vessel_name: vessel_name.into(),
            nationality: None,
            badges: Vec::new(),
            next_event: NextEvent::default(),
            from_port: None,
            to_port: None,
            next_port: None,
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum TimeType {
    Estimated,
    Actual,
    Planned,
    Recommended,
    #[default]
    #[serde(other)]
    Other,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timestamp {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub time_type: TimeType,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "isCurrent", skip_serializing_if = "is_false")]
    pub is_current: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Timestamp {
    pub fn new(state: impl Into<String>, time_type: TimeType, time: Option<DateTime<Utc>>) -> Self {
        Self {
            state: state.into(),
            time_type,
            time,
            source: None,
            created_at: None,
            is_current: false,
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Event {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub location: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamps: Vec<Timestamp>,
    #[serde(flatten)]
    pub extra: Extra,
}

/// One visit of a ship, as a sequence of logistics events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PortcallEntry {
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortCall {
    pub ship: ShipInfo,
    #[serde(default)]
    pub portcalls: Vec<PortcallEntry>,
}

/// Event slice of a single ship, as shown on the vessel timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShipTimeline {
    pub ship: ShipInfo,
    pub events: Vec<Event>,
}

// --- Notifications ---

/// Read state. Declaration order is the only allowed direction of travel.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum NotificationState {
    #[default]
    Unread,
    Pending,
    Read,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Ship,
    Port,
    #[default]
    General,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Sender {
    #[serde(default)]
    pub email: String,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ShipRef {
    #[serde(default, deserialize_with = "de_opt_imo")]
    pub imo: Option<Imo>,
    #[serde(default)]
    pub vessel_name: Option<String>,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: NotificationId,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationType,
    #[serde(default)]
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship: Option<ShipRef>,
    #[serde(default, deserialize_with = "de_opt_imo", skip_serializing_if = "Option::is_none")]
    pub ship_imo: Option<Imo>,
    #[serde(default)]
    pub state: NotificationState,
}

impl Notification {
    /// IMO of the ship the notification concerns, from `ship.imo` or `ship_imo`.
    pub fn vessel_imo(&self) -> Option<Imo> {
        self.ship.as_ref().and_then(|s| s.imo).or(self.ship_imo)
    }
}

/// Identifying fields of a realtime or push notification payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NotificationPayload {
    #[serde(rename = "type", default)]
    pub kind: Option<NotificationType>,
    #[serde(default)]
    pub ship: Option<ShipRef>,
    #[serde(default, deserialize_with = "de_opt_imo")]
    pub ship_imo: Option<Imo>,
}

impl NotificationPayload {
    pub fn vessel_imo(&self) -> Option<Imo> {
        self.ship.as_ref().and_then(|s| s.imo).or(self.ship_imo)
    }
}

/// What the notification routing decision looks at: a port-call event carries
/// `vessel_id`, a notification event carries `data`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NotificationEnvelope {
    #[serde(default, deserialize_with = "de_opt_imo")]
    pub vessel_id: Option<Imo>,
    #[serde(default)]
    pub data: Option<NotificationPayload>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum PushKind {
    Vessel,
    Logistics,
    Notification,
    General,
    #[serde(other)]
    Unknown,
}

/// `data` part of an OS push notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushData {
    #[serde(rename = "type")]
    pub kind: PushKind,
    #[serde(default, deserialize_with = "de_opt_imo")]
    pub vessel_id: Option<Imo>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl PushData {
    pub fn envelope(&self) -> NotificationEnvelope {
        NotificationEnvelope {
            vessel_id: self.vessel_id,
            data: self
                .data
                .as_ref()
                .and_then(|d| serde_json::from_value(d.clone()).ok()),
        }
    }
}
