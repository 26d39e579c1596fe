//! Notification feed, read state and toast routing for realtime and push
//! notifications.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use portcall_shared::channels::{self, ACTIVITY_MODULE, LOGISTICS_MODULE, NOTIFICATIONS_CHANGED};
use portcall_shared::{
    ApiResponse, Imo, Modules, ModuleState, Notification, NotificationEnvelope, NotificationId,
    NotificationState, NotificationType, PushData, PushKind,
};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;

use super::{Attachment, PortcallStore};
use crate::endpoints;
use crate::session::SessionManager;
use crate::socket::handler;
use crate::toast::{ToastContent, ToastKind, ToastRequest};

/// Where the UI should go after an OS push notification was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushRoute {
    Vessel(Imo),
    Logistics,
    Notifications,
}

/// Whether an incoming event deserves a toast.
///
/// With vessels pinned, only events about pinned vessels and global
/// notifications get through. Vessel events always need the activity module.
pub fn should_show_notification(
    pinned: &[Imo],
    envelope: Option<&NotificationEnvelope>,
    modules: &Modules,
) -> bool {
    let activity_enabled = matches!(modules.get(ACTIVITY_MODULE), Some(ModuleState::Enabled));

    if !pinned.is_empty() {
        let Some(envelope) = envelope else {
            return false;
        };
        if let Some(vessel_id) = envelope.vessel_id {
            return pinned.contains(&vessel_id) && activity_enabled;
        }
        return match &envelope.data {
            Some(data) if data.kind == Some(NotificationType::Ship) => data
                .vessel_imo()
                .is_some_and(|imo| pinned.contains(&imo) && activity_enabled),
            Some(_) => true,
            None => false,
        };
    }

    match envelope {
        Some(e) if e.vessel_id.is_some() => activity_enabled,
        Some(NotificationEnvelope {
            data: Some(data), ..
        }) if data.kind == Some(NotificationType::Ship) => activity_enabled,
        _ => true,
    }
}

pub fn filter_notifications(
    notifications: Vec<Notification>,
    kind: Option<NotificationType>,
) -> Vec<Notification> {
    match kind {
        None => notifications,
        Some(kind) => notifications.into_iter().filter(|n| n.kind == kind).collect(),
    }
}

/// Carry read state over to a freshly fetched list. A state never moves
/// back: each id keeps the further along of its old and new state.
pub fn copy_state(current: &[Notification], fresh: Vec<Notification>) -> Vec<Notification> {
    fresh
        .into_iter()
        .map(|mut n| {
            if let Some(old) = current.iter().find(|o| o.id == n.id) {
                n.state = n.state.max(old.state);
            }
            n
        })
        .collect()
}

/// Move everything at or before `watermark` from unread to pending.
///
/// Returns the new list and the ids that became pending, which should be
/// finalized as read after the grace delay. Newer notifications keep their
/// state. Applying it twice with the same watermark changes nothing.
pub fn mark_unread(
    notifications: &[Notification],
    watermark: DateTime<Utc>,
) -> (Vec<Notification>, Vec<NotificationId>) {
    let mut pending = Vec::new();
    let marked = notifications
        .iter()
        .cloned()
        .map(|mut n| {
            if n.created_at <= watermark && n.state == NotificationState::Unread {
                n.state = NotificationState::Pending;
                pending.push(n.id);
            }
            n
        })
        .collect();
    (marked, pending)
}

pub fn set_read(notifications: &[Notification], id: NotificationId) -> Vec<Notification> {
    notifications
        .iter()
        .cloned()
        .map(|mut n| {
            if n.id == id {
                n.state = NotificationState::Read;
            }
            n
        })
        .collect()
}

/// Same ids with the same states, ignoring order.
pub fn states_equal(a: &[Notification], b: &[Notification]) -> bool {
    a.len() == b.len()
        && b
            .iter()
            .all(|n| a.iter().any(|o| o.id == n.id && o.state == n.state))
}

fn parse_notifications(data: &Value) -> Vec<Notification> {
    let Some(items) = data.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match Notification::deserialize(item) {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed notification");
                None
            }
        })
        .collect()
}

fn toast_content(data: &Value) -> ToastContent {
    match Notification::deserialize(data) {
        Ok(n) => ToastContent::Notification(Box::new(n)),
        Err(_) => match data.get("message").and_then(Value::as_str) {
            Some(message) => message.into(),
            None => data.to_string().into(),
        },
    }
}

pub struct NotificationStore {
    session: Arc<SessionManager>,
    portcalls: Arc<PortcallStore>,
    notifications: watch::Sender<Vec<Notification>>,
    watermark: RwLock<DateTime<Utc>>,
    app_active: AtomicBool,
    attachment: Attachment,
}

impl NotificationStore {
    pub fn new(session: Arc<SessionManager>, portcalls: Arc<PortcallStore>) -> Arc<Self> {
        let (notifications, _) = watch::channel(Vec::new());
        Arc::new(Self {
            session,
            portcalls,
            notifications,
            watermark: RwLock::new(Utc::now()),
            app_active: AtomicBool::new(true),
            attachment: Attachment::default(),
        })
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Notification>> {
        self.notifications.subscribe()
    }

    pub fn watermark(&self) -> DateTime<Utc> {
        *self.watermark.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Unread notifications not sent by the current user.
    pub fn new_notifications_count(&self) -> usize {
        let email = self.session.email();
        self.notifications
            .borrow()
            .iter()
            .filter(|n| n.state == NotificationState::Unread && n.sender.email != email)
            .count()
    }

    /// Toasts for realtime events are only shown while foregrounded.
    pub fn set_app_active(&self, active: bool) {
        self.app_active.store(active, Ordering::SeqCst);
    }

    pub fn is_app_active(&self) -> bool {
        self.app_active.load(Ordering::SeqCst)
    }

    /// Replace the list unless it is unchanged. Dropped while detached.
    fn commit(&self, update: impl FnOnce(&[Notification]) -> Vec<Notification>) {
        if !self.attachment.is_live() {
            tracing::debug!("store detached, dropping notification update");
            return;
        }
        self.notifications.send_if_modified(|current| {
            let next = update(current.as_slice());
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    pub async fn fetch(self: &Arc<Self>, limit: usize) -> Option<ApiResponse> {
        let response = self
            .session
            .authenticated_call(|api, sid| async move {
                endpoints::notifications(api.as_ref(), sid.as_deref(), limit).await
            })
            .await;

        match &response {
            Some(r) if r.is_ok() => {
                let filter = if self.session.is_module_enabled(ACTIVITY_MODULE) {
                    None
                } else {
                    Some(NotificationType::Port)
                };
                let fresh = filter_notifications(parse_notifications(&r.data), filter);
                let watermark = self.watermark();
                let mut pending = Vec::new();
                self.commit(|current| {
                    let (marked, ids) = mark_unread(&copy_state(current, fresh), watermark);
                    pending = ids;
                    marked
                });
                self.schedule_read(pending);
            }
            Some(r) if !r.is_session_expired() => self.commit(|_| Vec::new()),
            _ => {}
        }
        response
    }

    /// Mark one notification read right away.
    pub fn set_read(&self, id: NotificationId) {
        let current = self.notifications();
        let next = set_read(&current, id);
        if !states_equal(&current, &next) {
            self.commit(|_| next);
        }
    }

    /// Move the "seen up to" watermark forward to `timestamp` and retire
    /// everything older. The watermark never moves back.
    pub fn advance_watermark(self: &Arc<Self>, timestamp: DateTime<Utc>) {
        let watermark = {
            let mut watermark = self.watermark.write().unwrap_or_else(|e| e.into_inner());
            if timestamp > *watermark {
                *watermark = timestamp;
            }
            *watermark
        };
        let mut pending = Vec::new();
        self.commit(|current| {
            let (marked, ids) = mark_unread(current, watermark);
            pending = ids;
            marked
        });
        self.schedule_read(pending);
    }

    /// Finalize pending notifications as read after the grace delay, unless
    /// something else changed their state in the meantime.
    fn schedule_read(self: &Arc<Self>, ids: Vec<NotificationId>) {
        if ids.is_empty() {
            return;
        }
        let store = Arc::downgrade(self);
        let delay = self.session.timings().read_grace;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(store) = store.upgrade() else {
                return;
            };
            store.commit(|current| {
                current
                    .iter()
                    .cloned()
                    .map(|mut n| {
                        if ids.contains(&n.id) && n.state == NotificationState::Pending {
                            n.state = NotificationState::Read;
                        }
                        n
                    })
                    .collect()
            });
        });
    }

    /// Send a notification to the port or about a ship.
    pub async fn send(
        self: &Arc<Self>,
        kind: NotificationType,
        message: &str,
        ship_imo: Option<Imo>,
    ) -> Option<ApiResponse> {
        let message = message.to_string();
        self.session
            .authenticated_call(|api, sid| async move {
                endpoints::send_notification(api.as_ref(), sid.as_deref(), kind, &message, ship_imo)
                    .await
            })
            .await
    }

    fn pinned_vessels(&self) -> Vec<Imo> {
        self.portcalls.snapshot().pinned_vessels
    }

    fn maybe_toast(&self, envelope: &NotificationEnvelope, data: &Value, silent: bool) -> bool {
        if !should_show_notification(
            &self.pinned_vessels(),
            Some(envelope),
            &self.session.modules(),
        ) {
            return false;
        }
        let request =
            ToastRequest::new(ToastKind::Notification, toast_content(data), Duration::ZERO)
                .silent(silent);
        self.session.show_toast(request)
    }

    /// A notification arrived over the socket.
    pub async fn handle_notification_event(self: &Arc<Self>, data: Value, refetch: bool) {
        if !data.is_null() && self.is_app_active() {
            let envelope = NotificationEnvelope {
                vessel_id: None,
                data: serde_json::from_value(data.clone()).ok(),
            };
            self.maybe_toast(&envelope, &data, false);
        }
        if refetch {
            self.fetch(100).await;
        }
    }

    fn route_to_vessel(&self, imo: Imo) -> Option<PushRoute> {
        let pinned = self.pinned_vessels();
        if !pinned.is_empty() && !pinned.contains(&imo) {
            return None;
        }
        if self.portcalls.viewed_ship() == Some(imo) {
            return None;
        }
        self.portcalls
            .snapshot()
            .port_calls
            .iter()
            .any(|p| p.ship.imo == imo)
            .then_some(PushRoute::Vessel(imo))
    }

    /// Route an opened OS push notification and show it as a silent toast
    /// when it passes the same filter as realtime events.
    pub fn handle_push(&self, push: &PushData) -> Option<PushRoute> {
        let envelope = push.envelope();
        match push.kind {
            PushKind::Vessel if self.session.is_module_enabled(ACTIVITY_MODULE) => {
                let imo = push.vessel_id?;
                let route = self.route_to_vessel(imo);
                if let Some(data) = &push.data {
                    self.maybe_toast(&envelope, data, true);
                }
                route
            }
            PushKind::Logistics if self.session.is_module_enabled(LOGISTICS_MODULE) => {
                Some(PushRoute::Logistics)
            }
            PushKind::Notification => {
                let data = push.data.as_ref()?;
                let payload = envelope.data.clone().unwrap_or_default();
                let route = match payload.vessel_imo() {
                    Some(imo) if payload.kind == Some(NotificationType::Ship) => {
                        if self.session.is_module_enabled(ACTIVITY_MODULE) {
                            self.route_to_vessel(imo)
                        } else {
                            None
                        }
                    }
                    _ => Some(PushRoute::Notifications),
                };
                self.maybe_toast(&envelope, data, true);
                route
            }
            PushKind::General => Some(PushRoute::Notifications),
            _ => None,
        }
    }

    /// Listen for notifications: the shared channel toasts and refetches,
    /// the per-user channel only toasts.
    pub async fn attach(self: &Arc<Self>) {
        let mut names = vec![(NOTIFICATIONS_CHANGED.to_string(), true)];
        if let Some(user_id) = self.session.user_id() {
            names.push((channels::for_user(NOTIFICATIONS_CHANGED, &user_id), false));
        }
        let listeners = names
            .into_iter()
            .map(|(name, refetch)| {
                let store = Arc::downgrade(self);
                let on_event = handler(move |data| {
                    let store = store.clone();
                    async move {
                        if let Some(store) = store.upgrade() {
                            store.handle_notification_event(data, refetch).await;
                        }
                    }
                });
                (name, on_event)
            })
            .collect();
        self.attachment.attach(&self.session, listeners).await;
    }

    pub async fn detach(&self) {
        self.attachment.detach(&self.session).await;
    }
}
