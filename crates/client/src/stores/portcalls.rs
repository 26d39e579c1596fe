//! Port calls, pinned vessels and the per-ship timeline.
//!
//! Every state change is a single commit published on a broadcast channel,
//! so observers see each intermediate snapshot in order.

use std::cmp::Ordering;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use portcall_shared::channels::{self, ADD_MANUAL_TIMESTAMP, PORTCALLS_CHANGED};
use portcall_shared::{de_imo, ApiResponse, Imo, PortCall, ShipTimeline, TimeType};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use super::Attachment;
use crate::endpoints::{self, NewTimestamp};
use crate::session::SessionManager;
use crate::socket::handler;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PortcallState {
    pub current_portcall_index: usize,
    pub port_calls: Vec<PortCall>,
    pub pinned_vessels: Vec<Imo>,
    /// Positions of pinned ships in `port_calls`; `None` when nothing is
    /// pinned or the list is a filtered view.
    pub pinned_vessels_indices: Option<Vec<usize>>,
    pub timestamps: Option<ShipTimeline>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    Ship,
    PortCall,
    Truck,
}

/// Result of [`PortcallStore::fetch_portcall`].
#[derive(Debug, Clone, PartialEq)]
pub struct ShipFetch {
    pub response: Option<ApiResponse>,
    pub timeline: Option<ShipTimeline>,
}

// --- Ordering ---

fn cmp_next_event(a: &PortCall, b: &PortCall) -> Ordering {
    match (a.ship.next_event.ts, b.ship.next_event.ts) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Order by next event time, then move pinned ships to the front.
///
/// Pins are visited back to front and each found ship is moved to position
/// 0, so pinned ships end up first in pin order. Ships without a next event
/// sort last.
pub fn sort_port_calls(pinned: &[Imo], port_calls: &[PortCall]) -> Vec<PortCall> {
    let mut sorted = port_calls.to_vec();
    sorted.sort_by(cmp_next_event);

    for imo in pinned.iter().rev() {
        if let Some(found) = sorted.iter().position(|p| p.ship.imo == *imo) {
            if found > 0 {
                let port_call = sorted.remove(found);
                sorted.insert(0, port_call);
            }
        }
    }
    sorted
}

pub fn get_pinned_indices(port_calls: &[PortCall], pinned: &[Imo]) -> Option<Vec<usize>> {
    if pinned.is_empty() {
        return None;
    }
    Some(
        port_calls
            .iter()
            .enumerate()
            .filter(|(_, p)| pinned.contains(&p.ship.imo))
            .map(|(i, _)| i)
            .collect(),
    )
}

// --- Timeline ---

/// The events of one visit of `imo`, skipping events without timestamps.
/// Past visits (`current_index > 0`) are returned most recent first.
pub fn filter_events_for_ship(
    current_index: usize,
    port_calls: &[PortCall],
    imo: Imo,
) -> Option<ShipTimeline> {
    let port_call = port_calls.iter().find(|p| p.ship.imo == imo)?;
    let entry = port_call.portcalls.get(current_index)?;
    let mut events: Vec<_> = entry
        .events
        .iter()
        .filter(|e| !e.timestamps.is_empty())
        .cloned()
        .collect();
    if current_index > 0 {
        events.reverse();
    }
    Some(ShipTimeline {
        ship: port_call.ship.clone(),
        events,
    })
}

/// Flag the timestamp the ship is currently at and return the events most
/// recent first.
///
/// Scanning all timestamps in order: the first one with a time is the initial
/// candidate, a past `Actual` always takes over, and a past non-actual takes
/// over only right after a past `Actual` chain. Anything else breaks the
/// chain. Only the first timestamp equal to the final candidate is flagged.
pub fn mark_current_timestamp(mut timeline: ShipTimeline, now: DateTime<Utc>) -> ShipTimeline {
    let mut candidate: Option<(&str, TimeType, DateTime<Utc>)> = None;
    let mut has_previous = false;

    for ts in timeline.events.iter().flat_map(|e| e.timestamps.iter()) {
        let Some(time) = ts.time else {
            has_previous = false;
            continue;
        };
        let key = (ts.state.as_str(), ts.time_type, time);
        if candidate.is_none() {
            candidate = Some(key);
        } else if ts.time_type == TimeType::Actual && time <= now {
            candidate = Some(key);
            has_previous = true;
        } else if time <= now && has_previous {
            candidate = Some(key);
        } else {
            has_previous = false;
        }
    }

    let candidate = candidate.map(|(state, time_type, time)| (state.to_string(), time_type, time));
    let mut marked = false;
    for ts in timeline.events.iter_mut().flat_map(|e| e.timestamps.iter_mut()) {
        let matches = candidate.as_ref().is_some_and(|(state, time_type, time)| {
            ts.state == *state && ts.time_type == *time_type && ts.time == Some(*time)
        });
        ts.is_current = matches && !marked;
        marked |= matches;
    }

    timeline.events.reverse();
    timeline
}

// --- Search ---

fn scalar_matches(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => !s.is_empty() && s.to_lowercase().contains(needle),
        Value::Number(n) => n.as_f64() != Some(0.0) && n.to_string().contains(needle),
        Value::Bool(true) => "true".contains(needle),
        _ => false,
    }
}

/// Case-insensitive match of `text` against every scalar field of each ship,
/// sorted by vessel name. `None` for empty text.
pub fn local_search_ships(text: &str, port_calls: &[PortCall]) -> Option<Vec<PortCall>> {
    if text.is_empty() {
        return None;
    }
    let needle = text.to_lowercase();
    let mut found: Vec<PortCall> = port_calls
        .iter()
        .filter(|p| match serde_json::to_value(&p.ship) {
            Ok(Value::Object(fields)) => fields.values().any(|v| scalar_matches(v, &needle)),
            _ => false,
        })
        .cloned()
        .collect();
    found.sort_by(|a, b| a.ship.vessel_name.cmp(&b.ship.vessel_name));
    Some(found)
}

// --- Response parsing ---

#[derive(Deserialize)]
struct LenientImo(#[serde(deserialize_with = "de_imo")] Imo);

/// Pinned IMOs and port calls from an `ongoing-port-calls` body.
///
/// Malformed entries are skipped and duplicate pins dropped.
pub fn parse_portcalls(data: &Value) -> (Vec<Imo>, Vec<PortCall>) {
    let mut pinned: Vec<Imo> = Vec::new();
    if let Some(items) = data.get("pinned_vessels").and_then(Value::as_array) {
        for item in items {
            if let Ok(LenientImo(imo)) = LenientImo::deserialize(item) {
                if !pinned.contains(&imo) {
                    pinned.push(imo);
                }
            }
        }
    }

    let mut port_calls = Vec::new();
    if let Some(items) = data.get("portcalls").and_then(Value::as_array) {
        for item in items {
            match PortCall::deserialize(item) {
                Ok(port_call) => port_calls.push(port_call),
                Err(e) => tracing::warn!(error = %e, "skipping malformed port call"),
            }
        }
    }
    (pinned, port_calls)
}

fn has_portcalls(response: &ApiResponse) -> bool {
    response.data.get("portcalls").is_some_and(|v| !v.is_null())
}

fn failed(response: &Option<ApiResponse>) -> bool {
    matches!(response, Some(r) if !r.is_ok() && !r.is_session_expired())
}

pub struct PortcallStore {
    session: Arc<SessionManager>,
    state: RwLock<PortcallState>,
    updates: broadcast::Sender<PortcallState>,
    timestamp_definitions: RwLock<Vec<Value>>,
    vessels: RwLock<Vec<Value>>,
    viewed_ship: RwLock<Option<Imo>>,
    /// Held from reading the pin list until the new one is committed.
    pin_updates: Mutex<()>,
    attachment: Attachment,
}

impl PortcallStore {
    pub fn new(session: Arc<SessionManager>) -> Arc<Self> {
        let (updates, _) = broadcast::channel(64);
        Arc::new(Self {
            session,
            state: RwLock::new(PortcallState::default()),
            updates,
            timestamp_definitions: RwLock::new(Vec::new()),
            vessels: RwLock::new(Vec::new()),
            viewed_ship: RwLock::new(None),
            pin_updates: Mutex::new(()),
            attachment: Attachment::default(),
        })
    }

    pub fn snapshot(&self) -> PortcallState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Every committed state, in commit order.
    pub fn subscribe(&self) -> broadcast::Receiver<PortcallState> {
        self.updates.subscribe()
    }

    pub fn timestamp_definitions(&self) -> Vec<Value> {
        self.timestamp_definitions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn vessels(&self) -> Vec<Value> {
        self.vessels.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The ship whose timeline is on screen; realtime events refresh it too.
    pub fn set_viewed_ship(&self, imo: Option<Imo>) {
        *self.viewed_ship.write().unwrap_or_else(|e| e.into_inner()) = imo;
    }

    pub fn viewed_ship(&self) -> Option<Imo> {
        *self.viewed_ship.read().unwrap_or_else(|e| e.into_inner())
    }

    fn commit(&self, update: impl FnOnce(&mut PortcallState)) {
        if !self.attachment.is_live() {
            tracing::debug!("store detached, dropping port call update");
            return;
        }
        let snapshot = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            update(&mut state);
            state.clone()
        };
        tracing::debug!(
            port_calls = snapshot.port_calls.len(),
            pinned = snapshot.pinned_vessels.len(),
            "port call state committed"
        );
        let _ = self.updates.send(snapshot);
    }

    pub async fn fetch_portcalls(self: &Arc<Self>) -> Option<ApiResponse> {
        let response = self
            .session
            .authenticated_call(|api, sid| async move {
                endpoints::ongoing_portcalls(api.as_ref(), sid.as_deref()).await
            })
            .await;

        match &response {
            Some(r) if r.is_ok() => {
                let (pinned, port_calls) = parse_portcalls(&r.data);
                let sorted = sort_port_calls(&pinned, &port_calls);
                self.commit(|s| {
                    s.pinned_vessels_indices = get_pinned_indices(&sorted, &pinned);
                    s.port_calls = sorted;
                    s.pinned_vessels = pinned;
                });
            }
            _ if failed(&response) => self.commit(|s| {
                s.port_calls.clear();
                s.pinned_vessels.clear();
                s.pinned_vessels_indices = None;
            }),
            _ => {}
        }
        response
    }

    /// Fetch everything and cut out the timeline of one ship.
    ///
    /// `history_index` 0 is the live visit and gets its current timestamp
    /// marked; older visits are returned as they are.
    pub async fn fetch_portcall(self: &Arc<Self>, imo: Imo, history_index: usize) -> ShipFetch {
        let response = self
            .session
            .authenticated_call(|api, sid| async move {
                endpoints::ongoing_portcalls(api.as_ref(), sid.as_deref()).await
            })
            .await;

        let mut timeline = None;
        match &response {
            Some(r) if r.is_ok() && has_portcalls(r) => {
                let (pinned, port_calls) = parse_portcalls(&r.data);
                let sorted = sort_port_calls(&pinned, &port_calls);
                timeline = filter_events_for_ship(history_index, &sorted, imo).map(|t| {
                    if history_index == 0 {
                        mark_current_timestamp(t, Utc::now())
                    } else {
                        t
                    }
                });
                let committed = timeline.clone();
                self.commit(|s| {
                    s.current_portcall_index = history_index;
                    s.pinned_vessels_indices = get_pinned_indices(&sorted, &pinned);
                    s.port_calls = sorted;
                    s.pinned_vessels = pinned;
                    s.timestamps = committed;
                });
            }
            Some(r) if !r.is_session_expired() => self.commit(|s| {
                s.current_portcall_index = history_index;
                s.pinned_vessels.clear();
                s.pinned_vessels_indices = None;
                s.timestamps = None;
            }),
            _ => {}
        }
        ShipFetch { response, timeline }
    }

    /// Ship search filters locally and shows the matches without pinned
    /// stickiness. Port call and truck searches are remote and leave the
    /// store alone.
    pub async fn search(self: &Arc<Self>, kind: SearchKind, text: &str) -> Option<ApiResponse> {
        let text = text.to_string();
        match kind {
            SearchKind::Ship if text.is_empty() => self.fetch_portcalls().await,
            SearchKind::Ship => {
                let mut response = self
                    .session
                    .authenticated_call(|api, sid| async move {
                        endpoints::search_ships(api.as_ref(), sid.as_deref()).await
                    })
                    .await;

                match response.as_mut() {
                    Some(r) if r.is_ok() => {
                        let (pinned, port_calls) = parse_portcalls(&r.data);
                        let found = local_search_ships(&text, &port_calls).unwrap_or_default();
                        r.data = serde_json::to_value(&found).unwrap_or(Value::Null);
                        self.commit(|s| {
                            s.port_calls = found;
                            s.pinned_vessels = pinned;
                            s.pinned_vessels_indices = None;
                        });
                    }
                    Some(r) if !r.is_session_expired() => self.commit(|s| {
                        s.port_calls.clear();
                        s.pinned_vessels_indices = None;
                    }),
                    _ => {}
                }
                response
            }
            SearchKind::PortCall => {
                self.session
                    .authenticated_call(|api, sid| async move {
                        endpoints::search_port_calls(api.as_ref(), sid.as_deref(), &text).await
                    })
                    .await
            }
            SearchKind::Truck => {
                self.session
                    .authenticated_call(|api, sid| async move {
                        endpoints::search_trucks(api.as_ref(), sid.as_deref(), &text).await
                    })
                    .await
            }
        }
    }

    /// Pin or unpin `imo` and store the new pin list remotely.
    ///
    /// When unpinning leaves a two-entry index list, the indices are first
    /// committed as `None` on their own. List views with sticky headers need
    /// that intermediate state to re-stick the remaining header.
    pub async fn toggle_pin(self: &Arc<Self>, imo: Imo) -> Option<ApiResponse> {
        let _pinning = self.pin_updates.lock().await;
        let current = self.snapshot();
        let mut pinned = current.pinned_vessels.clone();
        let mut reset_indices = false;

        if let Some(index) = pinned.iter().position(|p| *p == imo) {
            if current
                .pinned_vessels_indices
                .as_ref()
                .is_some_and(|indices| indices.len() == 2)
            {
                self.commit(|s| s.pinned_vessels_indices = None);
                reset_indices = true;
            }
            pinned.remove(index);
        } else {
            pinned.push(imo);
        }

        let ids = pinned.clone();
        let response = self
            .session
            .authenticated_call(|api, sid| async move {
                endpoints::set_pinned_vessels(api.as_ref(), sid.as_deref(), &ids).await
            })
            .await;

        if response.as_ref().is_some_and(ApiResponse::is_ok) {
            self.commit(|s| {
                let sorted = sort_port_calls(&pinned, &s.port_calls);
                s.pinned_vessels_indices = get_pinned_indices(&sorted, &pinned);
                s.port_calls = sorted;
                s.pinned_vessels = pinned;
            });
        } else if reset_indices {
            self.commit(|s| {
                s.pinned_vessels_indices = get_pinned_indices(&s.port_calls, &s.pinned_vessels)
            });
        }
        response
    }

    pub async fn clear_pinned(self: &Arc<Self>) -> Option<ApiResponse> {
        let _pinning = self.pin_updates.lock().await;
        let response = self
            .session
            .authenticated_call(|api, sid| async move {
                endpoints::set_pinned_vessels(api.as_ref(), sid.as_deref(), &[]).await
            })
            .await;
        if response.as_ref().is_some_and(ApiResponse::is_ok) {
            self.commit(|s| {
                s.pinned_vessels.clear();
                s.pinned_vessels_indices = None;
            });
        }
        response
    }

    pub async fn fetch_timestamp_definitions(self: &Arc<Self>) -> Option<ApiResponse> {
        let response = self
            .session
            .authenticated_call(|api, sid| async move {
                endpoints::timestamp_definitions(api.as_ref(), sid.as_deref()).await
            })
            .await;
        self.replace_collection(&self.timestamp_definitions, &response);
        response
    }

    pub async fn fetch_vessels(self: &Arc<Self>) -> Option<ApiResponse> {
        let response = self
            .session
            .authenticated_call(|api, sid| async move {
                endpoints::vessels(api.as_ref(), sid.as_deref()).await
            })
            .await;
        self.replace_collection(&self.vessels, &response);
        response
    }

    /// Store a manually entered timestamp and refresh the affected timeline.
    pub async fn send_timestamp(self: &Arc<Self>, timestamp: NewTimestamp) -> Option<ApiResponse> {
        let imo = timestamp.imo;
        let response = self
            .session
            .authenticated_call(|api, sid| async move {
                endpoints::send_timestamp(api.as_ref(), sid.as_deref(), &timestamp).await
            })
            .await;
        if response.as_ref().is_some_and(ApiResponse::is_ok) && self.viewed_ship() == Some(imo) {
            let index = self.snapshot().current_portcall_index;
            self.fetch_portcall(imo, index).await;
        }
        response
    }

    fn replace_collection(&self, target: &RwLock<Vec<Value>>, response: &Option<ApiResponse>) {
        if !self.attachment.is_live() {
            return;
        }
        let items = match response {
            Some(r) if r.is_ok() => match &r.data {
                Value::Array(items) => items.clone(),
                _ => Vec::new(),
            },
            _ if failed(response) => Vec::new(),
            _ => return,
        };
        *target.write().unwrap_or_else(|e| e.into_inner()) = items;
    }

    /// A port call changed somewhere: refresh the viewed ship, then the list.
    pub async fn handle_portcalls_event(self: &Arc<Self>) {
        if let Some(imo) = self.viewed_ship() {
            let index = self.snapshot().current_portcall_index;
            self.fetch_portcall(imo, index).await;
        }
        self.fetch_portcalls().await;
    }

    /// Listen on the shared and the per-user port call channels.
    pub async fn attach(self: &Arc<Self>) {
        if self.session.has_permission(ADD_MANUAL_TIMESTAMP) {
            self.fetch_timestamp_definitions().await;
        }

        let mut names = vec![PORTCALLS_CHANGED.to_string()];
        if let Some(user_id) = self.session.user_id() {
            names.push(channels::for_user(PORTCALLS_CHANGED, &user_id));
        }
        let listeners = names
            .into_iter()
            .map(|name| {
                let store = Arc::downgrade(self);
                let on_event = handler(move |_data| {
                    let store = store.clone();
                    async move {
                        if let Some(store) = store.upgrade() {
                            store.handle_portcalls_event().await;
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
