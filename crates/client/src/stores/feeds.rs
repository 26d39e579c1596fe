//! Collections that are refetched wholesale whenever their channel fires.

use std::sync::Arc;

use portcall_shared::channels::{LOGISTICS_CHANGED, QUEUE_PORTCALLS_CHANGED};
use portcall_shared::ApiResponse;
use serde_json::Value;
use tokio::sync::watch;

use super::Attachment;
use crate::endpoints;
use crate::session::SessionManager;
use crate::socket::handler;

const LOGISTICS_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    LogisticsTimestamps,
    SlotReservations,
}

impl FeedKind {
    pub fn channel(self) -> &'static str {
        match self {
            FeedKind::LogisticsTimestamps => LOGISTICS_CHANGED,
            FeedKind::SlotReservations => QUEUE_PORTCALLS_CHANGED,
        }
    }

    /// Slot reservations come paginated, with the items under `data`.
    fn items(self, data: &Value) -> Vec<Value> {
        let items = match self {
            FeedKind::LogisticsTimestamps => data,
            FeedKind::SlotReservations => data.get("data").unwrap_or(&Value::Null),
        };
        items.as_array().cloned().unwrap_or_default()
    }
}

pub struct FeedStore {
    kind: FeedKind,
    session: Arc<SessionManager>,
    items: watch::Sender<Vec<Value>>,
    attachment: Attachment,
}

impl FeedStore {
    pub fn new(kind: FeedKind, session: Arc<SessionManager>) -> Arc<Self> {
        let (items, _) = watch::channel(Vec::new());
        Arc::new(Self {
            kind,
            session,
            items,
            attachment: Attachment::default(),
        })
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    pub fn items(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<Value>> {
        self.items.subscribe()
    }

    pub async fn refresh(self: &Arc<Self>) -> Option<ApiResponse> {
        let kind = self.kind;
        let response = self
            .session
            .authenticated_call(|api, sid| async move {
                match kind {
                    FeedKind::LogisticsTimestamps => {
                        endpoints::logistics_timestamps(api.as_ref(), sid.as_deref(), LOGISTICS_LIMIT)
                            .await
                    }
                    FeedKind::SlotReservations => {
                        endpoints::slot_reservations(api.as_ref(), sid.as_deref()).await
                    }
                }
            })
            .await;

        if !self.attachment.is_live() {
            return response;
        }
        match &response {
            Some(r) if r.is_ok() => {
                self.items.send_replace(kind.items(&r.data));
            }
            Some(r) if !r.is_session_expired() => {
                self.items.send_replace(Vec::new());
            }
            _ => {}
        }
        response
    }

    pub async fn attach(self: &Arc<Self>) {
        let store = Arc::downgrade(self);
        let on_event = handler(move |_data| {
            let store = store.clone();
            async move {
                if let Some(store) = store.upgrade() {
                    store.refresh().await;
                }
            }
        });
        self.attachment
            .attach(&self.session, vec![(self.kind.channel().to_string(), on_event)])
            .await;
    }

    pub async fn detach(&self) {
        self.attachment.detach(&self.session).await;
    }
}
