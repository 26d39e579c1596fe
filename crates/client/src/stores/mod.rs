//! Stores for port calls, notifications and the refreshable feeds.
//!
//! Each store is constructed once and shared as an `Arc`. It listens on its
//! realtime channels between `attach` and `detach`, and refetches over REST
//! when an event arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::session::SessionManager;
use crate::socket::ChannelHandler;

pub mod feeds;
pub mod notifications;
pub mod portcalls;

pub use feeds::{FeedKind, FeedStore};
pub use notifications::{NotificationStore, PushRoute};
pub use portcalls::{PortcallState, PortcallStore, SearchKind, ShipFetch};

/// A store's realtime subscriptions and liveness flag.
///
/// While not live, results of calls that were in flight at `detach` are
/// dropped instead of committed.
pub(crate) struct Attachment {
    live: AtomicBool,
    channels: Mutex<Vec<String>>,
}

impl Default for Attachment {
    fn default() -> Self {
        Self {
            live: AtomicBool::new(true),
            channels: Mutex::new(Vec::new()),
        }
    }
}

impl Attachment {
    pub(crate) fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) async fn attach(
        &self,
        session: &SessionManager,
        listeners: Vec<(String, ChannelHandler)>,
    ) {
        self.live.store(true, Ordering::SeqCst);
        let previous =
            std::mem::take(&mut *self.channels.lock().unwrap_or_else(|e| e.into_inner()));
        for stale in previous
            .iter()
            .filter(|c| !listeners.iter().any(|(name, _)| name == *c))
        {
            session.remove_events_listener(stale).await;
        }
        for (channel, handler) in listeners {
            if session.add_events_listener(&channel, handler).await {
                self.channels
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(channel);
            }
        }
    }

    pub(crate) async fn detach(&self, session: &SessionManager) {
        self.live.store(false, Ordering::SeqCst);
        let channels =
            std::mem::take(&mut *self.channels.lock().unwrap_or_else(|e| e.into_inner()));
        for channel in channels {
            session.remove_events_listener(&channel).await;
        }
    }
}
