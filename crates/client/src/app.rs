//! Process-wide wiring of the session, the stores and the toast slots.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::api_client::{Api, ApiClient};
use crate::capabilities::Capabilities;
use crate::config::ClientConfig;
use crate::session::{SessionManager, SessionState};
use crate::socket::{ConnectionState, EventSocket};
use crate::storage::{FileBackend, Storage};
use crate::stores::{FeedKind, FeedStore, NotificationStore, PortcallStore};
use crate::toast::ToastDispatcher;

/// Everything the UI layer talks to. Built once at startup.
pub struct AppContext {
    pub config: ClientConfig,
    pub session: Arc<SessionManager>,
    pub toasts: ToastDispatcher,
    pub portcalls: Arc<PortcallStore>,
    pub notifications: Arc<NotificationStore>,
    pub logistics: Arc<FeedStore>,
    pub slot_reservations: Arc<FeedStore>,
    keeper: Mutex<Option<JoinHandle<()>>>,
}

/// The stores that follow realtime channels.
#[derive(Clone)]
struct StoreSet {
    portcalls: Arc<PortcallStore>,
    notifications: Arc<NotificationStore>,
    logistics: Arc<FeedStore>,
    slot_reservations: Arc<FeedStore>,
}

impl StoreSet {
    async fn attach(&self) {
        self.portcalls.attach().await;
        self.notifications.attach().await;
        self.logistics.attach().await;
        self.slot_reservations.attach().await;
    }

    async fn refresh(&self) {
        self.portcalls.fetch_portcalls().await;
        self.notifications.fetch(100).await;
        self.logistics.refresh().await;
        self.slot_reservations.refresh().await;
    }

    async fn detach(&self) {
        self.slot_reservations.detach().await;
        self.logistics.detach().await;
        self.notifications.detach().await;
        self.portcalls.detach().await;
    }
}

/// Resolves once `socket` has closed, or after `retry` when there is none.
async fn socket_closed(socket: Option<EventSocket>, retry: Duration) {
    match socket {
        Some(socket) => {
            let mut state = socket.state();
            let _ = state.wait_for(|s| *s == ConnectionState::Closed).await;
        }
        None => tokio::time::sleep(retry).await,
    }
}

/// Re-attach the stores whenever the socket goes away or the session
/// changes, and refetch what may have been missed meanwhile. Runs until
/// aborted.
async fn keep_attached(stores: StoreSet, session: Arc<SessionManager>, retry: Duration) {
    let mut sessions = session.subscribe_state();
    loop {
        let socket = session.socket().await;
        tokio::select! {
            _ = socket_closed(socket, retry) => {}
            changed = sessions.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
        if sessions
            .wait_for(|s| *s == SessionState::Authenticated)
            .await
            .is_err()
        {
            return;
        }
        tracing::info!("resubscribing stores to realtime channels");
        stores.attach().await;
        stores.refresh().await;
    }
}

impl AppContext {
    /// Wire up against the configured API with state persisted under
    /// `config.data_dir`.
    pub fn new(config: ClientConfig, capabilities: Capabilities) -> Self {
        let api = ApiClient::new()
            .with_base_url(config.api_endpoint.clone())
            .with_time_zone(config.time_zone.clone())
            .with_reporter(capabilities.reporter.clone());
        let storage = Storage::new(
            Arc::new(FileBackend::new(config.data_dir.clone())),
            capabilities.reporter.clone(),
        );
        Self::with_api(config, capabilities, Arc::new(api), storage)
    }

    pub fn with_api(
        config: ClientConfig,
        capabilities: Capabilities,
        api: Arc<dyn Api>,
        storage: Storage,
    ) -> Self {
        let toasts = ToastDispatcher::new(config.timings, capabilities.haptics.clone());
        let session = SessionManager::new(api, storage, toasts.clone(), capabilities, &config);
        let portcalls = PortcallStore::new(session.clone());
        let notifications = NotificationStore::new(session.clone(), portcalls.clone());
        let logistics = FeedStore::new(FeedKind::LogisticsTimestamps, session.clone());
        let slot_reservations = FeedStore::new(FeedKind::SlotReservations, session.clone());
        Self {
            config,
            session,
            toasts,
            portcalls,
            notifications,
            logistics,
            slot_reservations,
            keeper: Mutex::new(None),
        }
    }

    fn stores(&self) -> StoreSet {
        StoreSet {
            portcalls: self.portcalls.clone(),
            notifications: self.notifications.clone(),
            logistics: self.logistics.clone(),
            slot_reservations: self.slot_reservations.clone(),
        }
    }

    /// Subscribe every store to its channels and keep them subscribed
    /// across reconnects and session changes until [`detach_all`].
    ///
    /// [`detach_all`]: Self::detach_all
    pub async fn attach_all(&self) {
        let stores = self.stores();
        stores.attach().await;
        tracing::info!(
            channels = ?self.session.socket().await.map(|s| s.subscriptions()),
            "stores attached"
        );

        let keeper = tokio::spawn(keep_attached(
            stores,
            self.session.clone(),
            self.config.timings.resubscribe_retry,
        ));
        let previous = self
            .keeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(keeper);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Initial fetch of everything the signed-in user may see.
    pub async fn refresh_all(&self) {
        self.stores().refresh().await;
    }

    pub async fn detach_all(&self) {
        let keeper = self.keeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(keeper) = keeper {
            keeper.abort();
        }
        self.stores().detach().await;
    }
}
