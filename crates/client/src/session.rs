//! Signed-in identity and the shared realtime socket.
//!
//! [`SessionManager`] is the only writer of the session and of the socket
//! handle. Stores read the session and go through it for every REST call
//! ([`SessionManager::authenticated_call`]) and every channel subscription
//! ([`SessionManager::add_events_listener`]).

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use portcall_shared::{ApiResponse, ApiStatus, LoginResponse, Modules, Session, SyncError};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::api_client::Api;
use crate::capabilities::Capabilities;
use crate::config::{ClientConfig, SocketOptions, SyncTimings};
use crate::endpoints::{self, Registration};
use crate::socket::{ChannelHandler, EventSocket};
use crate::storage::{
    Storage, DISABLE_VIBRATION_KEY, NAMESPACE_KEY, USER_INFO_KEY, USER_LANGUAGE_KEY,
};
use crate::toast::{ToastDispatcher, ToastKind, ToastRequest, ToastViewer};

pub const ACCESS_DENIED_MESSAGE: &str =
    "Access is denied. You may not have the appropriate permissions to access the resource";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    Authenticated,
}

pub struct SessionManager {
    api: Arc<dyn Api>,
    storage: Storage,
    toasts: ToastDispatcher,
    capabilities: Capabilities,
    socket_options: SocketOptions,
    timings: SyncTimings,
    default_namespace: String,
    session: RwLock<Session>,
    namespace: RwLock<String>,
    disable_vibration: AtomicBool,
    state: watch::Sender<SessionState>,
    socket: Mutex<Option<EventSocket>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl SessionManager {
    pub fn new(
        api: Arc<dyn Api>,
        storage: Storage,
        toasts: ToastDispatcher,
        capabilities: Capabilities,
        config: &ClientConfig,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SessionState::Anonymous);
        Arc::new(Self {
            api,
            storage,
            toasts,
            capabilities,
            socket_options: config.socket.clone(),
            timings: config.timings,
            default_namespace: config.namespace.clone(),
            session: RwLock::new(Session::default()),
            namespace: RwLock::new(config.namespace.clone()),
            disable_vibration: AtomicBool::new(false),
            state,
            socket: Mutex::new(None),
        })
    }

    // --- Accessors ---

    pub fn session(&self) -> Session {
        read(&self.session).clone()
    }

    pub fn session_id(&self) -> Option<String> {
        read(&self.session).session_id.clone().filter(|id| !id.is_empty())
    }

    pub fn user_id(&self) -> Option<String> {
        read(&self.session).id.clone()
    }

    pub fn email(&self) -> String {
        read(&self.session).email.clone()
    }

    pub fn modules(&self) -> Modules {
        read(&self.session).modules.clone()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        read(&self.session).has_permission(permission)
    }

    pub fn is_module_enabled(&self, module: &str) -> bool {
        read(&self.session).is_module_enabled(module)
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn api(&self) -> Arc<dyn Api> {
        self.api.clone()
    }

    pub fn toasts(&self) -> &ToastDispatcher {
        &self.toasts
    }

    pub fn timings(&self) -> SyncTimings {
        self.timings
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::info!(?previous, ?state, "session state changed");
        }
    }

    // --- Settings ---

    pub fn namespace(&self) -> String {
        read(&self.namespace).clone()
    }

    pub fn set_namespace(&self, namespace: impl Into<String>) {
        *write(&self.namespace) = namespace.into();
    }

    pub fn disable_vibration(&self) -> bool {
        self.disable_vibration.load(Ordering::SeqCst)
    }

    pub fn set_disable_vibration(&self, value: bool) {
        if self.disable_vibration.swap(value, Ordering::SeqCst) != value {
            self.storage.save(DISABLE_VIBRATION_KEY, &value);
        }
    }

    pub fn load_settings(&self) {
        self.disable_vibration
            .store(self.storage.load_disable_vibration(), Ordering::SeqCst);
    }

    // --- Login lifecycle ---

    /// Adopt the session described by a login or registration payload and
    /// persist it.
    pub fn log_in(&self, payload: &Value) -> Result<Session, SyncError> {
        let response = parse_login(payload)?;
        let session = Session::from_login(&response)
            .ok_or_else(|| SyncError::Authentication("login response has no user".into()))?;

        *write(&self.session) = session.clone();
        self.storage.save_session(&session);
        self.storage.save(NAMESPACE_KEY, &self.namespace());
        self.set_state(SessionState::Authenticated);
        tracing::info!(email = %session.email, "logged in");
        Ok(session)
    }

    pub async fn login(self: &Arc<Self>, email: &str, password: &str) -> Result<Session, SyncError> {
        self.set_state(SessionState::Authenticating);
        let payload = endpoints::login(self.api.as_ref(), email, password).await;
        let result = payload
            .ok_or_else(|| SyncError::Authentication("invalid credentials".into()))
            .and_then(|payload| self.log_in(&payload));
        self.finish_authentication(result).await
    }

    pub async fn register(
        self: &Arc<Self>,
        registration: &Registration,
    ) -> Result<Session, SyncError> {
        self.set_state(SessionState::Authenticating);
        let payload = endpoints::register(self.api.as_ref(), registration).await;
        let result = payload
            .ok_or_else(|| SyncError::Authentication("registration rejected".into()))
            .and_then(|payload| self.log_in(&payload));
        self.finish_authentication(result).await
    }

    async fn finish_authentication(
        self: &Arc<Self>,
        result: Result<Session, SyncError>,
    ) -> Result<Session, SyncError> {
        match &result {
            Ok(_) => {
                self.register_push_token().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "authentication failed");
                let fallback = if self.session().is_authenticated() {
                    SessionState::Authenticated
                } else {
                    SessionState::Anonymous
                };
                self.set_state(fallback);
            }
        }
        result
    }

    /// Load the persisted session and check it with the server.
    pub async fn restore(self: &Arc<Self>) -> SessionState {
        self.load_settings();
        if let Some(namespace) = self.storage.load_namespace() {
            self.set_namespace(namespace);
        }

        match self.storage.load_session().filter(Session::is_authenticated) {
            Some(stored) => {
                *write(&self.session) = stored;
                self.set_state(SessionState::Authenticated);
                if self.validate_session().await {
                    self.register_push_token().await;
                }
            }
            None => {
                self.set_namespace(self.default_namespace.clone());
                self.set_state(SessionState::Anonymous);
            }
        }
        self.state()
    }

    /// Refresh the session from the server.
    ///
    /// A rejected session logs out. An unreachable server keeps the current
    /// session so the app stays usable offline.
    pub async fn validate_session(self: &Arc<Self>) -> bool {
        let Some(session_id) = self.session_id() else {
            return false;
        };
        match endpoints::validate_session(self.api.as_ref(), Some(&session_id)).await {
            Some(response) if response.is_ok() => {
                let refreshed = parse_login(&response.data)
                    .ok()
                    .and_then(|r| Session::from_login(&r));
                if let Some(mut refreshed) = refreshed {
                    refreshed.session_id = Some(session_id);
                    *write(&self.session) = refreshed.clone();
                    self.storage.save_session(&refreshed);
                }
                true
            }
            Some(response) => {
                tracing::info!(status = ?response.status, "stored session rejected");
                self.log_out().await;
                false
            }
            None => {
                tracing::warn!("could not validate session, keeping it");
                true
            }
        }
    }

    /// Back to the anonymous session. Clears persisted identity and closes
    /// the socket so subscriptions made for the old identity stop.
    pub async fn log_out(&self) {
        tracing::info!("logout");
        *write(&self.session) = Session::default();
        self.set_namespace(self.default_namespace.clone());
        self.storage.remove(USER_INFO_KEY);
        self.storage.remove(NAMESPACE_KEY);
        self.storage.remove(USER_LANGUAGE_KEY);
        self.set_state(SessionState::Anonymous);
        self.remove_data_event_source(true).await;
    }

    pub async fn register_push_token(self: &Arc<Self>) -> bool {
        let Some(session_id) = self.session_id() else {
            return false;
        };
        let Some(registration) = self.capabilities.push_tokens.registration().await else {
            return false;
        };
        let registered =
            endpoints::register_push_token(self.api.as_ref(), Some(&session_id), &registration)
                .await;
        if registered {
            tracing::info!("push token registered");
        }
        registered
    }

    // --- Calls ---

    /// Run `call` with the current session id and handle the session-level
    /// outcomes. An expired session logs out shortly after; a denied call
    /// shows an error toast. The response is returned unchanged.
    pub async fn authenticated_call<F, Fut>(self: &Arc<Self>, call: F) -> Option<ApiResponse>
    where
        F: FnOnce(Arc<dyn Api>, Option<String>) -> Fut,
        Fut: Future<Output = Option<ApiResponse>>,
    {
        let session_id = self.session_id();
        let response = call(self.api.clone(), session_id.clone()).await;
        match response.as_ref().map(|r| r.status) {
            Some(ApiStatus::SessionExpired) => self.schedule_logout(session_id),
            Some(ApiStatus::AuthenticationFailed) => {
                let message = self.capabilities.localizer.translate(ACCESS_DENIED_MESSAGE);
                self.toasts.show(
                    ToastKind::Error,
                    message.into(),
                    self.timings.access_denied_toast,
                    None,
                );
            }
            _ => {}
        }
        response
    }

    fn schedule_logout(self: &Arc<Self>, session_id: Option<String>) {
        tracing::info!("session expired, logging out");
        let this = Arc::downgrade(self);
        let delay = self.timings.logout_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(this) = this.upgrade() else {
                return;
            };
            if this.session_id() == session_id {
                this.log_out().await;
            }
        });
    }

    /// Route a toast with the current viewer's settings.
    pub fn show_toast(&self, request: ToastRequest) -> bool {
        let viewer = ToastViewer {
            email: Some(self.email()),
            disable_vibration: self.disable_vibration(),
        };
        self.toasts.request(request, &viewer)
    }

    // --- Realtime ---

    /// Make sure a connected socket authenticated with the current token
    /// exists, connecting or reauthenticating as needed.
    ///
    /// Returns `None` when no socket is available; a failed reauthentication
    /// tears the socket down.
    pub async fn ensure_socket(&self) -> Option<EventSocket> {
        let token = read(&self.session).signed_auth_token.clone();
        let mut guard = self.socket.lock().await;

        if guard.as_ref().is_some_and(|s| !s.is_connected()) {
            tracing::info!("socket connection lost, reconnecting");
            if let Some(stale) = guard.take() {
                stale.disconnect();
            }
        }

        if let Some(socket) = guard.clone() {
            if socket.signed_auth_token() != token {
                let authenticated = match token.as_deref() {
                    Some(token) => socket.authenticate(Some(token)).await,
                    None => {
                        socket.deauthenticate();
                        true
                    }
                };
                if !authenticated {
                    socket.unsubscribe_all().await;
                    socket.disconnect();
                    *guard = None;
                    return None;
                }
            }
            return Some(socket);
        }

        let socket =
            EventSocket::connect(&self.socket_options, self.capabilities.reporter.clone()).await?;
        if !socket.authenticate(token.as_deref()).await {
            socket.disconnect();
            return None;
        }
        *guard = Some(socket.clone());
        Some(socket)
    }

    /// The current socket, if any, without connecting.
    pub async fn socket(&self) -> Option<EventSocket> {
        self.socket.lock().await.clone()
    }

    pub async fn add_events_listener(&self, channel: &str, handler: ChannelHandler) -> bool {
        match self.ensure_socket().await {
            Some(socket) => socket.subscribe(channel, handler).await,
            None => {
                tracing::warn!(channel, "cannot subscribe to data events without socket");
                false
            }
        }
    }

    pub async fn remove_events_listener(&self, channel: &str) {
        if let Some(socket) = self.socket().await {
            socket.unsubscribe(channel).await;
        }
    }

    /// Drop every subscription, and with `disconnect` the socket as well.
    pub async fn remove_data_event_source(&self, disconnect: bool) {
        let mut guard = self.socket.lock().await;
        if let Some(socket) = guard.clone() {
            tracing::info!("unsubscribing from data events");
            socket.unsubscribe_all().await;
            if disconnect {
                socket.disconnect();
                *guard = None;
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("namespace", &self.namespace())
            .finish_non_exhaustive()
    }
}

fn parse_login(payload: &Value) -> Result<LoginResponse, SyncError> {
    Ok(LoginResponse::deserialize(payload)?)
}
