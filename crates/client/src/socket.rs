//! Realtime event socket over tokio-tungstenite.
//!
//! One connection per [`EventSocket`], shared by cloning. The server speaks a
//! small JSON request/reply protocol (see [`portcall_shared::SocketFrame`]);
//! channel publications are delivered to one handler per channel, in order.
//!
//! Nothing here returns an error to the caller. Failures are logged, passed
//! to the [`ErrorReporter`] and turned into `None` or `false`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use portcall_shared::{
    Publication, SocketFrame, SyncError, EVENT_AUTHENTICATE, EVENT_HANDSHAKE, EVENT_PUBLISH,
    EVENT_REMOVE_AUTH_TOKEN, EVENT_SUBSCRIBE, EVENT_UNSUBSCRIBE, PING, PONG,
};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::capabilities::ErrorReporter;
use crate::config::SocketOptions;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Callback for one channel. Each call is awaited before the next
/// publication on the same channel is delivered.
pub type ChannelHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`ChannelHandler`].
pub fn handler<F, Fut>(f: F) -> ChannelHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |data| Box::pin(f(data)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closed,
}

enum Outbound {
    Frame(SocketFrame),
    Raw(&'static str),
    Close,
}

struct Subscription {
    sender: mpsc::UnboundedSender<Value>,
    task: JoinHandle<()>,
}

struct SocketInner {
    url: String,
    outgoing: UnboundedSender<Outbound>,
    pending: Mutex<HashMap<u64, oneshot::Sender<SocketFrame>>>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    next_cid: AtomicU64,
    signed_auth_token: Mutex<Option<String>>,
    state: watch::Sender<ConnectionState>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    reporter: Arc<dyn ErrorReporter>,
    ack_timeout: Duration,
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(task) = reader.take() {
                task.abort();
            }
        }
        if let Ok(mut subs) = self.subscriptions.lock() {
            for (_, sub) in subs.drain() {
                sub.task.abort();
            }
        }
    }
}

#[derive(Clone)]
pub struct EventSocket {
    inner: Arc<SocketInner>,
}

impl EventSocket {
    /// Open the connection and complete the handshake.
    ///
    /// Returns `None` if the server is unreachable or refuses the handshake.
    pub async fn connect(
        options: &SocketOptions,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Option<EventSocket> {
        let url = options.url();
        tracing::info!(url = %url, "creating socket");

        let stream = match connect_async(url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                let error = SyncError::transport(e);
                tracing::warn!(url = %url, error = %error, "socket connection failed");
                reporter.capture_error(&error);
                return None;
            }
        };

        let (write, read) = stream.split();
        let (outgoing, outgoing_rx) = unbounded();
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let inner = Arc::new(SocketInner {
            url,
            outgoing,
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_cid: AtomicU64::new(1),
            signed_auth_token: Mutex::new(None),
            state,
            reader: Mutex::new(None),
            closed: AtomicBool::new(false),
            reporter,
            ack_timeout: options.ack_timeout,
        });

        tokio::spawn(write_loop(write, outgoing_rx));
        let reader = tokio::spawn(read_loop(read, Arc::downgrade(&inner)));
        *lock(&inner.reader) = Some(reader);

        let socket = EventSocket { inner };
        match socket
            .request(EVENT_HANDSHAKE, Some(json!({ "authToken": null })))
            .await
        {
            Ok(_) => {
                socket.inner.state.send_replace(ConnectionState::Connected);
                tracing::info!(url = %socket.inner.url, "socket is connected");
                Some(socket)
            }
            Err(e) => {
                socket.report("socket handshake failed", &e);
                socket.disconnect();
                None
            }
        }
    }

    /// Authenticate with a signed token.
    ///
    /// Without a token there is nothing to authenticate and the socket is
    /// usable anonymously, so this returns `true`.
    pub async fn authenticate(&self, token: Option<&str>) -> bool {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return true;
        };
        match self.request(EVENT_AUTHENTICATE, Some(json!(token))).await {
            Ok(reply) => {
                let data = reply.data.unwrap_or(Value::Null);
                if let Some(auth_error) = data.get("authError").filter(|e| !e.is_null()) {
                    tracing::warn!(%auth_error, "socket authentication rejected");
                }
                let authenticated = data
                    .get("isAuthenticated")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if authenticated {
                    *lock(&self.inner.signed_auth_token) = Some(token.to_string());
                }
                tracing::info!(authenticated, "socket authentication finished");
                authenticated
            }
            Err(e) => {
                self.report("socket authentication failed", &e);
                false
            }
        }
    }

    /// Forget the accepted token and tell the server to do the same.
    pub fn deauthenticate(&self) {
        lock(&self.inner.signed_auth_token).take();
        let _ = self
            .inner
            .outgoing
            .unbounded_send(Outbound::Frame(SocketFrame::emit(EVENT_REMOVE_AUTH_TOKEN, None)));
    }

    /// The last token the server accepted.
    pub fn signed_auth_token(&self) -> Option<String> {
        lock(&self.inner.signed_auth_token).clone()
    }

    /// Subscribe `channel`, delivering every publication to `handler` until
    /// unsubscribed. A channel that is already subscribed keeps its current
    /// handler and this returns `true` right away.
    pub async fn subscribe(&self, channel: &str, handler: ChannelHandler) -> bool {
        if self.is_closed() {
            tracing::warn!(channel, "cannot subscribe to data events without socket");
            return false;
        }

        {
            let mut subs = lock(&self.inner.subscriptions);
            if subs.contains_key(channel) {
                return true;
            }
            let (sender, mut receiver) = mpsc::unbounded_channel::<Value>();
            let task = tokio::spawn(async move {
                while let Some(data) = receiver.recv().await {
                    handler(data).await;
                }
            });
            subs.insert(channel.to_string(), Subscription { sender, task });
        }

        tracing::info!(channel, "subscribing to data events");
        match self
            .request(EVENT_SUBSCRIBE, Some(json!({ "channel": channel })))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                if let Some(sub) = lock(&self.inner.subscriptions).remove(channel) {
                    sub.task.abort();
                }
                self.report("subscribe failed", &e);
                false
            }
        }
    }

    /// Stop delivery on `channel`. Nothing is sent when it was not subscribed.
    pub async fn unsubscribe(&self, channel: &str) {
        let Some(sub) = lock(&self.inner.subscriptions).remove(channel) else {
            return;
        };
        sub.task.abort();
        if let Err(e) = self
            .request(EVENT_UNSUBSCRIBE, Some(json!(channel)))
            .await
        {
            self.report("unsubscribe failed", &e);
        }
        tracing::info!(channel, "channel closed");
    }

    pub async fn unsubscribe_all(&self) {
        for channel in self.subscriptions() {
            self.unsubscribe(&channel).await;
        }
        tracing::info!("all channels closed");
    }

    pub fn subscriptions(&self) -> Vec<String> {
        lock(&self.inner.subscriptions).keys().cloned().collect()
    }

    pub fn is_subscribed(&self, channel: &str) -> bool {
        lock(&self.inner.subscriptions).contains_key(channel)
    }

    /// Drop all channels, deauthenticate and close the connection. Calling it
    /// again does nothing.
    pub fn disconnect(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for (_, sub) in lock(&self.inner.subscriptions).drain() {
            sub.task.abort();
        }
        self.deauthenticate();
        let _ = self.inner.outgoing.unbounded_send(Outbound::Close);
        self.inner.state.send_replace(ConnectionState::Closed);
        tracing::info!(url = %self.inner.url, "socket closed");
    }

    pub fn is_connected(&self) -> bool {
        !self.is_closed() && *self.inner.state.borrow() == ConnectionState::Connected
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Send a request frame and wait for the reply carrying the same id.
    async fn request(&self, event: &str, data: Option<Value>) -> Result<SocketFrame, SyncError> {
        if self.is_closed() {
            return Err(SyncError::Transport("socket is closed".into()));
        }
        let cid = self.inner.next_cid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.inner.pending).insert(cid, tx);

        let frame = SocketFrame::request(event, data, cid);
        if let Err(e) = self.inner.outgoing.unbounded_send(Outbound::Frame(frame)) {
            lock(&self.inner.pending).remove(&cid);
            return Err(SyncError::transport(e));
        }

        let reply = match tokio::time::timeout(self.inner.ack_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(SyncError::Transport("connection closed".into())),
            Err(_) => {
                lock(&self.inner.pending).remove(&cid);
                return Err(SyncError::Transport(format!("{event} timed out")));
            }
        };
        match &reply.error {
            Some(error) => Err(SyncError::Server(match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })),
            None => Ok(reply),
        }
    }

    fn report(&self, context: &str, error: &SyncError) {
        tracing::warn!(url = %self.inner.url, error = %error, "{}", context);
        self.inner.reporter.capture_error(error);
    }
}

impl std::fmt::Debug for EventSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSocket")
            .field("url", &self.inner.url)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

async fn write_loop(
    mut write: SplitSink<WsStream, Message>,
    mut outgoing: UnboundedReceiver<Outbound>,
) {
    while let Some(outbound) = outgoing.next().await {
        let message = match outbound {
            Outbound::Frame(frame) => match serde_json::to_string(&frame) {
                Ok(json) => Message::Text(json.into()),
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize socket frame");
                    continue;
                }
            },
            Outbound::Raw(text) => Message::Text(text.into()),
            Outbound::Close => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
        };
        if let Err(e) = write.send(message).await {
            tracing::warn!(error = %e, "socket send failed");
            break;
        }
    }
    tracing::debug!("socket writer stopped");
}

async fn read_loop(mut read: SplitStream<WsStream>, inner: Weak<SocketInner>) {
    while let Some(message) = read.next().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match message {
            Ok(Message::Text(text)) => handle_text(&inner, text.as_str()),
            Ok(Message::Close(_)) => {
                tracing::info!(url = %inner.url, "socket received close frame");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let error = SyncError::transport(e);
                tracing::warn!(url = %inner.url, error = %error, "socket read error");
                inner.reporter.capture_error(&error);
                break;
            }
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.closed.store(true, Ordering::SeqCst);
        lock(&inner.pending).clear();
        inner.state.send_replace(ConnectionState::Closed);
        tracing::info!(url = %inner.url, "socket connection ended");
    }
}

fn handle_text(inner: &SocketInner, text: &str) {
    if text == PING {
        let _ = inner.outgoing.unbounded_send(Outbound::Raw(PONG));
        return;
    }

    let frame: SocketFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            let error = SyncError::from(e);
            tracing::warn!(error = %error, "unreadable socket frame");
            inner.reporter.capture_error(&error);
            return;
        }
    };

    if let Some(rid) = frame.rid {
        if let Some(waiter) = lock(&inner.pending).remove(&rid) {
            let _ = waiter.send(frame);
        }
        return;
    }

    if frame.is_event(EVENT_PUBLISH) {
        let publication = frame
            .data
            .map(serde_json::from_value::<Publication>)
            .transpose();
        match publication {
            Ok(Some(publication)) => {
                let subs = lock(&inner.subscriptions);
                match subs.get(&publication.channel) {
                    Some(sub) => {
                        let _ = sub.sender.send(publication.data);
                    }
                    None => {
                        tracing::debug!(channel = %publication.channel, "publication for unsubscribed channel")
                    }
                }
            }
            Ok(None) => tracing::debug!("empty publication"),
            Err(e) => inner.reporter.capture_error(&SyncError::from(e)),
        }
    } else if frame.is_event(EVENT_REMOVE_AUTH_TOKEN) {
        lock(&inner.signed_auth_token).take();
        tracing::info!("server removed auth token");
    } else {
        tracing::debug!(event = ?frame.event, "unhandled socket event");
    }
}
