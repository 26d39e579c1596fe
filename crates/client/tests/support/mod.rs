#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use portcall_client::api_client::{Api, Method};
use portcall_client::capabilities::TracingReporter;
use portcall_client::config::SocketOptions;
use portcall_client::{AppContext, Capabilities, ClientConfig, Storage};
use portcall_shared::{
    ApiResponse, SocketFrame, EVENT_AUTHENTICATE, EVENT_HANDSHAKE, PING, PONG,
};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub session_id: Option<String>,
}

/// Scripted [`Api`]: each path answers from its queue, repeating the last
/// entry once the queue is down to one. Unknown paths answer `None`.
#[derive(Default)]
pub struct FakeApi {
    responses: Mutex<HashMap<String, VecDeque<Option<ApiResponse>>>>,
    calls: Mutex<Vec<Call>>,
    latency: Mutex<Duration>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, path: &str, response: Option<ApiResponse>) {
        self.responses
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(response);
    }

    /// Drop whatever is scripted for `path` and answer with `response`.
    pub fn set(&self, path: &str, response: Option<ApiResponse>) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), VecDeque::from([response]));
    }

    /// Make every later call wait `latency` before answering.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.path == path).collect()
    }
}

#[async_trait]
impl Api for FakeApi {
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        session_id: Option<&str>,
    ) -> Option<ApiResponse> {
        self.calls.lock().unwrap().push(Call {
            method,
            path: path.to_string(),
            body: body.cloned(),
            session_id: session_id.map(str::to_string),
        });
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut responses = self.responses.lock().unwrap();
        let queue = responses.get_mut(path)?;
        if queue.len() > 1 {
            queue.pop_front().flatten()
        } else {
            queue.front().cloned().flatten()
        }
    }
}

pub fn login_payload(user_id: u64, email: &str, jwt: Option<&str>) -> Value {
    json!({
        "session_id": format!("session-{user_id}"),
        "user": {
            "id": user_id,
            "email": email,
            "first_name": "Test",
            "last_name": "User",
            "role": "first_user",
            "permissions": ["add_manual_timestamp"]
        },
        "modules": {
            "activity_module": "enabled",
            "logistics_module": "enabled",
            "queue_module": "enabled"
        },
        "jwt": jwt
    })
}

pub fn config(socket_port: u16) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.socket = SocketOptions::new("127.0.0.1", socket_port);
    config.socket.ack_timeout = Duration::from_secs(2);
    config
}

pub fn app_with(api: Arc<FakeApi>, socket_port: u16, capabilities: Capabilities) -> AppContext {
    AppContext::with_api(
        config(socket_port),
        capabilities,
        api,
        Storage::in_memory(Arc::new(TracingReporter)),
    )
}

pub fn app(api: Arc<FakeApi>, socket_port: u16) -> AppContext {
    app_with(api, socket_port, Capabilities::default())
}

/// A port nothing listens on.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

pub fn port_call(imo: u64, name: &str, next_event: Option<&str>) -> Value {
    json!({
        "ship": {
            "imo": imo,
            "vessel_name": name,
            "next_event": {"ts": next_event}
        },
        "portcalls": []
    })
}

/// Poll `check` until it holds, failing the test after a few seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}

/// Pushed through the outgoing channel to make every connection hang up.
const HANG_UP: &str = "\u{0}hang-up";

/// In-process realtime server speaking the socket frame protocol.
///
/// Accepts `accepted_token` on `#authenticate`, acknowledges every other
/// request and records everything it receives.
pub struct MockRealtimeServer {
    pub port: u16,
    received: Arc<Mutex<Vec<String>>>,
    outgoing: broadcast::Sender<String>,
}

impl MockRealtimeServer {
    pub async fn start(accepted_token: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let (outgoing, _) = broadcast::channel::<String>(64);

        let accepted = accepted_token.to_string();
        let log = received.clone();
        let pushes = outgoing.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let accepted = accepted.clone();
                let log = log.clone();
                let mut pushes = pushes.subscribe();
                tokio::spawn(async move {
                    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let (mut write, mut read) = ws.split();
                    loop {
                        tokio::select! {
                            message = read.next() => {
                                let Some(Ok(Message::Text(text))) = message else {
                                    break;
                                };
                                let text = text.as_str().to_string();
                                log.lock().unwrap().push(text.clone());
                                if let Some(reply) = reply_to(&text, &accepted) {
                                    if write.send(Message::Text(reply.into())).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            push = pushes.recv() => {
                                let Ok(push) = push else {
                                    break;
                                };
                                if push == HANG_UP {
                                    break;
                                }
                                if write.send(Message::Text(push.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            port,
            received,
            outgoing,
        }
    }

    /// Every received frame, parsed; raw texts like pongs are skipped.
    pub fn frames(&self) -> Vec<SocketFrame> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    pub fn raw(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    pub fn frames_for(&self, event: &str) -> Vec<SocketFrame> {
        self.frames().into_iter().filter(|f| f.is_event(event)).collect()
    }

    pub fn publish(&self, channel: &str, data: Value) {
        let frame = SocketFrame::publish(channel, data);
        let _ = self.outgoing.send(serde_json::to_string(&frame).unwrap());
    }

    /// Close every open connection from the server side. The server keeps
    /// accepting new ones.
    pub fn drop_connections(&self) {
        let _ = self.outgoing.send(HANG_UP.to_string());
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.outgoing.send(text.to_string());
    }
}

fn reply_to(text: &str, accepted: &str) -> Option<String> {
    if text == PONG || text == PING {
        return None;
    }
    let frame: SocketFrame = serde_json::from_str(text).ok()?;
    let cid = frame.cid?;
    let data = match frame.event.as_deref() {
        Some(EVENT_HANDSHAKE) => json!({"id": "mock", "isAuthenticated": false}),
        Some(EVENT_AUTHENTICATE) => {
            let ok = frame.data.as_ref().and_then(Value::as_str) == Some(accepted);
            json!({"isAuthenticated": ok, "authError": if ok { Value::Null } else { json!("bad token") }})
        }
        // #subscribe, #unsubscribe
        _ => Value::Null,
    };
    serde_json::to_string(&SocketFrame::reply(cid, Some(data))).ok()
}
