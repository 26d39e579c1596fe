mod support;

use std::sync::{Arc, Mutex};

use portcall_client::capabilities::TracingReporter;
use portcall_client::config::SocketOptions;
use portcall_client::socket::{handler, ConnectionState, EventSocket};
use portcall_shared::{
    ApiResponse, EVENT_AUTHENTICATE, EVENT_HANDSHAKE, EVENT_REMOVE_AUTH_TOKEN, EVENT_SUBSCRIBE,
    EVENT_UNSUBSCRIBE, PONG,
};
use serde_json::{json, Value};
use support::{app, eventually, login_payload, port_call, FakeApi, MockRealtimeServer};

const TOKEN: &str = "signed-token";

async fn connect(server: &MockRealtimeServer) -> EventSocket {
    EventSocket::connect(
        &SocketOptions::new("127.0.0.1", server.port),
        Arc::new(TracingReporter),
    )
    .await
    .expect("mock server accepts connections")
}

fn recorder() -> (Arc<Mutex<Vec<Value>>>, portcall_client::socket::ChannelHandler) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let on_event = handler(move |data| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(data);
        }
    });
    (seen, on_event)
}

#[tokio::test]
async fn handshake_and_authentication() {
    let server = MockRealtimeServer::start(TOKEN).await;
    let socket = connect(&server).await;
    assert!(socket.is_connected());
    assert_eq!(*socket.state().borrow(), ConnectionState::Connected);
    assert_eq!(
        server.frames_for(EVENT_HANDSHAKE)[0].data,
        Some(json!({"authToken": null}))
    );

    assert!(socket.authenticate(None).await);
    assert!(server.frames_for(EVENT_AUTHENTICATE).is_empty());

    assert!(!socket.authenticate(Some("forged")).await);
    assert_eq!(socket.signed_auth_token(), None);

    assert!(socket.authenticate(Some(TOKEN)).await);
    assert_eq!(socket.signed_auth_token().as_deref(), Some(TOKEN));

    socket.deauthenticate();
    assert_eq!(socket.signed_auth_token(), None);
    eventually(|| async { !server.frames_for(EVENT_REMOVE_AUTH_TOKEN).is_empty() }).await;
}

#[tokio::test]
async fn publications_arrive_in_order_per_channel() {
    let server = MockRealtimeServer::start(TOKEN).await;
    let socket = connect(&server).await;
    let (seen, on_event) = recorder();

    assert!(socket.subscribe("portcalls-changed", on_event.clone()).await);
    assert!(socket.subscribe("portcalls-changed", on_event).await);
    assert_eq!(server.frames_for(EVENT_SUBSCRIBE).len(), 1);
    assert!(socket.is_subscribed("portcalls-changed"));

    for n in 0..5 {
        server.publish("portcalls-changed", json!({"n": n}));
    }
    server.publish("elsewhere", json!({"n": 99}));

    eventually(|| async { seen.lock().unwrap().len() == 5 }).await;
    let order: Vec<Value> = seen.lock().unwrap().iter().map(|v| v["n"].clone()).collect();
    assert_eq!(order, vec![json!(0), json!(1), json!(2), json!(3), json!(4)]);
}

#[tokio::test]
async fn unsubscribe_only_known_channels() {
    let server = MockRealtimeServer::start(TOKEN).await;
    let socket = connect(&server).await;
    let (_seen, on_event) = recorder();

    socket.unsubscribe("never-subscribed").await;
    assert!(server.frames_for(EVENT_UNSUBSCRIBE).is_empty());

    socket.subscribe("a", on_event.clone()).await;
    socket.subscribe("b", on_event).await;
    socket.unsubscribe("a").await;
    assert_eq!(
        server.frames_for(EVENT_UNSUBSCRIBE)[0].data,
        Some(json!("a"))
    );
    assert_eq!(socket.subscriptions(), vec!["b".to_string()]);

    socket.unsubscribe_all().await;
    assert!(socket.subscriptions().is_empty());
    assert_eq!(server.frames_for(EVENT_UNSUBSCRIBE).len(), 2);
}

#[tokio::test]
async fn answers_pings() {
    let server = MockRealtimeServer::start(TOKEN).await;
    let _socket = connect(&server).await;
    server.send_raw("#1");
    eventually(|| async { server.raw().iter().any(|t| t == PONG) }).await;
}

#[tokio::test]
async fn disconnect_is_final() {
    let server = MockRealtimeServer::start(TOKEN).await;
    let socket = connect(&server).await;
    let (_seen, on_event) = recorder();
    socket.subscribe("a", on_event.clone()).await;

    socket.disconnect();
    socket.disconnect();
    assert!(!socket.is_connected());
    assert!(socket.subscriptions().is_empty());
    assert!(!socket.subscribe("a", on_event).await);
}

// --- Session-owned socket ---

#[tokio::test]
async fn session_reuses_and_reauthenticates_the_socket() {
    let server = MockRealtimeServer::start(TOKEN).await;
    let app = app(FakeApi::new(), server.port);
    app.session
        .log_in(&login_payload(7, "me@example.com", Some(TOKEN)))
        .unwrap();

    let first = app.session.ensure_socket().await.unwrap();
    assert_eq!(first.signed_auth_token().as_deref(), Some(TOKEN));
    let again = app.session.ensure_socket().await.unwrap();
    assert_eq!(server.frames_for(EVENT_HANDSHAKE).len(), 1);
    assert_eq!(server.frames_for(EVENT_AUTHENTICATE).len(), 1);
    assert!(again.is_connected());

    // Token revoked by the server: the next ensure authenticates again.
    server.send_raw(r##"{"event":"#removeAuthToken"}"##);
    eventually(|| async { first.signed_auth_token().is_none() }).await;
    assert!(app.session.ensure_socket().await.is_some());
    assert_eq!(server.frames_for(EVENT_AUTHENTICATE).len(), 2);
}

#[tokio::test]
async fn rejected_token_tears_the_socket_down() {
    let server = MockRealtimeServer::start(TOKEN).await;
    let app = app(FakeApi::new(), server.port);
    app.session
        .log_in(&login_payload(7, "me@example.com", Some(TOKEN)))
        .unwrap();
    let socket = app.session.ensure_socket().await.unwrap();
    let (_seen, on_event) = recorder();
    assert!(app.session.add_events_listener("a", on_event).await);

    app.session
        .log_in(&login_payload(7, "me@example.com", Some("stale")))
        .unwrap();
    assert!(app.session.ensure_socket().await.is_none());
    assert!(!socket.is_connected());
    assert!(app.session.socket().await.is_none());
    assert_eq!(server.frames_for(EVENT_UNSUBSCRIBE).len(), 1);
}

#[tokio::test]
async fn no_server_means_no_listeners() {
    let app = app(FakeApi::new(), support::closed_port().await);
    let (_seen, on_event) = recorder();
    assert!(!app.session.add_events_listener("a", on_event).await);
    assert!(app.session.socket().await.is_none());
}

#[tokio::test]
async fn log_out_closes_the_socket() {
    let server = MockRealtimeServer::start(TOKEN).await;
    let app = app(FakeApi::new(), server.port);
    app.session
        .log_in(&login_payload(7, "me@example.com", Some(TOKEN)))
        .unwrap();
    let socket = app.session.ensure_socket().await.unwrap();

    app.session.log_out().await;
    assert!(!socket.is_connected());
    assert!(app.session.socket().await.is_none());
}

// --- Stores on live channels ---

#[tokio::test]
async fn port_call_events_trigger_a_refetch() {
    let server = MockRealtimeServer::start(TOKEN).await;
    let api = FakeApi::new();
    api.set(
        "ongoing-port-calls",
        Some(ApiResponse::ok(json!({
            "pinned_vessels": [],
            "portcalls": [port_call(1, "Alpha", None)]
        }))),
    );
    api.set("notifications/100", Some(ApiResponse::ok(json!([]))));
    let app = app(api.clone(), server.port);
    app.session
        .log_in(&login_payload(7, "me@example.com", Some(TOKEN)))
        .unwrap();

    app.attach_all().await;
    let socket = app.session.socket().await.unwrap();
    let mut channels = socket.subscriptions();
    channels.sort();
    assert_eq!(
        channels,
        vec![
            "logistics-changed",
            "notifications-changed",
            "notifications-changed-7",
            "portcalls-changed",
            "portcalls-changed-7",
            "queue-portcalls-changed",
        ]
    );
    // The session may add manual timestamps.
    assert_eq!(api.calls_to("timestamp-definitions").len(), 1);

    server.publish("portcalls-changed-7", json!({"vessel_id": 1}));
    eventually(|| async { app.portcalls.snapshot().port_calls.len() == 1 }).await;

    server.publish("notifications-changed", json!({"id": 1}));
    eventually(|| async { api.calls_to("notifications/100").len() == 1 }).await;

    server.publish("logistics-changed", json!({}));
    eventually(|| async { api.calls_to("logistics-timestamps/100").len() == 1 }).await;

    app.detach_all().await;
    assert!(socket.subscriptions().is_empty());
    server.publish("portcalls-changed", json!({}));
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(api.calls_to("ongoing-port-calls").len(), 1);
}

#[tokio::test]
async fn stores_resubscribe_after_the_connection_drops() {
    let server = MockRealtimeServer::start(TOKEN).await;
    let api = FakeApi::new();
    api.set(
        "ongoing-port-calls",
        Some(ApiResponse::ok(json!({"pinned_vessels": [], "portcalls": []}))),
    );
    let app = app(api.clone(), server.port);
    app.session
        .log_in(&login_payload(7, "me@example.com", Some(TOKEN)))
        .unwrap();
    app.attach_all().await;
    let first = app.session.socket().await.unwrap();

    server.drop_connections();
    eventually(|| async { !first.is_connected() }).await;
    eventually(|| async { server.frames_for(EVENT_HANDSHAKE).len() == 2 }).await;
    eventually(|| async {
        app.session
            .socket()
            .await
            .is_some_and(|s| s.is_connected() && s.subscriptions().len() == 6)
    })
    .await;
    assert_eq!(server.frames_for(EVENT_AUTHENTICATE).len(), 2);

    // Whatever changed while disconnected is fetched again.
    eventually(|| async { !api.calls_to("ongoing-port-calls").is_empty() }).await;
    let fetched = api.calls_to("ongoing-port-calls").len();
    server.publish("portcalls-changed", json!({}));
    eventually(|| async { api.calls_to("ongoing-port-calls").len() > fetched }).await;

    app.detach_all().await;
}

#[tokio::test]
async fn stores_follow_the_next_session_after_expiry() {
    let server = MockRealtimeServer::start(TOKEN).await;
    let api = FakeApi::new();
    api.set("ongoing-port-calls", Some(ApiResponse::session_expired()));
    let app = app(api.clone(), server.port);
    app.session
        .log_in(&login_payload(7, "me@example.com", Some(TOKEN)))
        .unwrap();
    app.attach_all().await;
    let first = app.session.socket().await.unwrap();

    app.portcalls.fetch_portcalls().await;
    eventually(|| async { !first.is_connected() }).await;
    assert!(app.session.socket().await.is_none());

    api.set(
        "ongoing-port-calls",
        Some(ApiResponse::ok(json!({"pinned_vessels": [], "portcalls": []}))),
    );
    app.session
        .log_in(&login_payload(8, "other@example.com", Some(TOKEN)))
        .unwrap();
    eventually(|| async {
        app.session
            .socket()
            .await
            .is_some_and(|s| s.is_subscribed("portcalls-changed-8"))
    })
    .await;
    let socket = app.session.socket().await.unwrap();
    eventually(|| async { socket.subscriptions().len() == 6 }).await;
    assert!(!socket.is_subscribed("portcalls-changed-7"));
    assert!(!socket.is_subscribed("notifications-changed-7"));

    app.detach_all().await;
    assert!(socket.subscriptions().is_empty());
}
