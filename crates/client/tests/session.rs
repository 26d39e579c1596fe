mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use portcall_client::capabilities::{Haptics, PushRegistration, PushTokenProvider, TracingReporter};
use portcall_client::endpoints::Registration;
use portcall_client::session::ACCESS_DENIED_MESSAGE;
use portcall_client::storage::{MemoryBackend, NAMESPACE_KEY, USER_INFO_KEY};
use portcall_client::toast::{ToastContent, ToastPhase, ToastRequest};
use portcall_client::{AppContext, Capabilities, SessionState, Storage, ToastKind};
use portcall_shared::{ApiResponse, Session};
use serde_json::json;
use support::{app, app_with, closed_port, config, login_payload, FakeApi};

struct FixedToken;

#[async_trait]
impl PushTokenProvider for FixedToken {
    async fn registration(&self) -> Option<PushRegistration> {
        Some(PushRegistration {
            installation_id: "install-1".into(),
            platform: "android".into(),
            push_token: "push-token".into(),
        })
    }
}

#[derive(Default)]
struct CountingHaptics(AtomicUsize);

impl Haptics for CountingHaptics {
    fn vibrate(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn app_on(api: Arc<FakeApi>, storage: Storage, port: u16) -> AppContext {
    AppContext::with_api(config(port), Capabilities::default(), api, storage)
}

#[tokio::test]
async fn login_persists_the_session() {
    let api = FakeApi::new();
    api.set(
        "login",
        Some(ApiResponse::ok(login_payload(7, "me@example.com", Some("jwt-7")))),
    );
    let storage = Storage::in_memory(Arc::new(TracingReporter));
    let app = app_on(api.clone(), storage.clone(), closed_port().await);

    let session = app
        .session
        .login("me@example.com", "secret")
        .await
        .unwrap();
    assert_eq!(session.session_id.as_deref(), Some("session-7"));
    assert_eq!(session.signed_auth_token.as_deref(), Some("jwt-7"));
    assert_eq!(app.session.state(), SessionState::Authenticated);
    assert_eq!(app.session.user_id().as_deref(), Some("7"));

    assert_eq!(storage.load_session(), Some(session));
    assert_eq!(storage.load_namespace().as_deref(), Some("common"));

    let call = &api.calls_to("login")[0];
    assert_eq!(call.session_id, None);
    assert_eq!(
        call.body,
        Some(json!({"email": "me@example.com", "password": "secret"}))
    );
}

#[tokio::test]
async fn rejected_login_stays_anonymous() {
    let api = FakeApi::new();
    api.set("login", Some(ApiResponse::authentication_failed()));
    let app = app(api, closed_port().await);

    assert!(app.session.login("me@example.com", "wrong").await.is_err());
    assert_eq!(app.session.state(), SessionState::Anonymous);
    assert!(!app.session.session().is_authenticated());
}

#[tokio::test]
async fn registration_registers_the_push_token() {
    let api = FakeApi::new();
    api.set(
        "register",
        Some(ApiResponse::ok(login_payload(8, "new@example.com", None))),
    );
    api.set("register-push-token", Some(ApiResponse::ok(json!({}))));
    let capabilities = Capabilities {
        push_tokens: Arc::new(FixedToken),
        ..Capabilities::default()
    };
    let app = app_with(api.clone(), closed_port().await, capabilities);

    let registration = Registration {
        first_name: "New".into(),
        last_name: "User".into(),
        code: "PORT-1".into(),
        email: "new@example.com".into(),
        password: "secret".into(),
    };
    app.session.register(&registration).await.unwrap();

    let push = &api.calls_to("register-push-token")[0];
    assert_eq!(push.session_id.as_deref(), Some("session-8"));
    assert_eq!(
        push.body,
        Some(json!({
            "installation_id": "install-1",
            "platform": "android",
            "push_token": "push-token"
        }))
    );
}

#[tokio::test]
async fn push_token_error_field_counts_as_failure() {
    let api = FakeApi::new();
    api.set(
        "register-push-token",
        Some(ApiResponse::ok(json!({"error": "duplicate"}))),
    );
    let capabilities = Capabilities {
        push_tokens: Arc::new(FixedToken),
        ..Capabilities::default()
    };
    let app = app_with(api, closed_port().await, capabilities);
    assert!(!app.session.register_push_token().await);

    app.session
        .log_in(&login_payload(7, "me@example.com", None))
        .unwrap();
    assert!(!app.session.register_push_token().await);
}

fn stored_session() -> Session {
    Session {
        id: Some("7".into()),
        email: "me@example.com".into(),
        session_id: Some("session-7".into()),
        ..Session::default()
    }
}

fn storage_with_session() -> Storage {
    let storage = Storage::new(
        Arc::new(MemoryBackend::default()),
        Arc::new(TracingReporter),
    );
    storage.save_session(&stored_session());
    storage.save(NAMESPACE_KEY, &"vuosaari");
    storage
}

#[tokio::test]
async fn restore_refreshes_a_valid_session() {
    let api = FakeApi::new();
    let mut refreshed = login_payload(7, "renamed@example.com", None);
    refreshed["session_id"] = json!(null);
    api.set("session", Some(ApiResponse::ok(refreshed)));
    let storage = storage_with_session();
    let app = app_on(api.clone(), storage.clone(), closed_port().await);

    assert_eq!(app.session.restore().await, SessionState::Authenticated);
    assert_eq!(app.session.namespace(), "vuosaari");
    assert_eq!(app.session.email(), "renamed@example.com");
    assert_eq!(app.session.session_id().as_deref(), Some("session-7"));
    assert_eq!(
        storage.load_session().map(|s| s.email),
        Some("renamed@example.com".to_string())
    );
    assert_eq!(
        api.calls_to("session")[0].session_id.as_deref(),
        Some("session-7")
    );
}

#[tokio::test]
async fn restore_logs_out_a_rejected_session() {
    let api = FakeApi::new();
    api.set("session", Some(ApiResponse::session_expired()));
    let storage = storage_with_session();
    let app = app_on(api, storage.clone(), closed_port().await);

    assert_eq!(app.session.restore().await, SessionState::Anonymous);
    assert_eq!(app.session.namespace(), "common");
    assert!(!storage.exists(USER_INFO_KEY));
    assert!(!storage.exists(NAMESPACE_KEY));
}

#[tokio::test]
async fn restore_keeps_the_session_when_offline() {
    let api = FakeApi::new();
    let storage = storage_with_session();
    let app = app_on(api, storage.clone(), closed_port().await);

    assert_eq!(app.session.restore().await, SessionState::Authenticated);
    assert_eq!(app.session.session(), stored_session());
    assert!(storage.exists(USER_INFO_KEY));
}

#[tokio::test]
async fn restore_without_stored_session() {
    let app = app(FakeApi::new(), closed_port().await);
    assert_eq!(app.session.restore().await, SessionState::Anonymous);
    assert_eq!(app.session.namespace(), "common");
}

#[tokio::test]
async fn denied_call_shows_an_error_toast() {
    let api = FakeApi::new();
    api.set("ongoing-port-calls", Some(ApiResponse::authentication_failed()));
    let app = app(api, closed_port().await);
    app.session
        .log_in(&login_payload(7, "me@example.com", None))
        .unwrap();
    let mut toasts = app.toasts.subscribe();

    app.portcalls.fetch_portcalls().await;
    let event = toasts.recv().await.unwrap();
    assert_eq!(event.kind, ToastKind::Error);
    assert_eq!(event.phase, ToastPhase::FadingIn);
    assert_eq!(event.content, ToastContent::Text(ACCESS_DENIED_MESSAGE.into()));
    assert_eq!(app.session.state(), SessionState::Authenticated);
}

#[tokio::test(start_paused = true)]
async fn deferred_logout_spares_a_newer_session() {
    let api = FakeApi::new();
    api.set("ongoing-port-calls", Some(ApiResponse::session_expired()));
    let app = app(api, closed_port().await);
    app.session
        .log_in(&login_payload(7, "me@example.com", None))
        .unwrap();

    app.portcalls.fetch_portcalls().await;
    app.session
        .log_in(&login_payload(8, "other@example.com", None))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(app.session.state(), SessionState::Authenticated);
    assert_eq!(app.session.session_id().as_deref(), Some("session-8"));
}

#[tokio::test]
async fn log_out_clears_identity() {
    let storage = Storage::in_memory(Arc::new(TracingReporter));
    let app = app_on(FakeApi::new(), storage.clone(), closed_port().await);
    app.session
        .log_in(&login_payload(7, "me@example.com", None))
        .unwrap();
    app.session.set_namespace("vuosaari");
    let mut states = app.session.subscribe_state();

    app.session.log_out().await;
    assert_eq!(*states.borrow_and_update(), SessionState::Anonymous);
    assert_eq!(app.session.namespace(), "common");
    assert_eq!(app.session.user_id(), None);
    assert!(!storage.exists(USER_INFO_KEY));
}

#[tokio::test]
async fn vibration_setting_is_persisted_and_honoured() {
    let haptics = Arc::new(CountingHaptics::default());
    let storage = Storage::in_memory(Arc::new(TracingReporter));
    let capabilities = Capabilities {
        haptics: haptics.clone(),
        ..Capabilities::default()
    };
    let app = AppContext::with_api(
        config(closed_port().await),
        capabilities,
        FakeApi::new(),
        storage.clone(),
    );

    assert!(app.session.show_toast(ToastRequest::new(
        ToastKind::Error,
        "first",
        Duration::from_secs(1)
    )));
    assert_eq!(haptics.0.load(Ordering::SeqCst), 1);

    app.session.set_disable_vibration(true);
    assert!(storage.load_disable_vibration());
    app.session.show_toast(ToastRequest::new(
        ToastKind::Error,
        "second",
        Duration::from_secs(1),
    ));
    assert_eq!(haptics.0.load(Ordering::SeqCst), 1);
}
