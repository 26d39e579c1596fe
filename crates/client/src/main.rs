//! Headless sync client.
//!
//! Restores or creates a session, attaches the stores to the realtime
//! channels and logs what they publish until interrupted.

use anyhow::Context;
use portcall_client::logging::{init_tracing, DEFAULT_FILTER};
use portcall_client::{AppContext, Capabilities, ClientConfig, SessionState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(DEFAULT_FILTER);

    let config = ClientConfig::from_env();
    tracing::info!(
        api = %config.api_endpoint,
        socket = %config.socket.url(),
        data_dir = %config.data_dir.display(),
        "starting"
    );
    let app = AppContext::new(config, Capabilities::default());

    if app.session.restore().await == SessionState::Anonymous {
        let email = std::env::var("PORTCALL_EMAIL")
            .context("no stored session and PORTCALL_EMAIL is not set")?;
        let password =
            std::env::var("PORTCALL_PASSWORD").context("PORTCALL_PASSWORD is not set")?;
        app.session
            .login(&email, &password)
            .await
            .context("login failed")?;
    }
    tracing::info!(email = %app.session.email(), "signed in");

    let mut toasts = app.toasts.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = toasts.recv().await {
            tracing::info!(kind = ?event.kind, phase = ?event.phase, content = ?event.content, "toast");
        }
    });
    let mut portcalls = app.portcalls.subscribe();
    tokio::spawn(async move {
        while let Ok(state) = portcalls.recv().await {
            tracing::info!(
                port_calls = state.port_calls.len(),
                pinned = ?state.pinned_vessels,
                "port calls updated"
            );
        }
    });
    let mut notifications = app.notifications.subscribe();
    tokio::spawn(async move {
        while notifications.changed().await.is_ok() {
            let count = notifications.borrow_and_update().len();
            tracing::info!(count, "notifications updated");
        }
    });

    app.attach_all().await;
    app.refresh_all().await;
    tracing::info!(
        unread = app.notifications.new_notifications_count(),
        "initial sync done"
    );

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");
    app.detach_all().await;
    app.session.remove_data_event_source(true).await;
    Ok(())
}
