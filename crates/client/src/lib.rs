//! Port-call sync client
//!
//! Keeps an authenticated realtime connection to the port-call service,
//! mirrors port calls, pinned vessels and notifications into observable
//! stores, and decides which events become toasts.

pub mod api_client;
pub mod app;
pub mod capabilities;
pub mod config;
pub mod endpoints;
pub mod logging;
pub mod session;
pub mod socket;
pub mod storage;
pub mod stores;
pub mod toast;

pub use api_client::{Api, ApiClient};
pub use app::AppContext;
pub use capabilities::Capabilities;
pub use config::ClientConfig;
pub use session::{SessionManager, SessionState};
pub use socket::EventSocket;
pub use storage::Storage;
pub use toast::{ToastDispatcher, ToastKind};
