//! Client configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Where the realtime socket lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketOptions {
    pub hostname: String,
    pub port: u16,
    pub secure: bool,
    /// How long a request waits for the server's reply.
    pub ack_timeout: Duration,
}

impl SocketOptions {
    /// `secure` follows the port: only 443 uses TLS.
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            secure: port == 443,
            ack_timeout: Duration::from_secs(10),
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}/socketcluster/", scheme, self.hostname, self.port)
    }
}

/// Delays used by the session, notification and toast timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    pub logout_delay: Duration,
    pub read_grace: Duration,
    pub toast_fade_in: Duration,
    pub toast_fade_out: Duration,
    pub toast_close_delay: Duration,
    pub access_denied_toast: Duration,
    /// Pause between attempts to bring the realtime subscriptions back.
    pub resubscribe_retry: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            logout_delay: Duration::from_millis(100),
            read_grace: Duration::from_millis(3000),
            toast_fade_in: Duration::from_millis(500),
            toast_fade_out: Duration::from_millis(500),
            toast_close_delay: Duration::ZERO,
            access_denied_toast: Duration::from_millis(2500),
            resubscribe_retry: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_endpoint: String,
    pub socket: SocketOptions,
    pub namespace: String,
    pub data_dir: PathBuf,
    pub time_zone: Option<String>,
    pub timings: SyncTimings,
}

pub const DEFAULT_API_ENDPOINT: &str = "http://127.0.0.1:8000";
pub const DEFAULT_SOCKET_HOST: &str = "127.0.0.1";
pub const DEFAULT_SOCKET_PORT: u16 = 8002;
pub const DEFAULT_NAMESPACE: &str = "common";

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ClientConfig {
    /// Read configuration from the process environment.
    ///
    /// Environment variables:
    /// - `PORTCALL_API_ENDPOINT`: REST API root (default: "http://127.0.0.1:8000")
    /// - `PORTCALL_SOCKET_HOST`: realtime host (default: "127.0.0.1")
    /// - `PORTCALL_SOCKET_PORT`: realtime port (default: 8002)
    /// - `PORTCALL_NAMESPACE`: default namespace (default: "common")
    /// - `PORTCALL_DATA_DIR`: persisted state directory (default: config dir + "portcall")
    /// - `PORTCALL_TIME_ZONE`: sent as `ClientTimeZone` on authenticated calls
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_endpoint = non_empty("PORTCALL_API_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_API_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();
        let hostname =
            non_empty("PORTCALL_SOCKET_HOST").unwrap_or_else(|| DEFAULT_SOCKET_HOST.to_string());
        let port = non_empty("PORTCALL_SOCKET_PORT")
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(DEFAULT_SOCKET_PORT);
        let namespace =
            non_empty("PORTCALL_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let data_dir = non_empty("PORTCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        Self {
            api_endpoint,
            socket: SocketOptions::new(hostname, port),
            namespace,
            data_dir,
            time_zone: non_empty("PORTCALL_TIME_ZONE"),
            timings: SyncTimings::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("portcall")
}
