//! Host capabilities the sync core consumes but does not implement:
//! error tracking, haptics, push tokens and string localization.

use std::sync::Arc;

use async_trait::async_trait;
use portcall_shared::SyncError;
use serde::Serialize;

/// External error tracking.
pub trait ErrorReporter: Send + Sync {
    fn capture_error(&self, error: &SyncError);
    fn capture_message(&self, message: &str);
}

/// Reports into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn capture_error(&self, error: &SyncError) {
        tracing::warn!(error = %error, "captured error");
    }

    fn capture_message(&self, message: &str) {
        tracing::warn!(message, "captured message");
    }
}

pub trait Haptics: Send + Sync {
    fn vibrate(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoHaptics;

impl Haptics for NoHaptics {
    fn vibrate(&self) {}
}

/// What the backend needs to deliver OS push notifications to this install.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PushRegistration {
    pub installation_id: String,
    pub platform: String,
    pub push_token: String,
}

/// OS push registration. `None` when permission was refused or the device
/// cannot receive pushes.
#[async_trait]
pub trait PushTokenProvider: Send + Sync {
    async fn registration(&self) -> Option<PushRegistration>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoPushTokens;

#[async_trait]
impl PushTokenProvider for NoPushTokens {
    async fn registration(&self) -> Option<PushRegistration> {
        None
    }
}

pub trait Localizer: Send + Sync {
    fn translate(&self, key: &str) -> String;
}

/// Returns keys untranslated.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityLocalizer;

impl Localizer for IdentityLocalizer {
    fn translate(&self, key: &str) -> String {
        key.to_string()
    }
}

#[derive(Clone)]
pub struct Capabilities {
    pub reporter: Arc<dyn ErrorReporter>,
    pub haptics: Arc<dyn Haptics>,
    pub push_tokens: Arc<dyn PushTokenProvider>,
    pub localizer: Arc<dyn Localizer>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            reporter: Arc::new(TracingReporter),
            haptics: Arc::new(NoHaptics),
            push_tokens: Arc::new(NoPushTokens),
            localizer: Arc::new(IdentityLocalizer),
        }
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}
