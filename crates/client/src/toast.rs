//! Toast presentation slots.
//!
//! There is one slot per [`ToastKind`]. A slot shows at most one message: a
//! new `show` replaces whatever is on screen and cancels its timers instead
//! of queueing behind it. Presentation is published as [`ToastEvent`]s for
//! the UI layer to animate.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use portcall_shared::Notification;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::capabilities::Haptics;
use crate::config::SyncTimings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToastKind {
    Error,
    Notification,
    Success,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToastContent {
    Text(String),
    Notification(Box<Notification>),
}

impl From<&str> for ToastContent {
    fn from(text: &str) -> Self {
        ToastContent::Text(text.to_string())
    }
}

impl From<String> for ToastContent {
    fn from(text: String) -> Self {
        ToastContent::Text(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastPhase {
    FadingIn,
    Visible,
    FadingOut,
    Hidden,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToastEvent {
    pub kind: ToastKind,
    pub phase: ToastPhase,
    pub content: ToastContent,
}

pub type ToastCallback = Box<dyn FnOnce() + Send + 'static>;

/// A routed toast. A zero `duration` keeps it up until tapped.
pub struct ToastRequest {
    pub kind: ToastKind,
    pub content: ToastContent,
    pub duration: Duration,
    pub silent: bool,
    pub callback: Option<ToastCallback>,
}

impl ToastRequest {
    pub fn new(kind: ToastKind, content: impl Into<ToastContent>, duration: Duration) -> Self {
        Self {
            kind,
            content: content.into(),
            duration,
            silent: false,
            callback: None,
        }
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn on_close(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for ToastRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToastRequest")
            .field("kind", &self.kind)
            .field("content", &self.content)
            .field("duration", &self.duration)
            .field("silent", &self.silent)
            .finish_non_exhaustive()
    }
}

/// Who is looking at the screen, for routing decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToastViewer {
    /// `None` before any user info is known.
    pub email: Option<String>,
    pub disable_vibration: bool,
}

#[derive(Default)]
struct SlotState {
    showing: bool,
    content: Option<ToastContent>,
    timer: Option<JoinHandle<()>>,
    pending_callback: Option<ToastCallback>,
    generation: u64,
}

#[derive(Default)]
struct Slot {
    state: Mutex<SlotState>,
}

impl Slot {
    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct DispatcherInner {
    error: Slot,
    notification: Slot,
    success: Slot,
    events: broadcast::Sender<ToastEvent>,
    timings: SyncTimings,
    haptics: Arc<dyn Haptics>,
}

#[derive(Clone)]
pub struct ToastDispatcher {
    inner: Arc<DispatcherInner>,
}

impl ToastDispatcher {
    pub fn new(timings: SyncTimings, haptics: Arc<dyn Haptics>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(DispatcherInner {
                error: Slot::default(),
                notification: Slot::default(),
                success: Slot::default(),
                events,
                timings,
                haptics,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ToastEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_showing(&self, kind: ToastKind) -> bool {
        self.slot(kind).lock().showing
    }

    /// Route a request to its slot.
    ///
    /// Errors vibrate unless the user disabled it or the request is silent.
    /// Notifications sent by the viewer are not shown to them. Returns
    /// whether anything was shown.
    pub fn request(&self, request: ToastRequest, viewer: &ToastViewer) -> bool {
        let vibrate = !viewer.disable_vibration && !request.silent;
        match request.kind {
            ToastKind::Error => {
                if vibrate {
                    self.inner.haptics.vibrate();
                }
            }
            ToastKind::Notification => {
                let sender = match &request.content {
                    ToastContent::Notification(n) => n.sender.email.as_str(),
                    ToastContent::Text(_) => "",
                };
                match viewer.email.as_deref() {
                    Some(email) if email != sender => {
                        if vibrate {
                            self.inner.haptics.vibrate();
                        }
                    }
                    _ => {
                        tracing::debug!(sender, "notification toast suppressed");
                        return false;
                    }
                }
            }
            ToastKind::Success => {}
        }
        self.show(request.kind, request.content, request.duration, request.callback);
        true
    }

    /// Show `content`, replacing whatever the slot currently shows.
    ///
    /// With a non-zero `duration` the toast closes itself after fading in and
    /// waiting `duration`, then runs `callback`. With a zero duration it stays
    /// until [`tap`](Self::tap), which runs `callback`.
    pub fn show(
        &self,
        kind: ToastKind,
        content: ToastContent,
        duration: Duration,
        callback: Option<ToastCallback>,
    ) {
        let slot = self.slot(kind);
        let mut state = slot.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;
        state.showing = true;
        state.content = Some(content.clone());
        // A sticky toast hands its callback to `tap`, which may come before
        // the fade-in is over.
        let callback = if duration.is_zero() {
            state.pending_callback = callback;
            None
        } else {
            state.pending_callback = None;
            callback
        };
        let generation = state.generation;
        tracing::debug!(?kind, ?duration, "showing toast");
        self.emit(kind, ToastPhase::FadingIn, content);

        let this = self.clone();
        let fade_in = self.inner.timings.toast_fade_in;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(fade_in).await;
            {
                let mut state = this.slot(kind).lock();
                if state.generation != generation {
                    return;
                }
                state.timer.take();
                if let Some(content) = state.content.clone() {
                    this.emit(kind, ToastPhase::Visible, content);
                }
                if duration.is_zero() {
                    return;
                }
            }
            this.close(kind, duration, callback, true);
        }));
    }

    /// Fade the toast out after `duration` and run `callback` once hidden.
    ///
    /// A zero duration closes immediately, the way a tap does. Does nothing
    /// when the slot is not showing unless `force_show` is set.
    pub fn close(
        &self,
        kind: ToastKind,
        duration: Duration,
        callback: Option<ToastCallback>,
        force_show: bool,
    ) {
        let slot = self.slot(kind);
        let mut state = slot.lock();
        if !state.showing && !force_show {
            return;
        }
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }

        let timings = self.inner.timings;
        let (delay, fade_out) = if duration.is_zero() {
            (timings.toast_close_delay, Duration::ZERO)
        } else {
            (duration, timings.toast_fade_out)
        };
        let generation = state.generation;

        let this = self.clone();
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(content) = this.current_content(kind, generation) {
                this.emit(kind, ToastPhase::FadingOut, content);
            }
            tokio::time::sleep(fade_out).await;

            let content = {
                let mut state = this.slot(kind).lock();
                if state.generation != generation {
                    return;
                }
                state.showing = false;
                state.timer = None;
                state.content.clone()
            };
            if let Some(callback) = callback {
                callback();
            }
            if let Some(content) = content {
                this.emit(kind, ToastPhase::Hidden, content);
            }
            tracing::debug!(?kind, "toast hidden");
        }));
    }

    /// The user tapped the toast: close it now and run the callback left by
    /// a sticky `show`.
    pub fn tap(&self, kind: ToastKind) {
        let callback = self.slot(kind).lock().pending_callback.take();
        self.close(kind, Duration::ZERO, callback, false);
    }

    fn slot(&self, kind: ToastKind) -> &Slot {
        match kind {
            ToastKind::Error => &self.inner.error,
            ToastKind::Notification => &self.inner.notification,
            ToastKind::Success => &self.inner.success,
        }
    }

    fn current_content(&self, kind: ToastKind, generation: u64) -> Option<ToastContent> {
        let state = self.slot(kind).lock();
        if state.generation == generation {
            state.content.clone()
        } else {
            None
        }
    }

    fn emit(&self, kind: ToastKind, phase: ToastPhase, content: ToastContent) {
        let _ = self.inner.events.send(ToastEvent {
            kind,
            phase,
            content,
        });
    }
}

impl std::fmt::Debug for ToastDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToastDispatcher")
            .field("timings", &self.inner.timings)
            .finish_non_exhaustive()
    }
}
