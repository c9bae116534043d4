//! Call state machine and the status snapshot the UI renders.
//!
//! [`SessionState`] is mutated only by the call controller.  The UI reads it
//! through [`SharedCallStatus`] each frame to pick the overlay text.
//!
//! [`SharedCallStatus`] is `Arc<Mutex<CallStatus>>`: cheap to clone and safe to
//! share between the controller task and the egui update loop.

use std::sync::{Arc, Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of one live call.
///
/// ```text
/// Connecting ──setup complete, mic open──▶ Connected ──hang up / clean remote close──▶ Closed
///     │                                        │
///     └──connect / mic failure──▶ Error ◀──transport failure──┘
/// Connecting ──hang up──▶ Closed
/// ```
///
/// `Closed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Connecting,
    Connected,
    Error,
    Closed,
}

impl SessionState {
    /// `true` once no further transitions are possible.
    ///
    /// ```
    /// use companion_voice::live::SessionState;
    ///
    /// assert!(!SessionState::Connecting.is_terminal());
    /// assert!(!SessionState::Connected.is_terminal());
    /// assert!(SessionState::Error.is_terminal());
    /// assert!(SessionState::Closed.is_terminal());
    /// ```
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Error | SessionState::Closed)
    }

    /// Overlay headline for this state.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Connecting => "Connecting...",
            SessionState::Connected => "Live Call",
            SessionState::Error => "Connection Failed",
            SessionState::Closed => "Call Ended",
        }
    }
}

// ---------------------------------------------------------------------------
// CallStatus
// ---------------------------------------------------------------------------

/// Everything the call overlay needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallStatus {
    pub state: SessionState,

    /// Model audio is currently playing.
    pub speaking: bool,

    /// Set when `state == SessionState::Error`.
    pub error_message: Option<String>,

    /// Outbound frames dropped under backpressure during this call.
    pub dropped_frames: u64,

    /// Inbound audio chunks that failed to decode and were skipped.
    pub skipped_chunks: u64,
}

impl CallStatus {
    /// Line under the headline: `Speaking...` / `Listening...` while live.
    pub fn activity_label(&self) -> Option<&'static str> {
        match self.state {
            SessionState::Connected if self.speaking => Some("Speaking..."),
            SessionState::Connected => Some("Listening..."),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// SharedCallStatus
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`CallStatus`].
///
/// Lock for a short critical section; never hold it across `.await`.
pub type SharedCallStatus = Arc<Mutex<CallStatus>>;

pub fn new_shared_call_status() -> SharedCallStatus {
    Arc::new(Mutex::new(CallStatus::default()))
}

/// Lock `status`, recovering the data if a previous holder panicked.
pub fn lock_status(status: &SharedCallStatus) -> MutexGuard<'_, CallStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_connecting() {
        assert_eq!(SessionState::default(), SessionState::Connecting);
        let status = CallStatus::default();
        assert!(!status.speaking);
        assert!(status.error_message.is_none());
        assert_eq!(status.dropped_frames, 0);
    }

    #[test]
    fn labels_match_overlay_text() {
        assert_eq!(SessionState::Connecting.label(), "Connecting...");
        assert_eq!(SessionState::Connected.label(), "Live Call");
        assert_eq!(SessionState::Error.label(), "Connection Failed");
    }

    #[test]
    fn activity_label_only_while_connected() {
        let mut status = CallStatus::default();
        assert_eq!(status.activity_label(), None);

        status.state = SessionState::Connected;
        assert_eq!(status.activity_label(), Some("Listening..."));

        status.speaking = true;
        assert_eq!(status.activity_label(), Some("Speaking..."));

        status.state = SessionState::Closed;
        assert_eq!(status.activity_label(), None);
    }

    #[test]
    fn shared_status_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedCallStatus>();
    }

    #[test]
    fn shared_status_can_be_cloned_and_mutated() {
        let status = new_shared_call_status();
        let other = Arc::clone(&status);

        lock_status(&status).state = SessionState::Connected;
        assert_eq!(lock_status(&other).state, SessionState::Connected);
    }
}
