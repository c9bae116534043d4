//! Live voice calls over a Gemini Live session.
//!
//! # Modules
//!
//! - [`messages`]   : setup / realtime-input JSON and server message parsing
//! - [`transport`]  : [`LiveConnector`] seam and the WebSocket implementation
//! - [`state`]      : [`SessionState`] and the [`SharedCallStatus`] snapshot
//! - [`controller`] : [`CallController`] event loop and [`start_call`]

pub mod controller;
pub mod messages;
pub mod state;
pub mod transport;

pub use controller::{start_call, CallController, CallEvent, CallHandle, CallSettings};
pub use messages::{InlineAudio, ServerContent, ServerMessage, SessionSetup};
pub use state::{lock_status, new_shared_call_status, CallStatus, SessionState, SharedCallStatus};
pub use transport::{
    EventSink, GeminiLiveConnector, LinkEvent, LiveConnector, LiveLink, TransportError,
};
