//! Persona companion chat with realtime voice calls.
//!
//! - [`audio`]  : capture, codec, playback scheduling, speaker output
//! - [`live`]   : live voice-call session and its controller
//! - [`chat`]   : personas, conversations, text/photo/voice-note replies
//! - [`config`] : `settings.toml` persistence
//! - [`app`]    : egui window

pub mod app;
pub mod audio;
pub mod chat;
pub mod config;
pub mod live;
