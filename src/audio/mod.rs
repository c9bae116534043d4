//! Audio for live calls and voice notes.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → AudioChunk → downmix → StreamResampler(16 kHz)
//!           → FrameAssembler(4096) → codec::encode → outbound queue
//!
//! inbound base64 → codec::decode(24 kHz) → PlaybackScheduler
//!           → OutputEngine (Mixer) → speaker
//!
//! voice note base64 → VoiceNotePlayer → OutputEngine
//! ```

pub mod buffer;
pub mod capture;
pub mod codec;
pub mod output;
pub mod resample;
pub mod scheduler;
pub mod voice_note;

pub use buffer::FrameAssembler;
pub use capture::{
    AudioCapture, AudioChunk, CaptureError, CapturePipeline, CaptureSettings, DefaultMic,
    MicSource, StreamHandle,
};
pub use codec::{
    decode, encode, AudioBuffer, DecodeError, EncodedChunk, CAPTURE_SAMPLE_RATE,
    PLAYBACK_SAMPLE_RATE,
};
pub use output::{Mixer, OutputEngine, OutputError};
pub use resample::{downmix, resample, StreamResampler};
pub use scheduler::{AudioOutput, PlaybackScheduler, PlaybackUnit, StopError, UnitId};
pub use voice_note::{VoiceNoteError, VoiceNotePlayer};
