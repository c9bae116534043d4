//! PCM codec for the live session wire format.
//!
//! The remote service exchanges audio as **16-bit signed little-endian PCM**,
//! base64-encoded so it can travel inside JSON text frames.  Locally the
//! pipeline works with `f32` samples in `[-1.0, 1.0]`.
//!
//! * [`encode`]: `f32` frame → [`EncodedChunk`] (capture side, 16 kHz).
//! * [`decode`]: base64 payload → planar [`AudioBuffer`] (playback side, 24 kHz).
//!
//! # Example
//!
//! ```rust
//! use companion_voice::audio::codec::{decode, encode, CAPTURE_SAMPLE_RATE};
//!
//! let chunk = encode(&[0.0, 0.5, -0.5], CAPTURE_SAMPLE_RATE);
//! assert_eq!(chunk.mime_type(), "audio/pcm;rate=16000");
//!
//! let buffer = decode(chunk.data(), CAPTURE_SAMPLE_RATE, 1).unwrap();
//! assert_eq!(buffer.frames(), 3);
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Sample rate of microphone audio sent to the live session.
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of model audio received from the live session.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Scale applied when quantising `f32` → `i16`.
const ENCODE_SCALE: f32 = 32_767.0;

/// Divisor applied when expanding `i16` → `f32`.
const DECODE_SCALE: f32 = 32_768.0;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Reasons an inbound audio payload could not be turned into samples.
///
/// A decode failure only ever affects the offending chunk; callers skip it
/// and keep the session running.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error("audio payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("audio payload of {len} bytes is not a whole number of {channels}-channel i16 frames")]
    Misaligned { len: usize, channels: u16 },

    #[error("audio payload declares zero channels")]
    NoChannels,

    #[error("audio payload is empty")]
    Empty,
}

// ---------------------------------------------------------------------------
// EncodedChunk
// ---------------------------------------------------------------------------

/// One encoded capture frame, ready for the outbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    data: String,
    sample_rate: u32,
}

impl EncodedChunk {
    /// Base64 text of the little-endian `i16` samples.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Sample rate the frame was captured at.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// MIME descriptor sent alongside the payload, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    pub fn into_data(self) -> String {
        self.data
    }
}

// ---------------------------------------------------------------------------
// AudioBuffer
// ---------------------------------------------------------------------------

/// Decoded audio, one `Vec<f32>` per channel (planar layout).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Build a single-channel buffer.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: vec![samples],
        }
    }

    /// Build a buffer from planar channel data.
    ///
    /// # Panics
    ///
    /// Panics if `channels` is empty or the channels differ in length.
    pub fn from_planar(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        assert!(!channels.is_empty(), "AudioBuffer needs at least one channel");
        let frames = channels[0].len();
        assert!(
            channels.iter().all(|c| c.len() == frames),
            "AudioBuffer channels must have equal length"
        );
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples of channel `index`.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Average all channels into one.
    pub fn to_mono(&self) -> Vec<f32> {
        if self.channels.len() == 1 {
            return self.channels[0].clone();
        }
        let n = self.channels.len() as f32;
        (0..self.frames())
            .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// encode / decode
// ---------------------------------------------------------------------------

/// Encode a mono `f32` frame as base64 16-bit PCM.
///
/// Each sample is clamped to `[-1, 1]`, scaled by 32767, rounded, and written
/// little-endian.
pub fn encode(frame: &[f32], sample_rate: u32) -> EncodedChunk {
    let mut bytes = Vec::with_capacity(frame.len() * 2);
    for &sample in frame {
        bytes.extend_from_slice(&quantize(sample).to_le_bytes());
    }
    EncodedChunk {
        data: STANDARD.encode(&bytes),
        sample_rate,
    }
}

/// Decode a base64 16-bit PCM payload into a planar buffer.
///
/// Interleaved input is split per channel when `channels > 1`.
pub fn decode(data: &str, sample_rate: u32, channels: u16) -> Result<AudioBuffer, DecodeError> {
    if channels == 0 {
        return Err(DecodeError::NoChannels);
    }

    let bytes = STANDARD.decode(data)?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let stride = 2 * channels as usize;
    if bytes.len() % stride != 0 {
        return Err(DecodeError::Misaligned {
            len: bytes.len(),
            channels,
        });
    }

    let frames = bytes.len() / stride;
    let mut planar = vec![Vec::with_capacity(frames); channels as usize];
    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        planar[i % channels as usize].push(value as f32 / DECODE_SCALE);
    }

    Ok(AudioBuffer {
        sample_rate,
        channels: planar,
    })
}

fn quantize(sample: f32) -> i16 {
    // NaN clamps to NaN; treat it as silence.
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    (s * ENCODE_SCALE).round() as i16
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Worst-case error of `round(s * 32767) / 32768` against `s`.
    const QUANTIZATION_TOLERANCE: f32 = 1.5 / 32_768.0;

    fn raw_bytes(chunk: &EncodedChunk) -> Vec<u8> {
        STANDARD.decode(chunk.data()).unwrap()
    }

    #[test]
    fn encode_scales_and_writes_little_endian() {
        let chunk = encode(&[0.0, 1.0, -1.0], CAPTURE_SAMPLE_RATE);
        let bytes = raw_bytes(&chunk);
        assert_eq!(bytes.len(), 6);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 0);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), 32_767);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), -32_767);
    }

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let chunk = encode(&[3.0, -7.5], CAPTURE_SAMPLE_RATE);
        let bytes = raw_bytes(&chunk);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32_767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32_767);
    }

    #[test]
    fn encode_rounds_to_nearest() {
        // 0.25 * 32767 = 8191.75 → 8192
        let bytes = raw_bytes(&encode(&[0.25], CAPTURE_SAMPLE_RATE));
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 8_192);
    }

    #[test]
    fn encode_is_deterministic() {
        let frame: Vec<f32> = (0..64).map(|i| (i as f32 * 0.1).sin()).collect();
        assert_eq!(
            encode(&frame, CAPTURE_SAMPLE_RATE),
            encode(&frame, CAPTURE_SAMPLE_RATE)
        );
    }

    #[test]
    fn mime_type_carries_rate() {
        let chunk = encode(&[0.0], CAPTURE_SAMPLE_RATE);
        assert_eq!(chunk.mime_type(), "audio/pcm;rate=16000");
        assert_eq!(chunk.sample_rate(), 16_000);
    }

    #[test]
    fn round_trip_within_quantization_error() {
        let frame: Vec<f32> = (0..4096)
            .map(|i| ((i as f32) / 4096.0 * 2.0 - 1.0).clamp(-1.0, 1.0))
            .collect();
        let chunk = encode(&frame, CAPTURE_SAMPLE_RATE);
        let buffer = decode(chunk.data(), CAPTURE_SAMPLE_RATE, 1).unwrap();

        assert_eq!(buffer.frames(), frame.len());
        for (orig, back) in frame.iter().zip(buffer.channel(0)) {
            assert!(
                (orig - back).abs() <= QUANTIZATION_TOLERANCE,
                "sample drifted: {orig} -> {back}"
            );
        }
    }

    #[test]
    fn decode_divides_by_32768() {
        let bytes: Vec<u8> = [i16::MIN, 16_384]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let buffer = decode(&STANDARD.encode(bytes), PLAYBACK_SAMPLE_RATE, 1).unwrap();
        assert_eq!(buffer.channel(0), &[-1.0, 0.5]);
    }

    #[test]
    fn decode_deinterleaves_stereo() {
        let bytes: Vec<u8> = [100_i16, -100, 200, -200]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let buffer = decode(&STANDARD.encode(bytes), PLAYBACK_SAMPLE_RATE, 2).unwrap();

        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frames(), 2);
        assert_eq!(buffer.channel(0), &[100.0 / 32_768.0, 200.0 / 32_768.0]);
        assert_eq!(buffer.channel(1), &[-100.0 / 32_768.0, -200.0 / 32_768.0]);
    }

    #[test]
    fn decode_rejects_odd_byte_count() {
        let err = decode(&STANDARD.encode([1u8, 2, 3]), PLAYBACK_SAMPLE_RATE, 1).unwrap_err();
        assert_eq!(err, DecodeError::Misaligned { len: 3, channels: 1 });
    }

    #[test]
    fn decode_rejects_partial_stereo_frame() {
        // 6 bytes = 3 samples, not divisible into 2-channel frames
        let err = decode(&STANDARD.encode([0u8; 6]), PLAYBACK_SAMPLE_RATE, 2).unwrap_err();
        assert!(matches!(err, DecodeError::Misaligned { len: 6, channels: 2 }));
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        let err = decode("not*base64!", PLAYBACK_SAMPLE_RATE, 1).unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn decode_rejects_empty_and_zero_channels() {
        assert_eq!(decode("", PLAYBACK_SAMPLE_RATE, 1), Err(DecodeError::Empty));
        assert_eq!(
            decode(&STANDARD.encode([0u8; 4]), PLAYBACK_SAMPLE_RATE, 0),
            Err(DecodeError::NoChannels)
        );
    }

    #[test]
    fn buffer_duration_uses_sample_rate() {
        let buffer = AudioBuffer::mono(vec![0.0; 24_000], PLAYBACK_SAMPLE_RATE);
        assert!((buffer.duration() - 1.0).abs() < 1e-9);

        let half = AudioBuffer::mono(vec![0.0; 12_000], PLAYBACK_SAMPLE_RATE);
        assert!((half.duration() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn to_mono_averages_channels() {
        let buffer = AudioBuffer::from_planar(vec![vec![1.0, 0.0], vec![0.0, 0.5]], 24_000);
        assert_eq!(buffer.to_mono(), vec![0.5, 0.25]);
    }
}
