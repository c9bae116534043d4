//! Microphone capture via `cpal`, framed and encoded for the live session.
//!
//! [`AudioCapture`] wraps the cpal host/device/stream lifecycle and streams
//! raw [`AudioChunk`]s over an mpsc channel.  [`CapturePipeline`] sits on top
//! of any [`MicSource`] and turns those chunks into outbound audio:
//!
//! ```text
//! cpal callback ──AudioChunk──► audio-capture thread
//!                                 downmix → StreamResampler(16 kHz)
//!                                 → FrameAssembler(4096) → codec::encode
//!                                 ──try_send──► outbound queue (bounded)
//! ```
//!
//! The outbound send never blocks.  A full or closed queue drops the frame
//! and bumps the dropped-frame counter.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::audio::buffer::FrameAssembler;
use crate::audio::codec::{self, EncodedChunk, CAPTURE_SAMPLE_RATE};
use crate::audio::resample::{downmix, StreamResampler};

/// Samples per outbound frame.
pub const FRAME_SIZE: usize = 4096;

/// How often the capture thread checks for a stop request while idle.
const STOP_POLL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the input callback.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Sample rate of this chunk in Hz (e.g. 44100, 48000).
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// RAII guard that keeps an input stream alive.
///
/// Dropping it stops the underlying hardware stream.  Not `Send` on every
/// platform, so it is created and dropped on the capture thread.
pub struct StreamHandle {
    _stream: Option<cpal::Stream>,
}

impl StreamHandle {
    /// A handle with no hardware stream behind it, for sources that push
    /// their chunks without a device.
    pub fn detached() -> Self {
        Self { _stream: None }
    }
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// The microphone could not be acquired.
///
/// Every variant is fatal for a call; acquisition is never retried.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("microphone access denied: {0}")]
    Denied(String),

    #[error("capture thread failed: {0}")]
    Thread(String),
}

// ---------------------------------------------------------------------------
// MicSource
// ---------------------------------------------------------------------------

/// Something that can be opened to produce raw microphone chunks.
///
/// `open` is called on the capture thread; the returned handle is dropped
/// there when capture stops.
pub trait MicSource: Send + Sync + 'static {
    fn open(&self, tx: std_mpsc::Sender<AudioChunk>) -> Result<StreamHandle, CaptureError>;
}

/// The system default input device.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultMic;

impl MicSource for DefaultMic {
    fn open(&self, tx: std_mpsc::Sender<AudioChunk>) -> Result<StreamHandle, CaptureError> {
        AudioCapture::new()?.start(tx)
    }
}

// ---------------------------------------------------------------------------
// AudioCapture
// ---------------------------------------------------------------------------

/// Microphone device wrapper built on top of `cpal`.
pub struct AudioCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_rate: u32,
    channels: u16,
}

impl AudioCapture {
    /// Use the system default input device with its preferred configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::NoDevice`] when no input device is available,
    /// or [`CaptureError::DefaultConfig`] when the device cannot report a
    /// default stream configuration.
    pub fn new() -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(CaptureError::NoDevice)?;

        let supported = device.default_input_config()?;

        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        Ok(Self {
            device,
            config,
            sample_rate,
            channels,
        })
    }

    /// Start recording and send [`AudioChunk`]s to `tx`.
    ///
    /// Send errors (receiver dropped) are ignored so the audio thread never
    /// panics.
    pub fn start(&self, tx: std_mpsc::Sender<AudioChunk>) -> Result<StreamHandle, CaptureError> {
        let sample_rate = self.sample_rate;
        let channels = self.channels;

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let chunk = AudioChunk {
                    samples: data.to_vec(),
                    sample_rate,
                    channels,
                };
                let _ = tx.send(chunk);
            },
            |err: cpal::StreamError| {
                log::error!("cpal input stream error: {err}");
            },
            None,
        )?;

        stream.play()?;
        log::info!("Microphone opened ({} Hz, {} ch)", sample_rate, channels);
        Ok(StreamHandle {
            _stream: Some(stream),
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

// ---------------------------------------------------------------------------
// CapturePipeline
// ---------------------------------------------------------------------------

/// Output format of the capture pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub sample_rate: u32,
    pub frame_size: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            sample_rate: CAPTURE_SAMPLE_RATE,
            frame_size: FRAME_SIZE,
        }
    }
}

/// Mic → fixed frames → encoded chunks → outbound queue.
pub struct CapturePipeline {
    settings: CaptureSettings,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            stop: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            thread: None,
        }
    }

    /// Acquire the microphone and start feeding `outbound`.
    ///
    /// Blocks until the mic is open (or failed to open), which can take as
    /// long as a permission prompt stays up.  Async callers run it through
    /// `tokio::task::spawn_blocking`.  Calling `start` while already running
    /// is a no-op.
    pub fn start(
        &mut self,
        mic: Arc<dyn MicSource>,
        outbound: mpsc::Sender<EncodedChunk>,
    ) -> Result<(), CaptureError> {
        if self.thread.is_some() {
            return Ok(());
        }

        self.stop.store(false, Ordering::SeqCst);
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), CaptureError>>();

        let bridge = Bridge {
            settings: self.settings,
            stop: Arc::clone(&self.stop),
            dropped: Arc::clone(&self.dropped),
            outbound,
            resampler: None,
        };

        let handle = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let (chunk_tx, chunk_rx) = std_mpsc::channel::<AudioChunk>();
                let stream = match mic.open(chunk_tx) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                bridge.run(chunk_rx);
                drop(stream);
            })
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.thread = Some(handle);
                log::info!("Capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(CaptureError::Thread(
                    "capture thread exited during startup".into(),
                ))
            }
        }
    }

    /// Stop frame delivery and release the microphone.
    ///
    /// Safe to call repeatedly and before `start`.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("capture thread panicked");
            }
            let dropped = self.dropped_frames();
            if dropped > 0 {
                log::warn!("Capture stopped; {dropped} outbound frame(s) dropped");
            } else {
                log::info!("Capture stopped");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Frames dropped because the outbound queue was full or closed.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for CapturePipeline {
    fn default() -> Self {
        Self::new(CaptureSettings::default())
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the `audio-capture` thread.
struct Bridge {
    settings: CaptureSettings,
    stop: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    outbound: mpsc::Sender<EncodedChunk>,
    /// Created from the first chunk's rate; replaced if the device rate changes.
    resampler: Option<StreamResampler>,
}

impl Bridge {
    fn run(mut self, chunks: std_mpsc::Receiver<AudioChunk>) {
        let mut frames = FrameAssembler::new(self.settings.frame_size);

        while !self.stop.load(Ordering::SeqCst) {
            let chunk = match chunks.recv_timeout(STOP_POLL) {
                Ok(chunk) => chunk,
                Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
                Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            };

            let mono = downmix(&chunk.samples, chunk.channels);
            let pcm = self.resampler_for(chunk.sample_rate).push(&mono);

            for frame in frames.push(&pcm) {
                if self.stop.load(Ordering::SeqCst) {
                    return;
                }
                self.forward(codec::encode(&frame, self.settings.sample_rate));
            }
        }
    }

    fn resampler_for(&mut self, source_rate: u32) -> &mut StreamResampler {
        let target = self.settings.sample_rate;
        let resampler = self
            .resampler
            .get_or_insert_with(|| StreamResampler::new(source_rate, target));
        if resampler.source_rate() != source_rate {
            log::info!("capture: input rate changed to {source_rate} Hz");
            *resampler = StreamResampler::new(source_rate, target);
        }
        resampler
    }

    fn forward(&self, chunk: EncodedChunk) {
        match self.outbound.try_send(chunk) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("outbound queue full, frame dropped ({total} total)");
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("outbound queue closed, frame dropped");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Pushes a fixed script of chunks when opened, then hangs up.
    struct ScriptedMic {
        chunks: Vec<AudioChunk>,
    }

    impl MicSource for ScriptedMic {
        fn open(&self, tx: std_mpsc::Sender<AudioChunk>) -> Result<StreamHandle, CaptureError> {
            for chunk in &self.chunks {
                let _ = tx.send(chunk.clone());
            }
            Ok(StreamHandle::detached())
        }
    }

    struct DeniedMic;

    impl MicSource for DeniedMic {
        fn open(&self, _tx: std_mpsc::Sender<AudioChunk>) -> Result<StreamHandle, CaptureError> {
            Err(CaptureError::Denied("user refused".into()))
        }
    }

    fn mono_chunks(count: usize, len: usize, rate: u32) -> Vec<AudioChunk> {
        (0..count)
            .map(|i| AudioChunk {
                samples: vec![(i as f32) / 100.0; len],
                sample_rate: rate,
                channels: 1,
            })
            .collect()
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn audio_chunk_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioChunk>();
        assert_send::<CapturePipeline>();
    }

    #[tokio::test]
    async fn frames_are_4096_samples_at_16k() {
        let mic = Arc::new(ScriptedMic {
            chunks: mono_chunks(10, 1000, 16_000),
        });
        let (tx, mut rx) = mpsc::channel(8);

        let mut pipeline = CapturePipeline::default();
        pipeline.start(mic, tx).unwrap();

        for _ in 0..2 {
            let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(chunk.mime_type(), "audio/pcm;rate=16000");
            let decoded = codec::decode(chunk.data(), 16_000, 1).unwrap();
            assert_eq!(decoded.frames(), 4096);
        }

        pipeline.stop();
        // 10_000 samples make two frames; the remainder is never sent.
        assert!(rx.try_recv().is_err());
        assert_eq!(pipeline.dropped_frames(), 0);
    }

    #[tokio::test]
    async fn stereo_48k_input_is_downmixed_and_resampled() {
        // 0.3 s of stereo at 48 kHz = 4800 mono samples @ 16 kHz
        let mic = Arc::new(ScriptedMic {
            chunks: vec![AudioChunk {
                samples: vec![0.5; 28_800],
                sample_rate: 48_000,
                channels: 2,
            }],
        });
        let (tx, mut rx) = mpsc::channel(8);

        let mut pipeline = CapturePipeline::default();
        pipeline.start(mic, tx).unwrap();

        let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let decoded = codec::decode(chunk.data(), 16_000, 1).unwrap();
        assert_eq!(decoded.frames(), 4096);
        assert!((decoded.channel(0)[100] - 0.5).abs() < 1e-3);
        pipeline.stop();
    }

    #[tokio::test]
    async fn callback_sized_blocks_keep_the_16k_rate() {
        // 2 s of 48 kHz in 512-sample callbacks: 32_000 samples, 7 full frames.
        let chunks = (0..188)
            .map(|_| AudioChunk {
                samples: vec![0.25; 512],
                sample_rate: 48_000,
                channels: 1,
            })
            .collect();
        let mic = Arc::new(ScriptedMic { chunks });
        let (tx, mut rx) = mpsc::channel(16);

        let mut pipeline = CapturePipeline::default();
        pipeline.start(mic, tx).unwrap();

        for _ in 0..7 {
            let chunk = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let decoded = codec::decode(chunk.data(), 16_000, 1).unwrap();
            assert_eq!(decoded.frames(), 4096);
            assert!(decoded.channel(0).iter().all(|s| (s - 0.25).abs() < 1e-3));
        }
        pipeline.stop();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_queue_drops_and_counts_frames() {
        let mic = Arc::new(ScriptedMic {
            chunks: mono_chunks(3, 4096, 16_000),
        });
        let (tx, _rx) = mpsc::channel(1);

        let mut pipeline = CapturePipeline::default();
        pipeline.start(mic, tx).unwrap();

        wait_for(|| pipeline.dropped_frames() == 2);
        pipeline.stop();
        assert_eq!(pipeline.dropped_frames(), 2);
    }

    #[test]
    fn closed_queue_drops_without_panicking() {
        let mic = Arc::new(ScriptedMic {
            chunks: mono_chunks(2, 4096, 16_000),
        });
        let (tx, rx) = mpsc::channel(4);
        drop(rx);

        let mut pipeline = CapturePipeline::default();
        pipeline.start(mic, tx).unwrap();

        wait_for(|| pipeline.dropped_frames() == 2);
        pipeline.stop();
    }

    #[test]
    fn denied_mic_is_reported_and_nothing_runs() {
        let (tx, _rx) = mpsc::channel(4);
        let mut pipeline = CapturePipeline::default();

        let err = pipeline.start(Arc::new(DeniedMic), tx).unwrap_err();
        assert!(matches!(err, CaptureError::Denied(_)));
        assert!(!pipeline.is_running());
    }

    #[test]
    fn stop_is_idempotent_and_safe_before_start() {
        let mut pipeline = CapturePipeline::default();
        pipeline.stop();
        pipeline.stop();
        assert!(!pipeline.is_running());

        let (tx, _rx) = mpsc::channel(4);
        pipeline
            .start(Arc::new(ScriptedMic { chunks: Vec::new() }), tx)
            .unwrap();
        assert!(pipeline.is_running());
        pipeline.stop();
        pipeline.stop();
        assert!(!pipeline.is_running());
    }
}
