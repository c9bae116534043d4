//! Speaker output via `cpal`, driven by a sample-clocked mixer.
//!
//! [`Mixer`] is the pure part: it holds scheduled voices with absolute start
//! frames and renders them into device buffers.  Its frame counter is the
//! output clock: `current_time()` is frames rendered divided by the device
//! rate, so "start at t" means "start at frame `t * rate`".
//!
//! [`OutputEngine`] owns the cpal output stream.  `cpal::Stream` is not `Send`
//! on every platform, so the stream lives on a dedicated `audio-output`
//! thread; the engine itself only holds the shared mixer and a shutdown
//! channel, which makes it safe to move into the call controller's task.
//!
//! When a voice finishes naturally its [`UnitId`] is passed to the `on_ended`
//! callback given to [`OutputEngine::start`].  The callback runs on the audio
//! thread and must not block.

use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::audio::codec::AudioBuffer;
use crate::audio::resample::resample;
use crate::audio::scheduler::{AudioOutput, StopError, UnitId};

// ---------------------------------------------------------------------------
// OutputError
// ---------------------------------------------------------------------------

/// Errors that can occur while opening the speaker stream.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio output thread failed: {0}")]
    Thread(String),
}

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

struct Voice {
    id: UnitId,
    samples: Vec<f32>,
    start_frame: u64,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sums scheduled mono voices into interleaved output buffers.
pub struct Mixer {
    sample_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_rendered: 0,
            voices: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output clock in seconds.
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    /// Output frame that plays at `time`.
    fn frame_at(&self, time: f64) -> u64 {
        (time.max(0.0) * self.sample_rate as f64).round() as u64
    }

    /// Queue `samples` (already at the mixer rate) to start at `start_time`.
    ///
    /// A start time in the past plays from the next rendered frame.
    pub fn schedule(&mut self, id: UnitId, samples: Vec<f32>, start_time: f64) {
        let start_frame = self.frame_at(start_time).max(self.frames_rendered);
        self.voices.push(Voice {
            id,
            samples,
            start_frame,
        });
    }

    /// Queue `samples` to fill exactly `[start_time, start_time + duration)`.
    ///
    /// Both ends round to frames the same way, so a voice starting at another
    /// voice's end time neither overlaps it nor leaves a gap.  `samples` is
    /// trimmed, or padded by holding its last value, to that frame count.
    pub fn schedule_span(&mut self, id: UnitId, mut samples: Vec<f32>, start_time: f64, duration: f64) {
        let frames = self
            .frame_at(start_time + duration)
            .saturating_sub(self.frame_at(start_time)) as usize;
        let hold = samples.last().copied().unwrap_or(0.0);
        samples.resize(frames, hold);
        self.schedule(id, samples, start_time);
    }

    /// Remove voice `id` without reporting it as ended.
    pub fn stop(&mut self, id: UnitId) -> Result<(), StopError> {
        match self.voices.iter().position(|v| v.id == id) {
            Some(idx) => {
                self.voices.swap_remove(idx);
                Ok(())
            }
            None => Err(StopError {
                unit: id,
                reason: "not playing".into(),
            }),
        }
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Render the next `out.len() / channels` frames into `out`.
    ///
    /// Every channel receives the same mono mix, clamped to `[-1, 1]`.
    /// Returns the ids of voices that finished within this block.
    pub fn render(&mut self, out: &mut [f32], channels: usize) -> Vec<UnitId> {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let block_start = self.frames_rendered;
        let block_end = block_start + frames as u64;

        let mut mix = vec![0.0_f32; frames];
        for voice in &self.voices {
            let from = voice.start_frame.max(block_start);
            let to = voice.end_frame().min(block_end);
            for frame in from..to {
                mix[(frame - block_start) as usize] +=
                    voice.samples[(frame - voice.start_frame) as usize];
            }
        }

        for (frame, value) in out.chunks_mut(channels).zip(mix.iter()) {
            frame.fill(value.clamp(-1.0, 1.0));
        }
        // Trailing partial frame, if the device handed us one.
        for sample in out.iter_mut().skip(frames * channels) {
            *sample = 0.0;
        }

        self.frames_rendered = block_end;

        let mut ended = Vec::new();
        self.voices.retain(|v| {
            if v.end_frame() <= block_end {
                ended.push(v.id);
                false
            } else {
                true
            }
        });
        ended
    }
}

// ---------------------------------------------------------------------------
// OutputEngine
// ---------------------------------------------------------------------------

/// Live speaker output implementing [`AudioOutput`].
///
/// Dropping the engine stops the underlying cpal stream.
pub struct OutputEngine {
    mixer: Arc<Mutex<Mixer>>,
    shutdown_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl OutputEngine {
    /// Open the default output device and start rendering silence.
    ///
    /// Ids of voices that finish naturally are passed to `on_ended`.
    pub fn start<F>(on_ended: F) -> Result<Self, OutputError>
    where
        F: Fn(UnitId) + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<Arc<Mutex<Mixer>>, OutputError>>();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let stream = match open_stream(on_ended) {
                    Ok((stream, mixer)) => {
                        let _ = ready_tx.send(Ok(mixer));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Block until the engine is dropped, then release the stream.
                let _ = shutdown_rx.recv();
                drop(stream);
                log::debug!("audio output stream released");
            })
            .map_err(|e| OutputError::Thread(e.to_string()))?;

        let mixer = ready_rx
            .recv()
            .map_err(|_| OutputError::Thread("output thread exited during startup".into()))??;

        Ok(Self {
            mixer,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Device sample rate the mixer runs at.
    pub fn sample_rate(&self) -> u32 {
        self.lock().sample_rate()
    }

    fn lock(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AudioOutput for OutputEngine {
    fn current_time(&self) -> f64 {
        self.lock().current_time()
    }

    fn play(&mut self, unit: UnitId, buffer: AudioBuffer, start_time: f64) {
        let mut mixer = self.lock();
        let samples = resample(&buffer.to_mono(), buffer.sample_rate(), mixer.sample_rate());
        mixer.schedule_span(unit, samples, start_time, buffer.duration());
    }

    fn stop(&mut self, unit: UnitId) -> Result<(), StopError> {
        self.lock().stop(unit)
    }
}

impl Drop for OutputEngine {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Build and start the default output stream.  Runs on the output thread.
fn open_stream<F>(on_ended: F) -> Result<(cpal::Stream, Arc<Mutex<Mixer>>), OutputError>
where
    F: Fn(UnitId) + Send + 'static,
{
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(OutputError::NoDevice)?;

    let supported = device.default_output_config()?;
    let channels = supported.channels() as usize;
    let sample_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();

    let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate)));
    let render_mixer = Arc::clone(&mixer);

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let ended = render_mixer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .render(data, channels);
            for id in ended {
                on_ended(id);
            }
        },
        |err: cpal::StreamError| {
            log::error!("cpal output stream error: {err}");
        },
        None,
    )?;

    stream.play()?;
    log::info!("Audio output started ({} Hz, {} ch)", sample_rate, channels);
    Ok((stream, mixer))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
