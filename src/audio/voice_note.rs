//! One-shot playback of chat voice notes.
//!
//! A voice note is base64 24 kHz mono PCM attached to a chat message.
//! [`VoiceNotePlayer::toggle`] starts it on a fresh [`OutputEngine`];
//! toggling the same note again stops it, toggling another note replaces it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use super::codec::{self, DecodeError, PLAYBACK_SAMPLE_RATE};
use super::output::{OutputEngine, OutputError};
use super::scheduler::{AudioOutput, UnitId};

const NOTE_UNIT: UnitId = 1;

#[derive(Debug, Error)]
pub enum VoiceNoteError {
    #[error("voice note is not valid audio: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Output(#[from] OutputError),
}

/// Callback the output invokes when the note finishes.
pub type EndedCallback = Box<dyn Fn(UnitId) + Send>;

struct Playback {
    note_id: u64,
    output: Box<dyn AudioOutput>,
    finished: Arc<AtomicBool>,
}

#[derive(Default)]
pub struct VoiceNotePlayer {
    current: Option<Playback>,
}

impl VoiceNotePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Play `audio` on the default speaker, or stop it if `note_id` is the
    /// note already playing.  Returns `true` when playback started.
    pub fn toggle(&mut self, note_id: u64, audio: &str) -> Result<bool, VoiceNoteError> {
        self.toggle_with(note_id, audio, |on_ended| {
            OutputEngine::start(on_ended).map(|engine| Box::new(engine) as Box<dyn AudioOutput>)
        })
    }

    /// [`toggle`](Self::toggle) with a caller-supplied output.
    pub fn toggle_with<F>(
        &mut self,
        note_id: u64,
        audio: &str,
        open: F,
    ) -> Result<bool, VoiceNoteError>
    where
        F: FnOnce(EndedCallback) -> Result<Box<dyn AudioOutput>, OutputError>,
    {
        let was_playing = self.playing_id() == Some(note_id);
        self.stop();
        if was_playing {
            return Ok(false);
        }

        let buffer = codec::decode(audio, PLAYBACK_SAMPLE_RATE, 1)?;
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        let mut output = open(Box::new(move |_| flag.store(true, Ordering::Release)))?;

        let start = output.current_time();
        output.play(NOTE_UNIT, buffer, start);
        log::debug!("voice note {note_id}: playing");

        self.current = Some(Playback {
            note_id,
            output,
            finished,
        });
        Ok(true)
    }

    /// Stop whatever is playing and release the speaker.
    pub fn stop(&mut self) {
        if let Some(mut playback) = self.current.take() {
            if !playback.finished.load(Ordering::Acquire) {
                // Already-ended units have nothing to stop.
                let _ = playback.output.stop(NOTE_UNIT);
            }
        }
    }

    /// Id of the note currently audible, if any.
    pub fn playing_id(&self) -> Option<u64> {
        self.current
            .as_ref()
            .filter(|p| !p.finished.load(Ordering::Acquire))
            .map(|p| p.note_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::audio::codec::{encode, AudioBuffer};
    use crate::audio::scheduler::StopError;

    /// Records calls into a shared log; exposes its ended callback.
    struct FakeOutput {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl AudioOutput for FakeOutput {
        fn current_time(&self) -> f64 {
            0.25
        }

        fn play(&mut self, unit: UnitId, buffer: AudioBuffer, start_time: f64) {
            self.log.lock().unwrap().push(format!(
                "play {unit} {} @{start_time}",
                buffer.frames()
            ));
        }

        fn stop(&mut self, unit: UnitId) -> Result<(), StopError> {
            self.log.lock().unwrap().push(format!("stop {unit}"));
            Ok(())
        }
    }

    struct Harness {
        log: Arc<Mutex<Vec<String>>>,
        ended: Arc<Mutex<Option<EndedCallback>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                log: Arc::new(Mutex::new(Vec::new())),
                ended: Arc::new(Mutex::new(None)),
            }
        }

        fn toggle(&self, player: &mut VoiceNotePlayer, id: u64, audio: &str) -> bool {
            let log = Arc::clone(&self.log);
            let ended = Arc::clone(&self.ended);
            player
                .toggle_with(id, audio, move |cb| {
                    *ended.lock().unwrap() = Some(cb);
                    Ok(Box::new(FakeOutput { log }) as Box<dyn AudioOutput>)
                })
                .unwrap()
        }

        fn finish(&self) {
            if let Some(cb) = self.ended.lock().unwrap().as_ref() {
                cb(NOTE_UNIT);
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    fn note(frames: usize) -> String {
        encode(&vec![0.1; frames], PLAYBACK_SAMPLE_RATE).into_data()
    }

    #[test]
    fn toggle_plays_then_stops() {
        let h = Harness::new();
        let mut player = VoiceNotePlayer::new();
        let audio = note(2400);

        assert!(h.toggle(&mut player, 7, &audio));
        assert_eq!(player.playing_id(), Some(7));

        assert!(!h.toggle(&mut player, 7, &audio));
        assert_eq!(player.playing_id(), None);
        assert_eq!(h.log(), vec!["play 1 2400 @0.25", "stop 1"]);
    }

    #[test]
    fn another_note_replaces_current() {
        let h = Harness::new();
        let mut player = VoiceNotePlayer::new();

        h.toggle(&mut player, 1, &note(10));
        assert!(h.toggle(&mut player, 2, &note(20)));
        assert_eq!(player.playing_id(), Some(2));
        assert_eq!(h.log(), vec!["play 1 10 @0.25", "stop 1", "play 1 20 @0.25"]);
    }

    #[test]
    fn finished_note_is_not_playing_and_restarts() {
        let h = Harness::new();
        let mut player = VoiceNotePlayer::new();
        let audio = note(10);

        h.toggle(&mut player, 3, &audio);
        h.finish();
        assert_eq!(player.playing_id(), None);

        // Pressing again after the note ended plays it again.
        assert!(h.toggle(&mut player, 3, &audio));
        assert_eq!(h.log(), vec!["play 1 10 @0.25", "play 1 10 @0.25"]);
    }

    #[test]
    fn corrupt_note_is_an_error() {
        let mut player = VoiceNotePlayer::new();
        let err = player
            .toggle_with(1, "not base64!", |_| unreachable!("output opened"))
            .unwrap_err();
        assert!(matches!(err, VoiceNoteError::Decode(_)));
        assert_eq!(player.playing_id(), None);
    }

    #[test]
    fn missing_speaker_is_an_error() {
        let mut player = VoiceNotePlayer::new();
        let err = player
            .toggle_with(1, &note(10), |_| Err(OutputError::NoDevice))
            .unwrap_err();
        assert!(matches!(err, VoiceNoteError::Output(OutputError::NoDevice)));
    }
}
