//! Gapless playback scheduling for streamed model audio.
//!
//! The live session delivers model speech as a series of short, independently
//! arriving buffers.  [`PlaybackScheduler`] turns those arrivals back into
//! continuous speech: every buffer is scheduled to start exactly where the
//! previous one ends, or immediately if the queue has drained.
//!
//! ```text
//! arrival:   t=0.0 [1s]   t=0.1 [1s]          t=2.5 [1s]
//! schedule:  |0.0 ---- 1.0|1.0 ---- 2.0|  gap  |2.5 ---- 3.5|
//! ```
//!
//! The scheduler is the single owner of the active-unit set and the
//! `next_start_time` cursor.  It is driven from one task (the call
//! controller), so it needs no internal locking.
//!
//! [`interrupt`](PlaybackScheduler::interrupt) implements barge-in: every
//! active unit is stopped, the set is cleared and the cursor is reset so the
//! next buffer plays "now" instead of after stale queued speech.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::audio::codec::AudioBuffer;

/// Identifier of a scheduled playback unit, unique per scheduler.
pub type UnitId = u64;

// ---------------------------------------------------------------------------
// StopError
// ---------------------------------------------------------------------------

/// Failure to stop a playback unit, typically because it already finished.
///
/// Always absorbed by the scheduler; never surfaced to the user.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("playback unit {unit} could not be stopped: {reason}")]
pub struct StopError {
    pub unit: UnitId,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// AudioOutput
// ---------------------------------------------------------------------------

/// Sink that actually renders scheduled audio.
///
/// Implemented by [`crate::audio::OutputEngine`] for real speakers and by
/// test doubles elsewhere.  Implementors report completion of a unit
/// out-of-band (the engine sends its id on an "ended" channel); the owner of
/// the scheduler forwards it to [`PlaybackScheduler::on_unit_ended`].
pub trait AudioOutput: Send {
    /// Current time of the output clock in seconds.  Monotonic.
    fn current_time(&self) -> f64;

    /// Start rendering `buffer` at `start_time` on the output clock.
    fn play(&mut self, unit: UnitId, buffer: AudioBuffer, start_time: f64);

    /// Stop `unit` immediately.
    fn stop(&mut self, unit: UnitId) -> Result<(), StopError>;
}

// ---------------------------------------------------------------------------
// PlaybackUnit
// ---------------------------------------------------------------------------

/// A buffer that has been handed to the output with a fixed start time.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackUnit {
    pub id: UnitId,
    /// Scheduled start on the output clock, in seconds.
    pub start_time: f64,
    /// Buffer length in seconds.
    pub duration: f64,
}

impl PlaybackUnit {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

pub struct PlaybackScheduler<O: AudioOutput> {
    output: O,
    active: BTreeMap<UnitId, PlaybackUnit>,
    next_start_time: f64,
    next_id: UnitId,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            active: BTreeMap::new(),
            next_start_time: 0.0,
            next_id: 1,
        }
    }

    /// Schedule `buffer` behind everything already queued.
    ///
    /// `now` is the output clock time at arrival.  The unit starts at
    /// `max(next_start_time, now)` and the cursor advances by the buffer's
    /// duration.
    pub fn enqueue(&mut self, buffer: AudioBuffer, now: f64) -> PlaybackUnit {
        let start_time = self.next_start_time.max(now);
        let unit = PlaybackUnit {
            id: self.next_id,
            start_time,
            duration: buffer.duration(),
        };
        self.next_id += 1;

        self.output.play(unit.id, buffer, start_time);
        self.next_start_time = unit.end_time();
        self.active.insert(unit.id, unit.clone());

        log::debug!(
            "playback: unit {} scheduled at {:.3}s for {:.3}s ({} active)",
            unit.id,
            unit.start_time,
            unit.duration,
            self.active.len()
        );
        unit
    }

    /// Schedule `buffer` using the output's own clock as "now".
    pub fn enqueue_now(&mut self, buffer: AudioBuffer) -> PlaybackUnit {
        let now = self.output.current_time();
        self.enqueue(buffer, now)
    }

    /// Record natural completion of `unit`.
    ///
    /// Returns `true` if the unit was still active.  Ids cleared by an
    /// earlier [`interrupt`](Self::interrupt) are ignored.
    pub fn on_unit_ended(&mut self, unit: UnitId) -> bool {
        let was_active = self.active.remove(&unit).is_some();
        if was_active && self.active.is_empty() {
            log::debug!("playback: queue drained");
        }
        was_active
    }

    /// Stop all playback, clear the queue and reset the cursor.
    ///
    /// Returns the number of units that were active.
    pub fn interrupt(&mut self) -> usize {
        let cleared = std::mem::take(&mut self.active);
        for id in cleared.keys() {
            if let Err(e) = self.output.stop(*id) {
                log::debug!("playback: ignoring stop failure: {e}");
            }
        }
        self.next_start_time = 0.0;

        if !cleared.is_empty() {
            log::info!("playback: interrupted, {} unit(s) flushed", cleared.len());
        }
        cleared.len()
    }

    /// `true` while at least one unit is scheduled or playing.
    pub fn is_speaking(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Active units in scheduling order.
    pub fn active_units(&self) -> impl Iterator<Item = &PlaybackUnit> {
        self.active.values()
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut O {
        &mut self.output
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
