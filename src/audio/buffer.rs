//! Fixed-size frame assembly for outbound capture audio.
//!
//! Audio devices deliver callbacks of arbitrary length (often 441, 480 or
//! 1024 samples).  The live session expects frames of a fixed length, so
//! [`FrameAssembler`] accumulates resampled samples and releases them in
//! whole frames, carrying any remainder over to the next push.
//!
//! # Example
//!
//! ```rust
//! use companion_voice::audio::FrameAssembler;
//!
//! let mut frames = FrameAssembler::new(4);
//! assert!(frames.push(&[1.0, 2.0, 3.0]).is_empty());
//! let ready = frames.push(&[4.0, 5.0]);
//! assert_eq!(ready, vec![vec![1.0, 2.0, 3.0, 4.0]]);
//! assert_eq!(frames.pending(), 1);
//! ```

// ---------------------------------------------------------------------------
// FrameAssembler
// ---------------------------------------------------------------------------

/// Collects samples until a full frame of `frame_len` is available.
///
/// Samples leave in exactly the order they arrived; nothing is dropped or
/// reordered here.  Dropping under backpressure happens later, at the
/// outbound queue.
pub struct FrameAssembler {
    frame_len: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    /// Create an assembler producing frames of `frame_len` samples.
    ///
    /// # Panics
    ///
    /// Panics if `frame_len == 0`.
    pub fn new(frame_len: usize) -> Self {
        assert!(frame_len > 0, "FrameAssembler frame length must be > 0");
        Self {
            frame_len,
            pending: Vec::with_capacity(frame_len),
        }
    }

    /// Append `samples` and return every frame that became complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut ready = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let room = self.frame_len - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_len {
                let frame = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_len));
                ready.push(frame);
            }
        }

        ready
    }

    /// Samples waiting for the next frame to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Discard any partial frame.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_push_yields_nothing() {
        let mut frames = FrameAssembler::new(4096);
        assert!(frames.push(&[0.1; 1000]).is_empty());
        assert_eq!(frames.pending(), 1000);
    }

    #[test]
    fn exact_frame_is_released() {
        let mut frames = FrameAssembler::new(4);
        let ready = frames.push(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ready, vec![vec![1.0, 2.0, 3.0, 4.0]]);
        assert_eq!(frames.pending(), 0);
    }

    #[test]
    fn large_push_yields_several_frames_in_order() {
        let mut frames = FrameAssembler::new(3);
        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let ready = frames.push(&input);

        assert_eq!(
            ready,
            vec![
                vec![0.0, 1.0, 2.0],
                vec![3.0, 4.0, 5.0],
                vec![6.0, 7.0, 8.0],
            ]
        );
        assert_eq!(frames.pending(), 1);

        let ready = frames.push(&[10.0, 11.0]);
        assert_eq!(ready, vec![vec![9.0, 10.0, 11.0]]);
    }

    #[test]
    fn device_sized_callbacks_make_4096_frames() {
        // 480-sample callbacks (10 ms @ 48 kHz after resampling is not applied here)
        let mut frames = FrameAssembler::new(4096);
        let mut total = 0;
        for _ in 0..20 {
            for frame in frames.push(&[0.0; 480]) {
                assert_eq!(frame.len(), 4096);
                total += 1;
            }
        }
        // 20 * 480 = 9600 samples → 2 full frames, 1408 pending
        assert_eq!(total, 2);
        assert_eq!(frames.pending(), 9600 - 2 * 4096);
    }

    #[test]
    fn clear_drops_partial_frame() {
        let mut frames = FrameAssembler::new(4);
        frames.push(&[1.0, 2.0]);
        frames.clear();
        assert_eq!(frames.pending(), 0);
        assert_eq!(frames.push(&[5.0, 6.0, 7.0, 8.0]), vec![vec![5.0, 6.0, 7.0, 8.0]]);
    }

    #[test]
    #[should_panic(expected = "FrameAssembler frame length must be > 0")]
    fn zero_frame_len_panics() {
        let _ = FrameAssembler::new(0);
    }
}
