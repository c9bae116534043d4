//! Channel downmix and sample-rate conversion.
//!
//! Microphones deliver 44.1 / 48 kHz interleaved audio in small callback
//! blocks; the live session wants 16 kHz mono.  Model speech arrives at
//! 24 kHz and the speaker runs at whatever the device picked.
//!
//! [`StreamResampler`] converts a continuous signal that arrives in pieces.
//! It keeps the interpolation phase and the previous block's last sample, so
//! output for a stream cut into blocks matches output for the whole stream.
//! [`resample`] is the one-shot form for a complete buffer.
//!
//! ```text
//! source  x0    x1    x2    x3    x4    x5 | x6    x7 ...   (block boundary)
//! output  y0       y1       y2       y3      y4       ...   (step = src / dst)
//! ```

/// Average interleaved frames of `channels` samples into one mono sample.
///
/// A trailing partial frame is ignored.  Zero channels yields no audio.
///
/// ```rust
/// use companion_voice::audio::downmix;
///
/// // L R L R
/// assert_eq!(downmix(&[0.5, -0.5, 0.25, 0.75], 2), vec![0.0, 0.5]);
/// ```
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let width = usize::from(channels);
    if width <= 1 {
        return if width == 0 { Vec::new() } else { interleaved.to_vec() };
    }
    let scale = 1.0 / width as f32;
    interleaved
        .chunks_exact(width)
        .map(|frame| frame.iter().fold(0.0_f32, |acc, s| acc + s) * scale)
        .collect()
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

/// Linear-interpolation resampler for a signal delivered in blocks.
#[derive(Debug, Clone)]
pub struct StreamResampler {
    source_rate: u32,
    target_rate: u32,
    /// Source samples advanced per output sample.
    step: f64,
    /// Position of the next output sample, in source samples, measured from
    /// `carry` (index 0) when present, else from the first sample of the
    /// next block.
    phase: f64,
    /// Last source sample of the previous block.
    carry: Option<f32>,
}

impl StreamResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        let step = if source_rate == 0 || target_rate == 0 {
            0.0
        } else {
            f64::from(source_rate) / f64::from(target_rate)
        };
        Self {
            source_rate,
            target_rate,
            step,
            phase: 0.0,
            carry: None,
        }
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    /// Convert the next block of the stream.
    ///
    /// Output samples that need source audio beyond `block` are produced by
    /// a later `push` (or [`finish`](Self::finish)).
    pub fn push(&mut self, block: &[f32]) -> Vec<f32> {
        if self.step == 0.0 {
            return Vec::new();
        }
        if self.source_rate == self.target_rate {
            return block.to_vec();
        }
        if block.is_empty() {
            return Vec::new();
        }

        let carried = self.carry;
        let offset = usize::from(carried.is_some());
        let len = offset + block.len();
        let at = |i: usize| match carried {
            Some(carry) if i == 0 => carry,
            _ => block[i - offset],
        };

        let mut out = Vec::with_capacity((block.len() as f64 / self.step) as usize + 1);
        let mut phase = self.phase;
        loop {
            let idx = phase as usize;
            if idx + 1 >= len {
                break;
            }
            let frac = (phase - idx as f64) as f32;
            let (a, b) = (at(idx), at(idx + 1));
            out.push(a + (b - a) * frac);
            phase += self.step;
        }

        // Re-anchor on the block's last sample.
        self.carry = Some(at(len - 1));
        self.phase = phase - (len - 1) as f64;
        out
    }

    /// Flush the tail of the stream, holding the final sample.
    ///
    /// Emits the output samples that fall before the end of the last source
    /// sample's period and resets the resampler.
    pub fn finish(&mut self) -> Vec<f32> {
        let mut out = Vec::new();
        if let Some(last) = self.carry.take() {
            if self.source_rate != self.target_rate && self.step > 0.0 {
                while self.phase < 1.0 {
                    out.push(last);
                    self.phase += self.step;
                }
            }
        }
        self.phase = 0.0;
        out
    }
}

/// Resample a complete buffer from `source_rate` to `target_rate`.
///
/// The output holds `ceil(len * target_rate / source_rate)` samples.  Equal
/// rates copy the input; a zero rate yields no audio.
///
/// ```rust
/// use companion_voice::audio::resample;
///
/// assert_eq!(resample(&[0.5; 480], 48_000, 16_000).len(), 160);
/// assert_eq!(resample(&[0.0; 240], 24_000, 48_000).len(), 480);
/// ```
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    let mut stream = StreamResampler::new(source_rate, target_rate);
    let mut out = stream.push(samples);
    out.extend(stream.finish());
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
