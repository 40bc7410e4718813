//! Linear gain ramp for click-free start and stop.
//!
//! The ramp is counted in samples, not frames: arming over `d` seconds at
//! `r` Hz with `n` interleaved channels yields `round(d * r * n)` steps.

/// Gain envelope applied in place to interleaved blocks.
#[derive(Debug, Clone)]
pub struct Fader {
    channels: usize,
    gain: f32,
    target: f32,
    delta: f32,
    remaining: u64,
}

impl Fader {
    /// Settled at unity; `process_block` leaves audio untouched until armed.
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            gain: 1.0,
            target: 1.0,
            delta: 0.0,
            remaining: 0,
        }
    }

    /// Settled at silence. Streams start here so the first block fades in.
    pub fn muted(channels: usize) -> Self {
        Self {
            gain: 0.0,
            target: 0.0,
            ..Self::new(channels)
        }
    }

    /// Start a ramp from the current gain to `target` over `seconds`.
    ///
    /// A non-positive duration or sample rate, or a ramp that rounds to zero
    /// steps, leaves the fader settled at its current gain.
    pub fn arm(&mut self, target: f32, sample_rate: f64, seconds: f64) {
        if seconds <= 0.0 || sample_rate <= 0.0 {
            self.settle_here();
            return;
        }
        let steps = (seconds * sample_rate * self.channels as f64).round();
        if steps < 1.0 {
            self.settle_here();
            return;
        }
        let steps = steps as u64;
        self.target = target;
        self.delta = (target - self.gain) / steps as f32;
        self.remaining = steps;
    }

    /// Jump straight to `gain` and settle there.
    pub fn snap(&mut self, gain: f32) {
        self.gain = gain;
        self.target = gain;
        self.delta = 0.0;
        self.remaining = 0;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.remaining > 0
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn remaining_steps(&self) -> u64 {
        self.remaining
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Apply the envelope to `frame_count * channels` samples of `samples`.
    ///
    /// While ramping, each sample is scaled by the current gain before the
    /// gain moves one step. The step that exhausts the ramp lands exactly on
    /// the target. Once settled, unity gain is skipped entirely and any other
    /// gain keeps scaling, so a fade to silence stays silent.
    pub fn process_block(&mut self, frame_count: usize, samples: &mut [f32], channels: usize) {
        let len = frame_count.saturating_mul(channels).min(samples.len());
        let block = &mut samples[..len];

        if self.remaining == 0 {
            self.apply_settled(block);
            return;
        }

        let mut idx = 0;
        while idx < block.len() && self.remaining > 0 {
            block[idx] *= self.gain;
            self.gain = (self.gain + self.delta).max(0.0);
            self.remaining -= 1;
            if self.remaining == 0 {
                self.gain = self.target;
            }
            idx += 1;
        }
        self.apply_settled(&mut block[idx..]);
    }

    #[inline]
    fn apply_settled(&self, block: &mut [f32]) {
        if self.target == 1.0 {
            return;
        }
        for sample in block.iter_mut() {
            *sample *= self.gain;
        }
    }

    fn settle_here(&mut self) {
        self.target = self.gain;
        self.delta = 0.0;
        self.remaining = 0;
    }
}
