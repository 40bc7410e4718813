//! Sine test-tone generation
//!
//! This module provides a phase-accumulating sine oscillator used by the
//! diagnostics binary and by the simulated backend's input signal.
//! Key features:
//! - Phase kept in [0, 1) so long runs do not lose precision
//! - Interleaved fill writes the same sample to every channel of a frame
//! - Zero allocations; safe to call from a real-time callback

use std::f64::consts::TAU;

/// Phase-accumulating sine generator.
#[derive(Debug, Clone)]
pub struct SineOscillator {
    phase: f64,
    increment: f64,
}

impl SineOscillator {
    /// Creates an oscillator at `frequency` Hz for a stream running at `sample_rate` Hz.
    ///
    /// # Arguments
    /// * `sample_rate` - Stream sample rate in Hz (zero yields a silent oscillator)
    /// * `frequency` - Tone frequency in Hz
    pub fn new(sample_rate: u32, frequency: f64) -> Self {
        let increment = if sample_rate == 0 {
            0.0
        } else {
            frequency / sample_rate as f64
        };
        Self {
            phase: 0.0,
            increment,
        }
    }

    /// Returns the next sample in [-1.0, 1.0] and advances the phase.
    #[inline]
    pub fn next_sample(&mut self) -> f32 {
        let value = (self.phase * TAU).sin() as f32;
        self.phase = (self.phase + self.increment).fract();
        value
    }

    /// Fills an interleaved block with the tone scaled by `amplitude`.
    ///
    /// # Arguments
    /// * `buffer` - Interleaved sample block; a trailing partial frame is left untouched
    /// * `channels` - Samples per frame
    /// * `amplitude` - Linear gain applied to every sample
    pub fn fill_interleaved(&mut self, buffer: &mut [f32], channels: usize, amplitude: f32) {
        if channels == 0 {
            return;
        }
        for frame in buffer.chunks_exact_mut(channels) {
            let value = self.next_sample() * amplitude;
            frame.iter_mut().for_each(|s| *s = value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_is_zero_phase() {
        let mut osc = SineOscillator::new(48_000, 440.0);
        assert_eq!(osc.next_sample(), 0.0);
    }

    #[test]
    fn test_quarter_period_peaks() {
        // 12 kHz at 48 kHz: four samples per period
        let mut osc = SineOscillator::new(48_000, 12_000.0);
        osc.next_sample();
        assert!((osc.next_sample() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_fill_interleaved_duplicates_channels() {
        let mut osc = SineOscillator::new(48_000, 1_000.0);
        let mut block = vec![0.0_f32; 64 * 2];
        osc.fill_interleaved(&mut block, 2, 0.5);

        for frame in block.chunks(2) {
            assert_eq!(frame[0], frame[1]);
            assert!(frame[0].abs() <= 0.5);
        }
        assert!(block.iter().any(|&s| s != 0.0));
    }

    #[test]
    fn test_zero_rate_is_silent() {
        let mut osc = SineOscillator::new(0, 440.0);
        let mut block = vec![1.0_f32; 16];
        osc.fill_interleaved(&mut block, 1, 1.0);
        assert!(block.iter().all(|&s| s == 0.0));
    }
}
