//! Frame-counter clock
//!
//! Elapsed time is derived from the number of frames the real-time thread has
//! processed, never from backend-reported timestamps (some hosts leave those
//! pinned at zero). Frames accumulate as integers; division happens only when
//! a reader asks for seconds, so rounding error cannot compound.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::error::{AudioError, Result};

/// Monotonic clock advanced by the audio thread and read by the control thread.
#[derive(Debug, Default)]
pub struct TimestampGenerator {
    frames: AtomicU64,
    sample_rate: AtomicU32,
}

impl TimestampGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero the frame total and latch a new sample rate.
    ///
    /// # Errors
    /// `InvalidConfiguration` if `sample_rate` is zero.
    pub fn reset(&self, sample_rate: u32) -> Result<()> {
        if sample_rate == 0 {
            return Err(AudioError::invalid("timestamp sample rate must be > 0"));
        }
        self.sample_rate.store(sample_rate, Ordering::Release);
        self.frames.store(0, Ordering::Release);
        Ok(())
    }

    /// Accumulate `frame_count` frames and return the new elapsed seconds.
    #[inline]
    pub fn advance(&self, frame_count: u64) -> f64 {
        let total = self.frames.fetch_add(frame_count, Ordering::AcqRel) + frame_count;
        Self::seconds(total, self.sample_rate.load(Ordering::Acquire))
    }

    #[inline]
    pub fn elapsed_seconds(&self) -> f64 {
        Self::seconds(
            self.frames.load(Ordering::Acquire),
            self.sample_rate.load(Ordering::Acquire),
        )
    }

    #[inline]
    pub fn frames_processed(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    #[inline]
    fn seconds(frames: u64, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            0.0
        } else {
            frames as f64 / sample_rate as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_reset_rejects_zero_rate() {
        let clock = TimestampGenerator::new();
        assert!(matches!(
            clock.reset(0),
            Err(AudioError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_advance_accumulates_exactly() {
        let clock = TimestampGenerator::new();
        clock.reset(48_000).unwrap();

        let mut last = 0.0;
        let mut total = 0u64;
        for block in [512u64, 480, 1, 1024, 37, 512] {
            let elapsed = clock.advance(block);
            total += block;
            assert!(elapsed >= last);
            assert!((elapsed - total as f64 / 48_000.0).abs() < f64::EPSILON);
            last = elapsed;
        }
        assert_eq!(clock.frames_processed(), total);
        assert_eq!(clock.elapsed_seconds(), last);
    }

    #[test]
    fn test_reset_zeroes_frames() {
        let clock = TimestampGenerator::new();
        clock.reset(44_100).unwrap();
        clock.advance(44_100);
        assert_eq!(clock.elapsed_seconds(), 1.0);

        clock.reset(48_000).unwrap();
        assert_eq!(clock.frames_processed(), 0);
        assert_eq!(clock.elapsed_seconds(), 0.0);
        assert_eq!(clock.sample_rate(), 48_000);
    }

    #[test]
    fn test_no_wrap_past_32_bits() {
        let clock = TimestampGenerator::new();
        clock.reset(48_000).unwrap();
        clock.advance(u32::MAX as u64);
        clock.advance(48_000);
        assert_eq!(clock.frames_processed(), u32::MAX as u64 + 48_000);
    }

    #[test]
    fn test_concurrent_reader_sees_monotonic_time() {
        let clock = Arc::new(TimestampGenerator::new());
        clock.reset(48_000).unwrap();

        let writer = {
            let clock = Arc::clone(&clock);
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    clock.advance(64);
                }
            })
        };

        let mut last = 0.0;
        while !writer.is_finished() {
            let now = clock.elapsed_seconds();
            assert!(now >= last);
            last = now;
        }
        writer.join().unwrap();
        assert_eq!(clock.frames_processed(), 640_000);
    }
}
