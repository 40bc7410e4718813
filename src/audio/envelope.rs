//! Peak envelope follower
//!
//! The audio thread owns an [`EnvelopeFollower`] and pushes its levels into an
//! [`EnvelopeLevels`] after every block; the control thread reads them back
//! without locking.

use std::sync::atomic::{AtomicU32, Ordering};

/// One-pole coefficient that decays to 1% of a step in `ms` milliseconds.
pub fn time_constant(ms: f64, sample_rate: f64) -> f32 {
    if ms <= 0.0 || sample_rate <= 0.0 {
        return 0.0;
    }
    0.01_f64.powf(1.0 / (ms * sample_rate * 0.001)) as f32
}

/// Attack/release peak follower, one level per interleaved channel.
#[derive(Debug, Clone)]
pub struct EnvelopeFollower {
    attack: f32,
    release: f32,
    levels: Vec<f32>,
}

impl EnvelopeFollower {
    pub fn new(channels: usize, sample_rate: f64, attack_ms: f64, release_ms: f64) -> Self {
        Self {
            attack: time_constant(attack_ms, sample_rate),
            release: time_constant(release_ms, sample_rate),
            levels: vec![0.0; channels],
        }
    }

    pub fn channels(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[f32] {
        &self.levels
    }

    /// Feed one interleaved block. Allocation-free.
    pub fn process(&mut self, samples: &[f32]) {
        let channels = self.levels.len();
        if channels == 0 {
            return;
        }
        for frame in samples.chunks(channels) {
            for (level, sample) in self.levels.iter_mut().zip(frame) {
                let x = sample.abs();
                let coef = if x > *level { self.attack } else { self.release };
                *level = coef * (*level - x) + x;
            }
        }
    }

    pub fn reset(&mut self) {
        self.levels.iter_mut().for_each(|l| *l = 0.0);
    }
}

/// Lock-free snapshot of follower levels.
#[derive(Debug, Default)]
pub struct EnvelopeLevels {
    values: Vec<AtomicU32>,
}

impl EnvelopeLevels {
    pub fn new(channels: usize) -> Self {
        Self {
            values: (0..channels).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn channels(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn publish(&self, levels: &[f32]) {
        for (slot, level) in self.values.iter().zip(levels) {
            slot.store(level.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn get(&self, channel: usize) -> Option<f32> {
        self.values
            .get(channel)
            .map(|slot| f32::from_bits(slot.load(Ordering::Relaxed)))
    }
}
