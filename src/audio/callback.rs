//! Real-time dispatch - the per-block path between the backend and user code
//!
//! This module provides [`StreamDispatcher`], the [`StreamCallback`] every
//! engine hands to its backend. It owns all state the real-time thread
//! mutates and shares only atomics with the control thread.
//!
//! # Design
//! The dispatch path is built for real-time safety:
//! - No heap allocations during audio processing
//! - No mutex locks (atomics plus one lock-free SPSC queue)
//! - No blocking and no error propagation across the real-time boundary
//! - Bounded execution time (one pass over the block per stage)
//!
//! # Architecture
//! ```text
//! StreamEngine::open()
//!   └─> StreamDispatcher::new()
//!       └─> AudioBackend::open_stream()
//!           └─> StreamDispatcher::process() [Real-time thread]
//!               ├─> drain fade commands [rtrb consumer]
//!               ├─> TimestampGenerator::advance()
//!               ├─> AudioCallback::on_callback() [user code]
//!               ├─> Fader::process_block() [output]
//!               ├─> EnvelopeFollower::process() [meter]
//!               └─> clear run flag on Complete/Abort
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::Consumer;

use super::envelope::{EnvelopeFollower, EnvelopeLevels};
use super::fader::Fader;
use super::timestamp::TimestampGenerator;
use crate::engine::backend::{BackendTimeInfo, StatusFlags, StreamCallback};

/// What the user callback wants the stream to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    Continue,
    /// Finish normally; the backend stops invoking the callback
    Complete,
    /// Finish immediately
    Abort,
}

/// Everything the user callback sees for one block.
pub struct CallbackInfo<'a> {
    /// Frame-counter clock after this block was accounted for
    pub elapsed_seconds: f64,
    /// Interleaved input, empty for output-only streams
    pub input: &'a [f32],
    /// Interleaved output, empty for input-only streams
    pub output: &'a mut [f32],
    pub frame_count: usize,
    pub time_info: BackendTimeInfo,
    pub flags: StatusFlags,
    pub sample_rate: u32,
    pub input_channels: usize,
    pub output_channels: usize,
}

/// User audio processing, invoked on the real-time thread.
///
/// Implementations must not block, allocate, or panic. Any
/// `FnMut(CallbackInfo<'_>) -> CallbackResult` closure qualifies.
pub trait AudioCallback: Send + 'static {
    fn on_callback(&mut self, info: CallbackInfo<'_>) -> CallbackResult;
}

impl<F> AudioCallback for F
where
    F: FnMut(CallbackInfo<'_>) -> CallbackResult + Send + 'static,
{
    fn on_callback(&mut self, info: CallbackInfo<'_>) -> CallbackResult {
        self(info)
    }
}

/// Fade request sent from the control thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FadeCommand {
    pub generation: u64,
    pub kind: FadeKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum FadeKind {
    Ramp { target: f32, seconds: f64 },
    Snap(f32),
}

/// State shared between one engine and its dispatcher.
#[derive(Debug)]
pub(crate) struct StreamShared {
    pub running: AtomicBool,
    pub timestamps: TimestampGenerator,
    /// Generation of the last fade command the dispatcher saw settle
    pub fade_settled: AtomicU64,
    pub levels: EnvelopeLevels,
}

impl StreamShared {
    pub fn new(meter_channels: usize) -> Self {
        Self {
            running: AtomicBool::new(false),
            timestamps: TimestampGenerator::new(),
            fade_settled: AtomicU64::new(0),
            levels: EnvelopeLevels::new(meter_channels),
        }
    }
}

/// The backend-facing callback of one open stream.
pub(crate) struct StreamDispatcher {
    callback: Box<dyn AudioCallback>,
    shared: Arc<StreamShared>,
    commands: Consumer<FadeCommand>,
    fader: Fader,
    meter: EnvelopeFollower,
    generation: u64,
    input_channels: usize,
    output_channels: usize,
}

impl StreamDispatcher {
    /// # Arguments
    /// * `callback` - User processing
    /// * `shared` - Run flag, clock, fade acknowledgement and meter levels
    /// * `commands` - Consumer end of the engine's fade queue
    /// * `input_channels` / `output_channels` - Interleaving of each block
    /// * `meter` - Follower sized to the input channels, or the output
    ///   channels for output-only streams
    pub fn new(
        callback: Box<dyn AudioCallback>,
        shared: Arc<StreamShared>,
        commands: Consumer<FadeCommand>,
        input_channels: usize,
        output_channels: usize,
        meter: EnvelopeFollower,
    ) -> Self {
        Self {
            callback,
            shared,
            commands,
            fader: Fader::muted(output_channels),
            meter,
            generation: 0,
            input_channels,
            output_channels,
        }
    }

    #[inline]
    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            self.generation = command.generation;
            match command.kind {
                FadeKind::Ramp { target, seconds } => {
                    let rate = self.shared.timestamps.sample_rate() as f64;
                    self.fader.arm(target, rate, seconds);
                }
                FadeKind::Snap(gain) => self.fader.snap(gain),
            }
        }
    }
}

impl StreamCallback for StreamDispatcher {
    fn process(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        frames: usize,
        time_info: &BackendTimeInfo,
        flags: StatusFlags,
    ) -> CallbackResult {
        // Real-time audio callback - NO ALLOCATIONS, LOCKS, OR BLOCKING!
        self.drain_commands();

        let elapsed_seconds = self.shared.timestamps.advance(frames as u64);

        let result = self.callback.on_callback(CallbackInfo {
            elapsed_seconds,
            input,
            output: &mut *output,
            frame_count: frames,
            time_info: *time_info,
            flags,
            sample_rate: self.shared.timestamps.sample_rate(),
            input_channels: self.input_channels,
            output_channels: self.output_channels,
        });

        self.fader
            .process_block(frames, output, self.output_channels);
        if !self.fader.is_active() {
            self.shared
                .fade_settled
                .store(self.generation, Ordering::Release);
        }

        if self.input_channels > 0 {
            self.meter.process(input);
        } else {
            self.meter.process(output);
        }
        self.shared.levels.publish(self.meter.levels());

        if result != CallbackResult::Continue {
            self.shared.running.store(false, Ordering::Release);
        }
        result
    }
}
