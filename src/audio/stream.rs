//! StreamEngine - lifecycle of one native stream
//!
//! This module drives a single backend stream through
//! `Closed -> Opened -> Running -> Stopping -> Opened -> ... -> Closed`.
//! Key features:
//! - Fade-in on start, fade-out before every physical stop
//! - Frame-counter clock reset at open, start and stop
//! - Bounded stop: the fade-out wait gives up after the configured timeout
//! - Close and drop never fail; errors are logged and swallowed
//!
//! Thread safety:
//! - running: AtomicBool written by the control thread and by the dispatcher
//!   when the callback returns Complete/Abort
//! - timestamps: AtomicU64 frames, advanced only on the real-time thread
//! - fades: requests cross to the real-time thread through an rtrb queue; the
//!   dispatcher acknowledges each settled request by generation number

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use rtrb::{Producer, RingBuffer};

use super::callback::{AudioCallback, FadeCommand, FadeKind, StreamDispatcher, StreamShared};
use super::envelope::EnvelopeFollower;
use super::stream_config::StreamConfig;
use crate::config::{MeterSettings, StreamSettings};
use crate::engine::backend::{AudioBackend, BackendCode, BackendStream};
use crate::error::{log_audio_error, AudioError, Result};
use crate::session::registry;

/// Fade requests in flight; start and stop push one each.
const FADE_QUEUE_CAPACITY: usize = 16;

/// Position in the stream lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Opened,
    Running,
    Stopping,
}

/// Owner of one native stream.
///
/// Not `Send`: some backends pin their stream handles to the creating
/// thread. Create, drive and drop an engine on one control thread.
///
/// # Example
/// ```ignore
/// let mut engine = StreamEngine::new(backend, StreamSettings::default());
/// let mut config = StreamConfig::output_only(device, 2, 48_000, 512);
/// engine.open(&mut config, |info: CallbackInfo<'_>| {
///     info.output.fill(0.0);
///     CallbackResult::Continue
/// })?;
/// engine.start()?;
/// // ... audio runs on the backend's thread
/// engine.stop()?;
/// ```
pub struct StreamEngine {
    id: u32,
    backend: Arc<dyn AudioBackend>,
    settings: StreamSettings,
    meter: MeterSettings,
    state: StreamState,
    stream: Option<Box<dyn BackendStream>>,
    fades: Option<Producer<FadeCommand>>,
    fade_generation: u64,
    shared: Arc<StreamShared>,
    config: Option<StreamConfig>,
}

impl StreamEngine {
    pub fn new(backend: Arc<dyn AudioBackend>, settings: StreamSettings) -> Self {
        Self::with_meter(backend, settings, MeterSettings::default())
    }

    pub fn with_meter(
        backend: Arc<dyn AudioBackend>,
        settings: StreamSettings,
        meter: MeterSettings,
    ) -> Self {
        Self {
            id: 0,
            backend,
            settings,
            meter,
            state: StreamState::Closed,
            stream: None,
            fades: None,
            fade_generation: 0,
            shared: Arc::new(StreamShared::new(0)),
            config: None,
        }
    }

    /// Open a native stream bound to `callback`.
    ///
    /// # Arguments
    /// * `config` - Requested parameters; overwritten with the negotiated
    ///   sample rate, channel counts and latencies on success. A zero
    ///   `frames_per_buffer` is replaced by the configured default.
    /// * `callback` - User processing, moved onto the real-time thread
    ///
    /// # Errors
    /// * `WrongState` - a stream is already open
    /// * `InvalidConfiguration` - `config` fails validation
    /// * `BackendError` - the backend refused; the engine stays Closed
    pub fn open<C: AudioCallback>(&mut self, config: &mut StreamConfig, callback: C) -> Result<()> {
        if self.stream.is_some() {
            return Err(AudioError::WrongState {
                operation: "open",
                state: self.state,
            });
        }
        config.validate()?;
        if config.frames_per_buffer == 0 {
            config.frames_per_buffer = self.settings.default_frames_per_buffer;
        }

        let input_channels = config.input_channels() as usize;
        let output_channels = config.output_channels() as usize;
        let meter_channels = if input_channels > 0 {
            input_channels
        } else {
            output_channels
        };

        let shared = Arc::new(StreamShared::new(meter_channels));
        shared.timestamps.reset(config.sample_rate)?;
        let (producer, consumer) = RingBuffer::<FadeCommand>::new(FADE_QUEUE_CAPACITY);
        let dispatcher = StreamDispatcher::new(
            Box::new(callback),
            Arc::clone(&shared),
            consumer,
            input_channels,
            output_channels,
            EnvelopeFollower::new(
                meter_channels,
                config.sample_rate as f64,
                self.meter.attack_ms,
                self.meter.release_ms,
            ),
        );

        let stream = self
            .backend
            .open_stream(config, Box::new(dispatcher))
            .map_err(|code| {
                let err = AudioError::backend(code, "open_stream");
                log_audio_error(&err, "StreamEngine::open");
                err
            })?;

        config.apply_negotiated(&stream.info());
        if let Err(err) = shared.timestamps.reset(config.sample_rate) {
            let _ = stream.close();
            return Err(err);
        }

        registry::stream_opened();
        self.stream = Some(stream);
        self.fades = Some(producer);
        self.fade_generation = 0;
        self.shared = shared;
        self.config = Some(config.clone());
        self.state = StreamState::Opened;

        tracing::info!(
            engine = self.id,
            sample_rate = config.sample_rate,
            frames_per_buffer = config.frames_per_buffer,
            input_channels = config.input_channels(),
            output_channels = config.output_channels(),
            "stream opened"
        );
        Ok(())
    }

    /// Start with the configured fade-in.
    pub fn start(&mut self) -> Result<()> {
        self.start_with_fade(self.settings.fade_in_secs)
    }

    /// Start the stream, ramping output from its current gain to unity.
    ///
    /// A non-positive `fade_in_secs` jumps straight to unity.
    ///
    /// # Errors
    /// * `NotOpen` - no stream is open
    /// * `WrongState` - already running; stop first
    /// * `BackendError` - the backend refused; state is unchanged
    pub fn start_with_fade(&mut self, fade_in_secs: f64) -> Result<()> {
        match self.state {
            StreamState::Closed => return Err(AudioError::NotOpen { operation: "start" }),
            StreamState::Running => {
                return Err(AudioError::WrongState {
                    operation: "start",
                    state: self.state,
                })
            }
            StreamState::Opened | StreamState::Stopping => {}
        }

        self.reset_clock()?;
        self.shared.running.store(true, Ordering::Release);

        let Some(stream) = self.stream.as_mut() else {
            self.shared.running.store(false, Ordering::Release);
            return Err(AudioError::NotOpen { operation: "start" });
        };
        if let Err(code) = stream.start() {
            self.shared.running.store(false, Ordering::Release);
            let err = AudioError::backend(code, "start_stream");
            log_audio_error(&err, "StreamEngine::start");
            return Err(err);
        }

        // blocks before this lands keep the previous gain
        let kind = if fade_in_secs > 0.0 {
            FadeKind::Ramp {
                target: 1.0,
                seconds: fade_in_secs,
            }
        } else {
            FadeKind::Snap(1.0)
        };
        self.request_fade(kind);
        self.state = StreamState::Running;
        tracing::info!(engine = self.id, fade_in_secs, "stream started");
        Ok(())
    }

    /// Stop with the configured fade-out.
    pub fn stop(&mut self) -> Result<()> {
        self.stop_with_fade(self.settings.fade_out_secs)
    }

    /// Fade out, then stop the stream.
    ///
    /// While the callback is still running, output ramps to silence over
    /// `fade_out_secs` and this call blocks until the ramp settles or the
    /// configured stop timeout passes. Stopping a stream that is not running
    /// succeeds, and so does stopping a closed engine.
    ///
    /// # Errors
    /// `BackendError` for any backend failure other than "already stopped".
    pub fn stop_with_fade(&mut self, fade_out_secs: f64) -> Result<()> {
        if self.stream.is_none() {
            return Ok(());
        }

        if self.state == StreamState::Running {
            self.state = StreamState::Stopping;
            if self.is_running() && fade_out_secs > 0.0 {
                let generation = self.request_fade(FadeKind::Ramp {
                    target: 0.0,
                    seconds: fade_out_secs,
                });
                self.wait_for_fade(generation);
            }
        }

        if let Some(stream) = self.stream.as_mut() {
            match stream.stop() {
                Ok(()) => {}
                Err(BackendCode::STREAM_IS_STOPPED) => {
                    tracing::debug!(engine = self.id, "stream already stopped");
                }
                Err(code) => {
                    let err = AudioError::backend(code, "stop_stream");
                    log_audio_error(&err, "StreamEngine::stop");
                    return Err(err);
                }
            }
        }

        self.shared.running.store(false, Ordering::Release);
        self.reset_clock()?;
        self.state = StreamState::Opened;
        tracing::info!(engine = self.id, "stream stopped");
        Ok(())
    }

    /// Stop immediately without waiting for a fade, then release the stream.
    ///
    /// The handle is released even if the backend reports a failure.
    ///
    /// # Errors
    /// `BackendError` if the backend abort failed for a reason other than
    /// "already stopped".
    pub fn abort(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        self.shared.running.store(false, Ordering::Release);
        let outcome = stream.abort();
        self.release(stream);
        tracing::warn!(engine = self.id, "stream aborted");

        match outcome {
            Ok(()) | Err(BackendCode::STREAM_IS_STOPPED) => Ok(()),
            Err(code) => {
                let err = AudioError::backend(code, "abort_stream");
                log_audio_error(&err, "StreamEngine::abort");
                Err(err)
            }
        }
    }

    /// Stop if needed and release the stream. Safe to call in any state, any
    /// number of times; failures are logged, never returned.
    pub fn close(&mut self) {
        if self.stream.is_none() {
            return;
        }
        if matches!(self.state, StreamState::Running | StreamState::Stopping) {
            if let Err(err) = self.stop_with_fade(self.settings.close_fade_out_secs) {
                tracing::warn!(engine = self.id, %err, "stop during close failed");
            }
        }
        if let Some(stream) = self.stream.take() {
            self.release(stream);
        }
        tracing::info!(engine = self.id, "stream closed");
    }

    /// Start, block until the callback returns `Complete` or `Abort`, stop.
    ///
    /// # Returns
    /// Frames processed before the stream finished.
    pub fn run_until_complete(&mut self) -> Result<u64> {
        self.start()?;
        let poll = self.settings.run_poll_interval();
        while self.is_running() {
            std::thread::sleep(poll);
        }
        let frames = self.frames_processed();
        self.stop()?;
        Ok(frames)
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// True from a successful start until stop, or until the callback
    /// returns something other than `Continue`.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.shared.timestamps.elapsed_seconds()
    }

    pub fn frames_processed(&self) -> u64 {
        self.shared.timestamps.frames_processed()
    }

    /// Metered peak level of `channel`: input channels when the stream has
    /// input, output channels otherwise.
    pub fn envelope(&self, channel: usize) -> Option<f32> {
        self.shared.levels.get(channel)
    }

    /// Negotiated configuration of the open (or last opened) stream.
    pub fn config(&self) -> Option<&StreamConfig> {
        self.config.as_ref()
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    fn request_fade(&mut self, kind: FadeKind) -> u64 {
        self.fade_generation += 1;
        let command = FadeCommand {
            generation: self.fade_generation,
            kind,
        };
        if let Some(fades) = self.fades.as_mut() {
            if fades.push(command).is_err() {
                tracing::warn!(engine = self.id, ?kind, "fade queue full, request dropped");
            }
        }
        self.fade_generation
    }

    fn wait_for_fade(&self, generation: u64) {
        let deadline = Instant::now() + self.settings.stop_timeout();
        let poll = self.settings.stop_poll_interval();
        loop {
            if self.shared.fade_settled.load(Ordering::Acquire) >= generation {
                return;
            }
            if !self.is_running() {
                return;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    engine = self.id,
                    timeout_ms = self.settings.stop_timeout_ms,
                    "fade-out did not settle before timeout, stopping anyway"
                );
                return;
            }
            std::thread::sleep(poll);
        }
    }

    fn reset_clock(&self) -> Result<()> {
        let rate = self.config.as_ref().map_or(0, |c| c.sample_rate);
        self.shared.timestamps.reset(rate)
    }

    fn release(&mut self, stream: Box<dyn BackendStream>) {
        if let Err(code) = stream.close() {
            let err = AudioError::backend(code, "close_stream");
            log_audio_error(&err, "StreamEngine::close");
        }
        registry::stream_closed();
        self.shared.running.store(false, Ordering::Release);
        self.fades = None;
        self.state = StreamState::Closed;
    }
}

impl Drop for StreamEngine {
    fn drop(&mut self) {
        self.close();
    }
}
