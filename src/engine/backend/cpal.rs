//! CPAL-based audio backend for desktop platforms (Linux, macOS, Windows)
//!
//! Every host cpal can reach on this machine becomes a host API and every
//! device of that host a device. The inventory is rescanned on `refresh()`;
//! streams look their device up again by host and position when opened.
//!
//! Duplex streams use cpal's output callback as the master clock: the input
//! stream pushes into a lock-free ring and the output callback pops one
//! block's worth before calling the dispatcher.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use rtrb::RingBuffer;

use crate::audio::{CallbackResult, SampleFormat, StreamConfig};

use super::{
    AudioBackend, BackendCode, BackendStream, BackendTimeInfo, DeviceDescriptor,
    HostApiDescriptor, NegotiatedStream, StatusFlags, StreamCallback,
};

/// Used when a device does not report a buffer size range
const FALLBACK_LOW_LATENCY: f64 = 0.01;
const FALLBACK_HIGH_LATENCY: f64 = 0.1;
const FALLBACK_SAMPLE_RATE: f64 = 48_000.0;

/// Blocks of input the duplex ring can hold before reporting overflow
const DUPLEX_RING_BLOCKS: usize = 8;

struct DeviceEntry {
    descriptor: DeviceDescriptor,
    host: cpal::HostId,
    /// Position in `host.devices()` at scan time
    position: usize,
}

#[derive(Default)]
struct Inventory {
    apis: Vec<HostApiDescriptor>,
    devices: Vec<DeviceEntry>,
    api_devices: Vec<Vec<usize>>,
    default_api: Option<usize>,
}

/// Backend over every available cpal host.
pub struct CpalBackend {
    inventory: RwLock<Inventory>,
    initialized: AtomicBool,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CpalBackend {
    pub fn new() -> Self {
        Self {
            inventory: RwLock::new(Inventory::default()),
            initialized: AtomicBool::new(false),
        }
    }

    fn read_inventory<T>(&self, f: impl FnOnce(&Inventory) -> T) -> T {
        match self.inventory.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn ensure_initialized(&self) -> Result<(), BackendCode> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(BackendCode::NOT_INITIALIZED)
        }
    }

    /// Re-find a scanned device on its host.
    fn cpal_device(&self, index: usize) -> Result<cpal::Device, BackendCode> {
        let (host_id, position, name) = self.read_inventory(|inv| {
            inv.devices
                .get(index)
                .map(|entry| (entry.host, entry.position, entry.descriptor.name.clone()))
        })
        .ok_or(BackendCode::INVALID_DEVICE)?;

        let host = cpal::host_from_id(host_id).map_err(|_| BackendCode::DEVICE_UNAVAILABLE)?;
        let device = host
            .devices()
            .map_err(|_| BackendCode::HOST_ERROR)?
            .nth(position)
            .ok_or(BackendCode::DEVICE_UNAVAILABLE)?;
        match device.name() {
            Ok(current) if current == name => Ok(device),
            _ => Err(BackendCode::DEVICE_UNAVAILABLE),
        }
    }
}

fn scan() -> Inventory {
    let mut inventory = Inventory::default();
    let default_host = cpal::default_host().id();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(host) => host,
            Err(err) => {
                tracing::warn!(?err, host = host_id.name(), "audio host unavailable");
                continue;
            }
        };
        let api_index = inventory.apis.len();
        let default_input_name = host.default_input_device().and_then(|d| d.name().ok());
        let default_output_name = host.default_output_device().and_then(|d| d.name().ok());

        let mut globals = Vec::new();
        let mut default_input = None;
        let mut default_output = None;
        match host.devices() {
            Ok(devices) => {
                for (position, device) in devices.enumerate() {
                    let global = inventory.devices.len();
                    let descriptor = describe(&device, api_index, host_id, position);
                    if default_input.is_none()
                        && descriptor.max_input_channels > 0
                        && default_input_name.as_deref() == Some(descriptor.name.as_str())
                    {
                        default_input = Some(global);
                    }
                    if default_output.is_none()
                        && descriptor.max_output_channels > 0
                        && default_output_name.as_deref() == Some(descriptor.name.as_str())
                    {
                        default_output = Some(global);
                    }
                    inventory.devices.push(DeviceEntry {
                        descriptor,
                        host: host_id,
                        position,
                    });
                    globals.push(global);
                }
            }
            Err(err) => {
                tracing::warn!(?err, host = host_id.name(), "device enumeration failed");
            }
        }

        if host_id == default_host {
            inventory.default_api = Some(api_index);
        }
        inventory.apis.push(HostApiDescriptor {
            name: host_id.name().to_string(),
            device_count: globals.len(),
            default_input_device: default_input,
            default_output_device: default_output,
        });
        inventory.api_devices.push(globals);
    }
    inventory
}

fn describe(
    device: &cpal::Device,
    api_index: usize,
    host_id: cpal::HostId,
    position: usize,
) -> DeviceDescriptor {
    let name = device
        .name()
        .unwrap_or_else(|_| format!("{} device {}", host_id.name(), position));

    let input_ranges: Vec<_> = device
        .supported_input_configs()
        .map(|configs| configs.collect())
        .unwrap_or_default();
    let output_ranges: Vec<_> = device
        .supported_output_configs()
        .map(|configs| configs.collect())
        .unwrap_or_default();

    let default_sample_rate = device
        .default_output_config()
        .or_else(|_| device.default_input_config())
        .map(|config| config.sample_rate().0 as f64)
        .unwrap_or(FALLBACK_SAMPLE_RATE);

    let (low_in, high_in) = latency_range(&input_ranges, default_sample_rate);
    let (low_out, high_out) = latency_range(&output_ranges, default_sample_rate);

    DeviceDescriptor {
        name,
        host_api: api_index,
        max_input_channels: max_channels(&input_ranges),
        max_output_channels: max_channels(&output_ranges),
        default_low_input_latency: low_in,
        default_low_output_latency: low_out,
        default_high_input_latency: high_in,
        default_high_output_latency: high_out,
        default_sample_rate,
    }
}

fn max_channels(ranges: &[cpal::SupportedStreamConfigRange]) -> u16 {
    ranges.iter().map(|r| r.channels()).max().unwrap_or(0)
}

fn latency_range(ranges: &[cpal::SupportedStreamConfigRange], sample_rate: f64) -> (f64, f64) {
    let smallest = ranges
        .iter()
        .filter_map(|r| match r.buffer_size() {
            cpal::SupportedBufferSize::Range { min, .. } if *min > 0 => Some(*min),
            _ => None,
        })
        .min();
    match smallest {
        Some(frames) if sample_rate > 0.0 => {
            let low = frames as f64 / sample_rate;
            (low, low.max(FALLBACK_HIGH_LATENCY))
        }
        _ => (FALLBACK_LOW_LATENCY, FALLBACK_HIGH_LATENCY),
    }
}

/// Maps cpal's opaque stream instants onto seconds since the first block.
#[derive(Default)]
struct StreamClock {
    origin: Option<cpal::StreamInstant>,
}

impl StreamClock {
    fn seconds(&mut self, instant: &cpal::StreamInstant) -> f64 {
        let origin = *self.origin.get_or_insert(*instant);
        signed_seconds(instant.duration_since(&origin), origin.duration_since(instant))
    }
}

/// `ahead` is set when the instant is at or after its reference, `behind`
/// when it is at or before it.
fn signed_seconds(ahead: Option<Duration>, behind: Option<Duration>) -> f64 {
    match (ahead, behind) {
        (Some(ahead), _) => ahead.as_secs_f64(),
        (None, Some(behind)) => -behind.as_secs_f64(),
        (None, None) => 0.0,
    }
}

fn build_error_code(err: &cpal::BuildStreamError) -> BackendCode {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => BackendCode::DEVICE_UNAVAILABLE,
        cpal::BuildStreamError::StreamConfigNotSupported => BackendCode::INVALID_SAMPLE_RATE,
        cpal::BuildStreamError::InvalidArgument => BackendCode::INVALID_CHANNEL_COUNT,
        _ => BackendCode::HOST_ERROR,
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn version_text(&self) -> String {
        format!(
            "cpal backend (default host {})",
            cpal::default_host().id().name()
        )
    }

    fn initialize(&self) -> Result<(), BackendCode> {
        self.initialized.store(true, Ordering::Release);
        self.refresh()
    }

    fn terminate(&self) {
        self.initialized.store(false, Ordering::Release);
        match self.inventory.write() {
            Ok(mut guard) => *guard = Inventory::default(),
            Err(poisoned) => *poisoned.into_inner() = Inventory::default(),
        }
    }

    fn refresh(&self) -> Result<(), BackendCode> {
        self.ensure_initialized()?;
        let fresh = scan();
        tracing::debug!(
            hosts = fresh.apis.len(),
            devices = fresh.devices.len(),
            "cpal inventory scanned"
        );
        match self.inventory.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
        Ok(())
    }

    fn host_api_count(&self) -> Result<usize, BackendCode> {
        self.ensure_initialized()?;
        Ok(self.read_inventory(|inv| inv.apis.len()))
    }

    fn host_api_info(&self, api_index: usize) -> Option<HostApiDescriptor> {
        self.read_inventory(|inv| inv.apis.get(api_index).cloned())
    }

    fn host_api_device_index_to_device_index(
        &self,
        api_index: usize,
        api_device_index: usize,
    ) -> Option<usize> {
        self.read_inventory(|inv| {
            inv.api_devices
                .get(api_index)
                .and_then(|globals| globals.get(api_device_index).copied())
        })
    }

    fn device_count(&self) -> Result<usize, BackendCode> {
        self.ensure_initialized()?;
        Ok(self.read_inventory(|inv| inv.devices.len()))
    }

    fn device_info(&self, device_index: usize) -> Option<DeviceDescriptor> {
        self.read_inventory(|inv| {
            inv.devices
                .get(device_index)
                .map(|entry| entry.descriptor.clone())
        })
    }

    fn default_host_api(&self) -> Option<usize> {
        self.read_inventory(|inv| inv.default_api)
    }

    fn default_input_device(&self) -> Option<usize> {
        self.read_inventory(|inv| {
            inv.default_api
                .and_then(|api| inv.apis.get(api))
                .and_then(|api| api.default_input_device)
        })
    }

    fn default_output_device(&self) -> Option<usize> {
        self.read_inventory(|inv| {
            inv.default_api
                .and_then(|api| inv.apis.get(api))
                .and_then(|api| api.default_output_device)
        })
    }

    fn open_stream(
        &self,
        config: &StreamConfig,
        mut callback: Box<dyn StreamCallback>,
    ) -> Result<Box<dyn BackendStream>, BackendCode> {
        self.ensure_initialized()?;
        if config.sample_format != SampleFormat::Float32 {
            return Err(BackendCode::SAMPLE_FORMAT_NOT_SUPPORTED);
        }
        if config.sample_rate == 0 {
            return Err(BackendCode::INVALID_SAMPLE_RATE);
        }

        let frames = config.frames_per_buffer.max(1);
        let block_secs = frames as f64 / config.sample_rate as f64;
        let stream_config = |channels: u16| cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(frames),
        };
        let finished = Arc::new(AtomicBool::new(false));

        let mut input_stream = None;
        let mut output_stream = None;

        match (config.input, config.output) {
            (None, None) => return Err(BackendCode::INVALID_DEVICE),
            (None, Some(out)) => {
                let device = self.cpal_device(out.device)?;
                let channels = out.channel_count as usize;
                let finished = Arc::clone(&finished);
                let mut clock = StreamClock::default();
                let stream = device
                    .build_output_stream(
                        &stream_config(out.channel_count),
                        move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                            if finished.load(Ordering::Acquire) {
                                data.iter_mut().for_each(|s| *s = 0.0);
                                return;
                            }
                            let timestamp = info.timestamp();
                            let time_info = BackendTimeInfo {
                                input_buffer_adc_time: 0.0,
                                current_time: clock.seconds(&timestamp.callback),
                                output_buffer_dac_time: clock.seconds(&timestamp.playback),
                            };
                            let frames = data.len() / channels.max(1);
                            let result = callback.process(
                                &[],
                                data,
                                frames,
                                &time_info,
                                StatusFlags::empty(),
                            );
                            if result != CallbackResult::Continue {
                                finished.store(true, Ordering::Release);
                            }
                        },
                        |err| tracing::error!(?err, "audio output stream error"),
                        None,
                    )
                    .map_err(|err| {
                        tracing::warn!(?err, "failed to build output stream");
                        build_error_code(&err)
                    })?;
                output_stream = Some(stream);
            }
            (Some(inp), None) => {
                let device = self.cpal_device(inp.device)?;
                let channels = inp.channel_count as usize;
                let finished = Arc::clone(&finished);
                let mut clock = StreamClock::default();
                let stream = device
                    .build_input_stream(
                        &stream_config(inp.channel_count),
                        move |data: &[f32], info: &cpal::InputCallbackInfo| {
                            if finished.load(Ordering::Acquire) {
                                return;
                            }
                            let timestamp = info.timestamp();
                            let time_info = BackendTimeInfo {
                                input_buffer_adc_time: clock.seconds(&timestamp.capture),
                                current_time: clock.seconds(&timestamp.callback),
                                output_buffer_dac_time: 0.0,
                            };
                            let frames = data.len() / channels.max(1);
                            let result = callback.process(
                                data,
                                &mut [],
                                frames,
                                &time_info,
                                StatusFlags::empty(),
                            );
                            if result != CallbackResult::Continue {
                                finished.store(true, Ordering::Release);
                            }
                        },
                        |err| tracing::error!(?err, "audio input stream error"),
                        None,
                    )
                    .map_err(|err| {
                        tracing::warn!(?err, "failed to build input stream");
                        build_error_code(&err)
                    })?;
                input_stream = Some(stream);
            }
            (Some(inp), Some(out)) => {
                let input_device = self.cpal_device(inp.device)?;
                let output_device = self.cpal_device(out.device)?;
                let in_channels = inp.channel_count as usize;
                let out_channels = out.channel_count as usize;

                let capacity = frames as usize * in_channels * DUPLEX_RING_BLOCKS;
                let (mut producer, mut consumer) = RingBuffer::<f32>::new(capacity);
                let overflowed = Arc::new(AtomicBool::new(false));

                // capture-to-callback lag of the latest input block, as f64 bits
                let input_lag = Arc::new(AtomicU64::new(0));

                let input_overflowed = Arc::clone(&overflowed);
                let input_lag_writer = Arc::clone(&input_lag);
                let stream = input_device
                    .build_input_stream(
                        &stream_config(inp.channel_count),
                        move |data: &[f32], info: &cpal::InputCallbackInfo| {
                            let timestamp = info.timestamp();
                            let lag = signed_seconds(
                                timestamp.callback.duration_since(&timestamp.capture),
                                timestamp.capture.duration_since(&timestamp.callback),
                            );
                            input_lag_writer.store(lag.to_bits(), Ordering::Relaxed);
                            for &sample in data {
                                if producer.push(sample).is_err() {
                                    input_overflowed.store(true, Ordering::Relaxed);
                                    break;
                                }
                            }
                        },
                        |err| tracing::error!(?err, "audio input stream error"),
                        None,
                    )
                    .map_err(|err| {
                        tracing::warn!(?err, "failed to build duplex input stream");
                        build_error_code(&err)
                    })?;
                input_stream = Some(stream);

                let mut scratch = vec![0.0_f32; capacity];
                let finished = Arc::clone(&finished);
                let mut clock = StreamClock::default();
                let stream = output_device
                    .build_output_stream(
                        &stream_config(out.channel_count),
                        move |data: &mut [f32], info: &cpal::OutputCallbackInfo| {
                            if finished.load(Ordering::Acquire) {
                                data.iter_mut().for_each(|s| *s = 0.0);
                                return;
                            }
                            let timestamp = info.timestamp();
                            let current_time = clock.seconds(&timestamp.callback);
                            let lag = f64::from_bits(input_lag.load(Ordering::Relaxed));
                            let time_info = BackendTimeInfo {
                                input_buffer_adc_time: current_time - lag,
                                current_time,
                                output_buffer_dac_time: clock.seconds(&timestamp.playback),
                            };
                            let frames = (data.len() / out_channels.max(1))
                                .min(scratch.len() / in_channels.max(1));
                            let input = &mut scratch[..frames * in_channels];

                            let mut flags = StatusFlags::empty();
                            if overflowed.swap(false, Ordering::Relaxed) {
                                flags = flags | StatusFlags::INPUT_OVERFLOW;
                            }
                            for sample in input.iter_mut() {
                                *sample = match consumer.pop() {
                                    Ok(value) => value,
                                    Err(_) => {
                                        flags = flags | StatusFlags::INPUT_UNDERFLOW;
                                        0.0
                                    }
                                };
                            }

                            let (block, rest) = data.split_at_mut(frames * out_channels);
                            rest.iter_mut().for_each(|s| *s = 0.0);
                            let result = callback.process(
                                input,
                                block,
                                frames,
                                &time_info,
                                flags,
                            );
                            if result != CallbackResult::Continue {
                                finished.store(true, Ordering::Release);
                            }
                        },
                        |err| tracing::error!(?err, "audio output stream error"),
                        None,
                    )
                    .map_err(|err| {
                        tracing::warn!(?err, "failed to build duplex output stream");
                        build_error_code(&err)
                    })?;
                output_stream = Some(stream);
            }
        }

        // some hosts start streams as soon as they are built
        for stream in input_stream.iter().chain(output_stream.iter()) {
            let _ = stream.pause();
        }

        let negotiated = NegotiatedStream {
            sample_rate: config.sample_rate,
            input_channels: config.input_channels(),
            output_channels: config.output_channels(),
            input_latency: config
                .input
                .map_or(0.0, |p| p.suggested_latency.max(block_secs)),
            output_latency: config
                .output
                .map_or(0.0, |p| p.suggested_latency.max(block_secs)),
        };

        Ok(Box::new(CpalStream {
            input: input_stream,
            output: output_stream,
            playing: false,
            finished,
            negotiated,
        }))
    }
}

struct CpalStream {
    input: Option<cpal::Stream>,
    output: Option<cpal::Stream>,
    playing: bool,
    finished: Arc<AtomicBool>,
    negotiated: NegotiatedStream,
}

impl CpalStream {
    fn streams(&self) -> impl Iterator<Item = &cpal::Stream> {
        self.input.iter().chain(self.output.iter())
    }

    fn pause_all(&mut self) -> Result<(), BackendCode> {
        if !self.playing {
            return Err(BackendCode::STREAM_IS_STOPPED);
        }
        self.playing = false;
        let mut outcome = Ok(());
        for stream in self.output.iter().chain(self.input.iter()) {
            if let Err(err) = stream.pause() {
                tracing::warn!(?err, "failed to pause cpal stream");
                outcome = Err(match err {
                    cpal::PauseStreamError::DeviceNotAvailable => BackendCode::DEVICE_UNAVAILABLE,
                    _ => BackendCode::HOST_ERROR,
                });
            }
        }
        outcome
    }
}

impl BackendStream for CpalStream {
    fn start(&mut self) -> Result<(), BackendCode> {
        if self.playing {
            return Err(BackendCode::STREAM_IS_NOT_STOPPED);
        }
        self.finished.store(false, Ordering::Release);
        for stream in self.streams() {
            stream.play().map_err(|err| {
                tracing::warn!(?err, "failed to start cpal stream");
                match err {
                    cpal::PlayStreamError::DeviceNotAvailable => BackendCode::DEVICE_UNAVAILABLE,
                    _ => BackendCode::HOST_ERROR,
                }
            })?;
        }
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendCode> {
        self.pause_all()
    }

    fn abort(&mut self) -> Result<(), BackendCode> {
        self.pause_all()
    }

    fn close(mut self: Box<Self>) -> Result<(), BackendCode> {
        if self.playing {
            let _ = self.pause_all();
        }
        drop(self.output.take());
        drop(self.input.take());
        Ok(())
    }

    fn info(&self) -> NegotiatedStream {
        self.negotiated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_seconds_keeps_direction() {
        assert_eq!(signed_seconds(Some(Duration::from_millis(250)), None), 0.25);
        assert_eq!(signed_seconds(None, Some(Duration::from_millis(10))), -0.01);
        assert_eq!(
            signed_seconds(Some(Duration::ZERO), Some(Duration::ZERO)),
            0.0
        );
        assert_eq!(signed_seconds(None, None), 0.0);
    }

    #[test]
    fn test_latency_range_without_ranges_falls_back() {
        assert_eq!(
            latency_range(&[], 48_000.0),
            (FALLBACK_LOW_LATENCY, FALLBACK_HIGH_LATENCY)
        );
    }

    #[test]
    fn test_build_errors_map_to_backend_codes() {
        assert_eq!(
            build_error_code(&cpal::BuildStreamError::DeviceNotAvailable),
            BackendCode::DEVICE_UNAVAILABLE
        );
        assert_eq!(
            build_error_code(&cpal::BuildStreamError::StreamConfigNotSupported),
            BackendCode::INVALID_SAMPLE_RATE
        );
    }
}
