use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::audio::oscillator::SineOscillator;
use crate::audio::{CallbackResult, SampleFormat, StreamConfig, StreamParameters};

use super::{
    AudioBackend, BackendCode, BackendStream, BackendTimeInfo, DeviceDescriptor,
    HostApiDescriptor, NegotiatedStream, StatusFlags, StreamCallback,
};

/// Device entry in a simulated topology.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedDevice {
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: f64,
    pub default_low_latency: f64,
    pub default_high_latency: f64,
}

impl SimulatedDevice {
    pub fn new(name: &str, max_input_channels: u16, max_output_channels: u16) -> Self {
        Self {
            name: name.to_string(),
            max_input_channels,
            max_output_channels,
            default_sample_rate: 48_000.0,
            default_low_latency: 0.005,
            default_high_latency: 0.04,
        }
    }

    pub fn input(name: &str, channels: u16) -> Self {
        Self::new(name, channels, 0)
    }

    pub fn output(name: &str, channels: u16) -> Self {
        Self::new(name, 0, channels)
    }

    pub fn duplex(name: &str, inputs: u16, outputs: u16) -> Self {
        Self::new(name, inputs, outputs)
    }

    pub fn with_sample_rate(mut self, rate: f64) -> Self {
        self.default_sample_rate = rate;
        self
    }
}

/// Host API entry in a simulated topology. Defaults are API-local positions.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedApi {
    pub name: String,
    pub devices: Vec<SimulatedDevice>,
    pub default_input: Option<usize>,
    pub default_output: Option<usize>,
}

impl SimulatedApi {
    pub fn new(name: &str, devices: Vec<SimulatedDevice>) -> Self {
        Self {
            name: name.to_string(),
            devices,
            default_input: None,
            default_output: None,
        }
    }

    pub fn with_defaults(mut self, input: Option<usize>, output: Option<usize>) -> Self {
        self.default_input = input;
        self.default_output = output;
        self
    }
}

/// Hardware inventory served by [`SimulatedBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatedTopology {
    pub apis: Vec<SimulatedApi>,
    pub default_api: usize,
}

impl SimulatedTopology {
    /// A typical Linux desktop: ALSA with mixed devices, JACK with one duplex
    /// port pair, and an OSS layer with nothing behind it.
    pub fn desktop() -> Self {
        let alsa = SimulatedApi::new(
            "ALSA",
            vec![
                SimulatedDevice::duplex("HDA Intel PCH: ALC3246 Analog (hw:0,0)", 2, 2),
                SimulatedDevice::output("HDA Intel PCH: HDMI 0 (hw:0,3)", 8),
                SimulatedDevice::input("USB PnP Sound Device: Audio (hw:1,0)", 1)
                    .with_sample_rate(44_100.0),
                SimulatedDevice::duplex("pulse", 32, 32),
                SimulatedDevice::duplex("default", 32, 32),
            ],
        )
        .with_defaults(Some(4), Some(4));

        let jack = SimulatedApi::new(
            "JACK Audio Connection Kit",
            vec![SimulatedDevice::duplex("system", 2, 2)],
        )
        .with_defaults(Some(0), Some(0));

        let oss = SimulatedApi::new("OSS", Vec::new());

        Self {
            apis: vec![alsa, jack, oss],
            default_api: 0,
        }
    }

    /// A machine with no audio hardware at all.
    pub fn headless() -> Self {
        Self {
            apis: Vec::new(),
            default_api: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Inventory {
    apis: Vec<HostApiDescriptor>,
    devices: Vec<DeviceDescriptor>,
    /// api index -> global device indices in API order
    api_devices: Vec<Vec<usize>>,
    default_api: Option<usize>,
}

impl Inventory {
    fn build(topology: &SimulatedTopology) -> Self {
        let mut inventory = Inventory::default();
        for (api_index, api) in topology.apis.iter().enumerate() {
            let first_global = inventory.devices.len();
            let mut globals = Vec::with_capacity(api.devices.len());
            for device in &api.devices {
                globals.push(inventory.devices.len());
                inventory.devices.push(DeviceDescriptor {
                    name: device.name.clone(),
                    host_api: api_index,
                    max_input_channels: device.max_input_channels,
                    max_output_channels: device.max_output_channels,
                    default_low_input_latency: device.default_low_latency,
                    default_low_output_latency: device.default_low_latency,
                    default_high_input_latency: device.default_high_latency,
                    default_high_output_latency: device.default_high_latency,
                    default_sample_rate: device.default_sample_rate,
                });
            }
            inventory.apis.push(HostApiDescriptor {
                name: api.name.clone(),
                device_count: api.devices.len(),
                default_input_device: api.default_input.map(|local| first_global + local),
                default_output_device: api.default_output.map(|local| first_global + local),
            });
            inventory.api_devices.push(globals);
        }
        if topology.default_api < inventory.apis.len() {
            inventory.default_api = Some(topology.default_api);
        }
        inventory
    }
}

/// Counters observable from tests and diagnostics.
#[derive(Debug, Default)]
pub struct SimulatedStats {
    initialize_calls: AtomicUsize,
    terminate_calls: AtomicUsize,
    streams_opened: AtomicUsize,
    streams_closed: AtomicUsize,
    callbacks: AtomicU64,
    last_output_peak: AtomicU32,
}

impl SimulatedStats {
    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    pub fn streams_opened(&self) -> usize {
        self.streams_opened.load(Ordering::SeqCst)
    }

    pub fn streams_closed(&self) -> usize {
        self.streams_closed.load(Ordering::SeqCst)
    }

    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Acquire)
    }

    /// Peak absolute sample value of the most recent output block.
    pub fn last_output_peak(&self) -> f32 {
        f32::from_bits(self.last_output_peak.load(Ordering::Acquire))
    }

    fn record_block(&self, output: &[f32]) {
        let peak = output.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()));
        self.last_output_peak.store(peak.to_bits(), Ordering::Release);
        self.callbacks.fetch_add(1, Ordering::AcqRel);
    }
}

/// Deterministic in-process backend.
///
/// Serves a [`SimulatedTopology`] through the index-based backend queries and
/// runs each started stream on a worker thread that invokes the callback once
/// per block, paced at the block's real duration unless a block period is
/// configured. Input blocks carry a 440 Hz sine at half scale.
pub struct SimulatedBackend {
    topology: RwLock<SimulatedTopology>,
    inventory: RwLock<Inventory>,
    initialized: AtomicUsize,
    block_period: Option<Duration>,
    init_failure: Option<BackendCode>,
    open_failure: Option<BackendCode>,
    start_failure: Option<BackendCode>,
    stop_failure: Option<BackendCode>,
    stats: Arc<SimulatedStats>,
}

impl SimulatedBackend {
    pub fn new(topology: SimulatedTopology) -> Self {
        let inventory = Inventory::build(&topology);
        Self {
            topology: RwLock::new(topology),
            inventory: RwLock::new(inventory),
            initialized: AtomicUsize::new(0),
            block_period: None,
            init_failure: None,
            open_failure: None,
            start_failure: None,
            stop_failure: None,
            stats: Arc::new(SimulatedStats::default()),
        }
    }

    pub fn desktop() -> Self {
        Self::new(SimulatedTopology::desktop())
    }

    /// Pace callbacks at a fixed period instead of the block's real duration.
    pub fn with_block_period(mut self, period: Duration) -> Self {
        self.block_period = Some(period);
        self
    }

    pub fn with_init_failure(mut self, code: BackendCode) -> Self {
        self.init_failure = Some(code);
        self
    }

    pub fn with_open_failure(mut self, code: BackendCode) -> Self {
        self.open_failure = Some(code);
        self
    }

    pub fn with_start_failure(mut self, code: BackendCode) -> Self {
        self.start_failure = Some(code);
        self
    }

    pub fn with_stop_failure(mut self, code: BackendCode) -> Self {
        self.stop_failure = Some(code);
        self
    }

    pub fn stats(&self) -> Arc<SimulatedStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst) > 0
    }

    /// Swap the hardware; visible after the next [`AudioBackend::refresh`].
    pub fn set_topology(&self, topology: SimulatedTopology) {
        match self.topology.write() {
            Ok(mut guard) => *guard = topology,
            Err(poisoned) => *poisoned.into_inner() = topology,
        }
    }

    fn read_inventory<T>(&self, f: impl FnOnce(&Inventory) -> T) -> T {
        match self.inventory.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }

    fn ensure_initialized(&self) -> Result<(), BackendCode> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(BackendCode::NOT_INITIALIZED)
        }
    }

    fn check_direction(
        &self,
        params: &StreamParameters,
        max_channels: impl Fn(&DeviceDescriptor) -> u16,
    ) -> Result<(), BackendCode> {
        let device = self
            .device_info(params.device)
            .ok_or(BackendCode::INVALID_DEVICE)?;
        let max = max_channels(&device);
        if max == 0 {
            return Err(BackendCode::INVALID_DEVICE);
        }
        if params.channel_count == 0 || params.channel_count > max {
            return Err(BackendCode::INVALID_CHANNEL_COUNT);
        }
        Ok(())
    }
}

impl AudioBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "Simulated"
    }

    fn version_text(&self) -> String {
        format!("simulated backend {}", env!("CARGO_PKG_VERSION"))
    }

    fn initialize(&self) -> Result<(), BackendCode> {
        self.stats.initialize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = self.init_failure {
            return Err(code);
        }
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&self) {
        self.stats.terminate_calls.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .initialized
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    fn refresh(&self) -> Result<(), BackendCode> {
        self.ensure_initialized()?;
        let rebuilt = match self.topology.read() {
            Ok(guard) => Inventory::build(&guard),
            Err(poisoned) => Inventory::build(&poisoned.into_inner()),
        };
        match self.inventory.write() {
            Ok(mut guard) => *guard = rebuilt,
            Err(poisoned) => *poisoned.into_inner() = rebuilt,
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
        self.read_inventory(|inv| inv.devices.get(device_index).cloned())
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
        callback: Box<dyn StreamCallback>,
    ) -> Result<Box<dyn BackendStream>, BackendCode> {
        self.ensure_initialized()?;
        if let Some(code) = self.open_failure {
            return Err(code);
        }
        if config.input.is_none() && config.output.is_none() {
            return Err(BackendCode::INVALID_DEVICE);
        }
        if config.sample_format != SampleFormat::Float32 {
            return Err(BackendCode::SAMPLE_FORMAT_NOT_SUPPORTED);
        }
        if config.sample_rate == 0 {
            return Err(BackendCode::INVALID_SAMPLE_RATE);
        }
        if let Some(params) = &config.input {
            self.check_direction(params, |d| d.max_input_channels)?;
        }
        if let Some(params) = &config.output {
            self.check_direction(params, |d| d.max_output_channels)?;
        }

        let frames = config.frames_per_buffer.max(1) as usize;
        let block_secs = frames as f64 / config.sample_rate as f64;
        let negotiated = NegotiatedStream {
            sample_rate: config.sample_rate,
            input_channels: config.input.map_or(0, |p| p.channel_count),
            output_channels: config.output.map_or(0, |p| p.channel_count),
            input_latency: config
                .input
                .map_or(0.0, |p| p.suggested_latency.max(block_secs)),
            output_latency: config
                .output
                .map_or(0.0, |p| p.suggested_latency.max(block_secs)),
        };
        let period = self
            .block_period
            .unwrap_or_else(|| Duration::from_secs_f64(block_secs));

        self.stats.streams_opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            frames,
            sample_rate = config.sample_rate,
            "simulated stream opened"
        );

        Ok(Box::new(SimulatedStream {
            callback: Some(callback),
            worker: None,
            active: Arc::new(AtomicBool::new(false)),
            negotiated,
            frames_per_buffer: frames,
            period,
            start_failure: self.start_failure,
            stop_failure: self.stop_failure,
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct SimulatedStream {
    callback: Option<Box<dyn StreamCallback>>,
    worker: Option<JoinHandle<Box<dyn StreamCallback>>>,
    active: Arc<AtomicBool>,
    negotiated: NegotiatedStream,
    frames_per_buffer: usize,
    period: Duration,
    start_failure: Option<BackendCode>,
    stop_failure: Option<BackendCode>,
    stats: Arc<SimulatedStats>,
}

impl SimulatedStream {
    fn halt(&mut self) -> Result<(), BackendCode> {
        let worker = self.worker.take().ok_or(BackendCode::STREAM_IS_STOPPED)?;
        self.active.store(false, Ordering::Release);
        match worker.join() {
            Ok(callback) => {
                self.callback = Some(callback);
                Ok(())
            }
            Err(_) => Err(BackendCode::INTERNAL_ERROR),
        }
    }
}

impl BackendStream for SimulatedStream {
    fn start(&mut self) -> Result<(), BackendCode> {
        if self.worker.is_some() {
            return Err(BackendCode::STREAM_IS_NOT_STOPPED);
        }
        if let Some(code) = self.start_failure {
            return Err(code);
        }
        let mut callback = self.callback.take().ok_or(BackendCode::INTERNAL_ERROR)?;

        let frames = self.frames_per_buffer;
        let in_channels = self.negotiated.input_channels as usize;
        let out_channels = self.negotiated.output_channels as usize;
        let sample_rate = self.negotiated.sample_rate;
        let period = self.period;
        let active = Arc::clone(&self.active);
        let stats = Arc::clone(&self.stats);

        active.store(true, Ordering::Release);
        let worker = std::thread::Builder::new()
            .name("simulated-audio".to_string())
            .spawn(move || {
                let mut input = vec![0.0_f32; frames * in_channels];
                let mut output = vec![0.0_f32; frames * out_channels];
                let mut tone = SineOscillator::new(sample_rate, 440.0);
                let mut time = BackendTimeInfo::default();
                let block_secs = frames as f64 / sample_rate as f64;

                while active.load(Ordering::Acquire) {
                    tone.fill_interleaved(&mut input, in_channels, 0.5);
                    output.iter_mut().for_each(|s| *s = 0.0);
                    let result = callback.process(
                        &input,
                        &mut output,
                        frames,
                        &time,
                        StatusFlags::empty(),
                    );
                    stats.record_block(&output);
                    time.current_time += block_secs;
                    time.input_buffer_adc_time = time.current_time;
                    time.output_buffer_dac_time = time.current_time + block_secs;
                    if result != CallbackResult::Continue {
                        active.store(false, Ordering::Release);
                        break;
                    }
                    std::thread::sleep(period);
                }
                callback
            })
            .map_err(|_| BackendCode::HOST_ERROR);

        match worker {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(code) => {
                // the closure (and the callback inside it) is gone with the failed spawn
                self.active.store(false, Ordering::Release);
                Err(code)
            }
        }
    }

    fn stop(&mut self) -> Result<(), BackendCode> {
        if self.worker.is_some() {
            if let Some(code) = self.stop_failure {
                return Err(code);
            }
        }
        self.halt()
    }

    fn abort(&mut self) -> Result<(), BackendCode> {
        self.halt()
    }

    fn close(mut self: Box<Self>) -> Result<(), BackendCode> {
        let _ = self.halt();
        self.stats.streams_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn info(&self) -> NegotiatedStream {
        self.negotiated
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.halt();
        }
    }
}
