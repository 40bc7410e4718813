//! Backend abstractions for the stream core.
//!
//! The native audio layer (device discovery, buffer scheduling, transport) is
//! a black box reached through [`AudioBackend`]. It hands out host API and
//! device descriptors by index, opens [`BackendStream`]s, and drives a
//! [`StreamCallback`] on its own real-time thread.

use serde::{Deserialize, Serialize};

use crate::audio::{CallbackResult, StreamConfig};

#[cfg(feature = "cpal-backend")]
mod cpal;
#[cfg(feature = "cpal-backend")]
pub use self::cpal::CpalBackend;

mod simulated;
pub use simulated::{
    SimulatedApi, SimulatedBackend, SimulatedDevice, SimulatedStats, SimulatedTopology,
};

/// Opaque status code reported by the native layer.
///
/// Values are preserved verbatim for diagnostics. The named constants follow
/// the conventional PortAudio numbering so logs read familiarly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendCode(pub i32);

impl BackendCode {
    pub const NOT_INITIALIZED: Self = Self(-10000);
    pub const HOST_ERROR: Self = Self(-9999);
    pub const INVALID_CHANNEL_COUNT: Self = Self(-9998);
    pub const INVALID_SAMPLE_RATE: Self = Self(-9997);
    pub const INVALID_DEVICE: Self = Self(-9996);
    pub const SAMPLE_FORMAT_NOT_SUPPORTED: Self = Self(-9994);
    pub const DEVICE_UNAVAILABLE: Self = Self(-9985);
    pub const STREAM_IS_STOPPED: Self = Self(-9983);
    pub const STREAM_IS_NOT_STOPPED: Self = Self(-9982);
    pub const INTERNAL_ERROR: Self = Self(-9986);

    /// Short label for the well-known codes.
    pub fn describe(self) -> &'static str {
        match self {
            Self::NOT_INITIALIZED => "backend not initialized",
            Self::HOST_ERROR => "unanticipated host error",
            Self::INVALID_CHANNEL_COUNT => "invalid number of channels",
            Self::INVALID_SAMPLE_RATE => "invalid sample rate",
            Self::INVALID_DEVICE => "invalid device",
            Self::SAMPLE_FORMAT_NOT_SUPPORTED => "sample format not supported",
            Self::DEVICE_UNAVAILABLE => "device unavailable",
            Self::STREAM_IS_STOPPED => "stream is stopped",
            Self::STREAM_IS_NOT_STOPPED => "stream is not stopped",
            Self::INTERNAL_ERROR => "internal backend error",
            _ => "unknown backend error",
        }
    }
}

/// Host API as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostApiDescriptor {
    pub name: String,
    pub device_count: usize,
    /// Global index of this API's default input device, if any
    pub default_input_device: Option<usize>,
    /// Global index of this API's default output device, if any
    pub default_output_device: Option<usize>,
}

/// Device as reported by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    /// Index of the owning host API
    pub host_api: usize,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_low_input_latency: f64,
    pub default_low_output_latency: f64,
    pub default_high_input_latency: f64,
    pub default_high_output_latency: f64,
    pub default_sample_rate: f64,
}

/// Under/overflow indicators passed through to user code untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags(pub u32);

impl StatusFlags {
    pub const INPUT_UNDERFLOW: Self = Self(0x01);
    pub const INPUT_OVERFLOW: Self = Self(0x02);
    pub const OUTPUT_UNDERFLOW: Self = Self(0x04);
    pub const OUTPUT_OVERFLOW: Self = Self(0x08);
    pub const PRIMING_OUTPUT: Self = Self(0x10);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for StatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Backend-reported timing for one callback.
///
/// Not trusted for the elapsed-time clock (some hosts pin it at zero); only
/// forwarded to user code.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BackendTimeInfo {
    pub input_buffer_adc_time: f64,
    pub current_time: f64,
    pub output_buffer_dac_time: f64,
}

/// Parameters the backend actually granted when opening a stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegotiatedStream {
    pub sample_rate: u32,
    pub input_channels: u16,
    pub output_channels: u16,
    pub input_latency: f64,
    pub output_latency: f64,
}

/// Per-block entry point the backend invokes on its real-time thread.
///
/// `input` and `output` are interleaved `f32` blocks of `frames` frames; either
/// may be empty when the stream has no such direction.
pub trait StreamCallback: Send {
    fn process(
        &mut self,
        input: &[f32],
        output: &mut [f32],
        frames: usize,
        time_info: &BackendTimeInfo,
        flags: StatusFlags,
    ) -> CallbackResult;
}

/// A native stream handle.
///
/// Not required to be `Send`: some hosts pin their stream objects to the
/// thread that created them.
pub trait BackendStream {
    fn start(&mut self) -> Result<(), BackendCode>;
    /// Stop after queued audio drains. `STREAM_IS_STOPPED` if not started.
    fn stop(&mut self) -> Result<(), BackendCode>;
    /// Stop immediately, discarding queued audio.
    fn abort(&mut self) -> Result<(), BackendCode>;
    fn close(self: Box<Self>) -> Result<(), BackendCode>;
    fn info(&self) -> NegotiatedStream;
}

/// Trait implemented by native audio backends.
///
/// Index-based queries mirror how native host layers expose their inventory:
/// counts first, then descriptors by position. [`AudioBackend::refresh`] is
/// called before every enumeration pass so the counts reflect the current
/// hardware.
pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn version_text(&self) -> String;

    fn initialize(&self) -> Result<(), BackendCode>;
    fn terminate(&self);

    /// Re-scan the hardware inventory. Default: nothing cached, nothing to do.
    fn refresh(&self) -> Result<(), BackendCode> {
        Ok(())
    }

    fn host_api_count(&self) -> Result<usize, BackendCode>;
    fn host_api_info(&self, api_index: usize) -> Option<HostApiDescriptor>;
    /// Map an API-local device position to the global device index.
    fn host_api_device_index_to_device_index(
        &self,
        api_index: usize,
        api_device_index: usize,
    ) -> Option<usize>;

    fn device_count(&self) -> Result<usize, BackendCode>;
    fn device_info(&self, device_index: usize) -> Option<DeviceDescriptor>;

    fn default_host_api(&self) -> Option<usize>;
    fn default_input_device(&self) -> Option<usize>;
    fn default_output_device(&self) -> Option<usize>;

    fn open_stream(
        &self,
        config: &StreamConfig,
        callback: Box<dyn StreamCallback>,
    ) -> Result<Box<dyn BackendStream>, BackendCode>;
}
