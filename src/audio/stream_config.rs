// Stream configuration: requested parameters in, negotiated parameters out

use serde::{Deserialize, Serialize};

use crate::engine::backend::NegotiatedStream;
use crate::error::{AudioError, Result};
use crate::topology::{Device, DeviceCapability, Direction};

/// Sample formats a backend may name. Only `Float32` flows through the
/// dispatch path; the rest are rejected at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    Float32,
    Int32,
    Int24,
    Int16,
    Int8,
    UInt8,
}

/// One direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamParameters {
    /// Global device index
    pub device: usize,
    pub channel_count: u16,
    /// Requested latency in seconds
    pub suggested_latency: f64,
}

/// Parameters for opening a stream.
///
/// `StreamEngine::open` takes this by `&mut` and overwrites the sample rate,
/// channel counts and latencies with what the backend actually granted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub input: Option<StreamParameters>,
    pub output: Option<StreamParameters>,
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    /// Zero lets the engine pick its configured default
    pub frames_per_buffer: u32,
    /// Actual input latency in seconds, filled in by open
    pub input_latency: f64,
    /// Actual output latency in seconds, filled in by open
    pub output_latency: f64,
}

impl StreamConfig {
    pub fn output_only(device: usize, channels: u16, sample_rate: u32, frames: u32) -> Self {
        Self {
            input: None,
            output: Some(StreamParameters {
                device,
                channel_count: channels,
                suggested_latency: 0.0,
            }),
            ..Self::empty(sample_rate, frames)
        }
    }

    pub fn input_only(device: usize, channels: u16, sample_rate: u32, frames: u32) -> Self {
        Self {
            input: Some(StreamParameters {
                device,
                channel_count: channels,
                suggested_latency: 0.0,
            }),
            output: None,
            ..Self::empty(sample_rate, frames)
        }
    }

    /// Both directions on one device with the same channel count.
    pub fn duplex(device: usize, channels: u16, sample_rate: u32, frames: u32) -> Self {
        let params = StreamParameters {
            device,
            channel_count: channels,
            suggested_latency: 0.0,
        };
        Self {
            input: Some(params),
            output: Some(params),
            ..Self::empty(sample_rate, frames)
        }
    }

    /// Single-direction defaults for `device`, even when it is duplex.
    ///
    /// # Errors
    /// `InvalidConfiguration` if the device lacks `direction`.
    pub fn for_device_direction(device: &Device, direction: Direction) -> Result<Self> {
        let channels = device.max_channels(direction).min(2);
        if channels == 0 {
            return Err(AudioError::invalid(format!(
                "device {} ({}) has no {:?} channels",
                device.index, device.name, direction
            )));
        }
        let params = StreamParameters {
            device: device.index,
            channel_count: channels,
            suggested_latency: device.default_low_latency(direction),
        };
        let sample_rate = device.default_sample_rate.round() as u32;
        let mut config = Self::empty(sample_rate, 0);
        match direction {
            Direction::Input => config.input = Some(params),
            Direction::Output => config.output = Some(params),
        }
        Ok(config)
    }

    /// Sensible defaults for `device`.
    ///
    /// Channels are the device maximum capped at two, latency is the default
    /// low latency, the rate is the device default. Duplex devices get both
    /// directions with the smaller channel count and the larger latency.
    ///
    /// # Errors
    /// `InvalidConfiguration` if the device has no channels at all.
    pub fn for_device(device: &Device) -> Result<Self> {
        let sample_rate = device.default_sample_rate.round() as u32;
        let params = |channels: u16, latency: f64| StreamParameters {
            device: device.index,
            channel_count: channels,
            suggested_latency: latency,
        };
        let mut config = Self::empty(sample_rate, 0);
        match device.capability {
            DeviceCapability::None => {
                return Err(AudioError::invalid(format!(
                    "device {} ({}) has no channels",
                    device.index, device.name
                )))
            }
            DeviceCapability::Input => {
                return Self::for_device_direction(device, Direction::Input)
            }
            DeviceCapability::Output => {
                return Self::for_device_direction(device, Direction::Output)
            }
            DeviceCapability::Duplex => {
                let channels = device
                    .max_input_channels
                    .min(device.max_output_channels)
                    .min(2);
                let latency = device
                    .default_low_input_latency
                    .max(device.default_low_output_latency);
                config.input = Some(params(channels, latency));
                config.output = Some(params(channels, latency));
            }
        }
        Ok(config)
    }

    pub fn input_channels(&self) -> u16 {
        self.input.map_or(0, |p| p.channel_count)
    }

    pub fn output_channels(&self) -> u16 {
        self.output.map_or(0, |p| p.channel_count)
    }

    pub fn params(&self, direction: Direction) -> Option<&StreamParameters> {
        match direction {
            Direction::Input => self.input.as_ref(),
            Direction::Output => self.output.as_ref(),
        }
    }

    /// Checks that need no backend: at least one direction, nonzero
    /// channels and rate, `Float32` samples.
    pub fn validate(&self) -> Result<()> {
        if self.input.is_none() && self.output.is_none() {
            return Err(AudioError::invalid(
                "a stream needs input parameters, output parameters, or both",
            ));
        }
        if self.input_channels() == 0 && self.input.is_some() {
            return Err(AudioError::invalid("input channel count must be > 0"));
        }
        if self.output_channels() == 0 && self.output.is_some() {
            return Err(AudioError::invalid("output channel count must be > 0"));
        }
        if self.sample_rate == 0 {
            return Err(AudioError::invalid("sample rate must be > 0"));
        }
        if self.sample_format != SampleFormat::Float32 {
            return Err(AudioError::invalid(format!(
                "sample format {:?} is not supported; streams carry Float32",
                self.sample_format
            )));
        }
        Ok(())
    }

    /// Reject parameters that reference `device` for a direction it lacks or
    /// ask it for more channels than it has.
    pub fn check_device(&self, device: &Device) -> Result<()> {
        for direction in [Direction::Input, Direction::Output] {
            let Some(params) = self.params(direction) else {
                continue;
            };
            if params.device != device.index {
                continue;
            }
            if !device.capability.supports(direction) {
                return Err(AudioError::invalid(format!(
                    "device {} ({}) has no {:?} channels",
                    device.index, device.name, direction
                )));
            }
            let max = device.max_channels(direction);
            if params.channel_count > max {
                return Err(AudioError::invalid(format!(
                    "device {} ({}) supports at most {} {:?} channels, {} requested",
                    device.index, device.name, max, direction, params.channel_count
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn apply_negotiated(&mut self, negotiated: &NegotiatedStream) {
        self.sample_rate = negotiated.sample_rate;
        if let Some(input) = self.input.as_mut() {
            input.channel_count = negotiated.input_channels;
        }
        if let Some(output) = self.output.as_mut() {
            output.channel_count = negotiated.output_channels;
        }
        self.input_latency = negotiated.input_latency;
        self.output_latency = negotiated.output_latency;
    }

    fn empty(sample_rate: u32, frames: u32) -> Self {
        Self {
            input: None,
            output: None,
            sample_format: SampleFormat::Float32,
            sample_rate,
            frames_per_buffer: frames,
            input_latency: 0.0,
            output_latency: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(index: usize, inputs: u16, outputs: u16) -> Device {
        Device {
            name: format!("dev{}", index),
            index,
            host_api: 0,
            capability: DeviceCapability::classify(inputs, outputs),
            max_input_channels: inputs,
            max_output_channels: outputs,
            default_low_input_latency: 0.005,
            default_low_output_latency: 0.01,
            default_high_input_latency: 0.05,
            default_high_output_latency: 0.1,
            default_sample_rate: 44_100.0,
            api_local_index: 0,
            input_local_index: None,
            output_local_index: None,
            duplex_local_index: None,
        }
    }

    #[test]
    fn test_for_device_output() {
        let config = StreamConfig::for_device(&device(3, 0, 8)).unwrap();
        assert!(config.input.is_none());
        let output = config.output.unwrap();
        assert_eq!(output.device, 3);
        assert_eq!(output.channel_count, 2);
        assert_eq!(output.suggested_latency, 0.01);
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.frames_per_buffer, 0);
    }

    #[test]
    fn test_for_device_duplex_uses_smaller_channels_larger_latency() {
        let config = StreamConfig::for_device(&device(1, 1, 2)).unwrap();
        assert_eq!(config.input_channels(), 1);
        assert_eq!(config.output_channels(), 1);
        assert_eq!(config.input.unwrap().suggested_latency, 0.01);
    }

    #[test]
    fn test_for_device_direction_picks_one_side_of_duplex() {
        let config = StreamConfig::for_device_direction(&device(4, 32, 32), Direction::Output).unwrap();
        assert!(config.input.is_none());
        let output = config.output.unwrap();
        assert_eq!(output.device, 4);
        assert_eq!(output.channel_count, 2);
        assert_eq!(output.suggested_latency, 0.01);
        assert_eq!(config.sample_rate, 44_100);

        let input = StreamConfig::for_device_direction(&device(4, 32, 32), Direction::Input).unwrap();
        assert!(input.output.is_none());
        assert_eq!(input.input.unwrap().suggested_latency, 0.005);
    }

    #[test]
    fn test_for_device_direction_rejects_missing_side() {
        assert!(matches!(
            StreamConfig::for_device_direction(&device(2, 1, 0), Direction::Output),
            Err(AudioError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_for_device_rejects_degenerate() {
        assert!(matches!(
            StreamConfig::for_device(&device(0, 0, 0)),
            Err(AudioError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_validate() {
        assert!(StreamConfig::output_only(0, 2, 48_000, 512).validate().is_ok());

        let mut neither = StreamConfig::output_only(0, 2, 48_000, 512);
        neither.output = None;
        assert!(matches!(
            neither.validate(),
            Err(AudioError::InvalidConfiguration { .. })
        ));

        let mut int16 = StreamConfig::output_only(0, 2, 48_000, 512);
        int16.sample_format = SampleFormat::Int16;
        assert!(int16.validate().is_err());

        assert!(StreamConfig::output_only(0, 0, 48_000, 512).validate().is_err());
        assert!(StreamConfig::output_only(0, 2, 0, 512).validate().is_err());
    }

    #[test]
    fn test_check_device() {
        let mic = device(2, 1, 0);
        assert!(StreamConfig::input_only(2, 1, 48_000, 0).check_device(&mic).is_ok());
        assert!(StreamConfig::input_only(2, 2, 48_000, 0).check_device(&mic).is_err());
        assert!(StreamConfig::output_only(2, 1, 48_000, 0).check_device(&mic).is_err());
        // parameters for other devices are not this device's business
        assert!(StreamConfig::output_only(7, 2, 48_000, 0).check_device(&mic).is_ok());
    }

    #[test]
    fn test_apply_negotiated() {
        let mut config = StreamConfig::duplex(0, 2, 48_000, 256);
        config.apply_negotiated(&NegotiatedStream {
            sample_rate: 44_100,
            input_channels: 1,
            output_channels: 2,
            input_latency: 0.02,
            output_latency: 0.03,
        });
        assert_eq!(config.sample_rate, 44_100);
        assert_eq!(config.input_channels(), 1);
        assert_eq!(config.output_channels(), 2);
        assert_eq!(config.input_latency, 0.02);
        assert_eq!(config.output_latency, 0.03);
        assert_eq!(config.frames_per_buffer, 256);
    }
}
