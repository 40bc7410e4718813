use serde::Serialize;

/// Stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    Input,
    Output,
}

/// What a device can be opened for, derived from its channel maxima.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceCapability {
    /// No channels in either direction; never selectable for streaming
    None,
    Input,
    Output,
    Duplex,
}

impl DeviceCapability {
    pub fn classify(max_input_channels: u16, max_output_channels: u16) -> Self {
        match (max_input_channels > 0, max_output_channels > 0) {
            (true, true) => DeviceCapability::Duplex,
            (true, false) => DeviceCapability::Input,
            (false, true) => DeviceCapability::Output,
            (false, false) => DeviceCapability::None,
        }
    }

    pub fn has_input(self) -> bool {
        matches!(self, DeviceCapability::Input | DeviceCapability::Duplex)
    }

    pub fn has_output(self) -> bool {
        matches!(self, DeviceCapability::Output | DeviceCapability::Duplex)
    }

    pub fn supports(self, direction: Direction) -> bool {
        match direction {
            Direction::Input => self.has_input(),
            Direction::Output => self.has_output(),
        }
    }
}

impl From<Direction> for DeviceCapability {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Input => DeviceCapability::Input,
            Direction::Output => DeviceCapability::Output,
        }
    }
}

/// A resolved default device: its global index plus its position in the
/// matching capability list of the owning API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceRef {
    pub global_index: usize,
    pub local_index: usize,
}

/// One host API and its device groupings.
///
/// Groupings hold global device indices; a member's position in a grouping
/// is its local index for that capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostApi {
    pub name: String,
    pub index: usize,
    /// Count reported by the backend; equals `devices.len()` after population
    pub device_count: usize,
    pub devices: Vec<usize>,
    pub input_devices: Vec<usize>,
    pub output_devices: Vec<usize>,
    pub duplex_devices: Vec<usize>,
    pub default_input: Option<DeviceRef>,
    pub default_output: Option<DeviceRef>,
}

impl HostApi {
    /// The grouping a capability's local indices refer to.
    pub fn grouping(&self, capability: DeviceCapability) -> Option<&[usize]> {
        match capability {
            DeviceCapability::Input => Some(&self.input_devices),
            DeviceCapability::Output => Some(&self.output_devices),
            DeviceCapability::Duplex => Some(&self.duplex_devices),
            DeviceCapability::None => None,
        }
    }

    pub fn default_device(&self, direction: Direction) -> Option<DeviceRef> {
        match direction {
            Direction::Input => self.default_input,
            Direction::Output => self.default_output,
        }
    }
}

/// One device record. `host_api` is an index, never a reference, so a
/// record stays meaningful only against the snapshot that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub name: String,
    pub index: usize,
    pub host_api: usize,
    pub capability: DeviceCapability,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_low_input_latency: f64,
    pub default_low_output_latency: f64,
    pub default_high_input_latency: f64,
    pub default_high_output_latency: f64,
    pub default_sample_rate: f64,
    /// Position in the owning API's all-devices list
    pub api_local_index: usize,
    pub input_local_index: Option<usize>,
    pub output_local_index: Option<usize>,
    pub duplex_local_index: Option<usize>,
}

impl Device {
    pub fn local_index(&self, capability: DeviceCapability) -> Option<usize> {
        match capability {
            DeviceCapability::Input => self.input_local_index,
            DeviceCapability::Output => self.output_local_index,
            DeviceCapability::Duplex => self.duplex_local_index,
            DeviceCapability::None => None,
        }
    }

    pub fn max_channels(&self, direction: Direction) -> u16 {
        match direction {
            Direction::Input => self.max_input_channels,
            Direction::Output => self.max_output_channels,
        }
    }

    pub fn default_low_latency(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Input => self.default_low_input_latency,
            Direction::Output => self.default_low_output_latency,
        }
    }
}
