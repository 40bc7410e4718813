//! Host API and device topology
//!
//! A [`Topology`] is an immutable snapshot built by one full enumeration pass
//! over an [`AudioBackend`]. Devices live in one arena indexed by their global
//! backend index; host APIs refer to them by index only. Every device gets
//! a position in its API's all-devices list plus a position in each
//! capability list it belongs to. Those local indices are only meaningful
//! against the list they were computed for, so lookups take the capability
//! explicitly and reject indices that overrun it.

mod types;

#[cfg(test)]
mod tests;

pub use types::{Device, DeviceCapability, DeviceRef, Direction, HostApi};

use serde::Serialize;

use crate::engine::backend::AudioBackend;
use crate::error::{AudioError, Result};

/// Snapshot of host APIs and devices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Topology {
    apis: Vec<HostApi>,
    devices: Vec<Device>,
    default_host_api: Option<usize>,
    default_input: Option<usize>,
    default_output: Option<usize>,
}

impl Topology {
    /// Enumerate the backend into a fresh snapshot.
    ///
    /// # Errors
    /// * `BackendUnavailable` - the backend reports no host APIs or no devices
    /// * `BackendError` - a count or refresh query failed
    /// * `TopologyPopulationFailed` - descriptors are inconsistent, or an API
    ///   reports a default device that is not in its matching capability list
    pub fn enumerate(backend: &dyn AudioBackend) -> Result<Self> {
        backend
            .refresh()
            .map_err(|code| AudioError::backend(code, "refresh"))?;

        let api_count = backend
            .host_api_count()
            .map_err(|code| AudioError::backend(code, "host_api_count"))?;
        if api_count == 0 {
            return Err(AudioError::BackendUnavailable {
                reason: "backend reports no host APIs".to_string(),
            });
        }
        let device_count = backend
            .device_count()
            .map_err(|code| AudioError::backend(code, "device_count"))?;
        if device_count == 0 {
            return Err(AudioError::BackendUnavailable {
                reason: "backend reports no devices".to_string(),
            });
        }

        let mut devices = Vec::with_capacity(device_count);
        for index in 0..device_count {
            let info = backend.device_info(index).ok_or_else(|| {
                population_failed(format!("device {} has no descriptor", index))
            })?;
            if info.host_api >= api_count {
                return Err(population_failed(format!(
                    "device {} claims host API {} of {}",
                    index, info.host_api, api_count
                )));
            }
            devices.push(Device {
                capability: DeviceCapability::classify(
                    info.max_input_channels,
                    info.max_output_channels,
                ),
                name: info.name,
                index,
                host_api: info.host_api,
                max_input_channels: info.max_input_channels,
                max_output_channels: info.max_output_channels,
                default_low_input_latency: info.default_low_input_latency,
                default_low_output_latency: info.default_low_output_latency,
                default_high_input_latency: info.default_high_input_latency,
                default_high_output_latency: info.default_high_output_latency,
                default_sample_rate: info.default_sample_rate,
                api_local_index: 0,
                input_local_index: None,
                output_local_index: None,
                duplex_local_index: None,
            });
        }

        let mut listed = vec![false; device_count];
        let mut apis = Vec::with_capacity(api_count);
        for api_index in 0..api_count {
            let info = backend.host_api_info(api_index).ok_or_else(|| {
                population_failed(format!("host API {} has no descriptor", api_index))
            })?;

            let mut api = HostApi {
                name: info.name,
                index: api_index,
                device_count: info.device_count,
                devices: Vec::with_capacity(info.device_count),
                input_devices: Vec::new(),
                output_devices: Vec::new(),
                duplex_devices: Vec::new(),
                default_input: None,
                default_output: None,
            };

            for local in 0..info.device_count {
                let global = backend
                    .host_api_device_index_to_device_index(api_index, local)
                    .ok_or_else(|| {
                        population_failed(format!(
                            "host API {} cannot map local device {}",
                            api.name, local
                        ))
                    })?;
                let device = devices.get_mut(global).ok_or_else(|| {
                    population_failed(format!(
                        "host API {} maps local device {} to unknown device {}",
                        api.name, local, global
                    ))
                })?;
                if device.host_api != api_index || listed[global] {
                    return Err(population_failed(format!(
                        "device {} listed by host API {} but owned by host API {}",
                        global, api.name, device.host_api
                    )));
                }
                listed[global] = true;
                assign_local_indices(&mut api, device);
            }

            api.default_input = resolve_default(
                &api,
                &api.input_devices,
                info.default_input_device,
                Direction::Input,
            )?;
            api.default_output = resolve_default(
                &api,
                &api.output_devices,
                info.default_output_device,
                Direction::Output,
            )?;
            apis.push(api);
        }

        if let Some(orphan) = listed.iter().position(|seen| !seen) {
            return Err(population_failed(format!(
                "device {} is not listed by its host API",
                orphan
            )));
        }

        let topology = Topology {
            apis,
            devices,
            default_host_api: backend.default_host_api().filter(|&i| i < api_count),
            default_input: backend.default_input_device(),
            default_output: backend.default_output_device(),
        };
        tracing::debug!(
            apis = topology.apis.len(),
            devices = topology.devices.len(),
            "topology enumerated"
        );
        Ok(topology)
    }

    pub fn apis(&self) -> &[HostApi] {
        &self.apis
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn find_api(&self, index: usize) -> Option<&HostApi> {
        self.apis.get(index)
    }

    /// Exact, case-sensitive; first match in enumeration order.
    pub fn find_api_by_name(&self, name: &str) -> Option<&HostApi> {
        self.apis.iter().find(|api| api.name == name)
    }

    pub fn find_device(&self, global_index: usize) -> Option<&Device> {
        self.devices.get(global_index)
    }

    /// Look up a device by its position in one of an API's capability lists.
    ///
    /// # Errors
    /// * `NotFound` - no API with that index
    /// * `InvalidConfiguration` - `capability` is `None`, which has no list
    /// * `IndexOutOfRange` - `local_index` is beyond that capability's list
    pub fn find_device_in_api(
        &self,
        api_index: usize,
        local_index: usize,
        capability: DeviceCapability,
    ) -> Result<&Device> {
        let api = self.find_api(api_index).ok_or_else(|| AudioError::NotFound {
            what: format!("host API {}", api_index),
        })?;
        let grouping = api.grouping(capability).ok_or_else(|| {
            AudioError::invalid("device lookups need an input, output or duplex capability")
        })?;
        let global = grouping
            .get(local_index)
            .copied()
            .ok_or(AudioError::IndexOutOfRange {
                index: local_index,
                len: grouping.len(),
                capability,
            })?;
        self.device_at(global)
    }

    /// The backend's global default device for `direction`.
    ///
    /// # Errors
    /// `NoDefaultDevice` if the backend reports none, or reports an index that
    /// is unknown or lacks the direction.
    pub fn default_device(&self, direction: Direction) -> Result<&Device> {
        let reported = match direction {
            Direction::Input => self.default_input,
            Direction::Output => self.default_output,
        };
        reported
            .and_then(|index| self.devices.get(index))
            .filter(|device| device.capability.supports(direction))
            .ok_or(AudioError::NoDefaultDevice { direction })
    }

    pub fn default_host_api(&self) -> Option<&HostApi> {
        self.default_host_api.and_then(|index| self.apis.get(index))
    }

    /// First duplex device of the API, if it has any.
    pub fn default_duplex_device(&self, api_index: usize) -> Option<&Device> {
        self.find_api(api_index)
            .and_then(|api| api.duplex_devices.first())
            .and_then(|&global| self.devices.get(global))
    }

    pub fn find_device_by_name(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.name == name)
    }

    pub fn find_device_by_name_in_api(&self, api_index: usize, name: &str) -> Option<&Device> {
        self.all_devices(api_index).find(|device| device.name == name)
    }

    pub fn all_devices(&self, api_index: usize) -> impl Iterator<Item = &Device> + '_ {
        self.grouping_iter(api_index, |api| &api.devices)
    }

    pub fn input_devices(&self, api_index: usize) -> impl Iterator<Item = &Device> + '_ {
        self.grouping_iter(api_index, |api| &api.input_devices)
    }

    pub fn output_devices(&self, api_index: usize) -> impl Iterator<Item = &Device> + '_ {
        self.grouping_iter(api_index, |api| &api.output_devices)
    }

    pub fn duplex_devices(&self, api_index: usize) -> impl Iterator<Item = &Device> + '_ {
        self.grouping_iter(api_index, |api| &api.duplex_devices)
    }

    fn grouping_iter<'a>(
        &'a self,
        api_index: usize,
        select: fn(&HostApi) -> &Vec<usize>,
    ) -> impl Iterator<Item = &'a Device> + 'a {
        self.apis
            .get(api_index)
            .map(select)
            .into_iter()
            .flatten()
            .filter_map(move |&global| self.devices.get(global))
    }

    fn device_at(&self, global: usize) -> Result<&Device> {
        self.devices.get(global).ok_or_else(|| AudioError::NotFound {
            what: format!("device {}", global),
        })
    }
}

fn population_failed(reason: String) -> AudioError {
    AudioError::TopologyPopulationFailed { reason }
}

fn assign_local_indices(api: &mut HostApi, device: &mut Device) {
    device.api_local_index = api.devices.len();
    api.devices.push(device.index);
    if device.capability.has_input() {
        device.input_local_index = Some(api.input_devices.len());
        api.input_devices.push(device.index);
    }
    if device.capability.has_output() {
        device.output_local_index = Some(api.output_devices.len());
        api.output_devices.push(device.index);
    }
    if device.capability == DeviceCapability::Duplex {
        device.duplex_local_index = Some(api.duplex_devices.len());
        api.duplex_devices.push(device.index);
    }
}

fn resolve_default(
    api: &HostApi,
    grouping: &[usize],
    reported: Option<usize>,
    direction: Direction,
) -> Result<Option<DeviceRef>> {
    let Some(global) = reported else {
        return Ok(None);
    };
    grouping
        .iter()
        .position(|&member| member == global)
        .map(|local_index| {
            Some(DeviceRef {
                global_index: global,
                local_index,
            })
        })
        .ok_or_else(|| {
            population_failed(format!(
                "host API {} reports default {:?} device {} outside its {:?} list",
                api.name, direction, global, direction
            ))
        })
}
