use super::*;
use crate::engine::backend::{SimulatedApi, SimulatedBackend, SimulatedDevice, SimulatedTopology};

fn enumerate(topology: SimulatedTopology) -> Result<Topology> {
    let backend = SimulatedBackend::new(topology);
    backend.initialize().unwrap();
    Topology::enumerate(&backend)
}

fn desktop() -> Topology {
    enumerate(SimulatedTopology::desktop()).unwrap()
}

#[test]
fn test_classification() {
    assert_eq!(DeviceCapability::classify(2, 2), DeviceCapability::Duplex);
    assert_eq!(DeviceCapability::classify(1, 0), DeviceCapability::Input);
    assert_eq!(DeviceCapability::classify(0, 8), DeviceCapability::Output);
    assert_eq!(DeviceCapability::classify(0, 0), DeviceCapability::None);
}

#[test]
fn test_groupings_and_local_indices() {
    let topology = desktop();
    let alsa = topology.find_api(0).unwrap();

    assert_eq!(alsa.name, "ALSA");
    assert_eq!(alsa.devices, vec![0, 1, 2, 3, 4]);
    assert_eq!(alsa.input_devices, vec![0, 2, 3, 4]);
    assert_eq!(alsa.output_devices, vec![0, 1, 3, 4]);
    assert_eq!(alsa.duplex_devices, vec![0, 3, 4]);

    let default = topology.find_device(4).unwrap();
    assert_eq!(default.capability, DeviceCapability::Duplex);
    assert_eq!(default.api_local_index, 4);
    assert_eq!(default.input_local_index, Some(3));
    assert_eq!(default.output_local_index, Some(3));
    assert_eq!(default.duplex_local_index, Some(2));

    let hdmi = topology.find_device(1).unwrap();
    assert_eq!(hdmi.capability, DeviceCapability::Output);
    assert_eq!(hdmi.input_local_index, None);
    assert_eq!(hdmi.output_local_index, Some(1));
    assert_eq!(hdmi.duplex_local_index, None);

    let jack_system = topology.find_device(5).unwrap();
    assert_eq!(jack_system.host_api, 1);
    assert_eq!(jack_system.api_local_index, 0);
    assert_eq!(jack_system.duplex_local_index, Some(0));
}

#[test]
fn test_local_indices_stay_within_their_grouping() {
    let topology = desktop();
    for device in topology.devices() {
        let api = topology.find_api(device.host_api).unwrap();
        assert_eq!(api.devices[device.api_local_index], device.index);

        for capability in [
            DeviceCapability::Input,
            DeviceCapability::Output,
            DeviceCapability::Duplex,
        ] {
            let grouping = api.grouping(capability).unwrap();
            match device.local_index(capability) {
                Some(local) => {
                    assert!(local < grouping.len());
                    assert_eq!(grouping[local], device.index);
                }
                None => assert!(!grouping.contains(&device.index)),
            }
        }
        assert_eq!(
            device.duplex_local_index.is_some(),
            device.capability == DeviceCapability::Duplex
        );
    }
}

#[test]
fn test_api_defaults_resolve_to_reported_devices() {
    let topology = desktop();

    let alsa = topology.find_api(0).unwrap();
    assert_eq!(
        alsa.default_input,
        Some(DeviceRef {
            global_index: 4,
            local_index: 3
        })
    );
    assert_eq!(
        alsa.default_output,
        Some(DeviceRef {
            global_index: 4,
            local_index: 3
        })
    );

    let jack = topology.find_api(1).unwrap();
    assert_eq!(jack.default_output.unwrap().global_index, 5);
    assert_eq!(jack.default_output.unwrap().local_index, 0);

    let oss = topology.find_api(2).unwrap();
    assert_eq!(oss.device_count, 0);
    assert!(oss.default_input.is_none());
    assert!(oss.default_output.is_none());
}

#[test]
fn test_find_api_by_name_is_exact() {
    let topology = desktop();
    assert_eq!(topology.find_api_by_name("ALSA").unwrap().index, 0);
    assert_eq!(
        topology
            .find_api_by_name("JACK Audio Connection Kit")
            .unwrap()
            .index,
        1
    );
    assert!(topology.find_api_by_name("alsa").is_none());
    assert!(topology.find_api_by_name("JACK").is_none());
    assert!(topology.find_api(3).is_none());
}

#[test]
fn test_find_device_in_api() {
    let topology = desktop();

    let mic = topology
        .find_device_in_api(0, 1, DeviceCapability::Input)
        .unwrap();
    assert_eq!(mic.name, "USB PnP Sound Device: Audio (hw:1,0)");

    let hdmi = topology
        .find_device_in_api(0, 1, DeviceCapability::Output)
        .unwrap();
    assert_eq!(hdmi.index, 1);

    let pulse = topology
        .find_device_in_api(0, 1, DeviceCapability::Duplex)
        .unwrap();
    assert_eq!(pulse.name, "pulse");
}

#[test]
fn test_local_index_overrun_is_index_out_of_range() {
    let topology = desktop();
    let err = topology
        .find_device_in_api(0, 999, DeviceCapability::Output)
        .unwrap_err();
    assert_eq!(
        err,
        AudioError::IndexOutOfRange {
            index: 999,
            len: 4,
            capability: DeviceCapability::Output
        }
    );

    // a global index is not a duplex-local index
    assert!(matches!(
        topology.find_device_in_api(1, 5, DeviceCapability::Duplex),
        Err(AudioError::IndexOutOfRange { len: 1, .. })
    ));
}

#[test]
fn test_find_device_in_api_rejects_unknown_api_and_none_capability() {
    let topology = desktop();
    assert!(matches!(
        topology.find_device_in_api(7, 0, DeviceCapability::Output),
        Err(AudioError::NotFound { .. })
    ));
    assert!(matches!(
        topology.find_device_in_api(0, 0, DeviceCapability::None),
        Err(AudioError::InvalidConfiguration { .. })
    ));
}

#[test]
fn test_global_defaults() {
    let topology = desktop();
    assert_eq!(topology.default_device(Direction::Output).unwrap().index, 4);
    assert_eq!(topology.default_device(Direction::Input).unwrap().index, 4);
    assert_eq!(topology.default_host_api().unwrap().name, "ALSA");
    assert_eq!(topology.default_duplex_device(1).unwrap().name, "system");
    assert!(topology.default_duplex_device(2).is_none());
}

#[test]
fn test_missing_global_default_is_no_default_device() {
    let topology = enumerate(SimulatedTopology {
        apis: vec![SimulatedApi::new(
            "Null",
            vec![SimulatedDevice::output("sink", 2)],
        )],
        default_api: 0,
    })
    .unwrap();

    assert_eq!(
        topology.default_device(Direction::Output).unwrap_err(),
        AudioError::NoDefaultDevice {
            direction: Direction::Output
        }
    );
}

#[test]
fn test_default_outside_its_grouping_fails_population() {
    // local 1 is the HDMI sink, which has no input side
    let mut hardware = SimulatedTopology::desktop();
    hardware.apis[0].default_input = Some(1);

    assert!(matches!(
        enumerate(hardware),
        Err(AudioError::TopologyPopulationFailed { .. })
    ));
}

#[test]
fn test_no_hardware_is_backend_unavailable() {
    assert!(matches!(
        enumerate(SimulatedTopology::headless()),
        Err(AudioError::BackendUnavailable { .. })
    ));

    let empty_apis = SimulatedTopology {
        apis: vec![SimulatedApi::new("OSS", Vec::new())],
        default_api: 0,
    };
    assert!(matches!(
        enumerate(empty_apis),
        Err(AudioError::BackendUnavailable { .. })
    ));
}

#[test]
fn test_degenerate_device_is_listed_but_not_selectable() {
    let topology = enumerate(SimulatedTopology {
        apis: vec![SimulatedApi::new(
            "Dummy",
            vec![
                SimulatedDevice::new("dead", 0, 0),
                SimulatedDevice::output("sink", 2),
            ],
        )
        .with_defaults(None, Some(1))],
        default_api: 0,
    })
    .unwrap();

    let dead = topology.find_device(0).unwrap();
    assert_eq!(dead.capability, DeviceCapability::None);
    assert_eq!(dead.api_local_index, 0);
    assert_eq!(dead.output_local_index, None);

    let sink = topology
        .find_device_in_api(0, 0, DeviceCapability::Output)
        .unwrap();
    assert_eq!(sink.name, "sink");
    assert_eq!(topology.all_devices(0).count(), 2);
}

#[test]
fn test_grouping_iterators_and_name_lookup() {
    let topology = desktop();
    let inputs: Vec<_> = topology.input_devices(0).map(|d| d.index).collect();
    assert_eq!(inputs, vec![0, 2, 3, 4]);
    assert_eq!(topology.output_devices(1).count(), 1);
    assert_eq!(topology.duplex_devices(2).count(), 0);
    assert_eq!(topology.all_devices(9).count(), 0);

    assert_eq!(topology.find_device_by_name("system").unwrap().index, 5);
    assert!(topology.find_device_by_name_in_api(0, "system").is_none());
    assert_eq!(
        topology
            .find_device_by_name_in_api(1, "system")
            .unwrap()
            .host_api,
        1
    );
}
