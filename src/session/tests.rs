use super::*;
use crate::audio::{CallbackInfo, CallbackResult};
use crate::engine::backend::{BackendCode, SimulatedBackend, SimulatedTopology};
use serial_test::serial;
use std::time::Duration;

fn simulated() -> Arc<SimulatedBackend> {
    Arc::new(SimulatedBackend::desktop().with_block_period(Duration::from_millis(1)))
}

fn silence(info: CallbackInfo<'_>) -> CallbackResult {
    info.output.iter_mut().for_each(|s| *s = 0.0);
    CallbackResult::Continue
}

#[test]
#[serial]
fn test_open_populates_topology() {
    let session = Session::open(7, simulated()).unwrap();
    let topology = session.topology().unwrap();

    assert_eq!(session.id(), 7);
    assert_eq!(topology.apis().len(), 3);
    assert_eq!(topology.devices().len(), 6);
    assert!(session.version_text().contains("simulated"));
}

#[test]
#[serial]
fn test_backend_initialized_once_and_terminated_at_zero() {
    let backend = simulated();
    let stats = backend.stats();
    let sessions_before = Session::instance_count();

    let first = Session::open(1, backend.clone()).unwrap();
    let second = Session::open(2, backend.clone()).unwrap();
    assert_eq!(Session::instance_count(), sessions_before + 2);
    assert_eq!(stats.initialize_calls(), 1);

    drop(first);
    assert_eq!(Session::instance_count(), sessions_before + 1);
    assert_eq!(stats.terminate_calls(), 0);
    assert!(backend.is_initialized());
    // the surviving session still works
    assert!(second.refresh_topology().is_ok());

    drop(second);
    assert_eq!(Session::instance_count(), sessions_before);
    assert_eq!(stats.terminate_calls(), 1);
    assert!(!backend.is_initialized());
}

#[test]
#[serial]
fn test_separate_backends_are_counted_separately() {
    let a = simulated();
    let b = simulated();
    let session_a = Session::open(1, a.clone()).unwrap();
    let session_b = Session::open(2, b.clone()).unwrap();

    drop(session_a);
    assert_eq!(a.stats().terminate_calls(), 1);
    assert_eq!(b.stats().terminate_calls(), 0);
    drop(session_b);
    assert_eq!(b.stats().terminate_calls(), 1);
}

#[test]
#[serial]
fn test_init_failure_is_backend_error() {
    let backend = Arc::new(SimulatedBackend::desktop().with_init_failure(BackendCode::HOST_ERROR));
    let sessions_before = Session::instance_count();

    match Session::open(1, backend.clone()) {
        Err(AudioError::BackendError { code, .. }) => assert_eq!(code, BackendCode::HOST_ERROR),
        Err(other) => panic!("Expected BackendError, got {:?}", other),
        Ok(_) => panic!("Expected BackendError, got a session"),
    }
    assert_eq!(Session::instance_count(), sessions_before);
}

#[test]
#[serial]
fn test_headless_machine_is_backend_unavailable() {
    let backend = Arc::new(SimulatedBackend::new(SimulatedTopology::headless()));
    let sessions_before = Session::instance_count();

    assert!(matches!(
        Session::open(1, backend.clone()),
        Err(AudioError::BackendUnavailable { .. })
    ));
    assert_eq!(Session::instance_count(), sessions_before);
    assert_eq!(backend.stats().terminate_calls(), 1);
}

#[test]
#[serial]
fn test_refresh_publishes_new_snapshot() {
    let backend = simulated();
    let session = Session::open(1, backend.clone()).unwrap();
    let old = session.topology().unwrap();

    let mut hardware = SimulatedTopology::desktop();
    hardware.apis.truncate(1);
    backend.set_topology(hardware);
    let fresh = session.refresh_topology().unwrap();

    assert_eq!(fresh.apis().len(), 1);
    assert_eq!(session.topology().unwrap().apis().len(), 1);
    // holders of the old snapshot are unaffected
    assert_eq!(old.apis().len(), 3);
    assert!(old.find_device(5).is_some());
}

#[test]
#[serial]
fn test_failed_refresh_keeps_previous_snapshot() {
    let backend = simulated();
    let session = Session::open(1, backend.clone()).unwrap();

    backend.set_topology(SimulatedTopology::headless());
    assert!(session.refresh_topology().is_err());
    assert_eq!(session.topology().unwrap().apis().len(), 3);
}

#[test]
#[serial]
fn test_active_stream_count_tracks_engines() {
    let session = Session::open(1, simulated()).unwrap();
    let streams_before = Session::active_stream_count();

    let mut config = StreamConfig::output_only(0, 2, 48_000, 256);
    let mut engine = session.open_stream(&mut config, silence).unwrap();
    let default = session.open_default_stream(silence).unwrap();
    assert_eq!(Session::active_stream_count(), streams_before + 2);
    let default_config = default.config().unwrap();
    // "default" is duplex; the default stream only takes its output side
    assert!(default_config.input.is_none());
    assert_eq!(default_config.output.unwrap().device, 4);
    assert_eq!(default_config.output_channels(), 2);

    engine.close();
    assert_eq!(Session::active_stream_count(), streams_before + 1);
    drop(default);
    assert_eq!(Session::active_stream_count(), streams_before);
}

#[test]
#[serial]
fn test_open_stream_checks_topology() {
    let session = Session::open(1, simulated()).unwrap();

    let mut unknown = StreamConfig::output_only(42, 2, 48_000, 256);
    assert!(matches!(
        session.open_stream(&mut unknown, silence),
        Err(AudioError::NotFound { .. })
    ));

    // device 2 is input-only
    let mut wrong_direction = StreamConfig::output_only(2, 1, 48_000, 256);
    assert!(matches!(
        session.open_stream(&mut wrong_direction, silence),
        Err(AudioError::InvalidConfiguration { .. })
    ));

    let mut too_wide = StreamConfig::output_only(0, 6, 48_000, 256);
    assert!(matches!(
        session.open_stream(&mut too_wide, silence),
        Err(AudioError::InvalidConfiguration { .. })
    ));
}

#[test]
#[serial]
fn test_open_and_run_until_callback_completes() {
    let session = Session::open(1, simulated()).unwrap();
    let streams_before = Session::active_stream_count();
    let mut config = StreamConfig::input_only(2, 1, 44_100, 128);

    let mut seen = 0usize;
    let frames = session
        .open_and_run(&mut config, move |info: CallbackInfo<'_>| {
            assert!(info.output.is_empty());
            assert_eq!(info.input.len(), info.frame_count);
            seen += info.frame_count;
            if seen >= 1280 {
                CallbackResult::Complete
            } else {
                CallbackResult::Continue
            }
        })
        .unwrap();

    assert_eq!(frames, 1280);
    assert_eq!(Session::active_stream_count(), streams_before);
}
