//! Session - "the audio subsystem is up"
//!
//! A [`Session`] keeps its backend initialized for as long as it lives and
//! owns the current [`Topology`] snapshot. Several sessions may share one
//! backend; it is initialized with the first and terminated with the last.
//! Process-wide counts of live sessions and open streams are exact at all
//! times.

pub(crate) mod registry;

#[cfg(test)]
mod tests;

use std::sync::{Arc, RwLock};

use crate::audio::{AudioCallback, StreamConfig, StreamEngine};
use crate::config::EngineConfig;
use crate::engine::backend::AudioBackend;
use crate::error::{AudioError, Result};
use crate::topology::{Direction, Topology};

pub struct Session {
    id: u32,
    backend: Arc<dyn AudioBackend>,
    config: EngineConfig,
    topology: RwLock<Arc<Topology>>,
}

impl Session {
    /// Open a session with default engine configuration.
    pub fn open(id: u32, backend: Arc<dyn AudioBackend>) -> Result<Self> {
        Self::with_config(id, backend, EngineConfig::default())
    }

    /// Open a session and populate its topology.
    ///
    /// # Errors
    /// * `BackendError` - backend initialization failed
    /// * any topology population error (`BackendUnavailable` on a machine
    ///   without audio hardware); the session is not created
    pub fn with_config(id: u32, backend: Arc<dyn AudioBackend>, config: EngineConfig) -> Result<Self> {
        registry::acquire_backend(&backend)?;
        let topology = match Topology::enumerate(backend.as_ref()) {
            Ok(topology) => topology,
            Err(err) => {
                registry::release_backend(&backend);
                return Err(err);
            }
        };
        tracing::info!(
            session = id,
            backend = backend.name(),
            apis = topology.apis().len(),
            devices = topology.devices().len(),
            "session opened"
        );
        Ok(Self {
            id,
            backend,
            config,
            topology: RwLock::new(Arc::new(topology)),
        })
    }

    /// Live sessions in this process.
    pub fn instance_count() -> usize {
        registry::session_count()
    }

    /// Open stream engines in this process.
    pub fn active_stream_count() -> usize {
        registry::stream_count()
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn version_text(&self) -> String {
        self.backend.version_text()
    }

    /// The current snapshot. Holders keep it alive across refreshes.
    pub fn topology(&self) -> Result<Arc<Topology>> {
        self.topology
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| AudioError::LockPoisoned {
                component: "topology".to_string(),
            })
    }

    /// Re-enumerate the backend and publish the new snapshot.
    ///
    /// On failure the previous snapshot stays current.
    pub fn refresh_topology(&self) -> Result<Arc<Topology>> {
        let fresh = Arc::new(Topology::enumerate(self.backend.as_ref())?);
        let mut current = self.topology.write().map_err(|_| AudioError::LockPoisoned {
            component: "topology".to_string(),
        })?;
        *current = Arc::clone(&fresh);
        tracing::debug!(session = self.id, "topology refreshed");
        Ok(fresh)
    }

    /// A closed engine configured from this session.
    pub fn stream_engine(&self) -> StreamEngine {
        StreamEngine::with_meter(
            Arc::clone(&self.backend),
            self.config.stream.clone(),
            self.config.meter.clone(),
        )
    }

    /// Check `config` against the topology, then open it on a new engine.
    ///
    /// # Errors
    /// * `NotFound` - a referenced device is not in the topology
    /// * `InvalidConfiguration` - a device lacks the direction or channels
    /// * anything `StreamEngine::open` reports
    pub fn open_stream<C: AudioCallback>(
        &self,
        config: &mut StreamConfig,
        callback: C,
    ) -> Result<StreamEngine> {
        let topology = self.topology()?;
        for direction in [Direction::Input, Direction::Output] {
            if let Some(params) = config.params(direction) {
                let device =
                    topology
                        .find_device(params.device)
                        .ok_or_else(|| AudioError::NotFound {
                            what: format!("device {}", params.device),
                        })?;
                config.check_device(device)?;
            }
        }

        let mut engine = self.stream_engine();
        engine.set_id(self.id);
        engine.open(config, callback)?;
        Ok(engine)
    }

    /// Open an output-only stream on the default output device.
    ///
    /// # Errors
    /// `NoDefaultDevice` if the backend reports none.
    pub fn open_default_stream<C: AudioCallback>(&self, callback: C) -> Result<StreamEngine> {
        let topology = self.topology()?;
        let device = topology.default_device(Direction::Output)?;
        let mut config = StreamConfig::for_device_direction(device, Direction::Output)?;
        self.open_stream(&mut config, callback)
    }

    /// Open, run until the callback finishes, stop and close.
    ///
    /// # Returns
    /// Frames processed.
    pub fn open_and_run<C: AudioCallback>(
        &self,
        config: &mut StreamConfig,
        callback: C,
    ) -> Result<u64> {
        let mut engine = self.open_stream(config, callback)?;
        let frames = engine.run_until_complete()?;
        engine.close();
        Ok(frames)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        registry::release_backend(&self.backend);
        tracing::info!(session = self.id, "session closed");
    }
}
