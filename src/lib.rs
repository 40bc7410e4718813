// PAudio Core - stream lifecycle engine and device topology
// Real-time audio streams over pluggable native backends

// Module declarations
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod session;
pub mod topology;

// Re-exports for convenience
pub use audio::{
    AudioCallback, CallbackInfo, CallbackResult, SampleFormat, StreamConfig, StreamEngine,
    StreamParameters, StreamState,
};
pub use config::{EngineConfig, MeterSettings, StreamSettings};
pub use error::{AudioError, ErrorCode, Result};
pub use session::Session;
pub use topology::{Device, DeviceCapability, DeviceRef, Direction, HostApi, Topology};
