// Audio module - stream lifecycle, real-time dispatch and signal primitives

mod callback;
pub mod envelope;
pub mod fader;
pub mod oscillator;
mod stream;
mod stream_config;
pub mod timestamp;

// Re-export commonly used types for convenience
pub use callback::{AudioCallback, CallbackInfo, CallbackResult};
pub use stream::{StreamEngine, StreamState};
pub use stream_config::{SampleFormat, StreamConfig, StreamParameters};
