// Error types for the audio stream core
//
// This module defines the error taxonomy shared by the topology model, the
// stream engine and the session layer, with numeric codes suitable for
// diagnostics output.

mod audio;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the library and its diagnostics tooling.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, AudioError>;
