// Audio error types and constants

use crate::audio::StreamState;
use crate::engine::backend::BackendCode;
use crate::error::ErrorCode;
use crate::topology::{DeviceCapability, Direction};
use log::error;
use std::fmt;

/// Audio error code constants
///
/// These constants provide a single source of truth for error codes
/// reported by diagnostics tooling.
///
/// Error code range: 1001-1010
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Caller supplied a configuration that cannot be opened
    pub const INVALID_CONFIGURATION: i32 = 1001;

    /// The native backend rejected an operation
    pub const BACKEND_ERROR: i32 = 1002;

    /// Lifecycle call on an engine that holds no native stream
    pub const NOT_OPEN: i32 = 1003;

    /// Lifecycle call issued in a state that does not allow it
    pub const WRONG_STATE: i32 = 1004;

    /// Local index outside the grouping it was applied to
    pub const INDEX_OUT_OF_RANGE: i32 = 1005;

    /// Topology lookup found nothing
    pub const NOT_FOUND: i32 = 1006;

    /// The backend reports no host APIs or no devices
    pub const BACKEND_UNAVAILABLE: i32 = 1007;

    /// The backend reports no valid default device
    pub const NO_DEFAULT_DEVICE: i32 = 1008;

    /// Enumeration produced records that violate the indexing invariants
    pub const TOPOLOGY_POPULATION_FAILED: i32 = 1009;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1010;
}

/// Log an audio error with structured context
///
/// This function logs audio errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - message: Human-readable error message
/// - context: The operation that failed
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=StreamCore, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised by topology queries, stream lifecycle calls and sessions
///
/// Callers can tell "no such device" (`NotFound`) from "wrong index space"
/// (`IndexOutOfRange`) from "backend rejected the configuration"
/// (`BackendError`), since each calls for a different remedy.
///
/// Error code range: 1001-1010
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Caller misuse detected before any backend call
    InvalidConfiguration { reason: String },

    /// The native layer refused an operation; `code` is preserved verbatim
    BackendError { code: BackendCode, context: String },

    /// Lifecycle call made without an open stream
    NotOpen { operation: &'static str },

    /// Lifecycle call made in a state that forbids it
    WrongState {
        operation: &'static str,
        state: StreamState,
    },

    /// Local index applied to a grouping that is too small for it
    IndexOutOfRange {
        index: usize,
        len: usize,
        capability: DeviceCapability,
    },

    /// Lookup target does not exist
    NotFound { what: String },

    /// No usable audio hardware (zero host APIs or zero devices)
    BackendUnavailable { reason: String },

    /// The backend reports no valid default device for the direction
    NoDefaultDevice { direction: Direction },

    /// Enumeration could not satisfy the topology invariants
    TopologyPopulationFailed { reason: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },
}

impl AudioError {
    /// Shorthand for wrapping a backend code with the operation that produced it
    pub fn backend(code: BackendCode, context: impl Into<String>) -> Self {
        AudioError::BackendError {
            code,
            context: context.into(),
        }
    }

    /// Shorthand for an `InvalidConfiguration` error
    pub fn invalid(reason: impl Into<String>) -> Self {
        AudioError::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::InvalidConfiguration { .. } => AudioErrorCodes::INVALID_CONFIGURATION,
            AudioError::BackendError { .. } => AudioErrorCodes::BACKEND_ERROR,
            AudioError::NotOpen { .. } => AudioErrorCodes::NOT_OPEN,
            AudioError::WrongState { .. } => AudioErrorCodes::WRONG_STATE,
            AudioError::IndexOutOfRange { .. } => AudioErrorCodes::INDEX_OUT_OF_RANGE,
            AudioError::NotFound { .. } => AudioErrorCodes::NOT_FOUND,
            AudioError::BackendUnavailable { .. } => AudioErrorCodes::BACKEND_UNAVAILABLE,
            AudioError::NoDefaultDevice { .. } => AudioErrorCodes::NO_DEFAULT_DEVICE,
            AudioError::TopologyPopulationFailed { .. } => {
                AudioErrorCodes::TOPOLOGY_POPULATION_FAILED
            }
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::InvalidConfiguration { reason } => {
                format!("Invalid stream configuration: {}", reason)
            }
            AudioError::BackendError { code, context } => {
                format!(
                    "Backend error {} ({}) during {}",
                    code.0,
                    code.describe(),
                    context
                )
            }
            AudioError::NotOpen { operation } => {
                format!("{}() requires an open stream. Call open() first.", operation)
            }
            AudioError::WrongState { operation, state } => {
                format!("{}() is not allowed while the stream is {:?}", operation, state)
            }
            AudioError::IndexOutOfRange {
                index,
                len,
                capability,
            } => {
                format!(
                    "Local index {} is outside the {:?} device list (len {}). \
                     Pass the {:?}-local index, not a global or all-devices index.",
                    index, capability, len, capability
                )
            }
            AudioError::NotFound { what } => format!("Not found: {}", what),
            AudioError::BackendUnavailable { reason } => {
                format!("Audio backend unavailable: {}", reason)
            }
            AudioError::NoDefaultDevice { direction } => {
                format!("Backend reports no default {:?} device", direction)
            }
            AudioError::TopologyPopulationFailed { reason } => {
                format!("Topology population failed: {}", reason)
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_codes() {
        assert_eq!(
            AudioError::invalid("x").code(),
            AudioErrorCodes::INVALID_CONFIGURATION
        );
        assert_eq!(
            AudioError::backend(BackendCode::INVALID_DEVICE, "open").code(),
            AudioErrorCodes::BACKEND_ERROR
        );
        assert_eq!(
            AudioError::NotOpen { operation: "start" }.code(),
            AudioErrorCodes::NOT_OPEN
        );
        assert_eq!(
            AudioError::WrongState {
                operation: "open",
                state: StreamState::Running
            }
            .code(),
            AudioErrorCodes::WRONG_STATE
        );
        assert_eq!(
            AudioError::IndexOutOfRange {
                index: 999,
                len: 2,
                capability: DeviceCapability::Output
            }
            .code(),
            AudioErrorCodes::INDEX_OUT_OF_RANGE
        );
        assert_eq!(
            AudioError::NoDefaultDevice {
                direction: Direction::Output
            }
            .code(),
            AudioErrorCodes::NO_DEFAULT_DEVICE
        );
        assert_eq!(
            AudioError::LockPoisoned {
                component: "topology".to_string()
            }
            .code(),
            AudioErrorCodes::LOCK_POISONED
        );
    }

    #[test]
    fn test_backend_code_is_preserved() {
        let err = AudioError::backend(BackendCode(-9999), "start_stream");
        match &err {
            AudioError::BackendError { code, context } => {
                assert_eq!(code.0, -9999);
                assert_eq!(context, "start_stream");
            }
            other => panic!("Expected BackendError, got {:?}", other),
        }
        assert!(err.message().contains("-9999"));
    }

    #[test]
    fn test_index_out_of_range_message_names_the_index_space() {
        let err = AudioError::IndexOutOfRange {
            index: 999,
            len: 3,
            capability: DeviceCapability::Output,
        };
        let message = err.message();
        assert!(message.contains("999"));
        assert!(message.contains("Output"));
    }

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::NotOpen { operation: "start" };
        let display = format!("{}", err);
        assert!(display.contains("AudioError"));
        assert!(display.contains(&err.code().to_string()));
        assert!(display.contains("open()"));
    }

    #[test]
    fn test_error_propagation() {
        fn may_fail() -> Result<(), AudioError> {
            Err(AudioError::NotFound {
                what: "host API \"ASIO\"".to_string(),
            })
        }

        fn caller() -> Result<(), AudioError> {
            may_fail()?;
            Ok(())
        }

        assert!(matches!(caller(), Err(AudioError::NotFound { .. })));
    }
}
