//! Engine module housing the native backend layer.
//!
//! This module exposes the trait-based backends (`backend`): the cpal host
//! bridge and the in-process simulated backend.

pub mod backend;

#[cfg(feature = "cpal-backend")]
pub use backend::CpalBackend;
pub use backend::{AudioBackend, SimulatedBackend};
