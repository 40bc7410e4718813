// Process-wide session and stream accounting
//
// Backends are initialized when their first session appears and terminated
// when their last session goes away. Backends are told apart by the address
// of their shared allocation.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::engine::backend::AudioBackend;
use crate::error::{AudioError, Result};

struct Registry {
    sessions: AtomicUsize,
    streams: AtomicUsize,
    /// backend address -> live sessions on it
    backends: Mutex<HashMap<usize, usize>>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(|| Registry {
    sessions: AtomicUsize::new(0),
    streams: AtomicUsize::new(0),
    backends: Mutex::new(HashMap::new()),
});

fn backend_key(backend: &Arc<dyn AudioBackend>) -> usize {
    Arc::as_ptr(backend) as *const () as usize
}

/// Count a new session, initializing `backend` if it has none yet.
pub(crate) fn acquire_backend(backend: &Arc<dyn AudioBackend>) -> Result<()> {
    let key = backend_key(backend);
    let mut backends = REGISTRY
        .backends
        .lock()
        .map_err(|_| AudioError::LockPoisoned {
            component: "session registry".to_string(),
        })?;

    let live = backends.get(&key).copied().unwrap_or(0);
    if live == 0 {
        backend
            .initialize()
            .map_err(|code| AudioError::backend(code, "initialize"))?;
        tracing::info!(backend = backend.name(), "audio backend initialized");
    }
    backends.insert(key, live + 1);
    REGISTRY.sessions.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

/// Drop one session, terminating `backend` when it was the last one.
pub(crate) fn release_backend(backend: &Arc<dyn AudioBackend>) {
    let key = backend_key(backend);
    let mut backends = match REGISTRY.backends.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    if let Some(live) = backends.get_mut(&key) {
        *live -= 1;
        if *live == 0 {
            backends.remove(&key);
            backend.terminate();
            tracing::info!(backend = backend.name(), "audio backend terminated");
        }
        REGISTRY.sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) fn stream_opened() {
    REGISTRY.streams.fetch_add(1, Ordering::SeqCst);
}

pub(crate) fn stream_closed() {
    let _ = REGISTRY
        .streams
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
}

pub(crate) fn session_count() -> usize {
    REGISTRY.sessions.load(Ordering::SeqCst)
}

pub(crate) fn stream_count() -> usize {
    REGISTRY.streams.load(Ordering::SeqCst)
}
