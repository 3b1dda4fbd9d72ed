use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;

// Live-handle registry
//
// Every owning handle (tensor, scalar, optimizer) is entered here when it is
// created and removed when it is released, whichever path releases it. The
// registry is for leak detection and diagnostics only; nothing looks a handle
// up through it.
//
// Names are unique among live handles. Generated names look like
// `tensor_17`; a caller-supplied name is kept as is unless another live
// handle already uses it, in which case a numeric suffix is appended.
//
// The stored value is the handle's approximate byte size when the debug flag
// was set at creation time, and 0 otherwise.

static REGISTRY: Lazy<Mutex<HashMap<String, usize>>> = Lazy::new(|| Mutex::new(HashMap::new()));

static NEXT_ID: AtomicU64 = AtomicU64::new(0);

static DEBUG: Lazy<AtomicBool> = Lazy::new(|| {
    let on = std::env::var("VOLE_DEBUG")
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    AtomicBool::new(on)
});

fn registry() -> MutexGuard<'static, HashMap<String, usize>> {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

/// Enable or disable byte accounting and verbose handle logging.
pub fn set_debug(on: bool) {
    DEBUG.store(on, Ordering::SeqCst);
}

/// Whether the debug flag is set. Initialised from `VOLE_DEBUG`.
pub fn is_debug() -> bool {
    DEBUG.load(Ordering::SeqCst)
}

/// Enter a new handle, returning its unique name.
pub(crate) fn register(name: Option<&str>, prefix: &str, bytes: usize) -> String {
    let mut map = registry();
    let name = match name {
        Some(n) if !map.contains_key(n) => n.to_string(),
        Some(n) => loop {
            let candidate = format!("{n}_{}", NEXT_ID.fetch_add(1, Ordering::Relaxed));
            if !map.contains_key(&candidate) {
                break candidate;
            }
        },
        None => loop {
            let candidate = format!("{prefix}_{}", NEXT_ID.fetch_add(1, Ordering::Relaxed));
            if !map.contains_key(&candidate) {
                break candidate;
            }
        },
    };
    let debug = is_debug();
    map.insert(name.clone(), if debug { bytes } else { 0 });
    drop(map);
    if debug {
        log::debug!("created {name} ({bytes} bytes)");
    }
    name
}

/// Remove a handle; false when it was not registered.
pub(crate) fn unregister(name: &str) -> bool {
    let removed = registry().remove(name).is_some();
    if removed && is_debug() {
        log::debug!("released {name}");
    }
    removed
}

/// Move a live entry to a new unique name derived from `new_name`.
pub(crate) fn rename(old: &str, new_name: &str) -> String {
    let bytes = registry().remove(old).unwrap_or(0);
    let name = register(Some(new_name), "", 0);
    if let Some(v) = registry().get_mut(&name) {
        *v = bytes;
    }
    name
}

/// Number of live handles across the process.
pub fn live_handle_count() -> usize {
    registry().len()
}

/// Names of all live handles, sorted.
pub fn live_handles() -> Vec<String> {
    let mut names: Vec<String> = registry().keys().cloned().collect();
    names.sort();
    names
}

/// Total recorded bytes of live handles created while debugging.
pub fn live_bytes() -> usize {
    registry().values().sum()
}

/// Whether a handle with this name is live.
pub fn is_live(name: &str) -> bool {
    registry().contains_key(name)
}
