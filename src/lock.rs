//! Process-wide single-writer lock
//!
//! Every mutation of the substrate (transforms, edits, combiners, freeze,
//! thaw, compaction, delete) runs while holding the guard returned by
//! [`acquire`]. The guard is taken once at the engine boundary and handed
//! down as `&WriteGuard`; inner functions never lock again.

use std::sync::{Mutex, MutexGuard};

static WRITE_LOCK: Mutex<()> = Mutex::new(());

/// Proof that the caller holds the write lock.
pub struct WriteGuard {
    _inner: MutexGuard<'static, ()>,
}

/// Block until the write lock is free.
///
/// A writer that panicked leaves the lock poisoned; the lock itself guards
/// no data, so the poison is cleared and the next writer proceeds.
pub fn acquire() -> WriteGuard {
    let inner = WRITE_LOCK.lock().unwrap_or_else(|poisoned| {
        log::warn!("Write lock was poisoned by a failed writer; continuing");
        poisoned.into_inner()
    });
    WriteGuard { _inner: inner }
}
