// ABOUTME: Per-conversation single-slot gate that rejects overlapping turns.
// ABOUTME: Non-blocking acquire; the returned permit releases on drop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ConcurrencyGate {
    busy: AtomicBool,
}

impl ConcurrencyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot if it is free. Never waits.
    pub fn try_acquire(self: &Arc<Self>) -> Option<GatePermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GatePermit {
                gate: Arc::clone(self),
            })
    }

    /// Free the slot. Safe to call when it is already free.
    pub fn release(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Proof that a turn holds the gate. Releases exactly once, on drop.
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<ConcurrencyGate>,
}

impl GatePermit {
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}
