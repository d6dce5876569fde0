//! Process-wide "who may drive the hardware" bookkeeping.
//!
//! A [`Registry`] is created once by the application and injected into every
//! experiment and instrument. Each [`ActiveSlot`] admits one holder at a time:
//! claiming the slot swaps in a fresh [`Token`] atomically, and the displaced
//! holder is handed back so the new owner can ask it to stop. Worker loops
//! call [`ActiveSlot::is_current`] on every iteration instead of caching the
//! answer.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Something that runs background loops and can be asked to wind them down.
pub trait Stoppable: Send + Sync {
    /// Ask the loops to exit. Must not block.
    fn request_stop(&self);
    /// Wait until the loops have exited; returns false on timeout.
    fn wait_stopped(&self, timeout: Duration) -> bool;
}

/// Proof of a successful claim. Tokens are never reused within a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

impl Token {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// Single-holder slot with an atomically swapped current token.
pub struct ActiveSlot {
    name: &'static str,
    current: AtomicU64,
    issued: AtomicU64,
    holder: Mutex<Option<Arc<dyn Stoppable>>>,
}

impl ActiveSlot {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            current: AtomicU64::new(0),
            issued: AtomicU64::new(0),
            holder: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn holder(&self) -> MutexGuard<'_, Option<Arc<dyn Stoppable>>> {
        self.holder.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `holder` the active one. Returns the new token and the displaced
    /// holder, if any; the caller decides how long to wait for it.
    pub fn claim(&self, holder: Arc<dyn Stoppable>) -> (Token, Option<Arc<dyn Stoppable>>) {
        let token = Token(self.issued.fetch_add(1, Ordering::Relaxed) + 1);
        let mut guard = self.holder();
        self.current.store(token.0, Ordering::SeqCst);
        let previous = guard.replace(holder);
        (token, previous)
    }

    /// Cheap check performed by every loop iteration.
    #[inline]
    pub fn is_current(&self, token: Token) -> bool {
        self.current.load(Ordering::SeqCst) == token.0
    }

    /// Vacate the slot if `token` still owns it. Returns whether it did.
    pub fn release(&self, token: Token) -> bool {
        let mut guard = self.holder();
        if self
            .current
            .compare_exchange(token.0, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            guard.take();
            true
        } else {
            false
        }
    }

    pub fn is_vacant(&self) -> bool {
        self.current.load(Ordering::SeqCst) == 0
    }
}

impl fmt::Debug for ActiveSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSlot")
            .field("name", &self.name)
            .field("current", &self.current.load(Ordering::Relaxed))
            .finish()
    }
}

/// The only global mutable state of the application, made explicit.
#[derive(Debug)]
pub struct Registry {
    pub experiment: ActiveSlot,
    pub instrument: ActiveSlot,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            experiment: ActiveSlot::new("experiment"),
            instrument: ActiveSlot::new("instrument"),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
