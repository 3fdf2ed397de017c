//! Clock abstraction with deferred callbacks.
//!
//! Every time-dependent decision in the engine reads the time through a
//! [`Clock`]. Production code uses [`SystemClock`] (monotonic, millisecond
//! resolution); tests use [`VirtualClock`] and move time forward explicitly
//! with [`VirtualClock::advance`], which makes deadline behaviour fully
//! deterministic.
//!
//! Callbacks registered with [`Clock::schedule_at`] run on the thread that
//! calls [`Clock::fire_due`] (or [`VirtualClock::advance`]), never on a
//! background thread. A callback that panics is caught and logged; the other
//! due callbacks still run.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//! use tangle_core::clock::{Clock, VirtualClock};
//!
//! let clock = VirtualClock::new();
//! let fired = Arc::new(AtomicU64::new(0));
//! let seen = Arc::clone(&fired);
//! clock.schedule_at(1_000, Box::new(move |at| seen.store(at, Ordering::SeqCst)));
//!
//! clock.advance(999);
//! assert_eq!(fired.load(Ordering::SeqCst), 0);
//! clock.advance(1);
//! assert_eq!(fired.load(Ordering::SeqCst), 1_000);
//! ```

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

// ---------------------------------------------------------------------------
// Callback types
// ---------------------------------------------------------------------------

/// A deferred callback. Receives the time (ms) it was scheduled for.
pub type ClockCallback = Box<dyn FnOnce(u64) + Send>;

/// Handle returned by [`Clock::schedule_at`], used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

// ---------------------------------------------------------------------------
// Clock trait
// ---------------------------------------------------------------------------

/// Source of time plus a deferred-callback facility.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the clock's origin.
    fn now_ms(&self) -> u64;

    /// Register `callback` to run once the clock reaches `at_ms`.
    fn schedule_at(&self, at_ms: u64, callback: ClockCallback) -> CallbackId;

    /// Cancel a pending callback. Returns `false` if it already ran or was
    /// already cancelled.
    fn cancel(&self, id: CallbackId) -> bool;

    /// Run every callback whose time has come. Returns how many ran
    /// (including ones that panicked).
    fn fire_due(&self) -> usize;
}

// ---------------------------------------------------------------------------
// PendingCallbacks
// ---------------------------------------------------------------------------

/// Time-ordered pending callbacks with lazy cancellation.
///
/// Cancelled ids are removed from `callbacks` only; their heap slots are
/// skipped when they surface.
#[derive(Default)]
struct PendingCallbacks {
    order: BinaryHeap<Reverse<(u64, u64)>>,
    callbacks: HashMap<u64, ClockCallback>,
    next_seq: u64,
}

impl PendingCallbacks {
    fn insert(&mut self, at_ms: u64, callback: ClockCallback) -> CallbackId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push(Reverse((at_ms, seq)));
        self.callbacks.insert(seq, callback);
        CallbackId(seq)
    }

    fn cancel(&mut self, id: CallbackId) -> bool {
        self.callbacks.remove(&id.0).is_some()
    }

    /// Pop the earliest live callback due at or before `now`.
    fn pop_due(&mut self, now: u64) -> Option<(u64, ClockCallback)> {
        while let Some(Reverse((at, seq))) = self.order.peek().copied() {
            if at > now {
                return None;
            }
            self.order.pop();
            if let Some(cb) = self.callbacks.remove(&seq) {
                return Some((at, cb));
            }
        }
        None
    }

    fn len(&self) -> usize {
        self.callbacks.len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fire due callbacks one at a time without holding the lock, so callbacks
/// may schedule further callbacks (which fire in the same pass when due).
fn drain_due(pending: &Mutex<PendingCallbacks>, now: impl Fn() -> u64) -> usize {
    let mut fired = 0;
    loop {
        let next = lock(pending).pop_due(now());
        let Some((at, callback)) = next else {
            break;
        };
        fired += 1;
        if catch_unwind(AssertUnwindSafe(move || callback(at))).is_err() {
            tracing::error!(scheduled_for = at, "clock callback panicked; continuing");
        }
    }
    fired
}

// ---------------------------------------------------------------------------
// VirtualClock
// ---------------------------------------------------------------------------

/// Deterministic clock for tests and simulations. Time only moves when told.
#[derive(Default)]
pub struct VirtualClock {
    now: Mutex<u64>,
    pending: Mutex<PendingCallbacks>,
}

impl VirtualClock {
    /// A virtual clock starting at `0` ms.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// A virtual clock starting at `start_ms`.
    pub fn starting_at(start_ms: u64) -> Self {
        Self {
            now: Mutex::new(start_ms),
            pending: Mutex::new(PendingCallbacks::default()),
        }
    }

    /// Move time forward by `delta_ms` and fire everything that became due.
    pub fn advance(&self, delta_ms: u64) -> usize {
        {
            let mut now = lock(&self.now);
            *now = now.saturating_add(delta_ms);
        }
        self.fire_due()
    }

    /// Jump to `at_ms`. Time never goes backwards; earlier values are ignored.
    pub fn set(&self, at_ms: u64) -> usize {
        {
            let mut now = lock(&self.now);
            if at_ms < *now {
                tracing::warn!(now = *now, requested = at_ms, "virtual clock cannot move backwards");
            } else {
                *now = at_ms;
            }
        }
        self.fire_due()
    }

    /// Number of callbacks still waiting.
    pub fn pending_callbacks(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl Clock for VirtualClock {
    fn now_ms(&self) -> u64 {
        *lock(&self.now)
    }

    fn schedule_at(&self, at_ms: u64, callback: ClockCallback) -> CallbackId {
        lock(&self.pending).insert(at_ms, callback)
    }

    fn cancel(&self, id: CallbackId) -> bool {
        lock(&self.pending).cancel(id)
    }

    fn fire_due(&self) -> usize {
        drain_due(&self.pending, || self.now_ms())
    }
}

// ---------------------------------------------------------------------------
// SystemClock
// ---------------------------------------------------------------------------

/// Monotonic wall clock. Callbacks fire when the owner polls
/// [`Clock::fire_due`], typically once per scheduler tick.
pub struct SystemClock {
    origin: Instant,
    pending: Mutex<PendingCallbacks>,
}

impl SystemClock {
    /// A clock whose origin is the moment of construction.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            pending: Mutex::new(PendingCallbacks::default()),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn schedule_at(&self, at_ms: u64, callback: ClockCallback) -> CallbackId {
        lock(&self.pending).insert(at_ms, callback)
    }

    fn cancel(&self, id: CallbackId) -> bool {
        lock(&self.pending).cancel(id)
    }

    fn fire_due(&self) -> usize {
        drain_due(&self.pending, || self.now_ms())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
