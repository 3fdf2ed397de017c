//! Tangle Sched -- decoherence deadlines and group-aware garbage collection.
//!
//! Builds on [`tangle_core`]: a [`DeadlineScheduler`](scheduler::DeadlineScheduler)
//! arms per-resource deadlines on a [`Clock`](tangle_core::clock::Clock),
//! turns expired resources into GC candidates, and reclaims them through a
//! [`ResourceProvider`](provider::ResourceProvider) without ever tearing a
//! live entanglement group apart.
//!
//! # Modules
//!
//! - [`heap`]: binary min-heap of pending deadlines.
//! - [`timer`]: per-resource timers with activity reset.
//! - [`policy`]: GC policy and scheduler configuration.
//! - [`provider`]: the resource-provider seam and an in-memory provider.
//! - [`scheduler`]: scheduling, cancellation and the timer queue.
//! - [`gc`]: policy-driven and hybrid collection.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tangle_core::prelude::*;
//! use tangle_sched::prelude::*;
//!
//! let clock = Arc::new(VirtualClock::new());
//! let provider = Arc::new(InMemoryProvider::new());
//! let mut tracker = GroupTracker::new(clock.clone());
//! let mut scheduler = DeadlineScheduler::new(clock.clone(), provider.clone());
//!
//! let r = ResourceId::new(1);
//! provider.insert(r, 4_096);
//! scheduler.schedule_decoherence(r, Duration::from_secs(1));
//!
//! clock.advance(1_000);
//! let processed = scheduler.process_timer_queue(&mut tracker);
//! assert_eq!(processed.new_candidates, vec![r]);
//!
//! let report = scheduler.trigger_gc(&mut tracker, &GcPolicy::default());
//! assert_eq!(report.collected, vec![r]);
//! assert_eq!(report.memory_freed, 4_096);
//! ```

#![deny(unsafe_code)]

pub mod gc;
pub mod heap;
pub mod policy;
pub mod provider;
pub mod scheduler;
pub mod timer;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Configuration errors. Runtime failures during collection are reported in
/// [`GcResult`](gc::GcResult) instead.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    #[error("invalid policy field `{field}`: {reason}")]
    InvalidPolicy { field: &'static str, reason: String },

    #[error("failed to parse policy: {0}")]
    PolicyParse(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::gc::{GcError, GcResult, HybridGcResult};
    pub use crate::heap::{DeadlineHeap, Priority, ScheduleEntry};
    pub use crate::policy::{GcCriteria, GcPolicy, ResetWindow, SchedulerConfig};
    pub use crate::provider::{InMemoryProvider, ReclaimError, ResourceInfo, ResourceProvider};
    pub use crate::scheduler::{DeadlineScheduler, SchedulerStats, TickReport, TimerProcessingResult};
    pub use crate::timer::{Timer, TimerHandle, TimerSet};
    pub use crate::SchedError;
}
