//! The seam between the scheduler and whoever owns resource payloads.
//!
//! The scheduler never allocates or frees memory itself. It asks a
//! [`ResourceProvider`] for metadata about a resource, and asks it to reclaim
//! the resource once a GC run has decided it may go. [`InMemoryProvider`] is
//! a self-contained implementation for tests and demos.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tangle_core::id::ResourceId;

// ---------------------------------------------------------------------------
// ResourceInfo / ReclaimError
// ---------------------------------------------------------------------------

/// Provider-side metadata for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub memory_bytes: u64,
    /// Critical resources need oversight approval before collection.
    pub critical: bool,
    /// Live resources referencing this one.
    pub ref_count: u32,
    /// Outgoing reference edges.
    pub references: Vec<ResourceId>,
    pub last_access_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReclaimError {
    #[error("resource {0} is unknown to the provider")]
    NotFound(ResourceId),

    #[error("provider refused to reclaim {resource}: {reason}")]
    Refused { resource: ResourceId, reason: String },
}

// ---------------------------------------------------------------------------
// ResourceProvider
// ---------------------------------------------------------------------------

pub trait ResourceProvider: Send + Sync {
    /// Metadata for `id`, or `None` if the provider no longer holds it.
    fn get_handle(&self, id: ResourceId) -> Option<ResourceInfo>;

    /// Every resource the provider currently holds.
    fn resources(&self) -> Vec<ResourceId>;

    /// Free `id`, returning the number of bytes released.
    fn reclaim(&self, id: ResourceId) -> Result<u64, ReclaimError>;

    /// Free several resources. Providers that can reclaim concurrently
    /// override this; the default reclaims one at a time.
    fn reclaim_batch(&self, ids: &[ResourceId]) -> Vec<(ResourceId, Result<u64, ReclaimError>)> {
        ids.iter().map(|&id| (id, self.reclaim(id))).collect()
    }

    /// Current memory pressure in `0.0..=1.0`.
    fn memory_pressure(&self) -> f64;
}

// ---------------------------------------------------------------------------
// InMemoryProvider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct Stored {
    memory_bytes: u64,
    critical: bool,
    references: BTreeSet<ResourceId>,
    last_access_ms: u64,
    refuse: Option<String>,
}

#[derive(Debug, Default)]
struct ProviderState {
    resources: BTreeMap<ResourceId, Stored>,
    pressure: f64,
    reclaimed_bytes: u64,
    batches: u64,
}

/// Map-backed provider. Reference counts are derived from the stored edges.
///
/// `get_handle` scans every resource to count incoming edges, so a tracing
/// pass over `n` resources costs O(n²). Fine for tests and demos; a real
/// provider should keep counts incrementally.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    state: Mutex<ProviderState>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register (or replace) a resource of `memory_bytes`.
    pub fn insert(&self, id: ResourceId, memory_bytes: u64) {
        self.lock().resources.insert(
            id,
            Stored {
                memory_bytes,
                ..Stored::default()
            },
        );
    }

    pub fn set_critical(&self, id: ResourceId, critical: bool) {
        if let Some(r) = self.lock().resources.get_mut(&id) {
            r.critical = critical;
        }
    }

    /// Record an edge `from -> to`.
    pub fn add_reference(&self, from: ResourceId, to: ResourceId) {
        if let Some(r) = self.lock().resources.get_mut(&from) {
            r.references.insert(to);
        }
    }

    pub fn remove_reference(&self, from: ResourceId, to: ResourceId) {
        if let Some(r) = self.lock().resources.get_mut(&from) {
            r.references.remove(&to);
        }
    }

    pub fn touch(&self, id: ResourceId, at_ms: u64) {
        if let Some(r) = self.lock().resources.get_mut(&id) {
            r.last_access_ms = at_ms;
        }
    }

    /// Make every future `reclaim(id)` fail with `reason`.
    pub fn refuse_reclaim(&self, id: ResourceId, reason: impl Into<String>) {
        if let Some(r) = self.lock().resources.get_mut(&id) {
            r.refuse = Some(reason.into());
        }
    }

    pub fn set_memory_pressure(&self, pressure: f64) {
        self.lock().pressure = pressure.clamp(0.0, 1.0);
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.lock().resources.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().resources.is_empty()
    }

    pub fn reclaimed_bytes(&self) -> u64 {
        self.lock().reclaimed_bytes
    }

    /// Number of `reclaim_batch` calls served.
    pub fn batches(&self) -> u64 {
        self.lock().batches
    }
}

fn reclaim_locked(state: &mut ProviderState, id: ResourceId) -> Result<u64, ReclaimError> {
    let stored = state.resources.get(&id).ok_or(ReclaimError::NotFound(id))?;
    if let Some(reason) = &stored.refuse {
        return Err(ReclaimError::Refused {
            resource: id,
            reason: reason.clone(),
        });
    }
    let bytes = stored.memory_bytes;
    state.resources.remove(&id);
    state.reclaimed_bytes += bytes;
    Ok(bytes)
}

impl ResourceProvider for InMemoryProvider {
    fn get_handle(&self, id: ResourceId) -> Option<ResourceInfo> {
        let state = self.lock();
        let stored = state.resources.get(&id)?;
        let ref_count = state
            .resources
            .iter()
            .filter(|(other, r)| **other != id && r.references.contains(&id))
            .count();
        Some(ResourceInfo {
            id,
            memory_bytes: stored.memory_bytes,
            critical: stored.critical,
            ref_count: u32::try_from(ref_count).unwrap_or(u32::MAX),
            references: stored.references.iter().copied().collect(),
            last_access_ms: stored.last_access_ms,
        })
    }

    fn resources(&self) -> Vec<ResourceId> {
        self.lock().resources.keys().copied().collect()
    }

    fn reclaim(&self, id: ResourceId) -> Result<u64, ReclaimError> {
        reclaim_locked(&mut self.lock(), id)
    }

    fn reclaim_batch(&self, ids: &[ResourceId]) -> Vec<(ResourceId, Result<u64, ReclaimError>)> {
        let mut state = self.lock();
        state.batches += 1;
        ids.iter()
            .map(|&id| (id, reclaim_locked(&mut state, id)))
            .collect()
    }

    fn memory_pressure(&self) -> f64 {
        self.lock().pressure
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
