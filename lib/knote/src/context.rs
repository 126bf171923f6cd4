// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The dispatch context that owns registries and reclaims knotes.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::backend::FilterBackend;
use crate::config::KnoteConfig;
use crate::error::KnoteError;
use crate::event::{Filter, KEvent};
use crate::knote::Knote;
use crate::reclaim::{ReclaimQueue, ReclaimStats};
use crate::registry::KnoteRegistry;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a [`DispatchContext`], used in logs and as
/// the owner tag on every knote.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Display for ContextId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "kq#{}", self.0)
    }
}

/// Owner of one registry per filter and of the reclamation queue their
/// knotes are released into.
///
/// The surrounding dispatch loop calls [`drain_reclaimed`](Self::drain_reclaimed)
/// between processing cycles, when it can guarantee that no thread still
/// holds an uncounted reference to a released knote.
pub struct DispatchContext {
    id: ContextId,
    config: KnoteConfig,
    reclaim: ReclaimQueue,
    live: AtomicUsize,
    registries: RwLock<BTreeMap<Filter, Arc<KnoteRegistry>>>,
}

impl DispatchContext {
    /// Create a context with the default configuration.
    pub fn new() -> Arc<Self> {
        Self::with_config(KnoteConfig::default())
    }

    pub fn with_config(config: KnoteConfig) -> Arc<Self> {
        let id = ContextId::next();
        debug!(context = %id, max_knotes = ?config.max_knotes, "created dispatch context");
        Arc::new(Self {
            id,
            config,
            reclaim: ReclaimQueue::new(),
            live: AtomicUsize::new(0),
            registries: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn config(&self) -> &KnoteConfig {
        &self.config
    }

    /// Knotes allocated by this context and not yet freed.
    pub fn live_knotes(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    // ── Registries ────────────────────────────────────────────────────

    /// Create the registry for `filter`, backed by `backend`.
    ///
    /// A filter can be registered once; registering it again keeps the
    /// existing registry and returns it.
    pub fn register_filter(
        &self,
        filter: Filter,
        backend: Arc<dyn FilterBackend>,
    ) -> Arc<KnoteRegistry> {
        let mut registries = self.registries.write();
        if let Some(existing) = registries.get(&filter) {
            warn!(context = %self.id, %filter, "filter already registered, keeping existing backend");
            return Arc::clone(existing);
        }

        let registry = Arc::new(
            KnoteRegistry::new(filter, backend).with_strict_delete(self.config.strict_delete),
        );
        registries.insert(filter, Arc::clone(&registry));
        debug!(context = %self.id, %filter, "registered filter");
        registry
    }

    pub fn registry(&self, filter: Filter) -> Option<Arc<KnoteRegistry>> {
        self.registries.read().get(&filter).cloned()
    }

    pub fn registry_for(&self, filter: Filter) -> Result<Arc<KnoteRegistry>, KnoteError> {
        self.registry(filter)
            .ok_or(KnoteError::FilterNotRegistered(filter))
    }

    /// Filters with a registry, in ascending order.
    pub fn filters(&self) -> Vec<Filter> {
        self.registries.read().keys().copied().collect()
    }

    /// Remove the registry for `filter` and delete every knote it holds.
    /// Returns the number of knotes deleted, or `None` if the filter was not
    /// registered.
    pub fn unregister_filter(&self, filter: Filter) -> Option<usize> {
        let registry = self.registries.write().remove(&filter)?;
        let deleted = registry.destroy();
        debug!(context = %self.id, %filter, deleted, "unregistered filter");
        Some(deleted)
    }

    /// Create and register a knote in the registry serving `kev.filter`.
    pub fn create_knote(self: &Arc<Self>, kev: KEvent) -> Result<Knote, KnoteError> {
        self.registry_for(kev.filter)?.create(self, kev)
    }

    // ── Reclamation ───────────────────────────────────────────────────

    pub fn reclaim_queue(&self) -> &ReclaimQueue {
        &self.reclaim
    }

    /// Free every knote released since the previous drain.
    pub fn drain_reclaimed(&self) -> usize {
        self.reclaim.drain()
    }

    pub fn reclaim_stats(&self) -> ReclaimStats {
        self.reclaim.stats()
    }

    /// Destroy every registry, then drain. Returns the number of knotes freed
    /// by the final drain.
    pub fn shutdown(&self) -> usize {
        let registries = std::mem::take(&mut *self.registries.write());
        for (filter, registry) in registries {
            let deleted = registry.destroy();
            debug!(context = %self.id, %filter, deleted, "destroyed registry on shutdown");
        }
        let freed = self.drain_reclaimed();
        debug!(context = %self.id, freed, live = self.live_knotes(), "dispatch context shut down");
        freed
    }

    // ── Knote budget ──────────────────────────────────────────────────

    pub(crate) fn reserve_slot(&self) -> Result<(), KnoteError> {
        match self.config.max_knotes {
            Some(limit) => self
                .live
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |live| {
                    (live < limit).then_some(live + 1)
                })
                .map(|_| ())
                .map_err(|_| KnoteError::OutOfMemory { limit }),
            None => {
                self.live.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
        }
    }

    pub(crate) fn release_slot(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}
