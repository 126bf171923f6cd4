// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-filter knote registry.
//!
//! The registry maps an [`Ident`] to the single live [`Knote`] for that
//! identifier. All traversal and structural mutation goes through the
//! registry's reader/writer lock; there is no way to reach the map without it.
//!
//! The registry holds one reference on every knote it contains. That
//! reference is what [`delete`](KnoteRegistry::delete) releases.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

use crate::backend::FilterBackend;
use crate::context::DispatchContext;
use crate::error::{BackendOp, KnoteError};
use crate::event::{EventFlags, Filter, Ident, KEvent};
use crate::knote::Knote;

/// Ordered, lock-guarded set of knotes for one filter.
pub struct KnoteRegistry {
    filter: Filter,
    backend: Arc<dyn FilterBackend>,
    knotes: RwLock<BTreeMap<Ident, Knote>>,
    strict_delete: bool,
}

impl KnoteRegistry {
    pub fn new(filter: Filter, backend: Arc<dyn FilterBackend>) -> Self {
        Self {
            filter,
            backend,
            knotes: RwLock::new(BTreeMap::new()),
            strict_delete: false,
        }
    }

    /// When set, a backend failure during [`delete`](Self::delete) is
    /// returned to the caller once the deletion has completed instead of
    /// being logged and absorbed.
    pub fn with_strict_delete(mut self, strict: bool) -> Self {
        self.strict_delete = strict;
        self
    }

    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn backend(&self) -> &Arc<dyn FilterBackend> {
        &self.backend
    }

    /// Allocate a knote for `kev`, arm it through the backend and insert it.
    ///
    /// Returns a handle retained on the caller's behalf; the registry keeps
    /// its own reference. If the backend refuses the knote it is never
    /// inserted and its storage goes straight to reclamation. A descriptor
    /// carrying `EV_DISABLE` is disabled before the knote becomes visible to
    /// lookups; if that fails the backend is told to disarm it and the knote
    /// is never inserted either.
    pub fn create(&self, owner: &Arc<DispatchContext>, kev: KEvent) -> Result<Knote, KnoteError> {
        self.check_filter(&kev)?;

        let knote = Knote::new(owner, kev)?;
        self.backend
            .on_create(&knote)
            .map_err(|source| KnoteError::backend(BackendOp::Create, self.filter, kev.ident, source))?;

        if kev.flags.contains(EventFlags::DISABLE) {
            if let Err(source) = self.backend.on_disable(&knote) {
                let err = KnoteError::backend(BackendOp::Disable, self.filter, kev.ident, source);
                self.abandon(&knote);
                return Err(err);
            }
            knote.mark_disabled();
        }

        let handle = knote.retain();
        self.insert(knote);
        Ok(handle)
    }

    /// Disarm a knote that was armed but never inserted.
    fn abandon(&self, knote: &Knote) {
        knote.try_mark_deleted();
        if let Err(source) = self.backend.on_delete(knote) {
            warn!(
                filter = %self.filter,
                ident = %knote.ident(),
                error = %source,
                "backend delete failed while abandoning knote"
            );
        }
    }

    /// Insert `knote`, transferring the caller's reference to the registry.
    ///
    /// Identifiers must be unique; the caller is responsible for deleting a
    /// previous knote before inserting a new one for the same identifier. A
    /// duplicate insert displaces the existing entry and is logged as an error.
    pub fn insert(&self, knote: Knote) {
        debug_assert_eq!(knote.filter(), self.filter);
        let ident = knote.ident();
        let displaced = self.knotes.write().insert(ident, knote);

        if let Some(displaced) = displaced {
            error!(
                filter = %self.filter,
                %ident,
                displaced = ?displaced,
                "duplicate knote insert displaced a live registration"
            );
        }
    }

    /// Find the knote registered for `ident`.
    ///
    /// The returned handle is retained before the read lock is released, so
    /// it stays valid for as long as the caller holds it even if another
    /// thread deletes the knote in the meantime.
    pub fn lookup(&self, ident: impl Into<Ident>) -> Option<Knote> {
        let ident = ident.into();
        let found = self.knotes.read().get(&ident).cloned();
        trace!(filter = %self.filter, %ident, found = found.is_some(), "knote lookup");
        found
    }

    /// Delete `knote` from the registry.
    ///
    /// A knote of another filter is rejected with
    /// [`KnoteError::FilterMismatch`] before anything changes.
    ///
    /// 1. Claim the `DELETED` transition; a knote already deleted is
    ///    rejected with [`KnoteError::DoubleDeletion`] and nothing changes.
    /// 2. Under the write lock, unlink the registry entry for the knote's
    ///    identifier only if it is this very knote. Another thread may have
    ///    replaced it, in which case the replacement is left alone.
    /// 3. Ask the backend to disarm the resource. A failure is logged and
    ///    the deletion still completes.
    /// 4. Release the registry's reference.
    pub fn delete(&self, knote: &Knote) -> Result<(), KnoteError> {
        self.check_owned(knote)?;
        let ident = knote.ident();
        if !knote.try_mark_deleted() {
            warn!(filter = %self.filter, %ident, "double deletion detected");
            return Err(KnoteError::DoubleDeletion { ident });
        }

        let unlinked = {
            let mut knotes = self.knotes.write();
            let linked = knotes.get(&ident).is_some_and(|current| current.ptr_eq(knote));
            if linked { knotes.remove(&ident) } else { None }
        };
        if unlinked.is_none() {
            debug!(filter = %self.filter, %ident, "knote no longer linked in registry");
        }

        let result = match self.backend.on_delete(knote) {
            Ok(()) => Ok(()),
            Err(source) => {
                let err = KnoteError::backend(BackendOp::Delete, self.filter, ident, source);
                warn!(filter = %self.filter, %ident, error = %err, "backend delete failed, knote deleted anyway");
                if self.strict_delete { Err(err) } else { Ok(()) }
            }
        };

        drop(unlinked);
        result
    }

    /// Suspend delivery for `knote`.
    ///
    /// # Panics
    ///
    /// Panics if the knote is already disabled.
    pub fn disable(&self, knote: &Knote) -> Result<(), KnoteError> {
        self.check_owned(knote)?;
        let ident = knote.ident();
        if knote.is_deleted() {
            return Err(KnoteError::Deleted { ident });
        }
        assert!(
            !knote.is_disabled(),
            "knote {} ({}) is already disabled",
            ident,
            self.filter
        );

        self.backend
            .on_disable(knote)
            .map_err(|source| KnoteError::backend(BackendOp::Disable, self.filter, ident, source))?;
        knote.mark_disabled();
        Ok(())
    }

    /// Resume delivery for a disabled `knote`.
    ///
    /// # Panics
    ///
    /// Panics if the knote is not disabled.
    pub fn enable(&self, knote: &Knote) -> Result<(), KnoteError> {
        self.check_owned(knote)?;
        let ident = knote.ident();
        if knote.is_deleted() {
            return Err(KnoteError::Deleted { ident });
        }
        assert!(
            knote.is_disabled(),
            "knote {} ({}) is not disabled",
            ident,
            self.filter
        );

        self.backend
            .on_enable(knote)
            .map_err(|source| KnoteError::backend(BackendOp::Enable, self.filter, ident, source))?;
        knote.mark_enabled();
        Ok(())
    }

    /// Re-arm `knote` with a new descriptor. The stored descriptor is only
    /// replaced once the backend accepts the change.
    pub fn modify(&self, knote: &Knote, kev: KEvent) -> Result<(), KnoteError> {
        self.check_owned(knote)?;
        self.check_filter(&kev)?;
        let ident = knote.ident();
        if knote.is_deleted() {
            return Err(KnoteError::Deleted { ident });
        }

        self.backend
            .on_modify(knote, &kev)
            .map_err(|source| KnoteError::backend(BackendOp::Modify, self.filter, ident, source))?;
        knote.replace_event(kev);
        Ok(())
    }

    // ── Diagnostics ───────────────────────────────────────────────────

    pub fn len(&self) -> usize {
        self.knotes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.knotes.read().is_empty()
    }

    pub fn contains(&self, ident: impl Into<Ident>) -> bool {
        self.knotes.read().contains_key(&ident.into())
    }

    /// Registered identifiers in ascending order.
    pub fn idents(&self) -> Vec<Ident> {
        self.knotes.read().keys().copied().collect()
    }

    /// Descriptors of every registered knote in ascending identifier order.
    pub fn snapshot(&self) -> Vec<(Ident, KEvent)> {
        self.knotes
            .read()
            .iter()
            .map(|(ident, knote)| (*ident, knote.event()))
            .collect()
    }

    /// Delete every knote still registered. Returns how many were deleted.
    pub fn destroy(&self) -> usize {
        let knotes = std::mem::take(&mut *self.knotes.write());

        let mut deleted = 0;
        for (ident, knote) in knotes {
            match self.delete(&knote) {
                Ok(()) => deleted += 1,
                Err(KnoteError::DoubleDeletion { .. }) => {
                    trace!(filter = %self.filter, %ident, "knote already deleted");
                }
                Err(err) => {
                    warn!(filter = %self.filter, %ident, error = %err, "error destroying knote");
                    deleted += 1;
                }
            }
        }

        debug!(filter = %self.filter, deleted, "registry destroyed");
        deleted
    }

    fn check_filter(&self, kev: &KEvent) -> Result<(), KnoteError> {
        self.expect_filter(kev.filter)
    }

    /// Knotes of another filter live in another registry.
    fn check_owned(&self, knote: &Knote) -> Result<(), KnoteError> {
        self.expect_filter(knote.filter())
    }

    fn expect_filter(&self, actual: Filter) -> Result<(), KnoteError> {
        if actual == self.filter {
            Ok(())
        } else {
            Err(KnoteError::FilterMismatch {
                expected: self.filter,
                actual,
            })
        }
    }
}

impl Debug for KnoteRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnoteRegistry")
            .field("filter", &self.filter)
            .field("len", &self.len())
            .field("strict_delete", &self.strict_delete)
            .finish()
    }
}
