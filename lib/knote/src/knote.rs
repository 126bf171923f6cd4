// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Reference-counted knote handles.
//!
//! A [`Knote`] is a counted handle to shared registration storage. Cloning a
//! handle retains the knote and dropping it releases it. The release that
//! brings the count to zero never frees the storage in place: it hands it to
//! the owning [`DispatchContext`]'s reclamation queue, and the context frees
//! it later at a point where no thread can still be resolving it.

use bitflags::bitflags;
use parking_lot::Mutex;
use std::fmt::{self, Debug, Formatter};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use crate::context::{ContextId, DispatchContext};
use crate::error::KnoteError;
use crate::event::{EventFlags, Filter, Ident, KEvent};

bitflags! {
    /// Lifecycle state of a knote.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct KnoteFlags: u8 {
        /// Delivery is suspended. May be set and cleared until deletion.
        const DISABLED = 0x01;
        /// Terminal. Set exactly once.
        const DELETED = 0x02;
    }
}

/// Shared storage behind every [`Knote`] handle.
pub(crate) struct KnoteInner {
    ident: Ident,
    filter: Filter,
    kev: Mutex<KEvent>,
    state: AtomicU8,
    refs: AtomicUsize,
    owner: Weak<DispatchContext>,
    owner_id: ContextId,
}

impl KnoteInner {
    pub(crate) fn ident(&self) -> Ident {
        self.ident
    }

    pub(crate) fn filter(&self) -> Filter {
        self.filter
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.flags().contains(KnoteFlags::DELETED)
    }

    fn flags(&self) -> KnoteFlags {
        KnoteFlags::from_bits_truncate(self.state.load(Ordering::Acquire))
    }

    fn set_flags(&self, flags: KnoteFlags) -> KnoteFlags {
        KnoteFlags::from_bits_truncate(self.state.fetch_or(flags.bits(), Ordering::AcqRel))
    }

    fn clear_flags(&self, flags: KnoteFlags) -> KnoteFlags {
        KnoteFlags::from_bits_truncate(self.state.fetch_and(!flags.bits(), Ordering::AcqRel))
    }

    /// Last reference gone: make sure the knote reads as deleted and stamp the
    /// descriptor so a stray reader can tell it is on its way out.
    fn retire(&self) {
        let prev = self.set_flags(KnoteFlags::DELETED);
        if !prev.contains(KnoteFlags::DELETED) {
            // Happens when the knote never made it into a registry.
            debug!(ident = %self.ident, filter = %self.filter, "knote released without deletion");
        }
        self.kev.lock().filter = Filter::Drop;
    }
}

impl Drop for KnoteInner {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.release_slot();
        }
    }
}

/// Counted handle to a single registered interest.
///
/// * `clone()` (or [`retain`](Self::retain)) increments the reference count.
/// * dropping (or [`release`](Self::release)) decrements it; the decrement to
///   zero moves the storage onto the owner's reclamation queue.
///
/// A zero-count knote cannot be retained because there is no handle left to
/// clone.
pub struct Knote {
    inner: Option<Arc<KnoteInner>>,
}

impl Knote {
    /// Allocate a knote owned by `owner` with a reference count of one.
    ///
    /// Action flags (`EV_ADD`, `EV_DELETE`, `EV_ENABLE`, `EV_DISABLE`,
    /// `EV_RECEIPT`) are stripped from the stored descriptor. Fails with
    /// [`KnoteError::OutOfMemory`] when the owner's knote budget is spent.
    pub fn new(owner: &Arc<DispatchContext>, mut kev: KEvent) -> Result<Self, KnoteError> {
        owner.reserve_slot()?;
        kev.flags.remove(EventFlags::ACTIONS);

        let inner = Arc::new(KnoteInner {
            ident: kev.ident,
            filter: kev.filter,
            kev: Mutex::new(kev),
            state: AtomicU8::new(KnoteFlags::empty().bits()),
            refs: AtomicUsize::new(1),
            owner: Arc::downgrade(owner),
            owner_id: owner.id(),
        });
        trace!(ident = %kev.ident, filter = %kev.filter, context = %owner.id(), "allocated knote");

        Ok(Self { inner: Some(inner) })
    }

    fn shared(&self) -> &Arc<KnoteInner> {
        self.inner.as_ref().expect("knote handle used after release")
    }

    pub fn ident(&self) -> Ident {
        self.shared().ident
    }

    pub fn filter(&self) -> Filter {
        self.shared().filter
    }

    /// Snapshot of the current descriptor.
    pub fn event(&self) -> KEvent {
        *self.shared().kev.lock()
    }

    /// Mutate the descriptor in place (readiness delivery, data updates).
    ///
    /// The identifier and filter are restored afterwards; they are the
    /// registry key and never change. Only retirement stamps `Filter::Drop`,
    /// and no handle is left to call this by then.
    pub fn update_event<R>(&self, f: impl FnOnce(&mut KEvent) -> R) -> R {
        let inner = self.shared();
        let mut kev = inner.kev.lock();
        let result = f(&mut kev);
        kev.ident = inner.ident;
        kev.filter = inner.filter;
        result
    }

    pub fn flags(&self) -> KnoteFlags {
        self.shared().flags()
    }

    pub fn is_disabled(&self) -> bool {
        self.flags().contains(KnoteFlags::DISABLED)
    }

    pub fn is_deleted(&self) -> bool {
        self.shared().is_deleted()
    }

    /// Current reference count.
    pub fn ref_count(&self) -> usize {
        self.shared().refs.load(Ordering::Acquire)
    }

    /// Take an additional reference. Equivalent to `clone()`.
    pub fn retain(&self) -> Knote {
        self.clone()
    }

    /// Drop this reference. Equivalent to `drop(knote)`.
    pub fn release(self) {
        drop(self)
    }

    /// Identity comparison: true when both handles refer to the same storage.
    pub fn ptr_eq(&self, other: &Knote) -> bool {
        Arc::ptr_eq(self.shared(), other.shared())
    }

    /// The dispatch context this knote reclaims into, if it is still alive.
    pub fn owner(&self) -> Option<Arc<DispatchContext>> {
        self.shared().owner.upgrade()
    }

    pub fn owner_id(&self) -> ContextId {
        self.shared().owner_id
    }

    /// Set `DISABLED` and mirror it as `EV_DISABLE` in the descriptor.
    ///
    /// # Panics
    ///
    /// Panics if the knote is already disabled.
    pub fn mark_disabled(&self) {
        let inner = self.shared();
        let prev = inner.set_flags(KnoteFlags::DISABLED);
        assert!(
            !prev.contains(KnoteFlags::DISABLED),
            "knote {} ({}) is already disabled",
            inner.ident,
            inner.filter
        );
        let mut kev = inner.kev.lock();
        kev.flags.insert(EventFlags::DISABLE);
        kev.flags.remove(EventFlags::ENABLE);
    }

    /// Clear `DISABLED` and drop `EV_DISABLE` from the descriptor.
    ///
    /// # Panics
    ///
    /// Panics if the knote is not disabled.
    pub fn mark_enabled(&self) {
        let inner = self.shared();
        let prev = inner.clear_flags(KnoteFlags::DISABLED);
        assert!(
            prev.contains(KnoteFlags::DISABLED),
            "knote {} ({}) is not disabled",
            inner.ident,
            inner.filter
        );
        inner.kev.lock().flags.remove(EventFlags::DISABLE);
    }

    /// Claim the one-time `DELETED` transition. Returns `false` if another
    /// caller already claimed it.
    pub(crate) fn try_mark_deleted(&self) -> bool {
        let prev = self.shared().set_flags(KnoteFlags::DELETED);
        !prev.contains(KnoteFlags::DELETED)
    }

    /// Replace the descriptor after a successful modify. Identity fields and
    /// the disabled state are preserved.
    pub(crate) fn replace_event(&self, kev: KEvent) {
        let inner = self.shared();
        let mut current = inner.kev.lock();
        let mut flags = kev.flags.difference(EventFlags::ACTIONS);
        if current.flags.contains(EventFlags::DISABLE) {
            flags.insert(EventFlags::DISABLE);
        }
        *current = KEvent {
            ident: inner.ident,
            filter: inner.filter,
            flags,
            ..kev
        };
    }
}

impl Clone for Knote {
    fn clone(&self) -> Self {
        let inner = self.shared();
        let prev = inner.refs.fetch_add(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "retained knote {} with no references", inner.ident);
        Self {
            inner: Some(Arc::clone(inner)),
        }
    }
}

impl Drop for Knote {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };

        let prev = inner.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "released knote {} with no references", inner.ident);
        if prev > 1 {
            trace!(ident = %inner.ident, rc = prev - 1, "decrementing knote refcount");
            return;
        }

        inner.retire();
        match inner.owner.upgrade() {
            Some(owner) => owner.reclaim_queue().enqueue(inner),
            None => {
                debug!(ident = %inner.ident, context = %inner.owner_id, "owner context gone, freeing knote in place");
            }
        }
    }
}

impl Debug for Knote {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f
                .debug_struct("Knote")
                .field("ident", &inner.ident)
                .field("filter", &inner.filter)
                .field("flags", &inner.flags())
                .field("refs", &inner.refs.load(Ordering::Relaxed))
                .field("owner", &inner.owner_id)
                .finish(),
            None => f.write_str("Knote(<released>)"),
        }
    }
}
