// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Deferred reclamation of released knotes.
//!
//! Producers are arbitrary threads performing the last release of a knote;
//! the single consumer is the owning [`DispatchContext`](crate::DispatchContext)
//! draining between dispatch cycles.
//!
//! ```text
//! release ──► [SegQueue] ──► drain (owner only)
//! release ──►     ▲
//! ```

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, trace};

use crate::knote::KnoteInner;

/// Point-in-time reclamation counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReclaimStats {
    /// Knotes handed to the queue since the context was created.
    pub enqueued: u64,
    /// Knotes freed by [`drain`](ReclaimQueue::drain).
    pub freed: u64,
    /// Knotes waiting for the next drain (approximate under concurrency).
    pub pending: usize,
}

/// Multi-producer, single-consumer holding area for zero-reference knotes.
pub struct ReclaimQueue {
    queue: SegQueue<Arc<KnoteInner>>,
    drain_guard: Mutex<()>,
    enqueued: AtomicU64,
    freed: AtomicU64,
}

impl ReclaimQueue {
    pub(crate) fn new() -> Self {
        Self {
            queue: SegQueue::new(),
            drain_guard: Mutex::new(()),
            enqueued: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        }
    }

    /// Append a knote whose reference count just reached zero.
    pub(crate) fn enqueue(&self, knote: Arc<KnoteInner>) {
        debug_assert!(knote.is_deleted(), "reclaiming live knote {}", knote.ident());
        debug!(ident = %knote.ident(), filter = %knote.filter(), "freeing knote (delayed)");
        self.queue.push(knote);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Free every knote currently queued and return how many were freed.
    ///
    /// Only one drain runs at a time; a concurrent caller returns `0`
    /// immediately and leaves the work to the drain in progress.
    pub(crate) fn drain(&self) -> usize {
        let Some(_guard) = self.drain_guard.try_lock() else {
            trace!("reclaim drain already in progress");
            return 0;
        };

        let mut freed = 0;
        while let Some(knote) = self.queue.pop() {
            match Arc::try_unwrap(knote) {
                Ok(knote) => {
                    trace!(ident = %knote.ident(), "knote freed");
                    drop(knote);
                    freed += 1;
                }
                Err(knote) => {
                    error!(
                        ident = %knote.ident(),
                        strong = Arc::strong_count(&knote),
                        "reclaimed knote is still shared"
                    );
                }
            }
        }

        if freed > 0 {
            self.freed.fetch_add(freed as u64, Ordering::Relaxed);
            debug!(freed, "drained reclamation queue");
        }
        freed
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> ReclaimStats {
        ReclaimStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
            pending: self.queue.len(),
        }
    }
}

impl Default for ReclaimQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DispatchContext;
    use crate::event::{EventFlags, Filter, KEvent};
    use crate::knote::Knote;
    use std::sync::Barrier;
    use std::thread;

    fn release_knotes(ctx: &Arc<DispatchContext>, range: std::ops::Range<usize>) {
        for ident in range {
            let kev = KEvent::new(ident, Filter::Timer, EventFlags::ADD);
            drop(Knote::new(ctx, kev).unwrap());
        }
    }

    #[test]
    fn drain_frees_everything_queued() {
        let ctx = DispatchContext::new();
        release_knotes(&ctx, 0..5);

        let queue = ctx.reclaim_queue();
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.drain(), 5);
        assert!(queue.is_empty());
        assert_eq!(
            queue.stats(),
            ReclaimStats {
                enqueued: 5,
                freed: 5,
                pending: 0
            }
        );
        assert_eq!(ctx.live_knotes(), 0);
    }

    #[test]
    fn concurrent_drain_is_a_no_op() {
        let ctx = DispatchContext::new();
        release_knotes(&ctx, 0..3);

        let queue = ctx.reclaim_queue();
        {
            let _held = queue.drain_guard.lock();
            assert_eq!(queue.drain(), 0);
            assert_eq!(queue.len(), 3);
        }
        assert_eq!(queue.drain(), 3);
    }

    #[test]
    fn many_producers_one_consumer() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 250;

        let ctx = DispatchContext::new();
        let barrier = Arc::new(Barrier::new(THREADS + 1));

        let producers: Vec<_> = (0..THREADS)
            .map(|t| {
                let ctx = Arc::clone(&ctx);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    release_knotes(&ctx, t * PER_THREAD..(t + 1) * PER_THREAD);
                })
            })
            .collect();

        barrier.wait();
        let mut freed = 0;
        while producers.iter().any(|p| !p.is_finished()) {
            freed += ctx.drain_reclaimed();
            thread::yield_now();
        }
        for producer in producers {
            producer.join().unwrap();
        }
        freed += ctx.drain_reclaimed();

        assert_eq!(freed, THREADS * PER_THREAD);
        assert_eq!(ctx.reclaim_stats().enqueued, (THREADS * PER_THREAD) as u64);
        assert_eq!(ctx.reclaim_stats().freed, (THREADS * PER_THREAD) as u64);
    }
}
