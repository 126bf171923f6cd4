// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! `EVFILT_USER`: events raised by the application itself.
//!
//! A user event is triggered by modifying its knote with [`NOTE_TRIGGER`] in
//! `fflags`. The low 24 bits of `fflags` are application data, combined with
//! the stored value according to the `NOTE_FF*` control bits:
//!
//! | control       | effect on stored flags |
//! |---------------|------------------------|
//! | `NOTE_FFNOP`  | unchanged              |
//! | `NOTE_FFAND`  | `stored & new`         |
//! | `NOTE_FFOR`   | `stored \| new`        |
//! | `NOTE_FFCOPY` | `new`                  |

use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::trace;

use crate::backend::FilterBackend;
use crate::event::{EventFlags, Ident, KEvent};
use crate::knote::Knote;

/// Trigger the event.
pub const NOTE_TRIGGER: u32 = 0x0100_0000;
/// Ignore the input `fflags`.
pub const NOTE_FFNOP: u32 = 0x0000_0000;
/// AND the input `fflags` into the stored value.
pub const NOTE_FFAND: u32 = 0x4000_0000;
/// OR the input `fflags` into the stored value.
pub const NOTE_FFOR: u32 = 0x8000_0000;
/// Copy the input `fflags` over the stored value.
pub const NOTE_FFCOPY: u32 = 0xc000_0000;
/// Mask for the flag control bits.
pub const NOTE_FFCTRLMASK: u32 = 0xc000_0000;
/// Mask for the application-defined flag bits.
pub const NOTE_FFLAGSMASK: u32 = 0x00ff_ffff;

#[derive(Copy, Clone, Debug, Default)]
struct UserState {
    fflags: u32,
    triggered: bool,
    enabled: bool,
}

impl UserState {
    fn apply(&mut self, fflags: u32) {
        let value = fflags & NOTE_FFLAGSMASK;
        match fflags & NOTE_FFCTRLMASK {
            NOTE_FFAND => self.fflags &= value,
            NOTE_FFOR => self.fflags |= value,
            NOTE_FFCOPY => self.fflags = value,
            _ => {}
        }
        if fflags & NOTE_TRIGGER != 0 {
            self.triggered = true;
        }
    }
}

/// Software-only backend for [`Filter::User`](crate::Filter::User).
#[derive(Debug, Default)]
pub struct UserFilter {
    events: Mutex<HashMap<Ident, UserState>>,
}

impl UserFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if `ident` has been triggered and not yet delivered with `EV_CLEAR`.
    pub fn is_triggered(&self, ident: impl Into<Ident>) -> bool {
        self.events
            .lock()
            .get(&ident.into())
            .is_some_and(|state| state.triggered)
    }

    /// Stored application flags for `ident`.
    pub fn fflags(&self, ident: impl Into<Ident>) -> Option<u32> {
        self.events.lock().get(&ident.into()).map(|state| state.fflags)
    }

    /// Deliver `knote` if it is triggered and enabled.
    ///
    /// The returned descriptor carries the stored application flags. A knote
    /// armed with `EV_CLEAR` has its trigger and flags reset by delivery.
    pub fn take_ready(&self, knote: &Knote) -> Option<KEvent> {
        if knote.is_deleted() {
            return None;
        }

        let mut events = self.events.lock();
        let state = events.get_mut(&knote.ident())?;
        if !state.triggered || !state.enabled {
            return None;
        }

        let mut kev = knote.event();
        kev.fflags = state.fflags;
        if kev.flags.contains(EventFlags::CLEAR) {
            state.triggered = false;
            state.fflags = 0;
        }
        trace!(ident = %kev.ident, fflags = kev.fflags, "user event delivered");
        Some(kev)
    }

    fn with_state<R>(&self, knote: &Knote, f: impl FnOnce(&mut UserState) -> R) -> Result<R> {
        let mut events = self.events.lock();
        let state = events
            .get_mut(&knote.ident())
            .ok_or_else(|| anyhow!("no user event armed for ident {}", knote.ident()))?;
        Ok(f(state))
    }
}

impl FilterBackend for UserFilter {
    fn on_create(&self, knote: &Knote) -> Result<()> {
        let mut state = UserState {
            enabled: true,
            ..Default::default()
        };
        state.apply(knote.event().fflags);
        self.events.lock().insert(knote.ident(), state);
        Ok(())
    }

    fn on_modify(&self, knote: &Knote, kev: &KEvent) -> Result<()> {
        self.with_state(knote, |state| state.apply(kev.fflags))
    }

    fn on_delete(&self, knote: &Knote) -> Result<()> {
        self.events
            .lock()
            .remove(&knote.ident())
            .map(|_| ())
            .ok_or_else(|| anyhow!("no user event armed for ident {}", knote.ident()))
    }

    fn on_enable(&self, knote: &Knote) -> Result<()> {
        self.with_state(knote, |state| state.enabled = true)
    }

    fn on_disable(&self, knote: &Knote) -> Result<()> {
        self.with_state(knote, |state| state.enabled = false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::DispatchContext;
    use crate::event::Filter;
    use crate::registry::KnoteRegistry;
    use rstest::rstest;
    use std::sync::Arc;

    fn setup() -> (Arc<DispatchContext>, Arc<UserFilter>, Arc<KnoteRegistry>) {
        let ctx = DispatchContext::new();
        let user = Arc::new(UserFilter::new());
        let registry = ctx.register_filter(Filter::User, user.clone());
        (ctx, user, registry)
    }

    fn user_event(ident: usize, flags: EventFlags) -> KEvent {
        KEvent::new(ident, Filter::User, flags)
    }

    #[test]
    fn trigger_then_deliver() {
        let (ctx, user, registry) = setup();
        let knote = registry.create(&ctx, user_event(1, EventFlags::ADD)).unwrap();
        assert!(!user.is_triggered(1usize));
        assert!(user.take_ready(&knote).is_none());

        registry
            .modify(&knote, user_event(1, EventFlags::empty()).with_fflags(NOTE_TRIGGER))
            .unwrap();
        assert!(user.is_triggered(1usize));

        let kev = user.take_ready(&knote).unwrap();
        assert_eq!(kev.ident, Ident::new(1));
        // without EV_CLEAR the event stays ready
        assert!(user.take_ready(&knote).is_some());
    }

    #[test]
    fn clear_resets_on_delivery() {
        let (ctx, user, registry) = setup();
        let kev = user_event(2, EventFlags::ADD | EventFlags::CLEAR)
            .with_fflags(NOTE_FFCOPY | NOTE_TRIGGER | 0x11);
        let knote = registry.create(&ctx, kev).unwrap();

        assert_eq!(user.take_ready(&knote).unwrap().fflags, 0x11);
        assert!(!user.is_triggered(2usize));
        assert_eq!(user.fflags(2usize), Some(0));
        assert!(user.take_ready(&knote).is_none());
    }

    #[rstest]
    #[case::nop(NOTE_FFNOP | 0x0f, 0xf0)]
    #[case::and(NOTE_FFAND | 0x3c, 0x30)]
    #[case::or(NOTE_FFOR | 0x0f, 0xff)]
    #[case::copy(NOTE_FFCOPY | 0x0f, 0x0f)]
    fn flag_control(#[case] fflags: u32, #[case] expected: u32) {
        let (ctx, user, registry) = setup();
        let knote = registry
            .create(&ctx, user_event(3, EventFlags::ADD).with_fflags(NOTE_FFCOPY | 0xf0))
            .unwrap();

        registry
            .modify(&knote, user_event(3, EventFlags::empty()).with_fflags(fflags))
            .unwrap();
        assert_eq!(user.fflags(3usize), Some(expected));
    }

    #[test]
    fn disabled_event_is_not_delivered() {
        let (ctx, user, registry) = setup();
        let knote = registry
            .create(&ctx, user_event(4, EventFlags::ADD).with_fflags(NOTE_TRIGGER))
            .unwrap();

        registry.disable(&knote).unwrap();
        assert!(user.is_triggered(4usize));
        assert!(user.take_ready(&knote).is_none());

        registry.enable(&knote).unwrap();
        assert!(user.take_ready(&knote).is_some());
    }

    #[test]
    fn delete_forgets_the_event() {
        let (ctx, user, registry) = setup();
        let knote = registry
            .create(&ctx, user_event(5, EventFlags::ADD).with_fflags(NOTE_TRIGGER))
            .unwrap();

        registry.delete(&knote).unwrap();
        assert!(!user.is_triggered(5usize));
        assert!(user.fflags(5usize).is_none());
        assert!(user.take_ready(&knote).is_none());
    }

    #[test]
    fn unknown_ident_is_a_backend_error() {
        let ctx = DispatchContext::new();
        let user = UserFilter::new();
        let stray = Knote::new(&ctx, user_event(6, EventFlags::ADD)).unwrap();

        assert!(user.on_modify(&stray, &stray.event()).is_err());
        assert!(user.on_enable(&stray).is_err());
        assert!(user.on_disable(&stray).is_err());
        assert!(user.on_delete(&stray).is_err());
    }
}
