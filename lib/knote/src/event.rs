// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Readiness-event descriptor types carried by every [`Knote`](crate::Knote).
//!
//! Only [`Ident`] and [`Filter`] take part in registry ordering and lookup;
//! the remaining [`KEvent`] fields are opaque payload exchanged between the
//! caller and the filter backend.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

use crate::error::KnoteError;

/// Opaque resource handle (descriptor number, timer id, signal number, ...).
///
/// The canonical representation is the big-endian encoding of the handle, so
/// byte-wise comparison of [`to_bytes`](Self::to_bytes) and the derived
/// numeric ordering agree.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ident(usize);

impl Ident {
    /// Wrap a raw handle.
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Return the raw handle.
    pub const fn raw(&self) -> usize {
        self.0
    }

    /// Canonical byte representation used for ordering.
    pub fn to_bytes(&self) -> [u8; std::mem::size_of::<usize>()] {
        self.0.to_be_bytes()
    }
}

impl From<usize> for Ident {
    fn from(raw: usize) -> Self {
        Self(raw)
    }
}

impl Display for Ident {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event filter type. Each filter is served by exactly one registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    Read,
    Write,
    Aio,
    Vnode,
    Proc,
    Signal,
    Timer,
    Netdev,
    Fs,
    Lio,
    User,
    /// Internal marker stamped on a knote once it is queued for reclamation.
    Drop,
}

impl Filter {
    /// Every filter a backend can be registered for.
    pub const ALL: [Filter; 11] = [
        Filter::Read,
        Filter::Write,
        Filter::Aio,
        Filter::Vnode,
        Filter::Proc,
        Filter::Signal,
        Filter::Timer,
        Filter::Netdev,
        Filter::Fs,
        Filter::Lio,
        Filter::User,
    ];

    /// Raw `EVFILT_*` code.
    pub const fn as_raw(&self) -> i16 {
        match self {
            Filter::Read => -1,
            Filter::Write => -2,
            Filter::Aio => -3,
            Filter::Vnode => -4,
            Filter::Proc => -5,
            Filter::Signal => -6,
            Filter::Timer => -7,
            Filter::Netdev => -8,
            Filter::Fs => -9,
            Filter::Lio => -10,
            Filter::User => -11,
            Filter::Drop => -12,
        }
    }

    /// Parse a raw `EVFILT_*` code.
    pub fn from_raw(raw: i16) -> Result<Self, KnoteError> {
        match raw {
            -1 => Ok(Filter::Read),
            -2 => Ok(Filter::Write),
            -3 => Ok(Filter::Aio),
            -4 => Ok(Filter::Vnode),
            -5 => Ok(Filter::Proc),
            -6 => Ok(Filter::Signal),
            -7 => Ok(Filter::Timer),
            -8 => Ok(Filter::Netdev),
            -9 => Ok(Filter::Fs),
            -10 => Ok(Filter::Lio),
            -11 => Ok(Filter::User),
            -12 => Ok(Filter::Drop),
            other => Err(KnoteError::UnknownFilter(other)),
        }
    }
}

impl TryFrom<i16> for Filter {
    type Error = KnoteError;

    fn try_from(raw: i16) -> Result<Self, Self::Error> {
        Filter::from_raw(raw)
    }
}

impl Display for Filter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Filter::Read => "EVFILT_READ",
            Filter::Write => "EVFILT_WRITE",
            Filter::Aio => "EVFILT_AIO",
            Filter::Vnode => "EVFILT_VNODE",
            Filter::Proc => "EVFILT_PROC",
            Filter::Signal => "EVFILT_SIGNAL",
            Filter::Timer => "EVFILT_TIMER",
            Filter::Netdev => "EVFILT_NETDEV",
            Filter::Fs => "EVFILT_FS",
            Filter::Lio => "EVFILT_LIO",
            Filter::User => "EVFILT_USER",
            Filter::Drop => "EVFILT_DROP",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// `EV_*` action and status flags.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct EventFlags: u16 {
        const ADD = 0x0001;
        const DELETE = 0x0002;
        const ENABLE = 0x0004;
        const DISABLE = 0x0008;
        const ONESHOT = 0x0010;
        const CLEAR = 0x0020;
        const RECEIPT = 0x0040;
        const DISPATCH = 0x0080;
        const EOF = 0x8000;
        const ERROR = 0x4000;
    }
}

impl EventFlags {
    /// Flags that request an action rather than describe a knote.
    pub const ACTIONS: EventFlags = EventFlags::ADD
        .union(EventFlags::DELETE)
        .union(EventFlags::ENABLE)
        .union(EventFlags::DISABLE)
        .union(EventFlags::RECEIPT);
}

/// The readiness-event descriptor exchanged between caller and backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KEvent {
    pub ident: Ident,
    pub filter: Filter,
    pub flags: EventFlags,
    pub fflags: u32,
    pub data: i64,
    pub udata: u64,
}

impl KEvent {
    pub fn new(ident: impl Into<Ident>, filter: Filter, flags: EventFlags) -> Self {
        Self {
            ident: ident.into(),
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: 0,
        }
    }

    pub fn with_fflags(mut self, fflags: u32) -> Self {
        self.fflags = fflags;
        self
    }

    pub fn with_data(mut self, data: i64) -> Self {
        self.data = data;
        self
    }

    pub fn with_udata(mut self, udata: u64) -> Self {
        self.udata = udata;
        self
    }
}

impl Display for KEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kevent(ident={}, filter={}, flags={:#06x}, fflags={:#010x}, data={}, udata={:#x})",
            self.ident,
            self.filter,
            self.flags.bits(),
            self.fflags,
            self.data,
            self.udata
        )
    }
}
