// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The [`FilterBackend`] capability contract.

use anyhow::Result;

use crate::event::KEvent;
use crate::knote::Knote;

/// Operations an event-type backend provides to arm and disarm the resource
/// behind a [`Knote`].
///
/// One implementation exists per supported [`Filter`](crate::Filter) and is
/// owned by that filter's [`KnoteRegistry`](crate::KnoteRegistry). The
/// registry decides which failures are propagated:
///
/// | call          | on failure                                           |
/// |---------------|------------------------------------------------------|
/// | `on_create`   | propagated, the knote is never inserted              |
/// | `on_modify`   | propagated, the descriptor is left unchanged         |
/// | `on_enable`   | propagated, the knote stays disabled                 |
/// | `on_disable`  | propagated, the knote stays enabled                  |
/// | `on_delete`   | logged, deletion proceeds (see `strict_delete`)      |
///
/// Implementations must be `Send + Sync`: every call may arrive from any
/// thread, and calls for different identifiers may run concurrently.
pub trait FilterBackend: Send + Sync {
    /// Arm the resource for a freshly created knote.
    fn on_create(&self, knote: &Knote) -> Result<()>;

    /// Re-arm an existing knote with a new descriptor. The knote still holds
    /// its previous descriptor while this runs.
    fn on_modify(&self, knote: &Knote, kev: &KEvent) -> Result<()>;

    /// Disarm the resource of a knote being deleted.
    fn on_delete(&self, knote: &Knote) -> Result<()>;

    /// Resume delivery for a disabled knote.
    fn on_enable(&self, knote: &Knote) -> Result<()>;

    /// Suspend delivery without deleting the knote.
    fn on_disable(&self, knote: &Knote) -> Result<()>;
}
