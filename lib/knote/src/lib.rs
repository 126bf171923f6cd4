// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

#![doc = include_str!("../README.md")]

// Event descriptor types
mod event;

// Registrations and their lifecycle
mod backend;
mod context;
mod knote;
mod reclaim;
mod registry;

mod config;
mod error;

pub mod filters;
pub mod logging;

#[cfg(test)]
pub(crate) mod testing;

// ── Re-exports ───────────────────────────────────────────────────────

pub use backend::FilterBackend;
pub use config::{ConfigError, KnoteConfig};
pub use context::{ContextId, DispatchContext};
pub use error::{BackendOp, KnoteError};
pub use event::{EventFlags, Filter, Ident, KEvent};
pub use filters::UserFilter;
pub use knote::{Knote, KnoteFlags};
pub use reclaim::{ReclaimQueue, ReclaimStats};
pub use registry::KnoteRegistry;
