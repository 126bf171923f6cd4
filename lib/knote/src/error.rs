// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{self, Display, Formatter};

use crate::event::{Filter, Ident};

/// Capability-contract operation that a [`FilterBackend`](crate::FilterBackend)
/// was asked to perform.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Create,
    Modify,
    Delete,
    Enable,
    Disable,
}

impl Display for BackendOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BackendOp::Create => write!(f, "create"),
            BackendOp::Modify => write!(f, "modify"),
            BackendOp::Delete => write!(f, "delete"),
            BackendOp::Enable => write!(f, "enable"),
            BackendOp::Disable => write!(f, "disable"),
        }
    }
}

/// Errors returned by knote and registry operations.
#[derive(Debug, thiserror::Error)]
pub enum KnoteError {
    /// The owning context's knote budget is exhausted.
    #[error("Knote allocation failed: budget of {limit} knotes exhausted")]
    OutOfMemory { limit: usize },

    /// The knote was already deleted; the registry is unchanged.
    #[error("Double deletion detected for knote {ident}")]
    DoubleDeletion { ident: Ident },

    /// The knote was deleted and can no longer be mutated.
    #[error("Knote {ident} has been deleted")]
    Deleted { ident: Ident },

    /// A capability-contract call failed.
    #[error("Backend {op} failed for {filter} knote {ident}: {source}")]
    BackendOperationFailed {
        op: BackendOp,
        filter: Filter,
        ident: Ident,
        #[source]
        source: anyhow::Error,
    },

    /// A descriptor for one filter was handed to another filter's registry.
    #[error("Filter mismatch: registry serves {expected}, descriptor names {actual}")]
    FilterMismatch { expected: Filter, actual: Filter },

    /// No registry is registered for the filter.
    #[error("No registry registered for {0}")]
    FilterNotRegistered(Filter),

    /// A raw filter code did not name a known filter.
    #[error("Unknown filter code {0}")]
    UnknownFilter(i16),
}

impl KnoteError {
    pub(crate) fn backend(op: BackendOp, filter: Filter, ident: Ident, source: anyhow::Error) -> Self {
        KnoteError::BackendOperationFailed {
            op,
            filter,
            ident,
            source,
        }
    }

    /// True for [`KnoteError::DoubleDeletion`].
    pub fn is_double_deletion(&self) -> bool {
        matches!(self, KnoteError::DoubleDeletion { .. })
    }
}
