// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Test helpers.

use anyhow::{Result, bail};
use parking_lot::Mutex;
use std::collections::HashSet;

use crate::backend::FilterBackend;
use crate::error::BackendOp;
use crate::event::{Ident, KEvent};
use crate::knote::Knote;

/// Backend that records every call and fails the operations it is told to.
#[derive(Debug, Default)]
pub(crate) struct RecordingBackend {
    calls: Mutex<Vec<(BackendOp, Ident)>>,
    failing: Mutex<HashSet<BackendOp>>,
}

impl RecordingBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `op` call fail.
    pub(crate) fn fail(&self, op: BackendOp) {
        self.failing.lock().insert(op);
    }

    pub(crate) fn calls(&self) -> Vec<(BackendOp, Ident)> {
        self.calls.lock().clone()
    }

    pub(crate) fn count(&self, op: BackendOp) -> usize {
        self.calls.lock().iter().filter(|(o, _)| *o == op).count()
    }

    fn record(&self, op: BackendOp, knote: &Knote) -> Result<()> {
        self.calls.lock().push((op, knote.ident()));
        if self.failing.lock().contains(&op) {
            bail!("injected {op} failure");
        }
        Ok(())
    }
}

impl FilterBackend for RecordingBackend {
    fn on_create(&self, knote: &Knote) -> Result<()> {
        self.record(BackendOp::Create, knote)
    }

    fn on_modify(&self, knote: &Knote, _kev: &KEvent) -> Result<()> {
        self.record(BackendOp::Modify, knote)
    }

    fn on_delete(&self, knote: &Knote) -> Result<()> {
        self.record(BackendOp::Delete, knote)
    }

    fn on_enable(&self, knote: &Knote) -> Result<()> {
        self.record(BackendOp::Enable, knote)
    }

    fn on_disable(&self, knote: &Knote) -> Result<()> {
        self.record(BackendOp::Disable, knote)
    }
}
