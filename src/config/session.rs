// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Live session tuning

use serde::{Deserialize, Serialize};

/// Bounds and defaults for the operator session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Samples kept in the live chart window. The window is seeded with the
    /// same number of historical rows on attach.
    pub telemetry_window: usize,

    /// Entries kept in the rolling operator event log.
    pub event_log_window: usize,

    /// Manual dose step count used while no experiment is active.
    pub default_dose_steps: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            telemetry_window: 50,
            event_log_window: 100,
            default_dose_steps: 50,
        }
    }
}
