// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Operator identity

use serde::{Deserialize, Serialize};

/// Display name recorded on calibrations and other audit fields. There is no
/// authentication behind this; it is a locally-configured label.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub display_name: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            display_name: "Unknown".to_string(),
        }
    }
}
