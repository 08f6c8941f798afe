// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Bounded in-memory telemetry window for live charting.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{TelemetryRow, COMPARTMENT_COUNT};

/// One charted sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub timestamp: DateTime<Utc>,
    pub ph: [Option<f64>; COMPARTMENT_COUNT],
}

impl From<&TelemetryRow> for TelemetryPoint {
    fn from(row: &TelemetryRow) -> Self {
        TelemetryPoint {
            timestamp: row.timestamp,
            ph: row.ph,
        }
    }
}

/// Sliding window of the most recent samples, oldest dropped first.
///
/// This is a display buffer, not a queue: there is no backpressure, and a
/// sample pushed into a full window silently evicts the oldest one.
#[derive(Debug, Clone)]
pub struct TelemetryWindow {
    points: VecDeque<TelemetryPoint>,
    capacity: usize,
}

impl TelemetryWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Replace the contents with a historical tail (already ascending by
    /// timestamp). Only the most recent `capacity` rows are kept.
    pub fn seed<'a>(&mut self, rows: impl IntoIterator<Item = &'a TelemetryRow>) {
        self.points.clear();
        for row in rows {
            self.push(row.into());
        }
    }

    pub fn push(&mut self, point: TelemetryPoint) {
        self.points.push_back(point);
        if self.points.len() > self.capacity {
            self.points.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&TelemetryPoint> {
        self.points.back()
    }

    pub fn snapshot(&self) -> Vec<TelemetryPoint> {
        self.points.iter().copied().collect()
    }
}
