// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Experiment lifecycle store
//!
//! This module exclusively owns durable mutation of projects, experiments,
//! telemetry, experiment logs and calibration records. It enforces the
//! single-active-experiment invariant and performs cascading deletes as
//! explicit multi-step transactions.
//!
//! The live telemetry path must never be taken down by a persistence failure:
//! callers on that path log a [`StoreError`] and keep consuming the stream.

mod models;
mod sqlite;

pub use models::{
    CalibrationRecord, Experiment, ExperimentConfig, ExperimentLogRow, ExperimentStatus, LogLevel,
    PhRange, Project, ProjectRef, StartedExperiment, TelemetryRow, COMPARTMENT_COUNT,
};
pub use sqlite::SqliteStore;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

/// Errors surfaced at the store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Missing or contradictory input; rejected before any mutation.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// I/O failure against the durable store.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Persistence(err.to_string())
    }
}

/// Format used for every timestamp column.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render `ts` the way the store persists timestamps.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp, treating naive text as UTC.
///
/// SQLite's `CURRENT_TIMESTAMP` and our own writes both produce UTC text
/// without a timezone marker. Reinterpreting that text in local time would
/// silently skew every elapsed-time computation, so the absence of a marker
/// always means UTC here.
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StoreError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .map(|naive| naive.and_utc())
        .map_err(|err| StoreError::Validation(format!("bad timestamp '{}': {}", text, err)))
}
