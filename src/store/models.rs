// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Row types owned by the experiment lifecycle store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StoreError;

/// Number of reactor compartments (and pH probes, and dosing pumps).
pub const COMPARTMENT_COUNT: usize = 3;

/// A research project grouping one or more experiments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub researcher_name: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle status of an experiment.
///
/// An experiment never returns to `Active` once completed; the store enforces
/// that at most one experiment is `Active` at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentStatus {
    Active,
    Completed,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Active => "active",
            ExperimentStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "active" => Ok(ExperimentStatus::Active),
            "completed" => Ok(ExperimentStatus::Completed),
            other => Err(StoreError::Validation(format!(
                "unknown experiment status '{}'",
                other
            ))),
        }
    }
}

/// Target pH band for a single compartment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PhRange {
    pub min: f64,
    pub max: f64,
}

/// Operator-supplied parameters for a new experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentConfig {
    pub name: String,
    /// Durable-recording cadence in minutes.
    pub measurement_interval_mins: u32,
    /// Per-compartment target pH bands, indexed by compartment - 1.
    pub thresholds: [PhRange; COMPARTMENT_COUNT],
    pub max_pump_time_sec: u32,
    pub mixing_cooldown_sec: u32,
    pub manual_dose_steps: u32,
}

impl ExperimentConfig {
    /// Reject missing or contradictory fields before any mutation happens.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::Validation(
                "experiment name must not be empty".into(),
            ));
        }
        if self.measurement_interval_mins == 0 {
            return Err(StoreError::Validation(
                "measurement interval must be at least one minute".into(),
            ));
        }
        for (i, range) in self.thresholds.iter().enumerate() {
            if range.min > range.max {
                return Err(StoreError::Validation(format!(
                    "compartment {} pH minimum {} exceeds maximum {}",
                    i + 1,
                    range.min,
                    range.max
                )));
            }
        }
        Ok(())
    }
}

/// A stored experiment with its configuration and lifecycle status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub measurement_interval_mins: u32,
    pub thresholds: [PhRange; COMPARTMENT_COUNT],
    pub max_pump_time_sec: u32,
    pub mixing_cooldown_sec: u32,
    pub manual_dose_steps: u32,
    pub status: ExperimentStatus,
    pub created_at: DateTime<Utc>,
}

/// One recorded sample tick. `ph[i]` is compartment `i + 1`; a probe that
/// produced no reading for the tick stays `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryRow {
    pub id: String,
    pub experiment_id: String,
    pub timestamp: DateTime<Utc>,
    pub ph: [Option<f64>; COMPARTMENT_COUNT],
}

/// Severity of an experiment log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(StoreError::Validation(format!(
                "unknown log level '{}'",
                other
            ))),
        }
    }
}

/// Append-only audit trail entry correlated to an experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentLogRow {
    pub id: String,
    pub experiment_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// 1-based compartment when the event concerns a single compartment.
    pub compartment: Option<u8>,
}

/// One saved two-point calibration. The current calibration for a compartment
/// is its most recent record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationRecord {
    pub id: String,
    pub compartment: u8,
    pub slope: f64,
    pub intercept: f64,
    pub researcher: String,
    pub calibrated_at: DateTime<Utc>,
}

/// How a new experiment resolves its owning project.
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectRef {
    Existing(String),
    New { name: String, researcher: String },
}

/// Ids produced by a successful experiment start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartedExperiment {
    pub project_id: String,
    pub experiment_id: String,
}
