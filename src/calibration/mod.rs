// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Probe calibration engine
//!
//! Two-point linear calibration converting a compartment's raw sensor signal
//! to pH, plus the freshness report that decides whether probes must be
//! recalibrated before a run.

use chrono::{DateTime, Duration, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{SqliteStore, COMPARTMENT_COUNT};

/// A compartment's calibration is stale once its newest record is older than
/// this window (or no record exists at all).
pub const MAX_CALIBRATION_AGE_HOURS: i64 = 48;

#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    /// Both buffers read the same pH; the slope denominator would be zero.
    #[error("buffer pH values must be different")]
    EqualBufferPh,
    /// A buffer voltage was never locked from the live raw signal.
    #[error("buffer {0} voltage is not locked")]
    VoltageNotLocked(u8),
    /// No raw reading has arrived yet, so there is nothing to lock.
    #[error("no raw signal received yet")]
    NoSignal,
}

/// The (slope, intercept) pair converting raw signal to pH.
///
/// `intercept` is the raw-signal value predicted at pH 7.0, not at pH 0,
/// a reference-point choice tied to the physical calibration procedure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTransform {
    pub slope: f64,
    pub intercept: f64,
}

impl CalibrationTransform {
    /// Compute the transform from two locked buffer readings.
    pub fn two_point(
        ph1: f64,
        v1: f64,
        ph2: f64,
        v2: f64,
    ) -> Result<CalibrationTransform, CalibrationError> {
        if ph1 == ph2 {
            return Err(CalibrationError::EqualBufferPh);
        }
        let slope = (v2 - v1) / (ph2 - ph1);
        let intercept = v1 - slope * (ph1 - 7.0);
        Ok(CalibrationTransform { slope, intercept })
    }

    /// Invert the transform: the pH a raw reading corresponds to.
    ///
    /// Returns `None` for a flat transform (identical buffer voltages),
    /// which cannot resolve any pH.
    pub fn ph_from_raw(&self, raw: f64) -> Option<f64> {
        if self.slope == 0.0 {
            return None;
        }
        Some(7.0 + (raw - self.intercept) / self.slope)
    }
}

/// Freshness of one compartment's calibration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompartmentCalibration {
    pub compartment: u8,
    pub calibrated_at: Option<DateTime<Utc>>,
    pub expired: bool,
}

/// Aggregate freshness report across all compartments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationStatus {
    pub requires_calibration: bool,
    pub message: String,
    pub details: Vec<CompartmentCalibration>,
}

/// Compute the freshness report relative to `now`.
///
/// Always evaluated at query time against the caller's clock, never cached,
/// so a report taken an hour later can flip a compartment to expired. A store
/// failure degrades to "requires calibration" rather than a spurious all-clear.
pub fn calibration_status(store: &SqliteStore, now: DateTime<Utc>) -> CalibrationStatus {
    let max_age = Duration::hours(MAX_CALIBRATION_AGE_HOURS);
    let mut details = Vec::with_capacity(COMPARTMENT_COUNT);
    let mut requires_calibration = false;

    for compartment in 1..=COMPARTMENT_COUNT as u8 {
        match store.latest_calibration(compartment) {
            Ok(Some(record)) => {
                let expired = now - record.calibrated_at > max_age;
                requires_calibration |= expired;
                details.push(CompartmentCalibration {
                    compartment,
                    calibrated_at: Some(record.calibrated_at),
                    expired,
                });
            }
            Ok(None) => {
                requires_calibration = true;
                details.push(CompartmentCalibration {
                    compartment,
                    calibrated_at: None,
                    expired: true,
                });
            }
            Err(err) => {
                error!(
                    "Failed to read calibration for compartment {}: {}",
                    compartment, err
                );
                return CalibrationStatus {
                    requires_calibration: true,
                    message: "Database error checking calibration.".to_string(),
                    details: Vec::new(),
                };
            }
        }
    }

    let message = if requires_calibration {
        format!(
            "Calibration is missing or older than {} hours. Please recalibrate probes.",
            MAX_CALIBRATION_AGE_HOURS
        )
    } else {
        format!(
            "All sensors calibrated and within the {}h limit.",
            MAX_CALIBRATION_AGE_HOURS
        )
    };

    CalibrationStatus {
        requires_calibration,
        message,
        details,
    }
}
