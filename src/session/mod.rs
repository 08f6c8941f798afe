// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Operator session coordination
//!
//! The coordinator is the single consumer of the bridge's event stream. It
//! folds events into [`SessionState`], reconciles the live stream's view of
//! "active experiment" against the store (the store wins), records
//! interval-aligned telemetry and events while a run is active, and gates
//! dosing/calibration on that lifecycle state.

mod calibration_session;
mod coordinator;
mod window;

pub use calibration_session::{BufferSlot, CalibrationSession};
pub use coordinator::{SessionCoordinator, SessionState};
pub use window::{TelemetryPoint, TelemetryWindow};

use thiserror::Error;

use crate::calibration::CalibrationError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SessionError {
    /// A lifecycle guard refused the operation; the message explains why.
    #[error("{0}")]
    Refused(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    /// The transport dropped a command the operation depends on.
    #[error("transport failure: {0}")]
    Transport(String),
}
