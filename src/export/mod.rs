// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Experiment export reporter
//!
//! Assembles a point-in-time snapshot of one experiment (metadata joined
//! with its project, the full ordered telemetry history and the full ordered
//! event log) into a structured tabular report. Reads only from the store;
//! the live stream is never involved.

mod report;
mod writer;

pub use report::{
    build_report, elapsed_label, LogRow, MeasurementRow, Report, SummaryField, SummarySection,
};
pub use writer::{write_csv, write_report_file};

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("experiment not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("export serialization failed: {0}")]
    Serialize(String),
    #[error("export I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl From<csv::Error> for ExportError {
    fn from(err: csv::Error) -> Self {
        ExportError::Serialize(err.to_string())
    }
}
