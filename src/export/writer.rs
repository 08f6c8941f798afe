// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Sectioned-CSV serialization of a [`Report`].
//!
//! The downloadable document format proper belongs to an external
//! collaborator; this writer produces the tabular content: summary sections
//! followed by one table each for measurements and logs, separated by blank
//! records.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::{ExportError, Report};
use crate::store::format_timestamp;

/// Serialize a report as a sectioned CSV document.
pub fn write_csv<W: Write>(report: &Report, out: W) -> Result<(), ExportError> {
    let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(out);

    for section in &report.sections {
        writer.write_record([section.title.as_str()])?;
        for field in &section.fields {
            writer.write_record([field.label.as_str(), field.value.as_str()])?;
        }
        writer.write_record([""])?;
    }

    writer.write_record(["Measurements"])?;
    writer.write_record([
        "Timestamp (UTC)",
        "Elapsed",
        "Compartment 1 pH",
        "Compartment 2 pH",
        "Compartment 3 pH",
    ])?;
    for row in &report.measurements {
        let ph: Vec<String> = row
            .ph
            .iter()
            .map(|v| v.map(|ph| format!("{:.2}", ph)).unwrap_or_default())
            .collect();
        writer.write_record([
            format_timestamp(row.timestamp).as_str(),
            row.elapsed.as_str(),
            ph[0].as_str(),
            ph[1].as_str(),
            ph[2].as_str(),
        ])?;
    }
    writer.write_record([""])?;

    writer.write_record(["Logs"])?;
    writer.write_record([
        "Timestamp (UTC)",
        "Elapsed",
        "Level",
        "Compartment",
        "Message",
    ])?;
    for row in &report.logs {
        let compartment = row
            .compartment
            .map(|c| c.to_string())
            .unwrap_or_else(|| "—".to_string());
        writer.write_record([
            format_timestamp(row.timestamp).as_str(),
            row.elapsed.as_str(),
            row.level.as_str(),
            compartment.as_str(),
            row.message.as_str(),
        ])?;
    }

    writer.flush().map_err(ExportError::Io)?;
    Ok(())
}

/// Write the report into `dir` under its deterministic name and return the
/// resulting path.
pub fn write_report_file(report: &Report, dir: &Path) -> Result<PathBuf, ExportError> {
    let path = dir.join(format!("{}.csv", report.file_base_name()));
    let file = File::create(&path)?;
    write_csv(report, file)?;
    Ok(path)
}
