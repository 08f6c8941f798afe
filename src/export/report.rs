// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Report assembly: a pure function of persisted state.

use chrono::{DateTime, Utc};

use super::ExportError;
use crate::store::{
    format_timestamp, Experiment, LogLevel, Project, SqliteStore, COMPARTMENT_COUNT,
};

/// One label/value line of a summary section.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryField {
    pub label: String,
    pub value: String,
}

/// A titled block of summary fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SummarySection {
    pub title: String,
    pub fields: Vec<SummaryField>,
}

/// One telemetry row with its elapsed time since experiment start.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRow {
    pub timestamp: DateTime<Utc>,
    pub elapsed: String,
    pub ph: [Option<f64>; COMPARTMENT_COUNT],
}

/// One event-log row with its elapsed time since experiment start.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRow {
    pub timestamp: DateTime<Utc>,
    pub elapsed: String,
    pub level: LogLevel,
    pub compartment: Option<u8>,
    pub message: String,
}

/// The assembled export document.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub experiment_id: String,
    pub experiment_name: String,
    pub sections: Vec<SummarySection>,
    pub measurements: Vec<MeasurementRow>,
    pub logs: Vec<LogRow>,
}

impl Report {
    /// Deterministic file base name: sanitized experiment name plus a short
    /// id prefix.
    pub fn file_base_name(&self) -> String {
        let sanitized: String = self
            .experiment_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let id_prefix: String = self.experiment_id.chars().take(8).collect();
        format!("ReactorExport_{}_{}", sanitized, id_prefix)
    }
}

/// Human-readable duration between experiment start and a row timestamp.
/// Clamped at "0s" so clock skew can never render a negative elapsed value.
pub fn elapsed_label(started_at: DateTime<Utc>, timestamp: DateTime<Utc>) -> String {
    let total_sec = (timestamp - started_at).num_seconds();
    if total_sec <= 0 {
        return "0s".to_string();
    }
    let hours = total_sec / 3600;
    let minutes = (total_sec % 3600) / 60;
    let seconds = total_sec % 60;
    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{}s", seconds));
    }
    parts.join(" ")
}

/// Build the export snapshot for one experiment.
///
/// `exported_at` is passed in so the report is a pure function of its inputs.
/// An experiment with zero telemetry rows and zero logs still yields a valid
/// report carrying only summary metadata.
pub fn build_report(
    store: &SqliteStore,
    experiment_id: &str,
    exported_at: DateTime<Utc>,
) -> Result<Report, ExportError> {
    let experiment = store
        .experiment(experiment_id)?
        .ok_or_else(|| ExportError::NotFound(experiment_id.to_string()))?;
    let project = store.project(&experiment.project_id)?;
    let telemetry = store.telemetry_for_experiment(experiment_id)?;
    let logs = store.logs_for_experiment(experiment_id)?;

    let started_at = experiment.created_at;

    let measurements: Vec<MeasurementRow> = telemetry
        .iter()
        .map(|row| MeasurementRow {
            timestamp: row.timestamp,
            elapsed: elapsed_label(started_at, row.timestamp),
            ph: row.ph,
        })
        .collect();

    let log_rows: Vec<LogRow> = logs
        .iter()
        .map(|row| LogRow {
            timestamp: row.timestamp,
            elapsed: elapsed_label(started_at, row.timestamp),
            level: row.level,
            compartment: row.compartment,
            message: row.message.clone(),
        })
        .collect();

    let sections = summary_sections(
        &experiment,
        project.as_ref(),
        measurements.len(),
        log_rows.len(),
        exported_at,
    );

    Ok(Report {
        experiment_id: experiment.id,
        experiment_name: experiment.name,
        sections,
        measurements,
        logs: log_rows,
    })
}

fn summary_sections(
    experiment: &Experiment,
    project: Option<&Project>,
    measurement_count: usize,
    log_count: usize,
    exported_at: DateTime<Utc>,
) -> Vec<SummarySection> {
    let dash = "—".to_string();
    let field = |label: &str, value: String| SummaryField {
        label: label.to_string(),
        value,
    };

    let mut sections = Vec::new();

    sections.push(SummarySection {
        title: "Project".to_string(),
        fields: vec![
            field(
                "Project Name",
                project.map(|p| p.name.clone()).unwrap_or_else(|| dash.clone()),
            ),
            field(
                "Researcher",
                project
                    .map(|p| p.researcher_name.clone())
                    .unwrap_or_else(|| dash.clone()),
            ),
            field(
                "Project Created",
                project
                    .map(|p| format_timestamp(p.created_at))
                    .unwrap_or_else(|| dash.clone()),
            ),
        ],
    });

    sections.push(SummarySection {
        title: "Experiment".to_string(),
        fields: vec![
            field("Experiment ID", experiment.id.clone()),
            field("Experiment Name", experiment.name.clone()),
            field("Status", experiment.status.as_str().to_string()),
            field("Started At", format_timestamp(experiment.created_at)),
            field(
                "Measurement Interval",
                format!("{} min", experiment.measurement_interval_mins),
            ),
        ],
    });

    let mut threshold_fields = Vec::with_capacity(COMPARTMENT_COUNT * 2);
    for (i, range) in experiment.thresholds.iter().enumerate() {
        threshold_fields.push(field(
            &format!("Compartment {} Min pH", i + 1),
            format!("{}", range.min),
        ));
        threshold_fields.push(field(
            &format!("Compartment {} Max pH", i + 1),
            format!("{}", range.max),
        ));
    }
    sections.push(SummarySection {
        title: "pH Thresholds".to_string(),
        fields: threshold_fields,
    });

    sections.push(SummarySection {
        title: "Pump Configuration".to_string(),
        fields: vec![
            field(
                "Max Pump Time (sec)",
                experiment.max_pump_time_sec.to_string(),
            ),
            field(
                "Mixing Cooldown (sec)",
                experiment.mixing_cooldown_sec.to_string(),
            ),
            field(
                "Manual Dose Steps",
                experiment.manual_dose_steps.to_string(),
            ),
        ],
    });

    sections.push(SummarySection {
        title: "Export".to_string(),
        fields: vec![
            field("Total Measurements", measurement_count.to_string()),
            field("Total Log Entries", log_count.to_string()),
            field("Exported At", format_timestamp(exported_at)),
        ],
    });

    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        parse_timestamp, ExperimentConfig, LogLevel, PhRange, ProjectRef, SqliteStore,
    };
    use chrono::Duration;

    fn seeded_store() -> (SqliteStore, String) {
        let store = SqliteStore::in_memory().unwrap();
        let started = store
            .start_experiment(
                &ExperimentConfig {
                    name: "Batch 7 ramp".to_string(),
                    measurement_interval_mins: 1,
                    thresholds: [
                        PhRange { min: 6.8, max: 7.2 },
                        PhRange { min: 6.8, max: 7.2 },
                        PhRange { min: 6.5, max: 7.0 },
                    ],
                    max_pump_time_sec: 30,
                    mixing_cooldown_sec: 120,
                    manual_dose_steps: 50,
                },
                ProjectRef::New {
                    name: "Reactor A".to_string(),
                    researcher: "Dr. Smith".to_string(),
                },
            )
            .unwrap();
        (store, started.experiment_id)
    }

    #[test]
    fn test_elapsed_label_formatting() {
        let start = parse_timestamp("2025-03-01 00:00:00").unwrap();
        assert_eq!(elapsed_label(start, start), "0s");
        assert_eq!(elapsed_label(start, start + Duration::seconds(59)), "59s");
        assert_eq!(elapsed_label(start, start + Duration::seconds(60)), "1m");
        assert_eq!(
            elapsed_label(start, start + Duration::seconds(3723)),
            "1h 2m 3s"
        );
        // Clock skew must never produce a negative label.
        assert_eq!(elapsed_label(start, start - Duration::seconds(5)), "0s");
    }

    #[test]
    fn test_empty_experiment_still_exports() {
        let (store, experiment_id) = seeded_store();
        let report = build_report(&store, &experiment_id, Utc::now()).unwrap();
        assert!(report.measurements.is_empty());
        assert!(report.logs.is_empty());
        assert_eq!(report.sections.len(), 5);
        let export_section = report.sections.last().unwrap();
        assert_eq!(export_section.fields[0].value, "0");
        assert_eq!(export_section.fields[1].value, "0");
    }

    #[test]
    fn test_rows_carry_elapsed_relative_to_experiment_start() {
        let (store, experiment_id) = seeded_store();
        let experiment = store.experiment(&experiment_id).unwrap().unwrap();
        let start = experiment.created_at;

        store
            .append_telemetry(
                &experiment_id,
                start + Duration::seconds(90),
                [Some(7.0), Some(7.1), Some(6.9)],
            )
            .unwrap();
        store
            .append_log(
                &experiment_id,
                start + Duration::seconds(3600),
                LogLevel::Warning,
                "pH drift in compartment 2",
                Some(2),
            )
            .unwrap();

        let report = build_report(&store, &experiment_id, Utc::now()).unwrap();
        assert_eq!(report.measurements[0].elapsed, "1m 30s");
        assert_eq!(report.logs[0].elapsed, "1h");
        assert_eq!(report.logs[0].level, LogLevel::Warning);
    }

    #[test]
    fn test_unknown_experiment_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        let err = build_report(&store, "missing", Utc::now()).unwrap_err();
        assert!(matches!(err, ExportError::NotFound(_)));
    }

    #[test]
    fn test_file_base_name_is_deterministic_and_sanitized() {
        let (store, experiment_id) = seeded_store();
        let report = build_report(&store, &experiment_id, Utc::now()).unwrap();
        let expected = format!(
            "ReactorExport_Batch_7_ramp_{}",
            &experiment_id[..8]
        );
        assert_eq!(report.file_base_name(), expected);
    }
}
