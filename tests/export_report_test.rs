// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! End-to-end export: store rows in, sectioned CSV document out.

use chrono::{Duration, Utc};
use rust_bioreactor::export::{build_report, write_report_file};
use rust_bioreactor::store::{
    ExperimentConfig, LogLevel, PhRange, ProjectRef, SqliteStore,
};

fn seeded_store() -> (SqliteStore, String) {
    let store = SqliteStore::in_memory().unwrap();
    let started = store
        .start_experiment(
            &ExperimentConfig {
                name: "Fermentation batch 12".to_string(),
                measurement_interval_mins: 2,
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
fn test_full_export_round_trip() {
    let (store, experiment_id) = seeded_store();
    let start = store
        .experiment(&experiment_id)
        .unwrap()
        .unwrap()
        .created_at;

    for i in 0..3 {
        store
            .append_telemetry(
                &experiment_id,
                start + Duration::minutes(2 * (i + 1)),
                [Some(7.0 + i as f64 * 0.05), Some(7.1), Some(6.9)],
            )
            .unwrap();
    }
    store
        .append_log(
            &experiment_id,
            start + Duration::minutes(3),
            LogLevel::Error,
            "pump 2 stalled, retrying",
            Some(2),
        )
        .unwrap();

    let report = build_report(&store, &experiment_id, Utc::now()).unwrap();
    assert_eq!(report.measurements.len(), 3);
    assert_eq!(report.measurements[0].elapsed, "2m");
    assert_eq!(report.measurements[2].elapsed, "6m");
    assert_eq!(report.logs.len(), 1);
    assert_eq!(report.logs[0].elapsed, "3m");

    let dir = tempfile::tempdir().unwrap();
    let path = write_report_file(&report, dir.path()).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();

    assert!(path
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("ReactorExport_Fermentation_batch_12_"));
    assert!(text.contains("Project Name,Reactor A"));
    assert!(text.contains("Researcher,Dr. Smith"));
    assert!(text.contains("Measurement Interval,2 min"));
    assert!(text.contains("Total Measurements,3"));
    assert!(text.contains("\"pump 2 stalled, retrying\""));
}

#[test]
fn test_export_of_empty_experiment_is_valid() {
    let (store, experiment_id) = seeded_store();
    let report = build_report(&store, &experiment_id, Utc::now()).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = write_report_file(&report, dir.path()).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();

    // Summary metadata only; the tables are present but empty.
    assert!(text.contains("Total Measurements,0"));
    assert!(text.contains("Total Log Entries,0"));
    assert!(text.contains("Measurements"));
    assert!(text.contains("Logs"));
}
