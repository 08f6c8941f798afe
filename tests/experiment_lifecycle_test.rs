// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Lifecycle invariants across longer operation sequences.

use chrono::{Duration, Utc};
use rust_bioreactor::store::{
    ExperimentConfig, ExperimentStatus, LogLevel, PhRange, ProjectRef, SqliteStore,
};

fn config(name: &str) -> ExperimentConfig {
    ExperimentConfig {
        name: name.to_string(),
        measurement_interval_mins: 1,
        thresholds: [
            PhRange { min: 6.8, max: 7.2 },
            PhRange { min: 6.8, max: 7.2 },
            PhRange { min: 6.5, max: 7.0 },
        ],
        max_pump_time_sec: 30,
        mixing_cooldown_sec: 120,
        manual_dose_steps: 50,
    }
}

/// Walk every experiment the store knows about and count the active ones.
fn active_count(store: &SqliteStore) -> usize {
    store
        .projects()
        .unwrap()
        .iter()
        .flat_map(|p| store.experiments_for_project(&p.id).unwrap())
        .filter(|e| e.status == ExperimentStatus::Active)
        .count()
}

#[test]
fn test_sequence_of_starts_keeps_exactly_one_active() {
    let store = SqliteStore::in_memory().unwrap();

    let first = store
        .start_experiment(
            &config("Run 1"),
            ProjectRef::New {
                name: "Project Alpha".to_string(),
                researcher: "Dr. Smith".to_string(),
            },
        )
        .unwrap();
    assert_eq!(active_count(&store), 1);

    // A run in a brand-new project supersedes the previous one.
    let second = store
        .start_experiment(
            &config("Run 2"),
            ProjectRef::New {
                name: "Project Beta".to_string(),
                researcher: "Dr. Jones".to_string(),
            },
        )
        .unwrap();
    assert_eq!(active_count(&store), 1);

    // And so does a run re-using an existing project.
    let third = store
        .start_experiment(
            &config("Run 3"),
            ProjectRef::Existing(first.project_id.clone()),
        )
        .unwrap();
    assert_eq!(active_count(&store), 1);

    // Exactly the superseded experiments transitioned to completed.
    for id in [&first.experiment_id, &second.experiment_id] {
        let experiment = store.experiment(id).unwrap().unwrap();
        assert_eq!(experiment.status, ExperimentStatus::Completed);
    }
    let active = store.active_experiment().unwrap().unwrap();
    assert_eq!(active.id, third.experiment_id);

    // Completed never comes back: starting and stopping again leaves the
    // earlier experiments untouched.
    store.stop_experiment(&third.experiment_id).unwrap();
    assert_eq!(active_count(&store), 0);
    for id in [&first.experiment_id, &second.experiment_id] {
        let experiment = store.experiment(id).unwrap().unwrap();
        assert_eq!(experiment.status, ExperimentStatus::Completed);
    }
}

#[test]
fn test_project_delete_leaves_no_orphans() {
    let store = SqliteStore::in_memory().unwrap();

    let doomed = store
        .start_experiment(
            &config("Doomed Run"),
            ProjectRef::New {
                name: "Doomed Project".to_string(),
                researcher: "Dr. Smith".to_string(),
            },
        )
        .unwrap();
    let survivor = store
        .start_experiment(
            &config("Survivor Run"),
            ProjectRef::New {
                name: "Survivor Project".to_string(),
                researcher: "Dr. Jones".to_string(),
            },
        )
        .unwrap();

    let base = Utc::now();
    for i in 0..5 {
        for id in [&doomed.experiment_id, &survivor.experiment_id] {
            store
                .append_telemetry(
                    id,
                    base + Duration::seconds(i),
                    [Some(7.0), Some(7.1), Some(6.9)],
                )
                .unwrap();
            store
                .append_log(id, base + Duration::seconds(i), LogLevel::Info, "tick", None)
                .unwrap();
        }
    }

    store.delete_project(&doomed.project_id).unwrap();

    // Everything transitively owned by the doomed project is gone.
    assert!(store.project(&doomed.project_id).unwrap().is_none());
    assert!(store.experiment(&doomed.experiment_id).unwrap().is_none());
    assert!(store
        .telemetry_for_experiment(&doomed.experiment_id)
        .unwrap()
        .is_empty());
    assert!(store
        .logs_for_experiment(&doomed.experiment_id)
        .unwrap()
        .is_empty());

    // The unrelated project kept all of its rows.
    assert!(store.project(&survivor.project_id).unwrap().is_some());
    assert_eq!(
        store
            .telemetry_for_experiment(&survivor.experiment_id)
            .unwrap()
            .len(),
        5
    );
    assert_eq!(
        store
            .logs_for_experiment(&survivor.experiment_id)
            .unwrap()
            .len(),
        5
    );
}

#[test]
fn test_experiment_delete_is_scoped_to_one_experiment() {
    let store = SqliteStore::in_memory().unwrap();
    let first = store
        .start_experiment(
            &config("Run 1"),
            ProjectRef::New {
                name: "Project Alpha".to_string(),
                researcher: "Dr. Smith".to_string(),
            },
        )
        .unwrap();
    let second = store
        .start_experiment(
            &config("Run 2"),
            ProjectRef::Existing(first.project_id.clone()),
        )
        .unwrap();

    store
        .append_telemetry(&first.experiment_id, Utc::now(), [Some(7.0), None, None])
        .unwrap();
    store
        .append_telemetry(&second.experiment_id, Utc::now(), [Some(7.0), None, None])
        .unwrap();

    store.delete_experiment(&first.experiment_id).unwrap();

    assert!(store.experiment(&first.experiment_id).unwrap().is_none());
    assert!(store
        .telemetry_for_experiment(&first.experiment_id)
        .unwrap()
        .is_empty());
    // The sibling experiment and the owning project survive.
    assert!(store.experiment(&second.experiment_id).unwrap().is_some());
    assert!(store.project(&first.project_id).unwrap().is_some());
}
