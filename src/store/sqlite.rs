// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! SQLite-backed implementation of the experiment lifecycle store.
//!
//! One connection per process, shared behind a mutex. Write-ahead logging and
//! foreign-key enforcement are applied once at open so concurrent readers
//! (export) and writers (live logging) do not trip over "database is locked".

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::info;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::models::{
    CalibrationRecord, Experiment, ExperimentConfig, ExperimentLogRow, ExperimentStatus, LogLevel,
    PhRange, Project, ProjectRef, StartedExperiment, TelemetryRow, COMPARTMENT_COUNT,
};
use super::{format_timestamp, parse_timestamp, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    researcher_name TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS experiments (
    id TEXT PRIMARY KEY,
    project_id TEXT,
    name TEXT NOT NULL,
    measurement_interval_mins INTEGER DEFAULT 1,
    c1_min_ph REAL NOT NULL,
    c1_max_ph REAL NOT NULL,
    c2_min_ph REAL NOT NULL,
    c2_max_ph REAL NOT NULL,
    c3_min_ph REAL NOT NULL,
    c3_max_ph REAL NOT NULL,
    max_pump_time_sec INTEGER NOT NULL,
    mixing_cooldown_sec INTEGER NOT NULL,
    manual_dose_steps INTEGER NOT NULL,
    status TEXT DEFAULT 'active',
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (project_id) REFERENCES projects(id)
);
CREATE TABLE IF NOT EXISTS telemetry (
    id TEXT PRIMARY KEY,
    experiment_id TEXT,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
    compartment_1_ph REAL,
    compartment_2_ph REAL,
    compartment_3_ph REAL,
    FOREIGN KEY (experiment_id) REFERENCES experiments(id)
);
CREATE TABLE IF NOT EXISTS experiment_logs (
    id TEXT PRIMARY KEY,
    experiment_id TEXT,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    compartment INTEGER,
    FOREIGN KEY (experiment_id) REFERENCES experiments(id)
);
CREATE TABLE IF NOT EXISTS calibrations (
    id TEXT PRIMARY KEY,
    compartment INTEGER NOT NULL,
    slope REAL NOT NULL,
    intercept REAL NOT NULL,
    researcher TEXT,
    calibrated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_telemetry_experiment_time
    ON telemetry(experiment_id, timestamp);
";

/// Process-wide handle to the reactor database.
///
/// Cloning is cheap; all clones share the same connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and bootstrap the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        Self::bootstrap(&conn)?;
        info!(
            "Reactor database ready at {} (WAL, foreign keys on)",
            path.as_ref().display()
        );
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests and the `--validate-config` path.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // Pragmas are applied once here, not per query.
    fn bootstrap(conn: &Connection) -> Result<(), StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Persistence("store connection mutex poisoned".into()))
    }

    // ── projects ────────────────────────────────────────────────────────

    pub fn create_project(&self, name: &str, researcher: &str) -> Result<Project, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::Validation(
                "project name must not be empty".into(),
            ));
        }
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO projects (id, name, researcher_name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, researcher, format_timestamp(created_at)],
        )?;
        Ok(Project {
            id,
            name: name.to_string(),
            researcher_name: researcher.to_string(),
            created_at,
        })
    }

    /// All projects, newest first.
    pub fn projects(&self) -> Result<Vec<Project>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, researcher_name, created_at FROM projects ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], project_columns)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(project_from_columns(row?)?);
        }
        Ok(out)
    }

    pub fn project(&self, id: &str) -> Result<Option<Project>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, researcher_name, created_at FROM projects WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], project_columns)?;
        match rows.next() {
            Some(row) => Ok(Some(project_from_columns(row?)?)),
            None => Ok(None),
        }
    }

    /// Rename a project and/or reassign its researcher. Returns `false` when
    /// nothing was asked or the project does not exist.
    pub fn update_project(
        &self,
        id: &str,
        name: Option<&str>,
        researcher: Option<&str>,
    ) -> Result<bool, StoreError> {
        if name.is_none() && researcher.is_none() {
            return Ok(false);
        }
        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(StoreError::Validation(
                    "project name must not be empty".into(),
                ));
            }
        }
        let conn = self.lock()?;
        let changed = match (name, researcher) {
            (Some(n), Some(r)) => conn.execute(
                "UPDATE projects SET name = ?1, researcher_name = ?2 WHERE id = ?3",
                params![n, r, id],
            )?,
            (Some(n), None) => conn.execute(
                "UPDATE projects SET name = ?1 WHERE id = ?2",
                params![n, id],
            )?,
            (None, Some(r)) => conn.execute(
                "UPDATE projects SET researcher_name = ?1 WHERE id = ?2",
                params![r, id],
            )?,
            (None, None) => 0,
        };
        Ok(changed > 0)
    }

    // ── experiment lifecycle ────────────────────────────────────────────

    /// Start a new experiment, superseding any currently-active one.
    ///
    /// Project resolution, completion of the previous active experiment and
    /// insertion of the new active row happen in a single transaction: a
    /// crash in between can never leave two active experiments, nor zero
    /// where one was promised.
    pub fn start_experiment(
        &self,
        config: &ExperimentConfig,
        project: ProjectRef,
    ) -> Result<StartedExperiment, StoreError> {
        config.validate()?;
        if let ProjectRef::New { name, .. } = &project {
            if name.trim().is_empty() {
                return Err(StoreError::Validation(
                    "new project name must not be empty".into(),
                ));
            }
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let project_id = match project {
            ProjectRef::Existing(id) => {
                let found: Option<String> = tx
                    .query_row(
                        "SELECT id FROM projects WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(ignore_no_rows)?;
                found.ok_or_else(|| StoreError::NotFound(format!("project {}", id)))?
            }
            ProjectRef::New { name, researcher } => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO projects (id, name, researcher_name, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![id, name, researcher, format_timestamp(Utc::now())],
                )?;
                id
            }
        };

        tx.execute(
            "UPDATE experiments SET status = 'completed' WHERE status = 'active'",
            [],
        )?;

        let experiment_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO experiments (
                id, project_id, name, measurement_interval_mins,
                c1_min_ph, c1_max_ph, c2_min_ph, c2_max_ph, c3_min_ph, c3_max_ph,
                max_pump_time_sec, mixing_cooldown_sec, manual_dose_steps,
                status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 'active', ?14)",
            params![
                experiment_id,
                project_id,
                config.name,
                config.measurement_interval_mins,
                config.thresholds[0].min,
                config.thresholds[0].max,
                config.thresholds[1].min,
                config.thresholds[1].max,
                config.thresholds[2].min,
                config.thresholds[2].max,
                config.max_pump_time_sec,
                config.mixing_cooldown_sec,
                config.manual_dose_steps,
                format_timestamp(Utc::now()),
            ],
        )?;

        tx.commit()?;
        Ok(StartedExperiment {
            project_id,
            experiment_id,
        })
    }

    /// Mark an experiment completed. Idempotent: stopping an experiment that
    /// is already completed (or unknown) is a successful no-op.
    pub fn stop_experiment(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE experiments SET status = 'completed' WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// The single experiment currently eligible to receive telemetry, if any.
    pub fn active_experiment(&self) -> Result<Option<Experiment>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM experiments WHERE status = 'active' ORDER BY created_at DESC LIMIT 1",
            EXPERIMENT_COLUMNS
        ))?;
        let mut rows = stmt.query_map([], experiment_columns)?;
        match rows.next() {
            Some(row) => Ok(Some(experiment_from_columns(row?)?)),
            None => Ok(None),
        }
    }

    pub fn experiment(&self, id: &str) -> Result<Option<Experiment>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM experiments WHERE id = ?1",
            EXPERIMENT_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![id], experiment_columns)?;
        match rows.next() {
            Some(row) => Ok(Some(experiment_from_columns(row?)?)),
            None => Ok(None),
        }
    }

    /// Experiments belonging to a project, newest first.
    pub fn experiments_for_project(&self, project_id: &str) -> Result<Vec<Experiment>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM experiments WHERE project_id = ?1 ORDER BY created_at DESC",
            EXPERIMENT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![project_id], experiment_columns)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(experiment_from_columns(row?)?);
        }
        Ok(out)
    }

    /// Delete an experiment and everything it owns.
    ///
    /// Dependents go first (telemetry, logs, then the experiment row) inside
    /// one transaction, so a partial cascade can never leave orphans even
    /// with engine-level cascade support absent or disabled.
    pub fn delete_experiment(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        delete_experiment_tx(&tx, id)?;
        tx.commit()?;
        Ok(())
    }

    /// Delete a project, recursing into each child experiment first.
    pub fn delete_project(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let experiment_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM experiments WHERE project_id = ?1")?;
            let rows = stmt.query_map(params![id], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        for experiment_id in &experiment_ids {
            delete_experiment_tx(&tx, experiment_id)?;
        }
        tx.execute("DELETE FROM projects WHERE id = ?1", params![id])?;

        tx.commit()?;
        Ok(())
    }

    // ── telemetry & logs (append-only) ──────────────────────────────────

    pub fn append_telemetry(
        &self,
        experiment_id: &str,
        timestamp: DateTime<Utc>,
        ph: [Option<f64>; COMPARTMENT_COUNT],
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO telemetry (
                id, experiment_id, timestamp,
                compartment_1_ph, compartment_2_ph, compartment_3_ph
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                experiment_id,
                format_timestamp(timestamp),
                ph[0],
                ph[1],
                ph[2],
            ],
        )?;
        Ok(())
    }

    /// Full telemetry history for an experiment, timestamp ascending.
    pub fn telemetry_for_experiment(
        &self,
        experiment_id: &str,
    ) -> Result<Vec<TelemetryRow>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, experiment_id, timestamp,
                    compartment_1_ph, compartment_2_ph, compartment_3_ph
             FROM telemetry WHERE experiment_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![experiment_id], telemetry_columns)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(telemetry_from_columns(row?)?);
        }
        Ok(out)
    }

    /// The most recent `limit` samples, returned in ascending timestamp
    /// order. This is the historical tail used to seed a live session.
    pub fn recent_telemetry(
        &self,
        experiment_id: &str,
        limit: usize,
    ) -> Result<Vec<TelemetryRow>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, experiment_id, timestamp,
                    compartment_1_ph, compartment_2_ph, compartment_3_ph
             FROM (
                SELECT * FROM telemetry WHERE experiment_id = ?1
                ORDER BY timestamp DESC LIMIT ?2
             ) ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![experiment_id, limit as i64], telemetry_columns)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(telemetry_from_columns(row?)?);
        }
        Ok(out)
    }

    pub fn append_log(
        &self,
        experiment_id: &str,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        message: &str,
        compartment: Option<u8>,
    ) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO experiment_logs (id, experiment_id, timestamp, level, message, compartment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                experiment_id,
                format_timestamp(timestamp),
                level.as_str(),
                message,
                compartment,
            ],
        )?;
        Ok(())
    }

    /// Full log history for an experiment, timestamp ascending.
    pub fn logs_for_experiment(
        &self,
        experiment_id: &str,
    ) -> Result<Vec<ExperimentLogRow>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, experiment_id, timestamp, level, message, compartment
             FROM experiment_logs WHERE experiment_id = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![experiment_id], log_columns)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(log_from_columns(row?)?);
        }
        Ok(out)
    }

    // ── calibration records ─────────────────────────────────────────────

    pub fn save_calibration(
        &self,
        compartment: u8,
        slope: f64,
        intercept: f64,
        researcher: &str,
        calibrated_at: DateTime<Utc>,
    ) -> Result<CalibrationRecord, StoreError> {
        if compartment == 0 || compartment as usize > COMPARTMENT_COUNT {
            return Err(StoreError::Validation(format!(
                "compartment must be 1..={}, got {}",
                COMPARTMENT_COUNT, compartment
            )));
        }
        let id = Uuid::new_v4().to_string();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO calibrations (id, compartment, slope, intercept, researcher, calibrated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                compartment,
                slope,
                intercept,
                researcher,
                format_timestamp(calibrated_at)
            ],
        )?;
        Ok(CalibrationRecord {
            id,
            compartment,
            slope,
            intercept,
            researcher: researcher.to_string(),
            calibrated_at,
        })
    }

    /// The record that is "current" for a compartment: its most recent one.
    pub fn latest_calibration(
        &self,
        compartment: u8,
    ) -> Result<Option<CalibrationRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, compartment, slope, intercept, researcher, calibrated_at
             FROM calibrations WHERE compartment = ?1
             ORDER BY calibrated_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![compartment], calibration_columns)?;
        match rows.next() {
            Some(row) => Ok(Some(calibration_from_columns(row?)?)),
            None => Ok(None),
        }
    }

    /// Recent calibration records across all compartments, newest first.
    pub fn calibration_history(&self, limit: usize) -> Result<Vec<CalibrationRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, compartment, slope, intercept, researcher, calibrated_at
             FROM calibrations ORDER BY calibrated_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], calibration_columns)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(calibration_from_columns(row?)?);
        }
        Ok(out)
    }
}

const EXPERIMENT_COLUMNS: &str = "id, project_id, name, measurement_interval_mins, \
    c1_min_ph, c1_max_ph, c2_min_ph, c2_max_ph, c3_min_ph, c3_max_ph, \
    max_pump_time_sec, mixing_cooldown_sec, manual_dose_steps, status, created_at";

// Dependents first, owning row last.
fn delete_experiment_tx(tx: &rusqlite::Transaction<'_>, id: &str) -> Result<(), StoreError> {
    tx.execute("DELETE FROM telemetry WHERE experiment_id = ?1", params![id])?;
    tx.execute(
        "DELETE FROM experiment_logs WHERE experiment_id = ?1",
        params![id],
    )?;
    tx.execute("DELETE FROM experiments WHERE id = ?1", params![id])?;
    Ok(())
}

fn ignore_no_rows<T>(err: rusqlite::Error) -> Result<Option<T>, rusqlite::Error> {
    match err {
        rusqlite::Error::QueryReturnedNoRows => Ok(None),
        other => Err(other),
    }
}

// Raw column tuples are read inside rusqlite's row closure and converted to
// model types outside it, keeping timestamp parse errors in StoreError.

type ProjectColumns = (String, String, Option<String>, String);

fn project_columns(row: &Row<'_>) -> rusqlite::Result<ProjectColumns> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn project_from_columns(columns: ProjectColumns) -> Result<Project, StoreError> {
    let (id, name, researcher_name, created_at) = columns;
    Ok(Project {
        id,
        name,
        researcher_name: researcher_name.unwrap_or_default(),
        created_at: parse_timestamp(&created_at)?,
    })
}

type ExperimentColumns = (
    String,
    Option<String>,
    String,
    u32,
    [f64; 6],
    u32,
    u32,
    u32,
    String,
    String,
);

fn experiment_columns(row: &Row<'_>) -> rusqlite::Result<ExperimentColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        [
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
        ],
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
    ))
}

fn experiment_from_columns(columns: ExperimentColumns) -> Result<Experiment, StoreError> {
    let (
        id,
        project_id,
        name,
        measurement_interval_mins,
        bands,
        max_pump_time_sec,
        mixing_cooldown_sec,
        manual_dose_steps,
        status,
        created_at,
    ) = columns;
    Ok(Experiment {
        id,
        project_id: project_id.unwrap_or_default(),
        name,
        measurement_interval_mins,
        thresholds: [
            PhRange {
                min: bands[0],
                max: bands[1],
            },
            PhRange {
                min: bands[2],
                max: bands[3],
            },
            PhRange {
                min: bands[4],
                max: bands[5],
            },
        ],
        max_pump_time_sec,
        mixing_cooldown_sec,
        manual_dose_steps,
        status: ExperimentStatus::parse(&status)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

type TelemetryColumns = (String, String, String, Option<f64>, Option<f64>, Option<f64>);

fn telemetry_columns(row: &Row<'_>) -> rusqlite::Result<TelemetryColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn telemetry_from_columns(columns: TelemetryColumns) -> Result<TelemetryRow, StoreError> {
    let (id, experiment_id, timestamp, c1, c2, c3) = columns;
    Ok(TelemetryRow {
        id,
        experiment_id,
        timestamp: parse_timestamp(&timestamp)?,
        ph: [c1, c2, c3],
    })
}

type LogColumns = (String, String, String, String, String, Option<u8>);

fn log_columns(row: &Row<'_>) -> rusqlite::Result<LogColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn log_from_columns(columns: LogColumns) -> Result<ExperimentLogRow, StoreError> {
    let (id, experiment_id, timestamp, level, message, compartment) = columns;
    Ok(ExperimentLogRow {
        id,
        experiment_id,
        timestamp: parse_timestamp(&timestamp)?,
        level: LogLevel::parse(&level)?,
        message,
        compartment,
    })
}

type CalibrationColumns = (String, u8, f64, f64, Option<String>, String);

fn calibration_columns(row: &Row<'_>) -> rusqlite::Result<CalibrationColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn calibration_from_columns(columns: CalibrationColumns) -> Result<CalibrationRecord, StoreError> {
    let (id, compartment, slope, intercept, researcher, calibrated_at) = columns;
    Ok(CalibrationRecord {
        id,
        compartment,
        slope,
        intercept,
        researcher: researcher.unwrap_or_default(),
        calibrated_at: parse_timestamp(&calibrated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(name: &str) -> ExperimentConfig {
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

    fn new_project() -> ProjectRef {
        ProjectRef::New {
            name: "Reactor A".to_string(),
            researcher: "Dr. Smith".to_string(),
        }
    }

    #[test]
    fn test_start_experiment_creates_project_and_active_row() {
        let store = SqliteStore::in_memory().unwrap();
        let started = store
            .start_experiment(&test_config("Run 1"), new_project())
            .unwrap();

        let active = store.active_experiment().unwrap().unwrap();
        assert_eq!(active.id, started.experiment_id);
        assert_eq!(active.project_id, started.project_id);
        assert_eq!(active.status, ExperimentStatus::Active);
        assert_eq!(active.manual_dose_steps, 50);

        let project = store.project(&started.project_id).unwrap().unwrap();
        assert_eq!(project.name, "Reactor A");
    }

    #[test]
    fn test_start_experiment_supersedes_previous_active() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store
            .start_experiment(&test_config("Run 1"), new_project())
            .unwrap();
        let second = store
            .start_experiment(
                &test_config("Run 2"),
                ProjectRef::Existing(first.project_id.clone()),
            )
            .unwrap();

        let active = store.active_experiment().unwrap().unwrap();
        assert_eq!(active.id, second.experiment_id);

        let previous = store.experiment(&first.experiment_id).unwrap().unwrap();
        assert_eq!(previous.status, ExperimentStatus::Completed);
    }

    #[test]
    fn test_start_experiment_unknown_project_is_not_found() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store
            .start_experiment(
                &test_config("Run 1"),
                ProjectRef::Existing("no-such-project".to_string()),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store.active_experiment().unwrap().is_none());
    }

    #[test]
    fn test_contradictory_thresholds_rejected_before_mutation() {
        let store = SqliteStore::in_memory().unwrap();
        let mut config = test_config("Run 1");
        config.thresholds[1] = PhRange { min: 7.5, max: 6.5 };
        let err = store.start_experiment(&config, new_project()).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        // Rejected before any mutation: no project row either.
        assert!(store.projects().unwrap().is_empty());
    }

    #[test]
    fn test_stop_experiment_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let started = store
            .start_experiment(&test_config("Run 1"), new_project())
            .unwrap();

        store.stop_experiment(&started.experiment_id).unwrap();
        store.stop_experiment(&started.experiment_id).unwrap();
        store.stop_experiment("never-existed").unwrap();

        let stopped = store.experiment(&started.experiment_id).unwrap().unwrap();
        assert_eq!(stopped.status, ExperimentStatus::Completed);
        assert!(store.active_experiment().unwrap().is_none());
    }

    #[test]
    fn test_recent_telemetry_returns_ascending_tail() {
        let store = SqliteStore::in_memory().unwrap();
        let started = store
            .start_experiment(&test_config("Run 1"), new_project())
            .unwrap();

        let base = parse_timestamp("2025-03-01 00:00:00").unwrap();
        for i in 0..10 {
            store
                .append_telemetry(
                    &started.experiment_id,
                    base + chrono::Duration::seconds(i),
                    [Some(7.0 + i as f64 * 0.01), Some(7.0), None],
                )
                .unwrap();
        }

        let tail = store.recent_telemetry(&started.experiment_id, 4).unwrap();
        assert_eq!(tail.len(), 4);
        assert!(tail.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(tail[3].timestamp, base + chrono::Duration::seconds(9));
    }

    #[test]
    fn test_delete_project_cascades_to_all_dependents() {
        let store = SqliteStore::in_memory().unwrap();
        let first = store
            .start_experiment(&test_config("Run 1"), new_project())
            .unwrap();
        let second = store
            .start_experiment(
                &test_config("Run 2"),
                ProjectRef::Existing(first.project_id.clone()),
            )
            .unwrap();

        let now = Utc::now();
        for id in [&first.experiment_id, &second.experiment_id] {
            store
                .append_telemetry(id, now, [Some(7.0), Some(7.1), Some(6.9)])
                .unwrap();
            store
                .append_log(id, now, LogLevel::Info, "dosing", Some(1))
                .unwrap();
        }

        store.delete_project(&first.project_id).unwrap();

        assert!(store.project(&first.project_id).unwrap().is_none());
        for id in [&first.experiment_id, &second.experiment_id] {
            assert!(store.experiment(id).unwrap().is_none());
            assert!(store.telemetry_for_experiment(id).unwrap().is_empty());
            assert!(store.logs_for_experiment(id).unwrap().is_empty());
        }
    }

    #[test]
    fn test_latest_calibration_is_most_recent_per_compartment() {
        let store = SqliteStore::in_memory().unwrap();
        let older = parse_timestamp("2025-03-01 00:00:00").unwrap();
        let newer = parse_timestamp("2025-03-02 00:00:00").unwrap();
        store
            .save_calibration(1, -0.21, 2.49, "Dr. Smith", older)
            .unwrap();
        store
            .save_calibration(1, -0.20, 2.50, "Dr. Smith", newer)
            .unwrap();
        store
            .save_calibration(2, -0.19, 2.51, "Dr. Jones", older)
            .unwrap();

        let current = store.latest_calibration(1).unwrap().unwrap();
        assert_eq!(current.slope, -0.20);
        assert_eq!(current.calibrated_at, newer);

        let history = store.calibration_history(50).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].calibrated_at, newer);
    }

    #[test]
    fn test_save_calibration_rejects_bad_compartment() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store
            .save_calibration(4, -0.2, 2.5, "Dr. Smith", Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }
}
