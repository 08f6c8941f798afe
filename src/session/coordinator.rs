// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! The session coordinator: one consumer loop over the bridge event stream.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::{broadcast, RwLock};

use super::calibration_session::CalibrationSession;
use super::window::TelemetryWindow;
use super::SessionError;
use crate::bridge::{
    AutoThresholdCommand, BridgeEvent, ConnectionState, DoseDirection, EventMessage, HealthAlert,
    ManualDoseCommand, PhReadings, ReactorBridge, ServerHealth, StatusSummary,
};
use crate::config::SessionConfig;
use crate::store::{
    Experiment, ExperimentConfig, ProjectRef, SqliteStore, StartedExperiment, StoreError,
    COMPARTMENT_COUNT,
};

/// Everything the operator view needs, folded from store reads and bridge
/// events. Mutated only by the coordinator's consumer loop and its
/// operation methods; observed through an `Arc<RwLock<_>>`.
#[derive(Debug)]
pub struct SessionState {
    /// Latest live pH readings (display only).
    pub live_ph: PhReadings,
    /// Last status summary from the control process (advisory).
    pub status: StatusSummary,
    pub connection: ConnectionState,
    pub server_health: ServerHealth,
    /// The store's view of the active experiment; authoritative.
    pub active_experiment: Option<Experiment>,
    /// Sliding window of recent samples for charting.
    pub telemetry: TelemetryWindow,
    /// Rolling operator event log, bounded; never persisted from here.
    pub event_log: VecDeque<EventMessage>,
}

impl SessionState {
    fn new(telemetry_window: usize) -> Self {
        Self {
            live_ph: PhReadings::default(),
            status: StatusSummary::default(),
            connection: ConnectionState::Disconnected,
            server_health: ServerHealth::Unknown,
            active_experiment: None,
            telemetry: TelemetryWindow::new(telemetry_window),
            event_log: VecDeque::new(),
        }
    }
}

pub struct SessionCoordinator {
    store: SqliteStore,
    bridge: Arc<ReactorBridge>,
    state: Arc<RwLock<SessionState>>,
    config: SessionConfig,
}

impl SessionCoordinator {
    pub fn new(store: SqliteStore, bridge: Arc<ReactorBridge>, config: SessionConfig) -> Self {
        let state = Arc::new(RwLock::new(SessionState::new(config.telemetry_window)));
        Self {
            store,
            bridge,
            state,
            config,
        }
    }

    /// Shared handle to the folded session state.
    pub fn state(&self) -> Arc<RwLock<SessionState>> {
        Arc::clone(&self.state)
    }

    /// Reconcile with the store on (re)attach.
    ///
    /// The store decides whether an experiment is active. When one is, the
    /// window is seeded with the stored tail so the chart does not start
    /// empty; live samples then append behind it.
    pub async fn attach(&self) -> Result<(), StoreError> {
        let active = self.store.active_experiment()?;
        let mut state = self.state.write().await;
        match &active {
            Some(experiment) => {
                let tail = self
                    .store
                    .recent_telemetry(&experiment.id, self.config.telemetry_window)?;
                state.telemetry.seed(tail.iter());
                info!(
                    "Attached to active experiment {} ({} seeded samples)",
                    experiment.id,
                    state.telemetry.len()
                );
            }
            None => {
                state.telemetry.clear();
                info!("No active experiment; session idle");
            }
        }
        state.active_experiment = active;
        Ok(())
    }

    /// Consume bridge events until shutdown. Persistence failures on this
    /// path are logged and swallowed; the stream must keep flowing.
    pub async fn run(
        &self,
        mut events: broadcast::Receiver<BridgeEvent>,
        running: Arc<AtomicBool>,
    ) {
        while running.load(Ordering::SeqCst) {
            // The sleep arm keeps the shutdown flag honored even when the
            // broker goes quiet.
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => self.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Session coordinator lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {}
            }
        }
        info!("Session coordinator stopped");
    }

    async fn handle_event(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::LivePh(readings) => {
                let mut state = self.state.write().await;
                state.live_ph = readings;
                if state.active_experiment.is_some() && !readings.is_empty() {
                    state.telemetry.push(super::TelemetryPoint {
                        timestamp: Utc::now(),
                        ph: readings.as_array(),
                    });
                }
            }
            BridgeEvent::LoggedPh(readings) => self.record_sample(readings).await,
            BridgeEvent::Status(status) => self.reconcile_status(status).await,
            BridgeEvent::Event(event) => self.record_event(event).await,
            BridgeEvent::Health { health, alert } => {
                let mut state = self.state.write().await;
                state.server_health = health;
                drop(state);
                match alert {
                    Some(HealthAlert::WentOffline) => warn!("Reactor server went offline."),
                    Some(HealthAlert::BackOnline) => info!("Reactor server is back online."),
                    None => {}
                }
            }
            BridgeEvent::Connection(connection) => {
                let mut state = self.state.write().await;
                state.connection = connection;
            }
        }
    }

    /// Durably record an interval-aligned sample. No experiment active means
    /// no-op, not an error: the control loop emits regardless.
    async fn record_sample(&self, readings: PhReadings) {
        if readings.is_empty() {
            return;
        }
        let state = self.state.read().await;
        let Some(experiment_id) = state.active_experiment.as_ref().map(|e| e.id.clone()) else {
            return;
        };
        drop(state);
        if let Err(err) = self
            .store
            .append_telemetry(&experiment_id, Utc::now(), readings.as_array())
        {
            error!("Failed to record telemetry sample: {}", err);
        }
    }

    /// Mirror a control-process event into the rolling view and, while a run
    /// is active, into the durable log.
    async fn record_event(&self, event: EventMessage) {
        let mut state = self.state.write().await;
        state.event_log.push_back(event.clone());
        while state.event_log.len() > self.config.event_log_window {
            state.event_log.pop_front();
        }
        let active_id = state.active_experiment.as_ref().map(|e| e.id.clone());
        drop(state);

        if let Some(experiment_id) = active_id {
            let timestamp = event.timestamp.unwrap_or_else(Utc::now);
            if let Err(err) = self.store.append_log(
                &experiment_id,
                timestamp,
                event.level,
                &event.message,
                event.compartment,
            ) {
                error!("Failed to record experiment event: {}", err);
            }
        }
    }

    /// Fold a status summary, re-deriving truth from the store whenever the
    /// stream disagrees with it about the active experiment. The summary is
    /// a hint for this re-check, never a write authority.
    async fn reconcile_status(&self, status: StatusSummary) {
        let state = self.state.read().await;
        let known = state.active_experiment.as_ref().map(|e| e.id.clone());
        drop(state);

        if status.active_experiment != known {
            match self.store.active_experiment() {
                Ok(active) => {
                    let changed = active.as_ref().map(|e| e.id.as_str())
                        != known.as_deref();
                    if changed {
                        info!(
                            "Active experiment changed out of band; re-deriving from store ({:?})",
                            active.as_ref().map(|e| e.id.as_str())
                        );
                        let mut state = self.state.write().await;
                        match &active {
                            Some(experiment) => {
                                match self
                                    .store
                                    .recent_telemetry(&experiment.id, self.config.telemetry_window)
                                {
                                    Ok(tail) => state.telemetry.seed(tail.iter()),
                                    Err(err) => {
                                        error!("Failed to reseed telemetry window: {}", err);
                                        state.telemetry.clear();
                                    }
                                }
                            }
                            None => state.telemetry.clear(),
                        }
                        state.active_experiment = active;
                    }
                }
                Err(err) => error!("Failed to reconcile active experiment: {}", err),
            }
        }

        let mut state = self.state.write().await;
        state.status = status;
    }

    // ── operator actions ────────────────────────────────────────────────

    /// Start a new experiment and deploy its thresholds to the control loop.
    pub async fn start_experiment(
        &self,
        config: ExperimentConfig,
        project: ProjectRef,
    ) -> Result<StartedExperiment, SessionError> {
        let started = self.store.start_experiment(&config, project)?;
        self.attach().await?;

        // The control loop reloads the full configuration from the store on
        // any auto-threshold message; the band carried here is the overall
        // envelope, advisory only.
        let ph_min = config
            .thresholds
            .iter()
            .map(|r| r.min)
            .fold(f64::INFINITY, f64::min);
        let ph_max = config
            .thresholds
            .iter()
            .map(|r| r.max)
            .fold(f64::NEG_INFINITY, f64::max);
        let delivered = self
            .bridge
            .update_auto_thresholds(&AutoThresholdCommand {
                experiment_id: started.experiment_id.clone(),
                ph_min,
                ph_max,
            })
            .await;
        if !delivered {
            warn!("Auto-threshold deploy was dropped; control loop will pick the experiment up from the store");
        }

        info!("Experiment {} started", started.experiment_id);
        Ok(started)
    }

    /// Stop the active experiment, store first, then notify the control
    /// loop best-effort. Returns the stopped id, or `None` when nothing was
    /// active.
    pub async fn stop_experiment(&self) -> Result<Option<String>, SessionError> {
        let Some(experiment) = self.store.active_experiment()? else {
            return Ok(None);
        };
        self.store.stop_experiment(&experiment.id)?;

        if !self.bridge.publish_experiment_stop().await {
            warn!("Experiment-stop notice was dropped; control loop will notice on its next store poll");
        }

        let mut state = self.state.write().await;
        state.active_experiment = None;
        state.telemetry.clear();
        drop(state);

        info!("Experiment {} stopped", experiment.id);
        Ok(Some(experiment.id))
    }

    /// Fire a manual dose. Step count comes from the active experiment's
    /// configuration, falling back to the configured default when idle.
    /// Returns whether the command reached the transport.
    pub async fn manual_dose(&self, pump_id: u8) -> Result<bool, SessionError> {
        if pump_id == 0 || pump_id as usize > COMPARTMENT_COUNT {
            return Err(SessionError::Refused(format!(
                "pump id must be 1..={}, got {}",
                COMPARTMENT_COUNT, pump_id
            )));
        }
        let state = self.state.read().await;
        let steps = state
            .active_experiment
            .as_ref()
            .map(|e| e.manual_dose_steps)
            .unwrap_or(self.config.default_dose_steps);
        drop(state);

        let delivered = self
            .bridge
            .dose_pump(&ManualDoseCommand {
                pump_id,
                direction: DoseDirection::Forward,
                steps,
            })
            .await;
        if delivered {
            info!("Manual dose: pump {} for {} steps", pump_id, steps);
        } else {
            warn!("Manual dose for pump {} was dropped (bridge offline)", pump_id);
        }
        Ok(delivered)
    }

    /// Open a calibration sub-session.
    ///
    /// Refused outright while an experiment is active: probes must not be
    /// recalibrated mid-run. The guard asks the store, not the stream.
    pub async fn begin_calibration(
        &self,
        compartment: u8,
    ) -> Result<CalibrationSession, SessionError> {
        if let Some(experiment) = self.store.active_experiment()? {
            return Err(SessionError::Refused(format!(
                "cannot calibrate while experiment {} is active",
                experiment.id
            )));
        }
        CalibrationSession::open(
            Arc::clone(&self.bridge),
            self.store.clone(),
            compartment,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LogLevel, PhRange};

    fn coordinator() -> SessionCoordinator {
        let store = SqliteStore::in_memory().unwrap();
        // The bridge never connects in these tests; publishes drop silently.
        let bridge = Arc::new(ReactorBridge::new("redis://127.0.0.1:6379").unwrap());
        SessionCoordinator::new(store, bridge, SessionConfig::default())
    }

    fn experiment_config() -> ExperimentConfig {
        ExperimentConfig {
            name: "Run 1".to_string(),
            measurement_interval_mins: 1,
            thresholds: [
                PhRange { min: 6.8, max: 7.2 },
                PhRange { min: 6.8, max: 7.2 },
                PhRange { min: 6.5, max: 7.0 },
            ],
            max_pump_time_sec: 30,
            mixing_cooldown_sec: 120,
            manual_dose_steps: 40,
        }
    }

    fn new_project() -> ProjectRef {
        ProjectRef::New {
            name: "Reactor A".to_string(),
            researcher: "Dr. Smith".to_string(),
        }
    }

    fn readings(ph: f64) -> PhReadings {
        PhReadings {
            compartment_1: Some(ph),
            compartment_2: Some(ph + 0.1),
            compartment_3: None,
        }
    }

    #[tokio::test]
    async fn test_attach_with_no_active_experiment_is_idle() {
        let coordinator = coordinator();
        coordinator.attach().await.unwrap();
        let state = coordinator.state();
        let state = state.read().await;
        assert!(state.active_experiment.is_none());
        assert!(state.telemetry.is_empty());
    }

    #[tokio::test]
    async fn test_logged_sample_recorded_only_while_active() {
        let coordinator = coordinator();
        let started = coordinator
            .start_experiment(experiment_config(), new_project())
            .await
            .unwrap();

        coordinator
            .handle_event(BridgeEvent::LoggedPh(readings(7.0)))
            .await;
        assert_eq!(
            coordinator
                .store
                .telemetry_for_experiment(&started.experiment_id)
                .unwrap()
                .len(),
            1
        );

        coordinator.stop_experiment().await.unwrap();
        coordinator
            .handle_event(BridgeEvent::LoggedPh(readings(7.1)))
            .await;
        // No experiment active: the sample is dropped, not an error.
        assert_eq!(
            coordinator
                .store
                .telemetry_for_experiment(&started.experiment_id)
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_live_samples_feed_window_only_while_active() {
        let coordinator = coordinator();
        coordinator.attach().await.unwrap();

        coordinator
            .handle_event(BridgeEvent::LivePh(readings(7.0)))
            .await;
        assert!(coordinator.state().read().await.telemetry.is_empty());

        coordinator
            .start_experiment(experiment_config(), new_project())
            .await
            .unwrap();
        coordinator
            .handle_event(BridgeEvent::LivePh(readings(7.0)))
            .await;
        let state = coordinator.state();
        let state = state.read().await;
        assert_eq!(state.telemetry.len(), 1);
        assert_eq!(state.live_ph.compartment_1, Some(7.0));
    }

    #[tokio::test]
    async fn test_status_hint_triggers_rederivation_from_store() {
        let coordinator = coordinator();
        coordinator.attach().await.unwrap();

        // The experiment starts out of band; the coordinator only hears
        // about it through the status topic.
        let started = coordinator
            .store
            .start_experiment(&experiment_config(), new_project())
            .unwrap();

        coordinator
            .handle_event(BridgeEvent::Status(StatusSummary {
                health: Some("ok".to_string()),
                active_experiment: Some(started.experiment_id.clone()),
                db_connected: Some(true),
            }))
            .await;

        let state = coordinator.state();
        let state = state.read().await;
        assert_eq!(
            state.active_experiment.as_ref().map(|e| e.id.clone()),
            Some(started.experiment_id)
        );
        assert_eq!(state.status.health.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_store_wins_over_a_stale_status_hint() {
        let coordinator = coordinator();
        coordinator.attach().await.unwrap();

        // Status claims an experiment the store has never committed.
        coordinator
            .handle_event(BridgeEvent::Status(StatusSummary {
                health: None,
                active_experiment: Some("ghost-experiment".to_string()),
                db_connected: None,
            }))
            .await;

        let state = coordinator.state();
        let state = state.read().await;
        assert!(state.active_experiment.is_none());
    }

    #[tokio::test]
    async fn test_event_log_is_bounded() {
        let coordinator = coordinator();
        coordinator.attach().await.unwrap();

        for i in 0..120 {
            coordinator
                .handle_event(BridgeEvent::Event(EventMessage {
                    level: LogLevel::Info,
                    message: format!("event {}", i),
                    compartment: None,
                    timestamp: None,
                }))
                .await;
        }

        let state = coordinator.state();
        let state = state.read().await;
        assert_eq!(state.event_log.len(), 100);
        assert_eq!(state.event_log.front().unwrap().message, "event 20");
        assert_eq!(state.event_log.back().unwrap().message, "event 119");
    }

    #[tokio::test]
    async fn test_events_persisted_only_while_active() {
        let coordinator = coordinator();
        let started = coordinator
            .start_experiment(experiment_config(), new_project())
            .await
            .unwrap();

        coordinator
            .handle_event(BridgeEvent::Event(EventMessage {
                level: LogLevel::Warning,
                message: "pH drift".to_string(),
                compartment: Some(2),
                timestamp: None,
            }))
            .await;

        let logs = coordinator
            .store
            .logs_for_experiment(&started.experiment_id)
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Warning);
        assert_eq!(logs[0].compartment, Some(2));
    }

    #[tokio::test]
    async fn test_stop_experiment_clears_session_and_is_idempotent() {
        let coordinator = coordinator();
        let started = coordinator
            .start_experiment(experiment_config(), new_project())
            .await
            .unwrap();

        let stopped = coordinator.stop_experiment().await.unwrap();
        assert_eq!(stopped, Some(started.experiment_id));
        assert!(coordinator.state().read().await.active_experiment.is_none());

        // Second stop finds nothing active.
        assert_eq!(coordinator.stop_experiment().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_manual_dose_validates_pump_and_reports_drop() {
        let coordinator = coordinator();
        coordinator
            .start_experiment(experiment_config(), new_project())
            .await
            .unwrap();

        // The bridge is offline, so the command is dropped and reported.
        let delivered = coordinator.manual_dose(1).await.unwrap();
        assert!(!delivered);

        let err = coordinator.manual_dose(0).await.unwrap_err();
        assert!(matches!(err, SessionError::Refused(_)));
        let err = coordinator.manual_dose(4).await.unwrap_err();
        assert!(matches!(err, SessionError::Refused(_)));
    }

    #[tokio::test]
    async fn test_calibration_refused_while_experiment_active() {
        let coordinator = coordinator();
        coordinator
            .start_experiment(experiment_config(), new_project())
            .await
            .unwrap();

        let err = coordinator.begin_calibration(1).await.unwrap_err();
        assert!(matches!(err, SessionError::Refused(_)));
    }
}
