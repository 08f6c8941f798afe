// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Typed payload variants for every broker topic.
//!
//! Each incoming topic gets an explicit struct and a parse-validate-reject
//! step here. Anything that fails to parse is reported as a
//! [`PayloadError`] and dropped by the receive loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::health::{ConnectionState, HealthAlert, ServerHealth};
use super::{
    TOPIC_CALIBRATION_RAW, TOPIC_EVENTS, TOPIC_SERVER_STATUS, TOPIC_STATUS, TOPIC_TELEMETRY_LOGGED,
    TOPIC_TELEMETRY_PH,
};
use crate::store::LogLevel;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed payload on {topic}: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unexpected heartbeat status '{0}'")]
    UnknownHeartbeat(String),
    #[error("no handler for topic {0}")]
    UnknownTopic(String),
}

/// Per-compartment pH readings. The wire keys are the compartment numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhReadings {
    #[serde(rename = "1", default, skip_serializing_if = "Option::is_none")]
    pub compartment_1: Option<f64>,
    #[serde(rename = "2", default, skip_serializing_if = "Option::is_none")]
    pub compartment_2: Option<f64>,
    #[serde(rename = "3", default, skip_serializing_if = "Option::is_none")]
    pub compartment_3: Option<f64>,
}

impl PhReadings {
    pub fn as_array(&self) -> [Option<f64>; 3] {
        [self.compartment_1, self.compartment_2, self.compartment_3]
    }

    pub fn is_empty(&self) -> bool {
        self.as_array().iter().all(Option::is_none)
    }
}

/// Control-process status summary. Every field is optional on the wire; the
/// summary is an advisory hint, never an authority over persisted state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSummary {
    #[serde(default)]
    pub health: Option<String>,
    #[serde(default)]
    pub active_experiment: Option<String>,
    #[serde(default)]
    pub db_connected: Option<bool>,
}

/// One entry of the control process's event/log stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub compartment: Option<u8>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Heartbeat payload, `{"status": "online" | "offline"}`.
#[derive(Debug, Clone, Deserialize)]
struct Heartbeat {
    status: String,
}

/// Raw probe signal emitted during a calibration session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    pub raw_voltage: f64,
}

/// Pump dose direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoseDirection {
    Forward,
    Reverse,
}

/// Manual dose command, `reactor/control/pump/manual`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualDoseCommand {
    pub pump_id: u8,
    pub direction: DoseDirection,
    pub steps: u32,
}

/// Auto-threshold update, `reactor/control/pump/auto`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoThresholdCommand {
    pub experiment_id: String,
    pub ph_min: f64,
    pub ph_max: f64,
}

/// Typed event fanned out to bridge subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Live pH for display; not recorded.
    LivePh(PhReadings),
    /// Interval-aligned pH sample; the coordinator records these.
    LoggedPh(PhReadings),
    /// Status summary from the control process.
    Status(StatusSummary),
    /// Event/log stream entry.
    Event(EventMessage),
    /// Derived server-health transition. `alert` is set only for
    /// transitions between two known states.
    Health {
        health: ServerHealth,
        alert: Option<HealthAlert>,
    },
    /// Transport connection state change.
    Connection(ConnectionState),
}

/// Parse one raw heartbeat observation into an online flag.
pub(super) fn parse_heartbeat(payload: &str) -> Result<bool, PayloadError> {
    let heartbeat: Heartbeat =
        serde_json::from_str(payload).map_err(|source| PayloadError::Malformed {
            topic: TOPIC_SERVER_STATUS.to_string(),
            source,
        })?;
    match heartbeat.status.as_str() {
        "online" => Ok(true),
        "offline" => Ok(false),
        other => Err(PayloadError::UnknownHeartbeat(other.to_string())),
    }
}

/// Parse the raw-signal payload used by calibration sessions.
pub fn parse_raw_signal(payload: &str) -> Result<RawSignal, PayloadError> {
    serde_json::from_str(payload).map_err(|source| PayloadError::Malformed {
        topic: TOPIC_CALIBRATION_RAW.to_string(),
        source,
    })
}

/// Parse a message from one of the multiplexed subscriptions into a typed
/// event. Heartbeats are handled separately because they drive the health
/// state machine rather than mapping 1:1 onto an event.
pub(super) fn parse_topic(topic: &str, payload: &str) -> Result<BridgeEvent, PayloadError> {
    let malformed = |source| PayloadError::Malformed {
        topic: topic.to_string(),
        source,
    };
    match topic {
        TOPIC_TELEMETRY_PH => Ok(BridgeEvent::LivePh(
            serde_json::from_str(payload).map_err(malformed)?,
        )),
        TOPIC_TELEMETRY_LOGGED => Ok(BridgeEvent::LoggedPh(
            serde_json::from_str(payload).map_err(malformed)?,
        )),
        TOPIC_STATUS => Ok(BridgeEvent::Status(
            serde_json::from_str(payload).map_err(malformed)?,
        )),
        TOPIC_EVENTS => Ok(BridgeEvent::Event(
            serde_json::from_str(payload).map_err(malformed)?,
        )),
        other => Err(PayloadError::UnknownTopic(other.to_string())),
    }
}
