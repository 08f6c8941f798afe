// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Telemetry/command bridge
//!
//! Maintains the single long-lived broker connection for the whole process,
//! multiplexes every topic subscription through it, and exposes a minimal
//! fire-and-forget command-publish surface. Incoming payloads are parsed and
//! validated at this boundary; malformed messages are logged and dropped,
//! never forwarded as partial state.
//!
//! The bridge observes; it never persists. Durable writes belong to
//! [`crate::store`].

mod client;
mod health;
mod payload;

pub use client::ReactorBridge;
pub use health::{ConnectionState, HealthAlert, ServerHealth};
pub use payload::{
    parse_raw_signal, AutoThresholdCommand, BridgeEvent, DoseDirection, EventMessage,
    ManualDoseCommand, PayloadError, PhReadings, RawSignal, StatusSummary,
};

/// Live per-compartment pH, display only.
pub const TOPIC_TELEMETRY_PH: &str = "reactor/telemetry/ph";
/// Interval-aligned pH samples, the ones worth recording durably.
pub const TOPIC_TELEMETRY_LOGGED: &str = "reactor/telemetry/logged";
/// Control-process status summary (advisory, never a write authority).
pub const TOPIC_STATUS: &str = "reactor/status";
/// Append-only event/log stream mirrored into the operator view.
pub const TOPIC_EVENTS: &str = "reactor/events";
/// Control-process heartbeat.
pub const TOPIC_SERVER_STATUS: &str = "reactor/server/status";
/// Raw probe signal, emitted only while a calibration session runs.
pub const TOPIC_CALIBRATION_RAW: &str = "reactor/calibration/raw";

/// Manual dose commands.
pub const TOPIC_CONTROL_MANUAL: &str = "reactor/control/pump/manual";
/// Auto-threshold updates and the experiment-stop notice.
pub const TOPIC_CONTROL_AUTO: &str = "reactor/control/pump/auto";
/// Calibration start/stop/reload envelopes.
pub const TOPIC_CONTROL_CALIBRATION: &str = "reactor/control/calibration";

/// Key-value mirror of the last heartbeat, read once at connect. Stands in
/// for a retained message: the broker's pub/sub channels do not replay.
pub const KEY_SERVER_STATUS: &str = "reactor:server:status";
