// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Operator console for a bioreactor pH control rig.
//!
//! The hard control logic (PID dosing, sensor drivers) runs in an external
//! process; this crate is the operator-facing layer around it:
//!
//! - [`store`]: durable experiment records with the single-active-experiment
//!   lifecycle and cascading deletes
//! - [`bridge`]: the broker connection: typed telemetry in, best-effort
//!   dosing/calibration commands out, connection and server-health state
//! - [`session`]: the coordinator reconciling the durable record with the
//!   live stream, plus the calibration sub-session
//! - [`calibration`]: two-point probe calibration math and freshness
//! - [`export`]: point-in-time tabular export of an experiment
//! - [`daemon`]: task lifecycle gluing the above together
//! - [`config`]: YAML configuration with CLI overrides

pub mod bridge;
pub mod calibration;
pub mod config;
pub mod daemon;
pub mod export;
pub mod session;
pub mod store;
