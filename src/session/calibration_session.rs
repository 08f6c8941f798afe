// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Interactive two-point calibration session.
//!
//! While a session is open the control process streams the selected
//! compartment's raw signal on an isolated subscription. The session owns
//! that subscription's lifecycle: a start envelope on entry, a stop envelope
//! on every exit path. Leaving the raw stream running unattended wastes the
//! external process's sampling mode, so `close()` must be called even when a
//! step fails.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use log::warn;

use super::SessionError;
use crate::bridge::{parse_raw_signal, ReactorBridge, TOPIC_CALIBRATION_RAW};
use crate::calibration::{CalibrationError, CalibrationTransform};
use crate::store::{CalibrationRecord, SqliteStore};

/// Which buffer reading a voltage lock belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSlot {
    First,
    Second,
}

#[derive(Debug, Clone, Copy)]
struct LockedBuffer {
    ph: f64,
    voltage: f64,
}

pub struct CalibrationSession {
    bridge: Arc<ReactorBridge>,
    store: SqliteStore,
    compartment: u8,
    subscription: Option<redis::aio::PubSub>,
    latest_raw: Option<f64>,
    buffers: [Option<LockedBuffer>; 2],
    closed: bool,
}

impl std::fmt::Debug for CalibrationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalibrationSession")
            .field("compartment", &self.compartment)
            .field("latest_raw", &self.latest_raw)
            .field("buffers", &self.buffers)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl CalibrationSession {
    pub(super) async fn open(
        bridge: Arc<ReactorBridge>,
        store: SqliteStore,
        compartment: u8,
    ) -> Result<Self, SessionError> {
        let subscription = bridge
            .isolated_subscription(TOPIC_CALIBRATION_RAW)
            .await
            .map_err(|err| SessionError::Transport(err.to_string()))?;

        if !bridge.start_calibration_stream(compartment).await {
            return Err(SessionError::Transport(
                "raw-signal start command was dropped".to_string(),
            ));
        }

        Ok(Self {
            bridge,
            store,
            compartment,
            subscription: Some(subscription),
            latest_raw: None,
            buffers: [None, None],
            closed: false,
        })
    }

    pub fn compartment(&self) -> u8 {
        self.compartment
    }

    /// Last raw voltage seen on the isolated stream.
    pub fn latest_raw(&self) -> Option<f64> {
        self.latest_raw
    }

    /// Wait for the next raw-signal message. Malformed payloads are dropped;
    /// `None` means the subscription ended.
    pub async fn next_raw(&mut self) -> Option<f64> {
        let subscription = self.subscription.as_mut()?;
        let mut stream = subscription.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("Undecodable raw-signal payload: {}", err);
                    continue;
                }
            };
            match parse_raw_signal(&payload) {
                Ok(signal) => {
                    drop(stream);
                    self.latest_raw = Some(signal.raw_voltage);
                    return self.latest_raw;
                }
                Err(err) => warn!("Dropping raw-signal message: {}", err),
            }
        }
        None
    }

    /// Lock the current raw voltage against a buffer's known pH.
    pub fn lock_buffer(&mut self, slot: BufferSlot, ph: f64) -> Result<f64, CalibrationError> {
        let voltage = self.latest_raw.ok_or(CalibrationError::NoSignal)?;
        self.buffers[slot_index(slot)] = Some(LockedBuffer { ph, voltage });
        Ok(voltage)
    }

    pub fn unlock_buffer(&mut self, slot: BufferSlot) {
        self.buffers[slot_index(slot)] = None;
    }

    /// Switch the session to another compartment: locked voltages are void
    /// and the control process must re-aim its raw stream.
    pub async fn switch_compartment(&mut self, compartment: u8) -> Result<(), SessionError> {
        self.buffers = [None, None];
        self.latest_raw = None;
        self.compartment = compartment;
        if !self.bridge.stop_calibration_stream().await
            || !self.bridge.start_calibration_stream(compartment).await
        {
            return Err(SessionError::Transport(
                "raw-signal restart command was dropped".to_string(),
            ));
        }
        Ok(())
    }

    /// Preview the transform the current locks would produce.
    pub fn computed_transform(&self) -> Result<CalibrationTransform, CalibrationError> {
        let first = self.buffers[0].ok_or(CalibrationError::VoltageNotLocked(1))?;
        let second = self.buffers[1].ok_or(CalibrationError::VoltageNotLocked(2))?;
        CalibrationTransform::two_point(first.ph, first.voltage, second.ph, second.voltage)
    }

    /// Persist the calibration and tell the control process to reload.
    ///
    /// The saved record is immediately the compartment's current one. Locks
    /// are cleared afterwards so a follow-up calibration starts fresh.
    pub async fn save(&mut self, researcher: &str) -> Result<CalibrationRecord, SessionError> {
        let transform = self.computed_transform()?;
        let record = self.store.save_calibration(
            self.compartment,
            transform.slope,
            transform.intercept,
            researcher,
            Utc::now(),
        )?;

        if !self.bridge.reload_calibration().await {
            warn!("Calibration reload notice was dropped; control loop keeps the old transform until restart");
        }

        self.buffers = [None, None];
        Ok(record)
    }

    /// Tear the session down: stop the raw stream and release the isolated
    /// subscription. Safe to call more than once; every exit path must get
    /// here.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.subscription = None;
        if !self.bridge.stop_calibration_stream().await {
            warn!("Raw-signal stop command was dropped; control process may keep sampling");
        }
    }
}

impl Drop for CalibrationSession {
    fn drop(&mut self) {
        if !self.closed {
            // Can't publish from a sync drop; make the leak loud instead.
            warn!(
                "Calibration session for compartment {} dropped without close(); \
                 raw-signal stream may still be running",
                self.compartment
            );
        }
    }
}

fn slot_index(slot: BufferSlot) -> usize {
    match slot {
        BufferSlot::First => 0,
        BufferSlot::Second => 1,
    }
}
