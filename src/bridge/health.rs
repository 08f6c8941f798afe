// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Connection and server-health state machines.

use serde::{Deserialize, Serialize};

/// Transport connection state. The bridge only reflects what the transport
/// client reports; reconnection policy lives in the client, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Liveness of the external control process, inferred from its heartbeat.
///
/// `Unknown` until the first observation arrives. The first observation is
/// usually the replayed last-known heartbeat delivered right after connect,
/// which is why `Unknown -> Online` must never raise an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerHealth {
    Unknown,
    Online,
    Offline,
}

/// Operator-visible health transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAlert {
    WentOffline,
    BackOnline,
}

impl ServerHealth {
    /// Fold one heartbeat observation into the machine.
    ///
    /// Returns an alert only when moving between two known states; the
    /// initial transition out of `Unknown` is silent.
    pub fn observe(&mut self, online: bool) -> Option<HealthAlert> {
        let next = if online {
            ServerHealth::Online
        } else {
            ServerHealth::Offline
        };
        let alert = match (*self, next) {
            (ServerHealth::Online, ServerHealth::Offline) => Some(HealthAlert::WentOffline),
            (ServerHealth::Offline, ServerHealth::Online) => Some(HealthAlert::BackOnline),
            _ => None,
        };
        *self = next;
        alert
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_online_observation_is_suppressed() {
        let mut health = ServerHealth::Unknown;
        assert_eq!(health.observe(true), None);
        assert_eq!(health, ServerHealth::Online);
    }

    #[test]
    fn test_initial_offline_observation_is_suppressed() {
        let mut health = ServerHealth::Unknown;
        assert_eq!(health.observe(false), None);
        assert_eq!(health, ServerHealth::Offline);
    }

    #[test]
    fn test_known_transitions_alert_exactly_once() {
        let mut health = ServerHealth::Unknown;
        assert_eq!(health.observe(true), None);
        assert_eq!(health.observe(false), Some(HealthAlert::WentOffline));
        assert_eq!(health.observe(true), Some(HealthAlert::BackOnline));
    }

    #[test]
    fn test_repeated_observations_do_not_realert() {
        let mut health = ServerHealth::Unknown;
        health.observe(true);
        assert_eq!(health.observe(true), None);
        health.observe(false);
        assert_eq!(health.observe(false), None);
    }
}
