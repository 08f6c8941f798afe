// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Broker client: one connection pair per process, typed event fan-out.

use anyhow::Result;
use futures::StreamExt;
use log::{debug, error, info, warn};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};

use super::health::{ConnectionState, ServerHealth};
use super::payload::{
    parse_heartbeat, parse_topic, AutoThresholdCommand, BridgeEvent, ManualDoseCommand,
};
use super::{
    KEY_SERVER_STATUS, TOPIC_CONTROL_AUTO, TOPIC_CONTROL_CALIBRATION, TOPIC_CONTROL_MANUAL,
    TOPIC_EVENTS, TOPIC_SERVER_STATUS, TOPIC_STATUS, TOPIC_TELEMETRY_LOGGED, TOPIC_TELEMETRY_PH,
};

/// Capacity of the broadcast channel fanning events out to consumers.
const EVENT_BUFFER_SIZE: usize = 256;

/// The process-wide bridge to the reactor's message broker.
///
/// Constructed once at startup and injected into consumers; holds one
/// multiplexed connection for publishes plus one pub/sub connection driven
/// by [`ReactorBridge::run`]. All publishes are fire-and-forget: the return
/// value only says whether a publish was handed to the transport, and a
/// dropped command is the caller's to report, not ours to retry.
pub struct ReactorBridge {
    client: Client,
    events: broadcast::Sender<BridgeEvent>,
    connection: Arc<RwLock<ConnectionState>>,
    health: Arc<RwLock<ServerHealth>>,
    publish_conn: Arc<Mutex<Option<MultiplexedConnection>>>,
}

impl ReactorBridge {
    /// Create a bridge for the given broker URL. No I/O happens until
    /// [`ReactorBridge::connect`].
    pub fn new(broker_url: &str) -> Result<Self> {
        let client = Client::open(broker_url)?;
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Ok(Self {
            client,
            events,
            connection: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            health: Arc::new(RwLock::new(ServerHealth::Unknown)),
            publish_conn: Arc::new(Mutex::new(None)),
        })
    }

    /// Subscribe to the typed event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<BridgeEvent> {
        self.events.subscribe()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection.read().await
    }

    pub async fn server_health(&self) -> ServerHealth {
        *self.health.read().await
    }

    /// Establish the publish connection and replay the last-known heartbeat.
    ///
    /// The heartbeat mirror key is read exactly once here and folded through
    /// the health machine, so the replayed value lands as an initial
    /// `Unknown -> X` transition and raises no alert.
    pub async fn connect(&self) -> Result<()> {
        self.set_connection(ConnectionState::Connecting).await;

        let conn = match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(err) => {
                self.set_connection(ConnectionState::Disconnected).await;
                return Err(err.into());
            }
        };
        *self.publish_conn.lock().await = Some(conn);

        if let Some(payload) = self.read_retained_heartbeat().await {
            match parse_heartbeat(&payload) {
                Ok(online) => self.observe_health(online).await,
                Err(err) => warn!("Ignoring stale heartbeat mirror: {}", err),
            }
        }

        self.set_connection(ConnectionState::Connected).await;
        info!("Bridge connected to broker");
        Ok(())
    }

    /// Drive the subscription side until the broker connection drops.
    ///
    /// Runs as a daemon task. When the message stream ends the bridge
    /// reflects `Disconnected` and returns; any reconnect policy beyond the
    /// transport client's own is out of scope here.
    pub async fn run(&self) -> Result<()> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for topic in [
            TOPIC_TELEMETRY_PH,
            TOPIC_TELEMETRY_LOGGED,
            TOPIC_STATUS,
            TOPIC_EVENTS,
            TOPIC_SERVER_STATUS,
        ] {
            pubsub.subscribe(topic).await?;
        }
        debug!("Bridge subscriptions established");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let topic = msg.get_channel_name().to_string();
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!("Undecodable payload on {}: {}", topic, err);
                    continue;
                }
            };

            if topic == TOPIC_SERVER_STATUS {
                match parse_heartbeat(&payload) {
                    Ok(online) => self.observe_health(online).await,
                    Err(err) => warn!("Dropping heartbeat: {}", err),
                }
                continue;
            }

            match parse_topic(&topic, &payload) {
                Ok(event) => self.emit(event),
                Err(err) => warn!("Dropping message: {}", err),
            }
        }

        warn!("Broker message stream closed");
        self.set_connection(ConnectionState::Disconnected).await;
        Ok(())
    }

    // ── command publishes (fire-and-forget) ─────────────────────────────

    pub async fn dose_pump(&self, command: &ManualDoseCommand) -> bool {
        match serde_json::to_value(command) {
            Ok(value) => self.publish_json(TOPIC_CONTROL_MANUAL, value).await,
            Err(err) => {
                error!("Failed to encode dose command: {}", err);
                false
            }
        }
    }

    pub async fn update_auto_thresholds(&self, command: &AutoThresholdCommand) -> bool {
        match serde_json::to_value(command) {
            Ok(value) => self.publish_json(TOPIC_CONTROL_AUTO, value).await,
            Err(err) => {
                error!("Failed to encode threshold command: {}", err);
                false
            }
        }
    }

    /// Tell the control loop the active experiment was stopped.
    pub async fn publish_experiment_stop(&self) -> bool {
        self.publish_json(TOPIC_CONTROL_AUTO, json!({"action": "stop"}))
            .await
    }

    /// Ask the control process to start emitting raw signal for a compartment.
    pub async fn start_calibration_stream(&self, compartment: u8) -> bool {
        self.publish_json(
            TOPIC_CONTROL_CALIBRATION,
            json!({"command": "start", "compartment": compartment}),
        )
        .await
    }

    /// Stop raw-signal emission. Must be sent on every calibration exit path.
    pub async fn stop_calibration_stream(&self) -> bool {
        self.publish_json(TOPIC_CONTROL_CALIBRATION, json!({"command": "stop"}))
            .await
    }

    /// Have the control process reload calibrations so live pH conversion
    /// picks up a freshly saved transform without a restart.
    pub async fn reload_calibration(&self) -> bool {
        self.publish_json(
            TOPIC_CONTROL_CALIBRATION,
            json!({"action": "reload_calibration"}),
        )
        .await
    }

    /// Open an additional subscription connection scoped to a single topic,
    /// separate from the multiplexed main stream. Used by calibration
    /// sessions so their raw-signal feed can be torn down independently.
    pub async fn isolated_subscription(&self, topic: &str) -> Result<redis::aio::PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;
        Ok(pubsub)
    }

    // ── internals ───────────────────────────────────────────────────────

    async fn read_retained_heartbeat(&self) -> Option<String> {
        let mut guard = self.publish_conn.lock().await;
        let conn = guard.as_mut()?;
        match conn.get::<_, Option<String>>(KEY_SERVER_STATUS).await {
            Ok(value) => value,
            Err(err) => {
                debug!("No heartbeat mirror available: {}", err);
                None
            }
        }
    }

    async fn observe_health(&self, online: bool) {
        let mut health = self.health.write().await;
        let alert = health.observe(online);
        let snapshot = *health;
        drop(health);
        self.emit(BridgeEvent::Health {
            health: snapshot,
            alert,
        });
    }

    async fn set_connection(&self, state: ConnectionState) {
        let mut connection = self.connection.write().await;
        if *connection == state {
            return;
        }
        *connection = state;
        drop(connection);
        self.emit(BridgeEvent::Connection(state));
    }

    async fn publish_json(&self, topic: &str, value: serde_json::Value) -> bool {
        if *self.connection.read().await != ConnectionState::Connected {
            warn!("Dropping publish to {}: bridge not connected", topic);
            return false;
        }
        let payload = value.to_string();
        let mut guard = self.publish_conn.lock().await;
        let Some(conn) = guard.as_mut() else {
            warn!("Dropping publish to {}: no connection", topic);
            return false;
        };
        match conn.publish::<_, _, ()>(topic, &payload).await {
            Ok(()) => true,
            Err(err) => {
                error!("Publish to {} failed: {}", topic, err);
                false
            }
        }
    }

    fn emit(&self, event: BridgeEvent) {
        // No active receivers is not an error.
        let _ = self.events.send(event);
    }
}
