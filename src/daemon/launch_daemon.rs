// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-bioreactor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Management Module
//!
//! Runs the long-lived services of the reactor console:
//!
//! - The broker bridge receive loop
//! - The session coordinator folding events into state
//! - A heartbeat task for liveness logging
//!
//! Each service runs as an independent Tokio task; the daemon tracks their
//! handles and coordinates graceful shutdown through a shared running flag.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_bioreactor::{config::Config, daemon::Daemon};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = Config::default();
//!
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     // Later, trigger a graceful shutdown
//!     daemon.shutdown();
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

use anyhow::Result;
use log::{debug, error, info};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

use crate::bridge::ReactorBridge;
use crate::config::Config;
use crate::session::SessionCoordinator;
use crate::store::SqliteStore;

/// Coordinates the console's background services.
///
/// The `running` flag is shared with every task; each task checks it
/// periodically to decide whether to keep going or terminate gracefully.
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    store: Option<SqliteStore>,
    bridge: Option<Arc<ReactorBridge>>,
    coordinator: Option<Arc<SessionCoordinator>>,
}

impl Default for Daemon {
    fn default() -> Self {
        Self::new()
    }
}

impl Daemon {
    pub fn new() -> Self {
        Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            store: None,
            bridge: None,
            coordinator: None,
        }
    }

    /// Launch all services: open the store, connect the bridge, attach the
    /// session coordinator, then spawn the long-lived tasks.
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        let store = SqliteStore::open(&config.database.path)
            .map_err(|err| anyhow::anyhow!("failed to open reactor database: {}", err))?;

        let bridge = Arc::new(ReactorBridge::new(&config.broker.url)?);
        bridge.connect().await?;

        let coordinator = Arc::new(SessionCoordinator::new(
            store.clone(),
            Arc::clone(&bridge),
            config.session.clone(),
        ));
        coordinator
            .attach()
            .await
            .map_err(|err| anyhow::anyhow!("failed to attach session: {}", err))?;

        self.start_bridge_loop(Arc::clone(&bridge));
        self.start_session_loop(Arc::clone(&bridge), Arc::clone(&coordinator));
        self.start_heartbeat();

        self.store = Some(store);
        self.bridge = Some(bridge);
        self.coordinator = Some(coordinator);
        Ok(())
    }

    /// The store handle, once launched.
    pub fn store(&self) -> Option<SqliteStore> {
        self.store.clone()
    }

    /// The bridge handle, once launched.
    pub fn bridge(&self) -> Option<Arc<ReactorBridge>> {
        self.bridge.clone()
    }

    /// The session coordinator, once launched.
    pub fn coordinator(&self) -> Option<Arc<SessionCoordinator>> {
        self.coordinator.clone()
    }

    fn start_bridge_loop(&mut self, bridge: Arc<ReactorBridge>) {
        info!("Starting bridge receive loop");
        let task = tokio::spawn(async move {
            if let Err(err) = bridge.run().await {
                error!("Bridge receive loop failed: {}", err);
            }
            Ok(())
        });
        self.tasks.push(task);
    }

    fn start_session_loop(
        &mut self,
        bridge: Arc<ReactorBridge>,
        coordinator: Arc<SessionCoordinator>,
    ) {
        info!("Starting session coordinator");
        let events = bridge.subscribe();
        let running = self.running.clone();
        let task = tokio::spawn(async move {
            coordinator.run(events, running).await;
            Ok(())
        });
        self.tasks.push(task);
    }

    fn start_heartbeat(&mut self) {
        info!("Starting heartbeat monitor");
        let running = self.running.clone();
        let task = tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                debug!("Daemon heartbeat: running");
                time::sleep(Duration::from_secs(60)).await;
            }
            Ok(())
        });
        self.tasks.push(task);
    }

    /// Signal all tasks to terminate gracefully.
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
    }

    /// Wait for all tasks to complete.
    ///
    /// Call after [`Daemon::shutdown`]. Tasks blocked on the broker stream
    /// get a bounded grace period; a hung task is logged, not waited on
    /// forever.
    pub async fn join(self) -> Result<()> {
        for task in self.tasks {
            match tokio::time::timeout(Duration::from_secs(5), task).await {
                Ok(result) => {
                    if let Err(e) = result {
                        log::error!("Task panicked: {}", e);
                    }
                }
                Err(_) => {
                    log::warn!("Task did not complete within timeout period, may be hung");
                }
            }
        }
        Ok(())
    }
}
