//! Wiring of indexer, bus and actor directory into one process-wide runtime.

use crate::bus::{LocalBus, MessageBus};
use crate::config::PresenceConfig;
use crate::directory::LocalDirectory;
use crate::protocol::ServerMessage;
use crate::session::{SessionContext, SessionCoordinator};
use crate::spatial::QuadTreeIndexer;
use crate::types::PlayerId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Everything sessions share inside one server process.
pub struct PresenceRuntime {
    config: PresenceConfig,
    indexer: Arc<QuadTreeIndexer>,
    bus: Arc<LocalBus>,
    directory: Arc<LocalDirectory>,
}

impl PresenceRuntime {
    /// Builds the runtime after validating `config`.
    pub fn new(config: PresenceConfig) -> Result<Self, String> {
        config.validate()?;

        let indexer = Arc::new(config.indexer());
        let bus = Arc::new(LocalBus::with_buffer(config.subscription_buffer));
        let directory = Arc::new(LocalDirectory::new(&config, indexer.clone(), bus.clone()));

        info!(
            depth = config.depth,
            tick_ms = config.tick_interval_ms,
            aoi_radius = config.aoi_radius,
            "Presence runtime ready"
        );

        Ok(Self {
            config,
            indexer,
            bus,
            directory,
        })
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    pub fn indexer(&self) -> &Arc<QuadTreeIndexer> {
        &self.indexer
    }

    pub fn bus(&self) -> &Arc<LocalBus> {
        &self.bus
    }

    pub fn directory(&self) -> &Arc<LocalDirectory> {
        &self.directory
    }

    pub fn session_context(&self) -> SessionContext {
        let bus: Arc<dyn MessageBus> = self.bus.clone();
        SessionContext {
            indexer: self.indexer.clone(),
            bus,
            directory: self.directory.clone(),
            aoi_radius: self.config.aoi_radius,
        }
    }

    /// Starts a session for `player_id` that pushes to `outbound`.
    pub fn session(
        &self,
        player_id: impl Into<PlayerId>,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> SessionCoordinator {
        SessionCoordinator::new(player_id, self.session_context(), outbound)
    }

    /// Starts the idle-actor sweepers. Abort the returned tasks to stop them.
    pub fn start_maintenance(&self) -> Vec<JoinHandle<()>> {
        self.directory
            .spawn_eviction_sweepers(self.config.eviction_sweep())
    }

    /// Stops every actor and closes the bus.
    ///
    /// Sessions should be closed first so their cells are left cleanly.
    pub async fn shutdown(&self) {
        self.directory.shutdown().await;
        self.bus.close();
        info!(stats = ?self.bus.stats(), "Presence runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CellId, Position, WorldBounds};

    #[test]
    fn test_invalid_config_is_refused() {
        let config = PresenceConfig {
            depth: 0,
            ..PresenceConfig::default()
        };
        assert!(PresenceRuntime::new(config).is_err());
    }

    #[tokio::test]
    async fn test_sessions_share_actors() {
        let runtime = PresenceRuntime::new(PresenceConfig {
            bounds: WorldBounds::new(-100.0, 100.0, -100.0, 100.0),
            depth: 2,
            ..PresenceConfig::default()
        })
        .unwrap();

        let (outbound, _client) = mpsc::channel(16);
        let mut session = runtime.session("alice", outbound);
        session
            .handle_position(Position::new("alice", 5.0, 0.0, 5.0))
            .await
            .unwrap();

        let cell = runtime.indexer().cell_id_at(5.0, 5.0);
        assert_eq!(cell, CellId::from("0-3-0"));
        let players = runtime.directory().cells().get(cell.as_str()).get_players().await.unwrap();
        assert_eq!(players.len(), 1);

        session.close().await;
        runtime.shutdown().await;
        assert!(runtime.bus().is_closed());
        assert!(runtime.directory().cells().is_empty());
    }
}
