//! Actor directory: resolves cell and player ids to live actor handles.

use crate::actor::{ActorRegistry, CellActor, CellHandle, PlayerActor, PlayerHandle};
use crate::bus::MessageBus;
use crate::config::PresenceConfig;
use crate::spatial::QuadTreeIndexer;
use crate::types::CellId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Lookup of cell and player actors.
///
/// Both lookups are idempotent and create the actor on first use.
pub trait ActorDirectory: Send + Sync + 'static {
    fn cell(&self, cell_id: &CellId) -> CellHandle;

    fn player(&self, player_id: &str) -> PlayerHandle;
}

/// In-process directory backed by one [`ActorRegistry`] per actor kind.
pub struct LocalDirectory {
    cells: Arc<ActorRegistry<CellActor>>,
    players: Arc<ActorRegistry<PlayerActor>>,
}

impl LocalDirectory {
    pub fn new(
        config: &PresenceConfig,
        indexer: Arc<QuadTreeIndexer>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let tick_interval = config.tick_interval();
        let cells = ActorRegistry::new(config.mailbox_capacity, config.cell_idle_ttl(), move |key| {
            CellActor::new(CellId::from(key), bus.clone(), tick_interval)
        });
        let players = ActorRegistry::new(
            config.mailbox_capacity,
            config.player_idle_ttl(),
            move |key| PlayerActor::new(key, indexer.clone()),
        );

        Self {
            cells: Arc::new(cells),
            players: Arc::new(players),
        }
    }

    pub fn cells(&self) -> &Arc<ActorRegistry<CellActor>> {
        &self.cells
    }

    pub fn players(&self) -> &Arc<ActorRegistry<PlayerActor>> {
        &self.players
    }

    /// Runs one eviction pass over both registries.
    pub async fn evict_idle(&self) -> usize {
        self.cells.evict_idle().await + self.players.evict_idle().await
    }

    /// Starts background eviction for both registries.
    pub fn spawn_eviction_sweepers(&self, every: Duration) -> Vec<JoinHandle<()>> {
        vec![
            self.cells.spawn_eviction_sweeper(every),
            self.players.spawn_eviction_sweeper(every),
        ]
    }

    pub async fn shutdown(&self) {
        info!(
            cells = self.cells.len(),
            players = self.players.len(),
            "Stopping actor directory"
        );
        self.cells.shutdown().await;
        self.players.shutdown().await;
    }
}

impl ActorDirectory for LocalDirectory {
    fn cell(&self, cell_id: &CellId) -> CellHandle {
        self.cells.get(cell_id.as_str())
    }

    fn player(&self, player_id: &str) -> PlayerHandle {
        self.players.get(player_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::error::ActorError;
    use crate::types::Position;

    fn directory(config: &PresenceConfig) -> LocalDirectory {
        LocalDirectory::new(
            config,
            Arc::new(config.indexer()),
            Arc::new(LocalBus::new()),
        )
    }

    #[tokio::test]
    async fn test_lookups_are_idempotent() {
        let directory = directory(&PresenceConfig::default());
        let cell_id = CellId::from("0-0-0-0-0-0");

        directory
            .cell(&cell_id)
            .enter(Position::new("alice", -999.0, 0.0, -999.0))
            .await
            .unwrap();
        let players = directory.cell(&cell_id).get_players().await.unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(directory.cells().len(), 1);
    }

    #[tokio::test]
    async fn test_player_actor_is_keyed_by_id() {
        let directory = directory(&PresenceConfig::default());
        let position = directory.player("bob").get_position().await.unwrap();
        assert_eq!(position.player_id, "bob");
        assert_eq!(directory.players().len(), 1);
    }

    #[tokio::test]
    async fn test_occupied_cells_survive_eviction() {
        let config = PresenceConfig {
            cell_idle_ttl_secs: 0,
            player_idle_ttl_secs: 0,
            ..PresenceConfig::default()
        };
        let directory = directory(&config);
        let busy = CellId::from("0-3-3-3-3-3");
        let empty = CellId::from("0-0-0-0-0-0");

        directory
            .cell(&busy)
            .enter(Position::new("alice", 999.0, 0.0, 999.0))
            .await
            .unwrap();
        directory.cell(&empty).get_players().await.unwrap();
        directory.player("alice").get_position().await.unwrap();

        assert_eq!(directory.evict_idle().await, 2);
        assert!(directory.cells().contains(busy.as_str()));
        assert!(!directory.cells().contains(empty.as_str()));
        assert!(directory.players().is_empty());
    }

    #[tokio::test]
    async fn test_enter_racing_eviction_is_never_lost() {
        let config = PresenceConfig {
            cell_idle_ttl_secs: 0,
            ..PresenceConfig::default()
        };
        let directory = directory(&config);
        let cell_id = CellId::from("0-1-1-1-1-1");
        let handle = directory.cell(&cell_id);

        let cells = directory.cells().clone();
        let sweep = tokio::spawn(async move { cells.evict_idle().await });
        let entered = handle.enter(Position::new("alice", 10.0, 0.0, -10.0)).await;
        sweep.await.unwrap();

        let players = directory.cell(&cell_id).get_players().await.unwrap();
        match entered {
            Ok(()) => assert!(players.iter().any(|p| p.player_id == "alice")),
            Err(e) => {
                assert!(matches!(
                    e,
                    ActorError::NoReply { .. } | ActorError::Unavailable { .. }
                ));
                assert!(players.is_empty());
            }
        }
    }
}
