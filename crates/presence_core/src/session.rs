//! # Session Coordinator
//!
//! One [`SessionCoordinator`] runs per connected client. It moves the player
//! between cell actors as position updates arrive and keeps the client
//! subscribed to the cells inside its area of interest.
//!
//! Cell membership is changed inline, one update at a time. Subscription
//! changes are handed to a per-session worker task that owns the subscription
//! set, so ingesting positions never waits on the bus. The worker processes its
//! commands strictly in order and collapses a backlog of retargets into the
//! latest one.

use crate::bus::{MessageBus, Subscription, SubscriptionHandler, WorldEvent};
use crate::directory::ActorDirectory;
use crate::error::SessionError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::spatial::QuadTreeIndexer;
use crate::types::{CellId, PlayerId, Position, Topic};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client stopped sending (disconnect or shutdown)
    InboundClosed,
    /// The client can no longer receive messages
    OutboundClosed,
    /// The subscription worker died
    WorkerStopped,
    /// Closed explicitly through [`SessionCoordinator::close`]
    Requested,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::InboundClosed => "inbound closed",
            CloseReason::OutboundClosed => "outbound closed",
            CloseReason::WorkerStopped => "subscription worker stopped",
            CloseReason::Requested => "requested",
        };
        f.write_str(reason)
    }
}

/// What happened over a session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub player_id: PlayerId,
    /// Position updates applied to a cell
    pub updates_accepted: u64,
    /// Position updates dropped at validation
    pub updates_rejected: u64,
    /// Cell changes, the first placement included
    pub transitions: u64,
    /// Cell or player actor calls that failed
    pub actor_failures: u64,
    pub close_reason: Option<CloseReason>,
}

impl SessionSummary {
    fn new(player_id: PlayerId) -> Self {
        Self {
            player_id,
            updates_accepted: 0,
            updates_rejected: 0,
            transitions: 0,
            actor_failures: 0,
            close_reason: None,
        }
    }
}

/// Shared services a session needs.
#[derive(Clone)]
pub struct SessionContext {
    pub indexer: Arc<QuadTreeIndexer>,
    pub bus: Arc<dyn MessageBus>,
    pub directory: Arc<dyn ActorDirectory>,
    pub aoi_radius: u32,
}

enum WorkerCommand {
    /// Subscribe to the area of interest around a cell
    Retarget { cell_id: CellId },
    Snapshot {
        reply: oneshot::Sender<BTreeSet<Topic>>,
    },
    /// Drop every subscription and stop
    Drain { reply: oneshot::Sender<()> },
}

/// Coordinates one client's presence in the world.
pub struct SessionCoordinator {
    player_id: PlayerId,
    state: SessionState,
    current_cell: Option<CellId>,
    context: SessionContext,
    outbound: mpsc::Sender<ServerMessage>,
    worker: Option<mpsc::UnboundedSender<WorkerCommand>>,
    worker_task: Option<JoinHandle<()>>,
    summary: SessionSummary,
}

impl SessionCoordinator {
    /// Creates a session for `player_id` pushing to `outbound`.
    ///
    /// Spawns the subscription worker, so this must run inside a tokio runtime.
    pub fn new(
        player_id: impl Into<PlayerId>,
        context: SessionContext,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Self {
        let player_id = player_id.into();
        let (worker, commands) = mpsc::unbounded_channel();
        let subscriptions = SubscriptionWorker::new(player_id.clone(), &context, outbound.clone());
        let worker_task = tokio::spawn(subscriptions.run(commands));

        Self {
            summary: SessionSummary::new(player_id.clone()),
            player_id,
            state: SessionState::Connecting,
            current_cell: None,
            context,
            outbound,
            worker: Some(worker),
            worker_task: Some(worker_task),
        }
    }

    /// The player this session speaks for.
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Cell the player was last placed in.
    pub fn current_cell(&self) -> Option<&CellId> {
        self.current_cell.as_ref()
    }

    /// Counters so far; the final copy is returned by [`SessionCoordinator::run`].
    pub fn summary(&self) -> &SessionSummary {
        &self.summary
    }

    /// Topics currently subscribed, once every queued retarget has been applied.
    pub async fn active_topics(&self) -> Result<BTreeSet<Topic>, SessionError> {
        let worker = self.worker.as_ref().ok_or(SessionError::Closed)?;
        let (reply, response) = oneshot::channel();
        worker
            .send(WorkerCommand::Snapshot { reply })
            .map_err(|_| SessionError::WorkerStopped)?;
        response.await.map_err(|_| SessionError::WorkerStopped)
    }

    /// Dispatches one inbound client message.
    pub async fn handle_message(&mut self, message: ClientMessage) -> Result<(), SessionError> {
        match message {
            ClientMessage::PositionUpdate { position } => self.handle_position(position).await,
            ClientMessage::Login { player_id } => {
                self.ensure_active()?;
                if player_id != self.player_id {
                    warn!(session = %self.player_id, claimed = %player_id, "Login names a different player");
                }
                info!(player = %player_id, "Player logged in");
                Ok(())
            }
            ClientMessage::Logout { player_id } => {
                self.ensure_active()?;
                info!(player = %player_id, "Player logged out");
                Ok(())
            }
        }
    }

    /// Applies one position update.
    ///
    /// Invalid updates are rejected and leave the session untouched. Actor
    /// failures are reported but the session stays usable; the next update
    /// retries whatever did not take effect.
    ///
    /// # Errors
    ///
    /// * [`SessionError::InvalidPosition`] - non-finite coordinates or another player's id
    /// * [`SessionError::ClientClosed`] - the client can no longer receive updates
    /// * [`SessionError::Actor`] - a cell call failed; the current cell stays
    ///   at the last committed one
    /// * [`SessionError::Closed`] - the session already closed
    pub async fn handle_position(&mut self, mut position: Position) -> Result<(), SessionError> {
        self.ensure_active()?;
        if self.outbound.is_closed() {
            return Err(SessionError::ClientClosed);
        }

        if let Err(reason) = position.validate() {
            return Err(self.reject(reason));
        }
        if position.player_id != self.player_id {
            let reason = format!(
                "position for '{}' sent on the session of '{}'",
                position.player_id, self.player_id
            );
            return Err(self.reject(reason));
        }

        let new_cell = self.context.indexer.cell_id_for(&position);
        position.cell_id = Some(new_cell.clone());

        if let Err(e) = self
            .context
            .directory
            .player(&self.player_id)
            .update_position(position.clone())
            .await
        {
            self.summary.actor_failures += 1;
            debug!(player = %self.player_id, error = %e, "Player actor update failed");
        }

        if self.current_cell.as_ref() == Some(&new_cell) {
            let result = self
                .context
                .directory
                .cell(&new_cell)
                .update_player_position(position)
                .await;
            if let Err(e) = result {
                self.summary.actor_failures += 1;
                return Err(e.into());
            }
            self.summary.updates_accepted += 1;
            return Ok(());
        }

        self.transition(new_cell, position).await
    }

    async fn transition(&mut self, new_cell: CellId, position: Position) -> Result<(), SessionError> {
        let previous = self.current_cell.replace(new_cell.clone());
        debug!(player = %self.player_id, from = ?previous, to = %new_cell, "Cell transition");

        if let Some(old_cell) = previous.clone() {
            if let Err(e) = self.context.directory.cell(&old_cell).leave(&self.player_id).await {
                warn!(player = %self.player_id, cell = %old_cell, error = %e, "Failed to leave cell");
                self.summary.actor_failures += 1;
                self.current_cell = previous;
                return Err(e.into());
            }
        }

        if let Err(e) = self.context.directory.cell(&new_cell).enter(position).await {
            warn!(player = %self.player_id, cell = %new_cell, error = %e, "Failed to enter cell");
            self.summary.actor_failures += 1;
            self.current_cell = previous;
            return Err(e.into());
        }

        self.summary.transitions += 1;
        self.summary.updates_accepted += 1;

        let worker = self.worker.as_ref().ok_or(SessionError::Closed)?;
        worker
            .send(WorkerCommand::Retarget { cell_id: new_cell })
            .map_err(|_| SessionError::WorkerStopped)
    }

    /// Drives the session until the client goes away, then cleans up.
    ///
    /// # Arguments
    ///
    /// * `inbound` - Messages from the client, in arrival order
    ///
    /// # Returns
    ///
    /// The session's [`SessionSummary`], with `close_reason` set. The loop
    /// ends when `inbound` closes, when the outbound receiver is dropped, or
    /// when the subscription worker stops. Invalid updates and actor failures
    /// only drop the offending message.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use presence_core::{ClientMessage, PresenceConfig, PresenceRuntime, Position};
    /// use tokio::sync::mpsc;
    ///
    /// # async fn demo() -> Result<(), String> {
    /// let runtime = PresenceRuntime::new(PresenceConfig::default())?;
    /// let (outbound, _client) = mpsc::channel(64);
    /// let (inbound, inbound_rx) = mpsc::channel(64);
    /// let session = runtime.session("alice", outbound);
    /// let task = tokio::spawn(session.run(inbound_rx));
    ///
    /// let position = Position::new("alice", 1.0, 0.0, 1.0);
    /// let _ = inbound.send(ClientMessage::PositionUpdate { position }).await;
    /// drop(inbound);
    /// let summary = task.await.map_err(|e| e.to_string())?;
    /// assert_eq!(summary.updates_accepted, 1);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(mut self, mut inbound: mpsc::Receiver<ClientMessage>) -> SessionSummary {
        if let Err(e) = self.ensure_active() {
            error!(player = %self.player_id, error = %e, "Session cannot start");
            return self.summary;
        }
        let outbound = self.outbound.clone();

        let reason = loop {
            tokio::select! {
                message = inbound.recv() => {
                    let Some(message) = message else {
                        break CloseReason::InboundClosed;
                    };
                    match self.handle_message(message).await {
                        Ok(()) => {}
                        Err(SessionError::WorkerStopped) => break CloseReason::WorkerStopped,
                        Err(SessionError::ClientClosed) => break CloseReason::OutboundClosed,
                        Err(e) => debug!(player = %self.player_id, error = %e, "Update dropped"),
                    }
                }
                _ = outbound.closed() => break CloseReason::OutboundClosed,
            }
        };

        self.close_with(reason).await;
        self.summary
    }

    /// Leaves the world: drops every subscription, then leaves the current cell.
    ///
    /// Runs once; later calls return immediately.
    pub async fn close(&mut self) {
        self.close_with(CloseReason::Requested).await;
    }

    async fn close_with(&mut self, reason: CloseReason) {
        if matches!(self.state, SessionState::Closing | SessionState::Closed) {
            return;
        }
        self.state = SessionState::Closing;
        debug!(player = %self.player_id, %reason, "Session closing");

        if let Some(worker) = self.worker.take() {
            let (reply, drained) = oneshot::channel();
            if worker.send(WorkerCommand::Drain { reply }).is_ok() {
                let _ = drained.await;
            }
        }
        if let Some(task) = self.worker_task.take() {
            if let Err(e) = task.await {
                error!(player = %self.player_id, error = %e, "Subscription worker failed");
            }
        }

        if let Some(cell_id) = self.current_cell.take() {
            if let Err(e) = self.context.directory.cell(&cell_id).leave(&self.player_id).await {
                self.summary.actor_failures += 1;
                warn!(player = %self.player_id, cell = %cell_id, error = %e, "Failed to leave cell on close");
            }
        }

        self.state = SessionState::Closed;
        self.summary.close_reason = Some(reason);
        info!(
            player = %self.player_id,
            %reason,
            accepted = self.summary.updates_accepted,
            rejected = self.summary.updates_rejected,
            transitions = self.summary.transitions,
            "Session closed"
        );
    }

    fn ensure_active(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Connecting => {
                self.state = SessionState::Active;
                info!(player = %self.player_id, "Session active");
                Ok(())
            }
            SessionState::Closing | SessionState::Closed => Err(SessionError::Closed),
        }
    }

    fn reject(&mut self, reason: String) -> SessionError {
        self.summary.updates_rejected += 1;
        warn!(player = %self.player_id, %reason, "Dropping invalid position update");
        SessionError::InvalidPosition(reason)
    }
}

/// Forwards bus traffic to the client, hiding the client's own player.
struct ForwardingHandler {
    player_id: PlayerId,
    outbound: mpsc::Sender<ServerMessage>,
    client_gone: AtomicBool,
}

impl ForwardingHandler {
    fn translate(&self, event: WorldEvent) -> Option<ServerMessage> {
        match event {
            WorldEvent::Positions { mut positions } => {
                positions.retain(|position| position.player_id != self.player_id);
                (!positions.is_empty()).then_some(ServerMessage::WorldUpdate { positions })
            }
            WorldEvent::PlayerLeft { player_id } if player_id != self.player_id => {
                Some(ServerMessage::PlayerLeft { player_id })
            }
            WorldEvent::PlayerLeft { .. } => None,
        }
    }
}

#[async_trait]
impl SubscriptionHandler for ForwardingHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        if self.client_gone.load(Ordering::Relaxed) {
            return;
        }

        let event = match WorldEvent::decode(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(topic, error = %e, "Dropping undecodable world event");
                return;
            }
        };

        if let Some(message) = self.translate(event) {
            if self.outbound.send(message).await.is_err() {
                self.client_gone.store(true, Ordering::Relaxed);
            }
        }
    }
}

struct ActiveTopic {
    cell_id: CellId,
    subscription: Subscription,
}

/// Sole owner of a session's subscription set.
struct SubscriptionWorker {
    player_id: PlayerId,
    indexer: Arc<QuadTreeIndexer>,
    bus: Arc<dyn MessageBus>,
    directory: Arc<dyn ActorDirectory>,
    aoi_radius: u32,
    outbound: mpsc::Sender<ServerMessage>,
    handler: Arc<dyn SubscriptionHandler>,
    active: BTreeMap<Topic, ActiveTopic>,
}

impl SubscriptionWorker {
    fn new(player_id: PlayerId, context: &SessionContext, outbound: mpsc::Sender<ServerMessage>) -> Self {
        let handler = Arc::new(ForwardingHandler {
            player_id: player_id.clone(),
            outbound: outbound.clone(),
            client_gone: AtomicBool::new(false),
        });

        Self {
            player_id,
            indexer: context.indexer.clone(),
            bus: context.bus.clone(),
            directory: context.directory.clone(),
            aoi_radius: context.aoi_radius,
            outbound,
            handler,
            active: BTreeMap::new(),
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<WorkerCommand>) {
        let mut deferred = None;

        loop {
            let command = match deferred.take() {
                Some(command) => command,
                None => match commands.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                WorkerCommand::Retarget { mut cell_id } => {
                    // Only the newest target of a backlog matters.
                    while let Ok(next) = commands.try_recv() {
                        match next {
                            WorkerCommand::Retarget { cell_id: newer } => cell_id = newer,
                            other => {
                                deferred = Some(other);
                                break;
                            }
                        }
                    }
                    self.retarget(&cell_id).await;
                }
                WorkerCommand::Snapshot { reply } => {
                    let _ = reply.send(self.active.keys().cloned().collect());
                }
                WorkerCommand::Drain { reply } => {
                    self.drain().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }

        self.drain().await;
    }

    async fn retarget(&mut self, cell_id: &CellId) {
        let wanted: BTreeMap<Topic, CellId> = self
            .indexer
            .neighbor_ids(cell_id, self.aoi_radius)
            .into_iter()
            .map(|id| (id.topic(), id))
            .collect();

        let stale: Vec<Topic> = self
            .active
            .keys()
            .filter(|topic| !wanted.contains_key(*topic))
            .cloned()
            .collect();
        let mut added = 0;

        for topic in &stale {
            if let Some(active) = self.active.remove(topic) {
                self.release(active).await;
            }
        }

        for (topic, cell_id) in wanted {
            if self.active.contains_key(&topic) {
                continue;
            }
            match self.bus.subscribe(&topic, self.handler.clone()).await {
                Ok(subscription) => {
                    self.active.insert(topic, ActiveTopic { cell_id, subscription });
                    added += 1;
                }
                Err(e) => {
                    warn!(player = %self.player_id, topic = %topic, error = %e, "Failed to subscribe");
                }
            }
        }

        debug!(
            player = %self.player_id,
            center = %cell_id,
            removed = stale.len(),
            added,
            active = self.active.len(),
            "Area of interest updated"
        );
    }

    /// Unsubscribes from a cell that left the area of interest and clears its
    /// players from the client's view.
    async fn release(&mut self, active: ActiveTopic) {
        let ActiveTopic { cell_id, subscription } = active;
        if let Err(e) = self.bus.unsubscribe(subscription).await {
            warn!(player = %self.player_id, cell = %cell_id, error = %e, "Failed to unsubscribe");
        }

        let players = match self.directory.cell(&cell_id).get_players().await {
            Ok(players) => players,
            Err(e) => {
                warn!(player = %self.player_id, cell = %cell_id, error = %e, "Cannot list players of released cell");
                return;
            }
        };

        for position in players {
            if position.player_id == self.player_id {
                continue;
            }
            let message = ServerMessage::PlayerLeft {
                player_id: position.player_id,
            };
            if self.outbound.send(message).await.is_err() {
                return;
            }
        }
    }

    async fn drain(&mut self) {
        let active = std::mem::take(&mut self.active);
        for (topic, active) in active {
            if let Err(e) = self.bus.unsubscribe(active.subscription).await {
                warn!(player = %self.player_id, topic = %topic, error = %e, "Failed to unsubscribe");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::config::PresenceConfig;
    use crate::directory::LocalDirectory;
    use crate::types::WorldBounds;
    use std::time::Duration;

    struct Fixture {
        bus: Arc<LocalBus>,
        directory: Arc<LocalDirectory>,
        context: SessionContext,
    }

    fn fixture() -> Fixture {
        let config = PresenceConfig {
            bounds: WorldBounds::new(-100.0, 100.0, -100.0, 100.0),
            depth: 2,
            tick_interval_ms: 20,
            ..PresenceConfig::default()
        };
        let indexer = Arc::new(config.indexer());
        let bus = Arc::new(LocalBus::new());
        let directory = Arc::new(LocalDirectory::new(&config, indexer.clone(), bus.clone()));
        let context = SessionContext {
            indexer,
            bus: bus.clone(),
            directory: directory.clone(),
            aoi_radius: 1,
        };
        Fixture {
            bus,
            directory,
            context,
        }
    }

    /// Directory that hands out a dead cell handle for one lookup.
    struct FlakyDirectory {
        inner: Arc<LocalDirectory>,
        broken: std::sync::Mutex<Option<(CellId, crate::actor::CellHandle)>>,
    }

    impl ActorDirectory for FlakyDirectory {
        fn cell(&self, cell_id: &CellId) -> crate::actor::CellHandle {
            let mut broken = self.broken.lock().unwrap();
            if broken.as_ref().is_some_and(|(id, _)| id == cell_id) {
                if let Some((_, handle)) = broken.take() {
                    return handle;
                }
            }
            self.inner.cell(cell_id)
        }

        fn player(&self, player_id: &str) -> crate::actor::PlayerHandle {
            self.inner.player(player_id)
        }
    }

    fn topics(indexer: &QuadTreeIndexer, cell: &str) -> BTreeSet<Topic> {
        indexer
            .neighbor_ids(&CellId::from(cell), 1)
            .iter()
            .map(CellId::topic)
            .collect()
    }

    #[tokio::test]
    async fn test_first_update_places_player() {
        let fx = fixture();
        let (outbound, _client) = mpsc::channel(64);
        let mut session = SessionCoordinator::new("alice", fx.context.clone(), outbound);
        assert_eq!(session.state(), SessionState::Connecting);

        session
            .handle_position(Position::new("alice", 5.0, 0.0, 5.0))
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.current_cell(), Some(&CellId::from("0-3-0")));
        assert_eq!(
            session.active_topics().await.unwrap(),
            topics(&fx.context.indexer, "0-3-0")
        );

        let players = fx
            .directory
            .cell(&CellId::from("0-3-0"))
            .get_players()
            .await
            .unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].cell_id, Some(CellId::from("0-3-0")));

        let field = fx.directory.player("alice").get_field_id().await.unwrap();
        assert_eq!(field, Some(CellId::from("0-3-0")));
    }

    #[tokio::test]
    async fn test_same_cell_update_does_not_transition() {
        let fx = fixture();
        let (outbound, _client) = mpsc::channel(64);
        let mut session = SessionCoordinator::new("alice", fx.context.clone(), outbound);

        session
            .handle_position(Position::new("alice", 5.0, 0.0, 5.0))
            .await
            .unwrap();
        session
            .handle_position(Position::new("alice", 10.0, 0.0, 10.0))
            .await
            .unwrap();

        let stats = fx.directory.cell(&CellId::from("0-3-0")).stats().await.unwrap();
        assert_eq!(stats.enters, 1);
        assert_eq!(stats.position_updates, 1);
        assert_eq!(session.summary().transitions, 1);
        assert_eq!(session.summary().updates_accepted, 2);
    }

    #[tokio::test]
    async fn test_invalid_updates_are_rejected() {
        let fx = fixture();
        let (outbound, _client) = mpsc::channel(64);
        let mut session = SessionCoordinator::new("alice", fx.context.clone(), outbound);

        let nan = session
            .handle_position(Position::new("alice", f64::NAN, 0.0, 0.0))
            .await;
        assert!(matches!(nan, Err(SessionError::InvalidPosition(_))));

        let impostor = session
            .handle_position(Position::new("mallory", 1.0, 0.0, 1.0))
            .await;
        assert!(matches!(impostor, Err(SessionError::InvalidPosition(_))));

        assert_eq!(session.current_cell(), None);
        assert_eq!(session.summary().updates_rejected, 2);
        assert!(fx.directory.cells().is_empty());
    }

    #[tokio::test]
    async fn test_failed_enter_keeps_last_cell_and_retries() {
        let fx = fixture();
        let target = CellId::from("0-0-0");
        let dead = crate::actor::spawn_actor(
            target.as_str(),
            crate::actor::CellActor::new(target.clone(), fx.bus.clone(), Duration::from_millis(20)),
            4,
        );
        dead.stop().await;

        let context = SessionContext {
            directory: Arc::new(FlakyDirectory {
                inner: fx.directory.clone(),
                broken: std::sync::Mutex::new(Some((target.clone(), dead))),
            }),
            ..fx.context.clone()
        };
        let (outbound, _client) = mpsc::channel(64);
        let mut session = SessionCoordinator::new("alice", context, outbound);

        session
            .handle_position(Position::new("alice", 5.0, 0.0, 5.0))
            .await
            .unwrap();
        let before = session.active_topics().await.unwrap();

        let failed = session
            .handle_position(Position::new("alice", -90.0, 0.0, -90.0))
            .await;
        assert!(matches!(failed, Err(SessionError::Actor(_))));
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.current_cell(), Some(&CellId::from("0-3-0")));
        assert_eq!(session.summary().actor_failures, 1);
        assert_eq!(session.summary().transitions, 1);
        assert_eq!(session.active_topics().await.unwrap(), before);

        session
            .handle_position(Position::new("alice", -90.0, 0.0, -90.0))
            .await
            .unwrap();
        assert_eq!(session.current_cell(), Some(&target));
        assert_eq!(session.summary().transitions, 2);
        assert_eq!(
            session.active_topics().await.unwrap(),
            topics(&fx.context.indexer, "0-0-0")
        );

        let here = fx.directory.cell(&target).get_players().await.unwrap();
        assert!(here.iter().any(|p| p.player_id == "alice"));
        let old = fx
            .directory
            .cell(&CellId::from("0-3-0"))
            .get_players()
            .await
            .unwrap();
        assert!(old.is_empty());

        session.close().await;
    }

    #[tokio::test]
    async fn test_update_after_client_dropped_is_refused() {
        let fx = fixture();
        let (outbound, client) = mpsc::channel(64);
        let mut session = SessionCoordinator::new("alice", fx.context.clone(), outbound);
        drop(client);

        let result = session
            .handle_position(Position::new("alice", 5.0, 0.0, 5.0))
            .await;
        assert!(matches!(result, Err(SessionError::ClientClosed)));
        assert_eq!(session.current_cell(), None);
        assert!(fx.directory.cells().is_empty());

        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_close_leaves_cell_and_unsubscribes() {
        let fx = fixture();
        let (outbound, _client) = mpsc::channel(64);
        let mut session = SessionCoordinator::new("alice", fx.context.clone(), outbound);

        session
            .handle_position(Position::new("alice", 5.0, 0.0, 5.0))
            .await
            .unwrap();
        assert!(!session.active_topics().await.unwrap().is_empty());
        assert!(fx.bus.stats().subscriptions > 0);

        session.close().await;
        session.close().await;

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.summary().close_reason, Some(CloseReason::Requested));
        assert_eq!(fx.bus.stats().subscriptions, 0);
        let players = fx
            .directory
            .cell(&CellId::from("0-3-0"))
            .get_players()
            .await
            .unwrap();
        assert!(players.is_empty());

        let after = session
            .handle_position(Position::new("alice", 5.0, 0.0, 5.0))
            .await;
        assert!(matches!(after, Err(SessionError::Closed)));
        assert!(matches!(
            session.active_topics().await,
            Err(SessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_client_never_sees_itself() {
        let fx = fixture();
        let (alice_out, mut alice_client) = mpsc::channel(256);
        let (bob_out, _bob_client) = mpsc::channel(256);
        let mut alice = SessionCoordinator::new("alice", fx.context.clone(), alice_out);
        let mut bob = SessionCoordinator::new("bob", fx.context.clone(), bob_out);

        alice
            .handle_position(Position::new("alice", 5.0, 0.0, 5.0))
            .await
            .unwrap();
        bob.handle_position(Position::new("bob", 6.0, 0.0, 6.0))
            .await
            .unwrap();
        alice.active_topics().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        alice.close().await;
        bob.close().await;

        let mut saw_bob = false;
        while let Ok(message) = alice_client.try_recv() {
            if let ServerMessage::WorldUpdate { positions } = message {
                assert!(positions.iter().all(|p| p.player_id != "alice"));
                saw_bob |= positions.iter().any(|p| p.player_id == "bob");
            }
        }
        assert!(saw_bob);
    }

    #[tokio::test]
    async fn test_run_ends_when_inbound_closes() {
        let fx = fixture();
        let (outbound, _client) = mpsc::channel(64);
        let session = SessionCoordinator::new("alice", fx.context.clone(), outbound);
        let (inbound, messages) = mpsc::channel(8);

        let run = tokio::spawn(session.run(messages));
        inbound
            .send(ClientMessage::Login {
                player_id: "alice".to_string(),
            })
            .await
            .unwrap();
        inbound
            .send(ClientMessage::PositionUpdate {
                position: Position::new("alice", -90.0, 0.0, -90.0),
            })
            .await
            .unwrap();
        inbound
            .send(ClientMessage::PositionUpdate {
                position: Position::new("alice", f64::INFINITY, 0.0, 0.0),
            })
            .await
            .unwrap();
        drop(inbound);

        let summary = run.await.unwrap();
        assert_eq!(summary.close_reason, Some(CloseReason::InboundClosed));
        assert_eq!(summary.updates_accepted, 1);
        assert_eq!(summary.updates_rejected, 1);
        assert_eq!(summary.transitions, 1);

        let players = fx
            .directory
            .cell(&CellId::from("0-0-0"))
            .get_players()
            .await
            .unwrap();
        assert!(players.is_empty());
        assert_eq!(fx.bus.stats().subscriptions, 0);
    }

    #[tokio::test]
    async fn test_run_ends_when_client_stops_listening() {
        let fx = fixture();
        let (outbound, client) = mpsc::channel(64);
        let session = SessionCoordinator::new("alice", fx.context.clone(), outbound);
        let (_inbound, messages) = mpsc::channel::<ClientMessage>(8);

        let run = tokio::spawn(session.run(messages));
        drop(client);

        let summary = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.close_reason, Some(CloseReason::OutboundClosed));
    }
}
