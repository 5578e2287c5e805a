//! # Presence Core
//!
//! Spatial presence for a shared world: which players are where, and who gets
//! to hear about it.
//!
//! ## Architecture Overview
//!
//! - **Spatial indexing**: the X/Z plane is split by a fixed-depth quadtree. A
//!   position maps to a cell id such as `"0-3-0"` ([`QuadTreeIndexer`]).
//! - **Cell actors**: each cell is owned by one actor holding its player set and
//!   broadcasting a snapshot on `world.<cell>.updates` every tick.
//! - **Player actors**: cache each player's last position.
//! - **Sessions**: one [`SessionCoordinator`] per client moves its player
//!   between cells and keeps the client subscribed to the surrounding cells.
//! - **Message bus**: topic publish/subscribe behind the [`MessageBus`] trait,
//!   with [`LocalBus`] as the in-process implementation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use presence_core::{ClientMessage, Position, PresenceConfig, PresenceRuntime};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), String> {
//!     let runtime = PresenceRuntime::new(PresenceConfig::default())?;
//!     let (outbound, mut client) = mpsc::channel(256);
//!     let (inbound, messages) = mpsc::channel(256);
//!
//!     let session = runtime.session("alice", outbound);
//!     let running = tokio::spawn(session.run(messages));
//!
//!     let position = Position::new("alice", 12.0, 0.0, -40.0);
//!     let _ = inbound.send(ClientMessage::PositionUpdate { position }).await;
//!     if let Some(update) = client.recv().await {
//!         println!("{update:?}");
//!     }
//!
//!     drop(inbound);
//!     let _ = running.await;
//!     runtime.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod actor;
pub mod bus;
pub mod config;
pub mod directory;
pub mod error;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod spatial;
pub mod types;

pub use actor::{ActorHandle, ActorRegistry, CellHandle, CellStats, PlayerHandle};
pub use bus::{LocalBus, MessageBus, Subscription, SubscriptionHandler, WorldEvent};
pub use config::PresenceConfig;
pub use directory::{ActorDirectory, LocalDirectory};
pub use error::{ActorError, BusError, SessionError};
pub use protocol::{ClientMessage, ServerMessage};
pub use runtime::PresenceRuntime;
pub use session::{CloseReason, SessionContext, SessionCoordinator, SessionState, SessionSummary};
pub use spatial::{QuadTreeIndexer, MAX_QUAD_LEVEL};
pub use types::{CellId, PlayerId, Position, Topic, WorldBounds};
