//! Directory of live actors of one kind, keyed by string.

use super::{spawn_actor, Actor, ActorHandle};
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

type Factory<A> = dyn Fn(&str) -> A + Send + Sync;

/// Creates actors on first use and evicts them once idle.
///
/// At most one live actor exists per key. Lookups never block on the actor
/// itself; they only touch the key's map shard.
pub struct ActorRegistry<A: Actor> {
    actors: DashMap<String, ActorHandle<A>>,
    factory: Box<Factory<A>>,
    mailbox_capacity: usize,
    idle_ttl: Duration,
}

impl<A: Actor> ActorRegistry<A> {
    /// Creates a registry building each new actor with `factory(key)`.
    pub fn new(
        mailbox_capacity: usize,
        idle_ttl: Duration,
        factory: impl Fn(&str) -> A + Send + Sync + 'static,
    ) -> Self {
        Self {
            actors: DashMap::new(),
            factory: Box::new(factory),
            mailbox_capacity,
            idle_ttl,
        }
    }

    /// Returns the actor for `key`, activating it if none is running.
    pub fn get(&self, key: &str) -> ActorHandle<A> {
        if let Some(handle) = self.actors.get(key) {
            if !handle.is_closed() {
                return handle.value().clone();
            }
        }

        let mut entry = self.actors.entry(key.to_string()).or_insert_with(|| self.activate(key));
        if entry.value().is_closed() {
            *entry.value_mut() = self.activate(key);
        }
        entry.value().clone()
    }

    /// Whether a live actor exists for `key`, without activating one.
    pub fn contains(&self, key: &str) -> bool {
        self.actors
            .get(key)
            .map(|handle| !handle.is_closed())
            .unwrap_or(false)
    }

    /// Number of registered actors.
    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }

    /// Keys of all registered actors.
    pub fn keys(&self) -> Vec<String> {
        self.actors.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Handles of all registered, still running actors.
    pub fn handles(&self) -> Vec<ActorHandle<A>> {
        self.actors
            .iter()
            .filter(|entry| !entry.value().is_closed())
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Evicts every actor idle for at least the configured TTL.
    ///
    /// Returns how many actors were removed.
    pub async fn evict_idle(&self) -> usize {
        let candidates: Vec<(String, ActorHandle<A>)> = self
            .actors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut evicted = 0;
        for (key, handle) in candidates {
            if handle.evict_if_idle(self.idle_ttl).await {
                // A concurrent lookup may already have replaced the entry.
                if self.actors.remove_if(&key, |_, current| current.is_closed()).is_some() {
                    evicted += 1;
                }
            }
        }

        if evicted > 0 {
            debug!(kind = A::KIND, evicted, remaining = self.actors.len(), "Evicted idle actors");
        }
        evicted
    }

    /// Runs [`ActorRegistry::evict_idle`] every `every` until the returned task
    /// is aborted or the registry is dropped.
    pub fn spawn_eviction_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut sweep = tokio::time::interval(every);
            sweep.tick().await;
            loop {
                sweep.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.evict_idle().await;
            }
        })
    }

    /// Stops every actor and clears the registry.
    pub async fn shutdown(&self) {
        let handles: Vec<ActorHandle<A>> = self.actors.iter().map(|entry| entry.value().clone()).collect();
        self.actors.clear();

        let count = handles.len();
        join_all(handles.iter().map(|handle| handle.stop())).await;
        info!(kind = A::KIND, count, "Stopped all actors");
    }

    fn activate(&self, key: &str) -> ActorHandle<A> {
        debug!(kind = A::KIND, key, "Activating actor");
        spawn_actor(key, (self.factory)(key), self.mailbox_capacity)
    }
}
