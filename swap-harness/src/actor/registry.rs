//! Name-keyed registry of the actors of one test.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use super::Actor;
use crate::daemon::Role;
use crate::{HarnessError, Result};

/// Name of a test participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActorName {
    /// Usually in the role of Alice.
    Alice,
    /// Usually in the role of Bob.
    Bob,
    /// A third party, e.g. a taker of an order.
    Charlie,
}

impl ActorName {
    /// Every name.
    pub const ALL: [ActorName; 3] = [Self::Alice, Self::Bob, Self::Charlie];

    /// Lowercase name used for directories and log files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alice => "alice",
            Self::Bob => "bob",
            Self::Charlie => "charlie",
        }
    }

    /// Role this actor takes in swaps it creates, if it has a natural one.
    pub fn default_role(&self) -> Option<Role> {
        match self {
            Self::Alice => Some(Role::Alice),
            Self::Bob => Some(Role::Bob),
            Self::Charlie => None,
        }
    }
}

impl fmt::Display for ActorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owns the actors of one test.
///
/// Actors keep only a weak reference to the registry, so looking up a
/// counterparty never keeps either side alive.
#[derive(Default)]
pub struct ActorRegistry {
    actors: RwLock<BTreeMap<ActorName, Arc<Actor>>>,
}

impl ActorRegistry {
    /// Empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add `actor`. Fails if an actor with the same name is registered.
    pub fn register(&self, actor: Actor) -> Result<Arc<Actor>> {
        let mut actors = self.actors.write().unwrap_or_else(|e| e.into_inner());
        let name = actor.name();
        if actors.contains_key(&name) {
            return Err(HarnessError::invalid_data(
                "actor",
                format!("{} is already registered", name),
            ));
        }
        let actor = Arc::new(actor);
        actors.insert(name, actor.clone());
        tracing::debug!(actor = %name, "actor registered");
        Ok(actor)
    }

    /// The actor named `name`.
    pub fn get(&self, name: ActorName) -> Result<Arc<Actor>> {
        self.actors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&name)
            .cloned()
            .ok_or_else(|| HarnessError::invalid_data("actor", format!("no actor named {}", name)))
    }

    /// Names of registered actors, sorted.
    pub fn names(&self) -> Vec<ActorName> {
        self.actors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }

    /// Remove and return every actor.
    pub fn drain(&self) -> Vec<Arc<Actor>> {
        let mut actors = self.actors.write().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *actors).into_values().collect()
    }

    /// Dump the state of every actor. Never fails.
    pub async fn dump_all(&self) {
        for name in self.names() {
            if let Ok(actor) = self.get(name) {
                actor.dump_state().await;
            }
        }
    }

    /// Stop every actor's daemon and empty the registry. Never fails.
    pub async fn stop_all(&self) {
        for actor in self.drain() {
            actor.stop().await;
        }
    }
}
