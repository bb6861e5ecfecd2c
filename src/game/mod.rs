//! Authoritative game state.
//!
//! Everything in this module is deterministic and sans-IO: the engine owns
//! all state, handlers run to completion, and the network layer merely
//! delivers packets and carries out the effects the engine returns.

pub mod deck;
pub mod engine;
pub mod player;
pub mod word;

use serde::{Deserialize, Serialize};

/// Opaque handle for one accepted connection.
///
/// Assigned by the network layer; the engine maps it to a player after a
/// successful login. A player outlives its connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}
