//! Network Layer
//!
//! TCP server for the two-player session. This layer is **non-deterministic**;
//! all game logic runs through `game/`, which it feeds with decoded packets
//! and drains of effects.

pub mod server;

pub use server::{GameServer, ServerConfig, ServerError};
