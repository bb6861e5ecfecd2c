//! # Prescriptivism Game Server
//!
//! Authoritative engine and TCP protocol for Prescriptivism, a two-player
//! card game about historical linguistics. Players manipulate words (rows of
//! phoneme-card stacks) by playing sound cards and power cards.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  PRESCRIPTIVISM SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  └── rng.rs      - Seeded Xorshift128+ PRNG (deck shuffle)   │
//! │                                                              │
//! │  cards/          - Static card catalog                       │
//! │  wire/           - Little-endian framed codec                │
//! │  protocol/       - Packet definitions (both directions)      │
//! │  rules/          - Pure move validator                       │
//! │                                                              │
//! │  game/           - Authoritative state (deterministic)       │
//! │  ├── word.rs     - Stack / Word model                        │
//! │  ├── player.rs   - Hand, challenges, connection binding      │
//! │  ├── deck.rs     - Draw deck and discard pile                │
//! │  └── engine.rs   - Turn state machine, packet dispatch       │
//! │                                                              │
//! │  client/         - Read-only state reducer for clients       │
//! │  network/        - TCP listener, framing, heartbeat          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority Model
//!
//! The engine in `game/` is sans-IO and single-owner: the network shell owns
//! it on one task and feeds it decoded packets one at a time. Every handler
//! runs to completion, mutating state and emitting the packets that announce
//! the mutation atomically, so every client observes the same total order of
//! facts. The deck and RNG live on the server alone; clients only ever send
//! intent.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod cards;
pub mod client;
pub mod core;
pub mod game;
pub mod network;
pub mod protocol;
pub mod rules;
pub mod wire;

// Re-export commonly used types
pub use cards::{CardClass, CardId};
pub use crate::core::rng::GameRng;
pub use game::engine::{Effect, EngineConfig, GameEngine, GamePhase};
pub use protocol::{ClientPacket, DisconnectReason, ServerPacket};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 33014;

/// Number of stacks in a player's word.
pub const STARTING_WORD_SIZE: usize = 6;

/// Maximum number of cards in one stack.
pub const MAX_STACK_HEIGHT: usize = 7;

/// Hand size players are topped up to when the game starts.
pub const STARTING_HAND_SIZE: usize = 7;

/// Seconds between heartbeat requests; a client missing two intervals is
/// considered stale and dropped.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// Seconds an accepted socket may linger without a successful Login.
pub const LOGIN_GRACE_SECS: u64 = 10;
