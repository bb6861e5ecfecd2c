//! Protocol Packets
//!
//! Wire format for client-server communication over TCP. A framed packet is
//! a `u8` kind byte followed by the body for that kind; kinds are assigned
//! in declaration order within each direction. There is no outer length
//! prefix — the body length follows from the schema, and readers signal
//! "need more" ([`WireError::TruncatedInput`]) instead of blocking.
//!
//! Clients send *intent*; the server answers with *facts*. Only server-side
//! outcomes are binding.

use serde::{Deserialize, Serialize};

use crate::cards::CardId;
use crate::wire::{Reader, Wire, WireError, Writer};
use crate::STARTING_WORD_SIZE;

// =============================================================================
// SHARED ENUMS
// =============================================================================

/// Why the server closed a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DisconnectReason {
    /// Login carried the wrong server password.
    WrongPassword = 0,
    /// Two players are already seated.
    ServerFull = 1,
    /// Initial word submission failed validation.
    InvalidWord = 2,
    /// A play violated the game rules.
    IllegalMove = 3,
    /// A packet arrived that the protocol forbids in the current state.
    ProtocolViolation = 4,
    /// Heartbeats or the login grace window ran out.
    Timeout = 5,
    /// The server is going away.
    ServerShutdown = 6,
}

impl DisconnectReason {
    /// Decode from the wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::WrongPassword),
            1 => Some(Self::ServerFull),
            2 => Some(Self::InvalidWord),
            3 => Some(Self::IllegalMove),
            4 => Some(Self::ProtocolViolation),
            5 => Some(Self::Timeout),
            6 => Some(Self::ServerShutdown),
            _ => None,
        }
    }
}

impl Wire for DisconnectReason {
    fn encode(&self, w: &mut Writer) {
        w.put_u8(*self as u8);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let v = r.get_u8()?;
        Self::from_u8(v).ok_or(WireError::BadEnum { type_name: "DisconnectReason", value: v as u64 })
    }
}

/// Cardinality constraint of a card-choice challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChoiceMode {
    /// The reply must contain at least `count` cards.
    AtLeast = 0,
    /// The reply must contain exactly `count` cards.
    Exactly = 1,
    /// The reply must contain at most `count` cards.
    AtMost = 2,
}

impl ChoiceMode {
    /// Decode from the wire byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::AtLeast),
            1 => Some(Self::Exactly),
            2 => Some(Self::AtMost),
            _ => None,
        }
    }

    /// Does a reply of `chosen` cards satisfy this mode with `count`?
    pub fn accepts(self, count: u32, chosen: usize) -> bool {
        match self {
            Self::AtLeast => chosen as u32 >= count,
            Self::Exactly => chosen as u32 == count,
            Self::AtMost => chosen as u32 <= count,
        }
    }
}

impl Wire for ChoiceMode {
    fn encode(&self, w: &mut Writer) {
        w.put_u8(*self as u8);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let v = r.get_u8()?;
        Self::from_u8(v).ok_or(WireError::BadEnum { type_name: "ChoiceMode", value: v as u64 })
    }
}

impl Wire for CardId {
    fn encode(&self, w: &mut Writer) {
        w.put_u8(*self as u8);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        let v = r.get_u8()?;
        CardId::from_u8(v).ok_or(WireError::BadEnum { type_name: "CardId", value: v as u64 })
    }
}

// =============================================================================
// SNAPSHOT RECORDS
// =============================================================================

/// One stack of a word as the wire carries it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackState {
    /// Cards bottom-to-top.
    pub cards: Vec<CardId>,
    /// Set by a successful Spelling Reform; blocks further mutation.
    pub locked: bool,
}

impl Wire for StackState {
    fn encode(&self, w: &mut Writer) {
        w.put_seq(&self.cards);
        w.put_bool(self.locked);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self { cards: r.get_seq()?, locked: r.get_bool()? })
    }
}

/// Full game snapshot, sent at game start and on rebind.
///
/// At game start every stack holds exactly one card; mid-game (after a
/// reconnect) stacks carry their full contents and lock flags so the client
/// can rebuild its view losslessly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartGame {
    /// The recipient's player id.
    pub your_id: u8,
    /// All seated players: (id, name).
    pub players: Vec<(u8, String)>,
    /// The recipient's hand. Opponents' hands are never sent.
    pub your_hand: Vec<CardId>,
    /// Every player's word, indexed like `players`.
    pub words: Vec<Vec<StackState>>,
}

impl Wire for StartGame {
    fn encode(&self, w: &mut Writer) {
        w.put_u8(self.your_id);
        w.put_seq(&self.players);
        w.put_seq(&self.your_hand);
        w.put_seq(&self.words);
    }
    fn decode(r: &mut Reader<'_>) -> Result<Self, WireError> {
        Ok(Self {
            your_id: r.get_u8()?,
            players: r.get_seq()?,
            your_hand: r.get_seq()?,
            words: r.get_seq()?,
        })
    }
}

// =============================================================================
// SERVER -> CLIENT PACKETS
// =============================================================================

/// Packets sent from server to client (facts).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ServerPacket {
    /// Liveness probe; the client must echo [`ClientPacket::HeartbeatResponse`].
    HeartbeatRequest,

    /// A player's turn begins.
    StartTurn {
        /// Whose turn it now is.
        player: u8,
    },

    /// A player's turn is over.
    EndTurn {
        /// Whose turn just ended.
        player: u8,
    },

    /// A player drew a card. `card` is `None` when the drawer is not the
    /// recipient (hidden information).
    Draw {
        /// Who drew.
        player: u8,
        /// The drawn card, or hidden.
        card: Option<CardId>,
    },

    /// Full snapshot: game start, or state resend after rebind.
    StartGame(StartGame),

    /// A sound card landed on top of a stack.
    AddSoundToStack {
        /// Owner of the word.
        player: u8,
        /// Stack index within the word.
        stack: u32,
        /// The card now on top.
        card: CardId,
    },

    /// A stack's lock flag changed.
    StackLockChanged {
        /// Owner of the word.
        player: u8,
        /// Stack index within the word.
        stack: u32,
        /// New lock state.
        locked: bool,
    },

    /// The recipient must pick cards from `offered` subject to `mode`/`count`.
    CardChoiceChallenge {
        /// Cardinality constraint on the reply.
        mode: ChoiceMode,
        /// Constraint operand.
        count: u32,
        /// Cards on offer.
        offered: Vec<CardId>,
    },

    /// The recipient may negate the named power card.
    PromptNegation {
        /// The power card being played against the recipient.
        card: CardId,
    },

    /// The connection is being closed for `reason`. Player state survives
    /// for rebind unless the game is over.
    Disconnect {
        /// Taxonomic close reason.
        reason: DisconnectReason,
    },

    /// Request for the initial word: carries the six drawn sound cards the
    /// client must arrange and submit back.
    WordChoice {
        /// The drawn cards, in draw order.
        word: [CardId; STARTING_WORD_SIZE],
    },
}

impl ServerPacket {
    /// Kind discriminator, assigned in declaration order.
    pub fn kind(&self) -> u8 {
        match self {
            Self::HeartbeatRequest => 0,
            Self::StartTurn { .. } => 1,
            Self::EndTurn { .. } => 2,
            Self::Draw { .. } => 3,
            Self::StartGame(_) => 4,
            Self::AddSoundToStack { .. } => 5,
            Self::StackLockChanged { .. } => 6,
            Self::CardChoiceChallenge { .. } => 7,
            Self::PromptNegation { .. } => 8,
            Self::Disconnect { .. } => 9,
            Self::WordChoice { .. } => 10,
        }
    }

    /// Encode as a framed packet: kind byte, then body.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(self.kind());
        match self {
            Self::HeartbeatRequest => {}
            Self::StartTurn { player } | Self::EndTurn { player } => w.put_u8(*player),
            Self::Draw { player, card } => {
                w.put_u8(*player);
                card.encode(&mut w);
            }
            Self::StartGame(snapshot) => snapshot.encode(&mut w),
            Self::AddSoundToStack { player, stack, card } => {
                w.put_u8(*player);
                w.put_u32(*stack);
                card.encode(&mut w);
            }
            Self::StackLockChanged { player, stack, locked } => {
                w.put_u8(*player);
                w.put_u32(*stack);
                w.put_bool(*locked);
            }
            Self::CardChoiceChallenge { mode, count, offered } => {
                mode.encode(&mut w);
                w.put_u32(*count);
                w.put_seq(offered);
            }
            Self::PromptNegation { card } => card.encode(&mut w),
            Self::Disconnect { reason } => reason.encode(&mut w),
            Self::WordChoice { word } => word.encode(&mut w),
        }
        w.into_bytes()
    }

    /// Decode one framed packet from the front of `buf`.
    ///
    /// Returns the packet and the number of bytes consumed.
    /// [`WireError::TruncatedInput`] means the frame is not complete yet.
    pub fn decode_from(buf: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(buf);
        let kind = r.get_u8()?;
        let packet = match kind {
            0 => Self::HeartbeatRequest,
            1 => Self::StartTurn { player: r.get_u8()? },
            2 => Self::EndTurn { player: r.get_u8()? },
            3 => Self::Draw { player: r.get_u8()?, card: Option::<CardId>::decode(&mut r)? },
            4 => Self::StartGame(StartGame::decode(&mut r)?),
            5 => Self::AddSoundToStack {
                player: r.get_u8()?,
                stack: r.get_u32()?,
                card: CardId::decode(&mut r)?,
            },
            6 => Self::StackLockChanged {
                player: r.get_u8()?,
                stack: r.get_u32()?,
                locked: r.get_bool()?,
            },
            7 => Self::CardChoiceChallenge {
                mode: ChoiceMode::decode(&mut r)?,
                count: r.get_u32()?,
                offered: r.get_seq()?,
            },
            8 => Self::PromptNegation { card: CardId::decode(&mut r)? },
            9 => Self::Disconnect { reason: DisconnectReason::decode(&mut r)? },
            10 => Self::WordChoice { word: r.get_array()? },
            tag => {
                return Err(WireError::BadVariantTag { type_name: "ServerPacket", tag });
            }
        };
        Ok((packet, r.position()))
    }
}

// =============================================================================
// CLIENT -> SERVER PACKETS
// =============================================================================

/// Packets sent from client to server (intent).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientPacket {
    /// Echo of a heartbeat request.
    HeartbeatResponse,

    /// Authenticate. The same name rebinds a disconnected player.
    Login {
        /// Player display name; doubles as the rebind credential.
        name: String,
        /// Shared server password.
        password: String,
    },

    /// Play the card at `hand_idx` against one stack of one word.
    PlaySingleTarget {
        /// Index into the sender's hand.
        hand_idx: u32,
        /// Owner of the targeted word.
        target_player: u8,
        /// Stack index within the targeted word.
        target_stack: u32,
    },

    /// Forfeit the turn, discarding one hand card.
    Pass {
        /// Index of the hand card to discard.
        discard_hand_idx: u32,
    },

    /// Submitted arrangement of the six drawn cards.
    WordChoice {
        /// The proposed word, left to right.
        word: [CardId; STARTING_WORD_SIZE],
    },

    /// Answer to [`ServerPacket::PromptNegation`].
    NegationReply {
        /// True to cancel the prompted power card.
        negate: bool,
    },

    /// Answer to [`ServerPacket::CardChoiceChallenge`].
    CardChoiceReply {
        /// Chosen subset of the offered cards.
        chosen: Vec<CardId>,
    },
}

impl ClientPacket {
    /// Kind discriminator, assigned in declaration order.
    pub fn kind(&self) -> u8 {
        match self {
            Self::HeartbeatResponse => 0,
            Self::Login { .. } => 1,
            Self::PlaySingleTarget { .. } => 2,
            Self::Pass { .. } => 3,
            Self::WordChoice { .. } => 4,
            Self::NegationReply { .. } => 5,
            Self::CardChoiceReply { .. } => 6,
        }
    }

    /// Encode as a framed packet: kind byte, then body.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.put_u8(self.kind());
        match self {
            Self::HeartbeatResponse => {}
            Self::Login { name, password } => {
                w.put_str(name);
                w.put_str(password);
            }
            Self::PlaySingleTarget { hand_idx, target_player, target_stack } => {
                w.put_u32(*hand_idx);
                w.put_u8(*target_player);
                w.put_u32(*target_stack);
            }
            Self::Pass { discard_hand_idx } => w.put_u32(*discard_hand_idx),
            Self::WordChoice { word } => word.encode(&mut w),
            Self::NegationReply { negate } => w.put_bool(*negate),
            Self::CardChoiceReply { chosen } => w.put_seq(chosen),
        }
        w.into_bytes()
    }

    /// Decode one framed packet from the front of `buf`.
    ///
    /// Returns the packet and the number of bytes consumed.
    /// [`WireError::TruncatedInput`] means the frame is not complete yet.
    pub fn decode_from(buf: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(buf);
        let kind = r.get_u8()?;
        let packet = match kind {
            0 => Self::HeartbeatResponse,
            1 => Self::Login { name: r.get_string()?, password: r.get_string()? },
            2 => Self::PlaySingleTarget {
                hand_idx: r.get_u32()?,
                target_player: r.get_u8()?,
                target_stack: r.get_u32()?,
            },
            3 => Self::Pass { discard_hand_idx: r.get_u32()? },
            4 => Self::WordChoice { word: r.get_array()? },
            5 => Self::NegationReply { negate: r.get_bool()? },
            6 => Self::CardChoiceReply { chosen: r.get_seq()? },
            tag => {
                return Err(WireError::BadVariantTag { type_name: "ClientPacket", tag });
            }
        };
        Ok((packet, r.position()))
    }
}
