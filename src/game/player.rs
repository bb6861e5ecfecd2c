//! Player State
//!
//! A player is created on admission and destroyed only at game end. The
//! connection handle is a weak binding: a dropped socket clears it, a later
//! login with the same name restores it.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::cards::CardId;
use crate::game::word::Word;
use crate::game::ConnId;
use crate::protocol::ChoiceMode;
use crate::STARTING_WORD_SIZE;

/// A pending question to one player. While a player's queue is non-empty
/// they may answer the front challenge and do nothing else.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Challenge {
    /// Pick cards from `offered` subject to `mode`/`count`.
    CardChoice {
        /// The player whose word the underlying play targets.
        target: u8,
        /// Cardinality constraint on the reply.
        mode: ChoiceMode,
        /// Constraint operand.
        count: u32,
        /// Cards on offer.
        offered: Vec<CardId>,
    },
    /// Decide whether to negate a power card played against you.
    NegatePowerCard {
        /// The power card in flight.
        id: CardId,
    },
}

/// One seated player.
#[derive(Clone, Debug)]
pub struct Player {
    /// Assigned on admission, stable for the whole game.
    pub id: u8,
    /// Display name; doubles as the rebind credential.
    pub name: String,
    /// Unordered hand.
    pub hand: Vec<CardId>,
    /// The six cards dealt for the initial word, until it is submitted.
    pub drawn_for_word: Option<[CardId; STARTING_WORD_SIZE]>,
    /// The accepted arrangement, until both players have submitted and the
    /// words are built.
    pub chosen_word: Option<[CardId; STARTING_WORD_SIZE]>,
    /// The word, once the initial submission is accepted.
    pub word: Option<Word>,
    /// True once the initial word passed validation.
    pub submitted_word: bool,
    /// FIFO of pending challenges; the front is the active one.
    pub challenges: VecDeque<Challenge>,
    /// Current connection, if any. Cleared on disconnect, restored on rebind.
    pub conn: Option<ConnId>,
}

impl Player {
    /// Seat a new player.
    pub fn new(id: u8, name: String, conn: ConnId) -> Self {
        Self {
            id,
            name,
            hand: Vec::new(),
            drawn_for_word: None,
            chosen_word: None,
            word: None,
            submitted_word: false,
            challenges: VecDeque::new(),
            conn: Some(conn),
        }
    }

    /// True while a socket is bound to this player.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// The active challenge, if any.
    pub fn active_challenge(&self) -> Option<&Challenge> {
        self.challenges.front()
    }

    /// Remove a card from the hand by index.
    pub fn take_from_hand(&mut self, idx: usize) -> Option<CardId> {
        if idx < self.hand.len() {
            Some(self.hand.remove(idx))
        } else {
            None
        }
    }

    /// Remove the first copy of `card` from the hand.
    pub fn take_card(&mut self, card: CardId) -> bool {
        if let Some(pos) = self.hand.iter().position(|&c| c == card) {
            self.hand.remove(pos);
            true
        } else {
            false
        }
    }

    /// Cards this player holds across hand and word.
    pub fn card_count(&self) -> usize {
        let in_word = self.word.as_ref().map(Word::card_count).unwrap_or(0);
        let pending = self.drawn_for_word.map(|d| d.len()).unwrap_or(0);
        self.hand.len() + in_word + pending
    }
}
