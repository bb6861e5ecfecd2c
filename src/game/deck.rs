//! Draw Deck and Discard Pile
//!
//! Both are owned by the engine and mutated only from its task. The deck is
//! composed at game start from the catalog's multiplicities minus every card
//! already dealt, then shuffled with the engine's RNG. When the deck runs
//! dry the discard pile is shuffled back in.

use serde::{Deserialize, Serialize};

use crate::cards::{deck_multiset, CardId};
use crate::core::rng::GameRng;

/// The engine's card pools.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Deck {
    draw: Vec<CardId>,
    discard: Vec<CardId>,
}

impl Deck {
    /// Compose and shuffle the draw deck: the full catalog multiset minus
    /// `dealt` (cards already in hands and words).
    pub fn build_excluding(dealt: &[CardId], rng: &mut GameRng) -> Self {
        let mut draw = deck_multiset();
        for &card in dealt {
            if let Some(pos) = draw.iter().position(|&c| c == card) {
                draw.swap_remove(pos);
            }
        }
        rng.shuffle(&mut draw);
        Self { draw, discard: Vec::new() }
    }

    /// Draw the top card, reshuffling the discard pile in when the deck is
    /// empty. `None` only when both pools are exhausted.
    pub fn draw(&mut self, rng: &mut GameRng) -> Option<CardId> {
        if self.draw.is_empty() && !self.discard.is_empty() {
            std::mem::swap(&mut self.draw, &mut self.discard);
            rng.shuffle(&mut self.draw);
        }
        self.draw.pop()
    }

    /// Put a card on the discard pile.
    pub fn discard(&mut self, card: CardId) {
        self.discard.push(card);
    }

    /// Cards left to draw.
    pub fn draw_len(&self) -> usize {
        self.draw.len()
    }

    /// Cards discarded so far.
    pub fn discard_len(&self) -> usize {
        self.discard.len()
    }
}
