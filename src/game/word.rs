//! Word and Stack Model
//!
//! A word is an ordered row of stacks; each stack is a small pile of sound
//! cards. Only the engine mutates these, and only through methods that
//! uphold the invariants: a stack holds 1..=7 cards, and a locked stack
//! refuses all mutation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cards::CardId;
use crate::protocol::StackState;
use crate::rules::WordView;
use crate::{MAX_STACK_HEIGHT, STARTING_WORD_SIZE};

/// Why a stack refused a card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum StackError {
    /// The stack already holds the maximum number of cards.
    #[error("stack is full")]
    Full,
    /// The stack was locked by a Spelling Reform.
    #[error("stack is locked")]
    Locked,
    /// Only sound cards live in stacks.
    #[error("not a sound card")]
    NotASound,
}

/// One pile of sound cards at a word position. Top = last.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    cards: Vec<CardId>,
    locked: bool,
}

impl Stack {
    /// A fresh one-card stack.
    pub fn new(bottom: CardId) -> Self {
        Self { cards: vec![bottom], locked: false }
    }

    /// Number of cards in the stack.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Stacks are never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// The visible card.
    pub fn top(&self) -> CardId {
        // Invariant: 1..=MAX_STACK_HEIGHT cards.
        self.cards[self.cards.len() - 1]
    }

    /// Cards bottom-to-top.
    pub fn cards(&self) -> &[CardId] {
        &self.cards
    }

    /// `full ⇔ len == MAX_STACK_HEIGHT`.
    pub fn is_full(&self) -> bool {
        self.cards.len() == MAX_STACK_HEIGHT
    }

    /// Lock flag.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Lock the stack (Spelling Reform).
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Push a sound card on top.
    pub fn push(&mut self, card: CardId) -> Result<(), StackError> {
        if !card.is_sound() {
            return Err(StackError::NotASound);
        }
        if self.locked {
            return Err(StackError::Locked);
        }
        if self.is_full() {
            return Err(StackError::Full);
        }
        self.cards.push(card);
        Ok(())
    }

    /// Remove every card above the bottom one, returning the removed cards
    /// top-down. No-op on locked or single-card stacks.
    pub fn trim_to_bottom(&mut self) -> Vec<CardId> {
        if self.locked {
            return Vec::new();
        }
        let mut removed = self.cards.split_off(1);
        removed.reverse();
        removed
    }

    /// Wire representation.
    pub fn snapshot(&self) -> StackState {
        StackState { cards: self.cards.clone(), locked: self.locked }
    }
}

/// A player's word: a fixed-width row of stacks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    stacks: Vec<Stack>,
}

impl Word {
    /// Build the starting word: one stack per submitted card.
    pub fn from_cards(cards: &[CardId; STARTING_WORD_SIZE]) -> Self {
        Self { stacks: cards.iter().map(|&c| Stack::new(c)).collect() }
    }

    /// Number of stacks.
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    /// Words always have stacks.
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    /// Borrow stack `i`.
    pub fn stack(&self, i: usize) -> Option<&Stack> {
        self.stacks.get(i)
    }

    /// Mutably borrow stack `i`.
    pub fn stack_mut(&mut self, i: usize) -> Option<&mut Stack> {
        self.stacks.get_mut(i)
    }

    /// All stacks, left to right.
    pub fn stacks(&self) -> &[Stack] {
        &self.stacks
    }

    /// Iterate mutably over all stacks (Babel).
    pub fn stacks_mut(&mut self) -> impl Iterator<Item = &mut Stack> {
        self.stacks.iter_mut()
    }

    /// Total cards across all stacks.
    pub fn card_count(&self) -> usize {
        self.stacks.iter().map(Stack::len).sum()
    }

    /// Wire representation of the whole word.
    pub fn snapshot(&self) -> Vec<StackState> {
        self.stacks.iter().map(Stack::snapshot).collect()
    }

    /// Rule-evaluation view of this word.
    pub fn view(&self, own: bool) -> RuleView<'_> {
        RuleView { word: self, own }
    }
}

/// Adapter giving the validator its read-only capability over a word.
#[derive(Clone, Copy, Debug)]
pub struct RuleView<'a> {
    word: &'a Word,
    own: bool,
}

impl WordView for RuleView<'_> {
    fn len(&self) -> usize {
        self.word.len()
    }
    fn top(&self, i: usize) -> CardId {
        self.word.stacks[i].top()
    }
    fn is_own_word(&self) -> bool {
        self.own
    }
    fn stack_is_locked(&self, i: usize) -> bool {
        self.word.stacks[i].is_locked()
    }
    fn stack_is_full(&self, i: usize) -> bool {
        self.word.stacks[i].is_full()
    }
}
