//! Move Validator
//!
//! Pure functions deciding whether a move is legal given a view of a word.
//! Both client and server evaluate these, but only server-side outcomes are
//! binding. Nothing here mutates state or performs I/O; same inputs always
//! produce the same output.

use thiserror::Error;

use crate::cards::{CardClass, CardId};
use crate::STARTING_WORD_SIZE;

/// Read-only capability over one player's word, as rule evaluation sees it.
///
/// Only the top card of each stack is visible to the rules.
pub trait WordView {
    /// Number of stacks.
    fn len(&self) -> usize;
    /// True if the word has no stacks (never the case in a live game).
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Top card of stack `i`.
    fn top(&self, i: usize) -> CardId;
    /// True when the acting player owns this word.
    fn is_own_word(&self) -> bool;
    /// Lock flag of stack `i`.
    fn stack_is_locked(&self, i: usize) -> bool;
    /// Fullness flag of stack `i`.
    fn stack_is_full(&self, i: usize) -> bool;
}

/// Outcome of validating a sound-card play.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayDecision {
    /// The play is legal as-is.
    Valid,
    /// Legal only together with a secondary card, resolved through a
    /// card-choice challenge.
    NeedsOtherCard,
    /// The play breaks the rules.
    Invalid,
}

/// Validate playing sound card `played` onto stack `at` of `word`.
///
/// Decision order, first match wins:
/// 1. locked or full target stack: invalid
/// 2. spreading: if the target top is /h/ or /ə/ and `played` equals the top
///    of the stack immediately left or right of the target, valid
/// 3. the target top's conversion rules: a rule whose first element is
///    `played` makes the play valid (length 1) or in need of a secondary
///    card (length 2)
/// 4. coordinate adjacency: same sound class, not the identical card, and
///    Manhattan distance of the coordinate pair below 2
/// 5. otherwise invalid
pub fn validate_play_sound(played: CardId, word: &impl WordView, at: usize) -> PlayDecision {
    if !played.is_sound() || at >= word.len() {
        return PlayDecision::Invalid;
    }
    if word.stack_is_locked(at) || word.stack_is_full(at) {
        return PlayDecision::Invalid;
    }

    let top = word.top(at);

    // Schwa/aspirate spreading takes precedence over everything below.
    if top == CardId::Ch || top == CardId::Vschwa {
        let matches_left = at > 0 && word.top(at - 1) == played;
        let matches_right = at + 1 < word.len() && word.top(at + 1) == played;
        if matches_left || matches_right {
            return PlayDecision::Valid;
        }
    }

    for rule in top.info().converts_to {
        if rule[0] == played {
            return if rule.len() == 1 {
                PlayDecision::Valid
            } else {
                PlayDecision::NeedsOtherCard
            };
        }
    }

    let same_class = matches!(
        (played.class(), top.class()),
        (CardClass::Consonant, CardClass::Consonant) | (CardClass::Vowel, CardClass::Vowel)
    );
    if same_class && played != top {
        let d1 = played.place().abs_diff(top.place());
        let d2 = played.manner().abs_diff(top.manner());
        if d1 + d2 < 2 {
            return PlayDecision::Valid;
        }
    }

    PlayDecision::Invalid
}

/// Ways an initial word submission can fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum InitialWordError {
    /// The submission is not a rearrangement of the drawn cards.
    #[error("submitted word is not a permutation of the drawn cards")]
    NotAPermutation,
    /// A same-class run exceeds two cards.
    #[error("cluster longer than two cards")]
    ClusterTooLong,
    /// The word-initial consonant cluster starts with a nasal or plosive.
    #[error("bad manner for word-initial cluster")]
    BadInitialClusterManner,
    /// The word-initial consonant cluster repeats both coordinates.
    #[error("word-initial cluster shares both coordinates")]
    BadInitialClusterCoordinates,
}

/// Validate the initial word arrangement against the drawn cards.
pub fn validate_initial_word(
    submitted: &[CardId; STARTING_WORD_SIZE],
    drawn: &[CardId; STARTING_WORD_SIZE],
) -> Result<(), InitialWordError> {
    let mut a = *submitted;
    let mut b = *drawn;
    a.sort_unstable();
    b.sort_unstable();
    if a != b {
        return Err(InitialWordError::NotAPermutation);
    }

    // No maximal same-class run longer than 2.
    let mut run = 1usize;
    for pair in submitted.windows(2) {
        if pair[0].class() == pair[1].class() {
            run += 1;
            if run > 2 {
                return Err(InitialWordError::ClusterTooLong);
            }
        } else {
            run = 1;
        }
    }

    // Constraints on a word-initial consonant cluster.
    let first = submitted[0];
    let second = submitted[1];
    if first.class() == CardClass::Consonant && second.class() == CardClass::Consonant {
        if first.manner() <= 2 {
            return Err(InitialWordError::BadInitialClusterManner);
        }
        if first.place() == second.place() && first.manner() == second.manner() {
            return Err(InitialWordError::BadInitialClusterCoordinates);
        }
    }

    Ok(())
}

/// Validate a Spelling Reform play: only on an unlocked stack of one's own
/// word.
pub fn validate_spelling_reform(word: &impl WordView, at: usize) -> bool {
    word.is_own_word() && at < word.len() && !word.stack_is_locked(at)
}
