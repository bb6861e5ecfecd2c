//! Static Card Catalog
//!
//! Every card identity in the game, with its phonological coordinates and
//! per-card conversion rules. The catalog is immutable and process-global;
//! client and server link the same table, so rule evaluation and deck
//! composition agree bit-for-bit on both ends.
//!
//! Card identities are partitioned into three contiguous ranges:
//! consonants, then vowels, then powers. Classification is by range.
//!
//! Coordinates are 1..=4 on both axes:
//! - consonants: place of articulation (1=labial .. 4=velar/glottal) and
//!   manner (1=nasal, 2=plosive, 3=fricative, 4=approximant)
//! - vowels: frontness (1=front .. 4=back) and height (1=close .. 4=open)
//! - powers: both zero

use serde::{Deserialize, Serialize};

// =============================================================================
// CARD ID
// =============================================================================

/// A card identity.
///
/// The discriminant doubles as the wire encoding and the catalog index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
#[allow(missing_docs)] // the catalog carries the display name of each card
pub enum CardId {
    // Consonants (place, manner)
    Cm = 0,
    Cn,
    Cny,
    Cng,
    Cp,
    Cb,
    Ct,
    Cd,
    Cch,
    Cj,
    Ck,
    Cg,
    Cf,
    Cv,
    Cs,
    Cz,
    Csh,
    Czh,
    Cx,
    Ch,
    Cw,
    Cl,
    Cr,
    Cy,
    // Vowels (frontness, height)
    Vi,
    Vy,
    Vuu,
    Vu,
    Ve,
    Voe,
    Vschwa,
    Vo,
    Veh,
    Vuh,
    Vaw,
    Va,
    // Powers
    PSpellingReform,
    PNegation,
    PBabel,
    PChomsky,
    POwl,
    PDarija,
    PGreatShift,
    PEpenthesis,
    PRebracketing,
    PZipf,
}

/// First vowel discriminant; everything below is a consonant.
pub const FIRST_VOWEL: u8 = CardId::Vi as u8;

/// First power discriminant; everything below is a sound card.
pub const FIRST_POWER: u8 = CardId::PSpellingReform as u8;

/// Total number of card identities.
pub const CARD_COUNT: usize = CardId::PZipf as usize + 1;

/// Sound class of a card.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CardClass {
    /// A consonant sound card.
    Consonant,
    /// A vowel sound card.
    Vowel,
    /// A power card with a named effect.
    Power,
}

impl CardId {
    /// Every card identity, in discriminant order.
    pub const ALL: [CardId; CARD_COUNT] = [
        CardId::Cm,
        CardId::Cn,
        CardId::Cny,
        CardId::Cng,
        CardId::Cp,
        CardId::Cb,
        CardId::Ct,
        CardId::Cd,
        CardId::Cch,
        CardId::Cj,
        CardId::Ck,
        CardId::Cg,
        CardId::Cf,
        CardId::Cv,
        CardId::Cs,
        CardId::Cz,
        CardId::Csh,
        CardId::Czh,
        CardId::Cx,
        CardId::Ch,
        CardId::Cw,
        CardId::Cl,
        CardId::Cr,
        CardId::Cy,
        CardId::Vi,
        CardId::Vy,
        CardId::Vuu,
        CardId::Vu,
        CardId::Ve,
        CardId::Voe,
        CardId::Vschwa,
        CardId::Vo,
        CardId::Veh,
        CardId::Vuh,
        CardId::Vaw,
        CardId::Va,
        CardId::PSpellingReform,
        CardId::PNegation,
        CardId::PBabel,
        CardId::PChomsky,
        CardId::POwl,
        CardId::PDarija,
        CardId::PGreatShift,
        CardId::PEpenthesis,
        CardId::PRebracketing,
        CardId::PZipf,
    ];

    /// Decode from the wire discriminant.
    pub fn from_u8(value: u8) -> Option<CardId> {
        CardId::ALL.get(value as usize).copied()
    }

    /// Which of the three catalog ranges this card falls in.
    #[inline]
    pub fn class(self) -> CardClass {
        let d = self as u8;
        if d < FIRST_VOWEL {
            CardClass::Consonant
        } else if d < FIRST_POWER {
            CardClass::Vowel
        } else {
            CardClass::Power
        }
    }

    /// Sound cards are consonants and vowels.
    #[inline]
    pub fn is_sound(self) -> bool {
        (self as u8) < FIRST_POWER
    }

    /// Power cards carry a named effect instead of coordinates.
    #[inline]
    pub fn is_power(self) -> bool {
        (self as u8) >= FIRST_POWER
    }

    /// Static catalog entry for this card.
    #[inline]
    pub fn info(self) -> &'static CardInfo {
        &CATALOG[self as usize]
    }

    /// Place of articulation (consonants) or frontness (vowels); 0 for powers.
    #[inline]
    pub fn place(self) -> u8 {
        self.info().place_or_frontness
    }

    /// Manner of articulation (consonants) or height (vowels); 0 for powers.
    #[inline]
    pub fn manner(self) -> u8 {
        self.info().manner_or_height
    }
}

impl std::fmt::Display for CardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.info().name)
    }
}

// =============================================================================
// CATALOG
// =============================================================================

/// Static data for one card identity.
#[derive(Debug)]
pub struct CardInfo {
    /// Copies of this card in a fresh deck.
    pub count_in_deck: u8,
    /// Place of articulation / frontness (1..=4; 0 for powers).
    pub place_or_frontness: u8,
    /// Manner of articulation / height (1..=4; 0 for powers).
    pub manner_or_height: u8,
    /// Display name.
    pub name: &'static str,
    /// Center glyph (IPA).
    pub glyph: &'static str,
    /// Conversion rules: playing `rule[0]` on this card is legal; a
    /// two-element rule additionally requires `rule[1]` as a secondary card,
    /// resolved through a card-choice challenge.
    pub converts_to: &'static [&'static [CardId]],
}

const NO_RULES: &[&[CardId]] = &[];

/// The process-global card table, indexed by `CardId` discriminant.
pub static CATALOG: [CardInfo; CARD_COUNT] = [
    // --- Consonants: nasals -------------------------------------------------
    CardInfo { count_in_deck: 4, place_or_frontness: 1, manner_or_height: 1, name: "m", glyph: "m", converts_to: NO_RULES },
    CardInfo { count_in_deck: 4, place_or_frontness: 2, manner_or_height: 1, name: "n", glyph: "n", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 3, manner_or_height: 1, name: "ny", glyph: "\u{0272}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 4, manner_or_height: 1, name: "ng", glyph: "\u{014b}", converts_to: NO_RULES },
    // --- Consonants: plosives -----------------------------------------------
    // Lenition: p > f, b > v. Palatalization of coronals and dorsals needs a
    // yod as the secondary card.
    CardInfo { count_in_deck: 3, place_or_frontness: 1, manner_or_height: 2, name: "p", glyph: "p", converts_to: &[&[CardId::Cf]] },
    CardInfo { count_in_deck: 3, place_or_frontness: 1, manner_or_height: 2, name: "b", glyph: "b", converts_to: &[&[CardId::Cv]] },
    CardInfo { count_in_deck: 4, place_or_frontness: 2, manner_or_height: 2, name: "t", glyph: "t", converts_to: &[&[CardId::Cch, CardId::Cy]] },
    CardInfo { count_in_deck: 3, place_or_frontness: 2, manner_or_height: 2, name: "d", glyph: "d", converts_to: &[&[CardId::Cj, CardId::Cy]] },
    CardInfo { count_in_deck: 2, place_or_frontness: 3, manner_or_height: 2, name: "ch", glyph: "t\u{0283}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 3, manner_or_height: 2, name: "dzh", glyph: "d\u{0292}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 4, place_or_frontness: 4, manner_or_height: 2, name: "k", glyph: "k", converts_to: &[&[CardId::Cch, CardId::Cy]] },
    CardInfo { count_in_deck: 3, place_or_frontness: 4, manner_or_height: 2, name: "g", glyph: "g", converts_to: &[&[CardId::Cj, CardId::Cy]] },
    // --- Consonants: fricatives ---------------------------------------------
    // Debuccalization: f > h, s > h, x > h.
    CardInfo { count_in_deck: 3, place_or_frontness: 1, manner_or_height: 3, name: "f", glyph: "f", converts_to: &[&[CardId::Ch]] },
    CardInfo { count_in_deck: 2, place_or_frontness: 1, manner_or_height: 3, name: "v", glyph: "v", converts_to: NO_RULES },
    CardInfo { count_in_deck: 4, place_or_frontness: 2, manner_or_height: 3, name: "s", glyph: "s", converts_to: &[&[CardId::Csh, CardId::Cy], &[CardId::Ch]] },
    CardInfo { count_in_deck: 2, place_or_frontness: 2, manner_or_height: 3, name: "z", glyph: "z", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 3, manner_or_height: 3, name: "sh", glyph: "\u{0283}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 3, manner_or_height: 3, name: "zh", glyph: "\u{0292}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 4, manner_or_height: 3, name: "kh", glyph: "x", converts_to: &[&[CardId::Ch]] },
    CardInfo { count_in_deck: 4, place_or_frontness: 4, manner_or_height: 3, name: "h", glyph: "h", converts_to: NO_RULES },
    // --- Consonants: approximants -------------------------------------------
    CardInfo { count_in_deck: 3, place_or_frontness: 1, manner_or_height: 4, name: "w", glyph: "w", converts_to: NO_RULES },
    CardInfo { count_in_deck: 4, place_or_frontness: 2, manner_or_height: 4, name: "l", glyph: "l", converts_to: NO_RULES },
    CardInfo { count_in_deck: 4, place_or_frontness: 2, manner_or_height: 4, name: "r", glyph: "r", converts_to: NO_RULES },
    CardInfo { count_in_deck: 3, place_or_frontness: 3, manner_or_height: 4, name: "y", glyph: "j", converts_to: NO_RULES },
    // --- Vowels --------------------------------------------------------------
    // Umlaut (fronting triggered by a following i) needs the i as a
    // secondary card; glide formation is a plain conversion.
    CardInfo { count_in_deck: 4, place_or_frontness: 1, manner_or_height: 1, name: "i", glyph: "i", converts_to: &[&[CardId::Cy]] },
    CardInfo { count_in_deck: 2, place_or_frontness: 2, manner_or_height: 1, name: "ue", glyph: "y", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 3, manner_or_height: 1, name: "uh", glyph: "\u{026f}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 4, place_or_frontness: 4, manner_or_height: 1, name: "u", glyph: "u", converts_to: &[&[CardId::Vy, CardId::Vi], &[CardId::Cw]] },
    CardInfo { count_in_deck: 4, place_or_frontness: 1, manner_or_height: 2, name: "e", glyph: "e", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 2, manner_or_height: 2, name: "oe", glyph: "\u{00f8}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 4, place_or_frontness: 3, manner_or_height: 2, name: "schwa", glyph: "\u{0259}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 4, place_or_frontness: 4, manner_or_height: 2, name: "o", glyph: "o", converts_to: &[&[CardId::Voe, CardId::Vi]] },
    CardInfo { count_in_deck: 3, place_or_frontness: 1, manner_or_height: 3, name: "eh", glyph: "\u{025b}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 3, manner_or_height: 3, name: "vuh", glyph: "\u{028c}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 3, place_or_frontness: 4, manner_or_height: 3, name: "aw", glyph: "\u{0254}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 4, place_or_frontness: 2, manner_or_height: 4, name: "a", glyph: "a", converts_to: &[&[CardId::Veh, CardId::Vi], &[CardId::Vaw]] },
    // --- Powers --------------------------------------------------------------
    CardInfo { count_in_deck: 3, place_or_frontness: 0, manner_or_height: 0, name: "Spelling Reform", glyph: "\u{00a7}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 4, place_or_frontness: 0, manner_or_height: 0, name: "Negation", glyph: "\u{00ac}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 0, manner_or_height: 0, name: "Babel", glyph: "\u{2646}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 0, manner_or_height: 0, name: "Chomsky", glyph: "\u{2200}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 0, manner_or_height: 0, name: "Owl", glyph: "\u{1f989}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 0, manner_or_height: 0, name: "Darija", glyph: "\u{062f}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 0, manner_or_height: 0, name: "Great Shift", glyph: "\u{21c5}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 0, manner_or_height: 0, name: "Epenthesis", glyph: "\u{2295}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 0, manner_or_height: 0, name: "Rebracketing", glyph: "\u{27e6}", converts_to: NO_RULES },
    CardInfo { count_in_deck: 2, place_or_frontness: 0, manner_or_height: 0, name: "Zipf", glyph: "\u{223f}", converts_to: NO_RULES },
];

/// Total card multiplicity of a fresh deck.
pub fn total_deck_count() -> usize {
    CATALOG.iter().map(|c| c.count_in_deck as usize).sum()
}

/// The full deck as a multiset, in catalog order (unshuffled).
pub fn deck_multiset() -> Vec<CardId> {
    let mut deck = Vec::with_capacity(total_deck_count());
    for id in CardId::ALL {
        for _ in 0..id.info().count_in_deck {
            deck.push(id);
        }
    }
    deck
}
