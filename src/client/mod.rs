//! Client-Side State Projection
//!
//! A fact-driven reducer over the server's packet stream. The UI layers sit
//! on top of this: they read the projection, send intent packets, and tell
//! the reducer which of their own cards left the hand. Replaying a full
//! packet log against a fresh reducer reconstructs the projection exactly.

use crate::cards::CardId;
use crate::protocol::{ChoiceMode, DisconnectReason, ServerPacket, StackState};
use crate::rules::WordView;
use crate::STARTING_WORD_SIZE;

/// A question from the server awaiting a local answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientPrompt {
    /// Arrange the drawn cards into a starting word.
    ChooseWord {
        /// The dealt cards, in server order.
        drawn: [CardId; STARTING_WORD_SIZE],
    },
    /// Pick cards from an offer.
    CardChoice {
        /// Cardinality constraint on the reply.
        mode: ChoiceMode,
        /// Constraint operand.
        count: u32,
        /// Cards on offer.
        offered: Vec<CardId>,
    },
    /// Decide whether to negate an opposing power card.
    Negation {
        /// The power card in flight.
        card: CardId,
    },
}

/// Everything a client knows about the game.
///
/// Words are indexed by seat (the order of `players`), not by player id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClientGameState {
    /// Own player id, known once the first snapshot arrives.
    pub my_id: Option<u8>,
    /// Seated players as `(id, name)`.
    pub players: Vec<(u8, String)>,
    /// Own hand, mirroring the server's ordering.
    pub hand: Vec<CardId>,
    /// Every player's word, one stack list per seat.
    pub words: Vec<Vec<StackState>>,
    /// Whose turn it is, between StartTurn and EndTurn.
    pub current: Option<u8>,
    /// Open prompt, if the server is waiting on this client.
    pub prompt: Option<ClientPrompt>,
    /// Set when the server closed the session.
    pub disconnect: Option<DisconnectReason>,
}

impl ClientGameState {
    /// An empty projection, before any packet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fact packet into the projection.
    ///
    /// `HeartbeatRequest` is transport-level and ignored here; the
    /// connection layer echoes it.
    pub fn apply(&mut self, packet: &ServerPacket) {
        match packet {
            ServerPacket::HeartbeatRequest => {}
            ServerPacket::StartTurn { player } => self.current = Some(*player),
            ServerPacket::EndTurn { .. } => self.current = None,
            ServerPacket::Draw { player, card } => {
                // Only the drawing player sees the card.
                if let (Some(card), Some(me)) = (card, self.my_id) {
                    if *player == me {
                        self.hand.push(*card);
                    }
                }
            }
            ServerPacket::StartGame(snapshot) => {
                self.my_id = Some(snapshot.your_id);
                self.players = snapshot.players.clone();
                self.hand = snapshot.your_hand.clone();
                self.words = snapshot.words.clone();
                self.current = None;
                self.prompt = None;
            }
            ServerPacket::AddSoundToStack { player, stack, card } => {
                if let Some(s) = self.stack_mut(*player, *stack) {
                    s.cards.push(*card);
                }
            }
            ServerPacket::StackLockChanged { player, stack, locked } => {
                if let Some(s) = self.stack_mut(*player, *stack) {
                    s.locked = *locked;
                }
            }
            ServerPacket::CardChoiceChallenge { mode, count, offered } => {
                self.prompt = Some(ClientPrompt::CardChoice {
                    mode: *mode,
                    count: *count,
                    offered: offered.clone(),
                });
            }
            ServerPacket::PromptNegation { card } => {
                self.prompt = Some(ClientPrompt::Negation { card: *card });
            }
            ServerPacket::WordChoice { word } => {
                self.prompt = Some(ClientPrompt::ChooseWord { drawn: *word });
            }
            ServerPacket::Disconnect { reason } => self.disconnect = Some(*reason),
        }
    }

    /// Record that one of our own cards left the hand (played or discarded).
    /// The server never announces this; the UI knows what it sent.
    pub fn note_card_spent(&mut self, card: CardId) {
        if let Some(pos) = self.hand.iter().position(|&c| c == card) {
            self.hand.remove(pos);
        }
        self.prompt = None;
    }

    /// True when it is this client's turn.
    pub fn is_my_turn(&self) -> bool {
        self.my_id.is_some() && self.current == self.my_id
    }

    /// Seat index of a player id.
    pub fn seat_of(&self, player: u8) -> Option<usize> {
        self.players.iter().position(|(id, _)| *id == player)
    }

    /// Rule-evaluation view of a player's word, for move legality checks
    /// before sending an intent. Shares the server's validator.
    pub fn word_view(&self, player: u8) -> Option<SnapshotView<'_>> {
        let seat = self.seat_of(player)?;
        Some(SnapshotView {
            stacks: &self.words[seat],
            own: self.my_id == Some(player),
        })
    }

    fn stack_mut(&mut self, player: u8, stack: u32) -> Option<&mut StackState> {
        let seat = self.seat_of(player)?;
        self.words.get_mut(seat)?.get_mut(stack as usize)
    }
}

/// Read-only validator view over a wire snapshot.
#[derive(Clone, Copy, Debug)]
pub struct SnapshotView<'a> {
    stacks: &'a [StackState],
    own: bool,
}

impl<'a> SnapshotView<'a> {
    /// View `stacks` as a word; `own` marks it as the viewer's own word.
    pub fn new(stacks: &'a [StackState], own: bool) -> Self {
        Self { stacks, own }
    }
}

impl WordView for SnapshotView<'_> {
    fn len(&self) -> usize {
        self.stacks.len()
    }
    fn top(&self, i: usize) -> CardId {
        // Stacks on the wire are never empty.
        self.stacks[i].cards[self.stacks[i].cards.len() - 1]
    }
    fn is_own_word(&self) -> bool {
        self.own
    }
    fn stack_is_locked(&self, i: usize) -> bool {
        self.stacks[i].locked
    }
    fn stack_is_full(&self, i: usize) -> bool {
        self.stacks[i].cards.len() >= crate::MAX_STACK_HEIGHT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::engine::{Effect, EngineConfig, GameEngine, GamePhase};
    use crate::game::ConnId;
    use crate::protocol::ClientPacket;
    use crate::rules::{validate_initial_word, validate_play_sound, PlayDecision};

    #[test]
    fn test_reducer_applies_deltas() {
        let mut state = ClientGameState::new();
        state.apply(&ServerPacket::StartGame(crate::protocol::StartGame {
            your_id: 0,
            players: vec![(0, "ada".to_owned()), (1, "bab".to_owned())],
            your_hand: vec![CardId::Ck, CardId::Va],
            words: vec![
                vec![StackState { cards: vec![CardId::Cf], locked: false }],
                vec![StackState { cards: vec![CardId::Cm], locked: false }],
            ],
        }));
        state.apply(&ServerPacket::StartTurn { player: 1 });
        assert!(!state.is_my_turn());

        state.apply(&ServerPacket::AddSoundToStack { player: 1, stack: 0, card: CardId::Cn });
        assert_eq!(state.words[1][0].cards, vec![CardId::Cm, CardId::Cn]);

        state.apply(&ServerPacket::StackLockChanged { player: 0, stack: 0, locked: true });
        assert!(state.words[0][0].locked);

        // Hidden draws leave the hand alone; own draws grow it.
        state.apply(&ServerPacket::Draw { player: 1, card: None });
        assert_eq!(state.hand.len(), 2);
        state.apply(&ServerPacket::EndTurn { player: 1 });
        state.apply(&ServerPacket::StartTurn { player: 0 });
        state.apply(&ServerPacket::Draw { player: 0, card: Some(CardId::Cs) });
        assert_eq!(state.hand, vec![CardId::Ck, CardId::Va, CardId::Cs]);
        assert!(state.is_my_turn());
    }

    #[test]
    fn test_prompts_latch_until_answered() {
        let mut state = ClientGameState::new();
        state.apply(&ServerPacket::PromptNegation { card: CardId::PBabel });
        assert_eq!(state.prompt, Some(ClientPrompt::Negation { card: CardId::PBabel }));
        state.note_card_spent(CardId::PNegation);
        assert_eq!(state.prompt, None);
    }

    /// Search the permutations of a deal for a legal arrangement.
    fn find_valid_arrangement(
        drawn: &[CardId; STARTING_WORD_SIZE],
    ) -> Option<[CardId; STARTING_WORD_SIZE]> {
        fn rec(
            arr: &mut [CardId; STARTING_WORD_SIZE],
            k: usize,
            drawn: &[CardId; STARTING_WORD_SIZE],
        ) -> Option<[CardId; STARTING_WORD_SIZE]> {
            if k == arr.len() {
                return validate_initial_word(arr, drawn).ok().map(|_| *arr);
            }
            for i in k..arr.len() {
                arr.swap(k, i);
                if let Some(found) = rec(arr, k + 1, drawn) {
                    return Some(found);
                }
                arr.swap(k, i);
            }
            None
        }
        let mut arr = *drawn;
        rec(&mut arr, 0, drawn)
    }

    /// Feed every Send effect into the matching reducer; panic on kicks.
    fn dispatch(effects: &[Effect], clients: &mut [(ConnId, ClientGameState); 2]) {
        for effect in effects {
            match effect {
                Effect::Send { conn, packet } => {
                    for (c, state) in clients.iter_mut() {
                        if c == conn {
                            state.apply(packet);
                        }
                    }
                }
                Effect::Kick { conn, reason } => panic!("unexpected kick of {conn}: {reason:?}"),
            }
        }
    }

    /// The current player's first legal sound play, as `(hand card, target
    /// player, stack)`. Uses the shared validator over the client snapshot.
    fn find_sound_play(state: &ClientGameState) -> Option<(CardId, u8, u32)> {
        for &card in &state.hand {
            if !card.is_sound() {
                continue;
            }
            for &(target, _) in &state.players {
                let view = state.word_view(target)?;
                for stack in 0..view.len() {
                    if validate_play_sound(card, &view, stack) == PlayDecision::Valid {
                        return Some((card, target, stack as u32));
                    }
                }
            }
        }
        None
    }

    /// Drive a whole game through the engine while mirroring both clients
    /// through the reducer; afterwards every projection field matches the
    /// authoritative state.
    #[test]
    fn test_full_game_log_replay_matches_server() {
        'seeds: for seed in 0..64u64 {
            let mut engine = GameEngine::new(EngineConfig { password: "p".to_owned(), seed });
            let c0 = ConnId(1);
            let c1 = ConnId(2);
            let mut clients =
                [(c0, ClientGameState::new()), (c1, ClientGameState::new())];

            let effects = engine.on_packet(
                c0,
                ClientPacket::Login { name: "A".to_owned(), password: "p".to_owned() },
            );
            dispatch(&effects, &mut clients);
            let effects = engine.on_packet(
                c1,
                ClientPacket::Login { name: "B".to_owned(), password: "p".to_owned() },
            );
            dispatch(&effects, &mut clients);

            for i in 0..2 {
                let Some(ClientPrompt::ChooseWord { drawn }) = clients[i].1.prompt.clone() else {
                    panic!("no deal for client {i}");
                };
                let Some(word) = find_valid_arrangement(&drawn) else {
                    continue 'seeds;
                };
                let effects =
                    engine.on_packet(clients[i].0, ClientPacket::WordChoice { word });
                dispatch(&effects, &mut clients);
            }
            assert_eq!(engine.phase(), GamePhase::Running);

            for _ in 0..8 {
                let current = engine.current_player();
                let i = clients.iter().position(|(_, s)| s.my_id == Some(current)).unwrap();
                let (conn, intent, spent) = match find_sound_play(&clients[i].1) {
                    Some((card, target, stack)) => {
                        let hand_idx =
                            clients[i].1.hand.iter().position(|&c| c == card).unwrap() as u32;
                        (
                            clients[i].0,
                            ClientPacket::PlaySingleTarget {
                                hand_idx,
                                target_player: target,
                                target_stack: stack,
                            },
                            card,
                        )
                    }
                    None => (
                        clients[i].0,
                        ClientPacket::Pass { discard_hand_idx: 0 },
                        clients[i].1.hand[0],
                    ),
                };
                clients[i].1.note_card_spent(spent);
                let effects = engine.on_packet(conn, intent);
                dispatch(&effects, &mut clients);
            }

            // Projection equality, field by field.
            for (_, state) in &clients {
                let me = state.my_id.unwrap() as usize;
                assert_eq!(state.hand, engine.players()[me].hand);
                assert_eq!(state.current, Some(engine.current_player()));
                for (seat, player) in engine.players().iter().enumerate() {
                    assert_eq!(state.players[seat], (player.id, player.name.clone()));
                    assert_eq!(state.words[seat], player.word.as_ref().unwrap().snapshot());
                }
            }
            return;
        }
        panic!("no seed produced arrangeable deals for both players");
    }
}
