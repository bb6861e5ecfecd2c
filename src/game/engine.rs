//! Game Engine
//!
//! The authoritative turn state machine. Owns the players, the deck, and the
//! RNG; consumes decoded client packets one at a time and returns the
//! effects (sends and kicks) the network layer must carry out. Handlers run
//! to completion — the engine never holds a suspended action across I/O
//! except through the per-player challenge queue.

use std::panic::Location;

use tracing::{debug, info, warn};

use crate::cards::{deck_multiset, CardClass, CardId};
use crate::core::rng::GameRng;
use crate::game::deck::Deck;
use crate::game::player::{Challenge, Player};
use crate::game::word::Word;
use crate::game::ConnId;
use crate::protocol::{
    ChoiceMode, ClientPacket, DisconnectReason, ServerPacket, StartGame,
};
use crate::rules::{
    validate_initial_word, validate_play_sound, validate_spelling_reform, PlayDecision, WordView,
};
use crate::{STARTING_HAND_SIZE, STARTING_WORD_SIZE};

/// Lifecycle of one game.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GamePhase {
    /// Fewer than two players have logged in.
    WaitingForPlayerRegistration,
    /// Both seated; waiting for initial word submissions.
    WaitingForWords,
    /// Turns are being played.
    Running,
}

/// What the network layer must do after a handler ran.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Deliver a packet to one connection.
    Send {
        /// Destination connection.
        conn: ConnId,
        /// The packet.
        packet: ServerPacket,
    },
    /// Send a Disconnect packet with `reason`, then close the connection.
    /// The player (if any) stays seated for rebind.
    Kick {
        /// Connection to drop.
        conn: ConnId,
        /// Taxonomic close reason.
        reason: DisconnectReason,
    },
}

/// A play suspended on a challenge reply.
#[derive(Clone, Debug)]
enum Pending {
    /// Waiting for the opponent to answer a negation prompt.
    Negation {
        actor: u8,
        card: CardId,
        target: u8,
        stack: u32,
    },
    /// Waiting for the actor to pick the secondary card of a conversion.
    CardChoice {
        actor: u8,
        played: CardId,
        target: u8,
        stack: u32,
        offered: Vec<CardId>,
    },
}

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Shared password all logins must present.
    pub password: String,
    /// RNG seed; fixes the deal, the deck order, and the starting player.
    pub seed: u64,
}

/// The authoritative game state machine.
#[derive(Debug)]
pub struct GameEngine {
    phase: GamePhase,
    players: Vec<Player>,
    deck: Deck,
    rng: GameRng,
    password: String,
    /// Index of the player whose turn it is; meaningful only in `Running`.
    current: usize,
    /// Card drawn at the top of the current turn, for rebind resend.
    turn_drawn: Option<CardId>,
    pending: Option<Pending>,
    abandoned: bool,
}

impl GameEngine {
    /// Create an engine with the given password and RNG seed.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            phase: GamePhase::WaitingForPlayerRegistration,
            players: Vec::with_capacity(2),
            deck: Deck::default(),
            rng: GameRng::new(config.seed),
            password: config.password,
            current: 0,
            turn_drawn: None,
            pending: None,
            abandoned: false,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Id of the player whose turn it is (only meaningful in `Running`).
    pub fn current_player(&self) -> u8 {
        self.players.get(self.current).map(|p| p.id).unwrap_or(0)
    }

    /// True once every seated player has dropped after the game began.
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    /// Seated players (read-only; tests and diagnostics).
    pub fn players(&self) -> &[Player] {
        &self.players
    }

    /// Cards left in the draw pile.
    pub fn deck_len(&self) -> usize {
        self.deck.draw_len()
    }

    /// Cards in the discard pile.
    pub fn discard_len(&self) -> usize {
        self.deck.discard_len()
    }

    // =========================================================================
    // CONNECTION LIFECYCLE
    // =========================================================================

    /// A connection dropped. The player (if the connection was bound to one)
    /// stays seated with a null connection; the game pauses until rebind.
    pub fn on_disconnect(&mut self, conn: ConnId) {
        if let Some(player) = self.players.iter_mut().find(|p| p.conn == Some(conn)) {
            player.conn = None;
            info!(player = player.id, name = %player.name, "player disconnected, awaiting rebind");
        }
        if self.phase != GamePhase::WaitingForPlayerRegistration
            && self.players.iter().all(|p| p.conn.is_none())
        {
            info!("all players gone, game abandoned");
            self.abandoned = true;
        }
    }

    /// Dispatch one decoded packet from a connection.
    pub fn on_packet(&mut self, conn: ConnId, packet: ClientPacket) -> Vec<Effect> {
        debug!(%conn, kind = packet.kind(), "packet");
        match packet {
            ClientPacket::Login { name, password } => self.handle_login(conn, name, password),
            ClientPacket::HeartbeatResponse => Vec::new(), // transport-level, nothing to do
            other => {
                let Some(idx) = self.players.iter().position(|p| p.conn == Some(conn)) else {
                    // First packet after connect must be Login.
                    return vec![self.kick(conn, DisconnectReason::ProtocolViolation)];
                };
                self.dispatch_player_packet(idx, conn, other)
            }
        }
    }

    fn dispatch_player_packet(
        &mut self,
        idx: usize,
        conn: ConnId,
        packet: ClientPacket,
    ) -> Vec<Effect> {
        // A challenged player may only answer the active challenge.
        let challenged = self.players[idx].active_challenge().is_some();
        match packet {
            ClientPacket::NegationReply { negate } if challenged => {
                self.handle_negation_reply(idx, conn, negate)
            }
            ClientPacket::CardChoiceReply { chosen } if challenged => {
                self.handle_card_choice_reply(idx, conn, chosen)
            }
            _ if challenged => vec![self.kick(conn, DisconnectReason::ProtocolViolation)],
            ClientPacket::WordChoice { word } => self.handle_word_choice(idx, conn, word),
            ClientPacket::PlaySingleTarget { hand_idx, target_player, target_stack } => {
                self.handle_play(idx, conn, hand_idx, target_player, target_stack)
            }
            ClientPacket::Pass { discard_hand_idx } => {
                self.handle_pass(idx, conn, discard_hand_idx)
            }
            // Replies with no challenge outstanding.
            ClientPacket::NegationReply { .. } | ClientPacket::CardChoiceReply { .. } => {
                vec![self.kick(conn, DisconnectReason::ProtocolViolation)]
            }
            ClientPacket::Login { .. } | ClientPacket::HeartbeatResponse => unreachable!(),
        }
    }

    // =========================================================================
    // ADMISSION
    // =========================================================================

    fn handle_login(&mut self, conn: ConnId, name: String, password: String) -> Vec<Effect> {
        if self.players.iter().any(|p| p.conn == Some(conn)) {
            return vec![self.kick(conn, DisconnectReason::ProtocolViolation)];
        }
        if password != self.password {
            return vec![self.kick(conn, DisconnectReason::WrongPassword)];
        }

        // Same name rebinds a disconnected player.
        if let Some(idx) = self.players.iter().position(|p| p.name == name) {
            if self.players[idx].is_connected() {
                warn!(%name, "login for an already-connected name");
                return vec![self.kick(conn, DisconnectReason::ServerFull)];
            }
            return self.rebind(idx, conn);
        }

        if self.players.len() >= 2 {
            return vec![self.kick(conn, DisconnectReason::ServerFull)];
        }

        let id = self.players.len() as u8;
        info!(player = id, %name, "player admitted");
        self.players.push(Player::new(id, name, conn));

        let mut effects = Vec::new();
        if self.players.len() == 2 && self.players.iter().all(Player::is_connected) {
            effects.extend(self.enter_word_phase());
        }
        effects
    }

    /// Deal the starting sound cards and ask both players for their words.
    fn enter_word_phase(&mut self) -> Vec<Effect> {
        self.phase = GamePhase::WaitingForWords;
        info!("both players seated, dealing starting words");

        let mut pool: Vec<CardId> =
            deck_multiset().into_iter().filter(|c| c.is_sound()).collect();
        self.rng.shuffle(&mut pool);

        let mut effects = Vec::new();
        for idx in 0..self.players.len() {
            let mut drawn = [CardId::Cm; STARTING_WORD_SIZE];
            for slot in drawn.iter_mut() {
                // The sound pool vastly exceeds two words.
                if let Some(card) = pool.pop() {
                    *slot = card;
                }
            }
            self.players[idx].drawn_for_word = Some(drawn);
            if let Some(conn) = self.players[idx].conn {
                effects.push(Effect::Send {
                    conn,
                    packet: ServerPacket::WordChoice { word: drawn },
                });
            }
        }
        effects
    }

    fn rebind(&mut self, idx: usize, conn: ConnId) -> Vec<Effect> {
        self.players[idx].conn = Some(conn);
        info!(player = self.players[idx].id, "player rebound");

        let mut effects = Vec::new();
        match self.phase {
            GamePhase::WaitingForPlayerRegistration => {
                if self.players.len() == 2 && self.players.iter().all(Player::is_connected) {
                    effects.extend(self.enter_word_phase());
                }
            }
            GamePhase::WaitingForWords => {
                if !self.players[idx].submitted_word {
                    if let Some(drawn) = self.players[idx].drawn_for_word {
                        effects.push(Effect::Send {
                            conn,
                            packet: ServerPacket::WordChoice { word: drawn },
                        });
                    }
                }
            }
            GamePhase::Running => {
                // Full snapshot, then the turn context the player missed,
                // then their active challenge if any.
                let is_current = idx == self.current;
                effects.push(Effect::Send {
                    conn,
                    packet: ServerPacket::StartGame(self.snapshot_for(idx, is_current)),
                });
                effects.push(Effect::Send {
                    conn,
                    packet: ServerPacket::StartTurn { player: self.current_player() },
                });
                if let Some(card) = self.turn_drawn {
                    effects.push(Effect::Send {
                        conn,
                        packet: ServerPacket::Draw {
                            player: self.current_player(),
                            card: if is_current { Some(card) } else { None },
                        },
                    });
                }
                if let Some(challenge) = self.players[idx].active_challenge() {
                    effects.push(Effect::Send { conn, packet: challenge_packet(challenge) });
                }
            }
        }
        effects
    }

    /// Build the per-player visible snapshot. With `exclude_turn_draw` the
    /// current turn's drawn card is withheld from the hand so a following
    /// `Draw` packet can redeliver it.
    fn snapshot_for(&self, idx: usize, exclude_turn_draw: bool) -> StartGame {
        let mut hand = self.players[idx].hand.clone();
        if exclude_turn_draw {
            if let Some(card) = self.turn_drawn {
                if let Some(pos) = hand.iter().position(|&c| c == card) {
                    hand.remove(pos);
                }
            }
        }
        StartGame {
            your_id: self.players[idx].id,
            players: self.players.iter().map(|p| (p.id, p.name.clone())).collect(),
            your_hand: hand,
            words: self
                .players
                .iter()
                .map(|p| p.word.as_ref().map(Word::snapshot).unwrap_or_default())
                .collect(),
        }
    }

    // =========================================================================
    // INITIAL WORD NEGOTIATION
    // =========================================================================

    fn handle_word_choice(
        &mut self,
        idx: usize,
        conn: ConnId,
        word: [CardId; STARTING_WORD_SIZE],
    ) -> Vec<Effect> {
        if self.phase != GamePhase::WaitingForWords || self.players[idx].submitted_word {
            return vec![self.kick(conn, DisconnectReason::ProtocolViolation)];
        }
        let Some(drawn) = self.players[idx].drawn_for_word else {
            return vec![self.kick(conn, DisconnectReason::ProtocolViolation)];
        };

        if let Err(err) = validate_initial_word(&word, &drawn) {
            warn!(player = self.players[idx].id, %err, "initial word rejected");
            return vec![self.kick(conn, DisconnectReason::InvalidWord)];
        }

        self.players[idx].submitted_word = true;
        self.players[idx].chosen_word = Some(word);
        info!(player = self.players[idx].id, "initial word accepted");

        if self.players.iter().all(|p| p.submitted_word) {
            self.start_game()
        } else {
            Vec::new()
        }
    }

    /// Both words are in: build them, compose the deck, deal hands, pick the
    /// starting player, and broadcast the opening snapshot.
    fn start_game(&mut self) -> Vec<Effect> {
        let mut dealt = Vec::new();
        for player in &mut self.players {
            // submitted_word guarantees chosen_word.
            if let Some(chosen) = player.chosen_word.take() {
                player.word = Some(Word::from_cards(&chosen));
                dealt.extend_from_slice(&chosen);
            }
            player.drawn_for_word = None;
        }

        self.deck = Deck::build_excluding(&dealt, &mut self.rng);
        for player in &mut self.players {
            while player.hand.len() < STARTING_HAND_SIZE {
                match self.deck.draw(&mut self.rng) {
                    Some(card) => player.hand.push(card),
                    None => break,
                }
            }
        }

        self.current = self.rng.next_int(self.players.len() as u32) as usize;
        self.phase = GamePhase::Running;
        info!(starting_player = self.current_player(), "game running");

        let mut effects = Vec::new();
        for idx in 0..self.players.len() {
            if let Some(conn) = self.players[idx].conn {
                effects.push(Effect::Send {
                    conn,
                    packet: ServerPacket::StartGame(self.snapshot_for(idx, false)),
                });
            }
        }
        effects.extend(self.begin_turn());
        effects
    }

    // =========================================================================
    // TURN LOOP
    // =========================================================================

    fn begin_turn(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();

        // An unresolved challenge blocks the turn until answered.
        if let Some(challenge) = self.players[self.current].active_challenge() {
            if let Some(conn) = self.players[self.current].conn {
                effects.push(Effect::Send { conn, packet: challenge_packet(challenge) });
            }
            return effects;
        }

        let current_id = self.current_player();
        effects.extend(self.broadcast(ServerPacket::StartTurn { player: current_id }));

        self.turn_drawn = self.deck.draw(&mut self.rng);
        if let Some(card) = self.turn_drawn {
            self.players[self.current].hand.push(card);
            for (idx, player) in self.players.iter().enumerate() {
                if let Some(conn) = player.conn {
                    effects.push(Effect::Send {
                        conn,
                        packet: ServerPacket::Draw {
                            player: current_id,
                            card: if idx == self.current { Some(card) } else { None },
                        },
                    });
                }
            }
        }
        effects
    }

    fn end_turn(&mut self) -> Vec<Effect> {
        let mut effects = self.broadcast(ServerPacket::EndTurn { player: self.current_player() });
        self.turn_drawn = None;
        self.current = (self.current + 1) % self.players.len();
        effects.extend(self.begin_turn());
        effects
    }

    fn handle_pass(&mut self, idx: usize, conn: ConnId, discard_idx: u32) -> Vec<Effect> {
        if self.phase != GamePhase::Running || idx != self.current || self.pending.is_some() {
            return vec![self.kick(conn, DisconnectReason::ProtocolViolation)];
        }
        let Some(card) = self.players[idx].take_from_hand(discard_idx as usize) else {
            return vec![self.kick(conn, DisconnectReason::IllegalMove)];
        };
        // Deliberately no delta to the opponent: the discard pile is hidden
        // information.
        debug!(player = self.players[idx].id, %card, "pass");
        self.deck.discard(card);
        self.end_turn()
    }

    // =========================================================================
    // PLAYS
    // =========================================================================

    fn handle_play(
        &mut self,
        idx: usize,
        conn: ConnId,
        hand_idx: u32,
        target_player: u8,
        target_stack: u32,
    ) -> Vec<Effect> {
        if self.phase != GamePhase::Running || idx != self.current || self.pending.is_some() {
            return vec![self.kick(conn, DisconnectReason::ProtocolViolation)];
        }
        let Some(&card) = self.players[idx].hand.get(hand_idx as usize) else {
            return vec![self.kick(conn, DisconnectReason::IllegalMove)];
        };
        let Some(target_idx) = self.players.iter().position(|p| p.id == target_player) else {
            return vec![self.kick(conn, DisconnectReason::IllegalMove)];
        };

        match card.class() {
            CardClass::Consonant | CardClass::Vowel => {
                self.play_sound(idx, conn, card, target_idx, target_stack)
            }
            CardClass::Power => self.play_power(idx, conn, card, target_idx, target_stack),
        }
    }

    fn play_sound(
        &mut self,
        idx: usize,
        conn: ConnId,
        card: CardId,
        target_idx: usize,
        stack: u32,
    ) -> Vec<Effect> {
        let Some(word) = self.players[target_idx].word.as_ref() else {
            return vec![self.kick(conn, DisconnectReason::IllegalMove)];
        };
        let view = word.view(target_idx == idx);
        match validate_play_sound(card, &view, stack as usize) {
            PlayDecision::Invalid => vec![self.kick(conn, DisconnectReason::IllegalMove)],
            PlayDecision::Valid => {
                self.players[idx].take_card(card);
                self.push_onto_stack(target_idx, stack, card)
                    .into_iter()
                    .chain(self.end_turn())
                    .collect()
            }
            PlayDecision::NeedsOtherCard => {
                let top = word.view(true).top(stack as usize);
                // Secondary cards of the two-card rules this play can match.
                let mut offered: Vec<CardId> = Vec::new();
                for rule in top.info().converts_to {
                    if rule.len() == 2 && rule[0] == card && !offered.contains(&rule[1]) {
                        offered.push(rule[1]);
                    }
                }
                if !offered.iter().any(|&c| self.players[idx].hand.contains(&c)) {
                    // The conversion cannot be completed from this hand.
                    return vec![self.kick(conn, DisconnectReason::IllegalMove)];
                }

                let actor_id = self.players[idx].id;
                let target_id = self.players[target_idx].id;
                let challenge = Challenge::CardChoice {
                    target: target_id,
                    mode: ChoiceMode::Exactly,
                    count: 1,
                    offered: offered.clone(),
                };
                let packet = challenge_packet(&challenge);
                self.players[idx].challenges.push_back(challenge);
                self.pending = Some(Pending::CardChoice {
                    actor: actor_id,
                    played: card,
                    target: target_id,
                    stack,
                    offered,
                });
                vec![Effect::Send { conn, packet }]
            }
        }
    }

    fn play_power(
        &mut self,
        idx: usize,
        conn: ConnId,
        card: CardId,
        target_idx: usize,
        stack: u32,
    ) -> Vec<Effect> {
        let opponent = 1 - idx;
        let actor_id = self.players[idx].id;
        let target_id = self.players[target_idx].id;

        // The opponent may intercept any power play, spending a Negation
        // card of their own. Validation of the effect happens only after
        // they decline.
        let can_negate = self.players.len() == 2
            && self.players[opponent].is_connected()
            && self.players[opponent].hand.contains(&CardId::PNegation);
        if can_negate {
            let challenge = Challenge::NegatePowerCard { id: card };
            let packet = challenge_packet(&challenge);
            self.players[opponent].challenges.push_back(challenge);
            self.pending =
                Some(Pending::Negation { actor: actor_id, card, target: target_id, stack });
            debug!(player = actor_id, %card, "power play awaiting negation window");
            let conn = self.players[opponent].conn;
            return conn
                .map(|conn| vec![Effect::Send { conn, packet }])
                .unwrap_or_default();
        }

        self.apply_power(idx, Some(conn), card, target_idx, stack)
    }

    /// Carry out a power card's effect. The card leaves the actor's hand for
    /// the discard pile on success. `conn` is the actor's connection; `None`
    /// when the actor dropped while the play was suspended on a challenge.
    fn apply_power(
        &mut self,
        idx: usize,
        conn: Option<ConnId>,
        card: CardId,
        target_idx: usize,
        stack: u32,
    ) -> Vec<Effect> {
        match card {
            CardId::PSpellingReform => {
                let Some(word) = self.players[target_idx].word.as_ref() else {
                    return self.reject_power_play(conn);
                };
                if !validate_spelling_reform(&word.view(target_idx == idx), stack as usize) {
                    return self.reject_power_play(conn);
                }
                self.players[idx].take_card(card);
                self.deck.discard(card);
                if let Some(s) = self.players[target_idx]
                    .word
                    .as_mut()
                    .and_then(|w| w.stack_mut(stack as usize))
                {
                    s.lock();
                }
                let target_id = self.players[target_idx].id;
                info!(player = self.players[idx].id, target = target_id, stack, "spelling reform");
                self.broadcast(ServerPacket::StackLockChanged {
                    player: target_id,
                    stack,
                    locked: true,
                })
                .into_iter()
                .chain(self.end_turn())
                .collect()
            }
            CardId::PBabel => {
                self.players[idx].take_card(card);
                self.deck.discard(card);
                let mut trimmed = Vec::new();
                if let Some(word) = self.players[target_idx].word.as_mut() {
                    for s in word.stacks_mut() {
                        trimmed.extend(s.trim_to_bottom());
                    }
                }
                for c in trimmed {
                    self.deck.discard(c);
                }
                info!(player = self.players[idx].id, target = self.players[target_idx].id, "babel");
                // No removal delta exists in the packet set; resync with a
                // full snapshot instead.
                let mut effects = Vec::new();
                for i in 0..self.players.len() {
                    if let Some(c) = self.players[i].conn {
                        effects.push(Effect::Send {
                            conn: c,
                            packet: ServerPacket::StartGame(self.snapshot_for(i, false)),
                        });
                    }
                }
                effects.extend(self.end_turn());
                effects
            }
            CardId::PNegation => {
                // Negation is reactive only; leading with it is illegal.
                self.reject_power_play(conn)
            }
            _ => {
                // Catalogued power with no effect body yet: consumed without
                // consequence.
                warn!(%card, "power card has no effect body, discarding");
                self.players[idx].take_card(card);
                self.deck.discard(card);
                self.end_turn()
            }
        }
    }

    fn push_onto_stack(&mut self, target_idx: usize, stack: u32, card: CardId) -> Vec<Effect> {
        let target_id = self.players[target_idx].id;
        if let Some(s) = self.players[target_idx]
            .word
            .as_mut()
            .and_then(|w| w.stack_mut(stack as usize))
        {
            // The validator already vetted height and lock.
            if let Err(err) = s.push(card) {
                warn!(%err, %card, "validated push refused");
                self.deck.discard(card);
                return Vec::new();
            }
        }
        info!(target = target_id, stack, %card, "sound added");
        self.broadcast(ServerPacket::AddSoundToStack { player: target_id, stack, card })
    }

    // =========================================================================
    // CHALLENGE RESOLUTION
    // =========================================================================

    fn handle_negation_reply(&mut self, idx: usize, conn: ConnId, negate: bool) -> Vec<Effect> {
        let Some(Pending::Negation { actor, card, target, stack }) = self.pending.clone() else {
            return vec![self.kick(conn, DisconnectReason::ProtocolViolation)];
        };
        if !matches!(
            self.players[idx].active_challenge(),
            Some(Challenge::NegatePowerCard { .. })
        ) {
            return vec![self.kick(conn, DisconnectReason::ProtocolViolation)];
        }

        self.players[idx].challenges.pop_front();
        self.pending = None;

        let Some(actor_idx) = self.players.iter().position(|p| p.id == actor) else {
            return Vec::new();
        };
        let Some(target_idx) = self.players.iter().position(|p| p.id == target) else {
            return Vec::new();
        };

        if negate {
            // Both the played power and the spent Negation go to the discard.
            info!(player = self.players[idx].id, %card, "power play negated");
            self.players[idx].take_card(CardId::PNegation);
            self.deck.discard(CardId::PNegation);
            self.players[actor_idx].take_card(card);
            self.deck.discard(card);
            self.end_turn()
        } else {
            debug!(player = self.players[idx].id, %card, "negation declined");
            let actor_conn = self.players[actor_idx].conn;
            self.apply_power(actor_idx, actor_conn, card, target_idx, stack)
        }
    }

    fn handle_card_choice_reply(
        &mut self,
        idx: usize,
        conn: ConnId,
        chosen: Vec<CardId>,
    ) -> Vec<Effect> {
        let Some(Pending::CardChoice { actor, played, target, stack, offered }) =
            self.pending.clone()
        else {
            return vec![self.kick(conn, DisconnectReason::ProtocolViolation)];
        };
        if self.players[idx].id != actor
            || !matches!(self.players[idx].active_challenge(), Some(Challenge::CardChoice { .. }))
        {
            return vec![self.kick(conn, DisconnectReason::ProtocolViolation)];
        }

        // The reply must be a subset of the offer, of the demanded size.
        if !ChoiceMode::Exactly.accepts(1, chosen.len())
            || !chosen.iter().all(|c| offered.contains(c))
        {
            return vec![self.kick(conn, DisconnectReason::ProtocolViolation)];
        }
        let secondary = chosen[0];
        if !self.players[idx].hand.contains(&secondary) {
            return vec![self.kick(conn, DisconnectReason::IllegalMove)];
        }

        self.players[idx].challenges.pop_front();
        self.pending = None;

        let Some(target_idx) = self.players.iter().position(|p| p.id == target) else {
            return Vec::new();
        };

        // The conversion consumes the secondary card; the played card lands
        // on the stack.
        self.players[idx].take_card(played);
        self.players[idx].take_card(secondary);
        self.deck.discard(secondary);
        info!(player = actor, %played, %secondary, "conversion resolved");
        self.push_onto_stack(target_idx, stack, played)
            .into_iter()
            .chain(self.end_turn())
            .collect()
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn broadcast(&self, packet: ServerPacket) -> Vec<Effect> {
        self.players
            .iter()
            .filter_map(|p| p.conn)
            .map(|conn| Effect::Send { conn, packet: packet.clone() })
            .collect()
    }

    /// Log the rejection with its call site and produce the kick effect.
    /// The network layer sends the Disconnect packet and closes.
    #[track_caller]
    fn kick(&self, conn: ConnId, reason: DisconnectReason) -> Effect {
        warn!(%conn, ?reason, at = %Location::caller(), "kicking client");
        Effect::Kick { conn, reason }
    }

    /// Refuse an illegal power effect. With the actor offline there is no
    /// connection to kick: the play dies, the card stays in hand, and the
    /// turn remains the actor's for when they rebind.
    #[track_caller]
    fn reject_power_play(&self, conn: Option<ConnId>) -> Vec<Effect> {
        match conn {
            Some(conn) => vec![self.kick(conn, DisconnectReason::IllegalMove)],
            None => {
                debug!("illegal power play from a disconnected actor, dropped");
                Vec::new()
            }
        }
    }
}

fn challenge_packet(challenge: &Challenge) -> ServerPacket {
    match challenge {
        Challenge::CardChoice { mode, count, offered, .. } => ServerPacket::CardChoiceChallenge {
            mode: *mode,
            count: *count,
            offered: offered.clone(),
        },
        Challenge::NegatePowerCard { id } => ServerPacket::PromptNegation { card: *id },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const C0: ConnId = ConnId(1);
    const C1: ConnId = ConnId(2);

    fn engine() -> GameEngine {
        GameEngine::new(EngineConfig { password: "pw".to_owned(), seed: 7 })
    }

    fn login(name: &str) -> ClientPacket {
        ClientPacket::Login { name: name.to_owned(), password: "pw".to_owned() }
    }

    /// Packets sent to one connection, in order.
    fn sent_to(effects: &[Effect], conn: ConnId) -> Vec<ServerPacket> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send { conn: c, packet } if *c == conn => Some(packet.clone()),
                _ => None,
            })
            .collect()
    }

    fn kicks(effects: &[Effect]) -> Vec<(ConnId, DisconnectReason)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Kick { conn, reason } => Some((*conn, *reason)),
                _ => None,
            })
            .collect()
    }

    /// A mid-game fixture with known words and hands, player 0 to move.
    /// Player 0's word starts `f a t i s u`; player 1's `m e n o l y`.
    fn running_engine() -> GameEngine {
        let mut e = engine();
        e.players.push(Player::new(0, "ada".to_owned(), C0));
        e.players.push(Player::new(1, "bab".to_owned(), C1));

        let w0 = [CardId::Cf, CardId::Va, CardId::Ct, CardId::Vi, CardId::Cs, CardId::Vu];
        let w1 = [CardId::Cm, CardId::Ve, CardId::Cn, CardId::Vo, CardId::Cl, CardId::Vy];
        e.players[0].word = Some(Word::from_cards(&w0));
        e.players[1].word = Some(Word::from_cards(&w1));
        e.players[0].submitted_word = true;
        e.players[1].submitted_word = true;

        e.players[0].hand = vec![
            CardId::Ch,
            CardId::Cch,
            CardId::Cy,
            CardId::PSpellingReform,
            CardId::PBabel,
            CardId::Cd,
            CardId::Va,
        ];
        e.players[1].hand = vec![
            CardId::PNegation,
            CardId::Cm,
            CardId::Vi,
            CardId::Cs,
            CardId::Ct,
            CardId::Vu,
            CardId::Ck,
        ];

        let mut dealt: Vec<CardId> = w0.iter().chain(w1.iter()).copied().collect();
        dealt.extend(e.players[0].hand.iter().copied());
        dealt.extend(e.players[1].hand.iter().copied());
        e.deck = Deck::build_excluding(&dealt, &mut e.rng);

        e.phase = GamePhase::Running;
        e.current = 0;
        e
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

    fn word_choice_deal(effects: &[Effect], conn: ConnId) -> [CardId; STARTING_WORD_SIZE] {
        for packet in sent_to(effects, conn) {
            if let ServerPacket::WordChoice { word } = packet {
                return word;
            }
        }
        panic!("no WordChoice sent to {conn}");
    }

    // ---- admission ----

    #[test]
    fn test_wrong_password_is_kicked() {
        let mut e = engine();
        let effects = e.on_packet(
            C0,
            ClientPacket::Login { name: "ada".to_owned(), password: "nope".to_owned() },
        );
        assert_eq!(kicks(&effects), vec![(C0, DisconnectReason::WrongPassword)]);
        assert!(e.players().is_empty());
    }

    #[test]
    fn test_third_seat_is_refused() {
        let mut e = engine();
        e.on_packet(C0, login("ada"));
        e.on_packet(C1, login("bab"));
        let effects = e.on_packet(ConnId(3), login("eve"));
        assert_eq!(kicks(&effects), vec![(ConnId(3), DisconnectReason::ServerFull)]);
    }

    #[test]
    fn test_duplicate_connected_name_is_refused() {
        let mut e = engine();
        e.on_packet(C0, login("ada"));
        let effects = e.on_packet(ConnId(3), login("ada"));
        assert_eq!(kicks(&effects), vec![(ConnId(3), DisconnectReason::ServerFull)]);
        assert!(e.players()[0].is_connected());
    }

    #[test]
    fn test_packet_before_login_is_violation() {
        let mut e = engine();
        let effects = e.on_packet(C0, ClientPacket::Pass { discard_hand_idx: 0 });
        assert_eq!(kicks(&effects), vec![(C0, DisconnectReason::ProtocolViolation)]);
    }

    #[test]
    fn test_second_login_deals_words() {
        let mut e = engine();
        assert!(e.on_packet(C0, login("ada")).is_empty());
        let effects = e.on_packet(C1, login("bab"));

        assert_eq!(e.phase(), GamePhase::WaitingForWords);
        let d0 = word_choice_deal(&effects, C0);
        let d1 = word_choice_deal(&effects, C1);
        assert!(d0.iter().all(|c| c.is_sound()));
        assert!(d1.iter().all(|c| c.is_sound()));
    }

    // ---- initial words ----

    #[test]
    fn test_full_word_phase_reaches_running() {
        // Some deals admit no legal arrangement; scan seeds for one that
        // works for both players.
        for seed in 0..64u64 {
            let mut e = GameEngine::new(EngineConfig { password: "pw".to_owned(), seed });
            e.on_packet(C0, login("ada"));
            let effects = e.on_packet(C1, login("bab"));
            let d0 = word_choice_deal(&effects, C0);
            let d1 = word_choice_deal(&effects, C1);
            let (Some(a0), Some(a1)) =
                (find_valid_arrangement(&d0), find_valid_arrangement(&d1))
            else {
                continue;
            };

            assert!(e.on_packet(C0, ClientPacket::WordChoice { word: a0 }).is_empty());
            let effects = e.on_packet(C1, ClientPacket::WordChoice { word: a1 });

            assert_eq!(e.phase(), GamePhase::Running);
            let p0 = sent_to(&effects, C0);
            assert!(matches!(p0[0], ServerPacket::StartGame(_)));
            assert!(matches!(p0[1], ServerPacket::StartTurn { .. }));
            let ServerPacket::StartGame(ref snap) = p0[0] else { unreachable!() };
            assert_eq!(snap.your_id, 0);
            assert_eq!(snap.words.len(), 2);
            assert_eq!(snap.words[0].len(), STARTING_WORD_SIZE);
            assert_eq!(snap.your_hand.len(), STARTING_HAND_SIZE);

            // The current player drew face up, the other saw it hidden.
            let current = e.current_player();
            let (mine, theirs) =
                if current == 0 { (p0, sent_to(&effects, C1)) } else { (sent_to(&effects, C1), p0) };
            assert!(matches!(mine[2], ServerPacket::Draw { card: Some(_), .. }));
            assert!(matches!(theirs[2], ServerPacket::Draw { card: None, .. }));
            return;
        }
        panic!("no seed produced arrangeable deals for both players");
    }

    #[test]
    fn test_invalid_word_kicks_but_preserves_seat() {
        let mut e = engine();
        e.on_packet(C0, login("ada"));
        let effects = e.on_packet(C1, login("bab"));
        let mut bad = word_choice_deal(&effects, C0);
        bad[0] = if bad[0] == CardId::Cm { CardId::Cn } else { CardId::Cm };

        let effects = e.on_packet(C0, ClientPacket::WordChoice { word: bad });
        assert_eq!(kicks(&effects), vec![(C0, DisconnectReason::InvalidWord)]);
        assert!(!e.players()[0].submitted_word);
        assert!(e.players()[0].drawn_for_word.is_some());
    }

    // ---- turn loop ----

    #[test]
    fn test_valid_sound_play_broadcasts_and_rotates() {
        let mut e = running_engine();
        // Ch onto the own f-stack is a plain conversion.
        let effects = e.on_packet(
            C0,
            ClientPacket::PlaySingleTarget { hand_idx: 0, target_player: 0, target_stack: 0 },
        );

        assert!(kicks(&effects).is_empty());
        let p1 = sent_to(&effects, C1);
        assert_eq!(
            p1[0],
            ServerPacket::AddSoundToStack { player: 0, stack: 0, card: CardId::Ch }
        );
        assert_eq!(p1[1], ServerPacket::EndTurn { player: 0 });
        assert_eq!(p1[2], ServerPacket::StartTurn { player: 1 });
        assert!(matches!(p1[3], ServerPacket::Draw { player: 1, card: Some(_) }));
        assert!(matches!(
            sent_to(&effects, C0)[3],
            ServerPacket::Draw { player: 1, card: None }
        ));

        assert_eq!(e.players()[0].word.as_ref().unwrap().stack(0).unwrap().top(), CardId::Ch);
        assert_eq!(e.players()[0].hand.len(), 6);
        assert_eq!(e.current_player(), 1);
    }

    #[test]
    fn test_illegal_sound_play_is_kicked() {
        let mut e = running_engine();
        // Va onto the own f-stack: different class, no rule.
        let effects = e.on_packet(
            C0,
            ClientPacket::PlaySingleTarget { hand_idx: 6, target_player: 0, target_stack: 0 },
        );
        assert_eq!(kicks(&effects), vec![(C0, DisconnectReason::IllegalMove)]);
        assert_eq!(e.current_player(), 0);
    }

    #[test]
    fn test_out_of_turn_play_is_violation() {
        let mut e = running_engine();
        let effects = e.on_packet(C1, ClientPacket::Pass { discard_hand_idx: 1 });
        assert_eq!(kicks(&effects), vec![(C1, DisconnectReason::ProtocolViolation)]);
    }

    #[test]
    fn test_pass_discards_without_reveal() {
        let mut e = running_engine();
        let effects = e.on_packet(C0, ClientPacket::Pass { discard_hand_idx: 2 });

        assert_eq!(e.discard_len(), 1);
        assert_eq!(e.players()[0].hand.len(), 6);
        let p1 = sent_to(&effects, C1);
        // Only the turn handover, never the discarded card.
        assert_eq!(p1[0], ServerPacket::EndTurn { player: 0 });
        assert_eq!(p1[1], ServerPacket::StartTurn { player: 1 });
    }

    #[test]
    fn test_conversion_needs_second_card() {
        let mut e = running_engine();
        // Cch onto the own t-stack converts only together with a yod.
        let effects = e.on_packet(
            C0,
            ClientPacket::PlaySingleTarget { hand_idx: 1, target_player: 0, target_stack: 2 },
        );
        assert_eq!(
            sent_to(&effects, C0),
            vec![ServerPacket::CardChoiceChallenge {
                mode: ChoiceMode::Exactly,
                count: 1,
                offered: vec![CardId::Cy],
            }]
        );
        assert!(sent_to(&effects, C1).is_empty());

        // Non-answer packets are refused while the challenge is open.
        let effects = e.on_packet(C0, ClientPacket::Pass { discard_hand_idx: 0 });
        assert_eq!(kicks(&effects), vec![(C0, DisconnectReason::ProtocolViolation)]);

        let effects =
            e.on_packet(C0, ClientPacket::CardChoiceReply { chosen: vec![CardId::Cy] });
        assert!(kicks(&effects).is_empty());
        assert_eq!(
            sent_to(&effects, C1)[0],
            ServerPacket::AddSoundToStack { player: 0, stack: 2, card: CardId::Cch }
        );
        // Played card on the stack, the yod to the discard.
        assert_eq!(e.players()[0].word.as_ref().unwrap().stack(2).unwrap().top(), CardId::Cch);
        assert_eq!(e.players()[0].hand.len(), 5);
        assert_eq!(e.discard_len(), 1);
        assert_eq!(e.current_player(), 1);
    }

    #[test]
    fn test_choice_reply_outside_offer_is_violation() {
        let mut e = running_engine();
        e.on_packet(
            C0,
            ClientPacket::PlaySingleTarget { hand_idx: 1, target_player: 0, target_stack: 2 },
        );
        let effects =
            e.on_packet(C0, ClientPacket::CardChoiceReply { chosen: vec![CardId::Cm] });
        assert_eq!(kicks(&effects), vec![(C0, DisconnectReason::ProtocolViolation)]);
    }

    // ---- power cards ----

    #[test]
    fn test_spelling_reform_locks_then_blocks() {
        let mut e = running_engine();
        e.players[1].hand[0] = CardId::Ck; // no negation card in the way
        let effects = e.on_packet(
            C0,
            ClientPacket::PlaySingleTarget { hand_idx: 3, target_player: 0, target_stack: 3 },
        );
        assert!(sent_to(&effects, C1).contains(&ServerPacket::StackLockChanged {
            player: 0,
            stack: 3,
            locked: true,
        }));
        assert!(e.players()[0].word.as_ref().unwrap().stack(3).unwrap().is_locked());

        // Back to player 0.
        e.on_packet(C1, ClientPacket::Pass { discard_hand_idx: 0 });
        // Va onto the locked i-stack fails on the lock, not on adjacency.
        let idx = e.players()[0].hand.iter().position(|&c| c == CardId::Va).unwrap() as u32;
        let effects = e.on_packet(
            C0,
            ClientPacket::PlaySingleTarget { hand_idx: idx, target_player: 0, target_stack: 3 },
        );
        assert_eq!(kicks(&effects), vec![(C0, DisconnectReason::IllegalMove)]);
    }

    #[test]
    fn test_reform_on_opponent_word_is_illegal() {
        let mut e = running_engine();
        e.players[1].hand[0] = CardId::Ck;
        let effects = e.on_packet(
            C0,
            ClientPacket::PlaySingleTarget { hand_idx: 3, target_player: 1, target_stack: 0 },
        );
        assert_eq!(kicks(&effects), vec![(C0, DisconnectReason::IllegalMove)]);
    }

    #[test]
    fn test_negation_window_opens_before_the_effect() {
        let mut e = running_engine();
        let effects = e.on_packet(
            C0,
            ClientPacket::PlaySingleTarget { hand_idx: 3, target_player: 0, target_stack: 3 },
        );
        // Nothing resolves until the opponent answers.
        assert_eq!(
            sent_to(&effects, C1),
            vec![ServerPacket::PromptNegation { card: CardId::PSpellingReform }]
        );
        assert!(!e.players()[0].word.as_ref().unwrap().stack(3).unwrap().is_locked());

        let effects = e.on_packet(C1, ClientPacket::NegationReply { negate: true });
        // Both the reform and the spent negation card are gone.
        assert!(!e.players()[0].word.as_ref().unwrap().stack(3).unwrap().is_locked());
        assert!(!e.players()[0].hand.contains(&CardId::PSpellingReform));
        assert!(!e.players()[1].hand.contains(&CardId::PNegation));
        assert_eq!(e.discard_len(), 2);
        assert_eq!(sent_to(&effects, C0)[0], ServerPacket::EndTurn { player: 0 });
        assert_eq!(e.current_player(), 1);
    }

    #[test]
    fn test_declined_negation_applies_the_effect() {
        let mut e = running_engine();
        e.on_packet(
            C0,
            ClientPacket::PlaySingleTarget { hand_idx: 3, target_player: 0, target_stack: 3 },
        );
        let effects = e.on_packet(C1, ClientPacket::NegationReply { negate: false });
        assert!(e.players()[0].word.as_ref().unwrap().stack(3).unwrap().is_locked());
        assert!(e.players()[1].hand.contains(&CardId::PNegation));
        assert!(sent_to(&effects, C0).contains(&ServerPacket::StackLockChanged {
            player: 0,
            stack: 3,
            locked: true,
        }));
    }

    #[test]
    fn test_declined_negation_with_offline_actor_kicks_nobody() {
        let mut e = running_engine();
        // Reform aimed at the opponent's word: illegal once it resolves, but
        // the negation window opens first.
        e.on_packet(
            C0,
            ClientPacket::PlaySingleTarget { hand_idx: 3, target_player: 1, target_stack: 0 },
        );
        e.on_disconnect(C0);

        let effects = e.on_packet(C1, ClientPacket::NegationReply { negate: false });
        // The dead play is dropped; the replier keeps their connection.
        assert!(kicks(&effects).is_empty());
        assert!(!e.players()[1].word.as_ref().unwrap().stack(0).unwrap().is_locked());
        assert!(e.players()[0].hand.contains(&CardId::PSpellingReform));
        assert_eq!(e.current_player(), 0);
    }

    #[test]
    fn test_babel_trims_unlocked_stacks() {
        let mut e = running_engine();
        e.players[1].hand[0] = CardId::Ck;
        {
            let word = e.players[1].word.as_mut().unwrap();
            word.stack_mut(0).unwrap().push(CardId::Cn).unwrap();
            word.stack_mut(0).unwrap().push(CardId::Cm).unwrap();
            word.stack_mut(1).unwrap().push(CardId::Vi).unwrap();
            word.stack_mut(1).unwrap().lock();
        }

        let effects = e.on_packet(
            C0,
            ClientPacket::PlaySingleTarget { hand_idx: 4, target_player: 1, target_stack: 0 },
        );

        let word = e.players()[1].word.as_ref().unwrap();
        assert_eq!(word.stack(0).unwrap().len(), 1);
        assert_eq!(word.stack(1).unwrap().len(), 2); // locked stacks survive
        // Babel card plus the two trimmed cards.
        assert_eq!(e.discard_len(), 3);

        // No removal delta exists; clients resync from a snapshot.
        assert!(matches!(sent_to(&effects, C0)[0], ServerPacket::StartGame(_)));
        assert!(matches!(sent_to(&effects, C1)[0], ServerPacket::StartGame(_)));
    }

    // ---- disconnect and rebind ----

    #[test]
    fn test_rebind_replays_turn_context() {
        let mut e = running_engine();
        // Enter the turn loop so there is a drawn card to replay.
        let before = e.players()[0].hand.len();
        e.begin_turn_for_test();
        assert_eq!(e.players()[0].hand.len(), before + 1);

        e.on_disconnect(C1);
        assert!(!e.is_abandoned());
        assert!(!e.players()[1].is_connected());

        let effects = e.on_packet(ConnId(9), login("bab"));
        let p1 = sent_to(&effects, ConnId(9));
        assert!(matches!(p1[0], ServerPacket::StartGame(_)));
        assert_eq!(p1[1], ServerPacket::StartTurn { player: 0 });
        assert!(matches!(p1[2], ServerPacket::Draw { player: 0, card: None }));
        assert_eq!(e.players()[1].conn, Some(ConnId(9)));
    }

    #[test]
    fn test_rebind_snapshot_withholds_turn_draw() {
        let mut e = running_engine();
        e.begin_turn_for_test();
        let drawn = e.turn_drawn.unwrap();

        e.on_disconnect(C0);
        let effects = e.on_packet(ConnId(9), login("ada"));
        let p0 = sent_to(&effects, ConnId(9));
        let ServerPacket::StartGame(ref snap) = p0[0] else {
            panic!("expected snapshot first");
        };
        // The hand in the snapshot plus the following Draw equals the real
        // hand.
        assert_eq!(snap.your_hand.len() + 1, e.players()[0].hand.len());
        assert_eq!(p0[2], ServerPacket::Draw { player: 0, card: Some(drawn) });
    }

    #[test]
    fn test_game_abandoned_when_both_drop() {
        let mut e = running_engine();
        e.on_disconnect(C0);
        assert!(!e.is_abandoned());
        e.on_disconnect(C1);
        assert!(e.is_abandoned());
    }

    impl GameEngine {
        fn begin_turn_for_test(&mut self) {
            let _ = self.begin_turn();
        }
    }
}
