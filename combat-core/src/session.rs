//! Combat session state.
//!
//! A [`CombatSession`] is the mutable state of one fight: the ordered
//! combatants, whose turn it is, the round counter, the lifecycle state and a
//! short narrative log. Turn order lives in the [`turn`] submodule, which is
//! the only code allowed to move the turn index.

mod turn;

pub use turn::TurnEvent;

use crate::combatant::{CharacterRef, Combatant, CombatantId, CombatantKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Key a live session is stored under: the owner's identity for solo fights,
/// the party id for group fights.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl From<&str> for SessionKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<&CharacterRef> for SessionKey {
    fn from(character: &CharacterRef) -> Self {
        Self(character.0.clone())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CombatMode {
    Solo,
    Group,
}

/// Lifecycle of a session. `Active` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Active,
    Victory,
    Defeat,
    Fled,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Active)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Victory => "victory",
            SessionState::Defeat => "defeat",
            SessionState::Fled => "fled",
            SessionState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One line of the combat log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombatLogEntry {
    pub round: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatSession {
    pub id: SessionKey,
    pub mode: CombatMode,
    /// Combatants in initiative order.
    pub combatants: Vec<Combatant>,
    current_turn_index: usize,
    pub round: u32,
    state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_action_at: DateTime<Utc>,
    log: VecDeque<CombatLogEntry>,
    log_capacity: usize,
}

impl CombatSession {
    /// Create an active session. Call [`CombatSession::begin`] to roll
    /// initiative and start the first turn.
    pub fn new(id: SessionKey, combatants: Vec<Combatant>, log_capacity: usize) -> Self {
        let players = combatants.iter().filter(|c| c.is_player()).count();
        let now = Utc::now();
        Self {
            id,
            mode: if players > 1 {
                CombatMode::Group
            } else {
                CombatMode::Solo
            },
            combatants,
            current_turn_index: 0,
            round: 1,
            state: SessionState::Active,
            created_at: now,
            last_action_at: now,
            log: VecDeque::new(),
            log_capacity,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn current_turn_index(&self) -> usize {
        self.current_turn_index
    }

    pub fn current_combatant(&self) -> Option<&Combatant> {
        self.combatants.get(self.current_turn_index)
    }

    pub fn combatant(&self, id: CombatantId) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.id == id)
    }

    pub fn index_of(&self, id: CombatantId) -> Option<usize> {
        self.combatants.iter().position(|c| c.id == id)
    }

    /// Find a player combatant by character identity.
    pub fn player(&self, character: &CharacterRef) -> Option<&Combatant> {
        self.combatants
            .iter()
            .find(|c| c.character() == Some(character))
    }

    pub fn players(&self) -> impl Iterator<Item = &Combatant> {
        self.combatants.iter().filter(|c| c.is_player())
    }

    pub fn monsters(&self) -> impl Iterator<Item = &Combatant> {
        self.combatants
            .iter()
            .filter(|c| c.kind == CombatantKind::Monster)
    }

    pub fn living(&self, kind: CombatantKind) -> impl Iterator<Item = &Combatant> {
        self.combatants
            .iter()
            .filter(move |c| c.kind == kind && c.is_alive())
    }

    /// Whether the combatant whose turn it is should be driven by the engine.
    pub fn is_monster_turn(&self) -> bool {
        self.is_active()
            && self
                .current_combatant()
                .is_some_and(|c| c.kind == CombatantKind::Monster)
    }

    /// Record player activity for idle tracking.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_action_at = now;
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_action_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.idle_for(now) >= timeout
    }

    /// Most recent log lines, oldest first.
    pub fn log(&self) -> impl Iterator<Item = &CombatLogEntry> {
        self.log.iter()
    }

    pub fn push_log(&mut self, text: impl Into<String>) {
        if self.log_capacity == 0 {
            return;
        }
        while self.log.len() >= self.log_capacity {
            self.log.pop_front();
        }
        self.log.push_back(CombatLogEntry {
            round: self.round,
            text: text.into(),
        });
    }

    /// Enter a terminal state. Returns false if the session had already ended,
    /// in which case nothing changes.
    pub fn finish(&mut self, state: SessionState) -> bool {
        if self.state.is_terminal() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        self.push_log(format!("Combat ended: {state}."));
        true
    }

    pub(crate) fn combatant_mut(&mut self, index: usize) -> Option<&mut Combatant> {
        self.combatants.get_mut(index)
    }
}
