//! Interfaces to the systems around the combat engine.
//!
//! The engine reads character stats when a fight starts and writes progress
//! back when it ends. Quest tracking and presentation live outside the engine
//! and are reached through the traits in this module.

use crate::actions::ActionOutcome;
use crate::combatant::{CharacterRef, Pool};
use crate::dice::DiceExpression;
use crate::session::CombatSession;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("character not found: {0}")]
    CharacterNotFound(CharacterRef),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

/// Combat-relevant view of a stored character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSheet {
    pub name: String,
    pub level: u32,
    pub experience: u32,
    pub gold: u64,
    pub health: Pool,
    pub mana: Pool,
    pub armor_class: u32,
    pub attack_bonus: i32,
    /// Damage of the equipped weapon, including its modifier.
    pub damage: DiceExpression,
    pub dexterity_modifier: i32,
    #[serde(default)]
    pub spells: Vec<String>,
    #[serde(default)]
    pub abilities: Vec<String>,
    /// Consumable item id to count.
    #[serde(default)]
    pub consumables: BTreeMap<String, u32>,
    #[serde(default)]
    pub deaths: u32,
}

impl CharacterSheet {
    /// Apply the result of a fight to this sheet.
    pub fn apply_progress(&mut self, delta: &ProgressDelta) {
        self.health = Pool::with_current(delta.health, self.health.max());
        self.mana = Pool::with_current(delta.mana, self.mana.max());
        self.experience = delta.experience;
        self.level = delta.level.max(self.level);
        self.gold = self.gold.saturating_add_signed(delta.gold_delta);
        for (item, used) in &delta.items_consumed {
            if let Some(count) = self.consumables.get_mut(item) {
                *count = count.saturating_sub(*used);
            }
        }
        self.consumables.retain(|_, count| *count > 0);
        for item in &delta.items_gained {
            *self.consumables.entry(item.clone()).or_insert(0) += 1;
        }
        if delta.died {
            self.deaths += 1;
        }
    }
}

/// Everything that changed for one character as a result of a fight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDelta {
    /// Health to store after combat.
    pub health: u32,
    /// Mana to store after combat.
    pub mana: u32,
    pub experience_gained: u32,
    /// Experience after level-ups were applied.
    pub experience: u32,
    pub level: u32,
    pub levels_gained: u32,
    pub gold_delta: i64,
    pub items_consumed: BTreeMap<String, u32>,
    pub items_gained: Vec<String>,
    pub died: bool,
}

/// Character persistence.
#[async_trait]
pub trait CharacterStore: Send + Sync {
    async fn load(&self, character: &CharacterRef) -> Result<CharacterSheet, CollaboratorError>;

    async fn save_progress(
        &self,
        character: &CharacterRef,
        delta: &ProgressDelta,
    ) -> Result<(), CollaboratorError>;
}

/// How many of one monster template a character helped defeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillRecord {
    pub monster_id: String,
    pub count: u32,
}

/// Receives kill events for quest objectives.
#[async_trait]
pub trait QuestNotifier: Send + Sync {
    async fn monsters_defeated(
        &self,
        character: &CharacterRef,
        kills: &[KillRecord],
    ) -> Result<(), CollaboratorError>;
}

/// A quest notifier that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopQuestNotifier;

#[async_trait]
impl QuestNotifier for NoopQuestNotifier {
    async fn monsters_defeated(
        &self,
        _character: &CharacterRef,
        _kills: &[KillRecord],
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Turns a session and its latest outcome into whatever the UI shows next.
pub trait CombatRenderer {
    type View;

    fn render(&self, session: &CombatSession, latest: Option<&ActionOutcome>) -> Self::View;
}

/// Told about sessions that end without a player request, so the owner can
/// be messaged if still reachable.
#[async_trait]
pub trait CombatObserver: Send + Sync {
    async fn session_expired(&self, session: &CombatSession);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl CombatObserver for NoopObserver {
    async fn session_expired(&self, _session: &CombatSession) {}
}
