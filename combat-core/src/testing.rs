//! Testing utilities for the combat engine.
//!
//! This module provides tools for deterministic tests:
//! - `ScriptedRoller` for dice that roll exactly what the test says
//! - In-memory collaborators that record what the engine sent them
//! - `TestHarness` wiring all of the above into a `CombatEngine`
//! - Sample character sheets and assertion helpers

use crate::collaborators::{
    CharacterSheet, CharacterStore, CollaboratorError, CombatObserver, KillRecord, ProgressDelta,
    QuestNotifier,
};
use crate::combatant::{CharacterRef, Pool};
use crate::config::EngineConfig;
use crate::content::ContentCatalog;
use crate::dice::{DiceExpression, DieRoller};
use crate::engine::{CombatEngine, RollerFactory};
use crate::session::{CombatSession, SessionKey, SessionState};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

// ============================================================================
// Dice
// ============================================================================

/// A die roller that returns scripted values in order.
///
/// Clones share the same queue, so a test can keep one handle and push more
/// values while the engine rolls from another. Once the queue is empty every
/// roll returns the fallback value (1 by default).
#[derive(Debug, Clone)]
pub struct ScriptedRoller {
    values: Arc<Mutex<VecDeque<u32>>>,
    fallback: u32,
}

impl ScriptedRoller {
    pub fn new(values: impl IntoIterator<Item = u32>) -> Self {
        Self {
            values: Arc::new(Mutex::new(values.into_iter().collect())),
            fallback: 1,
        }
    }

    pub fn with_fallback(mut self, fallback: u32) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn push(&self, value: u32) {
        self.queue().push_back(value);
    }

    pub fn push_all(&self, values: impl IntoIterator<Item = u32>) {
        self.queue().extend(values);
    }

    /// Values not rolled yet.
    pub fn remaining(&self) -> usize {
        self.queue().len()
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<u32>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DieRoller for ScriptedRoller {
    fn roll_die(&mut self, _sides: u32) -> u32 {
        self.queue().pop_front().unwrap_or(self.fallback)
    }
}

/// Hands every session a clone of the same [`ScriptedRoller`].
#[derive(Debug, Clone)]
pub struct ScriptedRollers(pub ScriptedRoller);

impl RollerFactory for ScriptedRollers {
    fn roller_for(&self, _key: &SessionKey) -> Box<dyn DieRoller> {
        Box::new(self.0.clone())
    }
}

// ============================================================================
// Collaborators
// ============================================================================

/// Character store backed by a map. Saved deltas are applied to the stored
/// sheet and recorded.
#[derive(Debug, Default)]
pub struct InMemoryCharacterStore {
    sheets: Mutex<HashMap<CharacterRef, CharacterSheet>>,
    saved: Mutex<Vec<(CharacterRef, ProgressDelta)>>,
    failures_remaining: AtomicU32,
    save_attempts: AtomicU32,
}

impl InMemoryCharacterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_character(self, id: impl Into<String>, sheet: CharacterSheet) -> Self {
        self.insert(id, sheet);
        self
    }

    pub fn insert(&self, id: impl Into<String>, sheet: CharacterSheet) {
        self.sheets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(CharacterRef::new(id), sheet);
    }

    pub fn sheet(&self, id: &str) -> Option<CharacterSheet> {
        self.sheets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&CharacterRef::new(id))
            .cloned()
    }

    /// Every successfully saved delta, in order.
    pub fn saved(&self) -> Vec<(CharacterRef, ProgressDelta)> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make the next `n` saves fail with `Unavailable`.
    pub fn fail_next_saves(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Number of save calls, failed ones included.
    pub fn save_attempts(&self) -> u32 {
        self.save_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CharacterStore for InMemoryCharacterStore {
    async fn load(&self, character: &CharacterRef) -> Result<CharacterSheet, CollaboratorError> {
        self.sheets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(character)
            .cloned()
            .ok_or_else(|| CollaboratorError::CharacterNotFound(character.clone()))
    }

    async fn save_progress(
        &self,
        character: &CharacterRef,
        delta: &ProgressDelta,
    ) -> Result<(), CollaboratorError> {
        self.save_attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CollaboratorError::Unavailable(
                "character store is down".to_string(),
            ));
        }

        if let Some(sheet) = self
            .sheets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(character)
        {
            sheet.apply_progress(delta);
        }
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((character.clone(), delta.clone()));
        Ok(())
    }
}

/// Records every kill notification.
#[derive(Debug, Default)]
pub struct RecordingQuestNotifier {
    events: Mutex<Vec<(CharacterRef, Vec<KillRecord>)>>,
}

impl RecordingQuestNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(CharacterRef, Vec<KillRecord>)> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl QuestNotifier for RecordingQuestNotifier {
    async fn monsters_defeated(
        &self,
        character: &CharacterRef,
        kills: &[KillRecord],
    ) -> Result<(), CollaboratorError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((character.clone(), kills.to_vec()));
        Ok(())
    }
}

/// Records the keys of expired sessions.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    expired: Mutex<Vec<SessionKey>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expired(&self) -> Vec<SessionKey> {
        self.expired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl CombatObserver for RecordingObserver {
    async fn session_expired(&self, session: &CombatSession) {
        self.expired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(session.id.clone());
    }
}

// ============================================================================
// Sample characters
// ============================================================================

/// A level 1 fighter: 20 HP, AC 12, +5 to hit, 1d6+3 damage, one healing potion.
pub fn sample_fighter(name: &str) -> CharacterSheet {
    CharacterSheet {
        name: name.to_string(),
        level: 1,
        experience: 0,
        gold: 10,
        health: Pool::new(20),
        mana: Pool::empty(),
        armor_class: 12,
        attack_bonus: 5,
        damage: DiceExpression {
            count: 1,
            sides: 6,
            modifier: 3,
        },
        dexterity_modifier: 1,
        spells: Vec::new(),
        abilities: vec!["second_wind".to_string()],
        consumables: BTreeMap::from([("healing_potion".to_string(), 1)]),
        deaths: 0,
    }
}

/// A level 1 mage: 12 HP, 10 mana, AC 11, +2 to hit, a handful of spells.
pub fn sample_mage(name: &str) -> CharacterSheet {
    CharacterSheet {
        name: name.to_string(),
        level: 1,
        experience: 0,
        gold: 10,
        health: Pool::new(12),
        mana: Pool::new(10),
        armor_class: 11,
        attack_bonus: 2,
        damage: DiceExpression {
            count: 1,
            sides: 4,
            modifier: 0,
        },
        dexterity_modifier: 2,
        spells: [
            "fire_bolt",
            "magic_missile",
            "cure_wounds",
            "poison_spray",
            "hold_person",
            "shield",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        abilities: Vec::new(),
        consumables: BTreeMap::from([("mana_potion".to_string(), 1)]),
        deaths: 0,
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A [`CombatEngine`] on standard content with scripted dice and in-memory
/// collaborators.
pub struct TestHarness {
    pub engine: Arc<CombatEngine>,
    pub characters: Arc<InMemoryCharacterStore>,
    pub quests: Arc<RecordingQuestNotifier>,
    pub observer: Arc<RecordingObserver>,
    /// Shared with every session the engine starts.
    pub dice: ScriptedRoller,
}

impl TestHarness {
    pub fn new(config: EngineConfig) -> Self {
        let characters = Arc::new(InMemoryCharacterStore::new());
        let quests = Arc::new(RecordingQuestNotifier::new());
        let observer = Arc::new(RecordingObserver::new());
        let dice = ScriptedRoller::new([]);

        let engine = CombatEngine::new(
            config,
            Arc::new(ContentCatalog::standard()),
            characters.clone(),
        )
        .with_quest_notifier(quests.clone())
        .with_observer(observer.clone())
        .with_rollers(Arc::new(ScriptedRollers(dice.clone())));

        Self {
            engine: Arc::new(engine),
            characters,
            quests,
            observer,
            dice,
        }
    }

    pub fn add_character(&self, id: &str, sheet: CharacterSheet) -> CharacterRef {
        self.characters.insert(id, sheet);
        CharacterRef::new(id)
    }

    pub fn add_fighter(&self, id: &str, name: &str) -> CharacterRef {
        self.add_character(id, sample_fighter(name))
    }

    pub fn add_mage(&self, id: &str, name: &str) -> CharacterRef {
        self.add_character(id, sample_mage(name))
    }

    /// Queue dice values for the next rolls.
    pub fn roll(&self, values: impl IntoIterator<Item = u32>) -> &Self {
        self.dice.push_all(values);
        self
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert a combatant (by name) has the given health.
#[track_caller]
pub fn assert_health(session: &CombatSession, name: &str, current: u32, max: u32) {
    let combatant = session
        .combatants
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("Expected a combatant named '{name}'"));
    assert_eq!(
        (combatant.health.current(), combatant.health.max()),
        (current, max),
        "Expected {name} at {current}/{max} HP, got {}",
        combatant.health
    );
}

/// Assert the session is in the given state.
#[track_caller]
pub fn assert_state(session: &CombatSession, state: SessionState) {
    assert_eq!(
        session.state(),
        state,
        "Expected session {} to be {state}",
        session.id
    );
}

/// Assert it is `name`'s turn.
#[track_caller]
pub fn assert_turn(session: &CombatSession, name: &str) {
    let current = session.current_combatant().map(|c| c.name.as_str());
    assert_eq!(current, Some(name), "Expected it to be {name}'s turn");
}
