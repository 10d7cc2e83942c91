//! CombatEngine - the entry point the bot's UI layer talks to.
//!
//! The engine owns the [`SessionStore`] and wires the action resolver, turn
//! order and reward dispatcher to the external collaborators. A UI callback
//! maps onto exactly one of [`CombatEngine::start_combat`],
//! [`CombatEngine::submit_action`], [`CombatEngine::get_status`] or
//! [`CombatEngine::end_combat`].

use crate::actions::{ActionOutcome, ActionResolver, CombatAction};
use crate::collaborators::{
    CharacterStore, CombatObserver, NoopObserver, NoopQuestNotifier, QuestNotifier,
};
use crate::combatant::{CharacterRef, Combatant};
use crate::config::EngineConfig;
use crate::content::ContentLookup;
use crate::dice::{DieRoller, RngRoller};
use crate::error::{CombatError, Result};
use crate::rewards::{self, RewardDispatcher, RewardReport};
use crate::session::{CombatSession, SessionKey, SessionState, TurnEvent};
use crate::store::{LiveSession, SessionHandle, SessionStore};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Supplies the dice a new session rolls with.
pub trait RollerFactory: Send + Sync {
    fn roller_for(&self, key: &SessionKey) -> Box<dyn DieRoller>;
}

/// Fresh OS entropy for every session.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntropyRollers;

impl RollerFactory for EntropyRollers {
    fn roller_for(&self, _key: &SessionKey) -> Box<dyn DieRoller> {
        Box::new(RngRoller::from_entropy())
    }
}

/// The same seed for every session, for replays and simulations.
#[derive(Debug, Clone, Copy)]
pub struct SeededRollers(pub u64);

impl RollerFactory for SeededRollers {
    fn roller_for(&self, _key: &SessionKey) -> Box<dyn DieRoller> {
        Box::new(RngRoller::seeded(self.0))
    }
}

/// Someone joining a fight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Participant {
    Character(CharacterRef),
    /// A monster template id.
    Monster(String),
}

/// Why a session is being ended from outside the turn loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    OwnerRequest,
    System(String),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndReason::OwnerRequest => f.write_str("ended by owner"),
            EndReason::System(reason) => write!(f, "ended by system: {reason}"),
        }
    }
}

/// Engine-driven turns: the opening of a fight, or monster turns resolved on
/// request.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub outcomes: Vec<ActionOutcome>,
    pub turn_events: Vec<TurnEvent>,
    pub snapshot: CombatSession,
    pub rewards: Option<RewardReport>,
}

/// Result of a player's action and everything it set in motion.
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub outcome: ActionOutcome,
    /// Monster turns resolved automatically after the action.
    pub follow_ups: Vec<ActionOutcome>,
    pub turn_events: Vec<TurnEvent>,
    pub snapshot: CombatSession,
    /// Present once the session has ended in victory or defeat.
    pub rewards: Option<RewardReport>,
}

impl ActionReport {
    pub fn is_over(&self) -> bool {
        self.snapshot.state().is_terminal()
    }
}

pub struct CombatEngine {
    config: EngineConfig,
    content: Arc<dyn ContentLookup>,
    characters: Arc<dyn CharacterStore>,
    quests: Arc<dyn QuestNotifier>,
    observer: Arc<dyn CombatObserver>,
    rollers: Arc<dyn RollerFactory>,
    sessions: Arc<SessionStore>,
}

impl CombatEngine {
    pub fn new(
        config: EngineConfig,
        content: Arc<dyn ContentLookup>,
        characters: Arc<dyn CharacterStore>,
    ) -> Self {
        Self {
            config,
            content,
            characters,
            quests: Arc::new(NoopQuestNotifier),
            observer: Arc::new(NoopObserver),
            rollers: Arc::new(EntropyRollers),
            sessions: Arc::new(SessionStore::new()),
        }
    }

    pub fn with_quest_notifier(mut self, quests: Arc<dyn QuestNotifier>) -> Self {
        self.quests = quests;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn CombatObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_rollers(mut self, rollers: Arc<dyn RollerFactory>) -> Self {
        self.rollers = rollers;
        self
    }

    /// Use an existing session store, e.g. one shared with another engine.
    pub fn with_store(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    fn resolver(&self) -> ActionResolver<'_> {
        ActionResolver::new(self.content.as_ref(), &self.config)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Start a fight under `key`.
    ///
    /// Characters are loaded through the [`CharacterStore`], initiative is
    /// rolled and, with automatic monster turns enabled, any monsters that
    /// act before the first player do so immediately.
    pub async fn start_combat(
        &self,
        key: SessionKey,
        participants: Vec<Participant>,
    ) -> Result<TurnReport> {
        if self.sessions.contains(&key) {
            return Err(CombatError::SessionAlreadyExists(key));
        }

        let mut characters = Vec::new();
        let mut seen = HashSet::new();
        let mut monster_count = 0;
        for participant in &participants {
            match participant {
                Participant::Character(character) => {
                    if !seen.insert(character.clone()) {
                        return Err(CombatError::InvalidParticipants(format!(
                            "{character} joined twice"
                        )));
                    }
                    characters.push(character);
                }
                Participant::Monster(id) => {
                    let monster = self.content.monster(id).ok_or_else(|| {
                        CombatError::UnknownContent {
                            kind: "monster",
                            id: id.clone(),
                        }
                    })?;
                    if monster.health == 0 {
                        return Err(CombatError::InvalidParticipants(format!(
                            "{} has no health",
                            monster.name
                        )));
                    }
                    monster_count += 1;
                }
            }
        }
        if characters.is_empty() {
            return Err(CombatError::InvalidParticipants(
                "at least one player is required".to_string(),
            ));
        }
        if monster_count == 0 {
            return Err(CombatError::InvalidParticipants(
                "at least one monster is required".to_string(),
            ));
        }

        let sheets = try_join_all(characters.iter().map(|c| self.characters.load(c))).await?;
        if let Some(sheet) = sheets.iter().find(|s| s.health.is_depleted()) {
            return Err(CombatError::InvalidParticipants(format!(
                "{} is too wounded to fight",
                sheet.name
            )));
        }

        let mut sheets = characters.into_iter().zip(sheets);
        let mut combatants = Vec::with_capacity(participants.len());
        for participant in &participants {
            match participant {
                Participant::Character(_) => {
                    if let Some((character, sheet)) = sheets.next() {
                        combatants.push(Combatant::from_sheet(character.clone(), &sheet));
                    }
                }
                Participant::Monster(id) => {
                    if let Some(monster) = self.content.monster(id) {
                        combatants.push(Combatant::from_monster(monster));
                    }
                }
            }
        }

        let mut session = CombatSession::new(key.clone(), combatants, self.config.log_capacity);
        let mut roller = self.rollers.roller_for(&key);
        let mut turn_events = session.begin(roller.as_mut());

        let handle = self
            .sessions
            .create(key.clone(), LiveSession::new(session, roller))?;
        let mut live = handle.lock().await;

        info!(
            session = %key,
            mode = ?live.session.mode,
            players = live.session.players().count(),
            monsters = live.session.monsters().count(),
            "combat started"
        );

        let outcomes = if self.config.auto_resolve_monsters {
            self.run_monster_turns(&mut live, &mut turn_events)?
        } else {
            Vec::new()
        };
        let rewards = self.conclude(&key, &handle, &mut live).await;

        Ok(TurnReport {
            outcomes,
            turn_events,
            snapshot: live.session.clone(),
            rewards,
        })
    }

    /// Apply a player's action.
    ///
    /// `actor` must be the character whose turn it is. A rejected action
    /// leaves the session unchanged.
    pub async fn submit_action(
        &self,
        key: &SessionKey,
        actor: &CharacterRef,
        action: CombatAction,
    ) -> Result<ActionReport> {
        let handle = self.handle(key)?;
        let mut live = handle.lock().await;
        let index = live.session.validate_turn(actor)?;

        let LiveSession { session, roller } = &mut *live;
        let outcome = self
            .resolver()
            .resolve(session, index, &action, roller.as_mut())?;
        session.touch(Utc::now());
        let mut turn_events = session.advance_turn(roller.as_mut());

        let follow_ups = if self.config.auto_resolve_monsters {
            self.run_monster_turns(&mut live, &mut turn_events)?
        } else {
            Vec::new()
        };
        let rewards = self.conclude(key, &handle, &mut live).await;

        Ok(ActionReport {
            outcome,
            follow_ups,
            turn_events,
            snapshot: live.session.clone(),
            rewards,
        })
    }

    /// Resolve monster turns until a player is up. Used when automatic
    /// monster turns are disabled; returns nothing if a player is already up.
    pub async fn resolve_monster_turns(&self, key: &SessionKey) -> Result<TurnReport> {
        let handle = self.handle(key)?;
        let mut live = handle.lock().await;
        if !live.session.is_active() {
            return Err(CombatError::SessionNotFound(key.clone()));
        }

        let mut turn_events = Vec::new();
        let outcomes = self.run_monster_turns(&mut live, &mut turn_events)?;
        let rewards = self.conclude(key, &handle, &mut live).await;

        Ok(TurnReport {
            outcomes,
            turn_events,
            snapshot: live.session.clone(),
            rewards,
        })
    }

    /// Snapshot of a live session.
    pub async fn get_status(&self, key: &SessionKey) -> Result<CombatSession> {
        let handle = self.handle(key)?;
        let live = handle.lock().await;
        Ok(live.session.clone())
    }

    /// Abort a session. No rewards are paid.
    pub async fn end_combat(&self, key: &SessionKey, reason: EndReason) -> Result<CombatSession> {
        let handle = self.handle(key)?;
        let mut live = handle.lock().await;
        if !live.session.finish(SessionState::Aborted) {
            return Err(CombatError::SessionNotFound(key.clone()));
        }
        self.sessions.remove_if_same(key, &handle);
        info!(session = %key, reason = %reason, "combat aborted");

        let snapshot = live.session.clone();
        drop(live);
        if matches!(reason, EndReason::System(_)) {
            self.observer.session_expired(&snapshot).await;
        }
        Ok(snapshot)
    }

    /// Abort every session idle for longer than the configured timeout.
    pub async fn evict_idle(&self) -> Vec<SessionKey> {
        self.evict_idle_at(Utc::now()).await
    }

    /// [`CombatEngine::evict_idle`] against an explicit clock.
    pub async fn evict_idle_at(&self, now: DateTime<Utc>) -> Vec<SessionKey> {
        let timeout = self.config.idle_timeout;
        let mut evicted = Vec::new();

        for (key, handle) in self.sessions.expired(now, timeout) {
            let mut live = handle.lock().await;
            // Someone may have acted between the scan and the lock.
            if !live.session.is_idle(now, timeout) || !live.session.finish(SessionState::Aborted) {
                continue;
            }
            self.sessions.remove_if_same(&key, &handle);
            warn!(
                session = %key,
                idle_secs = live.session.idle_for(now).as_secs(),
                "evicted idle combat session"
            );
            let snapshot = live.session.clone();
            drop(live);

            self.observer.session_expired(&snapshot).await;
            evicted.push(key);
        }
        evicted
    }

    /// Run [`CombatEngine::evict_idle`] every `sweep_interval` until the
    /// engine is dropped or the returned handle is aborted.
    pub fn spawn_eviction_task(self: &Arc<Self>) -> JoinHandle<()> {
        let engine: Weak<Self> = Arc::downgrade(self);
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                let evicted = engine.evict_idle().await;
                if !evicted.is_empty() {
                    debug!(count = evicted.len(), "idle sweep finished");
                }
            }
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn handle(&self, key: &SessionKey) -> Result<SessionHandle> {
        self.sessions
            .get(key)
            .ok_or_else(|| CombatError::SessionNotFound(key.clone()))
    }

    fn run_monster_turns(
        &self,
        live: &mut LiveSession,
        turn_events: &mut Vec<TurnEvent>,
    ) -> Result<Vec<ActionOutcome>> {
        let resolver = self.resolver();
        let LiveSession { session, roller } = live;
        let mut outcomes = Vec::new();
        while session.is_monster_turn() {
            let index = session.current_turn_index();
            outcomes.push(resolver.monster_turn(session, index, roller.as_mut())?);
            turn_events.extend(session.advance_turn(roller.as_mut()));
        }
        Ok(outcomes)
    }

    /// Pay out and unregister a session that has reached a terminal state.
    /// The store entry is only removed once persistence has finished.
    async fn conclude(
        &self,
        key: &SessionKey,
        handle: &SessionHandle,
        live: &mut LiveSession,
    ) -> Option<RewardReport> {
        if live.session.is_active() {
            return None;
        }
        let state = live.session.state();
        let plan = rewards::plan(&live.session, &self.config, live.roller.as_mut());
        let report = RewardDispatcher::new(self.characters.as_ref(), self.quests.as_ref(), &self.config)
            .dispatch(plan)
            .await;
        self.sessions.remove_if_same(key, handle);

        info!(
            session = %key,
            outcome = %state,
            rounds = live.session.round,
            warnings = report.warnings.len(),
            "combat finished"
        );
        Some(report)
    }
}
