//! Turn-based combat session engine for the RPG bot.
//!
//! This crate provides:
//! - Dice parsing and rolling with injectable randomness
//! - Initiative, turn order and status effect ticking
//! - Attack, spell, ability, defend, flee and item resolution
//! - A keyed store of live sessions with idle eviction
//! - Experience, gold, loot and level-up payouts on victory, penalties on defeat
//!
//! Character storage, quest tracking and presentation are collaborators
//! supplied by the bot (see [`collaborators`]).
//!
//! # Quick Start
//!
//! ```ignore
//! use combat_core::{
//!     CharacterRef, CombatAction, CombatEngine, ContentCatalog, EngineConfig, Participant,
//!     SessionKey,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = CombatEngine::new(
//!         EngineConfig::from_env()?,
//!         Arc::new(ContentCatalog::standard()),
//!         Arc::new(MyCharacterStore::connect().await?),
//!     );
//!
//!     let key = SessionKey::new("user-123");
//!     let hero = CharacterRef::new("user-123");
//!     engine
//!         .start_combat(key.clone(), vec![
//!             Participant::Character(hero.clone()),
//!             Participant::Monster("goblin".into()),
//!         ])
//!         .await?;
//!
//!     let report = engine
//!         .submit_action(&key, &hero, CombatAction::Attack { target: None })
//!         .await?;
//!     println!("{}", report.outcome.narrative);
//!     Ok(())
//! }
//! ```

pub mod actions;
pub mod collaborators;
pub mod combatant;
pub mod config;
pub mod content;
pub mod dice;
pub mod engine;
pub mod error;
pub mod render;
pub mod rewards;
pub mod session;
pub mod store;
pub mod testing;

// Primary public API
pub use actions::{ActionKind, ActionOutcome, ActionResolver, CombatAction};
pub use collaborators::{
    CharacterSheet, CharacterStore, CollaboratorError, CombatObserver, CombatRenderer, KillRecord,
    ProgressDelta, QuestNotifier,
};
pub use combatant::{CharacterRef, Combatant, CombatantId, CombatantKind, Pool};
pub use config::{ConfigError, EngineConfig, FleeRule};
pub use content::{ContentCatalog, ContentError, ContentLookup};
pub use dice::{DiceExpression, DieRoller, RngRoller, RollResult};
pub use engine::{
    ActionReport, CombatEngine, EndReason, EntropyRollers, Participant, RollerFactory,
    SeededRollers, TurnReport,
};
pub use error::{CombatError, Result};
pub use render::TextRenderer;
pub use rewards::{PlayerAward, RewardReport};
pub use session::{CombatMode, CombatSession, SessionKey, SessionState, TurnEvent};
pub use store::SessionStore;
pub use testing::{ScriptedRoller, TestHarness};
