//! Error types surfaced by the combat engine.
//!
//! Every variant is recoverable at the UI boundary: the caller reports the
//! condition to the player and the session is left exactly as it was.

use crate::collaborators::CollaboratorError;
use crate::dice::DiceError;
use crate::session::SessionKey;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CombatError>;

#[derive(Debug, Error)]
pub enum CombatError {
    #[error(transparent)]
    InvalidFormula(#[from] DiceError),

    #[error("a combat session is already running for {0}")]
    SessionAlreadyExists(SessionKey),

    #[error("no active combat session for {0}")]
    SessionNotFound(SessionKey),

    #[error("it is not your turn (waiting on {expected})")]
    NotYourTurn { expected: String },

    #[error("not enough {resource}: need {required}, have {available}")]
    InsufficientResource {
        resource: &'static str,
        required: u32,
        available: u32,
    },

    #[error("{action} is on cooldown for {remaining} more turn(s)")]
    OnCooldown { action: String, remaining: u32 },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("{item} cannot be used: {reason}")]
    ItemNotUsable { item: String, reason: String },

    #[error("{0} is not a spell or ability this combatant knows")]
    ActionNotKnown(String),

    #[error("invalid participants: {0}")]
    InvalidParticipants(String),

    #[error("unknown {kind} '{id}'")]
    UnknownContent { kind: &'static str, id: String },

    #[error("collaborator failed: {0}")]
    Collaborator(#[from] CollaboratorError),
}

impl CombatError {
    /// Whether this error rejected a player action (as opposed to a setup or
    /// infrastructure failure).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CombatError::NotYourTurn { .. }
                | CombatError::InsufficientResource { .. }
                | CombatError::OnCooldown { .. }
                | CombatError::InvalidTarget(_)
                | CombatError::ItemNotUsable { .. }
                | CombatError::ActionNotKnown(_)
        )
    }
}
