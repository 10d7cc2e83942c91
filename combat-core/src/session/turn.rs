//! Turn order: initiative, advancing, start-of-turn ticking and termination.
//!
//! `current_turn_index` is only ever written here. While a session is active
//! it points at a living combatant whose turn has started.

use super::{CombatSession, SessionState};
use crate::combatant::{CharacterRef, CombatantId, CombatantKind};
use crate::dice::{DiceExpression, DieRoller};
use crate::error::{CombatError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use tracing::debug;

/// Something that happened while moving between turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnEvent {
    RoundStarted {
        round: u32,
    },
    TurnStarted {
        combatant: CombatantId,
        name: String,
    },
    EffectDamage {
        combatant: CombatantId,
        name: String,
        effect: String,
        damage: u32,
        defeated: bool,
    },
    EffectExpired {
        combatant: CombatantId,
        name: String,
        effect: String,
    },
    TurnSkipped {
        combatant: CombatantId,
        name: String,
        effect: String,
    },
    CombatEnded {
        state: SessionState,
    },
}

impl TurnEvent {
    fn is_logged(&self) -> bool {
        !matches!(self, TurnEvent::TurnStarted { .. })
    }
}

impl fmt::Display for TurnEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnEvent::RoundStarted { round } => write!(f, "Round {round} begins."),
            TurnEvent::TurnStarted { name, .. } => write!(f, "{name}'s turn."),
            TurnEvent::EffectDamage {
                name,
                effect,
                damage,
                defeated,
                ..
            } => {
                write!(f, "{name} takes {damage} damage from {effect}.")?;
                if *defeated {
                    write!(f, " {name} falls!")?;
                }
                Ok(())
            }
            TurnEvent::EffectExpired { name, effect, .. } => {
                write!(f, "{effect} wears off {name}.")
            }
            TurnEvent::TurnSkipped { name, effect, .. } => {
                write!(f, "{name} is {effect} and loses the turn.")
            }
            TurnEvent::CombatEnded { state } => write!(f, "Combat over: {state}."),
        }
    }
}

impl CombatSession {
    /// Roll initiative for everyone and start the first turn.
    ///
    /// Each combatant rolls `1d20 + dexterity`. Order is descending by
    /// initiative, then by dexterity, then by the order combatants were given.
    pub fn begin(&mut self, roller: &mut dyn DieRoller) -> Vec<TurnEvent> {
        for combatant in &mut self.combatants {
            combatant.initiative = DiceExpression::d20(combatant.dexterity_modifier)
                .roll(roller)
                .total;
        }
        self.combatants
            .sort_by_key(|c| (Reverse(c.initiative), Reverse(c.dexterity_modifier)));
        self.current_turn_index = 0;
        self.round = 1;

        debug!(
            session = %self.id,
            order = ?self.combatants.iter().map(|c| (&c.name, c.initiative)).collect::<Vec<_>>(),
            "initiative rolled"
        );

        let mut events = Vec::new();
        self.settle(roller, &mut events);
        events
    }

    /// Check that `character` is the combatant whose turn it is. Returns the
    /// index of the acting combatant.
    pub fn validate_turn(&self, character: &CharacterRef) -> Result<usize> {
        if !self.is_active() {
            return Err(CombatError::SessionNotFound(self.id.clone()));
        }
        let current = self
            .current_combatant()
            .ok_or_else(|| CombatError::SessionNotFound(self.id.clone()))?;
        if current.character() == Some(character) {
            Ok(self.current_turn_index)
        } else {
            Err(CombatError::NotYourTurn {
                expected: current.name.clone(),
            })
        }
    }

    /// End the current turn and move to the next combatant that can act.
    ///
    /// Defeated combatants are passed over. Each combatant reached has its
    /// turn started: defending ends, cooldowns count down and status effects
    /// tick. A combatant held by a turn-skipping effect loses the turn. Stops
    /// early if the fight ends.
    pub fn advance_turn(&mut self, roller: &mut dyn DieRoller) -> Vec<TurnEvent> {
        let mut events = Vec::new();
        if self.check_termination(&mut events) {
            return events;
        }
        self.step(&mut events);
        self.settle(roller, &mut events);
        events
    }

    /// Enter victory or defeat if one side is down. Returns true if the
    /// session is (now) in a terminal state.
    pub fn check_termination(&mut self, events: &mut Vec<TurnEvent>) -> bool {
        if self.state().is_terminal() {
            return true;
        }
        let outcome = if self.living(CombatantKind::Monster).next().is_none() {
            SessionState::Victory
        } else if self.living(CombatantKind::Player).next().is_none() {
            SessionState::Defeat
        } else {
            return false;
        };
        if self.finish(outcome) {
            events.push(TurnEvent::CombatEnded { state: outcome });
        }
        true
    }

    fn step(&mut self, events: &mut Vec<TurnEvent>) {
        self.current_turn_index += 1;
        if self.current_turn_index >= self.combatants.len() {
            self.current_turn_index = 0;
            self.round += 1;
            self.record(events, TurnEvent::RoundStarted { round: self.round });
        }
    }

    /// Walk forward from the current index until a combatant can act.
    fn settle(&mut self, roller: &mut dyn DieRoller, events: &mut Vec<TurnEvent>) {
        loop {
            if self.check_termination(events) {
                return;
            }
            let index = self.current_turn_index;
            let Some(current) = self.combatants.get(index) else {
                return;
            };
            if current.is_defeated() {
                self.step(events);
                continue;
            }

            let skipped = self.start_turn(index, roller, events);
            if self.check_termination(events) {
                return;
            }
            if skipped || self.combatants[index].is_defeated() {
                self.step(events);
                continue;
            }

            let current = &self.combatants[index];
            debug!(session = %self.id, round = self.round, combatant = %current.name, "turn started");
            events.push(TurnEvent::TurnStarted {
                combatant: current.id,
                name: current.name.clone(),
            });
            return;
        }
    }

    /// Start-of-turn upkeep. Returns true if the combatant loses this turn.
    fn start_turn(
        &mut self,
        index: usize,
        roller: &mut dyn DieRoller,
        events: &mut Vec<TurnEvent>,
    ) -> bool {
        let mut pending = Vec::new();
        let combatant = &mut self.combatants[index];

        combatant.defending = false;
        combatant.cooldowns.retain(|_, turns| {
            *turns = turns.saturating_sub(1);
            *turns > 0
        });

        let mut skip = None;
        for effect in &mut combatant.status_effects {
            if let Some(formula) = &effect.damage_per_turn {
                let rolled = formula.roll(roller).total.max(0) as u32;
                let damage = combatant.health.drain(rolled);
                pending.push(TurnEvent::EffectDamage {
                    combatant: combatant.id,
                    name: combatant.name.clone(),
                    effect: effect.name.clone(),
                    damage,
                    defeated: combatant.health.is_depleted(),
                });
            }
            if effect.skip_turn && skip.is_none() {
                skip = Some(effect.name.clone());
            }
            effect.remaining = effect.remaining.saturating_sub(1);
        }

        let (id, name) = (combatant.id, combatant.name.clone());
        combatant.status_effects.retain(|effect| {
            if effect.remaining == 0 {
                pending.push(TurnEvent::EffectExpired {
                    combatant: id,
                    name: name.clone(),
                    effect: effect.name.clone(),
                });
                false
            } else {
                true
            }
        });

        let alive = combatant.is_alive();
        if let (Some(effect), true) = (&skip, alive) {
            pending.push(TurnEvent::TurnSkipped {
                combatant: id,
                name,
                effect: effect.clone(),
            });
        }

        for event in pending {
            self.record(events, event);
        }
        skip.is_some()
    }

    fn record(&mut self, events: &mut Vec<TurnEvent>, event: TurnEvent) {
        if event.is_logged() {
            self.push_log(event.to_string());
        }
        events.push(event);
    }
}
