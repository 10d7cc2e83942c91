//! Action resolution.
//!
//! Every action a combatant can take is a [`CombatAction`] variant. The
//! [`ActionResolver`] validates an action completely before touching the
//! session, so a rejected action leaves every combatant exactly as it was.

use crate::combatant::{ActiveEffect, CombatantId, CombatantKind};
use crate::config::{EngineConfig, FleeRule};
use crate::content::{ContentLookup, ItemEffect, SpellDef, SpellEffect, SpellKind, StatusDef};
use crate::dice::{DiceExpression, DieRoller, RollResult};
use crate::error::{CombatError, Result};
use crate::session::{CombatSession, SessionState};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// What a combatant does on its turn.
///
/// A missing target means "the obvious one": the first living enemy for
/// harmful actions, the actor itself for beneficial ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum CombatAction {
    Attack {
        #[serde(default)]
        target: Option<CombatantId>,
    },
    CastSpell {
        spell_id: String,
        #[serde(default)]
        target: Option<CombatantId>,
    },
    UseAbility {
        ability_id: String,
        #[serde(default)]
        target: Option<CombatantId>,
    },
    Defend,
    Flee,
    UseItem {
        item_id: String,
        #[serde(default)]
        target: Option<CombatantId>,
    },
}

impl CombatAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            CombatAction::Attack { .. } => ActionKind::Attack,
            CombatAction::CastSpell { .. } => ActionKind::CastSpell,
            CombatAction::UseAbility { .. } => ActionKind::UseAbility,
            CombatAction::Defend => ActionKind::Defend,
            CombatAction::Flee => ActionKind::Flee,
            CombatAction::UseItem { .. } => ActionKind::UseItem,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Attack,
    CastSpell,
    UseAbility,
    Defend,
    Flee,
    UseItem,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Attack => "attack",
            ActionKind::CastSpell => "cast spell",
            ActionKind::UseAbility => "use ability",
            ActionKind::Defend => "defend",
            ActionKind::Flee => "flee",
            ActionKind::UseItem => "use item",
        };
        f.write_str(name)
    }
}

/// The result of one resolved action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub actor_id: CombatantId,
    pub actor_name: String,
    pub target_id: Option<CombatantId>,
    pub target_name: Option<String>,
    pub action: ActionKind,
    /// The d20 roll for attacks, attack-rolled spells and flee attempts.
    pub roll: Option<RollResult>,
    pub hit: bool,
    pub critical: bool,
    pub damage: u32,
    pub healing: u32,
    pub mana_restored: u32,
    pub applied_effects: Vec<String>,
    pub cured_effects: Vec<String>,
    pub fled: bool,
    pub target_defeated: bool,
    pub narrative: String,
}

impl ActionOutcome {
    fn new(session: &CombatSession, actor: usize, action: ActionKind) -> Self {
        let combatant = &session.combatants[actor];
        Self {
            actor_id: combatant.id,
            actor_name: combatant.name.clone(),
            target_id: None,
            target_name: None,
            action,
            roll: None,
            hit: false,
            critical: false,
            damage: 0,
            healing: 0,
            mana_restored: 0,
            applied_effects: Vec::new(),
            cured_effects: Vec::new(),
            fled: false,
            target_defeated: false,
            narrative: String::new(),
        }
    }

    fn targeting(mut self, session: &CombatSession, target: usize) -> Self {
        let combatant = &session.combatants[target];
        self.target_id = Some(combatant.id);
        self.target_name = Some(combatant.name.clone());
        self
    }

    fn target(&self) -> &str {
        self.target_name.as_deref().unwrap_or("nobody")
    }
}

/// Which side an action may target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Enemy,
    Ally,
}

/// Applies [`CombatAction`]s to a session.
pub struct ActionResolver<'a> {
    content: &'a dyn ContentLookup,
    config: &'a EngineConfig,
}

impl<'a> ActionResolver<'a> {
    pub fn new(content: &'a dyn ContentLookup, config: &'a EngineConfig) -> Self {
        Self { content, config }
    }

    /// Resolve `action` for the combatant at index `actor`.
    ///
    /// Does not advance the turn. On error the session is untouched.
    pub fn resolve(
        &self,
        session: &mut CombatSession,
        actor: usize,
        action: &CombatAction,
        roller: &mut dyn DieRoller,
    ) -> Result<ActionOutcome> {
        if !session.is_active() {
            return Err(CombatError::SessionNotFound(session.id.clone()));
        }
        let combatant = session.combatants.get(actor).ok_or_else(|| {
            CombatError::InvalidParticipants(format!("no combatant at position {actor}"))
        })?;
        if combatant.is_defeated() {
            return Err(CombatError::InvalidTarget(format!(
                "{} is down and cannot act",
                combatant.name
            )));
        }

        let outcome = match action {
            CombatAction::Attack { target } => self.attack(session, actor, *target, roller)?,
            CombatAction::CastSpell { spell_id, target } => {
                self.use_power(session, actor, spell_id, SpellKind::Spell, *target, roller)?
            }
            CombatAction::UseAbility { ability_id, target } => {
                self.use_power(session, actor, ability_id, SpellKind::Ability, *target, roller)?
            }
            CombatAction::Defend => self.defend(session, actor),
            CombatAction::Flee => self.flee(session, actor, roller),
            CombatAction::UseItem { item_id, target } => {
                self.use_item(session, actor, item_id, *target, roller)?
            }
        };

        debug!(
            session = %session.id,
            actor = %outcome.actor_name,
            action = %outcome.action,
            hit = outcome.hit,
            damage = outcome.damage,
            healing = outcome.healing,
            "action resolved"
        );
        session.push_log(outcome.narrative.clone());
        if outcome.fled {
            session.finish(SessionState::Fled);
        }
        Ok(outcome)
    }

    /// Take the turn for the monster at `actor`: attack the living player with
    /// the least health, earliest in turn order on ties.
    pub fn monster_turn(
        &self,
        session: &mut CombatSession,
        actor: usize,
        roller: &mut dyn DieRoller,
    ) -> Result<ActionOutcome> {
        let target = session
            .living(CombatantKind::Player)
            .min_by_key(|c| c.health.current())
            .map(|c| c.id)
            .ok_or_else(|| CombatError::InvalidTarget("no players left standing".to_string()))?;
        self.resolve(
            session,
            actor,
            &CombatAction::Attack {
                target: Some(target),
            },
            roller,
        )
    }

    // ========================================================================
    // Variants
    // ========================================================================

    fn attack(
        &self,
        session: &mut CombatSession,
        actor: usize,
        target: Option<CombatantId>,
        roller: &mut dyn DieRoller,
    ) -> Result<ActionOutcome> {
        let target = pick_target(session, actor, target, Side::Enemy)?;
        let mut outcome = ActionOutcome::new(session, actor, ActionKind::Attack).targeting(session, target);

        let formula = session.combatants[actor].damage_formula.clone();
        let ac = self.strike(session, actor, target, &formula, roller, &mut outcome);
        outcome.narrative = describe_strike(&outcome, "attacks", ac);
        Ok(outcome)
    }

    fn use_power(
        &self,
        session: &mut CombatSession,
        actor: usize,
        id: &str,
        kind: SpellKind,
        target: Option<CombatantId>,
        roller: &mut dyn DieRoller,
    ) -> Result<ActionOutcome> {
        let combatant = &session.combatants[actor];
        if !combatant.knows(id) {
            return Err(CombatError::ActionNotKnown(id.to_string()));
        }
        let spell = self
            .content
            .spell(id)
            .ok_or_else(|| CombatError::UnknownContent {
                kind: "spell",
                id: id.to_string(),
            })?;
        if spell.kind != kind {
            return Err(CombatError::ActionNotKnown(format!(
                "{} (it is a {}, not a {})",
                spell.name,
                spell.kind.name(),
                kind.name()
            )));
        }
        if combatant.mana.current() < spell.mana_cost {
            return Err(CombatError::InsufficientResource {
                resource: "mana",
                required: spell.mana_cost,
                available: combatant.mana.current(),
            });
        }
        let remaining = combatant.cooldown(id);
        if remaining > 0 {
            return Err(CombatError::OnCooldown {
                action: spell.name.clone(),
                remaining,
            });
        }
        let status = match &spell.effect {
            SpellEffect::ApplyStatus { status, .. } => Some(self.status(status)?),
            _ => None,
        };
        let side = if spell.effect.is_harmful(status) {
            Side::Enemy
        } else {
            Side::Ally
        };
        let target = pick_target(session, actor, target, side)?;

        // Validation done, commit.
        let action = match kind {
            SpellKind::Spell => ActionKind::CastSpell,
            SpellKind::Ability => ActionKind::UseAbility,
        };
        let mut outcome = ActionOutcome::new(session, actor, action).targeting(session, target);
        let caster = &mut session.combatants[actor];
        caster.mana.spend(spell.mana_cost);
        if spell.cooldown > 0 {
            caster.cooldowns.insert(spell.id.clone(), spell.cooldown);
        }

        let verb = match kind {
            SpellKind::Spell => "casts",
            SpellKind::Ability => "uses",
        };
        let actor_name = outcome.actor_name.clone();
        let target_name = outcome.target().to_string();

        outcome.narrative = match &spell.effect {
            SpellEffect::Damage {
                formula,
                attack_roll: true,
            } => {
                let ac = self.strike(session, actor, target, formula, roller, &mut outcome);
                describe_strike(&outcome, &format!("{verb} {} at", spell.name), ac)
            }
            SpellEffect::Damage {
                formula,
                attack_roll: false,
            } => {
                outcome.hit = true;
                let rolled = roll_amount(formula, roller);
                deal_damage(session, actor, target, rolled, &mut outcome);
                let mut text = format!(
                    "{actor_name} {verb} {} on {target_name} for {} damage.",
                    spell.name, outcome.damage
                );
                if outcome.target_defeated {
                    text.push_str(&format!(" {target_name} is defeated!"));
                }
                text
            }
            SpellEffect::Heal { formula } => {
                outcome.hit = true;
                let amount = roll_amount(formula, roller);
                outcome.healing = session.combatants[target].health.restore(amount);
                format!(
                    "{actor_name} {verb} {} on {target_name}, restoring {} health.",
                    spell.name, outcome.healing
                )
            }
            SpellEffect::ApplyStatus { duration, .. } => {
                outcome.hit = true;
                if let Some(status) = status {
                    session.combatants[target].apply_effect(ActiveEffect::from_status(status, *duration));
                    outcome.applied_effects.push(status.name.clone());
                }
                format!(
                    "{actor_name} {verb} {} on {target_name}: {}.",
                    spell.name,
                    outcome.applied_effects.join(", ")
                )
            }
            SpellEffect::Buff {
                armor_class,
                attack,
                duration,
            } => {
                outcome.hit = true;
                session.combatants[target].apply_effect(buff_from(spell, *armor_class, *attack, *duration));
                outcome.applied_effects.push(spell.name.clone());
                format!("{actor_name} {verb} {} on {target_name}.", spell.name)
            }
        };
        Ok(outcome)
    }

    fn defend(&self, session: &mut CombatSession, actor: usize) -> ActionOutcome {
        let mut outcome = ActionOutcome::new(session, actor, ActionKind::Defend).targeting(session, actor);
        session.combatants[actor].defending = true;
        outcome.narrative = format!(
            "{} takes a defensive stance (+{} AC until their next turn).",
            outcome.actor_name, self.config.defend_armor_bonus
        );
        outcome
    }

    fn flee(&self, session: &CombatSession, actor: usize, roller: &mut dyn DieRoller) -> ActionOutcome {
        let mut outcome = ActionOutcome::new(session, actor, ActionKind::Flee);
        let escape = DiceExpression::d20(session.combatants[actor].dexterity_modifier).roll(roller);

        let difficulty = match self.config.flee {
            FleeRule::FixedDc(dc) => dc,
            FleeRule::Opposed => {
                let actor_kind = session.combatants[actor].kind;
                let pursuers: Vec<i32> = session
                    .combatants
                    .iter()
                    .filter(|c| c.kind != actor_kind && c.is_alive())
                    .map(|c| c.dexterity_modifier)
                    .collect();
                pursuers
                    .into_iter()
                    .map(|dex| DiceExpression::d20(dex).roll(roller).total)
                    .max()
                    .unwrap_or(i32::MIN)
            }
        };

        outcome.hit = escape.total >= difficulty;
        outcome.fled = outcome.hit;
        outcome.narrative = if outcome.fled {
            format!("{} flees the battle! ({} vs {difficulty})", outcome.actor_name, escape.total)
        } else {
            format!("{} tries to flee but is cut off. ({} vs {difficulty})", outcome.actor_name, escape.total)
        };
        outcome.roll = Some(escape);
        outcome
    }

    fn use_item(
        &self,
        session: &mut CombatSession,
        actor: usize,
        item_id: &str,
        target: Option<CombatantId>,
        roller: &mut dyn DieRoller,
    ) -> Result<ActionOutcome> {
        let not_usable = |item: &str, reason: &str| CombatError::ItemNotUsable {
            item: item.to_string(),
            reason: reason.to_string(),
        };
        let item = self
            .content
            .item(item_id)
            .ok_or_else(|| not_usable(item_id, "unknown item"))?;
        if session.combatants[actor].charges(item_id) == 0 {
            return Err(not_usable(&item.name, "you have none left"));
        }
        let effect = item
            .combat_effect
            .as_ref()
            .ok_or_else(|| not_usable(&item.name, "it has no use in combat"))?;
        let target = pick_target(session, actor, target, Side::Ally)?;

        let mut outcome = ActionOutcome::new(session, actor, ActionKind::UseItem).targeting(session, target);
        session.combatants[actor].consume_charge(item_id);
        outcome.hit = true;

        let recipient = &mut session.combatants[target];
        let result = match effect {
            ItemEffect::Heal { formula } => {
                outcome.healing = recipient.health.restore(roll_amount(formula, roller));
                format!("restoring {} health", outcome.healing)
            }
            ItemEffect::RestoreMana { formula } => {
                outcome.mana_restored = recipient.mana.restore(roll_amount(formula, roller));
                format!("restoring {} mana", outcome.mana_restored)
            }
            ItemEffect::Buff {
                armor_class,
                attack,
                duration,
            } => {
                recipient.apply_effect(ActiveEffect::buff(
                    item.id.clone(),
                    item.name.clone(),
                    *armor_class,
                    *attack,
                    *duration,
                ));
                outcome.applied_effects.push(item.name.clone());
                "and feels its strength".to_string()
            }
            ItemEffect::Cure { statuses } => {
                outcome.cured_effects = recipient.cure(statuses);
                if outcome.cured_effects.is_empty() {
                    "but nothing happens".to_string()
                } else {
                    format!("curing {}", outcome.cured_effects.join(", "))
                }
            }
        };

        outcome.narrative = if outcome.target_id == Some(outcome.actor_id) {
            format!("{} uses {}, {result}.", outcome.actor_name, item.name)
        } else {
            format!("{} uses {} on {}, {result}.", outcome.actor_name, item.name, outcome.target())
        };
        Ok(outcome)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn status(&self, id: &str) -> Result<&'a StatusDef> {
        let content: &'a dyn ContentLookup = self.content;
        content.status(id).ok_or_else(|| CombatError::UnknownContent {
            kind: "status",
            id: id.to_string(),
        })
    }

    /// Roll to hit and apply damage on a hit. Returns the armor class rolled
    /// against.
    ///
    /// A natural 20 always hits and doubles the damage dice; a natural 1
    /// always misses.
    fn strike(
        &self,
        session: &mut CombatSession,
        actor: usize,
        target: usize,
        formula: &DiceExpression,
        roller: &mut dyn DieRoller,
        outcome: &mut ActionOutcome,
    ) -> i32 {
        let attack_bonus = session.combatants[actor].effective_attack_bonus();
        let ac = session.combatants[target].effective_armor_class(self.config.defend_armor_bonus);
        let roll = DiceExpression::d20(attack_bonus).roll(roller);

        outcome.critical = roll.is_critical();
        outcome.hit = !roll.is_fumble() && (roll.is_critical() || roll.total >= ac);
        if outcome.hit {
            let damage_dice = if outcome.critical {
                formula.doubled()
            } else {
                formula.clone()
            };
            let rolled = roll_amount(&damage_dice, roller);
            deal_damage(session, actor, target, rolled, outcome);
        }
        outcome.roll = Some(roll);
        ac
    }
}

fn pick_target(
    session: &CombatSession,
    actor: usize,
    requested: Option<CombatantId>,
    side: Side,
) -> Result<usize> {
    let actor_kind = session.combatants[actor].kind;
    let index = match (requested, side) {
        (Some(id), _) => session
            .index_of(id)
            .ok_or_else(|| CombatError::InvalidTarget(format!("{id} is not in this fight")))?,
        (None, Side::Ally) => actor,
        (None, Side::Enemy) => session
            .combatants
            .iter()
            .position(|c| c.kind != actor_kind && c.is_alive())
            .ok_or_else(|| CombatError::InvalidTarget("no enemies left".to_string()))?,
    };

    let target = &session.combatants[index];
    if target.is_defeated() {
        return Err(CombatError::InvalidTarget(format!(
            "{} is already defeated",
            target.name
        )));
    }
    match side {
        Side::Enemy if target.kind == actor_kind => Err(CombatError::InvalidTarget(format!(
            "{} is not an enemy",
            target.name
        ))),
        Side::Ally if target.kind != actor_kind => Err(CombatError::InvalidTarget(format!(
            "{} is not an ally",
            target.name
        ))),
        _ => Ok(index),
    }
}

fn roll_amount(formula: &DiceExpression, roller: &mut dyn DieRoller) -> u32 {
    formula.roll(roller).total.max(0) as u32
}

/// Subtract damage from the target and credit the actor.
fn deal_damage(
    session: &mut CombatSession,
    actor: usize,
    target: usize,
    amount: u32,
    outcome: &mut ActionOutcome,
) {
    let actor_id = session.combatants[actor].id;
    let Some(victim) = session.combatant_mut(target) else {
        return;
    };
    let dealt = victim.health.drain(amount);
    outcome.damage += dealt;
    if victim.is_defeated() {
        outcome.target_defeated = true;
        if victim.defeated_by.is_none() {
            victim.defeated_by = Some(actor_id);
        }
    }
    if actor != target {
        let attacker = &mut session.combatants[actor];
        attacker.damage_dealt = attacker.damage_dealt.saturating_add(dealt);
    }
}

fn buff_from(spell: &SpellDef, armor_class: i32, attack: i32, duration: u32) -> ActiveEffect {
    ActiveEffect::buff(spell.id.clone(), spell.name.clone(), armor_class, attack, duration)
}

fn describe_strike(outcome: &ActionOutcome, verb: &str, ac: i32) -> String {
    let roll = outcome
        .roll
        .as_ref()
        .map(|r| r.total.to_string())
        .unwrap_or_default();
    let target = outcome.target();
    let mut text = format!("{} {verb} {target} ({roll} vs AC {ac}): ", outcome.actor_name);
    match (outcome.hit, outcome.critical) {
        (true, true) => text.push_str(&format!("critical hit for {} damage!", outcome.damage)),
        (true, false) => text.push_str(&format!("hit for {} damage.", outcome.damage)),
        (false, _) if outcome.roll.as_ref().is_some_and(|r| r.is_fumble()) => {
            text.push_str("a clumsy miss.")
        }
        (false, _) => text.push_str("miss."),
    }
    if outcome.target_defeated {
        text.push_str(&format!(" {target} is defeated!"));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combatant::{CharacterRef, Combatant, Pool};
    use crate::content::{ContentCatalog, ContentFile};
    use crate::session::SessionKey;
    use crate::testing::{sample_fighter, sample_mage, ScriptedRoller};

    struct Fixture {
        catalog: ContentCatalog,
        config: EngineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                catalog: ContentCatalog::standard(),
                config: EngineConfig::default(),
            }
        }

        fn resolver(&self) -> ActionResolver<'_> {
            ActionResolver::new(&self.catalog, &self.config)
        }

        /// Player first, then the given monsters, in that turn order.
        fn session(&self, hero: Combatant, monsters: &[&str]) -> CombatSession {
            let mut combatants = vec![hero];
            combatants.extend(
                monsters
                    .iter()
                    .map(|id| Combatant::from_monster(&self.catalog.monsters[*id])),
            );
            CombatSession::new(SessionKey::new("owner"), combatants, 20)
        }
    }

    fn fighter() -> Combatant {
        Combatant::from_sheet(CharacterRef::new("owner"), &sample_fighter("Roland"))
    }

    fn mage() -> Combatant {
        Combatant::from_sheet(CharacterRef::new("owner"), &sample_mage("Ilsa"))
    }

    #[test]
    fn test_attack_kills_goblin() {
        let fx = Fixture::new();
        let mut session = fx.session(fighter(), &["goblin"]);
        let goblin = session.combatants[1].id;

        // 15 + 5 = 20 vs AC 13, then 4 + 3 = 7 damage
        let outcome = fx
            .resolver()
            .resolve(
                &mut session,
                0,
                &CombatAction::Attack { target: Some(goblin) },
                &mut ScriptedRoller::new([15, 4]),
            )
            .unwrap();

        assert!(outcome.hit);
        assert_eq!(outcome.damage, 7);
        assert!(outcome.target_defeated);
        assert!(session.combatants[1].is_defeated());
        assert_eq!(session.combatants[1].defeated_by, Some(session.combatants[0].id));
        assert_eq!(session.combatants[0].damage_dealt, 7);
        assert!(outcome.narrative.contains("Goblin is defeated"));
    }

    #[test]
    fn test_natural_20_hits_and_doubles_dice() {
        let fx = Fixture::new();
        let mut session = fx.session(fighter(), &["ogre"]);

        let outcome = fx
            .resolver()
            .resolve(&mut session, 0, &CombatAction::Attack { target: None }, &mut ScriptedRoller::new([20, 6, 6]))
            .unwrap();

        assert!(outcome.critical);
        assert_eq!(outcome.damage, 15);
        assert_eq!(session.combatants[1].health.current(), 59 - 15);
    }

    #[test]
    fn test_natural_1_always_misses() {
        let fx = Fixture::new();
        let mut hero = fighter();
        hero.attack_bonus = 30;
        let mut session = fx.session(hero, &["goblin"]);

        let outcome = fx
            .resolver()
            .resolve(&mut session, 0, &CombatAction::Attack { target: None }, &mut ScriptedRoller::new([1]))
            .unwrap();

        assert!(!outcome.hit);
        assert_eq!(session.combatants[1].health.current(), 7);
    }

    #[test]
    fn test_defend_raises_armor_class_against_monster() {
        let fx = Fixture::new();
        let mut session = fx.session(fighter(), &["goblin"]);
        fx.resolver()
            .resolve(&mut session, 0, &CombatAction::Defend, &mut ScriptedRoller::new([]))
            .unwrap();
        assert!(session.combatants[0].defending);

        // goblin rolls 9 + 4 = 13: would hit AC 12, misses AC 14
        let outcome = fx
            .resolver()
            .monster_turn(&mut session, 1, &mut ScriptedRoller::new([9]))
            .unwrap();
        assert!(!outcome.hit);
        assert_eq!(session.combatants[0].health.current(), 20);
    }

    #[test]
    fn test_insufficient_mana_leaves_session_unchanged() {
        let fx = Fixture::new();
        let mut ilsa = mage();
        ilsa.mana = Pool::with_current(3, 10);
        let mut session = fx.session(ilsa, &["goblin"]);
        let before = session.combatants.clone();

        let err = fx
            .resolver()
            .resolve(
                &mut session,
                0,
                &CombatAction::CastSpell {
                    spell_id: "hold_person".into(),
                    target: None,
                },
                &mut ScriptedRoller::new([]),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            CombatError::InsufficientResource {
                resource: "mana",
                required: 5,
                available: 3
            }
        ));
        assert_eq!(session.combatants, before);
    }

    #[test]
    fn test_cast_sets_cooldown_and_blocks_recast() {
        let fx = Fixture::new();
        let mut session = fx.session(mage(), &["goblin"]);
        let action = CombatAction::CastSpell {
            spell_id: "hold_person".into(),
            target: None,
        };

        let outcome = fx
            .resolver()
            .resolve(&mut session, 0, &action, &mut ScriptedRoller::new([]))
            .unwrap();
        assert_eq!(outcome.applied_effects, vec!["Stunned".to_string()]);
        assert!(session.combatants[1].has_effect("stunned"));
        assert_eq!(session.combatants[0].mana.current(), 5);
        assert_eq!(session.combatants[0].cooldown("hold_person"), 3);

        let err = fx
            .resolver()
            .resolve(&mut session, 0, &action, &mut ScriptedRoller::new([]))
            .unwrap_err();
        assert!(matches!(err, CombatError::OnCooldown { remaining: 3, .. }));
        assert_eq!(session.combatants[0].mana.current(), 5);
    }

    #[test]
    fn test_beneficial_status_spell_targets_allies() {
        let mut catalog = ContentCatalog::standard();
        catalog
            .merge(ContentFile {
                spells: vec![SpellDef::spell(
                    "bless",
                    "Bless",
                    1,
                    SpellEffect::ApplyStatus {
                        status: "blessed".into(),
                        duration: 2,
                    },
                )],
                statuses: vec![StatusDef::new("blessed", "Blessed")
                    .with_modifiers(0, 1)
                    .beneficial()],
                ..ContentFile::default()
            })
            .unwrap();
        let fx = Fixture {
            catalog,
            config: EngineConfig::default(),
        };
        let mut ilsa = mage();
        ilsa.known_actions.push("bless".into());
        let mut session = fx.session(ilsa, &["goblin"]);
        let ilsa_id = session.combatants[0].id;
        let goblin = session.combatants[1].id;

        let outcome = fx
            .resolver()
            .resolve(
                &mut session,
                0,
                &CombatAction::CastSpell {
                    spell_id: "bless".into(),
                    target: None,
                },
                &mut ScriptedRoller::new([]),
            )
            .unwrap();
        assert_eq!(outcome.target_id, Some(ilsa_id));
        assert!(session.combatants[0].has_effect("blessed"));
        assert!(!session.combatants[1].has_effect("blessed"));

        let before = session.combatants.clone();
        let err = fx
            .resolver()
            .resolve(
                &mut session,
                0,
                &CombatAction::CastSpell {
                    spell_id: "bless".into(),
                    target: Some(goblin),
                },
                &mut ScriptedRoller::new([]),
            )
            .unwrap_err();
        assert!(matches!(err, CombatError::InvalidTarget(_)));
        assert_eq!(session.combatants, before);
    }

    #[test]
    fn test_unknown_and_mismatched_powers() {
        let fx = Fixture::new();
        let mut session = fx.session(fighter(), &["goblin"]);
        let resolver = fx.resolver();

        let err = resolver
            .resolve(
                &mut session,
                0,
                &CombatAction::CastSpell {
                    spell_id: "fire_bolt".into(),
                    target: None,
                },
                &mut ScriptedRoller::new([]),
            )
            .unwrap_err();
        assert!(matches!(err, CombatError::ActionNotKnown(_)));

        // second_wind is known, but it is an ability
        let err = resolver
            .resolve(
                &mut session,
                0,
                &CombatAction::CastSpell {
                    spell_id: "second_wind".into(),
                    target: None,
                },
                &mut ScriptedRoller::new([]),
            )
            .unwrap_err();
        assert!(matches!(err, CombatError::ActionNotKnown(_)));
    }

    #[test]
    fn test_heal_cannot_target_enemy_or_fallen_ally() {
        let fx = Fixture::new();
        let mut session = fx.session(mage(), &["goblin"]);
        let goblin = session.combatants[1].id;

        let err = fx
            .resolver()
            .resolve(
                &mut session,
                0,
                &CombatAction::CastSpell {
                    spell_id: "cure_wounds".into(),
                    target: Some(goblin),
                },
                &mut ScriptedRoller::new([]),
            )
            .unwrap_err();
        assert!(matches!(err, CombatError::InvalidTarget(_)));

        let mut party = fx.session(mage(), &["goblin"]);
        let mut fallen = fighter();
        fallen.health.drain(100);
        let fallen_id = fallen.id;
        party.combatants.push(fallen);
        let err = fx
            .resolver()
            .resolve(
                &mut party,
                0,
                &CombatAction::CastSpell {
                    spell_id: "cure_wounds".into(),
                    target: Some(fallen_id),
                },
                &mut ScriptedRoller::new([]),
            )
            .unwrap_err();
        assert!(matches!(err, CombatError::InvalidTarget(_)));
    }

    #[test]
    fn test_attack_rolled_spell_and_auto_hit_damage() {
        let fx = Fixture::new();
        let mut session = fx.session(mage(), &["orc"]);

        // fire bolt: 12 + 2 = 14 vs AC 13, 1d10 -> 8
        let outcome = fx
            .resolver()
            .resolve(
                &mut session,
                0,
                &CombatAction::CastSpell {
                    spell_id: "fire_bolt".into(),
                    target: None,
                },
                &mut ScriptedRoller::new([12, 8]),
            )
            .unwrap();
        assert!(outcome.hit);
        assert_eq!(outcome.damage, 8);

        // magic missile: 3d4+3 -> 15, only 7 health left
        let outcome = fx
            .resolver()
            .resolve(
                &mut session,
                0,
                &CombatAction::CastSpell {
                    spell_id: "magic_missile".into(),
                    target: None,
                },
                &mut ScriptedRoller::new([4, 4, 4]),
            )
            .unwrap();
        assert_eq!(outcome.damage, 7);
        assert!(outcome.target_defeated);
        assert_eq!(session.combatants[0].mana.current(), 10 - 2 - 3);
    }

    #[test]
    fn test_ability_heals_self_with_cooldown() {
        let fx = Fixture::new();
        let mut hero = fighter();
        hero.health.drain(15);
        let mut session = fx.session(hero, &["goblin"]);

        let outcome = fx
            .resolver()
            .resolve(
                &mut session,
                0,
                &CombatAction::UseAbility {
                    ability_id: "second_wind".into(),
                    target: None,
                },
                &mut ScriptedRoller::new([7]),
            )
            .unwrap();
        assert_eq!(outcome.healing, 8);
        assert_eq!(session.combatants[0].health.current(), 13);
        assert_eq!(session.combatants[0].cooldown("second_wind"), 5);
    }

    #[test]
    fn test_use_item() {
        let fx = Fixture::new();
        let mut hero = fighter();
        hero.health.drain(12);
        let mut session = fx.session(hero, &["goblin"]);
        let potion = CombatAction::UseItem {
            item_id: "healing_potion".into(),
            target: None,
        };

        // 2d4+2 -> 3 + 4 + 2
        let outcome = fx
            .resolver()
            .resolve(&mut session, 0, &potion, &mut ScriptedRoller::new([3, 4]))
            .unwrap();
        assert_eq!(outcome.healing, 9);
        assert_eq!(session.combatants[0].health.current(), 17);
        assert_eq!(session.combatants[0].charges("healing_potion"), 0);

        let err = fx
            .resolver()
            .resolve(&mut session, 0, &potion, &mut ScriptedRoller::new([]))
            .unwrap_err();
        assert!(matches!(err, CombatError::ItemNotUsable { .. }));
    }

    #[test]
    fn test_item_without_combat_effect() {
        let fx = Fixture::new();
        let mut hero = fighter();
        hero.consumables.insert("rusty_dagger".into(), 1);
        let mut session = fx.session(hero, &["goblin"]);

        let err = fx
            .resolver()
            .resolve(
                &mut session,
                0,
                &CombatAction::UseItem {
                    item_id: "rusty_dagger".into(),
                    target: None,
                },
                &mut ScriptedRoller::new([]),
            )
            .unwrap_err();
        assert!(matches!(err, CombatError::ItemNotUsable { ref reason, .. } if reason.contains("combat")));
        assert_eq!(session.combatants[0].charges("rusty_dagger"), 1);
    }

    #[test]
    fn test_antidote_cures_poison() {
        let fx = Fixture::new();
        let mut hero = fighter();
        hero.consumables.insert("antidote".into(), 2);
        hero.apply_effect(ActiveEffect::from_status(&fx.catalog.statuses["poisoned"], 3));
        let mut session = fx.session(hero, &["goblin"]);

        let outcome = fx
            .resolver()
            .resolve(
                &mut session,
                0,
                &CombatAction::UseItem {
                    item_id: "antidote".into(),
                    target: None,
                },
                &mut ScriptedRoller::new([]),
            )
            .unwrap();
        assert_eq!(outcome.cured_effects, vec!["Poisoned".to_string()]);
        assert!(!session.combatants[0].has_effect("poisoned"));
        assert_eq!(session.combatants[0].items_used["antidote"], 1);
    }

    #[test]
    fn test_failed_flee_consumes_nothing_else() {
        let fx = Fixture::new();
        let mut session = fx.session(fighter(), &["goblin"]);

        // 8 + 1 = 9 vs DC 15
        let outcome = fx
            .resolver()
            .resolve(&mut session, 0, &CombatAction::Flee, &mut ScriptedRoller::new([8]))
            .unwrap();
        assert!(!outcome.fled);
        assert!(session.is_active());
        assert_eq!(session.combatants[0].health.current(), 20);
    }

    #[test]
    fn test_successful_and_opposed_flee() {
        let fx = Fixture::new();
        let mut session = fx.session(fighter(), &["goblin"]);
        let outcome = fx
            .resolver()
            .resolve(&mut session, 0, &CombatAction::Flee, &mut ScriptedRoller::new([14]))
            .unwrap();
        assert!(outcome.fled);
        assert_eq!(session.state(), SessionState::Fled);

        let opposed = EngineConfig::default().with_flee_rule(FleeRule::Opposed);
        let resolver = ActionResolver::new(&fx.catalog, &opposed);
        let mut session = fx.session(fighter(), &["goblin", "wolf"]);
        // hero 10 + 1 = 11; goblin 5 + 2 = 7; wolf 10 + 2 = 12
        let outcome = resolver
            .resolve(&mut session, 0, &CombatAction::Flee, &mut ScriptedRoller::new([10, 5, 10]))
            .unwrap();
        assert!(!outcome.fled);
    }

    #[test]
    fn test_monster_targets_weakest_player() {
        let fx = Fixture::new();
        let mut session = fx.session(fighter(), &["goblin"]);
        let mut ilsa = Combatant::from_sheet(CharacterRef::new("friend"), &sample_mage("Ilsa"));
        ilsa.health.drain(2);
        let ilsa_id = ilsa.id;
        session.combatants.push(ilsa);

        let outcome = fx
            .resolver()
            .monster_turn(&mut session, 1, &mut ScriptedRoller::new([2]))
            .unwrap();
        assert_eq!(outcome.target_id, Some(ilsa_id));
    }

    #[test]
    fn test_cannot_attack_ally() {
        let fx = Fixture::new();
        let mut session = fx.session(fighter(), &["goblin"]);
        let own_id = session.combatants[0].id;
        let err = fx
            .resolver()
            .resolve(
                &mut session,
                0,
                &CombatAction::Attack { target: Some(own_id) },
                &mut ScriptedRoller::new([]),
            )
            .unwrap_err();
        assert!(matches!(err, CombatError::InvalidTarget(_)));
    }

    #[test]
    fn test_action_serde_shape() {
        let action: CombatAction =
            serde_json::from_str(r#"{ "action": "cast_spell", "spell_id": "fire_bolt" }"#).unwrap();
        assert_eq!(
            action,
            CombatAction::CastSpell {
                spell_id: "fire_bolt".into(),
                target: None
            }
        );
        let defend: CombatAction = serde_json::from_str(r#"{ "action": "defend" }"#).unwrap();
        assert_eq!(defend.kind(), ActionKind::Defend);
    }
}
