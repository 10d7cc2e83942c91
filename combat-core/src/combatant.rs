//! Combat participants.
//!
//! A [`Combatant`] is a snapshot of a character or monster taken when the
//! session starts. The session owns it; the character sheet or monster
//! template it came from is only referenced through [`IdentityRef`].

use crate::collaborators::CharacterSheet;
use crate::content::{Bounty, MonsterDef, StatusDef};
use crate::dice::DiceExpression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a combatant within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CombatantId(pub Uuid);

impl CombatantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CombatantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CombatantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a player character, as known to the bot (the owning user id
/// or the character document id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharacterRef(pub String);

impl CharacterRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for CharacterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Back-reference to whatever a combatant was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityRef {
    Character(CharacterRef),
    Monster(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CombatantKind {
    Player,
    Monster,
}

impl CombatantKind {
    pub fn name(&self) -> &'static str {
        match self {
            CombatantKind::Player => "player",
            CombatantKind::Monster => "monster",
        }
    }
}

// ============================================================================
// Resource pools
// ============================================================================

/// A bounded resource such as health or mana. `current` never exceeds `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPool")]
pub struct Pool {
    current: u32,
    max: u32,
}

/// Stored form of a [`Pool`], clamped on load.
#[derive(Deserialize)]
struct RawPool {
    current: u32,
    max: u32,
}

impl From<RawPool> for Pool {
    fn from(raw: RawPool) -> Self {
        Pool::with_current(raw.current, raw.max)
    }
}

impl Pool {
    /// A full pool.
    pub fn new(max: u32) -> Self {
        Self { current: max, max }
    }

    /// A pool at a given level, clamped to `max`.
    pub fn with_current(current: u32, max: u32) -> Self {
        Self {
            current: current.min(max),
            max,
        }
    }

    pub fn empty() -> Self {
        Self { current: 0, max: 0 }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn is_depleted(&self) -> bool {
        self.current == 0
    }

    /// Remove up to `amount`, returning how much was actually removed.
    pub fn drain(&mut self, amount: u32) -> u32 {
        let removed = amount.min(self.current);
        self.current -= removed;
        removed
    }

    /// Add up to `amount`, returning how much was actually restored.
    pub fn restore(&mut self, amount: u32) -> u32 {
        let restored = amount.min(self.max.saturating_sub(self.current));
        self.current += restored;
        restored
    }

    /// Spend exactly `amount`, or nothing if there is not enough.
    pub fn spend(&mut self, amount: u32) -> bool {
        if self.current < amount {
            return false;
        }
        self.current -= amount;
        true
    }

    pub fn ratio(&self) -> f32 {
        if self.max == 0 {
            return 0.0;
        }
        self.current as f32 / self.max as f32
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.current, self.max)
    }
}

// ============================================================================
// Status effects
// ============================================================================

/// A timed effect attached to a combatant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEffect {
    pub effect_id: String,
    pub name: String,
    /// Turns left, ticked at the start of the bearer's turn.
    pub remaining: u32,
    pub skip_turn: bool,
    pub damage_per_turn: Option<DiceExpression>,
    pub armor_class_modifier: i32,
    pub attack_modifier: i32,
    pub harmful: bool,
}

impl ActiveEffect {
    pub fn from_status(status: &StatusDef, duration: u32) -> Self {
        Self {
            effect_id: status.id.clone(),
            name: status.name.clone(),
            remaining: duration,
            skip_turn: status.skip_turn,
            damage_per_turn: status.damage_per_turn.clone(),
            armor_class_modifier: status.armor_class,
            attack_modifier: status.attack,
            harmful: status.harmful,
        }
    }

    /// A beneficial modifier granted by a spell or item.
    pub fn buff(
        id: impl Into<String>,
        name: impl Into<String>,
        armor_class: i32,
        attack: i32,
        duration: u32,
    ) -> Self {
        Self {
            effect_id: id.into(),
            name: name.into(),
            remaining: duration,
            skip_turn: false,
            damage_per_turn: None,
            armor_class_modifier: armor_class,
            attack_modifier: attack,
            harmful: false,
        }
    }
}

// ============================================================================
// Combatant
// ============================================================================

/// Progression values a player brought into combat, used to compute rewards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub level: u32,
    pub experience: u32,
    pub gold: u64,
    pub deaths: u32,
}

/// A participant in a combat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combatant {
    pub id: CombatantId,
    pub name: String,
    pub kind: CombatantKind,
    pub identity: IdentityRef,
    pub health: Pool,
    pub mana: Pool,
    pub armor_class: u32,
    pub attack_bonus: i32,
    pub damage_formula: DiceExpression,
    pub dexterity_modifier: i32,
    pub initiative: i32,
    pub status_effects: Vec<ActiveEffect>,
    pub cooldowns: BTreeMap<String, u32>,
    pub defending: bool,
    /// Spell and ability ids this combatant may use.
    pub known_actions: Vec<String>,
    /// Consumable charges carried into combat.
    pub consumables: BTreeMap<String, u32>,
    /// Charges spent during this session.
    pub items_used: BTreeMap<String, u32>,
    /// Total damage dealt, used to break reward ties.
    pub damage_dealt: u32,
    pub progress: Option<ProgressSnapshot>,
    pub bounty: Option<Bounty>,
    pub defeated_by: Option<CombatantId>,
}

impl Combatant {
    /// Snapshot a player character for combat.
    pub fn from_sheet(character: CharacterRef, sheet: &CharacterSheet) -> Self {
        let mut known_actions = sheet.spells.clone();
        known_actions.extend(sheet.abilities.iter().cloned());

        Self {
            id: CombatantId::new(),
            name: sheet.name.clone(),
            kind: CombatantKind::Player,
            identity: IdentityRef::Character(character),
            health: sheet.health,
            mana: sheet.mana,
            armor_class: sheet.armor_class,
            attack_bonus: sheet.attack_bonus,
            damage_formula: sheet.damage.clone(),
            dexterity_modifier: sheet.dexterity_modifier,
            initiative: 0,
            status_effects: Vec::new(),
            cooldowns: BTreeMap::new(),
            defending: false,
            known_actions,
            consumables: sheet
                .consumables
                .iter()
                .filter(|(_, &count)| count > 0)
                .map(|(id, &count)| (id.clone(), count))
                .collect(),
            items_used: BTreeMap::new(),
            damage_dealt: 0,
            progress: Some(ProgressSnapshot {
                level: sheet.level,
                experience: sheet.experience,
                gold: sheet.gold,
                deaths: sheet.deaths,
            }),
            bounty: None,
            defeated_by: None,
        }
    }

    /// Spawn a monster from its template.
    pub fn from_monster(monster: &MonsterDef) -> Self {
        Self {
            id: CombatantId::new(),
            name: monster.name.clone(),
            kind: CombatantKind::Monster,
            identity: IdentityRef::Monster(monster.id.clone()),
            health: Pool::new(monster.health),
            mana: Pool::empty(),
            armor_class: monster.armor_class,
            attack_bonus: monster.attack_bonus,
            damage_formula: monster.damage.clone(),
            dexterity_modifier: monster.dexterity_modifier,
            initiative: 0,
            status_effects: Vec::new(),
            cooldowns: BTreeMap::new(),
            defending: false,
            known_actions: Vec::new(),
            consumables: BTreeMap::new(),
            items_used: BTreeMap::new(),
            damage_dealt: 0,
            progress: None,
            bounty: Some(monster.bounty()),
            defeated_by: None,
        }
    }

    pub fn is_player(&self) -> bool {
        self.kind == CombatantKind::Player
    }

    pub fn is_defeated(&self) -> bool {
        self.health.is_depleted()
    }

    pub fn is_alive(&self) -> bool {
        !self.is_defeated()
    }

    pub fn character(&self) -> Option<&CharacterRef> {
        match &self.identity {
            IdentityRef::Character(character) => Some(character),
            IdentityRef::Monster(_) => None,
        }
    }

    pub fn monster_id(&self) -> Option<&str> {
        match &self.identity {
            IdentityRef::Monster(id) => Some(id),
            IdentityRef::Character(_) => None,
        }
    }

    /// Armor class after status modifiers and the defend bonus, never below 0.
    pub fn effective_armor_class(&self, defend_bonus: i32) -> i32 {
        let modifiers: i32 = self
            .status_effects
            .iter()
            .map(|e| e.armor_class_modifier)
            .sum();
        let defend = if self.defending { defend_bonus } else { 0 };
        (self.armor_class as i32 + modifiers + defend).max(0)
    }

    pub fn effective_attack_bonus(&self) -> i32 {
        self.attack_bonus
            + self
                .status_effects
                .iter()
                .map(|e| e.attack_modifier)
                .sum::<i32>()
    }

    pub fn cooldown(&self, action_id: &str) -> u32 {
        self.cooldowns.get(action_id).copied().unwrap_or(0)
    }

    pub fn knows(&self, action_id: &str) -> bool {
        self.known_actions.iter().any(|a| a == action_id)
    }

    pub fn has_effect(&self, effect_id: &str) -> bool {
        self.status_effects.iter().any(|e| e.effect_id == effect_id)
    }

    pub fn charges(&self, item_id: &str) -> u32 {
        self.consumables.get(item_id).copied().unwrap_or(0)
    }

    /// Attach an effect. Re-applying an effect refreshes its duration instead
    /// of stacking it.
    pub fn apply_effect(&mut self, effect: ActiveEffect) {
        if effect.remaining == 0 {
            return;
        }
        match self
            .status_effects
            .iter_mut()
            .find(|e| e.effect_id == effect.effect_id)
        {
            Some(existing) => existing.remaining = existing.remaining.max(effect.remaining),
            None => self.status_effects.push(effect),
        }
    }

    /// Remove harmful effects. An empty filter cures every harmful effect.
    /// Returns the names of the removed effects.
    pub fn cure(&mut self, filter: &[String]) -> Vec<String> {
        let mut removed = Vec::new();
        self.status_effects.retain(|e| {
            let targeted = e.harmful && (filter.is_empty() || filter.contains(&e.effect_id));
            if targeted {
                removed.push(e.name.clone());
            }
            !targeted
        });
        removed
    }

    /// Spend one charge of a consumable.
    pub(crate) fn consume_charge(&mut self, item_id: &str) -> bool {
        match self.consumables.get_mut(item_id) {
            Some(count) if *count > 0 => {
                *count -= 1;
                if *count == 0 {
                    self.consumables.remove(item_id);
                }
                *self.items_used.entry(item_id.to_string()).or_insert(0) += 1;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentCatalog;
    use crate::testing::sample_fighter;

    #[test]
    fn test_pool_clamps() {
        let mut hp = Pool::new(20);
        assert_eq!(hp.drain(25), 20);
        assert_eq!(hp.current(), 0);
        assert!(hp.is_depleted());

        assert_eq!(hp.restore(50), 20);
        assert_eq!(hp.current(), 20);

        let mana = Pool::with_current(30, 10);
        assert_eq!(mana.current(), 10);
    }

    #[test]
    fn test_stored_pool_is_clamped_on_load() {
        let hp: Pool = serde_json::from_str(r#"{"current":30,"max":12}"#).unwrap();
        assert_eq!(hp.current(), 12);
        assert_eq!(hp.max(), 12);
    }

    #[test]
    fn test_overfull_sheet_heals_without_overflow() {
        let mut sheet = sample_fighter("Roland");
        let mut json = serde_json::to_value(&sheet).unwrap();
        json["health"] = serde_json::json!({ "current": 30, "max": 12 });
        sheet = serde_json::from_value(json).unwrap();

        let mut hero = Combatant::from_sheet(CharacterRef::new("u1"), &sheet);
        assert_eq!(hero.health.to_string(), "12/12");
        assert_eq!(hero.health.restore(5), 0);
        assert_eq!(hero.health.current(), 12);
    }

    #[test]
    fn test_pool_spend_is_all_or_nothing() {
        let mut mana = Pool::with_current(3, 10);
        assert!(!mana.spend(5));
        assert_eq!(mana.current(), 3);
        assert!(mana.spend(3));
        assert_eq!(mana.current(), 0);
    }

    #[test]
    fn test_effective_armor_class() {
        let catalog = ContentCatalog::standard();
        let mut goblin = Combatant::from_monster(catalog.monsters.get("goblin").unwrap());
        assert_eq!(goblin.effective_armor_class(2), 13);

        goblin.defending = true;
        assert_eq!(goblin.effective_armor_class(2), 15);

        goblin.apply_effect(ActiveEffect::buff("shield", "Shield", 5, 0, 1));
        assert_eq!(goblin.effective_armor_class(2), 20);
    }

    #[test]
    fn test_reapplying_effect_refreshes() {
        let catalog = ContentCatalog::standard();
        let poison = catalog.statuses.get("poisoned").unwrap();
        let mut hero = Combatant::from_sheet(CharacterRef::new("u1"), &sample_fighter("Roland"));

        hero.apply_effect(ActiveEffect::from_status(poison, 2));
        hero.apply_effect(ActiveEffect::from_status(poison, 3));
        assert_eq!(hero.status_effects.len(), 1);
        assert_eq!(hero.status_effects[0].remaining, 3);

        hero.apply_effect(ActiveEffect::buff("bless", "Bless", 0, 1, 2));
        let cured = hero.cure(&[]);
        assert_eq!(cured, vec![poison.name.clone()]);
        assert!(hero.has_effect("bless"));
    }

    #[test]
    fn test_consume_charge() {
        let mut hero = Combatant::from_sheet(CharacterRef::new("u1"), &sample_fighter("Roland"));
        assert_eq!(hero.charges("healing_potion"), 1);
        assert!(hero.consume_charge("healing_potion"));
        assert!(!hero.consume_charge("healing_potion"));
        assert_eq!(hero.items_used.get("healing_potion"), Some(&1));
    }
}
