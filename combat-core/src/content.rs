//! Static combat content: monsters, spells and abilities, items, status effects.
//!
//! Content is declarative data. It is loaded from JSON into typed lookup
//! tables at startup; the engine only knows a handful of effect kinds and
//! never special-cases an individual spell or item.
//!
//! A JSON content file looks like:
//!
//! ```json
//! {
//!   "monsters": [{ "id": "goblin", "name": "Goblin", "health": 7, "armor_class": 13,
//!                  "attack_bonus": 4, "damage": "1d6+2", "xp": 50, "gold": 5 }],
//!   "spells":   [{ "id": "fire_bolt", "name": "Fire Bolt", "kind": "spell", "mana_cost": 2,
//!                  "effect": { "kind": "damage", "formula": "1d10", "attack_roll": true } }],
//!   "items":    [{ "id": "healing_potion", "name": "Potion of Healing",
//!                  "combat_effect": { "kind": "heal", "formula": "2d4+2" } }],
//!   "statuses": [{ "id": "stunned", "name": "Stunned", "skip_turn": true }]
//! }
//! ```

use crate::dice::DiceExpression;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use tokio::fs;

/// Errors from loading content tables.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("duplicate {kind} id '{id}'")]
    Duplicate { kind: &'static str, id: String },

    #[error("{owner} references unknown {kind} '{id}'")]
    DanglingReference {
        owner: String,
        kind: &'static str,
        id: String,
    },
}

fn dice(count: u32, sides: u32, modifier: i32) -> DiceExpression {
    DiceExpression {
        count,
        sides,
        modifier,
    }
}

// ============================================================================
// Monsters
// ============================================================================

/// A possible drop from a monster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootEntry {
    pub item_id: String,
    /// Drop chance, rolled against a d100.
    pub chance_percent: u8,
}

/// What a monster is worth when defeated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounty {
    pub xp: u32,
    pub gold: u32,
    pub loot: Vec<LootEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonsterDef {
    pub id: String,
    pub name: String,
    #[serde(default = "default_level")]
    pub level: u32,
    pub health: u32,
    pub armor_class: u32,
    pub attack_bonus: i32,
    pub damage: DiceExpression,
    #[serde(default)]
    pub dexterity_modifier: i32,
    #[serde(default)]
    pub xp: u32,
    #[serde(default)]
    pub gold: u32,
    #[serde(default)]
    pub loot: Vec<LootEntry>,
}

fn default_level() -> u32 {
    1
}

impl MonsterDef {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        health: u32,
        armor_class: u32,
        attack_bonus: i32,
        damage: DiceExpression,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            level: 1,
            health,
            armor_class,
            attack_bonus,
            damage,
            dexterity_modifier: 0,
            xp: 0,
            gold: 0,
            loot: Vec::new(),
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn with_dexterity(mut self, modifier: i32) -> Self {
        self.dexterity_modifier = modifier;
        self
    }

    pub fn with_bounty(mut self, xp: u32, gold: u32) -> Self {
        self.xp = xp;
        self.gold = gold;
        self
    }

    pub fn with_loot(mut self, item_id: impl Into<String>, chance_percent: u8) -> Self {
        self.loot.push(LootEntry {
            item_id: item_id.into(),
            chance_percent: chance_percent.min(100),
        });
        self
    }

    pub fn bounty(&self) -> Bounty {
        Bounty {
            xp: self.xp,
            gold: self.gold,
            loot: self.loot.clone(),
        }
    }
}

// ============================================================================
// Spells and abilities
// ============================================================================

/// Spells and abilities share a table; the kind decides which action uses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpellKind {
    Spell,
    Ability,
}

impl SpellKind {
    pub fn name(&self) -> &'static str {
        match self {
            SpellKind::Spell => "spell",
            SpellKind::Ability => "ability",
        }
    }
}

/// The effect a spell or ability resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpellEffect {
    /// Deal damage. With `attack_roll` the caster rolls to hit like a weapon attack.
    Damage {
        formula: DiceExpression,
        #[serde(default)]
        attack_roll: bool,
    },
    Heal {
        formula: DiceExpression,
    },
    ApplyStatus {
        status: String,
        duration: u32,
    },
    Buff {
        #[serde(default)]
        armor_class: i32,
        #[serde(default)]
        attack: i32,
        duration: u32,
    },
}

impl SpellEffect {
    /// Harmful effects target the opposing side, beneficial ones the caster's side.
    /// A status effect is as harmful as the status it applies.
    pub fn is_harmful(&self, status: Option<&StatusDef>) -> bool {
        match self {
            SpellEffect::Damage { .. } => true,
            SpellEffect::ApplyStatus { .. } => status.map_or(true, |s| s.harmful),
            SpellEffect::Heal { .. } | SpellEffect::Buff { .. } => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpellDef {
    pub id: String,
    pub name: String,
    pub kind: SpellKind,
    #[serde(default)]
    pub mana_cost: u32,
    /// Turns before the spell can be used again.
    #[serde(default)]
    pub cooldown: u32,
    pub effect: SpellEffect,
}

impl SpellDef {
    pub fn spell(
        id: impl Into<String>,
        name: impl Into<String>,
        mana_cost: u32,
        effect: SpellEffect,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: SpellKind::Spell,
            mana_cost,
            cooldown: 0,
            effect,
        }
    }

    pub fn ability(id: impl Into<String>, name: impl Into<String>, effect: SpellEffect) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: SpellKind::Ability,
            mana_cost: 0,
            cooldown: 0,
            effect,
        }
    }

    pub fn with_cooldown(mut self, turns: u32) -> Self {
        self.cooldown = turns;
        self
    }

    pub fn with_mana_cost(mut self, cost: u32) -> Self {
        self.mana_cost = cost;
        self
    }
}

// ============================================================================
// Items
// ============================================================================

/// What a consumable does when used in combat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemEffect {
    Heal {
        formula: DiceExpression,
    },
    RestoreMana {
        formula: DiceExpression,
    },
    Buff {
        #[serde(default)]
        armor_class: i32,
        #[serde(default)]
        attack: i32,
        duration: u32,
    },
    /// Remove harmful statuses; an empty list cures all of them.
    Cure {
        #[serde(default)]
        statuses: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub combat_effect: Option<ItemEffect>,
}

impl ItemDef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            combat_effect: None,
        }
    }

    pub fn with_effect(mut self, effect: ItemEffect) -> Self {
        self.combat_effect = Some(effect);
        self
    }
}

// ============================================================================
// Status effects
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDef {
    pub id: String,
    pub name: String,
    /// The bearer loses its turn while this is active.
    #[serde(default)]
    pub skip_turn: bool,
    #[serde(default)]
    pub damage_per_turn: Option<DiceExpression>,
    #[serde(default)]
    pub armor_class: i32,
    #[serde(default)]
    pub attack: i32,
    #[serde(default = "default_harmful")]
    pub harmful: bool,
}

fn default_harmful() -> bool {
    true
}

impl StatusDef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            skip_turn: false,
            damage_per_turn: None,
            armor_class: 0,
            attack: 0,
            harmful: true,
        }
    }

    pub fn skipping_turns(mut self) -> Self {
        self.skip_turn = true;
        self
    }

    pub fn with_damage_per_turn(mut self, formula: DiceExpression) -> Self {
        self.damage_per_turn = Some(formula);
        self
    }

    pub fn with_modifiers(mut self, armor_class: i32, attack: i32) -> Self {
        self.armor_class = armor_class;
        self.attack = attack;
        self
    }

    pub fn beneficial(mut self) -> Self {
        self.harmful = false;
        self
    }
}

// ============================================================================
// Lookup
// ============================================================================

/// Read access to content tables.
pub trait ContentLookup: Send + Sync {
    fn monster(&self, id: &str) -> Option<&MonsterDef>;
    fn spell(&self, id: &str) -> Option<&SpellDef>;
    fn item(&self, id: &str) -> Option<&ItemDef>;
    fn status(&self, id: &str) -> Option<&StatusDef>;
}

/// On-disk shape of a content file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentFile {
    #[serde(default)]
    pub monsters: Vec<MonsterDef>,
    #[serde(default)]
    pub spells: Vec<SpellDef>,
    #[serde(default)]
    pub items: Vec<ItemDef>,
    #[serde(default)]
    pub statuses: Vec<StatusDef>,
}

/// In-memory content tables keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ContentCatalog {
    pub monsters: HashMap<String, MonsterDef>,
    pub spells: HashMap<String, SpellDef>,
    pub items: HashMap<String, ItemDef>,
    pub statuses: HashMap<String, StatusDef>,
}

fn check_unique<'a, T>(
    table: &HashMap<String, T>,
    kind: &'static str,
    ids: impl IntoIterator<Item = &'a str>,
) -> Result<(), ContentError> {
    let mut seen = HashSet::new();
    for id in ids {
        if table.contains_key(id) || !seen.insert(id) {
            return Err(ContentError::Duplicate {
                kind,
                id: id.to_string(),
            });
        }
    }
    Ok(())
}

impl ContentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in tables shipped with the engine.
    pub fn standard() -> Self {
        STANDARD_CONTENT.clone()
    }

    /// Parse and validate a single JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ContentError> {
        let file: ContentFile = serde_json::from_str(json)?;
        let mut catalog = Self::new();
        catalog.merge(file)?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load and validate a single JSON file.
    pub async fn load_file(path: impl AsRef<Path>) -> Result<Self, ContentError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json_str(&content)
    }

    /// Load every `*.json` file in a directory into one catalog.
    ///
    /// Files are merged in name order; ids must be unique across files.
    pub async fn load_dir(dir: impl AsRef<Path>) -> Result<Self, ContentError> {
        let mut paths = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut catalog = Self::new();
        for path in paths {
            let content = fs::read_to_string(&path).await?;
            let file: ContentFile = serde_json::from_str(&content)?;
            catalog.merge(file)?;
        }
        catalog.validate()?;
        Ok(catalog)
    }

    /// Add every definition from a content file. Ids must not already exist.
    pub fn merge(&mut self, file: ContentFile) -> Result<(), ContentError> {
        check_unique(
            &self.monsters,
            "monster",
            file.monsters.iter().map(|m| m.id.as_str()),
        )?;
        check_unique(&self.spells, "spell", file.spells.iter().map(|s| s.id.as_str()))?;
        check_unique(&self.items, "item", file.items.iter().map(|i| i.id.as_str()))?;
        check_unique(
            &self.statuses,
            "status",
            file.statuses.iter().map(|s| s.id.as_str()),
        )?;

        self.monsters
            .extend(file.monsters.into_iter().map(|m| (m.id.clone(), m)));
        self.spells
            .extend(file.spells.into_iter().map(|s| (s.id.clone(), s)));
        self.items
            .extend(file.items.into_iter().map(|i| (i.id.clone(), i)));
        self.statuses
            .extend(file.statuses.into_iter().map(|s| (s.id.clone(), s)));
        Ok(())
    }

    /// Check that every cross-reference points at an existing definition.
    pub fn validate(&self) -> Result<(), ContentError> {
        for spell in self.spells.values() {
            if let SpellEffect::ApplyStatus { status, .. } = &spell.effect {
                if !self.statuses.contains_key(status) {
                    return Err(ContentError::DanglingReference {
                        owner: format!("spell '{}'", spell.id),
                        kind: "status",
                        id: status.clone(),
                    });
                }
            }
        }
        for monster in self.monsters.values() {
            for entry in &monster.loot {
                if !self.items.contains_key(&entry.item_id) {
                    return Err(ContentError::DanglingReference {
                        owner: format!("monster '{}'", monster.id),
                        kind: "item",
                        id: entry.item_id.clone(),
                    });
                }
            }
        }
        for item in self.items.values() {
            if let Some(ItemEffect::Cure { statuses }) = &item.combat_effect {
                if let Some(missing) = statuses.iter().find(|s| !self.statuses.contains_key(*s)) {
                    return Err(ContentError::DanglingReference {
                        owner: format!("item '{}'", item.id),
                        kind: "status",
                        id: missing.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl ContentLookup for ContentCatalog {
    fn monster(&self, id: &str) -> Option<&MonsterDef> {
        self.monsters.get(id)
    }

    fn spell(&self, id: &str) -> Option<&SpellDef> {
        self.spells.get(id)
    }

    fn item(&self, id: &str) -> Option<&ItemDef> {
        self.items.get(id)
    }

    fn status(&self, id: &str) -> Option<&StatusDef> {
        self.statuses.get(id)
    }
}

// ============================================================================
// Standard content
// ============================================================================

lazy_static::lazy_static! {
    /// Standard monsters.
    pub static ref MONSTERS: Vec<MonsterDef> = vec![
        MonsterDef::new("goblin", "Goblin", 7, 13, 4, dice(1, 6, 2))
            .with_dexterity(2)
            .with_bounty(50, 5)
            .with_loot("healing_potion", 25),
        MonsterDef::new("wolf", "Wolf", 11, 13, 4, dice(2, 4, 2))
            .with_dexterity(2)
            .with_bounty(50, 0),
        MonsterDef::new("skeleton", "Skeleton", 13, 13, 4, dice(1, 6, 2))
            .with_dexterity(2)
            .with_bounty(50, 3)
            .with_loot("rusty_dagger", 40),
        MonsterDef::new("orc", "Orc", 15, 13, 5, dice(1, 12, 3))
            .with_level(2)
            .with_dexterity(1)
            .with_bounty(100, 12)
            .with_loot("healing_potion", 30),
        MonsterDef::new("giant_spider", "Giant Spider", 26, 14, 5, dice(1, 8, 3))
            .with_level(3)
            .with_dexterity(3)
            .with_bounty(200, 20)
            .with_loot("antidote", 50),
        MonsterDef::new("ogre", "Ogre", 59, 11, 6, dice(2, 8, 4))
            .with_level(5)
            .with_dexterity(-1)
            .with_bounty(450, 40)
            .with_loot("greater_healing_potion", 50),
    ];

    /// Standard spells and abilities.
    pub static ref SPELLS: Vec<SpellDef> = vec![
        SpellDef::spell("fire_bolt", "Fire Bolt", 2, SpellEffect::Damage {
            formula: dice(1, 10, 0),
            attack_roll: true,
        }),
        SpellDef::spell("magic_missile", "Magic Missile", 3, SpellEffect::Damage {
            formula: dice(3, 4, 3),
            attack_roll: false,
        }),
        SpellDef::spell("cure_wounds", "Cure Wounds", 4, SpellEffect::Heal {
            formula: dice(1, 8, 3),
        }),
        SpellDef::spell("poison_spray", "Poison Spray", 2, SpellEffect::ApplyStatus {
            status: "poisoned".to_string(),
            duration: 3,
        }),
        SpellDef::spell("hold_person", "Hold Person", 5, SpellEffect::ApplyStatus {
            status: "stunned".to_string(),
            duration: 1,
        })
        .with_cooldown(3),
        SpellDef::spell("shield", "Shield", 3, SpellEffect::Buff {
            armor_class: 5,
            attack: 0,
            duration: 1,
        })
        .with_cooldown(2),
        SpellDef::ability("second_wind", "Second Wind", SpellEffect::Heal {
            formula: dice(1, 10, 1),
        })
        .with_cooldown(5),
        SpellDef::ability("power_strike", "Power Strike", SpellEffect::Damage {
            formula: dice(2, 6, 3),
            attack_roll: true,
        })
        .with_cooldown(3),
        SpellDef::ability("battle_cry", "Battle Cry", SpellEffect::Buff {
            armor_class: 0,
            attack: 2,
            duration: 3,
        })
        .with_cooldown(4),
    ];

    /// Standard items.
    pub static ref ITEMS: Vec<ItemDef> = vec![
        ItemDef::new("healing_potion", "Potion of Healing")
            .with_effect(ItemEffect::Heal { formula: dice(2, 4, 2) }),
        ItemDef::new("greater_healing_potion", "Potion of Greater Healing")
            .with_effect(ItemEffect::Heal { formula: dice(4, 4, 4) }),
        ItemDef::new("mana_potion", "Mana Potion")
            .with_effect(ItemEffect::RestoreMana { formula: dice(2, 4, 2) }),
        ItemDef::new("antidote", "Antidote")
            .with_effect(ItemEffect::Cure { statuses: vec!["poisoned".to_string()] }),
        ItemDef::new("elixir_of_iron", "Elixir of Iron")
            .with_effect(ItemEffect::Buff { armor_class: 2, attack: 0, duration: 3 }),
        ItemDef::new("rusty_dagger", "Rusty Dagger"),
    ];

    /// Standard status effects.
    pub static ref STATUSES: Vec<StatusDef> = vec![
        StatusDef::new("poisoned", "Poisoned").with_damage_per_turn(dice(1, 4, 0)),
        StatusDef::new("burning", "Burning").with_damage_per_turn(dice(1, 6, 0)),
        StatusDef::new("stunned", "Stunned").skipping_turns(),
        StatusDef::new("weakened", "Weakened").with_modifiers(0, -2),
    ];

    static ref STANDARD_CONTENT: ContentCatalog = {
        let mut catalog = ContentCatalog::new();
        catalog.monsters = MONSTERS.iter().map(|m| (m.id.clone(), m.clone())).collect();
        catalog.spells = SPELLS.iter().map(|s| (s.id.clone(), s.clone())).collect();
        catalog.items = ITEMS.iter().map(|i| (i.id.clone(), i.clone())).collect();
        catalog.statuses = STATUSES.iter().map(|s| (s.id.clone(), s.clone())).collect();
        catalog
    };
}
