//! Fight driver for the simulator.
//!
//! Commands are read one per line from stdin:
//! - `attack`, `cast`, `ability`, `use`, `defend` and `flee` submit an action
//! - Lines starting with `#` are commands (status, quit)
//!
//! With `--auto` every hero acts on [`choose_action`] instead.

use anyhow::{bail, Context, Result};
use combat_core::collaborators::CharacterSheet;
use combat_core::content::{ItemEffect, SpellDef, SpellEffect, SpellKind};
use combat_core::testing::{sample_fighter, sample_mage, InMemoryCharacterStore};
use combat_core::{
    CharacterRef, CombatAction, CombatEngine, CombatRenderer, CombatSession, Combatant,
    CombatantId, ContentCatalog, ContentLookup, EndReason, EngineConfig, EntropyRollers,
    Participant, RewardReport, RollerFactory, SeededRollers, SessionKey, TextRenderer,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const HERO_NAMES: [&str; 4] = ["Aria", "Borin", "Cael", "Dara"];

/// Below this share of health the automatic policy heals.
const HEAL_THRESHOLD: f32 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeroClass {
    Fighter,
    Mage,
}

impl HeroClass {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fighter" | "warrior" => Some(HeroClass::Fighter),
            "mage" | "wizard" => Some(HeroClass::Mage),
            _ => None,
        }
    }

    fn sheet(self, name: &str) -> CharacterSheet {
        match self {
            HeroClass::Fighter => sample_fighter(name),
            HeroClass::Mage => sample_mage(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    pub heroes: Vec<HeroClass>,
    pub monsters: Vec<String>,
    pub seed: Option<u64>,
    pub content_dir: Option<PathBuf>,
    pub auto: bool,
}

/// Parse command line arguments. The first element is the program name.
pub fn parse_config_from_args(args: &[String]) -> Result<SimConfig> {
    let mut config = SimConfig {
        heroes: Vec::new(),
        monsters: Vec::new(),
        seed: None,
        content_dir: None,
        auto: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--hero" => {
                let value = value_of(args, i)?;
                let class = HeroClass::parse(value)
                    .with_context(|| format!("unknown hero class '{value}'"))?;
                config.heroes.push(class);
                i += 1;
            }
            "--monster" => {
                config.monsters.push(value_of(args, i)?.to_string());
                i += 1;
            }
            "--seed" => {
                let value = value_of(args, i)?;
                config.seed = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid seed '{value}'"))?,
                );
                i += 1;
            }
            "--content" => {
                config.content_dir = Some(PathBuf::from(value_of(args, i)?));
                i += 1;
            }
            "--auto" => config.auto = true,
            other => bail!("unknown argument '{other}' (try --help)"),
        }
        i += 1;
    }

    if config.heroes.is_empty() {
        config.heroes.push(HeroClass::Fighter);
    }
    if config.monsters.is_empty() {
        config.monsters.push("goblin".to_string());
    }
    if config.heroes.len() > HERO_NAMES.len() {
        bail!("at most {} heroes are supported", HERO_NAMES.len());
    }
    Ok(config)
}

fn value_of(args: &[String], flag: usize) -> Result<&str> {
    args.get(flag + 1)
        .map(String::as_str)
        .with_context(|| format!("{} needs a value", args[flag]))
}

// ============================================================================
// Running a fight
// ============================================================================

pub async fn run(config: SimConfig) -> Result<()> {
    let engine_config = EngineConfig::from_env().context("invalid COMBAT_* setting")?;
    let catalog = match &config.content_dir {
        Some(dir) => ContentCatalog::load_dir(dir)
            .await
            .with_context(|| format!("failed to load content from {}", dir.display()))?,
        None => ContentCatalog::standard(),
    };
    let catalog = Arc::new(catalog);

    let store = Arc::new(InMemoryCharacterStore::new());
    let mut participants = Vec::new();
    let mut heroes = Vec::new();
    for (class, name) in config.heroes.iter().zip(HERO_NAMES) {
        let id = name.to_lowercase();
        store.insert(id.clone(), class.sheet(name));
        heroes.push(id.clone());
        participants.push(Participant::Character(CharacterRef::new(id)));
    }
    participants.extend(config.monsters.iter().cloned().map(Participant::Monster));

    let rollers: Arc<dyn RollerFactory> = match config.seed {
        Some(seed) => Arc::new(SeededRollers(seed)),
        None => Arc::new(EntropyRollers),
    };
    let engine = CombatEngine::new(engine_config, catalog.clone(), store.clone())
        .with_rollers(rollers);
    let renderer = TextRenderer {
        log_lines: 8,
        ..TextRenderer::default()
    };

    let key = SessionKey::new("sim");
    let start = engine.start_combat(key.clone(), participants).await?;
    info!(seed = ?config.seed, auto = config.auto, "simulation started");
    println!("{}", renderer.render(&start.snapshot, None));

    let mut snapshot = start.snapshot;
    let mut rewards = start.rewards;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while snapshot.is_active() {
        let Some(actor) = snapshot.current_combatant().cloned() else {
            break;
        };
        let Some(character) = actor.character().cloned() else {
            let report = engine.resolve_monster_turns(&key).await?;
            println!();
            println!("{}", renderer.render(&report.snapshot, None));
            snapshot = report.snapshot;
            rewards = report.rewards;
            continue;
        };

        let action = if config.auto {
            choose_action(catalog.as_ref(), &actor)
        } else {
            print!("{}> ", actor.name);
            std::io::stdout().flush().ok();
            let line = lines.next_line().await?.unwrap_or_else(|| "#quit".to_string());
            match parse_command(&line, &snapshot) {
                Ok(Command::Act(action)) => action,
                Ok(Command::Status) => {
                    println!("{}", renderer.render(&snapshot, None));
                    continue;
                }
                Ok(Command::Quit) => {
                    engine.end_combat(&key, EndReason::OwnerRequest).await?;
                    println!("You abandon the fight.");
                    return Ok(());
                }
                Ok(Command::Nothing) => continue,
                Err(message) => {
                    println!("[ERROR] {message}");
                    continue;
                }
            }
        };

        match engine.submit_action(&key, &character, action).await {
            Ok(report) => {
                println!();
                println!("{}", renderer.render(&report.snapshot, None));
                snapshot = report.snapshot;
                rewards = report.rewards;
            }
            Err(e) if e.is_rejection() && !config.auto => println!("[REJECTED] {e}"),
            Err(e) => return Err(e.into()),
        }
    }

    println!();
    print_summary(rewards.as_ref(), &store, &heroes);
    Ok(())
}

fn print_summary(rewards: Option<&RewardReport>, store: &InMemoryCharacterStore, heroes: &[String]) {
    let Some(rewards) = rewards else {
        return;
    };
    println!("=== {} ===", rewards.outcome);
    for award in &rewards.awards {
        let delta = &award.delta;
        let mut line = format!(
            "{}: {:+} XP, {:+} gold",
            award.name, delta.experience_gained, delta.gold_delta
        );
        if delta.levels_gained > 0 {
            line.push_str(&format!(", reached level {}", delta.level));
        }
        if !delta.items_gained.is_empty() {
            line.push_str(&format!(", found {}", delta.items_gained.join(", ")));
        }
        if delta.died {
            line.push_str(", fell in battle");
        }
        println!("{line}");
    }
    for warning in &rewards.warnings {
        println!("[WARNING] {warning}");
    }
    for id in heroes {
        if let Some(sheet) = store.sheet(id) {
            println!(
                "{}: level {}, {} XP, {} gold, {} HP",
                sheet.name, sheet.level, sheet.experience, sheet.gold, sheet.health
            );
        }
    }
}

// ============================================================================
// Input
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Act(CombatAction),
    Status,
    Quit,
    Nothing,
}

/// Parse one input line. Targets are matched by name prefix among the living.
pub fn parse_command(line: &str, session: &CombatSession) -> Result<Command, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((verb, rest)) = words.split_first() else {
        return Ok(Command::Nothing);
    };

    let action = match verb.to_lowercase().as_str() {
        "#quit" | "#exit" => return Ok(Command::Quit),
        "#status" => return Ok(Command::Status),
        "attack" | "a" => CombatAction::Attack {
            target: find_target(session, rest.first().copied())?,
        },
        "defend" | "d" => CombatAction::Defend,
        "flee" | "f" => CombatAction::Flee,
        "cast" | "c" => {
            let (spell_id, target) = id_and_target(session, rest, "cast <spell> [target]")?;
            CombatAction::CastSpell { spell_id, target }
        }
        "ability" => {
            let (ability_id, target) = id_and_target(session, rest, "ability <id> [target]")?;
            CombatAction::UseAbility { ability_id, target }
        }
        "use" | "u" => {
            let (item_id, target) = id_and_target(session, rest, "use <item> [target]")?;
            CombatAction::UseItem { item_id, target }
        }
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(Command::Act(action))
}

fn id_and_target(
    session: &CombatSession,
    rest: &[&str],
    usage: &str,
) -> Result<(String, Option<CombatantId>), String> {
    let id = rest.first().ok_or_else(|| format!("usage: {usage}"))?;
    Ok((id.to_lowercase(), find_target(session, rest.get(1).copied())?))
}

fn find_target(session: &CombatSession, name: Option<&str>) -> Result<Option<CombatantId>, String> {
    let Some(name) = name else {
        return Ok(None);
    };
    let name = name.to_lowercase();
    session
        .combatants
        .iter()
        .find(|c| c.is_alive() && c.name.to_lowercase().starts_with(&name))
        .map(|c| Some(c.id))
        .ok_or_else(|| format!("no one called '{name}' is standing"))
}

// ============================================================================
// Automatic policy
// ============================================================================

/// Heal when badly hurt, otherwise use the hardest-hitting ready power, otherwise swing.
pub fn choose_action(content: &dyn ContentLookup, actor: &Combatant) -> CombatAction {
    let ready: Vec<&SpellDef> = actor
        .known_actions
        .iter()
        .filter(|id| actor.cooldown(id) == 0)
        .filter_map(|id| content.spell(id))
        .filter(|spell| spell.mana_cost <= actor.mana.current())
        .collect();

    if actor.health.ratio() < HEAL_THRESHOLD {
        if let Some(spell) = ready
            .iter()
            .find(|s| matches!(s.effect, SpellEffect::Heal { .. }))
        {
            return use_power(spell);
        }
        let potion = actor.consumables.keys().find(|id| {
            actor.charges(id) > 0
                && matches!(
                    content.item(id).and_then(|item| item.combat_effect.as_ref()),
                    Some(ItemEffect::Heal { .. })
                )
        });
        if let Some(item_id) = potion {
            return CombatAction::UseItem {
                item_id: item_id.clone(),
                target: None,
            };
        }
    }

    let strongest = ready
        .iter()
        .filter_map(|spell| match &spell.effect {
            SpellEffect::Damage { formula, .. } => Some((formula.max_total(), *spell)),
            _ => None,
        })
        .max_by_key(|(most, _)| *most);
    match strongest {
        Some((most, spell)) if most > actor.damage_formula.max_total() => use_power(spell),
        _ => CombatAction::Attack { target: None },
    }
}

fn use_power(spell: &SpellDef) -> CombatAction {
    match spell.kind {
        SpellKind::Spell => CombatAction::CastSpell {
            spell_id: spell.id.clone(),
            target: None,
        },
        SpellKind::Ability => CombatAction::UseAbility {
            ability_id: spell.id.clone(),
            target: None,
        },
    }
}
