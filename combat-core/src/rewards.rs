//! End-of-combat rewards and progress persistence.
//!
//! Rewards are computed in two steps. [`plan`] turns a finished session into
//! per-character [`ProgressDelta`]s without any I/O. [`RewardDispatcher`]
//! then writes them through the [`CharacterStore`] with bounded retries and
//! reports kills to the [`QuestNotifier`]. Failures in the second step are
//! warnings: the fight's result stands either way.

use crate::collaborators::{CharacterStore, KillRecord, ProgressDelta, QuestNotifier};
use crate::combatant::{CharacterRef, Combatant, CombatantKind};
use crate::config::EngineConfig;
use crate::dice::{DiceExpression, DieRoller};
use crate::session::{CombatSession, SessionState};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Experience needed to advance from `level` to the next level.
pub fn level_threshold(level: u32) -> u32 {
    (100.0 * f64::from(level.max(1)).powf(1.5)).floor() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelProgress {
    pub level: u32,
    pub experience: u32,
    pub levels_gained: u32,
}

/// Add experience and apply every level-up it pays for. Experience spent on
/// a level is deducted; the rest carries over.
pub fn apply_experience(level: u32, experience: u32, gained: u32) -> LevelProgress {
    let mut level = level.max(1);
    let mut experience = experience.saturating_add(gained);
    let mut levels_gained = 0;
    loop {
        let threshold = level_threshold(level);
        if experience < threshold {
            break;
        }
        experience -= threshold;
        level += 1;
        levels_gained += 1;
    }
    LevelProgress {
        level,
        experience,
        levels_gained,
    }
}

/// Split `total` into `shares` equal parts. Returns `(per_share, remainder)`.
pub fn split_evenly(total: u32, shares: usize) -> (u32, u32) {
    match u32::try_from(shares) {
        Ok(0) | Err(_) => (0, total),
        Ok(n) => (total / n, total % n),
    }
}

/// Rewards for one character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerAward {
    pub character: CharacterRef,
    pub name: String,
    pub delta: ProgressDelta,
}

/// What a finished session pays out, before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPlan {
    pub outcome: SessionState,
    pub awards: Vec<PlayerAward>,
    /// Defeated monsters by template, reported for every awarded character.
    pub kills: Vec<KillRecord>,
}

/// Result of dispatching a [`RewardPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardReport {
    pub outcome: SessionState,
    pub awards: Vec<PlayerAward>,
    /// Non-fatal problems, e.g. progress that could not be saved.
    pub warnings: Vec<String>,
}

impl RewardReport {
    pub fn award_for(&self, character: &CharacterRef) -> Option<&PlayerAward> {
        self.awards.iter().find(|a| &a.character == character)
    }
}

/// Compute the payout of a finished session.
///
/// Victory splits the defeated monsters' experience and gold evenly between
/// the players, the remainder going to whoever dealt the most damage (earlier
/// in turn order on ties). Each loot entry is rolled on a d100 and goes to the
/// player who landed the killing blow, or to the top contributor. Defeat costs
/// a share of gold and a death, leaving each player on 1 health. Anything else
/// pays nothing.
pub fn plan(session: &CombatSession, config: &EngineConfig, roller: &mut dyn DieRoller) -> RewardPlan {
    let players: Vec<&Combatant> = session.players().collect();
    let outcome = session.state();
    let awards = match outcome {
        SessionState::Victory => victory_awards(session, &players, roller),
        SessionState::Defeat => players
            .iter()
            .filter_map(|p| defeat_award(p, config.defeat_gold_penalty_percent))
            .collect(),
        SessionState::Active | SessionState::Fled | SessionState::Aborted => Vec::new(),
    };

    let kills = if outcome == SessionState::Victory {
        let mut counts: BTreeMap<&str, u32> = BTreeMap::new();
        for monster in session.monsters().filter(|m| m.is_defeated()) {
            if let Some(id) = monster.monster_id() {
                *counts.entry(id).or_insert(0) += 1;
            }
        }
        counts
            .into_iter()
            .map(|(monster_id, count)| KillRecord {
                monster_id: monster_id.to_string(),
                count,
            })
            .collect()
    } else {
        Vec::new()
    };

    RewardPlan {
        outcome,
        awards,
        kills,
    }
}

fn victory_awards(
    session: &CombatSession,
    players: &[&Combatant],
    roller: &mut dyn DieRoller,
) -> Vec<PlayerAward> {
    let Some(top) = top_contributor(players) else {
        return Vec::new();
    };

    let defeated: Vec<&Combatant> = session
        .monsters()
        .filter(|m| m.is_defeated())
        .collect();
    let bounties = defeated.iter().filter_map(|m| m.bounty.as_ref());
    let (total_xp, total_gold) = bounties.fold((0u32, 0u32), |(xp, gold), b| {
        (xp.saturating_add(b.xp), gold.saturating_add(b.gold))
    });
    let (xp_share, xp_rest) = split_evenly(total_xp, players.len());
    let (gold_share, gold_rest) = split_evenly(total_gold, players.len());

    let d100 = DiceExpression {
        count: 1,
        sides: 100,
        modifier: 0,
    };
    let mut loot: Vec<Vec<String>> = vec![Vec::new(); players.len()];
    for monster in &defeated {
        let Some(bounty) = &monster.bounty else {
            continue;
        };
        let recipient = monster
            .defeated_by
            .and_then(|killer| players.iter().position(|p| p.id == killer))
            .unwrap_or(top);
        for entry in &bounty.loot {
            let roll = d100.roll(roller).total;
            if roll <= i32::from(entry.chance_percent) {
                debug!(monster = %monster.name, item = %entry.item_id, roll, "loot dropped");
                loot[recipient].push(entry.item_id.clone());
            }
        }
    }

    players
        .iter()
        .zip(loot)
        .enumerate()
        .filter_map(|(index, (player, items_gained))| {
            let character = player.character()?.clone();
            let progress = player.progress?;
            let bonus = index == top;
            let xp = xp_share + if bonus { xp_rest } else { 0 };
            let gold = gold_share + if bonus { gold_rest } else { 0 };
            let levels = apply_experience(progress.level, progress.experience, xp);

            Some(PlayerAward {
                character,
                name: player.name.clone(),
                delta: ProgressDelta {
                    health: player.health.current().max(1),
                    mana: player.mana.current(),
                    experience_gained: xp,
                    experience: levels.experience,
                    level: levels.level,
                    levels_gained: levels.levels_gained,
                    gold_delta: i64::from(gold),
                    items_consumed: player.items_used.clone(),
                    items_gained,
                    died: false,
                },
            })
        })
        .collect()
}

fn defeat_award(player: &Combatant, penalty_percent: u8) -> Option<PlayerAward> {
    let character = player.character()?.clone();
    let progress = player.progress?;
    let lost = progress.gold * u64::from(penalty_percent.min(100)) / 100;

    Some(PlayerAward {
        character,
        name: player.name.clone(),
        delta: ProgressDelta {
            health: 1,
            mana: player.mana.current(),
            experience_gained: 0,
            experience: progress.experience,
            level: progress.level,
            levels_gained: 0,
            gold_delta: -i64::try_from(lost).unwrap_or(i64::MAX),
            items_consumed: player.items_used.clone(),
            items_gained: Vec::new(),
            died: true,
        },
    })
}

/// Index of the player who dealt the most damage; the first one wins ties.
fn top_contributor(players: &[&Combatant]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (index, player) in players.iter().enumerate() {
        if player.kind != CombatantKind::Player {
            continue;
        }
        match best {
            Some((_, damage)) if damage >= player.damage_dealt => {}
            _ => best = Some((index, player.damage_dealt)),
        }
    }
    best.map(|(index, _)| index)
}

/// Persists a [`RewardPlan`] and notifies quest tracking.
pub struct RewardDispatcher<'a> {
    characters: &'a dyn CharacterStore,
    quests: &'a dyn QuestNotifier,
    config: &'a EngineConfig,
}

impl<'a> RewardDispatcher<'a> {
    pub fn new(
        characters: &'a dyn CharacterStore,
        quests: &'a dyn QuestNotifier,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            characters,
            quests,
            config,
        }
    }

    pub async fn dispatch(&self, plan: RewardPlan) -> RewardReport {
        let mut warnings: Vec<String> = join_all(plan.awards.iter().map(|award| self.persist(award)))
            .await
            .into_iter()
            .flatten()
            .collect();

        if !plan.kills.is_empty() {
            let kills = &plan.kills;
            let notified = join_all(plan.awards.iter().map(|award| async move {
                self.quests
                    .monsters_defeated(&award.character, kills)
                    .await
                    .map_err(|e| (award, e))
            }))
            .await;
            for (award, error) in notified.into_iter().filter_map(|r| r.err()) {
                warn!(character = %award.character, error = %error, "quest notification failed");
                warnings.push(format!(
                    "Quest progress for {} could not be updated: {error}",
                    award.name
                ));
            }
        }

        RewardReport {
            outcome: plan.outcome,
            awards: plan.awards,
            warnings,
        }
    }

    /// Save one character's progress, retrying with a linearly growing delay.
    /// Returns a warning if every attempt failed.
    async fn persist(&self, award: &PlayerAward) -> Option<String> {
        let attempts = self.config.persist_attempts.max(1);
        for attempt in 1..=attempts {
            match self
                .characters
                .save_progress(&award.character, &award.delta)
                .await
            {
                Ok(()) => {
                    debug!(character = %award.character, attempt, "progress saved");
                    return None;
                }
                Err(error) => {
                    warn!(
                        character = %award.character,
                        attempt,
                        attempts,
                        error = %error,
                        "failed to save combat progress"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.config.persist_backoff * attempt).await;
                    }
                }
            }
        }
        Some(format!(
            "Progress for {} could not be saved; rewards may be delayed.",
            award.name
        ))
    }
}
