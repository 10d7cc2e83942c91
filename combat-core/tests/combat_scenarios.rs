//! End-to-end combat scenarios driven through `CombatEngine` with scripted dice.
//!
//! Initiative is rolled in participant order, so each test queues one d20 per
//! participant before anything else.

use combat_core::collaborators::KillRecord;
use combat_core::testing::{assert_health, assert_state, assert_turn, sample_fighter, sample_mage, TestHarness};
use combat_core::{
    CharacterRef, CombatAction, CombatError, CombatMode, EngineConfig, Participant, Pool,
    SessionKey, SessionState, TurnEvent,
};

fn solo(hero: &CharacterRef, monster: &str) -> Vec<Participant> {
    vec![
        Participant::Character(hero.clone()),
        Participant::Monster(monster.to_string()),
    ]
}

// =============================================================================
// Solo fights
// =============================================================================

#[tokio::test]
async fn test_goblin_kill_pays_out_and_closes_session() {
    let harness = TestHarness::default();
    let alice = harness.add_fighter("alice", "Alice");
    let key = SessionKey::new("alice");

    // Alice 15+1, goblin 2+2
    harness.roll([15, 2]);
    let start = harness.engine.start_combat(key.clone(), solo(&alice, "goblin")).await.unwrap();
    assert!(start.outcomes.is_empty());
    assert_turn(&start.snapshot, "Alice");
    assert_eq!(start.snapshot.mode, CombatMode::Solo);

    // attack 15+5 vs AC 13 hits, 4+3 damage, loot roll 100 misses
    harness.roll([15, 4, 100]);
    let report = harness
        .engine
        .submit_action(&key, &alice, CombatAction::Attack { target: None })
        .await
        .unwrap();

    assert!(report.outcome.hit);
    assert_eq!(report.outcome.damage, 7);
    assert!(report.outcome.target_defeated);
    assert!(report.is_over());
    assert_state(&report.snapshot, SessionState::Victory);
    assert_health(&report.snapshot, "Goblin", 0, 7);

    let rewards = report.rewards.expect("victory pays out");
    assert!(rewards.warnings.is_empty());
    let award = rewards.award_for(&alice).unwrap();
    assert_eq!(award.delta.experience_gained, 50);
    assert_eq!(award.delta.gold_delta, 5);
    assert_eq!(award.delta.level, 1);

    let sheet = harness.characters.sheet("alice").unwrap();
    assert_eq!(sheet.experience, 50);
    assert_eq!(sheet.gold, 15);

    assert_eq!(
        harness.quests.events(),
        vec![(
            alice.clone(),
            vec![KillRecord {
                monster_id: "goblin".into(),
                count: 1
            }]
        )]
    );
    assert!(!harness.engine.sessions().contains(&key));
    assert!(matches!(
        harness.engine.get_status(&key).await,
        Err(CombatError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn test_victory_levels_up_with_carry_over() {
    let harness = TestHarness::default();
    let mut sheet = sample_fighter("Alice");
    sheet.experience = 90;
    let alice = harness.add_character("alice", sheet);
    let key = SessionKey::new("alice");

    harness.roll([15, 2, 15, 4, 1]);
    harness.engine.start_combat(key.clone(), solo(&alice, "goblin")).await.unwrap();
    let report = harness
        .engine
        .submit_action(&key, &alice, CombatAction::Attack { target: None })
        .await
        .unwrap();

    let award = report.rewards.unwrap().award_for(&alice).cloned().unwrap();
    assert_eq!(award.delta.level, 2);
    assert_eq!(award.delta.levels_gained, 1);
    assert_eq!(award.delta.experience, 40);
    // loot roll of 1 is under the goblin's 25% potion chance
    assert_eq!(award.delta.items_gained, vec!["healing_potion".to_string()]);

    let sheet = harness.characters.sheet("alice").unwrap();
    assert_eq!(sheet.level, 2);
    assert_eq!(sheet.consumables.get("healing_potion"), Some(&2));
}

#[tokio::test]
async fn test_insufficient_mana_is_rejected_without_changes() {
    let harness = TestHarness::default();
    let mut sheet = sample_mage("Ilsa");
    sheet.mana = Pool::with_current(3, 10);
    let ilsa = harness.add_character("ilsa", sheet);
    let key = SessionKey::new("ilsa");

    harness.roll([15, 2]);
    harness.engine.start_combat(key.clone(), solo(&ilsa, "goblin")).await.unwrap();
    let before = harness.engine.get_status(&key).await.unwrap();

    let err = harness
        .engine
        .submit_action(
            &key,
            &ilsa,
            CombatAction::CastSpell {
                spell_id: "hold_person".into(),
                target: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CombatError::InsufficientResource {
            resource: "mana",
            required: 5,
            available: 3
        }
    ));
    assert!(err.is_rejection());

    let after = harness.engine.get_status(&key).await.unwrap();
    assert_eq!(after.combatants, before.combatants);
    assert_eq!(after.current_turn_index(), before.current_turn_index());
    assert_eq!(after.round, before.round);
    assert_turn(&after, "Ilsa");
}

#[tokio::test]
async fn test_failed_flee_passes_the_turn() {
    let harness = TestHarness::new(EngineConfig::default().with_auto_monsters(false));
    let alice = harness.add_fighter("alice", "Alice");
    let key = SessionKey::new("alice");

    harness.roll([15, 2]);
    harness.engine.start_combat(key.clone(), solo(&alice, "goblin")).await.unwrap();

    // 8 + 1 against DC 15
    harness.roll([8]);
    let report = harness.engine.submit_action(&key, &alice, CombatAction::Flee).await.unwrap();
    assert!(!report.outcome.fled);
    assert!(report.follow_ups.is_empty());
    assert_state(&report.snapshot, SessionState::Active);
    assert_turn(&report.snapshot, "Goblin");
    assert_health(&report.snapshot, "Alice", 20, 20);

    // goblin swings 5 + 4 against AC 12 and misses
    harness.roll([5]);
    let monsters = harness.engine.resolve_monster_turns(&key).await.unwrap();
    assert_eq!(monsters.outcomes.len(), 1);
    assert!(!monsters.outcomes[0].hit);
    assert_turn(&monsters.snapshot, "Alice");
    assert_eq!(monsters.snapshot.round, 2);
}

#[tokio::test]
async fn test_successful_flee_ends_without_rewards() {
    let harness = TestHarness::default();
    let alice = harness.add_fighter("alice", "Alice");
    let key = SessionKey::new("alice");

    harness.roll([15, 2, 19]);
    harness.engine.start_combat(key.clone(), solo(&alice, "goblin")).await.unwrap();
    let report = harness.engine.submit_action(&key, &alice, CombatAction::Flee).await.unwrap();

    assert!(report.outcome.fled);
    assert_state(&report.snapshot, SessionState::Fled);
    assert!(report.rewards.unwrap().awards.is_empty());
    assert!(harness.characters.saved().is_empty());
    assert!(harness.quests.events().is_empty());
    assert!(!harness.engine.sessions().contains(&key));
}

#[tokio::test]
async fn test_monster_opens_when_faster() {
    let harness = TestHarness::default();
    let alice = harness.add_fighter("alice", "Alice");

    // Alice 2+1, goblin 15+2; goblin hits 10+4 vs 12 for 3+2
    harness.roll([2, 15, 10, 3]);
    let start = harness
        .engine
        .start_combat(SessionKey::new("alice"), solo(&alice, "goblin"))
        .await
        .unwrap();

    assert_eq!(start.outcomes.len(), 1);
    assert_eq!(start.outcomes[0].actor_name, "Goblin");
    assert_eq!(start.outcomes[0].damage, 5);
    assert_health(&start.snapshot, "Alice", 15, 20);
    assert_turn(&start.snapshot, "Alice");
}

#[tokio::test]
async fn test_defeat_applies_penalty() {
    let harness = TestHarness::default();
    let mut sheet = sample_fighter("Alice");
    sheet.health = Pool::with_current(3, 20);
    let alice = harness.add_character("alice", sheet);

    harness.roll([2, 15, 10, 3]);
    let start = harness
        .engine
        .start_combat(SessionKey::new("alice"), solo(&alice, "goblin"))
        .await
        .unwrap();

    assert_state(&start.snapshot, SessionState::Defeat);
    let award = start.rewards.unwrap().award_for(&alice).cloned().unwrap();
    assert!(award.delta.died);
    assert_eq!(award.delta.health, 1);
    assert_eq!(award.delta.gold_delta, -1);

    let sheet = harness.characters.sheet("alice").unwrap();
    assert_eq!(sheet.deaths, 1);
    assert_eq!(sheet.gold, 9);
    assert_eq!(sheet.health.current(), 1);
    assert!(harness.quests.events().is_empty());
}

#[tokio::test]
async fn test_stun_skips_turn_and_cooldown_blocks_recast() {
    let harness = TestHarness::default();
    let ilsa = harness.add_mage("ilsa", "Ilsa");
    let key = SessionKey::new("ilsa");

    harness.roll([15, 2]);
    harness.engine.start_combat(key.clone(), solo(&ilsa, "goblin")).await.unwrap();

    let hold = CombatAction::CastSpell {
        spell_id: "hold_person".into(),
        target: None,
    };
    let report = harness.engine.submit_action(&key, &ilsa, hold.clone()).await.unwrap();
    assert!(report.follow_ups.is_empty());
    assert!(report
        .turn_events
        .iter()
        .any(|e| matches!(e, TurnEvent::TurnSkipped { name, .. } if name == "Goblin")));
    assert_turn(&report.snapshot, "Ilsa");
    assert_eq!(report.snapshot.round, 2);

    let err = harness.engine.submit_action(&key, &ilsa, hold).await.unwrap_err();
    assert!(matches!(err, CombatError::OnCooldown { remaining: 2, .. }));
}

#[tokio::test]
async fn test_poison_ticks_on_monster_turn() {
    let harness = TestHarness::default();
    let ilsa = harness.add_mage("ilsa", "Ilsa");
    let key = SessionKey::new("ilsa");

    harness.roll([15, 2]);
    harness.engine.start_combat(key.clone(), solo(&ilsa, "goblin")).await.unwrap();

    // poison ticks for 3, then the goblin misses with 5 + 4 against AC 11
    harness.roll([3, 5]);
    let report = harness
        .engine
        .submit_action(
            &key,
            &ilsa,
            CombatAction::CastSpell {
                spell_id: "poison_spray".into(),
                target: None,
            },
        )
        .await
        .unwrap();

    assert_health(&report.snapshot, "Goblin", 4, 7);
    assert_eq!(report.follow_ups.len(), 1);
    assert!(report.turn_events.iter().any(|e| matches!(
        e,
        TurnEvent::EffectDamage { damage: 3, defeated: false, .. }
    )));
    let goblin = report.snapshot.monsters().next().unwrap();
    assert_eq!(goblin.status_effects[0].remaining, 2);
}

// =============================================================================
// Group fights
// =============================================================================

#[tokio::test]
async fn test_group_rejects_out_of_turn_actions() {
    let harness = TestHarness::new(EngineConfig::default().with_auto_monsters(false));
    let alice = harness.add_fighter("alice", "Alice");
    let bob = harness.add_mage("bob", "Bob");
    let key = SessionKey::new("party-1");

    // Alice 15+1, Bob 10+2, goblin 2+2
    harness.roll([15, 10, 2]);
    let start = harness
        .engine
        .start_combat(
            key.clone(),
            vec![
                Participant::Character(alice.clone()),
                Participant::Character(bob.clone()),
                Participant::Monster("goblin".into()),
            ],
        )
        .await
        .unwrap();
    assert_eq!(start.snapshot.mode, CombatMode::Group);

    let before = harness.engine.get_status(&key).await.unwrap();
    let err = harness
        .engine
        .submit_action(&key, &bob, CombatAction::Attack { target: None })
        .await
        .unwrap_err();
    assert!(matches!(err, CombatError::NotYourTurn { ref expected } if expected == "Alice"));
    let after = harness.engine.get_status(&key).await.unwrap();
    assert_eq!(after.combatants, before.combatants);

    harness.engine.submit_action(&key, &alice, CombatAction::Defend).await.unwrap();
    let report = harness
        .engine
        .submit_action(
            &key,
            &bob,
            CombatAction::CastSpell {
                spell_id: "shield".into(),
                target: Some(after.player(&alice).unwrap().id),
            },
        )
        .await
        .unwrap();
    assert_eq!(report.outcome.target_name.as_deref(), Some("Alice"));
    let alice_now = report.snapshot.player(&alice).unwrap();
    assert!(alice_now.has_effect("shield"));
}

#[tokio::test]
async fn test_group_victory_splits_rewards() {
    let harness = TestHarness::default();
    let alice = harness.add_fighter("alice", "Alice");
    let bob = harness.add_fighter("bob", "Bob");
    let key = SessionKey::new("party-2");

    // Alice 15+1, Bob 10+1, goblin 2+2, orc 1+1
    harness.roll([15, 10, 2, 1]);
    harness
        .engine
        .start_combat(
            key.clone(),
            vec![
                Participant::Character(alice.clone()),
                Participant::Character(bob.clone()),
                Participant::Monster("goblin".into()),
                Participant::Monster("orc".into()),
            ],
        )
        .await
        .unwrap();

    let snapshot = harness.engine.get_status(&key).await.unwrap();
    let goblin = snapshot.monsters().find(|m| m.name == "Goblin").unwrap().id;
    let orc = snapshot.monsters().find(|m| m.name == "Orc").unwrap().id;

    // Alice kills the goblin (7)
    harness.roll([15, 4]);
    harness
        .engine
        .submit_action(&key, &alice, CombatAction::Attack { target: Some(goblin) })
        .await
        .unwrap();
    // Bob crits the orc for (6+6+3) and finishes it; loot rolls miss
    harness.roll([20, 6, 6, 100, 100]);
    let report = harness
        .engine
        .submit_action(&key, &bob, CombatAction::Attack { target: Some(orc) })
        .await
        .unwrap();

    assert_state(&report.snapshot, SessionState::Victory);
    let rewards = report.rewards.unwrap();
    // 150 xp and 17 gold between two players; Bob dealt more damage
    let alice_award = rewards.award_for(&alice).unwrap();
    let bob_award = rewards.award_for(&bob).unwrap();
    assert_eq!(alice_award.delta.experience_gained, 75);
    assert_eq!(bob_award.delta.experience_gained, 75);
    assert_eq!(alice_award.delta.gold_delta, 8);
    assert_eq!(bob_award.delta.gold_delta, 9);

    let events = harness.quests.events();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|(_, kills)| kills.len() == 2));
}
