//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// How a flee attempt is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FleeRule {
    /// `1d20 + dex` must meet a fixed difficulty.
    FixedDc(i32),
    /// `1d20 + dex` must meet the best living monster's `1d20 + dex`.
    Opposed,
}

/// Tunables for the combat engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sessions with no action for this long are aborted.
    pub idle_timeout: Duration,

    /// How often the background sweeper looks for idle sessions.
    pub sweep_interval: Duration,

    /// Armor class bonus granted by the Defend action.
    pub defend_armor_bonus: i32,

    /// Flee resolution.
    pub flee: FleeRule,

    /// Percentage of carried gold lost on defeat.
    pub defeat_gold_penalty_percent: u8,

    /// Attempts made to persist progress when a session ends.
    pub persist_attempts: u32,

    /// Base delay between persistence attempts (multiplied by the attempt number).
    pub persist_backoff: Duration,

    /// Resolve monster turns automatically after each player action.
    pub auto_resolve_monsters: bool,

    /// Number of narrative lines kept in a session's combat log.
    pub log_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(30),
            defend_armor_bonus: 2,
            flee: FleeRule::FixedDc(15),
            defeat_gold_penalty_percent: 10,
            persist_attempts: 3,
            persist_backoff: Duration::from_millis(200),
            auto_resolve_monsters: true,
            log_capacity: 20,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from `COMBAT_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "COMBAT_IDLE_TIMEOUT_SECS")? {
            config.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "COMBAT_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(bonus) = parse_var(&lookup, "COMBAT_DEFEND_BONUS")? {
            config.defend_armor_bonus = bonus;
        }
        if let Some(value) = lookup("COMBAT_FLEE") {
            config.flee = if value.eq_ignore_ascii_case("opposed") {
                FleeRule::Opposed
            } else {
                let dc = value.trim().parse().map_err(|_| ConfigError::Invalid {
                    var: "COMBAT_FLEE",
                    value: value.clone(),
                })?;
                FleeRule::FixedDc(dc)
            };
        }
        if let Some(pct) = parse_var::<u8, _>(&lookup, "COMBAT_DEFEAT_GOLD_PENALTY")? {
            if pct > 100 {
                return Err(ConfigError::Invalid {
                    var: "COMBAT_DEFEAT_GOLD_PENALTY",
                    value: pct.to_string(),
                });
            }
            config.defeat_gold_penalty_percent = pct;
        }
        if let Some(attempts) = parse_var::<u32, _>(&lookup, "COMBAT_PERSIST_ATTEMPTS")? {
            config.persist_attempts = attempts.max(1);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "COMBAT_PERSIST_BACKOFF_MS")? {
            config.persist_backoff = Duration::from_millis(ms);
        }
        if let Some(auto) = parse_var(&lookup, "COMBAT_AUTO_MONSTERS")? {
            config.auto_resolve_monsters = auto;
        }
        if let Some(capacity) = parse_var(&lookup, "COMBAT_LOG_CAPACITY")? {
            config.log_capacity = capacity;
        }

        Ok(config)
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_defend_armor_bonus(mut self, bonus: i32) -> Self {
        self.defend_armor_bonus = bonus;
        self
    }

    pub fn with_flee_rule(mut self, rule: FleeRule) -> Self {
        self.flee = rule;
        self
    }

    /// Clamped to 100.
    pub fn with_defeat_gold_penalty(mut self, percent: u8) -> Self {
        self.defeat_gold_penalty_percent = percent.min(100);
        self
    }

    /// Retry policy for end-of-combat persistence. At least one attempt is always made.
    pub fn with_persist_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.persist_attempts = attempts.max(1);
        self.persist_backoff = backoff;
        self
    }

    pub fn with_auto_monsters(mut self, enabled: bool) -> Self {
        self.auto_resolve_monsters = enabled;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_idle_timeout(Duration::from_secs(60))
            .with_flee_rule(FleeRule::Opposed)
            .with_defeat_gold_penalty(150)
            .with_persist_retry(0, Duration::ZERO);

        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.flee, FleeRule::Opposed);
        assert_eq!(config.defeat_gold_penalty_percent, 100);
        assert_eq!(config.persist_attempts, 1);
    }

    #[test]
    fn test_from_lookup() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("COMBAT_IDLE_TIMEOUT_SECS", "90"),
            ("COMBAT_FLEE", "12"),
            ("COMBAT_AUTO_MONSTERS", "false"),
            ("COMBAT_PERSIST_BACKOFF_MS", "5"),
        ]))
        .unwrap();

        assert_eq!(config.idle_timeout, Duration::from_secs(90));
        assert_eq!(config.flee, FleeRule::FixedDc(12));
        assert!(!config.auto_resolve_monsters);
        assert_eq!(config.persist_backoff, Duration::from_millis(5));
        assert_eq!(config.defend_armor_bonus, 2);
    }

    #[test]
    fn test_from_lookup_opposed_and_errors() {
        let config =
            EngineConfig::from_lookup(lookup_from(&[("COMBAT_FLEE", "Opposed")])).unwrap();
        assert_eq!(config.flee, FleeRule::Opposed);

        let err = EngineConfig::from_lookup(lookup_from(&[("COMBAT_DEFEND_BONUS", "lots")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "COMBAT_DEFEND_BONUS",
                value: "lots".to_string()
            }
        );

        assert!(
            EngineConfig::from_lookup(lookup_from(&[("COMBAT_DEFEAT_GOLD_PENALTY", "101")]))
                .is_err()
        );
    }
}
