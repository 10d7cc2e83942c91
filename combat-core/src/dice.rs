//! Dice rolling for combat resolution.
//!
//! Supports the `NdM+K` notation used by the monster, spell and item tables
//! (`1d8+3`, `2d6-1`, `d20`). Draws come from a [`DieRoller`] so sessions can
//! use a seeded RNG in production and scripted values in tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for dice parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("Invalid dice formula: {0}")]
    InvalidFormula(String),
    #[error("Dice count must be at least 1 (in {0})")]
    NoDice(String),
    #[error("Die must have at least 2 sides, got {sides} (in {notation})")]
    InvalidDieSize { sides: u32, notation: String },
    #[error("At most 1000 dice per roll, got {count} (in {notation})")]
    TooManyDice { count: u32, notation: String },
}

/// Upper bound on the dice count of a parsed formula.
pub const MAX_DICE: u32 = 1000;

/// A source of individual die draws.
pub trait DieRoller: Send {
    /// Draw a value uniformly from `1..=sides`.
    fn roll_die(&mut self, sides: u32) -> u32;
}

/// [`DieRoller`] backed by a `rand` RNG.
#[derive(Debug, Clone)]
pub struct RngRoller<R = StdRng> {
    rng: R,
}

impl RngRoller<StdRng> {
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic roller, useful for replays and simulations.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<R: Rng + Send> RngRoller<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng + Send> DieRoller for RngRoller<R> {
    fn roll_die(&mut self, sides: u32) -> u32 {
        self.rng.gen_range(1..=sides)
    }
}

/// A parsed `NdM+K` dice expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DiceExpression {
    pub count: u32,
    pub sides: u32,
    pub modifier: i32,
}

impl DiceExpression {
    /// Parse a dice formula.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let original = notation.trim().to_string();
        let cleaned: String = notation
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        let invalid = || DiceError::InvalidFormula(original.clone());

        let d_pos = cleaned.find('d').ok_or_else(invalid)?;
        let count_str = &cleaned[..d_pos];
        let rest = &cleaned[d_pos + 1..];

        let count = if count_str.is_empty() {
            1
        } else {
            parse_digits(count_str).ok_or_else(invalid)?
        };

        let (sides_str, modifier) = match rest.find(|c| c == '+' || c == '-') {
            Some(pos) => {
                let (sides, tail) = rest.split_at(pos);
                let value = parse_digits(&tail[1..]).ok_or_else(invalid)?;
                let value = i32::try_from(value).map_err(|_| invalid())?;
                if tail.starts_with('-') {
                    (sides, -value)
                } else {
                    (sides, value)
                }
            }
            None => (rest, 0),
        };

        let sides = parse_digits(sides_str).ok_or_else(invalid)?;

        if count < 1 {
            return Err(DiceError::NoDice(original));
        }
        if count > MAX_DICE {
            return Err(DiceError::TooManyDice {
                count,
                notation: original,
            });
        }
        if sides < 2 {
            return Err(DiceError::InvalidDieSize {
                sides,
                notation: original,
            });
        }

        Ok(Self {
            count,
            sides,
            modifier,
        })
    }

    /// A single d20 check with the given modifier.
    pub fn d20(modifier: i32) -> Self {
        Self {
            count: 1,
            sides: 20,
            modifier,
        }
    }

    /// Same dice, twice as many of them. Used for critical hits.
    pub fn doubled(&self) -> Self {
        Self {
            count: self.count.saturating_mul(2),
            ..self.clone()
        }
    }

    /// Same dice with an extra flat modifier.
    pub fn plus(&self, extra: i32) -> Self {
        Self {
            modifier: self.modifier.saturating_add(extra),
            ..self.clone()
        }
    }

    pub fn min_total(&self) -> i64 {
        self.count as i64 + self.modifier as i64
    }

    pub fn max_total(&self) -> i64 {
        self.count as i64 * self.sides as i64 + self.modifier as i64
    }

    /// Roll the expression.
    pub fn roll(&self, roller: &mut dyn DieRoller) -> RollResult {
        let rolls: Vec<u32> = (0..self.count)
            .map(|_| roller.roll_die(self.sides).clamp(1, self.sides))
            .collect();

        let dice_total = rolls
            .iter()
            .fold(0i32, |acc, &r| acc.saturating_add(r as i32));
        let total = dice_total.saturating_add(self.modifier);

        let single_d20 = self.count == 1 && self.sides == 20;

        RollResult {
            formula: self.to_string(),
            natural_20: single_d20 && rolls[0] == 20,
            natural_1: single_d20 && rolls[0] == 1,
            rolls,
            modifier: self.modifier,
            total,
        }
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpression::parse(s)
    }
}

impl TryFrom<String> for DiceExpression {
    type Error = DiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        DiceExpression::parse(&value)
    }
}

impl From<DiceExpression> for String {
    fn from(expr: DiceExpression) -> Self {
        expr.to_string()
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.sides)?;
        match self.modifier {
            0 => Ok(()),
            m if m > 0 => write!(f, "+{m}"),
            m => write!(f, "{m}"),
        }
    }
}

/// Complete result of a dice roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    pub formula: String,
    pub rolls: Vec<u32>,
    pub modifier: i32,
    pub total: i32,
    pub natural_20: bool,
    pub natural_1: bool,
}

impl RollResult {
    /// The raw die value of a single-die roll (the d20 of an attack).
    pub fn natural(&self) -> u32 {
        self.rolls.first().copied().unwrap_or(0)
    }

    /// Format the individual dice results for display.
    pub fn dice_display(&self) -> String {
        let dice = format!(
            "[{}]",
            self.rolls
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        match self.modifier {
            0 => dice,
            m if m > 0 => format!("{dice} + {m}"),
            m => format!("{dice} - {}", m.abs()),
        }
    }

    /// Check if this was a critical hit (natural 20 on attack).
    pub fn is_critical(&self) -> bool {
        self.natural_20
    }

    /// Check if this was a critical failure (natural 1 on attack).
    pub fn is_fumble(&self) -> bool {
        self.natural_1
    }
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.dice_display(), self.total)
    }
}

/// Convenience function to roll dice from a notation string with fresh entropy.
pub fn roll(notation: &str) -> Result<RollResult, DiceError> {
    let expr = DiceExpression::parse(notation)?;
    Ok(expr.roll(&mut RngRoller::from_entropy()))
}
