//! Plain-text rendering of a combat session.

use crate::actions::ActionOutcome;
use crate::collaborators::CombatRenderer;
use crate::combatant::{Combatant, CombatantKind};
use crate::session::{CombatSession, SessionState};
use std::fmt::Write;

/// Renders a session as a fixed-width text block, suitable for a terminal or
/// a code-fenced chat message.
#[derive(Debug, Clone)]
pub struct TextRenderer {
    /// Width of the health bar in characters.
    pub bar_width: usize,
    /// Number of log lines shown under the combatant list.
    pub log_lines: usize,
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self {
            bar_width: 10,
            log_lines: 5,
        }
    }
}

impl TextRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn bar(&self, combatant: &Combatant) -> String {
        let filled = (combatant.health.ratio() * self.bar_width as f32).ceil() as usize;
        let filled = filled.min(self.bar_width);
        format!("[{}{}]", "#".repeat(filled), "-".repeat(self.bar_width - filled))
    }

    fn combatant_line(&self, session: &CombatSession, index: usize, combatant: &Combatant) -> String {
        let marker = if session.is_active() && index == session.current_turn_index() {
            ">"
        } else {
            " "
        };
        let mut line = format!(
            "{marker} {:<16} {} {:>7} HP",
            combatant.name,
            self.bar(combatant),
            combatant.health.to_string()
        );
        if combatant.mana.max() > 0 {
            let _ = write!(line, "  {} MP", combatant.mana);
        }
        if combatant.defending {
            line.push_str("  [defending]");
        }
        if !combatant.status_effects.is_empty() {
            let effects: Vec<String> = combatant
                .status_effects
                .iter()
                .map(|e| format!("{} ({})", e.name, e.remaining))
                .collect();
            let _ = write!(line, "  {}", effects.join(", "));
        }
        if combatant.is_defeated() {
            line.push_str("  DEFEATED");
        }
        line
    }
}

impl CombatRenderer for TextRenderer {
    type View = String;

    fn render(&self, session: &CombatSession, latest: Option<&ActionOutcome>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Round {} ===", session.round);

        for kind in [CombatantKind::Player, CombatantKind::Monster] {
            for (index, combatant) in session
                .combatants
                .iter()
                .enumerate()
                .filter(|(_, c)| c.kind == kind)
            {
                let _ = writeln!(out, "{}", self.combatant_line(session, index, combatant));
            }
        }

        if let Some(outcome) = latest {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", outcome.narrative);
        } else if self.log_lines > 0 {
            let lines: Vec<_> = session.log().collect();
            let skip = lines.len().saturating_sub(self.log_lines);
            if lines.len() > skip {
                let _ = writeln!(out);
            }
            for entry in &lines[skip..] {
                let _ = writeln!(out, "{}", entry.text);
            }
        }

        let footer = match session.state() {
            SessionState::Active => session
                .current_combatant()
                .map(|c| format!("{}'s turn.", c.name))
                .unwrap_or_default(),
            SessionState::Victory => "Victory!".to_string(),
            SessionState::Defeat => "Defeat...".to_string(),
            SessionState::Fled => "You escaped.".to_string(),
            SessionState::Aborted => "Combat was abandoned.".to_string(),
        };
        let _ = writeln!(out);
        out.push_str(&footer);
        out
    }
}
