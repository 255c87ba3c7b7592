// SPDX-License-Identifier: PMPL-1.0-or-later

//! Terminal tables for techniques and their lifecycle state

use crate::state::{FileSystemStateManager, StateStore};
use crate::technique::Technique;
use crate::types::TechniqueState;
use colored::*;
use std::path::Path;
use std::sync::Arc;

/// State of one technique as read from disk for display.
#[derive(Debug, Clone)]
pub struct StatusRow {
    pub id: String,
    pub name: String,
    pub state: Result<TechniqueState, String>,
}

/// Reads the persisted state of every technique. A missing token is COLD;
/// an unreadable one is reported per row instead of failing the table.
pub fn collect_status(root: &Path, techniques: &[Arc<Technique>]) -> Vec<StatusRow> {
    techniques
        .iter()
        .map(|technique| {
            let store = FileSystemStateManager::new(root, technique.id.clone(), None);
            StatusRow {
                id: technique.id.clone(),
                name: technique.display_name().to_string(),
                state: store
                    .get_state()
                    .map(Option::unwrap_or_default)
                    .map_err(|e| e.to_string()),
            }
        })
        .collect()
}

pub fn color_state(state: TechniqueState) -> ColoredString {
    let label = state.to_string();
    match state {
        TechniqueState::Cold => label.cyan(),
        TechniqueState::Warm => label.yellow(),
        TechniqueState::Detonated => label.magenta(),
    }
}

pub fn print_status(rows: &[StatusRow]) {
    println!("\n  {:<50} {:<40} {}", "ID".bold(), "Name".bold(), "Status".bold());
    println!("  {}", "-".repeat(100));
    for row in rows {
        let status = match &row.state {
            Ok(state) => color_state(*state),
            Err(err) => format!("UNKNOWN ({})", err).red(),
        };
        println!("  {:<50} {:<40} {}", row.id, truncate(&row.name, 40), status);
    }
    println!();
}

pub fn print_list(techniques: &[Arc<Technique>]) {
    println!(
        "\n  {:<50} {:<40} {:<12} {}",
        "Technique ID".bold(),
        "Technique name".bold(),
        "Platform".bold(),
        "MITRE ATT&CK Tactic".bold()
    );
    println!("  {}", "-".repeat(124));

    if techniques.is_empty() {
        println!("  No techniques match.");
    }
    for technique in techniques {
        let tactics: Vec<&str> = technique.tactics.iter().map(|t| t.name()).collect();
        println!(
            "  {:<50} {:<40} {:<12} {}",
            technique.id,
            truncate(technique.display_name(), 40),
            technique.platform.name(),
            tactics.join(", ")
        );
    }
    println!();
}

pub fn print_technique(technique: &Technique) {
    println!("\n{}", technique.id.bold().cyan());
    println!("  Name:        {}", technique.display_name());
    println!("  Platform:    {}", technique.platform);
    if !technique.tactics.is_empty() {
        let tactics: Vec<&str> = technique.tactics.iter().map(|t| t.name()).collect();
        println!("  Tactics:     {}", tactics.join(", "));
    }
    println!("  Idempotent:  {}", yes_no(technique.is_idempotent));
    println!("  Revertible:  {}", yes_no(technique.is_revertible()));
    println!("  Provisions:  {}", yes_no(technique.has_prerequisites()));
    if technique.is_slow {
        println!("  {}", "Slow to warm up or detonate".yellow());
    }
    if !technique.description.is_empty() {
        println!("\n{}", "DESCRIPTION".bold().yellow());
        for line in technique.description.lines() {
            println!("  {}", line);
        }
    }
    if !technique.detection.is_empty() {
        println!("\n{}", "DETECTION".bold().yellow());
        for line in technique.detection.lines() {
            println!("  {}", line);
        }
    }
    println!();
}

fn yes_no(value: bool) -> ColoredString {
    if value {
        "yes".green()
    } else {
        "no".normal()
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let kept: String = value.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
