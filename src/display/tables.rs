//! Table formatting for grouping reports.

use comfy_table::{
    Attribute, Cell, CellAlignment, Color, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_FULL,
};

use crate::types::{GroupingResult, TopException};

/// Longest example message shown in a table cell, in characters.
const MESSAGE_WIDTH: usize = 60;

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.apply_modifier(UTF8_ROUND_CORNERS);
    table.set_header(
        headers
            .iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
            .collect::<Vec<_>>(),
    );
    table
}

/// Shortens `message` to `max_chars` characters, marking the cut with "...".
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    let single_line = message.lines().next().unwrap_or_default();
    if single_line.chars().count() <= max_chars && single_line.len() == message.len() {
        return message.to_string();
    }
    let kept: String = single_line.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Table of the most frequent exception groups, in rank order.
pub fn create_top_exceptions_table(top: &[TopException]) -> String {
    let mut table = new_table(&["#", "Count", "Type", "Example message", "Last seen", "Group"]);

    for (rank, entry) in top.iter().enumerate() {
        table.add_row(vec![
            Cell::new(rank + 1).set_alignment(CellAlignment::Right),
            Cell::new(entry.count)
                .set_alignment(CellAlignment::Right)
                .add_attribute(Attribute::Bold),
            Cell::new(&entry.metadata.exception_type),
            Cell::new(truncate_message(&entry.metadata.example_message, MESSAGE_WIDTH)),
            Cell::new(entry.last_seen.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(&entry.group_id),
        ]);
    }

    table.to_string()
}

/// Key/value table describing one grouping decision.
pub fn create_grouping_table(result: &GroupingResult) -> String {
    let mut table = new_table(&["Field", "Value"]);

    let (outcome, color) = if result.is_new_group {
        ("new group", Color::Green)
    } else {
        ("matched existing group", Color::Yellow)
    };

    table.add_row(vec![Cell::new("Group"), Cell::new(&result.group_id)]);
    table.add_row(vec![
        Cell::new("Outcome"),
        Cell::new(outcome).fg(color).add_attribute(Attribute::Bold),
    ]);
    table.add_row(vec![
        Cell::new("Confidence"),
        Cell::new(format!("{:.3}", result.confidence)),
    ]);
    if !result.similar_group_ids.is_empty() {
        let similar = result
            .similar_group_ids
            .iter()
            .map(|id| id.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        table.add_row(vec![Cell::new("Similar groups"), Cell::new(similar)]);
    }

    table.to_string()
}
