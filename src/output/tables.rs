use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};

use crate::report::Severity;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn create_cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

pub fn severity_cell(severity: Severity) -> Cell {
    let cell = Cell::new(severity.to_string().to_uppercase());
    match severity {
        Severity::High => cell.fg(TableColor::Red),
        Severity::Medium => cell.fg(TableColor::Yellow),
        Severity::Low => cell.fg(TableColor::Green),
    }
}

/// Observed over median; red from 3x, yellow from 2x. A zero median shows as "n/a".
pub fn color_coded_ratio_cell(ratio: Option<f64>) -> Cell {
    let Some(ratio) = ratio else {
        return Cell::new("n/a").fg(TableColor::Red);
    };
    let text = format!("{ratio:.1}x");
    if ratio >= 3.0 {
        Cell::new(text).fg(TableColor::Red)
    } else if ratio >= 2.0 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Green)
    }
}

pub fn color_coded_seconds_cell(seconds: f64) -> Cell {
    let text = format_seconds(seconds);
    if seconds <= 60.0 {
        Cell::new(text).fg(TableColor::Green)
    } else if seconds <= 600.0 {
        Cell::new(text).fg(TableColor::Yellow)
    } else {
        Cell::new(text).fg(TableColor::Red)
    }
}

pub fn color_coded_count_cell(count: usize, warn_at: usize, alert_at: usize) -> Cell {
    if count >= alert_at {
        Cell::new(count).fg(TableColor::Red)
    } else if count >= warn_at {
        Cell::new(count).fg(TableColor::Yellow)
    } else {
        Cell::new(count)
    }
}

pub fn format_seconds(seconds: f64) -> String {
    if seconds >= 60.0 {
        format!("{:.1}min", seconds / 60.0)
    } else {
        format!("{seconds:.1}s")
    }
}

/// Shortens `text` to `max_chars`, marking the cut with "...".
pub fn truncate(text: &str, max_chars: usize) -> String {
    let single_line = text.lines().next().unwrap_or_default();
    let mut chars = single_line.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() || text.lines().nth(1).is_some() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(12.34), "12.3s");
        assert_eq!(format_seconds(90.0), "1.5min");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer message", 6), "a much...");
        assert_eq!(truncate("first line\nsecond line", 40), "first line...");
    }
}
