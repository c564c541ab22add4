//! Output formatting: table, JSON, plain.
//!
//! Renders area records in the format selected by `--output`. Table uses
//! `tabled`, structured formats use serde, plain emits one tab-separated
//! record per line.

use std::io::{self, IsTerminal, Write};

use areawatch_core::{AreaRecord, SessionStatus};
use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// One-line session status, highlighted when the shown data may be outdated.
pub fn status_line(status: &SessionStatus, color: bool) -> String {
    let text = status.to_string();
    if !color {
        return if status.shows_stale_data() {
            format!("! {text}")
        } else {
            text
        };
    }
    match status {
        s if s.shows_stale_data() => format!("{}", format!("! {text}").bright_yellow().bold()),
        SessionStatus::Rejected { .. } | SessionStatus::QueryTimedOut { .. } => {
            format!("{}", text.bright_red())
        }
        SessionStatus::Ready => format!("{}", text.bright_green()),
        _ => format!("{}", text.dimmed()),
    }
}

// ── Rows ─────────────────────────────────────────────────────────────

#[derive(Tabled)]
struct AreaRow {
    #[tabled(rename = "Country")]
    country: String,
    #[tabled(rename = "Area (km²)")]
    area: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl From<&AreaRecord> for AreaRow {
    fn from(r: &AreaRecord) -> Self {
        Self {
            country: r.country_id.to_string(),
            area: format_area(r.area),
            source: r.source.to_string(),
            updated: r.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

/// Thousands-separated area, with decimals only when present.
fn format_area(area: f64) -> String {
    let raw = if area.fract().abs() < f64::EPSILON {
        format!("{area:.0}")
    } else {
        format!("{area:.2}")
    };
    let (int_part, frac_part) = raw.split_once('.').map_or((raw.as_str(), None), |(i, f)| (i, Some(f)));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    match frac_part {
        Some(f) => format!("{grouped}.{f}"),
        None => grouped,
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render area records in the chosen format.
pub fn render_records(format: OutputFormat, records: &[&AreaRecord]) -> String {
    match format {
        OutputFormat::Table => {
            let rows: Vec<AreaRow> = records.iter().map(|r| AreaRow::from(*r)).collect();
            Table::new(rows).with(Style::rounded()).to_string()
        }
        OutputFormat::Json => render_json(records, false),
        OutputFormat::JsonCompact => render_json(records, true),
        OutputFormat::Plain => records
            .iter()
            .map(|r| format!("{}\t{}\t{}", r.country_id, r.area, r.updated_at.timestamp_millis()))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Render any serializable value; table and plain fall back to `detail_fn`.
pub fn render_single<T>(format: OutputFormat, data: &T, detail_fn: impl Fn(&T) -> String) -> String
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table | OutputFormat::Plain => detail_fn(data),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

fn render_json<T: serde::Serialize + ?Sized>(data: &T, compact: bool) -> String {
    let rendered = if compact {
        serde_json::to_string(data)
    } else {
        serde_json::to_string_pretty(data)
    };
    rendered.unwrap_or_else(|e| format!("{{\"error\":\"serialization failed: {e}\"}}"))
}
