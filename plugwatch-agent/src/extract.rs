//! Raw device output to forwardable values.
//!
//! The device CLI prints a human-oriented energy report (`Voltage: 230.456 V`)
//! and a system-info dump whose trailing lines are a single-quoted pseudo-JSON
//! payload. Everything here is pure text handling so it stays testable without
//! a device.

use chrono::{DateTime, Duration, Local};
use serde_json::Value;

/// Scrapes one energy value from the report output.
///
/// Takes the first line starting with `label`, drops the label and the
/// trailing unit suffix and re-renders the number with two decimals. Anything
/// that does not scan yields an empty string; the caller forwards it anyway.
pub fn energy_value(output: &str, label: &str) -> String {
    for line in output.lines() {
        if let Some(rest) = line.strip_prefix(label) {
            let token = rest.trim().trim_end_matches(|c: char| c.is_ascii_alphabetic());
            return match token.trim().parse::<f64>() {
                Ok(v) => format!("{v:.2}"),
                Err(_) => String::new(),
            };
        }
    }
    String::new()
}

/// Cuts the trailing `budget` lines out of the info output and parses them.
///
/// The device quotes its payload with `'`; every quote is swapped to `"`
/// before parsing. Values containing a literal apostrophe therefore break the
/// payload and every info metric of that run comes out empty.
pub fn info_payload(output: &str, budget: usize) -> Option<Value> {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(budget);
    let payload = lines[start..].join("\n").replace('\'', "\"");
    serde_json::from_str(&payload).ok()
}

/// Plain rendering: strings verbatim, everything else as its JSON text.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The device reports an empty hash for plugs that never set an icon.
pub fn icon_hash(value: &Value) -> String {
    let rendered = render_value(value);
    if rendered.is_empty() {
        "empty".to_string()
    } else {
        rendered
    }
}

/// Swaps the `led_off` flag so the forwarded value reads as "LED enabled".
pub fn led_state(value: &Value) -> String {
    match value.as_i64() {
        Some(0) => "1".to_string(),
        Some(1) => "0".to_string(),
        _ => render_value(value),
    }
}

/// `next_action` is a nested schedule object; only its `type` is forwarded.
pub fn next_action_type(value: &Value) -> String {
    match value.get("type") {
        Some(t) => render_value(t),
        None => String::new(),
    }
}

/// Turns seconds-since-power-on into the absolute power-on instant.
///
/// An uptime too large to subtract from `now` comes out empty, like every
/// other unreadable value.
pub fn power_on_instant(secs: i64, now: DateTime<Local>) -> String {
    Duration::try_seconds(secs)
        .and_then(|uptime| now.checked_sub_signed(uptime))
        .map(|instant| instant.format("%d.%m.%Y %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Finds the hardware model in the raw info output.
///
/// Runs before the payload is parseable: the line budget needed for parsing
/// depends on the model itself. Scans for the `model` field textually and
/// sanitizes whatever follows the colon.
pub fn scan_model(raw: &str) -> Option<String> {
    for line in raw.lines() {
        let key = line.find("'model'").or_else(|| line.find("\"model\""));
        if let Some(pos) = key {
            let after = &line[pos..];
            if let Some(colon) = after.find(':') {
                let value = after[colon + 1..].trim_start();
                let end = value.find(|c| c == ',' || c == '}').unwrap_or(value.len());
                let model = sanitize_model(&value[..end]);
                if !model.is_empty() {
                    return Some(model);
                }
            }
        }
    }
    None
}

/// Strips quoting residue and maps every non-alphanumeric character to `_`,
/// so the model can be used as a lookup key: `HS110(EU)` becomes `HS110_EU_`.
pub fn sanitize_model(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(',')
        .trim_matches(|c| c == '\'' || c == '"')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
