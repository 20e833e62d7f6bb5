//! Output formatting for readings, connection state and settings.

use std::path::Path;

use anyhow::Result;
use aqi_core::{AcquisitionState, ConnectionConfig, time_since_update};
use aqi_types::{AqiCategory, Reading};
use owo_colors::OwoColorize;
use serde::Serialize;
use time::OffsetDateTime;

/// Parse a `#RRGGBB` colour.
fn hex_rgb(hex: &str) -> Option<(u8, u8, u8)> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

/// Category label in its display colour.
#[must_use]
pub fn format_category(category: AqiCategory, no_color: bool) -> String {
    let label = category.label();
    match hex_rgb(category.color()) {
        Some((r, g, b)) if !no_color => format!("[{}]", label.truecolor(r, g, b).bold()),
        _ => format!("[{}]", label),
    }
}

/// One line per reading: time, category, AQI, particulates, gas indices,
/// climate and age.
#[must_use]
pub fn format_reading_line(
    reading: &Reading,
    last_updated: Option<OffsetDateTime>,
    now: OffsetDateTime,
    no_color: bool,
) -> String {
    let ts = reading.timestamp;
    let age = time_since_update(last_updated, now);
    let aqi = format!("AQI {:.0}", reading.aqi());
    let aqi = if no_color { aqi } else { aqi.bold().to_string() };

    format!(
        "{:02}:{:02}:{:02}  {} {}  PM1.0 {:.1}  PM2.5 {:.1}  PM4.0 {:.1}  PM10 {:.1}  VOC {:.0}  NOx {:.0}  {:.1}°C  {:.0}%  ({})",
        ts.hour(),
        ts.minute(),
        ts.second(),
        format_category(reading.category(), no_color),
        aqi,
        reading.pm1_0,
        reading.pm2_5,
        reading.pm4_0,
        reading.pm10,
        reading.voc_index,
        reading.nox_index,
        reading.temperature,
        reading.humidity,
        age,
    )
}

/// Status line for the non-reading parts of a state, or `None` when there
/// is nothing to report.
#[must_use]
pub fn format_status(state: &AcquisitionState, no_color: bool) -> Option<String> {
    let tag = |label: &str, offline: bool| {
        if no_color {
            format!("[{}]", label)
        } else if offline {
            format!("[{}]", label.truecolor(255, 165, 0))
        } else {
            format!("[{}]", label.red())
        }
    };

    if let Some(error) = &state.error {
        let label = if state.is_offline { "OFFLINE" } else { "ERROR" };
        return Some(format!("{} {}", tag(label, state.is_offline), error));
    }
    if state.loading {
        let message = if state.is_connected {
            "Waiting for data..."
        } else {
            "Connecting..."
        };
        return Some(if no_color {
            message.to_string()
        } else {
            message.dimmed().to_string()
        });
    }
    None
}

#[derive(Serialize)]
struct StateJson<'a> {
    #[serde(flatten)]
    state: &'a AcquisitionState,
    updated: String,
}

/// One compact JSON object per state change, with a human-readable age.
pub fn format_state_json(state: &AcquisitionState, now: OffsetDateTime) -> Result<String> {
    let json = StateJson {
        state,
        updated: time_since_update(state.last_updated, now).to_string(),
    };
    Ok(serde_json::to_string(&json)?)
}

fn kv(key: &str, value: &str, no_color: bool) -> String {
    if no_color {
        format!("{:<8} {}\n", format!("{}:", key), value)
    } else {
        format!("{:<8} {}\n", format!("{}:", key).bold(), value)
    }
}

#[must_use]
pub fn format_settings_text(config: &ConnectionConfig, path: &Path, no_color: bool) -> String {
    let mut output = String::new();
    output.push_str(&kv("Broker", &config.endpoint, no_color));
    output.push_str(&kv("Port", config.port.as_deref().unwrap_or("-"), no_color));
    output.push_str(&kv("Topic", &config.topic, no_color));
    output.push_str(&kv("File", &path.display().to_string(), no_color));
    output
}

pub fn format_settings_json(config: &ConnectionConfig, path: &Path) -> Result<String> {
    #[derive(Serialize)]
    struct SettingsJson<'a> {
        #[serde(flatten)]
        config: &'a ConnectionConfig,
        path: String,
    }

    let json = SettingsJson {
        config,
        path: path.display().to_string(),
    };
    Ok(serde_json::to_string_pretty(&json)? + "\n")
}

/// Whether a state carries a reading the user has not seen yet.
#[must_use]
pub fn is_new_reading(state: &AcquisitionState, last_seen: Option<OffsetDateTime>) -> bool {
    state.reading.is_some() && state.last_updated.is_some() && state.last_updated != last_seen
}
