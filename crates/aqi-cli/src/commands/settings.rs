//! Settings command: show, change or reset the saved connection settings.

use std::path::PathBuf;

use anyhow::{Result, bail};
use aqi_core::SettingsField;
use owo_colors::OwoColorize;

use crate::cli::{OutputFormat, SettingsAction};
use crate::format::{format_settings_json, format_settings_text};

use super::open_settings;

pub fn cmd_settings(action: SettingsAction, settings_path: Option<PathBuf>, no_color: bool) -> Result<()> {
    let settings = open_settings(settings_path);
    let path = settings.store().path().to_path_buf();

    match action {
        SettingsAction::Show { format } => {
            let config = settings.load();
            match format {
                OutputFormat::Text => print!("{}", format_settings_text(&config, &path, no_color)),
                OutputFormat::Json => print!("{}", format_settings_json(&config, &path)?),
            }
        }
        SettingsAction::Set { field, value } => {
            let field: SettingsField = field.parse()?;
            let mut candidate = settings.load();
            match field {
                SettingsField::Broker => candidate.endpoint = value.clone(),
                SettingsField::Port => candidate.port = Some(value.clone()),
                SettingsField::Topic => candidate.topic = value.clone(),
            }
            let errors = candidate.validate();
            if !errors.is_empty() {
                let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
                bail!("Invalid {}: {}", field, messages.join("; "));
            }

            settings.update(field, value.clone())?;
            let ok = if no_color {
                "[OK]".to_string()
            } else {
                "[OK]".green().to_string()
            };
            println!("{} {} = {}", ok, field, value);
        }
        SettingsAction::Reset => {
            let config = settings.reset_to_defaults()?;
            print!("{}", format_settings_text(&config, &path, no_color));
        }
        SettingsAction::Path => println!("{}", path.display()),
    }

    Ok(())
}
