//! Command implementations.

mod poll;
mod settings;
mod watch;

pub use poll::cmd_poll;
pub use settings::cmd_settings;
pub use watch::cmd_watch;

use std::path::PathBuf;

use anyhow::Result;
use aqi_core::{ConnectionConfig, DataSource, FileStore, Settings};
use time::OffsetDateTime;
use tracing::debug;

use crate::cli::{OutputArgs, OutputFormat};
use crate::format::{format_reading_line, format_state_json, format_status, is_new_reading};

/// Open the settings file given on the command line, or the default one.
pub(crate) fn open_settings(path: Option<PathBuf>) -> Settings<FileStore> {
    let store = match path {
        Some(path) => FileStore::new(path),
        None => FileStore::open_default(),
    };
    Settings::new(store)
}

/// Start `source` and print its state until interrupted or until
/// `output.count` readings have arrived.
pub(crate) async fn follow(
    source: &dyn DataSource,
    config: ConnectionConfig,
    output: &OutputArgs,
    no_color: bool,
) -> Result<()> {
    let mut states = source.subscribe_state();
    source.start(config);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut last_seen: Option<OffsetDateTime> = None;
    let mut last_status: Option<String> = None;
    let mut received = 0u64;

    loop {
        let state = states.borrow_and_update().clone();
        let now = OffsetDateTime::now_utc();
        let fresh = is_new_reading(&state, last_seen);
        if fresh {
            last_seen = state.last_updated;
            received += 1;
        }

        match output.format {
            OutputFormat::Json => println!("{}", format_state_json(&state, now)?),
            OutputFormat::Text => {
                let status = format_status(&state, no_color);
                if status.is_some() && status != last_status {
                    if let Some(line) = &status {
                        eprintln!("{}", line);
                    }
                }
                last_status = status;
                if fresh {
                    if let Some(reading) = &state.reading {
                        println!("{}", format_reading_line(reading, state.last_updated, now, no_color));
                    }
                }
            }
        }

        if output.count > 0 && received >= output.count {
            debug!("Received {} readings, exiting", received);
            break;
        }

        tokio::select! {
            _ = &mut shutdown => {
                eprintln!("\nShutting down...");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    source.stop();
    Ok(())
}
