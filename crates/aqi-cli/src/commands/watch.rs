//! Watch command: follow an MQTT topic.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use aqi_core::{MqttTransport, StaleDataPolicy, SubscriptionManager, SubscriptionOptions};
use tracing::info;

use crate::cli::WatchArgs;

use super::{follow, open_settings};

pub async fn cmd_watch(
    args: WatchArgs,
    settings_path: Option<PathBuf>,
    quiet: bool,
    no_color: bool,
) -> Result<()> {
    let settings = open_settings(settings_path);
    let mut config = settings.load();
    if let Some(broker) = args.broker {
        config.endpoint = broker;
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(topic) = args.topic {
        config.topic = topic;
    }

    let target = config.broker_target()?;
    info!(url = %target.url, topic = %target.topic, "Watching");
    if !quiet {
        eprintln!("Subscribing to {} on {}", target.topic, target.url);
        eprintln!("Press Ctrl+C to stop.\n");
    }

    let stale_data = if args.keep_stale {
        StaleDataPolicy::Preserve
    } else {
        StaleDataPolicy::Clear
    };
    let options = SubscriptionOptions::new()
        .connect_timeout(Duration::from_secs(args.connect_timeout.max(1)))
        .stale_data(stale_data);
    options.validate()?;

    let manager = SubscriptionManager::with_options(MqttTransport::new(), options);
    follow(&manager, config, &args.output, no_color).await
}
