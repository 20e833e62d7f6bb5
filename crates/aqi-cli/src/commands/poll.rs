//! Poll command: fetch readings over HTTP on an interval.

use std::time::Duration;

use anyhow::Result;
use aqi_core::{ConnectionConfig, HttpFetcher, PollingManager, PollingOptions, StaleDataPolicy};
use tracing::info;

use crate::cli::PollArgs;

use super::follow;

pub async fn cmd_poll(args: PollArgs, quiet: bool, no_color: bool) -> Result<()> {
    let mut config = ConnectionConfig::new(args.endpoint, args.path);
    if let Some(port) = args.port {
        config = config.with_port(port);
    }
    let url = config.poll_url()?;

    let request_timeout = Duration::from_secs(args.timeout.max(1));
    let stale_data = if args.clear_stale {
        StaleDataPolicy::Clear
    } else {
        StaleDataPolicy::Preserve
    };
    let options = PollingOptions::new()
        .poll_interval(Duration::from_secs(args.interval.max(1)))
        .request_timeout(request_timeout)
        .stale_data(stale_data);
    options.validate()?;

    info!(%url, interval = args.interval, "Polling");
    if !quiet {
        eprintln!("Polling {} every {}s", url, args.interval.max(1));
        eprintln!("Press Ctrl+C to stop.\n");
    }

    let manager = PollingManager::with_options(HttpFetcher::new(request_timeout)?, options);
    follow(&manager, config, &args.output, no_color).await
}
