//! HTTP fetcher for sensors that serve their latest reading over HTTP.
//!
//! ```no_run
//! use aqi_core::{Fetcher, HttpFetcher};
//!
//! # async fn example() -> aqi_core::Result<()> {
//! let fetcher = HttpFetcher::new(std::time::Duration::from_secs(10))?;
//! let body = fetcher.fetch("http://192.168.1.100/aqi").await?;
//! println!("{} bytes", body.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::debug;

use crate::error::{Error, Result};
use crate::traits::Fetcher;

/// `reqwest`-backed [`Fetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::invalid_config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, timeout })
    }

    /// Create a fetcher with a custom reqwest Client.
    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn map_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::RequestTimeout(self.timeout)
        } else {
            Error::from(err)
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        debug!(url, "Fetching reading");
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(|e| self.map_error(e))
    }
}
