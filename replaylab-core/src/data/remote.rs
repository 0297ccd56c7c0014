//! HTTP client for a remote snapshot store.
//!
//! The store answers `POST {base_url}/snapshots` with a JSON body naming the
//! symbol, the mode and the missing units, and replies `{"snapshots": [...]}`.
//! A 404 means the store holds nothing for the request.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::calendar::MissingUnits;
use super::provider::{DataError, RemoteStore};
use crate::domain::{BacktestMode, Snapshot};

#[derive(Debug, Serialize)]
struct SnapshotQuery<'a> {
    symbol: &'a str,
    mode: BacktestMode,
    missing: &'a MissingUnits,
}

#[derive(Debug, Deserialize)]
struct SnapshotReply {
    #[serde(default)]
    snapshots: Vec<Snapshot>,
}

/// Blocking JSON client with retry and exponential backoff.
pub struct HttpStore {
    client: reqwest::blocking::Client,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_delay = base_delay;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/snapshots", self.base_url)
    }

    fn remote_error(&self, message: impl Into<String>) -> DataError {
        DataError::Remote {
            store: self.base_url.clone(),
            message: message.into(),
        }
    }
}

impl RemoteStore for HttpStore {
    fn name(&self) -> &str {
        &self.base_url
    }

    fn query(
        &self,
        symbol: &str,
        mode: BacktestMode,
        missing: &MissingUnits,
    ) -> Result<Vec<Snapshot>, DataError> {
        if missing.is_empty() {
            return Ok(Vec::new());
        }
        let body = SnapshotQuery {
            symbol,
            mode,
            missing,
        };
        let url = self.endpoint();
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                debug!(symbol, attempt, ?delay, "retrying remote query");
                std::thread::sleep(delay);
            }

            match self.client.post(&url).json(&body).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Ok(Vec::new());
                    }

                    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                    {
                        last_error = Some(self.remote_error(format!("HTTP {status} for {symbol}")));
                        continue;
                    }

                    if !status.is_success() {
                        return Err(self.remote_error(format!("HTTP {status} for {symbol}")));
                    }

                    let reply: SnapshotReply = resp.json().map_err(|e| {
                        self.remote_error(format!("failed to parse reply for {symbol}: {e}"))
                    })?;
                    let (kept, foreign): (Vec<_>, Vec<_>) = reply
                        .snapshots
                        .into_iter()
                        .partition(|s| s.symbol() == symbol && s.mode() == mode);
                    if !foreign.is_empty() {
                        warn!(
                            symbol,
                            dropped = foreign.len(),
                            "remote reply contained snapshots for another symbol or mode"
                        );
                    }
                    return Ok(kept);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(DataError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| self.remote_error("max retries exceeded")))
    }
}
