//! HTTP client for the balance service's `GET /balance` endpoint.

use rust_decimal::Decimal;
use std::time::Duration as StdDuration;
use tracing::debug;

use crate::types::{BalanceResponse, BalanceStatus};
use crate::{Error, Result};

/// Reads today's baseline equity from a remote balance service.
#[derive(Debug, Clone)]
pub struct BalanceServiceClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl BalanceServiceClient {
    pub const REQUEST_TIMEOUT_SECS: u64 = 10;

    #[allow(clippy::result_large_err)]
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(Self::REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the start-of-day equity. An `error` status or a missing value
    /// is reported as [`Error::DataUnavailable`].
    pub async fn initial_balance(&self) -> Result<Decimal> {
        let url = format!("{}/balance", self.base_url);
        debug!(url = %url, "Requesting initial balance");

        let response = self.http_client.get(&url).send().await?;
        let status = response.status();
        let body: BalanceResponse = response.json().await.map_err(|e| {
            if status.is_success() {
                Error::from(e)
            } else {
                Error::Api {
                    message: format!("balance service returned HTTP {}", status),
                    status: Some(status.as_u16()),
                }
            }
        })?;

        interpret_response(body)
    }
}

#[allow(clippy::result_large_err)]
fn interpret_response(body: BalanceResponse) -> Result<Decimal> {
    match (body.status, body.initial_balance) {
        (BalanceStatus::Success, Some(balance)) => Ok(balance),
        (BalanceStatus::Success, None) => Err(Error::data_unavailable(
            "balance service returned no initial balance",
        )),
        (BalanceStatus::Error, _) => Err(Error::data_unavailable(
            "balance service could not compute the initial balance",
        )),
    }
}
