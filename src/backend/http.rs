//! REST client for the portfolio backend's holdings endpoint

use super::{AccountHoldings, HoldingPosition, HoldingsSource};
use crate::error::AgentError;
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use std::time::Duration;
use tracing::{debug, error};

/// Reads valuations from `GET /api/holdings/date/{date}`.
///
/// The account travels in the `x-account-id` header, the same way the auth
/// gateway forwards it to every backend service.
#[derive(Clone)]
pub struct PortfolioApiClient {
    client: Client,
    base_url: String,
}

impl PortfolioApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn holdings_url(&self, date: NaiveDate) -> String {
        format!("{}/api/holdings/date/{}", self.base_url, date.format("%Y-%m-%d"))
    }
}

#[async_trait]
impl HoldingsSource for PortfolioApiClient {
    async fn holdings(&self, account_id: i64, date: NaiveDate) -> Result<Option<AccountHoldings>> {
        let url = self.holdings_url(date);
        debug!(account_id, %url, "Fetching holdings");

        let response = self
            .client
            .get(&url)
            .header("x-account-id", account_id.to_string())
            .send()
            .await
            .map_err(|e| {
                AgentError::ToolExecution(format!("Portfolio API request failed for {}: {}", url, e))
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(account_id, %status, "Portfolio API error response");
            return Err(AgentError::ToolExecution(format!(
                "Portfolio API returned {} for {}: {}",
                status, url, body
            )));
        }

        let wire: WireHoldingsResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ToolExecution(format!("Invalid holdings response: {}", e)))?;

        Ok(Some(wire.into_domain(account_id)))
    }
}

//
// ================= Wire Types =================
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHoldingsResponse {
    valuation_date: NaiveDate,
    #[serde(default)]
    holdings: Vec<WireHolding>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireHolding {
    ticker: String,
    instrument_name: String,
    #[serde(default)]
    platform_name: String,
    #[serde(deserialize_with = "decimal")]
    units: f64,
    #[serde(default, deserialize_with = "optional_decimal")]
    current_price: Option<f64>,
    #[serde(deserialize_with = "decimal")]
    current_value: f64,
    #[serde(deserialize_with = "decimal")]
    bought_value: f64,
}

impl WireHoldingsResponse {
    /// The account is always the caller's, whatever the body says.
    fn into_domain(self, account_id: i64) -> AccountHoldings {
        AccountHoldings {
            account_id,
            valuation_date: self.valuation_date,
            holdings: self
                .holdings
                .into_iter()
                .map(|h| HoldingPosition {
                    ticker: h.ticker,
                    instrument_name: h.instrument_name,
                    platform_name: h.platform_name,
                    units: h.units,
                    current_price: h.current_price,
                    current_value: h.current_value,
                    bought_value: h.bought_value,
                })
                .collect(),
        }
    }
}

/// Decimals arrive either as JSON numbers or as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Decimal {
    Number(f64),
    Text(String),
}

impl Decimal {
    fn into_f64<E: serde::de::Error>(self) -> std::result::Result<f64, E> {
        match self {
            Decimal::Number(n) => Ok(n),
            Decimal::Text(s) => s.trim().parse().map_err(E::custom),
        }
    }
}

fn decimal<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    Decimal::deserialize(deserializer)?.into_f64()
}

fn optional_decimal<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<f64>, D::Error> {
    Option::<Decimal>::deserialize(deserializer)?
        .map(Decimal::into_f64)
        .transpose()
}
