//! Real-time price tool with bounded fan-out

use super::{error_payload, parse_args, success_payload, Tool};
use crate::backend::MarketData;
use crate::Result;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct PricesArgs {
    tickers: Vec<String>,
}

pub struct RealTimePricesTool {
    account_id: i64,
    market: Option<Arc<dyn MarketData>>,
    concurrency: usize,
}

impl RealTimePricesTool {
    pub fn new(account_id: i64, market: Option<Arc<dyn MarketData>>, concurrency: usize) -> Self {
        Self {
            account_id,
            market,
            concurrency: concurrency.max(1),
        }
    }
}

/// Fetch prices with at most `limit` lookups in flight.
///
/// Failed lookups are logged and left out of the result.
pub async fn fetch_prices_concurrently(
    market: &dyn MarketData,
    tickers: &[String],
    limit: usize,
) -> BTreeMap<String, f64> {
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));

    let lookups = tickers.iter().map(|ticker| {
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore.acquire().await.ok()?;
            match market.real_time_price(ticker).await {
                Ok(price) => Some((ticker.clone(), price)),
                Err(e) => {
                    warn!(%ticker, error = %e, "Price lookup failed");
                    None
                }
            }
        }
    });

    join_all(lookups).await.into_iter().flatten().collect()
}

#[async_trait::async_trait]
impl Tool for RealTimePricesTool {
    fn name(&self) -> &'static str {
        "get_real_time_prices"
    }

    fn description(&self) -> &'static str {
        "Get current market prices for specific ticker symbols \
         (e.g. [\"AAPL.US\", \"MSFT.US\"]). Returns a map of ticker to price."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "tickers": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Ticker symbols such as AAPL.US",
                },
            },
            "required": ["tickers"],
        })
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let args: PricesArgs = parse_args(self.name(), arguments)?;

        let Some(market) = &self.market else {
            return Ok(error_payload(
                self.account_id,
                "Real-time pricing service is not configured. Please contact support.",
            ));
        };
        if args.tickers.is_empty() {
            return Ok(error_payload(
                self.account_id,
                "No ticker symbols provided. Please specify at least one ticker.",
            ));
        }

        info!(account_id = self.account_id, count = args.tickers.len(), "Fetching real-time prices");
        let prices = fetch_prices_concurrently(market.as_ref(), &args.tickers, self.concurrency).await;

        success_payload(
            self.account_id,
            json!({
                "message": format!(
                    "Retrieved {} real-time prices out of {} requested tickers",
                    prices.len(),
                    args.tickers.len()
                ),
                "prices": prices,
            }),
        )
    }
}
