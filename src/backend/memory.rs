//! In-memory backends for local runs and tests

use super::{AccountHoldings, HoldingPosition, HoldingsSource, MarketData, NewsItem, SentimentScore};
use crate::error::AgentError;
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Holdings keyed by (account, valuation date).
#[derive(Clone, Default)]
pub struct InMemoryHoldings {
    snapshots: Arc<RwLock<HashMap<(i64, NaiveDate), Vec<HoldingPosition>>>>,
}

impl InMemoryHoldings {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, account_id: i64, date: NaiveDate, holdings: Vec<HoldingPosition>) {
        self.snapshots
            .write()
            .await
            .insert((account_id, date), holdings);
    }
}

#[async_trait]
impl HoldingsSource for InMemoryHoldings {
    async fn holdings(&self, account_id: i64, date: NaiveDate) -> Result<Option<AccountHoldings>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots
            .get(&(account_id, date))
            .map(|holdings| AccountHoldings {
                account_id,
                valuation_date: date,
                holdings: holdings.clone(),
            }))
    }
}

/// Fixed prices, headlines and sentiment scores.
///
/// Tracks how many price lookups overlap so fan-out limits can be observed.
#[derive(Clone, Default)]
pub struct InMemoryMarketData {
    prices: HashMap<String, f64>,
    news: Vec<NewsItem>,
    sentiment: HashMap<String, f64>,
    latency: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, ticker: &str, price: f64) -> Self {
        self.prices.insert(ticker.to_string(), price);
        self
    }

    pub fn with_news(mut self, item: NewsItem) -> Self {
        self.news.push(item);
        self
    }

    pub fn with_sentiment(mut self, ticker: &str, score: f64) -> Self {
        self.sentiment.insert(ticker.to_string(), score);
        self
    }

    /// Delay every price lookup.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Highest number of simultaneous price lookups seen so far.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketData for InMemoryMarketData {
    async fn real_time_price(&self, ticker: &str) -> Result<f64> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.prices
            .get(ticker)
            .copied()
            .ok_or_else(|| AgentError::ToolExecution(format!("No price available for {}", ticker)))
    }

    async fn news(&self, tickers: &[String], limit: usize) -> Result<Vec<NewsItem>> {
        Ok(self
            .news
            .iter()
            .filter(|item| tickers.is_empty() || item.tickers.iter().any(|t| tickers.contains(t)))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn sentiment(&self, tickers: &[String], date: NaiveDate) -> Result<Vec<SentimentScore>> {
        Ok(tickers
            .iter()
            .filter_map(|ticker| {
                self.sentiment.get(ticker).map(|score| SentimentScore {
                    ticker: ticker.clone(),
                    date,
                    score: *score,
                    article_count: 1,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_holdings_are_scoped_by_account_and_date() {
        let source = InMemoryHoldings::new();
        let date = NaiveDate::from_ymd_opt(2025, 5, 1).unwrap();
        source.insert(1, date, Vec::new()).await;

        assert!(source.holdings(1, date).await.unwrap().is_some());
        assert!(source.holdings(2, date).await.unwrap().is_none());
        assert!(source.holdings(1, date.succ_opt().unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_ticker_price_fails() {
        let market = InMemoryMarketData::new().with_price("AAPL.US", 190.0);
        assert_eq!(market.real_time_price("AAPL.US").await.unwrap(), 190.0);
        assert!(market.real_time_price("ZZZZ.US").await.is_err());
        assert_eq!(market.peak_in_flight(), 1);
    }
}
