//! Portfolio backend collaborators
//!
//! The agent only reads through these traits. Holdings CRUD, currency
//! conversion and the market-data HTTP client live elsewhere.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod analysis;
pub mod http;
pub mod memory;

pub use analysis::{PerformanceAnalysis, PerformanceComparison, PortfolioAnalyzer};
pub use http::PortfolioApiClient;
pub use memory::{InMemoryHoldings, InMemoryMarketData};

/// One position valued on a given date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HoldingPosition {
    pub ticker: String,
    pub instrument_name: String,
    pub platform_name: String,
    pub units: f64,
    #[serde(default)]
    pub current_price: Option<f64>,
    pub current_value: f64,
    pub bought_value: f64,
}

impl HoldingPosition {
    pub fn gain_loss(&self) -> f64 {
        self.current_value - self.bought_value
    }

    /// Fractional gain (0.10 == 10%); zero when nothing was paid.
    pub fn gain_loss_percentage(&self) -> f64 {
        if self.bought_value > 0.0 {
            self.gain_loss() / self.bought_value
        } else {
            0.0
        }
    }
}

/// All positions of one account on one valuation date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountHoldings {
    pub account_id: i64,
    pub valuation_date: NaiveDate,
    pub holdings: Vec<HoldingPosition>,
}

impl AccountHoldings {
    pub fn total_current_value(&self) -> f64 {
        self.holdings.iter().map(|h| h.current_value).sum()
    }

    pub fn total_bought_value(&self) -> f64 {
        self.holdings.iter().map(|h| h.bought_value).sum()
    }

    pub fn total_gain_loss(&self) -> f64 {
        self.total_current_value() - self.total_bought_value()
    }

    pub fn total_gain_loss_percentage(&self) -> f64 {
        let bought = self.total_bought_value();
        if bought > 0.0 {
            self.total_gain_loss() / bought
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsItem {
    pub title: String,
    pub summary: String,
    pub source: String,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub tickers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentimentScore {
    pub ticker: String,
    pub date: NaiveDate,
    /// -1.0 (bearish) ..= 1.0 (bullish)
    pub score: f64,
    pub article_count: u32,
}

impl SentimentScore {
    pub fn label(&self) -> &'static str {
        if self.score > 0.15 {
            "Bullish"
        } else if self.score < -0.15 {
            "Bearish"
        } else {
            "Neutral"
        }
    }
}

#[async_trait]
pub trait HoldingsSource: Send + Sync {
    /// `Ok(None)` when the account has no valuation for that date.
    async fn holdings(&self, account_id: i64, date: NaiveDate) -> Result<Option<AccountHoldings>>;
}

#[async_trait]
pub trait MarketData: Send + Sync {
    async fn real_time_price(&self, ticker: &str) -> Result<f64>;

    /// Latest headlines; general market news when `tickers` is empty.
    async fn news(&self, tickers: &[String], limit: usize) -> Result<Vec<NewsItem>>;

    async fn sentiment(&self, tickers: &[String], date: NaiveDate) -> Result<Vec<SentimentScore>>;
}

/// Request-scoped backend handles a tool set closes over.
#[derive(Clone)]
pub struct BackendHandles {
    pub holdings: Arc<dyn HoldingsSource>,
    pub market: Option<Arc<dyn MarketData>>,
}

impl BackendHandles {
    pub fn new(holdings: Arc<dyn HoldingsSource>) -> Self {
        Self {
            holdings,
            market: None,
        }
    }

    pub fn with_market(mut self, market: Arc<dyn MarketData>) -> Self {
        self.market = Some(market);
        self
    }
}
