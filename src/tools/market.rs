//! Market news and sentiment tools

use super::dates::parse_date;
use super::{error_payload, parse_args, success_payload, Tool};
use crate::backend::MarketData;
use crate::Result;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_NEWS_LIMIT: usize = 5;
const MAX_NEWS_LIMIT: usize = 20;

pub(crate) const MARKET_NOT_CONFIGURED: &str =
    "Market data service is not configured. Please contact support.";

//
// ================= News =================
//

#[derive(Debug, Deserialize)]
struct MarketContextArgs {
    #[serde(default)]
    tickers: Option<Vec<String>>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct MarketContextTool {
    account_id: i64,
    market: Option<Arc<dyn MarketData>>,
}

impl MarketContextTool {
    pub fn new(account_id: i64, market: Option<Arc<dyn MarketData>>) -> Self {
        Self { account_id, market }
    }
}

#[async_trait::async_trait]
impl Tool for MarketContextTool {
    fn name(&self) -> &'static str {
        "get_market_context"
    }

    fn description(&self) -> &'static str {
        "Get recent market news. Pass tickers to focus on specific instruments, \
         or omit them for general market headlines."
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
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_NEWS_LIMIT,
                    "description": "Maximum number of articles (default 5)",
                },
            },
        })
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let args: MarketContextArgs = parse_args(self.name(), arguments)?;

        let Some(market) = &self.market else {
            return Ok(error_payload(self.account_id, MARKET_NOT_CONFIGURED));
        };

        let tickers = args.tickers.unwrap_or_default();
        let limit = args.limit.unwrap_or(DEFAULT_NEWS_LIMIT).clamp(1, MAX_NEWS_LIMIT);
        info!(account_id = self.account_id, ?tickers, limit, "Getting market news");

        let result = match market.news(&tickers, limit).await {
            Ok(articles) => success_payload(
                self.account_id,
                json!({
                    "tickers": tickers,
                    "message": format!("Retrieved {} articles", articles.len()),
                    "articles": articles,
                }),
            ),
            Err(e) => Err(e),
        };

        Ok(result.unwrap_or_else(|e| {
            error!(account_id = self.account_id, error = %e, "Failed to get market news");
            error_payload(self.account_id, format!("Failed to retrieve market news: {}", e))
        }))
    }
}

//
// ================= Sentiment =================
//

#[derive(Debug, Deserialize)]
struct SentimentArgs {
    tickers: Vec<String>,
    #[serde(default)]
    date: Option<String>,
}

pub struct MarketSentimentTool {
    account_id: i64,
    market: Option<Arc<dyn MarketData>>,
}

impl MarketSentimentTool {
    pub fn new(account_id: i64, market: Option<Arc<dyn MarketData>>) -> Self {
        Self { account_id, market }
    }
}

#[async_trait::async_trait]
impl Tool for MarketSentimentTool {
    fn name(&self) -> &'static str {
        "get_market_sentiment"
    }

    fn description(&self) -> &'static str {
        "Get news sentiment scores (-1 bearish to 1 bullish) for the given tickers \
         on a date, with an overall label."
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
                "date": {
                    "type": "string",
                    "description": "Date to score (defaults to today)",
                },
            },
            "required": ["tickers"],
        })
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let args: SentimentArgs = parse_args(self.name(), arguments)?;

        let Some(market) = &self.market else {
            return Ok(error_payload(self.account_id, MARKET_NOT_CONFIGURED));
        };
        if args.tickers.is_empty() {
            return Ok(error_payload(
                self.account_id,
                "No ticker symbols provided. Please specify at least one ticker.",
            ));
        }

        let date = match parse_date(args.date.as_deref().unwrap_or("today"), Utc::now().date_naive()) {
            Ok(date) => date,
            Err(message) => return Ok(error_payload(self.account_id, message)),
        };
        info!(account_id = self.account_id, tickers = ?args.tickers, %date, "Getting market sentiment");

        let result = match market.sentiment(&args.tickers, date).await {
            Ok(scores) => {
                let overall = if scores.is_empty() {
                    0.0
                } else {
                    scores.iter().map(|s| s.score).sum::<f64>() / scores.len() as f64
                };
                let overall_label = if overall > 0.15 {
                    "Bullish"
                } else if overall < -0.15 {
                    "Bearish"
                } else {
                    "Neutral"
                };
                let scores: Vec<Value> = scores
                    .iter()
                    .map(|s| {
                        json!({
                            "ticker": s.ticker,
                            "score": s.score,
                            "label": s.label(),
                            "article_count": s.article_count,
                        })
                    })
                    .collect();

                success_payload(
                    self.account_id,
                    json!({
                        "date": date,
                        "overall_score": overall,
                        "overall_label": overall_label,
                        "scores": scores,
                    }),
                )
            }
            Err(e) => Err(e),
        };

        Ok(result.unwrap_or_else(|e| {
            error!(account_id = self.account_id, error = %e, "Failed to get market sentiment");
            error_payload(self.account_id, format!("Failed to retrieve market sentiment: {}", e))
        }))
    }
}
