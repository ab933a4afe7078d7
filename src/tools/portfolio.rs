//! Holdings, analysis and comparison tools

use super::dates::parse_date;
use super::{error_payload, parse_args, success_payload, Tool};
use crate::backend::{HoldingsSource, PortfolioAnalyzer};
use crate::Result;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

const DATE_HINT: &str = "Use 'today' or YYYY-MM-DD for current data, or a historical date \
                         (YYYY-MM-DD, DD/MM/YYYY, DD Month YYYY)";

fn date_parameter(name: &str, description: &str) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(
        name.to_string(),
        json!({ "type": "string", "description": description }),
    );
    json!({
        "type": "object",
        "properties": properties,
        "required": [name],
    })
}

//
// ================= Holdings =================
//

#[derive(Debug, Deserialize)]
struct HoldingsArgs {
    date: String,
}

pub struct HoldingsTool {
    account_id: i64,
    source: Arc<dyn HoldingsSource>,
}

impl HoldingsTool {
    pub fn new(account_id: i64, source: Arc<dyn HoldingsSource>) -> Self {
        Self { account_id, source }
    }

    async fn run(&self, date: NaiveDate) -> Result<Value> {
        info!(account_id = self.account_id, %date, "Getting portfolio holdings");

        let Some(snapshot) = self.source.holdings(self.account_id, date).await? else {
            let mut payload = error_payload(self.account_id, "No holdings found for the specified date");
            payload["date"] = json!(date);
            return Ok(payload);
        };

        let holdings: Vec<Value> = snapshot
            .holdings
            .iter()
            .map(|h| {
                json!({
                    "ticker": h.ticker,
                    "instrument_name": h.instrument_name,
                    "platform": h.platform_name,
                    "units": h.units,
                    "current_price": h.current_price.unwrap_or(0.0),
                    "current_value": h.current_value,
                    "bought_value": h.bought_value,
                    "gain_loss": h.gain_loss(),
                    "gain_loss_percentage": h.gain_loss_percentage(),
                })
            })
            .collect();

        success_payload(
            self.account_id,
            json!({
                "date": date,
                "total_value": snapshot.total_current_value(),
                "total_bought_value": snapshot.total_bought_value(),
                "total_gain_loss": snapshot.total_gain_loss(),
                "total_gain_loss_percentage": snapshot.total_gain_loss_percentage(),
                "total_holdings": holdings.len(),
                "holdings": holdings,
            }),
        )
    }
}

#[async_trait::async_trait]
impl Tool for HoldingsTool {
    fn name(&self) -> &'static str {
        "get_portfolio_holdings"
    }

    fn description(&self) -> &'static str {
        "Retrieve portfolio holdings for the user's account on a specific date: \
         ticker, instrument name, platform, units, prices, values and gain/loss, \
         plus portfolio totals."
    }

    fn parameters(&self) -> Value {
        date_parameter("date", DATE_HINT)
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let args: HoldingsArgs = parse_args(self.name(), arguments)?;

        let date = match parse_date(&args.date, Utc::now().date_naive()) {
            Ok(date) => date,
            Err(message) => return Ok(error_payload(self.account_id, message)),
        };

        Ok(self.run(date).await.unwrap_or_else(|e| {
            error!(account_id = self.account_id, error = %e, "Failed to retrieve holdings");
            error_payload(
                self.account_id,
                format!("Failed to retrieve portfolio holdings: {}", e),
            )
        }))
    }
}

//
// ================= Analysis =================
//

#[derive(Debug, Deserialize)]
struct AnalysisArgs {
    analysis_date: String,
}

pub struct AnalysisTool {
    account_id: i64,
    analyzer: PortfolioAnalyzer,
}

impl AnalysisTool {
    pub fn new(account_id: i64, source: Arc<dyn HoldingsSource>) -> Self {
        Self {
            account_id,
            analyzer: PortfolioAnalyzer::new(source),
        }
    }
}

#[async_trait::async_trait]
impl Tool for AnalysisTool {
    fn name(&self) -> &'static str {
        "analyze_portfolio_performance"
    }

    fn description(&self) -> &'static str {
        "Analyze portfolio performance on a specific date: total value, gain/loss, \
         per-holding performance and top/bottom performers."
    }

    fn parameters(&self) -> Value {
        date_parameter("analysis_date", DATE_HINT)
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let args: AnalysisArgs = parse_args(self.name(), arguments)?;

        let date = match parse_date(&args.analysis_date, Utc::now().date_naive()) {
            Ok(date) => date,
            Err(message) => return Ok(error_payload(self.account_id, message)),
        };

        let result = match self.analyzer.analyze(self.account_id, date).await {
            Ok(analysis) => success_payload(self.account_id, analysis),
            Err(e) => Err(e),
        };

        Ok(result.unwrap_or_else(|e| {
            error!(account_id = self.account_id, error = %e, "Failed to analyze portfolio");
            error_payload(
                self.account_id,
                format!("Failed to analyze portfolio performance: {}", e),
            )
        }))
    }
}

//
// ================= Comparison =================
//

#[derive(Debug, Deserialize)]
struct ComparisonArgs {
    start_date: String,
    end_date: String,
}

pub struct ComparisonTool {
    account_id: i64,
    analyzer: PortfolioAnalyzer,
}

impl ComparisonTool {
    pub fn new(account_id: i64, source: Arc<dyn HoldingsSource>) -> Self {
        Self {
            account_id,
            analyzer: PortfolioAnalyzer::new(source),
        }
    }
}

#[async_trait::async_trait]
impl Tool for ComparisonTool {
    fn name(&self) -> &'static str {
        "compare_portfolio_performance"
    }

    fn description(&self) -> &'static str {
        "Compare portfolio performance between two dates: start and end value, \
         total change, per-holding changes and insights on drivers, risks and \
         opportunities."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "start_date": { "type": "string", "description": "Start date (YYYY-MM-DD, DD/MM/YYYY, DD Month YYYY)" },
                "end_date": { "type": "string", "description": "End date (YYYY-MM-DD, DD/MM/YYYY, DD Month YYYY)" },
            },
            "required": ["start_date", "end_date"],
        })
    }

    async fn call(&self, arguments: Value) -> Result<Value> {
        let args: ComparisonArgs = parse_args(self.name(), arguments)?;
        let today = Utc::now().date_naive();

        let (start, end) = match (
            parse_date(&args.start_date, today),
            parse_date(&args.end_date, today),
        ) {
            (Ok(start), Ok(end)) => (start, end),
            (Err(message), _) | (_, Err(message)) => {
                return Ok(error_payload(self.account_id, message))
            }
        };

        let result = match self.analyzer.compare(self.account_id, start, end).await {
            Ok(comparison) => success_payload(self.account_id, comparison),
            Err(e) => Err(e),
        };

        Ok(result.unwrap_or_else(|e| {
            error!(account_id = self.account_id, error = %e, "Failed to compare portfolio");
            error_payload(
                self.account_id,
                format!("Failed to compare portfolio performance: {}", e),
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AccountHoldings, HoldingPosition, InMemoryHoldings};
    use crate::error::AgentError;
    use crate::tools::is_error_payload;

    struct FailingSource;

    #[async_trait::async_trait]
    impl HoldingsSource for FailingSource {
        async fn holdings(&self, _: i64, _: NaiveDate) -> Result<Option<AccountHoldings>> {
            Err(AgentError::ToolExecution("backend unavailable".to_string()))
        }
    }

    fn position(ticker: &str, current: f64, bought: f64) -> HoldingPosition {
        HoldingPosition {
            ticker: ticker.to_string(),
            instrument_name: ticker.to_string(),
            platform_name: "SIPP".to_string(),
            units: 2.0,
            current_price: None,
            current_value: current,
            bought_value: bought,
        }
    }

    #[tokio::test]
    async fn test_holdings_payload() {
        let source = InMemoryHoldings::new();
        let date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        source
            .insert(4, date, vec![position("VWRL.L", 120.0, 100.0), position("AAPL.US", 80.0, 100.0)])
            .await;

        let output = HoldingsTool::new(4, Arc::new(source))
            .call(json!({"date": "31/01/2025"}))
            .await
            .unwrap();

        assert_eq!(output["status"], "success");
        assert_eq!(output["date"], "2025-01-31");
        assert_eq!(output["total_value"], 200.0);
        assert_eq!(output["total_holdings"], 2);
        assert_eq!(output["holdings"][0]["platform"], "SIPP");
        assert_eq!(output["holdings"][0]["gain_loss_percentage"], 0.2);
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_reported() {
        let output = HoldingsTool::new(4, Arc::new(InMemoryHoldings::new()))
            .call(json!({"date": "2025-01-31"}))
            .await
            .unwrap();

        assert!(is_error_payload(&output));
        assert_eq!(output["message"], "No holdings found for the specified date");
    }

    #[tokio::test]
    async fn test_backend_failure_becomes_payload() {
        let output = AnalysisTool::new(4, Arc::new(FailingSource))
            .call(json!({"analysis_date": "today"}))
            .await
            .unwrap();

        assert!(is_error_payload(&output));
        assert!(output["message"].as_str().unwrap().contains("backend unavailable"));
    }

    #[tokio::test]
    async fn test_comparison_requires_both_dates() {
        let tool = ComparisonTool::new(4, Arc::new(InMemoryHoldings::new()));

        let missing = tool.call(json!({"start_date": "2025-01-01"})).await;
        assert!(matches!(missing, Err(AgentError::InvalidToolInput { .. })));

        let bad = tool
            .call(json!({"start_date": "2025-01-01", "end_date": "whenever"}))
            .await
            .unwrap();
        assert!(is_error_payload(&bad));
    }
}
