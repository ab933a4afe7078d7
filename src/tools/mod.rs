//! Tool trait and per-request tool factory
//!
//! Every `ToolSet` is built for exactly one account and one set of backend
//! handles. Tools never see an account id supplied by the model.

use crate::backend::BackendHandles;
use crate::error::AgentError;
use crate::models::ToolCall;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub mod dates;
pub mod market;
pub mod portfolio;
pub mod prices;

pub use market::{MarketContextTool, MarketSentimentTool};
pub use portfolio::{AnalysisTool, ComparisonTool, HoldingsTool};
pub use prices::{fetch_prices_concurrently, RealTimePricesTool};

/// Tool description advertised to the model.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema object describing the arguments
    pub parameters: Value,
}

/// A single callable bound to one request.
///
/// `call` returns `Err` only when the arguments cannot be decoded. Failures
/// while doing the work come back as `{"status": "error", ...}` payloads.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn parameters(&self) -> Value;
    async fn call(&self, arguments: Value) -> Result<Value>;

    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Tool registry for one run
pub struct ToolSet {
    account_id: i64,
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<&'static str>,
}

impl ToolSet {
    pub fn new(account_id: i64) -> Self {
        Self {
            account_id,
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        if self.tools.insert(name.to_string(), tool).is_none() {
            self.order.push(name);
        }
    }

    pub fn account_id(&self) -> i64 {
        self.account_id
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&'static str> {
        self.order.clone()
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(*name))
            .map(|tool| tool.schema())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Run the tool a model call names.
    pub async fn dispatch(&self, call: &ToolCall) -> Result<Value> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| AgentError::ToolNotFound(call.name.clone()))?;
        tool.call(call.arguments.clone()).await
    }
}

/// Build the six tools for one request.
pub fn build_tools(account_id: i64, handles: &BackendHandles, price_concurrency: usize) -> ToolSet {
    let mut set = ToolSet::new(account_id);
    set.register(Arc::new(HoldingsTool::new(account_id, handles.holdings.clone())));
    set.register(Arc::new(AnalysisTool::new(account_id, handles.holdings.clone())));
    set.register(Arc::new(ComparisonTool::new(account_id, handles.holdings.clone())));
    set.register(Arc::new(MarketContextTool::new(account_id, handles.market.clone())));
    set.register(Arc::new(MarketSentimentTool::new(account_id, handles.market.clone())));
    set.register(Arc::new(RealTimePricesTool::new(
        account_id,
        handles.market.clone(),
        price_concurrency,
    )));
    set
}

/// Decode tool arguments, rejecting missing or malformed fields.
pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T> {
    let arguments = match arguments {
        Value::Null => json!({}),
        other => other,
    };
    serde_json::from_value(arguments).map_err(|e| AgentError::invalid_input(tool, e.to_string()))
}

pub(crate) fn error_payload(account_id: i64, message: impl Into<String>) -> Value {
    json!({
        "status": "error",
        "account_id": account_id,
        "message": message.into(),
    })
}

/// Merge `status` and `account_id` into a serialized result object.
pub(crate) fn success_payload(account_id: i64, body: impl Serialize) -> Result<Value> {
    let mut value = serde_json::to_value(body)?;
    if let Value::Object(map) = &mut value {
        map.insert("status".to_string(), json!("success"));
        map.insert("account_id".to_string(), json!(account_id));
    }
    Ok(value)
}

pub(crate) fn is_error_payload(value: &Value) -> bool {
    value.get("status").and_then(Value::as_str) == Some("error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HoldingPosition, InMemoryHoldings, InMemoryMarketData};
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    fn position(ticker: &str, value: f64) -> HoldingPosition {
        HoldingPosition {
            ticker: ticker.to_string(),
            instrument_name: ticker.to_string(),
            platform_name: "GIA".to_string(),
            units: 1.0,
            current_price: Some(value),
            current_value: value,
            bought_value: value,
        }
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call_test".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn test_factory_builds_six_tools_in_order() {
        let handles = BackendHandles::new(Arc::new(InMemoryHoldings::new()));
        let set = build_tools(1, &handles, 10);

        assert_eq!(
            set.names(),
            vec![
                "get_portfolio_holdings",
                "analyze_portfolio_performance",
                "compare_portfolio_performance",
                "get_market_context",
                "get_market_sentiment",
                "get_real_time_prices",
            ]
        );
        let schemas = set.schemas();
        assert_eq!(schemas.len(), 6);
        assert!(schemas.iter().all(|s| s.parameters["type"] == "object"));
        assert_eq!(schemas[0].parameters["required"], json!(["date"]));
    }

    #[tokio::test]
    async fn test_concurrent_tool_sets_stay_isolated() {
        let today = Utc::now().date_naive();
        let source = InMemoryHoldings::new();
        source.insert(1, today, vec![position("AAA.US", 100.0)]).await;
        source.insert(2, today, vec![position("BBB.US", 200.0)]).await;
        let handles = BackendHandles::new(Arc::new(source));

        let set_a = build_tools(1, &handles, 10);
        let set_b = build_tools(2, &handles, 10);
        let request = call("get_portfolio_holdings", json!({"date": "today"}));

        let (a, b) = tokio::join!(set_a.dispatch(&request), set_b.dispatch(&request));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a["account_id"], 1);
        assert_eq!(a["holdings"][0]["ticker"], "AAA.US");
        assert_eq!(b["account_id"], 2);
        assert_eq!(b["holdings"][0]["ticker"], "BBB.US");
    }

    #[tokio::test]
    async fn test_model_supplied_account_is_ignored() {
        let today = Utc::now().date_naive();
        let source = InMemoryHoldings::new();
        source.insert(1, today, vec![position("AAA.US", 100.0)]).await;
        source.insert(2, today, vec![position("BBB.US", 200.0)]).await;
        let set = build_tools(1, &BackendHandles::new(Arc::new(source)), 10);

        let output = set
            .dispatch(&call("get_portfolio_holdings", json!({"date": "today", "account_id": 2})))
            .await
            .unwrap();

        assert_eq!(output["account_id"], 1);
        assert_eq!(output["holdings"][0]["ticker"], "AAA.US");
    }

    #[tokio::test]
    async fn test_malformed_arguments_raise() {
        let set = build_tools(1, &BackendHandles::new(Arc::new(InMemoryHoldings::new())), 10);

        for arguments in [json!({}), json!({"date": 20250101}), json!("{\"date\": ")] {
            let result = set.dispatch(&call("get_portfolio_holdings", arguments)).await;
            assert!(matches!(result, Err(AgentError::InvalidToolInput { .. })));
        }
    }

    #[tokio::test]
    async fn test_unparseable_date_is_a_tool_failure() {
        let set = build_tools(1, &BackendHandles::new(Arc::new(InMemoryHoldings::new())), 10);

        let output = set
            .dispatch(&call("get_portfolio_holdings", json!({"date": "next blue moon"})))
            .await
            .unwrap();

        assert!(is_error_payload(&output));
        assert!(output["message"].as_str().unwrap().contains("next blue moon"));
    }

    #[tokio::test]
    async fn test_unknown_tool_not_found() {
        let set = build_tools(1, &BackendHandles::new(Arc::new(InMemoryHoldings::new())), 10);
        let result = set.dispatch(&call("delete_everything", json!({}))).await;
        assert!(matches!(result, Err(AgentError::ToolNotFound(name)) if name == "delete_everything"));
    }

    #[tokio::test]
    async fn test_market_tools_report_missing_market_data() {
        let set = build_tools(1, &BackendHandles::new(Arc::new(InMemoryHoldings::new())), 10);

        for request in [
            call("get_market_context", json!({})),
            call("get_market_sentiment", json!({"tickers": ["AAPL.US"]})),
            call("get_real_time_prices", json!({"tickers": ["AAPL.US"]})),
        ] {
            let output = set.dispatch(&request).await.unwrap();
            assert!(is_error_payload(&output));
            assert!(output["message"].as_str().unwrap().contains("not configured"));
        }
    }

    #[tokio::test]
    async fn test_market_handle_is_shared_not_copied() {
        let market = Arc::new(InMemoryMarketData::new().with_price("AAPL.US", 190.0));
        let handles = BackendHandles::new(Arc::new(InMemoryHoldings::new())).with_market(market);
        let set = build_tools(1, &handles, 10);

        let output = set
            .dispatch(&call("get_real_time_prices", json!({"tickers": ["AAPL.US"]})))
            .await
            .unwrap();
        assert_eq!(output["prices"]["AAPL.US"], 190.0);
    }

    fn ticker_for(account_id: i64) -> String {
        format!("A{}.US", account_id)
    }

    /// Every tool of both accounts, run concurrently on a multi-thread runtime
    /// against shared backends. Returns (owner, tool name, output).
    fn run_all_tools_for(accounts: [i64; 2]) -> Vec<(i64, String, Value)> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async move {
            let today = Utc::now().date_naive();
            let yesterday = today - Duration::days(1);

            let source = InMemoryHoldings::new();
            let mut market = InMemoryMarketData::new();
            for account_id in accounts {
                let ticker = ticker_for(account_id);
                source.insert(account_id, today, vec![position(&ticker, 120.0)]).await;
                source.insert(account_id, yesterday, vec![position(&ticker, 100.0)]).await;
                market = market
                    .with_price(&ticker, account_id as f64)
                    .with_sentiment(&ticker, 0.4);
            }
            let handles = BackendHandles::new(Arc::new(source)).with_market(Arc::new(market));

            let mut tasks = Vec::new();
            for account_id in accounts {
                let set = Arc::new(build_tools(account_id, &handles, 4));
                let tickers = json!([ticker_for(account_id)]);
                let requests = [
                    call("get_portfolio_holdings", json!({"date": today.to_string()})),
                    call("analyze_portfolio_performance", json!({"analysis_date": today.to_string()})),
                    call(
                        "compare_portfolio_performance",
                        json!({"start_date": yesterday.to_string(), "end_date": today.to_string()}),
                    ),
                    call("get_market_context", json!({})),
                    call("get_market_sentiment", json!({"tickers": tickers.clone()})),
                    call("get_real_time_prices", json!({"tickers": tickers})),
                ];
                for request in requests {
                    let set = set.clone();
                    tasks.push(tokio::spawn(async move {
                        let output = set.dispatch(&request).await.unwrap();
                        (account_id, request.name, output)
                    }));
                }
            }

            let mut outputs = Vec::new();
            for task in tasks {
                outputs.push(task.await.unwrap());
            }
            outputs
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_tool_outputs_carry_only_the_bound_account(
            (a, b) in (1i64..10_000, 1i64..10_000).prop_filter("distinct accounts", |(a, b)| a != b)
        ) {
            let outputs = run_all_tools_for([a, b]);
            prop_assert_eq!(outputs.len(), 12);

            for (owner, name, output) in outputs {
                let other = if owner == a { b } else { a };
                prop_assert_eq!(&output["account_id"], &json!(owner), "{} for {}", name, owner);
                if name == "get_portfolio_holdings" {
                    prop_assert_eq!(&output["holdings"][0]["ticker"], &json!(ticker_for(owner)));
                }
                prop_assert!(!output.to_string().contains(&ticker_for(other)), "{} leaked {}", name, other);
            }
        }
    }
}
