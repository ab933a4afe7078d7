//! Performance analysis computed from holdings snapshots

use super::{AccountHoldings, HoldingsSource};
use crate::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const PERFORMER_COUNT: usize = 3;
const NOTABLE_MOVE: f64 = 0.10;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HoldingPerformance {
    pub ticker: String,
    pub instrument_name: String,
    pub units: f64,
    pub current_value: f64,
    pub bought_value: f64,
    pub gain_loss: f64,
    pub gain_loss_percentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub total_return_percentage: f64,
    pub top_performers: Vec<String>,
    pub bottom_performers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformanceAnalysis {
    pub account_id: i64,
    pub analysis_date: NaiveDate,
    pub total_value: f64,
    pub gain_loss: f64,
    pub gain_loss_percentage: f64,
    pub holding_performance: Vec<HoldingPerformance>,
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HoldingComparison {
    pub ticker: String,
    pub instrument_name: String,
    pub start_value: f64,
    pub end_value: f64,
    pub change: f64,
    pub change_percentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComparisonInsights {
    pub overall_trend: String,
    pub key_drivers: Vec<String>,
    pub risk_factors: Vec<String>,
    pub opportunities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformanceComparison {
    pub account_id: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_value: f64,
    pub end_value: f64,
    pub total_change: f64,
    pub total_change_percentage: f64,
    pub holding_comparisons: Vec<HoldingComparison>,
    pub insights: ComparisonInsights,
}

/// Derives analysis and comparisons from a `HoldingsSource`.
#[derive(Clone)]
pub struct PortfolioAnalyzer {
    source: Arc<dyn HoldingsSource>,
}

impl PortfolioAnalyzer {
    pub fn new(source: Arc<dyn HoldingsSource>) -> Self {
        Self { source }
    }

    pub async fn analyze(&self, account_id: i64, date: NaiveDate) -> Result<PerformanceAnalysis> {
        info!(account_id, %date, "Analyzing portfolio performance");

        let Some(snapshot) = self.source.holdings(account_id, date).await? else {
            warn!(account_id, %date, "No holdings found for analysis");
            return Ok(empty_analysis(account_id, date));
        };

        let holding_performance: Vec<HoldingPerformance> = snapshot
            .holdings
            .iter()
            .map(|h| HoldingPerformance {
                ticker: h.ticker.clone(),
                instrument_name: h.instrument_name.clone(),
                units: h.units,
                current_value: h.current_value,
                bought_value: h.bought_value,
                gain_loss: h.gain_loss(),
                gain_loss_percentage: h.gain_loss_percentage(),
            })
            .collect();

        Ok(PerformanceAnalysis {
            account_id,
            analysis_date: date,
            total_value: snapshot.total_current_value(),
            gain_loss: snapshot.total_gain_loss(),
            gain_loss_percentage: snapshot.total_gain_loss_percentage(),
            metrics: performance_metrics(&holding_performance),
            holding_performance,
        })
    }

    pub async fn compare(
        &self,
        account_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PerformanceComparison> {
        info!(account_id, %start, %end, "Comparing portfolio performance");

        let start_snapshot = self.source.holdings(account_id, start).await?;
        let end_snapshot = self.source.holdings(account_id, end).await?;

        let start_value = start_snapshot
            .as_ref()
            .map(AccountHoldings::total_current_value)
            .unwrap_or(0.0);
        let end_value = end_snapshot
            .as_ref()
            .map(AccountHoldings::total_current_value)
            .unwrap_or(0.0);
        let total_change = end_value - start_value;
        let total_change_percentage = if start_value > 0.0 {
            total_change / start_value
        } else {
            0.0
        };

        let holding_comparisons = compare_holdings(start_snapshot.as_ref(), end_snapshot.as_ref());
        let insights = comparison_insights(&holding_comparisons, total_change_percentage);

        Ok(PerformanceComparison {
            account_id,
            start_date: start,
            end_date: end,
            start_value,
            end_value,
            total_change,
            total_change_percentage,
            holding_comparisons,
            insights,
        })
    }
}

fn empty_analysis(account_id: i64, date: NaiveDate) -> PerformanceAnalysis {
    PerformanceAnalysis {
        account_id,
        analysis_date: date,
        total_value: 0.0,
        gain_loss: 0.0,
        gain_loss_percentage: 0.0,
        holding_performance: Vec::new(),
        metrics: performance_metrics(&[]),
    }
}

fn performance_metrics(holdings: &[HoldingPerformance]) -> PerformanceMetrics {
    let total_return: f64 = holdings.iter().map(|h| h.gain_loss).sum();
    let total_bought: f64 = holdings.iter().map(|h| h.bought_value).sum();

    let mut ranked: Vec<&HoldingPerformance> = holdings.iter().collect();
    ranked.sort_by(|a, b| b.gain_loss_percentage.total_cmp(&a.gain_loss_percentage));

    let top_performers = ranked
        .iter()
        .take(PERFORMER_COUNT)
        .map(|h| h.ticker.clone())
        .collect();
    let bottom_performers = ranked
        .iter()
        .rev()
        .take(PERFORMER_COUNT)
        .map(|h| h.ticker.clone())
        .collect();

    PerformanceMetrics {
        total_return,
        total_return_percentage: if total_bought > 0.0 {
            total_return / total_bought
        } else {
            0.0
        },
        top_performers,
        bottom_performers,
    }
}

/// Positions are matched on ticker and platform.
fn compare_holdings(
    start: Option<&AccountHoldings>,
    end: Option<&AccountHoldings>,
) -> Vec<HoldingComparison> {
    let mut paired: BTreeMap<(String, String), (f64, f64, String)> = BTreeMap::new();

    for h in start.into_iter().flat_map(|s| &s.holdings) {
        let entry = paired
            .entry((h.ticker.clone(), h.platform_name.clone()))
            .or_insert((0.0, 0.0, h.instrument_name.clone()));
        entry.0 += h.current_value;
    }
    for h in end.into_iter().flat_map(|s| &s.holdings) {
        let entry = paired
            .entry((h.ticker.clone(), h.platform_name.clone()))
            .or_insert((0.0, 0.0, h.instrument_name.clone()));
        entry.1 += h.current_value;
        entry.2 = h.instrument_name.clone();
    }

    paired
        .into_iter()
        .map(|((ticker, platform), (start_value, end_value, instrument_name))| {
            let change = end_value - start_value;
            HoldingComparison {
                ticker: if platform.is_empty() || platform == "UNKNOWN" {
                    ticker
                } else {
                    format!("{} ({})", ticker, platform)
                },
                instrument_name,
                start_value,
                end_value,
                change,
                change_percentage: if start_value > 0.0 {
                    change / start_value
                } else {
                    0.0
                },
            }
        })
        .collect()
}

fn comparison_insights(comparisons: &[HoldingComparison], total_change_percentage: f64) -> ComparisonInsights {
    if comparisons.is_empty() {
        return ComparisonInsights {
            overall_trend: "No holdings to compare".to_string(),
            key_drivers: Vec::new(),
            risk_factors: Vec::new(),
            opportunities: Vec::new(),
        };
    }

    let overall_trend = if total_change_percentage > 0.05 {
        "Strong Positive Growth"
    } else if total_change_percentage > 0.0 {
        "Modest Growth"
    } else if total_change_percentage > -0.05 {
        "Slight Decline"
    } else {
        "Significant Decline"
    };

    let mut by_magnitude: Vec<&HoldingComparison> = comparisons.iter().collect();
    by_magnitude.sort_by(|a, b| b.change.abs().total_cmp(&a.change.abs()));

    ComparisonInsights {
        overall_trend: overall_trend.to_string(),
        key_drivers: by_magnitude
            .iter()
            .take(PERFORMER_COUNT)
            .map(|h| format!("{}: {:+.2} ({:+.2}%)", h.ticker, h.change, h.change_percentage * 100.0))
            .collect(),
        risk_factors: comparisons
            .iter()
            .filter(|h| h.change_percentage < -NOTABLE_MOVE)
            .map(|h| format!("{}: {:.2}% decline", h.ticker, h.change_percentage * 100.0))
            .collect(),
        opportunities: comparisons
            .iter()
            .filter(|h| h.change_percentage > NOTABLE_MOVE)
            .map(|h| format!("{}: {:.2}% growth", h.ticker, h.change_percentage * 100.0))
            .collect(),
    }
}
