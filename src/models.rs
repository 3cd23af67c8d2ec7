//! Core data models for the analyst pipeline

use crate::error::PipelineError;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Horizon applied when a profile carries no explicit end date.
pub const DEFAULT_HORIZON_YEARS: u32 = 30;

//
// ================= Client Profile =================
//

/// Client intake record. Validated on construction and immutable for the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ClientProfileInput")]
pub struct ClientProfile {
    risk_tolerance: u8,
    investment_goals: String,
    cash_flow: u64,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

/// Unvalidated profile as supplied by a caller.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientProfileInput {
    pub risk_tolerance: i64,
    pub investment_goals: String,
    pub cash_flow: i64,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl ClientProfile {
    pub fn new(
        risk_tolerance: i64,
        investment_goals: impl Into<String>,
        cash_flow: i64,
        start_date: NaiveDate,
        end_date: Option<NaiveDate>,
    ) -> crate::Result<Self> {
        Self::try_from(ClientProfileInput {
            risk_tolerance,
            investment_goals: investment_goals.into(),
            cash_flow,
            start_date,
            end_date,
        })
    }

    pub fn risk_tolerance(&self) -> u8 {
        self.risk_tolerance
    }

    pub fn investment_goals(&self) -> &str {
        &self.investment_goals
    }

    pub fn cash_flow(&self) -> u64 {
        self.cash_flow
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_date
    }

    pub fn end_date(&self) -> NaiveDate {
        self.end_date
    }
}

impl TryFrom<ClientProfileInput> for ClientProfile {
    type Error = PipelineError;

    fn try_from(input: ClientProfileInput) -> Result<Self, Self::Error> {
        if !(1..=10).contains(&input.risk_tolerance) {
            return Err(PipelineError::WorkflowConfiguration(format!(
                "risk_tolerance must be between 1 and 10 (got {})",
                input.risk_tolerance
            )));
        }

        let investment_goals = input.investment_goals.trim().to_string();
        if investment_goals.is_empty() {
            return Err(PipelineError::WorkflowConfiguration(
                "investment_goals is required".to_string(),
            ));
        }

        if input.cash_flow <= 0 {
            return Err(PipelineError::WorkflowConfiguration(format!(
                "cash_flow must be positive (got {})",
                input.cash_flow
            )));
        }

        let end_date = match input.end_date {
            Some(end) => end,
            None => input
                .start_date
                .checked_add_months(Months::new(DEFAULT_HORIZON_YEARS * 12))
                .ok_or_else(|| {
                    PipelineError::WorkflowConfiguration(format!(
                        "cannot derive end_date from start_date {}",
                        input.start_date
                    ))
                })?,
        };

        if end_date <= input.start_date {
            return Err(PipelineError::WorkflowConfiguration(format!(
                "end_date {} must be after start_date {}",
                end_date, input.start_date
            )));
        }

        Ok(Self {
            risk_tolerance: input.risk_tolerance as u8,
            investment_goals,
            cash_flow: input.cash_flow as u64,
            start_date: input.start_date,
            end_date,
        })
    }
}

impl fmt::Display for ClientProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "risk_tolerance: {}", self.risk_tolerance)?;
        writeln!(f, "investment_goals: {}", self.investment_goals)?;
        writeln!(f, "cash_flow: {}", self.cash_flow)?;
        writeln!(f, "start_date: {}", self.start_date)?;
        write!(f, "end_date: {}", self.end_date)
    }
}

//
// ================= Message Log =================
//

/// One accepted handoff: the validated output of a node, serialized as JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub author: String,
    pub content: String,
}

impl Message {
    pub fn new(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            content: content.into(),
        }
    }
}

//
// ================= Client Summary =================
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientSummary {
    pub recommended_portfolio_type: String,
    pub expected_yearly_returns: f64,
    pub risk_level: String,
    pub initial_portfolio_allocation: String,
    pub monthly_contribution: f64,
}

//
// ================= Portfolio =================
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Asset {
    pub ticker: String,
    pub allocation_percentage: f64,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Portfolio {
    pub assets: Vec<Asset>,
    #[serde(default = "full_allocation")]
    pub total_allocation: f64,
    pub strategy_summary: String,
}

impl Portfolio {
    pub fn allocation_sum(&self) -> f64 {
        self.assets.iter().map(|a| a.allocation_percentage).sum()
    }
}

fn full_allocation() -> f64 {
    100.0
}

//
// ================= Stock Report =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rating {
    Buy,
    Hold,
    Sell,
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rating::Buy => "BUY",
            Rating::Hold => "HOLD",
            Rating::Sell => "SELL",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPoint {
    pub point: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialStatement {
    pub year: i32,
    /// Revenue in billions USD
    pub revenue: f64,
    pub eps: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub operating_margin: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub net_income: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub free_cash_flow: f64,
}

/// Ratio block of a report. Missing or null ratios become 0.0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatioAnalysis {
    #[serde(default, deserialize_with = "null_as_zero")]
    pub pe_ratio: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub ev_ebitda: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub roe: f64,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub debt_to_equity: f64,
}

impl RatioAnalysis {
    pub fn values(&self) -> [(&'static str, f64); 4] {
        [
            ("pe_ratio", self.pe_ratio),
            ("ev_ebitda", self.ev_ebitda),
            ("roe", self.roe),
            ("debt_to_equity", self.debt_to_equity),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub method: String,
    #[serde(default = "minimum_price")]
    pub target_price: f64,
    #[serde(default = "to_be_determined")]
    pub assumptions: String,
    #[serde(default = "to_be_determined")]
    pub sensitivity_analysis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Risk {
    /// Market, Company-specific, or Industry
    pub category: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StockReport {
    pub company_name: String,
    pub ticker: String,
    pub exchange: String,
    pub analyst: String,
    pub report_date: String,
    pub rating: Rating,
    pub current_price: f64,
    pub target_price: f64,
    pub upside_percent: f64,

    pub summary_points: Vec<KeyPoint>,
    pub executive_summary: String,
    pub business_overview: String,
    pub recent_performance: String,

    pub financials: Vec<FinancialStatement>,
    pub ratios: RatioAnalysis,

    pub valuation: Valuation,
    pub investment_thesis: Vec<KeyPoint>,
    pub risks: Vec<Risk>,

    pub conclusion: String,
}

fn minimum_price() -> f64 {
    1.0
}

fn to_be_determined() -> String {
    "TBD".to_string()
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

//
// ================= Market Data Records =================
//

/// Ratios computed by the market-data tools. Unavailable inputs yield 0.0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialRatios {
    pub pe_ratio: f64,
    pub ev_ebitda: f64,
    pub roe: f64,
    pub debt_to_equity: f64,
    pub price_to_book: f64,
    pub current_ratio: f64,
    pub gross_margin: f64,
    pub operating_margin: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub source: String,
    pub date: String,
}

//
// ================= Tool I/O =================
//

/// A tool invocation requested by the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Tool description advertised to the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}
