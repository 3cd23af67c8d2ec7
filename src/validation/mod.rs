//! Structured output validation
//!
//! Every node output is parsed into its typed record and checked against the
//! schema's bounds before it may become a message. Nothing is corrected here:
//! an output either passes unchanged or is rejected with a list of issues.

use crate::error::PipelineError;
use crate::models::{ClientSummary, Portfolio, StockReport};
use crate::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use tracing::info;

pub mod schema;

/// Output contracts a node can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSchema {
    ClientSummary,
    Portfolio,
    StockReport,
}

impl OutputSchema {
    pub fn name(&self) -> &'static str {
        match self {
            OutputSchema::ClientSummary => "ClientSummary",
            OutputSchema::Portfolio => "Portfolio",
            OutputSchema::StockReport => "StockReport",
        }
    }

    pub fn json_schema(&self) -> Value {
        match self {
            OutputSchema::ClientSummary => schema::client_summary(),
            OutputSchema::Portfolio => schema::portfolio(),
            OutputSchema::StockReport => schema::stock_report(),
        }
    }
}

impl fmt::Display for OutputSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A record that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedOutput {
    ClientSummary(ClientSummary),
    Portfolio(Portfolio),
    StockReport(StockReport),
}

impl ValidatedOutput {
    pub fn schema(&self) -> OutputSchema {
        match self {
            ValidatedOutput::ClientSummary(_) => OutputSchema::ClientSummary,
            ValidatedOutput::Portfolio(_) => OutputSchema::Portfolio,
            ValidatedOutput::StockReport(_) => OutputSchema::StockReport,
        }
    }

    /// Canonical JSON text used as message content.
    pub fn to_content(&self) -> Result<String> {
        let text = match self {
            ValidatedOutput::ClientSummary(v) => serde_json::to_string(v)?,
            ValidatedOutput::Portfolio(v) => serde_json::to_string(v)?,
            ValidatedOutput::StockReport(v) => serde_json::to_string(v)?,
        };
        Ok(text)
    }
}

/// Bounds applied on top of the schemas' field types.
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub allocation_tolerance: f64,
    pub min_assets: usize,
    pub max_assets: usize,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            allocation_tolerance: 0.5,
            min_assets: 6,
            max_assets: 10,
        }
    }
}

pub struct StructuredOutputValidator {
    policy: ValidationPolicy,
}

impl StructuredOutputValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    /// Parse `raw` against `schema` and check its bounds.
    pub fn validate(&self, schema: OutputSchema, raw: &str) -> Result<ValidatedOutput> {
        let outcome = match schema {
            OutputSchema::ClientSummary => parse::<ClientSummary>(raw).and_then(|v| {
                finish(check_client_summary(&v), ValidatedOutput::ClientSummary(v))
            }),
            OutputSchema::Portfolio => parse::<Portfolio>(raw).and_then(|v| {
                finish(check_portfolio(&v, &self.policy), ValidatedOutput::Portfolio(v))
            }),
            OutputSchema::StockReport => parse::<StockReport>(raw).and_then(|v| {
                finish(check_stock_report(&v), ValidatedOutput::StockReport(v))
            }),
        };

        info!(
            schema = schema.name(),
            verified = outcome.is_ok(),
            issue_count = outcome.as_ref().err().map(Vec::len).unwrap_or(0),
            "Validation completed"
        );

        outcome.map_err(|issues| PipelineError::SchemaValidation {
            schema: schema.name(),
            issues,
        })
    }
}

impl Default for StructuredOutputValidator {
    fn default() -> Self {
        Self::new(ValidationPolicy::default())
    }
}

/// Pull a JSON object out of a completion that may be wrapped in a markdown fence.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let mut inner = trimmed;
        if let Some((_, after_first)) = inner.split_once('\n') {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        return Some(inner.trim());
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&trimmed[start..=end])
}

fn parse<T: DeserializeOwned>(raw: &str) -> std::result::Result<T, Vec<String>> {
    let body = extract_json(raw).ok_or_else(|| vec!["output contains no JSON object".to_string()])?;
    serde_json::from_str::<T>(body).map_err(|e| vec![e.to_string()])
}

fn finish(
    issues: Vec<String>,
    output: ValidatedOutput,
) -> std::result::Result<ValidatedOutput, Vec<String>> {
    if issues.is_empty() {
        Ok(output)
    } else {
        Err(issues)
    }
}

fn require_finite(issues: &mut Vec<String>, field: &str, value: f64) -> bool {
    if value.is_finite() {
        true
    } else {
        issues.push(format!("{} must be a finite number", field));
        false
    }
}

fn require_text(issues: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        issues.push(format!("{} must not be empty", field));
    }
}

fn check_client_summary(summary: &ClientSummary) -> Vec<String> {
    let mut issues = Vec::new();

    require_text(&mut issues, "recommended_portfolio_type", &summary.recommended_portfolio_type);
    require_text(&mut issues, "risk_level", &summary.risk_level);
    require_finite(&mut issues, "expected_yearly_returns", summary.expected_yearly_returns);
    if require_finite(&mut issues, "monthly_contribution", summary.monthly_contribution)
        && summary.monthly_contribution < 0.0
    {
        issues.push(format!(
            "monthly_contribution must not be negative (got {})",
            summary.monthly_contribution
        ));
    }

    issues
}

fn check_portfolio(portfolio: &Portfolio, policy: &ValidationPolicy) -> Vec<String> {
    let mut issues = Vec::new();

    let count = portfolio.assets.len();
    if count < policy.min_assets || count > policy.max_assets {
        issues.push(format!(
            "portfolio must hold between {} and {} assets (got {})",
            policy.min_assets, policy.max_assets, count
        ));
    }

    let mut seen = HashSet::with_capacity(count);
    for (i, asset) in portfolio.assets.iter().enumerate() {
        let ticker = asset.ticker.trim().to_uppercase();
        if ticker.is_empty() {
            issues.push(format!("assets[{}].ticker must not be empty", i));
        } else if !seen.insert(ticker.clone()) {
            issues.push(format!("assets[{}].ticker {} is listed twice", i, ticker));
        }

        let field = format!("assets[{}].allocation_percentage", i);
        if require_finite(&mut issues, &field, asset.allocation_percentage)
            && (asset.allocation_percentage <= 0.0 || asset.allocation_percentage > 100.0)
        {
            issues.push(format!(
                "{} must be within (0, 100] (got {})",
                field, asset.allocation_percentage
            ));
        }
    }

    let sum = portfolio.allocation_sum();
    if !sum.is_finite() || (sum - 100.0).abs() > policy.allocation_tolerance {
        issues.push(format!(
            "asset allocations must sum to 100.0 ± {} (got {:.2})",
            policy.allocation_tolerance, sum
        ));
    }

    if require_finite(&mut issues, "total_allocation", portfolio.total_allocation)
        && (portfolio.total_allocation - 100.0).abs() > policy.allocation_tolerance
    {
        issues.push(format!(
            "total_allocation must be 100.0 ± {} (got {})",
            policy.allocation_tolerance, portfolio.total_allocation
        ));
    }

    issues
}

fn check_stock_report(report: &StockReport) -> Vec<String> {
    let mut issues = Vec::new();

    require_text(&mut issues, "ticker", &report.ticker);

    if require_finite(&mut issues, "current_price", report.current_price)
        && report.current_price <= 0.0
    {
        issues.push(format!(
            "current_price must be greater than 0 (got {})",
            report.current_price
        ));
    }
    if require_finite(&mut issues, "target_price", report.target_price)
        && report.target_price < 0.01
    {
        issues.push(format!(
            "target_price must be at least 0.01 (got {})",
            report.target_price
        ));
    }
    if require_finite(&mut issues, "valuation.target_price", report.valuation.target_price)
        && report.valuation.target_price < 0.01
    {
        issues.push(format!(
            "valuation.target_price must be at least 0.01 (got {})",
            report.valuation.target_price
        ));
    }
    require_finite(&mut issues, "upside_percent", report.upside_percent);

    for (name, value) in report.ratios.values() {
        require_finite(&mut issues, &format!("ratios.{}", name), value);
    }
    if report.ratios.pe_ratio < 0.0 {
        issues.push(format!(
            "ratios.pe_ratio must not be negative (got {})",
            report.ratios.pe_ratio
        ));
    }

    for (i, statement) in report.financials.iter().enumerate() {
        require_finite(&mut issues, &format!("financials[{}].revenue", i), statement.revenue);
        require_finite(&mut issues, &format!("financials[{}].eps", i), statement.eps);
        require_finite(&mut issues, &format!("financials[{}].net_income", i), statement.net_income);
        require_finite(
            &mut issues,
            &format!("financials[{}].free_cash_flow", i),
            statement.free_cash_flow,
        );
        if !(0.0..=100.0).contains(&statement.operating_margin) {
            issues.push(format!(
                "financials[{}].operating_margin must be within [0, 100] (got {})",
                i, statement.operating_margin
            ));
        }
    }

    issues
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rating;
    use serde_json::json;

    fn portfolio_json(allocations: &[f64]) -> Value {
        let assets: Vec<Value> = allocations
            .iter()
            .enumerate()
            .map(|(i, pct)| {
                json!({
                    "ticker": format!("T{}", i),
                    "allocation_percentage": pct,
                    "rationale": "diversification",
                })
            })
            .collect();
        json!({
            "assets": assets,
            "total_allocation": 100.0,
            "strategy_summary": "growth tilt",
        })
    }

    fn report_json() -> Value {
        json!({
            "company_name": "Apple Inc.",
            "ticker": "AAPL",
            "exchange": "NASDAQ",
            "analyst": "stock_research_agent",
            "report_date": "2024-01-02",
            "rating": "BUY",
            "current_price": 185.2,
            "target_price": 210.0,
            "upside_percent": 13.4,
            "summary_points": [{ "point": "Services growth" }],
            "executive_summary": "Solid.",
            "business_overview": "Hardware and services.",
            "recent_performance": "Up 3% over 3 months.",
            "financials": [{ "year": 2023, "revenue": 383.3, "eps": 6.13, "operating_margin": 29.8 }],
            "ratios": { "pe_ratio": 30.1, "ev_ebitda": null, "roe": 147.0, "debt_to_equity": 1.8 },
            "valuation": { "method": "DCF", "target_price": 210.0 },
            "investment_thesis": [{ "point": "Ecosystem lock-in" }],
            "risks": [{ "category": "Market", "description": "Multiple compression" }],
            "conclusion": "Buy."
        })
    }

    fn validator() -> StructuredOutputValidator {
        StructuredOutputValidator::default()
    }

    #[test]
    fn test_accepts_balanced_portfolio() {
        let raw = portfolio_json(&[20.0, 20.0, 15.0, 15.0, 15.0, 15.0]).to_string();
        let output = validator().validate(OutputSchema::Portfolio, &raw).unwrap();
        match output {
            ValidatedOutput::Portfolio(p) => {
                assert_eq!(p.assets.len(), 6);
                assert!((p.allocation_sum() - 100.0).abs() <= 0.5);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_accepts_allocation_within_tolerance() {
        let raw = portfolio_json(&[20.0, 20.0, 15.0, 15.0, 15.0, 14.6]).to_string();
        assert!(validator().validate(OutputSchema::Portfolio, &raw).is_ok());
    }

    #[test]
    fn test_rejects_allocation_outside_tolerance() {
        let raw = portfolio_json(&[20.0, 20.0, 15.0, 15.0, 15.0, 14.0]).to_string();
        let err = validator().validate(OutputSchema::Portfolio, &raw).unwrap_err();
        match err {
            PipelineError::SchemaValidation { schema, issues } => {
                assert_eq!(schema, "Portfolio");
                assert!(issues.iter().any(|i| i.contains("sum to 100.0")));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_rejects_asset_count_outside_policy() {
        let too_few = portfolio_json(&[25.0, 25.0, 25.0, 25.0]).to_string();
        assert!(validator().validate(OutputSchema::Portfolio, &too_few).is_err());

        let too_many = portfolio_json(&[100.0 / 11.0; 11]).to_string();
        assert!(validator().validate(OutputSchema::Portfolio, &too_many).is_err());
    }

    #[test]
    fn test_rejects_portfolio_extra_fields() {
        let mut value = portfolio_json(&[20.0, 20.0, 15.0, 15.0, 15.0, 15.0]);
        value["assets"][0]["sector"] = json!("Tech");
        assert!(validator()
            .validate(OutputSchema::Portfolio, &value.to_string())
            .is_err());
    }

    #[test]
    fn test_rejects_duplicate_tickers() {
        let mut value = portfolio_json(&[20.0, 20.0, 15.0, 15.0, 15.0, 15.0]);
        value["assets"][1]["ticker"] = json!("t0");
        assert!(validator()
            .validate(OutputSchema::Portfolio, &value.to_string())
            .is_err());
    }

    #[test]
    fn test_accepts_fenced_output() {
        let raw = format!(
            "```json\n{}\n```",
            portfolio_json(&[20.0, 20.0, 15.0, 15.0, 15.0, 15.0])
        );
        assert!(validator().validate(OutputSchema::Portfolio, &raw).is_ok());
    }

    #[test]
    fn test_accepts_report_and_fills_ratio_defaults() {
        let raw = report_json().to_string();
        let output = validator().validate(OutputSchema::StockReport, &raw).unwrap();
        let ValidatedOutput::StockReport(report) = output else {
            panic!("expected a stock report");
        };
        assert_eq!(report.rating, Rating::Buy);
        assert_eq!(report.ratios.ev_ebitda, 0.0);
        assert_eq!(report.valuation.assumptions, "TBD");
        assert_eq!(report.financials[0].net_income, 0.0);

        let content = ValidatedOutput::StockReport(report).to_content().unwrap();
        let emitted: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(emitted["ratios"]["ev_ebitda"], json!(0.0));
    }

    #[test]
    fn test_rejects_rating_outside_literals() {
        let mut value = report_json();
        value["rating"] = json!("Outperform");
        assert!(validator()
            .validate(OutputSchema::StockReport, &value.to_string())
            .is_err());
    }

    #[test]
    fn test_rejects_non_positive_prices() {
        let mut value = report_json();
        value["target_price"] = json!(0.0);
        value["current_price"] = json!(-1.0);
        let err = validator()
            .validate(OutputSchema::StockReport, &value.to_string())
            .unwrap_err();
        let PipelineError::SchemaValidation { issues, .. } = err else {
            panic!("expected schema validation error");
        };
        assert_eq!(issues.len(), 2);
    }

    #[test]
    fn test_rejects_report_missing_required_field() {
        let mut value = report_json();
        value.as_object_mut().unwrap().remove("conclusion");
        assert!(validator()
            .validate(OutputSchema::StockReport, &value.to_string())
            .is_err());
    }

    #[test]
    fn test_rejects_report_unknown_field() {
        let mut value = report_json();
        value["price_target_2"] = json!(1.0);
        assert!(validator()
            .validate(OutputSchema::StockReport, &value.to_string())
            .is_err());
    }

    #[test]
    fn test_client_summary_rejects_extra_fields() {
        let raw = json!({
            "recommended_portfolio_type": "Growth",
            "expected_yearly_returns": 8.5,
            "risk_level": "High",
            "initial_portfolio_allocation": "80/20",
            "monthly_contribution": 500.0,
            "notes": "extra"
        })
        .to_string();
        assert!(validator().validate(OutputSchema::ClientSummary, &raw).is_err());
    }

    #[test]
    fn test_rejects_plain_prose() {
        let err = validator()
            .validate(OutputSchema::ClientSummary, "I cannot help with that.")
            .unwrap_err();
        assert!(err.to_string().contains("no JSON object"));
    }

    #[test]
    fn test_extract_json_falls_back_to_braces() {
        assert_eq!(extract_json("Here you go: {\"a\":1} thanks"), Some("{\"a\":1}"));
        assert_eq!(extract_json("no json"), None);
    }
}
