//! JSON Schemas sent with each reasoning request.
//!
//! Written for strict structured-output mode: every property is required and
//! `additionalProperties` is false at every level.

use serde_json::{json, Value};

pub fn client_summary() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": [
            "recommended_portfolio_type",
            "expected_yearly_returns",
            "risk_level",
            "initial_portfolio_allocation",
            "monthly_contribution"
        ],
        "properties": {
            "recommended_portfolio_type": { "type": "string", "description": "Recommended portfolio type" },
            "expected_yearly_returns": { "type": "number", "description": "Expected yearly returns" },
            "risk_level": { "type": "string", "description": "Risk level" },
            "initial_portfolio_allocation": { "type": "string", "description": "Initial portfolio allocation" },
            "monthly_contribution": { "type": "number", "description": "Monthly contribution" }
        }
    })
}

pub fn portfolio() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": ["assets", "total_allocation", "strategy_summary"],
        "properties": {
            "assets": {
                "type": "array",
                "description": "List of assets with allocations",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["ticker", "allocation_percentage", "rationale"],
                    "properties": {
                        "ticker": { "type": "string", "description": "Stock ticker symbol (e.g., AAPL, MSFT)" },
                        "allocation_percentage": { "type": "number", "description": "Percentage of portfolio (e.g., 25.0 for 25%)" },
                        "rationale": { "type": "string", "description": "Why this asset was selected" }
                    }
                }
            },
            "total_allocation": { "type": "number", "description": "Should sum to 100%" },
            "strategy_summary": { "type": "string", "description": "Overall portfolio strategy" }
        }
    })
}

fn key_points(description: &str) -> Value {
    json!({
        "type": "array",
        "description": description,
        "items": {
            "type": "object",
            "additionalProperties": false,
            "required": ["point"],
            "properties": {
                "point": { "type": "string", "description": "Concise key investment thesis point" }
            }
        }
    })
}

pub fn stock_report() -> Value {
    json!({
        "type": "object",
        "additionalProperties": false,
        "required": [
            "company_name", "ticker", "exchange", "analyst", "report_date",
            "rating", "current_price", "target_price", "upside_percent",
            "summary_points", "executive_summary", "business_overview", "recent_performance",
            "financials", "ratios", "valuation", "investment_thesis", "risks", "conclusion"
        ],
        "properties": {
            "company_name": { "type": "string" },
            "ticker": { "type": "string" },
            "exchange": { "type": "string" },
            "analyst": { "type": "string" },
            "report_date": { "type": "string" },
            "rating": { "type": "string", "enum": ["BUY", "HOLD", "SELL"] },
            "current_price": { "type": "number", "description": "Must be greater than 0" },
            "target_price": { "type": "number", "description": "Minimum 0.01" },
            "upside_percent": { "type": "number" },
            "summary_points": key_points("Key takeaways"),
            "executive_summary": { "type": "string" },
            "business_overview": { "type": "string" },
            "recent_performance": { "type": "string" },
            "financials": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["year", "revenue", "eps", "operating_margin", "net_income", "free_cash_flow"],
                    "properties": {
                        "year": { "type": "integer", "description": "Fiscal year" },
                        "revenue": { "type": "number", "description": "Revenue in billions USD" },
                        "eps": { "type": "number", "description": "Earnings per share" },
                        "operating_margin": { "type": "number", "description": "Percent between 0 and 100, use 0.0 if not available" },
                        "net_income": { "type": "number" },
                        "free_cash_flow": { "type": "number" }
                    }
                }
            },
            "ratios": {
                "type": "object",
                "additionalProperties": false,
                "required": ["pe_ratio", "ev_ebitda", "roe", "debt_to_equity"],
                "properties": {
                    "pe_ratio": { "type": "number", "description": "Price-to-Earnings ratio, use 0.0 if not available" },
                    "ev_ebitda": { "type": "number", "description": "Enterprise Value to EBITDA ratio, use 0.0 if not available" },
                    "roe": { "type": "number", "description": "Return on Equity percentage, use 0.0 if not available" },
                    "debt_to_equity": { "type": "number", "description": "Debt-to-Equity ratio, use 0.0 if not available" }
                }
            },
            "valuation": {
                "type": "object",
                "additionalProperties": false,
                "required": ["method", "target_price", "assumptions", "sensitivity_analysis"],
                "properties": {
                    "method": { "type": "string", "description": "e.g., DCF, Comparables" },
                    "target_price": { "type": "number", "description": "Minimum 0.01" },
                    "assumptions": { "type": "string" },
                    "sensitivity_analysis": { "type": "string" }
                }
            },
            "investment_thesis": key_points("Investment thesis points"),
            "risks": {
                "type": "array",
                "items": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["category", "description"],
                    "properties": {
                        "category": { "type": "string", "description": "Market, Company-specific, or Industry" },
                        "description": { "type": "string" }
                    }
                }
            },
            "conclusion": { "type": "string" }
        }
    })
}
