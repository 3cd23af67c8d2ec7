//! Yahoo Finance HTTP client
//!
//! Backs the local tool set with the public chart, quoteSummary,
//! fundamentals-timeseries and search endpoints. quoteSummary needs a cookie
//! plus crumb pair, fetched once per client.

use crate::config::Settings;
use crate::error::PipelineError;
use crate::models::NewsItem;
use crate::tools::local::{CompanySnapshot, MarketDataSource, PriceBar, StatementTable};
use crate::tools::StatementKind;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const SUMMARY_MODULES: &str = "price,summaryDetail,defaultKeyStatistics,financialData,assetProfile";

const INCOME_ITEMS: [&str; 13] = [
    "TotalRevenue",
    "CostOfRevenue",
    "GrossProfit",
    "OperatingExpense",
    "OperatingIncome",
    "EBITDA",
    "ReconciledDepreciation",
    "PretaxIncome",
    "TaxProvision",
    "NetIncome",
    "NetIncomeCommonStockholders",
    "DilutedEPS",
    "BasicEPS",
];

const BALANCE_ITEMS: [&str; 11] = [
    "TotalAssets",
    "CurrentAssets",
    "CashAndCashEquivalents",
    "TotalLiabilitiesNetMinorityInterest",
    "CurrentLiabilities",
    "TotalDebt",
    "LongTermDebt",
    "NetDebt",
    "StockholdersEquity",
    "TotalEquityGrossMinorityInterest",
    "OrdinarySharesNumber",
];

const CASHFLOW_ITEMS: [&str; 6] = [
    "OperatingCashFlow",
    "CapitalExpenditure",
    "FreeCashFlow",
    "DepreciationAndAmortization",
    "RepurchaseOfCapitalStock",
    "CashDividendsPaid",
];

pub struct YahooFinanceClient {
    client: Client,
    base_url: String,
    crumb: OnceCell<String>,
}

impl YahooFinanceClient {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(settings.tool_timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: settings.yahoo_query_url.clone(),
            crumb: OnceCell::new(),
        })
    }

    /// GET a JSON document. `None` for 404, which Yahoo uses for unknown tickers.
    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Option<Value>> {
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            debug!(url, "Yahoo returned 404");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::UpstreamDataUnavailable(format!(
                "Yahoo Finance returned {} for {}: {}",
                status, url, body
            )));
        }

        Ok(Some(response.json::<Value>().await?))
    }

    async fn crumb(&self) -> Result<&str> {
        let crumb = self
            .crumb
            .get_or_try_init(|| async {
                // The cookie endpoint answers 404 but still sets the session cookie.
                let _ = self.client.get(COOKIE_URL).send().await;
                let crumb = self
                    .client
                    .get(format!("{}/v1/test/getcrumb", self.base_url))
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                if crumb.trim().is_empty() || crumb.contains('<') {
                    return Err(PipelineError::UpstreamDataUnavailable(
                        "Yahoo Finance did not issue a crumb".to_string(),
                    ));
                }
                info!("Yahoo Finance crumb acquired");
                Ok::<String, PipelineError>(crumb.trim().to_string())
            })
            .await?;
        Ok(crumb.as_str())
    }
}

#[async_trait]
impl MarketDataSource for YahooFinanceClient {
    async fn company_snapshot(&self, ticker: &str) -> Result<CompanySnapshot> {
        let crumb = self.crumb().await?.to_string();
        let url = format!("{}/v10/finance/quoteSummary/{}", self.base_url, ticker);
        let body = self
            .get_json(
                &url,
                &[("modules", SUMMARY_MODULES.to_string()), ("crumb", crumb)],
            )
            .await?;

        body.as_ref()
            .and_then(parse_quote_summary)
            .ok_or_else(|| {
                PipelineError::UpstreamDataUnavailable(format!("no quote data for {}", ticker))
            })
    }

    async fn price_history(&self, ticker: &str, period: &str) -> Result<Vec<PriceBar>> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, ticker);
        let body = self
            .get_json(
                &url,
                &[("range", period.to_string()), ("interval", "1d".to_string())],
            )
            .await?;
        Ok(body.as_ref().map(parse_chart).unwrap_or_default())
    }

    async fn statement(&self, ticker: &str, kind: StatementKind) -> Result<StatementTable> {
        let prefix = if kind.is_quarterly() { "quarterly" } else { "annual" };
        let types: Vec<String> = line_items(kind)
            .iter()
            .map(|item| format!("{}{}", prefix, item))
            .collect();

        let url = format!(
            "{}/ws/fundamentals-timeseries/v1/finance/timeseries/{}",
            self.base_url, ticker
        );
        let now = Utc::now().timestamp();
        let body = self
            .get_json(
                &url,
                &[
                    ("symbol", ticker.to_string()),
                    ("type", types.join(",")),
                    ("period1", "493590046".to_string()),
                    ("period2", now.to_string()),
                ],
            )
            .await?;

        Ok(body
            .as_ref()
            .map(|b| parse_timeseries(b, kind))
            .unwrap_or_default())
    }

    async fn news(&self, ticker: &str) -> Result<Vec<NewsItem>> {
        let url = format!("{}/v1/finance/search", self.base_url);
        let body = self
            .get_json(
                &url,
                &[
                    ("q", ticker.to_string()),
                    ("quotesCount", "0".to_string()),
                    ("newsCount", "10".to_string()),
                ],
            )
            .await?;
        Ok(body.as_ref().map(parse_search_news).unwrap_or_default())
    }
}

fn line_items(kind: StatementKind) -> &'static [&'static str] {
    match kind {
        StatementKind::Financials | StatementKind::QuarterlyFinancials => &INCOME_ITEMS,
        StatementKind::BalanceSheet | StatementKind::QuarterlyBalanceSheet => &BALANCE_ITEMS,
        StatementKind::Cashflow | StatementKind::QuarterlyCashflow => &CASHFLOW_ITEMS,
    }
}

/// `TotalRevenue` -> `Total Revenue`, `DilutedEPS` -> `Diluted EPS`.
fn line_item_label(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for c in key.chars() {
        if c.is_uppercase() && prev_lower {
            out.push(' ');
        }
        prev_lower = c.is_lowercase();
        out.push(c);
    }
    out
}

/// A number that may be plain or wrapped as `{"raw": .., "fmt": ..}`.
fn raw_number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.get("raw").and_then(Value::as_f64))
        .filter(|v| v.is_finite())
}

fn parse_quote_summary(body: &Value) -> Option<CompanySnapshot> {
    let result = body.pointer("/quoteSummary/result/0")?;
    let num = |module: &str, key: &str| result.get(module).and_then(|m| m.get(key)).and_then(raw_number);
    let text = |module: &str, key: &str| {
        result
            .get(module)
            .and_then(|m| m.get(key))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Some(CompanySnapshot {
        current_price: num("financialData", "currentPrice"),
        regular_market_price: num("price", "regularMarketPrice"),
        market_cap: num("price", "marketCap"),
        trailing_pe: num("summaryDetail", "trailingPE"),
        forward_pe: num("summaryDetail", "forwardPE"),
        fifty_two_week_high: num("summaryDetail", "fiftyTwoWeekHigh"),
        fifty_two_week_low: num("summaryDetail", "fiftyTwoWeekLow"),
        long_name: text("price", "longName"),
        sector: text("assetProfile", "sector"),
        industry: text("assetProfile", "industry"),
        volume: num("summaryDetail", "volume").or(num("price", "regularMarketVolume")),
        dividend_yield: num("summaryDetail", "dividendYield"),
        beta: num("summaryDetail", "beta"),
        book_value: num("defaultKeyStatistics", "bookValue"),
        price_to_book: num("defaultKeyStatistics", "priceToBook"),
        enterprise_value: num("defaultKeyStatistics", "enterpriseValue"),
        ebitda: num("financialData", "ebitda"),
        trailing_eps: num("defaultKeyStatistics", "trailingEps"),
        forward_eps: num("defaultKeyStatistics", "forwardEps"),
        return_on_equity: num("financialData", "returnOnEquity"),
        total_debt: num("financialData", "totalDebt"),
        total_cash: num("financialData", "totalCash"),
        shares_outstanding: num("defaultKeyStatistics", "sharesOutstanding"),
        current_ratio: num("financialData", "currentRatio"),
    })
}

fn parse_chart(body: &Value) -> Vec<PriceBar> {
    let Some(result) = body.pointer("/chart/result/0") else {
        return Vec::new();
    };
    let Some(timestamps) = result.get("timestamp").and_then(Value::as_array) else {
        return Vec::new();
    };
    let Some(quote) = result.pointer("/indicators/quote/0") else {
        return Vec::new();
    };

    let series = |key: &str| -> Vec<Option<f64>> {
        quote
            .get(key)
            .and_then(Value::as_array)
            .map(|values| values.iter().map(Value::as_f64).collect())
            .unwrap_or_default()
    };
    let (open, high, low, close, volume) = (
        series("open"),
        series("high"),
        series("low"),
        series("close"),
        series("volume"),
    );

    timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let date = DateTime::from_timestamp(ts.as_i64()?, 0)?.date_naive();
            Some(PriceBar {
                date,
                open: (*open.get(i)?)?,
                high: (*high.get(i)?)?,
                low: (*low.get(i)?)?,
                close: (*close.get(i)?)?,
                volume: volume.get(i).copied().flatten().unwrap_or(0.0) as u64,
            })
        })
        .collect()
}

fn parse_timeseries(body: &Value, kind: StatementKind) -> StatementTable {
    let Some(results) = body.pointer("/timeseries/result").and_then(Value::as_array) else {
        return StatementTable::default();
    };
    let prefix = if kind.is_quarterly() { "quarterly" } else { "annual" };

    // item key -> (period, value) pairs
    let mut series: Vec<(&str, Vec<(NaiveDate, f64)>)> = Vec::new();
    let mut periods = BTreeSet::new();

    for &item in line_items(kind) {
        let type_name = format!("{}{}", prefix, item);
        let points: Vec<(NaiveDate, f64)> = results
            .iter()
            .filter_map(|r| r.get(&type_name))
            .filter_map(Value::as_array)
            .flatten()
            .filter_map(|point| {
                let date = point
                    .get("asOfDate")
                    .and_then(Value::as_str)
                    .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())?;
                let value = point.get("reportedValue").and_then(raw_number)?;
                Some((date, value))
            })
            .collect();
        if !points.is_empty() {
            periods.extend(points.iter().map(|(d, _)| *d));
            series.push((item, points));
        }
    }

    let periods: Vec<NaiveDate> = periods.into_iter().rev().collect();
    let rows = series
        .into_iter()
        .map(|(item, points)| {
            let values = periods
                .iter()
                .map(|period| points.iter().find(|(d, _)| d == period).map(|(_, v)| *v))
                .collect();
            (line_item_label(item), values)
        })
        .collect();

    StatementTable { periods, rows }
}

fn parse_search_news(body: &Value) -> Vec<NewsItem> {
    let Some(items) = body.get("news").and_then(Value::as_array) else {
        warn!("Search response carried no news array");
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let title = item.get("title").and_then(Value::as_str)?.to_string();
            let source = item
                .get("publisher")
                .and_then(Value::as_str)
                .unwrap_or("N/A")
                .to_string();
            let date = item
                .get("providerPublishTime")
                .and_then(Value::as_i64)
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "N/A".to_string());
            Some(NewsItem {
                title,
                source,
                date,
            })
        })
        .collect()
}
