//! Local market-data tool set
//!
//! Formats raw market data from a [`MarketDataSource`] into the tool texts and
//! derives financial ratios, falling back from quoted values to values computed
//! from the latest statements. Any ratio that cannot be derived is 0.0.

use crate::error::PipelineError;
use crate::models::{FinancialRatios, NewsItem};
use crate::tools::{MarketDataTools, StatementKind, ToolSource};
use crate::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Quote and key statistics for one ticker. Field names follow the Yahoo
/// `info` keys, so the same record parses provider JSON directly.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompanySnapshot {
    pub current_price: Option<f64>,
    pub regular_market_price: Option<f64>,
    pub market_cap: Option<f64>,
    #[serde(rename = "trailingPE")]
    pub trailing_pe: Option<f64>,
    #[serde(rename = "forwardPE")]
    pub forward_pe: Option<f64>,
    pub fifty_two_week_high: Option<f64>,
    pub fifty_two_week_low: Option<f64>,
    pub long_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub volume: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub beta: Option<f64>,
    pub book_value: Option<f64>,
    pub price_to_book: Option<f64>,
    pub enterprise_value: Option<f64>,
    pub ebitda: Option<f64>,
    pub trailing_eps: Option<f64>,
    pub forward_eps: Option<f64>,
    pub return_on_equity: Option<f64>,
    pub total_debt: Option<f64>,
    pub total_cash: Option<f64>,
    pub shares_outstanding: Option<f64>,
    pub current_ratio: Option<f64>,
}

impl CompanySnapshot {
    /// Current price, or the regular market price when that is missing.
    pub fn price(&self) -> Option<f64> {
        nonzero(self.current_price).or(nonzero(self.regular_market_price))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// A statement as line items by period, most recent period first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementTable {
    pub periods: Vec<NaiveDate>,
    pub rows: Vec<(String, Vec<Option<f64>>)>,
}

impl StatementTable {
    pub fn is_empty(&self) -> bool {
        self.periods.is_empty() || self.rows.is_empty()
    }

    /// Value of a line item in the most recent period.
    pub fn latest(&self, label: &str) -> Option<f64> {
        self.rows
            .iter()
            .find(|(name, _)| name == label)
            .and_then(|(_, values)| values.first().copied().flatten())
    }

    /// First non-zero latest value among several candidate labels.
    pub fn latest_of(&self, labels: &[&str]) -> Option<f64> {
        labels.iter().find_map(|label| nonzero(self.latest(label)))
    }
}

impl fmt::Display for StatementTable {
    /// First ten line items, one column per period.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<40}", "")?;
        for period in &self.periods {
            write!(f, "\t{}", period)?;
        }
        writeln!(f)?;
        for (label, values) in self.rows.iter().take(10) {
            write!(f, "{:<40}", label)?;
            for value in values {
                match value {
                    Some(v) => write!(f, "\t{:.1}", v)?,
                    None => write!(f, "\tNaN")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Raw market data behind the local tool set
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn company_snapshot(&self, ticker: &str) -> Result<CompanySnapshot>;
    /// Daily bars for a period such as `3mo`, oldest first. Empty when unknown.
    async fn price_history(&self, ticker: &str, period: &str) -> Result<Vec<PriceBar>>;
    async fn statement(&self, ticker: &str, kind: StatementKind) -> Result<StatementTable>;
    async fn news(&self, ticker: &str) -> Result<Vec<NewsItem>>;
}

pub struct LocalMarketData {
    source: Arc<dyn MarketDataSource>,
}

impl LocalMarketData {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl MarketDataTools for LocalMarketData {
    fn source(&self) -> ToolSource {
        ToolSource::Local
    }

    async fn stock_snapshot(&self, ticker: &str) -> Result<String> {
        match self.source.company_snapshot(ticker).await {
            Ok(snapshot) => Ok(format_snapshot(ticker, &snapshot)),
            Err(PipelineError::UpstreamDataUnavailable(reason)) => {
                debug!(ticker, %reason, "No snapshot data");
                Ok(format!("No stock info found for {}", ticker))
            }
            Err(e) => Err(e),
        }
    }

    async fn price_history(&self, ticker: &str, period: &str) -> Result<String> {
        let bars = self.source.price_history(ticker, period).await?;
        Ok(format_history(ticker, period, &bars))
    }

    async fn financial_statement(&self, ticker: &str, kind: StatementKind) -> Result<String> {
        let table = self.source.statement(ticker, kind).await?;
        if table.is_empty() {
            return Ok(format!("No {} data found for {}", kind, ticker));
        }
        Ok(format!("{} for {}:\n{}", kind.title(), ticker, table))
    }

    async fn computed_ratios(&self, ticker: &str) -> Result<FinancialRatios> {
        let (snapshot, income, balance) = tokio::join!(
            self.source.company_snapshot(ticker),
            self.source.statement(ticker, StatementKind::Financials),
            self.source.statement(ticker, StatementKind::BalanceSheet),
        );

        let snapshot = snapshot.unwrap_or_else(|e| {
            warn!(ticker, error = %e, "Snapshot unavailable for ratios");
            CompanySnapshot::default()
        });
        let income = income.unwrap_or_else(|e| {
            warn!(ticker, error = %e, "Income statement unavailable for ratios");
            StatementTable::default()
        });
        let balance = balance.unwrap_or_else(|e| {
            warn!(ticker, error = %e, "Balance sheet unavailable for ratios");
            StatementTable::default()
        });

        let ratios = compute_ratios(&snapshot, &income, &balance);
        debug!(ticker, ?ratios, "Ratios computed");
        Ok(ratios)
    }

    async fn news(&self, ticker: &str) -> Result<Vec<NewsItem>> {
        self.source.news(ticker).await
    }
}

const EQUITY_LABELS: [&str; 4] = [
    "Stockholders Equity",
    "Total Stockholder Equity",
    "Shareholders Equity",
    "Total Equity",
];

const NET_INCOME_LABELS: [&str; 3] = [
    "Net Income",
    "Net Income Common Stockholders",
    "Net Income Applicable To Common Shares",
];

const DEBT_LABELS: [&str; 4] = [
    "Total Debt",
    "Long Term Debt",
    "Net Debt",
    "Total Liabilities",
];

fn nonzero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v != 0.0)
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

fn round2(value: f64) -> f64 {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded.is_finite() {
        rounded
    } else {
        0.0
    }
}

/// Derive the eight ratios. Quoted values win; statement-derived values are
/// the fallback; anything else stays 0.0. Percentages are 0..100 scale.
pub fn compute_ratios(
    info: &CompanySnapshot,
    income: &StatementTable,
    balance: &StatementTable,
) -> FinancialRatios {
    let mut ratios = FinancialRatios::default();
    let price = info.price();

    // P/E
    if let Some(pe) = positive(nonzero(info.trailing_pe).or(nonzero(info.forward_pe))) {
        ratios.pe_ratio = round2(pe);
    } else if let (Some(price), Some(eps)) = (
        price,
        positive(nonzero(info.trailing_eps).or(nonzero(info.forward_eps))),
    ) {
        ratios.pe_ratio = round2(price / eps);
    }

    // EV/EBITDA
    if let (Some(ev), Some(ebitda)) = (nonzero(info.enterprise_value), positive(info.ebitda)) {
        ratios.ev_ebitda = round2(ev / ebitda);
    } else if let Some(market_cap) = nonzero(info.market_cap) {
        if !income.is_empty() {
            let operating_income = income.latest("Operating Income").unwrap_or(0.0);
            let depreciation = income
                .latest_of(&["Depreciation", "Reconciled Depreciation"])
                .unwrap_or(0.0);
            let ebitda = operating_income + depreciation;
            let ev = market_cap + info.total_debt.unwrap_or(0.0) - info.total_cash.unwrap_or(0.0);
            if ebitda > 0.0 && ev > 0.0 {
                ratios.ev_ebitda = round2(ev / ebitda);
            }
        }
    }

    // ROE
    if let Some(roe) = nonzero(info.return_on_equity) {
        ratios.roe = round2(roe * 100.0);
    } else if !income.is_empty() && !balance.is_empty() {
        let net_income = income.latest_of(&NET_INCOME_LABELS);
        let equity = positive(balance.latest_of(&EQUITY_LABELS));
        if let (Some(net_income), Some(equity)) = (net_income, equity) {
            ratios.roe = round2(net_income / equity * 100.0);
        }
    }

    // Debt-to-equity
    if !balance.is_empty() {
        let debt = balance.latest_of(&DEBT_LABELS);
        let equity = positive(balance.latest_of(&EQUITY_LABELS));
        if let (Some(debt), Some(equity)) = (debt, equity) {
            ratios.debt_to_equity = round2(debt / equity);
        }
    }

    // Margins
    if !income.is_empty() {
        if let Some(revenue) = positive(income.latest("Total Revenue")) {
            if let Some(gross) = nonzero(income.latest("Gross Profit")) {
                ratios.gross_margin = round2(gross / revenue * 100.0);
            }
            if let Some(operating) = nonzero(income.latest("Operating Income")) {
                ratios.operating_margin = round2(operating / revenue * 100.0);
            }
        }
    }

    // Price-to-book
    if let Some(pb) = positive(info.price_to_book) {
        ratios.price_to_book = round2(pb);
    } else if let Some(price) = price {
        if let Some(book_value) = positive(info.book_value) {
            ratios.price_to_book = round2(price / book_value);
        } else if !balance.is_empty() {
            let equity = balance.latest_of(&[
                "Stockholders Equity",
                "Total Stockholder Equity",
                "Total Equity",
            ]);
            if let (Some(equity), Some(shares)) = (equity, positive(info.shares_outstanding)) {
                let per_share = equity / shares;
                if per_share != 0.0 {
                    ratios.price_to_book = round2(price / per_share);
                }
            }
        }
    }

    // Current ratio
    if let Some(current) = positive(info.current_ratio) {
        ratios.current_ratio = round2(current);
    } else if !balance.is_empty() {
        let assets = balance.latest_of(&["Current Assets", "Total Current Assets"]);
        let liabilities =
            positive(balance.latest_of(&["Current Liabilities", "Total Current Liabilities"]));
        if let (Some(assets), Some(liabilities)) = (assets, liabilities) {
            ratios.current_ratio = round2(assets / liabilities);
        }
    }

    ratios
}

/// Integer with `,` thousands separators.
fn grouped(value: f64) -> String {
    let n = value.round() as i64;
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        format!("-{}", out)
    } else {
        out
    }
}

fn or_zero(value: Option<f64>) -> f64 {
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn or_unknown(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("Unknown")
}

pub fn format_snapshot(ticker: &str, info: &CompanySnapshot) -> String {
    format!(
        "Stock Info for {}:\n\
         - Current Price: ${}\n\
         - Market Cap: ${}\n\
         - P/E Ratio: {}\n\
         - 52 Week High: ${}\n\
         - 52 Week Low: ${}\n\
         - Company: {}\n\
         - Sector: {}\n\
         - Industry: {}\n\
         - Volume: {}\n\
         - Dividend Yield: {}\n\
         - Beta: {}\n\
         - Book Value: {}\n\
         - Price to Book: {}\n\
         - Enterprise Value: {}\n\
         - EBITDA: {}\n",
        ticker,
        info.price().unwrap_or(0.0),
        grouped(or_zero(info.market_cap)),
        or_zero(info.trailing_pe),
        or_zero(info.fifty_two_week_high),
        or_zero(info.fifty_two_week_low),
        or_unknown(&info.long_name),
        or_unknown(&info.sector),
        or_unknown(&info.industry),
        grouped(or_zero(info.volume)),
        or_zero(info.dividend_yield),
        or_zero(info.beta),
        or_zero(info.book_value),
        or_zero(info.price_to_book),
        or_zero(info.enterprise_value).round() as i64,
        or_zero(info.ebitda).round() as i64,
    )
}

/// Last ten bars as a tab-separated table.
pub fn format_history(ticker: &str, period: &str, bars: &[PriceBar]) -> String {
    if bars.is_empty() {
        return format!("No historical data found for {}", ticker);
    }

    let mut out = format!(
        "Historical prices for {} (last 10 days from {} period):\n",
        ticker, period
    );
    out.push_str("Date\t\tOpen\tHigh\tLow\tClose\tVolume\n");
    out.push_str(&"-".repeat(60));
    out.push('\n');

    let start = bars.len().saturating_sub(10);
    for bar in &bars[start..] {
        out.push_str(&format!(
            "{}\t${:.2}\t${:.2}\t${:.2}\t${:.2}\t{}\n",
            bar.date.format("%Y-%m-%d"),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            grouped(bar.volume as f64)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixtureMarketSource;

    fn table(rows: &[(&str, f64)]) -> StatementTable {
        StatementTable {
            periods: vec![NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()],
            rows: rows
                .iter()
                .map(|(label, value)| (label.to_string(), vec![Some(*value)]))
                .collect(),
        }
    }

    #[test]
    fn test_quoted_ratios_take_precedence() {
        let info = CompanySnapshot {
            trailing_pe: Some(28.456),
            enterprise_value: Some(3_000.0),
            ebitda: Some(120.0),
            return_on_equity: Some(0.1473),
            price_to_book: Some(45.1234),
            current_ratio: Some(0.987),
            ..CompanySnapshot::default()
        };
        let ratios = compute_ratios(&info, &StatementTable::default(), &StatementTable::default());
        assert_eq!(ratios.pe_ratio, 28.46);
        assert_eq!(ratios.ev_ebitda, 25.0);
        assert_eq!(ratios.roe, 14.73);
        assert_eq!(ratios.price_to_book, 45.12);
        assert_eq!(ratios.current_ratio, 0.99);
        assert_eq!(ratios.debt_to_equity, 0.0);
    }

    #[test]
    fn test_statement_fallbacks() {
        let info = CompanySnapshot {
            current_price: Some(50.0),
            trailing_eps: Some(2.5),
            market_cap: Some(1_000.0),
            total_debt: Some(200.0),
            total_cash: Some(100.0),
            shares_outstanding: Some(10.0),
            ..CompanySnapshot::default()
        };
        let income = table(&[
            ("Total Revenue", 400.0),
            ("Gross Profit", 160.0),
            ("Operating Income", 80.0),
            ("Depreciation", 20.0),
            ("Net Income Common Stockholders", 50.0),
        ]);
        let balance = table(&[
            ("Total Stockholder Equity", 250.0),
            ("Long Term Debt", 125.0),
            ("Total Current Assets", 300.0),
            ("Current Liabilities", 150.0),
        ]);

        let ratios = compute_ratios(&info, &income, &balance);
        assert_eq!(ratios.pe_ratio, 20.0);
        assert_eq!(ratios.ev_ebitda, 11.0);
        assert_eq!(ratios.roe, 20.0);
        assert_eq!(ratios.debt_to_equity, 0.5);
        assert_eq!(ratios.gross_margin, 40.0);
        assert_eq!(ratios.operating_margin, 20.0);
        assert_eq!(ratios.price_to_book, 2.0);
        assert_eq!(ratios.current_ratio, 2.0);
    }

    #[test]
    fn test_missing_data_yields_zero_ratios() {
        let ratios = compute_ratios(
            &CompanySnapshot::default(),
            &StatementTable::default(),
            &StatementTable::default(),
        );
        assert_eq!(ratios, FinancialRatios::default());
    }

    #[test]
    fn test_negative_equity_is_not_used() {
        let balance = table(&[("Stockholders Equity", -10.0), ("Total Debt", 50.0)]);
        let ratios = compute_ratios(&CompanySnapshot::default(), &StatementTable::default(), &balance);
        assert_eq!(ratios.debt_to_equity, 0.0);
    }

    #[test]
    fn test_snapshot_parses_provider_info_keys() {
        let info: CompanySnapshot = serde_json::from_str(
            r#"{"currentPrice": 189.5, "trailingPE": 29.1, "marketCap": 2950000000000,
                "longName": "Apple Inc.", "returnOnEquity": 1.47, "unrelated": "ignored"}"#,
        )
        .unwrap();
        assert_eq!(info.price(), Some(189.5));
        assert_eq!(info.trailing_pe, Some(29.1));
        assert_eq!(info.long_name.as_deref(), Some("Apple Inc."));
    }

    #[test]
    fn test_grouped_thousands() {
        assert_eq!(grouped(0.0), "0");
        assert_eq!(grouped(999.0), "999");
        assert_eq!(grouped(1_000.0), "1,000");
        assert_eq!(grouped(2_950_000_000_000.0), "2,950,000,000,000");
        assert_eq!(grouped(-1_234_567.0), "-1,234,567");
    }

    #[test]
    fn test_history_keeps_last_ten_bars() {
        let bars: Vec<PriceBar> = (1..=12)
            .map(|day| PriceBar {
                date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
                open: 10.0,
                high: 11.0,
                low: 9.5,
                close: 10.5,
                volume: 1_500_000,
            })
            .collect();
        let text = format_history("MSFT", "1mo", &bars);
        assert!(!text.contains("2024-03-02"));
        assert!(text.contains("2024-03-03\t$10.00\t$11.00\t$9.50\t$10.50\t1,500,000\n"));
        assert_eq!(text.lines().count(), 13);
    }

    #[tokio::test]
    async fn test_no_history_is_descriptive_text() {
        let local = LocalMarketData::new(Arc::new(FixtureMarketSource::with_empty(&["DELISTED"])));
        let text = local.price_history("DELISTED", "3mo").await.unwrap();
        assert_eq!(text, "No historical data found for DELISTED");
    }

    #[tokio::test]
    async fn test_statement_summary_heading() {
        let local = LocalMarketData::new(Arc::new(FixtureMarketSource::default()));
        let text = local
            .financial_statement("AAPL", StatementKind::Financials)
            .await
            .unwrap();
        assert!(text.starts_with("Financials for AAPL:\n"));
        assert!(text.contains("Total Revenue"));

        let empty = LocalMarketData::new(Arc::new(FixtureMarketSource::with_empty(&["DELISTED"])));
        let text = empty
            .financial_statement("DELISTED", StatementKind::Cashflow)
            .await
            .unwrap();
        assert_eq!(text, "No cashflow data found for DELISTED");
    }

    #[tokio::test]
    async fn test_unknown_ticker_snapshot_is_descriptive_text() {
        let local = LocalMarketData::new(Arc::new(FixtureMarketSource::with_empty(&["ZZZZQ"])));
        let text = local.stock_snapshot("ZZZZQ").await.unwrap();
        assert_eq!(text, "No stock info found for ZZZZQ");

        let text = local.stock_snapshot("AAPL").await.unwrap();
        assert!(text.starts_with("Stock Info for AAPL:\n"));
    }

    #[tokio::test]
    async fn test_ratios_survive_unavailable_upstream() {
        let local = LocalMarketData::new(Arc::new(FixtureMarketSource::with_empty(&["DELISTED"])));
        let ratios = local.computed_ratios("DELISTED").await.unwrap();
        assert_eq!(ratios, FinancialRatios::default());
    }
}
