use crate::error::{OptimizerError, Result};
use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Source of historical daily prices.
#[allow(async_fn_in_trait)]
pub trait MarketDataProvider {
    /// Returns adjusted closing prices for `tickers` between `start` (inclusive)
    /// and `end` (exclusive), columns in the order given.
    async fn fetch(&self, tickers: &[String], start: NaiveDate, end: NaiveDate) -> Result<PriceTable>;
}

/// One trading day's adjusted close.
#[derive(Clone, Debug, PartialEq)]
pub struct Candle {
    pub date: NaiveDate,
    pub close: f64,
}

/// Holds historical closes for a specific symbol, chronologically ordered.
#[derive(Clone, Debug)]
pub struct StockData {
    pub symbol: String,
    pub history: Vec<Candle>,
}

/// Dates × assets table of closing prices. `prices[row][col]` is `None` where
/// the asset did not trade on that date.
#[derive(Clone, Debug)]
pub struct PriceTable {
    pub tickers: Vec<String>,
    pub dates: Vec<NaiveDate>,
    pub prices: Vec<Vec<Option<f64>>>,
}

impl PriceTable {
    /// Outer-joins per-symbol series on their dates. Columns follow `tickers`;
    /// every ticker must be present in `series` with at least one price.
    pub fn from_series(tickers: &[String], series: &[StockData]) -> Result<Self> {
        let mut columns: Vec<BTreeMap<NaiveDate, f64>> = Vec::with_capacity(tickers.len());
        for ticker in tickers {
            let data = series
                .iter()
                .find(|s| s.symbol.eq_ignore_ascii_case(ticker))
                .ok_or_else(|| OptimizerError::data(ticker.as_str(), "no price series returned"))?;
            let column: BTreeMap<NaiveDate, f64> = data
                .history
                .iter()
                .filter(|c| c.close.is_finite())
                .map(|c| (c.date, c.close))
                .collect();
            if column.is_empty() {
                return Err(OptimizerError::data(ticker.as_str(), "no usable closing prices"));
            }
            columns.push(column);
        }

        let dates: Vec<NaiveDate> = columns
            .iter()
            .flat_map(|c| c.keys().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let prices = dates
            .iter()
            .map(|date| columns.iter().map(|c| c.get(date).copied()).collect())
            .collect();

        Ok(Self {
            tickers: tickers.to_vec(),
            dates,
            prices,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn num_assets(&self) -> usize {
        self.tickers.len()
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Yahoo Finance
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooApiError>,
}

#[derive(Deserialize, Debug)]
struct YahooApiError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize, Debug)]
struct YahooResult {
    meta: YahooMeta,
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Debug, Default)]
struct YahooMeta {
    #[serde(rename = "exchangeTimezoneName")]
    exchange_timezone_name: Option<String>,
    gmtoffset: Option<i32>,
}

#[derive(Deserialize, Debug)]
struct YahooIndicators {
    #[serde(default)]
    quote: Vec<YahooQuote>,
    adjclose: Option<Vec<YahooAdjClose>>,
}

#[derive(Deserialize, Debug)]
struct YahooQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Deserialize, Debug)]
struct YahooAdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Maps a bar timestamp to its trading date in the exchange's time zone.
fn trading_date(timestamp: i64, meta: &YahooMeta) -> Option<NaiveDate> {
    let utc = Utc.timestamp_opt(timestamp, 0).single()?;
    if let Some(tz) = meta
        .exchange_timezone_name
        .as_deref()
        .and_then(|name| name.parse::<Tz>().ok())
    {
        return Some(utc.with_timezone(&tz).date_naive());
    }
    let offset = FixedOffset::east_opt(meta.gmtoffset.unwrap_or(0))?;
    Some(utc.with_timezone(&offset).date_naive())
}

fn parse_chart_response(symbol: &str, response: &YahooChartResponse) -> Result<StockData> {
    if let Some(err) = &response.chart.error {
        return Err(OptimizerError::data(
            symbol,
            format!(
                "{}: {}",
                err.code.as_deref().unwrap_or("error"),
                err.description.as_deref().unwrap_or("no description")
            ),
        ));
    }

    let result = response
        .chart
        .result
        .as_ref()
        .and_then(|r| r.first())
        .ok_or_else(|| OptimizerError::data(symbol, "no chart result"))?;

    // Adjusted closes when Yahoo provides them, raw closes otherwise.
    let closes: &[Option<f64>] = match result.indicators.adjclose.as_ref().and_then(|a| a.first()) {
        Some(adj) if !adj.adjclose.is_empty() => &adj.adjclose,
        _ => {
            debug!("{}: no adjclose series, using close", symbol);
            result
                .indicators
                .quote
                .first()
                .map(|q| q.close.as_slice())
                .unwrap_or(&[])
        }
    };

    // Keyed by date so a duplicated trailing bar replaces the earlier one.
    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (i, &timestamp) in result.timestamp.iter().enumerate() {
        let Some(Some(close)) = closes.get(i).copied() else {
            continue;
        };
        if !close.is_finite() {
            continue;
        }
        if let Some(date) = trading_date(timestamp, &result.meta) {
            by_date.insert(date, close);
        }
    }

    if by_date.is_empty() {
        return Err(OptimizerError::data(symbol, "no usable closing prices"));
    }

    Ok(StockData {
        symbol: symbol.to_uppercase(),
        history: by_date
            .into_iter()
            .map(|(date, close)| Candle { date, close })
            .collect(),
    })
}

fn unix_midnight(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

/// Daily bars from the Yahoo Finance chart API. One request per symbol, no
/// retries and no on-disk cache.
pub struct YahooProvider {
    client: reqwest::Client,
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl YahooProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn fetch_symbol(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<StockData> {
        info!("Fetching {} ({} to {})...", symbol, start, end);
        let url = format!("https://query1.finance.yahoo.com/v8/finance/chart/{}", symbol);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("period1", unix_midnight(start).to_string()),
                ("period2", unix_midnight(end).to_string()),
                ("interval", "1d".to_string()),
                ("events", "div,splits".to_string()),
            ])
            .header("User-Agent", "Mozilla/5.0")
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| OptimizerError::data(symbol, e))?
            .error_for_status()
            .map_err(|e| OptimizerError::data(symbol, e))?
            .json::<YahooChartResponse>()
            .await
            .map_err(|e| OptimizerError::data(symbol, format!("invalid response body: {}", e)))?;

        parse_chart_response(symbol, &response)
    }
}

impl MarketDataProvider for YahooProvider {
    async fn fetch(&self, tickers: &[String], start: NaiveDate, end: NaiveDate) -> Result<PriceTable> {
        let mut series = Vec::with_capacity(tickers.len());
        for symbol in tickers {
            let data = self.fetch_symbol(symbol, start, end).await?;
            info!("{}: {} daily closes", symbol, data.history.len());
            series.push(data);
        }
        PriceTable::from_series(tickers, &series)
    }
}
