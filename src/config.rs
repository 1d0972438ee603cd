use crate::charts::ChartFormat;
use crate::error::{OptimizerError, Result};
use chrono::NaiveDate;
use rayon::ThreadPoolBuilder;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

/// Annual trading days for annualization.
pub const TRADING_DAYS: f64 = 252.0;

/// Number of random portfolios sampled per run.
pub const DEFAULT_NUM_PORTFOLIOS: usize = 10_000;

/// Risk-free annual rate used in Sharpe calculations.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.02;

pub const DEFAULT_START_DATE: &str = "2010-01-01";
pub const DEFAULT_END_DATE: &str = "2024-04-10";

/// Default asset universe. Weight vectors are positionally aligned to this order.
pub const DEFAULT_TICKERS: &[&str] = &[
    "BTC-USD", "ETH-USD", "BABA", "GC=F", "CL=F", "^IXIC", "MSFT", "AAPL", "SOL1-USD", "NIO",
    "UPWK", "SQM", "GOOGL", "META", "BIDU",
];

/// Everything one optimizer run needs. The tickers are the column order of
/// every vector and matrix the pipeline produces.
#[derive(Clone, Debug)]
pub struct OptimizerConfig {
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    /// Exclusive.
    pub end: NaiveDate,
    pub num_portfolios: usize,
    pub risk_free_rate: f64,
    pub seed: Option<u64>,
    pub output_dir: PathBuf,
    pub chart_format: ChartFormat,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            tickers: DEFAULT_TICKERS.iter().map(|s| s.to_string()).collect(),
            start: NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or_default(),
            end: NaiveDate::from_ymd_opt(2024, 4, 10).unwrap_or_default(),
            num_portfolios: DEFAULT_NUM_PORTFOLIOS,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
            seed: None,
            output_dir: PathBuf::from("."),
            chart_format: ChartFormat::default(),
        }
    }
}

impl OptimizerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tickers.is_empty() {
            return Err(OptimizerError::Config("at least one ticker is required".into()));
        }

        let mut seen = HashSet::new();
        for ticker in &self.tickers {
            if ticker.trim().is_empty() {
                return Err(OptimizerError::Config("empty ticker symbol".into()));
            }
            if !seen.insert(ticker.to_uppercase()) {
                return Err(OptimizerError::Config(format!("duplicate ticker {}", ticker)));
            }
        }

        if self.start >= self.end {
            return Err(OptimizerError::Config(format!(
                "start date {} must be before end date {}",
                self.start, self.end
            )));
        }
        if self.num_portfolios == 0 {
            return Err(OptimizerError::Config("number of portfolios must be positive".into()));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(OptimizerError::Config(format!(
                "risk-free rate must be finite, got {}",
                self.risk_free_rate
            )));
        }
        Ok(())
    }
}

/// Parses a `YYYY-MM-DD` date flag.
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| OptimizerError::Config(format!("invalid date '{}': {}", raw, e)))
}

/// Splits a comma-separated ticker list, keeping the given order.
pub fn parse_tickers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}
