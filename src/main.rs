mod charts;
mod config;
mod data;
mod error;
mod portfolio;
mod stats;

use charts::ChartFormat;
use clap::Parser;
use config::{OptimizerConfig, DEFAULT_END_DATE, DEFAULT_NUM_PORTFOLIOS, DEFAULT_RISK_FREE_RATE, DEFAULT_START_DATE};
use data::YahooProvider;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Monte Carlo portfolio optimizer: samples random long-only portfolios and keeps the maximum Sharpe ratio",
    after_help = "EXAMPLES:
    # Default 15-asset universe, 2010-01-01 to 2024-04-10
    cargo run --release

    # Custom universe, reproducible run, HTML charts
    cargo run --release -- --tickers NVDA,MSFT,AAPL,GLD --seed 42 --format html --output-dir charts"
)]
struct Args {
    /// Comma-separated symbols; weights are reported in this order (default: built-in 15-asset universe)
    #[arg(long)]
    tickers: Option<String>,

    /// First date of price history (YYYY-MM-DD)
    #[arg(long, default_value = DEFAULT_START_DATE)]
    start: String,

    /// End of price history, exclusive (YYYY-MM-DD)
    #[arg(long, default_value = DEFAULT_END_DATE)]
    end: String,

    /// Number of random portfolios to sample
    #[arg(long, default_value_t = DEFAULT_NUM_PORTFOLIOS)]
    portfolios: usize,

    /// Annual risk-free rate used in the Sharpe ratio
    #[arg(long, default_value_t = DEFAULT_RISK_FREE_RATE)]
    risk_free_rate: f64,

    /// Seed for the weight sampler; omit for a fresh draw each run
    #[arg(long)]
    seed: Option<u64>,

    /// Directory the six charts are written to
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Chart file format (png needs the `png` feature)
    #[arg(long, value_enum)]
    format: Option<ChartFormat>,
}

impl Args {
    fn into_config(self) -> error::Result<OptimizerConfig> {
        let defaults = OptimizerConfig::default();
        Ok(OptimizerConfig {
            tickers: self
                .tickers
                .as_deref()
                .map(config::parse_tickers)
                .unwrap_or(defaults.tickers),
            start: config::parse_date(&self.start)?,
            end: config::parse_date(&self.end)?,
            num_portfolios: self.portfolios,
            risk_free_rate: self.risk_free_rate,
            seed: self.seed,
            output_dir: self.output_dir,
            chart_format: self.format.unwrap_or(defaults.chart_format),
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    config::init_cpu_parallelism();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("montecarlo_portfolio=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => {
            info!("Portfolio optimization completed. Charts saved.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Portfolio optimization failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.into_config()?;
    let provider = YahooProvider::new();
    portfolio::run_portfolio_optimization(&provider, &config).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_reproduces_fixed_script() {
        let config = Args::parse_from(["montecarlo-portfolio"]).into_config().unwrap();
        let defaults = OptimizerConfig::default();
        assert_eq!(config.tickers, defaults.tickers);
        assert_eq!(config.start, defaults.start);
        assert_eq!(config.end, defaults.end);
        assert_eq!(config.num_portfolios, 10_000);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = Args::parse_from([
            "montecarlo-portfolio",
            "--tickers",
            "nvda,msft",
            "--start",
            "2020-01-01",
            "--portfolios",
            "500",
            "--risk-free-rate",
            "0.05",
            "--seed",
            "7",
            "--format",
            "html",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.tickers, vec!["NVDA".to_string(), "MSFT".to_string()]);
        assert_eq!(config.start.to_string(), "2020-01-01");
        assert_eq!(config.num_portfolios, 500);
        assert!((config.risk_free_rate - 0.05).abs() < 1e-15);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.chart_format, ChartFormat::Html);
    }

    #[test]
    fn test_no_cache_flag_does_not_exist() {
        // Every run fetches fresh data, so there is no cache to opt out of.
        assert!(Args::try_parse_from(["montecarlo-portfolio", "--no-cache"]).is_err());
    }

    #[test]
    fn test_bad_date_flag_is_rejected() {
        let result = Args::parse_from(["montecarlo-portfolio", "--end", "April 2024"]).into_config();
        assert!(result.is_err());
    }
}
