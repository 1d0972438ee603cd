use crate::charts;
use crate::config::OptimizerConfig;
use crate::data::MarketDataProvider;
use crate::error::{OptimizerError, Result};
use crate::stats::{compute_statistics, ReturnStatistics};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

// ──────────────────────────────────────────────────────────────────────────────
// Data Structures
// ──────────────────────────────────────────────────────────────────────────────

/// Every sampled candidate, in draw order.
#[derive(Clone, Debug)]
pub struct SimulationBatch {
    pub weights: Vec<Vec<f64>>,
    pub returns: Vec<f64>,
    pub volatilities: Vec<f64>,
    /// `None` for candidates skipped by the zero-variance guard.
    pub sharpe_ratios: Vec<Option<f64>>,
}

impl SimulationBatch {
    /// Builds a batch from already-evaluated candidates, scoring each one.
    pub fn new(
        weights: Vec<Vec<f64>>,
        returns: Vec<f64>,
        volatilities: Vec<f64>,
        risk_free_rate: f64,
    ) -> Result<Self> {
        if weights.len() != returns.len() || weights.len() != volatilities.len() {
            return Err(OptimizerError::Computation(format!(
                "batch length mismatch: {} weight vectors, {} returns, {} volatilities",
                weights.len(),
                returns.len(),
                volatilities.len()
            )));
        }
        let sharpe_ratios = returns
            .iter()
            .zip(volatilities.iter())
            .map(|(&r, &v)| sharpe_ratio(r, v, risk_free_rate))
            .collect();
        Ok(Self {
            weights,
            returns,
            volatilities,
            sharpe_ratios,
        })
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }
}

/// The maximum-Sharpe candidate of a batch.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimalPortfolio {
    /// Position of the candidate in draw order.
    pub index: usize,
    pub weights: Vec<f64>,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

/// Complete result of one optimizer run.
#[derive(Clone, Debug)]
pub struct PortfolioAllocation {
    pub statistics: ReturnStatistics,
    pub batch: SimulationBatch,
    pub optimal: OptimalPortfolio,
    pub risk_free_rate: f64,
}

impl PortfolioAllocation {
    pub fn tickers(&self) -> &[String] {
        &self.statistics.tickers
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Portfolio Helpers
// ──────────────────────────────────────────────────────────────────────────────

fn portfolio_return(weights: &[f64], means: &[f64]) -> f64 {
    weights.iter().zip(means.iter()).map(|(w, r)| w * r).sum()
}

fn portfolio_variance(weights: &[f64], cov: &[Vec<f64>]) -> f64 {
    let n = weights.len();
    let mut var = 0.0;
    for i in 0..n {
        for j in 0..n {
            var += weights[i] * weights[j] * cov[i][j];
        }
    }
    var
}

/// `(return - rf) / volatility`, or `None` when the volatility is not strictly
/// positive or the ratio is not finite.
pub fn sharpe_ratio(expected_return: f64, volatility: f64, risk_free_rate: f64) -> Option<f64> {
    if !(volatility > 0.0) {
        return None;
    }
    let sharpe = (expected_return - risk_free_rate) / volatility;
    sharpe.is_finite().then_some(sharpe)
}

/// Draws `n` values uniformly from [0, 1) and scales them to sum to 1.
///
/// This is not uniform over the simplex; it is the plain normalize-the-draws
/// scheme, kept as-is so seeded runs stay reproducible.
pub fn generate_random_weights(n: usize, rng: &mut impl Rng) -> Vec<f64> {
    let raw: Vec<f64> = (0..n).map(|_| rng.r#gen::<f64>()).collect();
    let sum: f64 = raw.iter().sum();
    if sum <= 0.0 {
        return vec![1.0 / n as f64; n];
    }
    raw.iter().map(|v| v / sum).collect()
}

/// Seeded generator when a seed is given, entropy-seeded otherwise.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Monte Carlo Search
// ──────────────────────────────────────────────────────────────────────────────

/// Samples `num_portfolios` random long-only portfolios and evaluates each.
///
/// Draws happen sequentially in candidate order; evaluation runs on the rayon
/// pool. Candidate volatility is `sqrt(wᵀ Σ w)` in the units of `covariance`.
pub fn simulate_portfolios(
    expected_returns: &[f64],
    covariance: &[Vec<f64>],
    num_portfolios: usize,
    risk_free_rate: f64,
    rng: &mut impl Rng,
) -> Result<SimulationBatch> {
    let n = expected_returns.len();
    if n == 0 {
        return Err(OptimizerError::Computation("expected return vector is empty".into()));
    }
    if covariance.len() != n || covariance.iter().any(|row| row.len() != n) {
        return Err(OptimizerError::Computation(format!(
            "covariance matrix must be {n}×{n}"
        )));
    }
    if num_portfolios == 0 {
        return Err(OptimizerError::Computation("sample count must be positive".into()));
    }

    let weights: Vec<Vec<f64>> = (0..num_portfolios)
        .map(|_| generate_random_weights(n, &mut *rng))
        .collect();

    let (returns, volatilities): (Vec<f64>, Vec<f64>) = weights
        .par_iter()
        .map(|w| {
            let ret = portfolio_return(w, expected_returns);
            let var = portfolio_variance(w, covariance);
            // Non-positive variance maps to NaN and is skipped by the Sharpe guard.
            let vol = if var > 0.0 { var.sqrt() } else { f64::NAN };
            (ret, vol)
        })
        .unzip();

    SimulationBatch::new(weights, returns, volatilities, risk_free_rate)
}

/// Picks the candidate with the highest Sharpe ratio. Ties resolve to the
/// earliest candidate.
pub fn select_max_sharpe(batch: &SimulationBatch) -> Result<OptimalPortfolio> {
    let mut best: Option<(usize, f64)> = None;
    for (i, sharpe) in batch.sharpe_ratios.iter().enumerate() {
        let Some(sharpe) = *sharpe else {
            continue;
        };
        if best.is_none_or(|(_, b)| sharpe > b) {
            best = Some((i, sharpe));
        }
    }

    let (index, sharpe_ratio) = best.ok_or_else(|| {
        OptimizerError::Computation(format!(
            "none of the {} candidates has a positive, finite volatility",
            batch.len()
        ))
    })?;

    Ok(OptimalPortfolio {
        index,
        weights: batch.weights[index].clone(),
        expected_return: batch.returns[index],
        volatility: batch.volatilities[index],
        sharpe_ratio,
    })
}

/// Runs the Monte Carlo search over the given statistics.
pub fn optimize_portfolio(
    stats: &ReturnStatistics,
    num_portfolios: usize,
    risk_free_rate: f64,
    rng: &mut impl Rng,
) -> Result<(SimulationBatch, OptimalPortfolio)> {
    info!(
        "Optimizing portfolio with {} assets, {} random samples...",
        stats.num_assets(),
        num_portfolios
    );
    let batch = simulate_portfolios(
        &stats.expected_returns,
        &stats.covariance,
        num_portfolios,
        risk_free_rate,
        rng,
    )?;

    let skipped = batch.sharpe_ratios.iter().filter(|s| s.is_none()).count();
    if skipped > 0 {
        debug!("{} candidates skipped for non-positive variance", skipped);
    }

    let optimal = select_max_sharpe(&batch)?;
    Ok((batch, optimal))
}

// ──────────────────────────────────────────────────────────────────────────────
// Top-Level Command: Run Portfolio Optimization
// ──────────────────────────────────────────────────────────────────────────────

/// Full pipeline: fetch prices → statistics → Monte Carlo search → charts.
pub async fn run_portfolio_optimization<P: MarketDataProvider>(
    provider: &P,
    config: &OptimizerConfig,
) -> Result<(PortfolioAllocation, Vec<PathBuf>)> {
    config.validate()?;
    info!(
        "=== Monte Carlo Portfolio Optimizer ===\n  Assets: {:?}\n  Range: {} to {}\n  Samples: {}\n  Risk-free: {:.2}%",
        config.tickers,
        config.start,
        config.end,
        config.num_portfolios,
        config.risk_free_rate * 100.0
    );

    let table = provider.fetch(&config.tickers, config.start, config.end).await?;
    info!(
        "Price table: {} dates × {} assets",
        table.num_rows(),
        table.num_assets()
    );

    let statistics = compute_statistics(&table)?;
    log_statistics(&statistics);

    let mut rng = make_rng(config.seed);
    let (batch, optimal) = optimize_portfolio(
        &statistics,
        config.num_portfolios,
        config.risk_free_rate,
        &mut rng,
    )?;

    let allocation = PortfolioAllocation {
        statistics,
        batch,
        optimal,
        risk_free_rate: config.risk_free_rate,
    };
    print_allocation(&allocation);

    let written = charts::render_all(&allocation, &config.output_dir, config.chart_format)?;
    info!("Charts saved: {}", written.len());
    for path in &written {
        info!("  {}", path.display());
    }

    Ok((allocation, written))
}

fn log_statistics(stats: &ReturnStatistics) {
    info!(
        "Cleaned daily returns: {} rows × {} assets",
        stats.daily_returns.len(),
        stats.num_assets()
    );
    info!("Expected returns (annualized, Vec<f64>): {:?}", stats.expected_returns);
    info!("Volatilities (annualized, Vec<f64>): {:?}", stats.volatilities);
    for (i, ticker) in stats.tickers.iter().enumerate() {
        info!(
            "  {}: E[r]={:.4}, σ={:.4}",
            ticker, stats.expected_returns[i], stats.volatilities[i]
        );
    }
}

/// Pretty-prints the optimal allocation to stdout.
pub fn print_allocation(alloc: &PortfolioAllocation) {
    let opt = &alloc.optimal;
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║           Maximum Sharpe Portfolio                         ║");
    println!("╠════════════════════════════════════════════════════════════╣");
    println!(
        "║  Expected Annual Return : {:>+8.2}%                        ║",
        opt.expected_return * 100.0
    );
    println!(
        "║  Volatility             : {:>8.4}                         ║",
        opt.volatility
    );
    println!(
        "║  Sharpe Ratio           : {:>8.2}                         ║",
        opt.sharpe_ratio
    );
    println!(
        "║  Candidate              : {:>8} of {:<8}                ║",
        opt.index + 1,
        alloc.batch.len()
    );
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  Symbol      Weight    E[Ann.Ret]   Ann.Vol                ║");
    println!("╠════════════════════════════════════════════════════════════╣");

    // Sort by weight descending
    let mut rows: Vec<usize> = (0..opt.weights.len()).collect();
    rows.sort_by(|&a, &b| opt.weights[b].total_cmp(&opt.weights[a]));

    let stats = &alloc.statistics;
    for i in rows {
        println!(
            "║  {:<9} {:>7.2}%   {:>+8.2}%   {:>7.2}%                ║",
            stats.tickers[i],
            opt.weights[i] * 100.0,
            stats.expected_returns[i] * 100.0,
            stats.volatilities[i] * 100.0
        );
    }
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
    println!("⚠  Educational use only. Not financial advice.");
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charts::ChartFormat;
    use crate::data::PriceTable;
    use chrono::NaiveDate;

    fn mock_statistics() -> ReturnStatistics {
        ReturnStatistics {
            tickers: vec!["AAA".into(), "BBB".into(), "CCC".into()],
            expected_returns: vec![0.12, 0.08, 0.20],
            volatilities: vec![0.25, 0.15, 0.40],
            covariance: vec![
                vec![0.00025, 0.00005, 0.00010],
                vec![0.00005, 0.00009, 0.00002],
                vec![0.00010, 0.00002, 0.00064],
            ],
            daily_returns: Vec::new(),
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        let mut rng = make_rng(Some(7));
        for _ in 0..1000 {
            let w = generate_random_weights(15, &mut rng);
            let sum: f64 = w.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9, "Weights should sum to 1.0, got {}", sum);
            assert!(w.iter().all(|&v| v >= 0.0), "Weights should be non-negative");
        }
    }

    #[test]
    fn test_simulated_batch_weights_are_valid() {
        let stats = mock_statistics();
        let mut rng = make_rng(Some(11));
        let batch = simulate_portfolios(&stats.expected_returns, &stats.covariance, 500, 0.02, &mut rng)
            .unwrap();
        assert_eq!(batch.len(), 500);
        for w in &batch.weights {
            assert_eq!(w.len(), 3);
            assert!(w.iter().all(|&v| v >= 0.0));
            assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
        assert!(batch.sharpe_ratios.iter().all(|s| s.is_some()));
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let stats = mock_statistics();
        let (_, first) = optimize_portfolio(&stats, 10_000, 0.02, &mut make_rng(Some(42))).unwrap();
        let (_, second) = optimize_portfolio(&stats, 10_000, 0.02, &mut make_rng(Some(42))).unwrap();
        assert_eq!(first, second);

        let (_, other) = optimize_portfolio(&stats, 10_000, 0.02, &mut make_rng(Some(43))).unwrap();
        assert_ne!(first.weights, other.weights);
    }

    #[test]
    fn test_selects_unique_best_sharpe_candidate() {
        let weights = vec![
            vec![0.5, 0.5, 0.0],
            vec![0.2, 0.3, 0.5],
            vec![1.0, 0.0, 0.0],
            vec![0.1, 0.1, 0.8],
        ];
        // Sharpe: 0.6, 1.3, 1.0, 0.95
        let returns = vec![0.08, 0.15, 0.12, 0.21];
        let vols = vec![0.10, 0.10, 0.10, 0.20];
        let batch = SimulationBatch::new(weights, returns, vols, 0.02).unwrap();

        let best = select_max_sharpe(&batch).unwrap();
        assert_eq!(best.index, 1);
        assert_eq!(best.weights, vec![0.2, 0.3, 0.5]);
        assert!((best.expected_return - 0.15).abs() < 1e-15);
        assert!((best.volatility - 0.10).abs() < 1e-15);
        assert!((best.sharpe_ratio - 1.3).abs() < 1e-12);
    }

    #[test]
    fn test_ties_resolve_to_first_candidate() {
        let batch = SimulationBatch::new(
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.5, 0.5]],
            vec![0.10, 0.12, 0.12],
            vec![0.20, 0.10, 0.10],
            0.02,
        )
        .unwrap();
        assert_eq!(select_max_sharpe(&batch).unwrap().index, 1);
    }

    #[test]
    fn test_zero_variance_candidates_are_skipped() {
        let batch = SimulationBatch::new(
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
            vec![0.50, 0.10],
            vec![0.0, 0.10],
            0.02,
        )
        .unwrap();
        assert_eq!(batch.sharpe_ratios[0], None);
        assert_eq!(select_max_sharpe(&batch).unwrap().index, 1);

        let degenerate = SimulationBatch::new(
            vec![vec![1.0], vec![1.0]],
            vec![0.1, 0.1],
            vec![0.0, f64::NAN],
            0.02,
        )
        .unwrap();
        assert!(matches!(
            select_max_sharpe(&degenerate),
            Err(OptimizerError::Computation(_))
        ));
    }

    #[test]
    fn test_all_zero_covariance_is_a_computation_error() {
        let mut rng = make_rng(Some(1));
        let result = simulate_portfolios(&[0.1, 0.2], &[vec![0.0, 0.0], vec![0.0, 0.0]], 100, 0.02, &mut rng)
            .and_then(|batch| select_max_sharpe(&batch));
        assert!(matches!(result, Err(OptimizerError::Computation(_))));
    }

    #[test]
    fn test_malformed_inputs_are_rejected() {
        let mut rng = make_rng(Some(1));
        assert!(simulate_portfolios(&[], &[], 10, 0.02, &mut rng).is_err());
        assert!(simulate_portfolios(&[0.1, 0.2], &[vec![0.01]], 10, 0.02, &mut rng).is_err());
        assert!(simulate_portfolios(&[0.1], &[vec![0.01]], 0, 0.02, &mut rng).is_err());
        assert!(SimulationBatch::new(vec![vec![1.0]], vec![], vec![0.1], 0.02).is_err());
    }

    #[test]
    fn test_sharpe_ratio_guard() {
        assert_eq!(sharpe_ratio(0.12, 0.0, 0.02), None);
        assert_eq!(sharpe_ratio(0.12, -0.1, 0.02), None);
        assert_eq!(sharpe_ratio(0.12, f64::NAN, 0.02), None);
        assert!((sharpe_ratio(0.12, 0.2, 0.02).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_optimal_beats_every_candidate() {
        let stats = mock_statistics();
        let (batch, optimal) = optimize_portfolio(&stats, 2_000, 0.02, &mut make_rng(Some(3))).unwrap();
        assert!(batch.sharpe_ratios.iter().flatten().all(|&s| s <= optimal.sharpe_ratio));
        assert_eq!(batch.weights[optimal.index], optimal.weights);
        let expected = portfolio_return(&optimal.weights, &stats.expected_returns);
        assert!((optimal.expected_return - expected).abs() < 1e-15);
    }

    struct StaticProvider(PriceTable);

    impl MarketDataProvider for StaticProvider {
        async fn fetch(&self, tickers: &[String], _start: NaiveDate, _end: NaiveDate) -> Result<PriceTable> {
            assert_eq!(tickers, self.0.tickers.as_slice());
            Ok(self.0.clone())
        }
    }

    struct FailingProvider;

    impl MarketDataProvider for FailingProvider {
        async fn fetch(&self, tickers: &[String], _start: NaiveDate, _end: NaiveDate) -> Result<PriceTable> {
            Err(OptimizerError::data(tickers[0].as_str(), "connection refused"))
        }
    }

    fn synthetic_table() -> PriceTable {
        let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
        let tickers: Vec<String> = vec!["UP".into(), "WAVE".into(), "FLAT".into()];
        let rows = 120;
        let prices = (0..rows)
            .map(|t| {
                let t = t as f64;
                vec![
                    Some(100.0 * (1.0 + 0.002 * t) + (t * 0.7).sin()),
                    Some(50.0 + 5.0 * (t * 0.3).sin() + 0.05 * t),
                    Some(20.0 + 0.5 * (t * 1.1).cos()),
                ]
            })
            .collect();
        PriceTable {
            tickers,
            dates: (0..rows).map(|i| start + chrono::Duration::days(i as i64)).collect(),
            prices,
        }
    }

    #[tokio::test]
    async fn test_pipeline_end_to_end_with_synthetic_prices() {
        let out = tempfile::tempdir().unwrap();
        let table = synthetic_table();
        let config = OptimizerConfig {
            tickers: table.tickers.clone(),
            num_portfolios: 2_000,
            seed: Some(99),
            output_dir: out.path().to_path_buf(),
            chart_format: ChartFormat::Html,
            ..OptimizerConfig::default()
        };
        let provider = StaticProvider(table);

        let (alloc, written) = run_portfolio_optimization(&provider, &config).await.unwrap();
        assert_eq!(alloc.tickers(), config.tickers.as_slice());
        assert_eq!(alloc.batch.len(), 2_000);
        assert_eq!(alloc.optimal.weights.len(), 3);
        assert!((alloc.optimal.weights.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert_eq!(written.len(), 6);
        assert!(written.iter().all(|p| p.exists()));
        // Only the charts land on disk; nothing is left behind for later runs.
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 6);

        let (again, _) = run_portfolio_optimization(&provider, &config).await.unwrap();
        assert_eq!(alloc.optimal, again.optimal);
    }

    #[tokio::test]
    async fn test_pipeline_surfaces_data_acquisition_error() {
        let out = tempfile::tempdir().unwrap();
        let config = OptimizerConfig {
            output_dir: out.path().to_path_buf(),
            chart_format: ChartFormat::Html,
            ..OptimizerConfig::default()
        };
        let err = run_portfolio_optimization(&FailingProvider, &config)
            .await
            .unwrap_err();
        assert!(matches!(err, OptimizerError::DataAcquisition { .. }));
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }
}
