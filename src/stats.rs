use crate::config::TRADING_DAYS;
use crate::data::PriceTable;
use crate::error::{OptimizerError, Result};

/// Annualized per-asset statistics of the cleaned daily return series.
/// Every vector and matrix is positionally aligned to `tickers`.
#[derive(Clone, Debug)]
pub struct ReturnStatistics {
    pub tickers: Vec<String>,
    pub expected_returns: Vec<f64>,
    pub volatilities: Vec<f64>,
    /// Daily (not annualized) sample covariance, N×N.
    pub covariance: Vec<Vec<f64>>,
    /// Cleaned daily returns, rows × N.
    pub daily_returns: Vec<Vec<f64>>,
}

impl ReturnStatistics {
    pub fn num_assets(&self) -> usize {
        self.tickers.len()
    }
}

/// Row-over-row percentage change. A row is kept only when every asset has a
/// defined return, i.e. both prices exist and the previous one is non-zero.
pub fn daily_returns(table: &PriceTable) -> Vec<Vec<f64>> {
    table
        .prices
        .windows(2)
        .filter_map(|w| {
            w[0].iter()
                .zip(w[1].iter())
                .map(|(prev, curr)| match (prev, curr) {
                    (Some(p), Some(c)) if *p != 0.0 => Some(c / p - 1.0),
                    _ => None,
                })
                .collect::<Option<Vec<f64>>>()
        })
        .collect()
}

fn column_means(rows: &[Vec<f64>], n: usize) -> Vec<f64> {
    let count = rows.len() as f64;
    (0..n)
        .map(|j| rows.iter().map(|r| r[j]).sum::<f64>() / count)
        .collect()
}

/// Sample covariance matrix (n − 1 denominator).
fn covariance_matrix(rows: &[Vec<f64>], means: &[f64]) -> Vec<Vec<f64>> {
    let n = means.len();
    let denom = rows.len() as f64 - 1.0;
    let mut cov = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let sum: f64 = rows
                .iter()
                .map(|r| (r[i] - means[i]) * (r[j] - means[j]))
                .sum();
            let covariance = sum / denom;
            cov[i][j] = covariance;
            cov[j][i] = covariance;
        }
    }
    cov
}

/// Computes annualized expected returns, annualized volatilities and the
/// daily covariance matrix from a price table.
pub fn compute_statistics(table: &PriceTable) -> Result<ReturnStatistics> {
    let n = table.num_assets();
    if n == 0 {
        return Err(OptimizerError::Computation("price table has no assets".into()));
    }
    if table.num_rows() < 2 {
        return Err(OptimizerError::Computation(format!(
            "price table needs at least 2 rows, got {}",
            table.num_rows()
        )));
    }
    if let Some(row) = table.prices.iter().find(|r| r.len() != n) {
        return Err(OptimizerError::Computation(format!(
            "price row has {} columns, expected {}",
            row.len(),
            n
        )));
    }

    let returns = daily_returns(table);
    if returns.len() < 2 {
        return Err(OptimizerError::Computation(format!(
            "only {} complete daily return rows after dropping missing values; at least 2 are required",
            returns.len()
        )));
    }

    let means = column_means(&returns, n);
    let covariance = covariance_matrix(&returns, &means);

    let expected_returns: Vec<f64> = means.iter().map(|m| m * TRADING_DAYS).collect();
    let volatilities: Vec<f64> = (0..n)
        .map(|i| covariance[i][i].sqrt() * TRADING_DAYS.sqrt())
        .collect();

    let all_finite = expected_returns
        .iter()
        .chain(volatilities.iter())
        .chain(covariance.iter().flatten())
        .all(|v| v.is_finite());
    if !all_finite {
        return Err(OptimizerError::Computation(
            "non-finite statistic computed from price table".into(),
        ));
    }

    Ok(ReturnStatistics {
        tickers: table.tickers.clone(),
        expected_returns,
        volatilities,
        covariance,
        daily_returns: returns,
    })
}
