//! Static charts summarizing an optimizer run.

use crate::error::{OptimizerError, Result};
use crate::portfolio::PortfolioAllocation;
use crate::stats::ReturnStatistics;
use clap::ValueEnum;
use plotly::common::{Marker, Mode, Title};
use plotly::layout::Axis;
use plotly::{Bar, Layout, Pie, Plot, Scatter};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const FIG_EXPECTED_RETURNS: &str = "fig_expected_returns";
pub const FIG_VOLATILITY: &str = "fig_volatility";
pub const FIG_RISK_RETURN: &str = "fig_risk_return";
pub const FIG_WEIGHTS_BAR: &str = "fig_weights_bar";
pub const FIG_WEIGHTS_PIE: &str = "fig_weights_pie";
pub const FIG_EFFICIENT_FRONTIER: &str = "fig_efficient_frontier";

const IMAGE_WIDTH: usize = 1000;
const IMAGE_HEIGHT: usize = 600;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ChartFormat {
    /// Static PNG via Kaleido (requires the `png` feature).
    Png,
    /// Standalone HTML.
    Html,
}

impl Default for ChartFormat {
    fn default() -> Self {
        if cfg!(feature = "png") {
            Self::Png
        } else {
            Self::Html
        }
    }
}

impl ChartFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Html => "html",
        }
    }
}

fn layout(title: &str, x_title: &str, y_title: &str) -> Layout {
    Layout::new()
        .title(Title::from(title))
        .x_axis(Axis::new().title(Title::from(x_title)))
        .y_axis(Axis::new().title(Title::from(y_title)))
}

fn asset_markers(stats: &ReturnStatistics) -> Box<Scatter<f64, f64>> {
    Scatter::new(stats.volatilities.clone(), stats.expected_returns.clone())
        .mode(Mode::Markers)
        .text_array(stats.tickers.clone())
        .marker(Marker::new().size(10).color("blue"))
        .name("Assets")
}

pub fn expected_returns_chart(stats: &ReturnStatistics) -> Plot {
    let mut plot = Plot::new();
    plot.add_trace(
        Bar::new(stats.tickers.clone(), stats.expected_returns.clone()).name("Annual expected return"),
    );
    plot.set_layout(layout("Annual expected return by asset", "Asset", "Return"));
    plot
}

pub fn volatility_chart(stats: &ReturnStatistics) -> Plot {
    let mut plot = Plot::new();
    plot.add_trace(Bar::new(stats.tickers.clone(), stats.volatilities.clone()).name("Annual volatility"));
    plot.set_layout(layout("Annual volatility by asset", "Asset", "Volatility"));
    plot
}

pub fn risk_return_chart(stats: &ReturnStatistics) -> Plot {
    let mut plot = Plot::new();
    plot.add_trace(asset_markers(stats));
    plot.set_layout(layout(
        "Annual return vs. volatility",
        "Annual volatility",
        "Expected return",
    ));
    plot
}

pub fn weights_bar_chart(alloc: &PortfolioAllocation) -> Plot {
    let mut plot = Plot::new();
    plot.add_trace(
        Bar::new(alloc.tickers().to_vec(), alloc.optimal.weights.clone()).name("Optimal weights"),
    );
    plot.set_layout(layout("Optimal portfolio weights", "Asset", "Weight"));
    plot
}

pub fn weights_pie_chart(alloc: &PortfolioAllocation) -> Plot {
    let mut plot = Plot::new();
    plot.add_trace(
        Pie::new(alloc.optimal.weights.clone())
            .labels(alloc.tickers().to_vec())
            .name("Optimal weights"),
    );
    plot.set_layout(Layout::new().title(Title::from("Optimal portfolio weights")));
    plot
}

/// Sampled candidates, the assets, and the selected portfolio on one
/// risk/return plane.
pub fn efficient_frontier_chart(alloc: &PortfolioAllocation) -> Plot {
    let (cloud_vol, cloud_ret): (Vec<f64>, Vec<f64>) = alloc
        .batch
        .volatilities
        .iter()
        .zip(alloc.batch.returns.iter())
        .zip(alloc.batch.sharpe_ratios.iter())
        .filter(|(_, sharpe)| sharpe.is_some())
        .map(|((&v, &r), _)| (v, r))
        .unzip();

    let mut plot = Plot::new();
    plot.add_trace(
        Scatter::new(cloud_vol, cloud_ret)
            .mode(Mode::Markers)
            .marker(Marker::new().size(3).color("lightgray").opacity(0.5))
            .name("Simulated portfolios"),
    );
    plot.add_trace(asset_markers(&alloc.statistics));
    plot.add_trace(
        Scatter::new(vec![alloc.optimal.volatility], vec![alloc.optimal.expected_return])
            .mode(Mode::Markers)
            .marker(Marker::new().size(12).color("red"))
            .name("Optimal portfolio"),
    );
    plot.set_layout(layout(
        "Markowitz efficient frontier",
        "Annual volatility",
        "Expected return",
    ));
    plot
}

/// Removes a chart left by an earlier run so a failed export cannot pass
/// off the old file as new output.
fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(OptimizerError::render(path, e)),
    }
}

fn write_plot(plot: &Plot, path: &Path, format: ChartFormat) -> Result<()> {
    remove_stale(path)?;
    match format {
        ChartFormat::Html => {
            std::fs::write(path, plot.to_html()).map_err(|e| OptimizerError::render(path, e))
        }
        ChartFormat::Png => write_png(plot, path),
    }
}

#[cfg(feature = "png")]
fn write_png(plot: &Plot, path: &Path) -> Result<()> {
    use plotly::ImageFormat;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    // Kaleido reports failures by panicking.
    let exported = catch_unwind(AssertUnwindSafe(|| {
        plot.write_image(path, ImageFormat::PNG, IMAGE_WIDTH, IMAGE_HEIGHT, 1.0);
    }));
    if exported.is_err() || !path.is_file() {
        return Err(OptimizerError::render(path, "kaleido export failed"));
    }
    Ok(())
}

#[cfg(not(feature = "png"))]
fn write_png(_plot: &Plot, path: &Path) -> Result<()> {
    debug!("PNG export unavailable ({}x{})", IMAGE_WIDTH, IMAGE_HEIGHT);
    Err(OptimizerError::render(
        path,
        "PNG export needs the `png` feature, which this build disables; use `--format html` instead",
    ))
}

/// Writes all six charts into `dir`, creating it if needed. Returns the
/// written paths in a fixed order.
pub fn render_all(alloc: &PortfolioAllocation, dir: &Path, format: ChartFormat) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|e| OptimizerError::render(dir, e))?;

    let stats = &alloc.statistics;
    let charts = [
        (FIG_EXPECTED_RETURNS, expected_returns_chart(stats)),
        (FIG_VOLATILITY, volatility_chart(stats)),
        (FIG_RISK_RETURN, risk_return_chart(stats)),
        (FIG_WEIGHTS_BAR, weights_bar_chart(alloc)),
        (FIG_WEIGHTS_PIE, weights_pie_chart(alloc)),
        (FIG_EFFICIENT_FRONTIER, efficient_frontier_chart(alloc)),
    ];

    let mut written = Vec::with_capacity(charts.len());
    for (stem, plot) in &charts {
        let path = dir.join(format!("{}.{}", stem, format.extension()));
        write_plot(plot, &path, format)?;
        debug!("Wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}
