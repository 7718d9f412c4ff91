// dca_core/src/engine.rs

//! Interface to the backtest engine.
//! The optimizer treats the engine as an opaque scoring function: it only reads
//! `SimulationResult::total_return`, everything else is passed through for
//! reporting.

use crate::settings;
use crate::performance;
use crate::data_handler;

/// Defines the interface for a backtest engine.
/// Implementations must be shareable across the evaluation worker pool.
pub trait BacktestEngine: Send + Sync {
    /// Runs one configuration over one series.
    /// # Arguments
    /// * `config` - The configuration to simulate.
    /// * `series` - Time-ordered candles; read-only and shared between workers.
    /// * `window_size` - Number of trailing bars available to indicators.
    /// # Returns
    /// * `anyhow::Result<SimulationResult>` with aggregate and detailed results.
    fn run(
        &self,
        config: &settings::StrategyConfig,
        series: &[data_handler::MarketBar],
        window_size: usize,
    ) -> anyhow::Result<performance::SimulationResult>;
}

impl<F> BacktestEngine for F
where
    F: Fn(&settings::StrategyConfig, &[data_handler::MarketBar], usize) -> anyhow::Result<performance::SimulationResult> + Send + Sync,
{
    fn run(
        &self,
        config: &settings::StrategyConfig,
        series: &[data_handler::MarketBar],
        window_size: usize,
    ) -> anyhow::Result<performance::SimulationResult> {
        self(config, series, window_size)
    }
}
