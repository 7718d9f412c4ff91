// dca_core/src/walk_forward.rs

//! Walk-forward validation.
//!
//! Splits a time-ordered series into train/test folds, optimizes on each train
//! window with the GA and scores the winning configuration once on the
//! following test window. The gap between train and test return is reported
//! as a degradation percentage to flag overfitting.
//!
//! Two modes:
//! - holdout: one contiguous train prefix and test suffix split by ratio;
//! - rolling: fixed-size train/test windows slid forward by a roll step.

use rand::Rng;

use crate::genes;
use crate::utils;
use crate::engine;
use crate::settings;
use crate::performance;
use crate::optimization;
use crate::data_handler;

/// Minimum test bars for a holdout split.
pub const MIN_HOLDOUT_TEST_BARS: usize = 50;
/// Minimum train bars for a rolling fold.
pub const MIN_TRAIN_BARS: usize = 50;
/// Minimum test bars for a rolling fold.
pub const MIN_TEST_BARS: usize = 10;
/// Series shorter than this never produce rolling folds.
pub const MIN_ROLLING_SERIES_BARS: usize = 100;

/// A disjoint (train, test) pair; train strictly precedes test.
#[derive(Debug, Clone)]
pub struct Fold<'a> {
    pub index: usize,
    pub train: &'a [data_handler::MarketBar],
    pub test: &'a [data_handler::MarketBar],
    pub train_start: chrono::DateTime<chrono::Utc>,
    pub train_end: chrono::DateTime<chrono::Utc>,
    pub test_start: chrono::DateTime<chrono::Utc>,
    pub test_end: chrono::DateTime<chrono::Utc>,
}

impl<'a> Fold<'a> {
    /// Builds a fold from two non-empty adjacent partitions; the recorded
    /// timestamps are those of the first and last bar of each side.
    fn from_partitions(
        index: usize,
        train: &'a [data_handler::MarketBar],
        test: &'a [data_handler::MarketBar],
    ) -> Option<Self> {
        Some(Self {
            index,
            train_start: train.first()?.datetime,
            train_end: train.last()?.datetime,
            test_start: test.first()?.datetime,
            test_end: test.last()?.datetime,
            train,
            test,
        })
    }
}

/// Result of a holdout split.
#[derive(Debug, Clone)]
pub enum HoldoutSplit<'a> {
    Ready(Fold<'a>),
    NotEnoughData { train_bars: usize, test_bars: usize },
}

/// Splits `series` into a train prefix holding `ratio` of the bars and a test
/// suffix holding the rest. Fails softly when the test side has fewer than
/// [`MIN_HOLDOUT_TEST_BARS`] bars or the train side is empty.
pub fn split_holdout(series: &[data_handler::MarketBar], ratio: f64) -> HoldoutSplit<'_> {
    let split = ((series.len() as f64 * ratio).floor() as usize).min(series.len());
    let (train, test) = series.split_at(split);

    if test.len() < MIN_HOLDOUT_TEST_BARS || train.is_empty() {
        return HoldoutSplit::NotEnoughData {
            train_bars: train.len(),
            test_bars: test.len(),
        };
    }

    match Fold::from_partitions(0, train, test) {
        Some(fold) => HoldoutSplit::Ready(fold),
        None => HoldoutSplit::NotEnoughData {
            train_bars: train.len(),
            test_bars: test.len(),
        },
    }
}

/// Half-open time windows of one rolling fold: train `[train_start, test_start)`,
/// test `[test_start, test_end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldWindow {
    pub train_start: chrono::DateTime<chrono::Utc>,
    pub test_start: chrono::DateTime<chrono::Utc>,
    pub test_end: chrono::DateTime<chrono::Utc>,
}

/// Window geometry of rolling walk-forward: starting at `start`, emits a
/// window every `roll` until the next test window would end after `end`
/// (exclusive) or the roll step stops advancing.
pub fn fold_windows(
    start: chrono::DateTime<chrono::Utc>,
    end: chrono::DateTime<chrono::Utc>,
    train: chrono::Duration,
    test: chrono::Duration,
    roll: chrono::Duration,
) -> Vec<FoldWindow> {
    let mut windows = Vec::new();
    if train <= chrono::Duration::zero() || test <= chrono::Duration::zero() {
        return windows;
    }

    let mut cursor = start;
    loop {
        let Some(test_start) = cursor.checked_add_signed(train) else { break };
        let Some(test_end) = test_start.checked_add_signed(test) else { break };
        if test_end > end {
            break;
        }

        windows.push(FoldWindow {
            train_start: cursor,
            test_start,
            test_end,
        });

        match cursor.checked_add_signed(roll) {
            Some(next) if next > cursor => cursor = next,
            _ => break,
        }
    }

    windows
}

/// Exclusive end of the period covered by `series`: last timestamp plus one
/// bar interval (inferred from the last two bars).
fn series_end(series: &[data_handler::MarketBar]) -> Option<chrono::DateTime<chrono::Utc>> {
    let last = series.last()?;
    let interval = match series.len() {
        0 | 1 => chrono::Duration::zero(),
        n => last.datetime - series[n - 2].datetime,
    };
    Some(last.datetime + interval)
}

/// Cuts `series` into rolling folds. Folds with fewer than [`MIN_TRAIN_BARS`]
/// train or [`MIN_TEST_BARS`] test bars are skipped with a warning; a series
/// shorter than [`MIN_ROLLING_SERIES_BARS`] yields no folds at all.
pub fn generate_folds(
    series: &[data_handler::MarketBar],
    train: chrono::Duration,
    test: chrono::Duration,
    roll: chrono::Duration,
) -> Vec<Fold<'_>> {
    if series.len() < MIN_ROLLING_SERIES_BARS {
        tracing::warn!(
            bars = series.len(),
            "series too short for rolling walk-forward (need {} bars)",
            MIN_ROLLING_SERIES_BARS
        );
        return Vec::new();
    }

    let (Some(first), Some(end)) = (series.first(), series_end(series)) else {
        return Vec::new();
    };

    let mut folds = Vec::new();
    for window in fold_windows(first.datetime, end, train, test, roll) {
        let train_lo = series.partition_point(|bar| bar.datetime < window.train_start);
        let train_hi = series.partition_point(|bar| bar.datetime < window.test_start);
        let test_hi = series.partition_point(|bar| bar.datetime < window.test_end);

        let train_bars = &series[train_lo..train_hi];
        let test_bars = &series[train_hi..test_hi];

        if train_bars.len() < MIN_TRAIN_BARS || test_bars.len() < MIN_TEST_BARS {
            tracing::warn!(
                train_start = %window.train_start,
                train_bars = train_bars.len(),
                test_bars = test_bars.len(),
                "skipping degenerate fold"
            );
            continue;
        }

        if let Some(fold) = Fold::from_partitions(folds.len(), train_bars, test_bars) {
            folds.push(fold);
        }
    }

    folds
}

/// Relative drop from train to test return, in percent.
/// `(train - test) / max(0.01, |train|) * 100`.
pub fn degradation(train_return: f64, test_return: f64) -> f64 {
    (train_return - test_return) / train_return.abs().max(0.01) * 100.0
}

/// Overfitting classification of a degradation percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum OverfitClass {
    /// Test matched or beat train.
    None,
    Low,
    Moderate,
    High,
}

impl OverfitClass {
    pub fn classify(degradation: f64) -> Self {
        if degradation < 0.0 {
            OverfitClass::None
        } else if degradation < 20.0 {
            OverfitClass::Low
        } else if degradation < 50.0 {
            OverfitClass::Moderate
        } else {
            OverfitClass::High
        }
    }
}

impl std::fmt::Display for OverfitClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            OverfitClass::None => "none",
            OverfitClass::Low => "low",
            OverfitClass::Moderate => "moderate",
            OverfitClass::High => "high",
        };
        f.write_str(label)
    }
}

/// Train and out-of-sample outcome of one fold.
#[derive(Debug, Clone)]
pub struct FoldReport {
    pub index: usize,
    pub train_start: chrono::DateTime<chrono::Utc>,
    pub train_end: chrono::DateTime<chrono::Utc>,
    pub test_start: chrono::DateTime<chrono::Utc>,
    pub test_end: chrono::DateTime<chrono::Utc>,
    pub train_bars: usize,
    pub test_bars: usize,
    pub config: settings::StrategyConfig,
    pub train_result: performance::SimulationResult,
    pub test_result: performance::SimulationResult,
    pub degradation: f64,
}

impl FoldReport {
    pub fn get_class(&self) -> OverfitClass {
        OverfitClass::classify(self.degradation)
    }
}

/// Mean and sample standard deviation of fold metrics, plus the degradation
/// of the mean returns.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkForwardSummary {
    pub folds: usize,
    pub mean_train_return: f64,
    pub std_train_return: f64,
    pub mean_test_return: f64,
    pub std_test_return: f64,
    pub mean_train_drawdown: f64,
    pub std_train_drawdown: f64,
    pub mean_test_drawdown: f64,
    pub std_test_drawdown: f64,
    pub degradation: f64,
}

impl WalkForwardSummary {
    pub fn get_class(&self) -> OverfitClass {
        OverfitClass::classify(self.degradation)
    }
}

/// Aggregates fold reports; `None` when there are no folds.
pub fn summarize(reports: &[FoldReport]) -> Option<WalkForwardSummary> {
    if reports.is_empty() {
        return None;
    }

    let column = |f: fn(&FoldReport) -> f64| reports.iter().map(f).collect::<Vec<f64>>();
    let train_returns = column(|r| r.train_result.total_return);
    let test_returns = column(|r| r.test_result.total_return);
    let train_drawdowns = column(|r| r.train_result.max_drawdown);
    let test_drawdowns = column(|r| r.test_result.max_drawdown);

    let mean_train_return = utils::mean(&train_returns);
    let mean_test_return = utils::mean(&test_returns);

    Some(WalkForwardSummary {
        folds: reports.len(),
        mean_train_return,
        std_train_return: utils::sample_std(&train_returns),
        mean_test_return,
        std_test_return: utils::sample_std(&test_returns),
        mean_train_drawdown: utils::mean(&train_drawdowns),
        std_train_drawdown: utils::sample_std(&train_drawdowns),
        mean_test_drawdown: utils::mean(&test_drawdowns),
        std_test_drawdown: utils::sample_std(&test_drawdowns),
        degradation: degradation(mean_train_return, mean_test_return),
    })
}

/// Outcome of holdout validation.
#[derive(Debug, Clone)]
pub enum HoldoutOutcome {
    /// The split left too few bars; no search was run.
    NotEnoughData { train_bars: usize, test_bars: usize },
    /// The search on train or the backtest on test failed; validation stopped.
    Failed { error: String },
    Completed(FoldReport),
}

/// Outcome of rolling validation.
#[derive(Debug, Clone)]
pub struct RollingReport {
    pub folds: Vec<FoldReport>,
    /// Folds generated but not validated because the search or test run failed.
    pub failed_folds: usize,
    pub summary: Option<WalkForwardSummary>,
}

/// Runs the GA on train windows and scores the winner on test windows.
pub struct WalkForwardValidator<'e, E: engine::BacktestEngine + ?Sized> {
    engine: &'e E,
    params: optimization::GaParams,
    variant: genes::StrategyVariant,
    window_size: usize,
}

impl<'e, E: engine::BacktestEngine + ?Sized> WalkForwardValidator<'e, E> {
    pub fn new(engine: &'e E) -> Self {
        Self {
            engine,
            params: optimization::GaParams::standard(),
            variant: genes::StrategyVariant::canonical(settings::ComboFamily::Classic),
            window_size: 100,
        }
    }

    pub fn with_params(mut self, params: optimization::GaParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_variant(mut self, variant: genes::StrategyVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    /// Optimizes on `fold.train`, then backtests the winning configuration
    /// once on `fold.test` without further search.
    pub fn validate_fold<R: Rng>(
        &self,
        fold: &Fold<'_>,
        base: &settings::StrategyConfig,
        rng: &mut R,
    ) -> anyhow::Result<FoldReport> {
        let trained = optimization::GeneticAlgorithm::new(self.engine)
            .with_params(self.params.clone())
            .with_variant(self.variant.clone())
            .with_window_size(self.window_size)
            .run(base, fold.train, rng)?;

        let test_result = self.engine
            .run(trained.get_config(), fold.test, self.window_size)
            .map_err(|e| anyhow::anyhow!("Out-of-sample backtest failed: {}", e))?;

        let train_result = trained.get_result().clone();
        let degradation = degradation(train_result.total_return, test_result.total_return);

        anyhow::Ok(FoldReport {
            index: fold.index,
            train_start: fold.train_start,
            train_end: fold.train_end,
            test_start: fold.test_start,
            test_end: fold.test_end,
            train_bars: fold.train.len(),
            test_bars: fold.test.len(),
            config: trained.get_config().clone(),
            train_result,
            test_result,
            degradation,
        })
    }

    /// Holdout validation with a train prefix of `ratio`. Failures end the
    /// validation step only and are reported in the outcome.
    pub fn run_holdout<R: Rng>(
        &self,
        series: &[data_handler::MarketBar],
        ratio: f64,
        base: &settings::StrategyConfig,
        rng: &mut R,
    ) -> HoldoutOutcome {
        let fold = match split_holdout(series, ratio) {
            HoldoutSplit::Ready(fold) => fold,
            HoldoutSplit::NotEnoughData { train_bars, test_bars } => {
                tracing::warn!(
                    train_bars,
                    test_bars,
                    "not enough data for holdout validation (test needs {} bars)",
                    MIN_HOLDOUT_TEST_BARS
                );
                return HoldoutOutcome::NotEnoughData { train_bars, test_bars };
            }
        };

        tracing::info!(
            train_bars = fold.train.len(),
            test_bars = fold.test.len(),
            "holdout split {} .. {} | {} .. {}",
            fold.train_start, fold.train_end, fold.test_start, fold.test_end
        );

        let report = match self.validate_fold(&fold, base, rng) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, "holdout validation failed");
                return HoldoutOutcome::Failed { error: e.to_string() };
            }
        };
        tracing::info!(
            "holdout: train {:.2}%, test {:.2}%, degradation {:.1}% ({})",
            report.train_result.total_return * 100.0,
            report.test_result.total_return * 100.0,
            report.degradation,
            report.get_class()
        );

        HoldoutOutcome::Completed(report)
    }

    /// Rolling validation over windows of `train`/`test` length advanced by `roll`.
    /// Folds whose search or test run fails are skipped and counted.
    pub fn run_rolling<R: Rng>(
        &self,
        series: &[data_handler::MarketBar],
        train: chrono::Duration,
        test: chrono::Duration,
        roll: chrono::Duration,
        base: &settings::StrategyConfig,
        rng: &mut R,
    ) -> RollingReport {
        let folds = generate_folds(series, train, test, roll);
        tracing::info!(folds = folds.len(), "rolling walk-forward");

        let mut reports = Vec::with_capacity(folds.len());
        let mut failed_folds = 0;

        for fold in &folds {
            match self.validate_fold(fold, base, rng) {
                Ok(report) => {
                    tracing::info!(
                        "fold {}: train {:.2}%, test {:.2}%, degradation {:.1}% ({})",
                        report.index,
                        report.train_result.total_return * 100.0,
                        report.test_result.total_return * 100.0,
                        report.degradation,
                        report.get_class()
                    );
                    reports.push(report);
                }
                Err(e) => {
                    tracing::warn!(fold = fold.index, error = %e, "fold skipped");
                    failed_folds += 1;
                }
            }
        }

        let summary = summarize(&reports);
        RollingReport {
            folds: reports,
            failed_folds,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(offset: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::<chrono::Utc>::from_timestamp(1_704_067_200, 0).unwrap() + chrono::Duration::days(offset)
    }

    fn series(len: usize, step: chrono::Duration) -> Vec<data_handler::MarketBar> {
        (0..len)
            .map(|i| data_handler::MarketBar {
                datetime: day(0) + step * i as i32,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            })
            .collect()
    }

    fn report(train_return: f64, test_return: f64, train_dd: f64, test_dd: f64) -> FoldReport {
        FoldReport {
            index: 0,
            train_start: day(0),
            train_end: day(1),
            test_start: day(2),
            test_end: day(3),
            train_bars: 1,
            test_bars: 1,
            config: settings::StrategyConfig::default(),
            train_result: performance::SimulationResult {
                total_return: train_return,
                max_drawdown: train_dd,
                ..Default::default()
            },
            test_result: performance::SimulationResult {
                total_return: test_return,
                max_drawdown: test_dd,
                ..Default::default()
            },
            degradation: degradation(train_return, test_return),
        }
    }

    #[test]
    fn degradation_formula() {
        assert!((degradation(0.20, 0.10) - 50.0).abs() < 1e-9);
        assert_eq!(OverfitClass::classify(degradation(0.20, 0.10)), OverfitClass::High);
        assert_eq!(OverfitClass::classify(49.9), OverfitClass::Moderate);
        assert_eq!(OverfitClass::classify(-5.0), OverfitClass::None);
        // tiny train returns are floored at 1%
        assert!((degradation(0.001, -0.009) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn daily_windows_start_every_roll_step() {
        let windows = fold_windows(
            day(0),
            day(30),
            chrono::Duration::days(10),
            chrono::Duration::days(5),
            chrono::Duration::days(5),
        );
        let offsets: Vec<i64> = windows.iter().map(|w| (w.train_start - day(0)).num_days()).collect();
        assert_eq!(offsets, vec![0, 5, 10, 15]);
        assert!(windows.iter().all(|w| w.test_end <= day(30)));
        assert!(windows.iter().all(|w| w.train_start < w.test_start && w.test_start < w.test_end));
    }

    #[test]
    fn zero_roll_emits_single_window() {
        let windows = fold_windows(
            day(0),
            day(100),
            chrono::Duration::days(10),
            chrono::Duration::days(5),
            chrono::Duration::zero(),
        );
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn short_series_yields_no_rolling_folds() {
        let bars = series(99, chrono::Duration::hours(1));
        let folds = generate_folds(
            &bars,
            chrono::Duration::hours(60),
            chrono::Duration::hours(12),
            chrono::Duration::hours(12),
        );
        assert!(folds.is_empty());
    }

    #[test]
    fn rolling_folds_are_disjoint_and_ordered() {
        let bars = series(500, chrono::Duration::hours(1));
        let folds = generate_folds(
            &bars,
            chrono::Duration::hours(100),
            chrono::Duration::hours(50),
            chrono::Duration::hours(50),
        );

        // windows start at 0, 50, ..., 350; the last test window ends at hour 500
        assert_eq!(folds.len(), 8);
        for (i, fold) in folds.iter().enumerate() {
            assert_eq!(fold.index, i);
            assert_eq!(fold.train.len(), 100);
            assert_eq!(fold.test.len(), 50);
            assert!(fold.train_end < fold.test_start);
            assert!(fold.test_end <= bars.last().unwrap().datetime);
        }
    }

    #[test]
    fn degenerate_folds_are_skipped() {
        let bars = series(200, chrono::Duration::hours(1));
        let folds = generate_folds(
            &bars,
            chrono::Duration::hours(40),
            chrono::Duration::hours(20),
            chrono::Duration::hours(20),
        );
        assert!(folds.is_empty());
    }

    #[test]
    fn holdout_split_checks_test_size() {
        let bars = series(200, chrono::Duration::hours(1));
        match split_holdout(&bars, 0.75) {
            HoldoutSplit::Ready(fold) => {
                assert_eq!(fold.train.len(), 150);
                assert_eq!(fold.test.len(), 50);
                assert!(fold.train_end < fold.test_start);
            }
            other => panic!("unexpected split {:?}", other),
        }

        match split_holdout(&bars, 0.875) {
            HoldoutSplit::NotEnoughData { train_bars, test_bars } => {
                assert_eq!(train_bars, 175);
                assert_eq!(test_bars, 25);
            }
            other => panic!("unexpected split {:?}", other),
        }
    }

    #[test]
    fn summary_uses_sample_std_and_mean_degradation() {
        let reports = vec![
            report(0.30, 0.10, 0.05, 0.10),
            report(0.10, 0.10, 0.15, 0.20),
        ];
        let summary = summarize(&reports).unwrap();

        assert_eq!(summary.folds, 2);
        assert!((summary.mean_train_return - 0.20).abs() < 1e-12);
        assert!((summary.mean_test_return - 0.10).abs() < 1e-12);
        assert!((summary.std_train_return - 0.02_f64.sqrt()).abs() < 1e-12);
        assert_eq!(summary.std_test_return, 0.0);
        assert!((summary.mean_test_drawdown - 0.15).abs() < 1e-12);
        assert!((summary.degradation - 50.0).abs() < 1e-9);
        assert!(summarize(&[]).is_none());
    }
}
