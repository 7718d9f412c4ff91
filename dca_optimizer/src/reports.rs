// dca_optimizer/src/reports.rs

//! Result files and console summaries.

use anyhow::Context;

use dca_core::performance::SimulationResult;

/// One row of `folds.csv`.
#[derive(Debug, serde::Serialize)]
struct FoldRow {
    fold: usize,
    train_start: chrono::DateTime<chrono::Utc>,
    train_end: chrono::DateTime<chrono::Utc>,
    test_start: chrono::DateTime<chrono::Utc>,
    test_end: chrono::DateTime<chrono::Utc>,
    train_bars: usize,
    test_bars: usize,
    train_return: f64,
    test_return: f64,
    train_drawdown: f64,
    test_drawdown: f64,
    degradation: f64,
    overfitting: String,
    config: String,
}

/// One row of `combinations.csv`.
#[derive(Debug, serde::Serialize)]
struct CombinationRow {
    indicators: String,
    total_return: Option<f64>,
    max_drawdown: Option<f64>,
}

/// Writes result files into one output directory, creating it on first use.
pub struct ReportWriter {
    output_dir: std::path::PathBuf,
}

impl ReportWriter {
    pub fn new<P: Into<std::path::PathBuf>>(output_dir: P) -> anyhow::Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create output directory '{}'", output_dir.display()))?;

        anyhow::Ok(Self { output_dir })
    }

    pub fn get_output_dir(&self) -> &std::path::Path {
        &self.output_dir
    }

    fn csv_writer(&self, file_name: &str) -> anyhow::Result<csv::Writer<std::fs::File>> {
        let path = self.output_dir.join(file_name);
        csv::Writer::from_path(&path)
            .with_context(|| format!("Failed to create '{}'", path.display()))
    }

    fn write_rows<T: serde::Serialize>(&self, file_name: &str, rows: impl IntoIterator<Item = T>) -> anyhow::Result<()> {
        let mut writer = self.csv_writer(file_name)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        tracing::info!(file = %self.output_dir.join(file_name).display(), "report written");
        anyhow::Ok(())
    }

    /// `best_config.json`: the winning configuration.
    pub fn write_best_config(&self, config: &dca_core::settings::StrategyConfig) -> anyhow::Result<()> {
        let path = self.output_dir.join("best_config.json");
        let json = serde_json::to_string_pretty(config)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
        tracing::info!(file = %path.display(), "report written");
        anyhow::Ok(())
    }

    /// `trades.csv` and `cycles.csv` of one simulation.
    pub fn write_simulation(&self, result: &SimulationResult) -> anyhow::Result<()> {
        self.write_rows("trades.csv", &result.trades)?;
        self.write_rows("cycles.csv", &result.cycles)
    }

    /// `folds.csv`: one row per validated walk-forward fold.
    pub fn write_folds(&self, folds: &[dca_core::walk_forward::FoldReport]) -> anyhow::Result<()> {
        self.write_rows("folds.csv", folds.iter().map(|fold| FoldRow {
            fold: fold.index,
            train_start: fold.train_start,
            train_end: fold.train_end,
            test_start: fold.test_start,
            test_end: fold.test_end,
            train_bars: fold.train_bars,
            test_bars: fold.test_bars,
            train_return: fold.train_result.total_return,
            test_return: fold.test_result.total_return,
            train_drawdown: fold.train_result.max_drawdown,
            test_drawdown: fold.test_result.max_drawdown,
            degradation: fold.degradation,
            overfitting: fold.get_class().to_string(),
            config: fold.config.format_for_display(),
        }))
    }

    /// `combinations.csv`: outcome of every indicator combination.
    pub fn write_combinations(&self, summaries: &[dca_core::combinations::CombinationSummary]) -> anyhow::Result<()> {
        self.write_rows("combinations.csv", summaries.iter().map(|summary| CombinationRow {
            indicators: summary.indicators.iter().map(|i| i.name()).collect::<Vec<_>>().join("+"),
            total_return: summary.fitness,
            max_drawdown: summary.max_drawdown,
        }))
    }
}

/// Prints the aggregate metrics of a simulation as a two-column table.
pub fn print_summary(title: &str, result: &SimulationResult) {
    println!("=== {} ===", title);
    for (key, value) in result.to_stats_list() {
        println!("{:<20} {:>14}", key, value);
    }
}

/// Prints the cross-fold aggregate of a rolling walk-forward run.
pub fn print_walk_forward_summary(summary: &dca_core::walk_forward::WalkForwardSummary) {
    println!("=== Walk-forward summary ({} folds) ===", summary.folds);
    println!("{:<20} {:>9.2}% ± {:.2}%", "Train_Return", summary.mean_train_return * 100.0, summary.std_train_return * 100.0);
    println!("{:<20} {:>9.2}% ± {:.2}%", "Test_Return", summary.mean_test_return * 100.0, summary.std_test_return * 100.0);
    println!("{:<20} {:>9.2}% ± {:.2}%", "Train_Drawdown", summary.mean_train_drawdown * 100.0, summary.std_train_drawdown * 100.0);
    println!("{:<20} {:>9.2}% ± {:.2}%", "Test_Drawdown", summary.mean_test_drawdown * 100.0, summary.std_test_drawdown * 100.0);
    println!("{:<20} {:>9.1}% ({})", "Degradation", summary.degradation, summary.get_class());
}
