// dca_optimizer/src/optimizers.rs

//! Run-mode dispatch.
//! Wires the reference backtest engine into the GA, the combination search and
//! the walk-forward validator, then writes the reports of whichever mode ran.

use crate::cli;
use crate::reports;
use crate::backtest;

pub struct OptimizationRunner {
    mode: cli::Mode,
    settings: dca_core::settings::Settings,
    engine: backtest::DcaBacktestEngine,
    reports: reports::ReportWriter,
}

impl OptimizationRunner {
    pub fn new(mode: cli::Mode, settings: &dca_core::settings::Settings) -> anyhow::Result<Self> {
        let reports = reports::ReportWriter::new(&settings.common.output_path)?;

        anyhow::Ok(Self {
            mode,
            settings: settings.clone(),
            engine: backtest::DcaBacktestEngine::new(),
            reports,
        })
    }

    /// GA budget with the configured worker count applied.
    fn ga_params(&self, params: dca_core::optimization::GaParams) -> dca_core::optimization::GaParams {
        match self.settings.common.workers {
            Some(workers) => params.with_workers(workers),
            None => params,
        }
    }

    fn variant(&self) -> dca_core::genes::StrategyVariant {
        dca_core::genes::StrategyVariant::canonical(self.settings.strategy.combo_family)
    }

    pub fn run<R: rand::Rng>(&self, series: &[dca_core::data_handler::MarketBar], rng: &mut R) -> anyhow::Result<()> {
        tracing::info!(
            mode = ?self.mode,
            bars = series.len(),
            output = %self.reports.get_output_dir().display(),
            "starting run"
        );

        match self.mode {
            cli::Mode::Backtest => self.run_backtest(series),
            cli::Mode::Genetic => self.run_genetic_search(series, rng),
            cli::Mode::Exhaustive => self.run_exhaustive_search(series, rng),
            cli::Mode::WalkForward => self.run_walk_forward(series, rng),
        }
    }

    fn run_backtest(&self, series: &[dca_core::data_handler::MarketBar]) -> anyhow::Result<()> {
        use dca_core::engine::BacktestEngine;

        let result = self.engine.run(&self.settings.strategy, series, self.settings.common.window_size)?;
        reports::print_summary("Backtest", &result);
        self.reports.write_simulation(&result)
    }

    fn run_genetic_search<R: rand::Rng>(
        &self,
        series: &[dca_core::data_handler::MarketBar],
        rng: &mut R,
    ) -> anyhow::Result<()> {
        let ga = dca_core::optimization::GeneticAlgorithm::new(&self.engine)
            .with_params(self.ga_params(dca_core::optimization::GaParams::standard()))
            .with_variant(self.variant())
            .with_window_size(self.settings.common.window_size);

        let best = ga.run(&self.settings.strategy, series, rng)?;

        println!("Best configuration: {}", best.get_config().format_for_display());
        reports::print_summary("Best individual", best.get_result());
        self.reports.write_best_config(best.get_config())?;
        self.reports.write_simulation(best.get_result())
    }

    fn run_exhaustive_search<R: rand::Rng>(
        &self,
        series: &[dca_core::data_handler::MarketBar],
        rng: &mut R,
    ) -> anyhow::Result<()> {
        let search = dca_core::combinations::CombinationSearch::new(&self.engine)
            .with_params(self.ga_params(dca_core::optimization::GaParams::per_combination()))
            .with_window_size(self.settings.common.window_size)
            .with_progress_log(self.reports.get_output_dir().join("combinations.log"));

        let outcome = search.run(&self.settings.strategy, series, rng)?;
        self.reports.write_combinations(outcome.get_summaries())?;

        let Some(best) = outcome.get_best() else {
            anyhow::bail!("No indicator combination produced a scored configuration");
        };

        println!("Best combination: {}", best.get_config().format_for_display());
        reports::print_summary("Best combination", best.get_result());
        self.reports.write_best_config(best.get_config())?;
        self.reports.write_simulation(best.get_result())
    }

    fn run_walk_forward<R: rand::Rng>(
        &self,
        series: &[dca_core::data_handler::MarketBar],
        rng: &mut R,
    ) -> anyhow::Result<()> {
        let validator = dca_core::walk_forward::WalkForwardValidator::new(&self.engine)
            .with_params(self.ga_params(dca_core::optimization::GaParams::standard()))
            .with_variant(self.variant())
            .with_window_size(self.settings.common.window_size);

        let wf = &self.settings.walk_forward;
        let base = &self.settings.strategy;

        if let Some(ratio) = wf.holdout_ratio {
            match validator.run_holdout(series, ratio, base, rng) {
                dca_core::walk_forward::HoldoutOutcome::NotEnoughData { train_bars, test_bars } => {
                    println!(
                        "Holdout validation skipped: not enough data (train {} bars, test {} bars)",
                        train_bars, test_bars
                    );
                }
                dca_core::walk_forward::HoldoutOutcome::Failed { error } => {
                    println!("Holdout validation failed: {}", error);
                }
                dca_core::walk_forward::HoldoutOutcome::Completed(report) => {
                    reports::print_summary("Holdout train", &report.train_result);
                    reports::print_summary("Holdout test", &report.test_result);
                    println!("Degradation: {:.1}% ({})", report.degradation, report.get_class());
                    self.reports.write_best_config(&report.config)?;
                    self.reports.write_folds(std::slice::from_ref(&report))?;
                }
            }
            return anyhow::Ok(());
        }

        let (Some(train_days), Some(test_days)) = (wf.train_days, wf.test_days) else {
            anyhow::bail!("Walk-forward needs either 'holdout_ratio' or both 'train_days' and 'test_days'");
        };
        let roll_days = wf.roll_days.unwrap_or(test_days);

        let report = validator.run_rolling(
            series,
            dca_core::utils::days_to_duration("train_days", train_days)?,
            dca_core::utils::days_to_duration("test_days", test_days)?,
            dca_core::utils::days_to_duration("roll_days", roll_days)?,
            base,
            rng,
        );

        if report.failed_folds > 0 {
            tracing::warn!(failed = report.failed_folds, "some folds could not be validated");
        }

        match &report.summary {
            Some(summary) => reports::print_walk_forward_summary(summary),
            None => println!("Rolling validation produced no folds"),
        }
        self.reports.write_folds(&report.folds)
    }
}
