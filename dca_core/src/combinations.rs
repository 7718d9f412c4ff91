// dca_core/src/combinations.rs

//! Exhaustive indicator-combination search.
//! Runs a reduced-budget GA for every indicator subset of size two or more,
//! with the subset held fixed, and keeps the single best result overall.

use std::io::Write;

use itertools::Itertools;
use rand::Rng;

use crate::genes;
use crate::engine;
use crate::settings;
use crate::optimization;
use crate::data_handler;

/// Every subset of `names` with at least two elements, in ascending bitmask
/// order (bit `i` selects `names[i]`). Element order inside a subset follows
/// `names`.
pub fn generate_combinations<T: Clone>(names: &[T]) -> Vec<Vec<T>> {
    let n = names.len();
    if n < 2 || n >= usize::BITS as usize {
        return Vec::new();
    }

    (3_usize..(1_usize << n))
        .filter(|mask| mask.count_ones() >= 2)
        .map(|mask| {
            names
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1_usize << *i) != 0)
                .map(|(_, name)| name.clone())
                .collect()
        })
        .collect()
}

/// Outcome of the GA for one indicator combination.
#[derive(Debug, Clone)]
pub struct CombinationSummary {
    pub indicators: Vec<settings::Indicator>,
    /// `None` when no configuration of this combination could be scored.
    pub fitness: Option<f64>,
    pub max_drawdown: Option<f64>,
}

/// Result of a full combination sweep.
#[derive(Debug, Clone)]
pub struct CombinationSearchResult {
    best: Option<optimization::OptimizationResult>,
    summaries: Vec<CombinationSummary>,
}

impl CombinationSearchResult {
    /// Global best across all combinations; the first one found wins ties.
    pub fn get_best(&self) -> Option<&optimization::OptimizationResult> {
        self.best.as_ref()
    }

    pub fn get_summaries(&self) -> &[CombinationSummary] {
        &self.summaries
    }
}

/// Progress lines of one run; opening truncates the file.
struct ProgressLog {
    file: std::fs::File,
}

impl ProgressLog {
    fn open(path: &std::path::Path) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| anyhow::anyhow!("Failed to open progress log '{}': {}", path.display(), e))?;

        anyhow::Ok(Self { file })
    }

    fn write_line(&mut self, line: &str) {
        let stamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
        if let Err(e) = writeln!(self.file, "{} {}", stamp, line) {
            tracing::warn!(error = %e, "failed to write progress log");
        }
    }
}

/// Exhaustive search over indicator combinations of one combo family.
pub struct CombinationSearch<'e, E: engine::BacktestEngine + ?Sized> {
    engine: &'e E,
    params: optimization::GaParams,
    window_size: usize,
    progress_log: Option<std::path::PathBuf>,
}

impl<'e, E: engine::BacktestEngine + ?Sized> CombinationSearch<'e, E> {
    /// Creates a search using the per-combination GA budget.
    pub fn new(engine: &'e E) -> Self {
        Self {
            engine,
            params: optimization::GaParams::per_combination(),
            window_size: 100,
            progress_log: None,
        }
    }

    pub fn with_params(mut self, params: optimization::GaParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    /// Also writes every progress line to `path`, replacing earlier contents.
    pub fn with_progress_log(mut self, path: std::path::PathBuf) -> Self {
        self.progress_log = Some(path);
        self
    }

    /// Runs the GA once per combination of `base.combo_family`'s indicators.
    /// A combination whose GA cannot score anything is reported and skipped.
    pub fn run<R: Rng>(
        &self,
        base: &settings::StrategyConfig,
        series: &[data_handler::MarketBar],
        rng: &mut R,
    ) -> anyhow::Result<CombinationSearchResult> {
        let family = base.combo_family;
        let combinations = generate_combinations(family.indicators());
        let total = combinations.len();
        let mut log = self.progress_log.as_deref().map(ProgressLog::open).transpose()?;

        tracing::info!(?family, combinations = total, "starting combination search");

        let mut best: Option<optimization::OptimizationResult> = None;
        let mut best_names = String::new();
        let mut summaries = Vec::with_capacity(total);

        for (idx, combination) in combinations.into_iter().enumerate() {
            let names = combination.iter().map(|i| i.name()).join("+");
            let variant = genes::StrategyVariant::fixed(family, combination.clone());

            let outcome = optimization::GeneticAlgorithm::new(self.engine)
                .with_params(self.params.clone())
                .with_variant(variant)
                .with_window_size(self.window_size)
                .run(base, series, rng);

            let line = match outcome {
                Ok(result) => {
                    summaries.push(CombinationSummary {
                        indicators: combination,
                        fitness: Some(result.get_fitness()),
                        max_drawdown: Some(result.get_result().max_drawdown),
                    });

                    if best.as_ref().is_none_or(|b| result.get_fitness() > b.get_fitness()) {
                        best_names = names.clone();
                        best = Some(result.clone());
                    }

                    format!(
                        "[{}/{}] {}: return {:.2}%, drawdown {:.2}% | best so far {} {:.2}%",
                        idx + 1,
                        total,
                        names,
                        result.get_fitness() * 100.0,
                        result.get_result().max_drawdown * 100.0,
                        best_names,
                        best.as_ref().map_or(0.0, |b| b.get_fitness() * 100.0),
                    )
                }
                Err(e) => {
                    tracing::warn!(combination = %names, error = %e, "combination skipped");
                    summaries.push(CombinationSummary {
                        indicators: combination,
                        fitness: None,
                        max_drawdown: None,
                    });
                    format!("[{}/{}] {}: skipped ({})", idx + 1, total, names, e)
                }
            };

            println!("{}", line);
            if let Some(log) = log.as_mut() {
                log.write_line(&line);
            }
        }

        anyhow::Ok(CombinationSearchResult { best, summaries })
    }
}
