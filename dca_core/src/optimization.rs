// dca_core/src/optimization.rs

//! Genetic Algorithm search over the strategy configuration space.
//!
//! The generational loop is single-threaded and owns the only random number
//! generator of the run. Fitness evaluation of one generation is the only
//! parallel phase: unscored individuals are backtested on a bounded Rayon pool
//! and the loop waits for the whole generation before ranking and breeding.

use rand::Rng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::genes;
use crate::engine;
use crate::settings;
use crate::performance;
use crate::data_handler;

/// Evaluation state of an individual.
#[derive(Debug, Clone, Default)]
pub enum Evaluation {
    /// Not scored yet.
    #[default]
    Pending,
    /// Scored by the engine; `fitness` is the fractional total return.
    Scored {
        fitness: f64,
        result: std::sync::Arc<performance::SimulationResult>,
    },
    /// The engine failed on this configuration; ranks as the worst fitness.
    Failed,
}

/// One candidate configuration plus its evaluation.
#[derive(Debug, Clone)]
pub struct Individual {
    config: settings::StrategyConfig,
    evaluation: Evaluation,
}

impl Individual {
    /// Creates an unevaluated individual.
    pub fn new(config: settings::StrategyConfig) -> Self {
        Self {
            config,
            evaluation: Evaluation::Pending,
        }
    }

    pub fn get_config(&self) -> &settings::StrategyConfig {
        &self.config
    }

    pub fn get_evaluation(&self) -> &Evaluation {
        &self.evaluation
    }

    /// Fitness used for ranking. Pending and failed individuals rank last.
    pub fn fitness(&self) -> f64 {
        match &self.evaluation {
            Evaluation::Scored { fitness, .. } => *fitness,
            Evaluation::Pending | Evaluation::Failed => f64::NEG_INFINITY,
        }
    }

    /// `true` once the engine has been asked, whatever the outcome.
    pub fn is_evaluated(&self) -> bool {
        !matches!(self.evaluation, Evaluation::Pending)
    }

    pub fn is_scored(&self) -> bool {
        matches!(self.evaluation, Evaluation::Scored { .. })
    }

    pub fn get_result(&self) -> Option<&std::sync::Arc<performance::SimulationResult>> {
        match &self.evaluation {
            Evaluation::Scored { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Marks the individual for re-scoring after its genome changed.
    pub fn reset(&mut self) {
        self.evaluation = Evaluation::Pending;
    }

    fn set_evaluation(&mut self, evaluation: Evaluation) {
        self.evaluation = evaluation;
    }
}

/// Search budget and operator settings of one GA run.
#[derive(Debug, Clone, PartialEq)]
pub struct GaParams {
    pub population_size: usize,
    pub generations: usize,
    pub elite_count: usize,
    pub tournament_size: usize,
    pub crossover_rate: f64,
    pub mutation_rate: f64,
    /// Maximum concurrent backtests during evaluation.
    pub workers: usize,
    /// Progress is logged every `log_every` generations and on the last one.
    pub log_every: usize,
}

impl GaParams {
    /// Budget for a full GA run.
    pub fn standard() -> Self {
        Self {
            population_size: 50,
            generations: 30,
            elite_count: 2,
            tournament_size: 3,
            crossover_rate: 0.8,
            mutation_rate: 0.2,
            workers: 4,
            log_every: 5,
        }
    }

    /// Reduced budget used once per indicator combination.
    pub fn per_combination() -> Self {
        Self {
            population_size: 20,
            generations: 10,
            ..Self::standard()
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Rejects budgets the driver cannot honour.
    pub fn check(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.population_size >= 2, "GA population_size must be at least 2");
        anyhow::ensure!(self.generations > 0, "GA generations must be greater than 0");
        anyhow::ensure!(
            self.elite_count >= 1 && self.elite_count < self.population_size,
            "GA elite_count must be between 1 and population_size - 1"
        );
        anyhow::ensure!(self.tournament_size > 0, "GA tournament_size must be greater than 0");
        anyhow::ensure!((0.0..=1.0).contains(&self.crossover_rate), "GA crossover_rate must be between 0.0 and 1.0");
        anyhow::ensure!((0.0..=1.0).contains(&self.mutation_rate), "GA mutation_rate must be between 0.0 and 1.0");
        anyhow::ensure!(self.workers > 0, "GA workers must be greater than 0");
        anyhow::Ok(())
    }
}

impl Default for GaParams {
    fn default() -> Self {
        Self::standard()
    }
}

// --- OPERATORS ---

/// Builds the initial population. Every individual starts from `base` and has
/// each applicable registry field resampled independently.
/// If take-profit mode is off the TP field is not sampled and stays at zero.
pub fn initialize_population(
    base: &settings::StrategyConfig,
    variant: &genes::StrategyVariant,
    size: usize,
    rng: &mut impl Rng,
) -> Vec<Individual> {
    (0..size)
        .map(|_| {
            let mut config = base.clone();
            variant.enforce(&mut config);

            let fields: Vec<genes::FieldSpec> = variant.applicable_fields(&config).copied().collect();
            for field in &fields {
                field.sample(&mut config, rng);
            }

            Individual::new(config)
        })
        .collect()
}

/// Best of `k` uniform draws (with replacement). Ties keep the earliest draw.
/// Returns `None` only for an empty population.
pub fn tournament_selection<'a>(
    population: &'a [Individual],
    k: usize,
    rng: &mut impl Rng,
) -> Option<&'a Individual> {
    let mut winner = population.choose(rng)?;
    for _ in 1..k {
        let contender = &population[rng.gen_range(0..population.len())];
        if contender.fitness() > winner.fitness() {
            winner = contender;
        }
    }
    Some(winner)
}

/// Uniform crossover. The child is a clone of `parent_a`; with probability
/// `rate` every applicable field is taken from either parent on a fair coin.
pub fn crossover(
    parent_a: &Individual,
    parent_b: &Individual,
    rate: f64,
    variant: &genes::StrategyVariant,
    rng: &mut impl Rng,
) -> Individual {
    let mut child = parent_a.clone();
    if rng.gen_range(0.0..1.0) >= rate {
        return child;
    }

    for field in variant.applicable_fields(&parent_a.config) {
        if rng.gen_bool(0.5) {
            field.copy(&mut child.config, &parent_b.config);
        }
    }

    variant.enforce(&mut child.config);
    child.reset();
    child
}

/// With probability `rate`, resamples exactly one applicable field, then
/// re-asserts the variant's inclusion set and clears the evaluation.
pub fn mutate(
    individual: &mut Individual,
    rate: f64,
    variant: &genes::StrategyVariant,
    rng: &mut impl Rng,
) {
    if rng.gen_range(0.0..1.0) >= rate {
        return;
    }

    let fields: Vec<genes::FieldSpec> = variant.applicable_fields(&individual.config).copied().collect();
    if let Some(field) = fields.choose(rng) {
        field.sample(&mut individual.config, rng);
    }

    variant.enforce(&mut individual.config);
    individual.reset();
}

/// Sorts by descending fitness. The sort is stable, so equal fitness keeps
/// the previous order (elites stay ahead of equally-scored children).
pub fn rank_population(population: &mut [Individual]) {
    population.sort_by(|a, b| b.fitness().total_cmp(&a.fitness()));
}

// --- FITNESS EVALUATION ---

/// Counts of one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    pub evaluated: usize,
    pub failed: usize,
}

/// Scores unevaluated individuals on a bounded worker pool.
pub struct FitnessEvaluator<'e, E: engine::BacktestEngine + ?Sized> {
    engine: &'e E,
    pool: rayon::ThreadPool,
    window_size: usize,
}

impl<'e, E: engine::BacktestEngine + ?Sized> FitnessEvaluator<'e, E> {
    /// Creates an evaluator with at most `workers` concurrent backtests.
    pub fn new(engine: &'e E, workers: usize, window_size: usize) -> anyhow::Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("fitness-{}", i))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create evaluation thread pool: {}", e))?;

        anyhow::Ok(Self {
            engine,
            pool,
            window_size,
        })
    }

    /// Backtests every pending individual against `series` and returns once
    /// all of them are scored. Already-evaluated individuals are skipped.
    /// An engine error or a non-finite return marks the individual `Failed`.
    pub fn evaluate(
        &self,
        population: &mut [Individual],
        series: &[data_handler::MarketBar],
    ) -> EvaluationSummary {
        let engine = self.engine;
        let window_size = self.window_size;

        self.pool.install(|| {
            population
                .par_iter_mut()
                .filter(|individual| !individual.is_evaluated())
                .map(|individual| {
                    let evaluation = match engine.run(&individual.config, series, window_size) {
                        Ok(result) if result.total_return.is_finite() => Evaluation::Scored {
                            fitness: result.total_return,
                            result: std::sync::Arc::new(result),
                        },
                        Ok(result) => {
                            tracing::warn!(
                                config = %individual.config.format_for_display(),
                                total_return = result.total_return,
                                "non-finite fitness, scoring as worst"
                            );
                            Evaluation::Failed
                        }
                        Err(e) => {
                            tracing::warn!(
                                config = %individual.config.format_for_display(),
                                error = %e,
                                "backtest failed, scoring as worst"
                            );
                            Evaluation::Failed
                        }
                    };

                    let failed = matches!(evaluation, Evaluation::Failed);
                    individual.set_evaluation(evaluation);
                    EvaluationSummary { evaluated: 1, failed: failed as usize }
                })
                .reduce(EvaluationSummary::default, |a, b| EvaluationSummary {
                    evaluated: a.evaluated + b.evaluated,
                    failed: a.failed + b.failed,
                })
        })
    }
}

// --- GENETIC ALGORITHM DRIVER ---

/// Statistics for a single generation, taken after ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationStats {
    pub generation: usize,
    pub best_fitness: f64,
    pub mean_fitness: f64,
    pub worst_fitness: f64,
    /// Backtests run in this generation (carried-over elites excluded).
    pub evaluated: usize,
    pub failed: usize,
}

/// Best configuration of a run together with its simulation result.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    config: settings::StrategyConfig,
    fitness: f64,
    result: std::sync::Arc<performance::SimulationResult>,
    stats: Vec<GenerationStats>,
}

impl OptimizationResult {
    pub fn get_config(&self) -> &settings::StrategyConfig {
        &self.config
    }

    pub fn get_fitness(&self) -> f64 {
        self.fitness
    }

    pub fn get_result(&self) -> &performance::SimulationResult {
        &self.result
    }

    pub fn get_stats(&self) -> &[GenerationStats] {
        &self.stats
    }
}

/// The generational loop: Evaluate → Rank → UpdateBest → Breed, repeated for
/// a fixed number of generations. There is no early stopping.
pub struct GeneticAlgorithm<'e, E: engine::BacktestEngine + ?Sized> {
    engine: &'e E,
    params: GaParams,
    variant: genes::StrategyVariant,
    window_size: usize,
}

impl<'e, E: engine::BacktestEngine + ?Sized> GeneticAlgorithm<'e, E> {
    /// Creates a driver with the standard budget and the classic variant.
    pub fn new(engine: &'e E) -> Self {
        Self {
            engine,
            params: GaParams::standard(),
            variant: genes::StrategyVariant::canonical(settings::ComboFamily::Classic),
            window_size: 100,
        }
    }

    pub fn with_params(mut self, params: GaParams) -> Self {
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

    pub fn get_params(&self) -> &GaParams {
        &self.params
    }

    pub fn get_variant(&self) -> &genes::StrategyVariant {
        &self.variant
    }

    /// Runs the search on `series` starting from `base`.
    /// # Arguments
    /// * `base` - Configuration every individual is derived from.
    /// * `series` - Candles scored by every individual; never mutated.
    /// * `rng` - The run's only source of randomness.
    /// # Returns
    /// * The best configuration observed, or an error if nothing could be scored.
    pub fn run<R: Rng>(
        &self,
        base: &settings::StrategyConfig,
        series: &[data_handler::MarketBar],
        rng: &mut R,
    ) -> anyhow::Result<OptimizationResult> {
        self.params.check()?;

        let evaluator = FitnessEvaluator::new(self.engine, self.params.workers, self.window_size)?;
        let generations = self.params.generations;
        let mut population = initialize_population(base, &self.variant, self.params.population_size, rng);
        let mut best: Option<Individual> = None;
        let mut stats = Vec::with_capacity(generations);

        for generation in 0..generations {
            let summary = evaluator.evaluate(&mut population, series);
            rank_population(&mut population);

            let stat = calculate_generation_stats(&population, generation, summary);

            if population[0].is_scored()
                && best.as_ref().is_none_or(|b| population[0].fitness() > b.fitness())
            {
                best = Some(population[0].clone());
            }

            if (generation + 1) % self.params.log_every.max(1) == 0 || generation + 1 == generations {
                tracing::info!(
                    "Generation {}: Best Fitness= {:.4}, Mean Fitness= {:.4}, Worst Fitness= {:.4} ({} evaluated, {} failed)",
                    generation, stat.best_fitness, stat.mean_fitness, stat.worst_fitness, stat.evaluated, stat.failed
                );
            }
            stats.push(stat);

            if generation + 1 < generations {
                population = self.breed(&population, rng);
            }
        }

        let best = best.ok_or_else(|| anyhow::anyhow!(
            "No configuration could be evaluated on {} bars",
            series.len()
        ))?;

        let Evaluation::Scored { fitness, result } = best.evaluation else {
            anyhow::bail!("Best individual lost its evaluation");
        };

        anyhow::Ok(OptimizationResult {
            config: best.config,
            fitness,
            result,
            stats,
        })
    }

    /// Elites are cloned verbatim (keeping their scores); the rest come from
    /// tournament selection, crossover and mutation.
    fn breed<R: Rng>(&self, ranked: &[Individual], rng: &mut R) -> Vec<Individual> {
        let size = self.params.population_size;
        let elite_count = self.params.elite_count.min(ranked.len());
        let mut next = Vec::with_capacity(size);
        next.extend_from_slice(&ranked[..elite_count]);

        while next.len() < size {
            let (Some(parent_a), Some(parent_b)) = (
                tournament_selection(ranked, self.params.tournament_size, rng),
                tournament_selection(ranked, self.params.tournament_size, rng),
            ) else {
                break;
            };

            let mut child = crossover(parent_a, parent_b, self.params.crossover_rate, &self.variant, rng);
            mutate(&mut child, self.params.mutation_rate, &self.variant, rng);
            next.push(child);
        }

        next
    }
}

/// Best/mean/worst over the scored individuals of a ranked population.
fn calculate_generation_stats(
    ranked: &[Individual],
    generation: usize,
    summary: EvaluationSummary,
) -> GenerationStats {
    let scored: Vec<f64> = ranked
        .iter()
        .filter(|individual| individual.is_scored())
        .map(|individual| individual.fitness())
        .collect();

    let (mean, best, worst) = crate::utils::calculate_stats(&scored);

    GenerationStats {
        generation,
        best_fitness: best,
        mean_fitness: mean,
        worst_fitness: worst,
        evaluated: summary.evaluated,
        failed: summary.failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn scored(config: settings::StrategyConfig, fitness: f64) -> Individual {
        let mut individual = Individual::new(config);
        individual.set_evaluation(Evaluation::Scored {
            fitness,
            result: std::sync::Arc::new(performance::SimulationResult {
                total_return: fitness,
                ..Default::default()
            }),
        });
        individual
    }

    fn classic() -> genes::StrategyVariant {
        genes::StrategyVariant::canonical(settings::ComboFamily::Classic)
    }

    #[test]
    fn pending_and_failed_rank_below_any_score() {
        let mut population = vec![
            Individual::new(settings::StrategyConfig::default()),
            scored(settings::StrategyConfig::default(), -0.9),
            scored(settings::StrategyConfig::default(), 0.0),
        ];
        population[0].set_evaluation(Evaluation::Failed);

        rank_population(&mut population);
        assert_eq!(population[0].fitness(), 0.0);
        assert_eq!(population[1].fitness(), -0.9);
        assert!(!population[2].is_scored());
        assert!(population[2].is_evaluated());
    }

    #[test]
    fn zero_return_is_not_unevaluated() {
        let individual = scored(settings::StrategyConfig::default(), 0.0);
        assert!(individual.is_evaluated());
        assert!(individual.is_scored());
    }

    #[test]
    fn initialization_disables_take_profit_when_cycle_mode_is_off() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let base = settings::StrategyConfig::default().with_use_tp(false);
        let population = initialize_population(&base, &classic(), 40, &mut rng);

        assert_eq!(population.len(), 40);
        for individual in &population {
            assert_eq!(individual.get_config().tp_percent, 0.0);
            assert!(!individual.is_evaluated());
            assert!(genes::MULTIPLIERS.contains(&individual.get_config().max_multiplier));
        }
        // something actually varied
        assert!(population.iter().any(|i| i.get_config() != population[0].get_config()));
    }

    #[test]
    fn tournament_picks_best_of_draws() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);
        let population: Vec<Individual> = (0..5)
            .map(|i| scored(settings::StrategyConfig::default(), i as f64))
            .collect();

        // 200 draws over 5 individuals: the best one is drawn almost surely
        for _ in 0..20 {
            let winner = tournament_selection(&population, 200, &mut rng).unwrap();
            assert_eq!(winner.fitness(), 4.0);
        }
        assert!(tournament_selection(&[], 3, &mut rng).is_none());
    }

    #[test]
    fn crossover_with_zero_rate_clones_first_parent() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(9);
        let variant = classic();
        let a = scored(settings::StrategyConfig::default(), 0.3);
        let mut b_config = settings::StrategyConfig::default();
        b_config.rsi_period = 7;
        b_config.max_multiplier = 5.0;
        let b = scored(b_config, 0.1);

        for _ in 0..100 {
            let child = crossover(&a, &b, 0.0, &variant, &mut rng);
            assert_eq!(child.get_config(), a.get_config());
            assert_eq!(child.fitness(), 0.3);
        }
    }

    #[test]
    fn crossover_mixes_parents_and_resets_score() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let variant = classic();
        let a = scored(settings::StrategyConfig::default(), 0.3);
        let mut b_config = settings::StrategyConfig::default();
        b_config.rsi_period = 7;
        b_config.bb_period = 26;
        b_config.ema_period = 9;
        b_config.max_multiplier = 5.0;
        b_config.indicators = vec![settings::Indicator::Keltner];
        let b = scored(b_config, 0.1);

        let mut saw_b_gene = false;
        for _ in 0..50 {
            let child = crossover(&a, &b, 1.0, &variant, &mut rng);
            assert!(!child.is_evaluated());
            assert_eq!(child.get_config().indicators, settings::ComboFamily::Classic.indicators());
            saw_b_gene |= child.get_config().rsi_period == 7 || child.get_config().max_multiplier == 5.0;
        }
        assert!(saw_b_gene);
    }

    #[test]
    fn mutation_with_zero_rate_is_a_no_op() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(4);
        let original = scored(settings::StrategyConfig::default(), 0.25);
        let mut individual = original.clone();

        for _ in 0..100 {
            mutate(&mut individual, 0.0, &classic(), &mut rng);
        }
        assert_eq!(individual.get_config(), original.get_config());
        assert_eq!(individual.fitness(), 0.25);
    }

    #[test]
    fn mutation_changes_at_most_one_field_and_keeps_invariants() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(8);
        let variant = classic();
        let base = settings::StrategyConfig::default().with_use_tp(false);

        for _ in 0..200 {
            let mut individual = scored(base.clone(), 0.1);
            individual.config.indicators.clear();
            mutate(&mut individual, 1.0, &variant, &mut rng);

            let config = individual.get_config();
            assert!(!individual.is_evaluated());
            assert_eq!(config.tp_percent, 0.0);
            assert_eq!(config.indicators, settings::ComboFamily::Classic.indicators());

            let changed = variant
                .get_fields()
                .iter()
                .filter(|f| (f.get)(config) != (f.get)(&base))
                .count();
            assert!(changed <= 1);
        }
    }

    #[test]
    fn ga_params_validation() {
        assert!(GaParams::standard().check().is_ok());
        assert!(GaParams::per_combination().check().is_ok());
        assert!(GaParams { elite_count: 0, ..GaParams::standard() }.check().is_err());
        assert!(GaParams { population_size: 1, ..GaParams::standard() }.check().is_err());
        assert!(GaParams { mutation_rate: 1.5, ..GaParams::standard() }.check().is_err());
    }
}
