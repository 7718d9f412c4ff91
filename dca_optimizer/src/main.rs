// dca_optimizer/src/main.rs

mod cli;
mod reports;
mod backtest;
mod optimizers;

use rand::SeedableRng;

fn main() -> anyhow::Result<()> {
    let start_time = std::time::Instant::now();

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let args = cli::Args::parse()?;
    let mut settings = dca_core::settings::Settings::load(&args.config)?;
    args.apply_overrides(&mut settings);
    dca_core::settings::check_settings(&mut settings)?;

    let cache = dca_core::data_handler::DataCache::new();
    let full_series = cache.get_or_load(&settings.common.data_path)?;
    let series = match settings.common.trailing_days {
        Some(days) => dca_core::data_handler::filter_trailing(
            &full_series,
            dca_core::utils::days_to_duration("trailing_days", days)?,
        ),
        None => full_series.as_slice(),
    };
    tracing::info!(loaded = full_series.len(), used = series.len(), "market data ready");

    let mut rng = match settings.common.seed {
        Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
        None => rand::rngs::StdRng::from_entropy(),
    };

    let optimization_runner = optimizers::OptimizationRunner::new(args.mode, &settings)?;
    optimization_runner.run(series, &mut rng)?;

    println!("The main program is finished in {:.3} seconds", start_time.elapsed().as_secs_f64());
    anyhow::Ok(())
}
