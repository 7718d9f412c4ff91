// dca_optimizer/src/cli.rs

/// Run mode selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Single GA search over the family's full indicator set.
    Genetic,
    /// Reduced GA per indicator combination.
    Exhaustive,
    /// Walk-forward validation (holdout or rolling).
    WalkForward,
    /// One backtest of the base configuration.
    Backtest,
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ga" => Ok(Mode::Genetic),
            "exhaustive" => Ok(Mode::Exhaustive),
            "wfv" => Ok(Mode::WalkForward),
            "backtest" => Ok(Mode::Backtest),
            other => anyhow::bail!("Unknown mode '{}'", other),
        }
    }
}

/// Structure representing command-line arguments.
#[derive(Debug)]
pub struct Args {
    pub config: std::path::PathBuf,
    pub mode: Mode,
    pub holdout: Option<f64>,
    pub train_days: Option<i64>,
    pub test_days: Option<i64>,
    pub roll_days: Option<i64>,
    pub seed: Option<u64>,
}

/// Command-line arguments parser using Clap.
///
/// Flags given here override the matching values of the settings file.
impl Args {
    /// Parses command-line arguments using `clap`.
    ///
    /// # Returns
    /// * `Args` - Struct containing parsed arguments.
    ///
    /// # Errors
    /// * If required arguments are missing or invalid.
    pub fn parse() -> anyhow::Result<Self> {
        let matches = clap::Command::new("dca_optimizer")
            .version("0.1.0")
            .about("Genetic parameter search and walk-forward validation for DCA strategies")
            .arg(
                clap::Arg::new("config")
                .short('c')
                .long("config")
                .help("Path to the settings.json configuration file")
                .required(true)
                .num_args(1),
            )
            .arg(
                clap::Arg::new("mode")
                .short('m')
                .long("mode")
                .help("Run mode")
                .value_parser(["ga", "exhaustive", "wfv", "backtest"])
                .default_value("ga")
                .num_args(1),
            )
            .arg(
                clap::Arg::new("holdout")
                .long("holdout")
                .help("Walk-forward holdout: fraction of the series used for training")
                .value_parser(clap::value_parser!(f64))
                .num_args(1),
            )
            .arg(
                clap::Arg::new("train-days")
                .long("train-days")
                .help("Rolling walk-forward train window in days")
                .value_parser(clap::value_parser!(i64))
                .num_args(1),
            )
            .arg(
                clap::Arg::new("test-days")
                .long("test-days")
                .help("Rolling walk-forward test window in days")
                .value_parser(clap::value_parser!(i64))
                .num_args(1),
            )
            .arg(
                clap::Arg::new("roll-days")
                .long("roll-days")
                .help("Rolling walk-forward step in days (defaults to the test window)")
                .value_parser(clap::value_parser!(i64))
                .num_args(1),
            )
            .arg(
                clap::Arg::new("seed")
                .long("seed")
                .help("Seed for the run's random generator")
                .value_parser(clap::value_parser!(u64))
                .num_args(1),
            )
            .get_matches();

        let config = matches
            .get_one::<String>("config")
            .ok_or_else(|| anyhow::anyhow!("Missing --config"))?;
        let mode = matches
            .get_one::<String>("mode")
            .map_or(Ok(Mode::Genetic), |m| m.parse())?;

        anyhow::Ok(Args {
            config: config.into(),
            mode,
            holdout: matches.get_one::<f64>("holdout").copied(),
            train_days: matches.get_one::<i64>("train-days").copied(),
            test_days: matches.get_one::<i64>("test-days").copied(),
            roll_days: matches.get_one::<i64>("roll-days").copied(),
            seed: matches.get_one::<u64>("seed").copied(),
        })
    }

    /// Applies command-line overrides to loaded settings. A holdout ratio and
    /// rolling windows exclude each other; the flag given last in this order wins:
    /// rolling flags clear the holdout, `--holdout` clears rolling windows.
    pub fn apply_overrides(&self, settings: &mut dca_core::settings::Settings) {
        if let Some(seed) = self.seed {
            settings.common.seed = Some(seed);
        }

        let wf = &mut settings.walk_forward;
        if self.train_days.is_some() || self.test_days.is_some() || self.roll_days.is_some() {
            wf.holdout_ratio = None;
            wf.train_days = self.train_days.or(wf.train_days);
            wf.test_days = self.test_days.or(wf.test_days);
            wf.roll_days = self.roll_days.or(wf.roll_days);
        }
        if let Some(ratio) = self.holdout {
            wf.holdout_ratio = Some(ratio);
            wf.train_days = None;
            wf.test_days = None;
            wf.roll_days = None;
        }
    }
}
