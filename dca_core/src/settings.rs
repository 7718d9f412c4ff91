// dca_core/src/settings.rs

//! Configuration structures for the DCA optimizer.
//! Holds the strategy Configuration record that the optimizer evolves and the
//! run settings loaded from a JSON file and validated before any search starts.

/// Technical indicator that may take part in the entry vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum Indicator {
    #[serde(rename = "rsi")]
    Rsi,
    #[serde(rename = "macd")]
    Macd,
    #[serde(rename = "bb")]
    BollingerBands,
    #[serde(rename = "ema")]
    Ema,
    #[serde(rename = "hull")]
    HullMa,
    #[serde(rename = "supertrend")]
    SuperTrend,
    #[serde(rename = "mfi")]
    Mfi,
    #[serde(rename = "keltner")]
    Keltner,
}

impl Indicator {
    /// Stable short name used in logs, reports and config files.
    pub fn name(&self) -> &'static str {
        match self {
            Indicator::Rsi => "rsi",
            Indicator::Macd => "macd",
            Indicator::BollingerBands => "bb",
            Indicator::Ema => "ema",
            Indicator::HullMa => "hull",
            Indicator::SuperTrend => "supertrend",
            Indicator::Mfi => "mfi",
            Indicator::Keltner => "keltner",
        }
    }
}

impl std::fmt::Display for Indicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed bundle of indicators used together in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum ComboFamily {
    #[default]
    #[serde(rename = "classic")]
    Classic,
    #[serde(rename = "advanced")]
    Advanced,
}

impl ComboFamily {
    /// Canonical inclusion set of the family.
    pub fn indicators(&self) -> &'static [Indicator] {
        match self {
            ComboFamily::Classic => &[
                Indicator::Rsi,
                Indicator::Macd,
                Indicator::BollingerBands,
                Indicator::Ema,
            ],
            ComboFamily::Advanced => &[
                Indicator::HullMa,
                Indicator::SuperTrend,
                Indicator::Mfi,
                Indicator::Keltner,
            ],
        }
    }
}

/// Flat record of strategy parameters scored by the backtest engine.
/// An indicator's parameters only matter while it is in `indicators`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    // Position sizing
    pub initial_balance: f64,
    pub base_amount: f64,
    pub max_multiplier: f64,
    /// Minimum fractional drop below the last entry before another DCA buy.
    pub price_threshold: f64,

    // Cycle / take-profit mode
    pub use_tp: bool,
    pub tp_percent: f64,

    pub combo_family: ComboFamily,
    pub indicators: Vec<Indicator>,

    pub rsi_period: usize,
    pub rsi_oversold: f64,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bb_period: usize,
    pub bb_std: f64,
    pub ema_period: usize,

    pub hull_period: usize,
    pub supertrend_period: usize,
    pub supertrend_multiplier: f64,
    pub mfi_period: usize,
    pub mfi_oversold: f64,
    pub keltner_period: usize,
    pub keltner_multiplier: f64,

    // Risk
    pub commission: f64,
    pub min_order_size: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            base_amount: 100.0,
            max_multiplier: 3.0,
            price_threshold: 0.02,
            use_tp: true,
            tp_percent: 0.03,
            combo_family: ComboFamily::Classic,
            indicators: ComboFamily::Classic.indicators().to_vec(),
            rsi_period: 14,
            rsi_oversold: 30.0,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bb_period: 20,
            bb_std: 2.0,
            ema_period: 50,
            hull_period: 16,
            supertrend_period: 10,
            supertrend_multiplier: 3.0,
            mfi_period: 14,
            mfi_oversold: 20.0,
            keltner_period: 20,
            keltner_multiplier: 2.0,
            commission: 0.001,
            min_order_size: 10.0,
        }
    }
}

impl StrategyConfig {
    /// Switches the config to `family`, resetting the inclusion set to the
    /// family's canonical set.
    pub fn with_combo_family(mut self, family: ComboFamily) -> Self {
        self.combo_family = family;
        self.indicators = family.indicators().to_vec();
        self
    }

    /// Sets the inclusion set directly (used for fixed indicator combinations).
    pub fn with_indicators(mut self, indicators: Vec<Indicator>) -> Self {
        self.indicators = indicators;
        self
    }

    pub fn with_use_tp(mut self, use_tp: bool) -> Self {
        self.use_tp = use_tp;
        if !use_tp {
            self.tp_percent = 0.0;
        }
        self
    }

    pub fn includes(&self, indicator: Indicator) -> bool {
        self.indicators.contains(&indicator)
    }

    /// Human-readable string for logging.
    pub fn format_for_display(&self) -> String {
        let indicators = self.indicators
            .iter()
            .map(|i| i.name())
            .collect::<Vec<_>>()
            .join("+");

        format!(
            "{{indicators: {}, mult: {}, threshold: {}, tp: {}}}",
            indicators,
            self.max_multiplier,
            self.price_threshold,
            if self.use_tp { format!("{}", self.tp_percent) } else { "off".to_string() },
        )
    }
}

/// Settings shared by every mode.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct CommonSettings {
    pub data_path: String,
    pub output_path: String,
    /// Trailing window of bars handed to the engine for indicator warm-up.
    pub window_size: usize,
    /// Keep only the last N days of data when set.
    pub trailing_days: Option<i64>,
    pub seed: Option<u64>,
    pub workers: Option<usize>,
}

/// Walk-forward window settings. Holdout and rolling are mutually exclusive.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct WalkForwardSettings {
    pub holdout_ratio: Option<f64>,
    pub train_days: Option<i64>,
    pub test_days: Option<i64>,
    pub roll_days: Option<i64>,
}

/// Top-level settings structure.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub common: CommonSettings,
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub walk_forward: WalkForwardSettings,
}

impl Settings {
    /// Loads settings from a JSON file and validates them.
    /// # Arguments
    /// * `settings_file_path` - Path to the JSON configuration file.
    /// # Returns
    /// * `anyhow::Result<Settings>` containing the loaded settings.
    pub fn load<P: AsRef<std::path::Path>>(settings_file_path: P) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(settings_file_path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read settings '{}': {}", settings_file_path.as_ref().display(), e))?;
        let mut settings: Settings = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Failed to parse settings JSON: {}", e))?;

        check_settings(&mut settings)
            .map_err(|e| anyhow::anyhow!("Settings validation failed:\n{}", e))?;

        anyhow::Ok(settings)
    }
}

/// Validates settings in place. Worker count is clamped to the CPU count.
pub fn check_settings(settings: &mut Settings) -> anyhow::Result<()> {
    // check workers
    {
        if let Some(workers) = settings.common.workers {
            if workers == 0 {
                anyhow::bail!("Settings validation error: 'workers' cannot be zero.");
            }
            let available = num_cpus::get();
            if workers > available {
                settings.common.workers = Some(available);
            }
        }
    }

    // check common
    {
        if settings.common.window_size == 0 {
            anyhow::bail!("'window_size' must be greater than 0");
        }
        if settings.common.data_path.trim().is_empty() {
            anyhow::bail!("'data_path' cannot be empty!");
        }
        if settings.common.output_path.trim_end_matches('/').is_empty() {
            anyhow::bail!("'output_path' cannot be empty!");
        }
        if let Some(days) = settings.common.trailing_days {
            if days <= 0 {
                anyhow::bail!("'trailing_days' must be positive");
            }
            crate::utils::days_to_duration("trailing_days", days)?;
        }
    }

    check_strategy(&settings.strategy)?;

    // check walk forward
    {
        let wf = &settings.walk_forward;
        if let Some(ratio) = wf.holdout_ratio {
            // written so NaN fails too
            if !(ratio > 0.0 && ratio < 1.0) {
                anyhow::bail!("'holdout_ratio' must be strictly between 0 and 1");
            }
        }
        if wf.holdout_ratio.is_some() && (wf.train_days.is_some() || wf.test_days.is_some()) {
            anyhow::bail!("'holdout_ratio' cannot be combined with 'train_days'/'test_days'");
        }
        for (name, value) in [("train_days", wf.train_days), ("test_days", wf.test_days), ("roll_days", wf.roll_days)] {
            if let Some(days) = value {
                if days <= 0 {
                    anyhow::bail!("'{}' must be positive", name);
                }
                crate::utils::days_to_duration(name, days)?;
            }
        }
    }

    anyhow::Ok(())
}

/// Rejects a base configuration the optimizer cannot start from.
pub fn check_strategy(strategy: &StrategyConfig) -> anyhow::Result<()> {
    if strategy.initial_balance <= 0.0 {
        anyhow::bail!("'initial_balance' must be positive");
    }
    if strategy.base_amount <= 0.0 {
        anyhow::bail!("'base_amount' must be positive");
    }
    if strategy.max_multiplier < 1.0 {
        anyhow::bail!("'max_multiplier' must be at least 1");
    }
    if strategy.price_threshold <= 0.0 || strategy.price_threshold >= 1.0 {
        anyhow::bail!("'price_threshold' must be between 0 and 1");
    }
    if strategy.use_tp && strategy.tp_percent <= 0.0 {
        anyhow::bail!("'tp_percent' must be positive when take-profit is enabled");
    }
    if strategy.commission < 0.0 || strategy.min_order_size < 0.0 {
        anyhow::bail!("'commission' and 'min_order_size' cannot be negative");
    }
    if strategy.indicators.as_slice() != strategy.combo_family.indicators() {
        anyhow::bail!(
            "'indicators' must be the canonical {:?} set: {:?}",
            strategy.combo_family,
            strategy.combo_family.indicators()
        );
    }

    anyhow::Ok(())
}
