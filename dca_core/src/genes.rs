// dca_core/src/genes.rs

//! Declarative field registry for the genetic operators.
//!
//! Every mutable Configuration field is described once by a [`FieldSpec`]:
//! its candidate values, when it applies, and how to read and write it.
//! A [`StrategyVariant`] selects the registry for one run (combo family plus
//! the indicator set held fixed), so initialization, crossover and mutation
//! share a single implementation instead of branching on the family.

use rand::seq::SliceRandom;

use crate::settings::{ComboFamily, Indicator, StrategyConfig};

pub const MULTIPLIERS: &[f64] = &[1.5, 2.0, 2.5, 3.0, 4.0, 5.0];
pub const TP_PERCENTS: &[f64] = &[0.01, 0.015, 0.02, 0.03, 0.04, 0.05];
pub const PRICE_THRESHOLDS: &[f64] = &[0.005, 0.01, 0.015, 0.02, 0.03, 0.05];

pub const RSI_PERIODS: &[f64] = &[7.0, 9.0, 14.0, 21.0];
pub const RSI_OVERSOLD: &[f64] = &[20.0, 25.0, 30.0, 35.0, 40.0];
pub const MACD_FAST: &[f64] = &[8.0, 12.0, 16.0];
pub const MACD_SLOW: &[f64] = &[21.0, 26.0, 34.0];
pub const MACD_SIGNAL: &[f64] = &[5.0, 9.0, 12.0];
pub const BB_PERIODS: &[f64] = &[14.0, 20.0, 26.0];
pub const BB_STD: &[f64] = &[1.5, 2.0, 2.5];
pub const EMA_PERIODS: &[f64] = &[9.0, 21.0, 50.0, 100.0];

pub const HULL_PERIODS: &[f64] = &[9.0, 16.0, 25.0, 36.0];
pub const SUPERTREND_PERIODS: &[f64] = &[7.0, 10.0, 14.0];
pub const SUPERTREND_MULTIPLIERS: &[f64] = &[2.0, 3.0, 4.0];
pub const MFI_PERIODS: &[f64] = &[10.0, 14.0, 20.0];
pub const MFI_OVERSOLD: &[f64] = &[15.0, 20.0, 25.0, 30.0];
pub const KELTNER_PERIODS: &[f64] = &[14.0, 20.0, 30.0];
pub const KELTNER_MULTIPLIERS: &[f64] = &[1.5, 2.0, 2.5];

/// One entry of the field registry.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub candidates: &'static [f64],
    /// Whether the field takes part in the search for this configuration.
    pub applies: fn(&StrategyConfig) -> bool,
    pub get: fn(&StrategyConfig) -> f64,
    pub set: fn(&mut StrategyConfig, f64),
}

impl FieldSpec {
    /// Resamples the field uniformly from its candidate set.
    pub fn sample(&self, config: &mut StrategyConfig, rng: &mut impl rand::Rng) {
        if let Some(&value) = self.candidates.choose(rng) {
            (self.set)(config, value);
        }
    }

    /// Copies the field's value from `source` into `target`.
    pub fn copy(&self, target: &mut StrategyConfig, source: &StrategyConfig) {
        (self.set)(target, (self.get)(source));
    }
}

fn always(_: &StrategyConfig) -> bool {
    true
}

fn take_profit_enabled(config: &StrategyConfig) -> bool {
    config.use_tp
}

macro_rules! float_field {
    ($name:literal, $field:ident, $candidates:expr) => {
        FieldSpec {
            name: $name,
            candidates: $candidates,
            applies: always,
            get: |c| c.$field,
            set: |c, v| c.$field = v,
        }
    };
}

macro_rules! period_field {
    ($name:literal, $field:ident, $candidates:expr) => {
        FieldSpec {
            name: $name,
            candidates: $candidates,
            applies: always,
            get: |c| c.$field as f64,
            set: |c, v| c.$field = v.round() as usize,
        }
    };
}

/// Fields shared by every variant.
fn common_fields() -> Vec<FieldSpec> {
    vec![
        float_field!("max_multiplier", max_multiplier, MULTIPLIERS),
        float_field!("price_threshold", price_threshold, PRICE_THRESHOLDS),
        FieldSpec {
            applies: take_profit_enabled,
            ..float_field!("tp_percent", tp_percent, TP_PERCENTS)
        },
    ]
}

/// Parameter fields owned by one indicator.
pub fn indicator_fields(indicator: Indicator) -> Vec<FieldSpec> {
    match indicator {
        Indicator::Rsi => vec![
            period_field!("rsi_period", rsi_period, RSI_PERIODS),
            float_field!("rsi_oversold", rsi_oversold, RSI_OVERSOLD),
        ],
        Indicator::Macd => vec![
            period_field!("macd_fast", macd_fast, MACD_FAST),
            period_field!("macd_slow", macd_slow, MACD_SLOW),
            period_field!("macd_signal", macd_signal, MACD_SIGNAL),
        ],
        Indicator::BollingerBands => vec![
            period_field!("bb_period", bb_period, BB_PERIODS),
            float_field!("bb_std", bb_std, BB_STD),
        ],
        Indicator::Ema => vec![
            period_field!("ema_period", ema_period, EMA_PERIODS),
        ],
        Indicator::HullMa => vec![
            period_field!("hull_period", hull_period, HULL_PERIODS),
        ],
        Indicator::SuperTrend => vec![
            period_field!("supertrend_period", supertrend_period, SUPERTREND_PERIODS),
            float_field!("supertrend_multiplier", supertrend_multiplier, SUPERTREND_MULTIPLIERS),
        ],
        Indicator::Mfi => vec![
            period_field!("mfi_period", mfi_period, MFI_PERIODS),
            float_field!("mfi_oversold", mfi_oversold, MFI_OVERSOLD),
        ],
        Indicator::Keltner => vec![
            period_field!("keltner_period", keltner_period, KELTNER_PERIODS),
            float_field!("keltner_multiplier", keltner_multiplier, KELTNER_MULTIPLIERS),
        ],
    }
}

/// Strategy-variant tag selected once per run: the combo family, the
/// indicator set held fixed for the run and the matching field registry.
#[derive(Debug, Clone)]
pub struct StrategyVariant {
    family: ComboFamily,
    indicators: Vec<Indicator>,
    fields: Vec<FieldSpec>,
}

impl StrategyVariant {
    /// Variant using the family's full canonical indicator set.
    pub fn canonical(family: ComboFamily) -> Self {
        Self::fixed(family, family.indicators().to_vec())
    }

    /// Variant with an explicit indicator subset. Membership never changes
    /// during the run; only numeric parameters are searched.
    pub fn fixed(family: ComboFamily, indicators: Vec<Indicator>) -> Self {
        let mut fields = common_fields();
        for indicator in &indicators {
            fields.extend(indicator_fields(*indicator));
        }

        Self {
            family,
            indicators,
            fields,
        }
    }

    pub fn get_family(&self) -> ComboFamily {
        self.family
    }

    pub fn get_indicators(&self) -> &[Indicator] {
        &self.indicators
    }

    /// Every field in the registry, applicable or not.
    pub fn get_fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Fields that take part in the search for `config`.
    pub fn applicable_fields<'a>(&'a self, config: &'a StrategyConfig) -> impl Iterator<Item = &'a FieldSpec> + 'a {
        self.fields.iter().filter(move |field| (field.applies)(config))
    }

    /// Re-asserts the variant's invariants on `config`: family, inclusion set,
    /// and a zero take-profit when cycle mode is off.
    pub fn enforce(&self, config: &mut StrategyConfig) {
        config.combo_family = self.family;
        if config.indicators != self.indicators {
            config.indicators = self.indicators.clone();
        }
        if !config.use_tp {
            config.tp_percent = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn registry_follows_family() {
        let classic = StrategyVariant::canonical(ComboFamily::Classic);
        let names: Vec<&str> = classic.get_fields().iter().map(|f| f.name).collect();
        assert!(names.contains(&"rsi_period"));
        assert!(names.contains(&"macd_signal"));
        assert!(!names.contains(&"hull_period"));

        let advanced = StrategyVariant::canonical(ComboFamily::Advanced);
        let names: Vec<&str> = advanced.get_fields().iter().map(|f| f.name).collect();
        assert!(names.contains(&"keltner_multiplier"));
        assert!(!names.contains(&"bb_std"));
    }

    #[test]
    fn take_profit_field_only_applies_in_cycle_mode() {
        let variant = StrategyVariant::canonical(ComboFamily::Classic);
        let with_tp = StrategyConfig::default();
        let without_tp = StrategyConfig::default().with_use_tp(false);

        assert!(variant.applicable_fields(&with_tp).any(|f| f.name == "tp_percent"));
        assert!(!variant.applicable_fields(&without_tp).any(|f| f.name == "tp_percent"));
    }

    #[test]
    fn fixed_variant_only_registers_its_indicators() {
        let variant = StrategyVariant::fixed(ComboFamily::Classic, vec![Indicator::Rsi, Indicator::Ema]);
        let names: Vec<&str> = variant.get_fields().iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            vec!["max_multiplier", "price_threshold", "tp_percent", "rsi_period", "rsi_oversold", "ema_period"]
        );
    }

    #[test]
    fn sampling_stays_inside_candidate_set() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let variant = StrategyVariant::canonical(ComboFamily::Advanced);
        let mut config = StrategyConfig::default().with_combo_family(ComboFamily::Advanced);

        for _ in 0..50 {
            for field in variant.get_fields() {
                field.sample(&mut config, &mut rng);
                assert!(field.candidates.contains(&(field.get)(&config)), "{}", field.name);
            }
        }
    }

    #[test]
    fn enforce_restores_inclusion_set() {
        let variant = StrategyVariant::canonical(ComboFamily::Classic);
        let mut config = StrategyConfig::default().with_use_tp(false);
        config.indicators = vec![Indicator::Mfi];
        config.tp_percent = 0.05;

        variant.enforce(&mut config);
        assert_eq!(config.indicators, ComboFamily::Classic.indicators());
        assert_eq!(config.tp_percent, 0.0);
    }
}
