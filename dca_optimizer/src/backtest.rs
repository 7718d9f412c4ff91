// dca_optimizer/src/backtest.rs

//! Reference DCA backtest engine.
//!
//! Single pass over the candles. On every bar the included indicators vote on
//! an entry; a buy needs at least half of them. Further buys inside an open
//! cycle need the price to have dropped `price_threshold` below the last
//! entry, and their size scales with the number of entries up to
//! `max_multiplier`. In cycle mode the whole position is sold once the close
//! reaches the take-profit level; otherwise the inventory is held and marked
//! to market on the last bar.

use dca_core::settings::{Indicator, StrategyConfig};
use dca_core::data_handler::MarketBar;
use dca_core::performance::{CycleRecord, SimulationResult, TradeRecord, TradeSide};

/// Open DCA cycle.
#[derive(Debug, Clone)]
struct OpenCycle {
    start: chrono::DateTime<chrono::Utc>,
    entries: usize,
    quantity: f64,
    /// Gross notional spent on entries.
    notional: f64,
    /// Notional plus entry commissions.
    cost_basis: f64,
    last_entry_price: f64,
}

impl OpenCycle {
    fn average_price(&self) -> f64 {
        if self.quantity > 0.0 { self.notional / self.quantity } else { 0.0 }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DcaBacktestEngine;

impl DcaBacktestEngine {
    pub fn new() -> Self {
        Self
    }

    /// Number of included indicators voting to buy at the last bar of `bars`.
    /// Indicators without enough history abstain.
    fn buy_votes(config: &StrategyConfig, bars: &[MarketBar], closes: &[f64]) -> usize {
        let Some(price) = closes.last().copied() else { return 0 };

        config
            .indicators
            .iter()
            .filter(|indicator| {
                let vote = match indicator {
                    Indicator::Rsi => dca_core::indicators::rsi(closes, config.rsi_period)
                        .map(|rsi| rsi < config.rsi_oversold),
                    Indicator::Macd => dca_core::indicators::macd(closes, config.macd_fast, config.macd_slow, config.macd_signal)
                        .map(|(macd, signal)| macd > signal),
                    Indicator::BollingerBands => dca_core::indicators::bollinger(closes, config.bb_period, config.bb_std)
                        .map(|(lower, _, _)| price <= lower),
                    Indicator::Ema => dca_core::indicators::ema(closes, config.ema_period)
                        .map(|ema| price < ema),
                    Indicator::HullMa => dca_core::indicators::hull_ma(closes, config.hull_period)
                        .map(|hull| price < hull),
                    Indicator::SuperTrend => dca_core::indicators::supertrend(bars, config.supertrend_period, config.supertrend_multiplier),
                    Indicator::Mfi => dca_core::indicators::mfi(bars, config.mfi_period)
                        .map(|mfi| mfi < config.mfi_oversold),
                    Indicator::Keltner => dca_core::indicators::keltner(bars, config.keltner_period, config.keltner_multiplier)
                        .map(|(lower, _, _)| price <= lower),
                };
                vote.unwrap_or(false)
            })
            .count()
    }

    fn check_config(config: &StrategyConfig) -> anyhow::Result<()> {
        anyhow::ensure!(!config.indicators.is_empty(), "No indicators included");
        anyhow::ensure!(config.initial_balance > 0.0, "initial_balance must be positive");
        anyhow::ensure!(
            config.macd_fast < config.macd_slow || !config.includes(Indicator::Macd),
            "MACD fast period {} must be below slow period {}",
            config.macd_fast,
            config.macd_slow
        );
        anyhow::Ok(())
    }
}

impl dca_core::engine::BacktestEngine for DcaBacktestEngine {
    fn run(
        &self,
        config: &StrategyConfig,
        series: &[MarketBar],
        window_size: usize,
    ) -> anyhow::Result<SimulationResult> {
        Self::check_config(config)?;
        if series.is_empty() {
            anyhow::bail!("Cannot backtest an empty series");
        }
        if let Some(bar) = series.iter().find(|bar| bar.close.is_nan() || bar.close <= 0.0) {
            anyhow::bail!("Non-positive close {} at {}", bar.close, bar.datetime);
        }

        let closes: Vec<f64> = series.iter().map(|bar| bar.close).collect();
        let window_size = window_size.max(1);
        let required_votes = config.indicators.len().div_ceil(2);

        let mut cash = config.initial_balance;
        let mut cycle: Option<OpenCycle> = None;
        let mut trades = Vec::new();
        let mut cycles = Vec::new();
        let mut equity_curve = Vec::with_capacity(series.len());

        for (i, bar) in series.iter().enumerate() {
            let price = bar.close;

            let take_profit = config.use_tp
                && cycle.as_ref().is_some_and(|c| price >= c.average_price() * (1.0 + config.tp_percent));

            if take_profit {
                if let Some(open) = cycle.take() {
                    let proceeds = open.quantity * price;
                    let commission = proceeds * config.commission;
                    let pnl = proceeds - commission - open.cost_basis;
                    cash += proceeds - commission;

                    trades.push(TradeRecord {
                        datetime: bar.datetime,
                        side: TradeSide::Sell,
                        price,
                        quantity: open.quantity,
                        commission,
                        pnl,
                    });
                    cycles.push(CycleRecord {
                        start: open.start,
                        end: bar.datetime,
                        entries: open.entries,
                        invested: open.cost_basis,
                        average_price: open.average_price(),
                        exit_price: price,
                        pnl,
                        return_fraction: pnl / open.cost_basis,
                        closed: true,
                    });
                }
            } else {
                let lo = (i + 1).saturating_sub(window_size);
                let votes = Self::buy_votes(config, &series[lo..=i], &closes[lo..=i]);

                let price_allows = cycle
                    .as_ref()
                    .is_none_or(|c| price <= c.last_entry_price * (1.0 - config.price_threshold));

                if votes >= required_votes && price_allows {
                    let entries = cycle.as_ref().map_or(0, |c| c.entries);
                    let amount = config.base_amount * ((1 + entries) as f64).min(config.max_multiplier);
                    let commission = amount * config.commission;

                    if amount >= config.min_order_size && amount + commission <= cash {
                        let quantity = amount / price;
                        cash -= amount + commission;

                        let open = cycle.get_or_insert_with(|| OpenCycle {
                            start: bar.datetime,
                            entries: 0,
                            quantity: 0.0,
                            notional: 0.0,
                            cost_basis: 0.0,
                            last_entry_price: price,
                        });
                        open.entries += 1;
                        open.quantity += quantity;
                        open.notional += amount;
                        open.cost_basis += amount + commission;
                        open.last_entry_price = price;

                        trades.push(TradeRecord {
                            datetime: bar.datetime,
                            side: TradeSide::Buy,
                            price,
                            quantity,
                            commission,
                            pnl: 0.0,
                        });
                    }
                }
            }

            let holdings = cycle.as_ref().map_or(0.0, |c| c.quantity * price);
            equity_curve.push(cash + holdings);
        }

        // mark the open cycle to market
        if let (Some(open), Some(last)) = (cycle, series.last()) {
            let value = open.quantity * last.close;
            let pnl = value - open.cost_basis;
            cycles.push(CycleRecord {
                start: open.start,
                end: last.datetime,
                entries: open.entries,
                invested: open.cost_basis,
                average_price: open.average_price(),
                exit_price: last.close,
                pnl,
                return_fraction: pnl / open.cost_basis,
                closed: false,
            });
        }

        anyhow::Ok(SimulationResult::from_equity_curve(
            config.initial_balance,
            &equity_curve,
            trades,
            cycles,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dca_core::engine::BacktestEngine;

    fn bars(closes: &[f64]) -> Vec<MarketBar> {
        let t0 = chrono::DateTime::<chrono::Utc>::from_timestamp(1_704_067_200, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| MarketBar {
                datetime: t0 + chrono::Duration::hours(i as i64),
                open: close,
                high: close * 1.01,
                low: close * 0.99,
                close,
                volume: 1_000.0,
            })
            .collect()
    }

    /// Single-indicator config: EMA(2) votes to buy whenever the close is
    /// below its EMA, i.e. on every down bar.
    fn ema_config() -> StrategyConfig {
        let mut config = StrategyConfig::default().with_indicators(vec![Indicator::Ema]);
        config.ema_period = 2;
        config.commission = 0.0;
        config.base_amount = 100.0;
        config.max_multiplier = 3.0;
        config.price_threshold = 0.05;
        config.tp_percent = 0.05;
        config
    }

    #[test]
    fn flat_series_never_trades() {
        let engine = DcaBacktestEngine::new();
        let result = engine.run(&ema_config(), &bars(&[100.0; 50]), 20).unwrap();
        assert_eq!(result.total_trades, 0);
        assert_eq!(result.total_return, 0.0);
        assert_eq!(result.max_drawdown, 0.0);
    }

    #[test]
    fn dip_then_recovery_closes_cycle_at_take_profit() {
        let engine = DcaBacktestEngine::new();
        let series = bars(&[100.0, 100.0, 90.0, 80.0, 80.0, 95.0]);
        let result = engine.run(&ema_config(), &series, 10).unwrap();

        // buys at 90 (100 notional) and 80 (200 notional); average ~83.2; exit at 95
        assert_eq!(result.trades.len(), 3);
        assert_eq!(result.trades[0].side, TradeSide::Buy);
        assert_eq!(result.trades[1].side, TradeSide::Buy);
        assert!((result.trades[1].price * result.trades[1].quantity - 200.0).abs() < 1e-9);
        assert_eq!(result.trades[2].side, TradeSide::Sell);

        assert_eq!(result.cycles.len(), 1);
        let cycle = &result.cycles[0];
        assert!(cycle.closed);
        assert_eq!(cycle.entries, 2);
        assert!(cycle.pnl > 0.0);
        assert!(result.total_return > 0.0);
        assert_eq!(result.winning_trades, 1);
    }

    #[test]
    fn without_take_profit_inventory_is_marked_to_market() {
        let engine = DcaBacktestEngine::new();
        let config = ema_config().with_use_tp(false);
        let series = bars(&[100.0, 100.0, 90.0, 80.0, 80.0, 95.0]);
        let result = engine.run(&config, &series, 10).unwrap();

        assert!(result.trades.iter().all(|t| t.side == TradeSide::Buy));
        assert_eq!(result.cycles.len(), 1);
        assert!(!result.cycles[0].closed);
        assert_eq!(result.cycles[0].exit_price, 95.0);
    }

    #[test]
    fn rejects_empty_input_and_empty_inclusion_set() {
        let engine = DcaBacktestEngine::new();
        assert!(engine.run(&ema_config(), &[], 10).is_err());
        let config = ema_config().with_indicators(Vec::new());
        assert!(engine.run(&config, &bars(&[1.0, 2.0]), 10).is_err());
    }
}
