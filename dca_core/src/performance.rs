// dca_core/src/performance.rs

//! Backtest output model and the metric calculations shared by engines.
//! Uses SIMD for the per-bar return series.

/// Side of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TradeSide {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

/// One executed fill.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TradeRecord {
    pub datetime: chrono::DateTime<chrono::Utc>,
    pub side: TradeSide,
    pub price: f64,
    pub quantity: f64,
    pub commission: f64,
    /// Realized profit of the fill; zero for buys.
    pub pnl: f64,
}

/// One DCA cycle: a sequence of entries closed by a single exit.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CycleRecord {
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
    pub entries: usize,
    pub invested: f64,
    pub average_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    /// `pnl / invested`.
    pub return_fraction: f64,
    /// `false` when the cycle was still open at the end of data and marked to market.
    pub closed: bool,
}

/// Aggregate and detailed outcome of one backtest run.
/// Only `total_return` feeds the optimizer; the rest is reporting detail.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SimulationResult {
    /// Fractional total return (0.10 = +10%).
    pub total_return: f64,
    /// Maximum peak-to-trough equity decline as a positive fraction.
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub profit_factor: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub final_equity: f64,
    pub trades: Vec<TradeRecord>,
    pub cycles: Vec<CycleRecord>,
}

impl SimulationResult {
    /// Builds the aggregate metrics from an equity curve and the detail records.
    /// Winning/losing counts and profit factor are taken from the cycles.
    pub fn from_equity_curve(
        initial_balance: f64,
        equity_curve: &[f64],
        trades: Vec<TradeRecord>,
        cycles: Vec<CycleRecord>,
    ) -> Self {
        let final_equity = equity_curve.last().copied().unwrap_or(initial_balance);
        let total_return = if initial_balance > 0.0 { final_equity / initial_balance - 1.0 } else { 0.0 };

        let winning_trades = cycles.iter().filter(|c| c.pnl > 0.0).count();
        let losing_trades = cycles.iter().filter(|c| c.pnl < 0.0).count();

        Self {
            total_return,
            max_drawdown: max_drawdown(equity_curve),
            sharpe_ratio: sharpe_ratio(&bar_returns(equity_curve)),
            profit_factor: profit_factor(&cycles),
            total_trades: trades.len(),
            winning_trades,
            losing_trades,
            final_equity,
            trades,
            cycles,
        }
    }

    /// Converts the aggregate metrics into key-value pairs for display.
    pub fn to_stats_list(&self) -> Vec<(String, String)> {
        vec![
            ("Total_Return_%".to_string(), format!("{:.2}", self.total_return * 100.0)),
            ("Max_Drawdown_%".to_string(), format!("{:.2}", self.max_drawdown * 100.0)),
            ("Sharpe_Ratio".to_string(), format!("{:.3}", self.sharpe_ratio)),
            ("Profit_Factor".to_string(), format!("{:.3}", self.profit_factor)),
            ("Total_Trades".to_string(), self.total_trades.to_string()),
            ("Winning_Cycles".to_string(), self.winning_trades.to_string()),
            ("Losing_Cycles".to_string(), self.losing_trades.to_string()),
            ("Final_Equity".to_string(), format!("{:.2}", self.final_equity)),
        ]
    }
}

/// Per-bar simple returns of an equity curve; element `i` is the return from
/// bar `i` to bar `i + 1`.
pub fn bar_returns(equity: &[f64]) -> Vec<f64> {
    if equity.len() < 2 { return Vec::new(); }

    let prev = &equity[..equity.len() - 1];
    let curr = &equity[1..];
    let mut returns = Vec::with_capacity(prev.len());

    let mut prev_chunks = prev.chunks_exact(4);
    let mut curr_chunks = curr.chunks_exact(4);
    for (p, c) in (&mut prev_chunks).zip(&mut curr_chunks) {
        let p = wide::f64x4::from([p[0], p[1], p[2], p[3]]);
        let c = wide::f64x4::from([c[0], c[1], c[2], c[3]]);
        let r: [f64; 4] = ((c / p) - wide::f64x4::splat(1.0)).into();
        returns.extend(r.iter().map(|v| if v.is_finite() { *v } else { 0.0 }));
    }

    for (p, c) in prev_chunks.remainder().iter().zip(curr_chunks.remainder()) {
        returns.push(if *p != 0.0 { c / p - 1.0 } else { 0.0 });
    }

    returns
}

/// Maximum drawdown of an equity curve as a positive fraction.
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;

    for &value in equity {
        peak = peak.max(value);
        if peak > 0.0 {
            worst = worst.max(1.0 - value / peak);
        }
    }

    worst
}

/// Sharpe ratio of per-bar returns, annualised with √365 (crypto markets trade daily).
pub fn sharpe_ratio(returns: &[f64]) -> f64 {
    let std = crate::utils::sample_std(returns);
    if std <= 1e-12 {
        return 0.0;
    }
    crate::utils::mean(returns) / std * 365.0_f64.sqrt()
}

/// Gross profit over gross loss of closed cycles. Infinite loss-free runs are
/// reported as the gross profit itself so the value stays finite.
pub fn profit_factor(cycles: &[CycleRecord]) -> f64 {
    let gross_profit: f64 = cycles.iter().filter(|c| c.pnl > 0.0).map(|c| c.pnl).sum();
    let gross_loss: f64 = cycles.iter().filter(|c| c.pnl < 0.0).map(|c| -c.pnl).sum();

    if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else {
        gross_profit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(pnl: f64) -> CycleRecord {
        let now = chrono::DateTime::<chrono::Utc>::from_timestamp(0, 0).unwrap();
        CycleRecord {
            start: now,
            end: now,
            entries: 1,
            invested: 100.0,
            average_price: 1.0,
            exit_price: 1.0,
            pnl,
            return_fraction: pnl / 100.0,
            closed: true,
        }
    }

    #[test]
    fn returns_match_scalar_computation() {
        let equity = [100.0, 110.0, 99.0, 99.0, 120.0, 60.0, 66.0];
        let returns = bar_returns(&equity);
        assert_eq!(returns.len(), 6);
        for (i, r) in returns.iter().enumerate() {
            let expected = equity[i + 1] / equity[i] - 1.0;
            assert!((r - expected).abs() < 1e-12);
        }
    }

    #[test]
    fn drawdown_is_positive_fraction() {
        assert_eq!(max_drawdown(&[100.0, 120.0, 90.0, 130.0]), 0.25);
        assert_eq!(max_drawdown(&[100.0, 101.0, 102.0]), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);
    }

    #[test]
    fn profit_factor_from_cycles() {
        assert_eq!(profit_factor(&[cycle(30.0), cycle(-10.0), cycle(10.0)]), 4.0);
        assert_eq!(profit_factor(&[cycle(5.0)]), 5.0);
        assert_eq!(profit_factor(&[]), 0.0);
    }

    #[test]
    fn result_from_equity_curve() {
        let result = SimulationResult::from_equity_curve(
            1000.0,
            &[1000.0, 1100.0, 1050.0, 1200.0],
            Vec::new(),
            vec![cycle(150.0), cycle(-50.0)],
        );
        assert!((result.total_return - 0.2).abs() < 1e-12);
        assert!((result.max_drawdown - (1.0 - 1050.0 / 1100.0)).abs() < 1e-12);
        assert_eq!(result.winning_trades, 1);
        assert_eq!(result.losing_trades, 1);
        assert_eq!(result.final_equity, 1200.0);
    }
}
