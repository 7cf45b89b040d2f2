//! Objective functions over run results.
//!
//! Every objective is total: a missing, empty, or failed result scores
//! 0.0 instead of failing, so a bad combination never takes the sweep
//! down with it.

use serde::{Deserialize, Serialize};

use eb_engine::RunResult;
use eb_types::ConfigError;

/// A single scored metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    SharpeRatio,
    TotalReturn,
    /// Negated so that larger is always better.
    MaxDrawdown,
    ProfitFactor,
    WinRate,
}

impl Metric {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "sharpe_ratio" => Ok(Metric::SharpeRatio),
            "total_return" => Ok(Metric::TotalReturn),
            "max_drawdown" => Ok(Metric::MaxDrawdown),
            "profit_factor" => Ok(Metric::ProfitFactor),
            "win_rate" => Ok(Metric::WinRate),
            other => Err(ConfigError::UnknownComponent {
                category: "objective".into(),
                name: other.into(),
            }),
        }
    }

    /// Metric value of one run; 0.0 when the result is absent.
    pub fn value(&self, result: Option<&RunResult>) -> f64 {
        let Some(result) = result else {
            return 0.0;
        };
        let stats = &result.stats;
        let value = match self {
            Metric::SharpeRatio => stats.sharpe,
            Metric::TotalReturn => stats.total_return,
            Metric::MaxDrawdown => -stats.max_drawdown,
            Metric::ProfitFactor => stats.profit_factor,
            Metric::WinRate => stats.win_rate,
        };
        if value.is_finite() {
            value
        } else {
            0.0
        }
    }
}

/// Scoring rule applied to each (train, test) result pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Objective {
    Single(Metric),
    /// Weighted sum of metrics on the same result.
    Combined(Vec<(Metric, f64)>),
    /// `train_weight * m(train) + test_weight * m(test)`; weighting the
    /// test side heavier penalizes overfitting.
    TrainTestCombined {
        train_weight: f64,
        test_weight: f64,
        metric: Metric,
    },
}

impl Objective {
    /// Score of one split's result.
    pub fn split_score(&self, result: Option<&RunResult>) -> f64 {
        match self {
            Objective::Single(metric) => metric.value(result),
            Objective::Combined(weights) => weights
                .iter()
                .map(|(metric, weight)| metric.value(result) * weight)
                .sum(),
            Objective::TrainTestCombined { metric, .. } => metric.value(result),
        }
    }

    /// Score used to rank a combination given its per-split scores.
    pub fn ranking_score(&self, train_score: f64, test_score: f64) -> f64 {
        match self {
            Objective::TrainTestCombined { train_weight, test_weight, .. } => {
                train_weight * train_score + test_weight * test_score
            }
            _ => train_score,
        }
    }
}

impl Default for Objective {
    fn default() -> Self {
        Objective::Single(Metric::SharpeRatio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn result_with(sharpe: f64, max_drawdown: f64, win_rate: f64) -> RunResult {
        let mut result = RunResult::empty("r", dec!(100000));
        result.stats.sharpe = sharpe;
        result.stats.max_drawdown = max_drawdown;
        result.stats.win_rate = win_rate;
        result
    }

    #[test]
    fn missing_result_scores_zero() {
        for metric in [
            Metric::SharpeRatio,
            Metric::TotalReturn,
            Metric::MaxDrawdown,
            Metric::ProfitFactor,
            Metric::WinRate,
        ] {
            assert_eq!(metric.value(None), 0.0);
        }
    }

    #[test]
    fn drawdown_is_negated() {
        let result = result_with(1.0, 0.2, 0.5);
        assert_eq!(Metric::MaxDrawdown.value(Some(&result)), -0.2);
    }

    #[test]
    fn combined_weights_metrics() {
        let objective = Objective::Combined(vec![
            (Metric::SharpeRatio, 0.5),
            (Metric::WinRate, 2.0),
        ]);
        let result = result_with(2.0, 0.0, 0.6);
        let score = objective.split_score(Some(&result));
        assert!((score - (1.0 + 1.2)).abs() < 1e-12);
    }

    #[test]
    fn train_test_combined_blends_for_ranking() {
        let objective = Objective::TrainTestCombined {
            train_weight: 0.4,
            test_weight: 0.6,
            metric: Metric::SharpeRatio,
        };
        assert!((objective.ranking_score(1.0, 2.0) - 1.6).abs() < 1e-12);
        // Per-split scoring is just the inner metric.
        let result = result_with(1.5, 0.0, 0.0);
        assert_eq!(objective.split_score(Some(&result)), 1.5);
    }

    #[test]
    fn unknown_objective_name_is_rejected() {
        assert!(Metric::from_name("alpha").is_err());
        assert_eq!(Metric::from_name("sharpe_ratio").unwrap(), Metric::SharpeRatio);
    }
}
