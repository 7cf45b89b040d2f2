//! Combination evaluation with strict train/test isolation.
//!
//! Every combination gets an entirely new component graph for its train
//! run and another for its test run; the only artifact that crosses run
//! boundaries is the evaluation record. Combinations execute on rayon
//! workers, each owning its own graph.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use eb_data::split::{SplitName, SplitPair};
use eb_data::{BarSeries, BarSource};
use eb_engine::config::RunConfig;
use eb_engine::registry::default_registry;
use eb_engine::{BacktestCoordinator, RunResult};
use eb_types::hash::{fnv1a, hex};
use eb_types::params::canonical;
use eb_types::{DataError, EbError, EbResult, ParamMap, Symbol};

use crate::objective::Objective;
use crate::space::ParameterSpace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalkForwardMode {
    /// Train window slides with the test window.
    Rolling,
    /// Train window grows; its start stays pinned.
    Expanding,
}

/// How combinations are enumerated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMethod {
    Grid,
    Random { samples: usize, seed: u64 },
    /// Slides `window`-bar train segments (test = next `step` bars)
    /// across the series; each combination is scored on every window.
    WalkForward {
        window: usize,
        step: usize,
        mode: WalkForwardMode,
    },
}

/// One evaluated parameter combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub combination_index: usize,
    pub parameters: ParamMap,
    pub train_score: f64,
    pub test_score: f64,
    pub train: Option<RunResult>,
    pub test: Option<RunResult>,
    /// Timeout or per-combination failure marker.
    pub error: Option<String>,
}

/// Full sweep outcome, sorted best-first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub best_parameters: Option<ParamMap>,
    pub best_score: f64,
    pub evaluations: Vec<Evaluation>,
    pub execution_time_secs: f64,
    /// Train/test fingerprints, for leakage audits.
    pub train_test_split: String,
}

impl OptimizationReport {
    pub fn best(&self) -> Option<&Evaluation> {
        self.evaluations.first()
    }
}

pub struct Optimizer {
    name: String,
    base: RunConfig,
    space: ParameterSpace,
    method: SearchMethod,
    objective: Objective,
    max_evaluations: Option<usize>,
    per_combination_limit: Option<Duration>,
}

impl Optimizer {
    pub fn new(
        name: impl Into<String>,
        base: RunConfig,
        space: ParameterSpace,
        method: SearchMethod,
        objective: Objective,
    ) -> Self {
        Self {
            name: name.into(),
            base,
            space,
            method,
            objective,
            max_evaluations: None,
            per_combination_limit: None,
        }
    }

    pub fn with_max_evaluations(mut self, max: usize) -> Self {
        self.max_evaluations = Some(max);
        self
    }

    /// Wall-clock budget applied to each train and test run.
    pub fn with_combination_limit(mut self, limit: Duration) -> Self {
        self.per_combination_limit = Some(limit);
        self
    }

    /// Evaluates every combination on the given per-symbol splits.
    pub fn optimize(&self, splits: &BTreeMap<Symbol, SplitPair>) -> EbResult<OptimizationReport> {
        let started = Instant::now();

        if let SearchMethod::WalkForward { window, step, mode } = &self.method {
            return self.optimize_walk_forward(splits, *window, *step, *mode, started);
        }

        guard_distinct_splits(splits)?;

        let mut combos = match &self.method {
            SearchMethod::Grid => self.space.grid(),
            SearchMethod::Random { samples, seed } => self.space.random(*samples, *seed),
            SearchMethod::WalkForward { .. } => unreachable!("handled above"),
        };
        if let Some(max) = self.max_evaluations {
            combos.truncate(max);
        }
        info!(combinations = combos.len(), "optimization starting");

        let evaluations = Mutex::new(Vec::with_capacity(combos.len()));
        combos
            .into_par_iter()
            .enumerate()
            .for_each(|(index, params)| {
                let evaluation = self.evaluate(index, params, splits);
                evaluations.lock().push(evaluation);
            });

        let source = BarSource::new(splits.clone());
        let split_description = format!(
            "train={};test={}",
            source.fingerprint(SplitName::Train),
            source.fingerprint(SplitName::Test)
        );
        Ok(self.assemble_report(evaluations.into_inner(), split_description, started))
    }

    /// One full train-then-test evaluation of a parameter combination.
    fn evaluate(
        &self,
        index: usize,
        params: ParamMap,
        splits: &BTreeMap<Symbol, SplitPair>,
    ) -> Evaluation {
        let (train, train_error) = self.execute_split(index, &params, splits, SplitName::Train);
        let (test, test_error) = self.execute_split(index, &params, splits, SplitName::Test);

        let train_score = self.objective.split_score(train.as_ref());
        let test_score = self.objective.split_score(test.as_ref());
        let error = train_error.or(test_error);
        if let Some(message) = &error {
            warn!(combination = index, message = %message, "combination failed");
        }

        Evaluation {
            combination_index: index,
            parameters: params,
            train_score,
            test_score,
            train,
            test,
            error,
        }
    }

    /// Runs one split with a brand-new component graph, releasing it on
    /// return.
    fn execute_split(
        &self,
        index: usize,
        params: &ParamMap,
        splits: &BTreeMap<Symbol, SplitPair>,
        split: SplitName,
    ) -> (Option<RunResult>, Option<String>) {
        let seed = fnv1a(&[&canonical(params), &split.to_string(), &index.to_string()]);
        let run_id = format!("{}-{:04}-{}-{}", self.name, index, split, hex(seed));

        let mut config = self.base.clone().with_parameters(params);
        config.deadline = self.per_combination_limit;

        let mut source = BarSource::new(splits.clone());
        source.activate(split);

        let registry = default_registry();
        let coordinator = BacktestCoordinator::new(config, run_id);
        match coordinator.run(&mut source, &registry) {
            Ok(result) => {
                let error = result.failure.clone();
                (Some(result), error)
            }
            Err(err) => (None, Some(err.to_string())),
        }
    }

    fn optimize_walk_forward(
        &self,
        splits: &BTreeMap<Symbol, SplitPair>,
        window: usize,
        step: usize,
        mode: WalkForwardMode,
        started: Instant,
    ) -> EbResult<OptimizationReport> {
        // Walk-forward re-windows the full series (train + test joined
        // back together per symbol).
        let full: BTreeMap<Symbol, BarSeries> = splits
            .iter()
            .map(|(symbol, pair)| {
                let mut bars = pair.train.bars().to_vec();
                bars.extend_from_slice(pair.test.bars());
                let series = BarSeries::from_bars(symbol.clone(), bars)?;
                Ok((symbol.clone(), series))
            })
            .collect::<Result<_, DataError>>()?;

        let shortest = full.values().map(BarSeries::len).min().unwrap_or(0);
        let windows = walk_forward_windows(shortest, window, step, mode);
        if windows.is_empty() {
            return Err(EbError::Data(DataError::InvalidSplit {
                message: format!(
                    "series of {shortest} bars cannot fit a {window}+{step} walk-forward window"
                ),
            }));
        }

        let mut combos = self.space.grid();
        if let Some(max) = self.max_evaluations {
            combos.truncate(max);
        }
        info!(combinations = combos.len(), windows = windows.len(), "walk-forward starting");

        let evaluations = Mutex::new(Vec::with_capacity(combos.len()));
        combos
            .into_par_iter()
            .enumerate()
            .for_each(|(index, params)| {
                let mut train_scores = Vec::with_capacity(windows.len());
                let mut test_scores = Vec::with_capacity(windows.len());
                let mut last: Option<(Option<RunResult>, Option<RunResult>)> = None;
                let mut error = None;

                for (train_range, test_range) in &windows {
                    let window_splits: BTreeMap<Symbol, SplitPair> = full
                        .iter()
                        .map(|(symbol, series)| {
                            let pair = SplitPair {
                                train: series.slice(train_range.0, train_range.1),
                                test: series.slice(test_range.0, test_range.1),
                            };
                            (symbol.clone(), pair)
                        })
                        .collect();

                    let evaluation = self.evaluate(index, params.clone(), &window_splits);
                    train_scores.push(evaluation.train_score);
                    test_scores.push(evaluation.test_score);
                    error = error.or(evaluation.error);
                    last = Some((evaluation.train, evaluation.test));
                }

                let (train, test) = last.unwrap_or((None, None));
                evaluations.lock().push(Evaluation {
                    combination_index: index,
                    parameters: params,
                    train_score: mean(&train_scores),
                    test_score: mean(&test_scores),
                    train,
                    test,
                    error,
                });
            });

        let description = format!(
            "walk_forward windows={} train_bars={} test_bars={}",
            windows.len(),
            window,
            step
        );
        Ok(self.assemble_report(evaluations.into_inner(), description, started))
    }

    fn assemble_report(
        &self,
        mut evaluations: Vec<Evaluation>,
        train_test_split: String,
        started: Instant,
    ) -> OptimizationReport {
        evaluations.sort_by(|a, b| {
            let a_score = self.objective.ranking_score(a.train_score, a.test_score);
            let b_score = self.objective.ranking_score(b.train_score, b.test_score);
            b_score
                .partial_cmp(&a_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.combination_index.cmp(&b.combination_index))
        });

        let best = evaluations.first();
        let best_parameters = best.map(|e| e.parameters.clone());
        let best_score = best
            .map(|e| self.objective.ranking_score(e.train_score, e.test_score))
            .unwrap_or(0.0);

        OptimizationReport {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            best_parameters,
            best_score,
            evaluations,
            execution_time_secs: started.elapsed().as_secs_f64(),
            train_test_split,
        }
    }
}

/// Raises when train and test would replay identical content.
fn guard_distinct_splits(splits: &BTreeMap<Symbol, SplitPair>) -> EbResult<()> {
    let source = BarSource::new(splits.clone());
    let train = source.fingerprint(SplitName::Train);
    let test = source.fingerprint(SplitName::Test);
    if train == test {
        return Err(EbError::Data(DataError::SplitsIdentical { fingerprint: train }));
    }
    Ok(())
}

/// (train, test) index ranges over a series of `len` bars.
fn walk_forward_windows(
    len: usize,
    window: usize,
    step: usize,
    mode: WalkForwardMode,
) -> Vec<((usize, usize), (usize, usize))> {
    let mut out = Vec::new();
    if window == 0 || step == 0 {
        return out;
    }
    let mut train_start = 0usize;
    let mut train_end = window;
    while train_end + step <= len {
        out.push(((train_start, train_end), (train_end, train_end + step)));
        if mode == WalkForwardMode::Rolling {
            train_start += step;
        }
        train_end += step;
    }
    out
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_windows_slide_both_ends() {
        let windows = walk_forward_windows(10, 4, 2, WalkForwardMode::Rolling);
        assert_eq!(
            windows,
            vec![
                ((0, 4), (4, 6)),
                ((2, 6), (6, 8)),
                ((4, 8), (8, 10)),
            ]
        );
    }

    #[test]
    fn expanding_windows_pin_the_start() {
        let windows = walk_forward_windows(10, 4, 2, WalkForwardMode::Expanding);
        assert_eq!(
            windows,
            vec![
                ((0, 4), (4, 6)),
                ((0, 6), (6, 8)),
                ((0, 8), (8, 10)),
            ]
        );
    }

    #[test]
    fn degenerate_windows_are_empty() {
        assert!(walk_forward_windows(3, 4, 2, WalkForwardMode::Rolling).is_empty());
        assert!(walk_forward_windows(10, 0, 2, WalkForwardMode::Rolling).is_empty());
    }

    #[test]
    fn mean_of_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[1.0, 3.0]), 2.0);
    }
}
