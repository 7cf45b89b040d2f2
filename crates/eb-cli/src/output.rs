//! Result persistence: `<output>/<run_id>/{equity_curve.csv, trades.csv,
//! summary.txt, results.json}`.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use eb_engine::RunResult;
use eb_optimizer::{Evaluation, OptimizationReport};
use eb_types::{EbResult, ParamMap};

/// `results.json` document.
#[derive(Debug, Serialize)]
pub struct ResultsJson<'a> {
    pub id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub config: &'a serde_json::Value,
    pub parameter_space: Option<&'a serde_json::Value>,
    pub best_parameters: Option<&'a ParamMap>,
    pub best_score: Option<f64>,
    pub train_results: Option<&'a RunResult>,
    pub test_results: Option<&'a RunResult>,
    pub all_results: Vec<ScorePair<'a>>,
    pub execution_time: f64,
    pub train_test_split: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub struct ScorePair<'a> {
    pub parameters: &'a ParamMap,
    pub train_score: f64,
    pub test_score: f64,
}

pub fn run_directory(base: &Path, run_id: &str) -> EbResult<PathBuf> {
    let dir = base.join(run_id);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn write_equity_curve(dir: &Path, result: &RunResult) -> EbResult<()> {
    let mut writer = csv::Writer::from_path(dir.join("equity_curve.csv"))
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    writer
        .write_record(["timestamp", "cash", "positions_value", "equity"])
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    for point in &result.equity_curve {
        writer
            .write_record([
                point.timestamp.to_rfc3339(),
                point.cash.to_string(),
                point.positions_value.to_string(),
                point.equity.to_string(),
            ])
            .map_err(|e| std::io::Error::other(e.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_trades(dir: &Path, result: &RunResult) -> EbResult<()> {
    let mut writer = csv::Writer::from_path(dir.join("trades.csv"))
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    writer
        .write_record([
            "trade_id",
            "symbol",
            "direction",
            "quantity",
            "entry_time",
            "entry_price",
            "exit_time",
            "exit_price",
            "commission_total",
            "pnl",
            "status",
        ])
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    for trade in &result.trades {
        writer
            .write_record([
                trade.id.to_string(),
                trade.symbol.to_string(),
                format!("{}", trade.direction),
                trade.quantity.to_string(),
                trade.entry_time.to_rfc3339(),
                trade.entry_price.to_string(),
                trade.exit_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
                trade.exit_price.map(|p| p.to_string()).unwrap_or_default(),
                trade.commission_total.to_string(),
                trade.pnl.to_string(),
                format!("{:?}", trade.status).to_lowercase(),
            ])
            .map_err(|e| std::io::Error::other(e.to_string()))?;
    }
    writer.flush()?;
    Ok(())
}

/// Human-readable summary with the recorded warning/error section.
pub fn write_summary(dir: &Path, result: &RunResult) -> EbResult<()> {
    let mut file = fs::File::create(dir.join("summary.txt"))?;
    let stats = &result.stats;

    writeln!(file, "Run            {}", result.run_id)?;
    writeln!(file, "Fingerprint    {}", result.fingerprint)?;
    writeln!(file, "Complete       {}", result.complete)?;
    writeln!(file, "Consistent     {}", result.consistency)?;
    writeln!(file)?;
    writeln!(file, "Initial equity {}", stats.equity_initial)?;
    writeln!(file, "Final equity   {}", stats.equity_final)?;
    writeln!(file, "Total return   {:.4}", stats.total_return)?;
    writeln!(file, "Trades         {}", stats.trade_count)?;
    writeln!(file, "Win rate       {:.4}", stats.win_rate)?;
    writeln!(file, "Profit factor  {:.4}", stats.profit_factor)?;
    writeln!(file, "Sharpe         {:.4}", stats.sharpe)?;
    writeln!(file, "Max drawdown   {:.4}", stats.max_drawdown)?;
    writeln!(file, "Commissions    {}", stats.commission_total)?;

    writeln!(file)?;
    writeln!(file, "Warnings/errors: {} recorded, {} events deduplicated", result.errors.len(), result.dropped_events)?;
    if let Some(failure) = &result.failure {
        writeln!(file, "  run failure: {failure}")?;
    }
    if !result.errors.is_empty() {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for record in &result.errors {
            *counts.entry(record.handler.as_str()).or_default() += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort();
        for (handler, count) in counts {
            writeln!(file, "  {handler}: {count}")?;
        }
        for record in result.errors.iter().take(5) {
            writeln!(file, "  [{}] {}: {}", record.kind, record.handler, record.message)?;
        }
    }
    Ok(())
}

pub fn write_results_json(dir: &Path, document: &ResultsJson<'_>) -> EbResult<()> {
    let file = fs::File::create(dir.join("results.json"))?;
    serde_json::to_writer_pretty(file, document)?;
    Ok(())
}

/// Persists the full artifact set for one standalone backtest.
pub fn persist_backtest(
    base: &Path,
    result: &RunResult,
    config_echo: &serde_json::Value,
    execution_time: f64,
) -> EbResult<PathBuf> {
    let dir = run_directory(base, &result.run_id)?;
    write_equity_curve(&dir, result)?;
    write_trades(&dir, result)?;
    write_summary(&dir, result)?;
    let document = ResultsJson {
        id: &result.run_id,
        timestamp: Utc::now(),
        config: config_echo,
        parameter_space: None,
        best_parameters: None,
        best_score: None,
        train_results: Some(result),
        test_results: None,
        all_results: Vec::new(),
        execution_time,
        train_test_split: None,
    };
    write_results_json(&dir, &document)?;
    Ok(dir)
}

/// Persists an optimization sweep: the report plus the best
/// combination's train/test artifacts.
pub fn persist_optimization(
    base: &Path,
    run_id: &str,
    report: &OptimizationReport,
    parameter_space: &serde_json::Value,
    config_echo: &serde_json::Value,
) -> EbResult<PathBuf> {
    let dir = run_directory(base, run_id)?;

    let best: Option<&Evaluation> = report.best();
    if let Some(train) = best.and_then(|e| e.train.as_ref()) {
        write_equity_curve(&dir, train)?;
        write_trades(&dir, train)?;
        write_summary(&dir, train)?;
    }

    let document = ResultsJson {
        id: run_id,
        timestamp: report.timestamp,
        config: config_echo,
        parameter_space: Some(parameter_space),
        best_parameters: report.best_parameters.as_ref(),
        best_score: Some(report.best_score),
        train_results: best.and_then(|e| e.train.as_ref()),
        test_results: best.and_then(|e| e.test.as_ref()),
        all_results: report
            .evaluations
            .iter()
            .map(|e| ScorePair {
                parameters: &e.parameters,
                train_score: e.train_score,
                test_score: e.test_score,
            })
            .collect(),
        execution_time: report.execution_time_secs,
        train_test_split: Some(report.train_test_split.as_str()),
    };
    write_results_json(&dir, &document)?;
    Ok(dir)
}
