//! `emberback` — event-driven backtesting and parameter optimization.

mod app_config;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use eb_engine::config::RunConfig;
use eb_engine::registry::default_registry;
use eb_engine::BacktestCoordinator;
use eb_data::BarSource;
use eb_optimizer::section::MethodName;
use eb_optimizer::Optimizer;
use eb_types::hash::{fnv1a, hex};
use eb_types::params::canonical;
use eb_types::{ConfigError, EbError, EbResult};

#[derive(Parser)]
#[command(name = "emberback", version, about = "Event-driven backtesting engine")]
struct Cli {
    /// Log filter directive (e.g. `info` or `eb_engine=debug`).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MethodArg {
    Grid,
    Random,
    WalkForward,
}

impl From<MethodArg> for MethodName {
    fn from(value: MethodArg) -> Self {
        match value {
            MethodArg::Grid => MethodName::Grid,
            MethodArg::Random => MethodName::Random,
            MethodArg::WalkForward => MethodName::WalkForward,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backtest over the configured data.
    Backtest {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Sweep the parameter space on train data, validate on test.
    Optimize {
        #[arg(long)]
        config: PathBuf,
        /// YAML file whose `parameter_space` replaces the configured one.
        #[arg(long)]
        param_file: Option<PathBuf>,
        /// Override the configured enumeration method.
        #[arg(long, value_enum)]
        method: Option<MethodArg>,
        /// Evaluate on the full dataset without a held-out test split.
        #[arg(long)]
        skip_train_test: bool,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let outcome = match cli.command {
        Commands::Backtest { config, output_dir } => run_backtest(&config, output_dir),
        Commands::Optimize { config, param_file, method, skip_train_test, output_dir } => {
            run_optimize(&config, param_file, method, skip_train_test, output_dir)
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(app_config::exit_code(&err))
        }
    }
}

fn run_backtest(config_path: &PathBuf, output_dir: Option<PathBuf>) -> EbResult<()> {
    let started = Instant::now();
    let (config, raw) = app_config::load(config_path)?;
    let run_config = RunConfig::assemble(
        &config.backtest,
        &config.strategy,
        &config.risk,
        &config.broker,
    )?;

    let series = app_config::load_series(&config)?;
    let mut source = BarSource::new(app_config::unsplit(series));

    let run_id = format!(
        "backtest-{}",
        hex(fnv1a(&[&config.strategy.name, &canonical(&run_config.strategy.parameters)]))
    );
    let registry = default_registry();
    let coordinator = BacktestCoordinator::new(run_config, run_id);
    let result = coordinator.run(&mut source, &registry)?;

    let base = output_dir.unwrap_or_else(|| PathBuf::from(&config.output.results_dir));
    let dir = output::persist_backtest(&base, &result, &raw, started.elapsed().as_secs_f64())?;
    info!(
        run_id = %result.run_id,
        trades = result.trades.len(),
        equity_final = %result.stats.equity_final,
        results = %dir.display(),
        "backtest complete"
    );
    Ok(())
}

fn run_optimize(
    config_path: &PathBuf,
    param_file: Option<PathBuf>,
    method_override: Option<MethodArg>,
    skip_train_test: bool,
    output_dir: Option<PathBuf>,
) -> EbResult<()> {
    let (config, raw) = app_config::load(config_path)?;
    let mut section = config.optimization.clone().ok_or_else(|| {
        EbError::Config(ConfigError::MissingSection { name: "optimization".into() })
    })?;
    if let Some(method) = method_override {
        section.method = method.into();
    }
    if let Some(path) = &param_file {
        section.parameter_space = app_config::load_param_file(path)?;
    }

    let run_config = RunConfig::assemble(
        &config.backtest,
        &config.strategy,
        &config.risk,
        &config.broker,
    )?;

    let series = app_config::load_series(&config)?;
    let splits = if skip_train_test {
        app_config::unsplit(series)
    } else {
        app_config::build_splits(&config, series)?
    };

    let space = section.parameter_space()?;
    let method = section.search_method()?;
    let objective = section.objective()?;

    let run_id = format!(
        "optimize-{}",
        hex(fnv1a(&[&config.strategy.name, &format!("{method:?}")]))
    );
    let mut optimizer = Optimizer::new(&run_id, run_config, space, method, objective);
    if let Some(max) = section.max_evaluations {
        optimizer = optimizer.with_max_evaluations(max);
    }
    if let Some(limit) = section.combination_limit() {
        optimizer = optimizer.with_combination_limit(limit);
    }

    let report = optimizer.optimize(&splits)?;

    let parameter_space = serde_json::to_value(&section.parameter_space)?;
    let base = output_dir.unwrap_or_else(|| PathBuf::from(&config.output.results_dir));
    let dir = output::persist_optimization(&base, &run_id, &report, &parameter_space, &raw)?;
    info!(
        run_id = %run_id,
        evaluations = report.evaluations.len(),
        best_score = report.best_score,
        results = %dir.display(),
        "optimization complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::fs;
    use std::io::Write;

    fn write_bars(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("bars.csv");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "timestamp,open,high,low,close,volume").unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..30i64 {
            let close = if i < 25 { 100 } else { 100 + (i - 24) * 5 };
            let date = (start + Duration::days(i)).format("%Y-%m-%d");
            writeln!(file, "{date},{close},{close},{close},{close},10000").unwrap();
        }
        path
    }

    fn write_config(dir: &std::path::Path, bars: &std::path::Path, with_optimization: bool) -> PathBuf {
        let optimization = if with_optimization {
            "\noptimization:\n  method: grid\n  objective: total_return\n  parameter_space:\n    - name: fast\n      type: int\n      min: 2\n      max: 3\n      step: 1\n"
        } else {
            ""
        };
        let text = format!(
            "backtest:\n  initial_capital: 100000\n  symbols: [X]\n\
             data:\n  sources:\n    - symbol: X\n      file: {}\n  train_test_split:\n    method: ratio\n    train_ratio: 0.7\n    test_ratio: 0.3\n\
             strategy:\n  name: sma_crossover\n  parameters:\n    fast: 2\n    slow: 5\n\
             risk:\n  sizing:\n    method: fixed\n    quantity: 10\n{optimization}",
            bars.display()
        );
        let path = dir.join("config.yaml");
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn backtest_command_persists_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let bars = write_bars(dir.path());
        let config = write_config(dir.path(), &bars, false);
        let out = dir.path().join("out");

        run_backtest(&config, Some(out.clone())).unwrap();

        let run_dir = fs::read_dir(&out).unwrap().next().unwrap().unwrap().path();
        for artifact in ["equity_curve.csv", "trades.csv", "summary.txt", "results.json"] {
            assert!(run_dir.join(artifact).exists(), "missing {artifact}");
        }

        let results: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(run_dir.join("results.json")).unwrap()).unwrap();
        assert!(results["train_results"]["consistency"].as_bool().unwrap());
        assert_eq!(
            results["train_results"]["trades"].as_array().unwrap().len(),
            1
        );

        let trades = fs::read_to_string(run_dir.join("trades.csv")).unwrap();
        assert!(trades.lines().count() >= 2);
    }

    #[test]
    fn optimize_command_reports_all_combinations() {
        let dir = tempfile::tempdir().unwrap();
        let bars = write_bars(dir.path());
        let config = write_config(dir.path(), &bars, true);
        let out = dir.path().join("out");

        run_optimize(&config, None, None, false, Some(out.clone())).unwrap();

        let run_dir = fs::read_dir(&out).unwrap().next().unwrap().unwrap().path();
        let results: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(run_dir.join("results.json")).unwrap()).unwrap();
        assert_eq!(results["all_results"].as_array().unwrap().len(), 2);
        assert!(results["best_parameters"].is_object());
        assert!(results["train_test_split"].as_str().unwrap().contains("train="));
    }

    #[test]
    fn missing_optimization_section_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let bars = write_bars(dir.path());
        let config = write_config(dir.path(), &bars, false);

        let err = run_optimize(&config, None, None, false, None).unwrap_err();
        assert_eq!(app_config::exit_code(&err), 1);
    }
}
