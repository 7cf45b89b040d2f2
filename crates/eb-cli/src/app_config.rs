//! Full configuration file model and data loading for the CLI.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use eb_data::split::{DataSplitter, SplitMethod, SplitPair};
use eb_data::{BarSeries, CsvBarLoader};
use eb_engine::config::{
    BacktestSection, BrokerSection, DataSection, OutputSection, RiskSection, StrategySection,
};
use eb_optimizer::section::ParamDimSpec;
use eb_optimizer::OptimizationSection;
use eb_types::{ConfigError, DataError, EbError, EbResult, Symbol};

/// Top-level configuration file. Unknown sections and fields are
/// rejected at load time.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub backtest: BacktestSection,
    pub data: DataSection,
    pub strategy: StrategySection,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub optimization: Option<OptimizationSection>,
    #[serde(default)]
    pub output: OutputSection,
}

/// Parses the YAML config, returning both the typed model and the raw
/// document (echoed into results.json).
pub fn load(path: &Path) -> EbResult<(AppConfig, serde_json::Value)> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Parse(format!("cannot read {}: {e}", path.display())))?;
    let config: AppConfig =
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let raw: serde_json::Value =
        serde_yaml::from_str(&text).unwrap_or(serde_json::Value::Null);
    Ok((config, raw))
}

/// Loads every configured symbol's bars, applying the optional
/// start/end date window.
pub fn load_series(config: &AppConfig) -> EbResult<BTreeMap<Symbol, BarSeries>> {
    let mut out = BTreeMap::new();
    for name in &config.backtest.symbols {
        let spec = config
            .data
            .sources
            .iter()
            .find(|s| s.symbol == *name)
            .ok_or_else(|| DataError::SymbolNotFound { symbol: name.clone() })?;

        let symbol = Symbol::from(name.as_str());
        let loader = CsvBarLoader::new(&spec.date_column, &spec.date_format);
        let series = loader.load(&spec.file, &symbol)?;

        let bars: Vec<_> = series
            .bars()
            .iter()
            .filter(|bar| {
                let date = bar.date();
                config.backtest.start_date.map_or(true, |start| date >= start)
                    && config.backtest.end_date.map_or(true, |end| date <= end)
            })
            .cloned()
            .collect();
        let series = BarSeries::from_bars(symbol.clone(), bars)?;
        out.insert(symbol, series);
    }
    Ok(out)
}

/// Train/test splits for the optimizer. Falls back to a 0.7/0.3 ratio
/// split when the config does not name one.
pub fn build_splits(
    config: &AppConfig,
    series: BTreeMap<Symbol, BarSeries>,
) -> EbResult<BTreeMap<Symbol, SplitPair>> {
    let (method, max_bars) = match &config.data.train_test_split {
        Some(spec) => (spec.method.clone(), spec.max_bars),
        None => (SplitMethod::Ratio { train_ratio: 0.7, test_ratio: 0.3 }, None),
    };
    let mut splitter = DataSplitter::new(method)?;
    if let Some(max) = max_bars {
        splitter = splitter.with_max_bars(max);
    }

    let mut out = BTreeMap::new();
    for (symbol, series) in series {
        out.insert(symbol, splitter.split(&series));
    }
    Ok(out)
}

/// Standalone parameter-space file for `--param-file`: either a bare
/// list of dimensions or a document with a `parameter_space:` key.
pub fn load_param_file(path: &Path) -> EbResult<Vec<ParamDimSpec>> {
    #[derive(Deserialize)]
    struct ParamFile {
        parameter_space: Vec<ParamDimSpec>,
    }

    let text = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Parse(format!("cannot read {}: {e}", path.display())))?;
    if let Ok(file) = serde_yaml::from_str::<ParamFile>(&text) {
        return Ok(file.parameter_space);
    }
    serde_yaml::from_str::<Vec<ParamDimSpec>>(&text)
        .map_err(|e| ConfigError::Parse(e.to_string()).into())
}

/// The whole dataset as the active segment (single backtests, or
/// `--skip-train-test` sweeps).
pub fn unsplit(series: BTreeMap<Symbol, BarSeries>) -> BTreeMap<Symbol, SplitPair> {
    series
        .into_iter()
        .map(|(symbol, series)| (symbol, SplitPair::unsplit(series)))
        .collect()
}

/// Exit code mapping per the CLI contract: 1 config, 2 data, 3 run.
pub fn exit_code(err: &EbError) -> u8 {
    match err {
        EbError::Config(_) => 1,
        EbError::Data(_) => 2,
        _ => 3,
    }
}
