//! Engine-side configuration model.
//!
//! Sections are serde structs with `deny_unknown_fields`: configuration
//! binds by field name and anything unrecognized is rejected at load
//! time, before a run starts.

use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use eb_data::split::SplitMethod;
use eb_types::{ConfigError, ParamMap};

use crate::broker::{CommissionModel, SlippageModel};
use crate::bus::DedupMode;
use crate::risk::{DrawdownControl, SizingPolicy};

/// `backtest:` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BacktestSection {
    pub initial_capital: Decimal,
    pub symbols: Vec<String>,
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub close_positions_eod: bool,
    #[serde(default)]
    pub max_bars: Option<usize>,
}

/// One entry of `data.sources`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSourceSpec {
    pub symbol: String,
    pub file: String,
    #[serde(default = "default_date_column")]
    pub date_column: String,
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default)]
    pub price_column: Option<String>,
}

fn default_date_column() -> String {
    "timestamp".to_string()
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

/// `data.train_test_split` section. (No `deny_unknown_fields` here:
/// serde does not support it next to `flatten`.)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSpec {
    #[serde(flatten)]
    pub method: SplitMethod,
    #[serde(default)]
    pub max_bars: Option<usize>,
}

/// `data:` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSection {
    #[serde(default = "default_source_type")]
    pub source_type: String,
    pub sources: Vec<DataSourceSpec>,
    #[serde(default)]
    pub train_test_split: Option<SplitSpec>,
}

fn default_source_type() -> String {
    "csv".to_string()
}

/// `strategy:` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategySection {
    pub name: String,
    #[serde(default)]
    pub parameters: ParamMap,
}

/// `risk:` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskSection {
    pub sizing: SizingPolicy,
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    #[serde(default = "default_true")]
    pub enforce_single_position: bool,
    #[serde(default)]
    pub drawdown_control: Option<DrawdownControl>,
}

fn default_max_positions() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            sizing: SizingPolicy::Fixed { quantity: Decimal::ONE },
            max_positions: 1,
            enforce_single_position: true,
            drawdown_control: None,
        }
    }
}

/// `broker:` section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrokerSection {
    #[serde(default)]
    pub slippage: SlippageModel,
    #[serde(default)]
    pub commission: CommissionModel,
}

/// `output:` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    #[serde(default = "default_formats")]
    pub formats: Vec<String>,
}

fn default_results_dir() -> String {
    "results".to_string()
}

fn default_formats() -> Vec<String> {
    vec!["csv".to_string(), "json".to_string()]
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            formats: default_formats(),
        }
    }
}

/// Everything the coordinator needs for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub initial_capital: Decimal,
    pub close_positions_eod: bool,
    #[serde(default)]
    pub max_bars: Option<usize>,
    pub strategy: StrategySection,
    pub sizing: SizingPolicy,
    #[serde(default)]
    pub drawdown: Option<DrawdownControl>,
    #[serde(default)]
    pub slippage: SlippageModel,
    #[serde(default)]
    pub commission: CommissionModel,
    #[serde(default = "default_dedup")]
    pub dedup: DedupMode,
    /// Wall-clock budget for the bar loop; set by the optimizer.
    #[serde(skip)]
    pub deadline: Option<Duration>,
}

fn default_dedup() -> DedupMode {
    DedupMode::ByFingerprint
}

impl RunConfig {
    pub fn assemble(
        backtest: &BacktestSection,
        strategy: &StrategySection,
        risk: &RiskSection,
        broker: &BrokerSection,
    ) -> Result<Self, ConfigError> {
        validate_backtest(backtest)?;
        validate_risk(risk)?;
        Ok(Self {
            initial_capital: backtest.initial_capital,
            close_positions_eod: backtest.close_positions_eod,
            max_bars: backtest.max_bars,
            strategy: strategy.clone(),
            sizing: risk.sizing.clone(),
            drawdown: risk.drawdown_control.clone(),
            slippage: broker.slippage.clone(),
            commission: broker.commission.clone(),
            dedup: DedupMode::ByFingerprint,
            deadline: None,
        })
    }

    /// Injects optimizer parameter overrides into the strategy section.
    pub fn with_parameters(mut self, params: &ParamMap) -> Self {
        for (name, value) in params {
            self.strategy.parameters.insert(name.clone(), value.clone());
        }
        self
    }
}

fn validate_backtest(section: &BacktestSection) -> Result<(), ConfigError> {
    if section.initial_capital <= Decimal::ZERO {
        return Err(ConfigError::InvalidValue {
            field: "backtest.initial_capital".into(),
            message: format!("must be positive, got {}", section.initial_capital),
        });
    }
    if section.symbols.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "backtest.symbols".into(),
            message: "at least one symbol is required".into(),
        });
    }
    if let (Some(start), Some(end)) = (section.start_date, section.end_date) {
        if start > end {
            return Err(ConfigError::Contradictory {
                message: format!("start_date {start} is after end_date {end}"),
            });
        }
    }
    Ok(())
}

fn validate_risk(section: &RiskSection) -> Result<(), ConfigError> {
    if !section.enforce_single_position || section.max_positions != 1 {
        return Err(ConfigError::Contradictory {
            message: "only single-position operation is supported (enforce_single_position: true, max_positions: 1)".into(),
        });
    }
    if let Some(control) = &section.drawdown_control {
        if control.cutoff < control.threshold {
            return Err(ConfigError::Contradictory {
                message: "drawdown cutoff below threshold".into(),
            });
        }
    }
    Ok(())
}
