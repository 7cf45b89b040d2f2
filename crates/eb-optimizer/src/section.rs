//! The `optimization:` configuration section and its translation into
//! a runnable [`Optimizer`](crate::runner::Optimizer) setup.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use eb_types::{ConfigError, ParamValue};

use crate::objective::{Metric, Objective};
use crate::runner::{SearchMethod, WalkForwardMode};
use crate::space::{ParamRange, ParameterSpace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodName {
    Grid,
    Random,
    WalkForward,
}

/// One `parameter_space` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParamDimSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
    #[serde(default)]
    pub values: Option<Vec<ParamValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalkForwardSpec {
    pub window: usize,
    pub step: usize,
    #[serde(default = "default_mode")]
    pub mode: WalkForwardMode,
}

fn default_mode() -> WalkForwardMode {
    WalkForwardMode::Rolling
}

/// `optimization:` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizationSection {
    pub method: MethodName,
    #[serde(default = "default_objective")]
    pub objective: String,
    pub parameter_space: Vec<ParamDimSpec>,
    #[serde(default)]
    pub train_weight: Option<f64>,
    #[serde(default)]
    pub test_weight: Option<f64>,
    #[serde(default)]
    pub max_evaluations: Option<usize>,
    /// Per-run wall-clock limit, seconds.
    #[serde(default)]
    pub max_time: Option<u64>,
    #[serde(default)]
    pub random_seed: Option<u64>,
    /// Sample count for the random method.
    #[serde(default)]
    pub samples: Option<usize>,
    #[serde(default)]
    pub walk_forward: Option<WalkForwardSpec>,
}

fn default_objective() -> String {
    "sharpe_ratio".to_string()
}

impl OptimizationSection {
    pub fn parameter_space(&self) -> Result<ParameterSpace, ConfigError> {
        let mut space = ParameterSpace::new();
        for dim in &self.parameter_space {
            let range = dim.to_range()?;
            space = space.add(&dim.name, range)?;
        }
        Ok(space)
    }

    pub fn search_method(&self) -> Result<SearchMethod, ConfigError> {
        match self.method {
            MethodName::Grid => Ok(SearchMethod::Grid),
            MethodName::Random => Ok(SearchMethod::Random {
                samples: self.samples.unwrap_or(20),
                seed: self.random_seed.unwrap_or(0),
            }),
            MethodName::WalkForward => {
                let spec = self.walk_forward.as_ref().ok_or_else(|| {
                    ConfigError::MissingSection {
                        name: "optimization.walk_forward".into(),
                    }
                })?;
                Ok(SearchMethod::WalkForward {
                    window: spec.window,
                    step: spec.step,
                    mode: spec.mode,
                })
            }
        }
    }

    pub fn objective(&self) -> Result<Objective, ConfigError> {
        let metric = Metric::from_name(&self.objective)?;
        match (self.train_weight, self.test_weight) {
            (Some(train_weight), Some(test_weight)) => Ok(Objective::TrainTestCombined {
                train_weight,
                test_weight,
                metric,
            }),
            (None, None) => Ok(Objective::Single(metric)),
            _ => Err(ConfigError::Contradictory {
                message: "train_weight and test_weight must be set together".into(),
            }),
        }
    }

    pub fn combination_limit(&self) -> Option<Duration> {
        self.max_time.map(Duration::from_secs)
    }
}

impl ParamDimSpec {
    fn to_range(&self) -> Result<ParamRange, ConfigError> {
        let bounds = |field: &Option<f64>, label: &str| {
            field.ok_or_else(|| ConfigError::InvalidValue {
                field: format!("parameter_space.{}.{label}", self.name),
                message: "required for numeric ranges".into(),
            })
        };
        match self.kind.as_str() {
            "int" => Ok(ParamRange::Int {
                min: bounds(&self.min, "min")? as i64,
                max: bounds(&self.max, "max")? as i64,
                step: self.step.unwrap_or(1.0) as i64,
            }),
            "float" => Ok(ParamRange::Float {
                min: bounds(&self.min, "min")?,
                max: bounds(&self.max, "max")?,
                step: self.step.unwrap_or(1.0),
            }),
            "choice" => {
                let values = self.values.clone().unwrap_or_default();
                Ok(ParamRange::Choice { values })
            }
            other => Err(ConfigError::InvalidValue {
                field: format!("parameter_space.{}.type", self.name),
                message: format!("unknown type {other:?}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section_json(method: &str) -> String {
        format!(
            r#"{{
                "method": "{method}",
                "objective": "total_return",
                "parameter_space": [
                    {{"name": "fast", "type": "int", "min": 2, "max": 6, "step": 2}},
                    {{"name": "slow", "type": "int", "min": 10, "max": 20, "step": 5}}
                ],
                "samples": 5,
                "random_seed": 7
            }}"#
        )
    }

    #[test]
    fn parses_grid_section() {
        let section: OptimizationSection = serde_json::from_str(&section_json("grid")).unwrap();
        assert_eq!(section.search_method().unwrap(), SearchMethod::Grid);
        let space = section.parameter_space().unwrap();
        assert_eq!(space.grid_size(), 9);
    }

    #[test]
    fn random_method_uses_samples_and_seed() {
        let section: OptimizationSection = serde_json::from_str(&section_json("random")).unwrap();
        assert_eq!(
            section.search_method().unwrap(),
            SearchMethod::Random { samples: 5, seed: 7 }
        );
    }

    #[test]
    fn walk_forward_requires_spec() {
        let section: OptimizationSection =
            serde_json::from_str(&section_json("walk_forward")).unwrap();
        let err = section.search_method().unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection { .. }));
    }

    #[test]
    fn objective_blend_needs_both_weights() {
        let mut section: OptimizationSection = serde_json::from_str(&section_json("grid")).unwrap();
        section.train_weight = Some(0.3);
        assert!(section.objective().is_err());
        section.test_weight = Some(0.7);
        assert!(matches!(
            section.objective().unwrap(),
            Objective::TrainTestCombined { .. }
        ));
    }

    #[test]
    fn unknown_dimension_type_is_rejected() {
        let dim = ParamDimSpec {
            name: "x".into(),
            kind: "log".into(),
            min: Some(0.0),
            max: Some(1.0),
            step: None,
            values: None,
        };
        assert!(dim.to_range().is_err());
    }
}
