//! Search space definitions and enumeration.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use eb_types::{ConfigError, ParamMap, ParamValue};

/// One searchable dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamRange {
    /// Inclusive integer range walked by `step`.
    Int { min: i64, max: i64, step: i64 },
    /// Inclusive float range walked by `step`.
    Float { min: f64, max: f64, step: f64 },
    /// Explicit categorical values.
    Choice { values: Vec<ParamValue> },
}

impl ParamRange {
    fn values(&self) -> Vec<ParamValue> {
        match self {
            ParamRange::Int { min, max, step } => {
                let step = (*step).max(1);
                let mut out = Vec::new();
                let mut value = *min;
                while value <= *max {
                    out.push(ParamValue::Int(value));
                    value += step;
                }
                out
            }
            ParamRange::Float { min, max, step } => {
                let mut out = Vec::new();
                if *step <= 0.0 {
                    return out;
                }
                let count = ((max - min) / step).floor() as usize + 1;
                for i in 0..count {
                    out.push(ParamValue::Float(min + i as f64 * step));
                }
                out
            }
            ParamRange::Choice { values } => values.clone(),
        }
    }

    fn sample(&self, rng: &mut ChaCha8Rng) -> Option<ParamValue> {
        match self {
            ParamRange::Int { min, max, .. } => {
                if min > max {
                    return None;
                }
                Some(ParamValue::Int(rng.gen_range(*min..=*max)))
            }
            ParamRange::Float { min, max, .. } => {
                if min > max {
                    return None;
                }
                Some(ParamValue::Float(rng.gen_range(*min..=*max)))
            }
            ParamRange::Choice { values } => {
                if values.is_empty() {
                    return None;
                }
                let index = rng.gen_range(0..values.len());
                Some(values[index].clone())
            }
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let ok = match self {
            ParamRange::Int { min, max, step } => min <= max && *step > 0,
            ParamRange::Float { min, max, step } => min <= max && *step > 0.0,
            ParamRange::Choice { values } => !values.is_empty(),
        };
        if ok {
            Ok(())
        } else {
            Err(ConfigError::InvalidValue {
                field: format!("parameter_space.{name}"),
                message: "empty or inverted range".into(),
            })
        }
    }
}

/// Ordered list of named dimensions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSpace {
    dimensions: Vec<(String, ParamRange)>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, name: impl Into<String>, range: ParamRange) -> Result<Self, ConfigError> {
        let name = name.into();
        range.validate(&name)?;
        if self.dimensions.iter().any(|(n, _)| *n == name) {
            return Err(ConfigError::Contradictory {
                message: format!("parameter {name} declared twice"),
            });
        }
        self.dimensions.push((name, range));
        Ok(self)
    }

    pub fn add_int(self, name: impl Into<String>, min: i64, max: i64, step: i64) -> Result<Self, ConfigError> {
        self.add(name, ParamRange::Int { min, max, step })
    }

    pub fn add_float(self, name: impl Into<String>, min: f64, max: f64, step: f64) -> Result<Self, ConfigError> {
        self.add(name, ParamRange::Float { min, max, step })
    }

    pub fn add_choice(self, name: impl Into<String>, values: Vec<ParamValue>) -> Result<Self, ConfigError> {
        self.add(name, ParamRange::Choice { values })
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Number of grid points.
    pub fn grid_size(&self) -> usize {
        self.dimensions
            .iter()
            .map(|(_, range)| range.values().len())
            .product()
    }

    /// Cartesian product of all discretized dimensions.
    pub fn grid(&self) -> Vec<ParamMap> {
        let mut combos: Vec<ParamMap> = vec![ParamMap::new()];
        for (name, range) in &self.dimensions {
            let axis = range.values();
            let mut next = Vec::with_capacity(combos.len() * axis.len());
            for existing in &combos {
                for value in &axis {
                    let mut combo = existing.clone();
                    combo.insert(name.clone(), value.clone());
                    next.push(combo);
                }
            }
            combos = next;
        }
        combos
    }

    /// `count` uniform samples, reproducible per seed.
    pub fn random(&self, count: usize, seed: u64) -> Vec<ParamMap> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let mut combo = ParamMap::new();
                for (name, range) in &self.dimensions {
                    if let Some(value) = range.sample(&mut rng) {
                        combo.insert(name.clone(), value);
                    }
                }
                combo
            })
            .collect()
    }
}
