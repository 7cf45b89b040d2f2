use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use eb_types::DataError;

use crate::series::BarSeries;

/// Which side of a split the bar source replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitName {
    Train,
    Test,
}

impl fmt::Display for SplitName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplitName::Train => write!(f, "train"),
            SplitName::Test => write!(f, "test"),
        }
    }
}

/// How a series is partitioned into train and test segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SplitMethod {
    /// Split at `floor(len * train_ratio)`; any remainder beyond
    /// `train_ratio + test_ratio` is discarded.
    Ratio { train_ratio: f64, test_ratio: f64 },
    /// Train strictly before `split_date`, test at or after it.
    Date { split_date: DateTime<Utc> },
    /// First `train_periods` rows, then the next `test_periods`.
    Fixed { train_periods: usize, test_periods: usize },
}

/// The two segments produced for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPair {
    pub train: BarSeries,
    pub test: BarSeries,
}

impl SplitPair {
    pub fn get(&self, name: SplitName) -> &BarSeries {
        match name {
            SplitName::Train => &self.train,
            SplitName::Test => &self.test,
        }
    }

    /// The full series as a degenerate split (everything in train).
    pub fn unsplit(series: BarSeries) -> Self {
        let test = BarSeries::empty(series.symbol().clone());
        Self { train: series, test }
    }
}

/// Partitions time-sorted series into train/test segments.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSplitter {
    method: SplitMethod,
    max_bars: Option<usize>,
}

impl DataSplitter {
    pub fn new(method: SplitMethod) -> Result<Self, DataError> {
        if let SplitMethod::Ratio { train_ratio, test_ratio } = &method {
            if *train_ratio < 0.0 || *test_ratio < 0.0 || train_ratio + test_ratio > 1.0 {
                return Err(DataError::InvalidSplit {
                    message: format!(
                        "train_ratio + test_ratio must be within [0, 1], got {} + {}",
                        train_ratio, test_ratio
                    ),
                });
            }
        }
        Ok(Self { method, max_bars: None })
    }

    /// Caps the length of each produced split.
    pub fn with_max_bars(mut self, max_bars: usize) -> Self {
        self.max_bars = Some(max_bars);
        self
    }

    pub fn split(&self, series: &BarSeries) -> SplitPair {
        let (train, test) = match &self.method {
            SplitMethod::Ratio { train_ratio, test_ratio } => {
                let len = series.len();
                let train_end = (len as f64 * train_ratio).floor() as usize;
                let test_end = train_end + (len as f64 * test_ratio).floor() as usize;
                (series.slice(0, train_end), series.slice(train_end, test_end))
            }
            SplitMethod::Date { split_date } => {
                let pivot = series
                    .bars()
                    .iter()
                    .position(|b| b.timestamp >= *split_date)
                    .unwrap_or(series.len());
                (series.slice(0, pivot), series.slice(pivot, series.len()))
            }
            SplitMethod::Fixed { train_periods, test_periods } => (
                series.slice(0, *train_periods),
                series.slice(*train_periods, *train_periods + *test_periods),
            ),
        };

        let cap = |s: BarSeries| match self.max_bars {
            Some(max) => s.slice(0, max),
            None => s,
        };
        SplitPair { train: cap(train), test: cap(test) }
    }

    /// Raises when train and test carry identical content. Guard against
    /// a configuration that silently evaluates the same data twice.
    pub fn check_distinct(pair: &SplitPair) -> Result<(), DataError> {
        let train = pair.train.fingerprint();
        let test = pair.test.fingerprint();
        if train == test {
            return Err(DataError::SplitsIdentical { fingerprint: train });
        }
        Ok(())
    }
}
