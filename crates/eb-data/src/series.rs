use eb_types::hash::{fnv1a, hex};
use eb_types::{Bar, DataError, Symbol};

/// Time-sorted bar history for one symbol.
///
/// Construction validates monotonic non-decreasing timestamps; absent
/// bars are simply absent, never interpolated.
#[derive(Debug, Clone, PartialEq)]
pub struct BarSeries {
    symbol: Symbol,
    bars: Vec<Bar>,
}

impl BarSeries {
    pub fn from_bars(symbol: Symbol, bars: Vec<Bar>) -> Result<Self, DataError> {
        for (row, pair) in bars.windows(2).enumerate() {
            if pair[1].timestamp < pair[0].timestamp {
                return Err(DataError::NonMonotonic {
                    symbol: symbol.to_string(),
                    row: row + 1,
                });
            }
        }
        Ok(Self { symbol, bars })
    }

    /// An empty series, useful as the degenerate split.
    pub fn empty(symbol: Symbol) -> Self {
        Self { symbol, bars: Vec::new() }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    /// Contiguous sub-series; `range` is clamped to the available rows.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.bars.len());
        let start = start.min(end);
        Self {
            symbol: self.symbol.clone(),
            bars: self.bars[start..end].to_vec(),
        }
    }

    /// Stable content fingerprint: first/last timestamp plus row count.
    /// Used to detect accidental train/test duplication.
    pub fn fingerprint(&self) -> String {
        let first = self
            .bars
            .first()
            .map(|b| b.timestamp.to_rfc3339())
            .unwrap_or_default();
        let last = self
            .bars
            .last()
            .map(|b| b.timestamp.to_rfc3339())
            .unwrap_or_default();
        let count = self.bars.len().to_string();
        hex(fnv1a(&[self.symbol.as_str(), &first, &last, &count]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn bar(day: u32) -> Bar {
        let ts = Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap();
        Bar::new(Symbol::from("X"), ts, dec!(100), dec!(101), dec!(99), dec!(100), dec!(1000))
    }

    #[test]
    fn accepts_sorted_bars() {
        let series = BarSeries::from_bars(Symbol::from("X"), vec![bar(1), bar(2), bar(2)]).unwrap();
        assert_eq!(series.len(), 3);
    }

    #[test]
    fn rejects_out_of_order_bars() {
        let err = BarSeries::from_bars(Symbol::from("X"), vec![bar(2), bar(1)]).unwrap_err();
        match err {
            DataError::NonMonotonic { row, .. } => assert_eq!(row, 1),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn slice_clamps_range() {
        let series = BarSeries::from_bars(Symbol::from("X"), vec![bar(1), bar(2), bar(3)]).unwrap();
        let tail = series.slice(2, 10);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail.get(0).unwrap().timestamp, bar(3).timestamp);
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let a = BarSeries::from_bars(Symbol::from("X"), vec![bar(1), bar(2)]).unwrap();
        let b = BarSeries::from_bars(Symbol::from("X"), vec![bar(1), bar(3)]).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a.fingerprint());
    }
}
