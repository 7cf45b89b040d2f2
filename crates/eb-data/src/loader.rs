use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use eb_types::{Bar, DataError, Symbol};

use crate::series::BarSeries;

/// CSV bar loader with a configurable timestamp column and format.
///
/// Required columns: timestamp, open, high, low, close, volume.
/// Column lookup is case-insensitive; rows must already be time-sorted
/// (validated by [`BarSeries::from_bars`]).
#[derive(Debug, Clone)]
pub struct CsvBarLoader {
    date_column: String,
    date_format: String,
}

impl CsvBarLoader {
    pub fn new(date_column: impl Into<String>, date_format: impl Into<String>) -> Self {
        Self {
            date_column: date_column.into(),
            date_format: date_format.into(),
        }
    }

    pub fn load<P: AsRef<Path>>(&self, path: P, symbol: &Symbol) -> Result<BarSeries, DataError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(path.as_ref())
            .map_err(|e| match e.into_kind() {
                csv::ErrorKind::Io(io) => DataError::Io(io),
                other => DataError::MalformedRow { line: 0, message: format!("{other:?}") },
            })?;

        let headers = reader
            .headers()
            .map_err(|e| DataError::MalformedRow { line: 1, message: e.to_string() })?
            .clone();

        let ts_col = self.find_column(&headers, &self.date_column)?;
        let open_col = self.find_column(&headers, "open")?;
        let high_col = self.find_column(&headers, "high")?;
        let low_col = self.find_column(&headers, "low")?;
        let close_col = self.find_column(&headers, "close")?;
        let volume_col = self.find_column(&headers, "volume")?;

        let mut bars = Vec::new();
        for (index, record) in reader.records().enumerate() {
            // Header occupies line 1.
            let line = index + 2;
            let record = record.map_err(|e| DataError::MalformedRow { line, message: e.to_string() })?;

            let timestamp = self.parse_timestamp(field(&record, ts_col, line)?, line)?;
            let bar = Bar::new(
                symbol.clone(),
                timestamp,
                parse_decimal(field(&record, open_col, line)?, "open", line)?,
                parse_decimal(field(&record, high_col, line)?, "high", line)?,
                parse_decimal(field(&record, low_col, line)?, "low", line)?,
                parse_decimal(field(&record, close_col, line)?, "close", line)?,
                parse_decimal(field(&record, volume_col, line)?, "volume", line)?,
            );
            bars.push(bar);
        }

        info!(symbol = %symbol, rows = bars.len(), "loaded bar series");
        BarSeries::from_bars(symbol.clone(), bars)
    }

    fn find_column(&self, headers: &csv::StringRecord, name: &str) -> Result<usize, DataError> {
        headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| DataError::MissingColumn { name: name.to_string() })
    }

    fn parse_timestamp(&self, raw: &str, line: usize) -> Result<DateTime<Utc>, DataError> {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, &self.date_format) {
            return Ok(dt.and_utc());
        }
        // Date-only formats map to midnight UTC.
        if let Ok(date) = NaiveDate::parse_from_str(raw, &self.date_format) {
            if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                return Ok(midnight.and_utc());
            }
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        Err(DataError::MalformedRow {
            line,
            message: format!("unparseable timestamp {raw:?} (format {:?})", self.date_format),
        })
    }
}

impl Default for CsvBarLoader {
    fn default() -> Self {
        Self::new("timestamp", "%Y-%m-%d")
    }
}

fn field<'r>(record: &'r csv::StringRecord, index: usize, line: usize) -> Result<&'r str, DataError> {
    record.get(index).ok_or_else(|| DataError::MalformedRow {
        line,
        message: format!("missing field {index}"),
    })
}

fn parse_decimal(raw: &str, name: &str, line: usize) -> Result<Decimal, DataError> {
    Decimal::from_str(raw).map_err(|e| DataError::MalformedRow {
        line,
        message: format!("bad {name} value {raw:?}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_date_only_timestamps() {
        let file = write_csv(
            "timestamp,open,high,low,close,volume\n\
             2024-01-02,100,101,99,100.5,5000\n\
             2024-01-03,100.5,102,100,101,6000\n",
        );
        let loader = CsvBarLoader::default();
        let series = loader.load(file.path(), &Symbol::from("X")).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.get(0).unwrap().close.to_string(), "100.5");
    }

    #[test]
    fn loads_datetime_format() {
        let file = write_csv(
            "Date,Open,High,Low,Close,Volume\n\
             2024-01-02 09:30:00,100,101,99,100.5,5000\n",
        );
        let loader = CsvBarLoader::new("Date", "%Y-%m-%d %H:%M:%S");
        let series = loader.load(file.path(), &Symbol::from("X")).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.get(0).unwrap().timestamp.to_rfc3339(), "2024-01-02T09:30:00+00:00");
    }

    #[test]
    fn missing_column_is_reported() {
        let file = write_csv("timestamp,open,high,low,volume\n2024-01-02,1,1,1,1\n");
        let err = CsvBarLoader::default().load(file.path(), &Symbol::from("X")).unwrap_err();
        match err {
            DataError::MissingColumn { name } => assert_eq!(name, "close"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn malformed_row_names_the_line() {
        let file = write_csv(
            "timestamp,open,high,low,close,volume\n\
             2024-01-02,100,101,99,100.5,5000\n\
             2024-01-03,abc,102,100,101,6000\n",
        );
        let err = CsvBarLoader::default().load(file.path(), &Symbol::from("X")).unwrap_err();
        match err {
            DataError::MalformedRow { line, .. } => assert_eq!(line, 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn out_of_order_rows_are_rejected() {
        let file = write_csv(
            "timestamp,open,high,low,close,volume\n\
             2024-01-03,100,101,99,100,5000\n\
             2024-01-02,100,101,99,100,5000\n",
        );
        let err = CsvBarLoader::default().load(file.path(), &Symbol::from("X")).unwrap_err();
        assert!(matches!(err, DataError::NonMonotonic { .. }));
    }
}
