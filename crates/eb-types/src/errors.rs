use thiserror::Error;

/// Configuration problems. Always fatal before a run starts (exit 1).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing configuration section: {name}")]
    MissingSection { name: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Contradictory options: {message}")]
    Contradictory { message: String },

    #[error("Unknown parameter {name:?} for {target}")]
    UnknownParameter { target: String, name: String },

    #[error("Unknown {category} {name:?}")]
    UnknownComponent { category: String, name: String },

    #[error("Configuration parse error: {0}")]
    Parse(String),
}

/// Input data problems. Fatal for the affected run; an optimizer keeps
/// going with the remaining combinations.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Malformed row at line {line}: {message}")]
    MalformedRow { line: usize, message: String },

    #[error("Missing required column: {name}")]
    MissingColumn { name: String },

    #[error("Non-monotonic timestamps for {symbol} at row {row}")]
    NonMonotonic { symbol: String, row: usize },

    #[error("Invalid split: {message}")]
    InvalidSplit { message: String },

    #[error("Train and test splits are identical (fingerprint {fingerprint})")]
    SplitsIdentical { fingerprint: String },

    #[error("No data for symbol {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contract violations inside the event pipeline. Recorded in the
/// per-run dispatch log; the run continues flagged inconsistent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("Fill references unknown order {order_id}")]
    UnknownOrder { order_id: u64 },

    #[error("Fill does not match order {order_id}: {message}")]
    FillMismatch { order_id: u64, message: String },

    #[error("Close fill for {symbol} has no matching open trade")]
    UnmatchedClose { symbol: String },

    #[error("Duplicate fill for order {order_id}")]
    DuplicateFill { order_id: u64 },

    #[error("No market data for {symbol}")]
    NoMarketData { symbol: String },

    #[error("Strategy error: {message}")]
    Strategy { message: String },

    #[error("Handler error: {message}")]
    Handler { message: String },
}

/// Failures of a whole run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("Run exceeded its wall-clock limit after {bars} bars")]
    Timeout { bars: usize },

    #[error("Run aborted at bar {bar_index} ({symbol}): {message}")]
    Aborted {
        bar_index: usize,
        symbol: String,
        message: String,
    },
}

/// Top-level error for EmberBack operations.
#[derive(Error, Debug)]
pub enum EbError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for EmberBack operations.
pub type EbResult<T> = Result<T, EbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_conversion_preserves_kind() {
        let err: EbError = PipelineError::UnknownOrder { order_id: 7 }.into();
        match err {
            EbError::Pipeline(PipelineError::UnknownOrder { order_id }) => assert_eq!(order_id, 7),
            other => panic!("expected pipeline error, got {other:?}"),
        }
    }

    #[test]
    fn display_includes_context() {
        let err = DataError::NonMonotonic { symbol: "X".into(), row: 12 };
        assert!(err.to_string().contains("X"));
        assert!(err.to_string().contains("12"));
    }
}
