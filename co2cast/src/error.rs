//! Error types.

#[derive(thiserror::Error, Debug)]
pub enum Co2castError {
    #[error("Wrapped anyhow error: {0}")]
    AnyhowError(#[from] anyhow::Error),
    #[error("model must be one of: pop-trend, co2-gdp (got '{0}')")]
    InvalidModel(String),
    #[error("Raw source file not found: {0}")]
    MissingSourceFile(String),
    #[error("Column not found: {0}")]
    MissingColumn(String),
    #[error("Country not found in panel: {0}")]
    UnknownCountry(String),
    #[error("Duplicate (country, year) keys in '{table}': {count} duplicated rows")]
    DuplicateKeys { table: String, count: usize },
    #[error("Not enough complete observations to fit the model: {0}")]
    InsufficientData(usize),
    #[error("Sampler failed: {0}")]
    SamplerFailure(String),
    #[error("Missing value required for forecasting: {0}")]
    MissingValue(String),
    #[error("Invalid trace file: {0}")]
    TraceFormat(String),
    #[error("Plotting failed: {0}")]
    PlotError(String),
    #[error("Wrapped polars error: {0}")]
    PolarsError(#[from] polars::error::PolarsError),
    #[error("Wrapped IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Wrapped serde JSON error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
}

pub type Co2castResult<T> = Result<T, Co2castError>;
