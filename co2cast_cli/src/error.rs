use co2cast::error::Co2castError;
use polars::error::PolarsError;

#[derive(thiserror::Error, Debug)]
pub enum Co2castCliError {
    #[error("Anyhow error")]
    Anyhow(#[from] anyhow::Error),
    #[error("serde JSON error")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("polars error")]
    PolarsError(#[from] PolarsError),
    #[error("co2cast error")]
    Co2castError(#[from] Co2castError),
    #[error("std IO error")]
    IOError(#[from] std::io::Error),
}

pub type Co2castCliResult<T> = Result<T, Co2castCliError>;
