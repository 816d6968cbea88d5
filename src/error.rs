// Error taxonomy shared by the loader, encoder, model and reporting layers.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    /// The raw dataset could not be retrieved or contained no usable rows.
    #[error("dataset unavailable: {0}")]
    DataUnavailable(String),

    /// The filter criteria selected zero records.
    #[error("filter criteria selected no students")]
    EmptyCohort,

    /// Too few records, or a constant target, to fit a regression.
    #[error("insufficient data to fit model: {0}")]
    InsufficientData(String),

    /// An encoded row was built against a schema other than the model's.
    #[error("encoding schema {found:#x} does not match model schema {expected:#x}")]
    SchemaMismatch { expected: u64, found: u64 },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("model error: {0}")]
    Linfa(#[from] linfa::Error),

    #[error("trend line fit failed: {0}")]
    Linear(#[from] linfa_linear::LinearError<f64>),

    #[error("chart rendering failed: {0}")]
    Plot(String),
}

pub type Result<T> = std::result::Result<T, RiskError>;
