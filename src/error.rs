use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Data not loaded: {0}")]
    NotLoaded(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("No input files matching *.{extension} in {dir}")]
    NoInputFiles { dir: String, extension: String },

    #[error("Schema mismatch in {file}: {detail}")]
    SchemaMismatch { file: String, detail: String },

    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("{0}")]
    General(String),
}

pub type Result<T> = std::result::Result<T, ReportError>;

#[cfg(feature = "python")]
impl From<ReportError> for pyo3::PyErr {
    fn from(err: ReportError) -> pyo3::PyErr {
        pyo3::exceptions::PyRuntimeError::new_err(err.to_string())
    }
}

#[cfg(feature = "python")]
impl From<pyo3::PyErr> for ReportError {
    fn from(err: pyo3::PyErr) -> Self {
        ReportError::General(err.to_string())
    }
}
