use thiserror::Error;

/// Errors surfaced by the choropleth pipeline.
///
/// None of these are retried. Partial binding mismatches are not errors; they
/// are reported through [`crate::binder::BindReport`].
#[derive(Error, Debug)]
pub enum PlotError {
    /// Geography configuration is missing required keys or has malformed values.
    #[error("configuration error: {0}")]
    ConfigValidation(String),

    /// User data could not be joined onto the geometry.
    #[error("data binding error: {0}")]
    Binding(String),

    /// Geometry source is unreachable and not cached.
    #[error("geometry data unavailable: {0}")]
    DataUnavailable(String),

    /// Geometry source exists locally but cannot be read.
    #[error("geometry source error: {0}")]
    GeometrySource(String),

    /// Drawing or encoding the figure failed.
    #[error("render error: {0}")]
    Render(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlotError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        PlotError::ConfigValidation(msg.into())
    }

    pub(crate) fn binding(msg: impl Into<String>) -> Self {
        PlotError::Binding(msg.into())
    }
}

impl From<serde_yaml::Error> for PlotError {
    fn from(e: serde_yaml::Error) -> Self {
        PlotError::ConfigValidation(e.to_string())
    }
}

impl From<csv::Error> for PlotError {
    fn from(e: csv::Error) -> Self {
        PlotError::Binding(format!("failed to read tabular data: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, PlotError>;
