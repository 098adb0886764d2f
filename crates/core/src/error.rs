/// Result alias that carries the custom [`MetricScoreError`] type.
pub type Result<T> = std::result::Result<T, MetricScoreError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum MetricScoreError {
    /// Malformed or incomplete metric-structure configuration. `field` names
    /// the offending configuration key so the caller can point at it.
    #[error("configuration error in `{field}`: {message}")]
    Config { field: String, message: String },
    /// A leaf's tempo curve does not span exactly its bars after it was
    /// extended and truncated.
    #[error("tempo curve spans {actual} beats but its bars span {expected}")]
    StructuralInvariant { expected: f64, actual: f64 },
    /// Envelope arguments that cannot describe a tempo curve.
    #[error("invalid tempo curve: {0}")]
    InvalidCurve(String),
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Format(#[from] std::fmt::Error),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl MetricScoreError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Creates a configuration error for `field`.
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_curve<T: Into<String>>(msg: T) -> Self {
        Self::InvalidCurve(msg.into())
    }
}

impl From<&str> for MetricScoreError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for MetricScoreError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_name_the_field() {
        let err = MetricScoreError::config("bar_lengths", "missing");
        assert_eq!(
            err.to_string(),
            "configuration error in `bar_lengths`: missing"
        );
    }

    #[test]
    fn strings_convert_into_messages() {
        let err: MetricScoreError = "boom".into();
        assert!(matches!(err, MetricScoreError::Message(ref m) if m == "boom"));
    }
}
