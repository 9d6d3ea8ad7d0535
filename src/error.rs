//! Error taxonomy for the fitter.
//!
//! Every hard failure is a [`FitError`]. Optimizer trouble is deliberately *not*
//! here: a fit that fails to converge is reported through `FitResult::status`
//! and the run carries on.

use thiserror::Error;

/// Problems found while compiling or querying the model registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("undefined name '{0}'")]
    Undefined(String),
    #[error("name '{0}' is already defined")]
    Duplicate(String),
    #[error("'{name}' is a {found}, expected a {expected}")]
    WrongKind {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("cannot parse model specification '{text}': {reason}")]
    Syntax { text: String, reason: String },
}

#[derive(Debug, Error)]
pub enum FitError {
    #[error("model composition failed: {0}")]
    Composition(#[from] CompositionError),
    #[error("efficiency undefined: pass + fail signal yield is zero")]
    ZeroTotal,
    #[error("invalid range [{lo}, {hi}]: {reason}")]
    InvalidRange { lo: f64, hi: f64, reason: String },
    #[error("invalid histogram '{name}': {reason}")]
    InvalidHistogram { name: String, reason: String },
    #[error("{0}")]
    Config(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl FitError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    /// Process exit code used by the `tnp` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            FitError::InvalidRange { .. }
            | FitError::InvalidHistogram { .. }
            | FitError::Config(_)
            | FitError::Io { .. }
            | FitError::Json { .. } => 2,
            FitError::Composition(_) => 3,
            FitError::ZeroTotal => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composition_error_names_the_identifier() {
        let err = FitError::from(CompositionError::Undefined("sigResPass".to_string()));
        assert!(err.to_string().contains("sigResPass"));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn zero_total_has_its_own_exit_code() {
        assert_eq!(FitError::ZeroTotal.exit_code(), 4);
        assert_eq!(FitError::config("bad").exit_code(), 2);
    }
}
