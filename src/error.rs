//! Error kinds raised while building, classifying and fitting a model.
use miette::Diagnostic;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    /// The equation text is empty after removing the left-hand side, or does not parse.
    #[error("invalid expression '{text}'")]
    #[diagnostic(code(modelfit::invalid_expression))]
    InvalidExpression {
        text: String,
        #[help]
        reason: Option<String>,
    },

    #[error("no independent variables were declared")]
    #[diagnostic(
        code(modelfit::invalid_independent_variables),
        help("declare at least one independent variable, for example `t`")
    )]
    InvalidIndependentVariables,

    #[error("independent variable '{name}' does not appear in the expression")]
    #[diagnostic(code(modelfit::unknown_independent_variable))]
    UnknownIndependentVariable {
        name: String,
        #[help]
        suggestion: Option<String>,
    },

    #[error("expected {expected} data columns but found {actual}")]
    #[diagnostic(
        code(modelfit::dimension_mismatch),
        help("each model component needs its own data column")
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("column {column} has {len} values but column 0 has {expected}")]
    #[diagnostic(code(modelfit::ragged_data))]
    RaggedData {
        column: usize,
        len: usize,
        expected: usize,
    },

    #[error("equation has 0 constants to fit")]
    #[diagnostic(
        code(modelfit::nothing_to_fit),
        help("equation must have at least one symbol which is not an independent variable")
    )]
    NothingToFit,

    #[error("failed to fit the model to the input data")]
    #[diagnostic(code(modelfit::fitting_failure))]
    FittingFailure {
        #[help]
        detail: String,
    },

    #[error("model result is already set: {0}")]
    #[diagnostic(
        code(modelfit::already_fitted),
        help("build a fresh model to fit again")
    )]
    AlreadyFitted(&'static str),

    #[error("invalid model state: {0}")]
    #[diagnostic(code(modelfit::invalid_state))]
    InvalidState(&'static str),

    #[error("invalid input: {0}")]
    #[diagnostic(code(modelfit::invalid_input))]
    InvalidInput(String),

    #[error(transparent)]
    #[diagnostic(code(modelfit::csv))]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    #[diagnostic(code(modelfit::io))]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_expression(text: &str, reason: impl Into<Option<String>>) -> Self {
        Error::InvalidExpression {
            text: text.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn fitting(detail: impl std::fmt::Display) -> Self {
        Error::FittingFailure {
            detail: detail.to_string(),
        }
    }

    /// Internal invariant violations abort in debug builds.
    pub(crate) fn invalid_state(msg: &'static str) -> Self {
        debug_assert!(false, "invalid model state: {msg}");
        Error::InvalidState(msg)
    }
}
