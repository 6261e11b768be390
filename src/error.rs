//! Error types for the mock server core.

/// Errors raised while configuring or driving the mock server.
///
/// Match failures are not errors: they are recorded in the request log and
/// an unmatched request is reported as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum MockError {
    #[error("Scenario '{0}' is already registered")]
    DuplicateScenario(String),
    #[error("Scenario '{0}' not found")]
    UnknownScenario(String),
    #[error("Invalid default for state param '{key}' in scenario '{scenario}': {reason}")]
    InvalidStateDefault {
        scenario: String,
        key: String,
        reason: String,
    },
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Template error: {0}")]
    Template(String),
    /// A user-supplied response function or hook failed.
    #[error("Response action failed: {0}")]
    Action(anyhow::Error),
}

pub type Result<T, E = MockError> = std::result::Result<T, E>;
