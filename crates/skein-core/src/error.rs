/// Internal signal that the current run has ended.
///
/// Returned from every suspension point once the scheduler stops a run;
/// entity threads propagate it with `?` and swallow it at their top frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("execution canceled")]
pub struct ExecutionCanceled;

/// Result of a user action or any runtime API call made from one.
pub type ActionResult<T = ()> = Result<T, ExecutionCanceled>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
