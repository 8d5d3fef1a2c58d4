use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum RepaintError {
    #[error("worker has quit")]
    Quit,

    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("worker task failed: {0}")]
    Join(String),
}

/// Error returned by a host render function.
///
/// `Cancelled` is not a failure: it is how a render function reports that it
/// observed the cancellation flag at a checkpoint and stopped early.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render cancelled")]
    Cancelled,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl RenderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RenderError::Cancelled)
    }
}
