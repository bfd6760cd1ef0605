use thiserror::Error;

/// Errors surfaced by [`QueueInspector`](crate::QueueInspector) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller supplied argument was rejected before any remote call was made.
    #[error("invalid argument `{name}`: {message}")]
    InvalidArgument { name: &'static str, message: String },

    /// The operation observed its cancellation token.
    #[error("operation was cancelled")]
    Cancelled,

    /// Failure reported by the broker or its transport, passed through unchanged.
    #[error(transparent)]
    Broker(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn at_least_one(name: &'static str) -> Self {
        Error::InvalidArgument {
            name,
            message: format!("{name} must be greater than or equal to 1"),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
