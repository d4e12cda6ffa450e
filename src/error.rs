use thiserror::Error;

use crate::config::ConfigError;
use crate::handler_registry::HandlerError;
use crate::mount::MountError;
use crate::platform::PlatformError;
use crate::sync::SyncError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("Mount error: {0}")]
    Mount(#[from] MountError),
    // data pushed into host state
    #[error("Data sync error: {0}")]
    Sync(#[from] SyncError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error raised by user code (component functions, event handlers, effects).
    #[error("{0}")]
    User(String),

    /// An error annotated with the tag of the definition it originated from.
    #[error("{tag} {source}")]
    Tagged {
        tag: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type MiniResult<T> = Result<T, Error>;

impl Error {
    pub fn user<S: Into<String>>(message: S) -> Self {
        Error::User(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }

    /// Prefixes the error with a definition tag. Already tagged errors are left alone
    /// so nested definitions do not stack tags.
    pub fn tagged(self, tag: &str) -> Self {
        match self {
            Error::Tagged { .. } => self,
            other => Error::Tagged {
                tag: tag.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Strips any tag and returns the underlying error.
    pub fn root(&self) -> &Error {
        match self {
            Error::Tagged { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_message_starts_with_tag() {
        let err = Error::user("boom").tagged("[page/Index]");
        assert_eq!(err.to_string(), "[page/Index] boom");
    }

    #[test]
    fn test_tagging_is_not_stacked() {
        let err = Error::user("boom").tagged("[page/A]").tagged("[page/B]");
        assert_eq!(err.to_string(), "[page/A] boom");
        assert!(matches!(err.root(), Error::User(_)));
    }
}
