// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

/// The boxed error type producers may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An error returned when calling a cached function.
///
/// A single execution is shared by every caller that joined it, so the error is cheaply
/// clonable and each caller receives the same failure.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The arguments could not be turned into a cache key.
    #[error("failed to derive a cache key for '{name}'")]
    Key {
        /// The name of the cached function.
        name: Arc<str>,
        /// The underlying serialization error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The producer function failed.
    #[error("producer for '{name}' failed")]
    Producer {
        /// The name of the cached function.
        name: Arc<str>,
        /// The error returned by the producer.
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// The execution ended without settling, for example because the producer panicked.
    #[error("execution for '{name}' ended without a result")]
    Abandoned {
        /// The name of the cached function.
        name: Arc<str>,
    },
}

impl Error {
    /// Returns the name of the cached function that failed.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Key { name, .. } | Self::Producer { name, .. } | Self::Abandoned { name } => name,
        }
    }

    /// Returns `true` if the producer itself failed.
    #[must_use]
    pub fn is_producer(&self) -> bool {
        matches!(self, Self::Producer { .. })
    }

    pub(crate) fn producer(name: &Arc<str>, source: BoxError) -> Self {
        Self::Producer {
            name: Arc::clone(name),
            source: Arc::from(source),
        }
    }

    pub(crate) fn key(name: &Arc<str>, source: serde_json::Error) -> Self {
        Self::Key {
            name: Arc::clone(name),
            source: Arc::new(source),
        }
    }
}

/// An error returned when a function cannot be registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DefineError {
    /// The name collides with one of the cache's own operations.
    #[error("'{0}' is a forbidden name")]
    Reserved(String),

    /// A function with the same name is already registered.
    #[error("'{0}' is already defined in the cache")]
    Duplicate(String),

    /// The name cannot be used as a key prefix.
    #[error("'{name}' is not a valid name: {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why the name was rejected.
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn producer_error_keeps_source() {
        let name: Arc<str> = Arc::from("fetch");
        let error = Error::producer(&name, "boom".into());

        assert!(error.is_producer());
        assert_eq!(error.name(), "fetch");
        assert_eq!(error.to_string(), "producer for 'fetch' failed");
        assert_eq!(error.source().map(ToString::to_string).as_deref(), Some("boom"));
    }

    #[test]
    fn clones_share_the_source() {
        let name: Arc<str> = Arc::from("fetch");
        let error = Error::producer(&name, "boom".into());
        let clone = error.clone();

        let (Error::Producer { source: a, .. }, Error::Producer { source: b, .. }) = (&error, &clone) else {
            panic!("expected producer errors");
        };
        assert!(Arc::ptr_eq(a, b));
    }

    #[test]
    fn abandoned_display() {
        let error = Error::Abandoned { name: Arc::from("fetch") };
        assert!(!error.is_producer());
        assert_eq!(error.to_string(), "execution for 'fetch' ended without a result");
    }

    #[test]
    fn define_error_display() {
        assert_eq!(DefineError::Reserved("clear".into()).to_string(), "'clear' is a forbidden name");
        assert_eq!(
            DefineError::Duplicate("fetch".into()).to_string(),
            "'fetch' is already defined in the cache"
        );
        let invalid = DefineError::InvalidName {
            name: String::new(),
            reason: "name must not be empty",
        };
        assert_eq!(invalid.to_string(), "'' is not a valid name: name must not be empty");
    }
}
