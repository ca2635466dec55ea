//! Error types for the data access layer.

use std::error::Error;
use std::fmt::{self, Display, Formatter};

/// Result alias for data layer operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised by the data access layer.
#[derive(Debug)]
pub enum DataError {
    /// A database operation failed.
    QueryFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying SQL error.
        source: sqlx::Error,
    },
    /// The requested row does not exist.
    NotFound {
        /// Entity name.
        entity: &'static str,
    },
    /// A seeded built-in row may only be disabled, never removed or reshaped.
    SeedProtected,
}

impl DataError {
    /// Wrap an `sqlx` error with the failing operation's identifier.
    pub fn query(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::QueryFailed { operation, source }
    }
}

impl Display for DataError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueryFailed { operation, .. } => {
                write!(formatter, "database operation '{operation}' failed")
            }
            Self::NotFound { entity } => write!(formatter, "{entity} not found"),
            Self::SeedProtected => formatter.write_str("built-in rows cannot be deleted"),
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::QueryFailed { source, .. } => Some(source),
            Self::NotFound { .. } | Self::SeedProtected => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_error_display_and_source() {
        let query = DataError::query("config.set")(sqlx::Error::RowNotFound);
        assert_eq!(query.to_string(), "database operation 'config.set' failed");
        assert!(query.source().is_some());

        let missing = DataError::NotFound { entity: "effect" };
        assert_eq!(missing.to_string(), "effect not found");
        assert!(missing.source().is_none());

        assert_eq!(
            DataError::SeedProtected.to_string(),
            "built-in rows cannot be deleted"
        );
    }
}
