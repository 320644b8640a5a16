use crate::outcome::MatchId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reasons a rating update can be rejected or fail.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The submission is malformed or does not match the scheduled match.
    #[error("invalid submission: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// Another submission for the same match is in progress.
    #[error("match {0} is already being scored, try again")]
    Conflict(MatchId),

    /// A database read, write or migration failed; any open transaction was rolled back.
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    /// An outbound collaborator could not be reached.
    ///
    /// Only ever reported out-of-band: it never fails an update that already committed.
    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },
}

impl Error {
    pub fn match_not_found(id: MatchId) -> Self {
        Self::NotFound(format!("match {id}"))
    }

    /// Whether the caller may resubmit the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Persistence(_))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(Error::Conflict(3.into()).is_retryable());
        assert!(Error::Persistence(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(Error::from(migration_failure()).is_retryable());
        assert!(!Error::Validation("empty team".into()).is_retryable());
        assert!(!Error::match_not_found(3.into()).is_retryable());
    }

    fn migration_failure() -> sqlx::Error {
        sqlx::Error::Migrate(Box::new(sqlx::migrate::MigrateError::VersionMissing(1)))
    }

    #[test]
    fn migration_failures_are_persistence_failures() {
        assert!(matches!(
            Error::from(migration_failure()),
            Error::Persistence(sqlx::Error::Migrate(_))
        ));
    }

    #[test]
    fn messages() {
        assert_eq!(
            Error::match_not_found(12.into()).to_string(),
            "match 12 not found"
        );
        assert_eq!(
            Error::Conflict(12.into()).to_string(),
            "match 12 is already being scored, try again"
        );
    }
}
