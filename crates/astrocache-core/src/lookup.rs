//! Collaborator contract for single-object remote lookups.

use astrocache_domain::PropertyRecord;

#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found(PropertyRecord),
    /// The service answered with zero matching rows.
    NotFound,
}

impl LookupOutcome {
    #[must_use]
    pub fn is_found(&self) -> bool {
        matches!(self, LookupOutcome::Found(_))
    }

    #[must_use]
    pub fn into_record(self) -> Option<PropertyRecord> {
        match self {
            LookupOutcome::Found(record) => Some(record),
            LookupOutcome::NotFound => None,
        }
    }
}

/// Failures worth retrying. "Not found" is never an error.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("[AC100] lookup transport failed: {0}")]
    Transport(String),
    #[error("[AC101] lookup response malformed: {0}")]
    Protocol(String),
}

/// Performs one named-object lookup against a remote service.
///
/// Implementations enforce their own request timeout.
pub trait RemoteLookupClient: Send + Sync {
    fn lookup(&self, name: &str) -> Result<LookupOutcome, LookupError>;
}

impl<T: RemoteLookupClient + ?Sized> RemoteLookupClient for Box<T> {
    fn lookup(&self, name: &str) -> Result<LookupOutcome, LookupError> {
        (**self).lookup(name)
    }
}

impl<T: RemoteLookupClient + ?Sized> RemoteLookupClient for std::sync::Arc<T> {
    fn lookup(&self, name: &str) -> Result<LookupOutcome, LookupError> {
        (**self).lookup(name)
    }
}
