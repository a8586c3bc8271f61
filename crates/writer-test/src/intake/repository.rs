use chrono::{NaiveDate, NaiveDateTime};

use super::domain::{BlacklistEntry, Draft, Identity, TestId, TestRecord, TestStatus};

/// Error enumeration for storage failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("could not prepare database location: {0}")]
    Io(#[from] std::io::Error),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("export aborted: {0}")]
    Export(String),
}

/// Outcome of the registration upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub record: TestRecord,
    pub created: bool,
}

/// Persisted `test_open` flag.
pub trait GateRepository: Send + Sync {
    fn is_test_open(&self) -> Result<bool, RepositoryError>;
    fn set_test_open(&self, open: bool) -> Result<(), RepositoryError>;
}

/// Storage for applicant test records.
///
/// Mutating calls report whether a row matched so callers can decide how
/// strict to be about unknown ids.
pub trait TestRepository: Send + Sync {
    /// Returns the record for `identity`, inserting a fresh pending one when
    /// none exists. Must never create two rows for the same identity.
    fn find_or_create(
        &self,
        identity: &Identity,
        created_at: NaiveDateTime,
    ) -> Result<Registration, RepositoryError>;
    fn fetch(&self, id: TestId) -> Result<Option<TestRecord>, RepositoryError>;
    /// All records, newest id first.
    fn list(&self) -> Result<Vec<TestRecord>, RepositoryError>;
    fn save_draft(&self, id: TestId, draft: &Draft) -> Result<bool, RepositoryError>;
    fn record_submission(
        &self,
        id: TestId,
        draft: &Draft,
        submitted_at: NaiveDateTime,
    ) -> Result<bool, RepositoryError>;
    fn update_status(&self, id: TestId, status: TestStatus) -> Result<bool, RepositoryError>;
    fn delete(&self, id: TestId) -> Result<bool, RepositoryError>;
    /// Hands every record (ascending id) to `export`, then deletes them all as
    /// one unit. Nothing is deleted when `export` fails.
    fn drain(
        &self,
        export: &mut dyn FnMut(&[TestRecord]) -> Result<(), RepositoryError>,
    ) -> Result<usize, RepositoryError>;
}

/// Storage for flagged identities.
pub trait BlacklistRepository: Send + Sync {
    fn is_blacklisted(&self, identity: &Identity) -> Result<bool, RepositoryError>;
    fn add_blacklist(
        &self,
        identity: &Identity,
        reason: &str,
        created_on: NaiveDate,
    ) -> Result<(), RepositoryError>;
    /// Removes every entry matching `identity`, returning how many went away.
    fn remove_blacklist(&self, identity: &Identity) -> Result<usize, RepositoryError>;
    /// Newest entries first.
    fn list_blacklist(&self) -> Result<Vec<BlacklistEntry>, RepositoryError>;
}

/// Everything the intake services need from storage.
pub trait IntakeRepository: GateRepository + TestRepository + BlacklistRepository {}

impl<T> IntakeRepository for T where T: GateRepository + TestRepository + BlacklistRepository {}
