use std::sync::Arc;

use tracing::info;

use super::domain::{BlacklistEntry, Clock, Identity, IdentityForm, TestId};
use super::repository::{BlacklistRepository, RepositoryError, TestRepository};
use super::service::IntakeError;

/// Request to flag an identity, either copied from a test record or typed in.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistAddForm {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub identity: IdentityForm,
}

/// Identities barred from registering. Matching is exact on all three fields.
pub struct BlacklistService<R> {
    repository: Arc<R>,
    clock: Arc<dyn Clock>,
}

impl<R> Clone for BlacklistService<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<R> BlacklistService<R>
where
    R: TestRepository + BlacklistRepository + 'static,
{
    pub fn new(repository: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    pub fn is_blacklisted(&self, identity: &Identity) -> Result<bool, RepositoryError> {
        self.repository.is_blacklisted(identity)
    }

    /// Flags `identity`. Repeated flags for the same identity are kept side by side.
    pub fn add(&self, identity: &Identity, reason: &str) -> Result<(), IntakeError> {
        if !identity.is_complete() {
            return Err(IntakeError::InvalidInput);
        }

        let reason = reason.trim();
        self.repository
            .add_blacklist(identity, reason, self.clock.now().date())?;
        info!(name = %identity.name, birth_year = %identity.birth_year, "identity blacklisted");
        Ok(())
    }

    /// Flags the identity stored on an existing test record.
    pub fn add_from_test(&self, id: TestId, reason: &str) -> Result<Identity, IntakeError> {
        let record = self
            .repository
            .fetch(id)?
            .ok_or(IntakeError::NotFound)?;
        self.add(&record.identity, reason)?;
        Ok(record.identity)
    }

    /// Handles both shapes of the add request; a test id wins over raw fields.
    pub fn add_from_form(&self, form: &BlacklistAddForm) -> Result<Identity, IntakeError> {
        let reason = form.reason.as_deref().unwrap_or_default();
        match TestId::from_raw(form.id) {
            Some(id) => self.add_from_test(id, reason),
            None => {
                let identity = form.identity.identity().ok_or(IntakeError::InvalidInput)?;
                self.add(&identity, reason)?;
                Ok(identity)
            }
        }
    }

    /// Removes every entry for `identity`. Unknown identities are a no-op.
    pub fn remove(&self, identity: &Identity) -> Result<usize, IntakeError> {
        if !identity.is_complete() {
            return Err(IntakeError::InvalidInput);
        }

        let removed = self.repository.remove_blacklist(identity)?;
        if removed > 0 {
            info!(name = %identity.name, removed, "blacklist entries removed");
        }
        Ok(removed)
    }

    pub fn list(&self) -> Result<Vec<BlacklistEntry>, RepositoryError> {
        self.repository.list_blacklist()
    }
}
