use std::sync::Arc;

use tracing::info;

use super::repository::{GateRepository, RepositoryError};

/// Open/closed switch for registration and destructive bulk operations.
///
/// Reads go straight to storage every time; there is no cached copy.
pub struct AdmissionGate<R> {
    repository: Arc<R>,
}

impl<R> Clone for AdmissionGate<R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
        }
    }
}

impl<R> AdmissionGate<R>
where
    R: GateRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    pub fn is_open(&self) -> Result<bool, RepositoryError> {
        self.repository.is_test_open()
    }

    pub fn set_open(&self, open: bool) -> Result<(), RepositoryError> {
        self.repository.set_test_open(open)?;
        info!(test_open = open, "admission gate updated");
        Ok(())
    }
}
