use std::sync::Arc;

use chrono::NaiveDateTime;
use tracing::{info, warn};

use super::blacklist::BlacklistService;
use super::domain::{
    Clock, Draft, DraftForm, IdentityForm, SystemClock, TestId, TestRecord, TestStatus,
    MIN_NON_WS_LENGTH,
};
use super::export::{render_csv, EXPORT_FILE_NAME};
use super::gate::AdmissionGate;
use super::repository::{IntakeRepository, Registration, RepositoryError};

/// Accepted final submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    pub submitted_at: NaiveDateTime,
    pub char_count: usize,
}

/// CSV backup produced by [`WriterTestService::export_and_reset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportBundle {
    pub file_name: &'static str,
    pub csv: String,
    pub cleared: usize,
}

/// Applicant lifecycle: register, draft, submit, review, plus the bulk
/// export/reset operations guarded by the admission gate.
pub struct WriterTestService<R> {
    repository: Arc<R>,
    clock: Arc<dyn Clock>,
    gate: AdmissionGate<R>,
    blacklist: BlacklistService<R>,
}

impl<R> WriterTestService<R>
where
    R: IntakeRepository + 'static,
{
    pub fn new(repository: Arc<R>) -> Self {
        Self::with_clock(repository, Arc::new(SystemClock))
    }

    pub fn with_clock(repository: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        let gate = AdmissionGate::new(Arc::clone(&repository));
        let blacklist = BlacklistService::new(Arc::clone(&repository), Arc::clone(&clock));
        Self {
            repository,
            clock,
            gate,
            blacklist,
        }
    }

    pub fn gate(&self) -> &AdmissionGate<R> {
        &self.gate
    }

    pub fn blacklist(&self) -> &BlacklistService<R> {
        &self.blacklist
    }

    /// Starts (or resumes) a test for the submitted identity.
    pub fn register(&self, form: &IdentityForm) -> Result<Registration, IntakeError> {
        if !self.gate.is_open()? {
            return Err(IntakeError::Closed);
        }

        let identity = form.identity().ok_or(IntakeError::InvalidInput)?;

        if self.blacklist.is_blacklisted(&identity)? {
            warn!(name = %identity.name, birth_year = %identity.birth_year, "blacklisted registration refused");
            return Err(IntakeError::Blacklisted);
        }

        let registration = self
            .repository
            .find_or_create(&identity, self.clock.now())?;
        if registration.created {
            info!(test_id = %registration.record.id, name = %identity.name, "test registered");
        } else {
            info!(test_id = %registration.record.id, "test resumed");
        }
        Ok(registration)
    }

    /// Stores work in progress. The minimum length is not enforced here.
    pub fn save_draft(&self, form: &DraftForm) -> Result<usize, IntakeError> {
        let id = TestId::from_raw(form.test_id).ok_or(IntakeError::NoTestId)?;
        let draft = Draft::new(form.title.as_deref(), form.body.as_deref());

        if !self.repository.save_draft(id, &draft)? {
            return Err(IntakeError::NotFound);
        }
        Ok(draft.char_count)
    }

    /// Final submission. Short bodies are rejected before anything is written.
    pub fn submit(&self, form: &DraftForm) -> Result<SubmissionReceipt, IntakeError> {
        let id = TestId::from_raw(form.test_id).ok_or(IntakeError::NoTestId)?;
        let draft = Draft::new(form.title.as_deref(), form.body.as_deref());

        if draft.char_count < MIN_NON_WS_LENGTH {
            return Err(IntakeError::TooShort {
                char_count: draft.char_count,
                min_required: MIN_NON_WS_LENGTH,
            });
        }

        let submitted_at = self.clock.now();
        if !self
            .repository
            .record_submission(id, &draft, submitted_at)?
        {
            return Err(IntakeError::NotFound);
        }

        info!(test_id = %id, char_count = draft.char_count, "test submitted");
        Ok(SubmissionReceipt {
            submitted_at,
            char_count: draft.char_count,
        })
    }

    /// Looks up a record; views decide how much of it to expose.
    pub fn get(&self, id: Option<TestId>) -> Result<TestRecord, IntakeError> {
        let id = id.ok_or(IntakeError::NoTestId)?;
        self.repository.fetch(id)?.ok_or(IntakeError::NotFound)
    }

    /// Every record, newest first.
    pub fn list(&self) -> Result<Vec<TestRecord>, IntakeError> {
        Ok(self.repository.list()?)
    }

    /// Overwrites the review status. Any status may follow any other.
    pub fn update_status(
        &self,
        id: Option<TestId>,
        status: Option<&str>,
    ) -> Result<TestStatus, IntakeError> {
        let id = id.ok_or(IntakeError::InvalidInput)?;
        let status = status
            .ok_or(IntakeError::InvalidInput)?
            .parse::<TestStatus>()
            .map_err(|_| IntakeError::InvalidInput)?;

        self.repository.update_status(id, status)?;
        info!(test_id = %id, %status, "test status updated");
        Ok(status)
    }

    pub fn delete(&self, id: Option<TestId>) -> Result<(), IntakeError> {
        let id = id.ok_or(IntakeError::InvalidInput)?;
        if self.repository.delete(id)? {
            info!(test_id = %id, "test deleted");
        }
        Ok(())
    }

    /// Backs every record up as CSV and clears the table, in one transaction.
    pub fn export_and_reset(&self) -> Result<ExportBundle, IntakeError> {
        self.ensure_gate_closed()?;

        let mut csv = None;
        let cleared = self.repository.drain(&mut |records| {
            let rendered =
                render_csv(records).map_err(|err| RepositoryError::Export(err.to_string()))?;
            csv = Some(rendered);
            Ok(())
        })?;
        let csv = csv.ok_or_else(|| {
            RepositoryError::Export("repository skipped the export step".to_string())
        })?;

        info!(cleared, "test records exported and reset");
        Ok(ExportBundle {
            file_name: EXPORT_FILE_NAME,
            csv,
            cleared,
        })
    }

    pub fn delete_all(&self) -> Result<usize, IntakeError> {
        self.ensure_gate_closed()?;

        let cleared = self.repository.drain(&mut |_| Ok(()))?;
        info!(cleared, "all test records deleted");
        Ok(cleared)
    }

    fn ensure_gate_closed(&self) -> Result<(), IntakeError> {
        if self.gate.is_open()? {
            return Err(IntakeError::GateOpen);
        }
        Ok(())
    }
}

/// Error raised by the intake services.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("required fields are missing or blank")]
    InvalidInput,
    #[error("no test id supplied")]
    NoTestId,
    #[error("registration is closed")]
    Closed,
    #[error("close the test before running bulk operations")]
    GateOpen,
    #[error("identity is blacklisted")]
    Blacklisted,
    #[error("submission too short ({char_count} of {min_required} characters)")]
    TooShort {
        char_count: usize,
        min_required: usize,
    },
    #[error("test record not found")]
    NotFound,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl IntakeError {
    /// Stable machine-readable code used in response envelopes.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::NoTestId => "no_test_id",
            Self::Closed => "closed",
            Self::GateOpen => "test_open",
            Self::Blacklisted => "blacklisted",
            Self::TooShort { .. } => "too_short",
            Self::NotFound => "not_found",
            Self::Repository(_) => "storage_error",
        }
    }
}
