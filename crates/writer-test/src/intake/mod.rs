//! Writing-test intake: applicant registration, the draft/submit lifecycle,
//! administrator review, the blacklist and the admission gate that guards
//! registration and bulk resets.

pub mod auth;
pub mod blacklist;
pub mod domain;
pub mod export;
pub mod gate;
pub mod repository;
pub mod router;
pub mod service;
pub mod sqlite;

#[cfg(test)]
mod tests;

pub use auth::{AdminGuard, AdminSession, AuthError, SESSION_TTL};
pub use blacklist::{BlacklistAddForm, BlacklistService};
pub use domain::{
    char_count, BlacklistEntry, Clock, Draft, DraftForm, Identity, IdentityForm, SystemClock,
    TestId, TestRecord, TestStatus, MIN_NON_WS_LENGTH,
};
pub use export::{render_csv, EXPORT_COLUMNS, EXPORT_FILE_NAME};
pub use gate::AdmissionGate;
pub use repository::{
    BlacklistRepository, GateRepository, IntakeRepository, Registration, RepositoryError,
    TestRepository,
};
pub use router::{intake_router, ApiError, IntakeState};
pub use service::{ExportBundle, IntakeError, SubmissionReceipt, WriterTestService};
pub use sqlite::SqliteIntakeRepository;
