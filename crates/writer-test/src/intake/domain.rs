use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize, Serializer};

/// Minimum number of non-whitespace characters a submission must contain.
pub const MIN_NON_WS_LENGTH: usize = 2000;

/// Wire and storage format for record timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Wire and storage format for blacklist dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Counts body characters, ignoring spaces, tabs and newlines.
pub fn char_count(body: &str) -> usize {
    body.chars()
        .filter(|c| !matches!(c, ' ' | '\t' | '\n'))
        .count()
}

/// Row id of a test record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(pub i64);

impl TestId {
    /// Ids are assigned from 1 upwards; anything else counts as "no id supplied".
    pub fn from_raw(raw: Option<i64>) -> Option<Self> {
        raw.filter(|value| *value > 0).map(Self)
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Natural key of an applicant. Values are opaque and compared exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub name: String,
    pub birth_year: String,
    pub phone_last4: String,
}

impl Identity {
    /// Trims every field. Returns `None` when any field ends up blank.
    pub fn parse(name: &str, birth_year: &str, phone_last4: &str) -> Option<Self> {
        let identity = Self {
            name: name.trim().to_string(),
            birth_year: birth_year.trim().to_string(),
            phone_last4: phone_last4.trim().to_string(),
        };
        identity.is_complete().then_some(identity)
    }

    pub fn is_complete(&self) -> bool {
        !(self.name.is_empty() || self.birth_year.is_empty() || self.phone_last4.is_empty())
    }
}

/// Raw identity fields as submitted by a client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityForm {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub birth_year: Option<String>,
    #[serde(default)]
    pub phone_last4: Option<String>,
}

impl IdentityForm {
    pub fn identity(&self) -> Option<Identity> {
        Identity::parse(
            self.name.as_deref().unwrap_or_default(),
            self.birth_year.as_deref().unwrap_or_default(),
            self.phone_last4.as_deref().unwrap_or_default(),
        )
    }
}

/// Review state of a test record. Administrators may move between any states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pending,
    Pass,
    Fail,
    Return,
}

impl TestStatus {
    pub const fn ordered() -> [Self; 4] {
        [Self::Pending, Self::Pass, Self::Fail, Self::Return]
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Return => "return",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown test status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for TestStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ordered()
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| UnknownStatus(value.to_string()))
    }
}

/// Source of "now" for record timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Server local time, truncated to whole seconds like the stored format.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        let now = Local::now().naive_local();
        now.with_nanosecond(0).unwrap_or(now)
    }
}

/// One applicant's writing test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRecord {
    pub id: TestId,
    pub identity: Identity,
    pub title: Option<String>,
    pub body: Option<String>,
    pub char_count: usize,
    pub status: TestStatus,
    pub created_at: NaiveDateTime,
    pub submitted_at: Option<NaiveDateTime>,
    /// Always empty; kept for clients that still read `deadlineAt`.
    pub deadline_at: String,
}

impl TestRecord {
    pub fn registration_view(&self) -> RegistrationView {
        RegistrationView {
            test_id: self.id,
            name: self.identity.name.clone(),
            birth_year: self.identity.birth_year.clone(),
            phone_last4: self.identity.phone_last4.clone(),
            title: self.title.clone(),
            body: self.body.clone(),
            char_count: self.char_count,
            status: self.status,
            deadline_at: self.deadline_at.clone(),
            created_at: self.created_at,
            submitted_at: self.submitted_at,
        }
    }

    pub fn result_view(&self) -> ResultView {
        ResultView {
            test_id: self.id,
            name: self.identity.name.clone(),
            birth_year: self.identity.birth_year.clone(),
            phone_last4: self.identity.phone_last4.clone(),
            title: self.title.clone(),
            char_count: self.char_count,
            status: self.status,
            created_at: self.created_at,
            submitted_at: self.submitted_at,
            deadline_at: self.deadline_at.clone(),
        }
    }

    pub fn summary_view(&self) -> TestSummaryView {
        TestSummaryView {
            id: self.id,
            name: self.identity.name.clone(),
            birth_year: self.identity.birth_year.clone(),
            phone_last4: self.identity.phone_last4.clone(),
            title: self.title.clone(),
            length: self.char_count,
            status: self.status,
            created_at: self.created_at,
            submitted_at: self.submitted_at,
            deadline_at: self.deadline_at.clone(),
        }
    }

    pub fn detail_view(&self) -> TestDetailView {
        TestDetailView {
            id: self.id,
            name: self.identity.name.clone(),
            birth_year: self.identity.birth_year.clone(),
            phone_last4: self.identity.phone_last4.clone(),
            title: self.title.clone(),
            content: self.body.clone(),
            char_count: self.char_count,
            status: self.status,
            created_at: self.created_at,
            submitted_at: self.submitted_at,
            deadline_at: self.deadline_at.clone(),
        }
    }
}

/// Returned on registration so an applicant can resume a saved draft.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationView {
    pub test_id: TestId,
    pub name: String,
    pub birth_year: String,
    pub phone_last4: String,
    pub title: Option<String>,
    pub body: Option<String>,
    pub char_count: usize,
    pub status: TestStatus,
    pub deadline_at: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serialize_optional_timestamp")]
    pub submitted_at: Option<NaiveDateTime>,
}

/// Applicant-facing result lookup. Never includes the body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultView {
    pub test_id: TestId,
    pub name: String,
    pub birth_year: String,
    pub phone_last4: String,
    pub title: Option<String>,
    pub char_count: usize,
    pub status: TestStatus,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serialize_optional_timestamp")]
    pub submitted_at: Option<NaiveDateTime>,
    pub deadline_at: String,
}

/// Row of the administrator listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummaryView {
    pub id: TestId,
    pub name: String,
    pub birth_year: String,
    pub phone_last4: String,
    pub title: Option<String>,
    pub length: usize,
    pub status: TestStatus,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serialize_optional_timestamp")]
    pub submitted_at: Option<NaiveDateTime>,
    pub deadline_at: String,
}

/// Administrator detail view, including the submitted text as `content`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetailView {
    pub id: TestId,
    pub name: String,
    pub birth_year: String,
    pub phone_last4: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub char_count: usize,
    pub status: TestStatus,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(serialize_with = "serialize_optional_timestamp")]
    pub submitted_at: Option<NaiveDateTime>,
    pub deadline_at: String,
}

/// Title/body pair sent by the applicant for draft-save and submission.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftForm {
    #[serde(default)]
    pub test_id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Validated draft content with its derived character count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub title: String,
    pub body: String,
    pub char_count: usize,
}

impl Draft {
    pub fn new(title: Option<&str>, body: Option<&str>) -> Self {
        let body = body.unwrap_or_default().to_string();
        Self {
            title: title.unwrap_or_default().trim().to_string(),
            char_count: char_count(&body),
            body,
        }
    }
}

/// Flagged identity that may not register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistEntry {
    #[serde(flatten)]
    pub identity: Identity,
    pub reason: String,
    #[serde(serialize_with = "serialize_date")]
    pub created_at: NaiveDate,
}

pub fn format_timestamp(value: &NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

pub fn format_date(value: &NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

fn serialize_timestamp<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_timestamp(value))
}

fn serialize_optional_timestamp<S>(
    value: &Option<NaiveDateTime>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(value) => serialize_timestamp(value, serializer),
        None => serializer.serialize_none(),
    }
}

fn serialize_date<S>(value: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_date(value))
}
