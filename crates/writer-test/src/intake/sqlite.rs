//! SQLite-backed storage for the intake tables.
//!
//! The layout matches the `config`, `writer_tests` and `blacklist` tables older
//! deployments already have on disk, plus a unique index on the identity
//! triplet so registration can upsert instead of check-then-insert.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::domain::{
    format_date, format_timestamp, BlacklistEntry, Draft, Identity, TestId, TestRecord,
    TestStatus, DATE_FORMAT, TIMESTAMP_FORMAT,
};
use super::repository::{
    BlacklistRepository, GateRepository, Registration, RepositoryError, TestRepository,
};

const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);
const TEST_OPEN_KEY: &str = "test_open";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT
);
CREATE TABLE IF NOT EXISTS writer_tests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    birth_year TEXT NOT NULL,
    phone_last4 TEXT NOT NULL,
    title TEXT,
    body TEXT,
    char_count INTEGER DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TEXT NOT NULL,
    submitted_at TEXT,
    deadline_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS writer_tests_identity
    ON writer_tests (name, birth_year, phone_last4);
CREATE TABLE IF NOT EXISTS blacklist (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    birth_year TEXT NOT NULL,
    phone_last4 TEXT NOT NULL,
    reason TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS blacklist_identity
    ON blacklist (name, birth_year, phone_last4);
INSERT OR IGNORE INTO config (key, value) VALUES ('test_open', '1');
";

const RECORD_COLUMNS: &str = "id, name, birth_year, phone_last4, title, body, char_count, \
     status, created_at, submitted_at, deadline_at";

/// Intake repository over a single SQLite connection.
pub struct SqliteIntakeRepository {
    connection: Mutex<Connection>,
}

impl SqliteIntakeRepository {
    /// Opens (creating if needed) the database at `path`, including any
    /// missing parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let connection = Connection::open(path)?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.execute_batch("PRAGMA journal_mode = wal;")?;
        Self::with_connection(connection)
    }

    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> Result<Self, RepositoryError> {
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.connection
            .lock()
            .map_err(|_| RepositoryError::Unavailable("connection mutex poisoned".to_string()))
    }
}

impl GateRepository for SqliteIntakeRepository {
    fn is_test_open(&self) -> Result<bool, RepositoryError> {
        let connection = self.connection()?;
        let value: Option<Option<String>> = connection
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![TEST_OPEN_KEY],
                |row| row.get(0),
            )
            .optional()?;

        // A missing row means nobody ever closed the gate.
        Ok(match value {
            None => true,
            Some(value) => value.as_deref() == Some("1"),
        })
    }

    fn set_test_open(&self, open: bool) -> Result<(), RepositoryError> {
        let connection = self.connection()?;
        connection.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![TEST_OPEN_KEY, if open { "1" } else { "0" }],
        )?;
        Ok(())
    }
}

impl TestRepository for SqliteIntakeRepository {
    fn find_or_create(
        &self,
        identity: &Identity,
        created_at: NaiveDateTime,
    ) -> Result<Registration, RepositoryError> {
        let mut connection = self.connection()?;
        let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT INTO writer_tests (name, birth_year, phone_last4, title, body, char_count,
                                       status, created_at, deadline_at)
             VALUES (?1, ?2, ?3, '', '', 0, 'pending', ?4, '')
             ON CONFLICT(name, birth_year, phone_last4) DO NOTHING",
            params![
                identity.name,
                identity.birth_year,
                identity.phone_last4,
                format_timestamp(&created_at),
            ],
        )?;

        let record = tx.query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM writer_tests
                 WHERE name = ?1 AND birth_year = ?2 AND phone_last4 = ?3"
            ),
            params![identity.name, identity.birth_year, identity.phone_last4],
            record_from_row,
        )?;
        tx.commit()?;

        Ok(Registration {
            record,
            created: inserted == 1,
        })
    }

    fn fetch(&self, id: TestId) -> Result<Option<TestRecord>, RepositoryError> {
        let connection = self.connection()?;
        let record = connection
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM writer_tests WHERE id = ?1"),
                params![id.0],
                record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn list(&self) -> Result<Vec<TestRecord>, RepositoryError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM writer_tests ORDER BY id DESC"
        ))?;
        let records = statement
            .query_map([], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn save_draft(&self, id: TestId, draft: &Draft) -> Result<bool, RepositoryError> {
        let connection = self.connection()?;
        let updated = connection.execute(
            "UPDATE writer_tests SET title = ?1, body = ?2, char_count = ?3 WHERE id = ?4",
            params![draft.title, draft.body, draft.char_count as i64, id.0],
        )?;
        Ok(updated > 0)
    }

    fn record_submission(
        &self,
        id: TestId,
        draft: &Draft,
        submitted_at: NaiveDateTime,
    ) -> Result<bool, RepositoryError> {
        let connection = self.connection()?;
        let updated = connection.execute(
            "UPDATE writer_tests
             SET title = ?1, body = ?2, char_count = ?3, submitted_at = ?4
             WHERE id = ?5",
            params![
                draft.title,
                draft.body,
                draft.char_count as i64,
                format_timestamp(&submitted_at),
                id.0,
            ],
        )?;
        Ok(updated > 0)
    }

    fn update_status(&self, id: TestId, status: TestStatus) -> Result<bool, RepositoryError> {
        let connection = self.connection()?;
        let updated = connection.execute(
            "UPDATE writer_tests SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.0],
        )?;
        Ok(updated > 0)
    }

    fn delete(&self, id: TestId) -> Result<bool, RepositoryError> {
        let connection = self.connection()?;
        let deleted = connection.execute("DELETE FROM writer_tests WHERE id = ?1", params![id.0])?;
        Ok(deleted > 0)
    }

    fn drain(
        &self,
        export: &mut dyn FnMut(&[TestRecord]) -> Result<(), RepositoryError>,
    ) -> Result<usize, RepositoryError> {
        let mut connection = self.connection()?;
        let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let records = {
            let mut statement = tx.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM writer_tests ORDER BY id ASC"
            ))?;
            let rows = statement
                .query_map([], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        // Dropping `tx` on the error path rolls the whole drain back.
        export(&records)?;

        let deleted = tx.execute("DELETE FROM writer_tests", [])?;
        tx.commit()?;
        Ok(deleted)
    }
}

impl BlacklistRepository for SqliteIntakeRepository {
    fn is_blacklisted(&self, identity: &Identity) -> Result<bool, RepositoryError> {
        let connection = self.connection()?;
        let hit: Option<i64> = connection
            .query_row(
                "SELECT 1 FROM blacklist
                 WHERE name = ?1 AND birth_year = ?2 AND phone_last4 = ?3
                 LIMIT 1",
                params![identity.name, identity.birth_year, identity.phone_last4],
                |row| row.get(0),
            )
            .optional()?;
        Ok(hit.is_some())
    }

    fn add_blacklist(
        &self,
        identity: &Identity,
        reason: &str,
        created_on: NaiveDate,
    ) -> Result<(), RepositoryError> {
        let connection = self.connection()?;
        connection.execute(
            "INSERT INTO blacklist (name, birth_year, phone_last4, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                identity.name,
                identity.birth_year,
                identity.phone_last4,
                reason,
                format_date(&created_on),
            ],
        )?;
        Ok(())
    }

    fn remove_blacklist(&self, identity: &Identity) -> Result<usize, RepositoryError> {
        let connection = self.connection()?;
        let removed = connection.execute(
            "DELETE FROM blacklist WHERE name = ?1 AND birth_year = ?2 AND phone_last4 = ?3",
            params![identity.name, identity.birth_year, identity.phone_last4],
        )?;
        Ok(removed)
    }

    fn list_blacklist(&self) -> Result<Vec<BlacklistEntry>, RepositoryError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(
            "SELECT name, birth_year, phone_last4, reason, created_at
             FROM blacklist ORDER BY id DESC",
        )?;
        let entries = statement
            .query_map([], |row| {
                let created_at: String = row.get(4)?;
                Ok(BlacklistEntry {
                    identity: Identity {
                        name: row.get(0)?,
                        birth_year: row.get(1)?,
                        phone_last4: row.get(2)?,
                    },
                    reason: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                    created_at: NaiveDate::parse_from_str(&created_at, DATE_FORMAT)
                        .map_err(|err| conversion_error(4, err))?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TestRecord> {
    let char_count: Option<i64> = row.get(6)?;
    let status: String = row.get(7)?;
    let created_at: String = row.get(8)?;
    let submitted_at: Option<String> = row.get(9)?;

    Ok(TestRecord {
        id: TestId(row.get(0)?),
        identity: Identity {
            name: row.get(1)?,
            birth_year: row.get(2)?,
            phone_last4: row.get(3)?,
        },
        title: row.get(4)?,
        body: row.get(5)?,
        char_count: usize::try_from(char_count.unwrap_or_default())
            .map_err(|err| conversion_error(6, err))?,
        status: status
            .parse::<TestStatus>()
            .map_err(|err| conversion_error(7, err))?,
        created_at: parse_timestamp(8, &created_at)?,
        submitted_at: submitted_at
            .filter(|value| !value.is_empty())
            .map(|value| parse_timestamp(9, &value))
            .transpose()?,
        deadline_at: row.get::<_, Option<String>>(10)?.unwrap_or_default(),
    })
}

fn parse_timestamp(index: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT).map_err(|err| conversion_error(index, err))
}

fn conversion_error<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}
