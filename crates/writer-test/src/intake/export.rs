use super::domain::{format_timestamp, TestRecord};

/// File name offered for the backup download.
pub const EXPORT_FILE_NAME: &str = "writer_tests_backup.csv";

/// Header row, in the same order as the `writer_tests` columns.
pub const EXPORT_COLUMNS: [&str; 11] = [
    "id",
    "name",
    "birth_year",
    "phone_last4",
    "title",
    "body",
    "char_count",
    "status",
    "created_at",
    "submitted_at",
    "deadline_at",
];

/// Renders records as CSV with a header row. Missing values become empty fields.
pub fn render_csv(records: &[TestRecord]) -> Result<String, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());

    writer.write_record(EXPORT_COLUMNS)?;
    for record in records {
        writer.write_record(row(record))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| {
            let source = err.error();
            csv::Error::from(std::io::Error::new(source.kind(), source.to_string()))
        })?;
    String::from_utf8(bytes).map_err(|err| {
        csv::Error::from(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    })
}

fn row(record: &TestRecord) -> [String; 11] {
    [
        record.id.to_string(),
        record.identity.name.clone(),
        record.identity.birth_year.clone(),
        record.identity.phone_last4.clone(),
        record.title.clone().unwrap_or_default(),
        record.body.clone().unwrap_or_default(),
        record.char_count.to_string(),
        record.status.to_string(),
        format_timestamp(&record.created_at),
        record
            .submitted_at
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_default(),
        record.deadline_at.clone(),
    ]
}
