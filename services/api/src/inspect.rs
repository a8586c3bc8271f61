use crate::cli::StoreArgs;
use crate::infra::open_store;
use clap::{Args, Subcommand};
use std::io::{self, Write};
use writer_test::config::AppConfig;
use writer_test::error::AppError;
use writer_test::intake::domain::format_timestamp;
use writer_test::intake::{TestRecord, TestRepository, WriterTestService};

#[derive(Args, Debug)]
pub(crate) struct RecentArgs {
    /// Number of records to print, newest first
    #[arg(long, default_value_t = 5)]
    pub(crate) limit: usize,
    #[command(flatten)]
    pub(crate) store: StoreArgs,
}

#[derive(Args, Debug)]
pub(crate) struct GateArgs {
    #[command(subcommand)]
    pub(crate) command: GateCommand,
    #[command(flatten)]
    pub(crate) store: StoreArgs,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub(crate) enum GateCommand {
    /// Print whether registration is open
    Status,
    /// Accept new registrations
    Open,
    /// Stop new registrations and allow export/reset
    Close,
}

fn load_config(store: StoreArgs) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::load()?;
    if let Some(db_path) = store.db_path {
        config.storage.db_path = db_path;
    }
    Ok(config)
}

pub(crate) fn run_recent(args: RecentArgs) -> Result<(), AppError> {
    let config = load_config(args.store)?;
    let records = open_store(&config)?.list()?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    render_recent(&mut out, &records, args.limit)?;
    Ok(())
}

pub(crate) fn run_gate(args: GateArgs) -> Result<(), AppError> {
    let config = load_config(args.store)?;
    let service = WriterTestService::new(open_store(&config)?);
    let gate = service.gate();

    match args.command {
        GateCommand::Status => {}
        GateCommand::Open => gate.set_open(true)?,
        GateCommand::Close => gate.set_open(false)?,
    }

    println!("{}", gate_line(gate.is_open()?));
    Ok(())
}

pub(crate) fn render_recent<W: Write>(
    out: &mut W,
    records: &[TestRecord],
    limit: usize,
) -> io::Result<()> {
    let shown = records.len().min(limit);
    writeln!(out, "Newest {shown} test record(s)")?;

    for record in records.iter().take(limit) {
        let submitted = record
            .submitted_at
            .as_ref()
            .map(format_timestamp)
            .unwrap_or_else(|| "not submitted".to_string());
        writeln!(
            out,
            "- #{} {} ({}, *{}) \"{}\" {} chars, {}, {}",
            record.id.0,
            record.identity.name,
            record.identity.birth_year,
            record.identity.phone_last4,
            record.title.as_deref().unwrap_or(""),
            record.char_count,
            record.status,
            submitted,
        )?;
    }

    Ok(())
}

fn gate_line(open: bool) -> &'static str {
    if open {
        "registration is open"
    } else {
        "registration is closed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use writer_test::intake::{DraftForm, IdentityForm, SqliteIntakeRepository};

    fn register(service: &WriterTestService<SqliteIntakeRepository>, name: &str) -> i64 {
        service
            .register(&IdentityForm {
                name: Some(name.to_string()),
                birth_year: Some("1990".to_string()),
                phone_last4: Some("1234".to_string()),
            })
            .expect("registered")
            .record
            .id
            .0
    }

    #[test]
    fn recent_lists_newest_records_up_to_limit() {
        let repository = Arc::new(SqliteIntakeRepository::open_in_memory().expect("store"));
        let service = WriterTestService::new(repository);
        register(&service, "Kim");
        let lee = register(&service, "Lee");
        let park = register(&service, "Park");
        service
            .save_draft(&DraftForm {
                test_id: Some(park),
                title: Some("Harbor".to_string()),
                body: Some("ab cd".to_string()),
            })
            .expect("draft saved");

        let records = service.list().expect("list");
        let mut out = Vec::new();
        render_recent(&mut out, &records, 2).expect("render");
        let text = String::from_utf8(out).expect("utf-8");
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines[0], "Newest 2 test record(s)");
        assert_eq!(
            lines[1],
            format!("- #{park} Park (1990, *1234) \"Harbor\" 4 chars, pending, not submitted")
        );
        assert!(lines[2].starts_with(&format!("- #{lee} Lee")));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn empty_store_prints_header_only() {
        let mut out = Vec::new();
        render_recent(&mut out, &[], 5).expect("render");
        assert_eq!(String::from_utf8(out).expect("utf-8"), "Newest 0 test record(s)\n");
    }

    #[test]
    fn gate_line_describes_state() {
        assert_eq!(gate_line(true), "registration is open");
        assert_eq!(gate_line(false), "registration is closed");
    }
}
