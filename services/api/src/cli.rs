use crate::inspect::{run_gate, run_recent, GateArgs, RecentArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use writer_test::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Writer Test Intake",
    about = "Run the writing-test intake service and inspect its database",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Print the newest test records
    Recent(RecentArgs),
    /// Show or change whether new registrations are accepted
    Gate(GateArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    #[command(flatten)]
    pub(crate) store: StoreArgs,
}

#[derive(Args, Debug, Default, Clone)]
pub(crate) struct StoreArgs {
    /// Override the SQLite database location (DB_PATH)
    #[arg(long)]
    pub(crate) db_path: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Recent(args) => run_recent(args),
        Command::Gate(args) => run_gate(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspect::GateCommand;

    #[test]
    fn serve_accepts_overrides() {
        let cli = Cli::try_parse_from([
            "writer-test-api",
            "serve",
            "--port",
            "8080",
            "--db-path",
            "/var/lib/writer/tests.db",
        ])
        .expect("parses");

        match cli.command {
            Some(Command::Serve(args)) => {
                assert_eq!(args.port, Some(8080));
                assert_eq!(args.host, None);
                assert_eq!(
                    args.store.db_path,
                    Some(PathBuf::from("/var/lib/writer/tests.db"))
                );
            }
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn recent_defaults_to_five_records() {
        let cli = Cli::try_parse_from(["writer-test-api", "recent"]).expect("parses");

        match cli.command {
            Some(Command::Recent(args)) => assert_eq!(args.limit, 5),
            other => panic!("expected recent, got {other:?}"),
        }
    }

    #[test]
    fn gate_requires_an_action() {
        assert!(Cli::try_parse_from(["writer-test-api", "gate"]).is_err());

        let cli = Cli::try_parse_from(["writer-test-api", "gate", "close"]).expect("parses");
        match cli.command {
            Some(Command::Gate(args)) => assert!(matches!(args.command, GateCommand::Close)),
            other => panic!("expected gate, got {other:?}"),
        }
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["writer-test-api"]).expect("parses");
        assert!(cli.command.is_none());
    }
}
