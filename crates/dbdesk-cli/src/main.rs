use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "dbdesk")]
#[command(about = "DB Desk client/ticket reconciliation importer")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replace all clients and tickets with the contents of the extracts.
    Import {
        /// Run against an in-memory store instead of the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply pending schema migrations.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed arguments");

    match cli.command.unwrap_or(Commands::Import { dry_run: false }) {
        Commands::Import { dry_run } => {
            let summary = dbdesk_import::run_import_from_env(dry_run).await?;
            for line in summary.console_lines() {
                println!("{line}");
            }
            match &summary.report_error {
                None => println!("reports: {}", summary.reports_dir),
                Some(err) => println!("reports not written: {err}"),
            }
        }
        Commands::Migrate => {
            dbdesk_import::run_migrations_from_env().await?;
            println!("migrations applied");
        }
    }

    Ok(())
}
