//! Build automation tasks for the AEI relay
//!
//! - `generate-cli-docs`: operator reference for the `aei-relay` binary,
//!   rendered from the clap definitions

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for the AEI relay", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the operator CLI reference in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

/// Environment variables read by `Config::from_env`, with defaults
const ENVIRONMENT: &[(&str, &str, &str)] = &[
    ("DATABASE_URL", "PostgreSQL connection string", "postgresql://localhost/aei_relay"),
    ("FTP_HOST", "Reader upload server (required)", "-"),
    ("FTP_PORT", "FTP control port", "21"),
    ("FTP_USERNAME", "FTP login", "anonymous"),
    ("FTP_PASSWORD", "FTP password", "(empty)"),
    ("FTP_SOURCE_FOLDER", "Directory polled for new files", "uploads"),
    ("FTP_DEST_FOLDER", "Directory consumed files are moved to", "processed"),
    ("INGEST_INTERVAL_SECS", "Seconds between ingestion runs", "300"),
    ("INGEST_FETCH_MAX_ATTEMPTS", "Fetch attempts per file per run", "3"),
    ("INGEST_FETCH_BACKOFF_MS", "Base delay between fetch attempts", "2000"),
    ("INGEST_PENDING_MAX_AGE_SECS", "Pending/Downloaded files older than this are failed", "86400"),
    ("INGEST_STALE_AFTER_SECS", "Idle Queued/Processing files are re-enqueued after this", "900"),
    ("INGEST_DELIVERY_MAX_AGE_SECS", "Idle Queued/Processing files older than this are failed", "172800"),
    ("INGEST_MAX_FILES_PER_RUN", "New files picked up per ingestion run", "100"),
    ("INGEST_LOOKBACK_HOURS", "Only list files modified within this window", "(all)"),
    ("INGEST_CACHE_DIR", "Payload cache directory", "(disabled)"),
    ("API_ENDPOINT", "External API URL records are POSTed to (required)", "-"),
    ("API_TIMEOUT", "Per-request timeout in seconds", "30"),
    ("API_HEADERS", "Extra request headers as a JSON object", "{}"),
    ("API_MAX_ATTEMPTS", "Attempts per record per delivery pass", "3"),
    ("API_BACKOFF_MS", "Base delay between delivery attempts", "1000"),
    ("SENDGRID_API_KEY", "Enables failure emails together with SENDGRID_FROM_EMAIL", "-"),
    ("SENDGRID_FROM_EMAIL", "Sender address for failure emails", "-"),
    ("SENDGRID_FROM_NAME", "Sender display name", "AEI Relay"),
    ("SENDGRID_API_URL", "SendGrid v3 base URL", "https://api.sendgrid.com/v3"),
    ("WORKER_CONCURRENCY", "Delivery workers per process", "4"),
    ("RELAY_HOST", "Read API bind address", "127.0.0.1"),
    ("RELAY_PORT", "Read API port", "8080"),
    ("RELAY_SHUTDOWN_TIMEOUT", "Seconds to wait for in-flight work on shutdown", "30"),
    ("LOG_LEVEL", "trace, debug, info, warn or error", "info"),
    ("LOG_OUTPUT", "console, file or both", "console"),
    ("LOG_FORMAT", "text or json", "text"),
    ("LOG_DIR", "Directory for rolling log files", "./logs"),
];

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<aei_relay::cli::Cli>();

    let environment: String = ENVIRONMENT
        .iter()
        .map(|(name, description, default)| {
            format!("| `{}` | {} | `{}` |\n", name, description, default)
        })
        .collect();

    let content = format!(
        r#"# AEI Relay CLI Reference

Generated from the CLI source on {date}.

## Quick Start

```bash
# Create the relay and queue schemas
aei-relay migrate

# Poll once and print what happened
aei-relay ingest-once

# Run the scheduler, delivery workers and read API
aei-relay run
```

## Commands

{markdown}

## Environment Variables

Values are read from the environment and from a `.env` file in the working directory.

| Variable | Description | Default |
|----------|-------------|---------|
{environment}
Failure-email recipients are read from the `email_configs` table on every notification.

---

*Regenerate with `cargo run -p xtask -- generate-cli-docs`.*
"#,
        date = chrono::Utc::now().format("%Y-%m-%d"),
        markdown = markdown,
        environment = environment,
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("Generated CLI documentation at: {}", file_path.display());

    Ok(())
}
