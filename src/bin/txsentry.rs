use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use txsentry::events::jsonl;
use txsentry::events::summarize_by_hash;
use txsentry::sql::normalize_whitespace;
use txsentry::{RetryToggle, SentryConfig, Value};

const DEFAULT_MARKER: &str = ".txsentry/retry-marker";

#[derive(Parser)]
#[command(name = "txsentry")]
#[command(about = "Operator tooling for txsentry retry and transaction events")]
struct Cli {
    /// JSON configuration file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage the persisted retry toggle
    Retry {
        #[command(subcommand)]
        action: RetryAction,
        /// Defaults to `retry.marker_path` from the configuration, then
        /// `.txsentry/retry-marker`
        #[arg(long, global = true)]
        marker: Option<PathBuf>,
    },
    /// Inspect events written by a JSON-lines sink
    Events {
        #[command(subcommand)]
        action: EventsAction,
    },
    /// Validate a configuration file and print the resolved values
    CheckConfig,
}

#[derive(Subcommand)]
enum RetryAction {
    Enable,
    Disable,
    /// Remove the marker so the configured default applies
    Clear,
    Status,
}

#[derive(Subcommand)]
enum EventsAction {
    /// Most frequent events grouped by event hash
    Top {
        #[arg(long)]
        dir: PathBuf,
        /// Defaults to the configured retry events table
        #[arg(long)]
        table: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Retry { action, marker } => {
            let marker = marker
                .or_else(|| config.retry.marker_path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MARKER));
            match action {
                RetryAction::Enable => set_marker(&marker, true).await,
                RetryAction::Disable => set_marker(&marker, false).await,
                RetryAction::Clear => {
                    RetryToggle::clear_marker(&marker)
                        .await
                        .with_context(|| format!("Failed to remove marker '{}'", marker.display()))?;
                    println!("Retry marker removed; configured default applies");
                    Ok(())
                }
                RetryAction::Status => retry_status(&config, &marker).await,
            }
        }
        Command::Events { action } => match action {
            EventsAction::Top { dir, table, limit } => {
                let table = table.unwrap_or_else(|| config.tables.retry_events.clone());
                events_top(&dir, &table, limit).await
            }
        },
        Command::CheckConfig => {
            println!("{:#?}", config);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SentryConfig> {
    match path {
        Some(path) => SentryConfig::from_path(path)
            .with_context(|| format!("Invalid configuration '{}'", path.display())),
        None => Ok(SentryConfig::default()),
    }
}

async fn set_marker(marker: &Path, enabled: bool) -> Result<()> {
    RetryToggle::write_marker(marker, enabled)
        .await
        .with_context(|| format!("Failed to write marker '{}'", marker.display()))?;
    println!(
        "Automatic retries {} (marker: {})",
        if enabled { "enabled" } else { "disabled" },
        marker.display()
    );
    Ok(())
}

async fn retry_status(config: &SentryConfig, marker: &Path) -> Result<()> {
    let mut policy = config.retry.clone();
    policy.marker_path = Some(marker.to_path_buf());
    let toggle = RetryToggle::resolve(&policy)
        .await
        .with_context(|| format!("Failed to read marker '{}'", marker.display()))?;

    let source = match toggle.marker {
        Some(_) => "marker",
        None => "config",
    };
    println!(
        "Automatic retries: {} (source: {}, max_retries={}, base_delay={}s)",
        if toggle.is_enabled() { "enabled" } else { "disabled" },
        source,
        config.retry.max_retries,
        config.retry.base_delay_secs
    );
    Ok(())
}

async fn events_top(dir: &Path, table: &str, limit: usize) -> Result<()> {
    let rows = jsonl::read_rows(dir, table)
        .await
        .with_context(|| format!("Failed to read table '{}' from '{}'", table, dir.display()))?;
    let groups = summarize_by_hash(&rows);

    if groups.is_empty() {
        println!("No events in '{}'", table);
        return Ok(());
    }

    println!("{} events in '{}', {} distinct", rows.len(), table, groups.len());
    for group in groups.iter().take(limit) {
        let text = |key: &str| match group.sample.get(key) {
            Some(Value::Null) | None => "-".to_string(),
            Some(value) => value.to_string(),
        };
        let last_seen = group
            .last_seen
            .map(|ts| ts.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());

        let short_hash: String = group.event_hash.chars().take(12).collect();

        println!(
            "{:>6}  {}  status={} class={} state={} code={} last={}",
            group.count,
            short_hash,
            text("status"),
            text("exception_class"),
            text("sql_state"),
            text("driver_code"),
            last_seen
        );
        if let Some(Value::Text(sql)) = group.sample.get("raw_sql") {
            println!("        {}", normalize_whitespace(sql));
        }
    }
    Ok(())
}
