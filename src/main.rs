use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use todo_core::{
    format::relative_time, todos::sort_with_completed_last, AppConfig, FileStore, Filter,
    TodoManager,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "todo", version, about = "Keep a todo list in a local file")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show todos, incomplete first
    List {
        #[arg(short, long)]
        filter: Option<Filter>,
    },
    /// Add a todo
    Add {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Flip a todo between active and completed
    Toggle { id: String },
    /// Replace the text of a todo
    Edit {
        id: String,
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Delete a todo
    Remove { id: String },
    /// Delete every completed todo
    ClearCompleted,
    /// Delete every todo
    ClearAll,
    /// Show storage usage
    Stats,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

#[cfg(not(feature = "otel"))]
fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(env_filter())
        .init();
    Ok(())
}

#[cfg(feature = "otel")]
fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::trace::TracerProvider;
    use opentelemetry_otlp::WithExportConfig;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint),
        )
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default().with_resource(
                opentelemetry_sdk::Resource::new(vec![
                    opentelemetry::KeyValue::new("service.name", "todo"),
                    opentelemetry::KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ]),
            ),
        )
        .install_batch(opentelemetry_sdk::runtime::TokioCurrentThread)
        .context("failed to install OpenTelemetry tracer")?;

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(provider.tracer("todo"));

    tracing_subscriber::registry()
        .with(telemetry_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .with(env_filter())
        .init();
    Ok(())
}

fn print_todos(manager: &TodoManager) {
    let now = Utc::now();
    let counts = manager.get_counts();
    println!(
        "{} total, {} active, {} completed (showing {})",
        counts.all,
        counts.active,
        counts.completed,
        manager.filter()
    );

    for todo in sort_with_completed_last(&manager.get_filtered_todos(manager.filter())) {
        let mark = if todo.completed { "x" } else { " " };
        println!(
            "[{mark}] {}  {}  ({})",
            todo.id,
            todo.text,
            relative_time(todo.created_at, now)
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("invalid configuration")?;
    let store = Arc::new(FileStore::new(&config.data_path, config.quota_bytes));
    info!(path = %store.path().display(), "Opening todo store");
    let manager = TodoManager::builder(store).config(&config).build();

    match cli.command.unwrap_or(Command::List { filter: None }) {
        Command::List { filter } => {
            if let Some(filter) = filter {
                manager.set_filter(filter);
            }
        }
        Command::Add { text } => manager.add_todo(&text.join(" ")).await,
        Command::Toggle { id } => manager.toggle_todo(&id).await,
        Command::Edit { id, text } => manager.update_todo_text(&id, &text.join(" ")).await,
        Command::Remove { id } => manager.delete_todo(&id).await,
        Command::ClearCompleted => manager.delete_completed().await,
        Command::ClearAll => manager.clear_all().await,
        Command::Stats => {
            let stats = manager.storage_stats();
            if !stats.available {
                bail!("Local storage is not available");
            }
            println!(
                "{} bytes used, {} bytes remaining of {}",
                stats.used, stats.remaining, stats.total
            );
            return Ok(());
        }
    }

    print_todos(&manager);

    if let Some(error) = manager.error() {
        let hint = if error.retryable { "" } else { " (not retryable)" };
        bail!("{}{hint}", error.message);
    }
    Ok(())
}
