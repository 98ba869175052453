use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use content_index_sync::config;
use content_index_sync::content::MemoryContentStore;
use content_index_sync::models::ContentChangeRecord;
use content_index_sync::state::AppState;
use content_index_sync::task::{TaskStatus, TaskSummary};

const LONG_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_TIME"), ")");

#[derive(Parser)]
#[command(author, version, long_version = LONG_VERSION, about = "Keep a content search index in sync with the content tree", long_about = None)]
struct Cli {
    /// Configuration file / 配置文件
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Content snapshot (items and protected ids) / 内容快照
    #[arg(long)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a JSON array of change records
    Sync {
        #[arg(long)]
        records: PathBuf,
    },
    /// Remove all protected content from the index
    Sweep,
    /// Reindex the content of the given content types
    Reindex {
        #[arg(long = "content-type", required = true)]
        content_types: Vec<String>,
    },
    /// Print index statistics
    Stats,
    /// Search entry names
    Search {
        query: String,
        #[arg(long)]
        culture: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "content_index_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Load configuration / 加载配置
    let app_config = config::load_config_from(&cli.config).context("Failed to load configuration")?;
    config::init_config(app_config)?;
    let app_config = config::config();

    let data_dir = app_config.get_data_dir();
    if !data_dir.exists() {
        std::fs::create_dir_all(&data_dir)?;
        tracing::info!("Created data directory: {:?}", data_dir);
    }

    if matches!(cli.command, Commands::Sync { .. } | Commands::Sweep | Commands::Reindex { .. })
        && cli.snapshot.is_none()
    {
        bail!("--snapshot is required for this command");
    }
    let store = match &cli.snapshot {
        Some(path) => AppState::load_store(&app_config, path)
            .with_context(|| format!("Failed to load content snapshot {:?}", path))?,
        None => Arc::new(MemoryContentStore::new(app_config.sync.descendant_page_size)),
    };
    let app = AppState::build(app_config, store).await?;

    match cli.command {
        Commands::Sync { records } => {
            let content = std::fs::read_to_string(&records)
                .with_context(|| format!("Failed to read change records {:?}", records))?;
            let records: Vec<ContentChangeRecord> = serde_json::from_str(&content)?;

            let mut scope = app.handler.begin_scope();
            for record in records {
                scope.record(record);
            }
            match scope.complete()? {
                Some(task_id) => report_task(&app, &task_id).await?,
                None => tracing::info!("No change records to apply"),
            }
        }
        Commands::Sweep => {
            if let Some(task_id) = app.handler.handle_public_access_changed()? {
                report_task(&app, &task_id).await?;
            }
        }
        Commands::Reindex { content_types } => {
            let content_types = content_types.into_iter().collect();
            if let Some(task_id) = app.handler.handle_content_types_changed(content_types)? {
                report_task(&app, &task_id).await?;
            }
        }
        Commands::Stats => {
            let mut stats = serde_json::Map::new();
            stats.insert("content".into(), serde_json::to_value(app.index.get_stats().await)?);
            if let Some(internal) = &app.internal_index {
                stats.insert("internal".into(), serde_json::to_value(internal.get_stats().await)?);
            }
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Search { query, culture, limit } => {
            let hits = app.index.search(&query, culture.as_deref(), limit).await?;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
    }

    app.close().await;
    Ok(())
}

async fn report_task(app: &AppState, task_id: &str) -> anyhow::Result<()> {
    let task: TaskSummary = app
        .queue
        .wait_for_task(task_id)
        .await
        .with_context(|| format!("Task {} disappeared", task_id))?;
    println!("{}", serde_json::to_string_pretty(&task)?);
    if task.status == TaskStatus::Failed {
        bail!("{} failed: {}", task.name, task.error.unwrap_or_default());
    }
    Ok(())
}
