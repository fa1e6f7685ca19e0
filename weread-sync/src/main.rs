use clap::{ArgGroup, Parser};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use weread_common::{
    BookOutcome, ConfigSource, Database, SyncEvent, SyncOptions, SyncOrchestrator, SyncReport,
};

mod notion;
mod records;
mod weread;

#[derive(Debug, Parser)]
#[command(version, about = "Sync the WeRead library into a Notion database")]
#[command(group(ArgGroup::new("target").required(true).args(["all", "book_id"])))]
struct Cli {
    /// Notion integration token
    #[arg(long, env = "NOTION_INTEGRATIONS", hide_env_values = true)]
    notion_token: String,

    /// Notion database holding one page per book
    #[arg(long, env = "DATABASE_ID")]
    database_id: String,

    /// Notion database holding the "同步配置" page
    #[arg(long, env = "CONFIG_DATABASE_ID")]
    config_database_id: Option<String>,

    /// Cookie of a logged in weread.qq.com session
    #[arg(long, env = "WEREAD_COOKIE", hide_env_values = true)]
    weread_cookie: String,

    /// Local database for sync state (sqlite://path/to/db.sqlite)
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://weread-sync.db")]
    database_url: String,

    /// Sync every book that passes the library config
    #[arg(long)]
    all: bool,

    /// Sync a single book, ignoring the status and author filters
    #[arg(long)]
    book_id: Option<String>,

    /// Ignore stored sync state and rewrite every page
    #[arg(long, short = 'f')]
    full_sync: bool,

    /// Minimum delay between two books, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pacing_ms: u64,
}

fn log_report(report: &SyncReport) {
    for event in &report.events {
        match event {
            SyncEvent::BookFinished {
                title,
                outcome: BookOutcome::Failed { reason },
                ..
            } => warn!("{:?} failed: {}", title, reason),
            SyncEvent::StateSaveFailed { book_id, error } => {
                warn!("Sync state for {} was not saved: {}", book_id, error)
            }
            _ => {}
        }
    }

    info!("{}", report);
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let db = Database::new(&cli.database_url).await?;
    let weread = weread::WeRead::new(&cli.weread_cookie)?;
    let notion = notion::Notion::new(&cli.notion_token)?;

    let records = records::NotionRecords::new(notion.clone(), weread.clone(), &cli.database_id);
    let config = cli
        .config_database_id
        .as_deref()
        .map(|id| notion::NotionConfig::new(notion.clone(), id));

    let options = SyncOptions {
        force_full: cli.full_sync,
        pacing: Duration::from_millis(cli.pacing_ms),
    };

    let mut orchestrator = SyncOrchestrator::new(&weread, &records, &db).with_options(options);
    if let Some(config) = &config {
        orchestrator = orchestrator.with_config_source(config as &dyn ConfigSource);
    } else {
        info!("CONFIG_DATABASE_ID not set, syncing with the default config");
    }

    let result = match &cli.book_id {
        Some(book_id) => orchestrator.sync_single_book(book_id).await,
        None => orchestrator.sync_all().await,
    };

    match result {
        Ok(report) => log_report(&report),
        Err(e) => error!("Sync aborted: {:#}", e),
    }

    db.close().await;

    Ok(())
}
