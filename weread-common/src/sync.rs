use crate::config::{LibraryConfig, SyncMode, SYNC_CONFIG_KEY};
use crate::content::ContentDelta;
use crate::events::{BookOutcome, BookPhase, EventLog, SyncEvent, SyncReport};
use crate::filter::filter_books;
use crate::library::{merge_books, Book, Highlight, Thought};
use crate::state::{SyncState, SyncStateStore};
use crate::stats::summarize;
use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, info};

/// Identifier of a book's page in the destination workspace.
pub type RecordId = String;

#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn exists(&self, key: &str) -> anyhow::Result<bool>;

    async fn create_default(&self, key: &str) -> anyhow::Result<()>;

    async fn load(&self, key: &str) -> anyhow::Result<Option<LibraryConfig>>;
}

#[async_trait]
pub trait BookSource: Send + Sync {
    async fn shelf_books(&self) -> anyhow::Result<Vec<Book>>;

    async fn notebook_books(&self) -> anyhow::Result<Vec<Book>>;

    async fn enrich(&self, shelf: Vec<Book>, notebook: Vec<Book>) -> anyhow::Result<Vec<Book>> {
        Ok(merge_books(shelf, notebook))
    }
}

pub struct ContentRequest<'a> {
    pub book: &'a Book,
    pub record_id: &'a str,
    pub mode: SyncMode,
    /// Stored watermarks, only loaded for incremental runs.
    pub previous: Option<&'a SyncState>,
    pub organize_by_chapter: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentSyncResult {
    pub success: bool,
    pub highlights_synckey: String,
    pub thoughts_synckey: String,
    /// Epoch millis up to which the content has been seen.
    pub watermark: i64,
    pub has_update: bool,
    pub highlights: Vec<Highlight>,
    pub thoughts: Vec<Thought>,
}

impl ContentSyncResult {
    pub fn synced(delta: ContentDelta) -> Self {
        Self {
            success: true,
            highlights_synckey: delta.highlights_synckey,
            thoughts_synckey: delta.thoughts_synckey,
            watermark: delta.watermark,
            has_update: delta.has_update,
            highlights: delta.highlights,
            thoughts: delta.thoughts,
        }
    }

    /// A failed content write. Counts as an update so the book is reported as a
    /// failure rather than as unchanged.
    pub fn failed() -> Self {
        Self {
            success: false,
            has_update: true,
            ..Self::default()
        }
    }
}

/// The destination workspace.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn exists(&self, title: &str, author: Option<&str>) -> anyhow::Result<Option<RecordId>>;

    async fn create(&self, book: &Book) -> anyhow::Result<RecordId>;

    async fn sync_content(&self, request: ContentRequest<'_>) -> ContentSyncResult;
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Overrides the sync mode from the library config.
    pub force_full: bool,
    /// Minimum gap between two books, to stay within the remote rate limits.
    pub pacing: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            force_full: false,
            pacing: Duration::from_secs(1),
        }
    }
}

/// Drives a sync run, one book at a time.
pub struct SyncOrchestrator<'a> {
    config_source: Option<&'a dyn ConfigSource>,
    books: &'a dyn BookSource,
    records: &'a dyn RecordStore,
    state: &'a dyn SyncStateStore,
    options: SyncOptions,
}

impl<'a> SyncOrchestrator<'a> {
    pub fn new(
        books: &'a dyn BookSource,
        records: &'a dyn RecordStore,
        state: &'a dyn SyncStateStore,
    ) -> Self {
        Self {
            config_source: None,
            books,
            records,
            state,
            options: SyncOptions::default(),
        }
    }

    pub fn with_config_source(mut self, source: &'a dyn ConfigSource) -> Self {
        self.config_source = Some(source);
        self
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Syncs every book that passes the library config.
    ///
    /// Only a failure to list the library is returned as an error; anything that
    /// goes wrong for a single book is counted in the report.
    pub async fn sync_all(&self) -> anyhow::Result<SyncReport> {
        let mut log = EventLog::new();

        let config = self.resolve_config(&mut log, true).await;
        let mode = SyncMode::effective(self.options.force_full, &config);
        log.emit(SyncEvent::ConfigResolved {
            config: config.clone(),
            mode,
        });

        let all_books = self.fetch_books().await?;

        let filtered = filter_books(&all_books, &config);
        for record in filtered.skipped {
            log.emit(SyncEvent::Skipped(record));
        }
        log.emit(SyncEvent::Stats(summarize(
            &all_books,
            &filtered.selected,
            &config,
        )));

        info!("Syncing {} books ({} sync)", filtered.selected.len(), mode);

        let mut report = SyncReport::default();
        let total = filtered.selected.len();

        // single worker, at most one book per pacing interval
        let queue = tokio_stream::iter(filtered.selected.into_iter().enumerate())
            .throttle(self.options.pacing);
        tokio::pin!(queue);

        while let Some((index, book)) = queue.next().await {
            info!("[{}/{}] Syncing {:?}", index + 1, total, book.title);
            let outcome = self
                .sync_book(&book, mode, config.organize_by_chapter(), &mut log)
                .await;
            report.record(&outcome);
        }

        report.events = log.into_events();
        info!("Sync finished. {}", report);

        Ok(report)
    }

    /// Syncs one book by id, bypassing the status and author filters.
    pub async fn sync_single_book(&self, book_id: &str) -> anyhow::Result<SyncReport> {
        let mut log = EventLog::new();

        let config = self.resolve_config(&mut log, false).await;
        let mode = SyncMode::effective(self.options.force_full, &config);
        log.emit(SyncEvent::ConfigResolved {
            config: config.clone(),
            mode,
        });

        let book = self
            .fetch_books()
            .await?
            .into_iter()
            .find(|b| b.book_id == book_id)
            .ok_or_else(|| anyhow!("Book {} not found on the shelf or in the notebook", book_id))?;

        let mut report = SyncReport::default();
        let outcome = self
            .sync_book(&book, mode, config.organize_by_chapter(), &mut log)
            .await;
        report.record(&outcome);
        report.events = log.into_events();

        Ok(report)
    }

    /// Never fails: an unreachable or broken config source falls back to the default.
    /// A missing config page is only created when `create_missing` is set.
    async fn resolve_config(&self, log: &mut EventLog, create_missing: bool) -> LibraryConfig {
        let Some(source) = self.config_source else {
            log.emit(SyncEvent::ConfigFallback {
                reason: "no config source".to_string(),
            });
            return LibraryConfig::default();
        };

        match source.exists(SYNC_CONFIG_KEY).await {
            Ok(true) => {}
            Ok(false) if !create_missing => {
                log.emit(SyncEvent::ConfigFallback {
                    reason: "sync config not found".to_string(),
                });
                return LibraryConfig::default();
            }
            Ok(false) => {
                info!("No sync config found, creating the default one");
                if let Err(e) = source.create_default(SYNC_CONFIG_KEY).await {
                    log.emit(SyncEvent::ConfigFallback {
                        reason: format!("failed to create default config: {:#}", e),
                    });
                    return LibraryConfig::default();
                }
            }
            Err(e) => {
                log.emit(SyncEvent::ConfigFallback {
                    reason: format!("config source unreachable: {:#}", e),
                });
                return LibraryConfig::default();
            }
        }

        match source.load(SYNC_CONFIG_KEY).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                log.emit(SyncEvent::ConfigFallback {
                    reason: "sync config not found".to_string(),
                });
                LibraryConfig::default()
            }
            Err(e) => {
                log.emit(SyncEvent::ConfigFallback {
                    reason: format!("failed to load config: {:#}", e),
                });
                LibraryConfig::default()
            }
        }
    }

    async fn fetch_books(&self) -> anyhow::Result<Vec<Book>> {
        let shelf = self
            .books
            .shelf_books()
            .await
            .context("Failed to fetch shelf books")?;
        let notebook = self
            .books
            .notebook_books()
            .await
            .context("Failed to fetch notebook books")?;

        debug!(
            "Fetched {} shelf books and {} notebook books",
            shelf.len(),
            notebook.len()
        );

        self.books
            .enrich(shelf, notebook)
            .await
            .context("Failed to merge book metadata")
    }

    async fn sync_book(
        &self,
        book: &Book,
        mode: SyncMode,
        organize_by_chapter: bool,
        log: &mut EventLog,
    ) -> BookOutcome {
        let outcome = self
            .run_book_pipeline(book, mode, organize_by_chapter, log)
            .await;

        log.phase(&book.book_id, BookPhase::Done);
        log.emit(SyncEvent::BookFinished {
            book_id: book.book_id.clone(),
            title: book.title.clone(),
            outcome: outcome.clone(),
        });

        outcome
    }

    async fn run_book_pipeline(
        &self,
        book: &Book,
        mode: SyncMode,
        organize_by_chapter: bool,
        log: &mut EventLog,
    ) -> BookOutcome {
        let book_id = book.book_id.as_str();
        log.phase(book_id, BookPhase::Pending);

        let lookup = self.records.exists(&book.title, book.author.as_deref()).await;
        let (record_id, created) = match lookup {
            Ok(Some(record_id)) => {
                debug!("{:?} already exists as {}, updating it", book.title, record_id);
                (record_id, false)
            }
            Ok(None) => match self.records.create(book).await {
                Ok(record_id) => (record_id, true),
                Err(e) => {
                    return BookOutcome::Failed {
                        reason: format!("failed to create record: {:#}", e),
                    }
                }
            },
            Err(e) => {
                return BookOutcome::Failed {
                    reason: format!("failed to look up record: {:#}", e),
                }
            }
        };
        log.phase(book_id, BookPhase::ExistenceChecked);

        // a fresh record is empty, whatever the stored watermarks say
        let previous = if mode.is_incremental() && !created {
            match self.state.load(book_id).await {
                Ok(previous) => previous,
                Err(e) => {
                    debug!("No usable sync state for {}: {}", book_id, e);
                    None
                }
            }
        } else {
            None
        };

        let result = self
            .records
            .sync_content(ContentRequest {
                book,
                record_id: &record_id,
                mode,
                previous: previous.as_ref(),
                organize_by_chapter,
            })
            .await;
        log.phase(book_id, BookPhase::ContentSynced);

        if mode.is_incremental() && !result.has_update {
            log.phase(book_id, BookPhase::StateSaveSkipped);
            return BookOutcome::Unchanged;
        }

        // watermarks only move forward once the content has actually been written
        if mode.is_incremental() && result.success {
            let state = SyncState {
                book_id: book_id.to_string(),
                last_sync_time: result.watermark,
                highlights_synckey: result.highlights_synckey.clone(),
                thoughts_synckey: result.thoughts_synckey.clone(),
            };

            match self.state.save(&state).await {
                Ok(()) => log.phase(book_id, BookPhase::StateSaved),
                Err(e) => {
                    log.emit(SyncEvent::StateSaveFailed {
                        book_id: book_id.to_string(),
                        error: e.to_string(),
                    });
                    log.phase(book_id, BookPhase::StateSaveSkipped);
                }
            }
        } else {
            log.phase(book_id, BookPhase::StateSaveSkipped);
        }

        if result.success {
            BookOutcome::Synced
        } else {
            BookOutcome::PartialFailure
        }
    }
}
