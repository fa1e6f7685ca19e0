pub mod config;
pub mod content;
pub mod db;
pub mod events;
pub mod filter;
pub mod library;
pub mod state;
pub mod stats;
pub mod sync;

// Re-export commonly used types
pub use config::{AuthorFilter, LibraryConfig, SyncMode, SYNC_CONFIG_KEY};
pub use content::{group_by_chapter, ContentDelta, FetchedContent};
pub use db::Database;
pub use events::{BookOutcome, BookPhase, SyncEvent, SyncReport};
pub use filter::{filter_books, FilterResult, SkipReason, SkipRecord};
pub use library::{Book, Highlight, ReadingStatus, Thought};
pub use state::{MemorySyncStateStore, SyncState, SyncStateStore};
pub use stats::{summarize, StatsSnapshot};
pub use sync::{
    BookSource, ConfigSource, ContentRequest, ContentSyncResult, RecordId, RecordStore,
    SyncOptions, SyncOrchestrator,
};
