use crate::config::{LibraryConfig, SyncMode};
use crate::filter::SkipRecord;
use crate::stats::StatsSnapshot;
use itertools::Itertools;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use tracing::{debug, info, warn};

/// Lifecycle of a single book inside a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BookPhase {
    Pending,
    ExistenceChecked,
    ContentSynced,
    StateSaved,
    StateSaveSkipped,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BookOutcome {
    Synced,
    /// The record exists remotely but its content could not be written.
    PartialFailure,
    Failed { reason: String },
    /// Incremental run and nothing changed since the last sync.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SyncEvent {
    ConfigFallback {
        reason: String,
    },
    ConfigResolved {
        config: LibraryConfig,
        mode: SyncMode,
    },
    Skipped(SkipRecord),
    Stats(StatsSnapshot),
    Phase {
        book_id: String,
        phase: BookPhase,
    },
    StateSaveFailed {
        book_id: String,
        error: String,
    },
    BookFinished {
        book_id: String,
        title: String,
        outcome: BookOutcome,
    },
}

/// Ordered record of everything observable that happened during a run.
///
/// Every event is also forwarded to `tracing`, so callers may either render the
/// log output or inspect the events directly.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<SyncEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: SyncEvent) {
        match &event {
            SyncEvent::ConfigFallback { reason } => {
                warn!("Using default config (all statuses, any author): {}", reason)
            }
            SyncEvent::ConfigResolved { config, mode } => info!(
                mode = %mode,
                statuses = %config.enabled_statuses.iter().join(", "),
                "Resolved library config"
            ),
            SyncEvent::Skipped(record) => debug!(
                book_id = %record.book_id,
                reasons = %record.reasons.iter().join("+"),
                "Skipping {:?}",
                record.title
            ),
            SyncEvent::Stats(snapshot) => info!("\n{}", snapshot),
            SyncEvent::Phase { book_id, phase } => debug!(book_id = %book_id, "{:?}", phase),
            SyncEvent::StateSaveFailed { book_id, error } => {
                warn!(book_id = %book_id, "Failed to save sync state: {}", error)
            }
            SyncEvent::BookFinished {
                book_id,
                title,
                outcome,
            } => match outcome {
                BookOutcome::Synced => info!(book_id = %book_id, "Synced {:?}", title),
                BookOutcome::PartialFailure => warn!(
                    book_id = %book_id,
                    "Metadata for {:?} synced but content sync failed", title
                ),
                BookOutcome::Failed { reason } => {
                    warn!(book_id = %book_id, "Failed to sync {:?}: {}", title, reason)
                }
                BookOutcome::Unchanged => {
                    info!(book_id = %book_id, "No new content for {:?}, skipped", title)
                }
            },
        }

        self.events.push(event);
    }

    pub fn phase(&mut self, book_id: &str, phase: BookPhase) {
        self.emit(SyncEvent::Phase {
            book_id: book_id.to_string(),
            phase,
        });
    }

    pub fn into_events(self) -> Vec<SyncEvent> {
        self.events
    }
}

/// Totals of a finished run.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub success: usize,
    pub failure: usize,
    pub skipped: usize,
    pub events: Vec<SyncEvent>,
}

impl SyncReport {
    pub fn record(&mut self, outcome: &BookOutcome) {
        match outcome {
            BookOutcome::Synced => self.success += 1,
            BookOutcome::PartialFailure | BookOutcome::Failed { .. } => self.failure += 1,
            BookOutcome::Unchanged => self.skipped += 1,
        }
    }

    pub fn phases_of<'a>(&'a self, book_id: &'a str) -> impl Iterator<Item = BookPhase> + 'a {
        self.events.iter().filter_map(move |event| match event {
            SyncEvent::Phase { book_id: id, phase } if id == book_id => Some(*phase),
            _ => None,
        })
    }

    pub fn outcome_of(&self, book_id: &str) -> Option<&BookOutcome> {
        self.events.iter().find_map(|event| match event {
            SyncEvent::BookFinished {
                book_id: id,
                outcome,
                ..
            } if id == book_id => Some(outcome),
            _ => None,
        })
    }
}

impl Display for SyncReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "成功: {} 本，失败: {} 本，跳过(无更新): {} 本",
            self.success, self.failure, self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_counts_outcomes() {
        let mut report = SyncReport::default();
        report.record(&BookOutcome::Synced);
        report.record(&BookOutcome::PartialFailure);
        report.record(&BookOutcome::Failed {
            reason: "boom".into(),
        });
        report.record(&BookOutcome::Unchanged);

        assert_eq!((report.success, report.failure, report.skipped), (1, 2, 1));
        assert_eq!(
            report.to_string(),
            "成功: 1 本，失败: 2 本，跳过(无更新): 1 本"
        );
    }

    #[test]
    fn log_keeps_order() {
        let mut log = EventLog::new();
        log.phase("1", BookPhase::Pending);
        log.phase("1", BookPhase::Done);

        let report = SyncReport {
            events: log.into_events(),
            ..SyncReport::default()
        };
        assert_eq!(
            report.phases_of("1").collect::<Vec<_>>(),
            vec![BookPhase::Pending, BookPhase::Done]
        );
        assert_eq!(report.phases_of("2").count(), 0);
    }
}
