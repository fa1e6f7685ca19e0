use crate::config::SyncMode;
use crate::library::{Highlight, Thought};
use crate::state::SyncState;
use chrono::{DateTime, Utc};
use itertools::Itertools;

/// Everything fetched from WeRead for one book, before diffing against the stored state.
#[derive(Debug, Clone, Default)]
pub struct FetchedContent {
    pub highlights: Vec<Highlight>,
    pub highlights_synckey: String,
    pub thoughts: Vec<Thought>,
    pub thoughts_synckey: String,
    /// Client clock when the fetch started.
    pub fetched_at: DateTime<Utc>,
}

impl FetchedContent {
    /// Newest server-side creation time among the fetched items, in epoch millis.
    fn newest_item(&self) -> Option<i64> {
        self.highlights
            .iter()
            .map(|h| h.created_at)
            .chain(self.thoughts.iter().map(|t| t.created_at))
            .max()
            .map(|secs| secs * 1000)
    }

    /// The point up to which this fetch has seen everything.
    ///
    /// Server timestamps are preferred over the local clock, and the watermark
    /// never moves backwards past `previous`.
    pub fn watermark(&self, previous: Option<&SyncState>) -> i64 {
        let previous = previous.map(|p| p.last_sync_time);
        match (self.newest_item(), previous) {
            (Some(newest), Some(previous)) => newest.max(previous),
            (Some(newest), None) => newest,
            (None, Some(previous)) => previous,
            (None, None) => self.fetched_at.timestamp_millis(),
        }
    }
}

/// The part of [`FetchedContent`] that still has to be written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentDelta {
    pub highlights: Vec<Highlight>,
    pub thoughts: Vec<Thought>,
    pub highlights_synckey: String,
    pub thoughts_synckey: String,
    /// Value for the next `SyncState::last_sync_time`, in epoch millis.
    pub watermark: i64,
    pub has_update: bool,
}

impl ContentDelta {
    pub fn compute(previous: Option<&SyncState>, mode: SyncMode, fetched: FetchedContent) -> Self {
        let previous = match previous {
            Some(previous) if mode.is_incremental() => previous,
            _ => {
                return ContentDelta {
                    watermark: fetched.watermark(None),
                    highlights: fetched.highlights,
                    thoughts: fetched.thoughts,
                    highlights_synckey: fetched.highlights_synckey,
                    thoughts_synckey: fetched.thoughts_synckey,
                    has_update: true,
                }
            }
        };

        let watermark = fetched.watermark(Some(previous));

        let since = previous.last_sync_time / 1000;

        let highlights_changed = fetched.highlights_synckey != previous.highlights_synckey;
        let highlights = if highlights_changed {
            fetched
                .highlights
                .into_iter()
                .filter(|h| h.created_at > since)
                .collect()
        } else {
            vec![]
        };

        let thoughts_changed = fetched.thoughts_synckey != previous.thoughts_synckey;
        let thoughts = if thoughts_changed {
            fetched
                .thoughts
                .into_iter()
                .filter(|t| t.created_at > since)
                .collect()
        } else {
            vec![]
        };

        ContentDelta {
            highlights,
            thoughts,
            highlights_synckey: fetched.highlights_synckey,
            thoughts_synckey: fetched.thoughts_synckey,
            watermark,
            has_update: highlights_changed || thoughts_changed,
        }
    }
}

pub trait Chaptered {
    fn chapter_uid(&self) -> Option<i64>;
    fn chapter_title(&self) -> Option<&str>;
}

impl Chaptered for Highlight {
    fn chapter_uid(&self) -> Option<i64> {
        self.chapter_uid
    }

    fn chapter_title(&self) -> Option<&str> {
        self.chapter_title.as_deref()
    }
}

impl Chaptered for Thought {
    fn chapter_uid(&self) -> Option<i64> {
        self.chapter_uid
    }

    fn chapter_title(&self) -> Option<&str> {
        self.chapter_title.as_deref()
    }
}

#[derive(Debug, PartialEq)]
pub struct Chapter<'a, T> {
    pub uid: Option<i64>,
    pub title: Option<&'a str>,
    pub items: Vec<&'a T>,
}

/// Groups items by chapter in reading order. Items without a chapter come last;
/// within a chapter the input order is kept.
pub fn group_by_chapter<'a, T: Chaptered>(items: &'a [T]) -> Vec<Chapter<'a, T>> {
    items
        .iter()
        .sorted_by_key(|item| (item.chapter_uid().is_none(), item.chapter_uid()))
        .chunk_by(|item| item.chapter_uid())
        .into_iter()
        .map(|(uid, group)| {
            let items: Vec<&'a T> = group.collect();
            let title = items.iter().copied().find_map(Chaptered::chapter_title);
            Chapter { uid, title, items }
        })
        .collect()
}
