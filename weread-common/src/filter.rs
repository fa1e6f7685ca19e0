use crate::config::LibraryConfig;
use crate::library::{Book, ReadingStatus};
use itertools::Itertools;
use serde::Serialize;
use std::fmt::{Display, Formatter};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    Status,
    Author,
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            SkipReason::Status => "status",
            SkipReason::Author => "author",
        };

        write!(f, "{}", str)
    }
}

/// Why a single book was left out of the sync set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipRecord {
    pub book_id: String,
    pub title: String,
    pub status: ReadingStatus,
    pub author: String,
    pub reasons: Vec<SkipReason>,
}

#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    pub selected: Vec<Book>,
    pub skipped: Vec<SkipRecord>,
}

/// Splits `books` into the ones to sync and the ones to skip.
///
/// The status and author checks are evaluated independently so a skipped book
/// reports every check it failed. The selected books keep their input order.
pub fn filter_books(books: &[Book], config: &LibraryConfig) -> FilterResult {
    info!(
        total = books.len(),
        statuses = %config.enabled_statuses.iter().join(", "),
        authors_restricted = config.enabled_authors.is_restricted(),
        "Filtering books"
    );

    let mut result = FilterResult::default();

    for book in books {
        let status = book.status();
        let author = book.author_or_empty();

        let mut reasons = vec![];
        if !config.enabled_statuses.contains(&status) {
            reasons.push(SkipReason::Status);
        }
        if !config.enabled_authors.allows(author) {
            reasons.push(SkipReason::Author);
        }

        if reasons.is_empty() {
            result.selected.push(book.clone());
        } else {
            debug!(
                "Skipping {:?} (status: {}, author: {:?}, failed: {})",
                book.title,
                status,
                author,
                reasons.iter().join("+")
            );
            result.skipped.push(SkipRecord {
                book_id: book.book_id.clone(),
                title: book.title.clone(),
                status,
                author: author.to_string(),
                reasons,
            });
        }
    }

    info!(
        selected = result.selected.len(),
        skipped = result.skipped.len(),
        "Finished filtering books"
    );

    result
}
