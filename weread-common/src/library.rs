use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Key used for books without an author when reporting distributions.
pub const UNKNOWN_AUTHOR: &str = "未知作者";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReadingStatus {
    Unread,
    Reading,
    Finished,
}

impl ReadingStatus {
    pub const ALL: [ReadingStatus; 3] = [
        ReadingStatus::Finished,
        ReadingStatus::Reading,
        ReadingStatus::Unread,
    ];

    /// Maps the free-text progress string from WeRead onto a canonical status.
    ///
    /// The finished marker is checked before the in-progress one, so a string
    /// carrying both is classified as finished. Anything else, including an
    /// absent string, is unread.
    pub fn classify(raw: Option<&str>) -> ReadingStatus {
        match raw {
            Some(text) if text.contains("已读") => ReadingStatus::Finished,
            Some(text) if text.contains("在读") => ReadingStatus::Reading,
            _ => ReadingStatus::Unread,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReadingStatus::Unread => "未读",
            ReadingStatus::Reading => "在读",
            ReadingStatus::Finished => "已读",
        }
    }
}

impl Display for ReadingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown reading status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for ReadingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "未读" | "unread" => Ok(ReadingStatus::Unread),
            "在读" | "reading" => Ok(ReadingStatus::Reading),
            "已读" | "finished" => Ok(ReadingStatus::Finished),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub book_id: String,
    pub title: String,
    pub author: Option<String>,
    /// Raw reading-progress text, e.g. `已读` or `在读`.
    pub reading_status: Option<String>,
    pub cover: Option<String>,
    pub category: Option<String>,
    pub progress: Option<i64>,
    pub note_count: i64,
    pub review_count: i64,
    pub bookmark_count: i64,
}

impl Book {
    pub fn new(book_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            title: title.into(),
            author: None,
            reading_status: None,
            cover: None,
            category: None,
            progress: None,
            note_count: 0,
            review_count: 0,
            bookmark_count: 0,
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_reading_status(mut self, status: impl Into<String>) -> Self {
        self.reading_status = Some(status.into());
        self
    }

    pub fn status(&self) -> ReadingStatus {
        ReadingStatus::classify(self.reading_status.as_deref())
    }

    /// Author as seen by the filter: missing authors become the empty string.
    pub fn author_or_empty(&self) -> &str {
        self.author.as_deref().unwrap_or("")
    }

    /// Author as seen by reports: missing or blank authors become [`UNKNOWN_AUTHOR`].
    pub fn author_label(&self) -> &str {
        match self.author.as_deref() {
            Some(author) if !author.trim().is_empty() => author,
            _ => UNKNOWN_AUTHOR,
        }
    }
}

/// Joins shelf and notebook books by id.
///
/// Shelf order is kept; notebook books that are no longer on the shelf are
/// appended. Note counts come from the notebook, missing metadata on a shelf
/// book is filled in from its notebook entry.
pub fn merge_books(shelf: Vec<Book>, notebook: Vec<Book>) -> Vec<Book> {
    let mut notebook: Vec<Option<Book>> = notebook.into_iter().map(Some).collect();

    let mut merged: Vec<Book> = shelf
        .into_iter()
        .map(|mut book| {
            let noted = notebook
                .iter_mut()
                .find(|n| n.as_ref().is_some_and(|n| n.book_id == book.book_id))
                .and_then(Option::take);

            if let Some(noted) = noted {
                book.note_count = noted.note_count;
                book.review_count = noted.review_count;
                book.bookmark_count = noted.bookmark_count;
                book.author = book.author.or(noted.author);
                book.cover = book.cover.or(noted.cover);
                book.category = book.category.or(noted.category);
                book.reading_status = book.reading_status.or(noted.reading_status);
                book.progress = book.progress.or(noted.progress);
            }
            book
        })
        .collect();

    merged.extend(notebook.into_iter().flatten());
    merged
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub id: String,
    pub chapter_uid: Option<i64>,
    pub chapter_title: Option<String>,
    pub text: String,
    /// Epoch seconds.
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thought {
    pub id: String,
    pub chapter_uid: Option<i64>,
    pub chapter_title: Option<String>,
    pub content: String,
    /// The passage the thought was written against.
    pub abstract_text: Option<String>,
    /// Epoch seconds.
    pub created_at: i64,
}
