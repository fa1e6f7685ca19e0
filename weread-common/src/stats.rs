use crate::config::LibraryConfig;
use crate::library::{Book, ReadingStatus};
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

const TOP_AUTHORS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorRank {
    pub author: String,
    pub count: usize,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total: usize,
    pub selected: usize,
    pub finished: usize,
    pub reading: usize,
    pub unread: usize,
    pub authors: HashMap<String, usize>,
    /// Only present while the author filter is restricted.
    pub top_authors: Option<Vec<AuthorRank>>,
    pub enabled_statuses: Vec<ReadingStatus>,
}

impl StatsSnapshot {
    pub fn count(&self, status: ReadingStatus) -> usize {
        match status {
            ReadingStatus::Finished => self.finished,
            ReadingStatus::Reading => self.reading,
            ReadingStatus::Unread => self.unread,
        }
    }
}

/// Distribution of the whole library next to the number of books selected for sync.
pub fn summarize(all: &[Book], filtered: &[Book], config: &LibraryConfig) -> StatsSnapshot {
    let mut snapshot = StatsSnapshot {
        total: all.len(),
        selected: filtered.len(),
        finished: 0,
        reading: 0,
        unread: 0,
        authors: HashMap::new(),
        top_authors: None,
        enabled_statuses: config.enabled_statuses.iter().copied().collect(),
    };

    // first-seen order, needed for stable ranking below. Each bucket keeps the
    // author value the filter compares, so `未知作者` is never reported as
    // enabled while the filter skips those books.
    let mut first_seen: Vec<(&str, &str, usize)> = vec![];

    for book in all {
        match book.status() {
            ReadingStatus::Finished => snapshot.finished += 1,
            ReadingStatus::Reading => snapshot.reading += 1,
            ReadingStatus::Unread => snapshot.unread += 1,
        }

        let author = book.author_label();
        match first_seen.iter_mut().find(|(name, _, _)| *name == author) {
            Some((_, _, count)) => *count += 1,
            None => first_seen.push((author, book.author_or_empty(), 1)),
        }
    }

    snapshot.authors = first_seen
        .iter()
        .map(|(author, _, count)| (author.to_string(), *count))
        .collect();

    if config.enabled_authors.is_restricted() {
        let top = first_seen
            .iter()
            .sorted_by(|a, b| b.2.cmp(&a.2))
            .take(TOP_AUTHORS)
            .map(|(author, filter_key, count)| AuthorRank {
                author: author.to_string(),
                count: *count,
                enabled: config.enabled_authors.allows(filter_key),
            })
            .collect();
        snapshot.top_authors = Some(top);
    }

    snapshot
}

impl Display for StatsSnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== 书籍同步统计 ===")?;
        writeln!(f, "书架总书籍: {} 本", self.total)?;
        for status in ReadingStatus::ALL {
            writeln!(f, "  - {}: {} 本", status, self.count(status))?;
        }
        writeln!(
            f,
            "配置的同步状态: {}",
            self.enabled_statuses.iter().join(", ")
        )?;
        if let Some(top) = &self.top_authors {
            writeln!(f, "作者分布 (前 {}):", top.len())?;
            for rank in top {
                let marker = if rank.enabled { "✓" } else { " " };
                writeln!(f, "  [{}] {}: {} 本", marker, rank.author, rank.count)?;
            }
        }
        write!(f, "将要同步: {} 本书籍", self.selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::filter_books;
    use crate::library::UNKNOWN_AUTHOR;

    fn library() -> Vec<Book> {
        vec![
            Book::new("1", "a").with_author("B").with_reading_status("已读"),
            Book::new("2", "b").with_author("A").with_reading_status("在读"),
            Book::new("3", "c").with_author("A"),
            Book::new("4", "d").with_author("C").with_reading_status("已读"),
            Book::new("5", "e").with_reading_status("在读"),
            Book::new("6", "f").with_author("B"),
            Book::new("7", "g").with_author("D"),
            Book::new("8", "h").with_author("E"),
            Book::new("9", "i").with_author("F"),
        ]
    }

    #[test]
    fn counts_are_over_whole_library() {
        let all = library();
        let config = LibraryConfig::default().with_statuses([ReadingStatus::Finished]);
        let filtered = filter_books(&all, &config).selected;
        let stats = summarize(&all, &filtered, &config);

        assert_eq!(stats.total, 9);
        assert_eq!(stats.selected, 2);
        assert_eq!(stats.finished, 2);
        assert_eq!(stats.reading, 2);
        assert_eq!(stats.unread, 5);
        assert_eq!(stats.authors["A"], 2);
        assert_eq!(stats.authors["B"], 2);
        assert_eq!(stats.authors[UNKNOWN_AUTHOR], 1);
        assert_eq!(stats.authors.values().sum::<usize>(), 9);
    }

    #[test]
    fn top_authors_absent_without_author_filter() {
        let all = library();
        let stats = summarize(&all, &all, &LibraryConfig::default());
        assert_eq!(stats.top_authors, None);
    }

    #[test]
    fn top_authors_are_ranked_with_stable_ties() {
        let all = library();
        let config = LibraryConfig::default().with_authors(["A", "D"]);
        let filtered = filter_books(&all, &config).selected;
        let stats = summarize(&all, &filtered, &config);

        let top = stats.top_authors.expect("author filter is active");
        let names: Vec<_> = top.iter().map(|r| r.author.as_str()).collect();
        assert_eq!(names, vec!["B", "A", "C", UNKNOWN_AUTHOR, "D"]);
        assert_eq!(top[0].count, 2);
        assert!(!top[0].enabled);
        assert!(top[1].enabled);
        assert!(top[4].enabled);
    }

    #[test]
    fn unknown_author_rank_agrees_with_filter() {
        let all = library();
        let config = LibraryConfig::default().with_authors([UNKNOWN_AUTHOR, "A"]);
        let filtered = filter_books(&all, &config).selected;
        let stats = summarize(&all, &filtered, &config);

        assert!(!filtered.iter().any(|b| b.author.is_none()));
        let unknown = stats
            .top_authors
            .unwrap()
            .into_iter()
            .find(|r| r.author == UNKNOWN_AUTHOR)
            .unwrap();
        assert!(!unknown.enabled);
    }

    #[test]
    fn display_mentions_selection() {
        let all = library();
        let config = LibraryConfig::default().with_authors(["A"]);
        let stats = summarize(&all, &all[1..3], &config);
        let rendered = stats.to_string();
        assert!(rendered.contains("书架总书籍: 9 本"));
        assert!(rendered.contains("将要同步: 2 本书籍"));
        assert!(rendered.contains("[✓] A: 2 本"));
    }
}
