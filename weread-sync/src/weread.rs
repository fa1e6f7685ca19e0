use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{COOKIE, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::Duration;
use tracing::{debug, info};
use weread_common::{Book, BookSource, FetchedContent, Highlight, Thought};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

#[derive(Clone)]
pub struct WeRead {
    cookie: String,
    api_endpoint: Url,
    client: reqwest::Client,
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Resource {
    Shelf,
    Notebook,
    Bookmarks,
    Reviews,
}

impl Resource {
    fn path(&self) -> &'static [&'static str] {
        match self {
            Resource::Shelf => &["web", "shelf", "sync"],
            Resource::Notebook => &["api", "user", "notebook"],
            Resource::Bookmarks => &["web", "book", "bookmarklist"],
            Resource::Reviews => &["web", "review", "list"],
        }
    }
}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            Resource::Shelf => "shelf",
            Resource::Notebook => "notebook",
            Resource::Bookmarks => "bookmarks",
            Resource::Reviews => "reviews",
        };

        write!(f, "{}", str)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShelfResponse {
    #[serde(default)]
    books: Vec<ShelfBook>,
    #[serde(default)]
    book_progress: Vec<BookProgress>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShelfBook {
    book_id: String,
    title: String,
    author: Option<String>,
    cover: Option<String>,
    category: Option<String>,
    #[serde(default)]
    finish_reading: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookProgress {
    book_id: String,
    #[serde(default)]
    progress: i64,
}

#[derive(Debug, Deserialize)]
struct NotebookResponse {
    #[serde(default)]
    books: Vec<NotebookEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotebookEntry {
    book_id: String,
    book: NotebookBook,
    #[serde(default)]
    note_count: i64,
    #[serde(default)]
    review_count: i64,
    #[serde(default)]
    bookmark_count: i64,
}

#[derive(Debug, Deserialize)]
struct NotebookBook {
    title: String,
    author: Option<String>,
    cover: Option<String>,
    category: Option<String>,
}

impl From<NotebookEntry> for Book {
    fn from(entry: NotebookEntry) -> Self {
        Book {
            book_id: entry.book_id,
            title: entry.book.title,
            author: entry.book.author,
            reading_status: None,
            cover: entry.book.cover,
            category: entry.book.category,
            progress: None,
            note_count: entry.note_count,
            review_count: entry.review_count,
            bookmark_count: entry.bookmark_count,
        }
    }
}

impl ShelfResponse {
    /// Shelf books with their reading status text derived from the progress entries.
    fn into_books(self) -> Vec<Book> {
        let progress: HashMap<String, i64> = self
            .book_progress
            .into_iter()
            .map(|p| (p.book_id, p.progress))
            .collect();

        self.books
            .into_iter()
            .map(|shelf_book| {
                let progress = progress.get(&shelf_book.book_id).copied();
                let status = if shelf_book.finish_reading == 1 {
                    "已读"
                } else if progress.unwrap_or(0) > 0 {
                    "在读"
                } else {
                    "未读"
                };

                Book {
                    book_id: shelf_book.book_id,
                    title: shelf_book.title,
                    author: shelf_book.author,
                    reading_status: Some(status.to_string()),
                    cover: shelf_book.cover,
                    category: shelf_book.category,
                    progress,
                    note_count: 0,
                    review_count: 0,
                    bookmark_count: 0,
                }
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct BookmarkListResponse {
    #[serde(default)]
    updated: Vec<Bookmark>,
    #[serde(default)]
    chapters: Vec<ChapterInfo>,
    #[serde(default)]
    synckey: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bookmark {
    bookmark_id: String,
    chapter_uid: Option<i64>,
    mark_text: String,
    #[serde(default)]
    create_time: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterInfo {
    chapter_uid: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ReviewListResponse {
    #[serde(default)]
    reviews: Vec<ReviewEntry>,
    #[serde(default)]
    synckey: Value,
}

#[derive(Debug, Deserialize)]
struct ReviewEntry {
    review: Review,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Review {
    review_id: String,
    #[serde(default)]
    content: String,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    chapter_uid: Option<i64>,
    chapter_name: Option<String>,
    #[serde(default)]
    create_time: i64,
}

impl From<Review> for Thought {
    fn from(review: Review) -> Self {
        Thought {
            id: review.review_id,
            chapter_uid: review.chapter_uid,
            chapter_title: review.chapter_name,
            content: review.content,
            abstract_text: review.abstract_text.filter(|a| !a.is_empty()),
            created_at: review.create_time,
        }
    }
}

impl BookmarkListResponse {
    fn into_highlights(self) -> Vec<Highlight> {
        let chapters: HashMap<i64, String> = self
            .chapters
            .into_iter()
            .map(|c| (c.chapter_uid, c.title))
            .collect();

        self.updated
            .into_iter()
            .map(|bookmark| Highlight {
                id: bookmark.bookmark_id,
                chapter_title: bookmark
                    .chapter_uid
                    .and_then(|uid| chapters.get(&uid).cloned()),
                chapter_uid: bookmark.chapter_uid,
                text: bookmark.mark_text,
                created_at: bookmark.create_time,
            })
            .collect()
    }
}

/// Synckeys come back as numbers or strings depending on the endpoint.
fn synckey_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// WeRead reports failures in the body with an `errcode`, often under a 200.
fn check_errcode(raw: &Value) -> anyhow::Result<()> {
    match raw.get("errcode").and_then(Value::as_i64) {
        None | Some(0) => Ok(()),
        Some(-2012) => Err(anyhow!("WeRead session expired, refresh WEREAD_COOKIE")),
        Some(code) => Err(anyhow!(
            "WeRead api error {}: {}",
            code,
            raw.get("errmsg").and_then(Value::as_str).unwrap_or("unknown")
        )),
    }
}

impl WeRead {
    pub fn new(cookie: &str) -> anyhow::Result<Self> {
        Ok(Self {
            cookie: cookie.to_string(),
            api_endpoint: "https://weread.qq.com".parse()?,
            client: reqwest::Client::new(),
        })
    }

    pub async fn fetch_content(&self, book_id: &str) -> anyhow::Result<FetchedContent> {
        let fetched_at = Utc::now();
        let bookmarks: BookmarkListResponse = self
            .fetch(Resource::Bookmarks, &[("bookId", book_id)])
            .await?;
        let highlights_synckey = synckey_string(&bookmarks.synckey);
        let highlights = bookmarks.into_highlights();

        let reviews: ReviewListResponse = self
            .fetch(
                Resource::Reviews,
                &[
                    ("bookId", book_id),
                    ("listType", "11"),
                    ("mine", "1"),
                    ("synckey", "0"),
                ],
            )
            .await?;
        let thoughts_synckey = synckey_string(&reviews.synckey);
        let thoughts: Vec<Thought> = reviews
            .reviews
            .into_iter()
            .map(|entry| entry.review.into())
            .collect();

        debug!(
            "Fetched {} highlights and {} thoughts for book {}",
            highlights.len(),
            thoughts.len(),
            book_id
        );

        Ok(FetchedContent {
            highlights,
            highlights_synckey,
            thoughts,
            thoughts_synckey,
            fetched_at,
        })
    }

    fn resource_url(&self, resource: Resource, query: &[(&str, &str)]) -> anyhow::Result<Url> {
        let mut url = self.api_endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("WeRead endpoint cannot be a base url"))?
            .pop_if_empty()
            .extend(resource.path());

        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        Ok(url)
    }

    pub(crate) async fn fetch<T: DeserializeOwned>(
        &self,
        resource: Resource,
        query: &[(&str, &str)],
    ) -> anyhow::Result<T> {
        let url = self.resource_url(resource, query)?;
        debug!("WeRead api url: {}", url);

        loop {
            let response = self
                .client
                .get(url.clone())
                .header(COOKIE, &self.cookie)
                .header(USER_AGENT, DEFAULT_USER_AGENT)
                .send()
                .await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let retry_delay = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(5);

                debug!("Rate limited, retrying in {} seconds", retry_delay);

                tokio::time::sleep(Duration::from_secs(retry_delay)).await;
                continue;
            } else if !response.status().is_success() {
                return Err(anyhow!("Unexpected response from WeRead: {:?}", response));
            }

            let raw = response.json::<Value>().await?;
            check_errcode(&raw)?;

            return serde_json::from_value(raw)
                .with_context(|| format!("Failed to parse WeRead {} response", resource));
        }
    }
}

#[async_trait]
impl BookSource for WeRead {
    async fn shelf_books(&self) -> anyhow::Result<Vec<Book>> {
        let shelf: ShelfResponse = self.fetch(Resource::Shelf, &[]).await?;
        let books = shelf.into_books();
        info!("Fetched {} books from the WeRead shelf", books.len());
        Ok(books)
    }

    async fn notebook_books(&self) -> anyhow::Result<Vec<Book>> {
        let notebook: NotebookResponse = self.fetch(Resource::Notebook, &[]).await?;
        info!("Fetched {} books from the WeRead notebook", notebook.books.len());
        Ok(notebook.books.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weread_common::ReadingStatus;

    #[test]
    fn shelf_status_from_progress() {
        let shelf: ShelfResponse = serde_json::from_value(json!({
            "books": [
                {"bookId": "1", "title": "三体", "author": "刘慈欣", "finishReading": 1},
                {"bookId": "2", "title": "活着", "author": "余华", "finishReading": 0},
                {"bookId": "3", "title": "围城"}
            ],
            "bookProgress": [
                {"bookId": "2", "progress": 35},
                {"bookId": "3", "progress": 0}
            ]
        }))
        .unwrap();

        let books = shelf.into_books();
        let statuses: Vec<_> = books.iter().map(Book::status).collect();
        assert_eq!(
            statuses,
            vec![
                ReadingStatus::Finished,
                ReadingStatus::Reading,
                ReadingStatus::Unread
            ]
        );
        assert_eq!(books[1].progress, Some(35));
        assert_eq!(books[2].author, None);
    }

    #[test]
    fn notebook_entry_to_book() {
        let notebook: NotebookResponse = serde_json::from_value(json!({
            "books": [{
                "bookId": "9",
                "book": {"title": "人类简史", "author": "赫拉利"},
                "noteCount": 12,
                "reviewCount": 3
            }]
        }))
        .unwrap();

        let book: Book = notebook.books.into_iter().next().unwrap().into();
        assert_eq!(book.book_id, "9");
        assert_eq!(book.note_count, 12);
        assert_eq!(book.review_count, 3);
        assert_eq!(book.bookmark_count, 0);
        assert_eq!(book.reading_status, None);
    }

    #[test]
    fn bookmarks_carry_chapter_titles() {
        let bookmarks: BookmarkListResponse = serde_json::from_value(json!({
            "updated": [
                {"bookmarkId": "b1", "chapterUid": 2, "markText": "给岁月以文明", "createTime": 100},
                {"bookmarkId": "b2", "markText": "无章节"}
            ],
            "chapters": [{"chapterUid": 2, "title": "第二章"}],
            "synckey": 1700000000
        }))
        .unwrap();

        assert_eq!(synckey_string(&bookmarks.synckey), "1700000000");
        let highlights = bookmarks.into_highlights();
        assert_eq!(highlights[0].chapter_title.as_deref(), Some("第二章"));
        assert_eq!(highlights[0].created_at, 100);
        assert_eq!(highlights[1].chapter_title, None);
    }

    #[test]
    fn review_to_thought() {
        let reviews: ReviewListResponse = serde_json::from_value(json!({
            "reviews": [{"review": {
                "reviewId": "r1",
                "content": "深刻",
                "abstract": "",
                "chapterUid": 4,
                "chapterName": "尾声",
                "createTime": 5
            }}],
            "synckey": "abc"
        }))
        .unwrap();

        assert_eq!(synckey_string(&reviews.synckey), "abc");
        let thought: Thought = reviews.reviews.into_iter().next().unwrap().review.into();
        assert_eq!(thought.content, "深刻");
        assert_eq!(thought.abstract_text, None);
        assert_eq!(thought.chapter_title.as_deref(), Some("尾声"));
    }

    #[test]
    fn errcode_is_an_error() {
        assert!(check_errcode(&json!({"books": []})).is_ok());
        assert!(check_errcode(&json!({"errcode": 0})).is_ok());
        let expired = check_errcode(&json!({"errcode": -2012, "errmsg": "登录超时"})).unwrap_err();
        assert!(expired.to_string().contains("WEREAD_COOKIE"));
        assert!(check_errcode(&json!({"errcode": -1})).is_err());
    }

    #[test]
    fn resource_urls() {
        let weread = WeRead::new("wr_skey=abc").unwrap();
        assert_eq!(
            weread.resource_url(Resource::Shelf, &[]).unwrap().as_str(),
            "https://weread.qq.com/web/shelf/sync"
        );
        assert_eq!(
            weread
                .resource_url(Resource::Bookmarks, &[("bookId", "42")])
                .unwrap()
                .as_str(),
            "https://weread.qq.com/web/book/bookmarklist?bookId=42"
        );
    }

    #[test]
    fn missing_synckey_is_empty() {
        assert_eq!(synckey_string(&Value::Null), "");
    }
}
