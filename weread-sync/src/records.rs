use crate::notion::{callout, heading, quote, rich_text, Block, Notion};
use crate::weread::WeRead;
use anyhow::Context as _;
use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{json, Value};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use weread_common::content::Chaptered;
use weread_common::{
    group_by_chapter, Book, ContentDelta, ContentRequest, ContentSyncResult, Highlight, RecordId,
    RecordStore, Thought,
};

const PROP_TITLE: &str = "书名";
const PROP_AUTHOR: &str = "作者";
const PROP_BOOK_ID: &str = "书籍ID";
const PROP_CATEGORY: &str = "分类";
const PROP_STATUS: &str = "阅读状态";
const PROP_PROGRESS: &str = "阅读进度";

const HIGHLIGHTS_HEADING: &str = "划线";
const THOUGHTS_HEADING: &str = "想法";
const NO_CHAPTER: &str = "未分章节";

/// The reading-library database in Notion, one page per book.
pub struct NotionRecords {
    notion: Notion,
    weread: WeRead,
    database_id: String,
}

impl NotionRecords {
    pub fn new(notion: Notion, weread: WeRead, database_id: impl Into<String>) -> Self {
        Self {
            notion,
            weread,
            database_id: database_id.into(),
        }
    }

    async fn try_sync_content(&self, request: &ContentRequest<'_>) -> anyhow::Result<ContentSyncResult> {
        let book_id = request.book.book_id.as_str();
        let fetched = self
            .weread
            .fetch_content(book_id)
            .await
            .with_context(|| format!("Failed to fetch notes for {}", book_id))?;

        let mut delta = ContentDelta::compute(request.previous, request.mode, fetched);
        if !delta.has_update {
            debug!("No new notes for {:?}", request.book.title);
            return Ok(ContentSyncResult::synced(delta));
        }

        if !request.mode.is_incremental() {
            let removed = self
                .notion
                .clear_children(request.record_id)
                .await
                .context("Failed to clear the book page")?;
            debug!("Cleared {} blocks before full sync", removed);
        } else if !delta.highlights.is_empty() || !delta.thoughts.is_empty() {
            // an earlier append may have failed halfway through
            let written = self
                .written_texts(request.record_id)
                .await
                .context("Failed to read the book page")?;
            let dropped = drop_written(&mut delta, &written);
            if dropped > 0 {
                debug!("{} notes are already on the page", dropped);
            }
        }

        let blocks = render_blocks(&delta.highlights, &delta.thoughts, request.organize_by_chapter);
        if !blocks.is_empty() {
            self.notion
                .append_children(request.record_id, blocks)
                .await
                .context("Failed to write notes to the book page")?;
        }

        info!(
            "Wrote {} highlights and {} thoughts for {:?}",
            delta.highlights.len(),
            delta.thoughts.len(),
            request.book.title
        );

        Ok(ContentSyncResult::synced(delta))
    }

    async fn written_texts(&self, record_id: &str) -> anyhow::Result<HashSet<String>> {
        let blocks: Vec<Block> = self.notion.list_children(record_id).try_collect().await?;
        Ok(blocks.iter().filter_map(Block::plain_text).collect())
    }
}

/// Removes notes whose text is already a block on the page. Returns how many were removed.
fn drop_written(delta: &mut ContentDelta, written: &HashSet<String>) -> usize {
    let before = delta.highlights.len() + delta.thoughts.len();
    delta.highlights.retain(|h| !written.contains(&h.text));
    delta.thoughts.retain(|t| !written.contains(&t.content));
    before - delta.highlights.len() - delta.thoughts.len()
}

fn lookup_filter(title: &str, author: Option<&str>) -> Value {
    let title = json!({ "property": PROP_TITLE, "title": { "equals": title } });
    match author {
        Some(author) => json!({
            "and": [
                title,
                { "property": PROP_AUTHOR, "rich_text": { "equals": author } }
            ]
        }),
        None => title,
    }
}

fn page_body(database_id: &str, book: &Book) -> Value {
    let mut body = json!({
        "parent": { "database_id": database_id },
        "properties": {
            PROP_TITLE: { "title": rich_text(&book.title) },
            PROP_AUTHOR: { "rich_text": rich_text(book.author_or_empty()) },
            PROP_BOOK_ID: { "rich_text": rich_text(&book.book_id) },
            PROP_CATEGORY: { "rich_text": rich_text(book.category.as_deref().unwrap_or_default()) },
            PROP_STATUS: { "select": { "name": book.status().label() } },
            PROP_PROGRESS: { "number": book.progress }
        }
    });

    if let Some(cover) = &book.cover {
        body["cover"] = json!({ "type": "external", "external": { "url": cover } });
    }

    body
}

fn highlight_block(highlight: &Highlight) -> Value {
    quote(&highlight.text)
}

fn thought_block(thought: &Thought) -> Value {
    let children = thought
        .abstract_text
        .as_deref()
        .map(|a| vec![quote(a)])
        .unwrap_or_default();
    callout(&thought.content, children)
}

fn section<T: Chaptered>(
    blocks: &mut Vec<Value>,
    title: &str,
    items: &[T],
    by_chapter: bool,
    render: fn(&T) -> Value,
) {
    if items.is_empty() {
        return;
    }

    blocks.push(heading(2, title));
    if by_chapter {
        for chapter in group_by_chapter(items) {
            blocks.push(heading(3, chapter.title.unwrap_or(NO_CHAPTER)));
            blocks.extend(chapter.items.into_iter().map(render));
        }
    } else {
        blocks.extend(items.iter().map(render));
    }
}

/// Blocks for newly synced notes: a highlights section then a thoughts section.
fn render_blocks(highlights: &[Highlight], thoughts: &[Thought], by_chapter: bool) -> Vec<Value> {
    let mut blocks = Vec::new();
    section(&mut blocks, HIGHLIGHTS_HEADING, highlights, by_chapter, highlight_block);
    section(&mut blocks, THOUGHTS_HEADING, thoughts, by_chapter, thought_block);
    blocks
}

#[async_trait]
impl RecordStore for NotionRecords {
    async fn exists(&self, title: &str, author: Option<&str>) -> anyhow::Result<Option<RecordId>> {
        let page = self
            .notion
            .find_page(&self.database_id, lookup_filter(title, author))
            .await
            .with_context(|| format!("Failed to look up {:?} in Notion", title))?;

        Ok(page.map(|p| p.id))
    }

    async fn create(&self, book: &Book) -> anyhow::Result<RecordId> {
        let page = self
            .notion
            .create_page(&page_body(&self.database_id, book))
            .await
            .with_context(|| format!("Failed to create a page for {:?}", book.title))?;

        info!("Created page {} for {:?}", page.id, book.title);
        Ok(page.id)
    }

    async fn sync_content(&self, request: ContentRequest<'_>) -> ContentSyncResult {
        match self.try_sync_content(&request).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Failed to sync notes for {:?}: {:#}", request.book.title, e);
                ContentSyncResult::failed()
            }
        }
    }
}
