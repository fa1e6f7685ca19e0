use anyhow::{anyhow, Context as _};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::{Stream, TryStreamExt};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use weread_common::{ConfigSource, LibraryConfig, ReadingStatus};

const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: usize = 100;
/// Notion rejects rich text objects longer than this.
const RICH_TEXT_LIMIT: usize = 2000;

#[derive(Clone)]
pub struct Notion {
    token: String,
    api_endpoint: Url,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    results: Vec<T>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Page {
    pub id: String,
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
}

#[derive(Debug, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    /// The type-specific payload sits under a key named after `kind`.
    #[serde(flatten)]
    pub content: HashMap<String, Value>,
}

impl Block {
    /// The block's own rich text joined back into one string.
    pub fn plain_text(&self) -> Option<String> {
        let parts = self.content.get(&self.kind)?.get("rich_text")?.as_array()?;
        Some(
            parts
                .iter()
                .filter_map(|part| {
                    part.get("plain_text")
                        .or_else(|| part.get("text").and_then(|t| t.get("content")))
                        .and_then(Value::as_str)
                })
                .collect(),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct SelectOption {
    pub name: String,
}

/// The property kinds we read back. Everything else is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PropertyValue {
    Select { select: Option<SelectOption> },
    MultiSelect { multi_select: Vec<SelectOption> },
    #[serde(other)]
    Other,
}

impl Page {
    fn multi_select(&self, property: &str) -> Option<Vec<String>> {
        match self.properties.get(property)? {
            PropertyValue::MultiSelect { multi_select } => {
                Some(multi_select.iter().map(|o| o.name.clone()).collect())
            }
            _ => None,
        }
    }

    fn select(&self, property: &str) -> Option<&str> {
        match self.properties.get(property)? {
            PropertyValue::Select { select } => select.as_ref().map(|o| o.name.as_str()),
            _ => None,
        }
    }
}

impl Notion {
    pub fn new(token: &str) -> anyhow::Result<Self> {
        Ok(Self {
            token: token.to_string(),
            api_endpoint: "https://api.notion.com/v1".parse()?,
            client: reqwest::Client::new(),
        })
    }

    fn url(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = self.api_endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Notion endpoint cannot be a base url"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> anyhow::Result<T> {
        loop {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .header(AUTHORIZATION, format!("Bearer {}", self.token))
                .header("Notion-Version", NOTION_VERSION);

            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let retry_delay = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(5);

                debug!("Rate limited by Notion, retrying in {} seconds", retry_delay);

                tokio::time::sleep(Duration::from_secs(retry_delay)).await;
                continue;
            } else if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                return Err(anyhow!("Notion {} {} failed: {} {}", method, url, status, text));
            }

            return response
                .json::<T>()
                .await
                .with_context(|| format!("Failed to parse Notion response from {}", url));
        }
    }

    /// Pages of a database matching `filter`, following `next_cursor` until exhausted.
    pub fn query_database<'a>(
        &'a self,
        database_id: &'a str,
        filter: Value,
    ) -> impl Stream<Item = anyhow::Result<Page>> + 'a {
        try_stream! {
            let url = self.url(&["databases", database_id, "query"])?;
            let mut cursor: Option<String> = None;

            loop {
                let mut body = json!({ "filter": filter, "page_size": PAGE_SIZE });
                if let Some(cursor) = &cursor {
                    body["start_cursor"] = json!(cursor);
                }

                let response: ListResponse<Page> =
                    self.send(Method::POST, url.clone(), Some(&body)).await?;

                for page in response.results {
                    yield page;
                }

                match response.next_cursor {
                    Some(next) if response.has_more => cursor = Some(next),
                    _ => break,
                }
            }
        }
    }

    pub async fn find_page(&self, database_id: &str, filter: Value) -> anyhow::Result<Option<Page>> {
        let pages = self.query_database(database_id, filter);
        futures::pin_mut!(pages);
        pages.try_next().await
    }

    pub async fn create_page(&self, body: &Value) -> anyhow::Result<Page> {
        let url = self.url(&["pages"])?;
        self.send(Method::POST, url, Some(body)).await
    }

    /// Appends blocks under a page, at most 100 per request.
    pub async fn append_children(&self, block_id: &str, blocks: Vec<Value>) -> anyhow::Result<()> {
        let url = self.url(&["blocks", block_id, "children"])?;
        let total = blocks.len();

        for chunk in blocks.chunks(PAGE_SIZE) {
            let body = json!({ "children": chunk });
            let _: Value = self.send(Method::PATCH, url.clone(), Some(&body)).await?;
        }

        debug!("Appended {} blocks to {}", total, block_id);
        Ok(())
    }

    pub fn list_children<'a>(
        &'a self,
        block_id: &'a str,
    ) -> impl Stream<Item = anyhow::Result<Block>> + 'a {
        try_stream! {
            let mut cursor: Option<String> = None;

            loop {
                let mut url = self.url(&["blocks", block_id, "children"])?;
                url.query_pairs_mut()
                    .append_pair("page_size", &PAGE_SIZE.to_string());
                if let Some(cursor) = &cursor {
                    url.query_pairs_mut().append_pair("start_cursor", cursor);
                }

                let response: ListResponse<Block> = self.send(Method::GET, url, None).await?;

                for block in response.results {
                    yield block;
                }

                match response.next_cursor {
                    Some(next) if response.has_more => cursor = Some(next),
                    _ => break,
                }
            }
        }
    }

    pub async fn delete_block(&self, block_id: &str) -> anyhow::Result<()> {
        let url = self.url(&["blocks", block_id])?;
        let _: Value = self.send(Method::DELETE, url, None).await?;
        Ok(())
    }

    /// Removes every top level block of a page.
    pub async fn clear_children(&self, block_id: &str) -> anyhow::Result<usize> {
        let blocks: Vec<Block> = self.list_children(block_id).try_collect().await?;

        for block in &blocks {
            self.delete_block(&block.id).await?;
        }

        debug!("Removed {} blocks from {}", blocks.len(), block_id);
        Ok(blocks.len())
    }
}

pub fn rich_text(content: &str) -> Value {
    let chars: Vec<char> = content.chars().collect();
    let parts: Vec<Value> = chars
        .chunks(RICH_TEXT_LIMIT)
        .map(|chunk| {
            json!({
                "type": "text",
                "text": { "content": chunk.iter().collect::<String>() }
            })
        })
        .collect();
    Value::Array(parts)
}

pub fn heading(level: u8, text: &str) -> Value {
    let kind = format!("heading_{}", level.clamp(1, 3));
    let mut block = json!({ "object": "block", "type": kind });
    block[kind.as_str()] = json!({ "rich_text": rich_text(text) });
    block
}

pub fn quote(text: &str) -> Value {
    json!({
        "object": "block",
        "type": "quote",
        "quote": { "rich_text": rich_text(text) }
    })
}

pub fn callout(text: &str, children: Vec<Value>) -> Value {
    let mut callout = json!({
        "rich_text": rich_text(text),
        "icon": { "type": "emoji", "emoji": "💡" }
    });
    if !children.is_empty() {
        callout["children"] = Value::Array(children);
    }

    json!({
        "object": "block",
        "type": "callout",
        "callout": callout
    })
}

fn title_filter(property: &str, value: &str) -> Value {
    json!({ "property": property, "title": { "equals": value } })
}

/// The config database, holding a single page named after the config key.
pub struct NotionConfig {
    notion: Notion,
    database_id: String,
}

const CONFIG_NAME: &str = "名称";
const CONFIG_STATUSES: &str = "阅读状态";
const CONFIG_AUTHORS: &str = "作者";
const CONFIG_SYNC_MODE: &str = "全量/增量";
const CONFIG_BY_CHAPTER: &str = "按章节划线";

impl NotionConfig {
    pub fn new(notion: Notion, database_id: impl Into<String>) -> Self {
        Self {
            notion,
            database_id: database_id.into(),
        }
    }
}

/// A missing status column means the user never restricted it.
fn config_from_page(page: &Page) -> LibraryConfig {
    let statuses = page.multi_select(CONFIG_STATUSES).unwrap_or_else(|| {
        ReadingStatus::ALL
            .iter()
            .map(|s| s.label().to_string())
            .collect()
    });
    let authors = page.multi_select(CONFIG_AUTHORS).unwrap_or_default();

    LibraryConfig::from_options(
        &statuses,
        &authors,
        page.select(CONFIG_SYNC_MODE),
        page.select(CONFIG_BY_CHAPTER),
    )
}

#[async_trait]
impl ConfigSource for NotionConfig {
    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        let page = self
            .notion
            .find_page(&self.database_id, title_filter(CONFIG_NAME, key))
            .await
            .context("Failed to query the config database")?;
        Ok(page.is_some())
    }

    async fn create_default(&self, key: &str) -> anyhow::Result<()> {
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": {
                CONFIG_NAME: { "title": rich_text(key) },
                CONFIG_STATUSES: {
                    "multi_select": [
                        { "name": ReadingStatus::Finished.label() },
                        { "name": ReadingStatus::Reading.label() }
                    ]
                }
            }
        });

        let page = self
            .notion
            .create_page(&body)
            .await
            .context("Failed to create the default sync config")?;
        info!("Created default sync config page {}", page.id);
        Ok(())
    }

    async fn load(&self, key: &str) -> anyhow::Result<Option<LibraryConfig>> {
        let page = self
            .notion
            .find_page(&self.database_id, title_filter(CONFIG_NAME, key))
            .await
            .context("Failed to load the sync config")?;

        Ok(page.as_ref().map(config_from_page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weread_common::{AuthorFilter, SyncMode};

    fn page(properties: Value) -> Page {
        serde_json::from_value(json!({ "id": "page-1", "properties": properties })).unwrap()
    }

    #[test]
    fn config_page_is_parsed() {
        let page = page(json!({
            "名称": { "id": "title", "type": "title", "title": [] },
            "阅读状态": {
                "id": "a",
                "type": "multi_select",
                "multi_select": [{ "id": "1", "name": "已读" }, { "id": "2", "name": "想读" }]
            },
            "作者": {
                "id": "b",
                "type": "multi_select",
                "multi_select": [{ "id": "3", "name": "刘慈欣" }]
            },
            "全量/增量": { "id": "c", "type": "select", "select": { "name": "全量" } },
            "按章节划线": { "id": "d", "type": "select", "select": { "name": "是" } }
        }));

        let config = config_from_page(&page);
        assert_eq!(
            config.enabled_statuses.iter().copied().collect::<Vec<_>>(),
            vec![ReadingStatus::Finished]
        );
        assert!(config.enabled_authors.allows("刘慈欣"));
        assert!(!config.enabled_authors.allows("余华"));
        assert_eq!(config.sync_mode, Some(SyncMode::Full));
        assert!(config.organize_by_chapter());
    }

    #[test]
    fn sparse_config_page_uses_defaults() {
        let page = page(json!({
            "作者": { "id": "b", "type": "multi_select", "multi_select": [] },
            "全量/增量": { "id": "c", "type": "select", "select": null }
        }));

        let config = config_from_page(&page);
        assert_eq!(config.enabled_statuses.len(), 3);
        assert_eq!(config.enabled_authors, AuthorFilter::Unrestricted);
        assert_eq!(config.sync_mode, None);
        assert!(!config.organize_by_chapter());
    }

    #[test]
    fn long_text_is_split() {
        let text = "字".repeat(RICH_TEXT_LIMIT + 10);
        let parts = rich_text(&text);
        let parts = parts.as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[1]["text"]["content"].as_str().unwrap().chars().count(),
            10
        );
        assert_eq!(rich_text("").as_array().unwrap().len(), 0);
    }

    #[test]
    fn block_shapes() {
        let h = heading(2, "划线");
        assert_eq!(h["type"], "heading_2");
        assert_eq!(h["heading_2"]["rich_text"][0]["text"]["content"], "划线");

        let c = callout("想法", vec![quote("原文")]);
        assert_eq!(c["callout"]["children"][0]["type"], "quote");
        assert!(callout("想法", vec![]).get("callout").unwrap().get("children").is_none());
    }

    #[test]
    fn block_text_is_rejoined() {
        let block: Block = serde_json::from_value(json!({
            "object": "block",
            "id": "blk",
            "type": "quote",
            "has_children": false,
            "quote": {
                "rich_text": [
                    { "type": "text", "text": { "content": "给岁月" }, "plain_text": "给岁月" },
                    { "type": "text", "text": { "content": "以文明" } }
                ]
            }
        }))
        .unwrap();
        assert_eq!(block.plain_text().as_deref(), Some("给岁月以文明"));

        let divider: Block =
            serde_json::from_value(json!({ "id": "d", "type": "divider", "divider": {} })).unwrap();
        assert_eq!(divider.plain_text(), None);
    }

    #[test]
    fn api_urls() {
        let notion = Notion::new("secret").unwrap();
        assert_eq!(
            notion.url(&["databases", "db1", "query"]).unwrap().as_str(),
            "https://api.notion.com/v1/databases/db1/query"
        );
    }
}
