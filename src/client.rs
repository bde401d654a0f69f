//! Async remote client for the block-structured workspace API.
//!
//! The [`RemoteApi`] trait is the seam the bridge depends on; it is
//! automocked for tests. [`RemoteClient`] is the reqwest-backed
//! implementation, with the raw HTTP exchange behind the small [`HttpSend`]
//! trait so the retry policy is testable without a network.
//!
//! Retry contract: HTTP 429 and 5xx are retried up to `max_retries` times
//! with a fixed `retry_delay` between attempts, then surface as a connection
//! error. Any other non-2xx status surfaces immediately with status and body.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::config::RemoteConfig;
use crate::error::{SyncError, SyncResult};

/// Immutable snapshot of a remote page, re-fetched on demand.
#[derive(Debug, Clone)]
pub struct RemotePage {
    pub id: String,
    pub title: String,
    pub properties: Value,
    pub last_edited_time: DateTime<Utc>,
}

/// Immutable snapshot of a remote database and its pages.
#[derive(Debug, Clone)]
pub struct RemoteDatabase {
    pub id: String,
    pub title: String,
    pub description: String,
    pub properties: Value,
    pub pages: Vec<RemotePage>,
    pub last_edited_time: DateTime<Utc>,
}

/// Where a created page hangs in the remote hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentRef {
    Page(String),
    Database(String),
}

/// Contract between the sync bridge and the remote service. Only the subset
/// needed for page/database CRUD and block upload.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Cheap credential/connectivity probe.
    async fn verify_connection(&self) -> SyncResult<bool>;

    async fn get_page(&self, page_id: &str) -> SyncResult<RemotePage>;

    /// Fetches the database and all of its pages (paginates the query until
    /// `has_more` is false).
    async fn get_database(&self, database_id: &str) -> SyncResult<RemoteDatabase>;

    /// Look up a page in a database by exact title.
    async fn find_page(&self, database_id: &str, title: &str) -> SyncResult<Option<RemotePage>>;

    async fn create_page(
        &self,
        parent: ParentRef,
        title: &str,
        blocks: Vec<Value>,
    ) -> SyncResult<RemotePage>;

    /// Replace the page's content blocks with the given ones.
    async fn update_page(&self, page_id: &str, blocks: Vec<Value>) -> SyncResult<RemotePage>;

    /// All content blocks of a page, in order (paginated).
    async fn get_page_blocks(&self, page_id: &str) -> SyncResult<Vec<Value>>;
}

/// One raw HTTP exchange. Implemented over reqwest in production and by
/// scripted fakes in tests.
#[async_trait]
pub trait HttpSend: Send + Sync {
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&Value>,
    ) -> SyncResult<HttpResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Production transport over a shared reqwest client.
pub struct ReqwestSend {
    inner: reqwest::Client,
}

impl ReqwestSend {
    pub fn new(config: &RemoteConfig) -> SyncResult<Self> {
        let inner = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(config.timeout.connect))
            .timeout(std::time::Duration::from_secs(
                config.timeout.read.max(config.timeout.write),
            ))
            .build()
            .map_err(|e| SyncError::Connection(format!("failed to build HTTP client: {e}")))?;
        Ok(ReqwestSend { inner })
    }
}

#[async_trait]
impl HttpSend for ReqwestSend {
    async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&Value>,
    ) -> SyncResult<HttpResponse> {
        let mut request = self.inner.request(method, url).headers(headers.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Connection(format!("request to {url} failed: {e}")))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Connection(format!("reading response from {url}: {e}")))?;
        Ok(HttpResponse { status, body })
    }
}

/// Reqwest-backed implementation of [`RemoteApi`].
pub struct RemoteClient<S: HttpSend = ReqwestSend> {
    base_url: String,
    headers: HeaderMap,
    max_retries: u32,
    retry_delay: std::time::Duration,
    transport: S,
}

impl RemoteClient<ReqwestSend> {
    pub fn new(config: &RemoteConfig) -> SyncResult<Self> {
        let transport = ReqwestSend::new(config)?;
        Self::with_transport(config, transport)
    }
}

impl<S: HttpSend> RemoteClient<S> {
    pub fn with_transport(config: &RemoteConfig, transport: S) -> SyncResult<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in config.headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| SyncError::Configuration(format!("invalid header {name}: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| SyncError::Configuration(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }
        Ok(RemoteClient {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            headers,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay_duration(),
            transport,
        })
    }

    /// Issue one API request with the retry-on-rate-limit policy applied.
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> SyncResult<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut retries = 0;
        loop {
            let response = self
                .transport
                .send(method.clone(), &url, &self.headers, body.as_ref())
                .await?;
            match response.status {
                200..=299 => {
                    return serde_json::from_str(&response.body).map_err(|e| {
                        SyncError::RemoteApi {
                            status: response.status,
                            body: format!("response was not valid JSON: {e}"),
                        }
                    });
                }
                status @ (429 | 500..=599) if retries < self.max_retries => {
                    retries += 1;
                    warn!(
                        status,
                        retries,
                        max_retries = self.max_retries,
                        url = %url,
                        "retryable remote failure, delaying before retry"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                status @ (429 | 500..=599) => {
                    return Err(SyncError::Connection(format!(
                        "retry budget exhausted after {retries} retries (last status {status}) for {url}"
                    )));
                }
                status => {
                    return Err(SyncError::RemoteApi {
                        status,
                        body: response.body,
                    });
                }
            }
        }
    }

    async fn query_database_pages(&self, database_id: &str) -> SyncResult<Vec<RemotePage>> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "page_size": 100 });
            if let Some(cursor) = &cursor {
                body["start_cursor"] = json!(cursor);
            }
            let response = self
                .request(
                    Method::POST,
                    &format!("/databases/{database_id}/query"),
                    Some(body),
                )
                .await?;
            for result in response["results"].as_array().into_iter().flatten() {
                pages.push(parse_page(result)?);
            }
            match next_cursor(&response)? {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!(database_id, pages = pages.len(), "queried database pages");
        Ok(pages)
    }

    async fn list_block_children(&self, block_id: &str) -> SyncResult<Vec<Value>> {
        let mut children = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let path = match &cursor {
                Some(cursor) => {
                    format!("/blocks/{block_id}/children?page_size=100&start_cursor={cursor}")
                }
                None => format!("/blocks/{block_id}/children?page_size=100"),
            };
            let response = self.request(Method::GET, &path, None).await?;
            if let Some(results) = response["results"].as_array() {
                children.extend(results.iter().cloned());
            }
            match next_cursor(&response)? {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(children)
    }
}

#[async_trait]
impl<S: HttpSend> RemoteApi for RemoteClient<S> {
    async fn verify_connection(&self) -> SyncResult<bool> {
        match self.request(Method::GET, "/users/me", None).await {
            Ok(_) => Ok(true),
            Err(SyncError::RemoteApi { status: 401, .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_page(&self, page_id: &str) -> SyncResult<RemotePage> {
        let value = self
            .request(Method::GET, &format!("/pages/{page_id}"), None)
            .await?;
        parse_page(&value)
    }

    async fn get_database(&self, database_id: &str) -> SyncResult<RemoteDatabase> {
        let value = self
            .request(Method::GET, &format!("/databases/{database_id}"), None)
            .await?;
        let pages = self.query_database_pages(database_id).await?;
        Ok(RemoteDatabase {
            id: value["id"].as_str().unwrap_or(database_id).to_string(),
            title: rich_text_to_plain(&value["title"]),
            description: rich_text_to_plain(&value["description"]),
            properties: value["properties"].clone(),
            pages,
            last_edited_time: parse_timestamp(&value["last_edited_time"])?,
        })
    }

    async fn find_page(&self, database_id: &str, title: &str) -> SyncResult<Option<RemotePage>> {
        let body = json!({
            "page_size": 1,
            "filter": { "property": "title", "title": { "equals": title } },
        });
        let response = self
            .request(
                Method::POST,
                &format!("/databases/{database_id}/query"),
                Some(body),
            )
            .await?;
        match response["results"].as_array().and_then(|r| r.first()) {
            Some(result) => Ok(Some(parse_page(result)?)),
            None => Ok(None),
        }
    }

    async fn create_page(
        &self,
        parent: ParentRef,
        title: &str,
        blocks: Vec<Value>,
    ) -> SyncResult<RemotePage> {
        let parent = match parent {
            ParentRef::Page(id) => json!({ "page_id": id }),
            ParentRef::Database(id) => json!({ "database_id": id }),
        };
        let body = json!({
            "parent": parent,
            "properties": {
                "title": { "title": [{ "text": { "content": title } }] },
            },
            "children": blocks,
        });
        let value = self.request(Method::POST, "/pages", Some(body)).await?;
        info!(title, "created remote page");
        parse_page(&value)
    }

    async fn update_page(&self, page_id: &str, blocks: Vec<Value>) -> SyncResult<RemotePage> {
        // Replace, not append: drop the existing children first (fail fast).
        let existing = self.list_block_children(page_id).await?;
        let deletions = existing
            .iter()
            .filter_map(|child| child["id"].as_str())
            .map(|id| {
                let path = format!("/blocks/{id}");
                async move { self.request(Method::DELETE, &path, None).await }
            });
        try_join_all(deletions).await?;
        let count = blocks.len();
        self.request(
            Method::PATCH,
            &format!("/blocks/{page_id}/children"),
            Some(json!({ "children": blocks })),
        )
        .await?;
        info!(page_id, blocks = count, "replaced remote page content");
        self.get_page(page_id).await
    }

    async fn get_page_blocks(&self, page_id: &str) -> SyncResult<Vec<Value>> {
        self.list_block_children(page_id).await
    }
}

/// The cursor for the next page, `None` when the listing is complete. A page
/// claiming `has_more` without a cursor would loop forever, so it is an error.
fn next_cursor(response: &Value) -> SyncResult<Option<String>> {
    if !response["has_more"].as_bool().unwrap_or(false) {
        return Ok(None);
    }
    match response["next_cursor"].as_str() {
        Some(cursor) => Ok(Some(cursor.to_string())),
        None => Err(SyncError::RemoteApi {
            status: 200,
            body: "has_more is true but next_cursor is missing".to_string(),
        }),
    }
}

fn parse_page(value: &Value) -> SyncResult<RemotePage> {
    let id = value["id"]
        .as_str()
        .ok_or_else(|| SyncError::RemoteApi {
            status: 200,
            body: "page payload missing id".to_string(),
        })?
        .to_string();
    Ok(RemotePage {
        id,
        title: page_title(value),
        properties: value["properties"].clone(),
        last_edited_time: parse_timestamp(&value["last_edited_time"])?,
    })
}

fn page_title(value: &Value) -> String {
    value["properties"]["title"]["title"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .map(|p| {
                    p["plain_text"]
                        .as_str()
                        .or_else(|| p["text"]["content"].as_str())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

fn rich_text_to_plain(value: &Value) -> String {
    value
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .map(|p| p["plain_text"].as_str().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_timestamp(value: &Value) -> SyncResult<DateTime<Utc>> {
    match value.as_str() {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| SyncError::RemoteApi {
                status: 200,
                body: format!("invalid last_edited_time {raw:?}: {e}"),
            }),
        None => Ok(Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RemoteConfig, SyncMapping};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Transport that replays a scripted sequence of responses.
    struct ScriptedSend {
        responses: Mutex<VecDeque<HttpResponse>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedSend {
        fn new(responses: Vec<HttpResponse>) -> Self {
            ScriptedSend {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HttpSend for ScriptedSend {
        async fn send(
            &self,
            method: Method,
            url: &str,
            _headers: &HeaderMap,
            _body: Option<&Value>,
        ) -> SyncResult<HttpResponse> {
            self.calls.lock().unwrap().push(format!("{method} {url}"));
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("scripted transport ran out of responses"))
        }
    }

    fn test_config() -> RemoteConfig {
        let dir = std::env::temp_dir();
        let mut config =
            RemoteConfig::new("token", "ws", vec![SyncMapping::new(dir, "target")]);
        config.retry_delay = 0;
        config.max_retries = 3;
        config
    }

    fn ok(body: &str) -> HttpResponse {
        HttpResponse {
            status: 200,
            body: body.to_string(),
        }
    }

    fn status(code: u16) -> HttpResponse {
        HttpResponse {
            status: code,
            body: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn retries_on_429_then_succeeds() {
        let transport = ScriptedSend::new(vec![
            status(429),
            status(429),
            status(429),
            ok(r#"{"id": "user"}"#),
        ]);
        let client = RemoteClient::with_transport(&test_config(), transport).unwrap();
        assert!(client.verify_connection().await.unwrap());
        assert_eq!(client.transport.call_count(), 4);
    }

    #[tokio::test]
    async fn exhausted_retry_budget_is_a_connection_error() {
        let transport =
            ScriptedSend::new(vec![status(503), status(503), status(503), status(503)]);
        let client = RemoteClient::with_transport(&test_config(), transport).unwrap();
        let err = client.verify_connection().await.unwrap_err();
        assert!(matches!(err, SyncError::Connection(msg) if msg.contains("3 retries")));
        assert_eq!(client.transport.call_count(), 4);
    }

    #[tokio::test]
    async fn non_retryable_status_surfaces_immediately() {
        let transport = ScriptedSend::new(vec![HttpResponse {
            status: 404,
            body: "not here".to_string(),
        }]);
        let client = RemoteClient::with_transport(&test_config(), transport).unwrap();
        let err = client.get_page("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, SyncError::RemoteApi { status: 404, body } if body == "not here"));
        assert_eq!(client.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn get_page_parses_title_and_timestamp() {
        let body = r#"{
            "id": "p1",
            "last_edited_time": "2025-06-04T12:00:00Z",
            "properties": { "title": { "title": [{ "plain_text": "Test Page" }] } }
        }"#;
        let transport = ScriptedSend::new(vec![ok(body)]);
        let client = RemoteClient::with_transport(&test_config(), transport).unwrap();
        let page = client.get_page("p1").await.unwrap();
        assert_eq!(page.id, "p1");
        assert_eq!(page.title, "Test Page");
        assert_eq!(page.last_edited_time.to_rfc3339(), "2025-06-04T12:00:00+00:00");
    }

    #[tokio::test]
    async fn update_page_deletes_existing_children_before_replacing() {
        let children = r#"{
            "results": [
                { "id": "b1", "type": "paragraph", "paragraph": { "rich_text": [] } },
                { "id": "b2", "type": "paragraph", "paragraph": { "rich_text": [] } }
            ],
            "has_more": false
        }"#;
        let page = r#"{
            "id": "p1",
            "last_edited_time": "2025-06-04T12:00:00Z",
            "properties": { "title": { "title": [{ "plain_text": "Doc" }] } }
        }"#;
        let transport = ScriptedSend::new(vec![
            ok(children),
            ok("{}"),
            ok("{}"),
            ok("{}"),
            ok(page),
        ]);
        let client = RemoteClient::with_transport(&test_config(), transport).unwrap();
        let updated = client
            .update_page("p1", vec![json!({ "type": "paragraph" })])
            .await
            .unwrap();
        assert_eq!(updated.id, "p1");
        let calls = client.transport.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 5);
        assert!(calls
            .iter()
            .any(|c| c.starts_with("DELETE") && c.ends_with("/blocks/b1")));
        assert!(calls
            .iter()
            .any(|c| c.starts_with("DELETE") && c.ends_with("/blocks/b2")));
        assert!(calls[3].starts_with("PATCH"));
    }

    #[tokio::test]
    async fn has_more_without_a_cursor_is_an_error_not_a_loop() {
        let transport = ScriptedSend::new(vec![ok(
            r#"{ "results": [], "has_more": true, "next_cursor": null }"#,
        )]);
        let client = RemoteClient::with_transport(&test_config(), transport).unwrap();
        let err = client.get_page_blocks("p1").await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::RemoteApi { body, .. } if body.contains("next_cursor")
        ));
        assert_eq!(client.transport.call_count(), 1);
    }

    #[tokio::test]
    async fn get_database_paginates_until_has_more_is_false() {
        let db = r#"{
            "id": "db1",
            "title": [{ "plain_text": "Docs" }],
            "description": [],
            "properties": {},
            "last_edited_time": "2025-06-04T12:00:00Z"
        }"#;
        let page = |id: &str| {
            format!(
                r#"{{ "id": "{id}", "last_edited_time": "2025-06-04T12:00:00Z",
                     "properties": {{ "title": {{ "title": [{{ "plain_text": "{id}" }}] }} }} }}"#
            )
        };
        let first = format!(
            r#"{{ "results": [{}], "has_more": true, "next_cursor": "c2" }}"#,
            page("a")
        );
        let second = format!(r#"{{ "results": [{}], "has_more": false }}"#, page("b"));
        let transport = ScriptedSend::new(vec![ok(db), ok(&first), ok(&second)]);
        let client = RemoteClient::with_transport(&test_config(), transport).unwrap();
        let database = client.get_database("db1").await.unwrap();
        assert_eq!(database.title, "Docs");
        assert_eq!(database.pages.len(), 2);
        assert_eq!(database.pages[1].id, "b");
        assert_eq!(client.transport.call_count(), 3);
    }
}
