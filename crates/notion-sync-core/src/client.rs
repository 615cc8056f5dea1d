//! Remote page API: create a page, append blocks to it, delete it.
//!
//! `PageClient` is the seam the engine talks through; `NotionClient` is the
//! HTTP implementation against the Notion REST API.

use crate::blocks::{Block, RichText};
use crate::config::SyncSettings;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Value sent in the `Notion-Version` header.
pub const NOTION_VERSION: &str = "2022-02-22";

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Request failed: {0}")]
    Transport(String),

    #[error("Remote returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for NetworkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            NetworkError::Decode(e.to_string())
        } else {
            NetworkError::Transport(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;

/// A page as returned by the create call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemotePage {
    /// Opaque page identity
    pub id: String,
    /// Private page URL
    pub url: String,
}

/// Everything needed to create a page.
#[derive(Debug, Clone)]
pub struct NewPage {
    pub title: String,
    /// Attach `tags` to the Tags property
    pub tags_enabled: bool,
    pub tags: Vec<String>,
    pub children: Vec<Block>,
    pub cover_url: Option<String>,
}

/// Remote page operations used by the sync engine.
#[async_trait]
pub trait PageClient: Send + Sync {
    /// Create a page under the configured database.
    async fn create_page(&self, page: NewPage) -> Result<RemotePage>;

    /// Append blocks to an existing page. An empty `page_id` is a no-op.
    async fn append_blocks(&self, page_id: &str, children: Vec<Block>) -> Result<()>;

    /// Archive a page. An empty `page_id` is a no-op.
    async fn delete_page(&self, page_id: &str) -> Result<()>;
}

// ============================================================================
// Request bodies
// ============================================================================

/// `POST /v1/pages`
#[derive(Debug, Serialize)]
pub struct CreatePageRequest {
    pub parent: Parent,
    pub properties: PageProperties,
    pub children: Vec<Block>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<Cover>,
}

#[derive(Debug, Serialize)]
pub struct Parent {
    pub database_id: String,
}

#[derive(Debug, Serialize)]
pub struct PageProperties {
    #[serde(rename = "Name")]
    pub name: TitleProperty,
    #[serde(rename = "Tags", skip_serializing_if = "Option::is_none")]
    pub tags: Option<MultiSelectProperty>,
}

#[derive(Debug, Serialize)]
pub struct TitleProperty {
    pub title: Vec<RichText>,
}

#[derive(Debug, Serialize)]
pub struct MultiSelectProperty {
    pub multi_select: Vec<SelectOption>,
}

#[derive(Debug, Serialize)]
pub struct SelectOption {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct Cover {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub external: ExternalFile,
}

#[derive(Debug, Serialize)]
pub struct ExternalFile {
    pub url: String,
}

/// `PATCH /v1/blocks/{id}/children`
#[derive(Debug, Serialize)]
pub struct AppendBlocksRequest {
    pub children: Vec<Block>,
}

/// Error body Notion sends with non-2xx responses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl CreatePageRequest {
    pub fn new(database_id: &str, page: NewPage) -> Self {
        let tags = (page.tags_enabled && !page.tags.is_empty()).then(|| MultiSelectProperty {
            multi_select: page
                .tags
                .into_iter()
                .map(|name| SelectOption { name })
                .collect(),
        });

        Self {
            parent: Parent {
                database_id: database_id.to_string(),
            },
            properties: PageProperties {
                name: TitleProperty {
                    title: vec![RichText::plain(&page.title)],
                },
                tags,
            },
            children: page.children,
            cover: page
                .cover_url
                .filter(|url| !url.trim().is_empty())
                .map(|url| Cover {
                    kind: "external",
                    external: ExternalFile { url },
                }),
        }
    }
}

// ============================================================================
// HTTP client
// ============================================================================

/// Notion REST client.
pub struct NotionClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    database_id: String,
}

impl NotionClient {
    pub fn new(
        base_url: &str,
        token: &str,
        database_id: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            database_id: database_id.to_string(),
        })
    }

    pub fn from_settings(settings: &SyncSettings) -> Result<Self> {
        Self::new(
            &settings.api_base_url,
            &settings.api_token,
            &settings.database_id,
            settings.request_timeout(),
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
    }

    /// Turn a non-2xx response into `NetworkError::Status`.
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = match serde_json::from_str::<ErrorBody>(&body) {
            Ok(err) if !err.message.is_empty() => format!("{} ({})", err.message, err.code),
            _ => body,
        };
        Err(NetworkError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl PageClient for NotionClient {
    async fn create_page(&self, page: NewPage) -> Result<RemotePage> {
        let body = CreatePageRequest::new(&self.database_id, page);
        debug!("Creating page with {} block(s)", body.children.len());

        let response = self
            .request(reqwest::Method::POST, "/v1/pages")
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;

        response
            .json::<RemotePage>()
            .await
            .map_err(|e| NetworkError::Decode(e.to_string()))
    }

    async fn append_blocks(&self, page_id: &str, children: Vec<Block>) -> Result<()> {
        if page_id.is_empty() {
            return Ok(());
        }
        debug!("Appending {} block(s) to {}", children.len(), page_id);

        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("/v1/blocks/{}/children", page_id),
            )
            .json(&AppendBlocksRequest { children })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_page(&self, page_id: &str) -> Result<()> {
        if page_id.is_empty() {
            return Ok(());
        }
        debug!("Deleting page {}", page_id);

        let response = self
            .request(reqwest::Method::DELETE, &format!("/v1/blocks/{}", page_id))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::markdown_to_blocks;
    use serde_json::json;

    fn page(tags_enabled: bool, tags: &[&str], cover: Option<&str>) -> NewPage {
        NewPage {
            title: "My Note".to_string(),
            tags_enabled,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            children: markdown_to_blocks("hello"),
            cover_url: cover.map(str::to_string),
        }
    }

    #[test]
    fn create_request_shape() {
        let request = CreatePageRequest::new("db-1", page(true, &["a", "b"], Some("https://img")));
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["parent"], json!({ "database_id": "db-1" }));
        assert_eq!(
            value["properties"]["Name"]["title"][0]["text"]["content"],
            "My Note"
        );
        assert_eq!(
            value["properties"]["Tags"],
            json!({ "multi_select": [{ "name": "a" }, { "name": "b" }] })
        );
        assert_eq!(
            value["cover"],
            json!({ "type": "external", "external": { "url": "https://img" } })
        );
        assert_eq!(value["children"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn tags_omitted_when_disabled_or_empty() {
        let disabled = serde_json::to_value(CreatePageRequest::new("db", page(false, &["a"], None)))
            .unwrap();
        assert!(disabled["properties"].get("Tags").is_none());

        let empty = serde_json::to_value(CreatePageRequest::new("db", page(true, &[], None)))
            .unwrap();
        assert!(empty["properties"].get("Tags").is_none());
    }

    #[test]
    fn blank_cover_is_omitted() {
        let value = serde_json::to_value(CreatePageRequest::new("db", page(false, &[], Some("  "))))
            .unwrap();
        assert!(value.get("cover").is_none());
    }

    #[test]
    fn remote_page_ignores_extra_fields() {
        let page: RemotePage = serde_json::from_value(json!({
            "object": "page",
            "id": "abc",
            "url": "https://www.notion.so/abc",
            "archived": false
        }))
        .unwrap();
        assert_eq!(page.id, "abc");
    }

    #[tokio::test]
    async fn empty_page_id_is_a_no_op() {
        // Unroutable base URL: any real request would fail
        let client =
            NotionClient::new("http://127.0.0.1:9", "token", "db", Duration::from_secs(1)).unwrap();
        assert!(client.append_blocks("", Vec::new()).await.is_ok());
        assert!(client.delete_page("").await.is_ok());
    }
}
