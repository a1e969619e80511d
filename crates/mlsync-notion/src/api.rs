use anyhow::{anyhow, Context, Result};
use reqwest::blocking::RequestBuilder;
use reqwest::Method;
use serde_json::{json, Map, Value as JsonValue};

const NOTION_VERSION: &str = "2022-06-28";
const DEFAULT_BASE_URL: &str = "https://api.notion.com/v1";

/// Thin blocking client for the Notion REST API.
pub struct NotionApi {
    base: String,
    token: String,
    client: reqwest::blocking::Client,
}

impl NotionApi {
    pub fn new(token: impl Into<String>) -> NotionApi {
        NotionApi::with_base_url(token, DEFAULT_BASE_URL)
    }

    // Tests point this at an in-process stub server.
    pub fn with_base_url(token: impl Into<String>, base: impl Into<String>) -> NotionApi {
        NotionApi {
            base: base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base, path))
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
    }

    pub fn page_accessible(&self, page_id: &str) -> bool {
        self.request(Method::GET, &format!("pages/{page_id}"))
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    pub fn search_databases(&self) -> Result<JsonValue> {
        self.request(Method::POST, "search")
            .json(&json!({"filter": {"value": "database", "property": "object"}}))
            .send()
            .and_then(|r| r.error_for_status())
            .context("searching databases")?
            .json()
            .context("decoding database search results")
    }

    pub fn search_pages(&self) -> Result<JsonValue> {
        self.request(Method::POST, "search")
            .json(&json!({"filter": {"value": "page", "property": "object"}}))
            .send()
            .and_then(|r| r.error_for_status())
            .context("searching pages")?
            .json()
            .context("decoding page search results")
    }

    pub fn query_database(&self, database_id: &str) -> Result<JsonValue> {
        self.request(Method::POST, &format!("databases/{database_id}/query"))
            .json(&json!({}))
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("querying database {database_id}"))?
            .json()
            .context("decoding database query results")
    }

    pub fn get_database(&self, database_id: &str) -> Result<JsonValue> {
        self.request(Method::GET, &format!("databases/{database_id}"))
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("retrieving database {database_id}"))?
            .json()
            .context("decoding database")
    }

    pub fn create_database(
        &self,
        name: &str,
        properties: &Map<String, JsonValue>,
        parent_page_id: &str,
    ) -> Result<String> {
        let response: JsonValue = self
            .request(Method::POST, "databases")
            .json(&json!({
                "parent": {"type": "page_id", "page_id": parent_page_id},
                "title": [{"type": "text", "text": {"content": name}}],
                "properties": properties,
            }))
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("creating database '{name}'"))?
            .json()
            .context("decoding created database")?;
        response["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("created database response carries no id"))
    }

    pub fn update_database(
        &self,
        database_id: &str,
        properties: &Map<String, JsonValue>,
    ) -> Result<()> {
        self.request(Method::PATCH, &format!("databases/{database_id}"))
            .json(&json!({"properties": properties}))
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("updating schema of database {database_id}"))?;
        Ok(())
    }

    pub fn create_page(
        &self,
        database_id: &str,
        properties: &Map<String, JsonValue>,
    ) -> Result<String> {
        let response: JsonValue = self
            .request(Method::POST, "pages")
            .json(&json!({
                "parent": {"type": "database_id", "database_id": database_id},
                "properties": properties,
            }))
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("adding page to database {database_id}"))?
            .json()
            .context("decoding created page")?;
        response["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("created page response carries no id"))
    }

    pub fn update_page(&self, page_id: &str, properties: &Map<String, JsonValue>) -> Result<()> {
        self.request(Method::PATCH, &format!("pages/{page_id}"))
            .json(&json!({"properties": properties, "archived": false}))
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("updating page {page_id}"))?;
        Ok(())
    }

    // Notion has no row deletion; archiving is the supported removal.
    pub fn archive_page(&self, page_id: &str) -> Result<()> {
        self.request(Method::PATCH, &format!("pages/{page_id}"))
            .json(&json!({"archived": true}))
            .send()
            .and_then(|r| r.error_for_status())
            .with_context(|| format!("archiving page {page_id}"))?;
        Ok(())
    }
}

/// A 4xx from the destination aborts only the single mutation that hit it.
pub fn is_client_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .and_then(reqwest::Error::status)
            .map_or(false, |status| status.is_client_error())
    })
}
