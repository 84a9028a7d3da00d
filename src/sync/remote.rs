use anyhow::{bail, Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::RemoteLibrary;

/// HTTP client for an Outline-style document service.
///
/// Endpoints: `documents.search`, `documents.create`, `documents.update`,
/// all POST with a bearer token.
pub struct HttpLibrary {
    client: Client,
    base_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    document: DocumentInfo,
}

#[derive(Debug, Deserialize)]
struct DocumentInfo {
    id: String,
    title: String,
    #[serde(rename = "collectionId", default)]
    collection_id: String,
}

#[derive(Debug, Deserialize)]
struct DocumentResponse {
    data: DocumentInfo,
}

impl HttpLibrary {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<reqwest::blocking::Response> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .with_context(|| format!("Request to {url} failed"))?;
        if !response.status().is_success() {
            bail!("{endpoint} returned {}", response.status());
        }
        Ok(response)
    }
}

impl RemoteLibrary for HttpLibrary {
    /// Exact-title match within the collection. The search endpoint ranks
    /// fuzzily, so hits are filtered before any is adopted.
    fn find_by_title(&self, title: &str, collection: &str) -> Result<Option<String>> {
        let response: SearchResponse = self
            .post("documents.search", json!({ "query": title, "limit": 10 }))?
            .json()
            .context("Failed to parse search response")?;

        Ok(response
            .data
            .into_iter()
            .map(|hit| hit.document)
            .find(|doc| doc.title == title && doc.collection_id == collection)
            .map(|doc| doc.id))
    }

    fn create(&self, title: &str, collection: &str, content: &str) -> Result<String> {
        let response: DocumentResponse = self
            .post(
                "documents.create",
                json!({
                    "title": title,
                    "collectionId": collection,
                    "text": content,
                    "publish": true,
                }),
            )?
            .json()
            .context("Failed to parse create response")?;
        Ok(response.data.id)
    }

    fn update(&self, id: &str, content: &str) -> Result<()> {
        self.post("documents.update", json!({ "id": id, "text": content }))?;
        Ok(())
    }
}
