use std::collections::HashMap;

use anyhow::{anyhow, Context as _, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::warn;

use crate::directory::{Client, ClientDirectoryProvider};

const NOTION_VERSION: &str = "2022-06-28";

/// Per-client metadata pulled from the Notion database.
#[derive(Debug, Clone)]
pub struct ClientProfile {
    pub industry: String,
    pub benchmark_cpl: f64,
}

impl Default for ClientProfile {
    fn default() -> Self {
        Self {
            industry: "unknown".to_string(),
            benchmark_cpl: 300.0,
        }
    }
}

/// Client metadata store backing the directory and the retriever.
pub struct NotionClient {
    http: reqwest::Client,
    api_key: String,
    database_id: String,
}

impl NotionClient {
    pub fn from_env() -> Result<Self> {
        let api_key = dotenv::var("NOTION_API_KEY").context("NOTION_API_KEY required")?;
        let database_id = dotenv::var("NOTION_DB_ID").context("NOTION_DB_ID required")?;
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            api_key,
            database_id,
        })
    }

    async fn query(&self, payload: Value) -> Result<Value> {
        let url = format!(
            "https://api.notion.com/v1/databases/{}/query",
            self.database_id
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .json(&payload)
            .send()
            .await
            .context("Notion query failed")?;

        let status = resp.status();
        let body: Value = resp.json().await.context("Notion reply was not JSON")?;
        if !status.is_success() {
            return Err(anyhow!("Notion query returned {}: {}", status, body));
        }
        Ok(body)
    }

    /// Fetch industry and benchmark CPL for one client. Missing properties
    /// fall back to the profile defaults.
    pub async fn client_profile(&self, slug: &str) -> Result<ClientProfile> {
        let payload = json!({
            "filter": {
                "property": "Slug",
                "rich_text": { "equals": slug }
            }
        });
        let body = self.query(payload).await?;
        let Some(page) = body["results"].get(0) else {
            warn!(slug, "No Notion page for slug, using profile defaults");
            return Ok(ClientProfile::default());
        };
        let props = flatten_properties(&page["properties"]);
        Ok(profile_from_properties(&props))
    }
}

#[async_trait]
impl ClientDirectoryProvider for NotionClient {
    /// Pull every client page, following pagination cursors, flattened into
    /// one sequence in the order Notion returns.
    async fn fetch_all(&self) -> Result<Vec<Client>> {
        let mut clients = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let payload = match &cursor {
                Some(c) => json!({ "start_cursor": c }),
                None => json!({}),
            };
            let body = self.query(payload).await?;

            for page in body["results"].as_array().into_iter().flatten() {
                match client_from_page(page) {
                    Some(client) => clients.push(client),
                    None => warn!("Skipping malformed client page"),
                }
            }

            if body["has_more"].as_bool().unwrap_or(false) {
                cursor = body["next_cursor"].as_str().map(str::to_string);
                if cursor.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(clients)
    }
}

fn client_from_page(page: &Value) -> Option<Client> {
    let props = &page["properties"];
    let name = plain_text(&props["Name"]["title"])?;
    let slug = plain_text(&props["Slug"]["rich_text"])?;
    Some(Client {
        name: name.trim().to_lowercase(),
        slug: slug.trim().to_lowercase(),
    })
}

fn plain_text(fragments: &Value) -> Option<String> {
    let text = fragments.get(0)?["plain_text"].as_str()?;
    if text.trim().is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Flatten Notion's typed property objects into normalized key → value pairs.
/// Keys are trimmed, lowercased, spaces replaced with underscores.
fn flatten_properties(properties: &Value) -> HashMap<String, Value> {
    let mut flat = HashMap::new();
    let Some(map) = properties.as_object() else {
        return flat;
    };
    for (key, prop) in map {
        let norm_key = key.trim().to_lowercase().replace(' ', "_");
        let value = match prop["type"].as_str() {
            Some("select") => prop["select"]["name"].clone(),
            Some("number") => prop["number"].clone(),
            Some("rich_text") => plain_text(&prop["rich_text"]).map(Value::from).unwrap_or(Value::Null),
            Some("title") => plain_text(&prop["title"]).map(Value::from).unwrap_or(Value::Null),
            _ => Value::Null,
        };
        if !value.is_null() {
            flat.insert(norm_key, value);
        }
    }
    flat
}

fn profile_from_properties(props: &HashMap<String, Value>) -> ClientProfile {
    let defaults = ClientProfile::default();
    ClientProfile {
        industry: props
            .get("industry")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(defaults.industry),
        benchmark_cpl: props
            .get("benchmark_cpl")
            .and_then(Value::as_f64)
            .unwrap_or(defaults.benchmark_cpl),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(name: Option<&str>, slug: Option<&str>) -> Value {
        let mut props = serde_json::Map::new();
        if let Some(name) = name {
            props.insert(
                "Name".to_string(),
                json!({ "type": "title", "title": [{ "plain_text": name }] }),
            );
        }
        if let Some(slug) = slug {
            props.insert(
                "Slug".to_string(),
                json!({ "type": "rich_text", "rich_text": [{ "plain_text": slug }] }),
            );
        }
        json!({ "properties": props })
    }

    #[test]
    fn client_page_is_folded_and_trimmed() {
        let client = client_from_page(&page(Some("  Acme Roofing "), Some("Acme-Roofing"))).unwrap();
        assert_eq!(client.name, "acme roofing");
        assert_eq!(client.slug, "acme-roofing");
    }

    #[test]
    fn pages_missing_name_or_slug_are_rejected() {
        assert!(client_from_page(&page(None, Some("acme-roofing"))).is_none());
        assert!(client_from_page(&page(Some("Acme"), None)).is_none());
        assert!(client_from_page(&page(Some("Acme"), Some("   "))).is_none());
    }

    #[test]
    fn profile_reads_flattened_properties() {
        let props = flatten_properties(&json!({
            "Industry": { "type": "select", "select": { "name": "roofing" } },
            "Benchmark CPL": { "type": "number", "number": 250.0 },
            "Notes": { "type": "rich_text", "rich_text": [] },
        }));
        let profile = profile_from_properties(&props);
        assert_eq!(profile.industry, "roofing");
        assert_eq!(profile.benchmark_cpl, 250.0);
    }

    #[test]
    fn profile_defaults_when_properties_missing() {
        let profile = profile_from_properties(&HashMap::new());
        assert_eq!(profile.industry, "unknown");
        assert_eq!(profile.benchmark_cpl, 300.0);
    }
}
