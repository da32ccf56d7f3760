use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::metrics::{RawDataset, Table};
use crate::notion::NotionClient;

/// Report exports carry a two-line preamble before the header row.
const PREAMBLE_LINES: usize = 2;

#[derive(Debug, Error)]
pub enum RetrieveError {
    /// The client is known but has no sufficiently recent report files.
    /// Distinct from identity resolution failure, and fatal to the run.
    #[error("no fresh report data for `{slug}` within {window_days} days")]
    NoFreshData { slug: String, window_days: i64 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Pulls the raw dataset for a resolved client.
#[async_trait]
pub trait DataRetriever: Send + Sync {
    async fn collect(&self, slug: &str) -> Result<RawDataset, RetrieveError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    name: String,
    modified_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

/// Google Drive backed retriever: latest `{slug}_ads` / `{slug}_ga` CSV
/// exports, plus the previous versions for period-over-period deltas, plus
/// the client profile from Notion.
pub struct DriveRetriever {
    http: reqwest::Client,
    access_token: String,
    notion: Arc<NotionClient>,
    window_days: i64,
}

impl DriveRetriever {
    pub fn from_env(notion: Arc<NotionClient>) -> Result<Self> {
        let access_token =
            dotenv::var("DRIVE_ACCESS_TOKEN").context("DRIVE_ACCESS_TOKEN required")?;
        let window_days = dotenv::var("DATA_FRESHNESS_DAYS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(7);
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            access_token,
            notion,
            window_days,
        })
    }

    /// List CSV files whose name contains `name_part`, newest first.
    async fn list_csvs(&self, name_part: &str) -> Result<Vec<DriveFile>> {
        let query = format!("name contains '{}' and mimeType='text/csv'", name_part);
        let resp = self
            .http
            .get("https://www.googleapis.com/drive/v3/files")
            .bearer_auth(&self.access_token)
            .query(&[
                ("q", query.as_str()),
                ("spaces", "drive"),
                ("orderBy", "modifiedTime desc"),
                ("fields", "files(id, name, modifiedTime)"),
            ])
            .send()
            .await
            .context("Drive file listing failed")?
            .error_for_status()
            .context("Drive file listing rejected")?;
        let list: FileList = resp.json().await.context("Drive listing was not JSON")?;
        Ok(list.files)
    }

    async fn latest(&self, name_part: &str) -> Result<Option<DriveFile>> {
        Ok(self.list_csvs(name_part).await?.into_iter().next())
    }

    /// Newest file with a different id than the current one.
    async fn previous(&self, name_part: &str, exclude_id: &str) -> Result<Option<DriveFile>> {
        Ok(self
            .list_csvs(name_part)
            .await?
            .into_iter()
            .find(|f| f.id != exclude_id))
    }

    async fn download_table(&self, file: &DriveFile) -> Result<Table> {
        let url = format!("https://www.googleapis.com/drive/v3/files/{}", file.id);
        let bytes = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[("alt", "media")])
            .send()
            .await
            .with_context(|| format!("Downloading {} failed", file.name))?
            .error_for_status()
            .with_context(|| format!("Download of {} rejected", file.name))?
            .bytes()
            .await
            .context("Reading download body failed")?;
        parse_report_csv(&bytes)
    }
}

fn is_fresh(modified: DateTime<Utc>, now: DateTime<Utc>, window_days: i64) -> bool {
    modified > now - Duration::days(window_days)
}

/// Parse a report CSV export, skipping the preamble lines before the header.
/// Rows that fail to parse are skipped, not fatal.
pub fn parse_report_csv(data: &[u8]) -> Result<Table> {
    let start = skip_lines(data, PREAMBLE_LINES);
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(&data[start..]);
    let headers: Vec<String> = reader
        .headers()
        .context("Report CSV has no header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                debug!(%err, "Skipping bad CSV line");
                continue;
            }
        };
        let row: HashMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .map(|(header, cell)| (header.clone(), cell.to_string()))
            .collect();
        rows.push(row);
    }
    Ok(Table::with_columns(headers, rows))
}

fn skip_lines(data: &[u8], count: usize) -> usize {
    let mut offset = 0;
    for _ in 0..count {
        match data[offset..].iter().position(|&b| b == b'\n') {
            Some(pos) => offset += pos + 1,
            None => return data.len(),
        }
    }
    offset
}

#[async_trait]
impl DataRetriever for DriveRetriever {
    async fn collect(&self, slug: &str) -> Result<RawDataset, RetrieveError> {
        let ads_part = format!("{slug}_ads");
        let ga_part = format!("{slug}_ga");

        let ads_file = self.latest(&ads_part).await?;
        let ga_file = self.latest(&ga_part).await?;

        let now = Utc::now();
        let (ads_file, ga_file) = match (ads_file, ga_file) {
            (Some(ads), Some(ga))
                if is_fresh(ads.modified_time, now, self.window_days)
                    && is_fresh(ga.modified_time, now, self.window_days) =>
            {
                (ads, ga)
            }
            _ => {
                return Err(RetrieveError::NoFreshData {
                    slug: slug.to_string(),
                    window_days: self.window_days,
                })
            }
        };

        let current_ads = self.download_table(&ads_file).await?;
        let current_ga = self.download_table(&ga_file).await?;

        let previous_ads = match self.previous(&ads_part, &ads_file.id).await? {
            Some(file) => Some(self.download_table(&file).await?),
            None => None,
        };
        let previous_ga = match self.previous(&ga_part, &ga_file.id).await? {
            Some(file) => Some(self.download_table(&file).await?),
            None => None,
        };

        // Profile lookup degrades to defaults; metrics still compute without it.
        let profile = match self.notion.client_profile(slug).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(slug, %err, "Client profile lookup failed, using defaults");
                Default::default()
            }
        };

        debug!(
            slug,
            ads_rows = current_ads.len(),
            ga_rows = current_ga.len(),
            has_previous = previous_ads.is_some(),
            industry = %profile.industry,
            "Raw dataset collected"
        );

        Ok(RawDataset {
            current_ads,
            current_ga,
            previous_ads,
            previous_ga,
            industry: profile.industry,
            benchmark_cpl: profile.benchmark_cpl,
        })
    }
}
