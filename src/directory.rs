use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A known client account. The slug is the stable identifier; the name is the
/// human-readable label used for text matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub name: String,
    pub slug: String,
}

/// Source of client records (Notion database, fixture list in tests).
///
/// Implementations paginate internally and surface one flattened sequence in a
/// stable source order — that order decides first-match-wins resolution, so it
/// must not be re-sorted.
#[async_trait]
pub trait ClientDirectoryProvider: Send + Sync {
    async fn fetch_all(&self) -> Result<Vec<Client>>;
}

/// Read-mostly snapshot of known clients.
///
/// Refresh swaps in a fresh `Arc<Vec<Client>>`; runs holding the old snapshot
/// keep reading it untouched.
pub struct ClientDirectory {
    provider: Arc<dyn ClientDirectoryProvider>,
    /// `None` until the first successful fetch. A loaded directory may be
    /// legitimately empty, so idempotence cannot key on emptiness.
    snapshot: RwLock<Option<Arc<Vec<Client>>>>,
}

impl ClientDirectory {
    pub fn new(provider: Arc<dyn ClientDirectoryProvider>) -> Self {
        Self {
            provider,
            snapshot: RwLock::new(None),
        }
    }

    /// Return the current snapshot, fetching from the provider on first use.
    /// Idempotent: repeated calls serve the cached snapshot until `refresh`.
    pub async fn load(&self) -> Result<Arc<Vec<Client>>> {
        {
            let snapshot = self.snapshot.read().await;
            if let Some(snapshot) = snapshot.as_ref() {
                return Ok(snapshot.clone());
            }
        }
        self.refresh().await
    }

    /// Re-fetch the directory and swap in a new snapshot.
    pub async fn refresh(&self) -> Result<Arc<Vec<Client>>> {
        let raw = self.provider.fetch_all().await?;
        let fetched = raw.len();
        let clients = Arc::new(sanitize(raw));
        info!(
            fetched,
            kept = clients.len(),
            "Client directory refreshed"
        );
        *self.snapshot.write().await = Some(clients.clone());
        Ok(clients)
    }
}

/// Case-fold and trim entries; drop the malformed and the duplicate.
///
/// An entry missing a name or slug after trimming is skipped with a
/// diagnostic, never fatal. On duplicate slugs the first occurrence wins so
/// source order stays observable.
fn sanitize(raw: Vec<Client>) -> Vec<Client> {
    let mut seen = std::collections::HashSet::new();
    let mut clients = Vec::with_capacity(raw.len());
    for entry in raw {
        let name = entry.name.trim().to_lowercase();
        let slug = entry.slug.trim().to_lowercase();
        if name.is_empty() || slug.is_empty() {
            warn!(?entry, "Skipping malformed client entry");
            continue;
        }
        if !seen.insert(slug.clone()) {
            warn!(slug, "Skipping duplicate client slug");
            continue;
        }
        debug!(name, slug, "Client registered");
        clients.push(Client { name, slug });
    }
    clients
}
