use std::num::NonZeroUsize;

use lru::LruCache;
use tokio::sync::Mutex;
use tracing::debug;

use crate::directory::Client;

/// Sentinel slug used in fallback mode. Passed to the NLU context for flavor,
/// never used as a data-retrieval key.
pub const FALLBACK_SLUG: &str = "general";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A client was identified (text match or session memory).
    Full,
    /// No client identified; generic narrative without metrics.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub slug: String,
    pub mode: Mode,
}

/// Lower-case and strip everything that is not a letter or digit.
///
/// No word-boundary awareness: a client name fragment inside a longer
/// alphanumeric run will match. Known limitation, kept deliberately.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Match free text against the directory, first match wins.
///
/// Returns the slug of the first client whose normalized name or slug is a
/// substring of the normalized text. Directory order is the tie-break, so the
/// snapshot's source order is observable behavior.
pub fn match_slug<'a>(text: &str, directory: &'a [Client]) -> Option<&'a str> {
    let haystack = normalize(text);
    directory
        .iter()
        .find(|client| {
            let name = normalize(&client.name);
            let slug = normalize(&client.slug);
            (!name.is_empty() && haystack.contains(&name))
                || (!slug.is_empty() && haystack.contains(&slug))
        })
        .map(|client| client.slug.as_str())
}

/// Per-user memory of the most recently resolved client.
///
/// Consulted only when text matching fails. Bounded LRU so the table cannot
/// grow with the user population forever; writes are last-write-wins.
pub struct SessionMemory {
    inner: Mutex<LruCache<u64, String>>,
}

impl SessionMemory {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_env() -> Self {
        let capacity = dotenv::var("SESSION_CAPACITY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(1024);
        Self::new(capacity)
    }

    pub async fn get(&self, user_id: u64) -> Option<String> {
        self.inner.lock().await.get(&user_id).cloned()
    }

    pub async fn put(&self, user_id: u64, slug: &str) {
        debug!(user_id, slug, "Session memory updated");
        self.inner.lock().await.put(user_id, slug.to_string());
    }
}
