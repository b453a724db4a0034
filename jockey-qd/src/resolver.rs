//! Media resolution boundary
//!
//! Turns raw user input (free text or a direct media URL) into exactly
//! one playable [`Track`]. Resolution is delegated to an external
//! resolver service; this module owns only the boundary contract and
//! the HTTP adapter. No playlist/multi-track resolution.

use crate::error::{Error, Result};
use async_trait::async_trait;
use jockey_common::human_time::format_track_duration;
use jockey_common::Track;
use serde::Deserialize;
use tracing::debug;

/// Classify raw input as a direct media URL vs a free-text search.
///
/// Matches the hosts the original bot recognized; anything else goes
/// through top-1 search.
pub fn is_direct_url(input: &str) -> bool {
    input.contains("youtube.com") || input.contains("youtu.be")
}

/// Boundary contract to the external media resolver.
///
/// Either path yields exactly one Track:
/// - direct URL: resolve a single exact match, [`Error::InvalidSource`]
///   on failure
/// - free text: top-1 search, [`Error::NoResults`] when empty
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Resolve a direct media URL to its metadata.
    async fn resolve_url(&self, url: &str) -> Result<ResolvedMedia>;

    /// Top-1 search for free-text input. `Ok(None)` means no match.
    async fn search(&self, query: &str) -> Result<Option<ResolvedMedia>>;
}

/// Candidate returned by the resolver before it becomes a Track.
#[derive(Debug, Clone, Deserialize)]
pub struct ResolvedMedia {
    pub title: String,
    /// Duration in whole seconds; absent when the resolver cannot tell
    pub duration_secs: Option<u64>,
    pub thumbnail: Option<String>,
    /// Playable source locator, opaque to the daemon
    pub source: String,
}

impl ResolvedMedia {
    /// Build the immutable Track handed to the queue.
    pub fn into_track(self, requested_by: &str) -> Track {
        let duration_display = match self.duration_secs {
            Some(secs) => format_track_duration(secs),
            None => "Unknown".to_string(),
        };
        Track {
            title: self.title,
            duration_display,
            thumbnail: self.thumbnail,
            source: self.source,
            requested_by: requested_by.to_string(),
        }
    }
}

/// Resolve user input into one Track via the appropriate path.
pub async fn resolve_input(
    resolver: &dyn MediaResolver,
    input: &str,
    requested_by: &str,
) -> Result<Track> {
    let media = if is_direct_url(input) {
        debug!("Resolving direct URL: {}", input);
        resolver.resolve_url(input).await?
    } else {
        debug!("Searching for: {}", input);
        resolver
            .search(input)
            .await?
            .ok_or_else(|| Error::NoResults(input.to_string()))?
    };
    Ok(media.into_track(requested_by))
}

/// HTTP adapter against a resolver sidecar service.
///
/// The sidecar exposes `GET /resolve?url=` for exact-match URL lookups
/// and `GET /search?q=` for top-1 search, both returning a
/// [`ResolvedMedia`] JSON body. Search answers 404 when nothing
/// matched.
pub struct HttpResolver {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResolver {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { client, base_url }
    }
}

#[async_trait]
impl MediaResolver for HttpResolver {
    async fn resolve_url(&self, url: &str) -> Result<ResolvedMedia> {
        let response = self
            .client
            .get(format!("{}/resolve", self.base_url))
            .query(&[("url", url)])
            .send()
            .await
            .map_err(|e| Error::InvalidSource(format!("{url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::InvalidSource(url.to_string()));
        }

        response
            .json::<ResolvedMedia>()
            .await
            .map_err(|e| Error::InvalidSource(format!("{url}: {e}")))
    }

    async fn search(&self, query: &str) -> Result<Option<ResolvedMedia>> {
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("limit", "1")])
            .send()
            .await
            .map_err(|e| Error::NoResults(format!("{query}: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::NoResults(query.to_string()));
        }

        let media = response
            .json::<ResolvedMedia>()
            .await
            .map_err(|e| Error::NoResults(format!("{query}: {e}")))?;
        Ok(Some(media))
    }
}
