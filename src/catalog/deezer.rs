//! Deezer-backed track catalog.
//!
//! Accepts a full playlist URL or a bare numeric playlist id. Track release
//! years come from the per-track endpoint because the playlist payload only
//! carries the album date, which is often a remaster.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::{BoxFuture, join_all};
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use super::{CatalogError, CatalogResult, Track, TrackCatalog, TrackPreview};

const API_BASE: &str = "https://api.deezer.com";

/// Catalog adapter backed by the public Deezer API.
#[derive(Clone)]
pub struct DeezerCatalog {
    client: Client,
    base_url: Arc<str>,
    previews: Arc<DashMap<String, TrackPreview>>,
}

impl Default for DeezerCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl DeezerCatalog {
    /// Adapter pointed at the public Deezer API.
    pub fn new() -> Self {
        Self::with_base_url(API_BASE)
    }

    /// Adapter pointed at an alternative base URL (used by tests and proxies).
    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: Arc::from(base_url.trim_end_matches('/')),
            previews: Arc::new(DashMap::new()),
        }
    }

    async fn fetch_playlist(self, reference: String) -> CatalogResult<Vec<Track>> {
        let playlist_id = extract_playlist_id(&reference);
        if playlist_id.is_empty() {
            return Err(CatalogError::Unavailable {
                reference,
                message: "no playlist id in reference".into(),
            });
        }

        let url = format!("{}/playlist/{playlist_id}", self.base_url);
        let response: PlaylistResponse =
            self.get_json(&url)
                .await
                .map_err(|message| CatalogError::Unavailable {
                    reference: reference.clone(),
                    message,
                })?;

        if let Some(error) = response.error {
            return Err(CatalogError::Unavailable {
                reference,
                message: error
                    .message
                    .unwrap_or_else(|| "failed to fetch playlist".into()),
            });
        }

        let entries = response
            .tracks
            .map(|list| list.data)
            .unwrap_or_default();

        // The per-track release date requires one request per entry; fetch
        // them concurrently like the playlist is one unit of work.
        let detailed = join_all(entries.into_iter().map(|entry| {
            let catalog = self.clone();
            async move { catalog.into_track(entry).await }
        }))
        .await;

        let tracks: Vec<Track> = detailed.into_iter().flatten().collect();
        if tracks.is_empty() {
            return Err(CatalogError::Empty { reference });
        }
        Ok(tracks)
    }

    /// Build a [`Track`] from a playlist entry, resolving its original
    /// release date. Entries without any parseable year are dropped.
    async fn into_track(self, entry: PlaylistTrack) -> Option<Track> {
        let id = entry.id.to_string();

        let release_date = match self
            .get_json::<TrackDetail>(&format!("{}/track/{id}", self.base_url))
            .await
        {
            Ok(detail) => detail.release_date.or(entry.album.release_date),
            Err(message) => {
                warn!(track_id = %id, error = %message, "track detail fetch failed; using album date");
                entry.album.release_date
            }
        };

        let Some(release_year) = release_date.as_deref().and_then(parse_year) else {
            warn!(track_id = %id, title = %entry.title, "no release year; dropping track");
            return None;
        };

        if let Some(url) = entry.preview.filter(|url| !url.is_empty()) {
            self.previews.insert(
                id.clone(),
                TrackPreview {
                    url,
                    // Deezer reports whole seconds.
                    duration_ms: entry.duration * 1000,
                    artwork: entry.album.cover_medium.or(entry.album.cover_small),
                },
            );
        }

        Some(Track {
            id,
            title: entry.title,
            artist: entry.artist.name,
            release_year,
            preview: None,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        response.json::<T>().await.map_err(|err| err.to_string())
    }
}

impl TrackCatalog for DeezerCatalog {
    fn list_tracks(&self, reference: &str) -> BoxFuture<'static, CatalogResult<Vec<Track>>> {
        let catalog = self.clone();
        let reference = reference.to_string();
        Box::pin(catalog.fetch_playlist(reference))
    }

    fn resolve_preview(
        &self,
        track_id: &str,
    ) -> BoxFuture<'static, CatalogResult<Option<TrackPreview>>> {
        let catalog = self.clone();
        let track_id = track_id.to_string();
        Box::pin(async move {
            if let Some(preview) = catalog.previews.get(&track_id) {
                return Ok(Some(preview.clone()));
            }

            // Cache miss: the track was never listed through this adapter or
            // the playlist payload had no preview. Ask the track endpoint.
            let url = format!("{}/track/{track_id}", catalog.base_url);
            let detail: TrackDetail =
                catalog
                    .get_json(&url)
                    .await
                    .map_err(|message| CatalogError::Unavailable {
                        reference: track_id.clone(),
                        message,
                    })?;

            let Some(preview_url) = detail.preview.filter(|url| !url.is_empty()) else {
                return Ok(None);
            };

            let preview = TrackPreview {
                url: preview_url,
                duration_ms: detail.duration.unwrap_or_default() * 1000,
                artwork: None,
            };
            catalog.previews.insert(track_id, preview.clone());
            Ok(Some(preview))
        })
    }
}

/// Accept a full playlist URL (`…/playlist/908622995`) or a bare numeric id.
fn extract_playlist_id(reference: &str) -> String {
    match reference.find("playlist/") {
        Some(position) => reference[position + "playlist/".len()..]
            .chars()
            .take_while(char::is_ascii_digit)
            .collect(),
        None => reference
            .trim()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect(),
    }
}

/// Parse the leading `YYYY` of a `YYYY-MM-DD` date string.
fn parse_year(date: &str) -> Option<i32> {
    date.get(..4)?.parse().ok()
}

#[derive(Debug, Deserialize)]
struct PlaylistResponse {
    error: Option<ApiError>,
    tracks: Option<TrackList>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrackList {
    data: Vec<PlaylistTrack>,
}

#[derive(Debug, Deserialize)]
struct PlaylistTrack {
    id: u64,
    title: String,
    preview: Option<String>,
    #[serde(default)]
    duration: u64,
    artist: ArtistRef,
    album: AlbumRef,
}

#[derive(Debug, Deserialize)]
struct ArtistRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AlbumRef {
    cover_medium: Option<String>,
    cover_small: Option<String>,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TrackDetail {
    release_date: Option<String>,
    preview: Option<String>,
    duration: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_id_from_full_url() {
        assert_eq!(
            extract_playlist_id("https://www.deezer.com/playlist/908622995"),
            "908622995"
        );
        assert_eq!(
            extract_playlist_id("https://www.deezer.com/fr/playlist/908622995?utm=x"),
            "908622995"
        );
    }

    #[test]
    fn extracts_bare_numeric_id() {
        assert_eq!(extract_playlist_id(" 908622995 "), "908622995");
        assert_eq!(extract_playlist_id("not-a-playlist"), "");
    }

    #[test]
    fn parses_release_years() {
        assert_eq!(parse_year("1967-06-01"), Some(1967));
        assert_eq!(parse_year("1967"), Some(1967));
        assert_eq!(parse_year("Unknown"), None);
        assert_eq!(parse_year(""), None);
    }
}
