//! Track catalog collaborators.
//!
//! The engine never fetches music metadata itself; it talks to a
//! [`TrackCatalog`] for the ground-truth track list of a room and for lazy
//! preview resolution. Catalog failures degrade playback but never fail a
//! round.

#[cfg(feature = "deezer-catalog")]
pub mod deezer;

use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt};
use thiserror::Error;

/// Ground-truth metadata for one playable track.
#[derive(Debug, Clone)]
pub struct Track {
    /// Stable catalog identifier.
    pub id: String,
    /// Track title.
    pub title: String,
    /// Primary artist string, as the catalog reports it.
    pub artist: String,
    /// Source-verified original release year.
    pub release_year: i32,
    /// Playback data, absent until resolved on first selection.
    pub preview: Option<TrackPreview>,
}

/// Playback data resolved lazily when a track is first selected.
#[derive(Debug, Clone)]
pub struct TrackPreview {
    /// URL of the playable preview clip.
    pub url: String,
    /// Full track duration in milliseconds.
    pub duration_ms: u64,
    /// Album artwork URL, if the catalog has one.
    pub artwork: Option<String>,
}

/// Errors surfaced by a catalog collaborator.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog reference could not be fetched or parsed.
    #[error("catalog `{reference}` unavailable: {message}")]
    Unavailable {
        /// The reference the caller asked for.
        reference: String,
        /// Upstream failure description.
        message: String,
    },
    /// The catalog resolved but holds no playable tracks.
    #[error("catalog `{reference}` contains no playable tracks")]
    Empty {
        /// The reference the caller asked for.
        reference: String,
    },
}

/// Convenience alias for catalog call results.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Abstraction over the external track catalog.
pub trait TrackCatalog: Send + Sync {
    /// Ordered ground-truth track list for a catalog reference.
    ///
    /// Previews are not resolved here; entries come back with
    /// `preview: None`.
    fn list_tracks(&self, reference: &str) -> BoxFuture<'static, CatalogResult<Vec<Track>>>;

    /// Resolve playback data for a single track.
    ///
    /// `Ok(None)` means the catalog has no preview for this track, which is
    /// not an error: the round proceeds without audio.
    fn resolve_preview(
        &self,
        track_id: &str,
    ) -> BoxFuture<'static, CatalogResult<Option<TrackPreview>>>;
}

/// In-memory catalog used by tests and by builds without a remote backend.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    playlists: DashMap<String, Vec<Track>>,
    previews: DashMap<String, TrackPreview>,
}

impl StaticCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a playlist under a reference.
    pub fn insert_playlist(&self, reference: impl Into<String>, tracks: Vec<Track>) {
        self.playlists.insert(reference.into(), tracks);
    }

    /// Register preview data for a track id.
    pub fn insert_preview(&self, track_id: impl Into<String>, preview: TrackPreview) {
        self.previews.insert(track_id.into(), preview);
    }
}

impl TrackCatalog for StaticCatalog {
    fn list_tracks(&self, reference: &str) -> BoxFuture<'static, CatalogResult<Vec<Track>>> {
        let result = match self.playlists.get(reference) {
            Some(tracks) if !tracks.is_empty() => Ok(tracks.clone()),
            Some(_) => Err(CatalogError::Empty {
                reference: reference.to_string(),
            }),
            None => Err(CatalogError::Unavailable {
                reference: reference.to_string(),
                message: "unknown playlist".into(),
            }),
        };
        future::ready(result).boxed()
    }

    fn resolve_preview(
        &self,
        track_id: &str,
    ) -> BoxFuture<'static, CatalogResult<Option<TrackPreview>>> {
        let preview = self.previews.get(track_id).map(|entry| entry.clone());
        future::ready(Ok(preview)).boxed()
    }
}
