//! Wire-facing snapshots shared by the outbound message set.

pub mod validation;
pub mod ws;

use serde::Serialize;

use crate::{
    catalog::Track,
    scoring::GuessVerdict,
    state::room::Player,
};

/// Public snapshot of one player in a room.
#[derive(Debug, Clone, Serialize)]
pub struct PlayerSummary {
    /// Display name (also the player's stable identity).
    pub name: String,
    /// Current point total.
    pub stars: u32,
    /// Skips the player can still use.
    pub skips_remaining: u32,
    /// Whether a live connection currently holds this seat.
    pub connected: bool,
}

impl From<&Player> for PlayerSummary {
    fn from(player: &Player) -> Self {
        Self {
            name: player.name.clone(),
            stars: player.stars,
            skips_remaining: player.skips_remaining,
            connected: player.is_connected(),
        }
    }
}

/// Catalog entry offered to the guessing player.
#[derive(Debug, Clone, Serialize)]
pub struct TrackChoice {
    /// Catalog identifier to echo back in a guess.
    pub id: String,
    /// Track title.
    pub title: String,
    /// Artist name.
    pub artist: String,
}

impl From<&Track> for TrackChoice {
    fn from(track: &Track) -> Self {
        Self {
            id: track.id.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
        }
    }
}

/// Ground truth revealed to the whole room with the round results.
#[derive(Debug, Clone, Serialize)]
pub struct TrackReveal {
    /// Track title.
    pub title: String,
    /// Artist name.
    pub artist: String,
    /// Source-verified release year.
    pub year: i32,
    /// Album artwork URL, when the catalog resolved one.
    pub artwork: Option<String>,
}

impl From<&Track> for TrackReveal {
    fn from(track: &Track) -> Self {
        Self {
            title: track.title.clone(),
            artist: track.artist.clone(),
            year: track.release_year,
            artwork: track
                .preview
                .as_ref()
                .and_then(|preview| preview.artwork.clone()),
        }
    }
}

/// Per-player verdict line inside `round-results`.
#[derive(Debug, Clone, Serialize)]
pub struct GuessResultEntry {
    /// Name of the player the verdict belongs to.
    pub player: String,
    /// Correctness flags and point award.
    pub verdict: GuessVerdict,
    /// Milliseconds between round start and submission, when a guess exists.
    pub submission_ms: Option<u64>,
}

/// Response body of the healthcheck endpoint.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Number of active rooms.
    pub rooms: usize,
}
