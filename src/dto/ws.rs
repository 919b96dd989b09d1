//! WebSocket message vocabulary.
//!
//! Both directions are internally tagged enums; the tag is the kebab-case
//! action/event name. Unknown inbound types decode to [`ClientMessage::Unknown`]
//! and are ignored with a warning instead of closing the connection.

use serde::{Deserialize, Serialize};

use crate::dto::{GuessResultEntry, PlayerSummary, TrackChoice, TrackReveal};

/// Actions accepted from connected clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Host bootstraps a room from a playlist reference.
    CreateRoom {
        /// Playlist URL or bare catalog id.
        playlist: String,
    },
    /// Player joins (or rejoins) a room by code.
    JoinRoom {
        /// 4-character room code, case-insensitive.
        code: String,
        /// Player display name; doubles as the stable identity.
        name: String,
    },
    /// Host starts the game.
    StartGame,
    /// Current player submits their guess for the active round.
    SubmitGuess {
        /// Selected track id from the offered choices, if any.
        #[serde(default)]
        track_id: Option<String>,
        /// Free-text artist guess.
        artist: String,
        /// Guessed release year.
        year: i32,
    },
    /// Current player spends one of their skips.
    UseSkip,
    /// Host skips the current song without charging anyone.
    SkipSong,
    /// Host resolves the active round with no guess.
    EndRound,
    /// Host starts the next round.
    NextRound,
    /// Host removes a disconnected player from the room.
    HostRemovePlayer {
        /// Identity of the player to remove.
        name: String,
    },
    /// Host adjusts a player's stars by a signed delta.
    HostAdjustStars {
        /// Identity of the player to adjust.
        name: String,
        /// Signed star delta; the result is clamped at zero.
        delta: i32,
    },
    /// Any message type this server version does not understand.
    #[serde(other)]
    Unknown,
}

/// Events pushed to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Room created; sent to the creating (host) connection.
    RoomCreated {
        /// The room's join code.
        code: String,
        /// Number of tracks in the room's catalog.
        track_count: usize,
    },
    /// Join succeeded with a fresh identity; sent to the joiner.
    JoinedRoom {
        /// The room's join code.
        code: String,
        /// Current roster.
        players: Vec<PlayerSummary>,
    },
    /// Join succeeded by reclaiming an existing seat; sent to the joiner.
    RejoinedRoom {
        /// The room's join code.
        code: String,
        /// Current roster.
        players: Vec<PlayerSummary>,
    },
    /// Roster change: a new player joined.
    PlayerJoined {
        /// Current roster.
        players: Vec<PlayerSummary>,
    },
    /// Roster change: a lobby player left before the game started.
    PlayerLeft {
        /// Current roster.
        players: Vec<PlayerSummary>,
    },
    /// Roster change: a player's connection dropped mid-game.
    PlayerDisconnected {
        /// Current roster.
        players: Vec<PlayerSummary>,
    },
    /// Roster change: a player reclaimed their seat.
    PlayerReconnected {
        /// Current roster.
        players: Vec<PlayerSummary>,
    },
    /// Roster change: the host removed a player.
    PlayerRemoved {
        /// Current roster.
        players: Vec<PlayerSummary>,
    },
    /// The host adjusted a player's stars.
    PlayerStarsAdjusted {
        /// Current roster.
        players: Vec<PlayerSummary>,
    },
    /// The game left the lobby.
    GameStarted,
    /// A round opened; content depends on whose turn it is.
    RoundStart {
        /// Round counter, starting at 1.
        round: u32,
        /// Whether the recipient is the guessing player.
        is_your_turn: bool,
        /// Catalog choices; present only for the guessing player.
        #[serde(skip_serializing_if = "Option::is_none")]
        track_choices: Option<Vec<TrackChoice>>,
        /// Name of the guessing player; present for everyone else.
        #[serde(skip_serializing_if = "Option::is_none")]
        current_player_name: Option<String>,
    },
    /// Playback instruction for the host display.
    PlayTrack {
        /// Preview clip URL; `None` when the catalog had no preview.
        preview_url: Option<String>,
        /// Round counter.
        round: u32,
        /// Name of the guessing player.
        current_player: String,
    },
    /// Acknowledgement that a guess was recorded; sent to the submitter.
    GuessReceived,
    /// Resolution of a round.
    RoundResults {
        /// The revealed ground truth.
        track: TrackReveal,
        /// Verdicts for every submitted guess (at most one in this design).
        results: Vec<GuessResultEntry>,
        /// Name of the player who earned points, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        round_winner: Option<String>,
        /// Points awarded this round.
        points_earned: u32,
        /// Roster with updated scores.
        players: Vec<PlayerSummary>,
    },
    /// The current player spent a skip.
    SkipUsed {
        /// Name of the skipping player.
        player: String,
        /// Skips that player has left.
        skips_remaining: u32,
        /// Current roster.
        players: Vec<PlayerSummary>,
    },
    /// The host skipped the current song.
    HostSkippedSong {
        /// Current roster.
        players: Vec<PlayerSummary>,
    },
    /// No connected player can take a turn; rounds are on hold.
    GamePaused {
        /// Human-readable cause.
        reason: String,
    },
    /// A newer connection reclaimed this connection's seat.
    ConnectionSuperseded,
    /// The host connection dropped; the room is being torn down.
    HostDisconnected,
    /// The game ended.
    GameOver {
        /// The winning player.
        winner: PlayerSummary,
        /// Final roster and scores.
        players: Vec<PlayerSummary>,
    },
    /// A rejected action, reported only to its originator.
    Error {
        /// Human-readable rejection reason.
        message: String,
    },
}
