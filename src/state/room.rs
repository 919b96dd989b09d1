//! Room state machine: membership, turn rotation, round lifecycle, scores.
//!
//! Operations are synchronous: they mutate the room and return the outbound
//! events plus the side effects ([`Directive`]) the engine must run. That
//! keeps the whole machine unit-testable without a runtime, and guarantees
//! clients never observe a half-initialized round because the engine applies
//! one operation to completion at a time.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use rand::Rng;
use uuid::Uuid;

use crate::{
    catalog::{Track, TrackPreview},
    config::GameRules,
    dto::{GuessResultEntry, PlayerSummary, TrackChoice, TrackReveal, ws::ServerMessage},
    error::ServiceError,
    scoring::{self, Guess},
};

/// Identifier of a live transport connection.
pub type ConnectionId = Uuid;

/// Lifecycle phase of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Players can join; the game has not started.
    Lobby,
    /// Game started, first round not yet opened.
    Playing,
    /// A round is open and the current player may guess.
    RoundActive,
    /// The last round resolved; waiting for the next one.
    RoundResolved,
    /// No connected player can take a turn; rounds are on hold.
    Paused,
    /// The game finished; the room only awaits teardown.
    GameOver,
}

/// One seat in a room.
///
/// The identity (lower-cased name) survives reconnects; the connection is
/// rebound on every reconnect and cleared while the seat is unoccupied.
#[derive(Debug, Clone)]
pub struct Player {
    /// Display name, as first typed.
    pub name: String,
    /// Current transport identity, or `None` while disconnected.
    pub connection: Option<ConnectionId>,
    /// Point total.
    pub stars: u32,
    /// Skips left; never replenished.
    pub skips_remaining: u32,
}

impl Player {
    /// Whether a live connection currently holds this seat.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}

/// Who should receive an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// The host plus every connected player.
    Room,
    /// The host connection only.
    Host,
    /// One specific connection.
    Connection(ConnectionId),
}

/// An outbound message paired with its audience.
#[derive(Debug, Clone)]
pub struct Outbound {
    /// Delivery scope.
    pub audience: Audience,
    /// The message to deliver.
    pub message: ServerMessage,
}

impl Outbound {
    fn room(message: ServerMessage) -> Self {
        Self {
            audience: Audience::Room,
            message,
        }
    }

    fn host(message: ServerMessage) -> Self {
        Self {
            audience: Audience::Host,
            message,
        }
    }

    fn to(connection: ConnectionId, message: ServerMessage) -> Self {
        Self {
            audience: Audience::Connection(connection),
            message,
        }
    }
}

/// Side effects the engine must run after applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Arm the round timer for this generation, replacing any prior timer.
    ArmTimer {
        /// Generation the timeout must echo back to be honored.
        generation: u64,
        /// Maximum round duration.
        duration: Duration,
    },
    /// Abort any armed timer task.
    DisarmTimer,
    /// Start the next round after the delay.
    ScheduleRound {
        /// Pause before the deferred round start.
        delay: Duration,
    },
    /// Tear the room down and drop it from the registry.
    Destroy,
}

/// Result of one operation: messages to deliver and effects to run.
#[derive(Debug, Default)]
pub struct Output {
    /// Outbound messages, in delivery order.
    pub events: Vec<Outbound>,
    /// Side effects, run after delivery.
    pub directives: Vec<Directive>,
}

/// How a round start attempt turned out.
#[derive(Debug)]
pub enum RoundSetup {
    /// A track was selected; the engine resolves its preview, then calls
    /// [`Room::open_round`].
    Selected {
        /// Identifier of the selected track.
        track_id: String,
    },
    /// The catalog ran out of unused tracks; the game ended.
    Finished(Output),
    /// No connected player can take the turn; the room paused instead.
    Paused(Output),
}

/// Effect of a connection dropping on its room.
#[derive(Debug)]
pub enum DisconnectOutcome {
    /// The host dropped; the room must be destroyed.
    HostLeft(Output),
    /// A player's connection dropped (or a lobby player left).
    PlayerDropped(Output),
    /// The connection does not hold any seat here (e.g. it was superseded).
    NotAMember,
}

/// In-memory state for one game session.
pub struct Room {
    code: String,
    host: ConnectionId,
    tracks: Vec<Track>,
    used_tracks: HashSet<String>,
    /// Key is the lower-cased identity; insertion order defines the turn
    /// rotation and is never reordered by disconnects.
    players: IndexMap<String, Player>,
    current_player_index: usize,
    current_round: u32,
    current_track: Option<usize>,
    pending_guess: Option<(String, Guess, Duration)>,
    phase: RoomPhase,
    timer_generation: u64,
    round_started_at: Option<Instant>,
    rules: GameRules,
}

impl Room {
    /// Create a room in the lobby phase with an immutable track list.
    pub fn new(code: String, host: ConnectionId, tracks: Vec<Track>, rules: GameRules) -> Self {
        Self {
            code,
            host,
            tracks,
            used_tracks: HashSet::new(),
            players: IndexMap::new(),
            current_player_index: 0,
            current_round: 0,
            current_track: None,
            pending_guess: None,
            phase: RoomPhase::Lobby,
            timer_generation: 0,
            round_started_at: None,
            rules,
        }
    }

    /// The room's join code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The controlling (host) connection.
    pub fn host(&self) -> ConnectionId {
        self.host
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> RoomPhase {
        self.phase
    }

    /// Number of tracks in the room's catalog.
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Look up a player by identity (case-insensitive).
    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.get(&name.trim().to_lowercase())
    }

    /// Roster snapshot in turn order.
    pub fn summaries(&self) -> Vec<PlayerSummary> {
        self.players.values().map(Into::into).collect()
    }

    /// Connections reached by a room-wide broadcast: the host plus every
    /// connected player.
    pub fn recipients(&self) -> Vec<ConnectionId> {
        std::iter::once(self.host)
            .chain(self.players.values().filter_map(|player| player.connection))
            .collect()
    }

    /// Reject the call unless it comes from the host connection.
    pub fn authorize_host(&self, requester: ConnectionId) -> Result<(), ServiceError> {
        if requester == self.host {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized(
                "only the host can do that".into(),
            ))
        }
    }

    /// Add a player, or rebind an existing identity to a new connection.
    ///
    /// Reclaiming a seat preserves score and skip count; a still-live prior
    /// holder is told it has been superseded. A rejoin during an active round
    /// immediately receives the reconstructed round state.
    pub fn join(&mut self, connection: ConnectionId, name: &str) -> Result<Output, ServiceError> {
        let display = name.trim().to_string();
        let key = display.to_lowercase();
        let mut output = Output::default();

        if self.players.contains_key(&key) {
            let superseded = {
                let player = self
                    .players
                    .get_mut(&key)
                    .ok_or_else(|| ServiceError::NotFound(format!("player `{display}` not found")))?;
                player.connection.replace(connection)
            };

            if let Some(previous) = superseded {
                if previous != connection {
                    output
                        .events
                        .push(Outbound::to(previous, ServerMessage::ConnectionSuperseded));
                }
            }

            output.events.push(Outbound::to(
                connection,
                ServerMessage::RejoinedRoom {
                    code: self.code.clone(),
                    players: self.summaries(),
                },
            ));
            output.events.push(Outbound::room(ServerMessage::PlayerReconnected {
                players: self.summaries(),
            }));

            match self.phase {
                RoomPhase::RoundActive => {
                    output
                        .events
                        .push(Outbound::to(connection, self.reconstruct_round_start(&key)));
                }
                RoomPhase::Paused => {
                    // Somebody can take a turn again.
                    output.directives.push(Directive::ScheduleRound {
                        delay: self.rules.next_round_delay(),
                    });
                }
                _ => {}
            }

            return Ok(output);
        }

        if self.phase != RoomPhase::Lobby {
            return Err(ServiceError::InvalidState("game already in progress".into()));
        }
        if self.players.len() >= self.rules.room_capacity {
            return Err(ServiceError::InvalidState("room is full".into()));
        }

        self.players.insert(
            key,
            Player {
                name: display,
                connection: Some(connection),
                stars: 0,
                skips_remaining: self.rules.starting_skips,
            },
        );

        output.events.push(Outbound::to(
            connection,
            ServerMessage::JoinedRoom {
                code: self.code.clone(),
                players: self.summaries(),
            },
        ));
        output.events.push(Outbound::room(ServerMessage::PlayerJoined {
            players: self.summaries(),
        }));
        Ok(output)
    }

    /// One-way transition out of the lobby. Host-only.
    pub fn start_game(&mut self, requester: ConnectionId) -> Result<Output, ServiceError> {
        self.authorize_host(requester)?;
        if self.phase != RoomPhase::Lobby {
            return Err(ServiceError::InvalidState("game already started".into()));
        }
        if self.players.is_empty() {
            return Err(ServiceError::InvalidState(
                "need at least one player to start".into(),
            ));
        }

        self.phase = RoomPhase::Playing;
        let mut output = Output::default();
        output.events.push(Outbound::room(ServerMessage::GameStarted));
        Ok(output)
    }

    /// Pick the next round's track, or end or pause the game.
    ///
    /// On `Selected` the round is not visible to clients yet: the engine
    /// resolves the track preview and then calls [`Room::open_round`].
    pub fn begin_round(&mut self) -> Result<RoundSetup, ServiceError> {
        match self.phase {
            RoomPhase::Playing | RoomPhase::RoundResolved | RoomPhase::Paused => {}
            RoomPhase::Lobby => {
                return Err(ServiceError::InvalidState("the game has not started".into()));
            }
            RoomPhase::RoundActive => {
                return Err(ServiceError::InvalidState("a round is already active".into()));
            }
            RoomPhase::GameOver => {
                return Err(ServiceError::InvalidState("the game is over".into()));
            }
        }

        let Some(next_index) = self.next_connected_from(self.current_player_index) else {
            self.phase = RoomPhase::Paused;
            let mut output = Output::default();
            output.events.push(Outbound::room(ServerMessage::GamePaused {
                reason: "all players disconnected".into(),
            }));
            return Ok(RoundSetup::Paused(output));
        };
        self.current_player_index = next_index;

        let available: Vec<usize> = (0..self.tracks.len())
            .filter(|&index| !self.used_tracks.contains(&self.tracks[index].id))
            .collect();
        if available.is_empty() {
            return Ok(RoundSetup::Finished(self.finish_by_exhaustion()));
        }

        let mut rng = rand::rng();
        let track_index = available[rng.random_range(0..available.len())];
        let track_id = self.tracks[track_index].id.clone();
        self.used_tracks.insert(track_id.clone());
        self.current_track = Some(track_index);
        self.current_round += 1;
        self.pending_guess = None;

        Ok(RoundSetup::Selected { track_id })
    }

    /// Publish the round selected by [`Room::begin_round`] and arm the timer.
    pub fn open_round(&mut self, preview: Option<TrackPreview>) -> Output {
        let mut output = Output::default();
        let Some(track_index) = self.current_track else {
            return output;
        };

        // Cache the preview for the room's lifetime; tracks are immutable
        // once fetched.
        if self.tracks[track_index].preview.is_none() {
            self.tracks[track_index].preview = preview;
        }

        self.phase = RoomPhase::RoundActive;
        self.round_started_at = Some(Instant::now());
        self.timer_generation += 1;

        let Some((_, current)) = self.players.get_index(self.current_player_index) else {
            return output;
        };
        let current_name = current.name.clone();
        let preview_url = self.tracks[track_index]
            .preview
            .as_ref()
            .map(|preview| preview.url.clone());

        output.events.push(Outbound::host(ServerMessage::PlayTrack {
            preview_url,
            round: self.current_round,
            current_player: current_name.clone(),
        }));

        let choices: Vec<TrackChoice> = self.tracks.iter().map(Into::into).collect();
        for (index, (_, player)) in self.players.iter().enumerate() {
            let Some(connection) = player.connection else {
                continue;
            };
            let message = if index == self.current_player_index {
                ServerMessage::RoundStart {
                    round: self.current_round,
                    is_your_turn: true,
                    track_choices: Some(choices.clone()),
                    current_player_name: None,
                }
            } else {
                ServerMessage::RoundStart {
                    round: self.current_round,
                    is_your_turn: false,
                    track_choices: None,
                    current_player_name: Some(current_name.clone()),
                }
            };
            output.events.push(Outbound::to(connection, message));
        }

        output.directives.push(Directive::ArmTimer {
            generation: self.timer_generation,
            duration: self.rules.round_duration(),
        });
        output
    }

    /// Record the current player's guess and immediately resolve the round.
    pub fn submit_guess(
        &mut self,
        connection: ConnectionId,
        guess: Guess,
    ) -> Result<Output, ServiceError> {
        if self.phase != RoomPhase::RoundActive {
            return Err(ServiceError::InvalidState("no round is active".into()));
        }

        let Some((key, player)) = self.players.get_index(self.current_player_index) else {
            return Err(ServiceError::InvalidState("no current player".into()));
        };
        if player.connection != Some(connection) {
            return Err(ServiceError::Unauthorized("it is not your turn".into()));
        }

        let identity = key.clone();
        let latency = self
            .round_started_at
            .map(|started| started.elapsed())
            .unwrap_or_default();
        self.pending_guess = Some((identity, guess, latency));

        // One guess per round: submission and resolution are coupled.
        let mut output = self.resolve_round();
        output
            .events
            .insert(0, Outbound::to(connection, ServerMessage::GuessReceived));
        Ok(output)
    }

    /// Spend one of the current player's skips and retry with a new song.
    pub fn use_skip(&mut self, connection: ConnectionId) -> Result<Output, ServiceError> {
        if self.phase != RoomPhase::RoundActive {
            return Err(ServiceError::InvalidState("no round is active".into()));
        }

        let Some((_, player)) = self.players.get_index(self.current_player_index) else {
            return Err(ServiceError::InvalidState("no current player".into()));
        };
        if player.connection != Some(connection) {
            return Err(ServiceError::Unauthorized("it is not your turn".into()));
        }
        if player.skips_remaining == 0 {
            return Err(ServiceError::InvalidState("no skips left".into()));
        }

        let (name, skips_remaining) = {
            let Some((_, player)) = self.players.get_index_mut(self.current_player_index) else {
                return Err(ServiceError::InvalidState("no current player".into()));
            };
            player.skips_remaining -= 1;
            (player.name.clone(), player.skips_remaining)
        };

        let mut output = Output::default();
        // The skipped track stays used; the same player retries with a new one.
        self.cancel_round(&mut output);
        output.events.push(Outbound::room(ServerMessage::SkipUsed {
            player: name,
            skips_remaining,
            players: self.summaries(),
        }));
        output.directives.push(Directive::ScheduleRound {
            delay: self.rules.next_round_delay(),
        });
        Ok(output)
    }

    /// Host-initiated skip: same retry semantics, no skip deducted.
    pub fn host_skip(&mut self, requester: ConnectionId) -> Result<Output, ServiceError> {
        self.authorize_host(requester)?;
        if self.phase != RoomPhase::RoundActive {
            return Err(ServiceError::InvalidState("no round is active".into()));
        }

        let mut output = Output::default();
        self.cancel_round(&mut output);
        output.events.push(Outbound::room(ServerMessage::HostSkippedSong {
            players: self.summaries(),
        }));
        output.directives.push(Directive::ScheduleRound {
            delay: self.rules.next_round_delay(),
        });
        Ok(output)
    }

    /// Host-only manual resolution of a round with no submitted guess.
    pub fn end_round_now(&mut self, requester: ConnectionId) -> Result<Output, ServiceError> {
        self.authorize_host(requester)?;
        if self.phase != RoomPhase::RoundActive {
            return Err(ServiceError::InvalidState("no round is active".into()));
        }
        Ok(self.resolve_round())
    }

    /// Host-only star adjustment, clamped at zero.
    pub fn adjust_stars(
        &mut self,
        requester: ConnectionId,
        name: &str,
        delta: i32,
    ) -> Result<Output, ServiceError> {
        self.authorize_host(requester)?;

        let key = name.trim().to_lowercase();
        let player = self
            .players
            .get_mut(&key)
            .ok_or_else(|| ServiceError::NotFound(format!("player `{name}` not found")))?;

        player.stars = if delta >= 0 {
            player.stars.saturating_add(delta as u32)
        } else {
            player.stars.saturating_sub(delta.unsigned_abs())
        };

        let mut output = Output::default();
        output
            .events
            .push(Outbound::room(ServerMessage::PlayerStarsAdjusted {
                players: self.summaries(),
            }));
        Ok(output)
    }

    /// Host-only removal of a disconnected player.
    pub fn remove_player(
        &mut self,
        requester: ConnectionId,
        name: &str,
    ) -> Result<Output, ServiceError> {
        self.authorize_host(requester)?;

        let key = name.trim().to_lowercase();
        let index = self
            .players
            .get_index_of(&key)
            .ok_or_else(|| ServiceError::NotFound(format!("player `{name}` not found")))?;
        if self.players[index].is_connected() {
            return Err(ServiceError::InvalidState(
                "player is still connected; they must disconnect first".into(),
            ));
        }
        // A started room must keep at least one seat: removed identities
        // cannot rejoin, so emptying the roster would strand the room.
        if self.phase != RoomPhase::Lobby && self.players.len() == 1 {
            return Err(ServiceError::InvalidState(
                "cannot remove the last player of a started game".into(),
            ));
        }

        self.players.shift_remove_index(index);
        if index < self.current_player_index {
            self.current_player_index -= 1;
        } else if self.current_player_index >= self.players.len() {
            self.current_player_index = 0;
        }

        let mut output = Output::default();
        output.events.push(Outbound::room(ServerMessage::PlayerRemoved {
            players: self.summaries(),
        }));
        Ok(output)
    }

    /// React to a transport connection dropping.
    ///
    /// The host dropping destroys the room. A player dropping in the lobby
    /// releases the seat; mid-game the seat is kept for reconnection. A drop
    /// during the player's own turn cancels the round without scoring and
    /// hands the turn on.
    pub fn disconnect(&mut self, connection: ConnectionId) -> DisconnectOutcome {
        if connection == self.host {
            let mut output = Output::default();
            self.disarm(&mut output);
            output.events.push(Outbound::room(ServerMessage::HostDisconnected));
            output.directives.push(Directive::Destroy);
            return DisconnectOutcome::HostLeft(output);
        }

        let Some(index) = self
            .players
            .values()
            .position(|player| player.connection == Some(connection))
        else {
            // Superseded connections no longer hold a seat.
            return DisconnectOutcome::NotAMember;
        };

        let mut output = Output::default();

        if self.phase == RoomPhase::Lobby {
            self.players.shift_remove_index(index);
            output.events.push(Outbound::room(ServerMessage::PlayerLeft {
                players: self.summaries(),
            }));
            return DisconnectOutcome::PlayerDropped(output);
        }

        if let Some((_, player)) = self.players.get_index_mut(index) {
            player.connection = None;
        }
        output
            .events
            .push(Outbound::room(ServerMessage::PlayerDisconnected {
                players: self.summaries(),
            }));

        if self.phase == RoomPhase::RoundActive && index == self.current_player_index {
            // The guessing player vanished: cancel without scoring, move on.
            self.cancel_round(&mut output);
            self.current_player_index = (index + 1) % self.players.len();
            if self.any_connected() {
                output.directives.push(Directive::ScheduleRound {
                    delay: self.rules.next_round_delay(),
                });
            } else {
                self.phase = RoomPhase::Paused;
                output.events.push(Outbound::room(ServerMessage::GamePaused {
                    reason: "all players disconnected".into(),
                }));
            }
        } else if !self.any_connected()
            && matches!(self.phase, RoomPhase::Playing | RoomPhase::RoundResolved)
        {
            self.phase = RoomPhase::Paused;
            output.events.push(Outbound::room(ServerMessage::GamePaused {
                reason: "all players disconnected".into(),
            }));
        }

        DisconnectOutcome::PlayerDropped(output)
    }

    /// Resolve the round if this timeout is still current; stale generations
    /// are ignored.
    pub fn handle_timeout(&mut self, generation: u64) -> Option<Output> {
        if self.phase != RoomPhase::RoundActive || generation != self.timer_generation {
            return None;
        }
        Some(self.resolve_round())
    }

    /// Round resolution: score the pending guess (if any), reveal the track,
    /// advance the turn, and detect a threshold win.
    fn resolve_round(&mut self) -> Output {
        let mut output = Output::default();
        self.disarm(&mut output);
        self.phase = RoomPhase::RoundResolved;
        self.round_started_at = None;

        let Some(track_index) = self.current_track.take() else {
            return output;
        };
        let reveal = TrackReveal::from(&self.tracks[track_index]);

        let mut results = Vec::new();
        let mut points_earned = 0;
        let mut round_winner = None;
        let mut threshold_winner: Option<String> = None;

        if let Some((identity, guess, latency)) = self.pending_guess.take() {
            let verdict = scoring::score_guess(&guess, &self.tracks[track_index], &self.rules);
            if let Some(player) = self.players.get_mut(&identity) {
                player.stars += verdict.points;
                points_earned = verdict.points;
                if verdict.points > 0 {
                    round_winner = Some(player.name.clone());
                    if player.stars >= self.rules.win_threshold {
                        threshold_winner = Some(identity.clone());
                    }
                }
                results.push(GuessResultEntry {
                    player: player.name.clone(),
                    verdict,
                    submission_ms: Some(latency.as_millis() as u64),
                });
            }
        }

        if !self.players.is_empty() {
            self.current_player_index = (self.current_player_index + 1) % self.players.len();
        }

        output.events.push(Outbound::room(ServerMessage::RoundResults {
            track: reveal,
            results,
            round_winner,
            points_earned,
            players: self.summaries(),
        }));

        if let Some(identity) = threshold_winner {
            self.finish_with_winner(&identity, &mut output);
        }
        output
    }

    /// End the game because the catalog has no unused tracks left. The winner
    /// is the highest score, ties broken by join order.
    fn finish_by_exhaustion(&mut self) -> Output {
        let mut output = Output::default();
        self.disarm(&mut output);
        self.phase = RoomPhase::GameOver;

        let winner = self
            .players
            .values()
            .fold(None::<&Player>, |best, candidate| match best {
                Some(current) if candidate.stars > current.stars => Some(candidate),
                Some(current) => Some(current),
                None => Some(candidate),
            });

        if let Some(winner) = winner {
            output.events.push(Outbound::room(ServerMessage::GameOver {
                winner: winner.into(),
                players: self.summaries(),
            }));
        }
        output
    }

    fn finish_with_winner(&mut self, identity: &str, output: &mut Output) {
        self.phase = RoomPhase::GameOver;
        if let Some(winner) = self.players.get(identity) {
            output.events.push(Outbound::room(ServerMessage::GameOver {
                winner: winner.into(),
                players: self.summaries(),
            }));
        }
    }

    /// Discard the in-flight round without scoring.
    fn cancel_round(&mut self, output: &mut Output) {
        self.disarm(output);
        self.pending_guess = None;
        self.current_track = None;
        self.round_started_at = None;
        self.phase = RoomPhase::RoundResolved;
    }

    /// Invalidate the armed timer. Bumping the generation makes any timeout
    /// that already fired a no-op; the directive also aborts the sleep task.
    fn disarm(&mut self, output: &mut Output) {
        self.timer_generation += 1;
        output.directives.push(Directive::DisarmTimer);
    }

    /// First connected player at or after `start`, in turn order.
    fn next_connected_from(&self, start: usize) -> Option<usize> {
        if self.players.is_empty() {
            return None;
        }
        (0..self.players.len())
            .map(|offset| (start + offset) % self.players.len())
            .find(|&index| {
                self.players
                    .get_index(index)
                    .is_some_and(|(_, player)| player.is_connected())
            })
    }

    fn any_connected(&self) -> bool {
        self.players.values().any(Player::is_connected)
    }

    /// Round state replayed to a connection that (re)joined mid-round.
    fn reconstruct_round_start(&self, identity: &str) -> ServerMessage {
        let is_your_turn = self.players.get_index_of(identity) == Some(self.current_player_index);
        if is_your_turn {
            ServerMessage::RoundStart {
                round: self.current_round,
                is_your_turn: true,
                track_choices: Some(self.tracks.iter().map(Into::into).collect()),
                current_player_name: None,
            }
        } else {
            ServerMessage::RoundStart {
                round: self.current_round,
                is_your_turn: false,
                track_choices: None,
                current_player_name: self
                    .players
                    .get_index(self.current_player_index)
                    .map(|(_, player)| player.name.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, title: &str, artist: &str, year: i32) -> Track {
        Track {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            release_year: year,
            preview: None,
        }
    }

    fn tracks(count: usize) -> Vec<Track> {
        (0..count)
            .map(|n| track(&format!("t{n}"), &format!("Song {n}"), "Artist", 1990 + n as i32))
            .collect()
    }

    fn rules() -> GameRules {
        GameRules::default()
    }

    fn room_with(track_count: usize) -> (Room, ConnectionId) {
        let host = Uuid::new_v4();
        (
            Room::new("ABCD".into(), host, tracks(track_count), rules()),
            host,
        )
    }

    /// Drive the room into an active round and return the selected track id.
    fn start_round(room: &mut Room) -> String {
        match room.begin_round().expect("round should start") {
            RoundSetup::Selected { track_id } => {
                room.open_round(None);
                track_id
            }
            other => panic!("expected a selected track, got {other:?}"),
        }
    }

    fn correct_guess(room: &Room, track_id: &str) -> Guess {
        let track = room
            .tracks
            .iter()
            .find(|t| t.id == track_id)
            .expect("selected track exists");
        Guess {
            track_id: Some(track.id.clone()),
            artist: track.artist.clone(),
            year: track.release_year,
        }
    }

    fn event_types(output: &Output) -> Vec<String> {
        output
            .events
            .iter()
            .map(|outbound| {
                serde_json::to_value(&outbound.message).expect("serialize")["type"]
                    .as_str()
                    .expect("tagged message")
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn identities_are_unique_case_insensitively() {
        let (mut room, _) = room_with(3);
        let alice = Uuid::new_v4();
        room.join(alice, "Alice").expect("first join");

        let alice_again = Uuid::new_v4();
        let output = room.join(alice_again, "ALICE").expect("rejoin by case-folded name");
        assert!(event_types(&output).contains(&"connection-superseded".to_string()));
        assert_eq!(room.summaries().len(), 1);
        assert_eq!(room.player("alice").expect("seat exists").connection, Some(alice_again));
    }

    #[test]
    fn capacity_is_enforced() {
        let (mut room, _) = room_with(3);
        for n in 0..rules().room_capacity {
            room.join(Uuid::new_v4(), &format!("player{n}")).expect("join under capacity");
        }
        let err = room.join(Uuid::new_v4(), "overflow").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert_eq!(room.summaries().len(), rules().room_capacity);
    }

    #[test]
    fn new_identities_cannot_join_a_started_game_but_rejoins_can() {
        let (mut room, host) = room_with(3);
        let alice = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.start_game(host).expect("start");

        let err = room.join(Uuid::new_v4(), "Bob").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        room.disconnect(alice);
        let output = room.join(Uuid::new_v4(), "alice").expect("mid-game rejoin");
        assert!(event_types(&output).contains(&"rejoined-room".to_string()));
    }

    #[test]
    fn rejoin_preserves_score_and_skips_exactly() {
        let (mut room, host) = room_with(5);
        let alice = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.start_game(host).expect("start");

        let track_id = start_round(&mut room);
        room.submit_guess(alice, correct_guess(&room, &track_id))
            .expect("guess accepted");
        let second = start_round(&mut room);
        assert_ne!(second, track_id, "used tracks are never re-selected");
        room.use_skip(alice).expect("skip accepted");

        let stars_before = room.player("Alice").expect("seat").stars;
        let skips_before = room.player("Alice").expect("seat").skips_remaining;
        assert_eq!(stars_before, 2);
        assert_eq!(skips_before, rules().starting_skips - 1);

        room.disconnect(alice);
        room.join(Uuid::new_v4(), "Alice").expect("rejoin");
        let seat = room.player("Alice").expect("seat survives");
        assert_eq!(seat.stars, stars_before);
        assert_eq!(seat.skips_remaining, skips_before);
    }

    #[test]
    fn rejoiner_mid_round_gets_the_round_reconstructed() {
        let (mut room, host) = room_with(3);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.join(bob, "Bob").expect("join");
        room.start_game(host).expect("start");
        start_round(&mut room);

        room.disconnect(bob);
        let output = room.join(Uuid::new_v4(), "Bob").expect("rejoin mid-round");
        let round_start = output
            .events
            .iter()
            .find_map(|outbound| match &outbound.message {
                ServerMessage::RoundStart {
                    round,
                    is_your_turn,
                    current_player_name,
                    ..
                } => Some((*round, *is_your_turn, current_player_name.clone())),
                _ => None,
            })
            .expect("round state replayed");
        assert_eq!(round_start, (1, false, Some("Alice".into())));
    }

    #[test]
    fn start_game_requires_host_and_players() {
        let (mut room, host) = room_with(3);
        let err = room.start_game(host).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));

        let alice = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        let err = room.start_game(alice).unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        room.start_game(host).expect("host starts");
        let err = room.start_game(host).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)), "one-way transition");
    }

    #[test]
    fn at_most_one_round_is_active_at_a_time() {
        let (mut room, host) = room_with(3);
        room.join(Uuid::new_v4(), "Alice").expect("join");
        room.start_game(host).expect("start");
        start_round(&mut room);

        assert_eq!(room.phase(), RoomPhase::RoundActive);
        let err = room.begin_round().unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[test]
    fn wrong_turn_guesses_are_rejected() {
        let (mut room, host) = room_with(3);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.join(bob, "Bob").expect("join");
        room.start_game(host).expect("start");
        let track_id = start_round(&mut room);

        let err = room
            .submit_guess(bob, correct_guess(&room, &track_id))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[test]
    fn submission_resolves_the_round_and_awards_tiered_points() {
        let (mut room, host) = room_with(5);
        let alice = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.start_game(host).expect("start");

        let track_id = start_round(&mut room);
        let truth_year = room
            .tracks
            .iter()
            .find(|t| t.id == track_id)
            .expect("track")
            .release_year;
        let output = room
            .submit_guess(
                alice,
                Guess {
                    track_id: Some(track_id),
                    artist: "artist".into(),
                    year: truth_year + 4,
                },
            )
            .expect("guess accepted");

        assert_eq!(room.phase(), RoomPhase::RoundResolved);
        let types = event_types(&output);
        assert_eq!(types.first().map(String::as_str), Some("guess-received"));
        assert!(types.contains(&"round-results".to_string()));
        assert_eq!(room.player("Alice").expect("seat").stars, 1, "close year tier");

        let err = room
            .submit_guess(
                alice,
                Guess {
                    track_id: None,
                    artist: String::new(),
                    year: 0,
                },
            )
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)), "round no longer active");
    }

    #[test]
    fn timeout_resolves_with_no_points_and_stale_timers_are_ignored() {
        let (mut room, host) = room_with(3);
        room.join(Uuid::new_v4(), "Alice").expect("join");
        room.start_game(host).expect("start");
        start_round(&mut room);

        let armed_generation = room.timer_generation;
        let output = room.handle_timeout(armed_generation).expect("current timer fires");
        assert!(event_types(&output).contains(&"round-results".to_string()));
        assert_eq!(room.player("Alice").expect("seat").stars, 0);
        assert_eq!(room.phase(), RoomPhase::RoundResolved);

        // The same generation cannot fire twice, nor against a new round.
        assert!(room.handle_timeout(armed_generation).is_none());
        start_round(&mut room);
        assert!(room.handle_timeout(armed_generation).is_none());
    }

    #[test]
    fn turn_rotation_is_round_robin_over_connected_players() {
        let (mut room, host) = room_with(10);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.join(bob, "Bob").expect("join");
        room.join(carol, "Carol").expect("join");
        room.start_game(host).expect("start");

        let track_id = start_round(&mut room);
        assert_eq!(room.current_player_index, 0);
        room.submit_guess(alice, correct_guess(&room, &track_id))
            .expect("alice guesses");

        // Bob is next but disconnected: the round starts with Carol.
        room.disconnect(bob);
        start_round(&mut room);
        assert_eq!(room.current_player_index, 2, "disconnected player skipped");
    }

    #[test]
    fn disconnect_during_own_turn_cancels_the_round_and_advances() {
        let (mut room, host) = room_with(5);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.join(bob, "Bob").expect("join");
        room.start_game(host).expect("start");
        start_round(&mut room);

        let outcome = room.disconnect(alice);
        let DisconnectOutcome::PlayerDropped(output) = outcome else {
            panic!("expected a player drop");
        };
        assert_eq!(room.phase(), RoomPhase::RoundResolved);
        assert_eq!(room.current_player_index, 1);
        assert_eq!(room.player("Alice").expect("seat").stars, 0, "no points awarded");
        assert!(output
            .directives
            .iter()
            .any(|d| matches!(d, Directive::ScheduleRound { .. })));
    }

    #[test]
    fn room_pauses_when_every_player_is_disconnected_and_resumes_on_rejoin() {
        let (mut room, host) = room_with(5);
        let alice = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.start_game(host).expect("start");
        start_round(&mut room);

        room.disconnect(alice);
        assert_eq!(room.phase(), RoomPhase::Paused);

        let output = room.join(Uuid::new_v4(), "Alice").expect("rejoin");
        assert!(output
            .directives
            .iter()
            .any(|d| matches!(d, Directive::ScheduleRound { .. })));
        match room.begin_round().expect("round can start again") {
            RoundSetup::Selected { .. } => {}
            other => panic!("expected a new round, got {other:?}"),
        }
    }

    #[test]
    fn skip_decrements_and_keeps_the_same_player() {
        let (mut room, host) = room_with(5);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.join(bob, "Bob").expect("join");
        room.start_game(host).expect("start");
        start_round(&mut room);

        let output = room.use_skip(alice).expect("skip accepted");
        assert!(event_types(&output).contains(&"skip-used".to_string()));
        assert_eq!(
            room.player("Alice").expect("seat").skips_remaining,
            rules().starting_skips - 1
        );
        assert_eq!(room.current_player_index, 0, "same player retries");

        start_round(&mut room);
        let err = room.use_skip(bob).unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[test]
    fn skip_is_rejected_once_exhausted() {
        let mut custom = rules();
        custom.starting_skips = 1;
        let host = Uuid::new_v4();
        let mut room = Room::new("ABCD".into(), host, tracks(5), custom);
        let alice = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.start_game(host).expect("start");

        start_round(&mut room);
        room.use_skip(alice).expect("first skip");
        start_round(&mut room);
        let err = room.use_skip(alice).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
    }

    #[test]
    fn host_skip_charges_nobody_and_requires_the_host() {
        let (mut room, host) = room_with(5);
        let alice = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.start_game(host).expect("start");
        start_round(&mut room);

        let err = room.host_skip(alice).unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let output = room.host_skip(host).expect("host skips");
        assert!(event_types(&output).contains(&"host-skipped-song".to_string()));
        assert_eq!(
            room.player("Alice").expect("seat").skips_remaining,
            rules().starting_skips
        );
    }

    #[test]
    fn end_round_now_counts_as_zero_correct() {
        let (mut room, host) = room_with(3);
        room.join(Uuid::new_v4(), "Alice").expect("join");
        room.start_game(host).expect("start");
        start_round(&mut room);

        let output = room.end_round_now(host).expect("host ends round");
        let results_len = output
            .events
            .iter()
            .find_map(|outbound| match &outbound.message {
                ServerMessage::RoundResults { results, points_earned, .. } => {
                    Some((results.len(), *points_earned))
                }
                _ => None,
            })
            .expect("results broadcast");
        assert_eq!(results_len, (0, 0));
    }

    #[test]
    fn adjust_stars_clamps_at_zero() {
        let (mut room, host) = room_with(3);
        room.join(Uuid::new_v4(), "Alice").expect("join");

        room.adjust_stars(host, "Alice", 3).expect("grant stars");
        assert_eq!(room.player("Alice").expect("seat").stars, 3);
        room.adjust_stars(host, "alice", -5).expect("revoke more than owned");
        assert_eq!(room.player("Alice").expect("seat").stars, 0);

        let err = room.adjust_stars(host, "nobody", 1).unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn removal_requires_disconnection_and_shifts_the_turn_index() {
        let (mut room, host) = room_with(10);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.join(bob, "Bob").expect("join");
        room.join(carol, "Carol").expect("join");
        room.start_game(host).expect("start");

        let track_id = start_round(&mut room);
        room.submit_guess(alice, correct_guess(&room, &track_id))
            .expect("guess");
        assert_eq!(room.current_player_index, 1, "bob's turn next");

        let err = room.remove_player(host, "Alice").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)), "still connected");

        room.disconnect(alice);
        room.remove_player(host, "Alice").expect("remove disconnected player");
        assert_eq!(room.summaries().len(), 2);
        assert_eq!(room.current_player_index, 0, "index shifted down with the roster");
        assert_eq!(
            room.summaries()[room.current_player_index].name,
            "Bob",
            "turn still belongs to the same player"
        );
    }

    #[test]
    fn the_last_player_of_a_started_game_cannot_be_removed() {
        let (mut room, host) = room_with(5);
        let alice = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.start_game(host).expect("start");

        room.disconnect(alice);
        let err = room.remove_player(host, "Alice").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)));
        assert!(room.player("Alice").is_some(), "seat is kept for rejoin");

        // The seat can still be reclaimed and the game resumed.
        room.join(Uuid::new_v4(), "Alice").expect("rejoin");
        match room.begin_round().expect("round can start again") {
            RoundSetup::Selected { .. } => {}
            other => panic!("expected a new round, got {other:?}"),
        }
    }

    #[test]
    fn host_disconnect_tears_the_room_down() {
        let (mut room, host) = room_with(3);
        room.join(Uuid::new_v4(), "Alice").expect("join");

        let DisconnectOutcome::HostLeft(output) = room.disconnect(host) else {
            panic!("expected host teardown");
        };
        assert!(event_types(&output).contains(&"host-disconnected".to_string()));
        assert!(output.directives.contains(&Directive::Destroy));
    }

    #[test]
    fn lobby_leavers_release_their_seat() {
        let (mut room, _) = room_with(3);
        let alice = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");

        let DisconnectOutcome::PlayerDropped(output) = room.disconnect(alice) else {
            panic!("expected a player drop");
        };
        assert!(event_types(&output).contains(&"player-left".to_string()));
        assert!(room.player("Alice").is_none());
    }

    #[test]
    fn superseded_connections_cannot_disconnect_the_seat() {
        let (mut room, host) = room_with(3);
        let old = Uuid::new_v4();
        room.join(old, "Alice").expect("join");
        room.start_game(host).expect("start");

        let new = Uuid::new_v4();
        room.join(new, "Alice").expect("seat reclaimed");
        assert!(matches!(room.disconnect(old), DisconnectOutcome::NotAMember));
        assert!(room.player("Alice").expect("seat").is_connected());
    }

    #[test]
    fn game_over_fires_once_at_the_threshold() {
        let (mut room, host) = room_with(10);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.join(bob, "Bob").expect("join");
        room.start_game(host).expect("start");

        // Five fully-correct rounds by Alice at 2 points each reach the
        // threshold of 10; Bob forfeits his turns by timeout.
        for _ in 0..4 {
            let track_id = start_round(&mut room);
            room.submit_guess(alice, correct_guess(&room, &track_id))
                .expect("alice guesses");
            start_round(&mut room);
            let generation = room.timer_generation;
            room.handle_timeout(generation).expect("bob times out");
        }

        let track_id = start_round(&mut room);
        let output = room
            .submit_guess(alice, correct_guess(&room, &track_id))
            .expect("winning guess");

        let winner = output
            .events
            .iter()
            .find_map(|outbound| match &outbound.message {
                ServerMessage::GameOver { winner, .. } => Some(winner.name.clone()),
                _ => None,
            })
            .expect("game over broadcast");
        assert_eq!(winner, "Alice");
        assert_eq!(room.phase(), RoomPhase::GameOver);

        let err = room.begin_round().unwrap_err();
        assert!(matches!(err, ServiceError::InvalidState(_)), "no rounds after game over");
    }

    #[test]
    fn catalog_exhaustion_ends_the_game_with_the_highest_scorer() {
        let (mut room, host) = room_with(1);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.join(bob, "Bob").expect("join");
        room.start_game(host).expect("start");

        let track_id = start_round(&mut room);
        room.submit_guess(alice, correct_guess(&room, &track_id))
            .expect("alice guesses");

        let RoundSetup::Finished(output) = room.begin_round().expect("no tracks left") else {
            panic!("expected the game to finish");
        };
        let winner = output
            .events
            .iter()
            .find_map(|outbound| match &outbound.message {
                ServerMessage::GameOver { winner, .. } => Some(winner.name.clone()),
                _ => None,
            })
            .expect("game over broadcast");
        assert_eq!(winner, "Alice");
    }

    #[test]
    fn exhaustion_ties_break_by_join_order() {
        let (mut room, host) = room_with(1);
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        room.join(alice, "Alice").expect("join");
        room.join(bob, "Bob").expect("join");
        room.start_game(host).expect("start");

        start_round(&mut room);
        let generation = room.timer_generation;
        room.handle_timeout(generation).expect("nobody scores");

        let RoundSetup::Finished(output) = room.begin_round().expect("no tracks left") else {
            panic!("expected the game to finish");
        };
        let winner = output
            .events
            .iter()
            .find_map(|outbound| match &outbound.message {
                ServerMessage::GameOver { winner, .. } => Some(winner.name.clone()),
                _ => None,
            })
            .expect("game over broadcast");
        assert_eq!(winner, "Alice", "first joiner wins ties");
    }
}
