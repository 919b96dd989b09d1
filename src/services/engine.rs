//! The session engine: a single task that owns every room.
//!
//! All mutations flow through one command channel and are applied one at a
//! time to completion, so room state never needs a lock and no client ever
//! observes a half-applied operation. Timers and deferred round starts run as
//! detached tasks that post commands back into the same channel.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::{info, warn};

use crate::{
    catalog::TrackCatalog,
    config::GameRules,
    dto::{
        validation::{validate_player_name, validate_room_code},
        ws::{ClientMessage, ServerMessage},
    },
    error::ServiceError,
    scoring::Guess,
    state::{
        SharedState,
        registry::RoomRegistry,
        room::{Audience, ConnectionId, Directive, DisconnectOutcome, Output, Room, RoundSetup},
    },
};

/// Work items for the engine task.
#[derive(Debug)]
pub enum Command {
    /// A parsed client action, attributed to its connection.
    Client {
        /// Originating connection.
        connection: ConnectionId,
        /// The action itself.
        message: ClientMessage,
    },
    /// A transport connection closed.
    Disconnected {
        /// The closed connection.
        connection: ConnectionId,
    },
    /// The round timer fired. Stale generations are ignored.
    RoundTimeout {
        /// Room the timer belonged to.
        code: String,
        /// Generation the timer was armed with.
        generation: u64,
    },
    /// A deferred round start came due.
    BeginRound {
        /// Room to start the round in.
        code: String,
    },
}

/// Owner of the room registry; processes [`Command`]s sequentially.
pub struct Engine {
    state: SharedState,
    catalog: Arc<dyn TrackCatalog>,
    rules: GameRules,
    registry: RoomRegistry,
    /// Which room each connection belongs to (host or player).
    memberships: HashMap<ConnectionId, String>,
    /// Armed round timer per room.
    timers: HashMap<String, JoinHandle<()>>,
    tx: mpsc::UnboundedSender<Command>,
}

impl Engine {
    /// Build an engine around the shared state and its command channel.
    pub fn new(
        state: SharedState,
        catalog: Arc<dyn TrackCatalog>,
        rules: GameRules,
        tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            state,
            catalog,
            rules,
            registry: RoomRegistry::new(),
            memberships: HashMap::new(),
            timers: HashMap::new(),
            tx,
        }
    }

    /// Spawn the engine task over its command receiver.
    pub fn spawn(self, mut rx: mpsc::UnboundedReceiver<Command>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut engine = self;
            while let Some(command) = rx.recv().await {
                engine.handle(command).await;
            }
        })
    }

    /// Apply one command to completion.
    pub async fn handle(&mut self, command: Command) {
        match command {
            Command::Client {
                connection,
                message,
            } => {
                if let Err(error) = self.handle_client(connection, message).await {
                    self.state.send_to(
                        connection,
                        &ServerMessage::Error {
                            message: error.to_string(),
                        },
                    );
                }
            }
            Command::Disconnected { connection } => self.handle_disconnect(connection),
            Command::RoundTimeout { code, generation } => {
                self.timers.remove(&code);
                let Some(room) = self.registry.get_mut(&code) else {
                    return;
                };
                if let Some(output) = room.handle_timeout(generation) {
                    info!(room = %code, "round timed out");
                    self.apply(&code, output);
                }
            }
            Command::BeginRound { code } => {
                if let Err(error) = self.begin_round(&code).await {
                    warn!(room = %code, %error, "deferred round start failed");
                }
            }
        }
    }

    async fn handle_client(
        &mut self,
        connection: ConnectionId,
        message: ClientMessage,
    ) -> Result<(), ServiceError> {
        match message {
            ClientMessage::CreateRoom { playlist } => {
                self.create_room(connection, &playlist).await
            }
            ClientMessage::JoinRoom { code, name } => self.join_room(connection, &code, &name),
            ClientMessage::StartGame => {
                let code = self.room_of(connection)?;
                let output = self.room_mut(&code)?.start_game(connection)?;
                self.apply(&code, output);
                // The first round starts right away; later rounds are
                // host-driven or scheduled.
                self.begin_round(&code).await
            }
            ClientMessage::SubmitGuess {
                track_id,
                artist,
                year,
            } => {
                let code = self.room_of(connection)?;
                let guess = Guess {
                    track_id,
                    artist,
                    year,
                };
                let output = self.room_mut(&code)?.submit_guess(connection, guess)?;
                self.apply(&code, output);
                Ok(())
            }
            ClientMessage::UseSkip => {
                let code = self.room_of(connection)?;
                let output = self.room_mut(&code)?.use_skip(connection)?;
                self.apply(&code, output);
                Ok(())
            }
            ClientMessage::SkipSong => {
                let code = self.room_of(connection)?;
                let output = self.room_mut(&code)?.host_skip(connection)?;
                self.apply(&code, output);
                Ok(())
            }
            ClientMessage::EndRound => {
                let code = self.room_of(connection)?;
                let output = self.room_mut(&code)?.end_round_now(connection)?;
                self.apply(&code, output);
                Ok(())
            }
            ClientMessage::NextRound => {
                let code = self.room_of(connection)?;
                self.room_mut(&code)?.authorize_host(connection)?;
                self.begin_round(&code).await
            }
            ClientMessage::HostRemovePlayer { name } => {
                let code = self.room_of(connection)?;
                let output = self.room_mut(&code)?.remove_player(connection, &name)?;
                self.apply(&code, output);
                Ok(())
            }
            ClientMessage::HostAdjustStars { name, delta } => {
                let code = self.room_of(connection)?;
                let output = self.room_mut(&code)?.adjust_stars(connection, &name, delta)?;
                self.apply(&code, output);
                Ok(())
            }
            ClientMessage::Unknown => {
                warn!(connection_id = %connection, "ignoring unknown message type");
                Ok(())
            }
        }
    }

    async fn create_room(
        &mut self,
        connection: ConnectionId,
        playlist: &str,
    ) -> Result<(), ServiceError> {
        if playlist.trim().is_empty() {
            return Err(ServiceError::Validation(
                "playlist reference must not be blank".into(),
            ));
        }
        if self.memberships.contains_key(&connection) {
            return Err(ServiceError::InvalidState("already in a room".into()));
        }

        let tracks = self.catalog.list_tracks(playlist).await?;
        let code = self.registry.allocate_code()?;
        let room = Room::new(code.clone(), connection, tracks, self.rules.clone());
        let track_count = room.track_count();
        info!(room = %code, track_count, "room created");

        self.registry.insert(room);
        self.memberships.insert(connection, code.clone());
        self.state.set_room_count(self.registry.len());
        self.state.send_to(
            connection,
            &ServerMessage::RoomCreated { code, track_count },
        );
        Ok(())
    }

    fn join_room(
        &mut self,
        connection: ConnectionId,
        code: &str,
        name: &str,
    ) -> Result<(), ServiceError> {
        validate_room_code(code)?;
        validate_player_name(name)?;

        // One seat per connection: a seated connection must close (or be
        // superseded) before it can join anywhere, or its old seat would
        // stay "connected" forever with nobody behind it.
        if self.memberships.contains_key(&connection) {
            return Err(ServiceError::InvalidState("already in a room".into()));
        }

        let canonical = code.to_ascii_uppercase();
        let room = self
            .registry
            .get_mut(&canonical)
            .ok_or_else(|| ServiceError::NotFound(format!("room {canonical} not found")))?;
        let output = room.join(connection, name)?;

        self.memberships.insert(connection, canonical.clone());
        self.apply(&canonical, output);
        Ok(())
    }

    /// Select the next track and open the round once its preview resolved.
    ///
    /// The preview fetch is awaited inside this one command, so no other
    /// operation can interleave with a partially opened round.
    async fn begin_round(&mut self, code: &str) -> Result<(), ServiceError> {
        let setup = self.room_mut(code)?.begin_round()?;
        match setup {
            RoundSetup::Selected { track_id } => {
                let preview = match self.catalog.resolve_preview(&track_id).await {
                    Ok(preview) => preview,
                    Err(error) => {
                        warn!(room = %code, track_id = %track_id, %error, "preview fetch failed; round plays without audio");
                        None
                    }
                };
                let output = self.room_mut(code)?.open_round(preview);
                self.apply(code, output);
                Ok(())
            }
            RoundSetup::Finished(output) | RoundSetup::Paused(output) => {
                self.apply(code, output);
                Ok(())
            }
        }
    }

    fn handle_disconnect(&mut self, connection: ConnectionId) {
        let Some(code) = self.memberships.remove(&connection) else {
            return;
        };
        let Some(room) = self.registry.get_mut(&code) else {
            return;
        };
        match room.disconnect(connection) {
            DisconnectOutcome::HostLeft(output) => {
                info!(room = %code, "host disconnected; tearing the room down");
                self.apply(&code, output);
            }
            DisconnectOutcome::PlayerDropped(output) => self.apply(&code, output),
            DisconnectOutcome::NotAMember => {}
        }
    }

    /// Deliver an operation's events and run its directives.
    fn apply(&mut self, code: &str, output: Output) {
        let (host, recipients) = match self.registry.get_mut(code) {
            Some(room) => (Some(room.host()), room.recipients()),
            None => (None, Vec::new()),
        };

        for outbound in output.events {
            match outbound.audience {
                Audience::Room => {
                    for connection in &recipients {
                        self.state.send_to(*connection, &outbound.message);
                    }
                }
                Audience::Host => {
                    if let Some(host) = host {
                        self.state.send_to(host, &outbound.message);
                    }
                }
                Audience::Connection(connection) => {
                    self.state.send_to(connection, &outbound.message);
                    if matches!(outbound.message, ServerMessage::ConnectionSuperseded) {
                        // The seat moved to a newer connection; the old one no
                        // longer belongs to the room.
                        self.memberships.remove(&connection);
                    }
                }
            }
        }

        for directive in output.directives {
            match directive {
                Directive::ArmTimer {
                    generation,
                    duration,
                } => self.arm_timer(code, generation, duration),
                Directive::DisarmTimer => {
                    if let Some(handle) = self.timers.remove(code) {
                        handle.abort();
                    }
                }
                Directive::ScheduleRound { delay } => {
                    let tx = self.tx.clone();
                    let code = code.to_string();
                    tokio::spawn(async move {
                        sleep(delay).await;
                        let _ = tx.send(Command::BeginRound { code });
                    });
                }
                Directive::Destroy => self.destroy_room(code),
            }
        }
    }

    fn arm_timer(&mut self, code: &str, generation: u64, duration: Duration) {
        if let Some(previous) = self.timers.remove(code) {
            previous.abort();
        }
        let tx = self.tx.clone();
        let owner = code.to_string();
        let handle = tokio::spawn(async move {
            sleep(duration).await;
            let _ = tx.send(Command::RoundTimeout {
                code: owner,
                generation,
            });
        });
        self.timers.insert(code.to_string(), handle);
    }

    fn destroy_room(&mut self, code: &str) {
        if let Some(timer) = self.timers.remove(code) {
            timer.abort();
        }
        self.registry.remove(code);
        self.memberships.retain(|_, room_code| room_code != code);
        self.state.set_room_count(self.registry.len());
        info!(room = %code, "room destroyed");
    }

    fn room_of(&self, connection: ConnectionId) -> Result<String, ServiceError> {
        self.memberships
            .get(&connection)
            .cloned()
            .ok_or_else(|| ServiceError::InvalidState("not in a room".into()))
    }

    fn room_mut(&mut self, code: &str) -> Result<&mut Room, ServiceError> {
        self.registry
            .get_mut(code)
            .ok_or_else(|| ServiceError::NotFound(format!("room {code} not found")))
    }
}
