//! Room registry: code allocation and case-insensitive lookup.
//!
//! Owned exclusively by the engine task, so a plain `HashMap` is enough; no
//! lock is ever taken outside that task.

use std::collections::HashMap;

use rand::Rng;

use crate::{
    dto::validation::{CODE_ALPHABET, CODE_LENGTH},
    error::ServiceError,
    state::room::Room,
};

/// Attempts at a unique code before giving up. 24^4 codes make collisions
/// rare at any realistic room count.
const MAX_CODE_ATTEMPTS: usize = 64;

/// All live rooms, keyed by upper-cased room code.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
}

impl RoomRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a room code not currently in use.
    pub fn allocate_code(&self) -> Result<String, ServiceError> {
        let mut rng = rand::rng();
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code: String = (0..CODE_LENGTH)
                .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            if !self.rooms.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(ServiceError::CodeSpaceExhausted)
    }

    /// Register a room under its code.
    pub fn insert(&mut self, room: Room) {
        self.rooms.insert(room.code().to_string(), room);
    }

    /// Look up a room, accepting the code in any case.
    pub fn get_mut(&mut self, code: &str) -> Option<&mut Room> {
        self.rooms.get_mut(&code.to_ascii_uppercase())
    }

    /// Drop a room.
    pub fn remove(&mut self, code: &str) -> Option<Room> {
        self.rooms.remove(&code.to_ascii_uppercase())
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no room is live.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
