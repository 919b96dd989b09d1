//! Validation helpers for inbound actions.

use validator::ValidationError;

/// Alphabet used for room codes; `I` and `O` are excluded as visually
/// ambiguous.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
/// Length of a room code.
pub const CODE_LENGTH: usize = 4;

const MAX_NAME_LENGTH: usize = 24;

/// Validates that a room code is four characters from [`CODE_ALPHABET`]
/// (case-insensitive).
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != CODE_LENGTH {
        let mut err = ValidationError::new("room_code_length");
        err.message =
            Some(format!("Room code must be exactly {CODE_LENGTH} characters (got {})", code.len()).into());
        return Err(err);
    }

    if !code
        .bytes()
        .all(|b| CODE_ALPHABET.contains(&b.to_ascii_uppercase()))
    {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code contains characters outside the code alphabet".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a player name: non-blank and at most 24 characters once trimmed.
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("player_name_empty");
        err.message = Some("Player name must not be blank".into());
        return Err(err);
    }

    if trimmed.chars().count() > MAX_NAME_LENGTH {
        let mut err = ValidationError::new("player_name_length");
        err.message =
            Some(format!("Player name must be at most {MAX_NAME_LENGTH} characters").into());
        return Err(err);
    }

    Ok(())
}
