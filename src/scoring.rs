//! Scoring engine: turns a submitted guess and a round's ground truth into a
//! correctness verdict and a point award.
//!
//! The function is pure so the rule set can be exercised without any session
//! state. Points are awarded only when both the song and the artist match;
//! the release year then decides the tier.

use serde::Serialize;

use crate::{catalog::Track, config::GameRules};

/// A guess submitted by the current player for the active round.
#[derive(Debug, Clone)]
pub struct Guess {
    /// Track picked from the catalog choices, if the player selected one.
    pub track_id: Option<String>,
    /// Free-text artist guess.
    pub artist: String,
    /// Guessed release year.
    pub year: i32,
}

/// Correctness verdict and point award for one guess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuessVerdict {
    /// Guessed track identifier equals the round track's identifier.
    pub song_match: bool,
    /// Guessed artist text is contained (case-insensitively) in the true artist.
    pub artist_match: bool,
    /// Year delta is exactly zero.
    pub year_exact: bool,
    /// Year delta is within the configured tolerance.
    pub year_within_tolerance: bool,
    /// Signed difference between the guessed and true release year. Widened
    /// so arbitrary wire-supplied years can never overflow the subtraction.
    pub year_delta: i64,
    /// Points awarded under the configured tier table.
    pub points: u32,
}

/// Score `guess` against `track` under `rules`.
///
/// The artist comparison is substring containment so partial names and
/// featuring-artist fragments still count; an empty guess is trivially
/// contained and therefore matches.
pub fn score_guess(guess: &Guess, track: &Track, rules: &GameRules) -> GuessVerdict {
    let song_match = guess.track_id.as_deref() == Some(track.id.as_str());

    let guessed_artist = guess.artist.trim().to_lowercase();
    let artist_match = track.artist.to_lowercase().contains(&guessed_artist);

    let year_delta = i64::from(guess.year) - i64::from(track.release_year);
    let year_exact = year_delta == 0;
    let year_within_tolerance = year_delta.unsigned_abs() <= u64::from(rules.year_tolerance);

    let points = if song_match && artist_match {
        if year_exact {
            rules.exact_year_points
        } else if year_within_tolerance {
            rules.close_year_points
        } else {
            0
        }
    } else {
        0
    };

    GuessVerdict {
        song_match,
        artist_match,
        year_exact,
        year_within_tolerance,
        year_delta,
        points,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track() -> Track {
        Track {
            id: "t-1".into(),
            title: "A Day in the Life".into(),
            artist: "The Beatles".into(),
            release_year: 1967,
            preview: None,
        }
    }

    fn guess(track_id: Option<&str>, artist: &str, year: i32) -> Guess {
        Guess {
            track_id: track_id.map(Into::into),
            artist: artist.into(),
            year,
        }
    }

    #[test]
    fn fully_correct_guess_earns_exact_points() {
        let verdict = score_guess(
            &guess(Some("t-1"), "The Beatles", 1967),
            &track(),
            &GameRules::default(),
        );
        assert!(verdict.song_match);
        assert!(verdict.artist_match);
        assert!(verdict.year_exact);
        assert_eq!(verdict.year_delta, 0);
        assert_eq!(verdict.points, 2);
    }

    #[test]
    fn year_off_by_tolerance_earns_close_points() {
        let verdict = score_guess(
            &guess(Some("t-1"), "beatles", 1972),
            &track(),
            &GameRules::default(),
        );
        assert!(!verdict.year_exact);
        assert!(verdict.year_within_tolerance);
        assert_eq!(verdict.year_delta, 5);
        assert_eq!(verdict.points, 1);
    }

    #[test]
    fn year_off_by_more_than_tolerance_earns_nothing() {
        let verdict = score_guess(
            &guess(Some("t-1"), "The Beatles", 1961),
            &track(),
            &GameRules::default(),
        );
        assert!(!verdict.year_within_tolerance);
        assert_eq!(verdict.year_delta, -6);
        assert_eq!(verdict.points, 0);
    }

    #[test]
    fn artist_match_is_case_insensitive_substring() {
        let verdict = score_guess(
            &guess(Some("t-1"), "  bEaTlEs ", 1967),
            &track(),
            &GameRules::default(),
        );
        assert!(verdict.artist_match);
        assert_eq!(verdict.points, 2);
    }

    #[test]
    fn empty_artist_matches_trivially() {
        let verdict = score_guess(
            &guess(Some("t-1"), "   ", 1967),
            &track(),
            &GameRules::default(),
        );
        assert!(verdict.artist_match);
        assert_eq!(verdict.points, 2);
    }

    #[test]
    fn extreme_year_guesses_do_not_overflow() {
        let verdict = score_guess(
            &guess(Some("t-1"), "The Beatles", i32::MIN),
            &track(),
            &GameRules::default(),
        );
        assert!(!verdict.year_within_tolerance);
        assert_eq!(verdict.year_delta, i64::from(i32::MIN) - 1967);
        assert_eq!(verdict.points, 0);

        let verdict = score_guess(
            &guess(Some("t-1"), "The Beatles", i32::MAX),
            &track(),
            &GameRules::default(),
        );
        assert!(!verdict.year_within_tolerance);
        assert_eq!(verdict.points, 0);
    }

    #[test]
    fn wrong_song_earns_nothing_even_with_perfect_year() {
        let verdict = score_guess(
            &guess(Some("t-2"), "The Beatles", 1967),
            &track(),
            &GameRules::default(),
        );
        assert!(!verdict.song_match);
        assert!(verdict.year_exact);
        assert_eq!(verdict.points, 0);
    }

    #[test]
    fn missing_track_selection_is_not_a_song_match() {
        let verdict = score_guess(&guess(None, "The Beatles", 1967), &track(), &GameRules::default());
        assert!(!verdict.song_match);
        assert_eq!(verdict.points, 0);
    }

    #[test]
    fn scoring_is_deterministic() {
        let g = guess(Some("t-1"), "The Beatles", 1969);
        let rules = GameRules::default();
        assert_eq!(score_guess(&g, &track(), &rules), score_guess(&g, &track(), &rules));
    }

    #[test]
    fn tolerance_is_configurable() {
        let mut rules = GameRules::default();
        rules.year_tolerance = 3;
        let verdict = score_guess(&guess(Some("t-1"), "The Beatles", 1971), &track(), &rules);
        assert!(!verdict.year_within_tolerance);
        assert_eq!(verdict.points, 0);
    }
}
