//! Game policy configuration: scoring, timing, and capacity rules.
//!
//! Every number the engine scores or schedules with lives here rather than in
//! constants, so deployments can tune the rule set without rebuilding.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON rule set.
const DEFAULT_CONFIG_PATH: &str = "config/rules.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TUNE_RUSH_CONFIG_PATH";

/// Immutable rule set shared by every room of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GameRules {
    /// Maximum number of player identities per room.
    pub room_capacity: usize,
    /// Score at which a player immediately wins the game.
    pub win_threshold: u32,
    /// Absolute year distance still considered "close".
    pub year_tolerance: u32,
    /// Points for an exact release-year guess (song and artist matching).
    pub exact_year_points: u32,
    /// Points for a within-tolerance year guess (song and artist matching).
    pub close_year_points: u32,
    /// Maximum duration of one round before it auto-resolves unanswered.
    pub round_duration_secs: u64,
    /// Pause between a skipped or cancelled round and the replacement round.
    pub next_round_delay_secs: u64,
    /// Skips granted to each player on first join; never replenished.
    pub starting_skips: u32,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            room_capacity: 10,
            win_threshold: 10,
            year_tolerance: 5,
            exact_year_points: 2,
            close_year_points: 1,
            round_duration_secs: 75,
            next_round_delay_secs: 3,
            starting_skips: 3,
        }
    }
}

impl GameRules {
    /// Load the rule set from disk, falling back to the built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Self>(&contents) {
                Ok(rules) => {
                    info!(path = %path.display(), "loaded game rules from config");
                    rules
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse game rules; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "rules file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read game rules; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Maximum round duration as a [`Duration`].
    pub fn round_duration(&self) -> Duration {
        Duration::from_secs(self.round_duration_secs)
    }

    /// Delay before a deferred round start as a [`Duration`].
    pub fn next_round_delay(&self) -> Duration {
        Duration::from_secs(self.next_round_delay_secs)
    }
}

/// Resolve the rules path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_tiered_scoring_variant() {
        let rules = GameRules::default();
        assert_eq!(rules.year_tolerance, 5);
        assert_eq!(rules.exact_year_points, 2);
        assert_eq!(rules.close_year_points, 1);
        assert_eq!(rules.win_threshold, 10);
        assert_eq!(rules.room_capacity, 10);
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_fields() {
        let rules: GameRules =
            serde_json::from_str(r#"{"year_tolerance": 3, "round_duration_secs": 60}"#)
                .expect("partial config should parse");
        assert_eq!(rules.year_tolerance, 3);
        assert_eq!(rules.round_duration_secs, 60);
        assert_eq!(rules.win_threshold, GameRules::default().win_threshold);
        assert_eq!(rules.starting_skips, GameRules::default().starting_skips);
    }

    #[test]
    fn durations_convert_to_std() {
        let rules = GameRules::default();
        assert_eq!(rules.round_duration(), Duration::from_secs(75));
        assert_eq!(rules.next_round_delay(), Duration::from_secs(3));
    }
}
