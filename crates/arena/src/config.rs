//! Arena configuration from environment variables

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ArenaError;
use crate::scheduler::SchedulerSettings;
use crate::stockfish::UciTimeouts;

#[derive(Clone, Debug)]
pub struct ArenaConfig {
    /// Postgres URL; the in-memory store is used when unset
    pub database_url: Option<String>,

    /// Path to the external UCI engine binary
    pub stockfish_path: String,

    /// Per-move budget for newly created mover configs
    pub default_movetime_ms: u32,

    /// Ply cap after which a game is drawn
    pub max_plies: u32,

    pub preview_ms: u32,
    pub move_interval_ms: u32,

    /// Driver cadence
    pub tick_interval_ms: u64,

    /// Age after which a held tick lock is reclaimed
    pub lock_stale_secs: i64,

    pub uci_ready_timeout_ms: u64,
    pub uci_handshake_timeout_ms: u64,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            stockfish_path: "stockfish".to_string(),
            default_movetime_ms: 150,
            max_plies: 600,
            preview_ms: 350,
            move_interval_ms: 500,
            tick_interval_ms: 100,
            lock_stale_secs: 60,
            uci_ready_timeout_ms: 2000,
            uci_handshake_timeout_ms: 2500,
        }
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ArenaConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ArenaError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ArenaError> {
        let defaults = Self::default();

        let config = Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()),
            stockfish_path: lookup("STOCKFISH_PATH").unwrap_or(defaults.stockfish_path),
            default_movetime_ms: parse_or(
                &lookup,
                "ARENA_DEFAULT_MOVETIME_MS",
                defaults.default_movetime_ms,
            ),
            max_plies: parse_or(&lookup, "ARENA_MAX_PLIES", defaults.max_plies),
            preview_ms: parse_or(&lookup, "ARENA_PREVIEW_MS", defaults.preview_ms),
            move_interval_ms: parse_or(&lookup, "ARENA_MOVE_INTERVAL_MS", defaults.move_interval_ms),
            tick_interval_ms: parse_or(&lookup, "ARENA_TICK_INTERVAL_MS", defaults.tick_interval_ms),
            lock_stale_secs: parse_or(&lookup, "ARENA_LOCK_STALE_SECS", defaults.lock_stale_secs),
            uci_ready_timeout_ms: parse_or(
                &lookup,
                "ARENA_UCI_READY_TIMEOUT_MS",
                defaults.uci_ready_timeout_ms,
            ),
            uci_handshake_timeout_ms: parse_or(
                &lookup,
                "ARENA_UCI_HANDSHAKE_TIMEOUT_MS",
                defaults.uci_handshake_timeout_ms,
            ),
        };

        if config.max_plies == 0 {
            return Err(ArenaError::Config("ARENA_MAX_PLIES must be positive"));
        }
        if config.tick_interval_ms == 0 {
            return Err(ArenaError::Config("ARENA_TICK_INTERVAL_MS must be positive"));
        }
        if config.lock_stale_secs <= 0 {
            return Err(ArenaError::Config("ARENA_LOCK_STALE_SECS must be positive"));
        }

        Ok(config)
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            max_plies: self.max_plies,
            lock_stale: chrono::Duration::seconds(self.lock_stale_secs),
            default_movetime_ms: self.default_movetime_ms,
        }
    }

    pub fn uci_timeouts(&self) -> UciTimeouts {
        UciTimeouts {
            handshake: Duration::from_millis(self.uci_handshake_timeout_ms),
            ready: Duration::from_millis(self.uci_ready_timeout_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ArenaConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.stockfish_path, "stockfish");
        assert_eq!(config.max_plies, 600);
        assert_eq!(config.preview_ms, 350);
        assert_eq!(config.move_interval_ms, 500);
        assert_eq!(config.scheduler_settings().lock_stale, chrono::Duration::seconds(60));
        assert_eq!(config.uci_timeouts().handshake, Duration::from_millis(2500));
    }

    #[test]
    fn test_overrides_and_bad_values() {
        let config = ArenaConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/arena"),
            ("ARENA_MAX_PLIES", "80"),
            ("ARENA_PREVIEW_MS", "not-a-number"),
        ]))
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/arena"));
        assert_eq!(config.max_plies, 80);
        assert_eq!(config.preview_ms, 350);
    }

    #[test]
    fn test_rejects_zero_max_plies() {
        let err = ArenaConfig::from_lookup(lookup(&[("ARENA_MAX_PLIES", "0")])).unwrap_err();
        assert!(matches!(err, ArenaError::Config(_)));
    }
}
