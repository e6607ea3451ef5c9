//! # config
//!
//! Tunables for signal resolution, polling and route planning.
//!
//! Defaults come from `WAYFINDER_*` environment variables so a deployment can
//! retune beacon behaviour without a rebuild. The simulator also deserializes
//! this struct from the `[navigator]` table of its `config.toml`.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;

use wayfinder_types::ConnectionType;

fn env_or<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(fallback)
}

// ── Navigator configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NavigatorConfig {
    /// Signals older than this are evicted before each resolution pass (default 1000)
    pub signal_window_ms: u64,
    /// Interval of the detection polling task (default 1000 = 1 Hz)
    pub poll_interval_ms: u64,
    /// Extra distance added to edges whose connection type is avoided (default 100)
    pub avoid_penalty: f64,
    /// Minimum separation for a neighbour to count as a distinguishable wrong turn (default 2 m)
    pub discrimination_distance_m: f64,
    /// How far past an indistinguishable neighbour the wrong-way search reaches (default 1)
    pub wrong_way_extra_hops: usize,
    /// Fraction trimmed from each tail of an RSSI series on the iBeacon path
    pub trimmed_mean_tail: f64,
    /// Below this many samples a plain mean is used instead
    pub trimmed_mean_min_samples: usize,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            signal_window_ms: env_or("WAYFINDER_SIGNAL_WINDOW_MS", 1000),
            poll_interval_ms: env_or("WAYFINDER_POLL_INTERVAL_MS", 1000),
            avoid_penalty: env_or("WAYFINDER_AVOID_PENALTY", 100.0),
            discrimination_distance_m: env_or("WAYFINDER_DISCRIMINATION_M", 2.0),
            wrong_way_extra_hops: env_or("WAYFINDER_WRONG_WAY_HOPS", 1),
            trimmed_mean_tail: 0.10,
            trimmed_mean_min_samples: 10,
        }
    }
}

impl NavigatorConfig {
    pub fn signal_window(&self) -> TimeDelta {
        let ms = i64::try_from(self.signal_window_ms).unwrap_or(i64::MAX);
        TimeDelta::try_milliseconds(ms).unwrap_or(TimeDelta::MAX)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// ── User preferences ──────────────────────────────────────────────────────────

/// Connection types the user would rather not take. Read from the preference store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AvoidPreferences {
    pub avoid_stairs: bool,
    pub avoid_elevator: bool,
    pub avoid_escalator: bool,
}

impl AvoidPreferences {
    pub fn to_avoid_set(self) -> BTreeSet<ConnectionType> {
        let mut set = BTreeSet::new();
        if self.avoid_stairs {
            set.insert(ConnectionType::Stair);
        }
        if self.avoid_elevator {
            set.insert(ConnectionType::Elevator);
        }
        if self.avoid_escalator {
            set.insert(ConnectionType::Escalator);
        }
        set
    }
}
