//! # aggregator
//!
//! Sliding-window buffer of beacon observations and the resolver that turns it
//! into a single de-noised "closest beacon" estimate.
//!
//! ## Threads
//! The platform scan callback calls [`SignalAggregator::add_signals`] at any
//! time; the polling task calls [`SignalAggregator::resolve`] once per tick.
//! Both go through the same mutex.
//!
//! ## Resolution
//! 1. Evict records older than the staleness window (a record exactly at the
//!    window boundary is kept)
//! 2. Group the rest by beacon, keeping only monitored beacons
//! 3. Average RSSI per group (plain or trimmed mean)
//! 4. Drop beacons whose average is below their threshold
//! 5. Pick the largest margin above threshold; ties go to the stronger average,
//!    then to the lower beacon key so the result never depends on scan order

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

use wayfinder_types::{BeaconKey, RegionWaypointPoint, SignalRecord};

// ── Clock ─────────────────────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Resolution inputs / outputs ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RssiAveraging {
    Mean,
    /// Discard `tail` of the samples on each side once `min_samples` are buffered
    TrimmedMean { tail: f64, min_samples: usize },
}

impl RssiAveraging {
    pub fn average(&self, samples: &mut [i32]) -> Option<f64> {
        if samples.is_empty() {
            return None;
        }
        let kept: &[i32] = match *self {
            RssiAveraging::TrimmedMean { tail, min_samples } if samples.len() >= min_samples => {
                samples.sort_unstable();
                let cut = ((samples.len() as f64) * tail.clamp(0.0, 0.49)).floor() as usize;
                &samples[cut..samples.len() - cut]
            }
            _ => samples,
        };
        let sum: i64 = kept.iter().map(|&v| v as i64).sum();
        Some(sum as f64 / kept.len() as f64)
    }
}

/// A beacon the active client is listening for, and the waypoint it stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredBeacon {
    pub key: BeaconKey,
    pub threshold: i32,
    pub point: RegionWaypointPoint,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedBeacon {
    pub key: BeaconKey,
    pub point: RegionWaypointPoint,
    pub average_rssi: f64,
    /// `average_rssi - threshold`
    pub margin: f64,
    pub samples: usize,
}

// ── Aggregator ────────────────────────────────────────────────────────────────

pub struct SignalAggregator {
    buffer: Mutex<Vec<SignalRecord>>,
    window: TimeDelta,
    clock: Arc<dyn Clock>,
}

impl SignalAggregator {
    pub fn new(window: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            window,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SignalRecord>> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a scan batch. Safe to call from the platform scan thread.
    pub fn add_signals<I>(&self, batch: I)
    where
        I: IntoIterator<Item = SignalRecord>,
    {
        self.lock().extend(batch);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Evict stale records and return the strongest monitored beacon, if any clears its threshold.
    pub fn resolve(
        &self,
        monitored: &HashMap<BeaconKey, MonitoredBeacon>,
        averaging: RssiAveraging,
    ) -> Option<ResolvedBeacon> {
        let now = self.clock.now();
        let mut groups: BTreeMap<BeaconKey, (MonitoredBeacon, Vec<i32>)> = BTreeMap::new();

        {
            let mut buffer = self.lock();
            let before = buffer.len();
            buffer.retain(|r| now.signed_duration_since(r.received_at) <= self.window);
            if buffer.len() != before {
                debug!("Aggregator: evicted {} stale signals", before - buffer.len());
            }

            for record in buffer.iter() {
                let entry = monitored
                    .get(&record.beacon)
                    .or_else(|| monitored.get(&BeaconKey::lbeacon(record.beacon.uuid)));
                if let Some(m) = entry {
                    groups.entry(m.key).or_insert_with(|| (*m, Vec::new())).1.push(record.rssi);
                }
            }
        }

        groups
            .into_iter()
            .filter_map(|(key, (m, mut samples))| {
                let samples_len = samples.len();
                let average_rssi = averaging.average(&mut samples)?;
                let margin = average_rssi - m.threshold as f64;
                (margin >= 0.0).then_some(ResolvedBeacon {
                    key,
                    point: m.point,
                    average_rssi,
                    margin,
                    samples: samples_len,
                })
            })
            .max_by(|a, b| {
                a.margin
                    .partial_cmp(&b.margin)
                    .unwrap_or(Ordering::Equal)
                    .then(a.average_rssi.partial_cmp(&b.average_rssi).unwrap_or(Ordering::Equal))
                    .then(b.key.cmp(&a.key))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (Arc<FixedClock>, SignalAggregator) {
        let clock = Arc::new(FixedClock::new(t0()));
        let agg = SignalAggregator::new(TimeDelta::milliseconds(1000), clock.clone());
        (clock, agg)
    }

    fn monitor(beacons: &[(BeaconKey, i32)]) -> HashMap<BeaconKey, MonitoredBeacon> {
        beacons
            .iter()
            .map(|&(key, threshold)| {
                let point = RegionWaypointPoint::new(Uuid::nil(), key.uuid);
                (key, MonitoredBeacon { key, threshold, point })
            })
            .collect()
    }

    fn rec(key: BeaconKey, rssi: i32, at: DateTime<Utc>) -> SignalRecord {
        SignalRecord { beacon: key, rssi, received_at: at }
    }

    #[test]
    fn stale_signals_are_evicted() {
        let (clock, agg) = setup();
        let key = BeaconKey::lbeacon(Uuid::new_v4());
        agg.add_signals([rec(key, -50, t0())]);
        clock.advance(TimeDelta::milliseconds(1001));

        assert!(agg.resolve(&monitor(&[(key, -80)]), RssiAveraging::Mean).is_none());
        assert!(agg.is_empty());
    }

    #[test]
    fn signal_exactly_at_window_boundary_is_kept() {
        let (clock, agg) = setup();
        let key = BeaconKey::lbeacon(Uuid::new_v4());
        agg.add_signals([rec(key, -50, t0())]);
        clock.advance(TimeDelta::milliseconds(1000));

        let hit = agg.resolve(&monitor(&[(key, -80)]), RssiAveraging::Mean).unwrap();
        assert_eq!(hit.key, key);
    }

    #[test]
    fn below_threshold_never_resolves_even_when_alone() {
        let (_clock, agg) = setup();
        let key = BeaconKey::lbeacon(Uuid::new_v4());
        agg.add_signals([rec(key, -75, t0()), rec(key, -71, t0())]);

        // average -73 < threshold -70
        assert!(agg.resolve(&monitor(&[(key, -70)]), RssiAveraging::Mean).is_none());
    }

    #[test]
    fn largest_margin_wins_regardless_of_order() {
        let (_clock, agg) = setup();
        let near = BeaconKey::lbeacon(Uuid::new_v4());
        let far = BeaconKey::lbeacon(Uuid::new_v4());
        agg.add_signals([rec(far, -60, t0()), rec(near, -55, t0()), rec(far, -60, t0())]);

        let table = monitor(&[(near, -70), (far, -70)]);
        let hit = agg.resolve(&table, RssiAveraging::Mean).unwrap();
        assert_eq!(hit.key, near);
        assert!((hit.margin - 15.0).abs() < 1e-9);
    }

    #[test]
    fn margin_beats_raw_strength() {
        let (_clock, agg) = setup();
        let loud = BeaconKey::lbeacon(Uuid::new_v4());
        let quiet = BeaconKey::lbeacon(Uuid::new_v4());
        agg.add_signals([rec(loud, -50, t0()), rec(quiet, -65, t0())]);

        // loud misses its -48 threshold, quiet clears -75 by 10
        let table = monitor(&[(loud, -48), (quiet, -75)]);
        assert_eq!(agg.resolve(&table, RssiAveraging::Mean).unwrap().key, quiet);
    }

    #[test]
    fn unmonitored_beacons_are_ignored() {
        let (_clock, agg) = setup();
        let known = BeaconKey::lbeacon(Uuid::new_v4());
        let stranger = BeaconKey::lbeacon(Uuid::new_v4());
        agg.add_signals([rec(stranger, -30, t0()), rec(known, -60, t0())]);

        let hit = agg.resolve(&monitor(&[(known, -70)]), RssiAveraging::Mean).unwrap();
        assert_eq!(hit.key, known);
    }

    #[test]
    fn lbeacon_matches_scans_carrying_major_minor() {
        let (_clock, agg) = setup();
        let uuid = Uuid::new_v4();
        agg.add_signals([rec(BeaconKey::ibeacon(uuid, 1, 1), -60, t0())]);

        let hit = agg
            .resolve(&monitor(&[(BeaconKey::lbeacon(uuid), -70)]), RssiAveraging::Mean)
            .unwrap();
        assert_eq!(hit.key, BeaconKey::lbeacon(uuid));
    }

    #[test]
    fn trimmed_mean_drops_outliers() {
        let avg = RssiAveraging::TrimmedMean { tail: 0.10, min_samples: 10 };
        let mut samples = vec![-60, -60, -60, -60, -60, -60, -60, -60, -10, -120];
        assert_eq!(avg.average(&mut samples), Some(-60.0));
    }

    #[test]
    fn trimmed_mean_falls_back_to_plain_mean_for_few_samples() {
        let avg = RssiAveraging::TrimmedMean { tail: 0.10, min_samples: 10 };
        let mut samples = vec![-60, -70, -80];
        assert_eq!(avg.average(&mut samples), Some(-70.0));
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let (_clock, agg) = setup();
        let agg = Arc::new(agg);
        let key = BeaconKey::lbeacon(Uuid::new_v4());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let agg = agg.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        agg.add_signals([rec(key, -60, t0())]);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(agg.len(), 400);
    }
}
