//! radio.rs — BLE advertisement RSSI model
//!
//! Produces the scan batches a phone would report while standing at a given
//! position:
//! 1. Collect every beacon on the user's floor (positions via the map's codec)
//! 2. Log-distance path loss: `rssi = tx_power − 10·n·log10(d)`
//! 3. Gaussian shadowing noise, scaled by the active scenario
//! 4. Drop advertisements at random and anything beyond radio range
//!
//! Other floors are not heard at all; slabs attenuate far below any threshold.

use chrono::{DateTime, Utc};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use wayfinder_navigator::beacon::CoordinateCodec;
use wayfinder_navigator::geo;
use wayfinder_navigator::NavigationGraph;
use wayfinder_types::{BeaconKey, Coordinate, SignalRecord};

// ── Radio configuration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RadioConfig {
    pub tx_power_dbm:       f64,
    pub path_loss_exponent: f64,
    pub sigma_db:           f64,
    pub max_range_m:        f64,
    pub samples_per_scan:   u32,
    pub drop_rate:          f64,
}

impl RadioConfig {
    /// Noise-free RSSI at `distance_m`. Distances under half a meter are clamped.
    pub fn expected_rssi(&self, distance_m: f64) -> f64 {
        self.tx_power_dbm - 10.0 * self.path_loss_exponent * distance_m.max(0.5).log10()
    }
}

// ── Beacon sites ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct BeaconSite {
    pub key:        BeaconKey,
    pub floor:      i32,
    pub coordinate: Coordinate,
}

/// Every beacon of the map with the position it advertises from.
pub fn beacon_sites(graph: &NavigationGraph, codec: &dyn CoordinateCodec) -> Vec<BeaconSite> {
    graph
        .regions()
        .flat_map(|region| region.waypoints.values())
        .flat_map(|waypoint| {
            waypoint.beacons.iter().map(move |beacon| BeaconSite {
                key: beacon.key(),
                floor: waypoint.floor,
                // LBeacons carry their own position; fall back to the waypoint's
                coordinate: beacon.coordinate(codec).unwrap_or(waypoint.coordinate),
            })
        })
        .collect()
}

// ── Scan generation ───────────────────────────────────────────────────────────

pub struct ScanInput<'a> {
    pub floor:            i32,
    pub position:         Coordinate,
    pub noise_multiplier: f64,
    pub drop_multiplier:  f64,
    pub received_at:      DateTime<Utc>,
    pub sites:            &'a [BeaconSite],
}

pub fn generate_scan<R: Rng>(rng: &mut R, cfg: &RadioConfig, input: &ScanInput<'_>) -> Vec<SignalRecord> {
    let noise = Normal::new(0.0, (cfg.sigma_db * input.noise_multiplier).max(0.0)).ok();
    let drop_rate = (cfg.drop_rate * input.drop_multiplier).clamp(0.0, 1.0);
    let mut batch = Vec::new();

    for site in input.sites.iter().filter(|s| s.floor == input.floor) {
        let d = geo::distance(&input.position, &site.coordinate);
        if d > cfg.max_range_m {
            continue;
        }
        let mean = cfg.expected_rssi(d);
        for _ in 0..cfg.samples_per_scan {
            if rng.gen::<f64>() < drop_rate {
                continue;
            }
            let shadowing = match noise {
                Some(n) => n.sample(rng),
                None => 0.0,
            };
            batch.push(SignalRecord {
                beacon: site.key,
                rssi: (mean + shadowing).round() as i32,
                received_at: input.received_at,
            });
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn radio() -> RadioConfig {
        RadioConfig {
            tx_power_dbm: -52.0,
            path_loss_exponent: 2.2,
            sigma_db: 0.0,
            max_range_m: 25.0,
            samples_per_scan: 3,
            drop_rate: 0.0,
        }
    }

    fn site(floor: i32, lat: f64) -> BeaconSite {
        BeaconSite { key: BeaconKey::lbeacon(Uuid::new_v4()), floor, coordinate: Coordinate::new(lat, 121.0) }
    }

    #[test]
    fn rssi_falls_off_with_distance() {
        let cfg = radio();
        assert_eq!(cfg.expected_rssi(1.0), -52.0);
        assert!(cfg.expected_rssi(2.0) > cfg.expected_rssi(8.0));
        // clamped below half a meter
        assert_eq!(cfg.expected_rssi(0.0), cfg.expected_rssi(0.5));
    }

    #[test]
    fn only_same_floor_beacons_in_range_are_heard() {
        let cfg = radio();
        let near = site(1, 25.0);
        let upstairs = site(2, 25.0);
        let far = site(1, 25.01); // ~1.1 km north
        let sites = [near, upstairs, far];
        let input = ScanInput {
            floor: 1,
            position: Coordinate::new(25.0, 121.0),
            noise_multiplier: 1.0,
            drop_multiplier: 1.0,
            received_at: Utc::now(),
            sites: &sites,
        };
        let batch = generate_scan(&mut StdRng::seed_from_u64(7), &cfg, &input);
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|r| r.beacon == near.key));
    }

    #[test]
    fn full_drop_rate_silences_everything() {
        let cfg = RadioConfig { drop_rate: 1.0, ..radio() };
        let sites = [site(1, 25.0)];
        let input = ScanInput {
            floor: 1,
            position: Coordinate::new(25.0, 121.0),
            noise_multiplier: 1.0,
            drop_multiplier: 1.0,
            received_at: Utc::now(),
            sites: &sites,
        };
        assert!(generate_scan(&mut StdRng::seed_from_u64(1), &cfg, &input).is_empty());
    }
}
