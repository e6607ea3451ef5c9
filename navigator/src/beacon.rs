//! # beacon
//!
//! Beacon variants attached to waypoints.
//!
//! - **LBeacon**: position is packed into the advertised UUID itself
//! - **IBeacon**: position is carried by the map, identity is UUID + major/minor
//!
//! The UUID packing lives behind [`CoordinateCodec`] so a deployment with a
//! different encoding swaps the codec without touching planning code.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wayfinder_types::{BeaconKey, Coordinate};

// ── Beacon model ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BeaconKind {
    LBeacon,
    IBeacon { coordinate: Coordinate },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beacon {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<u16>,
    /// Averaged RSSI (dBm) at or above which the beacon counts as present
    pub threshold: i32,
    pub kind: BeaconKind,
}

impl Beacon {
    pub fn lbeacon(id: Uuid, threshold: i32) -> Self {
        Self { id, major: None, minor: None, threshold, kind: BeaconKind::LBeacon }
    }

    pub fn ibeacon(id: Uuid, major: u16, minor: u16, threshold: i32, coordinate: Coordinate) -> Self {
        Self {
            id,
            major: Some(major),
            minor: Some(minor),
            threshold,
            kind: BeaconKind::IBeacon { coordinate },
        }
    }

    /// Identity as reported by a scanner.
    pub fn key(&self) -> BeaconKey {
        match self.kind {
            BeaconKind::LBeacon => BeaconKey::lbeacon(self.id),
            BeaconKind::IBeacon { .. } => BeaconKey {
                uuid: self.id,
                major: self.major,
                minor: self.minor,
            },
        }
    }

    pub fn coordinate(&self, codec: &dyn CoordinateCodec) -> Option<Coordinate> {
        match &self.kind {
            BeaconKind::LBeacon => codec.decode(&self.id).map(|p| p.coordinate),
            BeaconKind::IBeacon { coordinate } => Some(*coordinate),
        }
    }
}

// ── UUID coordinate codec ─────────────────────────────────────────────────────

/// Position recovered from an LBeacon identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LBeaconPosition {
    pub floor: i32,
    pub coordinate: Coordinate,
}

pub trait CoordinateCodec: Send + Sync {
    fn decode(&self, id: &Uuid) -> Option<LBeaconPosition>;
    fn encode(&self, position: LBeaconPosition, serial: u32) -> Uuid;
}

/// Default packing: the 32 hex digits of the UUID are four 8-digit segments,
/// `floor | latitude | longitude | serial`, the first three being big-endian
/// IEEE-754 `f32` bit patterns.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackedFloatCodec;

impl PackedFloatCodec {
    fn segment(hex: &str, index: usize) -> Option<f32> {
        let digits = hex.get(index * 8..index * 8 + 8)?;
        u32::from_str_radix(digits, 16).ok().map(f32::from_bits)
    }
}

impl CoordinateCodec for PackedFloatCodec {
    fn decode(&self, id: &Uuid) -> Option<LBeaconPosition> {
        let hex = id.simple().to_string();
        let floor = Self::segment(&hex, 0)?;
        let lat = Self::segment(&hex, 1)?;
        let lon = Self::segment(&hex, 2)?;
        if !floor.is_finite() || !lat.is_finite() || !lon.is_finite() {
            return None;
        }
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return None;
        }
        Some(LBeaconPosition {
            floor: floor.round() as i32,
            coordinate: Coordinate::new(lat as f64, lon as f64),
        })
    }

    fn encode(&self, position: LBeaconPosition, serial: u32) -> Uuid {
        let hex = format!(
            "{:08x}{:08x}{:08x}{:08x}",
            (position.floor as f32).to_bits(),
            (position.coordinate.lat as f32).to_bits(),
            (position.coordinate.lon as f32).to_bits(),
            serial,
        );
        Uuid::parse_str(&hex).unwrap_or_else(|_| Uuid::nil())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_codec_recovers_floor_and_position() {
        let codec = PackedFloatCodec;
        let pos = LBeaconPosition { floor: 3, coordinate: Coordinate::new(25.04185, 121.61479) };
        let id = codec.encode(pos, 7);
        let back = codec.decode(&id).unwrap();
        assert_eq!(back.floor, 3);
        // f32 keeps roughly 1e-5 degrees at this magnitude
        assert!((back.coordinate.lat - 25.04185).abs() < 1e-5);
        assert!((back.coordinate.lon - 121.61479).abs() < 1e-5);
    }

    #[test]
    fn random_uuid_is_usually_rejected() {
        // all-ones latitude segment is a NaN bit pattern
        let id = Uuid::parse_str("00000000ffffffff0000000000000000").unwrap();
        assert!(PackedFloatCodec.decode(&id).is_none());
    }

    #[test]
    fn ibeacon_key_includes_major_minor() {
        let id = Uuid::new_v4();
        let beacon = Beacon::ibeacon(id, 10, 20, -70, Coordinate::new(1.0, 2.0));
        assert_eq!(beacon.key(), BeaconKey::ibeacon(id, 10, 20));
        assert_eq!(beacon.coordinate(&PackedFloatCodec), Some(Coordinate::new(1.0, 2.0)));
    }

    #[test]
    fn lbeacon_key_ignores_major_minor() {
        let id = Uuid::new_v4();
        let mut beacon = Beacon::lbeacon(id, -60);
        beacon.major = Some(1);
        assert_eq!(beacon.key(), BeaconKey::lbeacon(id));
    }
}
