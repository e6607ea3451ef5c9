//! # wayfinder-types
//!
//! Shared navigation data types for the Wayfinder beacon navigator.
//!
//! These types are used by:
//! - `navigator`: the graph model, route planner and navigation session
//! - `packages/beacon-simulator`: producing scan batches and relaying events
//! - UI collaborators: the JSON shape of [`NavigationEvent`] is the event stream
//!
//! ## Coordinate Conventions
//!
//! - **Coordinate**: WGS84-like latitude/longitude in degrees
//! - **Vectors** used for turn angles are taken in (latitude, longitude) order,
//!   so a clockwise turn seen from above has a negative 2D cross product
//!
//! ## Invariants
//! - A [`RegionWaypointPoint`] compares and hashes by value (region id, waypoint id)
//! - [`NavigationInstruction::progress`] is always within 0–100

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Coordinates ───────────────────────────────────────────────────────────────

/// Geographic position, degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

// ── Graph enums ───────────────────────────────────────────────────────────────

/// Role of a waypoint in its region. Drives UI grouping and portal resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocationType {
    #[default]
    Landmark,
    JunctionBranch,
    Midpath,
    TerminalDestination,
    /// Transition to a paired waypoint in a neighbouring region
    Portal,
}

/// Indoor positioning technology active inside a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpsType {
    #[default]
    LBeacon,
    IBeacon,
    Gps,
}

/// Physical kind of a connection between two waypoints or regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    #[default]
    NormalHallway,
    Stair,
    Elevator,
    Escalator,
}

/// Compass direction of a region edge, as seen from its source side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardinalDirection {
    #[default]
    North,
    NorthEast,
    East,
    SouthEast,
    South,
    SouthWest,
    West,
    NorthWest,
    /// Vertical transitions (elevator shafts) have no horizontal heading
    Vertical,
}

// ── Route keys ────────────────────────────────────────────────────────────────

/// A (region, waypoint) pair: the unit of "current location" and of route checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionWaypointPoint {
    pub region_id: Uuid,
    pub waypoint_id: Uuid,
}

impl RegionWaypointPoint {
    pub fn new(region_id: Uuid, waypoint_id: Uuid) -> Self {
        Self { region_id, waypoint_id }
    }
}

impl fmt::Display for RegionWaypointPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region_id, self.waypoint_id)
    }
}

// ── Beacon signals ────────────────────────────────────────────────────────────

/// Identity of an advertising beacon as seen by a scanner.
/// LBeacons only carry the UUID; iBeacons add major/minor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BeaconKey {
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<u16>,
}

impl BeaconKey {
    pub fn lbeacon(uuid: Uuid) -> Self {
        Self { uuid, major: None, minor: None }
    }

    pub fn ibeacon(uuid: Uuid, major: u16, minor: u16) -> Self {
        Self { uuid, major: Some(major), minor: Some(minor) }
    }
}

/// One observation pushed by a platform scan callback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub beacon: BeaconKey,
    /// Received signal strength, dBm
    pub rssi: i32,
    pub received_at: DateTime<Utc>,
}

// ── Instructions ──────────────────────────────────────────────────────────────

/// Turn the user must take at the current waypoint to head for the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnDirection {
    /// No previous segment yet: orient towards the next waypoint
    FirstDirection,
    Forward,
    ForwardRight,
    Right,
    BackwardRight,
    Backward,
    BackwardLeft,
    Left,
    ForwardLeft,
    Up,
    Down,
}

impl TurnDirection {
    /// Classify a signed turn angle (positive = right) into a direction.
    pub fn from_angle(angle_deg: f64) -> Self {
        let magnitude = angle_deg.abs();
        let right = angle_deg > 0.0;
        if magnitude <= 15.0 {
            Self::Forward
        } else if magnitude <= 60.0 {
            if right { Self::ForwardRight } else { Self::ForwardLeft }
        } else if magnitude <= 120.0 {
            if right { Self::Right } else { Self::Left }
        } else if magnitude <= 165.0 {
            if right { Self::BackwardRight } else { Self::BackwardLeft }
        } else {
            Self::Backward
        }
    }
}

/// What the user should do next, as shown/spoken by the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationInstruction {
    pub current: RegionWaypointPoint,
    pub current_waypoint_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<RegionWaypointPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_waypoint_name: Option<String>,
    /// 0–100
    pub progress: f64,
    pub direction: TurnDirection,
    /// Signed turn angle in degrees; `None` when there is no previous segment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_angle_deg: Option<f64>,
    /// Distance to the next waypoint, meters
    pub distance_m: f64,
    /// Set when the next hop crosses into another region
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NavigationResult {
    /// Next planned checkpoint reached
    Run,
    /// Off-route detection; a new plan was computed from the detected point
    AdjustRoute,
    /// Destination reached, session finished
    Arrival,
    /// Re-planning found no route; the previous plan stays active
    NoRoute,
}

/// One item of the session's instruction stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEvent {
    pub result: NavigationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<NavigationInstruction>,
    pub timestamp_ms: i64,
}

impl NavigationEvent {
    pub fn new(result: NavigationResult, instruction: Option<NavigationInstruction>) -> Self {
        Self {
            result,
            instruction,
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    /// Compact JSON for event relays; falls back to an empty object.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
