//! Small hand-built maps shared by the unit tests.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use wayfinder_types::{
    CardinalDirection, ConnectionType, Coordinate, IpsType, LocationType, RegionWaypointPoint,
};

use crate::beacon::{Beacon, CoordinateCodec, LBeaconPosition, PackedFloatCodec};
use crate::graph::{BuildingInfo, NavigationGraph, Region, RegionEdge, Waypoint, WaypointEdge};

/// Meters per degree on the equator, so offsets below are exact on both axes.
const METERS_PER_DEGREE: f64 = 111_195.08;

pub const THRESHOLD: i32 = -70;

pub fn at(north_m: f64, east_m: f64) -> Coordinate {
    Coordinate::new(north_m / METERS_PER_DEGREE, east_m / METERS_PER_DEGREE)
}

pub struct RegionBuilder {
    region: Region,
    serial: u32,
}

impl RegionBuilder {
    pub fn new(name: &str, floor: i32, ips_type: IpsType) -> Self {
        Self {
            region: Region {
                id: Uuid::new_v4(),
                name: name.to_string(),
                floor,
                ips_type,
                neighbors: BTreeSet::new(),
                waypoints: BTreeMap::new(),
                edges: Vec::new(),
            },
            serial: 0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.region.id
    }

    /// Adds a waypoint with one beacon matching the region's technology.
    pub fn waypoint(&mut self, name: &str, category: &str, location_type: LocationType, coordinate: Coordinate) -> Uuid {
        self.serial += 1;
        let beacon = match self.region.ips_type {
            IpsType::IBeacon => Beacon::ibeacon(self.region.id, self.region.floor as u16, self.serial as u16, THRESHOLD, coordinate),
            _ => {
                let position = LBeaconPosition { floor: self.region.floor, coordinate };
                Beacon::lbeacon(PackedFloatCodec.encode(position, self.serial), THRESHOLD)
            }
        };
        let id = Uuid::new_v4();
        self.region.waypoints.insert(
            id,
            Waypoint {
                id,
                name: name.to_string(),
                category: category.to_string(),
                location_type,
                floor: self.region.floor,
                coordinate,
                beacons: vec![beacon],
                neighbors: BTreeSet::new(),
            },
        );
        id
    }

    pub fn hallway(&mut self, a: Uuid, b: Uuid) {
        self.region.edges.push(WaypointEdge {
            source: a,
            sink: b,
            bidirectional: true,
            connection_type: ConnectionType::NormalHallway,
            distance: None,
        });
    }

    pub fn build(self) -> Region {
        self.region
    }
}

pub fn crossing(
    from: RegionWaypointPoint,
    to: RegionWaypointPoint,
    connection_type: ConnectionType,
    distance: f64,
) -> RegionEdge {
    RegionEdge {
        source_region: from.region_id,
        source_waypoint: from.waypoint_id,
        sink_region: to.region_id,
        sink_waypoint: to.waypoint_id,
        bidirectional: true,
        connection_type,
        direction: CardinalDirection::Vertical,
        distance,
    }
}

// ─── Single corridor ─────────────────────────────────────────────────────────

/// ```text
///   C
///   |
///   B
///   |
///   A ---- E ---------- D
/// ```
/// A→B→C runs north at 10 m spacing; E is 10 m east of A, D 20 m further east.
pub struct Corridor {
    pub graph: NavigationGraph,
    pub region: Uuid,
    pub a: Uuid,
    pub b: Uuid,
    pub c: Uuid,
    pub d: Uuid,
    pub e: Uuid,
}

impl Corridor {
    pub fn new() -> Self {
        let mut r = RegionBuilder::new("Corridor", 1, IpsType::LBeacon);
        let a = r.waypoint("A", "Corridor", LocationType::TerminalDestination, at(0.0, 0.0));
        let b = r.waypoint("B", "Corridor", LocationType::Midpath, at(10.0, 0.0));
        let c = r.waypoint("C", "Corridor", LocationType::TerminalDestination, at(20.0, 0.0));
        let e = r.waypoint("E", "Corridor", LocationType::JunctionBranch, at(0.0, 10.0));
        let d = r.waypoint("D", "Corridor", LocationType::TerminalDestination, at(0.0, 30.0));
        r.hallway(a, b);
        r.hallway(b, c);
        r.hallway(a, e);
        r.hallway(e, d);
        let region = r.id();
        let graph = NavigationGraph::new(BuildingInfo::default(), vec![r.build()], vec![])
            .expect("corridor fixture is consistent");
        Self { graph, region, a, b, c, d, e }
    }

    pub fn point(&self, waypoint: Uuid) -> RegionWaypointPoint {
        RegionWaypointPoint::new(self.region, waypoint)
    }
}

// ─── Two-floor building ──────────────────────────────────────────────────────

/// Ground floor (LBeacon): lobby — hall — {stair, lift}.
/// Upper floor (IBeacon): {stair, lift} — office.
/// Stair crossing is 8 m, elevator crossing 20 m.
pub struct Building {
    pub graph: NavigationGraph,
    pub ground: Uuid,
    pub upper: Uuid,
    pub lobby: Uuid,
    pub hall: Uuid,
    pub ground_stair: Uuid,
    pub ground_lift: Uuid,
    pub upper_stair: Uuid,
    pub upper_lift: Uuid,
    pub office: Uuid,
}

impl Building {
    pub fn new() -> Self {
        let mut g = RegionBuilder::new("Ground floor", 1, IpsType::LBeacon);
        let lobby = g.waypoint("Lobby", "Entrance", LocationType::Landmark, at(0.0, 0.0));
        let hall = g.waypoint("Hall", "Corridor", LocationType::JunctionBranch, at(10.0, 0.0));
        let ground_stair = g.waypoint("Stair G", "Stairs", LocationType::Portal, at(20.0, 0.0));
        let ground_lift = g.waypoint("Lift G", "Elevator", LocationType::Portal, at(10.0, 10.0));
        g.hallway(lobby, hall);
        g.hallway(hall, ground_stair);
        g.hallway(hall, ground_lift);

        let mut u = RegionBuilder::new("Upper floor", 2, IpsType::IBeacon);
        let upper_stair = u.waypoint("Stair 2", "Stairs", LocationType::Portal, at(20.0, 0.0));
        let upper_lift = u.waypoint("Lift 2", "Elevator", LocationType::Portal, at(10.0, 10.0));
        let office = u.waypoint("Office", "Office", LocationType::TerminalDestination, at(20.0, 10.0));
        u.hallway(upper_stair, office);
        u.hallway(upper_lift, office);

        let ground = g.id();
        let upper = u.id();
        let edges = vec![
            crossing(
                RegionWaypointPoint::new(ground, ground_stair),
                RegionWaypointPoint::new(upper, upper_stair),
                ConnectionType::Stair,
                8.0,
            ),
            crossing(
                RegionWaypointPoint::new(ground, ground_lift),
                RegionWaypointPoint::new(upper, upper_lift),
                ConnectionType::Elevator,
                20.0,
            ),
        ];
        let graph = NavigationGraph::new(BuildingInfo::default(), vec![g.build(), u.build()], edges)
            .expect("building fixture is consistent");

        Self {
            graph,
            ground,
            upper,
            lobby,
            hall,
            ground_stair,
            ground_lift,
            upper_stair,
            upper_lift,
            office,
        }
    }

    pub fn g(&self, waypoint: Uuid) -> RegionWaypointPoint {
        RegionWaypointPoint::new(self.ground, waypoint)
    }

    pub fn u(&self, waypoint: Uuid) -> RegionWaypointPoint {
        RegionWaypointPoint::new(self.upper, waypoint)
    }
}
