//! # graph
//!
//! The loaded navigation graph: regions, their waypoints and beacons, the
//! intra-region waypoint edges and the inter-region (portal) edges.
//!
//! A graph is validated once in [`NavigationGraph::new`] and is read-only
//! afterwards; sessions share it behind an `Arc`.
//!
//! ## Invariants (checked at construction)
//! - Every waypoint id belongs to exactly one region
//! - Every edge endpoint exists in the region it names
//! - Region edges connect `Portal` waypoints, and each portal has exactly one pairing
//! - Region neighbour lists only name known regions

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wayfinder_types::{
    BeaconKey, CardinalDirection, ConnectionType, Coordinate, IpsType, LocationType,
    RegionWaypointPoint,
};

use crate::beacon::Beacon;
use crate::dijkstra::WeightedGraph;
use crate::error::{NavigatorError, Result};
use crate::geo;

// ─── Waypoints ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub id: Uuid,
    pub name: String,
    /// UI grouping tag ("Restroom", "Clinic", ...)
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub location_type: LocationType,
    pub floor: i32,
    pub coordinate: Coordinate,
    #[serde(default)]
    pub beacons: Vec<Beacon>,
    /// Derived from the region's waypoint edges
    #[serde(skip)]
    pub neighbors: BTreeSet<Uuid>,
}

/// Connection between two waypoints of the same region.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaypointEdge {
    pub source: Uuid,
    pub sink: Uuid,
    #[serde(default = "default_true")]
    pub bidirectional: bool,
    #[serde(default)]
    pub connection_type: ConnectionType,
    /// Meters; straight-line distance between the endpoints when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

fn default_true() -> bool {
    true
}

// ─── Regions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: Uuid,
    pub name: String,
    pub floor: i32,
    #[serde(default)]
    pub ips_type: IpsType,
    #[serde(default)]
    pub neighbors: BTreeSet<Uuid>,
    #[serde(with = "waypoint_list")]
    pub waypoints: BTreeMap<Uuid, Waypoint>,
    #[serde(default)]
    pub edges: Vec<WaypointEdge>,
}

impl Region {
    pub fn waypoints_by_category(&self) -> BTreeMap<&str, Vec<&Waypoint>> {
        let mut groups: BTreeMap<&str, Vec<&Waypoint>> = BTreeMap::new();
        for waypoint in self.waypoints.values() {
            groups.entry(waypoint.category.as_str()).or_default().push(waypoint);
        }
        groups
    }
}

/// Waypoints travel as a JSON list and are indexed by id in memory.
mod waypoint_list {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use uuid::Uuid;

    use super::Waypoint;

    pub fn serialize<S: Serializer>(map: &BTreeMap<Uuid, Waypoint>, s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(map.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<Uuid, Waypoint>, D::Error> {
        let list = Vec::<Waypoint>::deserialize(d)?;
        let mut map = BTreeMap::new();
        for waypoint in list {
            let id = waypoint.id;
            if map.insert(id, waypoint).is_some() {
                return Err(D::Error::custom(format!("duplicate waypoint id {id}")));
            }
        }
        Ok(map)
    }
}

/// Connection between a portal waypoint of one region and one of another.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionEdge {
    pub source_region: Uuid,
    pub source_waypoint: Uuid,
    pub sink_region: Uuid,
    pub sink_waypoint: Uuid,
    #[serde(default = "default_true")]
    pub bidirectional: bool,
    #[serde(default)]
    pub connection_type: ConnectionType,
    #[serde(default)]
    pub direction: CardinalDirection,
    /// Meters
    pub distance: f64,
}

impl RegionEdge {
    pub fn source(&self) -> RegionWaypointPoint {
        RegionWaypointPoint::new(self.source_region, self.source_waypoint)
    }

    pub fn sink(&self) -> RegionWaypointPoint {
        RegionWaypointPoint::new(self.sink_region, self.sink_waypoint)
    }

    /// The far end when leaving through `from`, honouring one-way edges.
    pub fn traverse_from(&self, from: RegionWaypointPoint) -> Option<RegionWaypointPoint> {
        if from == self.source() {
            Some(self.sink())
        } else if self.bidirectional && from == self.sink() {
            Some(self.source())
        } else {
            None
        }
    }

    pub fn weight(&self, avoid: &BTreeSet<ConnectionType>, penalty: f64) -> f64 {
        penalized(self.distance, self.connection_type, avoid, penalty)
    }
}

fn penalized(distance: f64, connection: ConnectionType, avoid: &BTreeSet<ConnectionType>, penalty: f64) -> f64 {
    if avoid.contains(&connection) {
        distance + penalty
    } else {
        distance
    }
}

// ─── Navigation graph ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildingInfo {
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub building: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationGraph {
    pub info: BuildingInfo,
    #[serde(serialize_with = "serialize_regions")]
    regions: BTreeMap<Uuid, Region>,
    region_edges: Vec<RegionEdge>,
    #[serde(skip)]
    waypoint_region: HashMap<Uuid, Uuid>,
}

fn serialize_regions<S: serde::Serializer>(map: &BTreeMap<Uuid, Region>, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.collect_seq(map.values())
}

fn inconsistent(msg: impl Into<String>) -> NavigatorError {
    NavigatorError::GraphInconsistency(msg.into())
}

impl NavigationGraph {
    /// Validate and index a graph. Waypoint neighbour sets are derived here.
    pub fn new(info: BuildingInfo, regions: Vec<Region>, region_edges: Vec<RegionEdge>) -> Result<Self> {
        let mut by_id: BTreeMap<Uuid, Region> = BTreeMap::new();
        let mut waypoint_region: HashMap<Uuid, Uuid> = HashMap::new();

        for mut region in regions {
            for waypoint in region.waypoints.values_mut() {
                waypoint.neighbors.clear();
                if let Some(other) = waypoint_region.insert(waypoint.id, region.id) {
                    return Err(inconsistent(format!(
                        "waypoint {} appears in regions {other} and {}",
                        waypoint.id, region.id
                    )));
                }
            }

            let edges = region.edges.clone();
            for edge in &edges {
                for end in [edge.source, edge.sink] {
                    if !region.waypoints.contains_key(&end) {
                        return Err(inconsistent(format!(
                            "edge in region {} references unknown waypoint {end}",
                            region.id
                        )));
                    }
                }
                if let Some(w) = region.waypoints.get_mut(&edge.source) {
                    w.neighbors.insert(edge.sink);
                }
                if edge.bidirectional {
                    if let Some(w) = region.waypoints.get_mut(&edge.sink) {
                        w.neighbors.insert(edge.source);
                    }
                }
            }

            if by_id.insert(region.id, region).is_some() {
                return Err(inconsistent("duplicate region id"));
            }
        }

        let mut portal_pairings: HashMap<RegionWaypointPoint, usize> = HashMap::new();
        for edge in &region_edges {
            for end in [edge.source(), edge.sink()] {
                let region = by_id
                    .get(&end.region_id)
                    .ok_or_else(|| inconsistent(format!("region edge references unknown region {}", end.region_id)))?;
                let waypoint = region.waypoints.get(&end.waypoint_id).ok_or_else(|| {
                    inconsistent(format!(
                        "region edge references waypoint {} not in region {}",
                        end.waypoint_id, end.region_id
                    ))
                })?;
                if waypoint.location_type != LocationType::Portal {
                    return Err(inconsistent(format!("region edge endpoint {} is not a portal", waypoint.name)));
                }
                *portal_pairings.entry(end).or_insert(0) += 1;
            }
            if edge.source_region == edge.sink_region {
                return Err(inconsistent("region edge must join two different regions"));
            }
            if let Some(r) = by_id.get_mut(&edge.source_region) {
                r.neighbors.insert(edge.sink_region);
            }
            if edge.bidirectional {
                if let Some(r) = by_id.get_mut(&edge.sink_region) {
                    r.neighbors.insert(edge.source_region);
                }
            }
        }

        for region in by_id.values() {
            if let Some(unknown) = region.neighbors.iter().find(|n| !by_id.contains_key(n)) {
                return Err(inconsistent(format!("region {} lists unknown neighbour {unknown}", region.name)));
            }
            for waypoint in region.waypoints.values() {
                if waypoint.location_type != LocationType::Portal {
                    continue;
                }
                let point = RegionWaypointPoint::new(region.id, waypoint.id);
                match portal_pairings.get(&point).copied().unwrap_or(0) {
                    1 => {}
                    n => {
                        return Err(inconsistent(format!(
                            "portal {} has {n} pairings, expected exactly one",
                            waypoint.name
                        )))
                    }
                }
            }
        }

        Ok(Self { info, regions: by_id, region_edges, waypoint_region })
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn region_edges(&self) -> &[RegionEdge] {
        &self.region_edges
    }

    pub fn region(&self, region_id: Uuid) -> Result<&Region> {
        self.regions
            .get(&region_id)
            .ok_or_else(|| inconsistent(format!("unknown region {region_id}")))
    }

    pub fn waypoint(&self, point: RegionWaypointPoint) -> Result<&Waypoint> {
        self.region(point.region_id)?
            .waypoints
            .get(&point.waypoint_id)
            .ok_or_else(|| inconsistent(format!("unknown waypoint {point}")))
    }

    pub fn contains(&self, point: RegionWaypointPoint) -> bool {
        self.waypoint(point).is_ok()
    }

    /// Region owning a waypoint id.
    pub fn region_of_waypoint(&self, waypoint_id: Uuid) -> Option<Uuid> {
        self.waypoint_region.get(&waypoint_id).copied()
    }

    pub fn region_ips_type(&self, region_id: Uuid) -> Result<IpsType> {
        Ok(self.region(region_id)?.ips_type)
    }

    pub fn all_waypoints_in_region(&self, region_id: Uuid) -> Result<BTreeSet<Uuid>> {
        Ok(self.region(region_id)?.waypoints.keys().copied().collect())
    }

    pub fn beacons_of_waypoint(&self, region_id: Uuid, waypoint_id: Uuid) -> Result<BTreeSet<BeaconKey>> {
        let waypoint = self.waypoint(RegionWaypointPoint::new(region_id, waypoint_id))?;
        Ok(waypoint.beacons.iter().map(Beacon::key).collect())
    }

    /// Intra-region adjacency only.
    pub fn neighbors_of(&self, region_id: Uuid, waypoint_id: Uuid) -> Result<&BTreeSet<Uuid>> {
        Ok(&self.waypoint(RegionWaypointPoint::new(region_id, waypoint_id))?.neighbors)
    }

    /// Everything one hop from `point`: intra-region neighbours, then the far
    /// ends of portal edges leaving it.
    pub fn adjacent_points(&self, point: RegionWaypointPoint) -> Result<Vec<RegionWaypointPoint>> {
        let mut out: Vec<RegionWaypointPoint> = self
            .neighbors_of(point.region_id, point.waypoint_id)?
            .iter()
            .map(|&w| RegionWaypointPoint::new(point.region_id, w))
            .collect();
        out.extend(self.portal_edges_from(point).map(|(_, to)| to));
        Ok(out)
    }

    /// Paired portal of `waypoint_id` inside `adjacent_region`, if it is a portal toward it.
    pub fn portal_pair(
        &self,
        region_id: Uuid,
        waypoint_id: Uuid,
        adjacent_region: Uuid,
    ) -> Option<RegionWaypointPoint> {
        let from = RegionWaypointPoint::new(region_id, waypoint_id);
        self.portal_edges_from(from)
            .find(|(_, to)| to.region_id == adjacent_region)
            .map(|(_, to)| to)
    }

    /// Region edges that can be taken out of `from`, with the far end of each.
    pub fn portal_edges_from(
        &self,
        from: RegionWaypointPoint,
    ) -> impl Iterator<Item = (&RegionEdge, RegionWaypointPoint)> + '_ {
        self.region_edges
            .iter()
            .filter_map(move |e| e.traverse_from(from).map(|to| (e, to)))
    }

    /// Region edges leading from `from_region` into `to_region`, with their portal pair.
    pub fn crossings(
        &self,
        from_region: Uuid,
        to_region: Uuid,
    ) -> impl Iterator<Item = (&RegionEdge, RegionWaypointPoint, RegionWaypointPoint)> + '_ {
        self.region_edges.iter().filter_map(move |e| {
            if e.source_region == from_region && e.sink_region == to_region {
                Some((e, e.source(), e.sink()))
            } else if e.bidirectional && e.sink_region == from_region && e.source_region == to_region {
                Some((e, e.sink(), e.source()))
            } else {
                None
            }
        })
    }

    /// Region-level graph. Avoided connection types cost `penalty` extra, never removed.
    pub fn build_region_graph(&self, avoid: &BTreeSet<ConnectionType>, penalty: f64) -> WeightedGraph<Uuid> {
        let mut graph = WeightedGraph::new();
        for id in self.regions.keys() {
            graph.add_node(*id);
        }
        for edge in &self.region_edges {
            let w = edge.weight(avoid, penalty);
            graph.add_edge(edge.source_region, edge.sink_region, w);
            if edge.bidirectional {
                graph.add_edge(edge.sink_region, edge.source_region, w);
            }
        }
        graph
    }

    /// Waypoint-level graph of one region, same penalty rule as the region graph.
    pub fn build_waypoint_graph(
        &self,
        region_id: Uuid,
        avoid: &BTreeSet<ConnectionType>,
        penalty: f64,
    ) -> Result<WeightedGraph<Uuid>> {
        let region = self.region(region_id)?;
        let mut graph = WeightedGraph::new();
        for id in region.waypoints.keys() {
            graph.add_node(*id);
        }
        for edge in &region.edges {
            let distance = match edge.distance {
                Some(d) => d,
                None => self.straight_line_distance(region_id, edge.source, edge.sink)?,
            };
            let w = penalized(distance, edge.connection_type, avoid, penalty);
            graph.add_edge(edge.source, edge.sink, w);
            if edge.bidirectional {
                graph.add_edge(edge.sink, edge.source, w);
            }
        }
        Ok(graph)
    }

    pub fn straight_line_distance(&self, region_id: Uuid, a: Uuid, b: Uuid) -> Result<f64> {
        let wa = self.waypoint(RegionWaypointPoint::new(region_id, a))?;
        let wb = self.waypoint(RegionWaypointPoint::new(region_id, b))?;
        Ok(geo::distance(&wa.coordinate, &wb.coordinate))
    }

    /// Distance used to decide whether two points can be told apart by beacon signal.
    /// Points on different floors are always distinguishable.
    pub fn separation(&self, a: RegionWaypointPoint, b: RegionWaypointPoint) -> Result<f64> {
        let wa = self.waypoint(a)?;
        let wb = self.waypoint(b)?;
        if a.region_id != b.region_id && wa.floor != wb.floor {
            return Ok(f64::INFINITY);
        }
        Ok(geo::distance(&wa.coordinate, &wb.coordinate))
    }
}
