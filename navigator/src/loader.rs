//! JSON map documents → validated [`NavigationGraph`].
//!
//! The document mirrors the serialized graph: `info`, `regions` (each with its
//! waypoint list and intra-region edges) and `regionEdges`. Derived data
//! (neighbour sets) is rebuilt on load, so documents may omit it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::error::Result;
use crate::graph::{BuildingInfo, NavigationGraph, Region, RegionEdge};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    #[serde(default)]
    pub info: BuildingInfo,
    pub regions: Vec<Region>,
    #[serde(default)]
    pub region_edges: Vec<RegionEdge>,
}

impl GraphDocument {
    pub fn into_graph(self) -> Result<NavigationGraph> {
        NavigationGraph::new(self.info, self.regions, self.region_edges)
    }
}

pub fn from_json_str(json: &str) -> Result<NavigationGraph> {
    let doc: GraphDocument = serde_json::from_str(json)?;
    doc.into_graph()
}

pub fn to_json_string(graph: &NavigationGraph) -> Result<String> {
    Ok(serde_json::to_string_pretty(graph)?)
}

/// Read and validate a map file.
pub async fn load_graph(path: impl AsRef<Path>) -> Result<NavigationGraph> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).await?;
    let graph = from_json_str(&data)?;
    info!(
        "Loaded map {} ({} regions, {} region edges) from {}",
        graph.info.building,
        graph.regions().count(),
        graph.region_edges().len(),
        path.display()
    );
    Ok(graph)
}

pub async fn save_graph(graph: &NavigationGraph, path: impl AsRef<Path>) -> Result<()> {
    fs::write(path, to_json_string(graph)?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NavigatorError;
    use crate::fixtures::Building;
    use crate::planner::{PlannerSettings, RoutePlanner};
    use std::collections::BTreeSet;
    use uuid::Uuid;
    use wayfinder_types::{ConnectionType, IpsType, RegionWaypointPoint};

    const LOBBY: &str = r#"{
      "info": { "country": "TW", "city": "Taipei", "building": "Clinic" },
      "regions": [
        {
          "id": "6f1c0f0e-0000-4000-8000-000000000001",
          "name": "1F",
          "floor": 1,
          "ipsType": "L_BEACON",
          "waypoints": [
            {
              "id": "6f1c0f0e-0000-4000-8000-0000000000a1",
              "name": "Entrance",
              "category": "Entrance",
              "floor": 1,
              "coordinate": { "lat": 25.0, "lon": 121.0 },
              "beacons": [
                { "id": "3f80000041c8000042f2000000000001", "threshold": -65, "kind": { "type": "L_BEACON" } }
              ]
            },
            {
              "id": "6f1c0f0e-0000-4000-8000-0000000000a2",
              "name": "Stairs",
              "locationType": "PORTAL",
              "floor": 1,
              "coordinate": { "lat": 25.0001, "lon": 121.0 }
            }
          ],
          "edges": [
            { "source": "6f1c0f0e-0000-4000-8000-0000000000a1", "sink": "6f1c0f0e-0000-4000-8000-0000000000a2" }
          ]
        },
        {
          "id": "6f1c0f0e-0000-4000-8000-000000000002",
          "name": "2F",
          "floor": 2,
          "ipsType": "I_BEACON",
          "waypoints": [
            {
              "id": "6f1c0f0e-0000-4000-8000-0000000000b1",
              "name": "Stairs",
              "locationType": "PORTAL",
              "floor": 2,
              "coordinate": { "lat": 25.0001, "lon": 121.0 },
              "beacons": [
                {
                  "id": "6f1c0f0e-0000-4000-8000-000000000002", "major": 2, "minor": 1, "threshold": -70,
                  "kind": { "type": "I_BEACON", "coordinate": { "lat": 25.0001, "lon": 121.0 } }
                }
              ]
            }
          ]
        }
      ],
      "regionEdges": [
        {
          "sourceRegion": "6f1c0f0e-0000-4000-8000-000000000001",
          "sourceWaypoint": "6f1c0f0e-0000-4000-8000-0000000000a2",
          "sinkRegion": "6f1c0f0e-0000-4000-8000-000000000002",
          "sinkWaypoint": "6f1c0f0e-0000-4000-8000-0000000000b1",
          "connectionType": "STAIR",
          "direction": "VERTICAL",
          "distance": 6.5
        }
      ]
    }"#;

    fn id(s: &str) -> Uuid {
        Uuid::parse_str(s).unwrap()
    }

    #[test]
    fn document_loads_and_derives_neighbours() {
        let graph = from_json_str(LOBBY).unwrap();
        assert_eq!(graph.info.building, "Clinic");
        let ground = id("6f1c0f0e-0000-4000-8000-000000000001");
        let upper = id("6f1c0f0e-0000-4000-8000-000000000002");
        assert_eq!(graph.region_ips_type(upper).unwrap(), IpsType::IBeacon);

        let entrance = id("6f1c0f0e-0000-4000-8000-0000000000a1");
        let stairs = id("6f1c0f0e-0000-4000-8000-0000000000a2");
        assert!(graph.neighbors_of(ground, entrance).unwrap().contains(&stairs));
        assert_eq!(
            graph.portal_pair(ground, stairs, upper),
            Some(RegionWaypointPoint::new(upper, id("6f1c0f0e-0000-4000-8000-0000000000b1")))
        );
        assert!(graph.region(ground).unwrap().neighbors.contains(&upper));
    }

    #[test]
    fn loaded_document_is_routable() {
        let graph = from_json_str(LOBBY).unwrap();
        let from = RegionWaypointPoint::new(
            id("6f1c0f0e-0000-4000-8000-000000000001"),
            id("6f1c0f0e-0000-4000-8000-0000000000a1"),
        );
        let to = RegionWaypointPoint::new(
            id("6f1c0f0e-0000-4000-8000-000000000002"),
            id("6f1c0f0e-0000-4000-8000-0000000000b1"),
        );
        let plan = RoutePlanner::new(&graph, BTreeSet::new(), PlannerSettings::default())
            .plan(from, to)
            .unwrap();
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn malformed_json_is_a_load_error() {
        assert!(matches!(from_json_str("{ \"regions\": [ }"), Err(NavigatorError::Load(_))));
    }

    #[test]
    fn dangling_region_edge_is_rejected() {
        let broken = LOBBY.replace(
            "\"sinkWaypoint\": \"6f1c0f0e-0000-4000-8000-0000000000b1\"",
            "\"sinkWaypoint\": \"6f1c0f0e-0000-4000-8000-0000000000ff\"",
        );
        assert!(matches!(from_json_str(&broken), Err(NavigatorError::GraphInconsistency(_))));
    }

    #[test]
    fn saved_graph_reloads_with_same_routes() {
        let b = Building::new();
        let json = to_json_string(&b.graph).unwrap();
        let reloaded = from_json_str(&json).unwrap();
        let avoid: BTreeSet<_> = [ConnectionType::Stair].into_iter().collect();
        let plan = |g: &NavigationGraph| {
            RoutePlanner::new(g, avoid.clone(), PlannerSettings::default())
                .plan(b.g(b.lobby), b.u(b.office))
                .unwrap()
                .checkpoints
        };
        assert_eq!(plan(&reloaded), plan(&b.graph));
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let path = std::env::temp_dir().join(format!("wayfinder-missing-{}.json", Uuid::new_v4()));
        assert!(matches!(load_graph(&path).await, Err(NavigatorError::Io(_))));
    }

    #[tokio::test]
    async fn graph_survives_save_and_load() {
        let path = std::env::temp_dir().join(format!("wayfinder-map-{}.json", Uuid::new_v4()));
        let original = from_json_str(LOBBY).unwrap();
        save_graph(&original, &path).await.unwrap();
        let loaded = load_graph(&path).await.unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded.regions().count(), 2);
        assert_eq!(loaded.region_edges().len(), 1);
    }
}
