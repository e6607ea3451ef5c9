//! Weighted digraph and Dijkstra's shortest path, shared by the region and waypoint tiers.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

/// Priority queue entry. Lower cost pops first; equal costs pop the lower index first.
#[derive(Clone, Copy, Debug)]
struct DijkstraState {
    cost: f64,
    node: usize,
}

impl PartialEq for DijkstraState {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DijkstraState {}

impl Ord for DijkstraState {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behaviour on BinaryHeap
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for DijkstraState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShortestPath<N> {
    /// Nodes from start to goal, both included
    pub path: Vec<N>,
    pub distance: f64,
}

/// Directed graph with `f64` edge weights over ordered node keys.
///
/// Nodes are indexed in key order, so searches over the same graph always
/// explore in the same order.
#[derive(Clone, Debug)]
pub struct WeightedGraph<N: Ord + Copy> {
    adjacency: BTreeMap<N, BTreeMap<N, f64>>,
}

impl<N: Ord + Copy> Default for WeightedGraph<N> {
    fn default() -> Self {
        Self { adjacency: BTreeMap::new() }
    }
}

impl<N: Ord + Copy> WeightedGraph<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: N) {
        self.adjacency.entry(node).or_default();
    }

    /// Add `from → to`. Parallel edges collapse to the cheapest one.
    pub fn add_edge(&mut self, from: N, to: N, weight: f64) {
        self.add_node(to);
        let out = self.adjacency.entry(from).or_default();
        out.entry(to)
            .and_modify(|w| *w = w.min(weight))
            .or_insert(weight);
    }

    pub fn contains(&self, node: &N) -> bool {
        self.adjacency.contains_key(node)
    }

    pub fn weight(&self, from: &N, to: &N) -> Option<f64> {
        self.adjacency.get(from)?.get(to).copied()
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn neighbors(&self, node: &N) -> impl Iterator<Item = (&N, &f64)> {
        self.adjacency.get(node).into_iter().flat_map(|out| out.iter())
    }

    /// Dijkstra from `start` to `goal`. `None` if either is unknown or unreachable.
    pub fn shortest_path(&self, start: N, goal: N) -> Option<ShortestPath<N>> {
        let keys: Vec<N> = self.adjacency.keys().copied().collect();
        let index_of = |n: &N| keys.binary_search(n).ok();
        let start_idx = index_of(&start)?;
        let goal_idx = index_of(&goal)?;

        if start_idx == goal_idx {
            return Some(ShortestPath { path: vec![start], distance: 0.0 });
        }

        let edges: Vec<Vec<(usize, f64)>> = keys
            .iter()
            .map(|k| {
                self.adjacency[k]
                    .iter()
                    .filter_map(|(to, &w)| index_of(to).map(|i| (i, w)))
                    .collect()
            })
            .collect();

        let n = keys.len();
        let mut dist = vec![f64::INFINITY; n];
        let mut prev: Vec<Option<usize>> = vec![None; n];
        dist[start_idx] = 0.0;

        let mut heap = BinaryHeap::new();
        heap.push(DijkstraState { cost: 0.0, node: start_idx });

        while let Some(DijkstraState { cost, node }) = heap.pop() {
            if cost > dist[node] {
                continue;
            }
            if node == goal_idx {
                break;
            }
            for &(neighbor, edge_cost) in &edges[node] {
                let next = cost + edge_cost;
                if next < dist[neighbor] {
                    dist[neighbor] = next;
                    prev[neighbor] = Some(node);
                    heap.push(DijkstraState { cost: next, node: neighbor });
                }
            }
        }

        if !dist[goal_idx].is_finite() {
            return None;
        }

        let mut path = vec![keys[goal_idx]];
        let mut current = goal_idx;
        while current != start_idx {
            current = prev[current]?;
            path.push(keys[current]);
        }
        path.reverse();

        Some(ShortestPath { path, distance: dist[goal_idx] })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_simple_graph() -> WeightedGraph<u32> {
        // 0 --1.0-- 1 --1.0-- 2
        // |         |
        // 2.0       1.5
        // |         |
        // 3 --1.0-- 4
        let mut g = WeightedGraph::new();
        for &(a, b, w) in &[(0, 1, 1.0), (1, 2, 1.0), (0, 3, 2.0), (1, 4, 1.5), (3, 4, 1.0)] {
            g.add_edge(a, b, w);
            g.add_edge(b, a, w);
        }
        g
    }

    #[test]
    fn finds_shortest_of_two_routes() {
        let g = make_simple_graph();
        // 0->1->4 (2.5) beats 0->3->4 (3.0)
        let result = g.shortest_path(0, 4).unwrap();
        assert_eq!(result.path, vec![0, 1, 4]);
        assert!((result.distance - 2.5).abs() < 1e-9);
    }

    #[test]
    fn same_node_is_trivial_path() {
        let g = make_simple_graph();
        let result = g.shortest_path(2, 2).unwrap();
        assert_eq!(result.path, vec![2]);
        assert_eq!(result.distance, 0.0);
    }

    #[test]
    fn disconnected_goal_has_no_path() {
        let mut g = make_simple_graph();
        g.add_node(9);
        assert!(g.shortest_path(0, 9).is_none());
        assert!(g.shortest_path(0, 42).is_none());
    }

    #[test]
    fn one_way_edges_are_respected() {
        let mut g = WeightedGraph::new();
        g.add_edge(1, 2, 1.0);
        assert!(g.shortest_path(1, 2).is_some());
        assert!(g.shortest_path(2, 1).is_none());
    }

    #[test]
    fn parallel_edges_keep_cheapest() {
        let mut g = WeightedGraph::new();
        g.add_edge('a', 'b', 5.0);
        g.add_edge('a', 'b', 2.0);
        g.add_edge('a', 'b', 7.0);
        assert_eq!(g.weight(&'a', &'b'), Some(2.0));
    }

    #[test]
    fn equal_cost_ties_are_deterministic() {
        // diamond: 0->1->3 and 0->2->3 cost the same
        let mut g = WeightedGraph::new();
        g.add_edge(0, 1, 1.0);
        g.add_edge(0, 2, 1.0);
        g.add_edge(1, 3, 1.0);
        g.add_edge(2, 3, 1.0);
        let first = g.shortest_path(0, 3).unwrap();
        for _ in 0..10 {
            assert_eq!(g.shortest_path(0, 3).unwrap(), first);
        }
    }
}
