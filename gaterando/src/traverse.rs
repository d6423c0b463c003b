use gaterando_game::{AreaId, EdgeId, Graph, TAG_MANDATORY};
use hashbrown::{HashMap, HashSet};
use serde_derive::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraverseMode {
    /// Iterate until no more improvement is possible.
    Partial,
    /// As `Partial`, then recompute exact distances with a strict forward
    /// BFS under the final proposition set. Used for final validation and
    /// tiering.
    Full,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AreaRecord {
    /// BFS distance from the start area.
    pub distance: usize,
    /// Edges usable to enter this area, with the distance at which each applied.
    pub incoming: Vec<(EdgeId, usize)>,
}

#[derive(Clone, Debug)]
pub struct TraverseResult {
    pub visited: Vec<bool>,
    pub visit_order: Vec<AreaId>,
    pub records: HashMap<AreaId, AreaRecord>,
    pub unvisited_areas: HashSet<AreaId>,
    pub unvisited_items: HashSet<String>,
}

/// An area is mandatory if flagged in the catalog or if any of its edges is
/// tagged mandatory by upstream configuration.
pub fn is_area_mandatory(graph: &Graph, id: AreaId) -> bool {
    graph.areas[id].mandatory
        || graph.nodes[id]
            .to
            .iter()
            .chain(graph.nodes[id].from.iter())
            .any(|&e| graph.edges[e].has_tag(TAG_MANDATORY))
}

/// Forward reachability from `start` over linked edges, honoring gating
/// expressions. A proposition holds once the area granting it (for items) or
/// the area itself (for area names) has been visited, so the pass iterates
/// until no more areas or records improve.
pub fn traverse(graph: &Graph, start: AreaId, mode: TraverseMode) -> TraverseResult {
    let num_areas = graph.areas.len();
    let mut visited = vec![false; num_areas];
    let mut visit_order: Vec<AreaId> = vec![];
    let mut records: HashMap<AreaId, AreaRecord> = HashMap::new();
    visited[start] = true;
    visit_order.push(start);
    records.insert(
        start,
        AreaRecord {
            distance: 0,
            incoming: vec![],
        },
    );
    loop {
        let mut progress = false;
        let scanned = visit_order.len();
        for i in 0..scanned {
            let area = visit_order[i];
            let area_dist = records[&area].distance;
            for &e in &graph.nodes[area].to {
                let edge = &graph.edges[e];
                if edge.link.is_none() {
                    continue;
                }
                let Some(to) = edge.to else { continue };
                let usable = match &edge.linked_expr {
                    None => true,
                    Some(expr) => expr.satisfied(&|name: &str| {
                        if let Some(&item_area) = graph.item_areas.get(name) {
                            visited[item_area]
                        } else if let Some(&a) = graph.area_isv.index_by_key.get(name) {
                            visited[a]
                        } else {
                            false
                        }
                    }),
                };
                if !usable {
                    continue;
                }
                if !visited[to] {
                    visited[to] = true;
                    records.insert(
                        to,
                        AreaRecord {
                            distance: area_dist + 1,
                            incoming: vec![(e, area_dist + 1)],
                        },
                    );
                    visit_order.push(to);
                    progress = true;
                } else {
                    let rec = records.get_mut(&to).unwrap();
                    if !rec.incoming.iter().any(|&(used, _)| used == e) {
                        rec.incoming.push((e, area_dist + 1));
                    }
                    if area_dist + 1 < rec.distance {
                        rec.distance = area_dist + 1;
                        progress = true;
                    }
                }
            }
        }
        if !progress && visit_order.len() == scanned {
            break;
        }
    }

    if mode == TraverseMode::Full {
        // Forward-only BFS over edges usable under the final visited set;
        // gives exact distances for tiering.
        let final_visited = visited.clone();
        let mut dist: Vec<Option<usize>> = vec![None; num_areas];
        dist[start] = Some(0);
        let mut queue = std::collections::VecDeque::from([start]);
        while let Some(area) = queue.pop_front() {
            let d = dist[area].unwrap();
            for &e in &graph.nodes[area].to {
                let edge = &graph.edges[e];
                if edge.link.is_none() {
                    continue;
                }
                let Some(to) = edge.to else { continue };
                let usable = match &edge.linked_expr {
                    None => true,
                    Some(expr) => expr.satisfied(&|name: &str| {
                        if let Some(&item_area) = graph.item_areas.get(name) {
                            final_visited[item_area]
                        } else if let Some(&a) = graph.area_isv.index_by_key.get(name) {
                            final_visited[a]
                        } else {
                            false
                        }
                    }),
                };
                if usable && dist[to].is_none() {
                    dist[to] = Some(d + 1);
                    queue.push_back(to);
                }
            }
        }
        for (area, d) in dist.iter().enumerate() {
            if let (Some(d), Some(rec)) = (d, records.get_mut(&area)) {
                rec.distance = *d;
            }
        }
    }

    let unvisited_areas: HashSet<AreaId> = (0..num_areas).filter(|&a| !visited[a]).collect();
    let unvisited_items: HashSet<String> = graph
        .item_areas
        .iter()
        .filter(|&(_, &a)| !visited[a])
        .map(|(item, _)| item.clone())
        .collect();
    TraverseResult {
        visited,
        visit_order,
        records,
        unvisited_areas,
        unvisited_items,
    }
}

/// Ranks every area by how many mandatory boss areas sit at or below its BFS
/// distance. Consumed downstream for difficulty calibration.
pub fn area_tiers(graph: &Graph, result: &TraverseResult, boss_tag: &str) -> Vec<Option<usize>> {
    let mut boss_dists: Vec<usize> = (0..graph.areas.len())
        .filter(|&a| graph.area_has_tag(a, boss_tag) && is_area_mandatory(graph, a))
        .filter_map(|a| result.records.get(&a).map(|r| r.distance))
        .collect();
    boss_dists.sort_unstable();
    boss_dists.dedup();
    (0..graph.areas.len())
        .map(|a| {
            result
                .records
                .get(&a)
                .map(|r| boss_dists.iter().filter(|&&d| d <= r.distance).count())
        })
        .collect()
}
