use gaterando_game::{AreaId, EdgeId, EdgeKind, Graph, TAG_BOSS, TAG_UNLINKED};
use hashbrown::{HashMap, HashSet};
use log::warn;
use rand::{seq::SliceRandom, Rng};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::traverse::is_area_mandatory;

/// Strongly-connected "root components" among the analyzed areas, with
/// predecessor and dominator sets used to judge how safe an edge is to
/// repurpose.
pub struct ComponentData {
    /// Per-area component id; `usize::MAX` for areas outside the analysis.
    pub component: Vec<usize>,
    pub comp_areas: Vec<Vec<AreaId>>,
    pub root_preds: Vec<Vec<usize>>,
    pub root_succs: Vec<Vec<usize>>,
    pub dominators: Vec<HashSet<usize>>,
    pub start_comp: usize,
}

/// An edge counts for component analysis when it is linked, unconditional,
/// and does not lead into a mandatory-boss area.
fn traversable(graph: &Graph, edge_id: EdgeId) -> bool {
    let edge = &graph.edges[edge_id];
    if edge.kind != EdgeKind::Exit || edge.link.is_none() || edge.linked_expr.is_some() {
        return false;
    }
    match edge.to {
        Some(to) => !(graph.area_has_tag(to, TAG_BOSS) && is_area_mandatory(graph, to)),
        None => false,
    }
}

pub fn compute_components(graph: &Graph, start: AreaId, core: Option<&[bool]>) -> ComponentData {
    let num_areas = graph.areas.len();
    let allowed = |a: AreaId| core.map_or(true, |c| c[a]);
    let mut succ: Vec<Vec<AreaId>> = vec![vec![]; num_areas];
    let mut pred: Vec<Vec<AreaId>> = vec![vec![]; num_areas];
    for e in 0..graph.edges.len() {
        if !traversable(graph, e) {
            continue;
        }
        let f = graph.edges[e].from.unwrap();
        let t = graph.edges[e].to.unwrap();
        if !allowed(f) || !allowed(t) {
            continue;
        }
        succ[f].push(t);
        pred[t].push(f);
    }

    // Phase 1: DFS finish order, explicit stack.
    let mut finish: Vec<AreaId> = vec![];
    let mut state = vec![0u8; num_areas]; // 0 = unvisited, 1 = on stack, 2 = finished
    for root in 0..num_areas {
        if !allowed(root) || state[root] != 0 {
            continue;
        }
        state[root] = 1;
        let mut stack: Vec<(AreaId, usize)> = vec![(root, 0)];
        while let Some(top) = stack.last_mut() {
            let (a, i) = *top;
            if i < succ[a].len() {
                top.1 += 1;
                let b = succ[a][i];
                if state[b] == 0 {
                    state[b] = 1;
                    stack.push((b, 0));
                }
            } else {
                state[a] = 2;
                finish.push(a);
                stack.pop();
            }
        }
    }

    // Phase 2: backward reachability in reverse finish order assigns components.
    let mut component = vec![usize::MAX; num_areas];
    let mut comp_areas: Vec<Vec<AreaId>> = vec![];
    for &root in finish.iter().rev() {
        if component[root] != usize::MAX {
            continue;
        }
        let c = comp_areas.len();
        comp_areas.push(vec![]);
        component[root] = c;
        let mut stack = vec![root];
        while let Some(a) = stack.pop() {
            comp_areas[c].push(a);
            for &b in &pred[a] {
                if component[b] == usize::MAX {
                    component[b] = c;
                    stack.push(b);
                }
            }
        }
        comp_areas[c].sort_unstable();
    }

    let num_comps = comp_areas.len();
    let mut pred_sets: Vec<HashSet<usize>> = vec![HashSet::new(); num_comps];
    let mut succ_sets: Vec<HashSet<usize>> = vec![HashSet::new(); num_comps];
    for a in 0..num_areas {
        if component[a] == usize::MAX {
            continue;
        }
        for &b in &succ[a] {
            if component[b] != component[a] {
                pred_sets[component[b]].insert(component[a]);
                succ_sets[component[a]].insert(component[b]);
            }
        }
    }
    let to_sorted = |sets: Vec<HashSet<usize>>| -> Vec<Vec<usize>> {
        sets.into_iter()
            .map(|s| {
                let mut v: Vec<usize> = s.into_iter().collect();
                v.sort_unstable();
                v
            })
            .collect()
    };
    let root_preds = to_sorted(pred_sets);
    let root_succs = to_sorted(succ_sets);

    // Dominator sets: dom[x] = {x} ∪ ⋂ dom[p] over root predecessors, to a
    // fixed point.
    assert!(
        component[start] != usize::MAX,
        "start area {} excluded from component analysis",
        graph.area_name(start)
    );
    let start_comp = component[start];
    let mut dominators: Vec<HashSet<usize>> = vec![(0..num_comps).collect(); num_comps];
    let mut start_dom = HashSet::new();
    start_dom.insert(start_comp);
    dominators[start_comp] = start_dom;
    loop {
        let mut changed = false;
        for c in 0..num_comps {
            if c == start_comp {
                continue;
            }
            let mut new_dom: Option<HashSet<usize>> = None;
            for &p in &root_preds[c] {
                new_dom = Some(match new_dom {
                    None => dominators[p].clone(),
                    Some(d) => d.intersection(&dominators[p]).copied().collect(),
                });
            }
            let mut new_dom = new_dom.unwrap_or_default();
            new_dom.insert(c);
            if new_dom != dominators[c] {
                dominators[c] = new_dom;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    ComponentData {
        component,
        comp_areas,
        root_preds,
        root_succs,
        dominators,
        start_comp,
    }
}

/// Groups periphery areas into connected cliques: areas mutually reachable
/// through world edges or paired connection definitions without crossing back
/// into core territory.
pub fn periphery_cliques(graph: &Graph, core: &[bool]) -> Vec<Vec<AreaId>> {
    let num_areas = graph.areas.len();
    let mut adj: Vec<Vec<AreaId>> = vec![vec![]; num_areas];
    for edge in &graph.edges {
        if edge.kind != EdgeKind::Exit {
            continue;
        }
        let (f, t) = if edge.is_world {
            (edge.from.unwrap(), edge.to.unwrap())
        } else if edge.pair.is_some() {
            match edge.fixed_link {
                Some(fl) => (edge.area(), graph.edges[fl].area()),
                None => continue,
            }
        } else {
            continue;
        };
        if !core[f] && !core[t] {
            adj[f].push(t);
            adj[t].push(f);
        }
    }

    let mut clique_id = vec![usize::MAX; num_areas];
    let mut cliques: Vec<Vec<AreaId>> = vec![];
    for a in 0..num_areas {
        if core[a] || clique_id[a] != usize::MAX {
            continue;
        }
        let c = cliques.len();
        cliques.push(vec![]);
        clique_id[a] = c;
        let mut stack = vec![a];
        while let Some(x) = stack.pop() {
            cliques[c].push(x);
            for &b in &adj[x] {
                if clique_id[b] == usize::MAX {
                    clique_id[b] = c;
                    stack.push(b);
                }
            }
        }
        cliques[c].sort_unstable();
    }
    cliques
}

fn dangling_paired(graph: &Graph, areas: &[AreaId], kind: EdgeKind) -> Vec<EdgeId> {
    let mut out = vec![];
    for &a in areas {
        let list = match kind {
            EdgeKind::Exit => &graph.nodes[a].to,
            EdgeKind::Entrance => &graph.nodes[a].from,
        };
        for &e in list {
            let edge = &graph.edges[e];
            if edge.kind == kind
                && edge.pair.is_some()
                && edge.link.is_none()
                && !edge.is_world
                && !edge.has_tag(TAG_UNLINKED)
            {
                out.push(e);
            }
        }
    }
    out
}

/// Connects each periphery clique to a core root component holding at least
/// as many free dangling pair-edges as the clique's boundary, preferring
/// components the clique already touches through a boundary world edge, then
/// components tied to pseudo-core boundary requirements. Cliques that cannot
/// be placed leave their edges for stable matching.
pub fn attach_cliques<R: Rng>(
    graph: &mut Graph,
    rng: &mut R,
    core: &[bool],
    boundary: &HashMap<AreaId, Vec<EdgeId>>,
    pseudo_core_targets: &HashSet<AreaId>,
    comp: &ComponentData,
) {
    let cliques = periphery_cliques(graph, core);
    for clique in &cliques {
        let members: HashSet<AreaId> = clique.iter().copied().collect();

        // Connections internal to the clique go back to their original links;
        // only edges crossing the clique boundary are re-routed.
        for e in dangling_paired(graph, clique, EdgeKind::Exit) {
            let Some(fl) = graph.edges[e].fixed_link else {
                continue;
            };
            if members.contains(&graph.edges[fl].area())
                && graph.edges[e].link.is_none()
                && graph.edges[fl].link.is_none()
            {
                graph.connect(e, fl);
            }
        }

        let mut clique_exits: Vec<EdgeId> = dangling_paired(graph, clique, EdgeKind::Exit)
            .into_iter()
            .filter(|&e| match graph.edges[e].fixed_link {
                Some(fl) => !members.contains(&graph.edges[fl].area()),
                None => true,
            })
            .collect();
        if clique_exits.is_empty() {
            continue;
        }
        clique_exits.shuffle(rng);

        // Components this clique already touches through a world boundary
        // edge are the most natural hosts.
        let mut anchors: HashSet<usize> = HashSet::new();
        for &a in clique {
            for &e in boundary.get(&a).into_iter().flatten() {
                let edge = &graph.edges[e];
                let (Some(f), Some(t)) = (edge.from, edge.to) else {
                    continue;
                };
                let interior = if core[f] { f } else { t };
                if comp.component[interior] != usize::MAX {
                    anchors.insert(comp.component[interior]);
                }
            }
        }

        let mut comp_order: Vec<usize> = (0..comp.comp_areas.len()).collect();
        comp_order.shuffle(rng);
        // Stable sort keeps the shuffled order within each preference class:
        comp_order.sort_by_key(|&c| {
            (
                !anchors.contains(&c),
                !comp.comp_areas[c]
                    .iter()
                    .any(|a| pseudo_core_targets.contains(a)),
            )
        });

        let mut attached = false;
        for &c in &comp_order {
            let mut free_entrances = dangling_paired(graph, &comp.comp_areas[c], EdgeKind::Entrance);
            if free_entrances.len() < clique_exits.len() {
                continue;
            }
            free_entrances.shuffle(rng);
            for (&x, &e) in clique_exits.iter().zip(free_entrances.iter()) {
                graph.connect(x, e);
            }
            attached = true;
            break;
        }
        if !attached {
            warn!(
                "no root component can host clique of {} areas; {} edges left for stable matching",
                clique.len(),
                clique_exits.len()
            );
        }
    }
}

/// Scores a candidate origin/destination pairing for the stable-matching
/// fallback. Same component is best, then destinations dominated by the
/// origin, then previously-visited destinations; anything else is penalized
/// by ancestor-path length and boss-gated hops crossed.
pub fn match_score(
    graph: &Graph,
    comp: &ComponentData,
    visited: &[bool],
    origin: EdgeId,
    dest: EdgeId,
) -> i32 {
    let oa = graph.edges[origin].area();
    let da = graph.edges[dest].area();
    let oc = comp.component[oa];
    let dc = comp.component[da];
    if oc != usize::MAX && oc == dc {
        return 100;
    }
    if oc != usize::MAX && dc != usize::MAX && comp.dominators[dc].contains(&oc) {
        return 50;
    }
    if visited[da] {
        return 25;
    }
    if oc != usize::MAX && dc != usize::MAX {
        if let Some(cost) = comp_path_cost(graph, comp, oc, dc) {
            return -(cost as i32);
        }
    }
    -50
}

/// Cheapest path cost between components over the condensed graph; each hop
/// costs 1, entering a component holding a boss area costs 4 more.
fn comp_path_cost(graph: &Graph, comp: &ComponentData, from: usize, to: usize) -> Option<usize> {
    let num_comps = comp.comp_areas.len();
    let has_boss: Vec<bool> = (0..num_comps)
        .map(|c| {
            comp.comp_areas[c]
                .iter()
                .any(|&a| graph.area_has_tag(a, TAG_BOSS))
        })
        .collect();
    let mut dist: Vec<Option<usize>> = vec![None; num_comps];
    let mut heap: BinaryHeap<Reverse<(usize, usize)>> = BinaryHeap::new();
    dist[from] = Some(0);
    heap.push(Reverse((0, from)));
    while let Some(Reverse((d, c))) = heap.pop() {
        if dist[c] != Some(d) {
            continue;
        }
        if c == to {
            return Some(d);
        }
        for &s in &comp.root_succs[c] {
            let step = if has_boss[s] { 5 } else { 1 };
            let nd = d + step;
            if dist[s].map_or(true, |old| nd < old) {
                dist[s] = Some(nd);
                heap.push(Reverse((nd, s)));
            }
        }
    }
    None
}

/// Deferred-acceptance matching: origins propose in descending score order;
/// a destination holds its best proposal and displaces a lower-ranked one.
/// Returns (origin, destination, score) triples.
pub fn stable_match<F: Fn(EdgeId, EdgeId) -> i32>(
    origins: &[EdgeId],
    dests: &[EdgeId],
    score: F,
) -> Vec<(EdgeId, EdgeId, i32)> {
    let prefs: Vec<Vec<(i32, usize)>> = origins
        .iter()
        .map(|&o| {
            let mut p: Vec<(i32, usize)> = dests
                .iter()
                .enumerate()
                .map(|(di, &d)| (score(o, d), di))
                .collect();
            p.sort_by_key(|&(s, di)| (Reverse(s), di));
            p
        })
        .collect();
    let mut next: Vec<usize> = vec![0; origins.len()];
    let mut engaged: Vec<Option<(usize, i32)>> = vec![None; dests.len()];
    let mut free: Vec<usize> = (0..origins.len()).rev().collect();
    while let Some(oi) = free.pop() {
        while next[oi] < prefs[oi].len() {
            let (s, di) = prefs[oi][next[oi]];
            next[oi] += 1;
            match engaged[di] {
                None => {
                    engaged[di] = Some((oi, s));
                    break;
                }
                Some((other, other_s)) => {
                    if s > other_s {
                        engaged[di] = Some((oi, s));
                        free.push(other);
                        break;
                    }
                }
            }
        }
    }
    let mut out = vec![];
    for (di, slot) in engaged.iter().enumerate() {
        if let Some((oi, s)) = slot {
            out.push((origins[*oi], dests[di], *s));
        }
    }
    out.sort_unstable();
    out
}
