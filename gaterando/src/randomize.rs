pub mod components;

use crate::settings::RandomizerSettings;
use crate::traverse::{area_tiers, is_area_mandatory, traverse, TraverseMode, TraverseResult};
use components::{attach_cliques, compute_components, match_score, stable_match};
use gaterando_game::{
    AreaId, EdgeId, EdgeKind, Graph, TAG_BOSS, TAG_OPEN_ONLY, TAG_OVERWORLD, TAG_UNLINKED,
};
use hashbrown::{HashMap, HashSet};
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_derive::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RandomizeError {
    #[error(
        "seed {seed} is unsolvable: unreachable areas {unreached_areas:?}; missing items {missing_items:?}"
    )]
    Unsolvable {
        seed: usize,
        unreached_areas: Vec<String>,
        missing_items: Vec<String>,
    },
    #[error(transparent)]
    Config(#[from] anyhow::Error),
}

#[derive(Clone, Debug, Serialize)]
pub struct LinkSummary {
    pub name: String,
    pub from: String,
    pub to: String,
}

#[derive(Clone)]
pub struct Randomization {
    pub seed: usize,
    pub graph: Graph,
    /// Per-area difficulty tier from boss BFS distance order; `None` for
    /// unreached optional areas.
    pub tiers: Vec<Option<usize>>,
    pub links: Vec<LinkSummary>,
}

pub struct CoreMarking {
    pub core: Vec<bool>,
    /// Periphery area -> world edges crossing between it and core territory.
    pub boundary: HashMap<AreaId, Vec<EdgeId>>,
    /// Core areas adjacent to a periphery boundary; entry into these must
    /// stay guaranteed even though the periphery side is optional.
    pub pseudo_core_targets: HashSet<AreaId>,
}

/// Marks mandatory ("core") areas: those flagged mandatory plus anything on a
/// satisfiable world-edge path leading into one. Gating is judged without
/// leaving core territory, so the pass iterates to a fixed point as the set
/// grows.
pub fn mark_core_areas(graph: &Graph, start: AreaId) -> CoreMarking {
    let num_areas = graph.areas.len();
    let mut core = vec![false; num_areas];
    core[start] = true;
    for a in 0..num_areas {
        if is_area_mandatory(graph, a) {
            core[a] = true;
        }
    }
    loop {
        let mut progress = false;
        for a in 0..num_areas {
            if !core[a] {
                continue;
            }
            for &e in &graph.nodes[a].from {
                let edge = &graph.edges[e];
                if !edge.is_world || edge.has_tag(TAG_OPEN_ONLY) {
                    continue;
                }
                let Some(from) = edge.from else { continue };
                if core[from] {
                    continue;
                }
                let satisfiable = match &edge.linked_expr {
                    None => true,
                    Some(expr) => expr.satisfied(&|name: &str| {
                        if let Some(&item_area) = graph.item_areas.get(name) {
                            core[item_area]
                        } else if let Some(&aid) = graph.area_isv.index_by_key.get(name) {
                            core[aid]
                        } else {
                            false
                        }
                    }),
                };
                if satisfiable {
                    core[from] = true;
                    progress = true;
                }
            }
        }
        if !progress {
            break;
        }
    }

    let mut boundary: HashMap<AreaId, Vec<EdgeId>> = HashMap::new();
    let mut pseudo_core_targets = HashSet::new();
    for (e, edge) in graph.edges.iter().enumerate() {
        if !edge.is_world {
            continue;
        }
        let (Some(f), Some(t)) = (edge.from, edge.to) else {
            continue;
        };
        if core[f] != core[t] {
            let (periphery, interior) = if core[f] { (t, f) } else { (f, t) };
            boundary.entry(periphery).or_default().push(e);
            pseudo_core_targets.insert(interior);
        }
    }
    CoreMarking {
        core,
        boundary,
        pseudo_core_targets,
    }
}

/// Connects every unlinked non-world edge whose original (fixed) link is
/// still self-consistent, i.e. both sides remain free.
fn propagate_fixed_links(graph: &mut Graph) {
    for e in 0..graph.edges.len() {
        let edge = &graph.edges[e];
        if edge.kind != EdgeKind::Exit || edge.is_world || !edge.is_fixed {
            continue;
        }
        if edge.link.is_some() {
            continue;
        }
        let Some(fl) = edge.fixed_link else { continue };
        if graph.edges[fl].link.is_none() {
            graph.connect(e, fl);
        }
    }
}

fn is_randomizable_dangling(graph: &Graph, e: EdgeId) -> bool {
    let edge = &graph.edges[e];
    edge.link.is_none() && !edge.is_world && !edge.is_fixed && !edge.has_tag(TAG_UNLINKED)
}

pub struct Randomizer<'a> {
    pub base_graph: &'a Graph,
    pub settings: &'a RandomizerSettings,
}

impl Randomizer<'_> {
    /// Top-level entry point: produces a fully resolved graph for `seed`, or
    /// an `Unsolvable` error carrying the unreached areas and missing items.
    pub fn connect(&self, seed: usize) -> Result<Randomization, RandomizeError> {
        let mut rng_seed = [0u8; 32];
        rng_seed[..8].copy_from_slice(&seed.to_le_bytes());
        let mut rng = rand::rngs::StdRng::from_seed(rng_seed);

        let mut graph = self.base_graph.clone();
        let start = graph.lookup_area(&self.settings.start_area)?;
        let marking = mark_core_areas(&graph, start);
        info!(
            "[seed {seed}] {} core areas of {}",
            marking.core.iter().filter(|&&c| c).count(),
            graph.areas.len()
        );

        // (a) Propagate self-consistent fixed links.
        propagate_fixed_links(&mut graph);

        // (b) Random matching over core edges, then core-only repair.
        self.connect_edges(&mut graph, &mut rng, &marking.core, seed)?;
        self.repair_unreachable(
            &mut graph,
            start,
            &marking,
            true,
            self.settings.core_retry_limit,
            seed,
        )?;

        // (c) Component analysis over core territory; attach periphery cliques.
        let comp_core = compute_components(&graph, start, Some(&marking.core));
        info!(
            "[seed {seed}] {} root components among core areas",
            comp_core.comp_areas.len()
        );
        attach_cliques(
            &mut graph,
            &mut rng,
            &marking.core,
            &marking.boundary,
            &marking.pseudo_core_targets,
            &comp_core,
        );

        // (d) Stable matching for leftover edges.
        self.stable_match_phase(&mut graph, start, seed);

        // (e) General repair for remaining optional-area gaps.
        self.repair_unreachable(
            &mut graph,
            start,
            &marking,
            false,
            self.settings.general_retry_limit,
            seed,
        )?;

        // (f) Early-checkpoint relocation post-check.
        self.relocate_early_checkpoint(&mut graph, &mut rng, start, seed);

        let full = traverse(&graph, start, TraverseMode::Full);
        let unreached_mandatory: Vec<String> = sorted_area_names(&graph, &full.unvisited_areas)
            .into_iter()
            .filter(|name| {
                let id = graph.area_isv.index_by_key[name];
                is_area_mandatory(&graph, id)
            })
            .collect();
        if !unreached_mandatory.is_empty() {
            return Err(RandomizeError::Unsolvable {
                seed,
                unreached_areas: unreached_mandatory,
                missing_items: sorted_items(&full),
            });
        }

        let tiers = area_tiers(&graph, &full, TAG_BOSS);
        let mut links = vec![];
        for edge in &graph.edges {
            if edge.kind != EdgeKind::Exit || edge.is_world {
                continue;
            }
            if let (Some(f), Some(t)) = (edge.from, edge.to) {
                links.push(LinkSummary {
                    name: edge.name.clone(),
                    from: graph.area_name(f).to_string(),
                    to: graph.area_name(t).to_string(),
                });
            }
        }
        info!("[seed {seed}] resolved {} randomized links", links.len());
        Ok(Randomization {
            seed,
            graph,
            tiers,
            links,
        })
    }

    /// Initial random bipartite matching of dangling core edges: paired and
    /// unpaired groups are shuffled and matched independently. Edges reserved
    /// for the periphery stay dangling for clique attachment / stable
    /// matching.
    fn connect_edges<R: Rng>(
        &self,
        graph: &mut Graph,
        rng: &mut R,
        core: &[bool],
        seed: usize,
    ) -> Result<(), RandomizeError> {
        // Edges whose original link led into periphery stay reserved as
        // capacity for clique attachment.
        let reserved = |graph: &Graph, e: EdgeId| match graph.edges[e].fixed_link {
            Some(fl) => !core[graph.edges[fl].area()],
            None => false,
        };
        let mut paired_exits = vec![];
        let mut paired_entrances = vec![];
        let mut unpaired_exits = vec![];
        let mut unpaired_entrances = vec![];
        for e in 0..graph.edges.len() {
            if !is_randomizable_dangling(graph, e)
                || !core[graph.edges[e].area()]
                || reserved(graph, e)
            {
                continue;
            }
            match (graph.edges[e].kind, graph.edges[e].pair.is_some()) {
                (EdgeKind::Exit, true) => paired_exits.push(e),
                (EdgeKind::Entrance, true) => paired_entrances.push(e),
                (EdgeKind::Exit, false) => unpaired_exits.push(e),
                (EdgeKind::Entrance, false) => unpaired_entrances.push(e),
            }
        }
        info!(
            "[seed {seed}] matching {} paired and {} unpaired core exits",
            paired_exits.len(),
            unpaired_exits.len()
        );
        match_group(graph, rng, paired_exits, paired_entrances)?;
        match_group(graph, rng, unpaired_exits, unpaired_entrances)?;
        Ok(())
    }

    /// One phase of the iterative repair loop: keep swapping redundant
    /// reachable exits onto entrances of unreached areas until every target
    /// area is reachable or the retry budget runs out.
    fn repair_unreachable(
        &self,
        graph: &mut Graph,
        start: AreaId,
        marking: &CoreMarking,
        core_only: bool,
        budget: usize,
        seed: usize,
    ) -> Result<(), RandomizeError> {
        let mut last_used: HashMap<EdgeId, usize> = HashMap::new();
        let mut hopeless: HashSet<AreaId> = HashSet::new();
        for round in 0..budget {
            let result = traverse(graph, start, TraverseMode::Partial);
            for rec in result.records.values() {
                for &(e, _) in &rec.incoming {
                    last_used.insert(e, round);
                }
            }
            let mut targets: Vec<AreaId> = result
                .unvisited_areas
                .iter()
                .copied()
                .filter(|&a| !hopeless.contains(&a))
                .filter(|&a| !core_only || marking.core[a])
                .collect();
            targets.sort_unstable();
            if targets.is_empty() {
                return Ok(());
            }
            // Areas gated on items from still-unreached areas go first; fixing
            // those cascades.
            targets.sort_by_key(|&a| !has_unreached_item_prereq(graph, a, &result));
            let target = targets[0];

            let Some(entrance) = pick_target_entrance(graph, target) else {
                if is_area_mandatory(graph, target) || (core_only && marking.core[target]) {
                    return Err(RandomizeError::Unsolvable {
                        seed,
                        unreached_areas: vec![graph.area_name(target).to_string()],
                        missing_items: sorted_items(&result),
                    });
                }
                warn!(
                    "[seed {seed}] optional area {} has no usable entrance; skipping",
                    graph.area_name(target)
                );
                hopeless.insert(target);
                continue;
            };
            let current_partner = graph.edges[entrance].link;
            let Some(exit) = find_redundant_exit(graph, &result, &last_used, current_partner)
            else {
                if is_area_mandatory(graph, target) || (core_only && marking.core[target]) {
                    return Err(RandomizeError::Unsolvable {
                        seed,
                        unreached_areas: sorted_area_names(&graph, &result.unvisited_areas),
                        missing_items: sorted_items(&result),
                    });
                }
                warn!(
                    "[seed {seed}] no spare exit to reroute into optional area {}; skipping",
                    graph.area_name(target)
                );
                hopeless.insert(target);
                continue;
            };
            info!(
                "[seed {seed}] repair {}: {} -> {}",
                round, graph.edges[exit].name, graph.edges[entrance].name
            );
            graph.swap_connected_edges(exit, entrance);
        }

        let result = traverse(graph, start, TraverseMode::Partial);
        let unreached: Vec<AreaId> = result
            .unvisited_areas
            .iter()
            .copied()
            .filter(|&a| {
                if core_only {
                    marking.core[a]
                } else {
                    is_area_mandatory(graph, a)
                }
            })
            .collect();
        if unreached.is_empty() {
            warn!("[seed {seed}] retry budget spent with optional gaps remaining");
            return Ok(());
        }
        Err(RandomizeError::Unsolvable {
            seed,
            unreached_areas: sorted_area_names(&graph, &unreached.into_iter().collect()),
            missing_items: sorted_items(&result),
        })
    }

    /// Resolves whatever edges are still dangling after clique attachment
    /// with deferred-acceptance matching, duplicating a destination's
    /// incoming capacity instead of accepting a below-threshold match.
    fn stable_match_phase(&self, graph: &mut Graph, start: AreaId, seed: usize) {
        let comp = compute_components(graph, start, None);
        let trav = traverse(graph, start, TraverseMode::Partial);
        let mut origins = vec![];
        let mut dests = vec![];
        for e in 0..graph.edges.len() {
            if !is_randomizable_dangling(graph, e) {
                continue;
            }
            match graph.edges[e].kind {
                EdgeKind::Exit => origins.push(e),
                EdgeKind::Entrance => dests.push(e),
            }
        }
        if origins.is_empty() && dests.is_empty() {
            return;
        }
        info!(
            "[seed {seed}] stable matching {} exits against {} entrances",
            origins.len(),
            dests.len()
        );
        let matches = stable_match(&origins, &dests, |o, d| {
            match_score(graph, &comp, &trav.visited, o, d)
        });
        for (o, d, s) in matches {
            if graph.edges[o].link.is_some() || graph.edges[d].link.is_some() {
                continue; // resolved by an earlier match's pair propagation
            }
            if s >= self.settings.stable_match_threshold {
                graph.connect(o, d);
            } else {
                info!(
                    "[seed {seed}] match score {s} below threshold; duplicating entrance {}",
                    graph.edges[d].name
                );
                let dup = graph.duplicate_entrance(d);
                graph.connect(o, dup);
            }
        }
        self.resolve_stragglers(graph, seed);

        // Strict forward validation after duplication fixes:
        let full = traverse(graph, start, TraverseMode::Full);
        info!(
            "[seed {seed}] post-matching traverse: {} areas unreached",
            full.unvisited_areas.len()
        );
    }

    /// Falls back to the original fixed link or a self-linked pair for edges
    /// no phase managed to place. Optional leftovers may stay dangling.
    fn resolve_stragglers(&self, graph: &mut Graph, seed: usize) {
        let num_edges = graph.edges.len();
        for e in 0..num_edges {
            if !is_randomizable_dangling(graph, e) || graph.edges[e].kind != EdgeKind::Exit {
                continue;
            }
            if let Some(fl) = graph.edges[e].fixed_link {
                if graph.edges[fl].link.is_none() {
                    graph.connect(e, fl);
                    continue;
                }
                let dup = graph.duplicate_entrance(fl);
                graph.connect(e, dup);
                continue;
            }
            if let Some(p) = graph.edges[e].pair {
                if graph.edges[p].link.is_none() {
                    graph.connect(e, p);
                    continue;
                }
            }
            warn!("[seed {seed}] exit {} left dangling", graph.edges[e].name);
        }
        for e in 0..num_edges {
            if !is_randomizable_dangling(graph, e) || graph.edges[e].kind != EdgeKind::Entrance {
                continue;
            }
            if let Some(fl) = graph.edges[e].fixed_link {
                if graph.edges[fl].link.is_none() {
                    graph.connect(fl, e);
                    continue;
                }
            }
            if let Some(p) = graph.edges[e].pair {
                if graph.edges[p].link.is_none() {
                    graph.connect(p, e);
                    continue;
                }
            }
            warn!(
                "[seed {seed}] entrance {} left dangling",
                graph.edges[e].name
            );
        }
    }

    /// One-time post-check: if the designated early checkpoint lands too deep
    /// in the dependency order, swap its incoming links with a same-in-degree
    /// area visited earlier. The first candidate that keeps every mandatory
    /// area reachable wins; otherwise the swap is undone.
    fn relocate_early_checkpoint<R: Rng>(
        &self,
        graph: &mut Graph,
        rng: &mut R,
        start: AreaId,
        seed: usize,
    ) {
        let Some(name) = &self.settings.early_checkpoint else {
            return;
        };
        let Ok(checkpoint) = graph.lookup_area(name) else {
            warn!("[seed {seed}] early checkpoint {name} is not a known area");
            return;
        };
        let full = traverse(graph, start, TraverseMode::Full);
        let Some(rec) = full.records.get(&checkpoint) else {
            return;
        };
        let checkpoint_dist = rec.distance;
        if checkpoint_dist <= self.settings.early_checkpoint_max_tier {
            return;
        }
        let checkpoint_in = swappable_entrances(graph, checkpoint);
        if checkpoint_in.is_empty() {
            return;
        }

        let mut candidates: Vec<AreaId> = (0..graph.areas.len())
            .filter(|&a| a != checkpoint && a != start)
            .filter(|&a| {
                full.records
                    .get(&a)
                    .is_some_and(|r| r.distance < checkpoint_dist)
            })
            .filter(|&a| swappable_entrances(graph, a).len() == checkpoint_in.len())
            .collect();
        candidates.shuffle(rng);

        for cand in candidates {
            let cand_in = swappable_entrances(graph, cand);
            for i in 0..checkpoint_in.len() {
                if let Some(feeder) = graph.edges[cand_in[i]].link {
                    graph.swap_connected_edges(feeder, checkpoint_in[i]);
                }
            }
            let check = traverse(graph, start, TraverseMode::Full);
            let mandatory_ok = (0..graph.areas.len())
                .filter(|&a| is_area_mandatory(graph, a))
                .all(|a| check.visited[a]);
            let improved = check
                .records
                .get(&checkpoint)
                .is_some_and(|r| r.distance < checkpoint_dist);
            if mandatory_ok && improved {
                info!(
                    "[seed {seed}] relocated checkpoint {} by swapping with {}",
                    name,
                    graph.area_name(cand)
                );
                return;
            }
            // Undo and try the next candidate.
            for i in 0..checkpoint_in.len() {
                if let Some(feeder) = graph.edges[checkpoint_in[i]].link {
                    graph.swap_connected_edges(feeder, cand_in[i]);
                }
            }
        }
    }
}

/// Matches exits to entrances from the front of two shuffled lists, avoiding
/// the degenerate self-match and, where possible, chains of overworld areas.
fn match_group<R: Rng>(
    graph: &mut Graph,
    rng: &mut R,
    mut exits: Vec<EdgeId>,
    mut entrances: Vec<EdgeId>,
) -> Result<(), RandomizeError> {
    if exits.len() != entrances.len() {
        // Every connection definition contributes one edge to each side, so
        // an imbalance here means the catalog itself is malformed.
        return Err(RandomizeError::Config(anyhow::anyhow!(
            "unbalanced matching groups: {} exits vs {} entrances",
            exits.len(),
            entrances.len()
        )));
    }
    exits.shuffle(rng);
    entrances.shuffle(rng);
    while !exits.is_empty() && !entrances.is_empty() {
        let exit = exits.remove(0);
        let exit_overworld = graph.area_has_tag(graph.edges[exit].area(), TAG_OVERWORLD);
        let mut chosen: Option<usize> = None;
        for (i, &ent) in entrances.iter().enumerate() {
            if graph.edges[exit].pair == Some(ent) {
                continue;
            }
            if exit_overworld && graph.area_has_tag(graph.edges[ent].area(), TAG_OVERWORLD) {
                continue;
            }
            chosen = Some(i);
            break;
        }
        if chosen.is_none() {
            // No anti-clustering candidate; accept the first compatible one.
            chosen = entrances
                .iter()
                .position(|&ent| graph.edges[exit].pair != Some(ent));
        }
        if chosen.is_none() {
            // Self-pairing is the last resort.
            chosen = entrances
                .iter()
                .position(|&ent| graph.edges[exit].pair == Some(ent));
        }
        let Some(i) = chosen else {
            return Err(RandomizeError::Config(anyhow::anyhow!(
                "no legal entrance partner for exit {}",
                graph.edges[exit].name
            )));
        };
        let entrance = entrances.remove(i);
        graph.connect(exit, entrance);
        // Pair propagation may have consumed partners still in our lists:
        exits.retain(|&x| graph.edges[x].link.is_none());
        entrances.retain(|&x| graph.edges[x].link.is_none());
    }
    Ok(())
}

/// True if some entrance into `area` is gated on an item granted by an area
/// that is itself still unreached.
fn has_unreached_item_prereq(graph: &Graph, area: AreaId, result: &TraverseResult) -> bool {
    for &e in &graph.nodes[area].from {
        let Some(expr) = &graph.edges[e].expr else {
            continue;
        };
        let mut names = vec![];
        expr.leaves(&mut names);
        for name in names {
            if let Some(&item_area) = graph.item_areas.get(name) {
                if !result.visited[item_area] {
                    return true;
                }
            }
        }
    }
    false
}

/// Chooses the incoming edge to rewire for an unreached area: dangling before
/// linked, unconditional before gated, lowest id as the tie-break.
fn pick_target_entrance(graph: &Graph, area: AreaId) -> Option<EdgeId> {
    let mut candidates: Vec<EdgeId> = graph.nodes[area]
        .from
        .iter()
        .copied()
        .filter(|&e| {
            let edge = &graph.edges[e];
            edge.kind == EdgeKind::Entrance
                && !edge.is_world
                && !edge.is_fixed
                && !edge.has_tag(TAG_UNLINKED)
        })
        .collect();
    candidates.sort_by_key(|&e| {
        (
            graph.edges[e].link.is_some(),
            graph.edges[e].expr.is_some(),
            e,
        )
    });
    candidates.first().copied()
}

/// Finds the safest reachable exit to sacrifice: one whose current target has
/// more than one other way in, preferring the target with the most incoming
/// links. Falls back to the least-recently-used reachable exit.
fn find_redundant_exit(
    graph: &Graph,
    result: &TraverseResult,
    last_used: &HashMap<EdgeId, usize>,
    skip: Option<EdgeId>,
) -> Option<EdgeId> {
    let linked_incoming = |area: AreaId| -> usize {
        graph.nodes[area]
            .from
            .iter()
            .filter(|&&e| graph.edges[e].link.is_some())
            .count()
    };
    let mut best: Option<(usize, EdgeId)> = None;
    let mut fallback: Vec<EdgeId> = vec![];
    for &area in &result.visit_order {
        for &e in &graph.nodes[area].to {
            let edge = &graph.edges[e];
            if edge.link.is_none() || edge.is_world || edge.is_fixed {
                continue;
            }
            if Some(e) == skip {
                // Already feeding the target entrance; swapping it in again
                // would be a no-op.
                continue;
            }
            let Some(to) = edge.to else { continue };
            fallback.push(e);
            let incoming = linked_incoming(to);
            if incoming > 1 {
                let better = match best {
                    None => true,
                    Some((count, id)) => incoming > count || (incoming == count && e < id),
                };
                if better {
                    best = Some((incoming, e));
                }
            }
        }
    }
    if let Some((_, e)) = best {
        return Some(e);
    }
    fallback.sort_by_key(|&e| (last_used.get(&e).copied().unwrap_or(0), e));
    fallback.first().copied()
}

fn swappable_entrances(graph: &Graph, area: AreaId) -> Vec<EdgeId> {
    graph.nodes[area]
        .from
        .iter()
        .copied()
        .filter(|&e| {
            let edge = &graph.edges[e];
            edge.link.is_some() && !edge.is_world && !edge.is_fixed
        })
        .collect()
}

fn sorted_area_names(graph: &Graph, areas: &HashSet<AreaId>) -> Vec<String> {
    let mut names: Vec<String> = areas
        .iter()
        .map(|&a| graph.area_name(a).to_string())
        .collect();
    names.sort();
    names
}

fn sorted_items(result: &TraverseResult) -> Vec<String> {
    let mut items: Vec<String> = result.unvisited_items.iter().cloned().collect();
    items.sort();
    items
}
