// The changes suggested by this lint usually make the code more cluttered and less clear:
#![allow(clippy::needless_range_loop)]

use anyhow::{bail, ensure, Result};
use hashbrown::{HashMap, HashSet};
use log::warn;
use serde::{Deserialize, Serialize};
use strum_macros::{EnumString, VariantNames};

pub type AreaId = usize; // Index into Graph.areas / WorldData.areas
pub type EdgeId = usize; // Index into Graph.edges

// Edge/area tags with meaning to the randomizer. Tags are free-form strings in the
// catalog; anything not listed here is carried through untouched.
pub const TAG_OVERWORLD: &str = "overworld"; // large open area; avoid chaining these together
pub const TAG_OPEN_ONLY: &str = "open_only"; // edge ignored by core classification
pub const TAG_BOSS: &str = "boss"; // area holds a mandatory boss
pub const TAG_MANDATORY: &str = "mandatory"; // edge forces its area to be core
pub const TAG_UNLINKED: &str = "unlinked"; // edge intentionally left without a link

/// Interned area names: stable ids in insertion order plus reverse lookup.
#[derive(Default, Clone)]
pub struct IndexedVec {
    pub keys: Vec<String>,
    pub index_by_key: HashMap<String, usize>,
}

impl IndexedVec {
    pub fn add(&mut self, name: &str) -> usize {
        if let Some(&idx) = self.index_by_key.get(name) {
            return idx;
        }
        let idx = self.keys.len();
        self.index_by_key.insert(name.to_string(), idx);
        self.keys.push(name.to_string());
        idx
    }
}

/// Boolean gating formula over named propositions (items or areas).
///
/// `Free` and `Never` are the proven-true/false constants. `OrK(k, xs)` is
/// satisfied when at least `k` of its children are. Trees are immutable; the
/// `make_*` constructors flatten nested same-kind combinators, drop constant
/// subterms and deduplicate children, so a constructed tree is already in
/// simplified form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Free,
    Never,
    Leaf(String),
    And(Vec<Expr>),
    OrK(usize, Vec<Expr>),
}

impl Expr {
    pub fn make_and(exprs: Vec<Expr>) -> Expr {
        let mut out: Vec<Expr> = vec![];
        for e in exprs {
            match e {
                Expr::Never => return Expr::Never,
                Expr::Free => continue,
                Expr::And(xs) => {
                    for x in xs {
                        if !out.contains(&x) {
                            out.push(x);
                        }
                    }
                }
                x => {
                    if !out.contains(&x) {
                        out.push(x);
                    }
                }
            }
        }
        if out.is_empty() {
            Expr::Free
        } else if out.len() == 1 {
            out.into_iter().next().unwrap()
        } else {
            Expr::And(out)
        }
    }

    pub fn make_or_k(k: usize, exprs: Vec<Expr>) -> Expr {
        let mut k = k;
        let mut out: Vec<Expr> = vec![];
        for e in exprs {
            match e {
                Expr::Never => continue,
                Expr::Free => k = k.saturating_sub(1),
                Expr::OrK(1, xs) if k == 1 => {
                    for x in xs {
                        if !out.contains(&x) {
                            out.push(x);
                        }
                    }
                }
                x => {
                    if !out.contains(&x) {
                        out.push(x);
                    }
                }
            }
        }
        if k == 0 {
            Expr::Free
        } else if out.len() < k {
            Expr::Never
        } else if out.len() == k {
            // "at least k of k" degenerates to a conjunction:
            Expr::make_and(out)
        } else {
            Expr::OrK(k, out)
        }
    }

    /// Replaces every `Leaf(name)` with `repl`, rebuilding through the smart
    /// constructors so the result stays simplified.
    pub fn substitute(&self, name: &str, repl: &Expr) -> Expr {
        match self {
            Expr::Leaf(n) if n == name => repl.clone(),
            Expr::And(xs) => {
                Expr::make_and(xs.iter().map(|x| x.substitute(name, repl)).collect())
            }
            Expr::OrK(k, xs) => {
                Expr::make_or_k(*k, xs.iter().map(|x| x.substitute(name, repl)).collect())
            }
            other => other.clone(),
        }
    }

    pub fn simplify(&self) -> Expr {
        match self {
            Expr::And(xs) => Expr::make_and(xs.iter().map(|x| x.simplify()).collect()),
            Expr::OrK(k, xs) => Expr::make_or_k(*k, xs.iter().map(|x| x.simplify()).collect()),
            other => other.clone(),
        }
    }

    pub fn satisfied<F: Fn(&str) -> bool>(&self, test: &F) -> bool {
        match self {
            Expr::Free => true,
            Expr::Never => false,
            Expr::Leaf(n) => test(n),
            Expr::And(xs) => xs.iter().all(|x| x.satisfied(test)),
            Expr::OrK(k, xs) => xs.iter().filter(|x| x.satisfied(test)).count() >= *k,
        }
    }

    /// Collects the leaf proposition names appearing anywhere in the tree.
    pub fn leaves<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Leaf(n) => out.push(n),
            Expr::And(xs) | Expr::OrK(_, xs) => {
                for x in xs {
                    x.leaves(out);
                }
            }
            _ => {}
        }
    }
}

#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, EnumString, VariantNames, Serialize, Deserialize,
)]
pub enum EdgeKind {
    Exit,
    Entrance,
}

/// One side of a connection definition: the area it sits in, an optional
/// gating condition for using it, and free-form tags.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SideDef {
    pub area: String,
    #[serde(default)]
    pub expr: Option<Expr>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A door (two-sided, `a` and `b` interchangeable) or a warp (one-way, `a` is
/// the origin and `b` the destination). `name` is shared by both directions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionDef {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub fixed: bool,
    pub a: SideDef,
    pub b: SideDef,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Area {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub mandatory: bool,
    /// Items obtainable in this area; each grants the proposition of the same name.
    #[serde(default)]
    pub items: Vec<String>,
    /// Always-present connections out of this area ("world" edges, never randomized).
    #[serde(default)]
    pub to: Vec<SideDef>,
}

/// The full pre-built catalog, as produced by an external configuration loader.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WorldData {
    pub areas: Vec<Area>,
    #[serde(default)]
    pub doors: Vec<ConnectionDef>,
    #[serde(default)]
    pub warps: Vec<ConnectionDef>,
}

/// Unordered pair of areas, canonicalized; deduplication key for symmetric
/// warp definitions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Connection(pub AreaId, pub AreaId);

impl Connection {
    pub fn new(a: AreaId, b: AreaId) -> Self {
        if a <= b {
            Connection(a, b)
        } else {
            Connection(b, a)
        }
    }
}

/// One directed half of a connection point. `from` (for exits) or `to` (for
/// entrances) is the edge's home area, set at construction; the opposite
/// endpoint is set only while the edge is linked (or, for an unlinked pair
/// partner, propagated as a diagnostic by `connect`).
#[derive(Clone, Debug)]
pub struct Edge {
    pub kind: EdgeKind,
    pub name: String,
    pub tags: Vec<String>,
    pub from: Option<AreaId>,
    pub to: Option<AreaId>,
    pub expr: Option<Expr>,
    pub linked_expr: Option<Expr>,
    pub is_fixed: bool,
    pub is_world: bool,
    pub pair: Option<EdgeId>,
    pub link: Option<EdgeId>,
    pub fixed_link: Option<EdgeId>,
}

impl Edge {
    /// The edge's home area (the endpoint fixed at construction).
    pub fn area(&self) -> AreaId {
        match self.kind {
            EdgeKind::Exit => self.from.expect("exit edge missing home area"),
            EdgeKind::Entrance => self.to.expect("entrance edge missing home area"),
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Per-area bucket of edge ids. One per area, created at graph construction,
/// never destroyed.
#[derive(Clone, Debug, Default)]
pub struct Node {
    pub to: Vec<EdgeId>,
    pub from: Vec<EdgeId>,
}

#[derive(Clone)]
pub struct Graph {
    pub area_isv: IndexedVec,
    pub areas: Vec<Area>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// Item proposition name -> area granting it.
    pub item_areas: HashMap<String, AreaId>,
}

fn combine_link_expr(a: &Option<Expr>, b: &Option<Expr>) -> Option<Expr> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (Some(x), Some(y)) if x == y => Some(x.clone()),
        // Either side's condition suffices to use the resolved connection:
        (Some(x), Some(y)) => Some(Expr::make_or_k(1, vec![x.clone(), y.clone()])),
    }
}

impl Graph {
    pub fn build(world: &WorldData) -> Result<Graph> {
        let mut graph = Graph {
            area_isv: IndexedVec::default(),
            areas: vec![],
            nodes: vec![],
            edges: vec![],
            item_areas: HashMap::new(),
        };
        for area in &world.areas {
            ensure!(
                !graph.area_isv.index_by_key.contains_key(&area.name),
                "duplicate area name: {}",
                area.name
            );
            let id = graph.area_isv.add(area.name.as_str());
            let mut area = area.clone();
            if area.label.is_empty() {
                area.label = area.name.clone();
            }
            for item in &area.items {
                ensure!(
                    !graph.item_areas.contains_key(item),
                    "item {} granted by more than one area",
                    item
                );
                graph.item_areas.insert(item.clone(), id);
            }
            graph.areas.push(area);
            graph.nodes.push(Node::default());
        }

        // World edges: always-present, pre-linked, never randomized.
        for area_id in 0..graph.areas.len() {
            for side_idx in 0..graph.areas[area_id].to.len() {
                let side = graph.areas[area_id].to[side_idx].clone();
                let target = graph.lookup_area(&side.area)?;
                let name = format!("{}:{}", graph.areas[area_id].name, side.area);
                let exit = graph.new_edge(
                    area_id,
                    EdgeKind::Exit,
                    &name,
                    side.tags.clone(),
                    side.expr.clone(),
                    true,
                    true,
                );
                let entrance =
                    graph.new_edge(target, EdgeKind::Entrance, &name, side.tags, None, true, true);
                graph.connect(exit, entrance);
            }
        }

        for door in &world.doors {
            let (a_exit, a_entrance) = graph.add_paired_edges(&door.a, door)?;
            let (b_exit, b_entrance) = graph.add_paired_edges(&door.b, door)?;
            graph.edges[a_exit].fixed_link = Some(b_entrance);
            graph.edges[b_entrance].fixed_link = Some(a_exit);
            graph.edges[b_exit].fixed_link = Some(a_entrance);
            graph.edges[a_entrance].fixed_link = Some(b_exit);
        }

        let mut seen: HashSet<Connection> = HashSet::new();
        for warp in &world.warps {
            let from = graph.lookup_area(&warp.a.area)?;
            let to = graph.lookup_area(&warp.b.area)?;
            let key = Connection::new(from, to);
            if !seen.insert(key) {
                warn!("skipping symmetric duplicate warp {}", warp.name);
                continue;
            }
            let exit = graph.add_edge(&warp.a, warp, true)?;
            let entrance = graph.add_edge(&warp.b, warp, false)?;
            graph.edges[exit].fixed_link = Some(entrance);
            graph.edges[entrance].fixed_link = Some(exit);
        }
        Ok(graph)
    }

    pub fn lookup_area(&self, name: &str) -> Result<AreaId> {
        match self.area_isv.index_by_key.get(name) {
            Some(&id) => Ok(id),
            None => bail!("reference to unknown area: {}", name),
        }
    }

    pub fn area_name(&self, id: AreaId) -> &str {
        &self.area_isv.keys[id]
    }

    pub fn area_has_tag(&self, id: AreaId, tag: &str) -> bool {
        self.areas[id].tags.iter().any(|t| t == tag)
    }

    fn new_edge(
        &mut self,
        area: AreaId,
        kind: EdgeKind,
        name: &str,
        tags: Vec<String>,
        expr: Option<Expr>,
        is_fixed: bool,
        is_world: bool,
    ) -> EdgeId {
        let id = self.edges.len();
        let (from, to) = match kind {
            EdgeKind::Exit => (Some(area), None),
            EdgeKind::Entrance => (None, Some(area)),
        };
        self.edges.push(Edge {
            kind,
            name: name.to_string(),
            tags,
            from,
            to,
            expr,
            linked_expr: None,
            is_fixed,
            is_world,
            pair: None,
            link: None,
            fixed_link: None,
        });
        match kind {
            EdgeKind::Exit => self.nodes[area].to.push(id),
            EdgeKind::Entrance => self.nodes[area].from.push(id),
        }
        id
    }

    /// Creates one edge from a side descriptor and appends it to the owning
    /// node's `to` or `from` list.
    pub fn add_edge(&mut self, side: &SideDef, conn: &ConnectionDef, is_exit: bool) -> Result<EdgeId> {
        let area = self.lookup_area(&side.area)?;
        let kind = if is_exit {
            EdgeKind::Exit
        } else {
            EdgeKind::Entrance
        };
        let mut tags = conn.tags.clone();
        tags.extend(side.tags.iter().cloned());
        Ok(self.new_edge(area, kind, &conn.name, tags, side.expr.clone(), conn.fixed, false))
    }

    /// Creates both directions of one physical connection point and sets them
    /// as mutual pairs.
    pub fn add_paired_edges(
        &mut self,
        side: &SideDef,
        conn: &ConnectionDef,
    ) -> Result<(EdgeId, EdgeId)> {
        let exit = self.add_edge(side, conn, true)?;
        let entrance = self.add_edge(side, conn, false)?;
        self.set_pair(exit, entrance);
        Ok((exit, entrance))
    }

    pub fn set_pair(&mut self, a: EdgeId, b: EdgeId) {
        assert!(
            self.edges[a].kind != self.edges[b].kind,
            "pairing two edges of kind {:?} ({}, {})",
            self.edges[a].kind,
            self.edges[a].name,
            self.edges[b].name
        );
        self.edges[a].pair = Some(b);
        self.edges[b].pair = Some(a);
    }

    /// Links `exit` to `entrance`. If each edge has a distinct pair partner,
    /// the return direction of the door is completed at the same time, keeping
    /// a two-sided connection consistent.
    pub fn connect(&mut self, exit_id: EdgeId, entrance_id: EdgeId) {
        self.connect_inner(exit_id, entrance_id, true);
    }

    fn connect_inner(&mut self, exit_id: EdgeId, entrance_id: EdgeId, propagate: bool) {
        assert_eq!(
            self.edges[exit_id].kind,
            EdgeKind::Exit,
            "connect: {} is not an exit",
            self.edges[exit_id].name
        );
        assert_eq!(
            self.edges[entrance_id].kind,
            EdgeKind::Entrance,
            "connect: {} is not an entrance",
            self.edges[entrance_id].name
        );
        assert!(
            self.edges[exit_id].link.is_none(),
            "connect: exit {} already linked",
            self.edges[exit_id].name
        );
        assert!(
            self.edges[entrance_id].link.is_none(),
            "connect: entrance {} already linked",
            self.edges[entrance_id].name
        );
        let from = self.edges[exit_id].area();
        let to = self.edges[entrance_id].area();
        self.edges[exit_id].to = Some(to);
        self.edges[entrance_id].from = Some(from);
        self.edges[exit_id].link = Some(entrance_id);
        self.edges[entrance_id].link = Some(exit_id);
        let linked = combine_link_expr(&self.edges[exit_id].expr, &self.edges[entrance_id].expr);
        self.edges[exit_id].linked_expr = linked.clone();
        self.edges[entrance_id].linked_expr = linked;

        if propagate {
            let ep = self.edges[exit_id].pair.filter(|&p| p != entrance_id);
            let np = self.edges[entrance_id].pair.filter(|&p| p != exit_id);
            match (np, ep) {
                (Some(np), Some(ep))
                    if self.edges[np].link.is_none() && self.edges[ep].link.is_none() =>
                {
                    // Return direction of the door: exit out of `to` back into `from`.
                    self.connect_inner(np, ep, false);
                }
                _ => {
                    if let Some(ep) = ep {
                        if self.edges[ep].link.is_none() {
                            self.edges[ep].from = Some(to);
                        }
                    }
                    if let Some(np) = np {
                        if self.edges[np].link.is_none() {
                            self.edges[np].to = Some(from);
                        }
                    }
                }
            }
        }
    }

    /// Clears the link on `edge_id` (exit or entrance) and its partner. Also
    /// disconnects the pair partners' matching connection unless suppressed
    /// via `disconnect_single`.
    pub fn disconnect(&mut self, edge_id: EdgeId) {
        self.disconnect_inner(edge_id, true);
    }

    /// Like `disconnect` but without pair propagation.
    pub fn disconnect_single(&mut self, edge_id: EdgeId) {
        self.disconnect_inner(edge_id, false);
    }

    fn disconnect_inner(&mut self, edge_id: EdgeId, propagate: bool) {
        let (exit_id, entrance_id) = match self.edges[edge_id].kind {
            EdgeKind::Exit => (
                edge_id,
                self.edges[edge_id]
                    .link
                    .expect("disconnect: edge has no link"),
            ),
            EdgeKind::Entrance => (
                self.edges[edge_id]
                    .link
                    .expect("disconnect: edge has no link"),
                edge_id,
            ),
        };
        self.edges[exit_id].to = None;
        self.edges[exit_id].link = None;
        self.edges[exit_id].linked_expr = None;
        self.edges[entrance_id].from = None;
        self.edges[entrance_id].link = None;
        self.edges[entrance_id].linked_expr = None;

        if propagate {
            let ep = self.edges[exit_id].pair.filter(|&p| p != entrance_id);
            let np = self.edges[entrance_id].pair.filter(|&p| p != exit_id);
            if let Some(ep) = ep {
                if self.edges[ep].link.is_some() {
                    self.disconnect_inner(ep, false);
                } else {
                    self.edges[ep].from = None;
                }
            }
            if let Some(np) = np {
                if self.edges[np].link.is_some() {
                    self.disconnect_inner(np, false);
                } else {
                    self.edges[np].to = None;
                }
            }
        }
    }

    /// Detaches whatever `old_exit` and `new_entrance` were each connected to
    /// and reconnects `old_exit -> new_entrance`, reusing the displaced
    /// partners for each other when both remain free, self-linking a pair
    /// partner otherwise. Never leaves an edge half-linked.
    pub fn swap_connected_edges(&mut self, old_exit: EdgeId, new_entrance: EdgeId) {
        assert_eq!(self.edges[old_exit].kind, EdgeKind::Exit);
        assert_eq!(self.edges[new_entrance].kind, EdgeKind::Entrance);
        if self.edges[old_exit].link == Some(new_entrance) {
            return;
        }
        let old_entrance = self.edges[old_exit].link;
        let displaced_exit = self.edges[new_entrance].link;
        if self.edges[old_exit].link.is_some() {
            self.disconnect(old_exit);
        }
        if let Some(x) = displaced_exit {
            if self.edges[x].link.is_some() {
                self.disconnect(x);
            }
        }
        self.connect(old_exit, new_entrance);

        match (displaced_exit, old_entrance) {
            (Some(x), Some(e))
                if self.edges[x].link.is_none() && self.edges[e].link.is_none() =>
            {
                self.connect(x, e);
            }
            _ => {
                if let Some(x) = displaced_exit {
                    if self.edges[x].link.is_none() {
                        self.self_link_exit(x);
                    }
                }
                if let Some(e) = old_entrance {
                    if self.edges[e].link.is_none() {
                        self.self_link_entrance(e);
                    }
                }
            }
        }
    }

    fn self_link_exit(&mut self, exit_id: EdgeId) {
        if let Some(p) = self.edges[exit_id].pair {
            if self.edges[p].link.is_none() {
                self.connect(exit_id, p);
            }
        }
    }

    fn self_link_entrance(&mut self, entrance_id: EdgeId) {
        if let Some(p) = self.edges[entrance_id].pair {
            if self.edges[p].link.is_none() {
                self.connect(p, entrance_id);
            }
        }
    }

    /// Clones a new entrance into the same area as `edge_id`, increasing the
    /// area's incoming capacity. Used when a stable-matching result is too
    /// poor to accept.
    pub fn duplicate_entrance(&mut self, edge_id: EdgeId) -> EdgeId {
        assert_eq!(self.edges[edge_id].kind, EdgeKind::Entrance);
        let area = self.edges[edge_id].area();
        let name = format!("{} (dup)", self.edges[edge_id].name);
        let tags = self.edges[edge_id].tags.clone();
        let expr = self.edges[edge_id].expr.clone();
        self.new_edge(area, EdgeKind::Entrance, &name, tags, expr, false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn side(area: &str) -> SideDef {
        SideDef {
            area: area.to_string(),
            expr: None,
            tags: vec![],
        }
    }

    fn area(name: &str) -> Area {
        Area {
            name: name.to_string(),
            label: String::new(),
            tags: vec![],
            mandatory: false,
            items: vec![],
            to: vec![],
        }
    }

    fn warp(name: &str, from: &str, to: &str) -> ConnectionDef {
        ConnectionDef {
            name: name.to_string(),
            tags: vec![],
            fixed: false,
            a: side(from),
            b: side(to),
        }
    }

    #[test]
    fn test_area_index_reuse() {
        let mut isv = IndexedVec::default();
        assert_eq!(isv.add("a"), 0);
        assert_eq!(isv.add("b"), 1);
        assert_eq!(isv.add("a"), 0);
        assert_eq!(isv.keys, ["a", "b"]);
    }

    #[test]
    fn test_expr_simplify() {
        let e = Expr::make_and(vec![
            Expr::Free,
            Expr::Leaf("key".to_string()),
            Expr::And(vec![
                Expr::Leaf("key".to_string()),
                Expr::Leaf("sword".to_string()),
            ]),
        ]);
        assert_eq!(
            e,
            Expr::And(vec![
                Expr::Leaf("key".to_string()),
                Expr::Leaf("sword".to_string())
            ])
        );

        let e = Expr::make_or_k(1, vec![Expr::Never, Expr::Leaf("key".to_string())]);
        assert_eq!(e, Expr::Leaf("key".to_string()));

        let e = Expr::make_or_k(2, vec![Expr::Leaf("key".to_string()), Expr::Never]);
        assert_eq!(e, Expr::Never);

        let e = Expr::make_or_k(1, vec![Expr::Free, Expr::Leaf("key".to_string())]);
        assert_eq!(e, Expr::Free);
    }

    #[test]
    fn test_expr_substitute() {
        let e = Expr::OrK(
            1,
            vec![Expr::Leaf("a".to_string()), Expr::Leaf("b".to_string())],
        );
        assert_eq!(e.substitute("a", &Expr::Free), Expr::Free);
        assert_eq!(
            e.substitute("a", &Expr::Never),
            Expr::Leaf("b".to_string())
        );
    }

    #[test]
    fn test_expr_satisfied() {
        let e = Expr::OrK(
            2,
            vec![
                Expr::Leaf("a".to_string()),
                Expr::Leaf("b".to_string()),
                Expr::Leaf("c".to_string()),
            ],
        );
        assert!(e.satisfied(&|n| n == "a" || n == "c"));
        assert!(!e.satisfied(&|n| n == "b"));
    }

    #[test]
    fn test_connect_disconnect_round_trip() {
        let world = WorldData {
            areas: vec![area("a"), area("b")],
            doors: vec![],
            warps: vec![warp("w", "a", "b")],
        };
        let mut graph = Graph::build(&world).unwrap();
        let exit = graph.nodes[0].to[0];
        let entrance = graph.nodes[1].from[0];

        graph.connect(exit, entrance);
        assert_eq!(graph.edges[exit].link, Some(entrance));
        assert_eq!(graph.edges[entrance].link, Some(exit));
        assert_eq!(graph.edges[exit].to, Some(1));
        assert_eq!(graph.edges[entrance].from, Some(0));

        graph.disconnect(exit);
        assert_eq!(graph.edges[exit].link, None);
        assert_eq!(graph.edges[exit].to, None);
        assert_eq!(graph.edges[exit].linked_expr, None);
        assert_eq!(graph.edges[entrance].link, None);
        assert_eq!(graph.edges[entrance].from, None);
        assert_eq!(graph.edges[entrance].linked_expr, None);
        // Home endpoints survive:
        assert_eq!(graph.edges[exit].from, Some(0));
        assert_eq!(graph.edges[entrance].to, Some(1));
    }

    #[test]
    fn test_paired_connect_completes_return_direction() {
        let world = WorldData {
            areas: vec![area("a"), area("b")],
            doors: vec![warp("door", "a", "b")],
            warps: vec![],
        };
        let mut graph = Graph::build(&world).unwrap();
        let a_exit = graph.nodes[0].to[0];
        let a_entrance = graph.edges[a_exit].pair.unwrap();
        let b_entrance = graph.nodes[1].from[0];
        let b_exit = graph.edges[b_entrance].pair.unwrap();

        graph.connect(a_exit, b_entrance);
        assert_eq!(graph.edges[a_exit].link, Some(b_entrance));
        assert_eq!(graph.edges[b_exit].link, Some(a_entrance));
        assert_eq!(graph.edges[b_exit].to, Some(0));
        assert_eq!(graph.edges[a_entrance].from, Some(1));

        graph.disconnect(a_exit);
        for &e in &[a_exit, a_entrance, b_exit, b_entrance] {
            assert_eq!(graph.edges[e].link, None);
            assert_eq!(graph.edges[e].linked_expr, None);
        }
    }

    #[test]
    fn test_linked_expr_merges_both_sides() {
        let mut w = WorldData {
            areas: vec![area("a"), area("b")],
            doors: vec![],
            warps: vec![warp("w", "a", "b")],
        };
        w.warps[0].a.expr = Some(Expr::Leaf("key".to_string()));
        w.warps[0].b.expr = Some(Expr::Leaf("sword".to_string()));
        let mut graph = Graph::build(&w).unwrap();
        let exit = graph.nodes[0].to[0];
        let entrance = graph.nodes[1].from[0];
        graph.connect(exit, entrance);
        assert_eq!(
            graph.edges[exit].linked_expr,
            Some(Expr::OrK(
                1,
                vec![Expr::Leaf("key".to_string()), Expr::Leaf("sword".to_string())]
            ))
        );
    }

    #[test]
    #[should_panic]
    fn test_pair_kind_mismatch_panics() {
        let world = WorldData {
            areas: vec![area("a"), area("b")],
            doors: vec![],
            warps: vec![warp("w1", "a", "b")],
        };
        let mut graph = Graph::build(&world).unwrap();
        let exit = graph.nodes[0].to[0];
        graph.set_pair(exit, exit);
    }

    #[test]
    fn test_duplicate_area_rejected() {
        let world = WorldData {
            areas: vec![area("a"), area("a")],
            doors: vec![],
            warps: vec![],
        };
        assert!(Graph::build(&world).is_err());
    }
}
