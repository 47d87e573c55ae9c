//! Join ordering.
//!
//! Relations taking part in a join region are numbered `0..n` and connected
//! by the join predicates between them into a [`JoinGraph`]. [`DPccp`]
//! enumerates every connected-subgraph/complement pair of that graph exactly
//! once (Moerkotte and Neumann, "Analysis of Two Existing and One New
//! Dynamic Programming Algorithm for the Generation of Optimal Bushy Join
//! Trees without Cross Products") and builds the cheapest plan bottom-up.
//! Graphs that are too large, disconnected, or that blow the pair budget are
//! ordered by [`greedy`] instead.
//!
//! The enumerators know nothing about operators: a [`JoinPlanSpace`]
//! supplies the candidate plans for base relations and for joining two
//! sub-plans, along with their cost and cardinality.

use std::cmp::Ordering;
use std::fmt;

use quiver_common::utils::hash::FxHashMap;

/// A set of relations, one bit per relation. Supports up to 64 relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BitSet(u64);

impl BitSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// A set holding the single relation `index`.
    #[must_use]
    pub fn singleton(index: usize) -> Self {
        Self(1 << index)
    }

    /// The set `{0, .., n - 1}`.
    #[must_use]
    pub fn full(n: usize) -> Self {
        if n >= 64 {
            Self(u64::MAX)
        } else {
            Self((1 << n) - 1)
        }
    }

    /// Relations with an index at most `index`.
    #[must_use]
    pub fn up_to(index: usize) -> Self {
        Self::full(index + 1)
    }

    /// The raw bits.
    #[must_use]
    pub fn bits(self) -> u64 {
        self.0
    }

    /// Returns true if the set has no members.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of members.
    #[must_use]
    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Returns true if `index` is a member.
    #[must_use]
    pub fn contains(self, index: usize) -> bool {
        self.0 & (1 << index) != 0
    }

    /// Returns true if every member of `self` is in `other`.
    #[must_use]
    pub fn is_subset(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    /// Returns true if the sets share a member.
    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Set union.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Set intersection.
    #[must_use]
    pub fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Members of `self` not in `other`.
    #[must_use]
    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// The lowest member, if any.
    #[must_use]
    pub fn min(self) -> Option<usize> {
        (!self.is_empty()).then(|| self.0.trailing_zeros() as usize)
    }

    /// Members in ascending order.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let index = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some(index)
        })
    }

    /// Every non-empty subset, in ascending order of the raw bits.
    pub fn subsets(self) -> impl Iterator<Item = Self> {
        let all = self.0;
        let mut current = 0u64;
        let mut done = all == 0;
        std::iter::from_fn(move || {
            if done {
                return None;
            }
            current = current.wrapping_sub(all) & all;
            if current == all {
                done = true;
            }
            Some(Self(current))
        })
    }
}

impl fmt::Display for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<String> = self.iter().map(|i| i.to_string()).collect();
        write!(f, "{{{}}}", members.join(","))
    }
}

/// Relations and the join predicates connecting them.
#[derive(Debug, Clone)]
pub struct JoinGraph {
    neighbors: Vec<BitSet>,
}

impl JoinGraph {
    /// A graph of `relations` unconnected relations.
    ///
    /// # Panics
    ///
    /// Panics if `relations` exceeds 64.
    #[must_use]
    pub fn new(relations: usize) -> Self {
        assert!(relations <= 64, "join graphs hold at most 64 relations");
        Self {
            neighbors: vec![BitSet::EMPTY; relations],
        }
    }

    /// Connects two relations. Self-edges are ignored.
    pub fn add_edge(&mut self, a: usize, b: usize) {
        if a != b {
            self.neighbors[a] = self.neighbors[a].union(BitSet::singleton(b));
            self.neighbors[b] = self.neighbors[b].union(BitSet::singleton(a));
        }
    }

    /// Number of relations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Returns true if the graph has no relations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// All relations.
    #[must_use]
    pub fn all(&self) -> BitSet {
        BitSet::full(self.len())
    }

    /// Relations adjacent to some member of `set`, excluding `set` itself.
    #[must_use]
    pub fn neighborhood(&self, set: BitSet) -> BitSet {
        set.iter()
            .fold(BitSet::EMPTY, |acc, i| acc.union(self.neighbors[i]))
            .difference(set)
    }

    /// Returns true if some edge runs between `a` and `b`.
    #[must_use]
    pub fn connects(&self, a: BitSet, b: BitSet) -> bool {
        self.neighborhood(a).intersects(b)
    }

    /// Returns true if `set` induces a connected subgraph.
    #[must_use]
    pub fn is_connected(&self, set: BitSet) -> bool {
        let Some(start) = set.min() else {
            return false;
        };
        let mut reached = BitSet::singleton(start);
        loop {
            let next = reached.union(self.neighborhood(reached).intersection(set));
            if next == reached {
                return reached == set;
            }
            reached = next;
        }
    }
}

/// Supplies candidate plans to the join enumerators.
pub trait JoinPlanSpace {
    /// A (partial) join plan.
    type Plan: Clone;

    /// Candidate plans for base relation `relation`.
    fn leaf(&self, relation: usize) -> Vec<Self::Plan>;

    /// Candidate plans joining `left` (covering `left_set`) with `right`
    /// (covering `right_set`). Implementations may treat the sides
    /// asymmetrically; enumerators ask for both orientations.
    fn join(
        &self,
        left: &Self::Plan,
        left_set: BitSet,
        right: &Self::Plan,
        right_set: BitSet,
    ) -> Vec<Self::Plan>;

    /// Total estimated cost of a plan.
    fn cost(&self, plan: &Self::Plan) -> f64;

    /// Estimated rows produced by a plan.
    fn rows(&self, plan: &Self::Plan) -> f64;

    /// Orders plans by preference; the default compares costs.
    fn compare(&self, a: &Self::Plan, b: &Self::Plan) -> Ordering {
        self.cost(a).total_cmp(&self.cost(b))
    }

    /// Returns true if `a` makes `b` redundant: it is preferred (or tied)
    /// and delivers every physical property, such as ordering, `b` does.
    fn dominates(&self, a: &Self::Plan, b: &Self::Plan) -> bool {
        self.compare(a, b) != Ordering::Greater
    }
}

/// Connected-subgraph/complement pairs, in an order suitable for dynamic
/// programming.
#[derive(Debug, Clone)]
pub struct DPccp<'a> {
    graph: &'a JoinGraph,
    pair_budget: usize,
}

impl<'a> DPccp<'a> {
    /// Creates an enumerator over `graph` with an unlimited pair budget.
    #[must_use]
    pub fn new(graph: &'a JoinGraph) -> Self {
        Self {
            graph,
            pair_budget: usize::MAX,
        }
    }

    /// Gives up once more than `pairs` csg-cmp pairs have been enumerated.
    #[must_use]
    pub fn with_pair_budget(mut self, pairs: usize) -> Self {
        self.pair_budget = pairs;
        self
    }

    /// Every csg-cmp pair of a connected graph, or `None` if the budget ran
    /// out. Each unordered pair appears once.
    #[must_use]
    pub fn pairs(&self) -> Option<Vec<(BitSet, BitSet)>> {
        let mut pairs = Vec::new();
        for i in (0..self.graph.len()).rev() {
            let start = BitSet::singleton(i);
            self.emit_csg(start, &mut pairs)?;
            self.enumerate_csg_rec(start, BitSet::up_to(i), &mut pairs)?;
        }
        Some(pairs)
    }

    fn enumerate_csg_rec(
        &self,
        set: BitSet,
        excluded: BitSet,
        pairs: &mut Vec<(BitSet, BitSet)>,
    ) -> Option<()> {
        let neighborhood = self.graph.neighborhood(set).difference(excluded);
        for subset in neighborhood.subsets() {
            self.emit_csg(set.union(subset), pairs)?;
        }
        for subset in neighborhood.subsets() {
            self.enumerate_csg_rec(set.union(subset), excluded.union(neighborhood), pairs)?;
        }
        Some(())
    }

    fn emit_csg(&self, csg: BitSet, pairs: &mut Vec<(BitSet, BitSet)>) -> Option<()> {
        let min = csg.min()?;
        let excluded = csg.union(BitSet::up_to(min));
        let neighborhood = self.graph.neighborhood(csg).difference(excluded);
        let members: Vec<usize> = neighborhood.iter().collect();
        for &i in members.iter().rev() {
            let cmp = BitSet::singleton(i);
            self.push(pairs, csg, cmp)?;
            let below = neighborhood.intersection(BitSet::up_to(i));
            self.enumerate_cmp_rec(csg, cmp, excluded.union(below), pairs)?;
        }
        Some(())
    }

    fn enumerate_cmp_rec(
        &self,
        csg: BitSet,
        cmp: BitSet,
        excluded: BitSet,
        pairs: &mut Vec<(BitSet, BitSet)>,
    ) -> Option<()> {
        let neighborhood = self.graph.neighborhood(cmp).difference(excluded);
        for subset in neighborhood.subsets() {
            self.push(pairs, csg, cmp.union(subset))?;
        }
        for subset in neighborhood.subsets() {
            self.enumerate_cmp_rec(csg, cmp.union(subset), excluded.union(neighborhood), pairs)?;
        }
        Some(())
    }

    fn push(&self, pairs: &mut Vec<(BitSet, BitSet)>, csg: BitSet, cmp: BitSet) -> Option<()> {
        if pairs.len() >= self.pair_budget {
            return None;
        }
        pairs.push((csg, cmp));
        Some(())
    }

    /// The cheapest plan joining every relation, or `None` if the graph is
    /// disconnected or the pair budget ran out.
    ///
    /// Each subset keeps every candidate not dominated by another, so a
    /// costlier plan survives when it delivers a useful ordering.
    pub fn solve<S: JoinPlanSpace>(&self, space: &S) -> Option<S::Plan> {
        let all = self.graph.all();
        if self.graph.is_empty() || !self.graph.is_connected(all) {
            return None;
        }
        let mut pairs = self.pairs()?;
        pairs.sort_by_key(|(a, b)| a.len() + b.len());

        let mut table: FxHashMap<BitSet, Vec<S::Plan>> = FxHashMap::default();
        for i in 0..self.graph.len() {
            let mut candidates = Vec::new();
            for plan in space.leaf(i) {
                insert_candidate(space, &mut candidates, plan);
            }
            table.insert(BitSet::singleton(i), candidates);
        }

        for (s1, s2) in pairs {
            let (Some(left), Some(right)) = (table.get(&s1), table.get(&s2)) else {
                continue;
            };
            let mut produced = Vec::new();
            for l in left {
                for r in right {
                    produced.extend(space.join(l, s1, r, s2));
                    produced.extend(space.join(r, s2, l, s1));
                }
            }
            let entry = table.entry(s1.union(s2)).or_default();
            for plan in produced {
                insert_candidate(space, entry, plan);
            }
        }

        table.remove(&all).and_then(|plans| cheapest(space, plans))
    }
}

fn insert_candidate<S: JoinPlanSpace>(space: &S, candidates: &mut Vec<S::Plan>, plan: S::Plan) {
    if candidates.iter().any(|c| space.dominates(c, &plan)) {
        return;
    }
    candidates.retain(|c| !space.dominates(&plan, c));
    candidates.push(plan);
}

fn cheapest<S: JoinPlanSpace>(space: &S, plans: Vec<S::Plan>) -> Option<S::Plan> {
    plans
        .into_iter()
        .min_by(|a, b| space.compare(a, b))
}

/// Orders joins greedily: repeatedly joins the two components whose join
/// yields the fewest rows, preferring connected pairs. Handles disconnected
/// graphs with cross products.
///
/// Returns `None` only for an empty graph or a space that yields no plans.
pub fn greedy<S: JoinPlanSpace>(graph: &JoinGraph, space: &S) -> Option<S::Plan> {
    let mut components: Vec<(BitSet, S::Plan)> = (0..graph.len())
        .map(|i| cheapest(space, space.leaf(i)).map(|p| (BitSet::singleton(i), p)))
        .collect::<Option<_>>()?;

    while components.len() > 1 {
        let any_connected = components.iter().enumerate().any(|(i, (a, _))| {
            components
                .iter()
                .skip(i + 1)
                .any(|(b, _)| graph.connects(*a, *b))
        });

        let mut best: Option<(usize, usize, S::Plan)> = None;
        for i in 0..components.len() {
            for j in (i + 1)..components.len() {
                let (a, pa) = &components[i];
                let (b, pb) = &components[j];
                if any_connected && !graph.connects(*a, *b) {
                    continue;
                }
                let mut candidates = space.join(pa, *a, pb, *b);
                candidates.extend(space.join(pb, *b, pa, *a));
                let Some(plan) = cheapest(space, candidates) else {
                    continue;
                };
                let better = best.as_ref().is_none_or(|(_, _, current)| {
                    let (rows, current_rows) = (space.rows(&plan), space.rows(current));
                    rows < current_rows
                        || (rows == current_rows && space.compare(&plan, current) == Ordering::Less)
                });
                if better {
                    best = Some((i, j, plan));
                }
            }
        }

        let (i, j, plan) = best?;
        let (b, _) = components.swap_remove(j);
        let (a, _) = components.swap_remove(i);
        components.push((a.union(b), plan));
    }
    components.pop().map(|(_, plan)| plan)
}

/// Every plan for joining all relations without cross products (unless
/// the graph is disconnected). Exponential; meant for checking the other
/// enumerators on small graphs.
pub fn exhaustive<S: JoinPlanSpace>(graph: &JoinGraph, space: &S) -> Vec<S::Plan> {
    let allow_cross = !graph.is_connected(graph.all());
    let mut memo: FxHashMap<BitSet, Vec<S::Plan>> = FxHashMap::default();
    all_plans(graph, space, graph.all(), allow_cross, &mut memo)
}

fn all_plans<S: JoinPlanSpace>(
    graph: &JoinGraph,
    space: &S,
    set: BitSet,
    allow_cross: bool,
    memo: &mut FxHashMap<BitSet, Vec<S::Plan>>,
) -> Vec<S::Plan> {
    if let Some(plans) = memo.get(&set) {
        return plans.clone();
    }
    let plans = if set.len() == 1 {
        set.min().map(|i| space.leaf(i)).unwrap_or_default()
    } else {
        let mut plans = Vec::new();
        for left_set in set.subsets() {
            let right_set = set.difference(left_set);
            if right_set.is_empty() {
                continue;
            }
            if !allow_cross
                && !(graph.is_connected(left_set)
                    && graph.is_connected(right_set)
                    && graph.connects(left_set, right_set))
            {
                continue;
            }
            let left = all_plans(graph, space, left_set, allow_cross, memo);
            let right = all_plans(graph, space, right_set, allow_cross, memo);
            for l in &left {
                for r in &right {
                    plans.extend(space.join(l, left_set, r, right_set));
                }
            }
        }
        plans
    };
    memo.insert(set, plans.clone());
    plans
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cost is the sum of intermediate result sizes (C_out); join output is
    /// the product of input rows and the selectivities of crossing edges.
    struct Cout {
        rows: Vec<f64>,
        selectivity: FxHashMap<(usize, usize), f64>,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Tree {
        shape: String,
        set: BitSet,
        rows: f64,
        cost: f64,
    }

    impl Cout {
        fn crossing(&self, a: BitSet, b: BitSet) -> f64 {
            let mut s = 1.0;
            for i in a.iter() {
                for j in b.iter() {
                    let key = (i.min(j), i.max(j));
                    if let Some(sel) = self.selectivity.get(&key) {
                        s *= sel;
                    }
                }
            }
            s
        }
    }

    impl JoinPlanSpace for Cout {
        type Plan = Tree;

        fn leaf(&self, relation: usize) -> Vec<Tree> {
            vec![Tree {
                shape: format!("R{relation}"),
                set: BitSet::singleton(relation),
                rows: self.rows[relation],
                cost: 0.0,
            }]
        }

        fn join(&self, left: &Tree, ls: BitSet, right: &Tree, rs: BitSet) -> Vec<Tree> {
            let rows = left.rows * right.rows * self.crossing(ls, rs);
            vec![Tree {
                shape: format!("({} ⋈ {})", left.shape, right.shape),
                set: ls.union(rs),
                rows,
                cost: left.cost + right.cost + rows,
            }]
        }

        fn cost(&self, plan: &Tree) -> f64 {
            plan.cost
        }

        fn rows(&self, plan: &Tree) -> f64 {
            plan.rows
        }
    }

    fn chain(rows: &[f64], sels: &[f64]) -> (JoinGraph, Cout) {
        let mut graph = JoinGraph::new(rows.len());
        let mut selectivity = FxHashMap::default();
        for (i, s) in sels.iter().enumerate() {
            graph.add_edge(i, i + 1);
            selectivity.insert((i, i + 1), *s);
        }
        (
            graph,
            Cout {
                rows: rows.to_vec(),
                selectivity,
            },
        )
    }

    #[test]
    fn test_bitset_operations() {
        let a = BitSet::singleton(1).union(BitSet::singleton(3));
        assert_eq!(a.len(), 2);
        assert!(a.contains(3) && !a.contains(2));
        assert_eq!(a.min(), Some(1));
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(a.subsets().count(), 3);
        assert_eq!(BitSet::up_to(2), BitSet::full(3));
        assert_eq!(a.to_string(), "{1,3}");
        assert!(BitSet::EMPTY.subsets().next().is_none());
    }

    #[test]
    fn test_connectivity() {
        let (graph, _) = chain(&[1.0, 1.0, 1.0, 1.0], &[1.0, 1.0, 1.0]);
        assert!(graph.is_connected(graph.all()));
        let gap = BitSet::singleton(0).union(BitSet::singleton(2));
        assert!(!graph.is_connected(gap));
        assert!(graph.connects(BitSet::singleton(1), BitSet::singleton(2)));
        assert_eq!(
            graph.neighborhood(BitSet::singleton(1)),
            BitSet::singleton(0).union(BitSet::singleton(2))
        );
    }

    #[test]
    fn test_pair_count_matches_known_formulas() {
        // Chains of n relations have (n^3 - n) / 6 csg-cmp pairs.
        for n in 2..=8 {
            let (graph, _) = chain(&vec![1.0; n], &vec![1.0; n - 1]);
            let pairs = DPccp::new(&graph).pairs().unwrap();
            assert_eq!(pairs.len(), (n * n * n - n) / 6, "chain of {n}");
        }
        // Stars with n relations have (n - 1) * 2^(n - 2).
        for n in 2..=8 {
            let mut graph = JoinGraph::new(n);
            for i in 1..n {
                graph.add_edge(0, i);
            }
            let pairs = DPccp::new(&graph).pairs().unwrap();
            assert_eq!(pairs.len(), (n - 1) << (n - 2), "star of {n}");
        }
    }

    #[test]
    fn test_pairs_are_disjoint_connected_and_adjacent() {
        let mut graph = JoinGraph::new(5);
        for (a, b) in [(0, 1), (1, 2), (2, 3), (3, 4), (4, 0), (1, 3)] {
            graph.add_edge(a, b);
        }
        let pairs = DPccp::new(&graph).pairs().unwrap();
        let mut seen = std::collections::HashSet::new();
        for (a, b) in &pairs {
            assert!(!a.intersects(*b));
            assert!(graph.is_connected(*a) && graph.is_connected(*b));
            assert!(graph.connects(*a, *b));
            let key = if a < b { (*a, *b) } else { (*b, *a) };
            assert!(seen.insert(key), "pair {a} {b} emitted twice");
        }
    }

    #[test]
    fn test_dpccp_matches_exhaustive() {
        let (graph, space) = chain(&[1000.0, 10.0, 500.0, 20.0], &[0.01, 0.1, 0.05]);
        let best = DPccp::new(&graph).solve(&space).unwrap();
        let min = exhaustive(&graph, &space)
            .iter()
            .map(|t| t.cost)
            .fold(f64::INFINITY, f64::min);
        assert!((best.cost - min).abs() < 1e-9, "{} vs {min}", best.cost);
        assert_eq!(best.set, graph.all());
    }

    #[test]
    fn test_budget_and_disconnection_fall_back() {
        let (graph, space) = chain(&[10.0, 10.0, 10.0], &[0.1, 0.1]);
        assert!(DPccp::new(&graph).with_pair_budget(2).solve(&space).is_none());

        let mut split = JoinGraph::new(3);
        split.add_edge(0, 1);
        assert!(DPccp::new(&split).solve(&space).is_none());
        let plan = greedy(&split, &space).unwrap();
        assert_eq!(plan.set, split.all());
        // The connected pair is joined before the cross product.
        assert!(plan.shape.contains("R0 ⋈ R1") || plan.shape.contains("R1 ⋈ R0"));
    }

    #[test]
    fn test_greedy_never_beats_dpccp() {
        let (graph, space) = chain(
            &[100.0, 5000.0, 20.0, 800.0, 50.0],
            &[0.001, 0.01, 0.02, 0.1],
        );
        let dp = DPccp::new(&graph).solve(&space).unwrap();
        let greedy = greedy(&graph, &space).unwrap();
        assert!(dp.cost <= greedy.cost + 1e-9);
    }
}
