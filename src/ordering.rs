//! Variable-ordering heuristics.
//!
//! The same heuristics order two different things: the clusters of a
//! join tree (via the elimination ordering of formula variables), and the
//! variables of the decision diagrams.
//!
//! MCS, LexP and LexM work on the interaction graph of the formula and aim
//! at elimination orderings with small induced width. Every tie is broken
//! toward the smallest variable, so all heuristics are deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use log::debug;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::cnf::Cnf;
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::types::Var;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VarOrderingHeuristic {
    /// Order of first occurrence in the clauses.
    Appearance,
    /// Ascending variable number.
    Declaration,
    /// Seeded shuffle of the appearance order.
    Random,
    /// Maximum cardinality search.
    Mcs,
    /// Lexicographic breadth-first search (perfect elimination ordering).
    Lexp,
    /// Lexicographic search for minimal elimination orderings.
    Lexm,
}

impl VarOrderingHeuristic {
    pub const ALL: [VarOrderingHeuristic; 6] = [
        VarOrderingHeuristic::Appearance,
        VarOrderingHeuristic::Declaration,
        VarOrderingHeuristic::Random,
        VarOrderingHeuristic::Mcs,
        VarOrderingHeuristic::Lexp,
        VarOrderingHeuristic::Lexm,
    ];
}

impl Display for VarOrderingHeuristic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VarOrderingHeuristic::Appearance => "APPEARANCE",
            VarOrderingHeuristic::Declaration => "DECLARATION",
            VarOrderingHeuristic::Random => "RANDOM",
            VarOrderingHeuristic::Mcs => "MCS",
            VarOrderingHeuristic::Lexp => "LEXP",
            VarOrderingHeuristic::Lexm => "LEXM",
        };
        write!(f, "{}", name)
    }
}

/// A heuristic together with whether its result is reversed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VarOrder {
    pub heuristic: VarOrderingHeuristic,
    pub inverse: bool,
}

impl VarOrder {
    pub fn new(heuristic: VarOrderingHeuristic) -> Self {
        Self {
            heuristic,
            inverse: false,
        }
    }

    pub fn inverted(heuristic: VarOrderingHeuristic) -> Self {
        Self {
            heuristic,
            inverse: true,
        }
    }
}

impl Display for VarOrder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.inverse {
            write!(f, "{} (inverse)", self.heuristic)
        } else {
            write!(f, "{}", self.heuristic)
        }
    }
}

/// Numbers assigned to a vertex during lexicographic search, kept in descending order.
///
/// Labels compare lexicographically, so a vertex whose neighbors were numbered
/// earlier (with larger numbers) wins.
#[derive(Debug, Clone, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Label(Vec<usize>);

impl Label {
    pub fn add_number(&mut self, number: usize) {
        let pos = self.0.partition_point(|&n| n > number);
        self.0.insert(pos, number);
    }

    pub fn numbers(&self) -> &[usize] {
        &self.0
    }
}

/// Order the variables appearing in `cnf`.
///
/// The result is a permutation of [`Cnf::apparent_vars`]; anything else is reported
/// as [`Error::MalformedOrdering`].
pub fn var_ordering(cnf: &Cnf, order: VarOrder, seed: u64) -> Result<Vec<Var>> {
    let mut ordering = match order.heuristic {
        VarOrderingHeuristic::Appearance => cnf.apparent_vars().to_vec(),
        VarOrderingHeuristic::Declaration => {
            let mut vars = cnf.apparent_vars().to_vec();
            vars.sort();
            vars
        }
        VarOrderingHeuristic::Random => {
            let mut vars = cnf.apparent_vars().to_vec();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            vars.shuffle(&mut rng);
            vars
        }
        VarOrderingHeuristic::Mcs => mcs(&cnf.interaction_graph()),
        VarOrderingHeuristic::Lexp => lexp(&cnf.interaction_graph()),
        VarOrderingHeuristic::Lexm => lexm(&cnf.interaction_graph()),
    };
    if order.inverse {
        ordering.reverse();
    }
    debug!("{} ordering: {:?}", order, ordering);

    check_permutation(&ordering, cnf.apparent_vars())?;
    Ok(ordering)
}

fn check_permutation(ordering: &[Var], vars: &[Var]) -> Result<()> {
    let expected: BTreeSet<Var> = vars.iter().copied().collect();
    let mut seen = BTreeSet::new();
    for &v in ordering {
        if !expected.contains(&v) {
            return Err(Error::MalformedOrdering(format!("foreign variable {}", v)));
        }
        if !seen.insert(v) {
            return Err(Error::MalformedOrdering(format!("duplicate variable {}", v)));
        }
    }
    if seen.len() != expected.len() {
        let missing: Vec<Var> = expected.difference(&seen).copied().collect();
        return Err(Error::MalformedOrdering(format!("missing variables {:?}", missing)));
    }
    Ok(())
}

/// First key with the greatest value, in ascending key order.
fn first_max<V: Ord>(map: &BTreeMap<Var, V>) -> Option<Var> {
    let mut best: Option<(Var, &V)> = None;
    for (&v, value) in map {
        match best {
            Some((_, b)) if value <= b => {}
            _ => best = Some((v, value)),
        }
    }
    best.map(|(v, _)| v)
}

/// Maximum cardinality search, starting from the smallest vertex.
pub fn mcs(graph: &Graph) -> Vec<Var> {
    let mut vertices = graph.vertices();
    let Some(start) = vertices.next() else {
        return Vec::new();
    };

    // unranked vertex -> number of ranked neighbors
    let mut counts: BTreeMap<Var, usize> = vertices.map(|v| (v, 0)).collect();

    let mut ordering = Vec::with_capacity(graph.num_vertices());
    let mut best = Some(start);
    while let Some(v) = best {
        ordering.push(v);
        counts.remove(&v);
        for u in graph.neighbors(v) {
            if let Some(c) = counts.get_mut(&u) {
                *c += 1;
            }
        }
        best = first_max(&counts);
    }
    ordering
}

/// Lexicographic breadth-first search, numbering vertices from `n` down to `1`.
pub fn lexp(graph: &Graph) -> Vec<Var> {
    let mut unnumbered: BTreeMap<Var, Label> = graph.vertices().map(|v| (v, Label::default())).collect();
    let mut ordering = Vec::with_capacity(graph.num_vertices());

    for number in (1..=graph.num_vertices()).rev() {
        let Some(v) = first_max(&unnumbered) else {
            break;
        };
        ordering.push(v);
        unnumbered.remove(&v);
        for u in graph.neighbors(v) {
            if let Some(label) = unnumbered.get_mut(&u) {
                label.add_number(number);
            }
        }
    }
    ordering
}

/// Lexicographic search for minimal elimination orderings.
///
/// After numbering `v`, every unnumbered `w` reachable from `v` through unnumbered
/// vertices with labels smaller than `w`'s receives the current number.
pub fn lexm(graph: &Graph) -> Vec<Var> {
    let mut unnumbered: BTreeMap<Var, Label> = graph.vertices().map(|v| (v, Label::default())).collect();
    let mut ordering = Vec::with_capacity(graph.num_vertices());
    // Graph on the unnumbered vertices and the vertex being numbered.
    let mut remaining = graph.clone();

    for number in (1..=graph.num_vertices()).rev() {
        let Some(v) = first_max(&unnumbered) else {
            break;
        };
        ordering.push(v);
        unnumbered.remove(&v);

        let reached: Vec<Var> = unnumbered
            .iter()
            .filter(|&(&w, w_label)| {
                let mut subgraph = remaining.clone();
                for (&u, label) in &unnumbered {
                    if u != w && label >= w_label {
                        subgraph.remove_vertex(u);
                    }
                }
                subgraph.has_path(v, w)
            })
            .map(|(&w, _)| w)
            .collect();

        for w in reached {
            if let Some(label) = unnumbered.get_mut(&w) {
                label.add_number(number);
            }
        }
        remaining.remove_vertex(v);
    }
    ordering
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn vars(ids: &[u32]) -> Vec<Var> {
        ids.iter().map(|&i| Var::new(i)).collect()
    }

    fn graph(n: u32, edges: &[(u32, u32)]) -> Graph {
        let mut g = Graph::new(vars(&(1..=n).collect::<Vec<_>>()));
        for &(a, b) in edges {
            g.add_edge(Var::new(a), Var::new(b));
        }
        g
    }

    fn assert_permutation(ordering: &[Var], expected: &[Var]) {
        let mut a = ordering.to_vec();
        let mut b = expected.to_vec();
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn test_label_order() {
        let mut a = Label::default();
        a.add_number(3);
        a.add_number(7);
        a.add_number(5);
        assert_eq!(a.numbers(), &[7, 5, 3]);

        let mut b = Label::default();
        b.add_number(7);
        assert!(a > b);
        b.add_number(6);
        assert!(b > a);
        assert!(Label::default() < b);
    }

    #[test]
    fn test_mcs_path() {
        // 1 - 2 - 3 - 4
        let g = graph(4, &[(1, 2), (2, 3), (3, 4)]);
        assert_eq!(mcs(&g), vars(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_mcs_disconnected() {
        // 3 - 1, 2 isolated: after 1 and 3, the isolated vertex still gets ranked.
        let g = graph(3, &[(1, 3)]);
        assert_eq!(mcs(&g), vars(&[1, 3, 2]));
    }

    #[test]
    fn test_mcs_empty() {
        assert!(mcs(&Graph::default()).is_empty());
    }

    #[test]
    fn test_lexp_star() {
        // Star centered at 3: the center is reached from 1, then its leaves in ascending order.
        let g = graph(4, &[(3, 1), (3, 2), (3, 4)]);
        assert_eq!(lexp(&g), vars(&[1, 3, 2, 4]));
    }

    #[test]
    fn test_lexp_prefers_larger_labels() {
        // 1 - 2, 1 - 3, 2 - 4: after 1 (labels 2:[4], 3:[4]), 2 is chosen (tie -> smallest),
        // then 4 gets [3] while 3 keeps [4], so 3 comes before 4.
        let g = graph(4, &[(1, 2), (1, 3), (2, 4)]);
        assert_eq!(lexp(&g), vars(&[1, 2, 3, 4]));
    }

    #[test]
    fn test_lexm_cycle() {
        // On a 4-cycle every vertex is reachable through smaller labels,
        // so LexM spreads numbers beyond direct neighbors.
        let g = graph(4, &[(1, 2), (2, 3), (3, 4), (4, 1)]);
        let ordering = lexm(&g);
        assert_permutation(&ordering, &vars(&[1, 2, 3, 4]));
        assert_eq!(ordering[0], Var::new(1));
    }

    #[test]
    fn test_lexm_matches_lexp_on_chordal_path() {
        let g = graph(5, &[(1, 2), (2, 3), (3, 4), (4, 5)]);
        assert_eq!(lexm(&g), lexp(&g));
    }

    #[test]
    fn test_all_heuristics_are_permutations() -> Result<()> {
        let cnf = Cnf::from_dimacs(7, &[&[4, -2], &[2, 7, 1], &[-7, 4], &[1, 2, -4]]);
        for heuristic in VarOrderingHeuristic::ALL {
            for order in [VarOrder::new(heuristic), VarOrder::inverted(heuristic)] {
                let ordering = var_ordering(&cnf, order, 10)?;
                println!("{}: {:?}", order, ordering);
                assert_permutation(&ordering, cnf.apparent_vars());
            }
        }
        Ok(())
    }

    #[test]
    fn test_appearance_and_declaration() -> Result<()> {
        let cnf = Cnf::from_dimacs(5, &[&[5, -3], &[1, 3]]);
        let appearance = var_ordering(&cnf, VarOrder::new(VarOrderingHeuristic::Appearance), 0)?;
        assert_eq!(appearance, vars(&[5, 3, 1]));
        let declaration = var_ordering(&cnf, VarOrder::inverted(VarOrderingHeuristic::Declaration), 0)?;
        assert_eq!(declaration, vars(&[5, 3, 1]));
        Ok(())
    }

    #[test]
    fn test_random_is_reproducible() -> Result<()> {
        let clauses: Vec<Vec<i32>> = (1..=20).map(|i| vec![i, -(i % 20 + 1)]).collect();
        let refs: Vec<&[i32]> = clauses.iter().map(|c| c.as_slice()).collect();
        let cnf = Cnf::from_dimacs(20, &refs);
        let order = VarOrder::new(VarOrderingHeuristic::Random);
        assert_eq!(var_ordering(&cnf, order, 10)?, var_ordering(&cnf, order, 10)?);
        Ok(())
    }

    #[test]
    fn test_check_permutation() {
        let expected = vars(&[1, 2, 3]);
        assert!(check_permutation(&vars(&[3, 1, 2]), &expected).is_ok());
        assert!(matches!(
            check_permutation(&vars(&[1, 1, 2]), &expected),
            Err(Error::MalformedOrdering(_))
        ));
        assert!(check_permutation(&vars(&[1, 2]), &expected).is_err());
        assert!(check_permutation(&vars(&[1, 2, 4]), &expected).is_err());
    }
}
