//! Undirected simple graphs over formula variables.
//!
//! The counter only needs one kind of graph: the interaction (Gaifman) graph
//! of a formula, whose vertices are the variables appearing in it and whose
//! edges join variables sharing a clause. Ordering heuristics mutate copies
//! of it, so vertex removal is cheap and iteration order is deterministic
//! (ascending variable number).

use std::collections::{BTreeMap, BTreeSet};

use crate::types::Var;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    adjacency: BTreeMap<Var, BTreeSet<Var>>,
}

impl Graph {
    pub fn new(vertices: impl IntoIterator<Item = Var>) -> Self {
        Self {
            adjacency: vertices.into_iter().map(|v| (v, BTreeSet::new())).collect(),
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.adjacency.len()
    }

    pub fn num_edges(&self) -> usize {
        self.adjacency.values().map(|n| n.len()).sum::<usize>() / 2
    }

    pub fn contains(&self, v: Var) -> bool {
        self.adjacency.contains_key(&v)
    }

    /// Vertices in ascending order.
    pub fn vertices(&self) -> impl Iterator<Item = Var> + '_ {
        self.adjacency.keys().copied()
    }

    /// Neighbors of `v` in ascending order; empty if `v` is not a vertex.
    pub fn neighbors(&self, v: Var) -> impl Iterator<Item = Var> + '_ {
        self.adjacency.get(&v).into_iter().flatten().copied()
    }

    pub fn has_edge(&self, u: Var, v: Var) -> bool {
        self.adjacency.get(&u).is_some_and(|n| n.contains(&v))
    }

    /// Add an undirected edge, inserting missing endpoints. Self-loops are ignored.
    pub fn add_edge(&mut self, u: Var, v: Var) {
        if u == v {
            self.adjacency.entry(u).or_default();
            return;
        }
        self.adjacency.entry(u).or_default().insert(v);
        self.adjacency.entry(v).or_default().insert(u);
    }

    /// Remove a vertex together with its incident edges.
    pub fn remove_vertex(&mut self, v: Var) {
        if let Some(neighbors) = self.adjacency.remove(&v) {
            for u in neighbors {
                if let Some(n) = self.adjacency.get_mut(&u) {
                    n.remove(&v);
                }
            }
        }
    }

    /// Whether `to` is reachable from `from`. A vertex always reaches itself.
    pub fn has_path(&self, from: Var, to: Var) -> bool {
        if !self.contains(from) || !self.contains(to) {
            return false;
        }

        let mut visited = BTreeSet::from([from]);
        let mut stack = vec![from];

        while let Some(v) = stack.pop() {
            if v == to {
                return true;
            }
            for u in self.neighbors(v) {
                if visited.insert(u) {
                    stack.push(u);
                }
            }
        }

        false
    }
}
