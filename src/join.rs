//! Join trees: elimination schedules for weighted model counting.
//!
//! Leaves ([`JoinNode::Terminal`]) stand for clauses. An inner node
//! ([`JoinNode::Nonterminal`]) multiplies the functions of its children and then
//! abstracts its projectable variables. Node indices are dense and zero-based:
//! terminal `i` is clause `i`, nonterminals follow.
//!
//! # Protocol
//!
//! ```text
//! p jt <vars> <clauses> <nodes>
//! <node> <child>... e <var>...       # 1-based indices, children before parents
//! =                                  # end of tree
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::io::{self, Write};

use crate::error::{Error, Result};
use crate::types::Var;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinNode {
    /// A clause, identified by its position in the formula.
    Terminal { index: usize },
    Nonterminal {
        index: usize,
        children: Vec<usize>,
        projectable: BTreeSet<Var>,
    },
}

impl JoinNode {
    pub fn index(&self) -> usize {
        match self {
            JoinNode::Terminal { index } | JoinNode::Nonterminal { index, .. } => *index,
        }
    }

    pub fn children(&self) -> &[usize] {
        match self {
            JoinNode::Terminal { .. } => &[],
            JoinNode::Nonterminal { children, .. } => children,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JoinNode::Terminal { .. })
    }
}

/// Index bookkeeping of one join tree under construction.
///
/// Copying an indexer takes a snapshot of it; assigning the copy back restores it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeIndexer {
    terminal_count: usize,
    node_count: usize,
    nonterminal_indices: BTreeSet<usize>,
}

impl NodeIndexer {
    pub fn terminal_count(&self) -> usize {
        self.terminal_count
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn nonterminal_count(&self) -> usize {
        self.nonterminal_indices.len()
    }

    /// Next terminal index. Terminals must be registered before any nonterminal.
    pub fn new_terminal(&mut self) -> usize {
        assert!(self.nonterminal_indices.is_empty(), "Terminals must precede nonterminals");
        let index = self.terminal_count;
        self.terminal_count += 1;
        self.node_count += 1;
        index
    }

    /// Claim `requested`, or the next unused index if `None`.
    pub fn new_nonterminal(&mut self, requested: Option<usize>) -> Result<usize> {
        let index = requested.unwrap_or(self.node_count);
        if index < self.terminal_count {
            return Err(Error::NodeIndex(format!(
                "nonterminal index {} collides with the {} terminals",
                index, self.terminal_count
            )));
        }
        if !self.nonterminal_indices.insert(index) {
            return Err(Error::NodeIndex(format!("nonterminal index {} is already used", index)));
        }
        self.node_count += 1;
        Ok(index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinTree {
    declared_var_count: usize,
    /// Node count announced by a problem line, for trees read from a planner.
    declared_node_count: Option<usize>,
    nodes: BTreeMap<usize, JoinNode>,
    parents: BTreeMap<usize, usize>,
    indexer: NodeIndexer,
    planner_seconds: Option<f64>,
}

impl JoinTree {
    /// A tree holding only the terminals of `clause_count` clauses.
    pub fn new(declared_var_count: usize, clause_count: usize) -> Self {
        let mut tree = Self {
            declared_var_count,
            declared_node_count: None,
            nodes: BTreeMap::new(),
            parents: BTreeMap::new(),
            indexer: NodeIndexer::default(),
            planner_seconds: None,
        };
        for _ in 0..clause_count {
            let index = tree.indexer.new_terminal();
            tree.nodes.insert(index, JoinNode::Terminal { index });
        }
        tree
    }

    /// An empty tree announced to have `node_count` nodes in total.
    pub fn declared(declared_var_count: usize, clause_count: usize, node_count: usize) -> Self {
        let mut tree = Self::new(declared_var_count, clause_count);
        tree.declared_node_count = Some(node_count);
        tree
    }

    /// Childless root only, standing in for formulas that need no evaluation.
    pub fn placeholder(declared_var_count: usize) -> Self {
        let mut tree = Self::new(declared_var_count, 0);
        tree.nodes.insert(
            0,
            JoinNode::Nonterminal {
                index: 0,
                children: Vec::new(),
                projectable: BTreeSet::new(),
            },
        );
        tree.indexer.nonterminal_indices.insert(0);
        tree.indexer.node_count = 1;
        tree
    }

    pub fn declared_var_count(&self) -> usize {
        self.declared_var_count
    }

    pub fn terminal_count(&self) -> usize {
        self.indexer.terminal_count()
    }

    pub fn nonterminal_count(&self) -> usize {
        self.indexer.nonterminal_count()
    }

    pub fn node_count(&self) -> usize {
        self.indexer.node_count()
    }

    pub fn indexer(&self) -> &NodeIndexer {
        &self.indexer
    }

    pub fn planner_seconds(&self) -> Option<f64> {
        self.planner_seconds
    }

    pub fn set_planner_seconds(&mut self, seconds: f64) {
        self.planner_seconds = Some(seconds);
    }

    pub fn node(&self, index: usize) -> Option<&JoinNode> {
        self.nodes.get(&index)
    }

    /// Number of nonterminals still missing from a declared tree.
    pub fn missing_nonterminals(&self) -> usize {
        match self.declared_node_count {
            Some(n) => n
                .saturating_sub(self.terminal_count())
                .saturating_sub(self.nonterminal_count()),
            None => 0,
        }
    }

    /// The nonterminal with the largest index.
    pub fn root(&self) -> Option<usize> {
        self.indexer.nonterminal_indices.last().copied()
    }

    /// Add a nonterminal over existing parentless nodes and return its index.
    pub fn add_nonterminal(
        &mut self,
        children: Vec<usize>,
        projectable: BTreeSet<Var>,
        requested: Option<usize>,
    ) -> Result<usize> {
        if let Some(index) = requested {
            if let Some(n) = self.declared_node_count {
                if index >= n {
                    return Err(Error::NodeIndex(format!(
                        "nonterminal index {} exceeds the declared node count {}",
                        index, n
                    )));
                }
            }
        }
        for &child in &children {
            if !self.nodes.contains_key(&child) {
                return Err(Error::NodeIndex(format!("child {} is not a known node", child)));
            }
            if let Some(parent) = self.parents.get(&child) {
                return Err(Error::NodeIndex(format!("child {} already has parent {}", child, parent)));
            }
            if let Some(index) = requested.filter(|&index| child >= index) {
                return Err(Error::NodeIndex(format!(
                    "child {} is not smaller than its parent {}",
                    child, index
                )));
            }
        }
        if let Some(v) = projectable.iter().find(|v| v.index() > self.declared_var_count) {
            return Err(Error::NodeIndex(format!(
                "projected variable {} exceeds the declared variable count {}",
                v, self.declared_var_count
            )));
        }

        let index = self.indexer.new_nonterminal(requested)?;
        for &child in &children {
            self.parents.insert(child, index);
        }
        self.nodes.insert(
            index,
            JoinNode::Nonterminal {
                index,
                children,
                projectable,
            },
        );
        Ok(index)
    }

    /// Extend the projectable set of an existing nonterminal.
    pub fn add_projectable(&mut self, index: usize, vars: impl IntoIterator<Item = Var>) {
        if let Some(JoinNode::Nonterminal { projectable, .. }) = self.nodes.get_mut(&index) {
            projectable.extend(vars);
        }
    }

    /// Union of the projectable sets of all nonterminals.
    pub fn projected_vars(&self) -> BTreeSet<Var> {
        let mut vars = BTreeSet::new();
        for node in self.nodes.values() {
            if let JoinNode::Nonterminal { projectable, .. } = node {
                vars.extend(projectable.iter().copied());
            }
        }
        vars
    }

    /// Nonterminals below `root` (inclusive), children before parents.
    pub fn post_order(&self, root: usize) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![(root, false)];
        while let Some((index, expanded)) = stack.pop() {
            let Some(node) = self.nodes.get(&index) else {
                continue;
            };
            if node.is_terminal() {
                continue;
            }
            if expanded {
                order.push(index);
            } else {
                stack.push((index, true));
                for &child in node.children().iter().rev() {
                    stack.push((child, false));
                }
            }
        }
        order
    }

    /// Write the tree in the planner protocol, terminated by `=`.
    pub fn write_protocol(&self, w: &mut impl Write) -> io::Result<()> {
        writeln!(
            w,
            "p jt {} {} {}",
            self.declared_var_count,
            self.terminal_count(),
            self.node_count()
        )?;
        if let Some(root) = self.root() {
            for index in self.post_order(root) {
                if let Some(JoinNode::Nonterminal {
                    children,
                    projectable,
                    ..
                }) = self.nodes.get(&index)
                {
                    write!(w, "{}", index + 1)?;
                    for child in children {
                        write!(w, " {}", child + 1)?;
                    }
                    write!(w, " e")?;
                    for var in projectable {
                        write!(w, " {}", var)?;
                    }
                    writeln!(w)?;
                }
            }
        }
        writeln!(w, "=")
    }
}

impl Display for JoinTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut buf = Vec::new();
        self.write_protocol(&mut buf).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", String::from_utf8_lossy(&buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(ids: &[u32]) -> BTreeSet<Var> {
        ids.iter().map(|&i| Var::new(i)).collect()
    }

    #[test]
    fn test_indexer() -> Result<()> {
        let mut indexer = NodeIndexer::default();
        assert_eq!(indexer.new_terminal(), 0);
        assert_eq!(indexer.new_terminal(), 1);
        assert_eq!(indexer.new_nonterminal(None)?, 2);
        assert_eq!(indexer.new_nonterminal(Some(5))?, 5);
        assert!(matches!(indexer.new_nonterminal(Some(5)), Err(Error::NodeIndex(_))));
        assert!(matches!(indexer.new_nonterminal(Some(1)), Err(Error::NodeIndex(_))));
        assert_eq!(indexer.node_count(), 4);
        assert_eq!(indexer.nonterminal_count(), 2);
        Ok(())
    }

    #[test]
    fn test_indexer_snapshot() -> Result<()> {
        let mut indexer = NodeIndexer::default();
        indexer.new_terminal();
        let snapshot = indexer.clone();
        indexer.new_nonterminal(Some(3))?;
        indexer = snapshot;
        assert_eq!(indexer.new_nonterminal(Some(3))?, 3);
        Ok(())
    }

    #[test]
    fn test_build_and_print() -> Result<()> {
        let mut tree = JoinTree::new(3, 3);
        let a = tree.add_nonterminal(vec![0, 1], vars(&[1]), None)?;
        let root = tree.add_nonterminal(vec![a, 2], vars(&[2, 3]), None)?;
        assert_eq!((a, root), (3, 4));
        assert_eq!(tree.root(), Some(4));
        assert_eq!(tree.node_count(), 5);
        assert_eq!(tree.projected_vars(), vars(&[1, 2, 3]));
        assert_eq!(tree.post_order(root), vec![3, 4]);

        let text = tree.to_string();
        println!("{}", text);
        assert_eq!(text, "p jt 3 3 5\n4 1 2 e 1\n5 4 3 e 2 3\n=\n");
        Ok(())
    }

    #[test]
    fn test_rejects_bad_children() -> Result<()> {
        let mut tree = JoinTree::declared(2, 2, 4);
        assert!(matches!(
            tree.add_nonterminal(vec![0, 7], BTreeSet::new(), Some(2)),
            Err(Error::NodeIndex(_))
        ));
        tree.add_nonterminal(vec![0], BTreeSet::new(), Some(2))?;
        // Node 0 already has a parent.
        assert!(tree.add_nonterminal(vec![0, 1], BTreeSet::new(), Some(3)).is_err());
        // Past the declared node count.
        assert!(tree.add_nonterminal(vec![1], BTreeSet::new(), Some(4)).is_err());
        // Projected variable out of range.
        assert!(tree.add_nonterminal(vec![1, 2], vars(&[3]), Some(3)).is_err());
        assert_eq!(tree.missing_nonterminals(), 1);
        Ok(())
    }

    #[test]
    fn test_placeholder() {
        let tree = JoinTree::placeholder(4);
        assert_eq!(tree.root(), Some(0));
        assert_eq!(tree.to_string(), "p jt 4 0 1\n1 e\n=\n");
    }
}
