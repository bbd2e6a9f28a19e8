//! Weighted model counting.
//!
//! A [`Counter`] fixes the clustering heuristic and the two variable orderings
//! (one for clustering, one for the diagram variables). It can count a formula
//! directly on diagrams, build the equivalent join tree, or evaluate a join tree
//! obtained elsewhere. All of these agree on the count.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use num_bigint::BigUint;

use crate::add::Add;
use crate::cluster::{
    linear_join_tree, linear_projectable_sets, list_join_tree, monolithic_join_tree, tree_join_tree,
    Clustering, ClusteringHeuristic, ClusteringPolicy,
};
use crate::cnf::{Cnf, LiteralWeights};
use crate::error::{Error, Result};
use crate::join::{JoinNode, JoinTree};
use crate::ordering::{var_ordering, VarOrder, VarOrderingHeuristic};
use crate::reference::Ref;
use crate::types::{Lit, Var};

/// Node count above which the evaluator collects garbage.
pub const DEFAULT_GC_THRESHOLD: usize = 1 << 20;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum OutputFormat {
    /// Print the join tree in planner protocol instead of counting.
    JoinTree,
    #[default]
    ModelCount,
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::JoinTree => write!(f, "JOIN_TREE"),
            OutputFormat::ModelCount => write!(f, "MODEL_COUNT"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Counter {
    pub clustering: ClusteringHeuristic,
    pub cluster_order: VarOrder,
    pub diagram_order: VarOrder,
    pub random_seed: u64,
    pub gc_threshold: usize,
    interrupt: Option<Arc<AtomicBool>>,
}

impl Default for Counter {
    fn default() -> Self {
        Self {
            clustering: ClusteringHeuristic::default(),
            cluster_order: VarOrder::new(VarOrderingHeuristic::Lexp),
            diagram_order: VarOrder::new(VarOrderingHeuristic::Mcs),
            random_seed: 10,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            interrupt: None,
        }
    }
}

impl Counter {
    pub fn new(clustering: ClusteringHeuristic) -> Self {
        Self {
            clustering,
            ..Self::default()
        }
    }

    pub fn with_cluster_order(mut self, order: VarOrder) -> Self {
        self.cluster_order = order;
        self
    }

    pub fn with_diagram_order(mut self, order: VarOrder) -> Self {
        self.diagram_order = order;
        self
    }

    /// Seed of the [`VarOrderingHeuristic::Random`] ordering.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_gc_threshold(mut self, nodes: usize) -> Self {
        self.gc_threshold = nodes;
        self
    }

    /// Stop with [`Error::Interrupted`] once `flag` is raised.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    fn check_interrupt(&self) -> Result<()> {
        match &self.interrupt {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(Error::Interrupted),
            _ => Ok(()),
        }
    }

    fn clustering_of(&self, cnf: &Cnf, policy: ClusteringPolicy) -> Result<Clustering> {
        let ordering = var_ordering(cnf, self.cluster_order, self.random_seed)?;
        Clustering::new(cnf, ordering, policy)
    }

    /// Join tree encoding the elimination schedule of this counter.
    pub fn construct_join_tree(&self, cnf: &Cnf) -> Result<JoinTree> {
        if let Some(i) = cnf.empty_clause_index() {
            warn!("Clause {} is empty, using a placeholder join tree", i + 1);
            return Ok(JoinTree::placeholder(cnf.declared_var_count()));
        }

        info!("Constructing {} join tree...", self.clustering);
        let tree = match self.clustering {
            ClusteringHeuristic::Monolithic => monolithic_join_tree(cnf)?,
            ClusteringHeuristic::Linear => linear_join_tree(cnf)?,
            heuristic => {
                let policy = heuristic_policy(heuristic)?;
                let clustering = self.clustering_of(cnf, policy)?;
                if heuristic.is_tree() {
                    tree_join_tree(cnf, clustering)?
                } else {
                    list_join_tree(cnf, &clustering)?
                }
            }
        };
        info!(
            "Join tree: {} terminals, {} nonterminals",
            tree.terminal_count(),
            tree.nonterminal_count()
        );
        Ok(tree)
    }

    /// Count by evaluating `tree`, whose terminals are the clauses of `cnf`.
    pub fn count_join_tree(&self, cnf: &Cnf, tree: &JoinTree) -> Result<f64> {
        if let Some(i) = cnf.empty_clause_index() {
            warn!("Clause {} is empty, the model count is zero", i + 1);
            return Ok(0.0);
        }
        if tree.terminal_count() != cnf.clauses().len() {
            return Err(Error::InvalidJoinTree(format!(
                "{} terminals for {} clauses",
                tree.terminal_count(),
                cnf.clauses().len()
            )));
        }
        if tree.declared_var_count() != cnf.declared_var_count() {
            return Err(Error::InvalidJoinTree(format!(
                "tree declares {} variables, the formula {}",
                tree.declared_var_count(),
                cnf.declared_var_count()
            )));
        }
        let root = tree
            .root()
            .ok_or_else(|| Error::InvalidJoinTree("tree has no nonterminal".to_string()))?;

        info!("Evaluating join tree...");
        let mut session = Session::new(cnf, self)?;
        let result = session.evaluate(tree, root)?;
        Ok(session.finish(result))
    }

    /// Count directly on diagrams, following the same schedule as [`Counter::construct_join_tree`].
    pub fn count(&self, cnf: &Cnf) -> Result<f64> {
        if let Some(i) = cnf.empty_clause_index() {
            warn!("Clause {} is empty, the model count is zero", i + 1);
            return Ok(0.0);
        }

        info!("Counting with {} clustering...", self.clustering);
        let mut session = Session::new(cnf, self)?;
        let result = match self.clustering {
            ClusteringHeuristic::Monolithic => session.count_monolithic()?,
            ClusteringHeuristic::Linear => session.count_linear()?,
            heuristic => {
                let policy = heuristic_policy(heuristic)?;
                let clustering = self.clustering_of(cnf, policy)?;
                if heuristic.is_tree() {
                    session.count_tree(clustering)?
                } else {
                    session.count_list(&clustering)?
                }
            }
        };
        Ok(session.finish(result))
    }

    /// Count with every clustering heuristic and warn about disagreements.
    ///
    /// Returns the count of this counter's own heuristic.
    pub fn cross_check(&self, cnf: &Cnf) -> Result<f64> {
        let expected = self.count(cnf)?;
        for heuristic in ClusteringHeuristic::ALL {
            if heuristic == self.clustering {
                continue;
            }
            let counter = Self {
                clustering: heuristic,
                ..self.clone()
            };
            let count = counter.count(cnf)?;
            if !approx_eq(count, expected) {
                warn!(
                    "{} counts {} but {} counts {}",
                    heuristic, count, self.clustering, expected
                );
            } else {
                debug!("{} agrees: {}", heuristic, count);
            }
        }
        Ok(expected)
    }

    /// Exact model count of an unweighted formula, or `None` for weighted ones.
    pub fn exact_count(&self, cnf: &Cnf) -> Result<Option<BigUint>> {
        if cnf.weight_format().is_weighted() {
            return Ok(None);
        }
        if cnf.empty_clause_index().is_some() {
            return Ok(Some(BigUint::ZERO));
        }

        let session = Session::new(cnf, self)?;
        let f = session.add.apply_mul_many(cnf.clauses().iter().map(|c| session.clause_diagram(c)));
        let apparent = session.cnf_var.len();
        let count = session
            .add
            .sat_count(f, apparent)
            .ok_or_else(|| Error::InvalidJoinTree("clause conjunction is not a 0/1 diagram".to_string()))?;
        let absent = cnf.declared_var_count().saturating_sub(apparent);
        Ok(Some(count << absent))
    }

    /// Compare `count` against [`Counter::exact_count`], warning on mismatch.
    pub fn verify(&self, cnf: &Cnf, count: f64) -> Result<Option<BigUint>> {
        let exact = self.exact_count(cnf)?;
        if let Some(exact) = &exact {
            let approx = exact.to_string().parse::<f64>().unwrap_or(f64::INFINITY);
            if approx_eq(approx, count) {
                info!("Verified: exact count is {}", exact);
            } else {
                warn!("Model count {} differs from the exact count {}", count, exact);
            }
        }
        Ok(exact)
    }
}

fn heuristic_policy(heuristic: ClusteringHeuristic) -> Result<ClusteringPolicy> {
    heuristic
        .policy()
        .ok_or_else(|| Error::InvalidJoinTree(format!("{} does not cluster clauses", heuristic)))
}

fn approx_eq(a: f64, b: f64) -> bool {
    a == b || (a - b).abs() <= 1e-9 * a.abs().max(b.abs())
}

/// Multiply in `w(+v) + w(-v)` for every declared variable outside `projected`.
pub fn adjust_model_count(
    apparent_count: f64,
    projected: &BTreeSet<Var>,
    weights: &LiteralWeights,
    declared_var_count: usize,
) -> f64 {
    let mut count = apparent_count;
    for id in 1..=declared_var_count as u32 {
        let var = Var::new(id);
        if !projected.contains(&var) {
            count *= weights.sum(var);
        }
    }
    if count == 0.0 {
        warn!("Model count is zero, possibly from floating-point underflow");
    }
    count
}

enum Frame {
    Enter(usize),
    Exit(usize),
}

/// One counting run: the diagram manager and the variable maps around it.
struct Session<'a> {
    cnf: &'a Cnf,
    counter: &'a Counter,
    add: Add,
    /// Diagram variable of each appearing formula variable.
    dd_var: BTreeMap<Var, u32>,
    /// Formula variable of diagram variable `i + 1`.
    cnf_var: Vec<Var>,
    projected: BTreeSet<Var>,
    gc_threshold: usize,
}

impl<'a> Session<'a> {
    fn new(cnf: &'a Cnf, counter: &'a Counter) -> Result<Self> {
        let cnf_var = var_ordering(cnf, counter.diagram_order, counter.random_seed)?;
        let dd_var = cnf_var
            .iter()
            .enumerate()
            .map(|(i, &v)| (v, i as u32 + 1))
            .collect();
        Ok(Self {
            cnf,
            counter,
            add: Add::default(),
            dd_var,
            cnf_var,
            projected: BTreeSet::new(),
            gc_threshold: counter.gc_threshold,
        })
    }

    fn literal_diagram(&self, lit: Lit) -> Ref {
        let var = self.dd_var[&lit.var()];
        let f = self.add.mk_var(var);
        if lit.is_positive() {
            f
        } else {
            self.add.apply_not(f)
        }
    }

    fn clause_diagram(&self, clause: &[Lit]) -> Ref {
        clause
            .iter()
            .fold(self.add.zero, |acc, &lit| self.add.apply_or(acc, self.literal_diagram(lit)))
    }

    /// Weighted existential abstraction of a formula variable.
    fn abstract_var(&mut self, f: Ref, var: Var) -> Result<Ref> {
        if !self.projected.insert(var) {
            return Err(Error::InvalidJoinTree(format!("variable {} is projected twice", var)));
        }
        let weights = self.cnf.weights();
        let res = match self.dd_var.get(&var) {
            Some(&v) => self
                .add
                .abstract_weighted(f, v, weights.weight(var.pos()), weights.weight(var.neg())),
            None => self.add.apply_mul(f, self.add.constant(weights.sum(var))),
        };
        Ok(res)
    }

    fn abstract_all(&mut self, f: Ref, vars: &BTreeSet<Var>) -> Result<Ref> {
        let mut f = f;
        for &var in vars {
            f = self.abstract_var(f, var)?;
        }
        Ok(f)
    }

    /// Formula variables the diagram depends on.
    fn support(&self, f: Ref) -> BTreeSet<Var> {
        self.add
            .support(f)
            .into_iter()
            .map(|v| self.cnf_var[v as usize - 1])
            .collect()
    }

    fn maybe_collect_garbage(&mut self, roots: &[Ref]) {
        if self.add.num_nodes() <= self.gc_threshold {
            return;
        }
        let dropped = self.add.collect_garbage(roots);
        debug!("Collected {} diagram nodes, {} left", dropped, self.add.num_nodes());
        if self.add.num_nodes() > self.gc_threshold / 2 {
            self.gc_threshold *= 2;
        }
    }

    fn constant_value(&self, f: Ref) -> Result<f64> {
        self.add.value(f).ok_or_else(|| {
            Error::NonConstantDiagram(self.support(f).into_iter().map(|v| v.id()).collect())
        })
    }

    fn evaluate(&mut self, tree: &JoinTree, root: usize) -> Result<f64> {
        let mut values: Vec<Ref> = Vec::new();
        let mut reached = vec![false; self.cnf.clauses().len()];
        let mut stack = vec![Frame::Enter(root)];

        while let Some(frame) = stack.pop() {
            self.counter.check_interrupt()?;
            match frame {
                Frame::Enter(index) => match tree.node(index) {
                    Some(JoinNode::Terminal { index }) => {
                        reached[*index] = true;
                        let f = self.clause_diagram(&self.cnf.clauses()[*index]);
                        values.push(f);
                    }
                    Some(JoinNode::Nonterminal { children, .. }) => {
                        stack.push(Frame::Exit(index));
                        stack.extend(children.iter().rev().map(|&c| Frame::Enter(c)));
                    }
                    None => {
                        return Err(Error::InvalidJoinTree(format!("node {} does not exist", index + 1)));
                    }
                },
                Frame::Exit(index) => {
                    let Some(JoinNode::Nonterminal {
                        children, projectable, ..
                    }) = tree.node(index)
                    else {
                        return Err(Error::InvalidJoinTree(format!("node {} is not a nonterminal", index + 1)));
                    };
                    let operands = values.split_off(values.len() - children.len());
                    let product = self.add.apply_mul_many(operands);
                    let f = self.abstract_all(product, projectable)?;
                    values.push(f);
                    self.maybe_collect_garbage(&values);
                }
            }
        }

        if let Some(clause) = reached.iter().position(|&r| !r) {
            return Err(Error::InvalidJoinTree(format!(
                "clause {} is not below root {}",
                clause + 1,
                root + 1
            )));
        }
        match values.as_slice() {
            [f] => self.constant_value(*f),
            _ => Err(Error::InvalidJoinTree(format!("{} diagrams left at the root", values.len()))),
        }
    }

    fn count_monolithic(&mut self) -> Result<f64> {
        let cnf = self.cnf;
        let f = self
            .add
            .apply_mul_many(cnf.clauses().iter().map(|c| self.clause_diagram(c)));
        let vars = cnf.apparent_vars().iter().copied().collect();
        let f = self.abstract_all(f, &vars)?;
        self.constant_value(f)
    }

    fn count_linear(&mut self) -> Result<f64> {
        let cnf = self.cnf;
        let mut acc = self.add.one;
        for (clause, projectable) in cnf.clauses().iter().zip(linear_projectable_sets(cnf)) {
            self.counter.check_interrupt()?;
            let f = self.clause_diagram(clause);
            acc = self.add.apply_mul(acc, f);
            acc = self.abstract_all(acc, &projectable)?;
            self.maybe_collect_garbage(&[acc]);
        }
        self.constant_value(acc)
    }

    fn count_list(&mut self, clustering: &Clustering) -> Result<f64> {
        let cnf = self.cnf;
        let mut acc = self.add.one;
        for i in 0..clustering.len() {
            self.counter.check_interrupt()?;
            for &c in clustering.clauses(i) {
                let f = self.clause_diagram(&cnf.clauses()[c]);
                acc = self.add.apply_mul(acc, f);
            }
            acc = self.abstract_all(acc, clustering.projectable(i))?;
            self.maybe_collect_garbage(&[acc]);
        }
        self.constant_value(acc)
    }

    fn count_tree(&mut self, mut clustering: Clustering) -> Result<f64> {
        let cnf = self.cnf;
        let mut routed: Vec<Vec<Ref>> = vec![Vec::new(); clustering.len()];
        let mut root_values = Vec::new();

        for i in 0..clustering.len() {
            self.counter.check_interrupt()?;
            let mut operands: Vec<Ref> = clustering
                .clauses(i)
                .iter()
                .map(|&c| self.clause_diagram(&cnf.clauses()[c]))
                .collect();
            operands.append(&mut routed[i]);
            if operands.is_empty() {
                continue;
            }

            let product = self.add.apply_mul_many(operands);
            let projectable = clustering.checked_projectable(i)?.clone();
            let f = self.abstract_all(product, &projectable)?;
            let remaining = self.support(f);
            match clustering.route(i, &remaining)? {
                Some(j) => routed[j].push(f),
                None => root_values.push(f),
            }

            let live: Vec<Ref> = routed.iter().flatten().chain(&root_values).copied().collect();
            self.maybe_collect_garbage(&live);
        }

        let f = self.add.apply_mul_many(root_values);
        self.constant_value(f)
    }

    /// Account for unprojected variables and report the count.
    fn finish(&self, apparent_count: f64) -> f64 {
        let cnf = self.cnf;
        let count = adjust_model_count(
            apparent_count,
            &self.projected,
            cnf.weights(),
            cnf.declared_var_count(),
        );
        if !cnf.weight_format().is_weighted() && count.fract() != 0.0 {
            warn!("Unweighted model count {} is not an integer", count);
        }
        debug!("Diagram manager: {:?}", self.add);
        count
    }
}
