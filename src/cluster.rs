//! Clause clustering and join-tree construction.
//!
//! Given an elimination ordering of the variables, every clause is put into
//! the cluster of its first (bucket elimination) or last (Bouquet's method)
//! variable. Clusters are then combined either as a list, one after another
//! into a single accumulator, or as a tree, where each processed cluster is
//! routed to the first later cluster sharing a variable with it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use log::{debug, info};

use crate::cnf::Cnf;
use crate::error::{Error, Result};
use crate::join::JoinTree;
use crate::types::Var;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum ClusteringHeuristic {
    /// Conjoin all clauses, then abstract every variable.
    Monolithic,
    /// Conjoin clauses in order, abstracting variables absent from later clauses.
    Linear,
    BucketList,
    BucketTree,
    BouquetList,
    #[default]
    BouquetTree,
}

impl ClusteringHeuristic {
    pub const ALL: [ClusteringHeuristic; 6] = [
        ClusteringHeuristic::Monolithic,
        ClusteringHeuristic::Linear,
        ClusteringHeuristic::BucketList,
        ClusteringHeuristic::BucketTree,
        ClusteringHeuristic::BouquetList,
        ClusteringHeuristic::BouquetTree,
    ];

    /// Clustering policy, for the heuristics that cluster at all.
    pub fn policy(self) -> Option<ClusteringPolicy> {
        match self {
            ClusteringHeuristic::BucketList | ClusteringHeuristic::BucketTree => Some(ClusteringPolicy::Bucket),
            ClusteringHeuristic::BouquetList | ClusteringHeuristic::BouquetTree => Some(ClusteringPolicy::Bouquet),
            ClusteringHeuristic::Monolithic | ClusteringHeuristic::Linear => None,
        }
    }

    pub fn is_tree(self) -> bool {
        matches!(self, ClusteringHeuristic::BucketTree | ClusteringHeuristic::BouquetTree)
    }
}

impl Display for ClusteringHeuristic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ClusteringHeuristic::Monolithic => "MONOLITHIC",
            ClusteringHeuristic::Linear => "LINEAR",
            ClusteringHeuristic::BucketList => "BUCKET_LIST",
            ClusteringHeuristic::BucketTree => "BUCKET_TREE",
            ClusteringHeuristic::BouquetList => "BOUQUET_LIST",
            ClusteringHeuristic::BouquetTree => "BOUQUET_TREE",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ClusteringPolicy {
    /// Cluster by the lowest-ranked variable; cluster `i` eliminates `ordering[i]`.
    Bucket,
    /// Cluster by the highest-ranked variable; a cluster eliminates the variables no later cluster mentions.
    Bouquet,
}

/// Clauses grouped into one cluster per ordered variable.
#[derive(Debug, Clone)]
pub struct Clustering {
    policy: ClusteringPolicy,
    ordering: Vec<Var>,
    clusters: Vec<Vec<usize>>,
    /// Variables each cluster has to deal with, grown by routing.
    occurrent: Vec<BTreeSet<Var>>,
    projectable: Vec<BTreeSet<Var>>,
}

impl Clustering {
    pub fn new(cnf: &Cnf, ordering: Vec<Var>, policy: ClusteringPolicy) -> Result<Self> {
        let rank: BTreeMap<Var, usize> = ordering.iter().enumerate().map(|(i, &v)| (v, i)).collect();
        let n = ordering.len();

        let mut clusters = vec![Vec::new(); n];
        let mut occurrent = vec![BTreeSet::new(); n];
        for (c, clause) in cnf.clauses().iter().enumerate() {
            let ranks = clause.iter().filter_map(|lit| rank.get(&lit.var()).copied());
            let target = match policy {
                ClusteringPolicy::Bucket => ranks.min(),
                ClusteringPolicy::Bouquet => ranks.max(),
            };
            let Some(target) = target else {
                return Err(Error::MalformedOrdering(format!("clause {} has no ordered variable", c)));
            };
            clusters[target].push(c);
            occurrent[target].extend(clause.iter().map(|lit| lit.var()));
        }

        let projectable = match policy {
            ClusteringPolicy::Bucket => {
                for (i, &v) in ordering.iter().enumerate() {
                    occurrent[i].insert(v);
                }
                ordering.iter().map(|&v| BTreeSet::from([v])).collect()
            }
            ClusteringPolicy::Bouquet => {
                let mut later = BTreeSet::new();
                let mut sets = vec![BTreeSet::new(); n];
                for i in (0..n).rev() {
                    sets[i] = occurrent[i].difference(&later).copied().collect();
                    later.extend(occurrent[i].iter().copied());
                }
                sets
            }
        };

        let clustering = Self {
            policy,
            ordering,
            clusters,
            occurrent,
            projectable,
        };
        info!(
            "{:?} clustering: {} nonempty clusters of {}",
            policy,
            clustering.clusters.iter().filter(|c| !c.is_empty()).count(),
            n
        );
        debug!("Clusters: {:?}", clustering.clusters);
        debug!("Projectable: {:?}", clustering.projectable);
        Ok(clustering)
    }

    pub fn policy(&self) -> ClusteringPolicy {
        self.policy
    }

    pub fn ordering(&self) -> &[Var] {
        &self.ordering
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Clause indices of cluster `i`.
    pub fn clauses(&self, i: usize) -> &[usize] {
        &self.clusters[i]
    }

    pub fn occurrent(&self, i: usize) -> &BTreeSet<Var> {
        &self.occurrent[i]
    }

    pub fn projectable(&self, i: usize) -> &BTreeSet<Var> {
        &self.projectable[i]
    }

    /// Projectable set of cluster `i`, checked against the one-variable rule of bucket elimination.
    pub fn checked_projectable(&self, i: usize) -> Result<&BTreeSet<Var>> {
        let projectable = &self.projectable[i];
        if self.policy == ClusteringPolicy::Bucket && projectable.len() != 1 {
            return Err(Error::BucketProjection {
                cluster: i,
                size: projectable.len(),
            });
        }
        Ok(projectable)
    }

    /// Send what is left of cluster `from` to the first later cluster sharing a variable with `remaining`.
    ///
    /// Returns `None` when no later cluster does, meaning the result belongs to the root.
    /// The target cluster takes over the remaining variables.
    pub fn route(&mut self, from: usize, remaining: &BTreeSet<Var>) -> Result<Option<usize>> {
        let count = self.len();
        let target = (from + 1..count)
            .find(|&j| !self.occurrent[j].is_disjoint(remaining))
            .unwrap_or(count);

        if target <= from || target > count {
            return Err(Error::Routing {
                from,
                to: target,
                count,
            });
        }
        if target == count {
            debug!("Cluster {} goes to the root", from);
            return Ok(None);
        }

        debug!("Cluster {} goes to cluster {}", from, target);
        self.occurrent[target].extend(remaining.iter().copied());
        Ok(Some(target))
    }
}

/// For each clause, its variables that occur in no later clause.
pub fn linear_projectable_sets(cnf: &Cnf) -> Vec<BTreeSet<Var>> {
    let mut later = BTreeSet::new();
    let mut sets = vec![BTreeSet::new(); cnf.clauses().len()];
    for (i, clause) in cnf.clauses().iter().enumerate().rev() {
        let vars: BTreeSet<Var> = clause.iter().map(|lit| lit.var()).collect();
        sets[i] = vars.difference(&later).copied().collect();
        later.extend(vars);
    }
    sets
}

/// One nonterminal over all clauses, abstracting every appearing variable.
pub fn monolithic_join_tree(cnf: &Cnf) -> Result<JoinTree> {
    let m = cnf.clauses().len();
    let mut tree = JoinTree::new(cnf.declared_var_count(), m);
    tree.add_nonterminal(
        (0..m).collect(),
        cnf.apparent_vars().iter().copied().collect(),
        None,
    )?;
    Ok(tree)
}

/// A left-deep chain over the clauses in formula order.
pub fn linear_join_tree(cnf: &Cnf) -> Result<JoinTree> {
    let m = cnf.clauses().len();
    let mut tree = JoinTree::new(cnf.declared_var_count(), m);
    let mut acc = None;
    for (i, projectable) in linear_projectable_sets(cnf).into_iter().enumerate() {
        let children = acc.into_iter().chain([i]).collect();
        acc = Some(tree.add_nonterminal(children, projectable, None)?);
    }
    if acc.is_none() {
        tree.add_nonterminal(Vec::new(), BTreeSet::new(), None)?;
    }
    Ok(tree)
}

/// Clusters absorbed one by one into a running accumulator.
pub fn list_join_tree(cnf: &Cnf, clustering: &Clustering) -> Result<JoinTree> {
    let mut tree = JoinTree::new(cnf.declared_var_count(), cnf.clauses().len());
    let mut acc = None;
    // Projections of leading empty clusters, before there is an accumulator.
    let mut pending = BTreeSet::new();

    for i in 0..clustering.len() {
        let projectable = clustering.projectable(i).clone();
        let clauses = clustering.clauses(i);
        if clauses.is_empty() {
            match acc {
                Some(a) => tree.add_projectable(a, projectable),
                None => pending.extend(projectable),
            }
            continue;
        }

        let children = acc.into_iter().chain(clauses.iter().copied()).collect();
        let mut vars = std::mem::take(&mut pending);
        vars.extend(projectable);
        acc = Some(tree.add_nonterminal(children, vars, None)?);
    }
    if acc.is_none() {
        tree.add_nonterminal(Vec::new(), pending, None)?;
    }
    Ok(tree)
}

/// Clusters combined along their shared variables, under a projection-free root.
pub fn tree_join_tree(cnf: &Cnf, mut clustering: Clustering) -> Result<JoinTree> {
    let mut tree = JoinTree::new(cnf.declared_var_count(), cnf.clauses().len());
    let mut routed: Vec<Vec<usize>> = vec![Vec::new(); clustering.len()];
    let mut root_children = Vec::new();

    for i in 0..clustering.len() {
        let mut children = clustering.clauses(i).to_vec();
        children.append(&mut routed[i]);
        if children.is_empty() {
            continue;
        }

        let projectable = clustering.checked_projectable(i)?.clone();
        let remaining: BTreeSet<Var> = clustering
            .occurrent(i)
            .difference(&projectable)
            .copied()
            .collect();
        let node = tree.add_nonterminal(children, projectable, None)?;

        match clustering.route(i, &remaining)? {
            Some(j) => routed[j].push(node),
            None => root_children.push(node),
        }
    }

    tree.add_nonterminal(root_children, BTreeSet::new(), None)?;
    Ok(tree)
}
