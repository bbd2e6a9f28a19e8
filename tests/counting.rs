//! End-to-end counting tests.
//!
//! Every clustering heuristic, under every variable ordering, must agree with
//! a brute-force enumeration of the satisfying assignments.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use addmc_rs::cluster::ClusteringHeuristic;
use addmc_rs::cnf::{Cnf, LiteralWeights, WeightFormat};
use addmc_rs::counter::Counter;
use addmc_rs::ordering::{var_ordering, VarOrder, VarOrderingHeuristic};
use addmc_rs::reader::JoinTreeReader;
use addmc_rs::types::{Lit, Var};
use addmc_rs::Error;

fn random_cnf(rng: &mut ChaCha8Rng, num_vars: usize, num_clauses: usize) -> Cnf {
    let clauses = (0..num_clauses)
        .map(|_| {
            let width = rng.random_range(1..=3);
            (0..width)
                .map(|_| {
                    let var = rng.random_range(1..=num_vars as i32);
                    Lit::from_dimacs(if rng.random_bool(0.5) { var } else { -var })
                })
                .collect()
        })
        .collect();
    Cnf::new(num_vars, clauses)
}

fn random_weights(rng: &mut ChaCha8Rng, num_vars: usize) -> LiteralWeights {
    let mut weights = LiteralWeights::unweighted(num_vars);
    for id in 1..=num_vars as u32 {
        let var = Var::new(id);
        weights.set(var.pos(), rng.random_range(0.1..2.0));
        weights.set(var.neg(), rng.random_range(0.1..2.0));
    }
    weights
}

/// Sum of weights over all satisfying assignments of the declared variables.
fn enumerate(cnf: &Cnf) -> f64 {
    let n = cnf.declared_var_count();
    let mut total = 0.0;
    for bits in 0u32..(1 << n) {
        let lit = |v: Var| {
            if bits >> (v.id() - 1) & 1 == 1 {
                v.pos()
            } else {
                v.neg()
            }
        };
        let satisfied = cnf
            .clauses()
            .iter()
            .all(|clause| clause.iter().any(|&l| lit(l.var()) == l));
        if satisfied {
            total += (1..=n as u32)
                .map(|id| cnf.weights().weight(lit(Var::new(id))))
                .product::<f64>();
        }
    }
    total
}

fn assert_close(actual: f64, expected: f64, context: &str) {
    let tolerance = 1e-9 * expected.abs().max(1.0);
    assert!(
        (actual - expected).abs() <= tolerance,
        "{}: got {}, expected {}",
        context,
        actual,
        expected
    );
}

fn all_orders() -> Vec<VarOrder> {
    VarOrderingHeuristic::ALL
        .into_iter()
        .flat_map(|h| [VarOrder::new(h), VarOrder::inverted(h)])
        .collect()
}

// ─── Examples ──────────────────────────────────────────────────────────────────

#[test]
fn two_clause_example() -> Result<(), Error> {
    let cnf = Cnf::parse("p cnf 2 2\n1 2 0\n-1 -2 0\n", WeightFormat::Unweighted)?;
    for heuristic in ClusteringHeuristic::ALL {
        assert_eq!(Counter::new(heuristic).count(&cnf)?, 2.0, "{}", heuristic);
    }
    Ok(())
}

#[test]
fn absent_variable_doubles_count() -> Result<(), Error> {
    let inner = Cnf::parse("p cnf 2 2\n1 2 0\n-1 -2 0\n", WeightFormat::Unweighted)?;
    let outer = Cnf::parse("p cnf 3 2\n1 2 0\n-1 -2 0\n", WeightFormat::Unweighted)?;
    for heuristic in ClusteringHeuristic::ALL {
        let counter = Counter::new(heuristic);
        assert_eq!(counter.count(&outer)?, 2.0 * counter.count(&inner)?);
    }
    Ok(())
}

#[test]
fn empty_clause_counts_zero() -> Result<(), Error> {
    let cnf = Cnf::parse("p cnf 3 3\n1 2 0\n0\n-3 0\n", WeightFormat::Unweighted)?;
    for heuristic in ClusteringHeuristic::ALL {
        let counter = Counter::new(heuristic);
        assert_eq!(counter.count(&cnf)?, 0.0);
        let tree = counter.construct_join_tree(&cnf)?;
        assert_eq!(tree.node_count(), 1);
        assert_eq!(counter.count_join_tree(&cnf, &tree)?, 0.0);
    }
    Ok(())
}

// ─── Agreement ─────────────────────────────────────────────────────────────────

#[test]
fn orderings_are_permutations() -> Result<(), Error> {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    for _ in 0..10 {
        let cnf = random_cnf(&mut rng, 9, 10);
        let mut expected = cnf.apparent_vars().to_vec();
        expected.sort();
        for order in all_orders() {
            let mut ordering = var_ordering(&cnf, order, 42)?;
            ordering.sort();
            assert_eq!(ordering, expected, "{}", order);
        }
    }
    Ok(())
}

#[test]
fn unweighted_counts_match_enumeration() -> Result<(), Error> {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    for round in 0..6 {
        let cnf = random_cnf(&mut rng, 7, 8);
        let expected = enumerate(&cnf);
        for heuristic in ClusteringHeuristic::ALL {
            for cluster_order in all_orders() {
                let counter = Counter::new(heuristic).with_cluster_order(cluster_order);
                let context = format!("round {} {} {}", round, heuristic, cluster_order);
                assert_close(counter.count(&cnf)?, expected, &context);
                let tree = counter.construct_join_tree(&cnf)?;
                assert_close(counter.count_join_tree(&cnf, &tree)?, expected, &context);
            }
        }
        let exact = Counter::default().exact_count(&cnf)?.map(|n| n.to_string());
        assert_eq!(exact, Some(expected.to_string()));
    }
    Ok(())
}

#[test]
fn weighted_counts_match_enumeration() -> Result<(), Error> {
    let mut rng = ChaCha8Rng::seed_from_u64(2);
    for round in 0..6 {
        let weights = random_weights(&mut rng, 7);
        let cnf = random_cnf(&mut rng, 7, 9).with_weights(weights);
        let expected = enumerate(&cnf);
        for heuristic in ClusteringHeuristic::ALL {
            for diagram_order in all_orders() {
                let counter = Counter::new(heuristic).with_diagram_order(diagram_order);
                let context = format!("round {} {} {}", round, heuristic, diagram_order);
                assert_close(counter.count(&cnf)?, expected, &context);
                let tree = counter.construct_join_tree(&cnf)?;
                assert_close(counter.count_join_tree(&cnf, &tree)?, expected, &context);
            }
        }
    }
    Ok(())
}

#[test]
fn random_diagram_order_is_seeded() -> Result<(), Error> {
    let mut rng = ChaCha8Rng::seed_from_u64(4);
    let cnf = random_cnf(&mut rng, 8, 10);
    let expected = enumerate(&cnf);
    for seed in [0, 1, 99] {
        let counter = Counter::new(ClusteringHeuristic::BucketTree)
            .with_cluster_order(VarOrder::new(VarOrderingHeuristic::Random))
            .with_diagram_order(VarOrder::inverted(VarOrderingHeuristic::Random))
            .with_seed(seed)
            .with_gc_threshold(16);
        assert_close(counter.count(&cnf)?, expected, &format!("seed {}", seed));
        let tree = counter.construct_join_tree(&cnf)?;
        assert_eq!(counter.construct_join_tree(&cnf)?.to_string(), tree.to_string());
    }
    Ok(())
}

#[test]
fn weight_formats_match_enumeration() -> Result<(), Error> {
    let clauses = "1 -2 0\n2 3 0\n-1 -3 0\n";
    let inputs = [
        (WeightFormat::Minic2d, format!("p cnf 3 3\nc weights 0.2 0.8 0.5 0.5 0.9 0.1\n{}", clauses)),
        (WeightFormat::Cachet, format!("p cnf 3 3\nw 1 0.2\nw 3 -1\n{}", clauses)),
        (WeightFormat::Mcc, format!("p wcnf 3 3\nw 1 0.2 0\nw -1 0.8 0\nw -3 2.5 0\n{}", clauses)),
    ];
    for (format, text) in inputs {
        let cnf = Cnf::parse(&text, format)?;
        let expected = enumerate(&cnf);
        for heuristic in ClusteringHeuristic::ALL {
            assert_close(Counter::new(heuristic).count(&cnf)?, expected, &format.to_string());
        }
    }
    Ok(())
}

// ─── Join-tree protocol ────────────────────────────────────────────────────────

#[test]
fn join_tree_round_trip() -> Result<(), Error> {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let weights = random_weights(&mut rng, 8);
    let cnf = random_cnf(&mut rng, 8, 10).with_weights(weights);
    for heuristic in ClusteringHeuristic::ALL {
        let counter = Counter::new(heuristic);
        let tree = counter.construct_join_tree(&cnf)?;
        let text = tree.to_string();
        let reread = JoinTreeReader::read(text.as_bytes())?;
        assert_eq!(reread.to_string(), text);
        assert_close(
            counter.count_join_tree(&cnf, &reread)?,
            counter.count(&cnf)?,
            &heuristic.to_string(),
        );
    }
    Ok(())
}

#[test]
fn truncated_tree_without_backup() {
    let text = "p jt 2 2 4\n3 1 e 1\n";
    assert!(matches!(JoinTreeReader::read(text.as_bytes()), Err(Error::NoUsableJoinTree)));
}

#[test]
fn truncated_tree_falls_back() -> Result<(), Error> {
    let cnf = Cnf::parse("p cnf 2 2\n1 2 0\n-1 -2 0\n", WeightFormat::Unweighted)?;
    let complete = "p jt 2 2 3\n3 1 2 e 1 2\n=\n";
    let partial = "p jt 2 2 4\n3 1 e\n";
    let tree = JoinTreeReader::read(format!("{}{}", complete, partial).as_bytes())?;
    assert_eq!(tree.to_string(), complete);
    assert_eq!(Counter::default().count_join_tree(&cnf, &tree)?, 2.0);
    Ok(())
}
