//! # addmc-rs: weighted model counting with algebraic decision diagrams
//!
//! **`addmc-rs`** computes the exact weighted model count of a CNF formula: the sum,
//! over all satisfying assignments, of the product of the weights of the chosen literals.
//!
//! ## How it works
//!
//! Every clause becomes an algebraic decision diagram (ADD), a canonical diagram whose
//! terminals are real numbers. Diagrams are multiplied together and their variables are
//! eliminated by *weighted existential abstraction*:
//!
//! ```text
//! ∃v. f  =  w(+v) · f|v=1  +  w(-v) · f|v=0
//! ```
//!
//! The order of multiplications and abstractions is a **join tree**: leaves are clauses,
//! inner nodes multiply their children and then abstract the variables no other part of
//! the formula mentions. A good join tree keeps the intermediate diagrams small.
//! Join trees come from clustering the clauses along a variable ordering computed on the
//! interaction graph of the formula, or from an external planner speaking the `p jt` protocol.
//!
//! ## Basic Usage
//!
//! ```rust
//! use addmc_rs::cnf::{Cnf, WeightFormat};
//! use addmc_rs::counter::Counter;
//!
//! // (x1 OR x2) AND (NOT x1 OR NOT x2)
//! let cnf = Cnf::parse("p cnf 2 2\n1 2 0\n-1 -2 0\n", WeightFormat::Unweighted)?;
//!
//! let counter = Counter::default();
//! assert_eq!(counter.count(&cnf)?, 2.0);
//!
//! // The same schedule as an explicit join tree.
//! let tree = counter.construct_join_tree(&cnf)?;
//! assert_eq!(counter.count_join_tree(&cnf, &tree)?, 2.0);
//! # Ok::<(), addmc_rs::Error>(())
//! ```
//!
//! ## Core Components
//!
//! - **[`add`]**: the [`Add`][crate::add::Add] manager and its operations.
//! - **[`cnf`]**: formulas and literal weights, read from DIMACS.
//! - **[`ordering`]**: variable-ordering heuristics (MCS, LexP, LexM and simpler ones).
//! - **[`cluster`]**: bucket and Bouquet clustering, join-tree construction.
//! - **[`join`]** and **[`reader`]**: join trees and the planner protocol.
//! - **[`counter`]**: the evaluator tying everything together.

pub mod add;
pub mod cache;
pub mod cluster;
pub mod cnf;
pub mod counter;
pub mod error;
pub mod graph;
pub mod join;
pub mod ordering;
pub mod reader;
pub mod reference;
pub mod sat;
pub mod table;
pub mod types;
pub mod utils;

pub use error::{Error, Result};
