//! CNF formulas with literal weights, and their DIMACS readers.
//!
//! # Format
//!
//! ```text
//! c comment
//! p cnf <vars> <clauses>        # `p wcnf ...` is also accepted for per-literal weights
//! 1 -2 0                        # clause: literals terminated by 0, on one line
//! w 2 0.3                       # per-variable weight (Cachet)
//! w -2 0.7 0                    # per-literal weight (MCC), trailing 0 optional
//! c weights 0.3 0.7 0.5 0.5     # all weights on one comment line (miniC2D)
//! ```

use std::fmt::{Display, Formatter};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::types::{Lit, Var};

/// Path denoting standard input on the command line.
pub const STDIN_PATH: &str = "-";

/// Positive weight of a variable without a Cachet weight line.
const CACHET_DEFAULT_VAR_WEIGHT: f64 = 0.5;
const MCC_DEFAULT_LITERAL_WEIGHT: f64 = 1.0;

/// How literal weights are written in the input.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum WeightFormat {
    /// No weight lines; every literal weighs 1.
    Unweighted,
    /// One `c weights` line listing positive and negative weights of every variable.
    Minic2d,
    /// `w <var> <weight>`: the negative literal weighs `1 - weight`, and a weight of `-1` makes both literals weigh 1.
    Cachet,
    /// `w <lit> <weight> [0]`: missing literals weigh 1.
    #[default]
    Mcc,
}

impl WeightFormat {
    pub fn is_weighted(self) -> bool {
        self != WeightFormat::Unweighted
    }
}

impl Display for WeightFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WeightFormat::Unweighted => "UNWEIGHTED",
            WeightFormat::Minic2d => "MINIC2D",
            WeightFormat::Cachet => "CACHET",
            WeightFormat::Mcc => "MCC",
        };
        write!(f, "{}", name)
    }
}

/// Weights of both literals of every declared variable.
#[derive(Debug, Clone, PartialEq)]
pub struct LiteralWeights {
    positive: Vec<Option<f64>>,
    negative: Vec<Option<f64>>,
}

impl LiteralWeights {
    /// Weights with no entry for any of `num_vars` variables.
    fn empty(num_vars: usize) -> Self {
        Self {
            positive: vec![None; num_vars + 1],
            negative: vec![None; num_vars + 1],
        }
    }

    /// Every literal of `num_vars` variables weighs 1.
    pub fn unweighted(num_vars: usize) -> Self {
        Self {
            positive: vec![Some(1.0); num_vars + 1],
            negative: vec![Some(1.0); num_vars + 1],
        }
    }

    pub fn num_vars(&self) -> usize {
        self.positive.len() - 1
    }

    pub fn set(&mut self, lit: Lit, weight: f64) {
        let i = lit.var().index();
        if lit.is_positive() {
            self.positive[i] = Some(weight);
        } else {
            self.negative[i] = Some(weight);
        }
    }

    /// Weight of a literal. Panics if the variable is not declared.
    pub fn weight(&self, lit: Lit) -> f64 {
        let i = lit.var().index();
        let w = if lit.is_positive() {
            self.positive[i]
        } else {
            self.negative[i]
        };
        w.unwrap_or(MCC_DEFAULT_LITERAL_WEIGHT)
    }

    /// `w(+v) + w(-v)`, the factor a variable without constraints contributes to a count.
    pub fn sum(&self, var: Var) -> f64 {
        self.weight(var.pos()) + self.weight(var.neg())
    }

    /// Fill in the weights the input left out, following the conventions of `format`.
    fn complete(&mut self, format: WeightFormat) {
        for i in 1..=self.num_vars() {
            match format {
                WeightFormat::Unweighted => {
                    self.positive[i] = Some(1.0);
                    self.negative[i] = Some(1.0);
                }
                WeightFormat::Minic2d => {}
                WeightFormat::Cachet => {
                    let weight = self.positive[i].unwrap_or(CACHET_DEFAULT_VAR_WEIGHT);
                    if weight == -1.0 {
                        self.positive[i] = Some(1.0);
                        self.negative[i] = Some(1.0);
                    } else {
                        self.positive[i] = Some(weight);
                        self.negative[i] = Some(1.0 - weight);
                    }
                }
                WeightFormat::Mcc => {
                    self.positive[i].get_or_insert(MCC_DEFAULT_LITERAL_WEIGHT);
                    self.negative[i].get_or_insert(MCC_DEFAULT_LITERAL_WEIGHT);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cnf {
    declared_var_count: usize,
    clauses: Vec<Vec<Lit>>,
    /// Variables in order of first appearance.
    apparent_vars: Vec<Var>,
    /// Indexed by variable, marks members of `apparent_vars`.
    appeared: Vec<bool>,
    weights: LiteralWeights,
    weight_format: WeightFormat,
}

impl Cnf {
    /// Unweighted formula over `declared_var_count` variables.
    ///
    /// # Panics
    ///
    /// Panics if a clause mentions a variable above `declared_var_count`.
    pub fn new(declared_var_count: usize, clauses: Vec<Vec<Lit>>) -> Self {
        let mut cnf = Self {
            declared_var_count,
            clauses: Vec::new(),
            apparent_vars: Vec::new(),
            appeared: vec![false; declared_var_count + 1],
            weights: LiteralWeights::unweighted(declared_var_count),
            weight_format: WeightFormat::Unweighted,
        };
        for clause in clauses {
            cnf.add_clause(clause);
        }
        cnf
    }

    /// Same as [`Cnf::new`], from DIMACS integers.
    pub fn from_dimacs(declared_var_count: usize, clauses: &[&[i32]]) -> Self {
        let clauses = clauses
            .iter()
            .map(|c| c.iter().map(|&l| Lit::from_dimacs(l)).collect())
            .collect();
        Self::new(declared_var_count, clauses)
    }

    /// Replace the weights, marking the formula as weighted.
    pub fn with_weights(mut self, weights: LiteralWeights) -> Self {
        assert_eq!(weights.num_vars(), self.declared_var_count);
        self.weights = weights;
        self.weight_format = WeightFormat::Mcc;
        self
    }

    fn add_clause(&mut self, clause: Vec<Lit>) {
        for &lit in &clause {
            assert!(lit.var().index() <= self.declared_var_count);
            let var = lit.var();
            if !self.appeared[var.index()] {
                self.appeared[var.index()] = true;
                self.apparent_vars.push(var);
            }
        }
        self.clauses.push(clause);
    }

    pub fn declared_var_count(&self) -> usize {
        self.declared_var_count
    }

    pub fn clauses(&self) -> &[Vec<Lit>] {
        &self.clauses
    }

    pub fn apparent_vars(&self) -> &[Var] {
        &self.apparent_vars
    }

    pub fn weights(&self) -> &LiteralWeights {
        &self.weights
    }

    pub fn weight_format(&self) -> WeightFormat {
        self.weight_format
    }

    /// Index of the first empty clause, if any.
    pub fn empty_clause_index(&self) -> Option<usize> {
        self.clauses.iter().position(|c| c.is_empty())
    }

    /// Graph joining every two variables that share a clause.
    pub fn interaction_graph(&self) -> Graph {
        let mut graph = Graph::new(self.apparent_vars.iter().copied());
        for clause in &self.clauses {
            for (i, a) in clause.iter().enumerate() {
                for b in &clause[i + 1..] {
                    graph.add_edge(a.var(), b.var());
                }
            }
        }
        graph
    }

    pub fn from_path(path: impl AsRef<Path>, format: WeightFormat) -> Result<Self> {
        let path = path.as_ref();
        if path == Path::new(STDIN_PATH) {
            info!("Reading CNF formula from stdin...");
            Self::from_reader(io::stdin().lock(), format)
        } else {
            info!("Reading CNF formula from '{}'...", path.display());
            Self::from_reader(BufReader::new(File::open(path)?), format)
        }
    }

    pub fn parse(text: &str, format: WeightFormat) -> Result<Self> {
        Self::from_reader(text.as_bytes(), format)
    }

    pub fn from_reader(reader: impl BufRead, format: WeightFormat) -> Result<Self> {
        let mut parser = CnfParser::new(format);
        for (i, line) in reader.lines().enumerate() {
            parser.parse_line(i + 1, &line?)?;
        }
        parser.finish()
    }
}

/// Line-by-line state of a DIMACS read.
struct CnfParser {
    format: WeightFormat,
    cnf: Option<Cnf>,
    declared_clause_count: usize,
    problem_line: Option<usize>,
    minic2d_weight_line: Option<usize>,
    last_line: usize,
}

impl CnfParser {
    fn new(format: WeightFormat) -> Self {
        Self {
            format,
            cnf: None,
            declared_clause_count: 0,
            problem_line: None,
            minic2d_weight_line: None,
            last_line: 0,
        }
    }

    fn parse_line(&mut self, line: usize, text: &str) -> Result<()> {
        self.last_line = line;
        let words: Vec<&str> = text.split_whitespace().collect();
        let Some(&start) = words.first() else {
            return Ok(());
        };

        match start {
            "p" => self.parse_problem(line, &words),
            "c" => self.parse_comment(line, &words),
            "w" => self.parse_weight_line(line, &words),
            _ => self.parse_clause(line, &words),
        }
    }

    fn parse_problem(&mut self, line: usize, words: &[&str]) -> Result<()> {
        if let Some(first) = self.problem_line {
            return Err(Error::parse(line, format!("multiple problem lines: {} and {}", first, line)));
        }
        self.problem_line = Some(line);

        if words.len() != 4 {
            return Err(Error::parse(line, format!("problem line has {} words (should be 4)", words.len())));
        }
        let accepted = match self.format {
            WeightFormat::Mcc => words[1] == "wcnf" || words[1] == "cnf",
            _ => words[1] == "cnf",
        };
        if !accepted {
            return Err(Error::parse(line, format!("unexpected format '{}' for weight format {}", words[1], self.format)));
        }

        let num_vars: usize = parse_number(line, words[2])?;
        if i32::try_from(num_vars).is_err() {
            return Err(Error::parse(line, format!("{} variables exceed the 32-bit literal range", num_vars)));
        }
        self.declared_clause_count = parse_number(line, words[3])?;
        self.cnf = Some(Cnf {
            declared_var_count: num_vars,
            clauses: Vec::new(),
            apparent_vars: Vec::new(),
            appeared: vec![false; num_vars + 1],
            weights: LiteralWeights::empty(num_vars),
            weight_format: self.format,
        });
        Ok(())
    }

    fn cnf_mut(&mut self, line: usize, what: &str) -> Result<&mut Cnf> {
        self.cnf
            .as_mut()
            .ok_or_else(|| Error::parse(line, format!("no problem line before {}", what)))
    }

    fn parse_comment(&mut self, line: usize, words: &[&str]) -> Result<()> {
        if self.format != WeightFormat::Minic2d || words.get(1) != Some(&"weights") {
            return Ok(());
        }

        if let Some(first) = self.minic2d_weight_line {
            return Err(Error::parse(line, format!("multiple weight lines: {} and {}", first, line)));
        }
        self.minic2d_weight_line = Some(line);

        let cnf = self.cnf_mut(line, "weight line")?;
        let n = cnf.declared_var_count;
        if words.len() != 2 + 2 * n {
            return Err(Error::parse(
                line,
                format!("expected {} literal weights, found {}", 2 * n, words.len() - 2),
            ));
        }
        for i in 1..=n {
            let var = var_of(line, i as i64)?;
            cnf.weights.set(var.pos(), parse_weight(line, words[2 * i])?);
            cnf.weights.set(var.neg(), parse_weight(line, words[2 * i + 1])?);
        }
        Ok(())
    }

    fn parse_weight_line(&mut self, line: usize, words: &[&str]) -> Result<()> {
        let format = self.format;
        let cnf = self.cnf_mut(line, "weight line")?;
        let n = cnf.declared_var_count as i64;

        match format {
            WeightFormat::Cachet if words.len() == 3 => {
                let var: i64 = parse_number(line, words[1])?;
                if var <= 0 || var > n {
                    return Err(Error::parse(line, format!("variable {} is out of range 1..={}", var, n)));
                }
                let weight = parse_weight(line, words[2])?;
                cnf.weights.set(var_of(line, var)?.pos(), weight);
            }
            WeightFormat::Mcc if words.len() == 3 || (words.len() == 4 && words[3] == "0") => {
                let lit: i64 = parse_number(line, words[1])?;
                if lit == 0 || lit.unsigned_abs() > n as u64 {
                    return Err(Error::parse(line, format!("literal {} is out of range for {} variables", lit, n)));
                }
                let weight = parse_weight(line, words[2])?;
                cnf.weights.set(lit_of(line, lit)?, weight);
            }
            _ => {
                return Err(Error::parse(line, format!("weight line is inconsistent with weight format {}", format)));
            }
        }
        Ok(())
    }

    fn parse_clause(&mut self, line: usize, words: &[&str]) -> Result<()> {
        let cnf = self.cnf_mut(line, "clause line")?;
        let n = cnf.declared_var_count as i64;

        let mut clause = Vec::with_capacity(words.len());
        for (i, word) in words.iter().enumerate() {
            let num: i64 = parse_number(line, word)?;
            if num.unsigned_abs() > n as u64 {
                return Err(Error::parse(line, format!("literal {} is out of range for {} variables", num, n)));
            }
            let last = i == words.len() - 1;
            if num == 0 {
                if !last {
                    return Err(Error::parse(line, "clause terminated prematurely by '0'"));
                }
            } else if last {
                return Err(Error::parse(line, "missing end-of-clause indicator '0'"));
            } else {
                clause.push(lit_of(line, num)?);
            }
        }
        if clause.is_empty() {
            warn!("Empty clause on line {}", line);
        }
        cnf.add_clause(clause);
        Ok(())
    }

    fn finish(self) -> Result<Cnf> {
        let Some(mut cnf) = self.cnf else {
            return Err(Error::parse(self.last_line, "no problem line before the end of the formula"));
        };
        if self.format == WeightFormat::Minic2d && self.minic2d_weight_line.is_none() {
            return Err(Error::parse(self.last_line, "weight line ('c weights ...') not found"));
        }
        cnf.weights.complete(self.format);

        if cnf.clauses.len() != self.declared_clause_count {
            warn!(
                "Declared {} clauses but read {}",
                self.declared_clause_count,
                cnf.clauses.len()
            );
        }
        info!(
            "Read CNF: {} declared vars, {} apparent vars, {} clauses",
            cnf.declared_var_count,
            cnf.apparent_vars.len(),
            cnf.clauses.len()
        );
        debug!("Clauses: {:?}", cnf.clauses);
        Ok(cnf)
    }
}

fn lit_of(line: usize, num: i64) -> Result<Lit> {
    i32::try_from(num)
        .map(Lit::from_dimacs)
        .map_err(|_| Error::parse(line, format!("literal {} is out of the 32-bit range", num)))
}

fn var_of(line: usize, num: i64) -> Result<Var> {
    u32::try_from(num)
        .map(Var::new)
        .map_err(|_| Error::parse(line, format!("variable {} is out of the 32-bit range", num)))
}

fn parse_number<T: std::str::FromStr>(line: usize, word: &str) -> Result<T> {
    word.parse()
        .map_err(|_| Error::parse(line, format!("invalid number '{}'", word)))
}

fn parse_weight(line: usize, word: &str) -> Result<f64> {
    word.parse()
        .map_err(|_| Error::parse(line, format!("invalid weight '{}'", word)))
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn lits(c: &[i32]) -> Vec<Lit> {
        c.iter().map(|&l| Lit::from_dimacs(l)).collect()
    }

    #[test]
    fn test_parse_unweighted() -> Result<()> {
        let cnf = Cnf::parse("c example\np cnf 3 2\n1 -3 0\n\n3 2 0\n", WeightFormat::Unweighted)?;
        assert_eq!(cnf.declared_var_count(), 3);
        assert_eq!(cnf.clauses(), &[lits(&[1, -3]), lits(&[3, 2])]);
        assert_eq!(cnf.apparent_vars(), &[Var::new(1), Var::new(3), Var::new(2)]);
        assert_eq!(cnf.weights().weight(Lit::from_dimacs(-2)), 1.0);
        assert_eq!(cnf.empty_clause_index(), None);
        Ok(())
    }

    #[test]
    fn test_parse_empty_clause() -> Result<()> {
        let cnf = Cnf::parse("p cnf 2 2\n1 2 0\n0\n", WeightFormat::Unweighted)?;
        assert_eq!(cnf.empty_clause_index(), Some(1));
        Ok(())
    }

    #[test]
    fn test_parse_mcc() -> Result<()> {
        let cnf = Cnf::parse("p wcnf 2 1\nw 1 0.3 0\nw -2 0.25\n1 2 0\n", WeightFormat::Mcc)?;
        let w = cnf.weights();
        assert_eq!(w.weight(Lit::from_dimacs(1)), 0.3);
        assert_eq!(w.weight(Lit::from_dimacs(-1)), 1.0);
        assert_eq!(w.weight(Lit::from_dimacs(2)), 1.0);
        assert_eq!(w.weight(Lit::from_dimacs(-2)), 0.25);
        Ok(())
    }

    #[test]
    fn test_parse_cachet() -> Result<()> {
        let cnf = Cnf::parse("p cnf 3 1\nw 1 0.25\nw 3 -1\n1 2 3 0\n", WeightFormat::Cachet)?;
        let w = cnf.weights();
        assert_eq!(w.weight(Lit::from_dimacs(1)), 0.25);
        assert_eq!(w.weight(Lit::from_dimacs(-1)), 0.75);
        assert_eq!(w.weight(Lit::from_dimacs(2)), 0.5);
        assert_eq!(w.weight(Lit::from_dimacs(-2)), 0.5);
        assert_eq!(w.weight(Lit::from_dimacs(3)), 1.0);
        assert_eq!(w.weight(Lit::from_dimacs(-3)), 1.0);
        Ok(())
    }

    #[test]
    fn test_parse_minic2d() -> Result<()> {
        let cnf = Cnf::parse("p cnf 2 1\nc weights 0.1 0.9 0.6 0.4\n1 2 0\n", WeightFormat::Minic2d)?;
        let w = cnf.weights();
        assert_eq!(w.weight(Lit::from_dimacs(1)), 0.1);
        assert_eq!(w.weight(Lit::from_dimacs(-1)), 0.9);
        assert_eq!(w.weight(Lit::from_dimacs(2)), 0.6);
        assert_eq!(w.weight(Lit::from_dimacs(-2)), 0.4);
        Ok(())
    }

    #[test]
    fn test_minic2d_requires_weight_line() {
        let res = Cnf::parse("p cnf 1 1\n1 0\n", WeightFormat::Minic2d);
        assert!(matches!(res, Err(Error::Parse { .. })));
    }

    #[test]
    fn test_minic2d_weight_count() {
        let res = Cnf::parse("p cnf 2 1\nc weights 0.1 0.9\n1 0\n", WeightFormat::Minic2d);
        assert!(matches!(res, Err(Error::Parse { line: 2, .. })));
    }

    #[test]
    fn test_errors() {
        let cases = [
            ("p cnf 2 1\np cnf 2 1\n", 2),
            ("1 2 0\n", 1),
            ("p cnf 2 1\n1 3 0\n", 2),
            ("p cnf 2 1\n1 0 2 0\n", 2),
            ("p cnf 2 1\n1 2\n", 2),
            ("p cnf 2\n", 1),
            ("p cnf 2 1\n1 x 0\n", 2),
            ("p cnf 2 1\nw 1 0.5\n", 2),
            ("p cnf 3000000000 1\n", 1),
        ];
        for (text, expected_line) in cases {
            match Cnf::parse(text, WeightFormat::Unweighted) {
                Err(Error::Parse { line, message }) => {
                    println!("{:?}: {}", text, message);
                    assert_eq!(line, expected_line, "{:?}", text);
                }
                other => panic!("expected a parse error for {:?}, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_apparent_order_many_vars() -> Result<()> {
        let n = 2000;
        let text: String = (1..=n)
            .rev()
            .map(|v| format!("{} -{} 0\n", v, (v % n) + 1))
            .collect();
        let cnf = Cnf::parse(&format!("p cnf {} {}\n{}", n, n, text), WeightFormat::Unweighted)?;
        let expected: Vec<Var> = [n, 1].into_iter().chain((2..n).rev()).map(|v| Var::new(v as u32)).collect();
        assert_eq!(cnf.apparent_vars(), expected.as_slice());
        Ok(())
    }

    #[test]
    fn test_missing_problem_line() {
        let res = Cnf::parse("c nothing here\n", WeightFormat::Unweighted);
        assert!(matches!(res, Err(Error::Parse { .. })));
    }

    #[test]
    fn test_wcnf_requires_mcc() {
        let res = Cnf::parse("p wcnf 1 1\n1 0\n", WeightFormat::Cachet);
        assert!(matches!(res, Err(Error::Parse { line: 1, .. })));
    }

    #[test]
    fn test_interaction_graph() {
        let cnf = Cnf::from_dimacs(4, &[&[1, -2, 3], &[3, 4]]);
        let g = cnf.interaction_graph();
        assert_eq!(g.num_vertices(), 4);
        assert_eq!(g.num_edges(), 4);
        assert!(g.has_edge(Var::new(1), Var::new(3)));
        assert!(!g.has_edge(Var::new(1), Var::new(4)));
    }
}
