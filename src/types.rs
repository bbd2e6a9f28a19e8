//! Type-safe wrappers for CNF variables and literals.
//!
//! CNF variables are 1-indexed, exactly as they appear in DIMACS files.
//! Decision-diagram variables live in their own index space (see [`crate::add`])
//! and are mapped to CNF variables by the counter.
use std::fmt;
use std::ops::Neg;

/// A CNF variable (1-indexed).
///
/// # Invariants
///
/// - Variable IDs must be >= 1 (0 terminates DIMACS clauses)
/// - Variable IDs never exceed the declared variable count of their formula
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Var(u32);

impl Var {
    /// Creates a new variable with the given ID.
    ///
    /// # Panics
    ///
    /// Panics if `id == 0`. Variables must be 1-indexed.
    pub fn new(id: u32) -> Self {
        assert_ne!(id, 0, "Variable IDs must be >= 1");
        Var(id)
    }

    /// Returns the raw variable ID as a `u32`.
    pub fn id(self) -> u32 {
        self.0
    }

    /// Returns the variable ID as an index into per-variable tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn pos(self) -> Lit {
        Lit(self.0 as i32)
    }

    pub fn neg(self) -> Lit {
        Lit(-(self.0 as i32))
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Var> for u32 {
    fn from(var: Var) -> Self {
        var.0
    }
}

/// A CNF literal: a variable or its negation, stored as a signed DIMACS integer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Lit(i32);

impl Lit {
    /// Creates a literal from its DIMACS form.
    ///
    /// # Panics
    ///
    /// Panics if `lit == 0`.
    pub fn from_dimacs(lit: i32) -> Self {
        assert_ne!(lit, 0, "Literal cannot be zero");
        Lit(lit)
    }

    pub fn to_dimacs(self) -> i32 {
        self.0
    }

    pub fn var(self) -> Var {
        Var(self.0.unsigned_abs())
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl Neg for Lit {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Lit(-self.0)
    }
}

impl fmt::Display for Lit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_creation() {
        let v1 = Var::new(1);
        let v2 = Var::new(2);
        assert_eq!(v1.id(), 1);
        assert_eq!(v2.index(), 2);
        assert!(v1 < v2);
    }

    #[test]
    #[should_panic(expected = "Variable IDs must be >= 1")]
    fn test_var_zero_panics() {
        Var::new(0);
    }

    #[test]
    fn test_literals() {
        let x = Var::new(3);
        assert_eq!(x.pos().to_dimacs(), 3);
        assert_eq!(x.neg().to_dimacs(), -3);
        assert_eq!(-x.pos(), x.neg());
        assert_eq!(Lit::from_dimacs(-3).var(), x);
        assert!(!x.neg().is_positive());
    }
}
