use std::fmt::{Display, Formatter};

/// Handle of a node stored in the [`Add`][crate::add::Add] manager.
///
/// Decision diagrams here carry no complement edges, so a reference is just
/// the index of its node in the unique table. Index 0 is the table sentry and
/// is never handed out.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Ref(u32);

impl Ref {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Return the index of the referenced node.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl Display for Ref {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}
