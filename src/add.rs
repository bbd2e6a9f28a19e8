//! Algebraic decision diagrams (ADDs).
//!
//! An ADD is a reduced ordered decision diagram whose terminals carry real
//! numbers instead of just `0`/`1`. A diagram over 0/1 terminals is the
//! indicator function of a Boolean formula; multiplying, adding and
//! restricting such diagrams is what weighted model counting is made of.
//!
//! All diagrams live in a single [`Add`] manager, which hash-conses nodes
//! (so equal functions share one [`Ref`]) and memoizes operations.
//!
//! Diagram variables are 1-indexed. A smaller variable sits closer to the root.
//! Terminals are stored as nodes with variable `0` and the bit pattern of their
//! value; `-0.0` is normalized to `0.0`, so equal constants share one node.

use std::cell::RefCell;
use std::cmp::min;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt::Debug;

use log::debug;

use crate::cache::Cache;
use crate::reference::Ref;
use crate::table::Table;
use crate::utils::{fold_f64, pairing3, MyHash};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Node {
    variable: u32,
    low: Ref,
    high: Ref,
    value: u64,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            variable: 0,
            low: Ref::new(0),
            high: Ref::new(0),
            value: 0,
        }
    }
}

impl MyHash for Node {
    fn hash(&self) -> u64 {
        if self.variable == 0 {
            fold_f64(f64::from_bits(self.value))
        } else {
            pairing3(self.variable as u64, self.low.get() as u64, self.high.get() as u64)
        }
    }
}

type Storage = Table<Node>;

/// Binary operations with a numeric terminal case.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Op {
    Add,
    Mul,
    Max,
    /// Disjunction of 0/1 diagrams: any non-zero terminal counts as true.
    Or,
}

impl Op {
    fn terminal(self, a: f64, b: f64) -> f64 {
        match self {
            Op::Add => a + b,
            Op::Mul => a * b,
            Op::Max => a.max(b),
            Op::Or => {
                if a != 0.0 || b != 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OpKey {
    Apply(Op, Ref, Ref),
    Not(Ref),
}

pub struct Add {
    storage: RefCell<Storage>,
    cache: RefCell<Cache<OpKey, Ref>>,
    pub zero: Ref,
    pub one: Ref,
}

impl Add {
    pub fn new(storage_bits: usize) -> Self {
        assert!(storage_bits <= 31, "Storage bits should be in the range 0..=31");

        let cache_bits = min(storage_bits, 16);
        let mut storage = Storage::new(storage_bits);

        let zero = storage.put(Node {
            value: 0f64.to_bits(),
            ..Node::default()
        });
        let one = storage.put(Node {
            value: 1f64.to_bits(),
            ..Node::default()
        });

        Self {
            storage: RefCell::new(storage),
            cache: RefCell::new(Cache::new(cache_bits)),
            zero: Ref::new(zero as u32),
            one: Ref::new(one as u32),
        }
    }
}

impl Default for Add {
    fn default() -> Self {
        Add::new(16)
    }
}

impl Debug for Add {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = self.storage.borrow();
        let cache = self.cache.borrow();
        f.debug_struct("Add")
            .field("capacity", &storage.capacity())
            .field("size", &storage.size())
            .field("real_size", &storage.real_size())
            .field("cache_hits", &cache.hits())
            .field("cache_misses", &cache.misses())
            .finish()
    }
}

impl Add {
    fn node(&self, node: Ref) -> Node {
        *self.storage.borrow().value(node.index())
    }

    /// Variable labelling the node, or `0` for a terminal.
    pub fn variable(&self, node: Ref) -> u32 {
        self.node(node).variable
    }
    pub fn low(&self, node: Ref) -> Ref {
        self.node(node).low
    }
    pub fn high(&self, node: Ref) -> Ref {
        self.node(node).high
    }

    pub fn is_terminal(&self, node: Ref) -> bool {
        self.variable(node) == 0
    }
    pub fn is_zero(&self, node: Ref) -> bool {
        node == self.zero
    }
    pub fn is_one(&self, node: Ref) -> bool {
        node == self.one
    }

    /// Value of a constant diagram, or `None` if the diagram still depends on a variable.
    pub fn value(&self, node: Ref) -> Option<f64> {
        let n = self.node(node);
        if n.variable == 0 {
            Some(f64::from_bits(n.value))
        } else {
            None
        }
    }

    /// Position of the node in the variable order; terminals are below every variable.
    fn level(&self, node: Ref) -> u32 {
        match self.variable(node) {
            0 => u32::MAX,
            v => v,
        }
    }

    /// Number of live nodes in the manager, terminals included.
    pub fn num_nodes(&self) -> usize {
        self.storage.borrow().real_size()
    }

    pub fn constant(&self, value: f64) -> Ref {
        let value = if value == 0.0 { 0.0 } else { value };
        let i = self.storage.borrow_mut().put(Node {
            value: value.to_bits(),
            ..Node::default()
        });
        Ref::new(i as u32)
    }

    pub fn mk_node(&self, v: u32, low: Ref, high: Ref) -> Ref {
        debug!("mk(v = {}, low = {}, high = {})", v, low, high);

        assert_ne!(v, 0, "Variable index should not be zero");

        if low == high {
            debug!("mk: duplicates {} == {}", low, high);
            return low;
        }

        let i = self.storage.borrow_mut().put(Node {
            variable: v,
            low,
            high,
            value: 0,
        });
        Ref::new(i as u32)
    }

    /// Indicator of a single variable: `1` where it is true, `0` elsewhere.
    pub fn mk_var(&self, v: u32) -> Ref {
        assert_ne!(v, 0, "Variable index should not be zero");
        self.mk_node(v, self.zero, self.one)
    }

    pub fn top_cofactors(&self, node: Ref, v: u32) -> (Ref, Ref) {
        assert_ne!(v, 0, "Variable index should not be zero");

        let n = self.node(node);
        if n.variable == 0 || v < n.variable {
            return (node, node);
        }
        assert_eq!(v, n.variable);
        (n.low, n.high)
    }

    /// Combine two diagrams pointwise with `op`.
    pub fn apply(&self, op: Op, f: Ref, g: Ref) -> Ref {
        debug!("apply(op = {:?}, f = {}, g = {})", op, f, g);

        if let (Some(a), Some(b)) = (self.value(f), self.value(g)) {
            return self.constant(op.terminal(a, b));
        }

        match op {
            Op::Mul => {
                if self.is_zero(f) || self.is_zero(g) {
                    return self.zero;
                }
                if self.is_one(f) {
                    return g;
                }
                if self.is_one(g) {
                    return f;
                }
            }
            Op::Add => {
                if self.is_zero(f) {
                    return g;
                }
                if self.is_zero(g) {
                    return f;
                }
            }
            Op::Or => {
                if self.is_one(f) || self.is_one(g) {
                    return self.one;
                }
                if self.is_zero(f) || f == g {
                    return g;
                }
                if self.is_zero(g) {
                    return f;
                }
            }
            Op::Max => {
                if f == g {
                    return f;
                }
            }
        }

        // Every supported operation is commutative.
        let (f, g) = if f <= g { (f, g) } else { (g, f) };
        let key = OpKey::Apply(op, f, g);
        let cached = self.cache.borrow_mut().get(&key);
        if let Some(res) = cached {
            debug!("cache: apply(op = {:?}, f = {}, g = {}) -> {}", op, f, g, res);
            return res;
        }

        let m = min(self.level(f), self.level(g));
        let (f0, f1) = self.top_cofactors(f, m);
        let (g0, g1) = self.top_cofactors(g, m);
        let low = self.apply(op, f0, g0);
        let high = self.apply(op, f1, g1);
        let res = self.mk_node(m, low, high);

        debug!("computed: apply(op = {:?}, f = {}, g = {}) -> {}", op, f, g, res);
        self.cache.borrow_mut().insert(key, res);
        res
    }

    pub fn apply_add(&self, f: Ref, g: Ref) -> Ref {
        self.apply(Op::Add, f, g)
    }

    pub fn apply_mul(&self, f: Ref, g: Ref) -> Ref {
        self.apply(Op::Mul, f, g)
    }

    pub fn apply_max(&self, f: Ref, g: Ref) -> Ref {
        self.apply(Op::Max, f, g)
    }

    pub fn apply_or(&self, f: Ref, g: Ref) -> Ref {
        self.apply(Op::Or, f, g)
    }

    pub fn apply_mul_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Ref {
        let mut res = self.one;
        for node in nodes {
            res = self.apply_mul(res, node);
        }
        res
    }

    /// Boolean complement: `1` where the diagram is zero, `0` elsewhere.
    pub fn apply_not(&self, f: Ref) -> Ref {
        debug!("apply_not(f = {})", f);

        if let Some(a) = self.value(f) {
            return if a == 0.0 { self.one } else { self.zero };
        }

        let key = OpKey::Not(f);
        let cached = self.cache.borrow_mut().get(&key);
        if let Some(res) = cached {
            return res;
        }

        let n = self.node(f);
        let low = self.apply_not(n.low);
        let high = self.apply_not(n.high);
        let res = self.mk_node(n.variable, low, high);
        self.cache.borrow_mut().insert(key, res);
        res
    }

    /// Cofactor `f|v<-b`.
    pub fn restrict(&self, f: Ref, v: u32, b: bool) -> Ref {
        let mut cache = HashMap::new();
        self.restrict_(f, v, b, &mut cache)
    }

    fn restrict_(&self, f: Ref, v: u32, b: bool, cache: &mut HashMap<Ref, Ref>) -> Ref {
        assert_ne!(v, 0, "Variable index should not be zero");

        let n = self.node(f);

        if n.variable == 0 || v < n.variable {
            // 'f' does not depend on 'v'
            return f;
        }

        if v == n.variable {
            return if b { n.high } else { n.low };
        }

        if let Some(&res) = cache.get(&f) {
            return res;
        }

        let low = self.restrict_(n.low, v, b, cache);
        let high = self.restrict_(n.high, v, b, cache);
        let res = self.mk_node(n.variable, low, high);
        cache.insert(f, res);
        res
    }

    /// Weighted existential abstraction of `v`:
    ///
    /// ```text
    /// wpos * f|v<-1 + wneg * f|v<-0
    /// ```
    pub fn abstract_weighted(&self, f: Ref, v: u32, wpos: f64, wneg: f64) -> Ref {
        debug!("abstract_weighted(f = {}, v = {}, wpos = {}, wneg = {})", f, v, wpos, wneg);
        let positive = self.apply_mul(self.constant(wpos), self.restrict(f, v, true));
        let negative = self.apply_mul(self.constant(wneg), self.restrict(f, v, false));
        self.apply_add(positive, negative)
    }

    /// Evaluate the diagram under a total assignment of its variables.
    pub fn evaluate(&self, f: Ref, assignment: impl Fn(u32) -> bool) -> f64 {
        let mut current = f;
        loop {
            let n = self.node(current);
            if n.variable == 0 {
                return f64::from_bits(n.value);
            }
            current = if assignment(n.variable) { n.high } else { n.low };
        }
    }

    pub fn descendants(&self, nodes: impl IntoIterator<Item = Ref>) -> HashSet<u32> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from_iter(nodes);

        while let Some(node) = queue.pop_front() {
            if visited.insert(node.get()) {
                let n = self.node(node);
                if n.variable != 0 {
                    queue.push_back(n.low);
                    queue.push_back(n.high);
                }
            }
        }

        visited
    }

    /// Variables the diagram actually depends on.
    pub fn support(&self, f: Ref) -> BTreeSet<u32> {
        self.descendants([f])
            .into_iter()
            .map(|i| self.variable(Ref::new(i)))
            .filter(|&v| v != 0)
            .collect()
    }

    /// Number of nodes in the diagram, terminals included.
    pub fn size(&self, f: Ref) -> usize {
        self.descendants([f]).len()
    }

    /// Drop every node not reachable from `roots` (or from the `0`/`1` terminals).
    ///
    /// Any [`Ref`] not reachable from `roots` is invalid afterwards.
    /// Returns the number of dropped nodes.
    pub fn collect_garbage(&self, roots: &[Ref]) -> usize {
        debug!("Collecting garbage...");

        self.cache.borrow_mut().clear();

        let alive = self.descendants(roots.iter().copied().chain([self.zero, self.one]));
        let dropped = self
            .storage
            .borrow_mut()
            .retain(|index| alive.contains(&(index as u32)));

        debug!("Dropped {} nodes, {} alive", dropped, alive.len());
        dropped
    }

    pub fn to_bracket_string(&self, node: Ref) -> String {
        let n = self.node(node);
        if n.variable == 0 {
            return format!("({})", f64::from_bits(n.value));
        }

        format!(
            "{}:(x{}, {}, {})",
            node,
            n.variable,
            self.to_bracket_string(n.high),
            self.to_bracket_string(n.low)
        )
    }
}
