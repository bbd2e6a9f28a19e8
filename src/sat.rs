use std::collections::HashMap;

use num_bigint::BigUint;

use crate::add::Add;
use crate::reference::Ref;

impl Add {
    /// Exact number of assignments to diagram variables `1..=num_vars` on which a 0/1 diagram is `1`.
    ///
    /// Returns `None` if the diagram has a terminal other than `0` or `1`.
    pub fn sat_count(&self, node: Ref, num_vars: usize) -> Option<BigUint> {
        let mut cache = HashMap::new();
        let max = BigUint::from(2u32).pow(num_vars as u32);
        self._sat_count(node, &max, &mut cache)
    }

    fn _sat_count(&self, node: Ref, max: &BigUint, cache: &mut HashMap<Ref, BigUint>) -> Option<BigUint> {
        if let Some(value) = self.value(node) {
            return if value == 0.0 {
                Some(BigUint::ZERO)
            } else if value == 1.0 {
                Some(max.clone())
            } else {
                None
            };
        }

        if let Some(count) = cache.get(&node) {
            return Some(count.clone());
        }

        let count_low = self._sat_count(self.low(node), max, cache)?;
        let count_high = self._sat_count(self.high(node), max, cache)?;
        let count: BigUint = (count_low + count_high) >> 1;

        cache.insert(node, count.clone());
        Some(count)
    }
}
