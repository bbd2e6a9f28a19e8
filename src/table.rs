use std::cmp::min;
use std::ops::Index;

use log::debug;

use crate::utils::MyHash;

#[derive(Clone)]
struct Entry<T> {
    value: T,
    next: usize,
    occupied: bool,
}

impl<T: Default> Default for Entry<T> {
    fn default() -> Self {
        Self {
            value: T::default(),
            next: 0,
            occupied: false,
        }
    }
}

/// Hash-consing table with separate chaining threaded through the cells.
///
/// Cell 0 is a permanently occupied sentry, so index 0 doubles as the
/// "end of chain" marker. Both the cell array and the bucket array grow on demand.
pub struct Table<T> {
    data: Vec<Entry<T>>,

    buckets: Vec<usize>,
    bitmask: u64,

    /// Index of the first *possibly* free (non-occupied) cell.
    min_free: usize,
    /// Index of the last cell ever handed out.
    last_index: usize,
    /// Number of occupied cells.
    real_size: usize,
}

impl<T: Default> Table<T> {
    /// Create a new table with initial capacity `2^bits`.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Storage bits should be in the range 0..=31");

        let capacity = 1 << bits;
        let mut data: Vec<Entry<T>> = Vec::with_capacity(capacity);
        data.resize_with(capacity, Entry::default);
        data[0].occupied = true;

        let buckets_size = 1 << min(bits, 16);

        Self {
            data,
            buckets: vec![0; buckets_size],
            bitmask: (buckets_size - 1) as u64,
            min_free: 1,
            last_index: 0,
            real_size: 0,
        }
    }

    /// Allocate a new cell in the table and return its index.
    pub(crate) fn alloc(&mut self) -> usize {
        let index = (self.min_free..=self.last_index)
            .find(|&i| !self.data[i].occupied)
            .unwrap_or_else(|| {
                self.last_index += 1;
                self.last_index
            });

        if index >= self.capacity() {
            let capacity = self.capacity() * 2;
            debug!("Growing storage to {} cells", capacity);
            self.data.resize_with(capacity, Entry::default);
        }

        self.data[index].occupied = true;
        self.min_free = index + 1;
        self.real_size += 1;

        index
    }

    /// Add a new value to the table (outside of any bucket) and return its index.
    pub fn add(&mut self, value: T) -> usize {
        let index = self.alloc();

        self.data[index].value = value;
        self.data[index].next = 0;

        index
    }
}

impl<T> Table<T> {
    /// Get the number of allocated cells, including the free ones.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }
    /// Get the index of the last cell ever handed out.
    pub fn size(&self) -> usize {
        self.last_index
    }
    /// Get the number of occupied cells.
    pub fn real_size(&self) -> usize {
        self.real_size
    }
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Get the reference to the value at the given index.
    pub fn value(&self, index: usize) -> &T {
        assert_ne!(index, 0, "Index is 0");
        &self.data[index].value
    }

    /// Check if the cell at the given index is occupied.
    pub fn is_occupied(&self, index: usize) -> bool {
        assert_ne!(index, 0, "Index is 0");
        self.data[index].occupied
    }
    /// Get the index of the next cell in the chain.
    pub fn next(&self, index: usize) -> usize {
        assert_ne!(index, 0, "Index is 0");
        self.data[index].next
    }
    /// Set the index of the next cell in the chain.
    pub fn set_next(&mut self, index: usize, next: usize) {
        assert_ne!(index, 0, "Index is 0");
        self.data[index].next = next;
    }

    /// Drop the value at the given index.
    ///
    /// The cell is not unlinked from its bucket; callers that drop chained
    /// cells must relink afterwards (see [`Table::retain`]).
    pub fn drop(&mut self, index: usize) {
        assert_ne!(index, 0, "Index is 0");
        assert!(self.data[index].occupied, "Cell {} is not occupied", index);

        self.data[index].occupied = false;
        self.min_free = min(self.min_free, index);
        self.real_size -= 1;
    }
}

impl<T: MyHash> Table<T> {
    fn bucket_index(&self, value: &T) -> usize {
        (value.hash() & self.bitmask) as usize
    }

    /// Rebuild all bucket chains from the occupied cells.
    fn relink(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = 0);
        for index in 1..=self.last_index {
            if self.data[index].occupied {
                let b = self.bucket_index(&self.data[index].value);
                self.data[index].next = self.buckets[b];
                self.buckets[b] = index;
            }
        }
    }

    fn maybe_grow_buckets(&mut self) {
        if self.real_size > 2 * self.buckets.len() {
            let size = self.buckets.len() * 2;
            debug!("Rehashing storage into {} buckets", size);
            self.buckets = vec![0; size];
            self.bitmask = (size - 1) as u64;
            self.relink();
        }
    }

    /// Keep only the occupied cells accepted by `keep`, dropping the rest.
    ///
    /// Returns the number of dropped cells.
    pub fn retain(&mut self, mut keep: impl FnMut(usize) -> bool) -> usize {
        let mut dropped = 0;
        for index in 1..=self.last_index {
            if self.data[index].occupied && !keep(index) {
                self.drop(index);
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.relink();
        }
        dropped
    }
}

impl<T: MyHash + Eq + Default> Table<T> {
    /// Put a value into the table, reusing an equal one if present, and return its index.
    pub fn put(&mut self, value: T) -> usize {
        let bucket_index = self.bucket_index(&value);
        let mut index = self.buckets[bucket_index];

        if index == 0 {
            let i = self.add(value);
            self.buckets[bucket_index] = i;
            self.maybe_grow_buckets();
            return i;
        }

        loop {
            if &value == self.value(index) {
                return index;
            }

            let next = self.next(index);
            if next == 0 {
                let i = self.add(value);
                self.set_next(index, i);
                self.maybe_grow_buckets();
                return i;
            }
            index = next;
        }
    }
}

impl<T> Index<usize> for Table<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        self.value(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
    struct Item(i32);

    impl MyHash for Item {
        fn hash(&self) -> u64 {
            self.0.unsigned_abs() as u64
        }
    }

    #[test]
    fn test_alloc() {
        let mut table = Table::<()>::new(2);
        assert_eq!(table.alloc(), 1);
        assert_eq!(table.alloc(), 2);
        assert_eq!(table.alloc(), 3);
    }

    #[test]
    fn test_alloc_grows() {
        let mut table = Table::<()>::new(2);
        for i in 1..=10 {
            assert_eq!(table.alloc(), i);
        }
        assert!(table.capacity() >= 11);
        assert_eq!(table.real_size(), 10);
    }

    #[test]
    fn test_drop_and_reuse() {
        let mut table = Table::new(2);
        let a = table.add(42);
        let b = table.add(43);
        table.drop(a);
        assert!(!table.is_occupied(a));
        assert_eq!(table.add(44), a);
        assert_eq!(table[b], 43);
    }

    #[test]
    fn test_put_dedup() {
        let mut table = Table::new(2);
        let i1 = table.put(Item(5));
        let i2 = table.put(Item(-5));
        assert_ne!(i1, i2);
        assert_eq!(table.put(Item(5)), i1);
        assert_eq!(table.put(Item(-5)), i2);
        assert_eq!(table.next(i1), i2);
    }

    #[test]
    fn test_put_many_rehashes() {
        let mut table = Table::new(1);
        let indices: Vec<usize> = (0..100).map(|i| table.put(Item(i))).collect();
        assert!(table.num_buckets() > 2);
        for (i, &index) in indices.iter().enumerate() {
            assert_eq!(table.put(Item(i as i32)), index);
        }
        assert_eq!(table.real_size(), 100);
    }

    #[test]
    fn test_retain() {
        let mut table = Table::new(2);
        let indices: Vec<usize> = (0..8).map(|i| table.put(Item(i))).collect();
        let dropped = table.retain(|index| table_keep(index, &indices));
        assert_eq!(dropped, 4);
        assert_eq!(table.real_size(), 4);
        // Survivors are still found through their buckets.
        assert_eq!(table.put(Item(0)), indices[0]);
        assert_eq!(table.put(Item(2)), indices[2]);
        assert_eq!(table.real_size(), 4);
    }

    fn table_keep(index: usize, indices: &[usize]) -> bool {
        indices.iter().position(|&i| i == index).is_some_and(|p| p % 2 == 0)
    }
}
