//! Generation-based visited set for graph traversal.
//!
//! Marks are compared against a generation counter, so `clear()` is O(1)
//! amortized instead of zeroing the array. One set per thread is pooled and
//! reused by both insertion and search.

use std::cell::RefCell;

thread_local! {
    static VISITED_POOL: RefCell<VisitedSet> = RefCell::new(VisitedSet::new(0));
}

/// Run `f` with this thread's pooled visited set, pre-sized for `capacity` nodes.
pub(crate) fn with_visited<R>(capacity: usize, f: impl FnOnce(&mut VisitedSet) -> R) -> R {
    VISITED_POOL.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.ensure_capacity(capacity);
        f(&mut visited)
    })
}

/// Visited marks indexed by node handle.
///
/// A u16 generation keeps the full memset down to once every 65534 clears.
#[derive(Debug)]
pub struct VisitedSet {
    marks: Vec<u16>,
    generation: u16,
}

impl VisitedSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            marks: vec![0u16; capacity],
            generation: 1,
        }
    }

    /// Reset the set.
    pub fn clear(&mut self) {
        if self.generation == u16::MAX {
            self.marks.fill(0);
            self.generation = 1;
        } else {
            self.generation += 1;
        }
    }

    pub fn ensure_capacity(&mut self, cap: usize) {
        if cap > self.marks.len() {
            self.marks.resize(cap, 0);
        }
    }

    /// Mark `id` as visited. Returns `true` if it was not visited yet.
    ///
    /// Grows on demand: nodes appended by concurrent inserts can show up
    /// after the set was sized.
    #[inline]
    pub fn insert(&mut self, id: u32) -> bool {
        let idx = id as usize;
        if idx >= self.marks.len() {
            self.marks.resize((idx + 1).next_power_of_two(), 0);
        }
        if self.marks[idx] == self.generation {
            false
        } else {
            self.marks[idx] = self.generation;
            true
        }
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_clear() {
        let mut vs = VisitedSet::new(100);
        assert!(vs.insert(0));
        assert!(!vs.insert(0));
        assert!(vs.insert(50));

        vs.clear();
        assert!(vs.insert(0));
        assert!(vs.insert(50));
    }

    #[test]
    fn test_grows_past_capacity() {
        let mut vs = VisitedSet::new(4);
        assert!(vs.insert(1_000));
        assert!(!vs.insert(1_000));
        assert!(vs.insert(3));
    }

    #[test]
    fn test_generation_overflow() {
        let mut vs = VisitedSet::new(10);
        for _ in 0..65534 {
            vs.clear();
        }
        assert_eq!(vs.generation, u16::MAX);
        vs.insert(5);

        vs.clear();
        assert_eq!(vs.generation, 1);
        assert!(vs.insert(5));
    }

    #[test]
    fn test_pool_is_reused_per_thread() {
        with_visited(8, |vs| {
            vs.clear();
            assert!(vs.insert(7));
        });
        with_visited(8, |vs| {
            vs.clear();
            assert!(vs.insert(7), "pooled set must be cleared by the caller");
        });
    }
}
