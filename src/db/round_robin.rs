//! Fixed-size connection list handed out in rotation.

use std::sync::atomic::{AtomicUsize, Ordering};

/// A fixed set of items served round-robin.
///
/// The cursor is atomic, so concurrent callers never observe the same
/// position twice in a row and never index out of bounds.
#[derive(Debug)]
pub struct RoundRobin<T> {
    items: Vec<T>,
    cursor: AtomicUsize,
}

impl<T> RoundRobin<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next item in rotation, `None` when the list is empty.
    pub fn next(&self) -> Option<&T> {
        if self.items.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.items.len();
        self.items.get(idx)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn test_rotation_wraps_around() {
        let rr = RoundRobin::new(vec!['a', 'b', 'c']);
        let seen: String = (0..7).filter_map(|_| rr.next().copied()).collect();
        assert_eq!(seen, "abcabca");
    }

    #[test]
    fn test_empty_list_yields_nothing() {
        let rr: RoundRobin<u8> = RoundRobin::new(Vec::new());
        assert!(rr.next().is_none());
        assert!(rr.is_empty());
    }

    #[test]
    fn test_concurrent_callers_spread_evenly() {
        let rr = Arc::new(RoundRobin::new((0..5).collect::<Vec<usize>>()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rr = Arc::clone(&rr);
                std::thread::spawn(move || {
                    (0..250)
                        .filter_map(|_| rr.next().copied())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<usize, usize> = HashMap::new();
        for handle in handles {
            for idx in handle.join().unwrap() {
                *counts.entry(idx).or_default() += 1;
            }
        }
        // 1000 picks over 5 slots, every slot exactly 200 times
        assert_eq!(counts.len(), 5);
        assert!(counts.values().all(|&n| n == 200));
    }
}
