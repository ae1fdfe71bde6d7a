use std::cmp::Ordering;
use std::collections::binary_heap::BinaryHeap;
use std::marker::PhantomData;

use super::handle::{HandleIndex, HandleLike};

#[derive(PartialEq, Eq)]
struct InverseHandleIndex(HandleIndex);

impl PartialOrd for InverseHandleIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InverseHandleIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.cmp(&self.0)
    }
}

/// `HandlePool` hands out handles with a compact `index` field, and keeps track of the
/// current version of every index. An odd version marks a live slot, an even one a
/// freed slot. Freed indices are reused lowest first.
pub struct HandlePool<H: HandleLike> {
    versions: Vec<HandleIndex>,
    frees: BinaryHeap<InverseHandleIndex>,
    _phantom: PhantomData<H>,
}

impl<H: HandleLike> Default for HandlePool<H> {
    fn default() -> Self {
        HandlePool::new()
    }
}

impl<H: HandleLike> HandlePool<H> {
    pub fn new() -> Self {
        HandlePool {
            versions: Vec::new(),
            frees: BinaryHeap::new(),
            _phantom: PhantomData,
        }
    }

    /// Creates an unused handle.
    pub fn create(&mut self) -> H {
        if let Some(InverseHandleIndex(index)) = self.frees.pop() {
            let version = &mut self.versions[index as usize];
            *version = version.wrapping_add(1);
            H::new(index, *version)
        } else {
            self.versions.push(1);
            H::new(self.versions.len() as HandleIndex - 1, 1)
        }
    }

    /// Returns true if `handle` was created by this pool and has not been freed yet.
    #[inline]
    pub fn is_alive(&self, handle: H) -> bool {
        let index = handle.index() as usize;
        index < self.versions.len()
            && self.versions[index] & 0x1 == 1
            && self.versions[index] == handle.version()
    }

    /// Recycles the index of `handle` and marks its version as dead. Returns false if the
    /// handle was already stale.
    pub fn free(&mut self, handle: H) -> bool {
        if !self.is_alive(handle) {
            return false;
        }

        let index = handle.index();
        self.versions[index as usize] = self.versions[index as usize].wrapping_add(1);
        self.frees.push(InverseHandleIndex(index));
        true
    }

    /// Returns the total number of alive handles in this pool.
    #[inline]
    pub fn len(&self) -> usize {
        self.versions.len() - self.frees.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns an iterator over all the alive handles.
    #[inline]
    pub fn iter(&self) -> Iter<H> {
        Iter {
            versions: &self.versions,
            index: 0,
            _phantom: PhantomData,
        }
    }
}

/// Immutable `HandlePool` iterator, this struct is created by `iter` method on `HandlePool`.
pub struct Iter<'a, H> {
    versions: &'a [HandleIndex],
    index: usize,
    _phantom: PhantomData<H>,
}

impl<'a, H: HandleLike> Iterator for Iter<'a, H> {
    type Item = H;

    fn next(&mut self) -> Option<H> {
        while self.index < self.versions.len() {
            let index = self.index;
            self.index += 1;

            let version = self.versions[index];
            if version & 0x1 == 1 {
                return Some(H::new(index as HandleIndex, version));
            }
        }

        None
    }
}

#[cfg(test)]
mod test {
    use super::super::handle::Handle;
    use super::*;

    #[test]
    fn basic() {
        let mut pool: HandlePool<Handle> = HandlePool::new();
        assert_eq!(pool.len(), 0);

        let e1 = pool.create();
        assert!(e1.is_valid());
        assert!(pool.is_alive(e1));
        assert_eq!(pool.len(), 1);

        assert!(pool.free(e1));
        assert!(!pool.is_alive(e1));
        assert!(!pool.free(e1));
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn index_reuse() {
        let mut pool: HandlePool<Handle> = HandlePool::new();

        let v: Vec<Handle> = (0..10).map(|_| pool.create()).collect();
        for e in v.iter().rev() {
            pool.free(*e);
        }

        for i in 0..10 {
            let e = pool.create();
            assert_eq!(e.index(), i);
            assert!(v[i as usize].version() != e.version());
            assert!(!pool.is_alive(v[i as usize]));
        }
    }

    #[test]
    fn iter() {
        let mut pool: HandlePool<Handle> = HandlePool::new();
        let v: Vec<Handle> = (0..6).map(|_| pool.create()).collect();
        pool.free(v[1]);
        pool.free(v[4]);

        let alive: Vec<_> = pool.iter().collect();
        assert_eq!(alive, vec![v[0], v[2], v[3], v[5]]);
    }
}
