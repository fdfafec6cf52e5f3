//! Slot pool with LIFO index recycling.

use tracing::trace;

use crate::handle::{Handle, MAX_INDEX, StorageKind};

/// Growable slot store whose handles carry one [`StorageKind`].
///
/// Destroyed slots go on a free-list that is used as a stack: the most
/// recently freed index is the next one handed out, and the pool only grows
/// when the free-list is empty. The backing store never shrinks.
///
/// A handle must not be used after it has been destroyed. Its index may
/// already belong to a new element.
#[derive(Debug)]
pub struct ResourcePool<T, Tag> {
    kind: StorageKind,
    slots: Vec<Option<T>>,
    free: Vec<u32>,
    _tag: std::marker::PhantomData<fn() -> Tag>,
}

impl<T, Tag> ResourcePool<T, Tag> {
    pub fn new(kind: StorageKind) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            free: Vec::new(),
            _tag: std::marker::PhantomData,
        }
    }

    #[inline]
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    /// Stores `value`, reusing the most recently freed slot if there is one.
    ///
    /// # Panics
    ///
    /// Panics if the pool would grow past [`MAX_INDEX`].
    pub fn create(&mut self, value: T) -> (Handle<Tag>, &mut T) {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = self.slots.len();
                assert!(
                    index <= MAX_INDEX as usize,
                    "{:?} pool exhausted the handle index space",
                    self.kind
                );
                self.slots.push(None);
                index as u32
            }
        };
        trace!("{:?} pool slot {} allocated", self.kind, index);

        let slot = &mut self.slots[index as usize];
        let value = slot.insert(value);
        (Handle::new(index, self.kind), value)
    }

    /// Removes and returns the element, freeing its index for reuse.
    ///
    /// # Panics
    ///
    /// Panics if `handle` belongs to another storage kind or its slot is not live.
    pub fn destroy(&mut self, handle: Handle<Tag>) -> T {
        self.check_kind(handle);
        let index = handle.index();
        let value = self
            .slots
            .get_mut(index as usize)
            .and_then(Option::take)
            .unwrap_or_else(|| panic!("{handle:?} does not refer to a live slot"));
        self.free.push(index);
        trace!("{:?} pool slot {} freed", self.kind, index);
        value
    }

    /// # Panics
    ///
    /// Panics if `handle` belongs to another storage kind or its slot is not live.
    pub fn get(&self, handle: Handle<Tag>) -> &T {
        self.check_kind(handle);
        self.slots
            .get(handle.index() as usize)
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("{handle:?} does not refer to a live slot"))
    }

    /// # Panics
    ///
    /// Same as [`get`](Self::get).
    pub fn get_mut(&mut self, handle: Handle<Tag>) -> &mut T {
        self.check_kind(handle);
        self.slots
            .get_mut(handle.index() as usize)
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("{handle:?} does not refer to a live slot"))
    }

    /// Non-panicking liveness check, for validating caller input.
    pub fn contains(&self, handle: Handle<Tag>) -> bool {
        handle.kind() == self.kind
            && self
                .slots
                .get(handle.index() as usize)
                .is_some_and(Option::is_some)
    }

    /// Live elements in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<Tag>, &T)> + '_ {
        let kind = self.kind;
        self.slots.iter().enumerate().filter_map(move |(index, slot)| {
            slot.as_ref()
                .map(|value| (Handle::new(index as u32, kind), value))
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots ever allocated, live or free.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn check_kind(&self, handle: Handle<Tag>) {
        assert_eq!(
            handle.kind(),
            self.kind,
            "{handle:?} used with a {:?} pool",
            self.kind
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Tag {}
    type Pool = ResourcePool<&'static str, Tag>;

    #[test]
    fn test_create_tags_handles() {
        let mut pool = Pool::new(StorageKind::Dynamic);
        let (a, value) = pool.create("a");
        assert_eq!(*value, "a");
        assert_eq!(a.kind(), StorageKind::Dynamic);
        assert_eq!(a.index(), 0);
        assert_eq!(pool.create("b").0.index(), 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_freed_index_reused_before_growth() {
        let mut pool = Pool::new(StorageKind::Static);
        let (a, _) = pool.create("a");
        let (_b, _) = pool.create("b");
        assert_eq!(pool.destroy(a), "a");

        let (c, _) = pool.create("c");
        assert_eq!(c.index(), a.index());
        assert_eq!(pool.capacity(), 2);
        assert_eq!(*pool.get(c), "c");
    }

    #[test]
    fn test_free_list_is_lifo() {
        let mut pool = Pool::new(StorageKind::Static);
        let handles: Vec<_> = ["a", "b", "c"].map(|v| pool.create(v).0).to_vec();
        pool.destroy(handles[0]);
        pool.destroy(handles[2]);

        assert_eq!(pool.create("d").0.index(), 2);
        assert_eq!(pool.create("e").0.index(), 0);
        assert_eq!(pool.create("f").0.index(), 3);
    }

    #[test]
    fn test_live_handles_exclude_destroyed() {
        let mut pool = Pool::new(StorageKind::Static);
        let (a, _) = pool.create("a");
        let (b, _) = pool.create("b");
        pool.destroy(a);

        let live: Vec<_> = pool.iter().map(|(handle, _)| handle).collect();
        assert_eq!(live, vec![b]);
        assert!(!pool.contains(a));
        assert!(pool.contains(b));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_get_mut_updates_in_place() {
        let mut pool = Pool::new(StorageKind::Static);
        let (a, _) = pool.create("a");
        *pool.get_mut(a) = "z";
        assert_eq!(*pool.get(a), "z");
    }

    #[test]
    #[should_panic(expected = "used with a Static pool")]
    fn test_wrong_kind_panics() {
        let mut pool = Pool::new(StorageKind::Static);
        pool.create("a");
        pool.get(Handle::new(0, StorageKind::Dynamic));
    }

    #[test]
    #[should_panic(expected = "does not refer to a live slot")]
    fn test_double_destroy_panics() {
        let mut pool = Pool::new(StorageKind::Static);
        let (a, _) = pool.create("a");
        pool.destroy(a);
        pool.destroy(a);
    }

    #[test]
    fn test_contains_rejects_other_kind() {
        let mut pool = Pool::new(StorageKind::Static);
        let (a, _) = pool.create("a");
        assert!(!pool.contains(Handle::new(a.index(), StorageKind::Dynamic)));
    }
}
