//! Slot arenas addressed by generational handles
//!
//! Every record lives in a slot of an [`Arena`]; a handle is the slot index
//! plus the generation stamped on the slot when the record was inserted.
//! Freeing a record bumps nothing in the handle, so any later access through
//! the old handle sees a mismatched generation and panics instead of silently
//! reading whatever was allocated there next.
//!
//! Slot reuse is delegated to an [`Allocator`], so the same arena can run
//! with per-size free lists or without reuse at all.

/// A handle into an [`Arena`]
pub trait Handle: Copy + std::fmt::Debug {
    /// Builds a handle from a slot and generation
    fn new(slot: u32, generation: u32) -> Self;
    /// Returns the slot index
    fn slot(&self) -> usize;
    /// Returns the generation stamp
    fn generation(&self) -> u32;
}

/// Defines a generational handle type
macro_rules! define_handle {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub struct $name {
            slot: u32,
            generation: u32,
        }
        impl $crate::store::arena::Handle for $name {
            fn new(slot: u32, generation: u32) -> Self {
                Self { slot, generation }
            }
            fn slot(&self) -> usize {
                self.slot as usize
            }
            fn generation(&self) -> u32 {
                self.generation
            }
        }
    };
}
pub(crate) use define_handle;

/// Strategy for recycling arena slots
///
/// Records are grouped in size classes (for points, the number of auxiliary
/// vectors they carry); an allocator may only hand back a slot whose previous
/// occupant had the same class.
pub trait Allocator {
    /// Returns a previously released slot of the given class, if any
    fn reuse(&mut self, class: usize) -> Option<u32>;
    /// Marks a slot as free
    fn release(&mut self, class: usize, slot: u32);
    /// Forgets every released slot
    fn clear(&mut self);
}

/// Allocator keeping one free list per size class
#[derive(Default)]
pub struct FreeLists {
    lists: Vec<Vec<u32>>,
}

impl Allocator for FreeLists {
    fn reuse(&mut self, class: usize) -> Option<u32> {
        self.lists.get_mut(class)?.pop()
    }
    fn release(&mut self, class: usize, slot: u32) {
        if self.lists.len() <= class {
            self.lists.resize_with(class + 1, Vec::new);
        }
        self.lists[class].push(slot);
    }
    fn clear(&mut self) {
        self.lists.iter_mut().for_each(Vec::clear);
    }
}

/// Allocator that never recycles slots
///
/// Released records are dropped immediately; their slots stay empty until the
/// arena is cleared.
#[derive(Default)]
pub struct Collected;

impl Allocator for Collected {
    fn reuse(&mut self, _class: usize) -> Option<u32> {
        None
    }
    fn release(&mut self, _class: usize, _slot: u32) {}
    fn clear(&mut self) {}
}

/// Selects the [`Allocator`] used by a mesh's arenas
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Allocation {
    /// Recycle freed slots through per-size free lists
    #[default]
    FreeList,
    /// Never recycle slots
    Collected,
}

impl Allocation {
    pub(crate) fn allocator(self) -> Box<dyn Allocator> {
        match self {
            Allocation::FreeList => Box::<FreeLists>::default(),
            Allocation::Collected => Box::new(Collected),
        }
    }
}

struct Slot<V> {
    generation: u32,
    class: u8,
    value: Option<V>,
}

/// Storage for records of type `V`, addressed by handles of type `I`
pub struct Arena<V, I> {
    slots: Vec<Slot<V>>,
    next_generation: u32,
    live: usize,
    alloc: Box<dyn Allocator>,
    _phantom: std::marker::PhantomData<*const I>,
}

impl<V, I: Handle> Arena<V, I> {
    /// Builds an empty arena using the given slot strategy
    pub fn new(allocation: Allocation) -> Self {
        Self {
            slots: vec![],
            next_generation: 0,
            live: 0,
            alloc: allocation.allocator(),
            _phantom: std::marker::PhantomData,
        }
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.live
    }

    /// Stores a record of the given size class, returning its handle
    pub fn insert(&mut self, class: usize, value: V) -> I {
        // Generations are unique across the arena's whole lifetime (including
        // `clear`), so a handle can never match a later occupant of its slot.
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        self.live += 1;

        assert!(class <= u8::MAX as usize, "size class {class} out of range");
        let class_u8 = class as u8;
        let slot = match self.alloc.reuse(class) {
            Some(i) => {
                let s = &mut self.slots[i as usize];
                assert!(s.value.is_none(), "allocator reused a live slot");
                assert_eq!(s.class, class_u8, "allocator mixed size classes");
                s.generation = generation;
                s.value = Some(value);
                i
            }
            None => {
                assert!(self.slots.len() < u32::MAX as usize, "arena is full");
                let i = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation,
                    class: class_u8,
                    value: Some(value),
                });
                i
            }
        };
        I::new(slot, generation)
    }

    /// Removes a record, returning it
    ///
    /// # Panics
    /// If the handle is stale
    pub fn remove(&mut self, id: I) -> V {
        let s = self.slot_mut(id);
        let class = s.class as usize;
        let Some(v) = s.value.take() else {
            unreachable!("slot_mut only returns live slots")
        };
        self.live -= 1;
        self.alloc.release(class, id.slot() as u32);
        v
    }

    /// Checks whether the handle refers to a live record
    pub fn contains(&self, id: I) -> bool {
        self.slots
            .get(id.slot())
            .is_some_and(|s| s.generation == id.generation() && s.value.is_some())
    }

    /// Looks up a record, returning `None` if the handle is stale
    pub fn get(&self, id: I) -> Option<&V> {
        self.slots
            .get(id.slot())
            .filter(|s| s.generation == id.generation())
            .and_then(|s| s.value.as_ref())
    }

    fn slot_mut(&mut self, id: I) -> &mut Slot<V> {
        match self.slots.get_mut(id.slot()) {
            Some(s) if s.generation == id.generation() && s.value.is_some() => s,
            _ => panic!("stale handle {id:?}"),
        }
    }

    /// Drops every record
    pub fn clear(&mut self) {
        self.slots.clear();
        self.alloc.clear();
        self.live = 0;
    }
}

impl<V, I: Handle> std::ops::Index<I> for Arena<V, I> {
    type Output = V;
    fn index(&self, id: I) -> &V {
        match self.get(id) {
            Some(v) => v,
            None => panic!("stale handle {id:?}"),
        }
    }
}

impl<V, I: Handle> std::ops::IndexMut<I> for Arena<V, I> {
    fn index_mut(&mut self, id: I) -> &mut V {
        match self.slot_mut(id).value.as_mut() {
            Some(v) => v,
            None => unreachable!("slot_mut only returns live slots"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    define_handle!(TestId, "Handle used in arena tests");

    #[test]
    fn free_list_reuse() {
        let mut a: Arena<&str, TestId> = Arena::new(Allocation::FreeList);
        let x = a.insert(0, "x");
        let y = a.insert(1, "y");
        assert_eq!(a.len(), 2);
        assert_eq!(a.remove(x), "x");
        assert!(!a.contains(x));

        // A record in a different class doesn't take the freed slot
        let z = a.insert(1, "z");
        assert_ne!(z.slot(), x.slot());

        // One in the same class does, with a fresh generation
        let w = a.insert(0, "w");
        assert_eq!(w.slot(), x.slot());
        assert_ne!(w, x);
        assert_eq!(a[w], "w");
        assert_eq!(a[y], "y");
        assert_eq!(a.len(), 3);
    }

    #[test]
    fn collected_never_reuses() {
        let mut a: Arena<u32, TestId> = Arena::new(Allocation::Collected);
        let x = a.insert(0, 1);
        a.remove(x);
        let y = a.insert(0, 2);
        assert_ne!(x.slot(), y.slot());
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn clear_invalidates() {
        let mut a: Arena<u32, TestId> = Arena::new(Allocation::FreeList);
        let x = a.insert(0, 1);
        a.clear();
        let y = a.insert(0, 2);
        assert_eq!(x.slot(), y.slot());
        assert!(!a.contains(x));
        assert!(a.contains(y));
    }

    #[test]
    #[should_panic(expected = "stale handle")]
    fn stale_access() {
        let mut a: Arena<u32, TestId> = Arena::new(Allocation::FreeList);
        let x = a.insert(0, 1);
        a.remove(x);
        let _ = a[x];
    }
}
