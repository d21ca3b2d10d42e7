use slab::Slab;
use std::{
    fmt,
    marker::PhantomData,
    ops::{Index, IndexMut},
};

/// A typed handle into an [`Arena`].
pub trait ArenaId: Copy + Eq + fmt::Debug {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
        #[display("{_0}")]
        pub struct $name(pub(crate) u32);

        impl $crate::arena::ArenaId for $name {
            fn from_index(index: usize) -> Self {
                Self(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

pub(crate) use arena_id;

/// Slab storage addressed by a typed id instead of a raw key.
pub(crate) struct Arena<I, T> {
    slab: Slab<T>,
    _marker: PhantomData<I>,
}

impl<I, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self {
            slab: Slab::new(),
            _marker: PhantomData,
        }
    }
}

impl<I: ArenaId, T> Arena<I, T> {
    pub(crate) fn insert(&mut self, value: T) -> I {
        I::from_index(self.slab.insert(value))
    }

    pub(crate) fn remove(&mut self, id: I) -> T {
        self.slab
            .try_remove(id.index())
            .unwrap_or_else(|| panic!("Tried removing {id:?}, which is not present."))
    }

    pub(crate) fn contains(&self, id: I) -> bool {
        self.slab.contains(id.index())
    }

    pub(crate) fn get(&self, id: I) -> Option<&T> {
        self.slab.get(id.index())
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.slab.iter().map(|(index, value)| (I::from_index(index), value))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> {
        self.slab
            .iter_mut()
            .map(|(index, value)| (I::from_index(index), value))
    }
}

impl<I: ArenaId, T> Index<I> for Arena<I, T> {
    type Output = T;

    fn index(&self, id: I) -> &T {
        self.slab
            .get(id.index())
            .unwrap_or_else(|| panic!("Accessed {id:?}, which is not present."))
    }
}

impl<I: ArenaId, T> IndexMut<I> for Arena<I, T> {
    fn index_mut(&mut self, id: I) -> &mut T {
        self.slab
            .get_mut(id.index())
            .unwrap_or_else(|| panic!("Accessed {id:?}, which is not present."))
    }
}
