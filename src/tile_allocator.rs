use bevy::{prelude::*, utils::HashSet};
use std::collections::VecDeque;

/// Hands out rectangular blocks of a texture atlas, used for the lightmaps of tiles.
pub trait TileAllocator: Send + Sync + 'static {
    /// Returns the pixel position of a free `width` by `height` block, or `None` if the
    /// atlas is exhausted.
    fn allocate(&mut self, width: u32, height: u32) -> Option<UVec2>;
    fn release(&mut self, position: UVec2, width: u32, height: u32);
    fn atlas_size(&self) -> UVec2;
}

/// Splits the atlas into a grid of equally sized blocks.
pub struct GridTileAllocator {
    atlas_size: u32,
    block_size: u32,
    unused_blocks: VecDeque<UVec2>,
    used_blocks: HashSet<UVec2>,
}

impl GridTileAllocator {
    pub fn new(atlas_size: u32, block_size: u32) -> Self {
        assert!(block_size > 0, "The block size must be positive.");
        let blocks = atlas_size / block_size;

        let unused_blocks = (0..blocks)
            .flat_map(|y| (0..blocks).map(move |x| UVec2::new(x, y) * block_size))
            .collect();

        Self {
            atlas_size,
            block_size,
            unused_blocks,
            used_blocks: HashSet::default(),
        }
    }

    pub fn free_blocks(&self) -> usize {
        self.unused_blocks.len()
    }
}

impl TileAllocator for GridTileAllocator {
    fn allocate(&mut self, width: u32, height: u32) -> Option<UVec2> {
        if width > self.block_size || height > self.block_size {
            return None;
        }

        let position = self.unused_blocks.pop_front()?;
        self.used_blocks.insert(position);
        Some(position)
    }

    fn release(&mut self, position: UVec2, _width: u32, _height: u32) {
        if !self.used_blocks.remove(&position) {
            panic!("Tried releasing a lightmap block, which is not allocated.");
        }

        self.unused_blocks.push_back(position);
    }

    fn atlas_size(&self) -> UVec2 {
        UVec2::splat(self.atlas_size)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn allocates_until_exhausted() {
        let mut allocator = GridTileAllocator::new(20, 10);

        let blocks = (0..4)
            .map(|_| allocator.allocate(10, 10).unwrap())
            .collect::<HashSet<_>>();
        assert_eq!(blocks.len(), 4);
        assert!(blocks.contains(&UVec2::new(10, 10)));
        assert_eq!(allocator.allocate(10, 10), None);

        allocator.release(UVec2::new(10, 0), 10, 10);
        assert_eq!(allocator.allocate(10, 10), Some(UVec2::new(10, 0)));
    }

    #[test]
    fn oversized_blocks_are_rejected() {
        let mut allocator = GridTileAllocator::new(64, 8);
        assert_eq!(allocator.allocate(9, 8), None);
        assert_eq!(allocator.free_blocks(), 64);
    }

    #[test]
    #[should_panic]
    fn releasing_unknown_block_panics() {
        let mut allocator = GridTileAllocator::new(64, 8);
        allocator.release(UVec2::ZERO, 8, 8);
    }
}
