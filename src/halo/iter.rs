//! Stencil iterators over a tile with halo dispatch.
//!
//! Both iterators yield a [`StencilCursor`] per tile position.
//! [`InnerStencilIter`] walks the inner view, where every stencil neighbor
//! is local by construction; [`BoundaryStencilIter`] walks the deduplicated
//! boundary slabs, where a neighbor access leaving the tile dispatches into
//! the halo buffer.
//!
//! The local slice is assumed to hold the tile in canonical (row- or
//! column-major) layout, i.e. the layout of the blocked patterns.

use crate::halo::block::HaloBlock;
use crate::halo::memory::HaloMemory;
use crate::halo::stencil::{StencilPoint, StencilSpec};
use crate::memregion::Dist;
use crate::pattern::{CartGrid, MemoryOrder, ViewSpec};

/// One tile position with stencil-neighbor access.
#[derive(Clone, Copy)]
pub struct StencilCursor<'a, T: Dist, const N: usize> {
    coords: [usize; N], // tile-relative
    local: &'a [T],
    block: &'a HaloBlock<N>,
    halo: Option<&'a HaloMemory<T, N>>,
    order: MemoryOrder,
}

impl<'a, T: Dist, const N: usize> StencilCursor<'a, T, N> {
    fn tile_grid(&self) -> CartGrid<N> {
        CartGrid::new(self.block.view().extent, self.order)
    }

    /// Tile-relative coordinates of the cursor.
    pub fn coords(&self) -> [usize; N] {
        self.coords
    }

    /// Global coordinates of the cursor.
    pub fn global_coords(&self) -> [usize; N] {
        let mut global = [0; N];
        for d in 0..N {
            global[d] = (self.block.view().offset[d] + self.coords[d] as isize) as usize;
        }
        global
    }

    /// The element under the cursor.
    pub fn center(&self) -> T {
        self.local[self.tile_grid().index(self.coords)]
    }

    /// The stencil spec the cursor dispatches over.
    pub fn stencil(&self) -> &'a StencilSpec<N> {
        self.block.stencil()
    }

    /// Stencil point `i`, coefficient included.
    pub fn point(&self, i: usize) -> &'a StencilPoint<N> {
        self.block.stencil().point(i)
    }

    /// The neighbor element along stencil point `i`: local when the target
    /// stays inside the tile, otherwise served from the halo buffer. `None`
    /// when the target falls into a suppressed region (or no halo buffer is
    /// attached).
    pub fn value_at(&self, i: usize) -> Option<T> {
        let offsets = self.block.stencil().point(i).offsets();
        let mut target = [0isize; N];
        let extent = self.block.view().extent;
        let mut inside = true;
        for d in 0..N {
            target[d] = self.coords[d] as isize + offsets[d];
            if target[d] < 0 || target[d] >= extent[d] as isize {
                inside = false;
            }
        }
        if inside {
            let mut coords = [0usize; N];
            for d in 0..N {
                coords[d] = target[d] as usize;
            }
            Some(self.local[self.tile_grid().index(coords)])
        } else {
            self.halo?.value_at_tile(self.block, target)
        }
    }
}

/// Walks a tile-relative view yielding cursors in memory order.
struct ViewWalker<'a, T: Dist, const N: usize> {
    local: &'a [T],
    block: &'a HaloBlock<N>,
    halo: Option<&'a HaloMemory<T, N>>,
    order: MemoryOrder,
    view_offset: [usize; N], // tile-relative
    grid: CartGrid<N>,
    next: usize,
}

impl<'a, T: Dist, const N: usize> ViewWalker<'a, T, N> {
    fn new(
        local: &'a [T],
        block: &'a HaloBlock<N>,
        halo: Option<&'a HaloMemory<T, N>>,
        order: MemoryOrder,
        view: &ViewSpec<N>,
    ) -> ViewWalker<'a, T, N> {
        let mut view_offset = [0; N];
        for d in 0..N {
            view_offset[d] = (view.offset[d] - block.view().offset[d]) as usize;
        }
        ViewWalker {
            local,
            block,
            halo,
            order,
            view_offset,
            grid: CartGrid::new(view.extent, order),
            next: 0,
        }
    }
}

impl<'a, T: Dist, const N: usize> Iterator for ViewWalker<'a, T, N> {
    type Item = StencilCursor<'a, T, N>;

    fn next(&mut self) -> Option<StencilCursor<'a, T, N>> {
        if self.next >= self.grid.size() {
            return None;
        }
        let rel = self.grid.coords(self.next);
        self.next += 1;
        let mut coords = [0; N];
        for d in 0..N {
            coords[d] = self.view_offset[d] + rel[d];
        }
        Some(StencilCursor {
            coords,
            local: self.local,
            block: self.block,
            halo: self.halo,
            order: self.order,
        })
    }
}

/// Iterator over the inner view: every neighbor access is local.
pub struct InnerStencilIter<'a, T: Dist, const N: usize> {
    walker: ViewWalker<'a, T, N>,
}

impl<'a, T: Dist, const N: usize> InnerStencilIter<'a, T, N> {
    pub fn new(
        local: &'a [T],
        block: &'a HaloBlock<N>,
        order: MemoryOrder,
    ) -> InnerStencilIter<'a, T, N> {
        InnerStencilIter {
            walker: ViewWalker::new(local, block, None, order, block.view_inner()),
        }
    }
}

impl<'a, T: Dist, const N: usize> Iterator for InnerStencilIter<'a, T, N> {
    type Item = StencilCursor<'a, T, N>;

    fn next(&mut self) -> Option<StencilCursor<'a, T, N>> {
        self.walker.next()
    }
}

/// Iterator over the boundary slabs: neighbor accesses leaving the tile
/// dispatch into the halo buffer.
pub struct BoundaryStencilIter<'a, T: Dist, const N: usize> {
    local: &'a [T],
    block: &'a HaloBlock<N>,
    halo: &'a HaloMemory<T, N>,
    order: MemoryOrder,
    slab: usize,
    walker: Option<ViewWalker<'a, T, N>>,
}

impl<'a, T: Dist, const N: usize> BoundaryStencilIter<'a, T, N> {
    pub fn new(
        local: &'a [T],
        block: &'a HaloBlock<N>,
        halo: &'a HaloMemory<T, N>,
        order: MemoryOrder,
    ) -> BoundaryStencilIter<'a, T, N> {
        let walker = block
            .boundary_views()
            .first()
            .map(|view| ViewWalker::new(local, block, Some(halo), order, view));
        BoundaryStencilIter {
            local,
            block,
            halo,
            order,
            slab: 0,
            walker,
        }
    }
}

impl<'a, T: Dist, const N: usize> Iterator for BoundaryStencilIter<'a, T, N> {
    type Item = StencilCursor<'a, T, N>;

    fn next(&mut self) -> Option<StencilCursor<'a, T, N>> {
        loop {
            let walker = self.walker.as_mut()?;
            if let Some(cursor) = walker.next() {
                return Some(cursor);
            }
            self.slab += 1;
            self.walker = self
                .block
                .boundary_views()
                .get(self.slab)
                .map(|view| ViewWalker::new(self.local, self.block, Some(self.halo), self.order, view));
        }
    }
}
