//! The tile pattern: ownership as [`BlockPattern`], block-major local
//! storage.
//!
//! Elements of one block are contiguous in local memory; blocks are
//! enumerated in the pattern's memory order over the unit's local block
//! grid. Underfilled trailing blocks pack compactly (a partial block
//! occupies exactly its element count).

use crate::error::{TesseraError, TesseraResult};
use crate::pattern::block::BlockPattern;
use crate::pattern::{
    check_team_size, CartGrid, DistSpec, MemoryOrder, Pattern, TeamSpec, ViewSpec,
};
use crate::tessera_team::TesseraTeam;

#[derive(Clone, Copy, Debug)]
pub struct TilePattern<const N: usize> {
    base: BlockPattern<N>,
}

impl<const N: usize> TilePattern<N> {
    /// Tiled pattern with `tile` elements per block per dimension.
    pub fn new(
        extents: [usize; N],
        tile: [usize; N],
        team: TeamSpec<N>,
        my_unit: usize,
    ) -> TesseraResult<TilePattern<N>> {
        Self::with_order(extents, tile, team, my_unit, MemoryOrder::default())
    }

    pub fn with_order(
        extents: [usize; N],
        tile: [usize; N],
        team: TeamSpec<N>,
        my_unit: usize,
        order: MemoryOrder,
    ) -> TesseraResult<TilePattern<N>> {
        let mut dists = [DistSpec::None; N];
        for d in 0..N {
            dists[d] = DistSpec::Tile(tile[d]);
        }
        Ok(TilePattern {
            base: BlockPattern::with_order(extents, dists, team, my_unit, order)?,
        })
    }

    /// Balanced team shape, square-ish tiles of `tile` per dimension.
    pub fn with_team(
        team: &TesseraTeam,
        extents: [usize; N],
        tile: [usize; N],
    ) -> TesseraResult<TilePattern<N>> {
        Self::new(extents, tile, TeamSpec::balanced(team.num_units()), team.my_unit())
    }

    /// Extents (possibly underfilled) of the local block with block-grid
    /// coordinates `lb` on `unit`.
    fn local_block_extent(&self, unit: usize, lb: [usize; N]) -> TesseraResult<[usize; N]> {
        let uc = self.base.team_spec().coords(unit)?;
        let nblocks = self.base.blockspec();
        let blocksize = self.base.blocksize();
        let extents = self.base.extents();
        let mut extent = [0; N];
        for d in 0..N {
            let gb = lb[d] * self.base.team_spec().extent(d) + uc[d];
            if gb >= nblocks[d] {
                return Err(TesseraError::out_of_range(format!(
                    "local block {:?} outside the block grid",
                    lb
                )));
            }
            extent[d] = blocksize[d].min(extents[d] - gb * blocksize[d]);
        }
        Ok(extent)
    }

    /// Volume-prefix of local block `index` (elements in locally preceding
    /// blocks) on `unit`.
    fn block_offset(&self, unit: usize, block_index: usize) -> TesseraResult<usize> {
        let spec = self.base.local_blockspec_of(unit)?;
        let grid = CartGrid::new(spec, self.base.order());
        let mut offset = 0;
        for i in 0..block_index {
            let lb = grid.coords(i);
            offset += self.local_block_extent(unit, lb)?.iter().product::<usize>();
        }
        Ok(offset)
    }
}

impl<const N: usize> Pattern<N> for TilePattern<N> {
    fn extents(&self) -> [usize; N] {
        self.base.extents()
    }

    fn capacity(&self) -> usize {
        self.base.capacity()
    }

    fn team_size(&self) -> usize {
        self.base.team_size()
    }

    fn my_unit(&self) -> usize {
        self.base.my_unit()
    }

    fn order(&self) -> MemoryOrder {
        self.base.order()
    }

    fn blocksize(&self) -> [usize; N] {
        self.base.blocksize()
    }

    fn blockspec(&self) -> [usize; N] {
        self.base.blockspec()
    }

    fn local_blockspec_of(&self, unit: usize) -> TesseraResult<[usize; N]> {
        self.base.local_blockspec_of(unit)
    }

    fn local_extents_of(&self, unit: usize) -> TesseraResult<[usize; N]> {
        self.base.local_extents_of(unit)
    }

    fn local_size_of(&self, unit: usize) -> TesseraResult<usize> {
        self.base.local_size_of(unit)
    }

    fn unit_at(&self, coords: [usize; N]) -> TesseraResult<usize> {
        self.base.unit_at(coords)
    }

    fn local_coords(&self, coords: [usize; N]) -> TesseraResult<[usize; N]> {
        self.base.local_coords(coords)
    }

    /// Block-major: the offset is the volume of the locally preceding
    /// blocks plus the phase within the block.
    fn at(&self, coords: [usize; N]) -> TesseraResult<usize> {
        let owner = self.unit_at(coords)?;
        let blocksize = self.base.blocksize();
        let team = self.base.team_spec();
        let mut lb = [0; N];
        let mut phase = [0; N];
        for d in 0..N {
            let gb = coords[d] / blocksize[d];
            lb[d] = gb / team.extent(d);
            phase[d] = coords[d] % blocksize[d];
        }
        let spec = self.base.local_blockspec_of(owner)?;
        let block_index = CartGrid::new(spec, self.base.order()).index(lb);
        let block_extent = self.local_block_extent(owner, lb)?;
        let in_block = CartGrid::new(block_extent, self.base.order()).index(phase);
        Ok(self.block_offset(owner, block_index)? + in_block)
    }

    fn global(&self, unit: usize, coords: [usize; N]) -> TesseraResult<[usize; N]> {
        self.base.global(unit, coords)
    }

    fn global_index(&self, local_index: usize) -> TesseraResult<usize> {
        check_team_size(self.team_size())?;
        let me = self.my_unit();
        let spec = self.base.local_blockspec_of(me)?;
        let grid = CartGrid::new(spec, self.base.order());
        // scan local blocks for the one containing the offset
        let mut offset = local_index;
        for i in 0..grid.size() {
            let lb = grid.coords(i);
            let extent = self.local_block_extent(me, lb)?;
            let volume: usize = extent.iter().product();
            if offset < volume {
                let phase = CartGrid::new(extent, self.base.order()).coords(offset);
                let blocksize = self.base.blocksize();
                let mut lc = [0; N];
                for d in 0..N {
                    lc[d] = lb[d] * blocksize[d] + phase[d];
                }
                let global = self.base.global(me, lc)?;
                return Ok(CartGrid::new(self.extents(), self.order()).index(global));
            }
            offset -= volume;
        }
        Err(TesseraError::out_of_range(format!(
            "local index {} in a {}-element tile",
            local_index,
            self.local_size()
        )))
    }

    fn has_local_elements(
        &self,
        dim: usize,
        dim_offset: usize,
        unit: usize,
    ) -> TesseraResult<bool> {
        self.base.has_local_elements(dim, dim_offset, unit)
    }

    fn block(&self, block_index: usize) -> TesseraResult<ViewSpec<N>> {
        self.base.block(block_index)
    }

    fn local_block(&self, local_block_index: usize) -> TesseraResult<ViewSpec<N>> {
        self.base.local_block(local_block_index)
    }

    fn local_block_local(&self, local_block_index: usize) -> TesseraResult<ViewSpec<N>> {
        self.base.local_block_local(local_block_index)
    }
}
