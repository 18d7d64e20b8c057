//! The shift-tile pattern: tiles assigned to units along diagonals of the
//! block grid, `unit = (sum of block coordinates) mod team_size`.
//!
//! One dimension is the *major-tiled* dimension (the slowest under the
//! pattern's memory order); its extent must be a multiple of
//! `blocksize * team_size`, which makes every unit own exactly
//! `nblocks_major / team_size` blocks along each major line. Local blocks
//! are the strided slice of the global block grid along the major
//! dimension; local storage is block-major as in
//! [`TilePattern`][crate::pattern::TilePattern].

use crate::error::{TesseraError, TesseraResult};
use crate::pattern::{
    ceil_div, check_coords, check_team_size, CartGrid, MemoryOrder, Pattern, ViewSpec,
};
use crate::tessera_team::TesseraTeam;

#[derive(Clone, Copy, Debug)]
pub struct ShiftTilePattern<const N: usize> {
    extents: [usize; N],
    blocksize: [usize; N],
    nblocks: [usize; N],
    team_size: usize,
    my_unit: usize,
    order: MemoryOrder,
    major: usize,
}

impl<const N: usize> ShiftTilePattern<N> {
    pub fn new(
        extents: [usize; N],
        tile: [usize; N],
        team_size: usize,
        my_unit: usize,
    ) -> TesseraResult<ShiftTilePattern<N>> {
        Self::with_order(extents, tile, team_size, my_unit, MemoryOrder::default())
    }

    pub fn with_order(
        extents: [usize; N],
        tile: [usize; N],
        team_size: usize,
        my_unit: usize,
        order: MemoryOrder,
    ) -> TesseraResult<ShiftTilePattern<N>> {
        if team_size > 0 && my_unit >= team_size {
            return Err(TesseraError::invalid(format!(
                "active unit {} outside team of {} units",
                my_unit, team_size
            )));
        }
        let major = match order {
            MemoryOrder::RowMajor => 0,
            MemoryOrder::ColMajor => N - 1,
        };
        let mut blocksize = [0; N];
        let mut nblocks = [0; N];
        for d in 0..N {
            if tile[d] == 0 {
                return Err(TesseraError::invalid("zero tile extent"));
            }
            blocksize[d] = tile[d];
            nblocks[d] = ceil_div(extents[d], tile[d]);
        }
        if team_size > 0 && extents[major] % (blocksize[major] * team_size) != 0 {
            return Err(TesseraError::invalid(format!(
                "extent {} of the major dimension {} is not a multiple of blocksize {} x team {}",
                extents[major], major, blocksize[major], team_size
            )));
        }
        Ok(ShiftTilePattern {
            extents,
            blocksize,
            nblocks,
            team_size,
            my_unit,
            order,
            major,
        })
    }

    pub fn with_team(
        team: &TesseraTeam,
        extents: [usize; N],
        tile: [usize; N],
    ) -> TesseraResult<ShiftTilePattern<N>> {
        Self::new(extents, tile, team.num_units(), team.my_unit())
    }

    /// The major-tiled dimension.
    pub fn major_dim(&self) -> usize {
        self.major
    }

    fn sum_minor_blocks(&self, block_coords: &[usize; N]) -> usize {
        (0..N)
            .filter(|d| *d != self.major)
            .map(|d| block_coords[d])
            .sum()
    }

    /// First major block coordinate owned by `unit` on the major line with
    /// the given minor-block-coordinate sum.
    fn first_major_block(&self, unit: usize, sum_minor: usize) -> usize {
        let p = self.team_size;
        (p + unit % p - sum_minor % p) % p
    }

    /// Local block-grid coordinates -> global block coordinates for `unit`.
    fn global_block_coords(&self, unit: usize, lb: [usize; N]) -> TesseraResult<[usize; N]> {
        let mut gb = lb;
        let sum_minor = self.sum_minor_blocks(&lb);
        gb[self.major] =
            self.first_major_block(unit, sum_minor) + lb[self.major] * self.team_size;
        for d in 0..N {
            if gb[d] >= self.nblocks[d] {
                return Err(TesseraError::out_of_range(format!(
                    "local block {:?} outside the block grid",
                    lb
                )));
            }
        }
        Ok(gb)
    }

    fn block_extent(&self, gb: &[usize; N]) -> [usize; N] {
        let mut extent = [0; N];
        for d in 0..N {
            extent[d] = self.blocksize[d].min(self.extents[d] - gb[d] * self.blocksize[d]);
        }
        extent
    }

    fn local_block_grid(&self) -> CartGrid<N> {
        CartGrid::new(self.local_blockspec_unchecked(), self.order)
    }

    fn local_blockspec_unchecked(&self) -> [usize; N] {
        let mut spec = self.nblocks;
        spec[self.major] = self.nblocks[self.major] / self.team_size.max(1);
        spec
    }

    fn block_prefix(&self, block_index: usize, unit: usize) -> TesseraResult<usize> {
        let grid = self.local_block_grid();
        let mut offset = 0;
        for i in 0..block_index {
            let gb = self.global_block_coords(unit, grid.coords(i))?;
            offset += self.block_extent(&gb).iter().product::<usize>();
        }
        Ok(offset)
    }
}

impl<const N: usize> Pattern<N> for ShiftTilePattern<N> {
    fn extents(&self) -> [usize; N] {
        self.extents
    }

    fn capacity(&self) -> usize {
        let spec = self.local_blockspec_unchecked();
        let blocks: usize = spec.iter().product();
        let volume: usize = self.blocksize.iter().product();
        blocks * volume * self.team_size
    }

    fn team_size(&self) -> usize {
        self.team_size
    }

    fn my_unit(&self) -> usize {
        self.my_unit
    }

    fn order(&self) -> MemoryOrder {
        self.order
    }

    fn blocksize(&self) -> [usize; N] {
        self.blocksize
    }

    fn blockspec(&self) -> [usize; N] {
        self.nblocks
    }

    fn local_blockspec_of(&self, unit: usize) -> TesseraResult<[usize; N]> {
        check_team_size(self.team_size)?;
        if unit >= self.team_size {
            return Err(TesseraError::invalid(format!(
                "unit {} outside team of {} units",
                unit, self.team_size
            )));
        }
        // the diagonal assignment gives every unit the same local grid shape
        Ok(self.local_blockspec_unchecked())
    }

    fn local_extents_of(&self, unit: usize) -> TesseraResult<[usize; N]> {
        let spec = self.local_blockspec_of(unit)?;
        let mut extents = self.extents;
        extents[self.major] = spec[self.major] * self.blocksize[self.major];
        Ok(extents)
    }

    fn local_size_of(&self, unit: usize) -> TesseraResult<usize> {
        Ok(self.local_extents_of(unit)?.iter().product())
    }

    fn unit_at(&self, coords: [usize; N]) -> TesseraResult<usize> {
        check_team_size(self.team_size)?;
        check_coords(&coords, &self.extents)?;
        let sum: usize = (0..N).map(|d| coords[d] / self.blocksize[d]).sum();
        Ok(sum % self.team_size)
    }

    fn local_coords(&self, coords: [usize; N]) -> TesseraResult<[usize; N]> {
        let unit = self.unit_at(coords)?;
        let mut bc = [0; N];
        for d in 0..N {
            bc[d] = coords[d] / self.blocksize[d];
        }
        let sum_minor = self.sum_minor_blocks(&bc);
        let first = self.first_major_block(unit, sum_minor);
        let lb_major = (bc[self.major] - first) / self.team_size;
        let mut lc = coords;
        lc[self.major] =
            lb_major * self.blocksize[self.major] + coords[self.major] % self.blocksize[self.major];
        Ok(lc)
    }

    fn at(&self, coords: [usize; N]) -> TesseraResult<usize> {
        let owner = self.unit_at(coords)?;
        let mut bc = [0; N];
        let mut phase = [0; N];
        for d in 0..N {
            bc[d] = coords[d] / self.blocksize[d];
            phase[d] = coords[d] % self.blocksize[d];
        }
        let sum_minor = self.sum_minor_blocks(&bc);
        let first = self.first_major_block(owner, sum_minor);
        let mut lb = bc;
        lb[self.major] = (bc[self.major] - first) / self.team_size;
        let block_index = self.local_block_grid().index(lb);
        let in_block = CartGrid::new(self.block_extent(&bc), self.order).index(phase);
        Ok(self.block_prefix(block_index, owner)? + in_block)
    }

    fn global(&self, unit: usize, coords: [usize; N]) -> TesseraResult<[usize; N]> {
        check_team_size(self.team_size)?;
        if unit >= self.team_size {
            return Err(TesseraError::invalid(format!(
                "unit {} outside team of {} units",
                unit, self.team_size
            )));
        }
        let mut lb = [0; N];
        let mut phase = [0; N];
        for d in 0..N {
            lb[d] = coords[d] / self.blocksize[d];
            phase[d] = coords[d] % self.blocksize[d];
        }
        let gb = self.global_block_coords(unit, lb)?;
        let mut global = [0; N];
        for d in 0..N {
            global[d] = gb[d] * self.blocksize[d] + phase[d];
        }
        check_coords(&global, &self.extents)?;
        Ok(global)
    }

    fn global_index(&self, local_index: usize) -> TesseraResult<usize> {
        check_team_size(self.team_size)?;
        let grid = self.local_block_grid();
        let mut offset = local_index;
        for i in 0..grid.size() {
            let lb = grid.coords(i);
            let gb = self.global_block_coords(self.my_unit, lb)?;
            let extent = self.block_extent(&gb);
            let volume: usize = extent.iter().product();
            if offset < volume {
                let phase = CartGrid::new(extent, self.order).coords(offset);
                let mut global = [0; N];
                for d in 0..N {
                    global[d] = gb[d] * self.blocksize[d] + phase[d];
                }
                return Ok(CartGrid::new(self.extents, self.order).index(global));
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
        check_team_size(self.team_size)?;
        if dim >= N || dim_offset >= self.extents[dim] {
            return Err(TesseraError::out_of_range(format!(
                "offset {} in dimension {} of extents {:?}",
                dim_offset, dim, self.extents
            )));
        }
        if dim != self.major {
            // the major dimension spans at least team_size blocks per line,
            // so every minor position is covered on every unit
            return Ok(true);
        }
        let m = dim_offset / self.blocksize[dim];
        let needed = (self.team_size + unit % self.team_size - m % self.team_size)
            % self.team_size;
        let max_minor_sum: usize = (0..N)
            .filter(|d| *d != self.major)
            .map(|d| self.nblocks[d] - 1)
            .sum();
        Ok(needed <= max_minor_sum)
    }

    fn block(&self, block_index: usize) -> TesseraResult<ViewSpec<N>> {
        let grid = CartGrid::new(self.nblocks, self.order);
        if block_index >= grid.size() {
            return Err(TesseraError::out_of_range(format!(
                "block {} of {}",
                block_index,
                grid.size()
            )));
        }
        let gb = grid.coords(block_index);
        let extent = self.block_extent(&gb);
        let mut offset = [0; N];
        for d in 0..N {
            offset[d] = (gb[d] * self.blocksize[d]) as isize;
        }
        Ok(ViewSpec::new(offset, extent))
    }

    fn local_block(&self, local_block_index: usize) -> TesseraResult<ViewSpec<N>> {
        check_team_size(self.team_size)?;
        let grid = self.local_block_grid();
        if local_block_index >= grid.size() {
            return Err(TesseraError::out_of_range(format!(
                "local block {} of {}",
                local_block_index,
                grid.size()
            )));
        }
        let gb = self.global_block_coords(self.my_unit, grid.coords(local_block_index))?;
        let extent = self.block_extent(&gb);
        let mut offset = [0; N];
        for d in 0..N {
            offset[d] = (gb[d] * self.blocksize[d]) as isize;
        }
        Ok(ViewSpec::new(offset, extent))
    }

    fn local_block_local(&self, local_block_index: usize) -> TesseraResult<ViewSpec<N>> {
        check_team_size(self.team_size)?;
        let grid = self.local_block_grid();
        if local_block_index >= grid.size() {
            return Err(TesseraError::out_of_range(format!(
                "local block {} of {}",
                local_block_index,
                grid.size()
            )));
        }
        let lb = grid.coords(local_block_index);
        let gb = self.global_block_coords(self.my_unit, lb)?;
        let extent = self.block_extent(&gb);
        let mut offset = [0; N];
        for d in 0..N {
            offset[d] = (lb[d] * self.blocksize[d]) as isize;
        }
        Ok(ViewSpec::new(offset, extent))
    }
}
