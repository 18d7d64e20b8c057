//! The sequential tile pattern: blocks are enumerated globally in row-major
//! order and dealt round-robin, `unit = block_index mod team_size`.
//!
//! A unit's local storage is the sequence of its blocks in dealing order
//! (`local_block_index = block_index / team_size`), each block stored
//! contiguously in the pattern's memory order. Local coordinates stack the
//! local blocks along dimension 0: `lc_0 = local_block_index * blocksize_0
//! + phase_0`, `lc_d = phase_d` for the remaining dimensions, which keeps
//! `(unit, local)` pairs invertible.

use crate::error::{TesseraError, TesseraResult};
use crate::pattern::{
    ceil_div, check_coords, check_team_size, CartGrid, MemoryOrder, Pattern, ViewSpec,
};
use crate::tessera_team::TesseraTeam;

#[derive(Clone, Copy, Debug)]
pub struct SeqTilePattern<const N: usize> {
    extents: [usize; N],
    blocksize: [usize; N],
    nblocks: [usize; N],
    team_size: usize,
    my_unit: usize,
    order: MemoryOrder,
}

impl<const N: usize> SeqTilePattern<N> {
    pub fn new(
        extents: [usize; N],
        tile: [usize; N],
        team_size: usize,
        my_unit: usize,
    ) -> TesseraResult<SeqTilePattern<N>> {
        Self::with_order(extents, tile, team_size, my_unit, MemoryOrder::default())
    }

    pub fn with_order(
        extents: [usize; N],
        tile: [usize; N],
        team_size: usize,
        my_unit: usize,
        order: MemoryOrder,
    ) -> TesseraResult<SeqTilePattern<N>> {
        if team_size > 0 && my_unit >= team_size {
            return Err(TesseraError::invalid(format!(
                "active unit {} outside team of {} units",
                my_unit, team_size
            )));
        }
        let mut blocksize = [0; N];
        let mut nblocks = [0; N];
        for d in 0..N {
            if tile[d] == 0 {
                return Err(TesseraError::invalid("zero tile extent"));
            }
            blocksize[d] = tile[d];
            nblocks[d] = ceil_div(extents[d], tile[d]);
        }
        Ok(SeqTilePattern {
            extents,
            blocksize,
            nblocks,
            team_size,
            my_unit,
            order,
        })
    }

    pub fn with_team(
        team: &TesseraTeam,
        extents: [usize; N],
        tile: [usize; N],
    ) -> TesseraResult<SeqTilePattern<N>> {
        Self::new(extents, tile, team.num_units(), team.my_unit())
    }

    /// Blocks are always dealt in row-major order, independent of the
    /// pattern's memory order.
    fn block_grid(&self) -> CartGrid<N> {
        CartGrid::new(self.nblocks, MemoryOrder::RowMajor)
    }

    fn total_blocks(&self) -> usize {
        self.nblocks.iter().product()
    }

    /// Number of blocks dealt to `unit`.
    fn local_blocks_of(&self, unit: usize) -> usize {
        let total = self.total_blocks();
        total / self.team_size + if unit < total % self.team_size { 1 } else { 0 }
    }

    fn block_extent(&self, gb: &[usize; N]) -> [usize; N] {
        let mut extent = [0; N];
        for d in 0..N {
            extent[d] = self.blocksize[d].min(self.extents[d] - gb[d] * self.blocksize[d]);
        }
        extent
    }

    /// Global block coordinates of `unit`'s `local_block_index`-th block.
    fn global_block_of(&self, unit: usize, local_block_index: usize) -> TesseraResult<[usize; N]> {
        let gbi = local_block_index * self.team_size + unit;
        if gbi >= self.total_blocks() {
            return Err(TesseraError::out_of_range(format!(
                "local block {} of unit {} outside the {}-block grid",
                local_block_index,
                unit,
                self.total_blocks()
            )));
        }
        Ok(self.block_grid().coords(gbi))
    }

    fn block_volume(&self, gb: &[usize; N]) -> usize {
        self.block_extent(gb).iter().product()
    }

    /// Elements preceding `unit`'s `local_block_index`-th block locally.
    fn block_prefix(&self, unit: usize, local_block_index: usize) -> TesseraResult<usize> {
        let mut offset = 0;
        for i in 0..local_block_index {
            offset += self.block_volume(&self.global_block_of(unit, i)?);
        }
        Ok(offset)
    }
}

impl<const N: usize> Pattern<N> for SeqTilePattern<N> {
    fn extents(&self) -> [usize; N] {
        self.extents
    }

    fn capacity(&self) -> usize {
        let volume: usize = self.blocksize.iter().product();
        ceil_div(self.total_blocks(), self.team_size.max(1)) * volume * self.team_size
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
        // blocks stack linearly along dimension 0
        let mut spec = [1; N];
        spec[0] = self.local_blocks_of(unit);
        Ok(spec)
    }

    fn local_extents_of(&self, unit: usize) -> TesseraResult<[usize; N]> {
        let spec = self.local_blockspec_of(unit)?;
        let mut extents = self.blocksize;
        extents[0] = spec[0] * self.blocksize[0];
        Ok(extents)
    }

    fn local_size_of(&self, unit: usize) -> TesseraResult<usize> {
        check_team_size(self.team_size)?;
        if unit >= self.team_size {
            return Err(TesseraError::invalid(format!(
                "unit {} outside team of {} units",
                unit, self.team_size
            )));
        }
        let mut size = 0;
        for i in 0..self.local_blocks_of(unit) {
            size += self.block_volume(&self.global_block_of(unit, i)?);
        }
        Ok(size)
    }

    fn unit_at(&self, coords: [usize; N]) -> TesseraResult<usize> {
        check_team_size(self.team_size)?;
        check_coords(&coords, &self.extents)?;
        let mut gb = [0; N];
        for d in 0..N {
            gb[d] = coords[d] / self.blocksize[d];
        }
        Ok(self.block_grid().index(gb) % self.team_size)
    }

    fn local_coords(&self, coords: [usize; N]) -> TesseraResult<[usize; N]> {
        check_team_size(self.team_size)?;
        check_coords(&coords, &self.extents)?;
        let mut gb = [0; N];
        let mut phase = [0; N];
        for d in 0..N {
            gb[d] = coords[d] / self.blocksize[d];
            phase[d] = coords[d] % self.blocksize[d];
        }
        let lbi = self.block_grid().index(gb) / self.team_size;
        let mut lc = phase;
        lc[0] = lbi * self.blocksize[0] + phase[0];
        Ok(lc)
    }

    fn at(&self, coords: [usize; N]) -> TesseraResult<usize> {
        let owner = self.unit_at(coords)?;
        let mut gb = [0; N];
        let mut phase = [0; N];
        for d in 0..N {
            gb[d] = coords[d] / self.blocksize[d];
            phase[d] = coords[d] % self.blocksize[d];
        }
        let lbi = self.block_grid().index(gb) / self.team_size;
        let in_block = CartGrid::new(self.block_extent(&gb), self.order).index(phase);
        Ok(self.block_prefix(owner, lbi)? + in_block)
    }

    fn global(&self, unit: usize, coords: [usize; N]) -> TesseraResult<[usize; N]> {
        check_team_size(self.team_size)?;
        if unit >= self.team_size {
            return Err(TesseraError::invalid(format!(
                "unit {} outside team of {} units",
                unit, self.team_size
            )));
        }
        let lbi = coords[0] / self.blocksize[0];
        let mut phase = coords;
        phase[0] = coords[0] % self.blocksize[0];
        let gb = self.global_block_of(unit, lbi)?;
        let mut global = [0; N];
        for d in 0..N {
            global[d] = gb[d] * self.blocksize[d] + phase[d];
        }
        check_coords(&global, &self.extents)?;
        Ok(global)
    }

    fn global_index(&self, local_index: usize) -> TesseraResult<usize> {
        check_team_size(self.team_size)?;
        let mut offset = local_index;
        for lbi in 0..self.local_blocks_of(self.my_unit) {
            let gb = self.global_block_of(self.my_unit, lbi)?;
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
        let bc = dim_offset / self.blocksize[dim];
        let grid = self.block_grid();
        for gbi in 0..self.total_blocks() {
            if gbi % self.team_size == unit && grid.coords(gbi)[dim] == bc {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn block(&self, block_index: usize) -> TesseraResult<ViewSpec<N>> {
        if block_index >= self.total_blocks() {
            return Err(TesseraError::out_of_range(format!(
                "block {} of {}",
                block_index,
                self.total_blocks()
            )));
        }
        let gb = self.block_grid().coords(block_index);
        let extent = self.block_extent(&gb);
        let mut offset = [0; N];
        for d in 0..N {
            offset[d] = (gb[d] * self.blocksize[d]) as isize;
        }
        Ok(ViewSpec::new(offset, extent))
    }

    fn local_block(&self, local_block_index: usize) -> TesseraResult<ViewSpec<N>> {
        check_team_size(self.team_size)?;
        let gb = self.global_block_of(self.my_unit, local_block_index)?;
        let extent = self.block_extent(&gb);
        let mut offset = [0; N];
        for d in 0..N {
            offset[d] = (gb[d] * self.blocksize[d]) as isize;
        }
        Ok(ViewSpec::new(offset, extent))
    }

    fn local_block_local(&self, local_block_index: usize) -> TesseraResult<ViewSpec<N>> {
        check_team_size(self.team_size)?;
        let gb = self.global_block_of(self.my_unit, local_block_index)?;
        let extent = self.block_extent(&gb);
        let mut offset = [0isize; N];
        offset[0] = (local_block_index * self.blocksize[0]) as isize;
        Ok(ViewSpec::new(offset, extent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern() -> SeqTilePattern<2> {
        SeqTilePattern::with_order([4, 6], [2, 2], 3, 0, MemoryOrder::RowMajor).unwrap()
    }

    #[test]
    fn round_robin_dealing() {
        let pattern = pattern();
        // 2x3 block grid, row-major ids dealt over 3 units
        assert_eq!(pattern.blockspec(), [2, 3]);
        assert_eq!(pattern.unit_at([0, 0]).unwrap(), 0); // block 0
        assert_eq!(pattern.unit_at([0, 2]).unwrap(), 1); // block 1
        assert_eq!(pattern.unit_at([0, 4]).unwrap(), 2); // block 2
        assert_eq!(pattern.unit_at([2, 0]).unwrap(), 0); // block 3
        assert_eq!(pattern.unit_at([2, 2]).unwrap(), 1); // block 4
        assert_eq!(pattern.unit_at([2, 4]).unwrap(), 2); // block 5
    }

    #[test]
    fn local_block_resolves_dealt_position() {
        let pattern = pattern();
        // unit 0's second block is global block 3 at (2, 0)
        let view = pattern.local_block(1).unwrap();
        assert_eq!(view.offset, [2, 0]);
        assert_eq!(view.extent, [2, 2]);
        let local = pattern.local_block_local(1).unwrap();
        assert_eq!(local.offset, [2, 0]);
    }

    #[test]
    fn roundtrip() {
        let pattern = pattern();
        for i in 0..4 {
            for j in 0..6 {
                let pos = pattern.local([i, j]).unwrap();
                assert_eq!(
                    pattern.global(pos.unit, pos.coords).unwrap(),
                    [i, j],
                    "roundtrip of ({}, {})",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn conservation_with_underfill() {
        let pattern =
            SeqTilePattern::<2>::with_order([5, 5], [2, 2], 2, 0, MemoryOrder::RowMajor).unwrap();
        let total: usize = (0..2).map(|u| pattern.local_size_of(u).unwrap()).sum();
        assert_eq!(total, 25);
        for i in 0..5 {
            for j in 0..5 {
                let pos = pattern.local([i, j]).unwrap();
                assert_eq!(pattern.global(pos.unit, pos.coords).unwrap(), [i, j]);
            }
        }
    }

    #[test]
    fn at_compact_per_unit() {
        let pattern = pattern();
        for unit in 0..3 {
            let p = SeqTilePattern::<2>::with_order([4, 6], [2, 2], 3, unit, MemoryOrder::RowMajor)
                .unwrap();
            let mut offsets: Vec<usize> = Vec::new();
            for i in 0..4 {
                for j in 0..6 {
                    if pattern.unit_at([i, j]).unwrap() == unit {
                        offsets.push(p.at([i, j]).unwrap());
                    }
                }
            }
            offsets.sort_unstable();
            assert_eq!(offsets, (0..p.local_size()).collect::<Vec<usize>>());
        }
    }

    #[test]
    fn has_local_elements_scans_dealt_blocks() {
        let pattern = pattern();
        // unit 0 owns blocks 0 and 3, which cover both row-block positions
        assert!(pattern.has_local_elements(0, 0, 0).unwrap());
        assert!(pattern.has_local_elements(0, 2, 0).unwrap());
        // column blocks 0, 1, 2: unit 1 owns blocks 1 (column 1) and 4 (column 1)
        assert!(pattern.has_local_elements(1, 2, 1).unwrap());
        assert!(!pattern.has_local_elements(1, 0, 1).unwrap());
    }
}
