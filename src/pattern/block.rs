//! The block pattern: per-dimension `NONE`/`BLOCKED`/`CYCLIC`/
//! `BLOCKCYCLIC(k)`/`TILE(k)` distributions with canonical local storage.
//!
//! Ownership is per-dimension round-robin over block coordinates:
//! `unit_dim_d = (g_d / blocksize_d) mod T_d`, combined through the team
//! shape's row-major ranking. Local storage linearizes the unit's local
//! coordinates under its local extents in the pattern's memory order.

use crate::error::{TesseraError, TesseraResult};
use crate::pattern::{
    ceil_div, check_coords, check_team_size, CartGrid, DistSpec, MemoryOrder, Pattern, TeamSpec,
    ViewSpec,
};
use crate::tessera_team::TesseraTeam;

#[derive(Clone, Copy, Debug)]
pub struct BlockPattern<const N: usize> {
    extents: [usize; N],
    dists: [DistSpec; N],
    team: TeamSpec<N>,
    my_unit: usize,
    order: MemoryOrder,
    blocksize: [usize; N],
    nblocks: [usize; N],
}

impl<const N: usize> BlockPattern<N> {
    /// Pattern over `extents` with the default memory order.
    pub fn new(
        extents: [usize; N],
        dists: [DistSpec; N],
        team: TeamSpec<N>,
        my_unit: usize,
    ) -> TesseraResult<BlockPattern<N>> {
        Self::with_order(extents, dists, team, my_unit, MemoryOrder::default())
    }

    pub fn with_order(
        extents: [usize; N],
        dists: [DistSpec; N],
        team: TeamSpec<N>,
        my_unit: usize,
        order: MemoryOrder,
    ) -> TesseraResult<BlockPattern<N>> {
        if team.num_units() > 0 && my_unit >= team.num_units() {
            return Err(TesseraError::invalid(format!(
                "active unit {} outside team of {} units",
                my_unit,
                team.num_units()
            )));
        }
        let mut blocksize = [0; N];
        let mut nblocks = [0; N];
        for d in 0..N {
            if matches!(dists[d], DistSpec::None) && team.extent(d) > 1 {
                return Err(TesseraError::invalid(format!(
                    "dimension {} is not distributed but the team shape assigns {} units to it",
                    d,
                    team.extent(d)
                )));
            }
            blocksize[d] = dists[d].blocksize(extents[d], team.extent(d))?;
            nblocks[d] = ceil_div(extents[d], blocksize[d]);
        }
        Ok(BlockPattern {
            extents,
            dists,
            team,
            my_unit,
            order,
            blocksize,
            nblocks,
        })
    }

    /// Pattern over a team with a balanced team shape and blocked
    /// distribution in every dimension.
    pub fn with_team(team: &TesseraTeam, extents: [usize; N]) -> TesseraResult<BlockPattern<N>> {
        Self::new(
            extents,
            [DistSpec::Blocked; N],
            TeamSpec::balanced(team.num_units()),
            team.my_unit(),
        )
    }

    pub fn dists(&self) -> [DistSpec; N] {
        self.dists
    }

    pub fn team_spec(&self) -> &TeamSpec<N> {
        &self.team
    }

    /// The trailing block of dimension `d` may hold fewer than
    /// `blocksize(d)` elements: `(regular - remainder) mod regular` are
    /// missing from it.
    pub fn underfilled_blocksize(&self, d: usize) -> usize {
        let bs = self.blocksize[d];
        (bs - self.extents[d] % bs) % bs
    }

    fn block_coords(&self, coords: [usize; N]) -> [usize; N] {
        let mut bc = [0; N];
        for d in 0..N {
            bc[d] = coords[d] / self.blocksize[d];
        }
        bc
    }

    fn unit_grid_coords(&self, unit: usize) -> TesseraResult<[usize; N]> {
        self.team.coords(unit)
    }

    /// Local block count of `unit` in dimension `d`.
    fn local_blocks_dim(&self, unit_dim: usize, d: usize) -> usize {
        let nb = self.nblocks[d];
        let t = self.team.extent(d);
        nb / t + if unit_dim < nb % t { 1 } else { 0 }
    }

    /// Actual extent of block `block_coord` in dimension `d`.
    fn block_extent(&self, block_coord: usize, d: usize) -> usize {
        let start = block_coord * self.blocksize[d];
        self.blocksize[d].min(self.extents[d] - start)
    }
}

impl<const N: usize> Pattern<N> for BlockPattern<N> {
    fn extents(&self) -> [usize; N] {
        self.extents
    }

    fn capacity(&self) -> usize {
        let mut local_capacity = 1;
        for d in 0..N {
            local_capacity *=
                ceil_div(self.nblocks[d], self.team.extent(d).max(1)) * self.blocksize[d];
        }
        local_capacity * self.team.num_units()
    }

    fn team_size(&self) -> usize {
        self.team.num_units()
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
        check_team_size(self.team.num_units())?;
        let uc = self.unit_grid_coords(unit)?;
        let mut spec = [0; N];
        for d in 0..N {
            spec[d] = self.local_blocks_dim(uc[d], d);
        }
        Ok(spec)
    }

    fn local_extents_of(&self, unit: usize) -> TesseraResult<[usize; N]> {
        check_team_size(self.team.num_units())?;
        let uc = self.unit_grid_coords(unit)?;
        let mut extents = [0; N];
        for d in 0..N {
            let local_blocks = self.local_blocks_dim(uc[d], d);
            if local_blocks == 0 {
                extents[d] = 0;
                continue;
            }
            let t = self.team.extent(d);
            let owns_last = (self.nblocks[d] - 1) % t == uc[d];
            extents[d] = local_blocks * self.blocksize[d]
                - if owns_last {
                    self.underfilled_blocksize(d)
                } else {
                    0
                };
        }
        Ok(extents)
    }

    fn local_size_of(&self, unit: usize) -> TesseraResult<usize> {
        Ok(self.local_extents_of(unit)?.iter().product())
    }

    fn unit_at(&self, coords: [usize; N]) -> TesseraResult<usize> {
        check_team_size(self.team.num_units())?;
        check_coords(&coords, &self.extents)?;
        let bc = self.block_coords(coords);
        let mut uc = [0; N];
        for d in 0..N {
            uc[d] = bc[d] % self.team.extent(d);
        }
        self.team.unit_rank(uc)
    }

    fn local_coords(&self, coords: [usize; N]) -> TesseraResult<[usize; N]> {
        check_team_size(self.team.num_units())?;
        check_coords(&coords, &self.extents)?;
        let mut lc = [0; N];
        for d in 0..N {
            let phase = coords[d] % self.blocksize[d];
            let gb = coords[d] / self.blocksize[d];
            let lb = gb / self.team.extent(d);
            lc[d] = lb * self.blocksize[d] + phase;
        }
        Ok(lc)
    }

    fn at(&self, coords: [usize; N]) -> TesseraResult<usize> {
        let owner = self.unit_at(coords)?;
        let lc = self.local_coords(coords)?;
        // local extents depend on the owner when the tail block underfills
        let local_extents = self.local_extents_of(owner)?;
        Ok(CartGrid::new(local_extents, self.order).index(lc))
    }

    fn global(&self, unit: usize, coords: [usize; N]) -> TesseraResult<[usize; N]> {
        check_team_size(self.team.num_units())?;
        let uc = self.unit_grid_coords(unit)?;
        let mut global = [0; N];
        for d in 0..N {
            let lb = coords[d] / self.blocksize[d];
            let phase = coords[d] % self.blocksize[d];
            let gb = lb * self.team.extent(d) + uc[d];
            global[d] = gb * self.blocksize[d] + phase;
        }
        check_coords(&global, &self.extents)?;
        Ok(global)
    }

    fn global_index(&self, local_index: usize) -> TesseraResult<usize> {
        let local_extents = self.local_extents_of(self.my_unit)?;
        let local_size: usize = local_extents.iter().product();
        if local_index >= local_size {
            return Err(TesseraError::out_of_range(format!(
                "local index {} in a {}-element tile",
                local_index, local_size
            )));
        }
        let lc = CartGrid::new(local_extents, self.order).coords(local_index);
        let global = self.global(self.my_unit, lc)?;
        Ok(CartGrid::new(self.extents, self.order).index(global))
    }

    fn has_local_elements(
        &self,
        dim: usize,
        dim_offset: usize,
        unit: usize,
    ) -> TesseraResult<bool> {
        check_team_size(self.team.num_units())?;
        if dim >= N || dim_offset >= self.extents[dim] {
            return Err(TesseraError::out_of_range(format!(
                "offset {} in dimension {} of extents {:?}",
                dim_offset, dim, self.extents
            )));
        }
        let uc = self.unit_grid_coords(unit)?;
        let owned_in_dim = (dim_offset / self.blocksize[dim]) % self.team.extent(dim) == uc[dim];
        if !owned_in_dim {
            return Ok(false);
        }
        let extents = self.local_extents_of(unit)?;
        Ok((0..N).all(|d| d == dim || extents[d] > 0))
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
        let bc = grid.coords(block_index);
        let mut offset = [0; N];
        let mut extent = [0; N];
        for d in 0..N {
            offset[d] = (bc[d] * self.blocksize[d]) as isize;
            extent[d] = self.block_extent(bc[d], d);
        }
        Ok(ViewSpec::new(offset, extent))
    }

    fn local_block(&self, local_block_index: usize) -> TesseraResult<ViewSpec<N>> {
        let local = self.local_block_local(local_block_index)?;
        let mut coords = [0; N];
        for d in 0..N {
            coords[d] = local.offset[d] as usize;
        }
        let global = self.global(self.my_unit, coords)?;
        let mut offset = [0; N];
        for d in 0..N {
            offset[d] = global[d] as isize;
        }
        Ok(ViewSpec::new(offset, local.extent))
    }

    fn local_block_local(&self, local_block_index: usize) -> TesseraResult<ViewSpec<N>> {
        let spec = self.local_blockspec_of(self.my_unit)?;
        let grid = CartGrid::new(spec, self.order);
        if local_block_index >= grid.size() {
            return Err(TesseraError::out_of_range(format!(
                "local block {} of {}",
                local_block_index,
                grid.size()
            )));
        }
        let lb = grid.coords(local_block_index);
        let uc = self.unit_grid_coords(self.my_unit)?;
        let mut offset = [0; N];
        let mut extent = [0; N];
        for d in 0..N {
            offset[d] = (lb[d] * self.blocksize[d]) as isize;
            let gb = lb[d] * self.team.extent(d) + uc[d];
            extent[d] = self.block_extent(gb, d);
        }
        Ok(ViewSpec::new(offset, extent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern_2x1() -> BlockPattern<2> {
        BlockPattern::with_order(
            [6, 6],
            [DistSpec::Blocked, DistSpec::None],
            TeamSpec::new([2, 1]),
            0,
            MemoryOrder::RowMajor,
        )
        .unwrap()
    }

    #[test]
    fn ownership_2d_blocked_none() {
        let pattern = pattern_2x1();
        assert_eq!(pattern.blocksize(), [3, 6]);
        assert_eq!(pattern.unit_at([0, 0]).unwrap(), 0);
        assert_eq!(pattern.unit_at([2, 5]).unwrap(), 0);
        assert_eq!(pattern.unit_at([3, 0]).unwrap(), 1);
        assert_eq!(pattern.unit_at([5, 5]).unwrap(), 1);
        assert_eq!(pattern.local_size_of(0).unwrap(), 18);
        assert_eq!(pattern.local_size_of(1).unwrap(), 18);
    }

    #[test]
    fn roundtrip_all_coords() {
        for (dists, team) in [
            (
                [DistSpec::Blocked, DistSpec::Blocked],
                TeamSpec::new([2, 2]),
            ),
            ([DistSpec::Cyclic, DistSpec::Blocked], TeamSpec::new([2, 2])),
            (
                [DistSpec::BlockCyclic(2), DistSpec::None],
                TeamSpec::new([4, 1]),
            ),
        ] {
            for order in [MemoryOrder::RowMajor, MemoryOrder::ColMajor] {
                let pattern =
                    BlockPattern::with_order([7, 5], dists, team, 0, order).unwrap();
                for i in 0..7 {
                    for j in 0..5 {
                        let unit = pattern.unit_at([i, j]).unwrap();
                        let lc = pattern.local_coords([i, j]).unwrap();
                        assert_eq!(
                            pattern.global(unit, lc).unwrap(),
                            [i, j],
                            "roundtrip of {:?} via unit {} lc {:?}",
                            (i, j),
                            unit,
                            lc
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn sizes_conserve() {
        let pattern = BlockPattern::with_order(
            [7, 5],
            [DistSpec::Blocked, DistSpec::Blocked],
            TeamSpec::new([2, 2]),
            0,
            MemoryOrder::RowMajor,
        )
        .unwrap();
        let total: usize = (0..4).map(|u| pattern.local_size_of(u).unwrap()).sum();
        assert_eq!(total, pattern.size());
        assert!(pattern.capacity() >= pattern.size());
    }

    #[test]
    fn at_respects_owner_extents() {
        // 7 rows over 2 units: unit 0 holds 4 rows, unit 1 holds 3
        let pattern = BlockPattern::with_order(
            [7, 4],
            [DistSpec::Blocked, DistSpec::None],
            TeamSpec::new([2, 1]),
            0,
            MemoryOrder::RowMajor,
        )
        .unwrap();
        assert_eq!(pattern.local_extents_of(0).unwrap(), [4, 4]);
        assert_eq!(pattern.local_extents_of(1).unwrap(), [3, 4]);
        // (5, 1) is row 1 of unit 1's tile
        assert_eq!(pattern.at([5, 1]).unwrap(), 1 * 4 + 1);
        assert_eq!(
            pattern.local_index([5, 1]).unwrap(),
            crate::pattern::LocalIndex { unit: 1, index: 5 }
        );
    }

    #[test]
    fn global_index_roundtrip() {
        let pattern = BlockPattern::with_order(
            [6, 4],
            [DistSpec::Blocked, DistSpec::Blocked],
            TeamSpec::new([2, 2]),
            2,
            MemoryOrder::RowMajor,
        )
        .unwrap();
        let grid = CartGrid::new([6, 4], MemoryOrder::RowMajor);
        for local_index in 0..pattern.local_size() {
            let gi = pattern.global_index(local_index).unwrap();
            let coords = grid.coords(gi);
            assert_eq!(pattern.unit_at(coords).unwrap(), 2);
            assert_eq!(pattern.at(coords).unwrap(), local_index);
        }
    }

    #[test]
    fn view_translation() {
        let pattern = pattern_2x1();
        let view = ViewSpec::new([3, 0], [3, 6]);
        assert_eq!(pattern.unit_at_view([0, 0], &view).unwrap(), 1);
        assert_eq!(
            pattern.at_view([0, 0], &view).unwrap(),
            pattern.at([3, 0]).unwrap()
        );
    }

    #[test]
    fn has_local_elements_per_dim() {
        let pattern = pattern_2x1();
        assert!(pattern.has_local_elements(0, 2, 0).unwrap());
        assert!(!pattern.has_local_elements(0, 3, 0).unwrap());
        assert!(pattern.has_local_elements(0, 3, 1).unwrap());
        // dimension 1 is not distributed, every unit spans it
        assert!(pattern.has_local_elements(1, 4, 0).unwrap());
        assert!(pattern.has_local_elements(1, 4, 1).unwrap());
        assert!(pattern.has_local_elements(0, 6, 0).is_err());
    }

    #[test]
    fn blocks_and_local_blocks() {
        let pattern = pattern_2x1();
        assert_eq!(pattern.blockspec(), [2, 1]);
        let block = pattern.block(1).unwrap();
        assert_eq!(block.offset, [3, 0]);
        assert_eq!(block.extent, [3, 6]);
        let local = pattern.local_block_local(0).unwrap();
        assert_eq!(local.offset, [0, 0]);
        assert_eq!(local.extent, [3, 6]);
        let global = pattern.local_block(0).unwrap();
        assert_eq!(global.offset, [0, 0]);
    }

    #[test]
    fn one_dimensional_specialization() {
        // the 1-d path stands in for the deprecated linear pattern
        let pattern = BlockPattern::<1>::with_order(
            [10],
            [DistSpec::Blocked],
            TeamSpec::new([3]),
            0,
            MemoryOrder::RowMajor,
        )
        .unwrap();
        assert_eq!(pattern.blocksize(), [4]);
        assert_eq!(pattern.local_size_of(0).unwrap(), 4);
        assert_eq!(pattern.local_size_of(1).unwrap(), 4);
        assert_eq!(pattern.local_size_of(2).unwrap(), 2);
        assert_eq!(pattern.unit_at([9]).unwrap(), 2);
        assert_eq!(pattern.global(2, [1]).unwrap(), [9]);
    }

    #[test]
    fn empty_team_is_trivial() {
        let pattern = BlockPattern::<1>::with_order(
            [4],
            [DistSpec::Blocked],
            TeamSpec::new([0]),
            0,
            MemoryOrder::RowMajor,
        )
        .unwrap();
        assert_eq!(pattern.capacity(), 0);
        assert!(matches!(
            pattern.unit_at([0]),
            Err(TesseraError::InvalidArgument(_))
        ));
    }
}
