//! Cartesian factorization of a team.
//!
//! Patterns distribute each dimension over one axis of the team shape; the
//! product of the axis extents is the team size. The ranking of units in the
//! team grid is always row-major so that ownership never depends on a
//! pattern's memory order.

use crate::error::{TesseraError, TesseraResult};
use crate::pattern::{CartGrid, MemoryOrder};
use itertools::Itertools;

/// The shape `T_0 x ... x T_{N-1}` of a team.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TeamSpec<const N: usize> {
    grid: CartGrid<N>,
}

impl<const N: usize> TeamSpec<N> {
    /// Explicit team shape.
    pub fn new(extents: [usize; N]) -> TeamSpec<N> {
        TeamSpec {
            grid: CartGrid::new(extents, MemoryOrder::RowMajor),
        }
    }

    /// Factor `num_units` over `N` dimensions, balanced: prime factors are
    /// assigned largest-first to the currently smallest axis.
    pub fn balanced(num_units: usize) -> TeamSpec<N> {
        let mut extents = [1; N];
        if num_units == 0 {
            extents = [0; N];
            return TeamSpec {
                grid: CartGrid::new(extents, MemoryOrder::RowMajor),
            };
        }
        let factors = prime_factors(num_units);
        for factor in factors.into_iter().sorted_unstable_by(|a, b| b.cmp(a)) {
            let smallest = (0..N).min_by_key(|d| extents[*d]).expect("N > 0");
            extents[smallest] *= factor;
        }
        TeamSpec {
            grid: CartGrid::new(extents, MemoryOrder::RowMajor),
        }
    }

    /// All units on the first axis.
    pub fn linear(num_units: usize) -> TeamSpec<N> {
        let mut extents = [1; N];
        extents[0] = num_units;
        TeamSpec {
            grid: CartGrid::new(extents, MemoryOrder::RowMajor),
        }
    }

    pub fn extents(&self) -> [usize; N] {
        self.grid.extents
    }

    pub fn extent(&self, dim: usize) -> usize {
        self.grid.extents[dim]
    }

    /// The team size this shape factors.
    pub fn num_units(&self) -> usize {
        self.grid.size()
    }

    /// Grid coordinates of unit `unit`.
    pub fn coords(&self, unit: usize) -> TesseraResult<[usize; N]> {
        if unit >= self.num_units() {
            return Err(TesseraError::invalid(format!(
                "unit {} outside team shape {:?}",
                unit,
                self.extents()
            )));
        }
        Ok(self.grid.coords(unit))
    }

    /// Unit at grid coordinates `coords`.
    pub fn unit_rank(&self, coords: [usize; N]) -> TesseraResult<usize> {
        if !self.grid.contains(&coords) {
            return Err(TesseraError::invalid(format!(
                "team coordinates {:?} outside shape {:?}",
                coords,
                self.extents()
            )));
        }
        Ok(self.grid.index(coords))
    }
}

fn prime_factors(mut n: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut p = 2;
    while p * p <= n {
        while n % p == 0 {
            factors.push(p);
            n /= p;
        }
        p += 1;
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_factorization() {
        let spec = TeamSpec::<2>::balanced(12);
        let mut extents = spec.extents();
        extents.sort_unstable();
        assert_eq!(extents, [3, 4]);
        assert_eq!(spec.num_units(), 12);

        let spec = TeamSpec::<3>::balanced(8);
        assert_eq!(spec.extents(), [2, 2, 2]);

        let spec = TeamSpec::<2>::balanced(7);
        let mut extents = spec.extents();
        extents.sort_unstable();
        assert_eq!(extents, [1, 7]);
    }

    #[test]
    fn ranking_is_row_major() {
        let spec = TeamSpec::new([2, 3]);
        assert_eq!(spec.unit_rank([0, 0]).unwrap(), 0);
        assert_eq!(spec.unit_rank([0, 2]).unwrap(), 2);
        assert_eq!(spec.unit_rank([1, 0]).unwrap(), 3);
        assert_eq!(spec.coords(5).unwrap(), [1, 2]);
        assert!(spec.unit_rank([2, 0]).is_err());
        assert!(spec.coords(6).is_err());
    }
}
