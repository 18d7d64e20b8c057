//! The dynamic pattern: one contiguous, individually resizable run per unit
//! (1-d only).
//!
//! The pattern is a pure value over a vector of per-unit sizes; it performs
//! no communication. [`local_resize`][DynamicPattern::local_resize] adjusts
//! the active unit's entry (the local view of an uncommitted grow/shrink);
//! [`refresh`][DynamicPattern::refresh] swaps in a complete size vector,
//! which is what a dynamic memory region's commit produces.

use crate::error::{TesseraError, TesseraResult};
use crate::pattern::{LocalIndex, ViewSpec};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DynamicPattern {
    sizes: Vec<usize>,
    // prefix sums; block_offsets[u] is the first global index of unit u,
    // block_offsets[team_size] the total size
    block_offsets: Vec<usize>,
    my_unit: usize,
}

impl DynamicPattern {
    pub fn new(sizes: Vec<usize>, my_unit: usize) -> TesseraResult<DynamicPattern> {
        if sizes.is_empty() {
            return Err(TesseraError::invalid(
                "dynamic pattern over a zero-size team",
            ));
        }
        if my_unit >= sizes.len() {
            return Err(TesseraError::invalid(format!(
                "active unit {} outside team of {} units",
                my_unit,
                sizes.len()
            )));
        }
        let mut pattern = DynamicPattern {
            sizes,
            block_offsets: Vec::new(),
            my_unit,
        };
        pattern.rebuild();
        Ok(pattern)
    }

    fn rebuild(&mut self) {
        self.block_offsets = Vec::with_capacity(self.sizes.len() + 1);
        let mut total = 0;
        for size in &self.sizes {
            self.block_offsets.push(total);
            total += size;
        }
        self.block_offsets.push(total);
    }

    pub fn team_size(&self) -> usize {
        self.sizes.len()
    }

    pub fn my_unit(&self) -> usize {
        self.my_unit
    }

    /// Total element count.
    pub fn size(&self) -> usize {
        *self.block_offsets.last().expect("non-empty offsets")
    }

    pub fn capacity(&self) -> usize {
        self.size()
    }

    /// The committed sizes per unit.
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Prefix sums of the per-unit sizes; the last entry is the total.
    pub fn block_offsets(&self) -> &[usize] {
        &self.block_offsets
    }

    pub fn local_size_of(&self, unit: usize) -> TesseraResult<usize> {
        self.sizes
            .get(unit)
            .copied()
            .ok_or_else(|| {
                TesseraError::invalid(format!(
                    "unit {} outside team of {} units",
                    unit,
                    self.sizes.len()
                ))
            })
    }

    pub fn local_size(&self) -> usize {
        self.sizes[self.my_unit]
    }

    /// Resize the active unit's run. Purely local; other units keep their
    /// own view until a refresh reaches them.
    pub fn local_resize(&mut self, new_size: usize) {
        self.sizes[self.my_unit] = new_size;
        self.rebuild();
    }

    /// Replace the size vector (the product of a collective size exchange).
    pub fn refresh(&mut self, sizes: Vec<usize>) -> TesseraResult<()> {
        if sizes.len() != self.sizes.len() {
            return Err(TesseraError::invalid(format!(
                "refresh with {} sizes on a team of {}",
                sizes.len(),
                self.sizes.len()
            )));
        }
        self.sizes = sizes;
        self.rebuild();
        Ok(())
    }

    fn check_index(&self, index: usize) -> TesseraResult<()> {
        if index >= self.size() {
            return Err(TesseraError::out_of_range(format!(
                "global index {} in a {}-element pattern",
                index,
                self.size()
            )));
        }
        Ok(())
    }

    /// The unit owning global index `index`.
    pub fn unit_at(&self, index: usize) -> TesseraResult<usize> {
        self.check_index(index)?;
        // partition_point gives the first offset beyond the index
        Ok(self.block_offsets.partition_point(|off| *off <= index) - 1)
    }

    /// Owner and offset within the owner's run.
    pub fn local(&self, index: usize) -> TesseraResult<LocalIndex> {
        let unit = self.unit_at(index)?;
        Ok(LocalIndex {
            unit,
            index: index - self.block_offsets[unit],
        })
    }

    /// Offset of `index` within its owner's run.
    pub fn local_index(&self, index: usize) -> TesseraResult<usize> {
        Ok(self.local(index)?.index)
    }

    /// Global index of `unit`'s local offset `local_index`.
    pub fn global(&self, unit: usize, local_index: usize) -> TesseraResult<usize> {
        let size = self.local_size_of(unit)?;
        if local_index >= size {
            return Err(TesseraError::out_of_range(format!(
                "local index {} in unit {}'s {}-element run",
                local_index, unit, size
            )));
        }
        Ok(self.block_offsets[unit] + local_index)
    }

    /// Whether global index `index` lives on the active unit.
    pub fn is_local(&self, index: usize) -> TesseraResult<bool> {
        Ok(self.unit_at(index)? == self.my_unit)
    }

    /// The contiguous run of `unit` as a 1-d view.
    pub fn local_block(&self, unit: usize) -> TesseraResult<ViewSpec<1>> {
        let size = self.local_size_of(unit)?;
        Ok(ViewSpec::new([self.block_offsets[unit] as isize], [size]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_by_prefix_sums() {
        let pattern = DynamicPattern::new(vec![10, 10, 10, 10], 0).unwrap();
        assert_eq!(pattern.size(), 40);
        assert_eq!(pattern.block_offsets(), &[0, 10, 20, 30, 40]);
        assert_eq!(pattern.unit_at(0).unwrap(), 0);
        assert_eq!(pattern.unit_at(9).unwrap(), 0);
        assert_eq!(pattern.unit_at(10).unwrap(), 1);
        assert_eq!(pattern.unit_at(39).unwrap(), 3);
        assert!(pattern.unit_at(40).is_err());
    }

    #[test]
    fn local_global_roundtrip() {
        let pattern = DynamicPattern::new(vec![3, 0, 5, 2], 2).unwrap();
        for index in 0..pattern.size() {
            let pos = pattern.local(index).unwrap();
            assert_eq!(pattern.global(pos.unit, pos.index).unwrap(), index);
        }
        // empty runs own nothing
        assert!((0..pattern.size()).all(|i| pattern.unit_at(i).unwrap() != 1));
    }

    #[test]
    fn resize_is_local_view() {
        let mut pattern = DynamicPattern::new(vec![10, 10, 10, 10], 2).unwrap();
        pattern.local_resize(15);
        assert_eq!(pattern.local_size(), 15);
        assert_eq!(pattern.size(), 45);
        assert_eq!(pattern.unit_at(34).unwrap(), 2);
        assert_eq!(pattern.unit_at(35).unwrap(), 3);
        // a remote unit's pattern still sees the committed 10
        let remote = DynamicPattern::new(vec![10, 10, 10, 10], 0).unwrap();
        assert_eq!(remote.local_size_of(2).unwrap(), 10);
    }

    #[test]
    fn refresh_swaps_sizes() {
        let mut pattern = DynamicPattern::new(vec![10, 10, 10, 10], 0).unwrap();
        pattern.refresh(vec![10, 10, 15, 10]).unwrap();
        assert_eq!(pattern.size(), 45);
        assert_eq!(pattern.local_size_of(2).unwrap(), 15);
        assert!(pattern.refresh(vec![1, 2]).is_err());
    }

    #[test]
    fn zero_size_team_rejected() {
        assert!(DynamicPattern::new(vec![], 0).is_err());
    }
}
