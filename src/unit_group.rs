//! Locally-held sets of global unit ids.
//!
//! A [`UnitGroup`] is pure bookkeeping: it is never exchanged or validated
//! across units, it only feeds collective team construction. Members are
//! kept sorted ascending and deduplicated.

use crate::error::{TesseraError, TesseraResult};
use itertools::Itertools;

/// A sorted set of global unit ids, input material for team creation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnitGroup {
    units: Vec<usize>,
}

impl UnitGroup {
    /// An empty group.
    pub fn new() -> UnitGroup {
        UnitGroup { units: Vec::new() }
    }

    /// Group over the contiguous id range `range`.
    pub fn from_range(range: std::ops::Range<usize>) -> UnitGroup {
        UnitGroup {
            units: range.collect(),
        }
    }

    /// Group over arbitrary ids; duplicates collapse.
    pub fn from_units(units: impl IntoIterator<Item = usize>) -> UnitGroup {
        let mut units: Vec<usize> = units.into_iter().collect();
        units.sort_unstable();
        units.dedup();
        UnitGroup { units }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn contains(&self, unit: usize) -> bool {
        self.units.binary_search(&unit).is_ok()
    }

    /// Member ids, ascending.
    pub fn units(&self) -> &[usize] {
        &self.units
    }

    /// Insert `unit`; inserting a present member is a no-op.
    pub fn add(&mut self, unit: usize) {
        if let Err(pos) = self.units.binary_search(&unit) {
            self.units.insert(pos, unit);
        }
    }

    /// Remove `unit`; removing an absent member fails with `NotFound`.
    pub fn remove(&mut self, unit: usize) -> TesseraResult<()> {
        match self.units.binary_search(&unit) {
            Ok(pos) => {
                self.units.remove(pos);
                Ok(())
            }
            Err(_) => Err(TesseraError::NotFound(format!(
                "unit {} in group",
                unit
            ))),
        }
    }

    /// Set union.
    pub fn union(&self, other: &UnitGroup) -> UnitGroup {
        UnitGroup {
            units: self
                .units
                .iter()
                .merge(other.units.iter())
                .dedup()
                .copied()
                .collect(),
        }
    }

    /// Set intersection.
    pub fn intersection(&self, other: &UnitGroup) -> UnitGroup {
        UnitGroup {
            units: self
                .units
                .iter()
                .filter(|u| other.contains(**u))
                .copied()
                .collect(),
        }
    }

    /// Split into `n` chunks of (almost) equal size, ascending; the first
    /// `len % n` chunks carry one extra member. Trailing chunks may be empty
    /// when `n > len`.
    pub fn split(&self, n: usize) -> TesseraResult<Vec<UnitGroup>> {
        if n == 0 {
            return Err(TesseraError::invalid("cannot split a group into 0 chunks"));
        }
        let base = self.units.len() / n;
        let extra = self.units.len() % n;
        let mut chunks = Vec::with_capacity(n);
        let mut start = 0;
        for i in 0..n {
            let size = base + if i < extra { 1 } else { 0 };
            chunks.push(UnitGroup {
                units: self.units[start..start + size].to_vec(),
            });
            start += size;
        }
        Ok(chunks)
    }
}

impl FromIterator<usize> for UnitGroup {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> UnitGroup {
        UnitGroup::from_units(iter)
    }
}
