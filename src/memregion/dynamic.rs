//! Dynamic global memory: a per-unit bucketed heap with collective commits.
//!
//! `grow`/`shrink` are purely local and cheap; nothing a unit does to its
//! heap is visible to anyone else until the team calls
//! [`commit`][DynamicMemoryRegion::commit]. A commit detaches the buckets
//! queued for removal, attaches the buckets added since the last commit
//! (every unit attaching the same number of times, padding with null
//! buckets where needed), and exchanges the per-unit bucket tables so every
//! member can address every attached element afterwards.

use crate::error::{TesseraError, TesseraResult};
use crate::fabric::segment::OwnedSegment;
use crate::fabric::{FabricRdma, SegmentId};
use crate::global_ptr::GlobalPtr;
use crate::memregion::Dist;
use crate::tessera_team::TeamRT;
use std::marker::PhantomData;
use std::sync::Arc;

struct Bucket<T> {
    storage: OwnedSegment,
    nelems: usize,
    segment: Option<SegmentId>, // Some == attached
    detach: bool,               // queued for detach at the next commit
    shrink_to: Option<usize>,   // partial retraction of an attached bucket
    _marker: PhantomData<T>,
}

impl<T> Bucket<T> {
    fn attached(&self) -> bool {
        self.segment.is_some()
    }

    /// Elements still counted after the queued marks are applied.
    fn effective_nelems(&self) -> usize {
        if self.detach {
            0
        } else {
            self.shrink_to.unwrap_or(self.nelems)
        }
    }
}

/// One attached bucket of a (possibly remote) unit, as known from the last
/// commit.
type BucketEntry = (u64, SegmentId); // (nelems, segment)

/// A per-unit growable region of global memory.
///
/// Local mutation (`grow`, `shrink`) never communicates. The committed
/// state -- what remote units can address -- advances only at
/// [`commit`][Self::commit], which is collective on the owning team.
pub struct DynamicMemoryRegion<T: Dist> {
    team: Arc<TeamRT>,
    buckets: Vec<Bucket<T>>,
    remote_buckets: Vec<Vec<BucketEntry>>, // committed, team order
    remote_sizes: Vec<usize>,              // committed totals, team order
    local_visible: usize,                  // committed + unattached growth
    _marker: PhantomData<T>,
}

unsafe impl<T: Dist> Send for DynamicMemoryRegion<T> {}
unsafe impl<T: Dist> Sync for DynamicMemoryRegion<T> {}

impl<T: Dist> std::fmt::Debug for DynamicMemoryRegion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DynamicMemoryRegion {{ team: {}, buckets: {}, visible: {}, committed: {:?} }}",
            self.team.id,
            self.buckets.len(),
            self.local_visible,
            self.remote_sizes
        )
    }
}

fn elem_bytes<T>(nelems: usize) -> usize {
    nelems * std::mem::size_of::<T>()
}

impl<T: Dist> DynamicMemoryRegion<T> {
    /// Collective constructor: every unit contributes `initial_nelems`
    /// (which may differ between units) and commits once.
    pub(crate) fn alloc(team: Arc<TeamRT>, initial_nelems: usize) -> TesseraResult<Self> {
        team.check_active()?;
        let num_units = team.num_units();
        let mut region = DynamicMemoryRegion {
            team,
            buckets: Vec::new(),
            remote_buckets: vec![Vec::new(); num_units],
            remote_sizes: vec![0; num_units],
            local_visible: 0,
            _marker: PhantomData,
        };
        region.grow(initial_nelems);
        region.commit()?;
        Ok(region)
    }

    /// Append `nelems` fresh elements to the local heap and return them.
    /// Purely local: remote units will not see the growth until the next
    /// commit.
    pub fn grow(&mut self, nelems: usize) -> &mut [T] {
        if nelems == 0 {
            return &mut [];
        }
        let storage = OwnedSegment::zeroed(elem_bytes::<T>(nelems), std::mem::align_of::<T>());
        self.buckets.push(Bucket {
            storage,
            nelems,
            segment: None,
            detach: false,
            shrink_to: None,
            _marker: PhantomData,
        });
        self.local_visible += nelems;
        let bucket = self.buckets.last_mut().expect("just pushed");
        unsafe { std::slice::from_raw_parts_mut(bucket.storage.as_ptr::<T>(), bucket.nelems) }
    }

    /// Retract `nelems` elements from the tail of the local heap.
    ///
    /// Unattached growth is dropped immediately; attached buckets are only
    /// queued for detach and stay readable by remote units until the next
    /// commit.
    pub fn shrink(&mut self, nelems: usize) -> TesseraResult<()> {
        if nelems > self.local_visible {
            return Err(TesseraError::invalid(format!(
                "shrink of {} elements exceeds the visible size {}",
                nelems, self.local_visible
            )));
        }
        let mut remaining = nelems;
        let mut idx = self.buckets.len();
        while remaining > 0 {
            idx -= 1;
            if !self.buckets[idx].attached() {
                let n = self.buckets[idx].nelems;
                if n <= remaining {
                    remaining -= n;
                    self.buckets.remove(idx);
                } else {
                    self.buckets[idx].nelems -= remaining;
                    remaining = 0;
                }
            } else {
                let avail = self.buckets[idx].effective_nelems();
                if avail == 0 {
                    continue;
                }
                if avail <= remaining {
                    self.buckets[idx].detach = true;
                    self.buckets[idx].shrink_to = None;
                    remaining -= avail;
                } else {
                    self.buckets[idx].shrink_to = Some(avail - remaining);
                    remaining = 0;
                }
            }
        }
        self.local_visible -= nelems;
        Ok(())
    }

    /// Publish local growth and shrinkage. Collective on the team.
    ///
    /// Phase 1 detaches every bucket queued for detach (all units detach the
    /// same number of buckets, null-padded); phase 2 attaches the global
    /// maximum of pending-attach counts in insertion order (null-padded) and
    /// exchanges the bucket tables. Iterators and pointers into regions
    /// detached by this commit are invalidated; everything else stays valid.
    ///
    /// # Collective Operation
    /// Requires all units of the team, even those with no pending changes.
    ///
    /// # Examples
    ///```
    /// use tessera::prelude::*;
    ///
    /// TesseraWorldBuilder::new().launch_threaded(2, |world| {
    ///     let mut mem = world.team().alloc_dynamic::<u64>(10).unwrap();
    ///     if world.my_unit() == 0 {
    ///         mem.grow(5);
    ///     }
    ///     mem.commit().unwrap();
    ///     assert_eq!(mem.local_size(0).unwrap(), 15);
    /// });
    ///```
    pub fn commit(&mut self) -> TesseraResult<()> {
        self.team.check_active()?;
        // fence: peers have stopped reading what this commit will detach
        self.team.barrier();

        // a partial shrink is a detach plus a re-attach of the kept prefix
        let ndetach = self
            .buckets
            .iter()
            .filter(|b| b.attached() && (b.detach || b.shrink_to.is_some()))
            .count();
        let nattach = self
            .buckets
            .iter()
            .filter(|b| !b.attached() || b.shrink_to.is_some())
            .filter(|b| !b.detach)
            .count();
        let mine = (ndetach as u64, nattach as u64);
        let encoded =
            crate::serialize(&mine, false).map_err(|e| TesseraError::transport(e.to_string()))?;
        let counts: Vec<(u64, u64)> = self
            .team
            .exchange(&encoded)?
            .iter()
            .map(|bytes| crate::deserialize(bytes, false))
            .collect::<Result<_, _>>()
            .map_err(|e| TesseraError::transport(e.to_string()))?;
        let max_attach = counts.iter().map(|c| c.1).max().unwrap_or(0);

        // phase 1: detach
        let mut idx = 0;
        while idx < self.buckets.len() {
            let bucket = &mut self.buckets[idx];
            if bucket.attached() && bucket.detach {
                let segment = bucket.segment.take().expect("attached");
                self.team.fabric.detach(segment)?;
                self.buckets.remove(idx);
                continue;
            }
            if bucket.attached() && bucket.shrink_to.is_some() {
                let segment = bucket.segment.take().expect("attached");
                self.team.fabric.detach(segment)?;
                bucket.nelems = bucket.shrink_to.take().expect("partial shrink");
                // the kept prefix re-attaches below as a fresh bucket
            }
            idx += 1;
        }

        // phase 2: attach, insertion order, id allocation null-padded so it
        // stays symmetric across the team
        let mut pending: Vec<usize> = self
            .buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.attached())
            .map(|(i, _)| i)
            .collect();
        pending.reverse();
        for _ in 0..max_attach {
            let segment = self.team.alloc_segment_id()?;
            if let Some(i) = pending.pop() {
                let bucket = &mut self.buckets[i];
                self.team.fabric.attach(
                    segment,
                    bucket.storage.addr(),
                    elem_bytes::<T>(bucket.nelems),
                )?;
                bucket.segment = Some(segment);
            }
        }

        // exchange the bucket tables so every unit can address every bucket
        let table: Vec<BucketEntry> = self
            .buckets
            .iter()
            .map(|b| (b.nelems as u64, b.segment.expect("all attached")))
            .collect();
        let encoded =
            crate::serialize(&table, false).map_err(|e| TesseraError::transport(e.to_string()))?;
        let tables = self.team.exchange(&encoded)?;
        self.remote_buckets = tables
            .iter()
            .map(|bytes| crate::deserialize(bytes, false))
            .collect::<Result<_, _>>()
            .map_err(|e| TesseraError::transport(e.to_string()))?;
        self.remote_sizes = self
            .remote_buckets
            .iter()
            .map(|buckets| buckets.iter().map(|(n, _)| *n as usize).sum())
            .collect();
        debug_assert_eq!(self.remote_sizes[self.team.my_team_unit], self.local_visible);
        self.team.barrier();
        tracing::debug!(
            "commit on team {}: sizes {:?}",
            self.team.id,
            self.remote_sizes
        );
        Ok(())
    }

    /// The visible size of `team_unit`'s heap: for the calling unit its own
    /// local size including uncommitted growth, for any other unit the last
    /// committed size.
    pub fn local_size(&self, team_unit: usize) -> TesseraResult<usize> {
        if team_unit >= self.team.num_units() {
            return Err(TesseraError::invalid(format!(
                "unit {} outside team of {} units",
                team_unit,
                self.team.num_units()
            )));
        }
        if team_unit == self.team.my_team_unit {
            Ok(self.local_visible)
        } else {
            Ok(self.remote_sizes[team_unit])
        }
    }

    /// The global element count as observable by this unit: committed sizes
    /// of the other units plus this unit's visible size.
    pub fn size(&self) -> usize {
        let me = self.team.my_team_unit;
        self.remote_sizes
            .iter()
            .enumerate()
            .map(|(u, n)| if u == me { self.local_visible } else { *n })
            .sum()
    }

    /// Committed element count of the whole region (what any remote unit can
    /// address).
    pub fn committed_size(&self) -> usize {
        self.remote_sizes.iter().sum()
    }

    pub fn team_units(&self) -> usize {
        self.team.num_units()
    }

    /// Pointer to committed element `global_index`, where elements are
    /// ordered unit by unit (team order) and bucket by bucket within a unit.
    pub fn gptr_at(&self, global_index: usize) -> TesseraResult<GlobalPtr> {
        let mut remaining = global_index;
        for (unit, buckets) in self.remote_buckets.iter().enumerate() {
            if remaining < self.remote_sizes[unit] {
                for (nelems, segment) in buckets {
                    let nelems = *nelems as usize;
                    if remaining < nelems {
                        return Ok(GlobalPtr::new(
                            unit,
                            *segment,
                            elem_bytes::<T>(remaining) as u64,
                        ));
                    }
                    remaining -= nelems;
                }
                unreachable!("bucket sizes sum to the unit size");
            }
            remaining -= self.remote_sizes[unit];
        }
        Err(TesseraError::out_of_range(format!(
            "element {} of a {}-element committed region",
            global_index,
            self.committed_size()
        )))
    }

    /// Pointer to the first committed element, null when the region is
    /// empty. Refreshed by every commit.
    pub fn gbegin(&self) -> GlobalPtr {
        self.gptr_at(0).unwrap_or_else(|_| GlobalPtr::null())
    }

    /// Read one committed element. Blocking.
    pub fn read_blocking(&self, global_index: usize) -> TesseraResult<T> {
        self.team.check_active()?;
        let gptr = self.gptr_at(global_index)?;
        let global_unit = self.team.global_units[gptr.unit()];
        let mut value = std::mem::MaybeUninit::<T>::uninit();
        let dst = unsafe {
            std::slice::from_raw_parts_mut(value.as_mut_ptr() as *mut u8, std::mem::size_of::<T>())
        };
        self.team
            .fabric
            .get_handle(global_unit, gptr.segment(), gptr.offset() as usize, dst)?
            .wait()?;
        Ok(unsafe { value.assume_init() })
    }

    /// Write one committed element. Blocking (local and remote completion).
    ///
    /// # Safety
    /// One-sided: no synchronization with the owner or other writers.
    pub unsafe fn write_blocking(&self, global_index: usize, value: T) -> TesseraResult<()> {
        self.team.check_active()?;
        let gptr = self.gptr_at(global_index)?;
        let global_unit = self.team.global_units[gptr.unit()];
        let src =
            std::slice::from_raw_parts(&value as *const T as *const u8, std::mem::size_of::<T>());
        self.team
            .fabric
            .put_handle(global_unit, gptr.segment(), gptr.offset() as usize, src)?
            .wait()
    }

    /// Iterate this unit's visible elements (committed and uncommitted), in
    /// heap order.
    ///
    /// # Safety
    /// Remote units may concurrently write committed elements through
    /// one-sided operations.
    pub unsafe fn local_iter(&self) -> impl Iterator<Item = &T> {
        self.buckets.iter().flat_map(|bucket| {
            std::slice::from_raw_parts(
                bucket.storage.as_ptr::<T>(),
                bucket.effective_nelems(),
            )
            .iter()
        })
    }

    /// Mutably iterate this unit's visible elements.
    ///
    /// # Safety
    /// As [`local_iter`][Self::local_iter], plus exclusivity.
    pub unsafe fn local_iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.buckets.iter_mut().flat_map(|bucket| {
            let n = bucket.effective_nelems();
            std::slice::from_raw_parts_mut(bucket.storage.as_ptr::<T>(), n).iter_mut()
        })
    }

    /// Barrier over the region's team.
    pub fn barrier(&self) {
        self.team.barrier();
    }
}

impl<T: Dist> Drop for DynamicMemoryRegion<T> {
    fn drop(&mut self) {
        for bucket in &mut self.buckets {
            if let Some(segment) = bucket.segment.take() {
                let _ = self.team.fabric.detach(segment);
            }
        }
    }
}
