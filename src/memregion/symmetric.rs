//! Team-aligned symmetric global memory.

use crate::error::{TesseraError, TesseraResult};
use crate::fabric::segment::OwnedSegment;
use crate::fabric::{FabricRdma, RdmaHandle, SegmentId};
use crate::global_ptr::GlobalPtr;
use crate::memregion::Dist;
use crate::tessera_team::TeamRT;
use std::marker::PhantomData;
use std::sync::Arc;

enum Storage<T> {
    Owned(OwnedSegment),
    Registered { ptr: *mut T },
}

/// A collective allocation of `nelems` elements of `T` on every unit of a
/// team, exported under one segment id.
///
/// Data motion targets are named by team-local unit id and element offset,
/// or equivalently by a [`GlobalPtr`] into the region. Regular `put`/`get`
/// complete at [`flush`][SymmetricMemoryRegion::flush]; the `_handle`
/// variants return an [`RdmaHandle`]; the `_blocking` variants return after
/// local and remote completion.
pub struct SymmetricMemoryRegion<T: Dist> {
    team: Arc<TeamRT>,
    segment: SegmentId,
    nelems: usize,
    storage: Storage<T>,
    _marker: PhantomData<T>,
}

// access to the raw storage is funneled through the fabric or through the
// explicitly unsafe local accessors
unsafe impl<T: Dist> Send for SymmetricMemoryRegion<T> {}
unsafe impl<T: Dist> Sync for SymmetricMemoryRegion<T> {}

impl<T: Dist> std::fmt::Debug for SymmetricMemoryRegion<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SymmetricMemoryRegion {{ team: {}, segment: {}, nelems: {} }}",
            self.team.id, self.segment, self.nelems
        )
    }
}

fn elem_bytes<T>(nelems: usize) -> usize {
    nelems * std::mem::size_of::<T>()
}

impl<T: Dist> SymmetricMemoryRegion<T> {
    /// Verify that every member passed the same allocation arguments; fails
    /// with `InvalidArgument` on the units whose arguments deviate from the
    /// team's first unit, and `TransportError` on the units that observe the
    /// asymmetry.
    fn match_collective_args(team: &Arc<TeamRT>, nelems: usize) -> TesseraResult<()> {
        let mine = (nelems as u64, std::mem::size_of::<T>() as u64);
        let encoded =
            crate::serialize(&mine, false).map_err(|e| TesseraError::transport(e.to_string()))?;
        let all = team.exchange(&encoded)?;
        let first: (u64, u64) = crate::deserialize(&all[0], false)
            .map_err(|e| TesseraError::transport(e.to_string()))?;
        if mine != first {
            return Err(TesseraError::invalid(format!(
                "symmetric allocation arguments differ: local {:?} vs unit 0 {:?}",
                mine, first
            )));
        }
        for bytes in &all {
            let theirs: (u64, u64) = crate::deserialize(bytes, false)
                .map_err(|e| TesseraError::transport(e.to_string()))?;
            if theirs != first {
                return Err(TesseraError::transport(
                    "collective allocation aborted: asymmetric arguments",
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn alloc(team: Arc<TeamRT>, nelems: usize) -> TesseraResult<Self> {
        team.check_active()?;
        Self::match_collective_args(&team, nelems)?;
        let storage = OwnedSegment::zeroed(elem_bytes::<T>(nelems), std::mem::align_of::<T>());
        let segment = team.alloc_segment_id()?;
        team.fabric
            .attach(segment, storage.addr(), storage.nbytes())?;
        team.barrier();
        Ok(SymmetricMemoryRegion {
            team,
            segment,
            nelems,
            storage: Storage::Owned(storage),
            _marker: PhantomData,
        })
    }

    pub(crate) unsafe fn register(
        team: Arc<TeamRT>,
        ptr: *mut T,
        nelems: usize,
    ) -> TesseraResult<Self> {
        team.check_active()?;
        Self::match_collective_args(&team, nelems)?;
        let segment = team.alloc_segment_id()?;
        team.fabric
            .attach(segment, ptr as usize, elem_bytes::<T>(nelems))?;
        team.barrier();
        Ok(SymmetricMemoryRegion {
            team,
            segment,
            nelems,
            storage: Storage::Registered { ptr },
            _marker: PhantomData,
        })
    }

    /// Collectively release the region. The plain `Drop` only withdraws the
    /// local export; calling `free` keeps the release symmetric.
    ///
    /// # Collective Operation
    /// Requires all units of the region's team to enter the call.
    pub fn free(self) {
        self.team.barrier();
        // local detach happens in Drop
    }

    /// The length (in elements of `T`) of each unit's slice of the region,
    /// not the global element count.
    ///
    /// # One-sided Operation
    /// The result is returned only on the calling unit.
    ///
    /// # Examples
    ///```
    /// use tessera::prelude::*;
    ///
    /// let world = TesseraWorldBuilder::new().build();
    /// let mem = world.alloc_symmetric::<usize>(1000).unwrap();
    /// assert_eq!(mem.len(), 1000);
    ///```
    pub fn len(&self) -> usize {
        self.nelems
    }

    pub fn is_empty(&self) -> bool {
        self.nelems == 0
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment
    }

    /// Number of units holding a slice of this region.
    pub fn num_units(&self) -> usize {
        self.team.num_units()
    }

    /// This unit's id in the region's team.
    pub fn my_unit(&self) -> usize {
        self.team.my_team_unit
    }

    fn local_ptr(&self) -> *mut T {
        match &self.storage {
            Storage::Owned(seg) => seg.as_ptr::<T>(),
            Storage::Registered { ptr } => *ptr,
        }
    }

    /// Pointer to the first element of the first unit's slice.
    ///
    /// Team alignment means this is computed, not communicated: combined
    /// with [`GlobalPtr::with_unit`] it addresses any member's slice.
    ///
    /// # Examples
    ///```
    /// use tessera::prelude::*;
    ///
    /// let world = TesseraWorldBuilder::new().build();
    /// let mem = world.alloc_symmetric::<u64>(16).unwrap();
    /// let origin = mem.gptr();
    /// assert_eq!(origin.unit(), 0);
    /// assert_eq!(origin.offset(), 0);
    ///```
    pub fn gptr(&self) -> GlobalPtr {
        GlobalPtr::new(0, self.segment, 0)
    }

    /// Pointer to element `index` of `team_unit`'s slice.
    ///
    /// # One-sided Operation
    /// Pure address arithmetic, no communication with `team_unit`.
    pub fn gptr_at(&self, team_unit: usize, index: usize) -> TesseraResult<GlobalPtr> {
        self.check_target(team_unit, index, 0)?;
        Ok(GlobalPtr::new(
            team_unit,
            self.segment,
            elem_bytes::<T>(index) as u64,
        ))
    }

    /// Resolve a pointer into this region to a local typed address.
    pub fn local_addr(&self, gptr: &GlobalPtr) -> TesseraResult<*const T> {
        if gptr.segment() != self.segment {
            return Err(TesseraError::invalid(format!(
                "pointer into segment {} used on region with segment {}",
                gptr.segment(),
                self.segment
            )));
        }
        gptr.local_addr_in(self.team.my_team_unit, |segment| {
            self.team.fabric.local_base(segment)
        })
        .map(|addr| addr as *const T)
    }

    /// The local slice of the region.
    ///
    /// # Safety
    /// Remote units may be writing the same memory through one-sided
    /// operations; the caller is responsible for the synchronization that
    /// makes this read meaningful.
    pub unsafe fn as_slice(&self) -> &[T] {
        std::slice::from_raw_parts(self.local_ptr(), self.nelems)
    }

    /// The local slice of the region, mutable.
    ///
    /// # Safety
    /// As [`as_slice`][Self::as_slice], plus the usual exclusivity caveats.
    pub unsafe fn as_mut_slice(&self) -> &mut [T] {
        std::slice::from_raw_parts_mut(self.local_ptr(), self.nelems)
    }

    /// Reference to local element `index`.
    ///
    /// # Safety
    /// As [`as_slice`][Self::as_slice].
    pub unsafe fn at(&self, index: usize) -> TesseraResult<&T> {
        if index >= self.nelems {
            return Err(TesseraError::out_of_range(format!(
                "element {} of a {}-element local slice",
                index, self.nelems
            )));
        }
        Ok(&*self.local_ptr().add(index))
    }

    fn check_target(&self, team_unit: usize, index: usize, nelems: usize) -> TesseraResult<()> {
        self.team.check_active()?;
        if team_unit >= self.team.num_units() {
            return Err(TesseraError::invalid(format!(
                "unit {} outside team of {} units",
                team_unit,
                self.team.num_units()
            )));
        }
        if index + nelems > self.nelems {
            return Err(TesseraError::out_of_range(format!(
                "elements {}..{} of a {}-element slice",
                index,
                index + nelems,
                self.nelems
            )));
        }
        Ok(())
    }

    fn global_unit(&self, team_unit: usize) -> usize {
        self.team.global_units[team_unit]
    }

    fn src_bytes(src: &[T]) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(src.as_ptr() as *const u8, elem_bytes::<T>(src.len()))
        }
    }

    fn dst_bytes(dst: &mut [T]) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(
                dst.as_mut_ptr() as *mut u8,
                elem_bytes::<T>(dst.len()),
            )
        }
    }

    /// Copy `src` into `team_unit`'s slice at element `index`. Returns
    /// before remote completion; complete through
    /// [`flush`][Self::flush].
    ///
    /// # One-sided Operation
    /// The remote unit is not notified; ordering with respect to other
    /// operations holds only within the same `(segment, unit)` pair.
    ///
    /// # Safety
    /// No synchronization with the target or with concurrent accesses to
    /// the same elements.
    ///
    /// # Examples
    ///```
    /// use tessera::prelude::*;
    ///
    /// let world = TesseraWorldBuilder::new().build();
    /// let mem = world.alloc_symmetric::<u64>(8).unwrap();
    /// unsafe { mem.put(0, 0, &[1, 2, 3]).unwrap() };
    /// mem.flush(0).unwrap();
    ///```
    pub unsafe fn put(&self, team_unit: usize, index: usize, src: &[T]) -> TesseraResult<()> {
        self.check_target(team_unit, index, src.len())?;
        self.team.fabric.put(
            self.global_unit(team_unit),
            self.segment,
            elem_bytes::<T>(index),
            Self::src_bytes(src),
        )
    }

    /// Read from `team_unit`'s slice at element `index` into `dst`. The
    /// contents of `dst` are undefined until [`flush`][Self::flush].
    ///
    /// # One-sided Operation
    /// The remote unit is not involved beyond servicing the read.
    ///
    /// # Safety
    /// `dst` must stay alive and untouched until the flush.
    pub unsafe fn get(&self, team_unit: usize, index: usize, dst: &mut [T]) -> TesseraResult<()> {
        self.check_target(team_unit, index, dst.len())?;
        self.team.fabric.get(
            self.global_unit(team_unit),
            self.segment,
            elem_bytes::<T>(index),
            Self::dst_bytes(dst),
        )
    }

    /// As [`put`][Self::put], returning a completion handle.
    ///
    /// # Safety
    /// As [`put`][Self::put].
    pub unsafe fn put_handle(
        &self,
        team_unit: usize,
        index: usize,
        src: &[T],
    ) -> TesseraResult<RdmaHandle> {
        self.check_target(team_unit, index, src.len())?;
        self.team.fabric.put_handle(
            self.global_unit(team_unit),
            self.segment,
            elem_bytes::<T>(index),
            Self::src_bytes(src),
        )
    }

    /// As [`get`][Self::get], returning a completion handle.
    ///
    /// # Safety
    /// `dst` must stay alive and untouched until the handle completes.
    pub unsafe fn get_handle(
        &self,
        team_unit: usize,
        index: usize,
        dst: &mut [T],
    ) -> TesseraResult<RdmaHandle> {
        self.check_target(team_unit, index, dst.len())?;
        self.team.fabric.get_handle(
            self.global_unit(team_unit),
            self.segment,
            elem_bytes::<T>(index),
            Self::dst_bytes(dst),
        )
    }

    /// Put with local and remote completion before return.
    ///
    /// # Safety
    /// As [`put`][Self::put] regarding concurrent access.
    pub unsafe fn put_blocking(
        &self,
        team_unit: usize,
        index: usize,
        src: &[T],
    ) -> TesseraResult<()> {
        self.put_handle(team_unit, index, src)?.wait()
    }

    /// Get with completion before return.
    ///
    /// # Safety
    /// As [`get`][Self::get] regarding concurrent access.
    pub unsafe fn get_blocking(
        &self,
        team_unit: usize,
        index: usize,
        dst: &mut [T],
    ) -> TesseraResult<()> {
        self.get_handle(team_unit, index, dst)?.wait()
    }

    /// Put addressed by a global pointer into this region.
    ///
    /// # Safety
    /// As [`put`][Self::put].
    pub unsafe fn put_gptr(&self, gptr: &GlobalPtr, src: &[T]) -> TesseraResult<()> {
        let (unit, index) = self.decompose(gptr)?;
        self.put(unit, index, src)
    }

    /// Get addressed by a global pointer into this region.
    ///
    /// # Safety
    /// As [`get`][Self::get].
    pub unsafe fn get_gptr(&self, gptr: &GlobalPtr, dst: &mut [T]) -> TesseraResult<()> {
        let (unit, index) = self.decompose(gptr)?;
        self.get(unit, index, dst)
    }

    fn decompose(&self, gptr: &GlobalPtr) -> TesseraResult<(usize, usize)> {
        if gptr.segment() != self.segment || gptr.is_raw_addr() {
            return Err(TesseraError::invalid(format!(
                "pointer {} does not address segment {}",
                gptr, self.segment
            )));
        }
        let bytes = gptr.offset() as usize;
        if bytes % std::mem::size_of::<T>() != 0 {
            return Err(TesseraError::invalid(format!(
                "pointer offset {:#x} is not element aligned",
                bytes
            )));
        }
        Ok((gptr.unit(), bytes / std::mem::size_of::<T>()))
    }

    /// Complete all outstanding operations from this unit to `team_unit` on
    /// this region's segment.
    pub fn flush(&self, team_unit: usize) -> TesseraResult<()> {
        self.team.check_active()?;
        self.team
            .fabric
            .flush(self.global_unit(team_unit), self.segment)
    }

    /// Complete all outstanding operations on this region's segment to every
    /// unit.
    pub fn flush_all(&self) -> TesseraResult<()> {
        self.team.check_active()?;
        for unit in &self.team.global_units {
            self.team.fabric.flush(*unit, self.segment)?;
        }
        Ok(())
    }

    /// Barrier over the region's team.
    pub fn barrier(&self) {
        self.team.barrier();
    }
}

impl<T: Dist> Drop for SymmetricMemoryRegion<T> {
    fn drop(&mut self) {
        let _ = self.team.fabric.detach(self.segment);
    }
}
