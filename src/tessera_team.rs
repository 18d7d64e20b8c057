//! Teams: ordered sets of units that scope every collective operation.
//!
//! The root team spans all units of the fabric and carries the reserved
//! team-of-all id. Sub-teams are created collectively on the parent from a
//! locally constructed [`UnitGroup`]; every parent unit must make the call
//! with an equal group, members get the new team back and non-members get
//! `None`.
//!
//! Internally a team is an [`Arc<TeamRT>`]: the arch chain for id
//! conversion, the fabric, a dissemination barrier, and the collective
//! segment-id allocator.

use crate::barrier::Barrier;
use crate::error::{TesseraError, TesseraResult};
use crate::fabric::{Fabric, FabricCollective, FabricInfo, FabricRdma, SegmentId};
use crate::global_ptr::GlobalPtr;
use crate::memregion::dynamic::DynamicMemoryRegion;
use crate::memregion::symmetric::SymmetricMemoryRegion;
use crate::memregion::Dist;
use crate::tessera_arch::{TeamArchEnum, TeamArchRT};
use crate::tessera_lock::TeamLock;
use crate::unit_group::UnitGroup;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Collectively allocate a fresh segment id over `units`: the maximum of the
/// participants' hints. Monotone per unit, never reused.
pub(crate) fn alloc_segment_id(fabric: &Arc<Fabric>, units: &[usize]) -> TesseraResult<SegmentId> {
    let hint = fabric.next_segment_hint() as u64;
    let all = fabric.exchange(units, &hint.to_le_bytes())?;
    let id = all
        .iter()
        .map(|bytes| {
            let mut word = [0u8; 8];
            word.copy_from_slice(bytes);
            u64::from_le_bytes(word)
        })
        .max()
        .expect("non-empty collective");
    if id > i16::MAX as u64 {
        return Err(TesseraError::transport(format!(
            "segment ids exhausted ({})",
            id
        )));
    }
    fabric.advance_segment_hint(id as usize + 1);
    Ok(id as SegmentId)
}

pub(crate) struct TeamRT {
    pub(crate) id: usize,
    pub(crate) parent: Option<Arc<TeamRT>>,
    pub(crate) arch: Arc<TeamArchRT>,
    pub(crate) fabric: Arc<Fabric>,
    pub(crate) my_global_unit: usize,
    pub(crate) my_team_unit: usize,
    pub(crate) global_units: Vec<usize>, // team order == ascending global ids
    sub_team_cnt: AtomicUsize,
    barrier: Barrier,
}

impl std::fmt::Debug for TeamRT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TeamRT {{ id: {}, units: {:?}, me: {} }}",
            self.id, self.global_units, self.my_team_unit
        )
    }
}

impl TeamRT {
    pub(crate) fn new_root(fabric: Arc<Fabric>) -> TesseraResult<Arc<TeamRT>> {
        let num_units = fabric.num_units();
        let my_global_unit = fabric.my_unit();
        let global_units: Vec<usize> = (0..num_units).collect();
        let arch = Arc::new(TeamArchRT::new_root(num_units));
        let segment = alloc_segment_id(&fabric, &global_units)?;
        let barrier = Barrier::new(
            fabric.clone(),
            segment,
            global_units.clone(),
            Some(my_global_unit),
        )?;
        // all members have attached their barrier slots past this point
        fabric.exchange(&global_units, &[])?;
        Ok(Arc::new(TeamRT {
            id: crate::config().team_all_id,
            parent: None,
            arch,
            fabric,
            my_global_unit,
            my_team_unit: my_global_unit,
            global_units,
            sub_team_cnt: AtomicUsize::new(0),
            barrier,
        }))
    }

    pub(crate) fn check_active(&self) -> TesseraResult<()> {
        if !self.fabric.active() {
            return Err(TesseraError::NotInitialized);
        }
        Ok(())
    }

    pub(crate) fn num_units(&self) -> usize {
        self.global_units.len()
    }

    pub(crate) fn barrier(&self) {
        self.barrier.barrier();
    }

    /// Allgather over the team, team order.
    pub(crate) fn exchange(&self, bytes: &[u8]) -> TesseraResult<Vec<Vec<u8>>> {
        self.check_active()?;
        self.fabric.exchange(&self.global_units, bytes)
    }

    pub(crate) fn alloc_segment_id(&self) -> TesseraResult<SegmentId> {
        alloc_segment_id(&self.fabric, &self.global_units)
    }

    /// Global id of `team_unit`.
    pub(crate) fn global_unit(&self, team_unit: usize) -> TesseraResult<usize> {
        self.arch.global_unit(team_unit).map_err(|e| {
            TesseraError::NotFound(format!("team unit {} in team {} ({})", team_unit, self.id, e))
        })
    }

    /// Team-local id of `global_unit`.
    pub(crate) fn team_unit(&self, global_unit: usize) -> TesseraResult<usize> {
        self.arch.team_unit(global_unit).map_err(|e| {
            TesseraError::NotFound(format!(
                "global unit {} in team {} ({})",
                global_unit, self.id, e
            ))
        })
    }

    pub(crate) fn create_subteam(
        self: &Arc<TeamRT>,
        group: &UnitGroup,
    ) -> TesseraResult<Option<Arc<TeamRT>>> {
        self.check_active()?;
        if group.is_empty() {
            return Err(TesseraError::invalid("cannot create a zero-size team"));
        }
        let mut parent_relative = Vec::with_capacity(group.len());
        for global in group.units() {
            parent_relative.push(self.team_unit(*global).map_err(|_| {
                TesseraError::invalid(format!(
                    "unit {} is not a member of parent team {}",
                    global, self.id
                ))
            })?);
        }
        // consistent across the parent: sub-team creation is collective on it
        let id = self.sub_team_cnt.fetch_add(1, Ordering::SeqCst) + 1;
        let arch = Arc::new(TeamArchRT::new(
            self.arch.clone(),
            TeamArchEnum::from_sorted_units(&parent_relative),
        ));
        if !group.contains(self.my_global_unit) {
            return Ok(None);
        }
        let global_units = group.units().to_vec();
        let my_team_unit = arch.team_unit(self.my_global_unit).expect("member");
        let segment = alloc_segment_id(&self.fabric, &global_units)?;
        let barrier = Barrier::new(
            self.fabric.clone(),
            segment,
            global_units.clone(),
            Some(my_team_unit),
        )?;
        self.fabric.exchange(&global_units, &[])?;
        tracing::debug!(
            "created sub-team {} of team {} with units {:?}",
            id,
            self.id,
            global_units
        );
        Ok(Some(Arc::new(TeamRT {
            id,
            parent: Some(self.clone()),
            arch,
            fabric: self.fabric.clone(),
            my_global_unit: self.my_global_unit,
            my_team_unit,
            global_units,
            sub_team_cnt: AtomicUsize::new(0),
            barrier,
        })))
    }
}

/// A handle to an ordered set of units scoping collectives, symmetric and
/// dynamic memory, and locks.
#[derive(Clone, Debug)]
pub struct TesseraTeam {
    pub(crate) rt: Arc<TeamRT>,
}

impl TesseraTeam {
    /// The team id; unique with respect to the parent team. The root team
    /// carries the reserved team-of-all id.
    pub fn id(&self) -> usize {
        self.rt.id
    }

    /// This unit's id within the team.
    pub fn my_unit(&self) -> usize {
        self.rt.my_team_unit
    }

    /// This unit's id within the root team.
    pub fn my_global_unit(&self) -> usize {
        self.rt.my_global_unit
    }

    /// The number of units in the team.
    pub fn num_units(&self) -> usize {
        self.rt.num_units()
    }

    /// Member global ids, ascending (team order).
    pub fn units(&self) -> &[usize] {
        &self.rt.global_units
    }

    /// Convert a team-local unit id to the root team's id space.
    pub fn global_unit(&self, team_unit: usize) -> TesseraResult<usize> {
        self.rt.global_unit(team_unit)
    }

    /// Convert a root-team unit id into this team's id space.
    pub fn team_unit(&self, global_unit: usize) -> TesseraResult<usize> {
        self.rt.team_unit(global_unit)
    }

    /// The team membership as a group.
    pub fn group(&self) -> UnitGroup {
        self.rt.arch.to_group()
    }

    /// The parent team; `None` for the root team.
    pub fn parent(&self) -> Option<TesseraTeam> {
        self.rt.parent.as_ref().map(|rt| TesseraTeam { rt: rt.clone() })
    }

    /// Block until every team member has entered the barrier. Acts as a full
    /// fence for this unit's outstanding one-sided operations.
    ///
    /// # Collective Operation
    /// Requires all units of the team. Barriers are also implied by team
    /// creation, symmetric allocation and dynamic-memory commits.
    pub fn barrier(&self) {
        self.rt.barrier();
    }

    /// Collectively create a sub-team from `group` (global unit ids).
    ///
    /// Every unit of this team must call with an equal group; members
    /// receive the new team, non-members `None`.
    ///
    /// # Collective Operation
    /// Requires all units of the parent team to enter the call, members and
    /// non-members alike (the child team id is derived from the parent's
    /// creation counter).
    ///
    /// # Examples
    ///```
    /// use tessera::prelude::*;
    ///
    /// TesseraWorldBuilder::new().launch_threaded(4, |world| {
    ///     let team = world.team();
    ///     let halves = team.group().split(2).unwrap();
    ///     let first = team.create_subteam(&halves[0]).unwrap();
    ///     let second = team.create_subteam(&halves[1]).unwrap();
    ///     // exactly one of the two is Some on every unit
    ///     assert!(first.is_some() != second.is_some());
    /// });
    ///```
    pub fn create_subteam(&self, group: &UnitGroup) -> TesseraResult<Option<TesseraTeam>> {
        Ok(self
            .rt
            .create_subteam(group)?
            .map(|rt| TesseraTeam { rt }))
    }

    /// Collectively allocate a symmetric region of `nelems` elements of `T`
    /// per unit. Every member must pass the same `nelems`.
    ///
    /// # Collective Operation
    /// Requires all units of the team; the allocation is team-aligned, so
    /// afterwards any member can address any other member's slice without
    /// communication.
    ///
    /// # Examples
    ///```
    /// use tessera::prelude::*;
    ///
    /// let world = TesseraWorldBuilder::new().build();
    /// let team = world.team();
    /// let mem = team.alloc_symmetric::<f64>(256).unwrap();
    /// assert_eq!(mem.len(), 256);
    ///```
    pub fn alloc_symmetric<T: Dist>(
        &self,
        nelems: usize,
    ) -> TesseraResult<SymmetricMemoryRegion<T>> {
        SymmetricMemoryRegion::alloc(self.rt.clone(), nelems)
    }

    /// Collectively export `nelems` elements of pre-existing local memory at
    /// `ptr` as a symmetric region.
    ///
    /// # Safety
    /// `ptr` must stay valid and unaliased by safe code until the returned
    /// region is dropped (collectively).
    pub unsafe fn register_symmetric<T: Dist>(
        &self,
        ptr: *mut T,
        nelems: usize,
    ) -> TesseraResult<SymmetricMemoryRegion<T>> {
        SymmetricMemoryRegion::register(self.rt.clone(), ptr, nelems)
    }

    /// Collectively create a dynamic (bucketed, per-unit growable) region
    /// with `initial_nelems` committed elements per unit.
    pub fn alloc_dynamic<T: Dist>(
        &self,
        initial_nelems: usize,
    ) -> TesseraResult<DynamicMemoryRegion<T>> {
        DynamicMemoryRegion::alloc(self.rt.clone(), initial_nelems)
    }

    /// Collectively create a distributed mutex scoped to this team.
    pub fn new_lock(&self) -> TesseraResult<TeamLock> {
        TeamLock::new(self.rt.clone())
    }

    /// Resolve a global pointer to a local virtual address.
    ///
    /// Fails with `NotLocal` unless the pointer's unit is this unit's id in
    /// the team.
    pub fn local_addr(&self, gptr: &GlobalPtr) -> TesseraResult<*const u8> {
        self.rt.check_active()?;
        gptr.local_addr_in(self.rt.my_team_unit, |segment| {
            self.rt.fabric.local_base(segment)
        })
        .map(|addr| addr as *const u8)
    }

    /// Execute a registered action locally with a raw byte payload.
    pub fn exec_action(&self, name: &str, payload: &[u8]) -> TesseraResult<()> {
        self.rt.check_active()?;
        crate::active_messaging::exec_action(name, payload)
    }
}
