//! Distributed mutexes scoped to a team.
//!
//! Each lock is a single u64 word living on one member (spread across the
//! team by segment id), claimed through remote compare-and-swap. Acquire is
//! O(1) in space and does not coordinate with anything but the owner word;
//! fairness is not guaranteed.

use crate::config;
use crate::error::{TesseraError, TesseraResult};
use crate::fabric::{FabricRdma, SegmentId};
use crate::memregion::symmetric::SymmetricMemoryRegion;
use crate::tessera_team::TeamRT;
use std::sync::Arc;
use std::time::Instant;

const UNLOCKED: u64 = 0;

/// A distributed mutex. Collectively constructed through
/// [`TesseraTeam::new_lock`][crate::TesseraTeam::new_lock].
pub struct TeamLock {
    team: Arc<TeamRT>,
    // symmetric so every member can compute the word's address; only the
    // owner unit's word is ever touched
    words: SymmetricMemoryRegion<u64>,
    owner_global: usize,
}

impl std::fmt::Debug for TeamLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TeamLock {{ team: {}, owner: {} }}",
            self.team.id, self.owner_global
        )
    }
}

impl TeamLock {
    pub(crate) fn new(team: Arc<TeamRT>) -> TesseraResult<TeamLock> {
        team.check_active()?;
        let words = SymmetricMemoryRegion::<u64>::alloc(team.clone(), 1)?;
        let owner_team_unit = words.segment_id() as usize % team.num_units();
        let owner_global = team.global_units[owner_team_unit];
        Ok(TeamLock {
            team,
            words,
            owner_global,
        })
    }

    fn segment(&self) -> SegmentId {
        self.words.segment_id()
    }

    fn token(&self) -> u64 {
        // unit ids are dense, so my id + 1 is a unique nonzero claim token
        self.team.my_team_unit as u64 + 1
    }

    /// Try to take the lock without blocking.
    pub fn try_acquire(&self) -> TesseraResult<bool> {
        self.team.check_active()?;
        let prev = self.team.fabric.atomic_cas_u64(
            self.owner_global,
            self.segment(),
            0,
            UNLOCKED,
            self.token(),
        )?;
        Ok(prev == UNLOCKED)
    }

    /// Take the lock, spinning until it is granted.
    pub fn acquire(&self) -> TesseraResult<()> {
        let mut start = Instant::now();
        loop {
            if self.try_acquire()? {
                return Ok(());
            }
            std::thread::yield_now();
            if start.elapsed().as_secs_f64() > config().deadlock_timeout {
                tracing::warn!(
                    "potential deadlock: lock on team {} held elsewhere for over {}s",
                    self.team.id,
                    config().deadlock_timeout
                );
                start = Instant::now();
            }
        }
    }

    /// Release the lock. Fails if the calling unit does not hold it.
    pub fn release(&self) -> TesseraResult<()> {
        self.team.check_active()?;
        let prev = self.team.fabric.atomic_cas_u64(
            self.owner_global,
            self.segment(),
            0,
            self.token(),
            UNLOCKED,
        )?;
        if prev != self.token() {
            return Err(TesseraError::invalid(format!(
                "released a lock held by token {} (mine is {})",
                prev,
                self.token()
            )));
        }
        Ok(())
    }

    /// Run `f` under the lock.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> TesseraResult<R> {
        self.acquire()?;
        let result = f();
        self.release()?;
        Ok(result)
    }
}
