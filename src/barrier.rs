//! Team-scoped n-way dissemination barrier built on one-sided puts into a
//! symmetric signal segment.
//!
//! Each unit owns `rounds * (k-1)` generation slots; in round `r` it signals
//! the units at distance `j * k^r` and spins on the slots written by the
//! mirrored senders. The generation counter makes slots reusable without
//! clearing. A unit that is not a member of the team holds no buffers and
//! its barrier call is a no-op.

use crate::config;
use crate::error::TesseraResult;
use crate::fabric::segment::OwnedSegment;
use crate::fabric::{spin_wait, Fabric, FabricRdma, SegmentId};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) struct Barrier {
    fabric: Arc<Fabric>,
    segment: SegmentId,
    bufs: Option<BarrierBufs>,
}

struct BarrierBufs {
    my_index: usize,         // position in team_units
    team_units: Vec<usize>,  // global ids, team order
    slots: OwnedSegment,     // rounds * (k-1) u64 generation slots
    n_rounds: usize,
    factor: usize,
    generation: AtomicUsize,
}

fn num_rounds(num_units: usize, factor: usize) -> usize {
    let mut rounds = 0;
    let mut span = 1;
    while span < num_units {
        span *= factor;
        rounds += 1;
    }
    rounds
}

impl Barrier {
    /// Collective over the members of `team_units`; `my_index` is `None` on
    /// units outside the team.
    pub(crate) fn new(
        fabric: Arc<Fabric>,
        segment: SegmentId,
        team_units: Vec<usize>,
        my_index: Option<usize>,
    ) -> TesseraResult<Barrier> {
        let bufs = match my_index {
            Some(my_index) if team_units.len() > 1 => {
                let factor = config().barrier_dissemination_factor.max(2);
                let n_rounds = num_rounds(team_units.len(), factor);
                let n_slots = n_rounds * (factor - 1);
                let slots = OwnedSegment::zeroed(
                    n_slots * std::mem::size_of::<u64>(),
                    std::mem::align_of::<u64>(),
                );
                fabric.attach(segment, slots.addr(), slots.nbytes())?;
                Some(BarrierBufs {
                    my_index,
                    team_units,
                    slots,
                    n_rounds,
                    factor,
                    generation: AtomicUsize::new(0),
                })
            }
            _ => None,
        };
        Ok(Barrier {
            fabric,
            segment,
            bufs,
        })
    }

    pub(crate) fn barrier(&self) {
        let bufs = match &self.bufs {
            Some(bufs) => bufs,
            None => return,
        };
        let gen = bufs.generation.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        let n = bufs.team_units.len();
        let mut span = 1;
        for round in 0..bufs.n_rounds {
            for j in 1..bufs.factor {
                let peer = (bufs.my_index + j * span) % n;
                if peer == bufs.my_index {
                    continue;
                }
                let slot = round * (bufs.factor - 1) + (j - 1);
                let offset = slot * std::mem::size_of::<u64>();
                self.fabric
                    .put(
                        bufs.team_units[peer],
                        self.segment,
                        offset,
                        &gen.to_le_bytes(),
                    )
                    .expect("barrier signal put");
            }
            for j in 1..bufs.factor {
                let sender = (bufs.my_index + n - (j * span) % n) % n;
                if sender == bufs.my_index {
                    continue;
                }
                let slot = round * (bufs.factor - 1) + (j - 1);
                let word =
                    unsafe { &*(bufs.slots.as_ptr::<AtomicU64>().add(slot)) };
                spin_wait(
                    || word.load(Ordering::Acquire) >= gen,
                    "team barrier round signal",
                );
            }
            span *= bufs.factor;
        }
    }
}

impl Drop for Barrier {
    fn drop(&mut self) {
        if self.bufs.is_some() {
            let _ = self.fabric.detach(self.segment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_counts() {
        assert_eq!(num_rounds(1, 2), 0);
        assert_eq!(num_rounds(2, 2), 1);
        assert_eq!(num_rounds(5, 2), 3);
        assert_eq!(num_rounds(8, 2), 3);
        assert_eq!(num_rounds(9, 3), 2);
        assert_eq!(num_rounds(10, 3), 3);
    }
}
