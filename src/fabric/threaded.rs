//! The threaded fabric: every unit is a thread of the current process.
//!
//! Transfers run through a single delivery engine thread fed by a command
//! channel. The engine processes commands in posting order, which yields the
//! required completion ordering per `(segment, unit)` pair for free, and it
//! makes handle/flush semantics observable: a posted operation is genuinely
//! outstanding until the engine has executed it.
//!
//! Collectives rendezvous through an in-process mailbox keyed by the
//! participating unit list and a per-unit epoch counter, so differently
//! shaped teams can run collectives independently.

use crate::error::{TesseraError, TesseraResult};
use crate::fabric::segment::SegmentTable;
use crate::fabric::{
    spin_wait, Backend, FabricCollective, FabricInfo, FabricRdma, HandleInner, RdmaHandle,
    SegmentId,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex};

enum Cmd {
    Put {
        unit: usize,
        segment: SegmentId,
        offset: usize,
        data: Vec<u8>,
        handle: Option<Arc<HandleInner>>,
        pending: Arc<AtomicUsize>,
    },
    Get {
        unit: usize,
        segment: SegmentId,
        offset: usize,
        dst: usize,
        len: usize,
        handle: Option<Arc<HandleInner>>,
        pending: Arc<AtomicUsize>,
    },
    Cas {
        unit: usize,
        segment: SegmentId,
        offset: usize,
        old: u64,
        new: u64,
        reply: Sender<TesseraResult<u64>>,
        pending: Arc<AtomicUsize>,
    },
    Store {
        unit: usize,
        segment: SegmentId,
        offset: usize,
        val: u64,
        pending: Arc<AtomicUsize>,
    },
    Shutdown,
}

#[derive(Default)]
struct RendezvousSlot {
    contributions: HashMap<usize, Vec<u8>>,
    expected: usize,
    readers: usize,
}

struct Rendezvous {
    slots: Mutex<HashMap<(u64, u64), RendezvousSlot>>,
    arrived: Condvar,
}

impl Rendezvous {
    fn new() -> Rendezvous {
        Rendezvous {
            slots: Mutex::new(HashMap::new()),
            arrived: Condvar::new(),
        }
    }

    /// Deposit `bytes` for `my_unit` and wait until every unit of `units`
    /// has deposited; returns all contributions in `units` order.
    fn exchange(
        &self,
        key: (u64, u64),
        units: &[usize],
        my_unit: usize,
        bytes: Vec<u8>,
    ) -> Vec<Vec<u8>> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key).or_insert_with(|| RendezvousSlot {
            expected: units.len(),
            ..Default::default()
        });
        slot.contributions.insert(my_unit, bytes);
        if slot.contributions.len() == slot.expected {
            self.arrived.notify_all();
        }
        while slots.get(&key).map(|s| s.contributions.len()).unwrap_or(0) < units.len() {
            self.arrived.wait(&mut slots);
        }
        let slot = slots.get_mut(&key).expect("rendezvous slot");
        let result = units
            .iter()
            .map(|u| slot.contributions[u].clone())
            .collect();
        slot.readers += 1;
        if slot.readers == slot.expected {
            slots.remove(&key);
        }
        result
    }
}

/// State shared between the unit-facing side and the delivery engine; kept
/// out of `ThreadedFabricInner` so the engine thread does not keep the
/// fabric (and thereby its own join handle) alive.
struct EngineState {
    segments: Arc<SegmentTable>,
    queued: Arc<AtomicUsize>,
    errors: Arc<Mutex<HashMap<(SegmentId, usize), String>>>,
}

impl EngineState {
    fn record_error(&self, segment: SegmentId, unit: usize, err: &TesseraError) {
        tracing::error!("deferred rdma failure on ({}, {}): {}", segment, unit, err);
        self.errors.lock().insert((segment, unit), err.to_string());
    }
}

pub(crate) struct ThreadedFabricInner {
    segments: Arc<SegmentTable>,
    num_units: usize,
    cmds: Sender<Cmd>,
    engine: Mutex<Option<std::thread::JoinHandle<()>>>,
    queued: Arc<AtomicUsize>,
    pending: Mutex<HashMap<(SegmentId, usize), Arc<AtomicUsize>>>,
    errors: Arc<Mutex<HashMap<(SegmentId, usize), String>>>,
    rendezvous: Rendezvous,
}

impl std::fmt::Debug for ThreadedFabricInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ThreadedFabricInner({} units)", self.num_units)
    }
}

impl ThreadedFabricInner {
    fn pending_counter(&self, segment: SegmentId, unit: usize) -> Arc<AtomicUsize> {
        self.pending
            .lock()
            .entry((segment, unit))
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone()
    }

    fn post(&self, cmd: Cmd) {
        self.queued.fetch_add(1, Ordering::AcqRel);
        self.cmds.send(cmd).expect("delivery engine alive");
    }
}

fn engine_loop(state: EngineState, cmds: crossbeam::channel::Receiver<Cmd>) {
    for cmd in cmds.iter() {
        match cmd {
            Cmd::Put {
                unit,
                segment,
                offset,
                data,
                handle,
                pending,
            } => {
                match state.segments.resolve(segment, unit, offset, data.len()) {
                    Ok(addr) => {
                        unsafe {
                            std::ptr::copy_nonoverlapping(
                                data.as_ptr(),
                                addr as *mut u8,
                                data.len(),
                            )
                        };
                        if let Some(handle) = handle {
                            handle.complete();
                        }
                    }
                    Err(err) => {
                        match handle {
                            Some(handle) => handle.fail(err),
                            None => state.record_error(segment, unit, &err),
                        }
                    }
                }
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            Cmd::Get {
                unit,
                segment,
                offset,
                dst,
                len,
                handle,
                pending,
            } => {
                match state.segments.resolve(segment, unit, offset, len) {
                    Ok(addr) => {
                        unsafe {
                            std::ptr::copy_nonoverlapping(addr as *const u8, dst as *mut u8, len)
                        };
                        if let Some(handle) = handle {
                            handle.complete();
                        }
                    }
                    Err(err) => {
                        match handle {
                            Some(handle) => handle.fail(err),
                            None => state.record_error(segment, unit, &err),
                        }
                    }
                }
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            Cmd::Cas {
                unit,
                segment,
                offset,
                old,
                new,
                reply,
                pending,
            } => {
                let result = state
                    .segments
                    .resolve(segment, unit, offset, std::mem::size_of::<u64>())
                    .map(|addr| {
                        let word = unsafe { &*(addr as *const std::sync::atomic::AtomicU64) };
                        match word.compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire) {
                            Ok(prev) => prev,
                            Err(prev) => prev,
                        }
                    });
                let _ = reply.send(result);
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            Cmd::Store {
                unit,
                segment,
                offset,
                val,
                pending,
            } => {
                match state
                    .segments
                    .resolve(segment, unit, offset, std::mem::size_of::<u64>())
                {
                    Ok(addr) => {
                        let word = unsafe { &*(addr as *const std::sync::atomic::AtomicU64) };
                        word.store(val, Ordering::Release);
                    }
                    Err(err) => state.record_error(segment, unit, &err),
                }
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            Cmd::Shutdown => {
                state.queued.fetch_sub(1, Ordering::AcqRel);
                break;
            }
        }
        state.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub(crate) struct ThreadedFabric {
    inner: Arc<ThreadedFabricInner>,
    my_unit: usize,
    active: AtomicBool,
    epochs: Mutex<HashMap<u64, u64>>,
    next_segment: AtomicUsize,
}

impl ThreadedFabric {
    /// Create the shared state for `num_units` units and hand out one fabric
    /// instance per unit thread.
    pub(crate) fn launch(num_units: usize) -> Vec<ThreadedFabric> {
        assert!(num_units > 0, "a fabric needs at least one unit");
        let (tx, rx) = unbounded();
        let segments = Arc::new(SegmentTable::new());
        let queued = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(Mutex::new(HashMap::new()));
        let state = EngineState {
            segments: segments.clone(),
            queued: queued.clone(),
            errors: errors.clone(),
        };
        let inner = Arc::new(ThreadedFabricInner {
            segments,
            num_units,
            cmds: tx,
            engine: Mutex::new(None),
            queued,
            pending: Mutex::new(HashMap::new()),
            errors,
            rendezvous: Rendezvous::new(),
        });
        let engine = std::thread::Builder::new()
            .name("tessera-delivery".to_owned())
            .spawn(move || engine_loop(state, rx))
            .expect("spawn delivery engine");
        *inner.engine.lock() = Some(engine);
        (0..num_units)
            .map(|unit| ThreadedFabric {
                inner: inner.clone(),
                my_unit: unit,
                active: AtomicBool::new(true),
                epochs: Mutex::new(HashMap::new()),
                next_segment: AtomicUsize::new(0),
            })
            .collect()
    }

    fn collective_key(&self, units: &[usize]) -> (u64, u64) {
        let mut hasher = DefaultHasher::new();
        units.hash(&mut hasher);
        let units_hash = hasher.finish();
        let mut epochs = self.epochs.lock();
        let epoch = epochs.entry(units_hash).or_insert(0);
        *epoch += 1;
        (units_hash, *epoch)
    }

    fn check_participant(&self, units: &[usize]) -> TesseraResult<()> {
        if !units.contains(&self.my_unit) {
            return Err(TesseraError::invalid(format!(
                "unit {} is not part of the collective over {:?}",
                self.my_unit, units
            )));
        }
        Ok(())
    }

    fn drain_engine(&self) {
        spin_wait(
            || self.inner.queued.load(Ordering::Acquire) == 0,
            "delivery engine drain",
        );
    }
}

impl FabricInfo for ThreadedFabric {
    fn my_unit(&self) -> usize {
        self.my_unit
    }
    fn num_units(&self) -> usize {
        self.inner.num_units
    }
    fn backend(&self) -> Backend {
        Backend::Threaded
    }
    fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
    fn shutdown(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl FabricCollective for ThreadedFabric {
    fn barrier(&self) {
        let units: Vec<usize> = (0..self.inner.num_units).collect();
        // phase 1: everyone has posted their pre-barrier operations
        let key = self.collective_key(&units);
        self.inner
            .rendezvous
            .exchange(key, &units, self.my_unit, Vec::new());
        // fence: the engine has executed everything posted so far
        self.drain_engine();
        // phase 2: everyone has observed the fence
        let key = self.collective_key(&units);
        self.inner
            .rendezvous
            .exchange(key, &units, self.my_unit, Vec::new());
    }

    fn exchange(&self, units: &[usize], bytes: &[u8]) -> TesseraResult<Vec<Vec<u8>>> {
        self.check_participant(units)?;
        let key = self.collective_key(units);
        Ok(self
            .inner
            .rendezvous
            .exchange(key, units, self.my_unit, bytes.to_vec()))
    }

    fn broadcast(
        &self,
        units: &[usize],
        root: usize,
        bytes: Option<&[u8]>,
    ) -> TesseraResult<Vec<u8>> {
        if (root == self.my_unit) != bytes.is_some() {
            return Err(TesseraError::invalid(
                "broadcast payload must be supplied by the root and only the root",
            ));
        }
        let root_slot = units
            .iter()
            .position(|u| *u == root)
            .ok_or_else(|| TesseraError::invalid("broadcast root outside the unit list"))?;
        let all = self.exchange(units, bytes.unwrap_or(&[]))?;
        Ok(all[root_slot].clone())
    }

    fn gather(
        &self,
        units: &[usize],
        root: usize,
        bytes: &[u8],
    ) -> TesseraResult<Option<Vec<Vec<u8>>>> {
        let all = self.exchange(units, bytes)?;
        if root == self.my_unit {
            Ok(Some(all))
        } else {
            Ok(None)
        }
    }

    fn scatter(
        &self,
        units: &[usize],
        root: usize,
        parts: Option<Vec<Vec<u8>>>,
    ) -> TesseraResult<Vec<u8>> {
        if (root == self.my_unit) != parts.is_some() {
            return Err(TesseraError::invalid(
                "scatter parts must be supplied by the root and only the root",
            ));
        }
        if let Some(parts) = &parts {
            if parts.len() != units.len() {
                return Err(TesseraError::invalid(format!(
                    "scatter expects one part per unit ({} != {})",
                    parts.len(),
                    units.len()
                )));
            }
        }
        let root_slot = units
            .iter()
            .position(|u| *u == root)
            .ok_or_else(|| TesseraError::invalid("scatter root outside the unit list"))?;
        let my_slot = units
            .iter()
            .position(|u| *u == self.my_unit)
            .expect("checked by exchange");
        let encoded = match parts {
            Some(parts) => crate::serialize(&parts, false)
                .map_err(|e| TesseraError::transport(e.to_string()))?,
            None => Vec::new(),
        };
        let all = self.exchange(units, &encoded)?;
        let parts: Vec<Vec<u8>> = crate::deserialize(&all[root_slot], false)
            .map_err(|e| TesseraError::transport(e.to_string()))?;
        Ok(parts[my_slot].clone())
    }
}

impl FabricRdma for ThreadedFabric {
    fn next_segment_hint(&self) -> usize {
        self.next_segment.load(Ordering::Acquire)
    }

    fn advance_segment_hint(&self, next: usize) {
        self.next_segment.fetch_max(next, Ordering::AcqRel);
    }

    fn attach(&self, segment: SegmentId, addr: usize, nbytes: usize) -> TesseraResult<()> {
        self.inner.segments.attach(segment, self.my_unit, addr, nbytes)
    }

    fn detach(&self, segment: SegmentId) -> TesseraResult<()> {
        self.inner.segments.detach(segment, self.my_unit)
    }

    fn local_base(&self, segment: SegmentId) -> Option<(usize, usize)> {
        self.inner
            .segments
            .lookup(segment, self.my_unit)
            .map(|e| (e.addr, e.nbytes))
    }

    fn put(&self, unit: usize, segment: SegmentId, offset: usize, src: &[u8]) -> TesseraResult<()> {
        let pending = self.inner.pending_counter(segment, unit);
        pending.fetch_add(1, Ordering::AcqRel);
        self.inner.post(Cmd::Put {
            unit,
            segment,
            offset,
            data: src.to_vec(),
            handle: None,
            pending,
        });
        Ok(())
    }

    fn get(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        dst: &mut [u8],
    ) -> TesseraResult<()> {
        let pending = self.inner.pending_counter(segment, unit);
        pending.fetch_add(1, Ordering::AcqRel);
        self.inner.post(Cmd::Get {
            unit,
            segment,
            offset,
            dst: dst.as_mut_ptr() as usize,
            len: dst.len(),
            handle: None,
            pending,
        });
        Ok(())
    }

    fn put_handle(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        src: &[u8],
    ) -> TesseraResult<RdmaHandle> {
        let inner = HandleInner::outstanding();
        // src is captured below, so the origin buffer is reusable immediately
        inner.local_done.store(true, Ordering::Release);
        let pending = self.inner.pending_counter(segment, unit);
        pending.fetch_add(1, Ordering::AcqRel);
        self.inner.post(Cmd::Put {
            unit,
            segment,
            offset,
            data: src.to_vec(),
            handle: Some(inner.clone()),
            pending,
        });
        Ok(RdmaHandle { inner })
    }

    fn get_handle(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        dst: &mut [u8],
    ) -> TesseraResult<RdmaHandle> {
        let inner = HandleInner::outstanding();
        let pending = self.inner.pending_counter(segment, unit);
        pending.fetch_add(1, Ordering::AcqRel);
        self.inner.post(Cmd::Get {
            unit,
            segment,
            offset,
            dst: dst.as_mut_ptr() as usize,
            len: dst.len(),
            handle: Some(inner.clone()),
            pending,
        });
        Ok(RdmaHandle { inner })
    }

    fn flush(&self, unit: usize, segment: SegmentId) -> TesseraResult<()> {
        let pending = self.inner.pending_counter(segment, unit);
        spin_wait(
            || pending.load(Ordering::Acquire) == 0,
            "flush of outstanding rdma operations",
        );
        if let Some(msg) = self.inner.errors.lock().remove(&(segment, unit)) {
            return Err(TesseraError::transport(msg));
        }
        Ok(())
    }

    fn flush_all(&self, segment: SegmentId) -> TesseraResult<()> {
        for unit in 0..self.inner.num_units {
            self.flush(unit, segment)?;
        }
        Ok(())
    }

    fn atomic_cas_u64(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        old: u64,
        new: u64,
    ) -> TesseraResult<u64> {
        let (reply_tx, reply_rx) = crossbeam::channel::bounded(1);
        let pending = self.inner.pending_counter(segment, unit);
        pending.fetch_add(1, Ordering::AcqRel);
        self.inner.post(Cmd::Cas {
            unit,
            segment,
            offset,
            old,
            new,
            reply: reply_tx,
            pending,
        });
        reply_rx
            .recv()
            .map_err(|_| TesseraError::transport("delivery engine gone"))?
    }

    fn atomic_store_u64(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        val: u64,
    ) -> TesseraResult<()> {
        let pending = self.inner.pending_counter(segment, unit);
        pending.fetch_add(1, Ordering::AcqRel);
        self.inner.post(Cmd::Store {
            unit,
            segment,
            offset,
            val,
            pending,
        });
        self.flush(unit, segment)
    }
}

impl Drop for ThreadedFabricInner {
    fn drop(&mut self) {
        self.queued.fetch_add(1, Ordering::AcqRel);
        let _ = self.cmds.send(Cmd::Shutdown);
        if let Some(engine) = self.engine.lock().take() {
            let _ = engine.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::segment::OwnedSegment;

    fn run_units<F>(num_units: usize, f: F)
    where
        F: Fn(ThreadedFabric) + Send + Sync + Copy,
    {
        let fabrics = ThreadedFabric::launch(num_units);
        std::thread::scope(|scope| {
            for fabric in fabrics {
                scope.spawn(move || f(fabric));
            }
        });
    }

    #[test]
    fn exchange_orders_by_unit() {
        run_units(3, |fabric| {
            let me = fabric.my_unit();
            let all = fabric
                .exchange(&[0, 1, 2], &[me as u8; 2])
                .unwrap();
            assert_eq!(all, vec![vec![0, 0], vec![1, 1], vec![2, 2]]);
        });
    }

    #[test]
    fn broadcast_from_root() {
        run_units(4, |fabric| {
            let me = fabric.my_unit();
            let payload = if me == 2 { Some(&[9u8, 9][..]) } else { None };
            let got = fabric.broadcast(&[0, 1, 2, 3], 2, payload).unwrap();
            assert_eq!(got, vec![9, 9]);
        });
    }

    #[test]
    fn put_is_visible_after_barrier() {
        run_units(2, |fabric| {
            let me = fabric.my_unit();
            let seg = OwnedSegment::zeroed(8, 8);
            fabric.attach(1, seg.addr(), 8).unwrap();
            fabric.barrier();
            // each unit writes its id into its neighbor's word
            let peer = 1 - me;
            fabric
                .put(peer, 1, 0, &(me as u64).to_le_bytes())
                .unwrap();
            fabric.flush(peer, 1).unwrap();
            fabric.barrier();
            let local = unsafe { *(seg.addr() as *const u64) };
            assert_eq!(local, peer as u64);
            fabric.barrier();
            fabric.detach(1).unwrap();
        });
    }

    #[test]
    fn get_handle_completes() {
        run_units(2, |fabric| {
            let me = fabric.my_unit();
            let seg = OwnedSegment::zeroed(8, 8);
            unsafe { *(seg.as_ptr::<u64>()) = 40 + me as u64 };
            fabric.attach(7, seg.addr(), 8).unwrap();
            fabric.barrier();
            let peer = 1 - me;
            let mut out = [0u8; 8];
            let handle = fabric.get_handle(peer, 7, 0, &mut out).unwrap();
            handle.wait().unwrap();
            assert_eq!(u64::from_le_bytes(out), 40 + peer as u64);
            fabric.barrier();
            fabric.detach(7).unwrap();
        });
    }

    #[test]
    fn cas_serializes_contenders() {
        run_units(4, |fabric| {
            let me = fabric.my_unit();
            let seg = OwnedSegment::zeroed(8, 8);
            fabric.attach(3, seg.addr(), 8).unwrap();
            fabric.barrier();
            // every unit tries to claim the word on unit 0; exactly one wins
            let won = fabric.atomic_cas_u64(0, 3, 0, 0, me as u64 + 1).unwrap() == 0;
            let winners = fabric
                .exchange(&[0, 1, 2, 3], &[won as u8])
                .unwrap()
                .iter()
                .filter(|v| v[0] == 1)
                .count();
            assert_eq!(winners, 1);
            fabric.barrier();
            fabric.detach(3).unwrap();
        });
    }
}
