//! Fabrics are the transport providers of the substrate.
//!
//! A fabric gives the runtime a one-sided view of every unit's exported
//! memory: segments are attached to a global window under small integer ids,
//! and `put`/`get` move bytes against a `(unit, segment, offset)` triple
//! without involving the remote side. Collective primitives (barrier,
//! broadcast, allgather and friends) are the only two-sided operations.
//!
//! Two fabrics are built in: [`Local`](local::LocalFabric) for single unit
//! development and [`Threaded`](threaded::ThreadedFabric) which runs every
//! unit as a thread of one process, useful for emulating distributed
//! executions. Distributed providers (MPI one-sided, OFI) plug in behind the
//! same dispatch enum.

use crate::config;
use crate::error::{TesseraError, TesseraResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use enum_dispatch::enum_dispatch;
use parking_lot::Mutex;

pub(crate) mod segment;

pub(crate) mod local;
use local::LocalFabric;

pub(crate) mod threaded;
use threaded::ThreadedFabric;

/// Identifier of an attached segment, unique within the owning team.
pub type SegmentId = i16;

/// The list of available fabric backends, used to specify how data is
/// transfered between units.
#[derive(
    serde::Serialize, serde::Deserialize, Debug, PartialEq, Eq, Ord, PartialOrd, Hash, Clone, Copy,
)]
pub enum Backend {
    /// The Local backend -- a single unit, no transport
    Local,
    /// The Threaded backend -- multiple units inside one process, one thread
    /// per unit, transfers through shared process memory
    Threaded,
}

impl Default for Backend {
    fn default() -> Self {
        match config().backend.as_str() {
            "threaded" => Backend::Threaded,
            _ => Backend::Local,
        }
    }
}

#[enum_dispatch(FabricInfo, FabricCollective, FabricRdma)]
#[derive(Debug)]
pub(crate) enum Fabric {
    Local(LocalFabric),
    Threaded(ThreadedFabric),
}

#[enum_dispatch]
pub(crate) trait FabricInfo {
    fn my_unit(&self) -> usize;
    fn num_units(&self) -> usize;
    fn backend(&self) -> Backend;
    fn active(&self) -> bool;
    fn shutdown(&self);
}

/// Two-sided primitives, always scoped to an explicit ascending list of
/// global unit ids. Every listed unit must make the matching call.
#[enum_dispatch]
pub(crate) trait FabricCollective {
    /// Fence + rendezvous of all units of the fabric.
    fn barrier(&self);
    /// Allgather: every listed unit contributes `bytes`, every listed unit
    /// receives all contributions ordered as `units`.
    fn exchange(&self, units: &[usize], bytes: &[u8]) -> TesseraResult<Vec<Vec<u8>>>;
    /// Root contributes `Some(bytes)`; everyone receives the root's bytes.
    fn broadcast(&self, units: &[usize], root: usize, bytes: Option<&[u8]>)
        -> TesseraResult<Vec<u8>>;
    /// Everyone contributes; only the root receives the ordered list.
    fn gather(
        &self,
        units: &[usize],
        root: usize,
        bytes: &[u8],
    ) -> TesseraResult<Option<Vec<Vec<u8>>>>;
    /// Root supplies one part per listed unit; each unit receives its part.
    fn scatter(
        &self,
        units: &[usize],
        root: usize,
        parts: Option<Vec<Vec<u8>>>,
    ) -> TesseraResult<Vec<u8>>;
}

/// One-sided primitives. `put`/`get` may return before the transfer is
/// complete; completion is observed through the returned handle or through
/// `flush` on the targeted `(segment, unit)` pair. Operations against the
/// same pair complete in posting order, disjoint pairs are unordered.
#[enum_dispatch]
pub(crate) trait FabricRdma {
    /// The smallest segment id this unit has not used yet. Teams take the
    /// collective max of these hints when allocating a fresh id.
    fn next_segment_hint(&self) -> usize;
    /// Raise the hint after a collective allocation settled on an id.
    fn advance_segment_hint(&self, next: usize);
    /// Export `nbytes` of local memory at `addr` under `segment`.
    fn attach(&self, segment: SegmentId, addr: usize, nbytes: usize) -> TesseraResult<()>;
    /// Withdraw the local export of `segment`.
    fn detach(&self, segment: SegmentId) -> TesseraResult<()>;
    /// Base address and length of the calling unit's slice of `segment`.
    fn local_base(&self, segment: SegmentId) -> Option<(usize, usize)>;
    /// Buffered put: `src` is captured before return, remote completion at
    /// `flush`.
    fn put(&self, unit: usize, segment: SegmentId, offset: usize, src: &[u8]) -> TesseraResult<()>;
    /// Get into `dst`; the caller must not touch `dst` before `flush`.
    fn get(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        dst: &mut [u8],
    ) -> TesseraResult<()>;
    /// As `put`, returning a completion handle.
    fn put_handle(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        src: &[u8],
    ) -> TesseraResult<RdmaHandle>;
    /// As `get`, returning a completion handle; `dst` must stay untouched and
    /// alive until the handle reports local completion.
    fn get_handle(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        dst: &mut [u8],
    ) -> TesseraResult<RdmaHandle>;
    /// Complete all outstanding operations against `(segment, unit)`.
    fn flush(&self, unit: usize, segment: SegmentId) -> TesseraResult<()>;
    /// Complete all outstanding operations on `segment` to every unit.
    fn flush_all(&self, segment: SegmentId) -> TesseraResult<()>;
    /// Atomic compare-and-swap of a u64 word in the global window. Blocking.
    fn atomic_cas_u64(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        old: u64,
        new: u64,
    ) -> TesseraResult<u64>;
    /// Atomic store of a u64 word in the global window. Blocking.
    fn atomic_store_u64(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        val: u64,
    ) -> TesseraResult<()>;
}

pub(crate) fn create_fabric(backend: Backend) -> Fabric {
    match backend {
        Backend::Local => Fabric::Local(LocalFabric::new()),
        Backend::Threaded => panic!(
            "the threaded backend has no single-unit entry point, launch it via TesseraWorldBuilder::launch_threaded"
        ),
    }
}

/// Spin until `done` returns true, surfacing a potential-deadlock warning
/// after the configured timeout.
pub(crate) fn spin_wait<F: Fn() -> bool>(done: F, what: &str) {
    let mut start = Instant::now();
    while !done() {
        std::thread::yield_now();
        if start.elapsed().as_secs_f64() > config().deadlock_timeout {
            tracing::warn!(
                "potential deadlock: still waiting on {} after {}s (TESSERA_DEADLOCK_TIMEOUT)",
                what,
                config().deadlock_timeout
            );
            start = Instant::now();
        }
    }
}

#[derive(Debug)]
pub(crate) struct HandleInner {
    pub(crate) local_done: AtomicBool,
    pub(crate) remote_done: AtomicBool,
    pub(crate) error: Mutex<Option<TesseraError>>,
}

impl HandleInner {
    pub(crate) fn outstanding() -> Arc<HandleInner> {
        Arc::new(HandleInner {
            local_done: AtomicBool::new(false),
            remote_done: AtomicBool::new(false),
            error: Mutex::new(None),
        })
    }

    pub(crate) fn ready() -> Arc<HandleInner> {
        Arc::new(HandleInner {
            local_done: AtomicBool::new(true),
            remote_done: AtomicBool::new(true),
            error: Mutex::new(None),
        })
    }

    pub(crate) fn complete(&self) {
        self.local_done.store(true, Ordering::Release);
        self.remote_done.store(true, Ordering::Release);
    }

    pub(crate) fn fail(&self, err: TesseraError) {
        *self.error.lock() = Some(err);
        self.complete();
    }
}

/// Completion handle of a one-sided operation.
///
/// [`wait`][RdmaHandle::wait] guarantees local *and* remote completion,
/// [`wait_local`][RdmaHandle::wait_local] only that the local buffer may be
/// reused, and [`test_local`][RdmaHandle::test_local] polls without blocking.
#[derive(Debug, Clone)]
pub struct RdmaHandle {
    pub(crate) inner: Arc<HandleInner>,
}

impl RdmaHandle {
    /// Block until the operation is complete at the origin and the target.
    pub fn wait(self) -> TesseraResult<()> {
        spin_wait(
            || self.inner.remote_done.load(Ordering::Acquire),
            "rdma handle completion",
        );
        match self.inner.error.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Block until the local buffer of the operation may be reused. For a
    /// `put` this is immediate; for a `get` it coincides with completion.
    pub fn wait_local(&self) -> TesseraResult<()> {
        spin_wait(
            || self.inner.local_done.load(Ordering::Acquire),
            "rdma handle local completion",
        );
        match self.inner.error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Non-blocking poll for local completion.
    pub fn test_local(&self) -> bool {
        self.inner.local_done.load(Ordering::Acquire)
    }

    /// Non-blocking result query: `Err(Pending)` while the operation is
    /// outstanding.
    pub fn result(&self) -> TesseraResult<()> {
        if !self.inner.remote_done.load(Ordering::Acquire) {
            return Err(TesseraError::Pending);
        }
        match self.inner.error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Block until every handle in `handles` is complete.
    pub fn wait_all(handles: impl IntoIterator<Item = RdmaHandle>) -> TesseraResult<()> {
        for handle in handles {
            handle.wait()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_states() {
        let inner = HandleInner::outstanding();
        let handle = RdmaHandle {
            inner: inner.clone(),
        };
        assert!(!handle.test_local());
        assert_eq!(handle.result(), Err(TesseraError::Pending));
        inner.complete();
        assert!(handle.test_local());
        assert_eq!(handle.result(), Ok(()));
        assert_eq!(handle.wait(), Ok(()));
    }

    #[test]
    fn handle_error_surfaces_at_wait() {
        let inner = HandleInner::outstanding();
        let handle = RdmaHandle {
            inner: inner.clone(),
        };
        inner.fail(TesseraError::transport("link down"));
        assert!(handle.wait().is_err());
    }
}
