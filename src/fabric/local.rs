//! The single-unit fabric, intended for development and for running the
//! pattern/halo layers without any transport.
//!
//! Every operation is synchronous: transfers are memcpys against the local
//! segment table and collectives are identities.

use crate::error::{TesseraError, TesseraResult};
use crate::fabric::segment::SegmentTable;
use crate::fabric::{
    Backend, FabricCollective, FabricInfo, FabricRdma, HandleInner, RdmaHandle, SegmentId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub(crate) struct LocalFabric {
    segments: Arc<SegmentTable>,
    active: Arc<AtomicBool>,
    next_segment: Arc<std::sync::atomic::AtomicUsize>,
}

impl LocalFabric {
    pub(crate) fn new() -> LocalFabric {
        LocalFabric {
            segments: Arc::new(SegmentTable::new()),
            active: Arc::new(AtomicBool::new(true)),
            next_segment: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }
    }

    fn check_unit(&self, unit: usize) -> TesseraResult<()> {
        if unit != 0 {
            return Err(TesseraError::invalid(format!(
                "unit {} does not exist on the local fabric",
                unit
            )));
        }
        Ok(())
    }

    fn copy_in(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        src: &[u8],
    ) -> TesseraResult<()> {
        self.check_unit(unit)?;
        let addr = self.segments.resolve(segment, unit, offset, src.len())?;
        unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), addr as *mut u8, src.len()) };
        Ok(())
    }

    fn copy_out(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        dst: &mut [u8],
    ) -> TesseraResult<()> {
        self.check_unit(unit)?;
        let addr = self.segments.resolve(segment, unit, offset, dst.len())?;
        unsafe { std::ptr::copy_nonoverlapping(addr as *const u8, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }
}

impl FabricInfo for LocalFabric {
    fn my_unit(&self) -> usize {
        0
    }
    fn num_units(&self) -> usize {
        1
    }
    fn backend(&self) -> Backend {
        Backend::Local
    }
    fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
    fn shutdown(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl FabricCollective for LocalFabric {
    fn barrier(&self) {}

    fn exchange(&self, units: &[usize], bytes: &[u8]) -> TesseraResult<Vec<Vec<u8>>> {
        debug_assert_eq!(units, &[0]);
        Ok(vec![bytes.to_vec()])
    }

    fn broadcast(
        &self,
        _units: &[usize],
        root: usize,
        bytes: Option<&[u8]>,
    ) -> TesseraResult<Vec<u8>> {
        self.check_unit(root)?;
        match bytes {
            Some(bytes) => Ok(bytes.to_vec()),
            None => Err(TesseraError::invalid("broadcast root without payload")),
        }
    }

    fn gather(
        &self,
        _units: &[usize],
        root: usize,
        bytes: &[u8],
    ) -> TesseraResult<Option<Vec<Vec<u8>>>> {
        self.check_unit(root)?;
        Ok(Some(vec![bytes.to_vec()]))
    }

    fn scatter(
        &self,
        _units: &[usize],
        root: usize,
        parts: Option<Vec<Vec<u8>>>,
    ) -> TesseraResult<Vec<u8>> {
        self.check_unit(root)?;
        let mut parts = parts.ok_or_else(|| TesseraError::invalid("scatter root without parts"))?;
        if parts.len() != 1 {
            return Err(TesseraError::invalid(format!(
                "scatter expects one part per unit, got {}",
                parts.len()
            )));
        }
        Ok(parts.remove(0))
    }
}

impl FabricRdma for LocalFabric {
    fn next_segment_hint(&self) -> usize {
        self.next_segment.load(Ordering::Acquire)
    }

    fn advance_segment_hint(&self, next: usize) {
        self.next_segment.fetch_max(next, Ordering::AcqRel);
    }

    fn attach(&self, segment: SegmentId, addr: usize, nbytes: usize) -> TesseraResult<()> {
        self.segments.attach(segment, 0, addr, nbytes)
    }

    fn detach(&self, segment: SegmentId) -> TesseraResult<()> {
        self.segments.detach(segment, 0)
    }

    fn local_base(&self, segment: SegmentId) -> Option<(usize, usize)> {
        self.segments.lookup(segment, 0).map(|e| (e.addr, e.nbytes))
    }

    fn put(&self, unit: usize, segment: SegmentId, offset: usize, src: &[u8]) -> TesseraResult<()> {
        self.copy_in(unit, segment, offset, src)
    }

    fn get(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        dst: &mut [u8],
    ) -> TesseraResult<()> {
        self.copy_out(unit, segment, offset, dst)
    }

    fn put_handle(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        src: &[u8],
    ) -> TesseraResult<RdmaHandle> {
        self.copy_in(unit, segment, offset, src)?;
        Ok(RdmaHandle {
            inner: HandleInner::ready(),
        })
    }

    fn get_handle(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        dst: &mut [u8],
    ) -> TesseraResult<RdmaHandle> {
        self.copy_out(unit, segment, offset, dst)?;
        Ok(RdmaHandle {
            inner: HandleInner::ready(),
        })
    }

    fn flush(&self, unit: usize, _segment: SegmentId) -> TesseraResult<()> {
        self.check_unit(unit)
    }

    fn flush_all(&self, _segment: SegmentId) -> TesseraResult<()> {
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
        self.check_unit(unit)?;
        let addr = self
            .segments
            .resolve(segment, unit, offset, std::mem::size_of::<u64>())?;
        let word = unsafe { &*(addr as *const std::sync::atomic::AtomicU64) };
        match word.compare_exchange(old, new, Ordering::AcqRel, Ordering::Acquire) {
            Ok(prev) => Ok(prev),
            Err(prev) => Ok(prev),
        }
    }

    fn atomic_store_u64(
        &self,
        unit: usize,
        segment: SegmentId,
        offset: usize,
        val: u64,
    ) -> TesseraResult<()> {
        self.check_unit(unit)?;
        let addr = self
            .segments
            .resolve(segment, unit, offset, std::mem::size_of::<u64>())?;
        let word = unsafe { &*(addr as *const std::sync::atomic::AtomicU64) };
        word.store(val, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fabric::segment::OwnedSegment;

    #[test]
    fn put_get_roundtrip() {
        let fabric = LocalFabric::new();
        let seg = OwnedSegment::zeroed(32, 8);
        fabric.attach(1, seg.addr(), 32).unwrap();
        fabric.put(0, 1, 4, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        fabric.get(0, 1, 4, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        fabric.flush(0, 1).unwrap();
        fabric.detach(1).unwrap();
    }

    #[test]
    fn remote_unit_rejected() {
        let fabric = LocalFabric::new();
        let seg = OwnedSegment::zeroed(8, 8);
        fabric.attach(1, seg.addr(), 8).unwrap();
        assert!(fabric.put(1, 1, 0, &[0u8; 8]).is_err());
    }

    #[test]
    fn cas_on_local_word() {
        let fabric = LocalFabric::new();
        let seg = OwnedSegment::zeroed(8, 8);
        fabric.attach(2, seg.addr(), 8).unwrap();
        assert_eq!(fabric.atomic_cas_u64(0, 2, 0, 0, 7).unwrap(), 0);
        assert_eq!(fabric.atomic_cas_u64(0, 2, 0, 0, 9).unwrap(), 7);
        fabric.atomic_store_u64(0, 2, 0, 0).unwrap();
        assert_eq!(fabric.atomic_cas_u64(0, 2, 0, 0, 9).unwrap(), 0);
    }
}
