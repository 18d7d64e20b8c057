//! Bookkeeping for memory exported into the global window.

use crate::config;
use crate::error::{TesseraError, TesseraResult};
use crate::fabric::SegmentId;
use std::alloc::Layout;

use indexmap::IndexMap;
use parking_lot::RwLock;

/// One unit's slice of an attached segment.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SegmentEntry {
    pub(crate) addr: usize,
    pub(crate) nbytes: usize,
}

/// Ordered map of `(segment, unit)` to the exported local address range.
///
/// Shared between all units of an in-process fabric; a distributed provider
/// would hold only the local column and the remote registration keys.
#[derive(Debug)]
pub(crate) struct SegmentTable {
    entries: RwLock<IndexMap<(SegmentId, usize), SegmentEntry>>,
}

impl SegmentTable {
    pub(crate) fn new() -> SegmentTable {
        SegmentTable {
            entries: RwLock::new(IndexMap::new()),
        }
    }

    pub(crate) fn attach(
        &self,
        segment: SegmentId,
        unit: usize,
        addr: usize,
        nbytes: usize,
    ) -> TesseraResult<()> {
        let mut entries = self.entries.write();
        if entries.len() >= config().max_segments {
            return Err(TesseraError::transport(format!(
                "segment table exhausted ({} entries)",
                entries.len()
            )));
        }
        if entries.insert((segment, unit), SegmentEntry { addr, nbytes }).is_some() {
            return Err(TesseraError::invalid(format!(
                "segment {} already attached on unit {}",
                segment, unit
            )));
        }
        tracing::trace!("attached segment {} unit {} ({} bytes)", segment, unit, nbytes);
        Ok(())
    }

    pub(crate) fn detach(&self, segment: SegmentId, unit: usize) -> TesseraResult<()> {
        match self.entries.write().shift_remove(&(segment, unit)) {
            Some(_) => {
                tracing::trace!("detached segment {} unit {}", segment, unit);
                Ok(())
            }
            None => Err(TesseraError::NotFound(format!(
                "segment {} on unit {}",
                segment, unit
            ))),
        }
    }

    /// Resolve `(segment, unit, offset..offset+len)` to a raw address,
    /// bounds-checked against the exported range.
    pub(crate) fn resolve(
        &self,
        segment: SegmentId,
        unit: usize,
        offset: usize,
        len: usize,
    ) -> TesseraResult<usize> {
        let entries = self.entries.read();
        let entry = entries.get(&(segment, unit)).ok_or_else(|| {
            TesseraError::NotFound(format!("segment {} on unit {}", segment, unit))
        })?;
        if offset + len > entry.nbytes {
            return Err(TesseraError::out_of_range(format!(
                "range {}..{} exceeds segment {} of {} bytes on unit {}",
                offset,
                offset + len,
                segment,
                entry.nbytes,
                unit
            )));
        }
        Ok(entry.addr + offset)
    }

    pub(crate) fn lookup(&self, segment: SegmentId, unit: usize) -> Option<SegmentEntry> {
        self.entries.read().get(&(segment, unit)).copied()
    }
}

/// An owned, zero-initialized, properly aligned heap allocation backing a
/// locally exported segment.
///
/// Addresses stay stable for the lifetime of the value, which is what makes
/// it legal to hand them to the segment table.
#[derive(Debug)]
pub(crate) struct OwnedSegment {
    ptr: *mut u8,
    layout: Layout,
}

// the raw pointer is only dereferenced through addresses registered in the
// segment table, which serializes remote access through the fabric
unsafe impl Send for OwnedSegment {}
unsafe impl Sync for OwnedSegment {}

impl OwnedSegment {
    pub(crate) fn zeroed(nbytes: usize, align: usize) -> OwnedSegment {
        let layout = Layout::from_size_align(nbytes, align.max(1))
            .expect("segment layout");
        let ptr = if nbytes == 0 {
            align.max(1) as *mut u8
        } else {
            let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
            if ptr.is_null() {
                std::alloc::handle_alloc_error(layout);
            }
            ptr
        };
        OwnedSegment { ptr, layout }
    }

    pub(crate) fn addr(&self) -> usize {
        self.ptr as usize
    }

    pub(crate) fn nbytes(&self) -> usize {
        self.layout.size()
    }

    pub(crate) fn as_ptr<T>(&self) -> *mut T {
        self.ptr as *mut T
    }
}

impl Drop for OwnedSegment {
    fn drop(&mut self) {
        if self.layout.size() > 0 {
            unsafe { std::alloc::dealloc(self.ptr, self.layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_resolve_detach() {
        let table = SegmentTable::new();
        let seg = OwnedSegment::zeroed(64, 8);
        table.attach(1, 0, seg.addr(), 64).unwrap();
        assert_eq!(table.resolve(1, 0, 8, 8).unwrap(), seg.addr() + 8);
        assert!(table.resolve(1, 0, 60, 8).is_err());
        assert!(table.resolve(2, 0, 0, 1).is_err());
        assert!(table.attach(1, 0, seg.addr(), 64).is_err());
        table.detach(1, 0).unwrap();
        assert!(table.detach(1, 0).is_err());
    }

    #[test]
    fn zero_sized_segment() {
        let seg = OwnedSegment::zeroed(0, 8);
        assert_eq!(seg.nbytes(), 0);
        let table = SegmentTable::new();
        table.attach(3, 1, seg.addr(), 0).unwrap();
        assert!(table.resolve(3, 1, 0, 1).is_err());
        assert_eq!(table.resolve(3, 1, 0, 0).unwrap(), seg.addr());
    }
}
