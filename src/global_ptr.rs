//! Global pointers: the 128-bit wire representation of a location in the
//! partitioned global address space.
//!
//! A pointer names a unit, a segment attached on that unit's team, and a
//! byte position inside the segment. The unit component is the id of the
//! owner *within the segment's team*; converting to a global unit id is the
//! team's job. With the [`RAW_ADDR`][GlobalPtr::FLAG_RAW_ADDR] flag set the
//! payload is a virtual address instead of a segment offset, which is how
//! externally attached memory is addressed.

use crate::error::{TesseraError, TesseraResult};
use crate::fabric::SegmentId;

const NULL_UNIT: u32 = u32::MAX; // the spec's unit = -1

/// A 128-bit pointer into the global address space.
///
/// Arithmetic touches only the payload and wraps in unsigned 64-bit; staying
/// within the segment is the caller's responsibility. Equality and hashing
/// are field-wise, `flags` included.
#[repr(C)]
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalPtr {
    unit: u32,
    segment: SegmentId,
    flags: u16,
    offset: u64,
}

impl GlobalPtr {
    /// Payload is a raw virtual address, not a segment offset.
    pub const FLAG_RAW_ADDR: u16 = 0x1;

    /// Pointer to byte `offset` of `segment` on team unit `unit`.
    pub fn new(unit: usize, segment: SegmentId, offset: u64) -> GlobalPtr {
        GlobalPtr {
            unit: unit as u32,
            segment,
            flags: 0,
            offset,
        }
    }

    /// Pointer carrying a raw virtual address on `unit`.
    pub fn raw(unit: usize, addr: u64) -> GlobalPtr {
        GlobalPtr {
            unit: unit as u32,
            segment: 0,
            flags: Self::FLAG_RAW_ADDR,
            offset: addr,
        }
    }

    /// The null pointer: unit −1, everything else zero.
    pub fn null() -> GlobalPtr {
        GlobalPtr {
            unit: NULL_UNIT,
            segment: 0,
            flags: 0,
            offset: 0,
        }
    }

    pub fn is_null(&self) -> bool {
        self.unit == NULL_UNIT && self.segment == 0 && self.flags == 0 && self.offset == 0
    }

    /// Owner unit, in the id space of the segment's team.
    pub fn unit(&self) -> usize {
        self.unit as usize
    }

    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Byte offset within the segment (or raw address when flagged).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_raw_addr(&self) -> bool {
        self.flags & Self::FLAG_RAW_ADDR != 0
    }

    /// Advance the payload by `delta` bytes, wrapping in unsigned 64-bit.
    pub fn inc(&mut self, delta: i64) {
        self.offset = self.offset.wrapping_add(delta as u64);
    }

    /// A copy advanced by `delta` bytes.
    pub fn offset_by(&self, delta: i64) -> GlobalPtr {
        let mut g = *self;
        g.inc(delta);
        g
    }

    /// Re-target the pointer at another unit of the same team, preserving
    /// segment and payload. This is how a symmetric segment is traversed
    /// across units.
    pub fn set_unit(&mut self, unit: usize) {
        self.unit = unit as u32;
    }

    /// Same location on `unit` instead of the current owner.
    pub fn with_unit(&self, unit: usize) -> GlobalPtr {
        let mut g = *self;
        g.set_unit(unit);
        g
    }

    /// Resolve to a local virtual address, given the caller's id in the
    /// segment's team and a resolver for the local segment base.
    ///
    /// Fails with `NotLocal` when the pointer names any other unit.
    pub(crate) fn local_addr_in(
        &self,
        my_team_unit: usize,
        local_base: impl FnOnce(SegmentId) -> Option<(usize, usize)>,
    ) -> TesseraResult<usize> {
        if self.unit as usize != my_team_unit {
            return Err(TesseraError::NotLocal { unit: self.unit });
        }
        if self.is_raw_addr() {
            return Ok(self.offset as usize);
        }
        let (base, nbytes) = local_base(self.segment).ok_or_else(|| {
            TesseraError::NotFound(format!("segment {} in global window", self.segment))
        })?;
        if self.offset as usize > nbytes {
            return Err(TesseraError::out_of_range(format!(
                "offset {} beyond segment {} of {} bytes",
                self.offset, self.segment, nbytes
            )));
        }
        Ok(base + self.offset as usize)
    }
}

impl std::ops::AddAssign<u64> for GlobalPtr {
    fn add_assign(&mut self, bytes: u64) {
        self.offset = self.offset.wrapping_add(bytes);
    }
}

impl std::ops::SubAssign<u64> for GlobalPtr {
    fn sub_assign(&mut self, bytes: u64) {
        self.offset = self.offset.wrapping_sub(bytes);
    }
}

impl std::fmt::Display for GlobalPtr {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "GlobalPtr(null)")
        } else {
            write!(
                f,
                "GlobalPtr(unit: {}, segment: {}, flags: {:#x}, offset: {:#x})",
                self.unit, self.segment, self.flags, self.offset
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_fieldwise() {
        let null = GlobalPtr::null();
        assert!(null.is_null());
        // a nulled unit with a nonzero payload is not the null pointer
        let mut other = GlobalPtr::null();
        other.inc(1);
        assert!(!other.is_null());
        assert_ne!(null, other);
    }

    #[test]
    fn arithmetic_wraps() {
        let mut g = GlobalPtr::new(1, 3, u64::MAX);
        g.inc(1);
        assert_eq!(g.offset(), 0);
        g.inc(-1);
        assert_eq!(g.offset(), u64::MAX);
        g += 2;
        assert_eq!(g.offset(), 1);
        g -= 2;
        assert_eq!(g.offset(), u64::MAX);
    }

    #[test]
    fn set_unit_preserves_rest() {
        let g = GlobalPtr::new(0, 7, 1024);
        let h = g.with_unit(5);
        assert_eq!(h.unit(), 5);
        assert_eq!(h.segment(), 7);
        assert_eq!(h.offset(), 1024);
        assert_ne!(g, h);
    }

    #[test]
    fn flags_participate_in_equality() {
        let plain = GlobalPtr::new(2, 1, 64);
        let raw = GlobalPtr::raw(2, 64);
        assert_ne!(plain, raw);
        assert!(raw.is_raw_addr());
    }

    #[test]
    fn local_addr_checks_owner() {
        let g = GlobalPtr::new(2, 1, 16);
        let err = g.local_addr_in(0, |_| Some((0x1000, 64))).unwrap_err();
        assert_eq!(err, TesseraError::NotLocal { unit: 2 });
        let addr = g.local_addr_in(2, |_| Some((0x1000, 64))).unwrap();
        assert_eq!(addr, 0x1010);
        assert!(g.local_addr_in(2, |_| Some((0x1000, 8))).is_err());
    }

    #[test]
    fn raw_addr_resolves_without_segment() {
        let g = GlobalPtr::raw(1, 0xdead0);
        assert_eq!(g.local_addr_in(1, |_| None).unwrap(), 0xdead0);
    }

    #[test]
    fn wire_size_is_128_bits() {
        assert_eq!(std::mem::size_of::<GlobalPtr>(), 16);
    }
}
