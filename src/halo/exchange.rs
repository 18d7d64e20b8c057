//! The halo exchange: asynchronous one-sided fetches of neighbor boundary
//! data into the local halo buffer.
//!
//! Sources are resolved through the distribution pattern: each region is
//! decomposed into maximal runs that are contiguous in one owner's local
//! memory (a run never crosses a block boundary along the fastest
//! dimension), and one `get` is posted per run. Custom regions are filled
//! by the user callback without touching the transport.
//!
//! The producer/consumer fence is the caller's responsibility: a team
//! barrier between writing tiles and calling
//! [`update_async`][HaloExchange::update_async] is the usual choice.

use crate::error::{TesseraError, TesseraResult};
use crate::fabric::RdmaHandle;
use crate::halo::block::HaloBlock;
use crate::halo::memory::HaloMemory;
use crate::memregion::symmetric::SymmetricMemoryRegion;
use crate::memregion::Dist;
use crate::pattern::{MemoryOrder, Pattern, ViewSpec};

/// Driver of the halo exchange for one halo block backed by a symmetric
/// region laid out by `P`.
pub struct HaloExchange<'a, T: Dist, P: Pattern<N>, const N: usize> {
    mem: &'a SymmetricMemoryRegion<T>,
    pattern: &'a P,
    block: &'a HaloBlock<N>,
    halo: HaloMemory<T, N>,
    custom_fill: Option<Box<dyn Fn([isize; N]) -> T + Send + Sync + 'a>>,
    handles: Vec<RdmaHandle>,
    in_flight: bool,
}

/// Dimensions slowest to fastest under `order`.
fn dim_order<const N: usize>(order: MemoryOrder) -> [usize; N] {
    let mut dims = [0; N];
    for (i, d) in (0..N).enumerate() {
        dims[i] = match order {
            MemoryOrder::RowMajor => d,
            MemoryOrder::ColMajor => N - 1 - d,
        };
    }
    dims
}

/// View-relative coordinates of row `row` (all dims but the fastest).
fn row_coords<const N: usize>(view: &ViewSpec<N>, order: MemoryOrder, row: usize) -> [usize; N] {
    let dims = dim_order::<N>(order);
    let mut coords = [0; N];
    let mut rest = row;
    // skip the fastest dimension (last entry)
    for i in (0..N.saturating_sub(1)).rev() {
        let d = dims[i];
        coords[d] = rest % view.extent[d];
        rest /= view.extent[d];
    }
    coords
}

impl<'a, T: Dist, P: Pattern<N>, const N: usize> HaloExchange<'a, T, P, N> {
    pub fn new(
        mem: &'a SymmetricMemoryRegion<T>,
        pattern: &'a P,
        block: &'a HaloBlock<N>,
    ) -> TesseraResult<HaloExchange<'a, T, P, N>> {
        if pattern.extents() != block.global_extents() {
            return Err(TesseraError::invalid(format!(
                "pattern extents {:?} do not match the halo block's global extents {:?}",
                pattern.extents(),
                block.global_extents()
            )));
        }
        if pattern.team_size() != mem.num_units() {
            return Err(TesseraError::invalid(format!(
                "pattern spans {} units but the region spans {}",
                pattern.team_size(),
                mem.num_units()
            )));
        }
        for unit in 0..pattern.team_size() {
            if pattern.local_size_of(unit)? > mem.len() {
                return Err(TesseraError::invalid(format!(
                    "unit {} owns {} elements but the region holds {} per unit",
                    unit,
                    pattern.local_size_of(unit)?,
                    mem.len()
                )));
            }
        }
        let halo = HaloMemory::new(block, pattern.order());
        Ok(HaloExchange {
            mem,
            pattern,
            block,
            halo,
            custom_fill: None,
            handles: Vec::new(),
            in_flight: false,
        })
    }

    /// Install the fill callback for CUSTOM regions. The callback receives
    /// the absent global coordinate, which may lie outside the domain.
    pub fn with_custom_fill(
        mut self,
        fill: impl Fn([isize; N]) -> T + Send + Sync + 'a,
    ) -> HaloExchange<'a, T, P, N> {
        self.custom_fill = Some(Box::new(fill));
        self
    }

    /// The halo buffer.
    pub fn halo(&self) -> &HaloMemory<T, N> {
        &self.halo
    }

    pub fn block(&self) -> &HaloBlock<N> {
        self.block
    }

    /// Post one-sided reads for every active halo region. Calling this
    /// again before [`wait`][Self::wait] is a programming error.
    pub fn update_async(&mut self) -> TesseraResult<()> {
        if self.in_flight {
            return Err(TesseraError::invalid(
                "halo exchange posted again before wait()",
            ));
        }
        let mem = self.mem;
        let pattern = self.pattern;
        let block = self.block;
        let order = self.halo.order();
        let fastest = order.fastest_dim::<N>();
        let blocksize = pattern.blocksize();

        for region in block.regions() {
            let view = *region.view();
            if view.size() == 0 {
                continue;
            }
            let rows = view.size() / view.extent[fastest];

            if region.is_custom() {
                let fill = self.custom_fill.as_ref().ok_or_else(|| {
                    TesseraError::invalid(format!(
                        "region {} needs a custom fill callback",
                        region.index()
                    ))
                })?;
                let slab = self
                    .halo
                    .region_slice_mut(region.index())
                    .expect("active region has a slab");
                let mut dst = 0;
                for row in 0..rows {
                    let rel = row_coords(&view, order, row);
                    for col in 0..view.extent[fastest] {
                        let mut coords = [0isize; N];
                        for d in 0..N {
                            coords[d] = view.offset[d] + rel[d] as isize;
                        }
                        coords[fastest] = view.offset[fastest] + col as isize;
                        slab[dst] = fill(coords);
                        dst += 1;
                    }
                }
                continue;
            }

            // remote regions must resolve within the domain
            for d in 0..N {
                if view.offset[d] < 0
                    || view.end(d) as usize > block.global_extents()[d]
                {
                    return Err(TesseraError::invalid(format!(
                        "halo region {} reaches outside the domain without a custom policy",
                        region.index()
                    )));
                }
            }

            let slab = self
                .halo
                .region_slice_mut(region.index())
                .expect("active region has a slab");
            let slab_ptr = slab.as_mut_ptr();
            let slab_len = slab.len();
            let mut dst = 0;
            for row in 0..rows {
                let rel = row_coords(&view, order, row);
                let mut base = [0usize; N];
                for d in 0..N {
                    base[d] = (view.offset[d] + rel[d] as isize) as usize;
                }
                let mut col = 0;
                while col < view.extent[fastest] {
                    let mut coords = base;
                    coords[fastest] = (view.offset[fastest] as usize) + col;
                    let li = pattern.local_index(coords)?;
                    // a run ends at the next block boundary along the
                    // fastest dimension, where local contiguity breaks
                    let to_block_end = blocksize[fastest] - coords[fastest] % blocksize[fastest];
                    let run = to_block_end.min(view.extent[fastest] - col);
                    debug_assert!(dst + run <= slab_len);
                    let dst_slice = unsafe {
                        std::slice::from_raw_parts_mut(slab_ptr.add(dst), run)
                    };
                    let handle = unsafe { mem.get_handle(li.unit, li.index, dst_slice)? };
                    self.handles.push(handle);
                    dst += run;
                    col += run;
                }
            }
            tracing::trace!(
                "posted {} reads for halo region {}",
                self.handles.len(),
                region.index()
            );
        }
        self.in_flight = true;
        Ok(())
    }

    /// Complete every outstanding read (local and remote completion on all
    /// touched segments).
    pub fn wait(&mut self) -> TesseraResult<()> {
        for handle in self.handles.drain(..) {
            handle.wait()?;
        }
        self.in_flight = false;
        Ok(())
    }

    /// Whether an exchange has been posted and not yet waited on.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Halo element at a tile-relative coordinate outside the tile.
    pub fn halo_value(&self, coords: [isize; N]) -> Option<T> {
        self.halo.value_at_tile(self.block, coords)
    }

    /// Halo or local element at a global coordinate (cyclic wrap applied).
    pub fn value_at_global(&self, coords: [isize; N]) -> Option<T> {
        self.halo.value_at_global(self.block, coords)
    }
}
