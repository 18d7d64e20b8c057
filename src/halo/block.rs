//! Decomposition of a local tile into inner, boundary and halo views.

use crate::error::{TesseraError, TesseraResult};
use crate::halo::region::{HaloRegion, RegionCoords, CENTER, POST, PRE};
use crate::halo::stencil::StencilSpec;
use crate::halo::BoundaryPolicy;
use crate::pattern::ViewSpec;

/// A unit's tile plus everything derived from a stencil and a boundary
/// policy: the active halo regions, the mirrored boundary regions, the
/// inner views, and the deduplicated boundary slabs.
///
/// All views are in global coordinates. The tile view normally comes from
/// `pattern.local_block(..)` or the local extents of a blocked pattern.
#[derive(Clone, Debug)]
pub struct HaloBlock<const N: usize> {
    view: ViewSpec<N>,
    global_extents: [usize; N],
    policies: [BoundaryPolicy; N],
    halo_pre: [usize; N],
    halo_post: [usize; N],
    regions: Vec<HaloRegion<N>>,
    view_inner: ViewSpec<N>,
    view_inner_with_boundaries: ViewSpec<N>,
    boundary_views: Vec<ViewSpec<N>>,
    stencil: StencilSpec<N>,
}

impl<const N: usize> HaloBlock<N> {
    pub fn new(
        view: ViewSpec<N>,
        global_extents: [usize; N],
        stencil: StencilSpec<N>,
        policies: [BoundaryPolicy; N],
    ) -> TesseraResult<HaloBlock<N>> {
        for d in 0..N {
            if view.offset[d] < 0 || view.end(d) as usize > global_extents[d] {
                return Err(TesseraError::invalid(format!(
                    "tile view {:?}/{:?} leaves the global extents {:?}",
                    view.offset, view.extent, global_extents
                )));
            }
            if view.extent[d] == 0 {
                return Err(TesseraError::invalid("empty tile view"));
            }
        }
        let mut halo_pre = [0; N];
        let mut halo_post = [0; N];
        for d in 0..N {
            halo_pre[d] = stencil.halo_pre(d);
            halo_post[d] = stencil.halo_post(d);
        }
        let touches_low = |d: usize| view.offset[d] == 0;
        let touches_high = |d: usize| view.end(d) as usize == global_extents[d];

        // accumulate per-region widths: every stencil point contributes to
        // its own region and, by zeroing nonzero components in turn, to
        // every axis-aligned region it passes through
        let mut widths = vec![0usize; 3usize.pow(N as u32)];
        for point in stencil.points() {
            let nonzero: Vec<usize> = (0..N).filter(|d| point.offset(*d) != 0).collect();
            // every nonempty subset of the nonzero dims kept, the rest zeroed
            for keep in 1..(1u32 << nonzero.len()) {
                let mut coords = [CENTER; N];
                let mut width = 0usize;
                for (bit, d) in nonzero.iter().enumerate() {
                    if keep & (1 << bit) != 0 {
                        coords[*d] = if point.offset(*d) < 0 { PRE } else { POST };
                        width = width.max(point.offset(*d).unsigned_abs());
                    }
                }
                let region = RegionCoords::new(coords);
                widths[region.index()] = widths[region.index()].max(width);
            }
        }

        let mut regions = Vec::new();
        for index in 0..widths.len() {
            if widths[index] == 0 {
                continue;
            }
            let coords = RegionCoords::<N>::from_index(index);
            if coords.is_center() {
                continue;
            }
            let mut global_boundary = [false; N];
            let mut suppressed = false;
            let mut custom = false;
            for d in coords.non_center_dims() {
                let crosses = match coords.coord(d) {
                    PRE => touches_low(d),
                    _ => touches_high(d),
                };
                global_boundary[d] = crosses;
                if crosses {
                    match policies[d] {
                        BoundaryPolicy::None => suppressed = true,
                        BoundaryPolicy::Custom => custom = true,
                        BoundaryPolicy::Cyclic => {}
                    }
                }
            }
            if suppressed {
                continue;
            }
            let mut halo_offset = [0isize; N];
            let mut halo_extent = [0usize; N];
            let mut bnd_offset = [0isize; N];
            let mut bnd_extent = [0usize; N];
            for d in 0..N {
                match coords.coord(d) {
                    CENTER => {
                        halo_offset[d] = view.offset[d];
                        halo_extent[d] = view.extent[d];
                        bnd_offset[d] = view.offset[d];
                        bnd_extent[d] = view.extent[d];
                    }
                    PRE => {
                        let w = halo_pre[d];
                        halo_offset[d] = if global_boundary[d] {
                            match policies[d] {
                                BoundaryPolicy::Cyclic => (global_extents[d] - w) as isize,
                                _ => view.offset[d] - w as isize,
                            }
                        } else {
                            view.offset[d] - w as isize
                        };
                        halo_extent[d] = w;
                        bnd_offset[d] = view.offset[d];
                        bnd_extent[d] = w.min(view.extent[d]);
                    }
                    _ => {
                        let w = halo_post[d];
                        halo_offset[d] = if global_boundary[d] {
                            match policies[d] {
                                BoundaryPolicy::Cyclic => 0,
                                _ => view.end(d),
                            }
                        } else {
                            view.end(d)
                        };
                        halo_extent[d] = w;
                        bnd_offset[d] = view.end(d) - w.min(view.extent[d]) as isize;
                        bnd_extent[d] = w.min(view.extent[d]);
                    }
                }
            }
            regions.push(HaloRegion {
                coords,
                width: widths[index],
                view: ViewSpec::new(halo_offset, halo_extent),
                boundary_view: ViewSpec::new(bnd_offset, bnd_extent),
                global_boundary,
                custom,
            });
        }

        // whether any active region pulls from the given side
        let side_active = |d: usize, side: u8| {
            regions
                .iter()
                .any(|r| r.coords.coord(d) == side)
        };

        let mut inner_offset = view.offset;
        let mut inner_extent = view.extent;
        for d in 0..N {
            let pre = halo_pre[d];
            let post = halo_post[d];
            if pre + post == 0 {
                continue;
            }
            inner_offset[d] += pre as isize;
            inner_extent[d] = inner_extent[d].saturating_sub(pre + post);
        }
        let view_inner = ViewSpec::new(inner_offset, inner_extent);

        let mut iwb_offset = view.offset;
        let mut iwb_extent = view.extent;
        for d in 0..N {
            if matches!(policies[d], BoundaryPolicy::None) {
                if touches_low(d) && halo_pre[d] > 0 {
                    iwb_offset[d] += halo_pre[d] as isize;
                    iwb_extent[d] = iwb_extent[d].saturating_sub(halo_pre[d]);
                }
                if touches_high(d) && halo_post[d] > 0 {
                    iwb_extent[d] = iwb_extent[d].saturating_sub(halo_post[d]);
                }
            }
        }
        let view_inner_with_boundaries = ViewSpec::new(iwb_offset, iwb_extent);

        // deduplicated boundary slabs, dimension by dimension: a slab spans
        // the full tile in later dimensions and only the uncovered interior
        // in earlier ones
        let slab_low = |d: usize| halo_pre[d] > 0 && side_active(d, PRE);
        let slab_high = |d: usize| halo_post[d] > 0 && side_active(d, POST);
        let mut boundary_views = Vec::new();
        for d in 0..N {
            for side in [PRE, POST] {
                let active = if side == PRE { slab_low(d) } else { slab_high(d) };
                if !active {
                    continue;
                }
                let mut offset = view.offset;
                let mut extent = view.extent;
                for i in 0..d {
                    let low = if slab_low(i) {
                        halo_pre[i].min(extent[i])
                    } else {
                        0
                    };
                    let high = if slab_high(i) {
                        halo_post[i].min(extent[i])
                    } else {
                        0
                    };
                    offset[i] += low as isize;
                    extent[i] = extent[i].saturating_sub(low + high);
                }
                if side == PRE {
                    extent[d] = halo_pre[d].min(extent[d]);
                } else {
                    let w = halo_post[d].min(extent[d]);
                    offset[d] = view.end(d) - w as isize;
                    extent[d] = w;
                }
                let slab = ViewSpec::new(offset, extent);
                if !slab.is_empty() {
                    boundary_views.push(slab);
                }
            }
        }

        Ok(HaloBlock {
            view,
            global_extents,
            policies,
            halo_pre,
            halo_post,
            regions,
            view_inner,
            view_inner_with_boundaries,
            boundary_views,
            stencil,
        })
    }

    /// The tile, in global coordinates.
    pub fn view(&self) -> &ViewSpec<N> {
        &self.view
    }

    pub fn global_extents(&self) -> [usize; N] {
        self.global_extents
    }

    pub fn policies(&self) -> [BoundaryPolicy; N] {
        self.policies
    }

    pub fn stencil(&self) -> &StencilSpec<N> {
        &self.stencil
    }

    /// Halo width on the low side per dimension.
    pub fn halo_pre(&self) -> [usize; N] {
        self.halo_pre
    }

    /// Halo width on the high side per dimension.
    pub fn halo_post(&self) -> [usize; N] {
        self.halo_post
    }

    /// The active halo regions, ascending by region index.
    pub fn regions(&self) -> &[HaloRegion<N>] {
        &self.regions
    }

    /// The active region with base-3 index `index`, if any.
    pub fn region(&self, index: usize) -> Option<&HaloRegion<N>> {
        self.regions.iter().find(|r| r.index() == index)
    }

    /// The tile shrunk by the halo widths: updatable without any halo data.
    pub fn view_inner(&self) -> &ViewSpec<N> {
        &self.view_inner
    }

    /// The tile minus only the sides suppressed by a NONE policy at a
    /// global edge: everything updatable from local data plus halos.
    pub fn view_inner_with_boundaries(&self) -> &ViewSpec<N> {
        &self.view_inner_with_boundaries
    }

    /// The deduplicated boundary slabs, in dimension order.
    pub fn boundary_views(&self) -> &[ViewSpec<N>] {
        &self.boundary_views
    }

    /// Total element count of all incoming halo regions.
    pub fn halo_size(&self) -> usize {
        self.regions.iter().map(|r| r.size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::halo::stencil::StencilSpec;

    fn nine_point() -> StencilSpec<2> {
        StencilSpec::from_offsets([
            [-1, -1],
            [-1, 0],
            [-1, 1],
            [0, -1],
            [0, 1],
            [1, -1],
            [1, 0],
            [1, 1],
        ])
        .unwrap()
    }

    fn cross() -> StencilSpec<2> {
        StencilSpec::from_offsets([[0, -1], [0, 1], [-1, 0], [1, 0]]).unwrap()
    }

    #[test]
    fn interior_nine_point_has_eight_regions() {
        let e = 6;
        let block = HaloBlock::new(
            ViewSpec::new([8, 8], [e, e]),
            [32, 32],
            nine_point(),
            [BoundaryPolicy::None; 2],
        )
        .unwrap();
        assert_eq!(block.regions().len(), 8);
        assert!(block.regions().iter().all(|r| r.width() == 1));
        // boundary slabs cover the one-element frame without duplication
        let covered: usize = block.boundary_views().iter().map(|v| v.size()).sum();
        assert_eq!(covered, 4 * e - 4);
    }

    #[test]
    fn diagonal_point_populates_faces() {
        // a single diagonal point reaches its corner and both faces
        let stencil = StencilSpec::from_offsets([[-1, -1]]).unwrap();
        let block = HaloBlock::new(
            ViewSpec::new([4, 4], [4, 4]),
            [16, 16],
            stencil,
            [BoundaryPolicy::None; 2],
        )
        .unwrap();
        let indices: Vec<usize> = block.regions().iter().map(|r| r.index()).collect();
        // (pre,pre) = 0, (pre,center) = 1, (center,pre) = 3
        assert_eq!(indices, vec![0, 1, 3]);
    }

    #[test]
    fn none_policy_suppresses_at_edge_only() {
        let stencil = cross();
        // tile at the global low edge of dimension 0
        let block = HaloBlock::new(
            ViewSpec::new([0, 4], [4, 4]),
            [16, 16],
            stencil.clone(),
            [BoundaryPolicy::None; 2],
        )
        .unwrap();
        // the up-region (pre in dim 0) is suppressed, the others remain
        assert!(block.region(RegionCoords::new([0, 1]).index()).is_none());
        assert!(block.region(RegionCoords::new([2, 1]).index()).is_some());
        assert!(block.region(RegionCoords::new([1, 0]).index()).is_some());
        // an interior tile keeps all four
        let interior = HaloBlock::new(
            ViewSpec::new([4, 4], [4, 4]),
            [16, 16],
            stencil,
            [BoundaryPolicy::None; 2],
        )
        .unwrap();
        assert_eq!(interior.regions().len(), 4);
    }

    #[test]
    fn cyclic_remaps_across_the_domain() {
        let block = HaloBlock::new(
            ViewSpec::new([0, 0], [4, 4]),
            [8, 8],
            cross(),
            [BoundaryPolicy::Cyclic; 2],
        )
        .unwrap();
        let up = block.region(RegionCoords::new([0, 1]).index()).unwrap();
        // the up halo of the top tile comes from the bottom of the domain
        assert_eq!(up.view().offset, [7, 0]);
        assert_eq!(up.view().extent, [1, 4]);
        assert!(up.is_global_boundary(0));
        let left = block.region(RegionCoords::new([1, 0]).index()).unwrap();
        assert_eq!(left.view().offset, [0, 7]);
    }

    #[test]
    fn custom_region_keeps_absent_coordinates() {
        let block = HaloBlock::new(
            ViewSpec::new([0, 4], [4, 4]),
            [16, 16],
            cross(),
            [BoundaryPolicy::Custom, BoundaryPolicy::None],
        )
        .unwrap();
        let up = block.region(RegionCoords::new([0, 1]).index()).unwrap();
        assert!(up.is_custom());
        assert_eq!(up.view().offset, [-1, 4]);
    }

    #[test]
    fn inner_views() {
        let block = HaloBlock::new(
            ViewSpec::new([0, 4], [4, 4]),
            [16, 16],
            cross(),
            [BoundaryPolicy::None; 2],
        )
        .unwrap();
        // inner shrinks by the stencil widths in both dimensions
        assert_eq!(block.view_inner().offset, [1, 5]);
        assert_eq!(block.view_inner().extent, [2, 2]);
        // inner-with-boundaries shrinks only at the suppressed global edge
        assert_eq!(block.view_inner_with_boundaries().offset, [1, 4]);
        assert_eq!(block.view_inner_with_boundaries().extent, [3, 4]);
    }

    #[test]
    fn boundary_views_mirror_halo_regions() {
        let block = HaloBlock::new(
            ViewSpec::new([4, 4], [4, 4]),
            [16, 16],
            cross(),
            [BoundaryPolicy::None; 2],
        )
        .unwrap();
        let up = block.region(RegionCoords::new([0, 1]).index()).unwrap();
        assert_eq!(up.view().offset, [3, 4]);
        assert_eq!(up.boundary_view().offset, [4, 4]);
        assert_eq!(up.boundary_view().extent, [1, 4]);
        let down = block.region(RegionCoords::new([2, 1]).index()).unwrap();
        assert_eq!(down.boundary_view().offset, [7, 4]);
    }

    #[test]
    fn asymmetric_stencil_widths() {
        // upwind-style stencil: two behind, one ahead in dim 0 only
        let stencil = StencilSpec::from_offsets([[-2, 0], [1, 0]]).unwrap();
        let block = HaloBlock::new(
            ViewSpec::new([8, 0], [4, 6]),
            [32, 6],
            stencil,
            [BoundaryPolicy::None; 2],
        )
        .unwrap();
        assert_eq!(block.halo_pre(), [2, 0]);
        assert_eq!(block.halo_post(), [1, 0]);
        let up = block.region(RegionCoords::new([0, 1]).index()).unwrap();
        assert_eq!(up.view().offset, [6, 0]);
        assert_eq!(up.view().extent, [2, 6]);
        assert_eq!(up.width(), 2);
        let down = block.region(RegionCoords::new([2, 1]).index()).unwrap();
        assert_eq!(down.view().offset, [12, 0]);
        assert_eq!(down.view().extent, [1, 6]);
        // boundary regions mirror their own side's width
        assert_eq!(up.boundary_view().extent, [2, 6]);
        assert_eq!(down.boundary_view().offset, [11, 0]);
        // no stencil extent in dim 1: no shrink, no lateral regions
        assert_eq!(block.view_inner().offset, [10, 0]);
        assert_eq!(block.view_inner().extent, [1, 6]);
        assert_eq!(block.regions().len(), 2);
    }

    #[test]
    fn three_dimensional_moore_regions() {
        let block = HaloBlock::new(
            ViewSpec::new([4, 4, 4], [4, 4, 4]),
            [16, 16, 16],
            StencilSpec::<3>::moore(1).unwrap(),
            [BoundaryPolicy::None; 3],
        )
        .unwrap();
        // an interior tile activates all 26 non-center regions
        assert_eq!(block.regions().len(), 26);
        assert!(block.regions().iter().all(|r| r.width() == 1));
        // slabs cover the one-element shell of the 4x4x4 tile
        let covered: usize = block.boundary_views().iter().map(|v| v.size()).sum();
        assert_eq!(covered, 4 * 4 * 4 - 2 * 2 * 2);
        assert_eq!(block.view_inner().extent, [2, 2, 2]);
    }

    #[test]
    fn coverage_inner_plus_boundaries_is_the_tile() {
        let block = HaloBlock::new(
            ViewSpec::new([8, 8], [6, 6]),
            [32, 32],
            nine_point(),
            [BoundaryPolicy::None; 2],
        )
        .unwrap();
        let inner = block.view_inner();
        let mut covered = inner.size();
        for slab in block.boundary_views() {
            covered += slab.size();
            // slabs are disjoint from the inner view
            assert!(slab.intersect(inner).is_empty());
        }
        // pairwise disjoint slabs
        for (i, a) in block.boundary_views().iter().enumerate() {
            for b in block.boundary_views().iter().skip(i + 1) {
                assert!(a.intersect(b).is_empty(), "{:?} overlaps {:?}", a, b);
            }
        }
        assert_eq!(covered, block.view().size());
    }
}
