//! Stencil specifications: relative neighbor offsets with coefficients.

use crate::error::{TesseraError, TesseraResult};

/// One stencil point: an N-tuple of signed offsets plus a coefficient for
/// weighted updates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StencilPoint<const N: usize> {
    offsets: [isize; N],
    coefficient: f64,
}

impl<const N: usize> StencilPoint<N> {
    pub fn new(offsets: [isize; N]) -> StencilPoint<N> {
        StencilPoint {
            offsets,
            coefficient: 1.0,
        }
    }

    pub fn with_coefficient(offsets: [isize; N], coefficient: f64) -> StencilPoint<N> {
        StencilPoint {
            offsets,
            coefficient,
        }
    }

    pub fn offsets(&self) -> [isize; N] {
        self.offsets
    }

    pub fn offset(&self, d: usize) -> isize {
        self.offsets[d]
    }

    pub fn coefficient(&self) -> f64 {
        self.coefficient
    }

    /// The largest absolute offset over all dimensions.
    pub fn max_abs_offset(&self) -> usize {
        self.offsets.iter().map(|o| o.unsigned_abs()).max().unwrap_or(0)
    }
}

/// A fixed set of stencil points.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct StencilSpec<const N: usize> {
    points: Vec<StencilPoint<N>>,
}

impl<const N: usize> StencilSpec<N> {
    pub fn new(points: Vec<StencilPoint<N>>) -> TesseraResult<StencilSpec<N>> {
        if points.iter().any(|p| p.offsets() == [0; N]) {
            return Err(TesseraError::invalid(
                "the zero offset is the stencil center, not a point",
            ));
        }
        Ok(StencilSpec { points })
    }

    /// Unit-coefficient stencil from plain offsets.
    pub fn from_offsets(offsets: impl IntoIterator<Item = [isize; N]>) -> TesseraResult<StencilSpec<N>> {
        Self::new(offsets.into_iter().map(StencilPoint::new).collect())
    }

    /// The von Neumann neighborhood: axis-aligned offsets up to `radius`.
    pub fn von_neumann(radius: usize) -> TesseraResult<StencilSpec<N>> {
        if radius == 0 {
            return Err(TesseraError::invalid("zero stencil radius"));
        }
        let mut points = Vec::with_capacity(2 * N * radius);
        for d in 0..N {
            for r in 1..=radius as isize {
                let mut offsets = [0; N];
                offsets[d] = -r;
                points.push(StencilPoint::new(offsets));
                offsets[d] = r;
                points.push(StencilPoint::new(offsets));
            }
        }
        Self::new(points)
    }

    /// The Moore neighborhood: every offset in `[-radius, radius]^N` except
    /// the center.
    pub fn moore(radius: usize) -> TesseraResult<StencilSpec<N>> {
        if radius == 0 {
            return Err(TesseraError::invalid("zero stencil radius"));
        }
        let span = 2 * radius + 1;
        let mut points = Vec::with_capacity(span.pow(N as u32) - 1);
        for index in 0..span.pow(N as u32) {
            let mut offsets = [0isize; N];
            let mut rest = index;
            for d in (0..N).rev() {
                offsets[d] = (rest % span) as isize - radius as isize;
                rest /= span;
            }
            if offsets != [0; N] {
                points.push(StencilPoint::new(offsets));
            }
        }
        Self::new(points)
    }

    pub fn points(&self) -> &[StencilPoint<N>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, i: usize) -> &StencilPoint<N> {
        &self.points[i]
    }

    /// `(min, max)` offset over all points in dimension `d`.
    pub fn minmax(&self, d: usize) -> (isize, isize) {
        let min = self.points.iter().map(|p| p.offset(d)).min().unwrap_or(0);
        let max = self.points.iter().map(|p| p.offset(d)).max().unwrap_or(0);
        (min.min(0), max.max(0))
    }

    /// Halo width on the low side of dimension `d`.
    pub fn halo_pre(&self, d: usize) -> usize {
        (-self.minmax(d).0).max(0) as usize
    }

    /// Halo width on the high side of dimension `d`.
    pub fn halo_post(&self, d: usize) -> usize {
        self.minmax(d).1.max(0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The full 9-point neighborhood in 2-d.
    pub(crate) fn nine_point() -> StencilSpec<2> {
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

    #[test]
    fn widths_from_offsets() {
        let spec = nine_point();
        assert_eq!(spec.halo_pre(0), 1);
        assert_eq!(spec.halo_post(0), 1);
        assert_eq!(spec.halo_pre(1), 1);
        assert_eq!(spec.halo_post(1), 1);

        let asym = StencilSpec::<2>::from_offsets([[-2, 0], [1, 0], [0, 3]]).unwrap();
        assert_eq!(asym.halo_pre(0), 2);
        assert_eq!(asym.halo_post(0), 1);
        assert_eq!(asym.halo_pre(1), 0);
        assert_eq!(asym.halo_post(1), 3);
    }

    #[test]
    fn center_rejected() {
        assert!(StencilSpec::<2>::from_offsets([[0, 0]]).is_err());
    }

    #[test]
    fn coefficients_carried() {
        let point = StencilPoint::with_coefficient([0, 1], 0.25);
        assert_eq!(point.coefficient(), 0.25);
        assert_eq!(point.max_abs_offset(), 1);
    }

    #[test]
    fn neighborhood_constructors() {
        let vn = StencilSpec::<2>::von_neumann(1).unwrap();
        assert_eq!(vn.len(), 4);
        let vn2 = StencilSpec::<3>::von_neumann(2).unwrap();
        assert_eq!(vn2.len(), 12);
        assert_eq!(vn2.halo_pre(1), 2);
        let moore = StencilSpec::<2>::moore(1).unwrap();
        assert_eq!(moore.len(), 8);
        assert_eq!(moore, nine_point());
        let moore3 = StencilSpec::<3>::moore(1).unwrap();
        assert_eq!(moore3.len(), 26);
        assert!(StencilSpec::<2>::moore(0).is_err());
    }
}
