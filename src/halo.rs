//! Halo (ghost region) support for stencil iteration.
//!
//! Given a unit's local tile, a stencil specification and a per-dimension
//! global-boundary policy, a [`HaloBlock`] decomposes the tile into the
//! *inner* view (updatable without any halo data), *boundary* views (the
//! slices neighbors read from this unit) and up to `3^N - 1` *halo regions*
//! (the neighbor slices this unit reads). [`HaloMemory`] packs all incoming
//! regions into one buffer, and [`HaloExchange`] fills them with one-sided
//! reads driven by the distribution pattern.
//!
//! The typical cadence per timestep is: team barrier (producers finished
//! writing their tiles), `update_async()`, compute on the inner view,
//! `wait()`, compute on the boundary views.

pub(crate) mod stencil;
pub use stencil::{StencilPoint, StencilSpec};

pub(crate) mod region;
pub use region::{HaloRegion, RegionCoords, CENTER, POST, PRE};

pub(crate) mod block;
pub use block::HaloBlock;

pub(crate) mod memory;
pub use memory::HaloMemory;

pub(crate) mod exchange;
pub use exchange::HaloExchange;

pub(crate) mod iter;
pub use iter::{BoundaryStencilIter, InnerStencilIter, StencilCursor};

/// What a halo region sources when the tile touches the global edge of a
/// dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryPolicy {
    /// No source: regions crossing this global edge are suppressed and the
    /// elements depending on them are not updatable.
    None,
    /// The opposite side of the global domain.
    Cyclic,
    /// A user-supplied function of the absent global coordinate; filled
    /// locally, no transport.
    Custom,
}
