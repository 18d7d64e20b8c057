//! Prelude for the commonly used substrate surface.

pub use crate::active_messaging::{exec_action, ActionBuffer, ActionRegistration};
pub use crate::error::{TesseraError, TesseraResult};
pub use crate::fabric::{Backend, RdmaHandle};
pub use crate::global_ptr::GlobalPtr;
pub use crate::halo::{
    BoundaryPolicy, HaloBlock, HaloExchange, HaloMemory, StencilPoint, StencilSpec,
};
pub use crate::memregion::{Dist, DynamicMemoryRegion, SymmetricMemoryRegion};
pub use crate::pattern::{
    BlockPattern, DistSpec, DynamicPattern, MemoryOrder, Pattern, SeqTilePattern,
    ShiftTilePattern, TeamSpec, TilePattern, ViewSpec,
};
pub use crate::tessera_lock::TeamLock;
pub use crate::tessera_team::TesseraTeam;
pub use crate::tessera_world::{TesseraWorld, TesseraWorldBuilder};
pub use crate::unit_group::UnitGroup;
