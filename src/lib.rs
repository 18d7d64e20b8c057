//! Tessera is a partitioned global address space (PGAS) substrate for Rust:
//! every unit (process-like participant) contributes part of its memory to a
//! virtual global address space that any unit can read and write through
//! one-sided operations.
//!
//! On top of the memory substrate, Tessera provides *distribution patterns*
//! mapping multi-dimensional index spaces onto units and their local
//! memory, and a *halo exchange* facility that materializes the ghost
//! regions stencil codes need around each unit's tile.
//!
//! Data is moved by fabrics, the pluggable transport providers. Two are
//! built in: `local` for single unit development and `threaded`, which runs
//! every unit as a thread of one process and is how multi-unit executions
//! are emulated (and tested) without a launcher.
//!
//! EXAMPLES
//! --------
//!
//! # Symmetric memory across four units
//! ```
//! use tessera::TesseraWorldBuilder;
//!
//! TesseraWorldBuilder::new().launch_threaded(4, |world| {
//!     let team = world.team();
//!     let mem = team.alloc_symmetric::<u64>(8).unwrap();
//!     unsafe { mem.as_mut_slice().fill(world.my_unit() as u64) };
//!     world.barrier();
//!     // read the right neighbor's slice
//!     let mut incoming = [0u64; 8];
//!     let neighbor = (world.my_unit() + 1) % world.num_units();
//!     unsafe { mem.get_blocking(neighbor, 0, &mut incoming).unwrap() };
//!     assert_eq!(incoming[0], neighbor as u64);
//!     world.barrier();
//! });
//! ```
//!
//! # A pattern mapping a 2-d index space
//! ```
//! use tessera::pattern::{BlockPattern, DistSpec, Pattern, TeamSpec};
//!
//! let pattern = BlockPattern::<2>::new(
//!     [6, 6],
//!     [DistSpec::Blocked, DistSpec::None],
//!     TeamSpec::new([2, 1]),
//!     0, // this unit
//! )
//! .unwrap();
//! assert_eq!(pattern.unit_at([3, 0]).unwrap(), 1);
//! ```

#[macro_use]
extern crate lazy_static;

#[doc(hidden)]
pub extern crate serde;

#[doc(hidden)]
pub use inventory;

pub mod active_messaging;
pub use active_messaging::{exec_action, ActionBuffer, ActionRegistration};
mod barrier;
pub mod env_var;
pub use env_var::config;
pub mod error;
pub use error::{TesseraError, TesseraResult};
mod fabric;
pub use fabric::{Backend, RdmaHandle};
mod global_ptr;
pub use global_ptr::GlobalPtr;
pub mod halo;
pub mod memregion;
pub use memregion::{Dist, DynamicMemoryRegion, SymmetricMemoryRegion};
pub mod pattern;
pub mod prelude;
mod tessera_arch;
pub use tessera_arch::{BlockedArch, GlobalArch, IdError, ListArch, TeamArch};
mod tessera_lock;
pub use tessera_lock::TeamLock;
mod tessera_team;
pub use tessera_team::TesseraTeam;
mod tessera_world;
pub use tessera_world::{TesseraWorld, TesseraWorldBuilder};
mod unit_group;
pub use unit_group::UnitGroup;

use bincode::Options;

lazy_static! {
    pub(crate) static ref BINCODE: bincode::config::WithOtherTrailing<bincode::DefaultOptions, bincode::config::AllowTrailing> =
        bincode::DefaultOptions::new().allow_trailing_bytes();
}

#[doc(hidden)]
pub fn serialize<T: ?Sized>(obj: &T, var: bool) -> Result<Vec<u8>, anyhow::Error>
where
    T: serde::Serialize,
{
    if var {
        Ok(BINCODE.serialize(obj)?)
    } else {
        Ok(bincode::serialize(obj)?)
    }
}

#[doc(hidden)]
pub fn serialized_size<T: ?Sized>(obj: &T, var: bool) -> usize
where
    T: serde::Serialize,
{
    if var {
        BINCODE.serialized_size(obj).unwrap() as usize
    } else {
        bincode::serialized_size(obj).unwrap() as usize
    }
}

#[doc(hidden)]
pub fn deserialize<'a, T>(bytes: &'a [u8], var: bool) -> Result<T, anyhow::Error>
where
    T: serde::Deserialize<'a>,
{
    if var {
        Ok(BINCODE.deserialize(bytes)?)
    } else {
        Ok(bincode::deserialize(bytes)?)
    }
}
