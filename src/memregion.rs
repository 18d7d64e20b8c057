//! Memory regions are the global-memory abstractions of the substrate:
//! per-unit slices of process memory exported into the global address space
//! and addressed through [`GlobalPtr`][crate::GlobalPtr]s.
//!
//! Two flavors exist. [`SymmetricMemoryRegion`] is team-aligned: every unit
//! contributes the same element count under the same segment id, so any unit
//! can compute a pointer into any member's slice without communication.
//! [`DynamicMemoryRegion`] is a per-unit bucketed heap whose growth and
//! shrinkage become globally visible only at an explicit collective
//! [`commit`][DynamicMemoryRegion::commit].
//!
//! # Warning
//! These are low-level one-sided abstractions: a `put` does not synchronize
//! with anyone, and local accessors hand out slices whose remote aliasing
//! cannot be checked. The accessors are `unsafe` for exactly that reason.

pub(crate) mod symmetric;
pub use symmetric::SymmetricMemoryRegion;

pub(crate) mod dynamic;
pub use dynamic::DynamicMemoryRegion;

/// Marker for element types that can live in global memory and move through
/// one-sided operations: bitwise-copyable and serializable for the
/// collective metadata paths.
pub trait Dist:
    Sync + Send + Copy + serde::ser::Serialize + serde::de::DeserializeOwned + 'static
{
}

impl<T> Dist for T where
    T: Sync + Send + Copy + serde::ser::Serialize + serde::de::DeserializeOwned + 'static
{
}
