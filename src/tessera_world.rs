//! The world: the entry point owning the fabric, the root team, and the
//! substrate lifecycle.
//!
//! Constructing a world is the `init` of the substrate; calling
//! [`finalize`][TesseraWorld::finalize] tears it down (the threaded launch
//! harness does so on the way out). After finalize every fallible substrate
//! call on handles derived from the world reports `NotInitialized`.

use crate::error::TesseraResult;
use crate::fabric::threaded::ThreadedFabric;
use crate::fabric::{create_fabric, Backend, Fabric, FabricCollective, FabricInfo};
use crate::memregion::symmetric::SymmetricMemoryRegion;
use crate::memregion::Dist;
use crate::tessera_team::{TeamRT, TesseraTeam};
use std::sync::Arc;

/// Builder for a [`TesseraWorld`].
#[derive(Debug, Default)]
pub struct TesseraWorldBuilder {
    backend: Option<Backend>,
}

impl TesseraWorldBuilder {
    pub fn new() -> TesseraWorldBuilder {
        TesseraWorldBuilder::default()
    }

    /// Select the fabric backend; defaults to the `TESSERA_BACKEND`
    /// environment selection.
    pub fn with_backend(mut self, backend: Backend) -> TesseraWorldBuilder {
        self.backend = Some(backend);
        self
    }

    /// Build a single-process world on the selected backend.
    pub fn build(self) -> TesseraWorld {
        let backend = self.backend.unwrap_or_default();
        let fabric = Arc::new(create_fabric(backend));
        TesseraWorld::from_fabric(fabric).expect("world bootstrap")
    }

    /// Launch `num_units` units as threads of this process and run `f` on
    /// each with its own world handle. Returns when every unit's closure has
    /// finished; the worlds are finalized collectively on the way out.
    ///
    /// This is the harness that makes multi-unit executions runnable inside
    /// one process (and one test).
    pub fn launch_threaded<F>(self, num_units: usize, f: F)
    where
        F: Fn(TesseraWorld) + Send + Sync,
    {
        let fabrics = ThreadedFabric::launch(num_units);
        std::thread::scope(|scope| {
            for fabric in fabrics {
                let f = &f;
                scope.spawn(move || {
                    let world =
                        TesseraWorld::from_fabric(Arc::new(Fabric::Threaded(fabric)))
                            .expect("world bootstrap");
                    f(world.clone());
                    world.finalize();
                });
            }
        });
    }
}

/// All units of a distributed execution, plus the root team spanning them.
#[derive(Clone, Debug)]
pub struct TesseraWorld {
    team: TesseraTeam,
    fabric: Arc<Fabric>,
}

impl TesseraWorld {
    fn from_fabric(fabric: Arc<Fabric>) -> TesseraResult<TesseraWorld> {
        let rt = TeamRT::new_root(fabric.clone())?;
        tracing::debug!(
            "world up: unit {} of {} on {:?}",
            fabric.my_unit(),
            fabric.num_units(),
            fabric.backend()
        );
        Ok(TesseraWorld {
            team: TesseraTeam { rt },
            fabric,
        })
    }

    /// This unit's id in the root team.
    pub fn my_unit(&self) -> usize {
        self.fabric.my_unit()
    }

    /// Number of units in the world.
    pub fn num_units(&self) -> usize {
        self.fabric.num_units()
    }

    /// The fabric backend this world runs on.
    pub fn backend(&self) -> Backend {
        self.fabric.backend()
    }

    /// The root team (the team-of-all).
    pub fn team(&self) -> TesseraTeam {
        self.team.clone()
    }

    /// Barrier over all units.
    pub fn barrier(&self) {
        self.team.barrier();
    }

    /// Collectively allocate a symmetric region on the root team.
    pub fn alloc_symmetric<T: Dist>(
        &self,
        nelems: usize,
    ) -> TesseraResult<SymmetricMemoryRegion<T>> {
        self.team.alloc_symmetric(nelems)
    }

    /// Collectively shut the substrate down. Fences outstanding operations,
    /// then marks this unit's fabric inactive; subsequent fallible calls
    /// report `NotInitialized`.
    pub fn finalize(&self) {
        if self.fabric.active() {
            self.fabric.barrier();
            self.fabric.shutdown();
            tracing::debug!("world down: unit {}", self.fabric.my_unit());
        }
    }
}
