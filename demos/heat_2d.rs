/// Jacobi heat diffusion on a 2-d grid distributed over four units, with
/// cyclic boundaries and halo exchange per timestep.
///
/// Run with: `cargo run --example heat_2d`
use tessera::prelude::*;

const GRID: usize = 16;
const STEPS: usize = 10;

fn main() {
    TesseraWorldBuilder::new().launch_threaded(4, |world| {
        let pattern = BlockPattern::<2>::with_order(
            [GRID, GRID],
            [DistSpec::Blocked, DistSpec::Blocked],
            TeamSpec::new([2, 2]),
            world.my_unit(),
            MemoryOrder::RowMajor,
        )
        .unwrap();
        let team = world.team();
        let mem = team.alloc_symmetric::<f64>(pattern.local_size()).unwrap();

        // a hot spot in the middle of the domain
        let extents = pattern.local_extents();
        {
            let local = unsafe { mem.as_mut_slice() };
            for i in 0..local.len() {
                let lc = [i / extents[1], i % extents[1]];
                let g = pattern.global(pattern.my_unit(), lc).unwrap();
                local[i] = if g == [GRID / 2, GRID / 2] { 100.0 } else { 0.0 };
            }
        }

        let origin = pattern.global(pattern.my_unit(), [0, 0]).unwrap();
        let block = HaloBlock::new(
            ViewSpec::new([origin[0] as isize, origin[1] as isize], extents),
            [GRID, GRID],
            StencilSpec::new(vec![
                StencilPoint::with_coefficient([-1, 0], 0.25),
                StencilPoint::with_coefficient([1, 0], 0.25),
                StencilPoint::with_coefficient([0, -1], 0.25),
                StencilPoint::with_coefficient([0, 1], 0.25),
            ])
            .unwrap(),
            [BoundaryPolicy::Cyclic; 2],
        )
        .unwrap();
        let mut exchange = HaloExchange::new(&mem, &pattern, &block).unwrap();
        let mut next = vec![0.0f64; pattern.local_size()];

        for _ in 0..STEPS {
            world.barrier(); // tiles written, safe to read remotely
            exchange.update_async().unwrap();

            let local = unsafe { mem.as_slice() };
            let grid = |lc: [usize; 2]| lc[0] * extents[1] + lc[1];

            // the inner view needs no halo data, overlap it with the fetch
            for cursor in tessera::halo::InnerStencilIter::new(local, &block, pattern.order()) {
                let mut value = 0.5 * cursor.center();
                for i in 0..cursor.stencil().len() {
                    value += cursor.point(i).coefficient() * 0.5 * cursor.value_at(i).unwrap();
                }
                next[grid(cursor.coords())] = value;
            }

            exchange.wait().unwrap();
            for cursor in tessera::halo::BoundaryStencilIter::new(
                local,
                &block,
                exchange.halo(),
                pattern.order(),
            ) {
                let mut value = 0.5 * cursor.center();
                for i in 0..cursor.stencil().len() {
                    value += cursor.point(i).coefficient() * 0.5 * cursor.value_at(i).unwrap();
                }
                next[grid(cursor.coords())] = value;
            }

            world.barrier(); // readers done before tiles change
            unsafe { mem.as_mut_slice().copy_from_slice(&next) };
        }

        // heat is conserved under cyclic boundaries
        world.barrier();
        let local_heat: f64 = unsafe { mem.as_slice() }.iter().sum();
        let sums = team.alloc_symmetric::<f64>(1).unwrap();
        unsafe { sums.as_mut_slice()[0] = local_heat };
        world.barrier();
        if world.my_unit() == 0 {
            let mut total = 0.0;
            for unit in 0..world.num_units() {
                let mut part = [0.0f64; 1];
                unsafe { sums.get_blocking(unit, 0, &mut part).unwrap() };
                total += part[0];
            }
            println!("total heat after {} steps: {:.3}", STEPS, total);
            assert!((total - 100.0).abs() < 1e-9);
        }
        world.barrier();
    });
}
