/// Bootstrap a threaded world, allocate a symmetric region and read the
/// right neighbor's slice.
///
/// Run with: `cargo run --example hello_world`
use tessera::prelude::*;

fn main() {
    TesseraWorldBuilder::new().launch_threaded(4, |world| {
        let me = world.my_unit();
        let num_units = world.num_units();
        println!("hello from unit {} of {}", me, num_units);

        let team = world.team();
        let mem = team.alloc_symmetric::<u64>(8).unwrap();
        unsafe { mem.as_mut_slice().fill(me as u64) };
        world.barrier();

        let neighbor = (me + 1) % num_units;
        let mut incoming = [0u64; 8];
        unsafe { mem.get_blocking(neighbor, 0, &mut incoming).unwrap() };
        assert!(incoming.iter().all(|v| *v == neighbor as u64));
        println!("unit {} read {:?} from unit {}", me, incoming[0], neighbor);
        world.barrier();
    });
}
