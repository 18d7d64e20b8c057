//! Dynamic global memory: grow/shrink locality and commit visibility.

use serial_test::serial;
use tessera::pattern::DynamicPattern;
use tessera::TesseraWorldBuilder;

#[test]
#[serial]
fn growth_is_invisible_until_commit() {
    TesseraWorldBuilder::new().launch_threaded(4, |world| {
        let team = world.team();
        let mut mem = team.alloc_dynamic::<u64>(10).unwrap();
        let me = world.my_unit();

        if me == 2 {
            let fresh = mem.grow(5);
            assert_eq!(fresh.len(), 5);
            fresh.fill(42);
        }
        // before commit: unit 2 sees 15 locally, everyone else still sees 10
        let expected = if me == 2 { 15 } else { 10 };
        assert_eq!(mem.local_size(2).unwrap(), expected);
        assert_eq!(mem.local_size(me).unwrap(), if me == 2 { 15 } else { 10 });

        mem.commit().unwrap();

        // after commit: every unit observes the same sizes
        assert_eq!(mem.local_size(2).unwrap(), 15);
        assert_eq!(mem.size(), 45);
        assert_eq!(mem.committed_size(), 45);

        // the committed elements are remotely readable: the first grown
        // element of unit 2 sits after units 0, 1 and its own initial 10
        let offsets: usize = (0..2).map(|u| mem.local_size(u).unwrap()).sum();
        assert_eq!(mem.read_blocking(offsets + 10).unwrap(), 42);
        world.barrier();
    });
}

#[test]
#[serial]
fn shrink_prefers_unattached_tail() {
    TesseraWorldBuilder::new().launch_threaded(2, |world| {
        let team = world.team();
        let mut mem = team.alloc_dynamic::<u32>(8).unwrap();
        // grow twice, shrink across both uncommitted buckets
        mem.grow(4);
        mem.grow(4);
        assert_eq!(mem.local_size(world.my_unit()).unwrap(), 16);
        mem.shrink(6).unwrap();
        assert_eq!(mem.local_size(world.my_unit()).unwrap(), 10);
        mem.commit().unwrap();
        assert_eq!(mem.size(), 20);
        world.barrier();
    });
}

#[test]
#[serial]
fn shrink_of_committed_memory_takes_a_commit() {
    TesseraWorldBuilder::new().launch_threaded(2, |world| {
        let team = world.team();
        let mut mem = team.alloc_dynamic::<u32>(10).unwrap();
        let me = world.my_unit();
        if me == 1 {
            mem.shrink(4).unwrap();
            assert_eq!(mem.local_size(1).unwrap(), 6);
        } else {
            // the shrink is not visible remotely yet
            assert_eq!(mem.local_size(1).unwrap(), 10);
        }
        mem.commit().unwrap();
        assert_eq!(mem.local_size(1).unwrap(), 6);
        assert_eq!(mem.size(), 16);
        world.barrier();
    });
}

#[test]
#[serial]
fn local_bookkeeping_follows_grow_and_shrink() {
    TesseraWorldBuilder::new().launch_threaded(2, |world| {
        let team = world.team();
        let mut mem = team.alloc_dynamic::<u16>(4).unwrap();
        let me = world.my_unit();
        let initial = mem.local_size(me).unwrap();
        mem.grow(3);
        mem.grow(2);
        mem.shrink(1).unwrap();
        // local size == initial + grows - shrinks, before any commit
        assert_eq!(mem.local_size(me).unwrap(), initial + 3 + 2 - 1);
        assert!(mem.shrink(100).is_err());
        mem.commit().unwrap();
        assert_eq!(mem.local_size(me).unwrap(), initial + 4);
        world.barrier();
    });
}

#[test]
#[serial]
fn committed_elements_are_iterable_and_addressable() {
    TesseraWorldBuilder::new().launch_threaded(2, |world| {
        let team = world.team();
        let mut mem = team.alloc_dynamic::<u64>(3).unwrap();
        let me = world.my_unit() as u64;
        for (i, elem) in unsafe { mem.local_iter_mut() }.enumerate() {
            *elem = me * 10 + i as u64;
        }
        mem.commit().unwrap();

        // global order is unit-major: unit 0's run then unit 1's
        assert_eq!(mem.read_blocking(0).unwrap(), 0);
        assert_eq!(mem.read_blocking(2).unwrap(), 2);
        assert_eq!(mem.read_blocking(3).unwrap(), 10);
        assert_eq!(mem.read_blocking(5).unwrap(), 12);
        assert!(mem.read_blocking(6).is_err());
        assert!(!mem.gbegin().is_null());

        // the matching dynamic pattern resolves ownership from the sizes
        let sizes: Vec<usize> = (0..2).map(|u| mem.local_size(u).unwrap()).collect();
        let pattern = DynamicPattern::new(sizes, world.my_unit()).unwrap();
        assert_eq!(pattern.unit_at(2).unwrap(), 0);
        assert_eq!(pattern.unit_at(3).unwrap(), 1);
        assert_eq!(pattern.global(1, 0).unwrap(), 3);
        world.barrier();
    });
}
