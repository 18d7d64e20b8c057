//! Teams, groups and distributed locks over the threaded backend.

use serial_test::serial;
use tessera::{TesseraWorldBuilder, UnitGroup};

#[test]
#[serial]
fn subteam_from_group_split() {
    TesseraWorldBuilder::new().launch_threaded(4, |world| {
        let team = world.team();
        let halves = team.group().split(2).unwrap();
        let me = world.my_unit();

        // collective on the parent: every unit passes the same first half
        let first = team.create_subteam(&halves[0]).unwrap();
        let second = team.create_subteam(&halves[1]).unwrap();
        assert_ne!(
            first.as_ref().map(|t| t.id()),
            second.as_ref().map(|t| t.id())
        );

        assert!(team.parent().is_none());
        if me < 2 {
            let sub = first.expect("member of the first half");
            assert!(second.is_none());
            assert_eq!(sub.num_units(), 2);
            assert_eq!(sub.my_unit(), me);
            assert_eq!(sub.global_unit(1).unwrap(), 1);
            assert_eq!(sub.parent().expect("chained to the root").id(), team.id());
            sub.barrier();
            // nested symmetric allocation scoped to the sub-team
            let mem = sub.alloc_symmetric::<u32>(2).unwrap();
            unsafe { mem.as_mut_slice().fill(me as u32) };
            sub.barrier();
            let peer = 1 - sub.my_unit();
            let mut incoming = [0u32; 2];
            unsafe { mem.get_blocking(peer, 0, &mut incoming).unwrap() };
            assert_eq!(incoming, [peer as u32; 2]);
            sub.barrier();
        } else {
            let sub = second.expect("member of the second half");
            assert!(first.is_none());
            assert_eq!(sub.my_unit(), me - 2);
            // unit ids convert through the parent chain
            assert_eq!(sub.global_unit(0).unwrap(), 2);
            assert_eq!(sub.team_unit(3).unwrap(), 1);
            assert!(sub.team_unit(0).is_err());
            sub.barrier();
        }
        world.barrier();
    });
}

#[test]
#[serial]
fn zero_size_team_rejected() {
    TesseraWorldBuilder::new().launch_threaded(2, |world| {
        let team = world.team();
        assert!(team.create_subteam(&UnitGroup::new()).is_err());
        world.barrier();
    });
}

#[test]
#[serial]
fn lock_provides_mutual_exclusion() {
    TesseraWorldBuilder::new().launch_threaded(4, |world| {
        let team = world.team();
        let lock = team.new_lock().unwrap();
        let counter = team.alloc_symmetric::<u64>(1).unwrap();
        world.barrier();

        // unsynchronized read-modify-write on unit 0's word, serialized
        // only by the lock
        for _ in 0..8 {
            lock.acquire().unwrap();
            let mut value = [0u64; 1];
            unsafe { counter.get_blocking(0, 0, &mut value).unwrap() };
            value[0] += 1;
            unsafe { counter.put_blocking(0, 0, &value).unwrap() };
            lock.release().unwrap();
        }
        world.barrier();
        if world.my_unit() == 0 {
            let local = unsafe { counter.as_slice() };
            assert_eq!(local[0], 32);
        }
        world.barrier();
    });
}

#[test]
#[serial]
fn try_acquire_reports_contention() {
    TesseraWorldBuilder::new().launch_threaded(2, |world| {
        let team = world.team();
        let lock = team.new_lock().unwrap();
        world.barrier();
        if world.my_unit() == 0 {
            assert!(lock.try_acquire().unwrap());
            world.barrier(); // unit 1 probes while we hold it
            world.barrier();
            lock.release().unwrap();
        } else {
            world.barrier();
            assert!(!lock.try_acquire().unwrap());
            // releasing a lock we do not hold is an error
            assert!(lock.release().is_err());
            world.barrier();
        }
        world.barrier();
        // after the holder released, anyone can take it
        if world.my_unit() == 1 {
            assert!(lock.try_acquire().unwrap());
            lock.release().unwrap();
        }
        world.barrier();
    });
}
