//! Multi-unit symmetric memory semantics over the threaded backend.

use serial_test::serial;
use tessera::{GlobalPtr, TesseraError, TesseraWorldBuilder};

#[test]
#[serial]
fn every_unit_can_address_every_slice() {
    TesseraWorldBuilder::new().launch_threaded(4, |world| {
        let team = world.team();
        let mem = team.alloc_symmetric::<u64>(4).unwrap();
        unsafe { mem.as_mut_slice().fill(world.my_unit() as u64 * 100) };
        world.barrier();

        // team-aligned: a pointer (u, segment, 0) is valid for any member
        for unit in 0..world.num_units() {
            let gptr = mem.gptr_at(unit, 0).unwrap();
            assert_eq!(gptr.unit(), unit);
            let mut value = [0u64; 1];
            unsafe { mem.get_gptr(&gptr, &mut value).unwrap() };
            mem.flush(unit).unwrap();
            assert_eq!(value[0], unit as u64 * 100);
        }
        world.barrier();
    });
}

#[test]
#[serial]
fn put_completes_at_flush() {
    TesseraWorldBuilder::new().launch_threaded(2, |world| {
        let team = world.team();
        let mem = team.alloc_symmetric::<u32>(8).unwrap();
        world.barrier();
        let me = world.my_unit();
        let peer = 1 - me;
        let payload = [me as u32 + 1; 8];
        unsafe { mem.put(peer, 0, &payload).unwrap() };
        mem.flush(peer).unwrap();
        world.barrier();
        let local = unsafe { mem.as_slice() };
        assert_eq!(local, &[peer as u32 + 1; 8]);
        world.barrier();
    });
}

#[test]
#[serial]
fn handles_report_completion() {
    TesseraWorldBuilder::new().launch_threaded(2, |world| {
        let team = world.team();
        let mem = team.alloc_symmetric::<u64>(16).unwrap();
        unsafe { mem.as_mut_slice().fill(7) };
        world.barrier();
        let peer = 1 - world.my_unit();
        let mut incoming = [0u64; 16];
        let handle = unsafe { mem.get_handle(peer, 0, &mut incoming).unwrap() };
        handle.wait_local().unwrap();
        assert!(handle.test_local());
        handle.wait().unwrap();
        assert_eq!(incoming, [7u64; 16]);
        world.barrier();
    });
}

#[test]
#[serial]
fn mismatched_alloc_arguments_fail() {
    TesseraWorldBuilder::new().launch_threaded(3, |world| {
        let team = world.team();
        // unit 2 asks for a different size
        let nelems = if world.my_unit() == 2 { 8 } else { 4 };
        let result = team.alloc_symmetric::<u32>(nelems);
        match (world.my_unit(), result) {
            (2, Err(TesseraError::InvalidArgument(_))) => {}
            (2, other) => panic!("unit 2 expected InvalidArgument, got {:?}", other.is_ok()),
            (_, Err(TesseraError::TransportError(_))) => {}
            (unit, other) => panic!("unit {} expected TransportError, got {:?}", unit, other.is_ok()),
        }
    });
}

#[test]
#[serial]
fn gptr_locality() {
    TesseraWorldBuilder::new().launch_threaded(2, |world| {
        let team = world.team();
        let mem = team.alloc_symmetric::<u64>(4).unwrap();
        world.barrier();
        let me = world.my_unit();
        let peer = 1 - me;
        // my own pointer resolves, the peer's does not
        let mine = mem.gptr_at(me, 2).unwrap();
        assert!(mem.local_addr(&mine).is_ok());
        assert!(team.local_addr(&mine).is_ok());
        let theirs = mem.gptr_at(peer, 2).unwrap();
        assert_eq!(
            mem.local_addr(&theirs),
            Err(TesseraError::NotLocal { unit: peer as u32 })
        );
        // traversal via set_unit makes it local again
        let back = theirs.with_unit(me);
        assert!(mem.local_addr(&back).is_ok());
        world.barrier();
    });
}

#[test]
#[serial]
fn finalize_invalidates_operations() {
    TesseraWorldBuilder::new().launch_threaded(2, |world| {
        let team = world.team();
        let mem = team.alloc_symmetric::<u8>(4).unwrap();
        world.barrier();
        world.finalize();
        assert!(matches!(
            team.alloc_symmetric::<u8>(4),
            Err(TesseraError::NotInitialized)
        ));
        assert!(matches!(mem.flush(0), Err(TesseraError::NotInitialized)));
        assert!(matches!(
            team.local_addr(&GlobalPtr::new(0, mem.segment_id(), 0)),
            Err(TesseraError::NotInitialized)
        ));
    });
}

#[test]
#[serial]
fn registered_memory_is_addressable() {
    TesseraWorldBuilder::new().launch_threaded(2, |world| {
        let team = world.team();
        let mut backing = vec![world.my_unit() as u64; 8];
        let mem = unsafe {
            team.register_symmetric::<u64>(backing.as_mut_ptr(), backing.len())
                .unwrap()
        };
        world.barrier();
        let peer = 1 - world.my_unit();
        let mut incoming = [9u64; 8];
        unsafe { mem.get_blocking(peer, 0, &mut incoming).unwrap() };
        assert_eq!(incoming, [peer as u64; 8]);
        world.barrier();
        mem.free();
        drop(backing);
    });
}
