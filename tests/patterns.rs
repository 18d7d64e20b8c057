//! Cross-variant pattern properties: round-trip, conservation, single
//! ownership. Sampled rather than exhaustive on the larger shapes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera::pattern::{
    BlockPattern, DistSpec, MemoryOrder, Pattern, SeqTilePattern, ShiftTilePattern, TeamSpec,
    TilePattern,
};

fn check_pattern<P: Pattern<2>>(make: impl Fn(usize) -> P, team_size: usize, label: &str) {
    let pattern = make(0);
    let extents = pattern.extents();

    // conservation: unit sizes sum to the declared size
    let total: usize = (0..team_size)
        .map(|u| pattern.local_size_of(u).unwrap())
        .sum();
    assert_eq!(total, pattern.size(), "{}: conservation", label);
    assert!(pattern.capacity() >= pattern.size(), "{}: capacity", label);

    let mut rng = StdRng::seed_from_u64(0x7e55);
    for _ in 0..256 {
        let g = [
            rng.gen_range(0..extents[0]),
            rng.gen_range(0..extents[1]),
        ];
        // ownership is single-valued and stable across the active unit
        let owner = pattern.unit_at(g).unwrap();
        for unit in 0..team_size {
            let p = make(unit);
            assert_eq!(p.unit_at(g).unwrap(), owner, "{}: ownership of {:?}", label, g);
        }
        // round-trip through the owner's local coordinates
        let local = pattern.local(g).unwrap();
        assert_eq!(local.unit, owner);
        assert_eq!(
            pattern.global(local.unit, local.coords).unwrap(),
            g,
            "{}: roundtrip of {:?}",
            label,
            g
        );
        // the local offset addresses inside the owner's allocation
        let li = pattern.local_index(g).unwrap();
        assert!(li.index < pattern.local_size_of(owner).unwrap());
    }

    // linear local offsets of the active unit invert through global_index
    let active = make(team_size - 1);
    let grid_order = active.order();
    for _ in 0..64 {
        let local_index = rng.gen_range(0..active.local_size());
        let gi = active.global_index(local_index).unwrap();
        let coords = match grid_order {
            MemoryOrder::RowMajor => [gi / extents[1], gi % extents[1]],
            MemoryOrder::ColMajor => [gi % extents[0], gi / extents[0]],
        };
        assert_eq!(active.unit_at(coords).unwrap(), team_size - 1);
        assert_eq!(active.at(coords).unwrap(), local_index, "{}: at/global_index", label);
    }
}

#[test]
fn block_pattern_properties() {
    for order in [MemoryOrder::RowMajor, MemoryOrder::ColMajor] {
        check_pattern(
            |unit| {
                BlockPattern::with_order(
                    [13, 9],
                    [DistSpec::Blocked, DistSpec::BlockCyclic(2)],
                    TeamSpec::new([2, 3]),
                    unit,
                    order,
                )
                .unwrap()
            },
            6,
            "block",
        );
    }
}

#[test]
fn cyclic_block_pattern_properties() {
    check_pattern(
        |unit| {
            BlockPattern::with_order(
                [16, 5],
                [DistSpec::Cyclic, DistSpec::None],
                TeamSpec::new([4, 1]),
                unit,
                MemoryOrder::RowMajor,
            )
            .unwrap()
        },
        4,
        "cyclic",
    );
}

#[test]
fn tile_pattern_properties() {
    for order in [MemoryOrder::RowMajor, MemoryOrder::ColMajor] {
        check_pattern(
            |unit| {
                TilePattern::with_order([10, 9], [3, 2], TeamSpec::new([2, 2]), unit, order)
                    .unwrap()
            },
            4,
            "tile",
        );
    }
}

#[test]
fn shift_tile_pattern_properties() {
    check_pattern(
        |unit| {
            ShiftTilePattern::with_order([12, 10], [2, 3], 3, unit, MemoryOrder::RowMajor)
                .unwrap()
        },
        3,
        "shift_tile",
    );
}

#[test]
fn seq_tile_pattern_properties() {
    check_pattern(
        |unit| {
            SeqTilePattern::with_order([9, 8], [2, 2], 3, unit, MemoryOrder::RowMajor).unwrap()
        },
        3,
        "seq_tile",
    );
}
