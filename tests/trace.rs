//! Replays allocation traces against a heap, checking every returned range
//! for alignment, bounds, and overlap with the live ranges.
use std::{collections::BTreeMap, mem::MaybeUninit, ptr::NonNull};

use segfit::{Config, HeapStats, MemorySource, Placement, RangeTracker, SegFit, SliceSource};

/// The live payload ranges, keyed by start address. The harness inserts a
/// range after each acquisition; the heap removes it on release.
#[derive(Debug, Default)]
struct LiveRanges {
    ranges: BTreeMap<usize, usize>,
}

impl LiveRanges {
    fn insert(&mut self, lo: NonNull<u8>, len: usize) {
        let lo = lo.as_ptr() as usize;
        let hi = lo + len;

        if let Some((&prev_lo, &prev_hi)) = self.ranges.range(..=lo).next_back() {
            assert!(
                prev_hi <= lo,
                "{:#x}..{:#x} overlaps {:#x}..{:#x}",
                lo,
                hi,
                prev_lo,
                prev_hi
            );
        }
        if let Some((&next_lo, &next_hi)) = self.ranges.range(lo..).next() {
            assert!(
                hi <= next_lo,
                "{:#x}..{:#x} overlaps {:#x}..{:#x}",
                lo,
                hi,
                next_lo,
                next_hi
            );
        }

        self.ranges.insert(lo, hi);
    }
}

impl RangeTracker for LiveRanges {
    fn remove(&mut self, lo: NonNull<u8>) {
        let removed = self.ranges.remove(&(lo.as_ptr() as usize));
        assert!(removed.is_some(), "{:?} was not a live range", lo);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Acquire { id: usize, size: usize },
    Release { id: usize },
}

/// Parse a trace in the usual `a <id> <size>` / `f <id>` format. Header lines
/// (bare numbers) and blank lines are skipped.
fn parse(trace: &str) -> Vec<Op> {
    trace
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            let op = words.next()?;
            let mut arg = || -> usize { words.next().unwrap().parse().unwrap() };
            match op {
                "a" => Some(Op::Acquire {
                    id: arg(),
                    size: arg(),
                }),
                "f" => Some(Op::Release { id: arg() }),
                _ if op.parse::<usize>().is_ok() => None,
                _ => panic!("unknown trace line: {:?}", line),
            }
        })
        .collect()
}

fn fill_byte(id: usize) -> u8 {
    (id as u8).wrapping_mul(31).wrapping_add(7)
}

fn replay(ops: &[Op], config: Config) -> HeapStats {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut pool = vec![MaybeUninit::uninit(); 16 << 20];
    let mut heap =
        SegFit::initialize(SliceSource::new(&mut pool), LiveRanges::default(), config).unwrap();
    let mut live: BTreeMap<usize, (NonNull<u8>, usize)> = BTreeMap::new();

    for (step, &op) in ops.iter().enumerate() {
        log::trace!("{}: {:?}", step, op);
        match op {
            Op::Acquire { id, size } => {
                let ptr = heap.acquire(size);
                if size == 0 {
                    assert_eq!(ptr, None);
                    continue;
                }
                let ptr = ptr.unwrap_or_else(|| panic!("{}: {:?} failed", step, op));

                let addr = ptr.as_ptr() as usize;
                assert_eq!(addr % segfit::ALIGNMENT, 0);
                assert!(addr >= heap.source().low() as usize);
                assert!(addr + size <= heap.source().high() as usize);

                heap.tracker_mut().insert(ptr, size);
                unsafe { ptr.as_ptr().write_bytes(fill_byte(id), size) };
                assert!(live.insert(id, (ptr, size)).is_none());
            }
            Op::Release { id } => {
                let Some((ptr, size)) = live.remove(&id) else {
                    // Released a zero-size allocation
                    continue;
                };
                let payload = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
                assert!(
                    payload.iter().all(|&b| b == fill_byte(id)),
                    "{}: payload of {} was overwritten",
                    step,
                    id
                );
                unsafe { heap.release(Some(ptr)) };
            }
        }

        if let Err(violation) = heap.check() {
            panic!("{}: {}", step, violation);
        }
    }

    assert_eq!(heap.tracker().ranges.len(), live.len());
    heap.check().unwrap()
}

fn replay_all_placements(ops: &[Op]) {
    for placement in [Placement::Low, Placement::High, Placement::HighFrom(100)] {
        let stats = replay(ops, Config::DEFAULT.with_placement(placement));
        log::debug!("{:?}: {:?}", placement, stats);
    }
}

const SHORT: &str = "
20000
2
4
1
a 0 2040
a 1 2040
f 1
f 0
";

const COALESCING: &str = "
14401
7
12
1
a 0 4095
a 1 4095
a 2 4095
f 1
a 3 8190
f 0
a 4 12285
f 2
a 5 4095
f 3
f 4
f 5
";

#[test]
fn short_trace() {
    let ops = parse(SHORT);
    assert_eq!(ops.len(), 4);

    let stats = replay(&ops, Config::DEFAULT);
    assert_eq!(stats.used_blocks, 0);
    assert_eq!(stats.free_blocks, 1);
}

#[test]
fn coalescing_trace() {
    replay_all_placements(&parse(COALESCING));
}

/// Alternate small and large allocations, then free the large ones and
/// allocate even larger blocks. Stresses the placement policy.
#[test]
fn binary_trace() {
    let mut ops = Vec::new();
    for i in 0..400 {
        ops.push(Op::Acquire { id: i * 2, size: 64 });
        ops.push(Op::Acquire {
            id: i * 2 + 1,
            size: 448,
        });
    }
    for i in 0..400 {
        ops.push(Op::Release { id: i * 2 + 1 });
    }
    for i in 0..400 {
        ops.push(Op::Acquire {
            id: 1000 + i,
            size: 512,
        });
    }
    for i in 0..400 {
        ops.push(Op::Release { id: i * 2 });
        ops.push(Op::Release { id: 1000 + i });
    }

    for placement in [Placement::Low, Placement::High, Placement::HighFrom(100)] {
        let stats = replay(&ops, Config::DEFAULT.with_placement(placement));
        assert_eq!(stats.used_blocks, 0);
        assert_eq!(stats.free_blocks, 1);
    }
}

/// A pseudo-random trace with a bounded number of live allocations.
#[test]
fn random_trace() {
    struct Xorshift32(u32);

    impl Xorshift32 {
        fn next(&mut self) -> u32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 17;
            self.0 ^= self.0 << 5;
            self.0
        }
    }

    let mut rng = Xorshift32(0x12345678);
    let mut ops = Vec::new();
    let mut live = Vec::new();
    for id in 0..3000 {
        if live.len() >= 200 || (!live.is_empty() && rng.next() % 3 == 0) {
            let i = rng.next() as usize % live.len();
            ops.push(Op::Release {
                id: live.swap_remove(i),
            });
        }

        let size = match rng.next() % 8 {
            0 => 0,
            1..=5 => rng.next() as usize % 128 + 1,
            6 => rng.next() as usize % 4096 + 1,
            _ => rng.next() as usize % 32768 + 1,
        };
        ops.push(Op::Acquire { id, size });
        live.push(id);
    }
    for id in live {
        ops.push(Op::Release { id });
    }

    replay_all_placements(&ops);
}

#[test]
#[should_panic(expected = "unknown trace line")]
fn parse_rejects_unknown_ops() {
    parse("r 0 100");
}
