//! # Concurrency Tests
//!
//! The map is shared by reference across threads; every operation
//! serializes on the owning segment's in-file spin-lock, and operations on
//! different segments proceed independently. These tests cover:
//!
//! 1. Parallel writers over disjoint key ranges: all entries land, the
//!    global count is exact once writers quiesce.
//! 2. Contended mutation of a small key set: the joint invariant holds
//!    under interleaving.
//! 3. Iteration concurrent with removal: the iterator never errors and
//!    yields only entries that were live at some point during the walk.

use tempfile::tempdir;

use shardmap::{ShardMap, StringCodec};

#[test]
fn parallel_writers_over_disjoint_keys() {
    let dir = tempdir().unwrap();
    let map = ShardMap::builder(StringCodec, StringCodec)
        .segments(16)
        .entries_per_segment(4096)
        .entry_size(64)
        .create(dir.path().join("test.map"))
        .unwrap();

    std::thread::scope(|scope| {
        for prefix in ["a", "b"] {
            let map = &map;
            scope.spawn(move || {
                for i in 0..10_000 {
                    map.put(&format!("{}:{}", prefix, i), &format!("v{}", i))
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(map.long_size(), 20_000);
    for i in (0..10_000).step_by(997) {
        assert_eq!(map.get(&format!("a:{}", i)).unwrap(), Some(format!("v{}", i)));
        assert_eq!(map.get(&format!("b:{}", i)).unwrap(), Some(format!("v{}", i)));
    }
    map.check_consistency().unwrap();
}

#[test]
fn contended_churn_preserves_the_invariant() {
    let dir = tempdir().unwrap();
    let map = ShardMap::builder(StringCodec, StringCodec)
        .segments(2)
        .entries_per_segment(64)
        .entry_size(32)
        .create(dir.path().join("test.map"))
        .unwrap();

    std::thread::scope(|scope| {
        for thread in 0..4 {
            let map = &map;
            scope.spawn(move || {
                let key = format!("slot{}", thread % 2);
                for i in 0..2_000 {
                    let value = "v".repeat(i % 50);
                    map.put(&key, &value).unwrap();
                    if i % 3 == 0 {
                        let _ = map.remove(&key);
                    }
                }
            });
        }
    });

    map.check_consistency().unwrap();
    assert!(map.long_size() <= 2);
    assert_eq!(map.entries().count() as u64, map.long_size());
}

#[test]
fn iteration_races_with_removal() {
    let dir = tempdir().unwrap();
    let map = ShardMap::builder(StringCodec, StringCodec)
        .segments(4)
        .entries_per_segment(256)
        .entry_size(64)
        .create(dir.path().join("test.map"))
        .unwrap();
    for i in 0..500 {
        map.put(&format!("key{:03}", i), &"v".into()).unwrap();
    }

    std::thread::scope(|scope| {
        let remover = {
            let map = &map;
            scope.spawn(move || {
                for i in (0..500).step_by(2) {
                    map.remove(&format!("key{:03}", i)).unwrap();
                }
            })
        };

        let map = &map;
        let walker = scope.spawn(move || {
            let mut seen = 0usize;
            for entry in map.entries() {
                entry.unwrap();
                seen += 1;
            }
            seen
        });

        let seen = walker.join().unwrap();
        remover.join().unwrap();
        // Every odd key stays live through the walk; evens may or may not
        // be seen depending on interleaving.
        assert!((250..=500).contains(&seen), "saw {} entries", seen);
    });

    assert_eq!(map.long_size(), 250);
    map.check_consistency().unwrap();
}

#[test]
fn writers_on_the_same_segment_serialize() {
    let dir = tempdir().unwrap();
    // One segment: every operation contends on one lock.
    let map = ShardMap::builder(StringCodec, StringCodec)
        .segments(1)
        .entries_per_segment(1024)
        .entry_size(64)
        .create(dir.path().join("test.map"))
        .unwrap();

    std::thread::scope(|scope| {
        for thread in 0..8 {
            let map = &map;
            scope.spawn(move || {
                for i in 0..250 {
                    map.put(&format!("t{}:{}", thread, i), &"v".into()).unwrap();
                }
            });
        }
    });

    assert_eq!(map.long_size(), 8 * 250);
    map.check_consistency().unwrap();
}
