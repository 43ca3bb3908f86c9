//! # Map Behavior Tests
//!
//! End-to-end coverage of the map contract over a real mapped file:
//!
//! 1. The associative laws: put/get, overwrite, put_if_absent, remove,
//!    remove_if, replace, replace_if.
//! 2. Collision handling with contrived equal fingerprints.
//! 3. Block boundaries: entries of exactly one block, one byte over, the
//!    oversize maximum, and past it.
//! 4. In-place extension vs relocation when a value grows, with listener
//!    events observed.
//! 5. Segment exhaustion and reuse after removal.
//! 6. Iteration: exact round-trip, removal through the iterator, the
//!    removal fallback after a concurrent-style removal.
//! 7. acquire/default-value/factory semantics.
//! 8. `check_consistency` after a deterministic mutation storm.

use std::sync::{Arc, Mutex};

use eyre::Result;
use tempfile::tempdir;

use shardmap::{
    Alignment, KeyCodec, MapListener, ShardMap, StringCodec, ValueFactory,
};

/// u64 keys hashed by identity, so tests can place keys into chosen
/// segments and force fingerprint collisions.
#[derive(Clone, Copy)]
struct SeqKeys;

impl KeyCodec for SeqKeys {
    type Key = u64;

    fn hash(&self, key: &u64) -> u64 {
        *key
    }

    fn encoded_size(&self, _key: &u64) -> u64 {
        8
    }

    fn write(&self, key: &u64, buf: &mut [u8]) {
        buf.copy_from_slice(&key.to_le_bytes());
    }

    fn read(&self, buf: &[u8]) -> Result<u64> {
        Ok(u64::from_le_bytes(buf.try_into()?))
    }

    fn matches(&self, buf: &[u8], key: &u64) -> bool {
        buf == key.to_le_bytes().as_slice()
    }
}

#[derive(Debug, PartialEq)]
enum Event {
    Put { key: String, added: bool },
    Get { key: String },
    Remove { key: String },
    Relocation { segment: usize, pos: u32 },
}

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<Event>>,
}

impl MapListener<String, String> for RecordingListener {
    fn on_put(&self, key: &String, _value: &String, _segment: usize, _pos: u32, added: bool) {
        self.events.lock().unwrap().push(Event::Put {
            key: key.clone(),
            added,
        });
    }

    fn on_get(&self, key: &String, _value: &String) {
        self.events.lock().unwrap().push(Event::Get { key: key.clone() });
    }

    fn on_remove(&self, key: &String, _value: Option<&String>, _segment: usize, _pos: u32) {
        self.events.lock().unwrap().push(Event::Remove { key: key.clone() });
    }

    fn on_relocation(&self, segment: usize, pos: u32) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Relocation { segment, pos });
    }
}

fn string_map(dir: &tempfile::TempDir) -> ShardMap<StringCodec, StringCodec> {
    ShardMap::builder(StringCodec, StringCodec)
        .segments(1)
        .entries_per_segment(8)
        .entry_size(64)
        .create(dir.path().join("test.map"))
        .unwrap()
}

mod basic_contract {
    use super::*;

    #[test]
    fn put_get_remove_and_iterate() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);

        assert_eq!(map.put(&"a".into(), &"1".into()).unwrap(), None);
        assert_eq!(map.put(&"b".into(), &"2".into()).unwrap(), None);
        assert_eq!(map.get(&"a".into()).unwrap(), Some("1".into()));
        assert_eq!(map.size(), 2);

        assert_eq!(map.remove(&"a".into()).unwrap(), Some("1".into()));
        assert_eq!(map.size(), 1);

        let remaining: Vec<_> = map.entries().map(|e| e.unwrap()).collect();
        assert_eq!(remaining, vec![("b".to_owned(), "2".to_owned())]);
    }

    #[test]
    fn overwrite_returns_previous_and_keeps_latest() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);

        map.put(&"k".into(), &"v1".into()).unwrap();
        let previous = map.put(&"k".into(), &"v2".into()).unwrap();

        assert_eq!(previous, Some("v1".into()));
        assert_eq!(map.get(&"k".into()).unwrap(), Some("v2".into()));
        assert_eq!(map.size(), 1);
    }

    #[test]
    fn put_if_absent_first_writer_wins() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);

        assert_eq!(map.put_if_absent(&"k".into(), &"v1".into()).unwrap(), None);
        assert_eq!(
            map.put_if_absent(&"k".into(), &"v2".into()).unwrap(),
            Some("v1".into())
        );
        assert_eq!(map.get(&"k".into()).unwrap(), Some("v1".into()));
    }

    #[test]
    fn get_of_absent_key_is_none() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);

        assert_eq!(map.get(&"ghost".into()).unwrap(), None);
        assert!(!map.contains_key(&"ghost".into()).unwrap());
    }

    #[test]
    fn remove_then_get_is_none() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);
        map.put(&"k".into(), &"v".into()).unwrap();

        map.remove(&"k".into()).unwrap();

        assert_eq!(map.get(&"k".into()).unwrap(), None);
        assert!(!map.contains_key(&"k".into()).unwrap());
    }

    #[test]
    fn remove_if_requires_exact_value() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);
        map.put(&"k".into(), &"v".into()).unwrap();

        assert!(!map.remove_if(&"k".into(), &"other".into()).unwrap());
        assert_eq!(map.get(&"k".into()).unwrap(), Some("v".into()));

        assert!(map.remove_if(&"k".into(), &"v".into()).unwrap());
        assert_eq!(map.get(&"k".into()).unwrap(), None);
    }

    #[test]
    fn replace_is_none_iff_key_absent() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);

        assert_eq!(map.replace(&"k".into(), &"v".into()).unwrap(), None);
        assert_eq!(map.get(&"k".into()).unwrap(), None);

        map.put(&"k".into(), &"v".into()).unwrap();
        assert_eq!(
            map.replace(&"k".into(), &"w".into()).unwrap(),
            Some("v".into())
        );
        assert_eq!(map.get(&"k".into()).unwrap(), Some("w".into()));
    }

    #[test]
    fn conditional_replace_failure_leaves_value() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);
        map.put(&"k".into(), &"v".into()).unwrap();

        assert!(!map.replace_if(&"k".into(), &"x".into(), &"y".into()).unwrap());
        assert_eq!(map.get(&"k".into()).unwrap(), Some("v".into()));

        assert!(map.replace_if(&"k".into(), &"v".into(), &"y".into()).unwrap());
        assert_eq!(map.get(&"k".into()).unwrap(), Some("y".into()));
    }

    #[test]
    fn clear_empties_every_segment() {
        let dir = tempdir().unwrap();
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(4)
            .entries_per_segment(16)
            .entry_size(64)
            .create(dir.path().join("test.map"))
            .unwrap();
        for i in 0..20 {
            map.put(&format!("key{}", i), &"v".into()).unwrap();
        }

        map.clear();

        assert_eq!(map.long_size(), 0);
        assert!(map.is_empty());
        assert_eq!(map.get(&"key0".into()).unwrap(), None);
        assert_eq!(map.entries().count(), 0);
        map.check_consistency().unwrap();
    }

    #[test]
    fn configured_null_returns_skip_value_reads() {
        let dir = tempdir().unwrap();
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(1)
            .entries_per_segment(8)
            .entry_size(64)
            .put_returns_value(false)
            .remove_returns_value(false)
            .create(dir.path().join("test.map"))
            .unwrap();
        map.put(&"k".into(), &"v1".into()).unwrap();

        assert_eq!(map.put(&"k".into(), &"v2".into()).unwrap(), None);
        assert_eq!(map.get(&"k".into()).unwrap(), Some("v2".into()));
        assert_eq!(map.remove(&"k".into()).unwrap(), None);
        assert!(!map.contains_key(&"k".into()).unwrap());
    }
}

mod collisions {
    use super::*;

    #[test]
    fn equal_fingerprints_resolve_by_key() {
        let dir = tempdir().unwrap();
        // One segment: fingerprint = hash & 0xFFFF, so these keys collide.
        let map = ShardMap::builder(SeqKeys, StringCodec)
            .segments(1)
            .entries_per_segment(8)
            .entry_size(64)
            .create(dir.path().join("test.map"))
            .unwrap();
        let k1 = 1u64;
        let k2 = 0x1_0001u64;

        map.put(&k1, &"v1".into()).unwrap();
        map.put(&k2, &"v2".into()).unwrap();

        assert_eq!(map.get(&k1).unwrap(), Some("v1".into()));
        assert_eq!(map.get(&k2).unwrap(), Some("v2".into()));

        map.remove(&k1).unwrap();

        assert_eq!(map.get(&k1).unwrap(), None);
        assert_eq!(map.get(&k2).unwrap(), Some("v2".into()));
        map.check_consistency().unwrap();
    }

    #[test]
    fn many_colliding_keys_walk_the_chain() {
        let dir = tempdir().unwrap();
        let map = ShardMap::builder(SeqKeys, StringCodec)
            .segments(1)
            .entries_per_segment(16)
            .entry_size(64)
            .create(dir.path().join("test.map"))
            .unwrap();
        // All share fingerprint 7.
        let keys: Vec<u64> = (0..5).map(|i| 7 + (i << 16)).collect();

        for (i, key) in keys.iter().enumerate() {
            map.put(key, &format!("v{}", i)).unwrap();
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(map.get(key).unwrap(), Some(format!("v{}", i)));
        }

        // Remove from the middle of the chain and re-verify.
        map.remove(&keys[2]).unwrap();
        assert_eq!(map.get(&keys[2]).unwrap(), None);
        for (i, key) in keys.iter().enumerate() {
            if i != 2 {
                assert_eq!(map.get(key).unwrap(), Some(format!("v{}", i)));
            }
        }
        map.check_consistency().unwrap();
    }
}

mod block_boundaries {
    use super::*;

    /// Entry bytes for StringCodec with varint prefixes and no metadata:
    /// key_len_prefix(1) + key + value_len_prefix(1) + value.
    fn value_filling_blocks(key: &str, blocks: usize, entry_size: usize) -> String {
        "x".repeat(blocks * entry_size - key.len() - 2)
    }

    #[test]
    fn exactly_one_block_fills_the_segment_densely() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir); // 1 segment, 8 entries, 64-byte blocks

        for i in 0..8 {
            let key = format!("k{}", i);
            let value = value_filling_blocks(&key, 1, 64);
            map.put(&key, &value).unwrap();
        }

        assert_eq!(map.size(), 8);
        assert!(map.put(&"k8".into(), &"v".into()).is_err());
        map.check_consistency().unwrap();
    }

    #[test]
    fn one_byte_over_a_block_takes_two() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);

        for i in 0..4 {
            let key = format!("k{}", i);
            let mut value = value_filling_blocks(&key, 1, 64);
            value.push('y'); // 65 bytes of entry: two blocks
            map.put(&key, &value).unwrap();
        }

        assert_eq!(map.size(), 4);
        assert!(map.put(&"k4".into(), &"v".into()).is_err());
        map.check_consistency().unwrap();
    }

    #[test]
    fn maximum_oversize_entry_allocates_and_frees() {
        let dir = tempdir().unwrap();
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(1)
            .entries_per_segment(128)
            .entry_size(64)
            .create(dir.path().join("test.map"))
            .unwrap();
        // 64 blocks * 64 bytes = 4096 total; 1 (key prefix) + 1 (key)
        // + 2 (value prefix) leaves 4092 value bytes.
        let value = "z".repeat(4092);

        map.put(&"K".into(), &value).unwrap();

        assert_eq!(map.get(&"K".into()).unwrap(), Some(value));
        map.check_consistency().unwrap();

        map.remove(&"K".into()).unwrap();

        assert_eq!(map.size(), 0);
        map.check_consistency().unwrap();
        // The freed run is reusable.
        map.put(&"K".into(), &"z".repeat(4092)).unwrap();
        map.check_consistency().unwrap();
    }

    #[test]
    fn entry_past_the_oversize_cap_is_rejected() {
        let dir = tempdir().unwrap();
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(1)
            .entries_per_segment(128)
            .entry_size(64)
            .create(dir.path().join("test.map"))
            .unwrap();
        let value = "z".repeat(4093); // 65 blocks

        assert!(map.put(&"K".into(), &value).is_err());
        assert_eq!(map.size(), 0);
        map.check_consistency().unwrap();
    }

    #[test]
    fn growing_value_past_the_cap_fails_and_keeps_the_entry() {
        let dir = tempdir().unwrap();
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(1)
            .entries_per_segment(128)
            .entry_size(64)
            .create(dir.path().join("test.map"))
            .unwrap();
        map.put(&"K".into(), &"small".into()).unwrap();

        let result = map.put(&"K".into(), &"z".repeat(4093));

        assert!(result.is_err());
        assert_eq!(map.get(&"K".into()).unwrap(), Some("small".into()));
        map.check_consistency().unwrap();
    }

    #[test]
    fn segment_full_surfaces_and_removal_recovers() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);
        for i in 0..8 {
            map.put(&format!("k{}", i), &"v".into()).unwrap();
        }

        let err = map.put(&"k8".into(), &"v".into()).unwrap_err();
        assert!(err.to_string().contains("full"), "unexpected error: {err}");

        map.remove(&"k3".into()).unwrap();
        map.put(&"k8".into(), &"v".into()).unwrap();
        assert_eq!(map.size(), 8);
        map.check_consistency().unwrap();
    }
}

mod value_growth {
    use super::*;

    #[test]
    fn relocation_fires_listener_and_iterates_once() {
        let dir = tempdir().unwrap();
        let listener = Arc::new(RecordingListener::default());
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(1)
            .entries_per_segment(16)
            .entry_size(16)
            .listener(Arc::clone(&listener))
            .create(dir.path().join("test.map"))
            .unwrap();

        map.put(&"k".into(), &"short".into()).unwrap();
        // Occupy the block directly after "k".
        map.put(&"n".into(), &"x".into()).unwrap();

        let grown = "a_very_long_value_exceeding_one_block".to_owned();
        map.put(&"k".into(), &grown).unwrap();

        let events = listener.events.lock().unwrap();
        assert!(
            events.iter().any(|e| matches!(e, Event::Relocation { segment: 0, pos: 0 })),
            "no relocation event in {:?}",
            *events
        );
        drop(events);

        let yielded: Vec<_> = map
            .entries()
            .map(|e| e.unwrap())
            .filter(|(k, _)| k == "k")
            .collect();
        assert_eq!(yielded, vec![("k".to_owned(), grown.clone())]);
        assert_eq!(map.get(&"k".into()).unwrap(), Some(grown));
        assert_eq!(map.get(&"n".into()).unwrap(), Some("x".into()));
        map.check_consistency().unwrap();
    }

    #[test]
    fn failed_relocation_fires_no_event_and_keeps_the_entry() {
        let dir = tempdir().unwrap();
        let listener = Arc::new(RecordingListener::default());
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(1)
            .entries_per_segment(8)
            .entry_size(16)
            .listener(Arc::clone(&listener))
            .create(dir.path().join("test.map"))
            .unwrap();
        map.put(&"k".into(), &"sho".into()).unwrap();
        // Fill every remaining block, so growing "k" can neither extend in
        // place nor find a new run after releasing its own block.
        for i in 0..7 {
            map.put(&format!("n{}", i), &"x".into()).unwrap();
        }

        let result = map.put(&"k".into(), &"a_value_needing_three_blocks_now".into());

        assert!(result.is_err());
        let events = listener.events.lock().unwrap();
        assert!(
            !events.iter().any(|e| matches!(e, Event::Relocation { .. })),
            "relocation event fired for a move that never happened: {:?}",
            *events
        );
        drop(events);
        assert_eq!(map.get(&"k".into()).unwrap(), Some("sho".into()));
        for i in 0..7 {
            assert_eq!(map.get(&format!("n{}", i)).unwrap(), Some("x".into()));
        }
        assert_eq!(map.long_size(), 8);
        map.check_consistency().unwrap();
    }

    #[test]
    fn repeated_growth_walks_the_block_ladder() {
        let dir = tempdir().unwrap();
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(1)
            .entries_per_segment(64)
            .entry_size(16)
            .create(dir.path().join("test.map"))
            .unwrap();

        let mut value = String::new();
        for step in 1..=12 {
            value = "g".repeat(step * 13);
            map.put(&"k".into(), &value).unwrap();
            assert_eq!(map.get(&"k".into()).unwrap(), Some(value.clone()));
            map.check_consistency().unwrap();
        }
        assert_eq!(map.size(), 1);

        // Shrink back to tiny and grow again; freed tails must be reusable.
        map.put(&"k".into(), &"t".into()).unwrap();
        map.put(&"k".into(), &value).unwrap();
        assert_eq!(map.get(&"k".into()).unwrap(), Some(value));
        map.check_consistency().unwrap();
    }
}

mod iteration {
    use super::*;

    #[test]
    fn iterator_yields_each_live_entry_exactly_once() {
        let dir = tempdir().unwrap();
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(4)
            .entries_per_segment(32)
            .entry_size(64)
            .create(dir.path().join("test.map"))
            .unwrap();
        let mut expected = Vec::new();
        for i in 0..50 {
            let key = format!("key{:02}", i);
            let value = format!("value{:02}", i);
            map.put(&key, &value).unwrap();
            expected.push((key, value));
        }

        let mut yielded: Vec<_> = map.entries().map(|e| e.unwrap()).collect();
        yielded.sort();
        expected.sort();

        assert_eq!(yielded, expected);
    }

    #[test]
    fn iterator_remove_deletes_the_yielded_entry() {
        let dir = tempdir().unwrap();
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(2)
            .entries_per_segment(16)
            .entry_size(64)
            .create(dir.path().join("test.map"))
            .unwrap();
        for i in 0..10 {
            map.put(&format!("key{}", i), &"v".into()).unwrap();
        }

        let mut entries = map.entries();
        let mut removed = Vec::new();
        while let Some((key, _)) = entries.next_entry().unwrap() {
            if key.ends_with('3') || key.ends_with('7') {
                entries.remove_returned().unwrap();
                removed.push(key);
            }
        }

        assert_eq!(removed.len(), 2);
        assert_eq!(map.long_size(), 8);
        for key in removed {
            assert_eq!(map.get(&key).unwrap(), None);
        }
        map.check_consistency().unwrap();
    }

    #[test]
    fn iterator_remove_falls_back_when_position_emptied() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);
        map.put(&"k".into(), &"v".into()).unwrap();

        let mut entries = map.entries();
        let (key, _) = entries.next_entry().unwrap().unwrap();
        // Simulate a concurrent removal between next and remove.
        map.remove(&key).unwrap();

        entries.remove_returned().unwrap();

        assert_eq!(map.long_size(), 0);
        map.check_consistency().unwrap();
    }

    #[test]
    fn remove_returned_before_next_is_an_error() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);
        map.put(&"k".into(), &"v".into()).unwrap();

        let mut entries = map.entries();

        assert!(entries.remove_returned().is_err());
    }

    #[test]
    fn iterator_skips_entries_removed_mid_walk() {
        let dir = tempdir().unwrap();
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(1)
            .entries_per_segment(16)
            .entry_size(64)
            .create(dir.path().join("test.map"))
            .unwrap();
        for i in 0..6 {
            map.put(&format!("key{}", i), &"v".into()).unwrap();
        }

        let mut entries = map.entries();
        let (first, _) = entries.next_entry().unwrap().unwrap();
        // Remove everything else out from under the iterator.
        for i in 0..6 {
            let key = format!("key{}", i);
            if key != first {
                map.remove(&key).unwrap();
            }
        }

        assert!(entries.next_entry().unwrap().is_none());
    }
}

mod acquire_semantics {
    use super::*;

    struct SuffixProvider;

    impl shardmap::DefaultValueProvider<String, String> for SuffixProvider {
        fn get(&self, key: &String, _reuse: Option<String>) -> Option<String> {
            key.starts_with("known").then(|| format!("{}-default", key))
        }
    }

    struct EmptyStringFactory;

    impl ValueFactory<String> for EmptyStringFactory {
        fn create(&self) -> Option<String> {
            Some(String::new())
        }
    }

    #[test]
    fn get_using_reuses_the_buffer() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);
        map.put(&"k".into(), &"v".into()).unwrap();

        let value = map.get_using(&"k".into(), String::with_capacity(64)).unwrap();

        assert_eq!(value, Some("v".into()));
    }

    #[test]
    fn acquire_with_using_value_inserts_it() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);

        let value = map.acquire_using(&"k".into(), Some("seed".into())).unwrap();

        assert_eq!(value, "seed");
        assert_eq!(map.get(&"k".into()).unwrap(), Some("seed".into()));
        assert_eq!(map.size(), 1);
    }

    #[test]
    fn acquire_of_present_key_reads_not_inserts() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);
        map.put(&"k".into(), &"stored".into()).unwrap();

        let value = map.acquire_using(&"k".into(), Some("ignored".into())).unwrap();

        assert_eq!(value, "stored");
        assert_eq!(map.size(), 1);
    }

    #[test]
    fn acquire_without_value_or_factory_is_illegal() {
        let dir = tempdir().unwrap();
        let map = string_map(&dir);

        let result = map.acquire_using(&"k".into(), None);

        assert!(result.is_err());
        assert_eq!(map.size(), 0);
    }

    #[test]
    fn acquire_uses_the_factory_when_no_value_given() {
        let dir = tempdir().unwrap();
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(1)
            .entries_per_segment(8)
            .entry_size(64)
            .value_factory(EmptyStringFactory)
            .create(dir.path().join("test.map"))
            .unwrap();

        let value = map.acquire_using(&"k".into(), None).unwrap();

        assert_eq!(value, "");
        assert_eq!(map.get(&"k".into()).unwrap(), Some("".into()));
    }

    #[test]
    fn default_value_provider_fills_misses_on_get() {
        let dir = tempdir().unwrap();
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(1)
            .entries_per_segment(8)
            .entry_size(64)
            .default_value_provider(SuffixProvider)
            .create(dir.path().join("test.map"))
            .unwrap();

        // Provider declines: stays absent.
        assert_eq!(map.get(&"other".into()).unwrap(), None);
        assert_eq!(map.size(), 0);

        // Provider supplies: inserted and returned.
        let value = map.get(&"known1".into()).unwrap();
        assert_eq!(value, Some("known1-default".into()));
        assert_eq!(map.size(), 1);
        assert_eq!(map.get(&"known1".into()).unwrap(), Some("known1-default".into()));
    }
}

mod listener_events {
    use super::*;

    #[test]
    fn mutations_notify_in_order() {
        let dir = tempdir().unwrap();
        let listener = Arc::new(RecordingListener::default());
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(1)
            .entries_per_segment(8)
            .entry_size(64)
            .listener(Arc::clone(&listener))
            .create(dir.path().join("test.map"))
            .unwrap();

        map.put(&"k".into(), &"v1".into()).unwrap();
        map.put(&"k".into(), &"v2".into()).unwrap();
        map.get(&"k".into()).unwrap();
        map.remove(&"k".into()).unwrap();

        let events = listener.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                Event::Put { key: "k".into(), added: true },
                Event::Put { key: "k".into(), added: false },
                Event::Get { key: "k".into() },
                Event::Remove { key: "k".into() },
            ]
        );
    }
}

mod consistency {
    use super::*;

    #[test]
    fn mutation_storm_preserves_the_joint_invariant() {
        let dir = tempdir().unwrap();
        let map = ShardMap::builder(StringCodec, StringCodec)
            .segments(2)
            .entries_per_segment(32)
            .entry_size(32)
            .alignment(Alignment::Four)
            .create(dir.path().join("test.map"))
            .unwrap();

        // Deterministic pseudo-random op mix.
        let mut state = 0x2545_F491_4F6C_DD1Du64;
        let mut step = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (state >> 33) as usize
        };

        for round in 0..2000 {
            let key = format!("key{}", step() % 24);
            match step() % 5 {
                0 | 1 => {
                    let value = "v".repeat(step() % 70);
                    let _ = map.put(&key, &value);
                }
                2 => {
                    let _ = map.remove(&key);
                }
                3 => {
                    let value = "w".repeat(step() % 40);
                    let _ = map.replace(&key, &value);
                }
                _ => {
                    let _ = map.get(&key);
                }
            }
            if round % 250 == 0 {
                map.check_consistency().unwrap();
            }
        }

        map.check_consistency().unwrap();
        let iterated = map.entries().count() as u64;
        assert_eq!(iterated, map.long_size());
    }
}
