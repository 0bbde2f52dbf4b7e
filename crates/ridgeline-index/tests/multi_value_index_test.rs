//! End-to-end tests for the multi-value index engine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ridgeline_cache::{AtomicOperationManager, PageCache, PageCacheConfig};
use ridgeline_common::key::{
    CompositeKey, CompositeKeySerializer, Encryption, KeySerializer,
};
use ridgeline_common::{RecordId, RidgelineError, StorageConfig};
use ridgeline_index::{MultiValueIndex, MultiValueIndexConfig, UniqueIndex};
use ridgeline_wal::{ComponentOperation, WalReader, WalWriter, WalWriterConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

fn storage_config(dir: &Path) -> StorageConfig {
    StorageConfig {
        data_dir: dir.join("data"),
        wal_dir: dir.join("wal"),
        cache_frames: 4096,
        fsync_enabled: false,
        ..Default::default()
    }
}

fn manager(dir: &Path) -> Arc<AtomicOperationManager> {
    let config = storage_config(dir);
    let cache = Arc::new(
        PageCache::new(
            &config.data_dir,
            PageCacheConfig {
                frames: config.cache_frames,
                fsync_enabled: config.fsync_enabled,
            },
        )
        .unwrap(),
    );
    let wal = Arc::new(
        WalWriter::new(WalWriterConfig {
            wal_dir: config.wal_dir.clone(),
            segment_size: config.wal_segment_size,
            fsync_enabled: config.fsync_enabled,
        })
        .unwrap(),
    );
    Arc::new(AtomicOperationManager::new(cache, wal))
}

fn new_index(manager: &Arc<AtomicOperationManager>, name: &str) -> MultiValueIndex {
    MultiValueIndex::create(
        Arc::clone(manager),
        name,
        1,
        Arc::new(CompositeKeySerializer),
        None,
        MultiValueIndexConfig::from_storage(&StorageConfig::default(), 1),
    )
    .unwrap()
}

fn key(value: i64) -> CompositeKey {
    CompositeKey::from(value)
}

fn skey(value: &str) -> CompositeKey {
    CompositeKey::from(value)
}

fn rid(cluster: i16, position: i64) -> RecordId {
    RecordId::new(cluster, position)
}

#[test]
fn empty_index_behaviour() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "empty");

    assert_eq!(index.size().unwrap(), 0);
    assert!(index.get(Some(&key(42))).unwrap().is_empty());
    assert!(index.get(None).unwrap().is_empty());
    assert!(index.first_key().unwrap().is_none());
    assert!(index.last_key().unwrap().is_none());
    assert!(index.remove(Some(&key(42)), rid(1, 1)).unwrap() == false);

    index.delete().unwrap();
}

#[test]
fn put_then_get_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "basic");

    index.put(Some(&skey("x")), rid(1, 100)).unwrap();
    index.put(Some(&skey("x")), rid(1, 101)).unwrap();
    index.put(Some(&skey("y")), rid(1, 200)).unwrap();

    let mut x_values = index.get(Some(&skey("x"))).unwrap();
    x_values.sort();
    assert_eq!(x_values, vec![rid(1, 100), rid(1, 101)]);
    assert_eq!(index.get(Some(&skey("y"))).unwrap(), vec![rid(1, 200)]);
    assert_eq!(index.size().unwrap(), 3);
}

#[test]
fn duplicate_put_is_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "dedup");

    index.put(Some(&skey("x")), rid(1, 100)).unwrap();
    index.put(Some(&skey("x")), rid(1, 101)).unwrap();
    index.put(Some(&skey("x")), rid(1, 100)).unwrap();

    let values: BTreeSet<RecordId> = index.get(Some(&skey("x"))).unwrap().into_iter().collect();
    assert_eq!(
        values,
        BTreeSet::from([rid(1, 100), rid(1, 101)])
    );
    assert_eq!(index.size().unwrap(), 2);
}

#[test]
fn ascending_bulk_insert_scan_and_remove() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "bulk");

    for value in 0..10_000i64 {
        index.put(Some(&key(value)), rid(1, value)).unwrap();
    }

    assert_eq!(index.size().unwrap(), 10_000);
    assert_eq!(index.first_key().unwrap(), Some(key(0)));
    assert_eq!(index.last_key().unwrap(), Some(key(9_999)));

    let mut cursor = index.iterate_entries_between(&key(2_500), true, &key(7_500), false, true);
    let mut seen = Vec::new();
    while let Some((k, r)) = cursor.next(500).unwrap() {
        seen.push((k, r));
    }
    assert_eq!(seen.len(), 5_000);
    for (i, (k, r)) in seen.iter().enumerate() {
        assert_eq!(*k, key(2_500 + i as i64));
        assert_eq!(*r, rid(1, 2_500 + i as i64));
    }

    assert!(index.remove(Some(&key(5_000)), rid(1, 5_000)).unwrap());
    assert_eq!(index.size().unwrap(), 9_999);
    assert!(index.get(Some(&key(5_000))).unwrap().is_empty());
}

#[test]
fn null_key_bag_is_independent() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "null");

    for position in 0..1_000i64 {
        index.put(None, rid(2, position)).unwrap();
    }
    index.put(Some(&key(7)), rid(1, 7)).unwrap();

    let null_values: BTreeSet<RecordId> = index.get(None).unwrap().into_iter().collect();
    assert_eq!(null_values.len(), 1_000);
    assert_eq!(index.get(Some(&key(7))).unwrap(), vec![rid(1, 7)]);
    assert_eq!(index.size().unwrap(), 1_001);

    // Duplicate null-key put is a no-op for size accounting.
    index.put(None, rid(2, 0)).unwrap();
    assert_eq!(index.size().unwrap(), 1_001);

    // Removal works both from the inline region and from the container.
    assert!(index.remove(None, rid(2, 3)).unwrap());
    assert!(index.remove(None, rid(2, 999)).unwrap());
    assert!(!index.remove(None, rid(2, 999)).unwrap());
    assert_eq!(index.get(None).unwrap().len(), 998);
    assert_eq!(index.size().unwrap(), 999);
}

#[test]
fn same_key_spans_multiple_buckets() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "hotkey");

    for position in 0..5_000i64 {
        index.put(Some(&skey("K")), rid(3, position)).unwrap();
    }

    assert_eq!(index.size().unwrap(), 5_000);

    let values: BTreeSet<RecordId> = index.get(Some(&skey("K"))).unwrap().into_iter().collect();
    assert_eq!(values.len(), 5_000);
    for position in 0..5_000i64 {
        assert!(values.contains(&rid(3, position)), "missing rid {position}");
    }

    // The hot key is stored as many saturated entries; the key cursor sees
    // each of them, proving the key straddles buckets.
    let mut cursor = index.key_cursor().unwrap();
    let mut occurrences = 0usize;
    while let Some(k) = cursor.next(512).unwrap() {
        assert_eq!(k, skey("K"));
        occurrences += 1;
    }
    assert!(occurrences > 1, "expected several entries for the hot key");

    // Range iteration over the single key yields every pair exactly once.
    let mut cursor = index.iterate_entries_between(&skey("K"), true, &skey("K"), true, true);
    let mut emitted = BTreeSet::new();
    while let Some((k, r)) = cursor.next(700).unwrap() {
        assert_eq!(k, skey("K"));
        assert!(emitted.insert(r), "duplicate emission of {r}");
    }
    assert_eq!(emitted.len(), 5_000);

    // Removing one record id removes exactly one.
    assert!(index.remove(Some(&skey("K")), rid(3, 2_345)).unwrap());
    assert_eq!(index.size().unwrap(), 4_999);
    let values: BTreeSet<RecordId> = index.get(Some(&skey("K"))).unwrap().into_iter().collect();
    assert_eq!(values.len(), 4_999);
    assert!(!values.contains(&rid(3, 2_345)));
}

#[test]
fn put_remove_restores_state() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "restore");

    index.put(Some(&key(1)), rid(1, 1)).unwrap();
    let size_before = index.size().unwrap();
    let values_before = index.get(Some(&key(1))).unwrap();

    index.put(Some(&key(1)), rid(1, 2)).unwrap();
    assert!(index.remove(Some(&key(1)), rid(1, 2)).unwrap());

    assert_eq!(index.size().unwrap(), size_before);
    assert_eq!(index.get(Some(&key(1))).unwrap(), values_before);
}

#[test]
fn remove_of_absent_pair_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "idempotent");

    index.put(Some(&key(1)), rid(1, 1)).unwrap();

    assert!(!index.remove(Some(&key(1)), rid(1, 99)).unwrap());
    assert!(!index.remove(Some(&key(2)), rid(1, 1)).unwrap());
    assert_eq!(index.size().unwrap(), 1);
    assert_eq!(index.get(Some(&key(1))).unwrap(), vec![rid(1, 1)]);
}

#[test]
fn descending_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "desc");

    for value in 0..100i64 {
        index.put(Some(&key(value)), rid(1, value)).unwrap();
    }

    let mut cursor = index.iterate_entries_between(&key(10), true, &key(20), true, false);
    let mut seen = Vec::new();
    while let Some((k, _)) = cursor.next(4).unwrap() {
        seen.push(k);
    }
    let expected: Vec<CompositeKey> = (10..=20).rev().map(key).collect();
    assert_eq!(seen, expected);
}

#[test]
fn major_and_minor_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "bounds");

    for value in 0..50i64 {
        index.put(Some(&key(value)), rid(1, value)).unwrap();
    }

    let mut cursor = index.iterate_entries_major(&key(45), false, true);
    let mut seen = Vec::new();
    while let Some((k, _)) = cursor.next(16).unwrap() {
        seen.push(k);
    }
    assert_eq!(seen, (46..50).map(key).collect::<Vec<_>>());

    let mut cursor = index.iterate_entries_minor(&key(4), true, true);
    let mut seen = Vec::new();
    while let Some((k, _)) = cursor.next(16).unwrap() {
        seen.push(k);
    }
    assert_eq!(seen, (0..=4).map(key).collect::<Vec<_>>());

    let mut cursor = index.iterate_entries_minor(&key(4), true, false);
    let mut seen = Vec::new();
    while let Some((k, _)) = cursor.next(16).unwrap() {
        seen.push(k);
    }
    assert_eq!(seen, (0..=4).rev().map(key).collect::<Vec<_>>());
}

#[test]
fn composite_key_padding_selects_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let index = MultiValueIndex::create(
        manager(dir.path()),
        "composite",
        1,
        Arc::new(CompositeKeySerializer),
        None,
        MultiValueIndexConfig {
            key_size: 2,
            ..Default::default()
        },
    )
    .unwrap();

    for value in 0..50i64 {
        index
            .put(
                Some(&CompositeKey::new(vec!["a".into(), value.into()])),
                rid(1, value),
            )
            .unwrap();
        index
            .put(
                Some(&CompositeKey::new(vec!["b".into(), value.into()])),
                rid(2, value),
            )
            .unwrap();
    }

    let mut cursor = index.iterate_entries_between(&skey("a"), true, &skey("a"), true, true);
    let mut seen = Vec::new();
    while let Some((k, r)) = cursor.next(64).unwrap() {
        assert_eq!(k.items()[0], "a".into());
        seen.push(r);
    }
    assert_eq!(seen.len(), 50);

    assert_eq!(
        index.first_key().unwrap(),
        Some(CompositeKey::new(vec!["a".into(), 0i64.into()]))
    );
    assert_eq!(
        index.last_key().unwrap(),
        Some(CompositeKey::new(vec!["b".into(), 49i64.into()]))
    );
}

#[test]
fn random_mix_matches_model() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "random");
    let mut model: BTreeMap<i64, BTreeSet<RecordId>> = BTreeMap::new();
    let mut rng = StdRng::seed_from_u64(0x5EED);

    for _ in 0..3_000 {
        let k = rng.gen_range(0..200i64);
        let r = rid(1, rng.gen_range(0..40i64));

        if rng.gen_bool(0.7) {
            // Only fresh pairs go in; duplicate-put behavior has its own
            // dedicated coverage.
            if model.entry(k).or_default().insert(r) {
                index.put(Some(&key(k)), r).unwrap();
            }
        } else {
            let expected = model
                .get_mut(&k)
                .map(|set| set.remove(&r))
                .unwrap_or(false);
            let removed = index.remove(Some(&key(k)), r).unwrap();
            assert_eq!(removed, expected, "remove({k}, {r})");
        }
    }

    let total: usize = model.values().map(|set| set.len()).sum();
    assert_eq!(index.size().unwrap(), total as i64);

    for (k, expected) in &model {
        let actual: BTreeSet<RecordId> =
            index.get(Some(&key(*k))).unwrap().into_iter().collect();
        assert_eq!(&actual, expected, "get({k})");
    }

    // A full ascending scan emits every pair exactly once, keys in order.
    model.retain(|_, set| !set.is_empty());
    let mut cursor = index.iterate_entries_between(&key(-1), true, &key(10_000), true, true);
    let mut scanned: BTreeMap<i64, BTreeSet<RecordId>> = BTreeMap::new();
    let mut last_key: Option<i64> = None;
    while let Some((k, r)) = cursor.next(128).unwrap() {
        let k = match k.items()[0] {
            ridgeline_common::key::KeyItem::Int(v) => v,
            _ => panic!("unexpected key shape"),
        };
        if let Some(last) = last_key {
            assert!(k >= last, "keys must be non-decreasing");
        }
        last_key = Some(k);
        assert!(
            scanned.entry(k).or_default().insert(r),
            "pair ({k}, {r}) emitted twice"
        );
    }
    assert_eq!(scanned, model);
}

#[test]
fn wal_carries_component_operations() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    let index = new_index(&mgr, "walled");

    for value in 0..10i64 {
        index.put(Some(&key(value)), rid(1, value)).unwrap();
    }
    index.put(None, rid(2, 7)).unwrap();
    assert!(index.remove(Some(&key(3)), rid(1, 3)).unwrap());

    let operations = WalReader::new(dir.path().join("wal"))
        .read_committed_operations()
        .unwrap();

    let puts: Vec<_> = operations
        .iter()
        .filter_map(|op| match op {
            ComponentOperation::Put(put) => Some(put),
            _ => None,
        })
        .collect();
    let removes: Vec<_> = operations
        .iter()
        .filter_map(|op| match op {
            ComponentOperation::RemoveEntry(remove) => Some(remove),
            _ => None,
        })
        .collect();

    assert_eq!(puts.len(), 11);
    assert_eq!(removes.len(), 1);
    assert_eq!(puts.iter().filter(|put| put.key.is_none()).count(), 1);
    assert_eq!(removes[0].rid, rid(1, 3));

    let serializer = CompositeKeySerializer;
    let removed_key = serializer
        .deserialize(removes[0].key.as_ref().unwrap())
        .unwrap();
    assert_eq!(removed_key, key(3));
}

#[test]
fn close_and_reload_preserves_contents() {
    let dir = tempfile::tempdir().unwrap();

    {
        let index = new_index(&manager(dir.path()), "persist");
        for value in 0..500i64 {
            index.put(Some(&key(value)), rid(1, value)).unwrap();
        }
        index.put(None, rid(2, 1)).unwrap();
        index.close().unwrap();
    }

    let index = MultiValueIndex::load(
        manager(dir.path()),
        "persist",
        1,
        Arc::new(CompositeKeySerializer),
        None,
        MultiValueIndexConfig::default(),
    )
    .unwrap();

    assert_eq!(index.size().unwrap(), 501);
    assert_eq!(index.get(Some(&key(250))).unwrap(), vec![rid(1, 250)]);
    assert_eq!(index.get(None).unwrap(), vec![rid(2, 1)]);

    // New inserts keep working after reload, including on existing keys.
    index.put(Some(&key(250)), rid(1, 10_250)).unwrap();
    assert_eq!(index.get(Some(&key(250))).unwrap().len(), 2);
    assert_eq!(index.size().unwrap(), 502);
}

#[test]
fn delete_refuses_when_not_empty() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "guarded");

    index.put(Some(&key(1)), rid(1, 1)).unwrap();
    assert!(matches!(
        index.delete(),
        Err(RidgelineError::NotEmptyOnDelete { size: 1, .. })
    ));

    assert!(index.remove(Some(&key(1)), rid(1, 1)).unwrap());
    index.delete().unwrap();
}

#[test]
fn oversize_key_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "oversize");

    let huge = "x".repeat(8_192);
    let result = index.put(Some(&skey(&huge)), rid(1, 1));
    assert!(matches!(result, Err(RidgelineError::KeyTooLarge { .. })));
    assert_eq!(index.size().unwrap(), 0);
}

#[test]
fn put_if_absent_guards_occupied_keys() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "absent");

    assert_eq!(index.put_if_absent(Some(&key(1)), rid(1, 1)).unwrap(), None);
    assert_eq!(
        index.put_if_absent(Some(&key(1)), rid(1, 2)).unwrap(),
        Some(rid(1, 1))
    );
    assert_eq!(index.get(Some(&key(1))).unwrap(), vec![rid(1, 1)]);
    assert_eq!(index.size().unwrap(), 1);

    assert_eq!(index.put_if_absent(None, rid(2, 7)).unwrap(), None);
    assert_eq!(
        index.put_if_absent(None, rid(2, 8)).unwrap(),
        Some(rid(2, 7))
    );
    assert_eq!(index.get(None).unwrap(), vec![rid(2, 7)]);
}

struct XorEncryption;

impl Encryption for XorEncryption {
    fn name(&self) -> &str {
        "xor"
    }

    fn encrypt(&self, plain: &[u8]) -> Vec<u8> {
        plain.iter().map(|b| b ^ 0xA5).collect()
    }

    fn decrypt(&self, cipher: &[u8]) -> Vec<u8> {
        cipher.iter().map(|b| b ^ 0xA5).collect()
    }
}

#[test]
fn encrypted_keys_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let index = MultiValueIndex::create(
        manager(dir.path()),
        "secret",
        1,
        Arc::new(CompositeKeySerializer),
        Some(Arc::new(XorEncryption)),
        MultiValueIndexConfig::default(),
    )
    .unwrap();

    for value in 0..300i64 {
        index.put(Some(&key(value)), rid(1, value)).unwrap();
    }

    assert_eq!(index.get(Some(&key(123))).unwrap(), vec![rid(1, 123)]);
    assert_eq!(index.first_key().unwrap(), Some(key(0)));

    let mut cursor = index.iterate_entries_between(&key(10), true, &key(12), true, true);
    let mut seen = Vec::new();
    while let Some((k, _)) = cursor.next(8).unwrap() {
        seen.push(k);
    }
    assert_eq!(seen, vec![key(10), key(11), key(12)]);

    assert!(index.remove(Some(&key(123)), rid(1, 123)).unwrap());
    assert!(index.get(Some(&key(123))).unwrap().is_empty());
}

#[test]
fn unique_index_enforces_single_value() {
    let dir = tempfile::tempdir().unwrap();
    let index = UniqueIndex::create(
        manager(dir.path()),
        "unique",
        1,
        Arc::new(CompositeKeySerializer),
        None,
        MultiValueIndexConfig::default(),
    )
    .unwrap();

    index.put(Some(&skey("a")), rid(1, 1)).unwrap();
    // Re-putting the same pair is fine.
    index.put(Some(&skey("a")), rid(1, 1)).unwrap();
    // A different record id is rejected.
    assert!(matches!(
        index.put(Some(&skey("a")), rid(1, 2)),
        Err(RidgelineError::DuplicateKey { .. })
    ));

    assert_eq!(index.get(Some(&skey("a"))).unwrap(), Some(rid(1, 1)));
    assert_eq!(index.count(Some(&skey("a"))).unwrap(), 1);
    assert_eq!(index.count(Some(&skey("b"))).unwrap(), 0);
    assert_eq!(index.size().unwrap(), 1);

    assert!(index.remove(Some(&skey("a"))).unwrap());
    assert!(!index.remove(Some(&skey("a"))).unwrap());
    assert_eq!(index.count(Some(&skey("a"))).unwrap(), 0);
}

#[test]
fn emptied_buckets_are_skipped_by_reads() {
    let dir = tempfile::tempdir().unwrap();
    let index = new_index(&manager(dir.path()), "sparse");

    for value in 0..1_000i64 {
        index.put(Some(&key(value)), rid(1, value)).unwrap();
    }

    // Empty out a band in the middle, which drains whole buckets.
    for value in 300..700i64 {
        assert!(index.remove(Some(&key(value)), rid(1, value)).unwrap());
    }

    assert_eq!(index.size().unwrap(), 600);
    assert_eq!(index.get(Some(&key(299))).unwrap(), vec![rid(1, 299)]);
    assert_eq!(index.get(Some(&key(700))).unwrap(), vec![rid(1, 700)]);
    assert!(index.get(Some(&key(500))).unwrap().is_empty());
    assert_eq!(index.first_key().unwrap(), Some(key(0)));
    assert_eq!(index.last_key().unwrap(), Some(key(999)));

    let mut cursor = index.iterate_entries_between(&key(0), true, &key(999), true, true);
    let mut count = 0;
    let mut previous = None;
    while let Some((k, _)) = cursor.next(64).unwrap() {
        if let Some(prev) = previous {
            assert!(k > prev);
        }
        previous = Some(k);
        count += 1;
    }
    assert_eq!(count, 600);

    // Zero prefetch still makes progress.
    let mut cursor = index.iterate_entries_between(&key(0), true, &key(999), true, true);
    assert!(cursor.next(0).unwrap().is_some());
}
