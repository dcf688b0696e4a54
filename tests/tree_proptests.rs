//! Property-based tests for the tree engine.
//!
//! Uses differential testing against `BTreeMap` as an oracle: any sequence
//! of inserts, lookups, and updates must agree with the in-memory map, and
//! every structural invariant must hold afterwards.

use std::collections::BTreeMap;

use blocktree::{BTreeIndex, DisplayMode, IndexError, MemoryCache};
use proptest::prelude::*;

const BLOCK_SIZE: usize = 256;
const NUM_BLOCKS: u64 = 1024;

/// 8-byte keys drawn from a space small enough to exercise collisions.
fn gen_key() -> impl Strategy<Value = Vec<u8>> {
    (0u32..2000).prop_map(|i| format!("k{:07}", i).into_bytes())
}

fn gen_value() -> impl Strategy<Value = Vec<u8>> {
    any::<u64>().prop_map(|v| format!("{:08}", v % 100_000_000).into_bytes())
}

#[derive(Debug, Clone)]
enum Op {
    Insert(Vec<u8>, Vec<u8>),
    Lookup(Vec<u8>),
    Update(Vec<u8>, Vec<u8>),
}

fn operations(max_ops: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            3 => (gen_key(), gen_value()).prop_map(|(k, v)| Op::Insert(k, v)),
            2 => gen_key().prop_map(Op::Lookup),
            1 => (gen_key(), gen_value()).prop_map(|(k, v)| Op::Update(k, v)),
        ],
        0..=max_ops,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Every inserted key is retrievable with its value.
    #[test]
    fn insert_then_lookup_returns_value(key in gen_key(), value in gen_value()) {
        let mut cache = MemoryCache::new(BLOCK_SIZE, NUM_BLOCKS);
        let mut index = BTreeIndex::new(8, 8, &mut cache, true).unwrap();
        index.attach(0, true).unwrap();

        index.insert(&key, &value).unwrap();

        prop_assert_eq!(index.lookup(&key).unwrap(), Some(value));
    }

    /// A unique index agrees with a BTreeMap oracle under random workloads.
    #[test]
    fn unique_index_matches_btreemap_oracle(ops in operations(300)) {
        let mut cache = MemoryCache::new(BLOCK_SIZE, NUM_BLOCKS);
        let mut index = BTreeIndex::new(8, 8, &mut cache, true).unwrap();
        index.attach(0, true).unwrap();
        let mut oracle: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        for op in &ops {
            match op {
                Op::Insert(key, value) => {
                    let result = index.insert(key, value);
                    if oracle.contains_key(key) {
                        let err = result.unwrap_err();
                        prop_assert_eq!(
                            err.downcast_ref::<IndexError>(),
                            Some(&IndexError::KeyExists)
                        );
                    } else {
                        result.unwrap();
                        oracle.insert(key.clone(), value.clone());
                    }
                }
                Op::Lookup(key) => {
                    prop_assert_eq!(index.lookup(key).unwrap(), oracle.get(key).cloned());
                }
                Op::Update(key, value) => {
                    let result = index.update(key, value);
                    if oracle.contains_key(key) {
                        result.unwrap();
                        oracle.insert(key.clone(), value.clone());
                    } else {
                        let err = result.unwrap_err();
                        prop_assert_eq!(
                            err.downcast_ref::<IndexError>(),
                            Some(&IndexError::KeyNotFound)
                        );
                    }
                }
            }
        }

        prop_assert_eq!(index.num_keys().unwrap(), oracle.len() as u64);
        for (key, value) in &oracle {
            let looked_up = index.lookup(key).unwrap();
            prop_assert_eq!(looked_up.as_ref(), Some(value));
        }
        index.sanity_check().unwrap();
    }

    /// In-order traversal enumerates exactly the oracle's sorted keys.
    #[test]
    fn in_order_traversal_matches_sorted_oracle(
        pairs in prop::collection::btree_map(gen_key(), gen_value(), 0..200)
    ) {
        let mut cache = MemoryCache::new(BLOCK_SIZE, NUM_BLOCKS);
        let mut index = BTreeIndex::new(8, 8, &mut cache, true).unwrap();
        index.attach(0, true).unwrap();

        for (key, value) in &pairs {
            index.insert(key, value).unwrap();
        }

        let mut out = Vec::new();
        index.display(&mut out, DisplayMode::SortedKeyval).unwrap();
        let listed: Vec<String> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|line| {
                line.trim_start_matches('(')
                    .split(',')
                    .next()
                    .unwrap()
                    .to_string()
            })
            .collect();
        let expected: Vec<String> = pairs
            .keys()
            .map(|key| String::from_utf8(key.clone()).unwrap())
            .collect();

        prop_assert_eq!(listed, expected);
        index.sanity_check().unwrap();
    }

    /// Duplicates in a non-unique index are all counted and stay sane as
    /// long as no single key floods a whole leaf.
    #[test]
    fn non_unique_index_counts_duplicates(
        copies in prop::collection::vec(0u32..64, 1..100)
    ) {
        let mut cache = MemoryCache::new(BLOCK_SIZE, NUM_BLOCKS);
        let mut index = BTreeIndex::new(8, 8, &mut cache, false).unwrap();
        index.attach(0, true).unwrap();

        for (i, key_id) in copies.iter().enumerate() {
            let key = format!("k{:07}", key_id).into_bytes();
            let value = format!("{:08}", i).into_bytes();
            index.insert(&key, &value).unwrap();
        }

        prop_assert_eq!(index.num_keys().unwrap(), copies.len() as u64);
        for key_id in &copies {
            let key = format!("k{:07}", key_id).into_bytes();
            prop_assert!(index.lookup(&key).unwrap().is_some());
        }
        index.sanity_check().unwrap();
    }

    /// Detach and reattach never loses a key.
    #[test]
    fn persistence_round_trip(
        pairs in prop::collection::btree_map(gen_key(), gen_value(), 0..150)
    ) {
        let mut cache = MemoryCache::new(BLOCK_SIZE, NUM_BLOCKS);

        {
            let mut index = BTreeIndex::new(8, 8, &mut cache, true).unwrap();
            index.attach(0, true).unwrap();
            for (key, value) in &pairs {
                index.insert(key, value).unwrap();
            }
            index.detach().unwrap();
        }

        let mut index = BTreeIndex::new(8, 8, &mut cache, true).unwrap();
        index.attach(0, false).unwrap();
        prop_assert_eq!(index.num_keys().unwrap(), pairs.len() as u64);
        for (key, value) in &pairs {
            let looked_up = index.lookup(key).unwrap();
            prop_assert_eq!(looked_up.as_ref(), Some(value));
        }
        index.sanity_check().unwrap();
    }
}
