use std::sync::Arc;

use itertools::Itertools;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use spillsort::prelude::*;

fn identity_cmp() -> RecordCompare {
    Box::new(|a: &[u8], b: &[u8]| a.cmp(b))
}

fn new_sorter(
    page_size: usize,
    array_capacity: usize,
) -> (Arc<ExternalSorter<PointerArrayIndex>>, Arc<dyn MemoryManager>) {
    let manager: Arc<dyn MemoryManager> = Arc::new(HeapMemoryManager::new());
    let pool = Arc::new(Mutex::new(PagePool::new(page_size)));
    let index = PointerArrayIndex::new(manager.clone(), pool.clone(), Arc::new(identity_cmp()), array_capacity).unwrap();
    let storage: Arc<dyn SpillStorage> = Arc::new(InMemorySpillStorage::new());
    let config = SorterConfig::new(page_size);
    let sorter = ExternalSorter::create(manager.clone(), pool, storage, identity_cmp(), config, &NoopTaskContext, index);
    (sorter, manager)
}

fn collect_prefixes(mut source: Box<dyn RecordSource + Send>) -> Vec<u64> {
    let mut out = Vec::new();
    while source.has_next() {
        source.load_next().unwrap();
        out.push(source.current().prefix);
    }
    out
}

/// Small fixed input, no spill, identity comparator.
#[test]
fn small_input_sorts_without_spilling() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (sorter, _manager) = new_sorter(64 * 1024, 16);
    for prefix in [3u64, 1, 4, 1, 5, 9, 2, 6] {
        sorter.insert(&prefix.to_le_bytes(), prefix).unwrap();
    }

    let out = collect_prefixes(sorter.sorted_iterator().unwrap());
    assert_eq!(out, vec![1, 1, 2, 3, 4, 5, 6, 9]);
}

/// 1,000 records with a tiny page budget forcing multiple spills; output is the full
/// permutation, non-decreasing by prefix.
#[test]
fn many_records_force_multiple_spills_and_still_sort() {
    let (sorter, _manager) = new_sorter(512, 8);
    let mut rng = StdRng::seed_from_u64(1);
    let mut inserted = Vec::with_capacity(1000);

    for _ in 0..1000u64 {
        let prefix: u64 = rng.random();
        let payload = vec![0u8; 64];
        sorter.insert(&payload, prefix).unwrap();
        inserted.push(prefix);

        if sorter.number_of_allocated_pages() > 4 {
            sorter.spill(usize::MAX, SpillTrigger::SelfTrigger).unwrap();
        }
    }

    let out = collect_prefixes(sorter.sorted_iterator().unwrap());
    assert_eq!(out.len(), 1000);
    assert!(out.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(out.iter().copied().sorted().collect::<Vec<_>>(), inserted.iter().copied().sorted().collect::<Vec<_>>());
}

/// Spill mid-iteration on behalf of another consumer must not disturb the remaining
/// output order.
#[test]
fn foreign_spill_mid_iteration_preserves_remaining_order() {
    let (sorter, _manager) = new_sorter(64 * 1024, 16);
    let mut rng = StdRng::seed_from_u64(2);
    let mut inserted = Vec::with_capacity(100);
    for _ in 0..100u64 {
        let prefix: u64 = rng.random();
        sorter.insert(&prefix.to_le_bytes(), prefix).unwrap();
        inserted.push(prefix);
    }

    let mut iter = sorter.sorted_iterator().unwrap();
    let mut out = Vec::new();
    for _ in 0..10 {
        iter.load_next().unwrap();
        out.push(iter.current().prefix);
    }

    sorter.spill(u64::MAX as usize, SpillTrigger::Other).unwrap();

    while iter.has_next() {
        iter.load_next().unwrap();
        out.push(iter.current().prefix);
    }

    let mut expected = inserted;
    expected.sort_unstable();
    assert_eq!(out, expected);
}

/// A drained batch is itself written via the index's sorted iterator, so "insertion
/// order" output is ordered by spill-batch creation order, sorted *within* each batch,
/// not a literal global FIFO of every insert call.
#[test]
fn insertion_order_iterator_chains_batches_sorted_within_each_batch() {
    let (sorter, _manager) = new_sorter(4096, 4);
    for prefix in [5u64, 2, 8, 1] {
        sorter.insert(&prefix.to_le_bytes(), prefix).unwrap();
    }
    sorter.spill(usize::MAX, SpillTrigger::SelfTrigger).unwrap();
    for prefix in [9u64, 0] {
        sorter.insert(&prefix.to_le_bytes(), prefix).unwrap();
    }

    let out = collect_prefixes(sorter.insertion_order_iterator().unwrap());
    assert_eq!(out, vec![1, 2, 5, 8, 0, 9]);
}

#[test]
fn cleanup_resources_is_idempotent_and_reaches_zero_allocations() {
    let (sorter, _manager) = new_sorter(4096, 4);
    for prefix in 0u64..20 {
        sorter.insert(&prefix.to_le_bytes(), prefix).unwrap();
    }
    sorter.spill(usize::MAX, SpillTrigger::SelfTrigger).unwrap();

    sorter.cleanup_resources();
    sorter.cleanup_resources();

    assert_eq!(sorter.number_of_allocated_pages(), 0);
}

#[test]
fn cleanup_runs_automatically_on_task_completion() {
    let manager: Arc<dyn MemoryManager> = Arc::new(HeapMemoryManager::new());
    let pool = Arc::new(Mutex::new(PagePool::new(4096)));
    let index = PointerArrayIndex::new(manager.clone(), pool.clone(), Arc::new(identity_cmp()), 4).unwrap();
    let storage: Arc<dyn SpillStorage> = Arc::new(InMemorySpillStorage::new());
    let config = SorterConfig::new(4096);
    let task_context = DeferredTaskContext::new();

    let sorter = ExternalSorter::create(manager, pool, storage, identity_cmp(), config, &task_context, index);
    sorter.insert(b"hello", 1).unwrap();
    assert!(sorter.number_of_allocated_pages() > 0);

    task_context.complete();
    assert_eq!(sorter.number_of_allocated_pages(), 0);
}

#[test]
fn peak_memory_used_bytes_is_monotonic_across_spills() {
    let (sorter, _manager) = new_sorter(4096, 4);
    let before = sorter.peak_memory_used_bytes();
    for prefix in 0u64..50 {
        sorter.insert(&prefix.to_le_bytes(), prefix).unwrap();
    }
    let during = sorter.peak_memory_used_bytes();
    assert!(during >= before);

    sorter.spill(usize::MAX, SpillTrigger::SelfTrigger).unwrap();
    let after = sorter.peak_memory_used_bytes();
    assert!(after >= during);
}

#[test]
fn spill_on_empty_sorter_is_a_no_op() {
    let (sorter, _manager) = new_sorter(4096, 4);
    let freed = sorter.spill(usize::MAX, SpillTrigger::SelfTrigger).unwrap();
    assert_eq!(freed, 0);
}

#[test]
fn merge_yields_the_comparator_sorted_union_and_empties_the_donor() {
    let (a, _manager_a) = new_sorter(64 * 1024, 16);
    let (b, _manager_b) = new_sorter(64 * 1024, 16);
    for prefix in [10u64, 30, 20] {
        a.insert(&prefix.to_le_bytes(), prefix).unwrap();
    }
    for prefix in [25u64, 5, 15] {
        b.insert(&prefix.to_le_bytes(), prefix).unwrap();
    }

    a.merge(&b).unwrap();
    assert_eq!(b.number_of_allocated_pages(), 0);

    let out = collect_prefixes(a.sorted_iterator().unwrap());
    assert_eq!(out, vec![5, 10, 15, 20, 25, 30]);
}

/// A zero-length record with a non-zero prefix sorts by prefix alone.
#[test]
fn zero_length_record_sorts_by_prefix_only() {
    let (sorter, _manager) = new_sorter(4096, 4);
    sorter.insert(&[], 7).unwrap();
    sorter.insert(&[], 3).unwrap();
    sorter.insert(b"x", 5).unwrap();

    let out = collect_prefixes(sorter.sorted_iterator().unwrap());
    assert_eq!(out, vec![3, 5, 7]);
}

/// Filling a page exactly must force the next insert onto a new page without losing
/// data.
#[test]
fn insert_that_exactly_fills_a_page_forces_a_new_page_next_insert() {
    // record on-page size = 4-byte length header + payload.
    let page_size = 4 + 16;
    let (sorter, _manager) = new_sorter(page_size, 4);

    sorter.insert(&[1u8; 16], 1).unwrap();
    assert_eq!(sorter.number_of_allocated_pages(), 1);

    sorter.insert(&[2u8; 16], 2).unwrap();
    assert_eq!(sorter.number_of_allocated_pages(), 2);

    let out = collect_prefixes(sorter.sorted_iterator().unwrap());
    assert_eq!(out, vec![1, 2]);
}

/// insert_key_value records round-trip through the sorted output via insertion order
/// (the key/value split itself is opaque to the sorter's record-level view, so this
/// exercises the on-page layout rather than decoding it back out).
#[test]
fn key_value_records_are_stored_and_recovered_via_insertion_order() {
    let (sorter, _manager) = new_sorter(4096, 4);
    sorter.insert_key_value(b"key-a", b"value-a", 1).unwrap();
    sorter.insert_key_value(b"key-b", b"value-bb", 2).unwrap();

    let out = collect_prefixes(sorter.insertion_order_iterator().unwrap());
    assert_eq!(out, vec![1, 2]);
}
