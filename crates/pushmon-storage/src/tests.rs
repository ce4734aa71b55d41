use crate::controller::{MergeOutcome, RestoreOutcome, StorageController};
use chrono::{Duration, Utc};
use pushmon_common::types::{MetricBatch, MetricEntry};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;

#[test]
fn report_all_returns_accumulated_counter_then_empty() {
    let storage = StorageController::new();
    for _ in 0..3 {
        storage.collect_counter("PollCount", 1);
    }

    let batch = storage.report_all();
    assert_eq!(batch.entries, vec![MetricEntry::counter("PollCount", 3)]);

    let second = storage.report_all();
    assert!(second.is_empty());
    assert!(second.captured_at > batch.captured_at);
}

#[test]
fn restore_keeps_gauge_collected_after_capture() {
    let storage = StorageController::new();
    storage.collect_gauge("Temp", 10.0);

    let batch = storage.report_all();
    assert_eq!(batch.len(), 1);

    // Delivery failed; a fresher sample arrives before the restore.
    storage.collect_gauge("Temp", 20.0);
    let outcome = storage.restore_latest(&batch.entries, batch.captured_at);

    assert_eq!(
        outcome,
        RestoreOutcome {
            counters: 0,
            gauges_applied: 0,
            gauges_skipped: 1,
        }
    );
    assert_eq!(storage.gauge("Temp"), Some(20.0));
}

#[test]
fn restore_never_reverts_to_older_gauge_value() {
    let storage = StorageController::new();
    storage.collect_gauge("Load", 1.0);
    let captured_before_second = storage.report_all();
    storage.collect_gauge("Load", 2.0);

    // A batch captured before the second sample, even restored twice.
    storage.restore_latest(
        &captured_before_second.entries,
        captured_before_second.captured_at,
    );
    storage.restore_latest(
        &captured_before_second.entries,
        captured_before_second.captured_at - Duration::seconds(5),
    );

    assert_eq!(storage.gauge("Load"), Some(2.0));
}

#[test]
fn restore_reapplies_gauge_without_newer_sample() {
    let storage = StorageController::new();
    storage.collect_gauge("HeapAlloc", 512.0);
    storage.collect_counter("PollCount", 7);

    let batch = storage.report_all();
    assert!(storage.is_empty());

    let outcome = storage.restore_latest(&batch.entries, batch.captured_at);
    assert_eq!(outcome.counters, 1);
    assert_eq!(outcome.gauges_applied, 1);
    assert_eq!(storage.gauge("HeapAlloc"), Some(512.0));
    assert_eq!(storage.counter("PollCount"), Some(7));

    // The restored gauge keeps its original sample time.
    let again = storage.report_all();
    let sampled = again.entries.iter().find_map(|e| match e {
        MetricEntry::Gauge { sampled_at, .. } => Some(*sampled_at),
        _ => None,
    });
    let original = batch.entries.iter().find_map(|e| match e {
        MetricEntry::Gauge { sampled_at, .. } => Some(*sampled_at),
        _ => None,
    });
    assert_eq!(sampled, original);
}

#[test]
fn restore_adds_counter_delta_to_new_accumulation() {
    let storage = StorageController::new();
    storage.collect_counter("requests", 4);
    let batch = storage.report_all();

    storage.collect_counter("requests", 6);
    storage.restore_latest(&batch.entries, batch.captured_at);

    assert_eq!(storage.counter("requests"), Some(10));
}

#[test]
fn snapshot_without_flush_is_non_destructive() {
    let storage = StorageController::new();
    storage.collect_counter("c", 2);
    storage.collect_gauge("g", 0.5);

    let first = storage.snapshot(false);
    let second = storage.snapshot(false);
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    // Counters come first.
    assert_eq!(first[0], MetricEntry::counter("c", 2));

    let flushed = storage.snapshot(true);
    assert_eq!(flushed, first);
    assert!(storage.snapshot(false).is_empty());
}

#[test]
fn counter_total_survives_random_report_and_restore_cycles() {
    let storage = StorageController::new();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut collected: i64 = 0;
    let mut delivered: i64 = 0;

    for _ in 0..2_000 {
        match rng.gen_range(0..4) {
            0 | 1 => {
                let delta = rng.gen_range(-50..=100);
                let name = if rng.gen_bool(0.5) { "a" } else { "b" };
                storage.collect_counter(name, delta);
                collected += delta;
            }
            2 => {
                let batch = storage.report_all();
                if rng.gen_bool(0.5) {
                    delivered += batch.counter_total();
                } else {
                    storage.restore_latest(&batch.entries, batch.captured_at);
                }
            }
            _ => {
                storage.collect_gauge("noise", rng.gen());
            }
        }
    }

    let live: i64 = storage
        .snapshot(false)
        .iter()
        .map(|e| match e {
            MetricEntry::Counter { delta, .. } => *delta,
            MetricEntry::Gauge { .. } => 0,
        })
        .sum();
    assert_eq!(delivered + live, collected);
}

#[test]
fn concurrent_collect_and_flush_lose_nothing() {
    let storage = Arc::new(StorageController::new());
    let writers = 4;
    let per_writer = 10_000;

    let handles: Vec<_> = (0..writers)
        .map(|_| {
            let storage = storage.clone();
            thread::spawn(move || {
                for _ in 0..per_writer {
                    storage.collect_counter("hits", 1);
                }
            })
        })
        .collect();

    let flusher = {
        let storage = storage.clone();
        thread::spawn(move || {
            let mut drained = 0;
            for _ in 0..500 {
                drained += storage.report_all().counter_total();
                thread::yield_now();
            }
            drained
        })
    };

    for h in handles {
        h.join().unwrap();
    }
    let drained = flusher.join().unwrap();
    let remaining = storage.report_all().counter_total();

    assert_eq!(drained + remaining, (writers * per_writer) as i64);
}

#[test]
fn collect_after_report_is_stamped_later_than_capture() {
    let storage = StorageController::new();
    let batch = storage.report_all();
    storage.collect_gauge("g", 1.0);

    let later = storage.snapshot(false);
    match &later[0] {
        MetricEntry::Gauge { sampled_at, .. } => assert!(*sampled_at > batch.captured_at),
        other => panic!("expected gauge, got {other:?}"),
    }
}

#[test]
fn merge_accumulates_counters_and_keeps_newest_gauge() {
    let storage = StorageController::new();
    let t0 = Utc::now();
    let t1 = t0 + Duration::seconds(10);

    let newer = MetricBatch::new(
        t1,
        vec![
            MetricEntry::counter("PollCount", 5),
            MetricEntry::gauge("Temp", 30.0, t1),
        ],
    );
    let older = MetricBatch::new(
        t0,
        vec![
            MetricEntry::counter("PollCount", 2),
            MetricEntry::gauge("Temp", 15.0, t0),
        ],
    );

    let first = storage.merge(&newer);
    assert_eq!(
        first,
        MergeOutcome {
            counters: 1,
            gauges_applied: 1,
            gauges_stale: 0,
        }
    );

    // Arrives late: its counter still counts, its gauge does not win.
    let second = storage.merge(&older);
    assert_eq!(second.gauges_stale, 1);
    assert_eq!(storage.counter("PollCount"), Some(7));
    assert_eq!(storage.gauge("Temp"), Some(30.0));

    // Same timestamp is not strictly newer.
    let replay = MetricBatch::new(t1, vec![MetricEntry::gauge("Temp", 99.0, t1)]);
    assert_eq!(storage.merge(&replay).gauges_stale, 1);
    assert_eq!(storage.gauge("Temp"), Some(30.0));
}

#[test]
fn lookups_miss_on_wrong_kind() {
    let storage = StorageController::new();
    storage.collect_counter("x", 1);
    assert_eq!(storage.gauge("x"), None);
    assert_eq!(storage.counter("missing"), None);
    assert_eq!(storage.len(), 1);
}

#[test]
fn counter_overflow_saturates_instead_of_wrapping() {
    let storage = StorageController::new();
    storage.collect_counter("bytes", i64::MAX - 1);
    storage.collect_counter("bytes", 5);
    assert_eq!(storage.counter("bytes"), Some(i64::MAX));

    storage.collect_counter("drift", i64::MIN);
    storage.collect_counter("drift", -1);
    assert_eq!(storage.counter("drift"), Some(i64::MIN));
}

#[test]
fn lookups_read_live_values_without_flushing() {
    let storage = StorageController::new();
    storage.collect_counter("PollCount", 2);
    storage.collect_gauge("Temp", 21.5);
    storage.collect_gauge("Temp", 22.0);

    assert_eq!(storage.counter("PollCount"), Some(2));
    assert_eq!(storage.gauge("Temp"), Some(22.0));
    assert_eq!(storage.len(), 2);
    assert!(!storage.is_empty());

    storage.report_all();
    assert_eq!(storage.len(), 0);
    assert!(storage.is_empty());
    assert_eq!(storage.gauge("Temp"), None);
}
