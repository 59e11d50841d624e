//! Fire-all, collect-as-completed execution over scoped worker threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

/// Upper bound on concurrent workers. Matches ureq's default idle-connection
/// pool so every in-flight request can reuse a pooled connection.
pub const DEFAULT_MAX_WORKERS: usize = 100;

/// Run `task` over every item on up to `max_workers` threads and return
/// `(index, output)` pairs in completion order.
///
/// Each task produces an independent output; nothing is shared between
/// workers except the work cursor. All tasks run to completion before this
/// returns.
pub fn fan_out<I, T, F>(items: &[I], max_workers: usize, task: F) -> Vec<(usize, T)>
where
    I: Sync,
    T: Send,
    F: Fn(&I) -> T + Sync,
{
    let workers = max_workers.max(1).min(items.len());
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let task = &task;
            scope.spawn(move || {
                loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(item) = items.get(index) else {
                        break;
                    };
                    if tx.send((index, task(item))).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);
        rx.iter().collect()
    })
}

/// Like [`fan_out`], but restores input order.
pub fn fan_out_ordered<I, T, F>(items: &[I], max_workers: usize, task: F) -> Vec<T>
where
    I: Sync,
    T: Send,
    F: Fn(&I) -> T + Sync,
{
    let mut results = fan_out(items, max_workers, task);
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, output)| output).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn empty_input_spawns_nothing() {
        let items: Vec<u32> = Vec::new();
        assert!(fan_out(&items, 8, |x| x * 2).is_empty());
    }

    #[test]
    fn every_item_runs_exactly_once() {
        let items: Vec<u32> = (0..50).collect();
        let mut results = fan_out(&items, 7, |x| x * 2);
        assert_eq!(results.len(), 50);
        results.sort_by_key(|(i, _)| *i);
        for (i, (index, doubled)) in results.into_iter().enumerate() {
            assert_eq!(index, i);
            assert_eq!(doubled, i as u32 * 2);
        }
    }

    #[test]
    fn results_arrive_in_completion_order() {
        // The slow first item finishes after the fast second one.
        let items = vec![60u64, 0];
        let results = fan_out(&items, 2, |ms| {
            thread::sleep(Duration::from_millis(*ms));
            *ms
        });
        assert_eq!(results, vec![(1, 0), (0, 60)]);
    }

    #[test]
    fn ordered_variant_restores_input_order() {
        let items = vec![30u64, 0, 10];
        let results = fan_out_ordered(&items, 3, |ms| {
            thread::sleep(Duration::from_millis(*ms));
            *ms
        });
        assert_eq!(results, vec![30, 0, 10]);
    }

    #[test]
    fn zero_workers_still_makes_progress() {
        let items = vec!["a", "b"];
        let results = fan_out_ordered(&items, 0, |s| s.to_uppercase());
        assert_eq!(results, vec!["A", "B"]);
    }
}
