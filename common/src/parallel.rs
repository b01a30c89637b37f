//! Row-band partitioning and concurrency-limited parallel iteration.

use rayon::prelude::*;

/// Bands per worker thread; two keeps threads busy when bands finish unevenly.
const BANDS_PER_THREAD: usize = 2;

/// Number of rows per band so that `height` splits into roughly
/// `threads * 2` bands. Never less than one row.
#[inline]
pub fn rows_per_chunk(height: usize) -> usize {
    let bands = rayon::current_num_threads() * BANDS_PER_THREAD;
    (height / bands).max(1)
}

/// Maps `f` over `items` in parallel, with at most `max_concurrent` items in flight.
///
/// # Panics
///
/// Panics if `max_concurrent` is 0.
pub fn par_map_limited<T, R, F>(items: &[T], max_concurrent: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut results = Vec::with_capacity(items.len());
    for (chunk_idx, chunk) in items.chunks(max_concurrent).enumerate() {
        let base = chunk_idx * max_concurrent;
        let chunk_results: Vec<R> = chunk
            .par_iter()
            .enumerate()
            .map(|(i, item)| f(base + i, item))
            .collect();
        results.extend(chunk_results);
    }
    results
}

/// Like [`par_map_limited`], but stops at the first chunk that yields an error.
pub fn try_par_map_limited<T, R, E, F>(
    items: &[T],
    max_concurrent: usize,
    f: F,
) -> Result<Vec<R>, E>
where
    T: Sync,
    R: Send,
    E: Send,
    F: Fn(usize, &T) -> Result<R, E> + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut results = Vec::with_capacity(items.len());
    for (chunk_idx, chunk) in items.chunks(max_concurrent).enumerate() {
        let base = chunk_idx * max_concurrent;
        let chunk_results: Result<Vec<R>, E> = chunk
            .par_iter()
            .enumerate()
            .map(|(i, item)| f(base + i, item))
            .collect();
        results.extend(chunk_results?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_rows_per_chunk_minimum_one() {
        assert_eq!(rows_per_chunk(0), 1);
        assert_eq!(rows_per_chunk(1), 1);
    }

    #[test]
    fn test_par_map_limited_preserves_order_and_index() {
        let items: Vec<i32> = (0..100).collect();
        let result = par_map_limited(&items, 4, |i, &x| (i, x * 2));
        for (i, &(idx, v)) in result.iter().enumerate() {
            assert_eq!(idx, i);
            assert_eq!(v, i as i32 * 2);
        }
    }

    #[test]
    #[should_panic(expected = "max_concurrent must be > 0")]
    fn test_par_map_limited_zero_panics() {
        par_map_limited(&[1, 2, 3], 0, |_, &x| x);
    }

    #[test]
    fn test_par_map_limited_concurrency_cap() {
        let items: Vec<i32> = (0..20).collect();
        let in_flight = AtomicUsize::new(0);
        let max_observed = AtomicUsize::new(0);

        par_map_limited(&items, 3, |_, &x| {
            let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_observed.fetch_max(current, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(5));
            in_flight.fetch_sub(1, Ordering::SeqCst);
            x
        });

        let max = max_observed.load(Ordering::SeqCst);
        assert!(max <= 3, "max in-flight was {max}, expected <= 3");
    }

    #[test]
    fn test_try_par_map_limited_returns_error() {
        let items: Vec<i32> = (0..10).collect();
        let result: Result<Vec<i32>, String> = try_par_map_limited(&items, 2, |_, &x| {
            if x == 5 {
                Err(format!("bad item {x}"))
            } else {
                Ok(x)
            }
        });
        assert_eq!(result.unwrap_err(), "bad item 5");
    }

    #[test]
    fn test_try_par_map_limited_ok() {
        let items = ["a", "bb", "ccc"];
        let result: Result<Vec<usize>, ()> = try_par_map_limited(&items, 8, |_, s| Ok(s.len()));
        assert_eq!(result.unwrap(), vec![1, 2, 3]);
    }
}
