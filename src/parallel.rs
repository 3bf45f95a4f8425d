//! Work partitioning for kernel execution.
//!
//! Each worker gets a contiguous, non-overlapping range of outer-loop units,
//! so kernels write disjoint output slices without synchronization.

use rayon::prelude::*;

/// Range `[offset, offset + block)` of `n` units owned by worker `ithr` of
/// `nthr`.
///
/// `band = n / nthr` units each; the first `n % nthr` workers take one
/// extra. When `n < nthr` the trailing workers get an empty range.
pub fn partition_unit_diff(ithr: usize, nthr: usize, n: usize) -> (usize, usize) {
    let nthr = nthr.max(1);
    let mut band = n / nthr;
    if band == 0 {
        band = 1;
    }
    let tail = n.saturating_sub(band * nthr);

    let mut offset;
    if ithr < tail {
        band += 1;
        offset = band * ithr;
    } else {
        offset = band * ithr + tail;
    }
    let mut block = band;

    if offset >= n {
        offset = 0;
        block = 0;
    }
    if offset + block > n {
        block = n - offset;
    }
    (offset, block)
}

/// Split `buf` into per-worker runs of whole units (`unit_len` elements
/// each) and run `f(first_unit, run)` on every non-empty run in parallel.
pub fn for_each_unit_run<T, F>(buf: &mut [T], unit_len: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync,
{
    if unit_len == 0 || buf.is_empty() {
        return;
    }
    let runs = split_runs(buf, unit_len, rayon::current_num_threads());
    runs.into_par_iter().for_each(|(u0, run)| f(u0, run));
}

/// As [`for_each_unit_run`] over two buffers with the same unit count.
/// Used when a kernel needs a per-unit scratch region next to its output.
pub fn for_each_unit_run2<T, U, F>(a: &mut [T], a_unit: usize, b: &mut [U], b_unit: usize, f: F)
where
    T: Send,
    U: Send,
    F: Fn(usize, &mut [T], &mut [U]) + Sync,
{
    if a_unit == 0 || b_unit == 0 || a.is_empty() {
        return;
    }
    debug_assert_eq!(a.len() / a_unit, b.len() / b_unit);
    let nthr = rayon::current_num_threads();
    let ra = split_runs(a, a_unit, nthr);
    let rb = split_runs(b, b_unit, nthr);
    ra.into_par_iter()
        .zip(rb)
        .for_each(|((u0, x), (_, y))| f(u0, x, y));
}

/// Run `f(unit)` for every unit in `0..n`, grouped into per-worker ranges,
/// collecting results in unit order.
pub fn map_units<R, F>(n: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(usize) -> R + Sync,
{
    let nthr = rayon::current_num_threads().min(n).max(1);
    let per_worker: Vec<Vec<R>> = (0..nthr)
        .into_par_iter()
        .map(|ithr| {
            let (start, len) = partition_unit_diff(ithr, nthr, n);
            (start..start + len).map(&f).collect()
        })
        .collect();
    per_worker.into_iter().flatten().collect()
}

fn split_runs<T>(buf: &mut [T], unit_len: usize, nthr: usize) -> Vec<(usize, &mut [T])> {
    let units = buf.len() / unit_len;
    let nthr = nthr.min(units).max(1);
    let mut runs = Vec::with_capacity(nthr);
    let mut rest = buf;
    let mut consumed = 0;
    for ithr in 0..nthr {
        let (start, len) = partition_unit_diff(ithr, nthr, units);
        if len == 0 {
            continue;
        }
        debug_assert_eq!(start, consumed);
        let (head, tail) = std::mem::take(&mut rest).split_at_mut(len * unit_len);
        runs.push((start, head));
        rest = tail;
        consumed += len;
    }
    runs
}
