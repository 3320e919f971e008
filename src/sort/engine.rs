/// Parallel in-place sort of a contiguous region of fixed-length records.
///
/// Phase 1 splits the region into contiguous chunks and quicksorts each on
/// its own pool thread; the chunks are disjoint `&mut` slices, so workers
/// share nothing mutable. Phase 2 is a single-threaded k-way merge through
/// a scratch buffer, copied back over the region in one pass.
use std::cmp::Ordering;
use std::ptr;

use rayon::prelude::*;

use super::error::SortError;
use super::jit::{generate, Comparator};
use super::key::{validate_keys, KeySpec};

/// Ranges at or below this record count sort by insertion.
const INSERTION_CUTOFF: usize = 16;

/// Record swaps up to this many bytes bounce through a stack buffer.
const SWAP_BUF: usize = 256;

/// Floor on records per chunk; chunks smaller than this are not worth a
/// worker.
const MIN_CHUNK_RECORDS: usize = 1000;

/// Sorting engine bound to one key list, record length, and worker count.
/// Owns the compiled comparator for its lifetime.
pub struct SortEngine {
    record_len: usize,
    threads: usize,
    comparator: Comparator,
}

impl SortEngine {
    /// Admit the key list and build the comparator.
    pub fn new(keys: &[KeySpec], record_len: usize, threads: usize) -> Result<SortEngine, SortError> {
        if record_len == 0 {
            return Err(SortError::Key("record length must be >= 1".to_string()));
        }
        validate_keys(keys, record_len).map_err(SortError::Key)?;
        Ok(SortEngine {
            record_len,
            threads: threads.max(1),
            comparator: generate(keys, record_len),
        })
    }

    pub fn comparator(&self) -> &Comparator {
        &self.comparator
    }

    /// Sort the region in place. On return the region is a permutation of
    /// its prior contents, non-decreasing under the key list.
    pub fn sort(&self, data: &mut [u8]) -> Result<(), SortError> {
        let r = self.record_len;
        if data.len() % r != 0 {
            return Err(SortError::Alignment {
                size: data.len() as u64,
                record_len: r,
            });
        }
        let n = data.len() / r;
        if n <= 1 {
            return Ok(());
        }

        let t = self.threads;
        let chunk_records = ((n + t - 1) / t).max(MIN_CHUNK_RECORDS).min(n);
        let num_chunks = (n + chunk_records - 1) / chunk_records;

        if t <= 1 || num_chunks <= 1 {
            quicksort_records(data, r, &self.comparator);
            return Ok(());
        }

        // Dedicated pool so the requested worker count is honored without
        // touching global rayon state.
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(t)
            .build()
            .map_err(|e| SortError::Resource(format!("thread pool: {}", e)))?;

        let cmp = &self.comparator;
        pool.install(|| {
            data.par_chunks_mut(chunk_records * r)
                .for_each(|chunk| quicksort_records(chunk, r, cmp));
        });

        merge_chunks(data, r, chunk_records, cmp);
        Ok(())
    }
}

/// Quicksort a whole number of records in place.
fn quicksort_records(chunk: &mut [u8], record_len: usize, cmp: &Comparator) {
    let n = chunk.len() / record_len;
    if n > 1 {
        // SAFETY: all indices handed down stay within [0, n).
        unsafe { quicksort(chunk.as_mut_ptr(), 0, n - 1, record_len, cmp) };
    }
}

/// Lomuto quicksort on the inclusive record range [lo, hi]. Recurses into
/// the smaller partition and iterates on the larger, so stack depth is
/// O(log n).
unsafe fn quicksort(base: *mut u8, mut lo: usize, mut hi: usize, r: usize, cmp: &Comparator) {
    loop {
        if hi <= lo {
            return;
        }
        if hi - lo < INSERTION_CUTOFF {
            insertion_sort(base, lo, hi, r, cmp);
            return;
        }
        let p = partition(base, lo, hi, r, cmp);
        if p - lo < hi - p {
            if p > lo {
                quicksort(base, lo, p - 1, r, cmp);
            }
            lo = p + 1;
        } else {
            if p < hi {
                quicksort(base, p + 1, hi, r, cmp);
            }
            if p == 0 {
                return;
            }
            hi = p - 1;
        }
    }
}

/// Partition [lo, hi] around the last record; returns the pivot's final
/// index.
unsafe fn partition(base: *mut u8, lo: usize, hi: usize, r: usize, cmp: &Comparator) -> usize {
    let pivot = base.add(hi * r);
    let mut i = lo;
    for j in lo..hi {
        let rec = base.add(j * r);
        if cmp.compare_ptr(rec, pivot) < 0 {
            swap_records(base.add(i * r), rec, r);
            i += 1;
        }
    }
    swap_records(base.add(i * r), pivot, r);
    i
}

unsafe fn insertion_sort(base: *mut u8, lo: usize, hi: usize, r: usize, cmp: &Comparator) {
    for i in (lo + 1)..=hi {
        let mut j = i;
        while j > lo && cmp.compare_ptr(base.add(j * r), base.add((j - 1) * r)) < 0 {
            swap_records(base.add(j * r), base.add((j - 1) * r), r);
            j -= 1;
        }
    }
}

/// Byte-copy swap of two records through a bounce buffer.
unsafe fn swap_records(a: *mut u8, b: *mut u8, r: usize) {
    if a == b {
        return;
    }
    if r <= SWAP_BUF {
        let mut tmp = [0u8; SWAP_BUF];
        ptr::copy_nonoverlapping(a, tmp.as_mut_ptr(), r);
        ptr::copy_nonoverlapping(b, a, r);
        ptr::copy_nonoverlapping(tmp.as_ptr(), b, r);
    } else {
        let mut tmp = vec![0u8; r];
        ptr::copy_nonoverlapping(a, tmp.as_mut_ptr(), r);
        ptr::copy_nonoverlapping(b, a, r);
        ptr::copy_nonoverlapping(tmp.as_ptr(), b, r);
    }
}

/// k-way merge of the sorted chunks into a scratch buffer, then one
/// copy-back pass. Ties between chunk heads go to the lowest chunk index.
fn merge_chunks(data: &mut [u8], r: usize, chunk_records: usize, cmp: &Comparator) {
    let n = data.len() / r;
    let num_chunks = (n + chunk_records - 1) / chunk_records;
    let mut scratch = vec![0u8; data.len()];

    // (head, end) record indices per chunk; head advances as records drain.
    let mut heads: Vec<(usize, usize)> = (0..num_chunks)
        .map(|i| (i * chunk_records, ((i + 1) * chunk_records).min(n)))
        .collect();

    for out in 0..n {
        let mut min = usize::MAX;
        for (i, &(head, end)) in heads.iter().enumerate() {
            if head == end {
                continue;
            }
            if min == usize::MAX {
                min = i;
                continue;
            }
            let cand = &data[head * r..head * r + r];
            let best = &data[heads[min].0 * r..heads[min].0 * r + r];
            if cmp.compare(cand, best) == Ordering::Less {
                min = i;
            }
        }
        let head = heads[min].0;
        scratch[out * r..out * r + r].copy_from_slice(&data[head * r..head * r + r]);
        heads[min].0 += 1;
    }

    data.copy_from_slice(&scratch);
}
