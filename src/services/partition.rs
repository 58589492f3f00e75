//! Size-balanced partitioning of work items across a fixed number of workers.
//!
//! Tool invocations are dominated by the size of the file being processed, so the
//! buckets are balanced by total byte size rather than item count. The heuristic is the
//! classic greedy "largest first into the lightest bucket": it is not an optimal
//! partition, but it is deterministic, O(n log n), and keeps the difference between any
//! two buckets within the size of the single largest item.

use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// A file path paired with its size in bytes at the time it was measured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedFile {
    pub path: Utf8PathBuf,
    pub size: u64,
}

impl SizedFile {
    /// Measure a file on disk. Unreadable metadata counts as size 0.
    pub fn measure(path: &Utf8Path) -> Self {
        let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        Self {
            path: path.to_path_buf(),
            size,
        }
    }
}

/// Measure every path in `paths`.
pub fn measure_all<I, P>(paths: I) -> Vec<SizedFile>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Utf8Path>,
{
    paths
        .into_iter()
        .map(|p| SizedFile::measure(p.as_ref()))
        .collect()
}

/// Split `items` into `buckets` groups whose total sizes are as even as the greedy
/// heuristic allows.
///
/// Items are sorted ascending by size (stable, so equal sizes keep their input order),
/// then walked from the largest down. Each item goes to the bucket with the smallest
/// running total; ties go to the lowest-index bucket.
///
/// A `buckets` value of 0 is treated as 1. Empty input yields `buckets` empty groups.
pub fn partition_by_size<T, F>(items: Vec<T>, buckets: usize, size_of: F) -> Vec<Vec<T>>
where
    F: Fn(&T) -> u64,
{
    let buckets = buckets.max(1);
    let mut sorted = items;
    sorted.sort_by_key(|item| size_of(item));

    let mut groups: Vec<Vec<T>> = (0..buckets).map(|_| Vec::new()).collect();
    let mut totals = vec![0u64; buckets];

    for item in sorted.into_iter().rev() {
        let size = size_of(&item);
        let target = lightest_bucket(&totals);
        totals[target] = totals[target].saturating_add(size);
        groups[target].push(item);
    }

    groups
}

/// Total size of a bucket.
pub fn bucket_size(files: &[SizedFile]) -> u64 {
    files.iter().map(|f| f.size).sum()
}

fn lightest_bucket(totals: &[u64]) -> usize {
    let mut best = 0;
    for (index, total) in totals.iter().enumerate().skip(1) {
        if *total < totals[best] {
            best = index;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn file(name: &str, size: u64) -> SizedFile {
        SizedFile {
            path: Utf8PathBuf::from(name),
            size,
        }
    }

    #[test]
    fn test_empty_input_yields_empty_buckets() {
        let groups = partition_by_size(Vec::<u64>::new(), 3, |s| *s);
        assert_eq!(groups.len(), 3);
        assert!(groups.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_two_archives_split_one_each() {
        let groups = partition_by_size(
            vec![file("small.pbo", 2 * MB), file("big.pbo", 10 * MB)],
            2,
            |f| f.size,
        );

        assert_eq!(groups[0], vec![file("big.pbo", 10 * MB)]);
        assert_eq!(groups[1], vec![file("small.pbo", 2 * MB)]);
        assert_eq!(bucket_size(&groups[0]) - bucket_size(&groups[1]), 8 * MB);
    }

    #[test]
    fn test_largest_items_placed_first() {
        let groups = partition_by_size(vec![1u64, 7, 3, 5], 2, |s| *s);

        // 7 -> A, 5 -> B, 3 -> B (5 < 7), 1 -> A (7 < 8)
        assert_eq!(groups[0], vec![7, 1]);
        assert_eq!(groups[1], vec![5, 3]);
    }

    #[test]
    fn test_ties_go_to_first_bucket() {
        let groups = partition_by_size(vec![4u64, 4, 4, 4], 2, |s| *s);
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].len(), 2);

        let groups = partition_by_size(vec![4u64], 3, |s| *s);
        assert_eq!(groups[0], vec![4]);
    }

    #[test]
    fn test_zero_buckets_treated_as_one() {
        let groups = partition_by_size(vec![1u64, 2, 3], 0, |s| *s);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0], vec![3, 2, 1]);
    }

    #[test]
    fn test_measure_missing_file_is_zero() {
        let sized = SizedFile::measure(Utf8Path::new("/definitely/not/here.pbo"));
        assert_eq!(sized.size, 0);
    }
}
