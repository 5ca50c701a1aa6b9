//! Row partitioning with halo padding.
//!
//! Pure and deterministic: identical (height, workers, radius) always yields
//! identical assignments, so the scatter and gather sides can each derive the
//! plan independently without exchanging it.

/// One worker's share of the image for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// Worker rank, 0-indexed.
    pub rank: usize,
    /// First row this worker produces output for.
    pub start: usize,
    /// Number of rows this worker produces output for.
    pub rows: usize,
    /// Halo padding requested on each side (the layer's kernel radius).
    pub halo: usize,
    /// First row of the halo'd buffer, clamped to the image.
    pub buffer_start: usize,
    /// Total rows in the halo'd buffer, clamped to the image.
    pub buffer_rows: usize,
}

impl Assignment {
    /// Working start relative to the buffer start.
    pub fn offset(&self) -> usize {
        self.start - self.buffer_start
    }
}

/// Split `height` rows across `workers` ranks with `radius` rows of halo.
///
/// `base = height / workers`; ranks strictly below `height % workers` take
/// one extra row. Working ranges are contiguous in rank order and disjoint;
/// buffer ranges extend them by `radius` on each side, clamped to the image.
/// Ranks beyond the row supply (height < workers) get empty assignments.
///
/// # Panics
/// Panics if `workers` is zero; a topology without participants is a
/// programming error, not a runtime condition.
pub fn plan(height: usize, workers: usize, radius: usize) -> Vec<Assignment> {
    assert!(workers > 0, "partition requires at least one worker");

    let base = height / workers;
    let remainder = height % workers;

    let mut assignments = Vec::with_capacity(workers);
    let mut start = 0usize;
    for rank in 0..workers {
        let rows = base + usize::from(rank < remainder);

        let (buffer_start, buffer_rows) = if rows == 0 {
            (start.min(height), 0)
        } else {
            let lo = start.saturating_sub(radius);
            let hi = (start + rows + radius).min(height);
            (lo, hi - lo)
        };

        assignments.push(Assignment {
            rank,
            start,
            rows,
            halo: radius,
            buffer_start,
            buffer_rows,
        });
        start += rows;
    }
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_coverage(height: usize, workers: usize, radius: usize) {
        let plan = plan(height, workers, radius);
        assert_eq!(plan.len(), workers);

        // Working rows sum to the image height and tile it in order.
        let total: usize = plan.iter().map(|a| a.rows).sum();
        assert_eq!(total, height, "H={height} N={workers}");
        let mut cursor = 0;
        for a in &plan {
            assert_eq!(a.start, cursor);
            cursor += a.rows;
        }

        // Shares differ by at most one row.
        let min = plan.iter().map(|a| a.rows).min().unwrap();
        let max = plan.iter().map(|a| a.rows).max().unwrap();
        assert!(max - min <= 1, "H={height} N={workers}: {min}..{max}");

        // Buffer ranges stay inside the image and cover the working range.
        for a in &plan {
            assert!(a.buffer_start + a.buffer_rows <= height);
            if a.rows > 0 {
                assert!(a.buffer_start <= a.start);
                assert!(a.buffer_start + a.buffer_rows >= a.start + a.rows);
                assert!(a.start - a.buffer_start <= radius);
                assert_eq!(a.offset(), a.start - a.buffer_start);
            } else {
                assert_eq!(a.buffer_rows, 0);
            }
        }
    }

    #[test]
    fn test_coverage_sweep() {
        for height in [1, 2, 3, 7, 16, 97, 1080] {
            for workers in [1, 2, 3, 5, 16, 33] {
                for radius in [0, 1, 2, 3] {
                    check_coverage(height, workers, radius);
                }
            }
        }
    }

    #[test]
    fn test_remainder_goes_to_low_ranks() {
        // 10 rows over 4 workers: ranks 0 and 1 take the two extra rows.
        let plan = plan(10, 4, 1);
        assert_eq!(
            plan.iter().map(|a| a.rows).collect::<Vec<_>>(),
            vec![3, 3, 2, 2]
        );
    }

    #[test]
    fn test_halo_clamps_at_edges() {
        let plan = plan(12, 3, 2);
        // First worker: no halo above.
        assert_eq!(plan[0].buffer_start, 0);
        assert_eq!(plan[0].buffer_rows, 4 + 2);
        // Middle worker: halo on both sides.
        assert_eq!(plan[1].buffer_start, 2);
        assert_eq!(plan[1].buffer_rows, 2 + 4 + 2);
        // Last worker: no halo below.
        assert_eq!(plan[2].buffer_start, 6);
        assert_eq!(plan[2].buffer_rows, 2 + 4);
    }

    #[test]
    fn test_single_row_image() {
        let plan = plan(1, 1, 2);
        assert_eq!(plan[0].rows, 1);
        assert_eq!(plan[0].buffer_start, 0);
        assert_eq!(plan[0].buffer_rows, 1);
    }

    #[test]
    fn test_more_workers_than_rows() {
        let plan = plan(2, 5, 1);
        assert_eq!(
            plan.iter().map(|a| a.rows).collect::<Vec<_>>(),
            vec![1, 1, 0, 0, 0]
        );
        for a in &plan[2..] {
            assert_eq!(a.buffer_rows, 0);
        }
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(plan(1080, 16, 3), plan(1080, 16, 3));
    }

    #[test]
    #[should_panic(expected = "at least one worker")]
    fn test_zero_workers_panics() {
        plan(10, 0, 1);
    }
}
