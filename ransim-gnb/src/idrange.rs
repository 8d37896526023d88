//! NGAP id range partitioning and allocation
//!
//! Every gNB draws its RAN UE NGAP ids (and downlink TEIDs) from a range
//! disjoint from every other gNB's, so ids never collide across gNBs in one
//! simulator process. Within a range, a bounded allocator hands out ids and
//! reclaims them on release; running out of ids is a fatal error.

use std::collections::HashSet;

use ransim_common::Error;

/// Width of each per-gNB id partition.
const RANGE_WIDTH: i64 = 1 << 16;

/// Returns the inclusive id range `[start, end]` for a gNB index.
pub fn range_for_gnb(gnb_index: u8) -> (i64, i64) {
    let start = i64::from(gnb_index) * RANGE_WIDTH + 1;
    let end = (i64::from(gnb_index) + 1) * RANGE_WIDTH - 1;
    (start, end)
}

/// Bounded id allocator with reclamation.
#[derive(Debug)]
pub struct IdGenerator {
    start: i64,
    end: i64,
    cursor: i64,
    in_use: HashSet<i64>,
}

impl IdGenerator {
    /// Creates an allocator over the inclusive range `[start, end]`.
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start,
            end,
            cursor: start,
            in_use: HashSet::new(),
        }
    }

    /// Allocates the next free id.
    ///
    /// Scans at most one full revolution of the range; a fully occupied
    /// range yields [`Error::IdExhausted`].
    pub fn allocate(&mut self) -> Result<i64, Error> {
        let span = self.end - self.start + 1;
        for _ in 0..span {
            let candidate = self.cursor;
            self.cursor = if self.cursor == self.end {
                self.start
            } else {
                self.cursor + 1
            };
            if self.in_use.insert(candidate) {
                return Ok(candidate);
            }
        }
        Err(Error::IdExhausted)
    }

    /// Returns an id to the pool.
    pub fn release(&mut self, id: i64) {
        self.in_use.remove(&id);
    }

    /// Number of ids currently allocated.
    pub fn allocated(&self) -> usize {
        self.in_use.len()
    }
}
