//! Partitioning a positional range into fetch-sized chunks.
//!
//! `plan_chunks(total, size)` walks `1..=total` in steps of `size` and emits
//! one `ChunkRange` per step:
//! - a single index when the step covers one message
//! - `start:end` for a full step that stops short of the last message
//! - `start:*` for the step that reaches the last message, so a mailbox that
//!   grows mid-scan is still read to its end

use std::fmt;

/// Largest number of messages requested in one batch fetch.
pub const MAX_CHUNK_SIZE: u32 = 1000;

/// Target number of round trips for a large mailbox.
const TARGET_ROUND_TRIPS: u32 = 10;

/// A contiguous run of message numbers, in IMAP sequence-set syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkRange {
    /// One message: `n`.
    Single(u32),
    /// Closed range: `start:end`.
    Closed(u32, u32),
    /// Open-ended range through the highest message: `start:*`.
    Open(u32),
}

impl ChunkRange {
    /// First index covered by this range.
    pub fn start(&self) -> u32 {
        match *self {
            Self::Single(n) | Self::Closed(n, _) | Self::Open(n) => n,
        }
    }

    /// Whether `n` falls inside this range. `highest` resolves the `*` of an open range.
    pub fn contains(&self, n: u32, highest: u32) -> bool {
        match *self {
            Self::Single(s) => n == s,
            Self::Closed(s, e) => (s..=e).contains(&n),
            Self::Open(s) => (s..=highest).contains(&n),
        }
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(n) => write!(f, "{n}"),
            Self::Closed(s, e) => write!(f, "{s}:{e}"),
            Self::Open(s) => write!(f, "{s}:*"),
        }
    }
}

/// Lazy sequence of chunks covering `1..=total`.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    next_start: u64,
    total: u64,
    chunk_size: u64,
}

impl Iterator for ChunkPlan {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<ChunkRange> {
        if self.next_start > self.total {
            return None;
        }
        let start = self.next_start;
        let end = (start + self.chunk_size - 1).min(self.total);
        self.next_start = start + self.chunk_size;

        // Both values are bounded by `total`, which came in as a u32.
        let (start, end) = (start as u32, end as u32);
        let range = if end <= start {
            ChunkRange::Single(start)
        } else if u64::from(end) == self.total {
            ChunkRange::Open(start)
        } else {
            ChunkRange::Closed(start, end)
        };
        Some(range)
    }
}

/// Plan the batch fetches for a mailbox of `total` messages.
///
/// # Panics
///
/// Panics if `chunk_size` is zero.
pub fn plan_chunks(total: u32, chunk_size: u32) -> ChunkPlan {
    assert!(chunk_size >= 1, "chunk size must be at least 1");
    ChunkPlan {
        next_start: 1,
        total: u64::from(total),
        chunk_size: u64::from(chunk_size),
    }
}

/// Pick a chunk size for a mailbox of `total` messages.
///
/// Aims for ten round trips, capped at `MAX_CHUNK_SIZE` per request. Mailboxes
/// too small to split ten ways are fetched in a single chunk.
pub fn optimal_chunk_size(total: u32) -> u32 {
    let per_trip = total / TARGET_ROUND_TRIPS;
    if per_trip == 0 {
        total.max(1)
    } else {
        per_trip.min(MAX_CHUNK_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn planned(total: u32, chunk_size: u32) -> Vec<String> {
        plan_chunks(total, chunk_size).map(|c| c.to_string()).collect()
    }

    #[test]
    fn no_messages() {
        assert!(planned(0, 10).is_empty());
    }

    #[test]
    fn single_message() {
        assert_eq!(planned(1, 10), vec!["1"]);
    }

    #[test]
    fn two_messages() {
        assert_eq!(planned(2, 10), vec!["1:*"]);
    }

    #[test]
    fn one_chunk() {
        assert_eq!(planned(10, 10), vec!["1:*"]);
    }

    #[test]
    fn one_and_a_bit_chunks() {
        assert_eq!(planned(11, 10), vec!["1:10", "11"]);
    }

    #[test]
    fn two_chunks() {
        assert_eq!(planned(20, 10), vec!["1:10", "11:*"]);
    }

    #[test]
    fn with_no_chunking() {
        assert_eq!(planned(5, 1), vec!["1", "2", "3", "4", "5"]);
    }

    #[test]
    #[should_panic(expected = "chunk size")]
    fn zero_chunk_size_fails_fast() {
        let _ = plan_chunks(5, 0);
    }

    #[test]
    fn chunk_size_caps_at_maximum() {
        assert_eq!(optimal_chunk_size(1_000_000), MAX_CHUNK_SIZE);
    }

    #[test]
    fn chunk_size_targets_ten_round_trips() {
        assert_eq!(optimal_chunk_size(500), 50);
        assert_eq!(plan_chunks(500, optimal_chunk_size(500)).count(), 10);
    }

    #[test]
    fn small_mailboxes_use_one_chunk() {
        assert_eq!(optimal_chunk_size(0), 1);
        assert_eq!(optimal_chunk_size(7), 7);
        assert_eq!(planned(7, optimal_chunk_size(7)), vec!["1:*"]);
    }

    #[test]
    fn contains_resolves_open_range() {
        assert!(ChunkRange::Open(5).contains(9, 9));
        assert!(!ChunkRange::Open(5).contains(4, 9));
        assert!(ChunkRange::Closed(2, 4).contains(4, 100));
        assert!(!ChunkRange::Single(3).contains(4, 100));
    }

    proptest! {
        #[test]
        fn chunks_cover_every_index_once(total in 0u32..3000, chunk_size in 1u32..1200) {
            let chunks: Vec<ChunkRange> = plan_chunks(total, chunk_size).collect();
            let mut expected = 1u32;
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.start(), expected);
                let end = match *chunk {
                    ChunkRange::Single(n) => n,
                    ChunkRange::Closed(_, e) => {
                        prop_assert!(e < total);
                        e
                    }
                    ChunkRange::Open(_) => {
                        prop_assert_eq!(i, chunks.len() - 1);
                        total
                    }
                };
                expected = end + 1;
            }
            prop_assert_eq!(expected, total + 1);

            if let Some(last) = chunks.last() {
                let is_open = matches!(last, ChunkRange::Open(_));
                let reaches_end_as_range = last.start() < total;
                prop_assert_eq!(is_open, reaches_end_as_range);
            }
        }
    }
}
