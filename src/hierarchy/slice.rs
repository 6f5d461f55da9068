//! Slice resolution (spec §4.6): a selection over time and/or sample-index
//! range, resolved into segment and block boundaries by
//! [`crate::hierarchy::session::Session::condition_slice`] and
//! [`find_index`].

use crate::primitives::{BEGINNING_OF_TIME, END_OF_TIME, SEGMENT_NUMBER_NO_ENTRY};
use crate::records::Sgmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Time,
    Index,
}

/// A selection over a session's samples. Fields left at their sentinel
/// default are filled in by `condition_slice`.
#[derive(Debug, Clone)]
pub struct Slice {
    pub start_time: i64,
    pub end_time: i64,
    pub start_index: Option<i64>,
    pub end_index: Option<i64>,
    pub start_segment_number: Option<i32>,
    pub end_segment_number: Option<i32>,
    pub mode: SearchMode,
    pub conditioned: bool,
}

impl Default for Slice {
    fn default() -> Self {
        Slice {
            start_time: BEGINNING_OF_TIME,
            end_time: END_OF_TIME,
            start_index: None,
            end_index: None,
            start_segment_number: None,
            end_segment_number: None,
            mode: SearchMode::Time,
            conditioned: false,
        }
    }
}

/// Binary search over the session's cached Sgmt records (spec §4.6 step 4)
/// to find the segment numbers covering `slice`'s resolved start/end. Runs
/// in O(log n); falls back to a linear scan's result if the list is very
/// small, which a `partition_point` binary search already handles without
/// a separate code path.
pub fn search_sgmt_records(records: &[Sgmt], slice: &Slice) -> (i32, i32) {
    if records.is_empty() {
        return (SEGMENT_NUMBER_NO_ENTRY, SEGMENT_NUMBER_NO_ENTRY);
    }

    let start_pos = records.partition_point(|r| r.end_time() < slice.start_time);
    let end_pos = records.partition_point(|r| r.end_time() < slice.end_time);

    let start_seg = records
        .get(start_pos)
        .or_else(|| records.last())
        .map(Sgmt::segment_number)
        .unwrap_or(SEGMENT_NUMBER_NO_ENTRY);
    let end_seg = records
        .get(end_pos)
        .or_else(|| records.last())
        .map(Sgmt::segment_number)
        .unwrap_or(SEGMENT_NUMBER_NO_ENTRY);

    (start_seg, end_seg)
}

/// Mode flags for [`find_index`] (spec §4.6 "Block lookup").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindIndexMode {
    Closest,
    LastBefore,
    FirstOnOrAfter,
    LastOnOrBefore,
    FirstAfter,
}

/// Whether `target` is a session-absolute sample number or one relative to
/// the segment's own first index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Numbering {
    Absolute,
    Relative,
}

/// Binary-searches a segment's ordered sample-number index (the segment's
/// `TsiEntry::start_sample_number` column) for the entry matching `target`
/// under `mode`. `no_overflows` clamps an out-of-range result to the first
/// or last entry instead of returning `None`.
pub fn find_index(
    sample_numbers: &[i64],
    target: i64,
    mode: FindIndexMode,
    numbering: Numbering,
    segment_start_sample: i64,
    no_overflows: bool,
) -> Option<usize> {
    if sample_numbers.is_empty() {
        return None;
    }

    let target = match numbering {
        Numbering::Absolute => target,
        Numbering::Relative => segment_start_sample + target,
    };

    let pos = sample_numbers.partition_point(|&s| s < target);

    let resolved = match mode {
        FindIndexMode::FirstOnOrAfter => {
            if pos < sample_numbers.len() {
                Some(pos)
            } else if no_overflows {
                Some(sample_numbers.len() - 1)
            } else {
                None
            }
        }
        FindIndexMode::FirstAfter => {
            let pos = sample_numbers.partition_point(|&s| s <= target);
            if pos < sample_numbers.len() {
                Some(pos)
            } else if no_overflows {
                Some(sample_numbers.len() - 1)
            } else {
                None
            }
        }
        FindIndexMode::LastBefore => {
            if pos > 0 {
                Some(pos - 1)
            } else if no_overflows {
                Some(0)
            } else {
                None
            }
        }
        FindIndexMode::LastOnOrBefore => {
            let exact = sample_numbers.partition_point(|&s| s <= target);
            if exact > 0 {
                Some(exact - 1)
            } else if no_overflows {
                Some(0)
            } else {
                None
            }
        }
        FindIndexMode::Closest => {
            let after = pos.min(sample_numbers.len() - 1);
            let before = pos.saturating_sub(1);
            if (sample_numbers[after] - target).abs() <= (target - sample_numbers[before]).abs() {
                Some(after)
            } else {
                Some(before)
            }
        }
    };
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_index_first_on_or_after() {
        let samples = vec![0, 256, 512, 768, 1024];
        assert_eq!(
            Some(2),
            find_index(
                &samples,
                500,
                FindIndexMode::FirstOnOrAfter,
                Numbering::Absolute,
                0,
                false
            )
        );
        assert_eq!(
            Some(1),
            find_index(
                &samples,
                256,
                FindIndexMode::FirstOnOrAfter,
                Numbering::Absolute,
                0,
                false
            )
        );
    }

    #[test]
    fn find_index_last_before() {
        let samples = vec![0, 256, 512, 768, 1024];
        assert_eq!(
            Some(1),
            find_index(
                &samples,
                500,
                FindIndexMode::LastBefore,
                Numbering::Absolute,
                0,
                false
            )
        );
    }

    #[test]
    fn find_index_closest() {
        let samples = vec![0, 256, 512];
        assert_eq!(
            Some(0),
            find_index(
                &samples,
                100,
                FindIndexMode::Closest,
                Numbering::Absolute,
                0,
                false
            )
        );
        assert_eq!(
            Some(1),
            find_index(
                &samples,
                200,
                FindIndexMode::Closest,
                Numbering::Absolute,
                0,
                false
            )
        );
    }

    #[test]
    fn find_index_no_overflows_clamps() {
        let samples = vec![0, 256, 512];
        assert_eq!(
            Some(2),
            find_index(
                &samples,
                10_000,
                FindIndexMode::FirstOnOrAfter,
                Numbering::Absolute,
                0,
                true
            )
        );
        assert_eq!(
            None,
            find_index(
                &samples,
                10_000,
                FindIndexMode::FirstOnOrAfter,
                Numbering::Absolute,
                0,
                false
            )
        );
    }

    #[test]
    fn relative_numbering_offsets_by_segment_start() {
        let samples = vec![1000, 1256, 1512];
        assert_eq!(
            Some(1),
            find_index(
                &samples,
                256,
                FindIndexMode::FirstOnOrAfter,
                Numbering::Relative,
                1000,
                false
            )
        );
    }
}
