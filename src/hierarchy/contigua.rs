//! Contiguon discovery (spec §4.6): maximal sample ranges with no
//! discontinuity, built bottom-up from a segment's Time-Series Index and
//! propagated up the hierarchy by intersection.

use crate::hierarchy::channel::Channel;
use crate::hierarchy::segment::Segment;

/// A maximal contiguous range (spec GLOSSARY: "Contiguon").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Contiguon {
    pub start_time: i64,
    pub end_time: i64,
    pub start_sample_number: i64,
    pub end_sample_number: i64,
    pub start_segment_number: i32,
    pub end_segment_number: i32,
}

/// `build_contigua` (spec §4.6): walks one segment's index, opening a new
/// contiguon whenever a negative `file_offset` marks a discontinuity.
pub fn build_segment_contigua(segment: &Segment) -> Vec<Contiguon> {
    let mut out = Vec::new();
    let mut current: Option<Contiguon> = None;

    for entry in &segment.indices {
        if entry.is_discontinuous() || current.is_none() {
            if let Some(c) = current.take() {
                out.push(c);
            }
            current = Some(Contiguon {
                start_time: entry.start_time,
                end_time: entry.start_time,
                start_sample_number: entry.start_sample_number,
                end_sample_number: entry.start_sample_number,
                start_segment_number: segment.segment_number,
                end_segment_number: segment.segment_number,
            });
        } else if let Some(c) = current.as_mut() {
            c.end_time = entry.start_time;
            c.end_sample_number = entry.start_sample_number;
        }
    }

    if let Some(c) = current {
        out.push(c);
    }
    out
}

/// Concatenates per-segment contigua across a channel, merging the boundary
/// between consecutive segments when the second segment's first sample
/// follows the first segment's last with no gap marker (spec §4.6: a
/// discontinuity is only ever recorded in the index, so segment boundaries
/// themselves are not implicitly discontinuous).
pub fn build_channel_contigua(channel: &Channel) -> Vec<Contiguon> {
    let mut out: Vec<Contiguon> = Vec::new();
    for segment in &channel.segments {
        for c in build_segment_contigua(segment) {
            match out.last_mut() {
                Some(prev)
                    if prev.end_sample_number + 1 == c.start_sample_number
                        || prev.end_segment_number != c.start_segment_number =>
                {
                    prev.end_time = c.end_time;
                    prev.end_sample_number = c.end_sample_number;
                    prev.end_segment_number = c.end_segment_number;
                }
                _ => out.push(c),
            }
        }
    }
    out
}

/// Propagates contigua to the session level by intersecting per-channel
/// ranges (spec §4.6: "propagated up the hierarchy by intersecting
/// per-channel contigua at the session level"). A sample range survives
/// only where every channel considers it contiguous.
pub fn intersect_contigua(per_channel: &[Vec<Contiguon>]) -> Vec<Contiguon> {
    let mut iter = per_channel.iter();
    let Some(first) = iter.next() else {
        return Vec::new();
    };
    let mut acc = first.clone();

    for next in iter {
        let mut merged = Vec::new();
        for a in &acc {
            for b in next {
                let start = a.start_sample_number.max(b.start_sample_number);
                let end = a.end_sample_number.min(b.end_sample_number);
                if start <= end {
                    merged.push(Contiguon {
                        start_time: a.start_time.max(b.start_time),
                        end_time: a.end_time.min(b.end_time),
                        start_sample_number: start,
                        end_sample_number: end,
                        start_segment_number: a.start_segment_number,
                        end_segment_number: a.end_segment_number,
                    });
                }
            }
        }
        acc = merged;
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::segment::TsiEntry;

    #[test]
    fn discontinuity_splits_contiguon() {
        let mut seg = Segment::new(1, 256.0);
        seg.indices.push(TsiEntry {
            file_offset: 0,
            start_time: 0,
            start_sample_number: 0,
        });
        seg.indices.push(TsiEntry {
            file_offset: 64,
            start_time: 1_000,
            start_sample_number: 256,
        });
        seg.indices.push(TsiEntry {
            file_offset: -128, // discontinuity
            start_time: 11_000,
            start_sample_number: 512,
        });
        seg.indices.push(TsiEntry {
            file_offset: 192,
            start_time: 12_000,
            start_sample_number: 768,
        });

        let contigua = build_segment_contigua(&seg);
        assert_eq!(2, contigua.len());
        assert_eq!(256, contigua[0].end_sample_number);
        assert_eq!(512, contigua[1].start_sample_number);
    }

    #[test]
    fn no_discontinuity_is_single_contiguon() {
        let mut seg = Segment::new(1, 256.0);
        for i in 0..4 {
            seg.indices.push(TsiEntry {
                file_offset: i * 64,
                start_time: i * 1000,
                start_sample_number: i * 256,
            });
        }
        let contigua = build_segment_contigua(&seg);
        assert_eq!(1, contigua.len());
    }
}
