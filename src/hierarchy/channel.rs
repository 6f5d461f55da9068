//! Channel level (spec §4.6): an ordered list of segments plus the
//! channel-wide metadata merged from them ("ephemeral data", spec §4.6) when
//! opened with `LH_GENERATE_EPHEMERAL_DATA`.

use anyhow::{ensure, Error};

use crate::header::UniversalHeader;
use crate::hierarchy::contigua::{self, Contiguon};
use crate::hierarchy::segment::Segment;
use crate::primitives::CHANNEL_NUMBER_NO_ENTRY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    TimeSeries,
    Video,
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub name: String,
    pub kind: ChannelKind,
    pub acquisition_channel_number: i32,
    pub segments: Vec<Segment>,
    /// Merged metadata header, populated only when ephemeral data is
    /// requested at open time (spec §4.6).
    pub ephemeral_header: Option<UniversalHeader>,
}

impl Channel {
    pub fn new(name: impl Into<String>, kind: ChannelKind) -> Self {
        Channel {
            name: name.into(),
            kind,
            acquisition_channel_number: CHANNEL_NUMBER_NO_ENTRY,
            segments: Vec::new(),
            ephemeral_header: None,
        }
    }

    pub fn segment(&self, segment_number: i32) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|s| s.segment_number == segment_number)
    }

    /// Total sample count across every segment, used by the slice resolver
    /// when a caller asks for `"end"` as an index.
    pub fn total_samples(&self) -> i64 {
        self.segments.iter().map(|s| s.total_number_of_samples).sum()
    }

    pub fn start_time(&self) -> Option<i64> {
        self.segments.first().and_then(Segment::start_time)
    }

    pub fn end_time(&self) -> Option<i64> {
        self.segments.last().and_then(Segment::end_time)
    }

    /// Maximal contiguous sample ranges across this channel's segments
    /// (spec §4.6 "Contiguon").
    pub fn contigua(&self) -> Vec<Contiguon> {
        contigua::build_channel_contigua(self)
    }

    /// Builds the synthesized ephemeral header by folding every segment
    /// header's universal header together with [`UniversalHeader::merge`],
    /// the same pairwise reduction the original library applies bottom-up.
    pub fn build_ephemeral_header(&mut self, segment_headers: &[UniversalHeader]) -> Result<(), Error> {
        ensure!(
            !segment_headers.is_empty(),
            crate::error::generic("cannot build ephemeral header from zero segments")
        );
        let mut merged = segment_headers[0].clone();
        for h in &segment_headers[1..] {
            merged = UniversalHeader::merge(&merged, h);
        }
        self.ephemeral_header = Some(merged);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_samples_sums_segments() {
        let mut chan = Channel::new("chan_1", ChannelKind::TimeSeries);
        let mut s1 = Segment::new(1, 256.0);
        s1.total_number_of_samples = 1024;
        let mut s2 = Segment::new(2, 256.0);
        s2.total_number_of_samples = 2048;
        chan.segments.push(s1);
        chan.segments.push(s2);
        assert_eq!(3072, chan.total_samples());
    }

    #[test]
    fn segment_lookup_by_number() {
        let mut chan = Channel::new("chan_1", ChannelKind::TimeSeries);
        chan.segments.push(Segment::new(1, 256.0));
        chan.segments.push(Segment::new(2, 256.0));
        assert!(chan.segment(2).is_some());
        assert!(chan.segment(3).is_none());
    }
}
