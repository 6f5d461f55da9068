//! Session level (spec §4.6): owns the time-series and video channel
//! arrays, the Sgmt-record cache keyed by sampling frequency, and resolves
//! slices across the whole tree.

use std::collections::HashMap;

use anyhow::{ensure, Error};

use crate::hierarchy::channel::Channel;
use crate::hierarchy::contigua::{self, Contiguon};
use crate::hierarchy::slice::{SearchMode, Slice};
use crate::records::Sgmt;

/// `ordered_cmp` key used by the Sgmt cache: `(rate.to_bits())` so `f64`
/// can be hashed, matching the original "cache per sampling frequency"
/// indexing rule (spec §4.5).
fn rate_key(rate: f64) -> u64 {
    rate.to_bits()
}

#[derive(Debug, Default)]
pub struct Session {
    pub time_series_channels: Vec<Channel>,
    pub video_channels: Vec<Channel>,
    /// Index channel chosen at open time as the reference rate for
    /// sample-number <-> time mapping (spec §4.6 step 3).
    pub index_channel: Option<usize>,
    sgmt_cache: HashMap<u64, Vec<Sgmt>>,
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.time_series_channels
            .iter()
            .chain(self.video_channels.iter())
            .find(|c| c.name == name)
    }

    pub fn index_channel(&self) -> Option<&Channel> {
        self.index_channel
            .and_then(|i| self.time_series_channels.get(i))
    }

    pub fn set_index_channel(&mut self, channel_index: usize) -> Result<(), Error> {
        ensure!(
            channel_index < self.time_series_channels.len(),
            crate::error::generic("index channel number out of range")
        );
        self.index_channel = Some(channel_index);
        Ok(())
    }

    /// Registers a channel's Sgmt records into the session-level cache,
    /// one list per distinct sampling rate (spec §4.5: "one cache per
    /// sampling frequency"). Mixing major versions of `Sgmt` within one
    /// rate's index is rejected: a v1.0 index merged with v1.1 records
    /// would silently lose the fields v1.1 dropped.
    pub fn cache_sgmt_records(&mut self, records: impl IntoIterator<Item = Sgmt>) -> Result<(), Error> {
        for rec in records {
            let bucket = self.sgmt_cache.entry(rate_key(rec.sampling_rate())).or_default();
            if let Some(first) = bucket.first() {
                ensure!(
                    std::mem::discriminant(first) == std::mem::discriminant(&rec),
                    crate::error::record_error("mixed Sgmt record versions within one index")
                );
            }
            bucket.push(rec);
        }
        Ok(())
    }

    pub fn sgmt_records_for_rate(&self, rate: f64) -> &[Sgmt] {
        self.sgmt_cache
            .get(&rate_key(rate))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Session-wide contigua (spec §4.6): each time-series channel's own
    /// contigua intersected together, so a sample range only survives where
    /// every channel agrees it is contiguous.
    pub fn contigua(&self) -> Vec<Contiguon> {
        let per_channel: Vec<Vec<Contiguon>> = self
            .time_series_channels
            .iter()
            .map(Channel::contigua)
            .collect();
        contigua::intersect_contigua(&per_channel)
    }

    pub fn session_start_time(&self) -> i64 {
        self.time_series_channels
            .iter()
            .filter_map(Channel::start_time)
            .min()
            .unwrap_or(crate::primitives::BEGINNING_OF_TIME)
    }

    pub fn session_end_time(&self) -> i64 {
        self.time_series_channels
            .iter()
            .filter_map(Channel::end_time)
            .max()
            .unwrap_or(crate::primitives::END_OF_TIME)
    }

    /// `condition_slice` (spec §4.6): normalizes sentinels against the
    /// session's actual start/end times, picks a search mode, and (if the
    /// slice was given by index) binary-searches the cached Sgmt records
    /// for the covering segment range.
    pub fn condition_slice(&self, slice: &mut Slice) -> Result<(), Error> {
        let session_start = self.session_start_time();
        let session_end = self.session_end_time();

        if slice.start_time == crate::primitives::BEGINNING_OF_TIME {
            slice.start_time = session_start;
        }
        if slice.end_time == crate::primitives::END_OF_TIME {
            slice.end_time = session_end;
        }
        if slice.start_time < 0 {
            slice.start_time = session_start + slice.start_time.abs();
        }
        if slice.end_time < 0 {
            slice.end_time = session_end - slice.end_time.abs();
        }

        slice.mode = if slice.start_index.is_some() || slice.end_index.is_some() {
            SearchMode::Index
        } else {
            SearchMode::Time
        };

        let rate = self
            .index_channel()
            .map(|c| c.segments.first().map(|s| s.sampling_frequency).unwrap_or(0.0))
            .unwrap_or(0.0);
        let sgmt_recs = self.sgmt_records_for_rate(rate);
        if !sgmt_recs.is_empty() {
            let (start_seg, end_seg) = crate::hierarchy::slice::search_sgmt_records(
                sgmt_recs,
                slice,
            );
            slice.start_segment_number = Some(start_seg);
            slice.end_segment_number = Some(end_seg);
        }

        slice.conditioned = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::channel::ChannelKind;
    use crate::hierarchy::segment::{Segment, TsiEntry};

    fn session_with_one_channel() -> Session {
        let mut session = Session::new();
        let mut chan = Channel::new("chan_1", ChannelKind::TimeSeries);
        let mut seg = Segment::new(1, 256.0);
        seg.indices.push(TsiEntry {
            file_offset: 0,
            start_time: 1_000,
            start_sample_number: 0,
        });
        seg.indices.push(TsiEntry {
            file_offset: 64,
            start_time: 5_000,
            start_sample_number: 256,
        });
        seg.total_number_of_samples = 512;
        chan.segments.push(seg);
        session.time_series_channels.push(chan);
        session.set_index_channel(0).unwrap();
        session
    }

    #[test]
    fn condition_slice_fills_beginning_and_end_of_time() {
        let session = session_with_one_channel();
        let mut slice = Slice::default();
        slice.start_time = crate::primitives::BEGINNING_OF_TIME;
        slice.end_time = crate::primitives::END_OF_TIME;
        session.condition_slice(&mut slice).unwrap();
        assert_eq!(1_000, slice.start_time);
        assert_eq!(5_000, slice.end_time);
        assert!(slice.conditioned);
    }

    #[test]
    fn session_contigua_splits_on_channel_discontinuity() {
        let mut session = session_with_one_channel();
        let chan = &mut session.time_series_channels[0];
        chan.segments[0].indices.push(TsiEntry {
            file_offset: -128,
            start_time: 11_000,
            start_sample_number: 512,
        });
        chan.segments[0].indices.push(TsiEntry {
            file_offset: 192,
            start_time: 12_000,
            start_sample_number: 768,
        });

        let contigua = session.contigua();
        assert_eq!(2, contigua.len());
    }

    #[test]
    fn condition_slice_picks_index_mode_when_indices_set() {
        let session = session_with_one_channel();
        let mut slice = Slice::default();
        slice.start_index = Some(0);
        slice.end_index = Some(100);
        session.condition_slice(&mut slice).unwrap();
        assert_eq!(SearchMode::Index, slice.mode);
    }
}
