//! HDR sub-stream alignment and readback triggering.

use std::collections::BTreeMap;
use std::fmt;

use contracts::{
    AlignerConfig, EngineError, EngineResult, FloorMap, RawBuffer, ReadbackReport,
    SharedReadbackDevice, SyncGroup, WorkingMode, MAX_HDR_CHANNELS, MAX_READBACK_PASSES,
};
use tracing::{debug, instrument, warn};

use crate::buffer::ChannelBuffer;

/// Skip window `[start, start + count)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SkipWindow {
    start: u64,
    end: u64,
}

impl SkipWindow {
    fn contains(&self, sequence: u64) -> bool {
        (self.start..self.end).contains(&sequence)
    }
}

/// Running counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignerStats {
    /// Groups handed to the readback device
    pub delivered: u64,
    /// Groups discarded by the skip window
    pub skipped: u64,
    /// Groups whose readback trigger failed
    pub failed: u64,
    /// Buffers recycled without ever being part of a group
    pub stale: u64,
}

/// Groups one arrival completed
#[derive(Debug, Default)]
pub struct PushOutcome {
    /// Groups read back, in sequence order
    pub reports: Vec<ReadbackReport>,
    /// Groups the device rejected; already recycled
    pub failures: Vec<(u64, EngineError)>,
}

impl PushOutcome {
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty() && self.failures.is_empty()
    }
}

/// Matches raw buffers of the required channels by sequence number
///
/// On every arrival the smallest sequence present in all required channels
/// forms a [`SyncGroup`]; buffers older than it can never complete and are
/// recycled. When no sequence is common to every channel the lists are left
/// untouched. Groups leave in strictly increasing sequence order: an arrival
/// at or below the last dispatched sequence is recycled as stale.
pub struct StreamAligner {
    config: AlignerConfig,
    mode: WorkingMode,
    channels: Vec<ChannelBuffer>,
    device: SharedReadbackDevice,
    skip: Option<SkipWindow>,
    luma_hints: FloorMap<u8>,
    forced: BTreeMap<u64, u8>,
    last_dispatched: Option<u64>,
    stats: AlignerStats,
}

impl fmt::Debug for StreamAligner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamAligner")
            .field("mode", &self.mode)
            .field("device", &self.device.name())
            .field("channels", &self.channels)
            .field("skip", &self.skip)
            .field("last_dispatched", &self.last_dispatched)
            .field("stats", &self.stats)
            .finish()
    }
}

impl StreamAligner {
    pub fn new(config: AlignerConfig, mode: WorkingMode, device: SharedReadbackDevice) -> Self {
        let channels = (0..MAX_HDR_CHANNELS)
            .map(|_| ChannelBuffer::new(config.max_channel_depth))
            .collect();
        let luma_hints = FloorMap::new(config.luma_hint_window);
        Self {
            config,
            mode,
            channels,
            device,
            skip: None,
            luma_hints,
            forced: BTreeMap::new(),
            last_dispatched: None,
            stats: AlignerStats::default(),
        }
    }

    /// Channels that must hold a buffer before a group forms
    #[inline]
    pub fn required_channels(&self) -> usize {
        self.mode.exposure_count()
    }

    pub fn mode(&self) -> WorkingMode {
        self.mode
    }

    pub fn stats(&self) -> AlignerStats {
        self.stats
    }

    /// Pending buffers of one channel
    pub fn pending(&self, channel: usize) -> usize {
        self.channels.get(channel).map_or(0, ChannelBuffer::len)
    }

    /// Switch HDR mode, recycling everything pending
    pub fn set_hdr_mode(&mut self, mode: WorkingMode) {
        let flushed = self.flush();
        self.mode = mode;
        debug!(?mode, flushed, "hdr mode changed");
    }

    /// Recycle every pending buffer and forget the last dispatched sequence;
    /// returns how many buffers were recycled
    pub fn flush(&mut self) -> usize {
        self.last_dispatched = None;
        let mut flushed = 0;
        for channel in 0..self.channels.len() {
            for buffer in self.channels[channel].drain_all() {
                self.device.recycle(buffer);
                flushed += 1;
            }
        }
        flushed
    }

    /// Discard matched groups with sequence in `[start, start + count)`
    pub fn set_skip_frames(&mut self, start: u64, count: u64) {
        self.skip = (count > 0).then(|| SkipWindow {
            start,
            end: start.saturating_add(count),
        });
        debug!(start, count, "skip window set");
    }

    /// Additional passes suggested by luma detection from `sequence` on
    pub fn set_luma_hint(&mut self, sequence: u64, extra_passes: u8) {
        self.luma_hints.insert(sequence, extra_passes);
    }

    /// Force the total pass count of one future sequence
    ///
    /// # Errors
    /// `EngineError::Config` when `passes` is outside `1..=3`
    pub fn request_readback(&mut self, sequence: u64, passes: u8) -> EngineResult<()> {
        if !(1..=MAX_READBACK_PASSES).contains(&passes) {
            return Err(EngineError::config(
                "readback.passes",
                format!("passes must be within 1..={MAX_READBACK_PASSES}, got {passes}"),
            ));
        }
        self.forced.insert(sequence, passes);
        while self.forced.len() > self.config.luma_hint_window {
            self.forced.pop_first();
        }
        Ok(())
    }

    /// Total passes for `sequence` under the configured policy
    pub fn readback_passes(&self, sequence: u64) -> u8 {
        if let Some(passes) = self.forced.get(&sequence) {
            return *passes;
        }
        let extra = if self.config.multi_camera {
            0
        } else {
            let hint = self.luma_hints.floor(sequence).copied().unwrap_or(0);
            hint.saturating_add(u8::from(self.config.global_tmo))
                .saturating_add(u8::from(self.config.dehaze))
        };
        1 + extra.min(self.config.max_extra_passes)
    }

    /// Accept one raw buffer, returning the groups it completed
    ///
    /// A group the device rejects is recycled and reported in
    /// [`PushOutcome::failures`]; matching continues with the next common
    /// sequence.
    #[instrument(
        level = "trace",
        name = "stream_aligner_push",
        skip(self, buffer),
        fields(channel = buffer.channel, sequence = buffer.sequence)
    )]
    pub fn push(&mut self, buffer: RawBuffer) -> PushOutcome {
        let mut outcome = PushOutcome::default();
        if buffer.channel >= self.required_channels() {
            warn!(
                channel = buffer.channel,
                required = self.required_channels(),
                "buffer on unused channel, recycling"
            );
            self.recycle_stale(vec![buffer]);
            return outcome;
        }
        if let Some(last) = self.last_dispatched {
            if buffer.sequence <= last {
                debug!(
                    sequence = buffer.sequence,
                    last_dispatched = last,
                    "late buffer for a dispatched sequence, recycling"
                );
                self.recycle_stale(vec![buffer]);
                return outcome;
            }
        }

        let displaced = self.channels[buffer.channel].push(buffer);
        if !displaced.is_empty() {
            warn!(count = displaced.len(), "displaced pending buffers, recycling");
            self.recycle_stale(displaced);
        }

        while let Some(sequence) = self.common_sequence() {
            let required = self.required_channels();
            for channel in 0..required {
                let stale = self.channels[channel].drain_older(sequence);
                if !stale.is_empty() {
                    debug!(channel, sequence, count = stale.len(), "dropping unmatched buffers");
                    self.recycle_stale(stale);
                }
            }

            let buffers: Vec<RawBuffer> = (0..required)
                .filter_map(|channel| self.channels[channel].take(sequence))
                .collect();
            let group = SyncGroup { sequence, buffers };
            match self.dispatch(group) {
                Ok(Some(report)) => outcome.reports.push(report),
                Ok(None) => {}
                Err(e) => outcome.failures.push((sequence, e)),
            }
        }
        outcome
    }

    /// Smallest sequence pending on every required channel
    fn common_sequence(&self) -> Option<u64> {
        let required = &self.channels[..self.required_channels()];
        let (first, rest) = required.split_first()?;
        first
            .sequences()
            .filter(|s| rest.iter().all(|c| c.contains(*s)))
            .min()
    }

    fn dispatch(&mut self, group: SyncGroup) -> EngineResult<Option<ReadbackReport>> {
        let sequence = group.sequence;
        self.last_dispatched = Some(sequence);
        let forced = self.forced.remove(&sequence);
        self.forced.retain(|s, _| *s > sequence);

        if let Some(window) = self.skip {
            if window.contains(sequence) {
                self.stats.skipped += 1;
                metrics::counter!("isp3a_sync_groups_total", "status" => "skipped").increment(1);
                debug!(sequence, "group inside skip window, discarded");
                self.recycle_group(group);
                return Ok(None);
            }
            if sequence >= window.end {
                self.skip = None;
            }
        }

        let passes = forced.unwrap_or_else(|| self.readback_passes(sequence));
        let channels = group.len() as u8;
        let result = self.device.trigger_readback(&group, passes);
        self.recycle_group(group);

        match result {
            Ok(()) => {
                self.stats.delivered += 1;
                metrics::counter!("isp3a_sync_groups_total", "status" => "delivered").increment(1);
                metrics::histogram!("isp3a_readback_passes").record(f64::from(passes));
                Ok(Some(ReadbackReport {
                    sequence,
                    passes,
                    channels,
                }))
            }
            Err(e) => {
                self.stats.failed += 1;
                metrics::counter!("isp3a_sync_groups_total", "status" => "failed").increment(1);
                warn!(sequence, error = %e, "readback trigger failed");
                Err(e)
            }
        }
    }

    fn recycle_group(&self, group: SyncGroup) {
        for buffer in group.buffers {
            self.device.recycle(buffer);
        }
    }

    fn recycle_stale(&mut self, buffers: Vec<RawBuffer>) {
        self.stats.stale += buffers.len() as u64;
        metrics::counter!("isp3a_raw_buffers_stale_total").increment(buffers.len() as u64);
        for buffer in buffers {
            self.device.recycle(buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    use super::*;
    use crate::MockReadbackDevice;

    fn aligner(mode: WorkingMode) -> (Arc<MockReadbackDevice>, StreamAligner) {
        aligner_with(AlignerConfig::default(), mode)
    }

    fn aligner_with(
        config: AlignerConfig,
        mode: WorkingMode,
    ) -> (Arc<MockReadbackDevice>, StreamAligner) {
        let device = Arc::new(MockReadbackDevice::new());
        let aligner = StreamAligner::new(config, mode, device.clone());
        (device, aligner)
    }

    fn raw(channel: usize, sequence: u64) -> RawBuffer {
        RawBuffer::new(channel, sequence, (sequence * 10 + channel as u64) as u32)
    }

    #[test]
    fn test_normal_mode_delivers_every_buffer() {
        let (device, mut a) = aligner(WorkingMode::Normal);
        for s in 0..3 {
            let reports = a.push(raw(0, s)).reports;
            assert_eq!(reports.len(), 1);
            assert_eq!(reports[0].passes, 1);
        }
        assert_eq!(device.triggered_sequences(), vec![0, 1, 2]);
        assert_eq!(device.recycled_count(), 3);
    }

    #[test]
    fn test_hdr2_in_order_pairs() {
        let (device, mut a) = aligner(WorkingMode::Hdr2);
        assert!(a.push(raw(0, 7)).is_empty());
        assert_eq!(a.push(raw(1, 7)).reports.len(), 1);
        assert!(a.push(raw(0, 8)).is_empty());
        assert_eq!(a.push(raw(1, 8)).reports.len(), 1);
        assert_eq!(device.triggered_sequences(), vec![7, 8]);
    }

    #[test]
    fn test_mismatch_waits_then_matches_late_partner() {
        let (device, mut a) = aligner(WorkingMode::Hdr2);
        assert!(a.push(raw(0, 5)).is_empty());
        assert!(a.push(raw(1, 6)).is_empty());
        assert_eq!(a.pending(0), 1);
        assert_eq!(a.pending(1), 1);

        let reports = a.push(raw(1, 5)).reports;
        assert_eq!(reports[0].sequence, 5);
        assert_eq!(a.pending(1), 1);
        assert_eq!(device.triggered_sequences(), vec![5]);
    }

    #[test]
    fn test_mismatch_resolved_by_newer_sequence() {
        let (device, mut a) = aligner(WorkingMode::Hdr2);
        a.push(raw(0, 5));
        a.push(raw(1, 6));
        let reports = a.push(raw(0, 6)).reports;
        assert_eq!(reports[0].sequence, 6);
        assert_eq!(a.pending(0), 0);
        // stale 5 on channel 0 was recycled along with the group
        assert_eq!(device.recycled_count(), 3);
        assert_eq!(a.stats().stale, 1);
    }

    #[test]
    fn test_shuffled_hdr3_groups_never_mix_sequences() {
        let (device, mut a) = aligner(WorkingMode::Hdr3);
        let mut arrivals: Vec<RawBuffer> = (0..6u64)
            .flat_map(|s| (0..3).map(move |c| raw(c, s)))
            .collect();
        let mut rng = StdRng::seed_from_u64(0x15a);
        arrivals.shuffle(&mut rng);

        for buffer in arrivals {
            assert!(a.push(buffer).failures.is_empty());
        }

        for group in device.triggered_groups() {
            assert_eq!(group.len(), 3);
            assert!(group.iter().all(|s| *s == group[0]));
        }
        let sequences = device.triggered_sequences();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(a.stats().delivered as usize, sequences.len());
        assert_eq!(device.recycled_count(), 18 - (0..3).map(|c| a.pending(c)).sum::<usize>());
    }

    #[test]
    fn test_skip_window() {
        let (device, mut a) = aligner(WorkingMode::Normal);
        a.set_skip_frames(10, 2);
        for s in 10..14 {
            a.push(raw(0, s));
        }
        assert_eq!(device.triggered_sequences(), vec![12, 13]);
        assert_eq!(a.stats().skipped, 2);
        assert_eq!(device.recycled_count(), 4);
    }

    #[test]
    fn test_pass_policy() {
        let config = AlignerConfig {
            global_tmo: true,
            ..AlignerConfig::default()
        };
        let (_, mut a) = aligner_with(config, WorkingMode::Normal);
        assert_eq!(a.readback_passes(0), 2);

        a.set_luma_hint(2, 0);
        a.set_luma_hint(5, 1);
        assert_eq!(a.readback_passes(4), 2);
        assert_eq!(a.readback_passes(5), 3);
        a.set_luma_hint(6, 2);
        // capped at 1 + max_extra_passes
        assert_eq!(a.readback_passes(9), 3);
    }

    #[test]
    fn test_multi_camera_forces_single_pass() {
        let config = AlignerConfig {
            global_tmo: true,
            dehaze: true,
            multi_camera: true,
            ..AlignerConfig::default()
        };
        let (_, mut a) = aligner_with(config, WorkingMode::Normal);
        a.set_luma_hint(0, 2);
        assert_eq!(a.readback_passes(3), 1);
    }

    #[test]
    fn test_request_readback_overrides_policy() {
        let (device, mut a) = aligner(WorkingMode::Normal);
        assert!(a.request_readback(3, 0).is_err());
        assert!(a.request_readback(3, 4).is_err());
        a.request_readback(3, 3).unwrap();

        a.push(raw(0, 2));
        let reports = a.push(raw(0, 3)).reports;
        assert_eq!(reports[0].passes, 3);
        assert_eq!(device.last_passes(), Some(3));
        assert_eq!(a.readback_passes(3), 1);
    }

    #[test]
    fn test_set_hdr_mode_flushes_pending() {
        let (device, mut a) = aligner(WorkingMode::Hdr3);
        a.push(raw(0, 1));
        a.push(raw(1, 1));
        a.set_hdr_mode(WorkingMode::Normal);
        assert_eq!(a.pending(0), 0);
        assert_eq!(a.pending(1), 0);
        assert_eq!(device.recycled_count(), 2);
        assert_eq!(a.required_channels(), 1);
    }

    #[test]
    fn test_unused_channel_recycled() {
        let (device, mut a) = aligner(WorkingMode::Normal);
        assert!(a.push(raw(2, 1)).is_empty());
        assert_eq!(device.recycled_count(), 1);
        assert!(device.triggered_sequences().is_empty());
    }

    #[test]
    fn test_trigger_failure_recycles_group() {
        let (device, mut a) = aligner(WorkingMode::Normal);
        device.set_fail(true);
        let outcome = a.push(raw(0, 1));
        assert!(outcome.reports.is_empty());
        assert!(matches!(
            outcome.failures.as_slice(),
            [(1, EngineError::HardwareIo { .. })]
        ));
        assert_eq!(device.recycled_count(), 1);
        assert_eq!(a.stats().failed, 1);

        device.set_fail(false);
        assert_eq!(a.push(raw(0, 2)).reports.len(), 1);
    }

    #[test]
    fn test_late_older_pair_is_recycled() {
        let (device, mut a) = aligner(WorkingMode::Hdr2);
        a.push(raw(0, 5));
        assert_eq!(a.push(raw(1, 5)).reports.len(), 1);

        // both halves of sequence 4 arrive after 5 went out
        assert!(a.push(raw(0, 4)).is_empty());
        assert!(a.push(raw(1, 4)).is_empty());
        assert_eq!(device.triggered_sequences(), vec![5]);
        assert_eq!(a.pending(0), 0);
        assert_eq!(a.pending(1), 0);
        assert_eq!(a.stats().stale, 2);
        assert_eq!(device.recycled_count(), 4);

        a.push(raw(0, 6));
        a.push(raw(1, 6));
        assert_eq!(device.triggered_sequences(), vec![5, 6]);
    }

    #[test]
    fn test_skipped_group_still_orders_arrivals() {
        let (device, mut a) = aligner(WorkingMode::Normal);
        a.set_skip_frames(3, 1);
        a.push(raw(0, 3));
        assert!(a.push(raw(0, 2)).is_empty());
        assert_eq!(a.stats().skipped, 1);
        assert_eq!(a.stats().stale, 1);
        assert!(device.triggered_sequences().is_empty());
    }

    #[test]
    fn test_flush_accepts_older_sequences_again() {
        let (device, mut a) = aligner(WorkingMode::Normal);
        a.push(raw(0, 9));
        a.set_hdr_mode(WorkingMode::Normal);
        assert_eq!(a.push(raw(0, 1)).reports.len(), 1);
        assert_eq!(device.triggered_sequences(), vec![9, 1]);
    }

    #[test]
    fn test_failed_group_does_not_block_later_groups() {
        let (device, mut a) = aligner(WorkingMode::Hdr2);
        device.fail_sequence(2);
        a.push(raw(0, 1));
        a.push(raw(0, 2));

        // completing 2 drops the unmatched 1 and reports the device error
        let outcome = a.push(raw(1, 2));
        assert!(outcome.reports.is_empty());
        assert!(matches!(
            outcome.failures.as_slice(),
            [(2, EngineError::HardwareIo { .. })]
        ));
        assert_eq!(a.stats().failed, 1);
        assert_eq!(a.stats().stale, 1);
        assert_eq!(device.recycled_count(), 3);

        a.push(raw(0, 3));
        let delivered: Vec<u64> = a.push(raw(1, 3)).reports.iter().map(|r| r.sequence).collect();
        assert_eq!(delivered, vec![3]);
        assert_eq!(device.triggered_sequences(), vec![3]);
    }
}
