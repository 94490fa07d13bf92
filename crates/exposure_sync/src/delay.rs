//! Delay queues composing one register write per start of frame.
//!
//! `pending` holds updates whose integration time has not been written yet.
//! The gain and DCG queues hold time sources that were already written and
//! wait `time_delay - gain_delay` (resp. `time_delay - dcg_delay`) more frames
//! before their gain (resp. DCG mode) is written, so all three land on the
//! sensor on the same frame.

use std::collections::VecDeque;

use contracts::{AppliedExposure, ExposureDelays, ExposureUpdate, MAX_HDR_CHANNELS};

/// Sources selected for one write
#[derive(Debug, Clone, Copy)]
pub(crate) struct Composition {
    pub time: ExposureUpdate,
    pub gain: ExposureUpdate,
    pub dcg: ExposureUpdate,
    /// Time source was popped from `pending` rather than repeated
    pub fresh: bool,
}

impl Composition {
    pub fn applied(&self, sof_frame: u64) -> AppliedExposure {
        let mut channel_times = [0.0; MAX_HDR_CHANNELS];
        let mut channel_gains = [0.0; MAX_HDR_CHANNELS];
        for i in 0..MAX_HDR_CHANNELS {
            channel_times[i] = self.time.channels[i].integration_time;
            channel_gains[i] = self.gain.channels[i].gain;
        }
        AppliedExposure {
            sof_frame,
            time_source: self.time.frame_id,
            gain_source: self.gain.frame_id,
            integration_time: self.time.integration_time,
            gain: self.gain.gain,
            dcg: self.dcg.dcg,
            channel_times,
            channel_gains,
            channel_count: self.time.channel_count,
        }
    }
}

#[derive(Debug)]
pub(crate) struct DelayQueues {
    delays: ExposureDelays,
    pending: VecDeque<ExposureUpdate>,
    gain_lagged: VecDeque<ExposureUpdate>,
    dcg_lagged: VecDeque<ExposureUpdate>,
    last_time: Option<ExposureUpdate>,
    last_gain: Option<ExposureUpdate>,
    last_dcg: Option<ExposureUpdate>,
}

impl DelayQueues {
    pub fn new(delays: ExposureDelays) -> Self {
        Self {
            delays,
            pending: VecDeque::new(),
            gain_lagged: VecDeque::new(),
            dcg_lagged: VecDeque::new(),
            last_time: None,
            last_gain: None,
            last_dcg: None,
        }
    }

    pub fn delays(&self) -> ExposureDelays {
        self.delays
    }

    /// Swap delays, re-padding the lag queues with the last written value
    pub fn set_delays(&mut self, delays: ExposureDelays) {
        self.delays = delays;
        self.gain_lagged.clear();
        self.dcg_lagged.clear();
        if let Some(last) = self.last_time {
            self.pad(last);
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.last_time.is_some()
    }

    /// Treat `update` as fully written
    pub fn seed(&mut self, update: ExposureUpdate) {
        self.last_time = Some(update);
        self.last_gain = Some(update);
        self.last_dcg = Some(update);
        self.gain_lagged.clear();
        self.dcg_lagged.clear();
        self.pad(update);
    }

    fn pad(&mut self, update: ExposureUpdate) {
        let gain_lag = self.delays.gain_lag() as usize;
        let dcg_lag = self.delays.dcg_lag() as usize;
        self.gain_lagged.extend(std::iter::repeat(update).take(gain_lag));
        self.dcg_lagged.extend(std::iter::repeat(update).take(dcg_lag));
    }

    pub fn push(&mut self, mut update: ExposureUpdate) {
        update.first_of_batch = true;
        self.pending.push_back(update);
    }

    /// Append a table run, first pruning `pending` back to its most recent batch head
    ///
    /// Returns the number of pruned entries.
    pub fn push_table(&mut self, table: &[ExposureUpdate]) -> usize {
        if table.is_empty() {
            return 0;
        }

        let mut pruned = 0;
        while self.pending.back().is_some_and(|u| !u.first_of_batch) {
            self.pending.pop_back();
            pruned += 1;
        }

        for (i, update) in table.iter().enumerate() {
            let mut update = *update;
            update.first_of_batch = i == 0;
            self.pending.push_back(update);
        }
        pruned
    }

    /// Pick the sources of the next write without consuming anything
    pub fn compose(&self) -> Option<Composition> {
        let (time, fresh) = match self.pending.front() {
            Some(update) => (*update, true),
            None => (self.last_time?, false),
        };
        let gain = Self::lagged_source(
            &self.gain_lagged,
            self.delays.gain_lag() as usize,
            time,
            self.last_gain,
        );
        let dcg = Self::lagged_source(
            &self.dcg_lagged,
            self.delays.dcg_lag() as usize,
            time,
            self.last_dcg,
        );
        Some(Composition {
            time,
            gain,
            dcg,
            fresh,
        })
    }

    fn lagged_source(
        queue: &VecDeque<ExposureUpdate>,
        lag: usize,
        time: ExposureUpdate,
        last: Option<ExposureUpdate>,
    ) -> ExposureUpdate {
        if lag == 0 {
            return time;
        }
        match queue.front() {
            Some(head) if queue.len() >= lag => *head,
            _ => last.unwrap_or(time),
        }
    }

    /// Consume the sources of a successful write
    pub fn commit(&mut self, composition: &Composition) {
        if composition.fresh {
            self.pending.pop_front();
        }
        Self::advance(
            &mut self.gain_lagged,
            self.delays.gain_lag() as usize,
            composition.time,
        );
        Self::advance(
            &mut self.dcg_lagged,
            self.delays.dcg_lag() as usize,
            composition.time,
        );
        self.last_time = Some(composition.time);
        self.last_gain = Some(composition.gain);
        self.last_dcg = Some(composition.dcg);
    }

    fn advance(queue: &mut VecDeque<ExposureUpdate>, lag: usize, time: ExposureUpdate) {
        if lag == 0 {
            return;
        }
        queue.push_back(time);
        while queue.len() > lag {
            queue.pop_front();
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.gain_lagged.clear();
        self.dcg_lagged.clear();
        self.last_time = None;
        self.last_gain = None;
        self.last_dcg = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::DcgMode;

    fn update(frame_id: u64) -> ExposureUpdate {
        ExposureUpdate::linear(frame_id, frame_id as f32, frame_id as f32 / 1000.0)
    }

    fn step(queues: &mut DelayQueues) -> Composition {
        let c = queues.compose().unwrap();
        queues.commit(&c);
        c
    }

    #[test]
    fn test_equal_delays_take_everything_from_one_update() {
        let mut q = DelayQueues::new(ExposureDelays::new(2, 2, 2));
        q.seed(update(0));
        q.push(update(1));
        let c = step(&mut q);
        assert_eq!(c.time.frame_id, 1);
        assert_eq!(c.gain.frame_id, 1);
        assert_eq!(c.dcg.frame_id, 1);
    }

    #[test]
    fn test_shorter_gain_delay_trails_time() {
        let mut q = DelayQueues::new(ExposureDelays::new(3, 1, 3));
        q.seed(update(0));
        for f in 1..=4 {
            q.push(update(f));
        }
        let sources: Vec<_> = (0..4)
            .map(|_| {
                let c = step(&mut q);
                (c.time.frame_id, c.gain.frame_id)
            })
            .collect();
        // gain lags two writes behind time
        assert_eq!(sources, vec![(1, 0), (2, 0), (3, 1), (4, 2)]);
    }

    #[test]
    fn test_gain_keeps_flowing_without_new_updates() {
        let mut q = DelayQueues::new(ExposureDelays::new(2, 1, 2));
        q.seed(update(0));
        q.push(update(5));
        let first = step(&mut q);
        assert_eq!((first.time.frame_id, first.gain.frame_id), (5, 0));
        let second = step(&mut q);
        assert!(!second.fresh);
        assert_eq!((second.time.frame_id, second.gain.frame_id), (5, 5));
    }

    #[test]
    fn test_dcg_from_own_queue() {
        let mut q = DelayQueues::new(ExposureDelays::new(2, 2, 1));
        q.seed(update(0).with_dcg(DcgMode::Lcg));
        q.push(update(1).with_dcg(DcgMode::Hcg));
        let c = step(&mut q);
        assert_eq!(c.dcg.dcg, DcgMode::Lcg);
        let c = step(&mut q);
        assert_eq!(c.dcg.dcg, DcgMode::Hcg);
    }

    #[test]
    fn test_unseeded_empty_queue_composes_nothing() {
        let q = DelayQueues::new(ExposureDelays::default());
        assert!(q.compose().is_none());
    }

    #[test]
    fn test_table_prunes_back_to_last_batch_head() {
        let mut q = DelayQueues::new(ExposureDelays::default());
        q.push_table(&[update(1), update(2), update(3)]);
        assert_eq!(q.pending_len(), 3);

        let pruned = q.push_table(&[update(4), update(5)]);
        assert_eq!(pruned, 2);
        let heads: Vec<_> = q.pending.iter().map(|u| (u.frame_id, u.first_of_batch)).collect();
        assert_eq!(heads, vec![(1, true), (4, true), (5, false)]);
    }

    #[test]
    fn test_repeated_tables_stay_bounded() {
        let mut q = DelayQueues::new(ExposureDelays::default());
        q.seed(update(0));
        for f in 0..50u64 {
            let base = f * 10;
            q.push_table(&[update(base), update(base + 1), update(base + 2)]);
            step(&mut q);
        }
        assert!(q.pending_len() <= 3);
    }
}
