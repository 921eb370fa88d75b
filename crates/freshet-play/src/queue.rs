#![forbid(unsafe_code)]

use std::{collections::BTreeMap, time::Duration};

use freshet_buffer::Slot;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Outcome of offering a ready slot to the queue.
pub enum Ingest {
    Queued,
    /// An earlier-stamped frame arrived after a later one already played;
    /// the slot comes back for pool return.
    Late(Slot),
}

/// Orders assembled slots by decode timestamp and paces their release.
///
/// The first release happens one jitter-buffer delay after the first
/// ready frame; every later release slot comes one sample period after
/// the previous one, whether or not a frame is there to fill it. A frame
/// whose timestamp is later than the one expected at the current tick is
/// held back, so a missing earlier frame turns into a gap instead of
/// pulling playback forward.
pub struct PlaybackQueue {
    entries: BTreeMap<(u64, u64), Slot>,
    sample_period: Duration,
    target_delay: Duration,
    next_deadline: Option<Instant>,
    expected_ts: Option<u64>,
    last_released_ts: Option<u64>,
}

impl PlaybackQueue {
    pub fn new(sample_period: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            sample_period,
            target_delay: Duration::ZERO,
            next_deadline: None,
            expected_ts: None,
            last_released_ts: None,
        }
    }

    /// Update the jitter-buffer delay used for the first release deadline.
    pub fn set_target_delay(&mut self, delay: Duration) {
        self.target_delay = delay;
    }

    pub fn sample_period(&self) -> Duration {
        self.sample_period
    }

    /// Offer a ready slot. It is locked for playout while queued.
    pub fn ingest(&mut self, mut slot: Slot, now: Instant) -> Ingest {
        let ts = slot.frame_meta().map_or(0, |h| h.timestamp_ms);
        if self.last_released_ts.is_some_and(|last| ts <= last) {
            debug!(sample = slot.sample_no(), ts, "late arrival dropped");
            return Ingest::Late(slot);
        }

        slot.lock();
        if self.next_deadline.is_none() {
            self.next_deadline = Some(now + self.target_delay);
        }
        trace!(sample = slot.sample_no(), ts, "queued for playout");
        self.entries.insert((ts, slot.sample_no()), slot);
        Ingest::Queued
    }

    /// Release the frame due at this pacing tick, if any. Every call past
    /// the current deadline consumes one sample period; an empty queue or
    /// a held-back frame leaves a gap but keeps the cadence.
    pub fn pop(&mut self, now: Instant) -> Option<(Slot, Instant)> {
        let deadline = self.next_deadline?;
        if now < deadline {
            return None;
        }
        self.next_deadline = Some(deadline + self.sample_period);
        let period_ms = self.sample_period.as_millis() as u64;

        let due = self
            .entries
            .keys()
            .next()
            .copied()
            .filter(|&(ts, _)| self.expected_ts.map_or(true, |expected| ts <= expected));

        match due {
            Some(key) => {
                let slot = self.entries.remove(&key).expect("key just observed");
                let (ts, sample) = key;
                self.last_released_ts = Some(ts);
                // Re-anchor pacing expectations on what actually played.
                self.expected_ts = Some(ts + period_ms);
                trace!(sample, ts, "released for playout");
                Some((slot, deadline))
            }
            None => {
                self.expected_ts = self.expected_ts.map(|e| e + period_ms);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain every queued slot, e.g. at shutdown.
    pub fn drain(&mut self) -> Vec<Slot> {
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use freshet_buffer::SlotState;
    use freshet_core::Name;
    use freshet_testing::ready_slot;

    use super::*;

    fn thread() -> Name {
        Name::from_uri("/c/ndnrtc/v=4/video/s/t").unwrap()
    }

    const PERIOD: Duration = Duration::from_millis(40);

    #[tokio::test(start_paused = true)]
    async fn empty_queue_pops_nothing() {
        let mut queue = PlaybackQueue::new(PERIOD);
        assert!(queue.pop(Instant::now()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn first_release_waits_for_target_delay() {
        let t0 = Instant::now();
        let mut queue = PlaybackQueue::new(PERIOD);
        queue.set_target_delay(Duration::from_millis(100));
        queue.ingest(ready_slot(&thread(), 1, 40, t0), t0);

        assert!(queue.pop(t0).is_none());
        assert!(queue.pop(t0 + Duration::from_millis(99)).is_none());
        let (slot, play_time) = queue.pop(t0 + Duration::from_millis(100)).unwrap();
        assert_eq!(slot.sample_no(), 1);
        assert_eq!(slot.state(), SlotState::Locked);
        assert_eq!(play_time, t0 + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn releases_in_timestamp_order_at_sample_period() {
        let t0 = Instant::now();
        let mut queue = PlaybackQueue::new(PERIOD);

        // Ready-order is 2 then 1; playout must be 1 then 2.
        queue.ingest(ready_slot(&thread(), 2, 80, t0), t0);
        queue.ingest(ready_slot(&thread(), 1, 40, t0), t0);

        let (first, _) = queue.pop(t0).unwrap();
        assert_eq!(first.sample_no(), 1);
        // Second frame is paced one period later, not immediately.
        assert!(queue.pop(t0).is_none());
        let (second, play_time) = queue.pop(t0 + PERIOD).unwrap();
        assert_eq!(second.sample_no(), 2);
        assert_eq!(play_time, t0 + PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_frame_leaves_a_gap_without_stalling() {
        let t0 = Instant::now();
        let mut queue = PlaybackQueue::new(PERIOD);

        queue.ingest(ready_slot(&thread(), 1, 40, t0), t0);
        let (one, _) = queue.pop(t0).unwrap();
        assert_eq!(one.sample_no(), 1);

        // Sample 2 (ts=80) never assembles; sample 3 (ts=120) is ready.
        queue.ingest(ready_slot(&thread(), 3, 120, t0), t0);

        // At sample 2's tick the later frame is held back.
        assert!(queue.pop(t0 + PERIOD).is_none());
        // At its own tick, sample 3 plays.
        let (three, _) = queue.pop(t0 + 2 * PERIOD).unwrap();
        assert_eq!(three.sample_no(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn late_arrival_after_later_release_is_dropped() {
        let t0 = Instant::now();
        let mut queue = PlaybackQueue::new(PERIOD);

        queue.ingest(ready_slot(&thread(), 3, 120, t0), t0);
        let (three, _) = queue.pop(t0).unwrap();
        assert_eq!(three.sample_no(), 3);

        // Sample 2 assembles only now, after 3 already played.
        match queue.ingest(ready_slot(&thread(), 2, 80, t0), t0) {
            Ingest::Late(slot) => assert_eq!(slot.sample_no(), 2),
            Ingest::Queued => panic!("expected late drop"),
        }
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cadence_continues_through_empty_ticks() {
        let t0 = Instant::now();
        let mut queue = PlaybackQueue::new(PERIOD);
        queue.ingest(ready_slot(&thread(), 1, 40, t0), t0);
        let _ = queue.pop(t0).unwrap();

        // Two empty ticks pass; a frame three periods out still plays at
        // its own slot in the cadence.
        assert!(queue.pop(t0 + PERIOD).is_none());
        assert!(queue.pop(t0 + 2 * PERIOD).is_none());
        queue.ingest(ready_slot(&thread(), 4, 160, t0), t0);
        let (four, play_time) = queue.pop(t0 + 3 * PERIOD).unwrap();
        assert_eq!(four.sample_no(), 4);
        assert_eq!(play_time, t0 + 3 * PERIOD);
    }
}
