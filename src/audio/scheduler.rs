//! Gapless sequential playback scheduling.
//!
//! Response audio arrives in chunks at irregular times. Each chunk is placed
//! at the next free slot on the output clock (the schedule cursor) so chunks
//! play back to back without overlapping, or as soon as possible if playback
//! has already caught up.

use crate::audio::pcm::PcmBuffer;
use std::collections::VecDeque;

/// Whether scheduled audio is still playing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    /// At least one scheduled buffer has not finished.
    Playing,
    /// The output clock has caught up with the schedule cursor.
    Idle,
}

/// A scheduled playback interval on the output clock, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledInterval {
    pub start: f64,
    pub end: f64,
}

impl ScheduledInterval {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Places buffers on the output clock and tracks their completion.
///
/// Owns the schedule cursor; `enqueue` is its only writer, so a scheduler
/// must live with the single consumer of inbound audio.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    cursor: f64,
    pending: VecDeque<ScheduledInterval>,
    underruns: u64,
    scheduled: u64,
    turn_open: bool,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `buffer` and return its start time.
    ///
    /// The start is the later of the cursor and `now`; the cursor then moves
    /// to the end of the buffer.
    pub fn enqueue(&mut self, buffer: &PcmBuffer, now: f64) -> f64 {
        self.enqueue_duration(buffer.duration(), now)
    }

    /// Schedule an interval of `duration` seconds and return its start time.
    pub fn enqueue_duration(&mut self, duration: f64, now: f64) -> f64 {
        let duration = duration.max(0.0);

        if self.turn_open && now - self.cursor > duration {
            self.underruns += 1;
            log::warn!(
                "playback underrun #{}: clock {:.3}s is {:.3}s past the schedule",
                self.underruns,
                now,
                now - self.cursor
            );
        }

        let start = self.cursor.max(now);
        let end = start + duration;
        self.cursor = end;
        self.turn_open = true;
        self.scheduled += 1;
        self.pending.push_back(ScheduledInterval { start, end });
        start
    }

    /// Retire buffers whose playback has finished by `now`.
    ///
    /// Returns `None` if no buffer finished. Otherwise reports `Idle` only
    /// when nothing else is pending, so a finished chunk in the middle of an
    /// utterance keeps the speaking indicator on.
    pub fn poll(&mut self, now: f64) -> Option<PlaybackStatus> {
        let mut finished = 0;
        while let Some(front) = self.pending.front() {
            if front.end <= now {
                self.pending.pop_front();
                finished += 1;
            } else {
                break;
            }
        }

        if finished == 0 {
            None
        } else {
            Some(self.status(now))
        }
    }

    /// Current playback status at `now`.
    pub fn status(&self, now: f64) -> PlaybackStatus {
        if now >= self.cursor {
            PlaybackStatus::Idle
        } else {
            PlaybackStatus::Playing
        }
    }

    /// The remote finished its turn; the next chunk starts a new one.
    pub fn end_turn(&mut self) {
        self.turn_open = false;
    }

    /// Drop everything still queued (barge-in) and restart the schedule at `now`.
    ///
    /// Returns the number of buffers discarded.
    pub fn interrupt(&mut self, now: f64) -> usize {
        let dropped = self.pending.iter().filter(|i| i.end > now).count();
        self.pending.clear();
        self.cursor = now;
        self.turn_open = false;
        dropped
    }

    /// Next free playback slot on the output clock.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Buffers scheduled but not yet retired by `poll`.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of times playback ran dry mid-turn.
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Total buffers ever scheduled.
    pub fn scheduled(&self) -> u64 {
        self.scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 24000;

    fn buffer(seconds: f64) -> PcmBuffer {
        PcmBuffer::silence((seconds * RATE as f64).round() as usize, RATE)
    }

    #[test]
    fn first_buffer_starts_at_clock() {
        let mut scheduler = PlaybackScheduler::new();
        let start = scheduler.enqueue(&buffer(1.0), 0.0);
        assert_eq!(start, 0.0);
        assert!((scheduler.cursor() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn second_buffer_clamps_to_cursor_not_clock() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.enqueue(&buffer(1.0), 0.0);

        let start = scheduler.enqueue(&buffer(0.5), 0.3);
        assert!((start - 1.0).abs() < 1e-9);
        assert!((scheduler.cursor() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn late_buffer_starts_at_clock() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.enqueue(&buffer(0.5), 0.0);

        let start = scheduler.enqueue(&buffer(0.5), 0.7);
        assert!((start - 0.7).abs() < 1e-9);
        assert!((scheduler.cursor() - 1.2).abs() < 1e-9);
    }

    #[test]
    fn intervals_never_overlap() {
        let mut scheduler = PlaybackScheduler::new();
        let durations = [0.25, 0.1, 0.4, 0.05, 0.3, 0.2, 0.15];
        let arrivals = [0.0, 0.05, 0.1, 0.9, 0.95, 2.0, 2.01];

        let mut intervals = Vec::new();
        for (&d, &t) in durations.iter().zip(arrivals.iter()) {
            let start = scheduler.enqueue_duration(d, t);
            assert!(start >= t, "start {} before arrival {}", start, t);
            intervals.push(ScheduledInterval {
                start,
                end: start + d,
            });
        }

        for pair in intervals.windows(2) {
            assert!(pair[0].end <= pair[1].start + 1e-12, "{:?}", pair);
            assert!(pair[0].start <= pair[1].start);
        }
    }

    #[test]
    fn poll_reports_playing_while_more_is_queued() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.enqueue_duration(1.0, 0.0);
        scheduler.enqueue_duration(0.5, 0.3);

        assert_eq!(scheduler.poll(0.5), None);
        assert_eq!(scheduler.poll(1.0), Some(PlaybackStatus::Playing));
        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.poll(1.2), None);
        assert_eq!(scheduler.poll(1.5), Some(PlaybackStatus::Idle));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn poll_retires_several_buffers_at_once() {
        let mut scheduler = PlaybackScheduler::new();
        for _ in 0..4 {
            scheduler.enqueue_duration(0.1, 0.0);
        }
        assert_eq!(scheduler.poll(10.0), Some(PlaybackStatus::Idle));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn status_before_anything_is_idle() {
        let scheduler = PlaybackScheduler::new();
        assert_eq!(scheduler.status(0.0), PlaybackStatus::Idle);
    }

    #[test]
    fn underrun_counted_when_clock_outruns_schedule_mid_turn() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.enqueue_duration(0.1, 0.0);

        // Clock is 0.9s past the cursor, more than the 0.1s buffer
        let start = scheduler.enqueue_duration(0.1, 1.0);
        assert_eq!(start, 1.0);
        assert_eq!(scheduler.underruns(), 1);
    }

    #[test]
    fn small_gap_is_not_an_underrun() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.enqueue_duration(0.5, 0.0);
        scheduler.enqueue_duration(0.5, 0.6);
        assert_eq!(scheduler.underruns(), 0);
    }

    #[test]
    fn first_chunk_of_a_turn_is_not_an_underrun() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.enqueue_duration(0.1, 30.0);
        assert_eq!(scheduler.underruns(), 0);

        scheduler.end_turn();
        scheduler.enqueue_duration(0.1, 90.0);
        assert_eq!(scheduler.underruns(), 0);
    }

    #[test]
    fn interrupt_drops_pending_and_resets_cursor() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.enqueue_duration(1.0, 0.0);
        scheduler.enqueue_duration(1.0, 0.0);
        scheduler.enqueue_duration(1.0, 0.0);

        let dropped = scheduler.interrupt(1.5);
        assert_eq!(dropped, 2);
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.cursor(), 1.5);
        assert_eq!(scheduler.status(1.5), PlaybackStatus::Idle);

        let start = scheduler.enqueue_duration(0.2, 1.6);
        assert_eq!(start, 1.6);
        assert_eq!(scheduler.underruns(), 0);
    }

    #[test]
    fn zero_length_buffer_does_not_move_cursor() {
        let mut scheduler = PlaybackScheduler::new();
        scheduler.enqueue_duration(0.5, 0.0);
        let start = scheduler.enqueue(&buffer(0.0), 0.1);
        assert!((start - 0.5).abs() < 1e-9);
        assert!((scheduler.cursor() - 0.5).abs() < 1e-9);
        assert_eq!(scheduler.scheduled(), 2);
    }
}
