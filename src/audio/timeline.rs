//! Sample-accurate rendering of scheduled playback.
//!
//! The output device pulls frames from a `Timeline`. Segments are placed at
//! absolute frame positions; gaps between them render as silence. The number
//! of frames rendered so far is the output clock.

use crate::audio::clock::FrameClock;
use std::collections::VecDeque;

#[derive(Debug)]
struct Segment {
    start: u64,
    samples: Vec<f32>,
}

impl Segment {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Queue of mono segments positioned on an output frame counter.
#[derive(Debug)]
pub struct Timeline {
    clock: FrameClock,
    segments: VecDeque<Segment>,
}

impl Timeline {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            clock: FrameClock::new(sample_rate),
            segments: VecDeque::new(),
        }
    }

    /// The clock advanced by `render`.
    pub fn clock(&self) -> FrameClock {
        self.clock.clone()
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    /// Frames rendered so far.
    pub fn position(&self) -> u64 {
        self.clock.frames()
    }

    /// Place mono `samples` to start at `start_secs` on the output clock.
    ///
    /// Segments must be pushed in start order. A start in the past plays
    /// immediately; a start that would overlap the previous segment (rounding)
    /// is moved to its end.
    pub fn push(&mut self, start_secs: f64, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        let requested = (start_secs.max(0.0) * self.sample_rate() as f64).round() as u64;
        let previous_end = self.segments.back().map(Segment::end).unwrap_or(0);
        let start = requested.max(self.position()).max(previous_end);
        self.segments.push_back(Segment { start, samples });
    }

    /// Drop every queued segment.
    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// Segments not yet fully rendered.
    pub fn queued(&self) -> usize {
        self.segments.len()
    }

    /// Fill an interleaved output buffer, copying the mono signal to every
    /// channel, and advance the clock.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let mut position = self.position();

        for frame in out.chunks_mut(channels) {
            while self
                .segments
                .front()
                .is_some_and(|segment| segment.end() <= position)
            {
                self.segments.pop_front();
            }

            let value = match self.segments.front() {
                Some(segment) if position >= segment.start => {
                    segment.samples[(position - segment.start) as usize]
                }
                _ => 0.0,
            };
            frame.fill(value);
            position += 1;
        }

        let rendered = out.len().div_ceil(channels) as u64;
        self.clock.add_frames(rendered);

        while self
            .segments
            .front()
            .is_some_and(|segment| segment.end() <= position)
        {
            self.segments.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::clock::OutputClock;

    #[test]
    fn renders_silence_when_empty() {
        let mut timeline = Timeline::new(10);
        let mut out = [1.0f32; 4];
        timeline.render(&mut out, 1);
        assert_eq!(out, [0.0; 4]);
        assert_eq!(timeline.position(), 4);
    }

    #[test]
    fn renders_segment_at_its_start() {
        let mut timeline = Timeline::new(10);
        // Starts at frame 2
        timeline.push(0.2, vec![0.5, 0.6]);

        let mut out = [0.0f32; 6];
        timeline.render(&mut out, 1);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.6, 0.0, 0.0]);
        assert_eq!(timeline.queued(), 0);
    }

    #[test]
    fn back_to_back_segments_are_gapless() {
        let mut timeline = Timeline::new(10);
        timeline.push(0.0, vec![0.1, 0.2]);
        timeline.push(0.2, vec![0.3, 0.4]);

        let mut out = [0.0f32; 4];
        timeline.render(&mut out, 1);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn overlapping_start_moves_to_previous_end() {
        let mut timeline = Timeline::new(10);
        timeline.push(0.0, vec![0.1, 0.2, 0.3]);
        timeline.push(0.1, vec![0.9]);

        let mut out = [0.0f32; 4];
        timeline.render(&mut out, 1);
        assert_eq!(out, [0.1, 0.2, 0.3, 0.9]);
    }

    #[test]
    fn past_start_plays_immediately() {
        let mut timeline = Timeline::new(10);
        let mut out = [0.0f32; 5];
        timeline.render(&mut out, 1);

        timeline.push(0.1, vec![0.7]);
        let mut out = [0.0f32; 2];
        timeline.render(&mut out, 1);
        assert_eq!(out, [0.7, 0.0]);
    }

    #[test]
    fn copies_mono_to_all_channels() {
        let mut timeline = Timeline::new(10);
        timeline.push(0.0, vec![0.25, -0.25]);

        let mut out = [0.0f32; 4];
        timeline.render(&mut out, 2);
        assert_eq!(out, [0.25, 0.25, -0.25, -0.25]);
        assert_eq!(timeline.position(), 2);
    }

    #[test]
    fn clock_tracks_rendered_frames() {
        let mut timeline = Timeline::new(24000);
        let clock = timeline.clock();
        let mut out = vec![0.0f32; 24000];
        timeline.render(&mut out, 2);
        assert!((clock.now() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn clear_silences_queued_audio() {
        let mut timeline = Timeline::new(10);
        timeline.push(0.0, vec![0.5; 10]);
        timeline.clear();

        let mut out = [1.0f32; 3];
        timeline.render(&mut out, 1);
        assert_eq!(out, [0.0; 3]);
    }
}
