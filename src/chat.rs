//! The voice chat driver.
//!
//! `VoiceChat` runs on one dedicated thread and owns everything with
//! per-conversation state: the capture source, the audio output, the playback
//! scheduler and the session handle. Session events arrive over a channel, so
//! the schedule cursor has a single writer and needs no lock.

use crate::audio::activity;
use crate::audio::pcm;
use crate::audio::recorder::{AudioFrame, CaptureSource, FrameAssembler};
use crate::audio::scheduler::{PlaybackScheduler, PlaybackStatus};
use crate::audio::sink::AudioOutput;
use crate::defaults;
use crate::error::Result;
use crate::session::{SessionEvent, SessionHandle};
use crossbeam_channel::{Receiver, Sender};
use std::time::Duration;

/// Where encoded capture frames go.
pub trait FrameSender: Send {
    /// Send one encoded frame; false if it was dropped.
    fn send_frame(&self, encoded: &[u8]) -> bool;

    /// End the session. Must be idempotent.
    fn close(&self);
}

impl FrameSender for SessionHandle {
    fn send_frame(&self, encoded: &[u8]) -> bool {
        SessionHandle::send_frame(self, encoded)
    }

    fn close(&self) {
        SessionHandle::close(self)
    }
}

/// Status updates for the user interface.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Connected,
    Disconnected,
    UserSpeaking(bool),
    BuddySpeaking(bool),
    /// Mean amplitude of the latest capture frame.
    Level(f32),
    Underrun { total: u64 },
    Error(String),
}

/// Counters reported when a chat ends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSummary {
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub buffers_scheduled: u64,
    pub malformed_frames: u64,
    pub underruns: u64,
    pub interruptions: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub speaking_threshold: f32,
    pub frame_size: usize,
    pub poll_interval: Duration,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            speaking_threshold: defaults::SPEAKING_THRESHOLD,
            frame_size: defaults::CAPTURE_FRAME_SIZE,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct VoiceChat<S: FrameSender> {
    session: S,
    capture: Box<dyn CaptureSource>,
    output: Box<dyn AudioOutput>,
    scheduler: PlaybackScheduler,
    assembler: FrameAssembler,
    config: ChatConfig,
    events: Sender<ChatEvent>,
    connected: bool,
    user_speaking: bool,
    buddy_speaking: bool,
    capture_done: bool,
    summary: ChatSummary,
}

impl<S: FrameSender> VoiceChat<S> {
    /// # Errors
    /// Returns `LiveBuddyError::ConfigInvalidValue` for a zero frame size.
    pub fn new(
        session: S,
        capture: Box<dyn CaptureSource>,
        output: Box<dyn AudioOutput>,
        config: ChatConfig,
        events: Sender<ChatEvent>,
    ) -> Result<Self> {
        let assembler = FrameAssembler::new(config.frame_size)?;
        Ok(Self {
            session,
            capture,
            output,
            scheduler: PlaybackScheduler::new(),
            assembler,
            config,
            events,
            connected: false,
            user_speaking: false,
            buddy_speaking: false,
            capture_done: false,
            summary: ChatSummary::default(),
        })
    }

    fn emit(&self, event: ChatEvent) {
        if self.events.send(event).is_err() {
            log::trace!("chat event dropped: no listener");
        }
    }

    fn set_buddy_speaking(&mut self, speaking: bool) {
        if self.buddy_speaking != speaking {
            self.buddy_speaking = speaking;
            self.emit(ChatEvent::BuddySpeaking(speaking));
        }
    }

    fn set_user_speaking(&mut self, speaking: bool) {
        if self.user_speaking != speaking {
            self.user_speaking = speaking;
            self.emit(ChatEvent::UserSpeaking(speaking));
        }
    }

    /// React to one session event.
    fn handle_session_event(&mut self, event: SessionEvent) -> Flow {
        match event {
            SessionEvent::Opened => {
                self.connected = true;
                self.emit(ChatEvent::Connected);
            }
            SessionEvent::Frame(audio) => {
                let buffer = match pcm::decode(&audio.data, audio.sample_rate, 1) {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        self.summary.malformed_frames += 1;
                        log::warn!("dropping inbound audio frame: {}", e);
                        return Flow::Continue;
                    }
                };
                if buffer.is_empty() {
                    return Flow::Continue;
                }

                let underruns = self.scheduler.underruns();
                let now = self.output.current_time();
                let start = self.scheduler.enqueue(&buffer, now);
                if self.scheduler.underruns() > underruns {
                    self.emit(ChatEvent::Underrun {
                        total: self.scheduler.underruns(),
                    });
                }

                if let Err(e) = self.output.play_at(buffer, start) {
                    log::error!("failed to schedule playback: {}", e);
                    self.emit(ChatEvent::Error(e.to_string()));
                    return Flow::Continue;
                }
                self.set_buddy_speaking(true);
            }
            SessionEvent::TurnComplete => {
                log::debug!("model turn complete");
                self.scheduler.end_turn();
            }
            SessionEvent::Interrupted => {
                let now = self.output.current_time();
                let dropped = self.scheduler.interrupt(now);
                self.output.flush();
                self.summary.interruptions += 1;
                log::debug!("interrupted, dropped {} queued buffers", dropped);
                self.set_buddy_speaking(false);
            }
            SessionEvent::Failed(e) => {
                self.emit(ChatEvent::Error(e.to_string()));
            }
            SessionEvent::Closed => {
                self.connected = false;
                self.emit(ChatEvent::Disconnected);
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn send_frame(&mut self, frame: AudioFrame) {
        self.summary.frames_captured += 1;

        self.emit(ChatEvent::Level(activity::mean_amplitude(&frame.samples)));
        self.set_user_speaking(activity::is_speaking(
            &frame.samples,
            self.config.speaking_threshold,
        ));

        let encoded = pcm::encode(&frame.samples);
        if self.session.send_frame(&encoded) {
            self.summary.frames_sent += 1;
        } else {
            self.summary.frames_dropped += 1;
        }
    }

    /// Move captured audio upstream. Returns the number of frames handled.
    ///
    /// # Errors
    /// Propagates capture failures.
    fn pump_capture(&mut self) -> Result<usize> {
        if self.capture_done {
            return Ok(0);
        }
        if !self.connected && !self.capture.is_live() {
            return Ok(0);
        }

        let samples = self.capture.read_samples()?;
        let mut frames = self.assembler.push(&samples);

        if self.capture.is_exhausted() {
            if let Some(last) = self.assembler.flush() {
                frames.push(last);
            }
            self.capture_done = true;
            log::info!("input finished; still listening for the reply");
        }

        let count = frames.len();
        for frame in frames {
            self.send_frame(frame);
        }
        if self.capture_done {
            self.set_user_speaking(false);
        }
        Ok(count)
    }

    /// Retire finished buffers and end "buddy speaking" once playback drains.
    fn poll_playback(&mut self) {
        let now = self.output.current_time();
        if self.scheduler.poll(now) == Some(PlaybackStatus::Idle) {
            self.set_buddy_speaking(false);
        }
    }

    /// Drive the conversation until the session closes or `stop` fires.
    pub fn run(mut self, session_events: Receiver<SessionEvent>, stop: Receiver<()>) -> ChatSummary {
        let ticker = crossbeam_channel::tick(self.config.poll_interval);

        loop {
            let flow = crossbeam_channel::select! {
                recv(session_events) -> event => match event {
                    Ok(event) => self.handle_session_event(event),
                    Err(_) => Flow::Stop,
                },
                recv(stop) -> _ => {
                    log::debug!("stop requested");
                    Flow::Stop
                },
                recv(ticker) -> _ => Flow::Continue,
            };
            if flow == Flow::Stop {
                break;
            }

            if let Err(e) = self.pump_capture() {
                log::error!("capture failed: {}", e);
                self.emit(ChatEvent::Error(e.to_string()));
                break;
            }
            self.poll_playback();
        }

        self.shutdown()
    }

    /// Close the session and release both devices.
    fn shutdown(mut self) -> ChatSummary {
        self.session.close();

        if let Err(e) = self.capture.stop() {
            log::warn!("failed to stop capture: {}", e);
        }
        self.output.flush();
        if let Err(e) = self.output.stop() {
            log::warn!("failed to stop playback: {}", e);
        }

        self.set_user_speaking(false);
        self.set_buddy_speaking(false);
        if self.connected {
            self.connected = false;
            self.emit(ChatEvent::Disconnected);
        }

        self.summary.buffers_scheduled = self.scheduler.scheduled();
        self.summary.underruns = self.scheduler.underruns();
        log::debug!("chat finished: {:?}", self.summary);
        self.summary
    }
}
