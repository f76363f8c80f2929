use crate::defaults;
use crate::error::{LiveBuddyError, Result};

/// Trait for audio capture sources.
///
/// This trait allows swapping implementations (microphone, WAV file, mock).
pub trait CaptureSource: Send + Sync {
    /// Start capturing audio from the source.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio from the source.
    fn stop(&mut self) -> Result<()>;

    /// Take the mono float samples captured since the last call.
    fn read_samples(&mut self) -> Result<Vec<f32>>;

    /// Whether a finite source (a file) has handed out everything it has.
    ///
    /// Live sources never run out.
    fn is_exhausted(&self) -> bool {
        false
    }

    /// Whether audio keeps arriving in real time regardless of reads.
    ///
    /// A recording is not live: it holds its place until the session is
    /// open, so nothing it holds is lost to a connection still in progress.
    fn is_live(&self) -> bool {
        true
    }
}

/// A fixed-size block of mono capture samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Sequence number for ordering frames.
    pub sequence: u64,
    /// Samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
}

impl AudioFrame {
    pub fn new(sequence: u64, samples: Vec<f32>) -> Self {
        Self { sequence, samples }
    }

    /// Returns the duration of this frame in milliseconds.
    pub fn duration_ms(&self, sample_rate: u32) -> u32 {
        if sample_rate == 0 {
            return 0;
        }
        (self.samples.len() as u64 * 1000 / sample_rate as u64) as u32
    }
}

/// Slices an irregular stream of polled samples into fixed-size frames.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameAssembler {
    /// # Errors
    /// Returns `LiveBuddyError::ConfigInvalidValue` for a zero frame size.
    pub fn new(frame_size: usize) -> Result<Self> {
        if frame_size == 0 {
            return Err(LiveBuddyError::ConfigInvalidValue {
                key: "frame_size".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
            next_sequence: 0,
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Append samples and return every complete frame now available.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        self.pending.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.pending.len() >= self.frame_size {
            let rest = self.pending.split_off(self.frame_size);
            let samples = std::mem::replace(&mut self.pending, rest);
            frames.push(AudioFrame::new(self.next_sequence, samples));
            self.next_sequence += 1;
        }
        frames
    }

    /// Emit the trailing partial frame, if any.
    pub fn flush(&mut self) -> Option<AudioFrame> {
        if self.pending.is_empty() {
            return None;
        }
        let samples = std::mem::take(&mut self.pending);
        let frame = AudioFrame::new(self.next_sequence, samples);
        self.next_sequence += 1;
        Some(frame)
    }

    /// Samples waiting for a full frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self {
            frame_size: defaults::CAPTURE_FRAME_SIZE,
            pending: Vec::new(),
            next_sequence: 0,
        }
    }
}

/// Mock capture source for testing
#[derive(Debug, Clone)]
pub struct MockCaptureSource {
    is_started: bool,
    reads: Vec<Vec<f32>>,
    repeat_last: bool,
    live: bool,
    should_fail_start: bool,
    should_fail_read: bool,
    error: MockCaptureError,
}

/// Which error a failing mock reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockCaptureError {
    Capture,
    PermissionDenied,
}

impl MockCaptureSource {
    /// Create a mock that yields nothing.
    pub fn new() -> Self {
        Self {
            is_started: false,
            reads: Vec::new(),
            repeat_last: false,
            live: true,
            should_fail_start: false,
            should_fail_read: false,
            error: MockCaptureError::Capture,
        }
    }

    /// Queue one batch of samples for a future `read_samples`.
    pub fn with_read(mut self, samples: Vec<f32>) -> Self {
        self.reads.push(samples);
        self
    }

    /// Keep returning the last queued batch instead of running dry.
    pub fn repeating(mut self) -> Self {
        self.repeat_last = true;
        self
    }

    /// Behave like a recording rather than a live device.
    pub fn recorded(mut self) -> Self {
        self.live = false;
        self
    }

    /// Configure the mock to fail on start
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Report failures as a denied device permission.
    pub fn with_permission_denied(mut self) -> Self {
        self.error = MockCaptureError::PermissionDenied;
        self
    }

    /// Check if the capture source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }

    fn failure(&self) -> LiveBuddyError {
        match self.error {
            MockCaptureError::Capture => LiveBuddyError::AudioCapture {
                message: "mock capture error".to_string(),
            },
            MockCaptureError::PermissionDenied => LiveBuddyError::PermissionDenied {
                message: "mock microphone permission denied".to_string(),
            },
        }
    }
}

impl Default for MockCaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for MockCaptureSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(self.failure())
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<f32>> {
        if self.should_fail_read {
            return Err(self.failure());
        }
        if self.reads.len() == 1 && self.repeat_last {
            return Ok(self.reads[0].clone());
        }
        if self.reads.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(self.reads.remove(0))
        }
    }

    fn is_exhausted(&self) -> bool {
        !self.repeat_last && self.reads.is_empty()
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_emits_full_frames() {
        let mut assembler = FrameAssembler::new(4).unwrap();

        assert!(assembler.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(assembler.buffered(), 3);

        let frames = assembler.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].samples, vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frames[1].samples, vec![0.5, 0.6, 0.7, 0.8]);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[1].sequence, 1);
        assert_eq!(assembler.buffered(), 1);
    }

    #[test]
    fn test_assembler_flush_returns_partial_frame() {
        let mut assembler = FrameAssembler::new(4).unwrap();
        assembler.push(&[0.1, 0.2]);

        let frame = assembler.flush().unwrap();
        assert_eq!(frame.samples, vec![0.1, 0.2]);
        assert!(assembler.flush().is_none());
    }

    #[test]
    fn test_assembler_rejects_zero_frame_size() {
        assert!(matches!(
            FrameAssembler::new(0),
            Err(LiveBuddyError::ConfigInvalidValue { .. })
        ));
    }

    #[test]
    fn test_assembler_default_frame_size() {
        assert_eq!(FrameAssembler::default().frame_size(), 4096);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(0, vec![0.0; 4096]);
        assert_eq!(frame.duration_ms(16000), 256);
        assert_eq!(frame.duration_ms(0), 0);
    }

    #[test]
    fn test_mock_capture_returns_queued_reads_in_order() {
        let mut source = MockCaptureSource::new()
            .with_read(vec![0.1, 0.2])
            .with_read(vec![0.3]);

        assert_eq!(source.read_samples().unwrap(), vec![0.1, 0.2]);
        assert_eq!(source.read_samples().unwrap(), vec![0.3]);
        assert!(source.read_samples().unwrap().is_empty());
        assert!(source.is_exhausted());
    }

    #[test]
    fn test_mock_capture_repeating() {
        let mut source = MockCaptureSource::new().with_read(vec![0.5]).repeating();
        for _ in 0..3 {
            assert_eq!(source.read_samples().unwrap(), vec![0.5]);
        }
        assert!(!source.is_exhausted());
    }

    #[test]
    fn test_mock_capture_start_stop_state_management() {
        let mut source = MockCaptureSource::new();
        assert!(!source.is_started());
        source.start().unwrap();
        assert!(source.is_started());
        source.stop().unwrap();
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_capture_permission_denied() {
        let mut source = MockCaptureSource::new()
            .with_start_failure()
            .with_permission_denied();

        match source.start() {
            Err(LiveBuddyError::PermissionDenied { message }) => {
                assert!(message.contains("permission"));
            }
            other => panic!("Expected PermissionDenied, got {:?}", other),
        }
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_capture_read_failure() {
        let mut source = MockCaptureSource::new().with_read_failure();
        assert!(matches!(
            source.read_samples(),
            Err(LiveBuddyError::AudioCapture { .. })
        ));
    }

    #[test]
    fn test_capture_source_trait_is_object_safe() {
        let mut source: Box<dyn CaptureSource> =
            Box::new(MockCaptureSource::new().with_read(vec![1.0, -1.0]));
        assert!(source.start().is_ok());
        assert_eq!(source.read_samples().unwrap(), vec![1.0, -1.0]);
        assert!(source.stop().is_ok());
    }
}
