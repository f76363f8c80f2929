//! Speaking indicator for captured frames.
//!
//! Drives the "you are talking" affordance only. Frames are sent upstream
//! whatever this says; turn-taking is decided by the remote model.

/// Mean absolute sample amplitude of a frame (0.0 for an empty frame).
pub fn mean_amplitude(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum: f32 = frame.iter().map(|s| s.abs()).sum();
    sum / frame.len() as f32
}

/// Whether a frame's mean absolute amplitude is above `threshold`.
pub fn is_speaking(frame: &[f32], threshold: f32) -> bool {
    is_speech_level(mean_amplitude(frame), threshold)
}

/// The same decision for an amplitude that was already measured.
pub fn is_speech_level(level: f32, threshold: f32) -> bool {
    level > threshold
}

/// Render an amplitude as a fixed-width meter with a threshold marker.
///
/// The scale tops out at ten times the threshold so quiet speech still moves
/// the bar.
pub fn format_level_bar(level: f32, threshold: f32) -> String {
    const WIDTH: usize = 20;
    let full_scale = (threshold * 10.0).max(f32::EPSILON);
    let filled = ((level / full_scale).clamp(0.0, 1.0) * WIDTH as f32).round() as usize;
    let marker = ((threshold / full_scale) * WIDTH as f32).round() as usize;

    let mut bar = String::with_capacity(WIDTH + 2);
    bar.push('[');
    for i in 0..WIDTH {
        if i == marker && i >= filled {
            bar.push('|');
        } else if i < filled {
            bar.push('#');
        } else {
            bar.push(' ');
        }
    }
    bar.push(']');
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_frame(amplitude: f32, len: usize) -> Vec<f32> {
        // Alternate sign so the frame looks like a waveform
        (0..len)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    #[test]
    fn speaking_above_threshold() {
        let frame = constant_frame(0.02, 4096);
        assert!(is_speaking(&frame, 0.01));
    }

    #[test]
    fn not_speaking_below_threshold() {
        let frame = constant_frame(0.005, 4096);
        assert!(!is_speaking(&frame, 0.01));
    }

    #[test]
    fn threshold_is_exclusive() {
        let frame = constant_frame(0.25, 8);
        assert!(!is_speaking(&frame, 0.25));
        assert!(!is_speech_level(0.25, 0.25));
        assert!(is_speech_level(0.26, 0.25));
    }

    #[test]
    fn empty_frame_is_silent() {
        assert_eq!(mean_amplitude(&[]), 0.0);
        assert!(!is_speaking(&[], 0.01));
    }

    #[test]
    fn mean_amplitude_ignores_sign() {
        let level = mean_amplitude(&[0.5, -0.5, 0.1, -0.1]);
        assert!((level - 0.3).abs() < 1e-6);
    }

    #[test]
    fn level_bar_has_fixed_width() {
        for level in [0.0, 0.005, 0.05, 1.0] {
            let bar = format_level_bar(level, 0.01);
            assert_eq!(bar.chars().count(), 22, "bar for {}: {}", level, bar);
        }
    }

    #[test]
    fn level_bar_shows_marker_when_quiet() {
        let bar = format_level_bar(0.0, 0.01);
        assert!(bar.contains('|'));
        assert!(!bar.contains('#'));
    }

    #[test]
    fn level_bar_fills_when_loud() {
        let bar = format_level_bar(0.5, 0.01);
        assert_eq!(bar, format!("[{}]", "#".repeat(20)));
    }
}
