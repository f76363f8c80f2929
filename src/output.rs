//! Terminal rendering of chat events.
//! Status lines go to stderr so stdout stays clean.

use crate::audio::activity::{format_level_bar, is_speech_level};
use crate::chat::{ChatEvent, ChatSummary};
use std::io::{self, Write};

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// Clear the current terminal line (replaces level bar etc.)
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

/// The line printed for a state-change event; `None` for meter updates.
fn status_line(event: &ChatEvent) -> Option<String> {
    match event {
        ChatEvent::Connected => Some(format!("{GREEN}Connected. Say hello!{RESET}")),
        ChatEvent::Disconnected => Some(format!("{DIM}Disconnected{RESET}")),
        ChatEvent::UserSpeaking(true) => Some("You are speaking...".to_string()),
        ChatEvent::UserSpeaking(false) => None,
        ChatEvent::BuddySpeaking(true) => Some(format!("{CYAN}Buddy is talking...{RESET}")),
        ChatEvent::BuddySpeaking(false) => Some(format!("{DIM}Buddy is listening{RESET}")),
        ChatEvent::Underrun { total } => {
            Some(format!("{YELLOW}Playback gap (underrun #{total}){RESET}"))
        }
        ChatEvent::Error(message) => Some(format!("{RED}Error:{RESET} {message}")),
        ChatEvent::Level(_) => None,
    }
}

/// Render one chat event to stderr.
///
/// Level updates redraw a meter in place; everything else gets its own line.
pub fn render_event(event: &ChatEvent, threshold: f32) {
    match event {
        ChatEvent::Level(level) => {
            let bar = format_level_bar(*level, threshold);
            let speech = if is_speech_level(*level, threshold) { " SPEECH" } else { "" };
            eprint!("\r\x1b[2K{bar}{speech}");
            io::stderr().flush().ok();
        }
        other => {
            if let Some(line) = status_line(other) {
                clear_line();
                eprintln!("{line}");
            }
        }
    }
}

fn summary_text(summary: &ChatSummary) -> String {
    let mut text = format!(
        "{DIM}sent {} of {} frames, played {} buffers",
        summary.frames_sent, summary.frames_captured, summary.buffers_scheduled
    );
    if summary.malformed_frames > 0 {
        text.push_str(&format!(", {} malformed", summary.malformed_frames));
    }
    if summary.underruns > 0 {
        text.push_str(&format!(", {} underruns", summary.underruns));
    }
    if summary.interruptions > 0 {
        text.push_str(&format!(", {} interruptions", summary.interruptions));
    }
    text.push_str(RESET);
    text
}

/// Print the end-of-chat counters.
pub fn render_summary(summary: &ChatSummary) {
    clear_line();
    eprintln!("{}", summary_text(summary));
}
