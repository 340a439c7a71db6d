//! Session segmentation: per-message rows into tagged, session-delimited lines.

use crate::{AGENT_PREFIX, BURST_THRESHOLD, CUSTOMER_PREFIX, PAUSE_GAP_SECS, PAUSE_MARKER, SESSION_END};

/// Epoch seed for the pause gap check before any row has been seen.
const TIMESTAMP_SENTINEL: i64 = 1_700_000_000;

/// Who produced a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    Customer,
    Agent,
}

impl Speaker {
    /// Map the transcript's integer speaker code: 0 is the customer, any
    /// other value the agent.
    pub fn from_code(code: i64) -> Self {
        if code == 0 {
            Speaker::Customer
        } else {
            Speaker::Agent
        }
    }

    /// The tagged-line prefix for this speaker.
    pub fn prefix(&self) -> &'static str {
        match self {
            Speaker::Customer => CUSTOMER_PREFIX,
            Speaker::Agent => AGENT_PREFIX,
        }
    }
}

/// One transcript entry, ordered by conversation and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub conversation_id: String,
    pub timestamp: i64,
    pub speaker: Speaker,
    pub text: String,
    pub message_count: u32,
    pub voice_message_count: u32,
}

/// Configuration for [`SessionSegmenter`].
#[derive(Debug, Clone)]
pub struct SessionSegmenterConfig {
    /// Idle gap (seconds) that marks an in-session pause.
    pub pause_gap_secs: i64,
    /// Combined message/voice count above which a burst marks a pause.
    pub burst_threshold: u32,
}

impl Default for SessionSegmenterConfig {
    fn default() -> Self {
        Self {
            pause_gap_secs: PAUSE_GAP_SECS,
            burst_threshold: BURST_THRESHOLD,
        }
    }
}

/// Converts ordered transcript rows into a flat sequence of tagged lines.
///
/// Each utterance becomes one `prefix + text` line. A standalone `<eod>` line
/// separates rows whose `conversation_id` differs from the previous row's; an
/// idle gap or message burst inside one session appends `<eop>` to the line
/// emitted just before it. All state is local to the `segment` call.
#[derive(Debug, Clone, Default)]
pub struct SessionSegmenter {
    config: SessionSegmenterConfig,
}

impl SessionSegmenter {
    pub fn new(config: SessionSegmenterConfig) -> Self {
        Self { config }
    }

    /// Segment `rows` into tagged lines, preserving input order.
    ///
    /// The pause check runs before the boundary check on every row; both use
    /// the conversation tracked from the previous rows, so a pause can only
    /// annotate a line of the same session. No trailing `<eod>` is emitted.
    pub fn segment(&self, rows: &[MessageRow]) -> Vec<String> {
        let mut lines: Vec<String> = Vec::with_capacity(rows.len());
        let mut current_conversation: Option<&str> = None;
        let mut last_timestamp = TIMESTAMP_SENTINEL;

        for row in rows {
            let paused = row.timestamp - last_timestamp > self.config.pause_gap_secs
                || row.message_count + row.voice_message_count > self.config.burst_threshold;
            if paused && current_conversation == Some(row.conversation_id.as_str()) {
                if let Some(last) = lines.last_mut() {
                    last.push_str(PAUSE_MARKER);
                }
            }

            if current_conversation != Some(row.conversation_id.as_str()) {
                if current_conversation.is_some() {
                    lines.push(SESSION_END.to_string());
                }
                current_conversation = Some(row.conversation_id.as_str());
            }

            lines.push(format!("{}{}", row.speaker.prefix(), row.text));
            last_timestamp = row.timestamp;
        }

        lines
    }
}
