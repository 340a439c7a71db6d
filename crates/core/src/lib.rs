//! Core windowing logic for chat-transcript pretraining data.
//!
//! This crate turns ordered, per-message transcript rows (customer/agent chat
//! logs) into session-delimited tagged lines, packs those lines into
//! fixed-token-budget training windows with context carry-over across window
//! splits, and frames prompts for benchmarking sampled agent replies.

use serde::Serialize;

/// Tagged-line prefix for customer utterances.
pub const CUSTOMER_PREFIX: &str = "客户：";

/// Tagged-line prefix for agent (sales) utterances.
pub const AGENT_PREFIX: &str = "销售：";

/// Standalone marker separating two sessions in the tagged-line stream.
pub const SESSION_END: &str = "<eod>";

/// In-session pause marker, appended as a suffix to the preceding line.
pub const PAUSE_MARKER: &str = "<eop>";

/// Default token budget of one training window.
pub const WINDOW_TOKEN_BUDGET: usize = 256;

/// Idle gap (seconds) between two messages that marks a pause.
pub const PAUSE_GAP_SECS: i64 = 3600;

/// Combined message/voice-message count above which a burst marks a pause.
pub const BURST_THRESHOLD: u32 = 5;

/// Default character budget for a benchmark prompt's rolling context.
pub const PROMPT_CHAR_BUDGET: usize = 200;

/// Errors surfaced by transcript loading, packing, and generation.
///
/// Malformed input fails fast with a row-numbered message; capability errors
/// propagate to the caller unmodified. Empty input is never an error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing required column '{0}' in CSV header")]
    MissingColumn(String),

    #[error("row {row}: missing field '{column}'")]
    MissingField { row: usize, column: String },

    #[error("row {row}: invalid integer '{value}' in column '{column}'")]
    InvalidInteger {
        row: usize,
        column: String,
        value: String,
    },

    #[error("no CSV files found under {0:?}")]
    NoInput(std::path::PathBuf),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("generation error: {0}")]
    Generation(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A fixed-length encoding produced by [`Tokenizer::encode_fixed`].
///
/// All three sequences have exactly the requested length: real tokens carry an
/// attention mask of 1, padding carries 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedEncoding {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
    pub token_type_ids: Vec<i64>,
}

/// One persisted training window in the record layout expected downstream.
///
/// `input` and `target` are both the window's token ids (causal LM objective),
/// `is_masked` is the attention mask, `seg_id` the token type ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenFeature {
    pub input: Vec<i64>,
    pub is_masked: Vec<i64>,
    pub target: Vec<i64>,
    pub seg_id: Vec<i64>,
}

impl From<FixedEncoding> for TokenFeature {
    fn from(enc: FixedEncoding) -> Self {
        Self {
            input: enc.input_ids.clone(),
            is_masked: enc.attention_mask,
            target: enc.input_ids,
            seg_id: enc.token_type_ids,
        }
    }
}

/// Trait for tokenization operations.
///
/// Implementors provide encode/decode, token counting, and fixed-length
/// encoding. For exact tokenization (preprocessing), wrap a real tokenizer.
/// For tests, character-based stubs are sufficient.
pub trait Tokenizer {
    /// Encode text into token ids, without special tokens.
    fn encode(&self, text: &str) -> Result<Vec<i64>, Error>;

    /// Decode token ids back into text.
    fn decode(&self, ids: &[i64]) -> Result<String, Error>;

    /// Count the number of tokens in the given text.
    fn token_count(&self, text: &str) -> Result<usize, Error> {
        Ok(self.encode(text)?.len())
    }

    /// Encode text to exactly `max_length` tokens: truncate from the longest
    /// side first if over budget, pad to `max_length` otherwise.
    fn encode_fixed(&self, text: &str, max_length: usize) -> Result<FixedEncoding, Error>;
}

// Blanket implementation for references to Tokenizers
impl<T: Tokenizer + ?Sized> Tokenizer for &T {
    fn encode(&self, text: &str) -> Result<Vec<i64>, Error> {
        (*self).encode(text)
    }

    fn decode(&self, ids: &[i64]) -> Result<String, Error> {
        (*self).decode(ids)
    }

    fn token_count(&self, text: &str) -> Result<usize, Error> {
        (*self).token_count(text)
    }

    fn encode_fixed(&self, text: &str, max_length: usize) -> Result<FixedEncoding, Error> {
        (*self).encode_fixed(text, max_length)
    }
}

/// Sampling parameters forwarded to the generation capability.
///
/// Defaults match the benchmark settings used for the transcript corpus.
#[derive(Debug, Clone)]
pub struct SamplingOptions {
    pub num_beams: usize,
    pub top_p: f64,
    pub num_return_sequences: usize,
    pub no_repeat_ngram_size: usize,
    pub early_stopping: bool,
    pub max_new_tokens: usize,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            num_beams: 20,
            top_p: 0.95,
            num_return_sequences: 3,
            no_repeat_ngram_size: 3,
            early_stopping: true,
            max_new_tokens: 20,
        }
    }
}

/// Trait for the external generation capability.
///
/// Given prompt token ids and sampling parameters, returns
/// `num_return_sequences` sampled continuations (prompt tokens excluded).
pub trait Generator {
    fn generate(
        &self,
        input_ids: &[i64],
        options: &SamplingOptions,
    ) -> Result<Vec<Vec<i64>>, Error>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(
        &self,
        input_ids: &[i64],
        options: &SamplingOptions,
    ) -> Result<Vec<Vec<i64>>, Error> {
        (*self).generate(input_ids, options)
    }
}

mod benchmark;
pub mod pipeline;
mod segment;
mod window;

pub use benchmark::ReplyBenchmarker;
pub use pipeline::{
    discover_csv_files, filter_active_conversations, process_all_transcripts,
    process_transcript, read_rows, write_jsonl_output, ColumnMapping, PipelineConfig,
    PipelineResult, TranscriptResult,
};
pub use segment::{MessageRow, SessionSegmenter, SessionSegmenterConfig, Speaker};
pub use window::WindowPacker;
