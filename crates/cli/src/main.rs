//! CLI tool for windowing chat transcripts into pretraining data.
//!
//! This tool processes transcript CSV files and outputs JSONL windows ready
//! for language-model pretraining. It uses the HuggingFace tokenizers Rust
//! library for accurate token counting and fixed-length encoding.

use std::path::PathBuf;

use clap::Parser;
use tokenizers::Tokenizer as HfTokenizer;

use transcript_windower_core::{
    process_all_transcripts, write_jsonl_output, ColumnMapping, Error as CoreError,
    FixedEncoding, PipelineConfig, PipelineResult, SessionSegmenterConfig, Tokenizer,
};

/// Window chat-transcript CSVs into token-budgeted JSONL pretraining records.
#[derive(Parser, Debug)]
#[command(name = "transcript-window")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Root directory containing transcript CSV files
    #[arg(long)]
    csv_root: PathBuf,

    /// Output directory for JSONL files
    #[arg(long)]
    output_dir: PathBuf,

    /// HuggingFace tokenizer model name or tokenizer.json path
    #[arg(long)]
    tokenizer: String,

    /// Token budget of one training window
    #[arg(long, default_value = "256")]
    token_budget: usize,

    /// Idle gap in seconds that marks an in-session pause
    #[arg(long, default_value = "3600")]
    pause_gap_secs: i64,

    /// Combined message/voice count above which a burst marks a pause
    #[arg(long, default_value = "5")]
    burst_threshold: u32,

    /// Keep only conversations with strictly more customer messages than this
    #[arg(long)]
    min_customer_messages: Option<usize>,

    /// Fraction of transcripts for validation (0.0-1.0)
    #[arg(long, default_value = "0.1")]
    val_ratio: f64,

    /// CSV header of the conversation id column
    #[arg(long, default_value = "customer_id")]
    conversation_column: String,

    /// CSV header of the timestamp column
    #[arg(long, default_value = "timestamp")]
    timestamp_column: String,

    /// CSV header of the speaker code column
    #[arg(long, default_value = "speaker")]
    speaker_column: String,

    /// CSV header of the message text column
    #[arg(long, default_value = "text")]
    text_column: String,

    /// CSV header of the message count column
    #[arg(long, default_value = "mess_count")]
    message_count_column: String,

    /// CSV header of the voice message count column
    #[arg(long, default_value = "voice_count")]
    voice_count_column: String,
}

/// Wrapper around HuggingFace tokenizers for the core's tokenizer capability.
///
/// This uses the Rust-native tokenizers library, which is `Send + Sync`
/// and enables true parallel tokenization without the Python GIL.
struct RustTokenizer {
    inner: HfTokenizer,
    pad_id: i64,
}

impl RustTokenizer {
    /// Load a HuggingFace tokenizer from a tokenizer.json path or model name.
    fn load(model: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let path = std::path::Path::new(model);
        let inner = if path.is_file() {
            HfTokenizer::from_file(path)?
        } else {
            HfTokenizer::from_pretrained(model, None)?
        };
        let pad_id = inner.token_to_id("<pad>").unwrap_or(0) as i64;
        Ok(Self { inner, pad_id })
    }
}

impl Tokenizer for RustTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<i64>, CoreError> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().iter().map(|&id| id as i64).collect())
    }

    fn decode(&self, ids: &[i64]) -> Result<String, CoreError> {
        let ids: Vec<u32> = ids.iter().map(|&id| id as u32).collect();
        self.inner
            .decode(&ids, false)
            .map_err(|e| CoreError::Tokenizer(e.to_string()))
    }

    fn encode_fixed(&self, text: &str, max_length: usize) -> Result<FixedEncoding, CoreError> {
        // Single segment: longest-side truncation degenerates to dropping
        // tokens from the tail.
        let mut input_ids = self.encode(text)?;
        input_ids.truncate(max_length);

        let real = input_ids.len();
        input_ids.resize(max_length, self.pad_id);
        let mut attention_mask = vec![1i64; real];
        attention_mask.resize(max_length, 0);

        Ok(FixedEncoding {
            input_ids,
            attention_mask,
            token_type_ids: vec![0; max_length],
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    println!("Loading tokenizer from {}...", args.tokenizer);
    let tokenizer = RustTokenizer::load(&args.tokenizer)?;

    let config = PipelineConfig {
        token_budget: args.token_budget,
        segmenter: SessionSegmenterConfig {
            pause_gap_secs: args.pause_gap_secs,
            burst_threshold: args.burst_threshold,
        },
        columns: ColumnMapping {
            conversation_id: args.conversation_column.clone(),
            timestamp: args.timestamp_column.clone(),
            speaker: args.speaker_column.clone(),
            text: args.text_column.clone(),
            message_count: args.message_count_column.clone(),
            voice_message_count: args.voice_count_column.clone(),
        },
        min_customer_messages: args.min_customer_messages,
        val_ratio: args.val_ratio,
    };

    println!("Processing transcript CSVs from {:?}...", args.csv_root);
    let transcript_results = process_all_transcripts(&args.csv_root, &tokenizer, &config)?;

    let total_transcripts = transcript_results.len();
    println!("Processed {} transcripts", total_transcripts);

    println!("Writing output to {:?}...", args.output_dir);
    let result: PipelineResult =
        write_jsonl_output(transcript_results, &args.output_dir, args.val_ratio)?;

    let metadata_path = args.output_dir.join("metadata.json");
    let metadata = serde_json::json!({
        "config": {
            "csv_root": args.csv_root.to_string_lossy(),
            "output_dir": args.output_dir.to_string_lossy(),
            "tokenizer": args.tokenizer,
            "token_budget": args.token_budget,
            "pause_gap_secs": args.pause_gap_secs,
            "burst_threshold": args.burst_threshold,
            "min_customer_messages": args.min_customer_messages,
            "val_ratio": args.val_ratio,
        },
        "counts": {
            "total_transcripts": result.total_transcripts,
            "total_windows": result.total_windows,
            "train_windows": result.train_windows,
            "val_windows": result.val_windows,
        },
        "stats": {
            "total_tokens": result.total_tokens,
            "avg_tokens_per_window": if result.total_windows > 0 {
                result.total_tokens as f64 / result.total_windows as f64
            } else {
                0.0
            },
        },
        "files": {
            "train_path": args.output_dir.join("training.jsonl").to_string_lossy(),
            "val_path": args.output_dir.join("validation.jsonl").to_string_lossy(),
        },
    });
    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;

    println!("\n[summary]");
    println!("  Total transcripts processed: {}", result.total_transcripts);
    println!("  Train windows: {}", result.train_windows);
    println!("  Val windows: {}", result.val_windows);
    println!("  Total non-padding tokens: {}", result.total_tokens);
    println!("  Output: {:?}/{{training,validation}}.jsonl", args.output_dir);
    println!("  Metadata: {:?}", metadata_path);

    Ok(())
}
