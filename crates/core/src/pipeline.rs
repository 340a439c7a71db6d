//! Pipeline for processing transcript CSVs into training windows.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use walkdir::WalkDir;

use crate::segment::{MessageRow, SessionSegmenter, SessionSegmenterConfig, Speaker};
use crate::window::WindowPacker;
use crate::{Error, TokenFeature, Tokenizer, WINDOW_TOKEN_BUDGET};

/// CSV header names of the five semantic fields.
///
/// Defaults match the upstream transcript export; deployments with different
/// headers override individual names.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub conversation_id: String,
    pub timestamp: String,
    pub speaker: String,
    pub text: String,
    pub message_count: String,
    pub voice_message_count: String,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            conversation_id: "customer_id".to_string(),
            timestamp: "timestamp".to_string(),
            speaker: "speaker".to_string(),
            text: "text".to_string(),
            message_count: "mess_count".to_string(),
            voice_message_count: "voice_count".to_string(),
        }
    }
}

/// Configuration for the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub token_budget: usize,
    pub segmenter: SessionSegmenterConfig,
    pub columns: ColumnMapping,
    /// Keep only conversations with strictly more customer messages than this.
    pub min_customer_messages: Option<usize>,
    pub val_ratio: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            token_budget: WINDOW_TOKEN_BUDGET,
            segmenter: SessionSegmenterConfig::default(),
            columns: ColumnMapping::default(),
            min_customer_messages: None,
            val_ratio: 0.1,
        }
    }
}

/// Windows produced from a single transcript file.
#[derive(Debug)]
pub struct TranscriptResult {
    pub features: Vec<TokenFeature>,
    pub source_path: String,
}

/// Result of processing all transcripts.
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub total_transcripts: usize,
    pub total_windows: usize,
    pub train_windows: usize,
    pub val_windows: usize,
    pub total_tokens: usize,
}

/// Discover all CSV files in a directory.
pub fn discover_csv_files(root: &Path) -> Vec<std::path::PathBuf> {
    let mut paths: Vec<std::path::PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "csv"))
        .map(|e| e.path().to_path_buf())
        .collect();
    paths.sort();
    paths
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize, Error> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| Error::MissingColumn(name.to_string()))
}

fn field<'r>(
    record: &'r csv::StringRecord,
    index: usize,
    row: usize,
    column: &str,
) -> Result<&'r str, Error> {
    record.get(index).ok_or_else(|| Error::MissingField {
        row,
        column: column.to_string(),
    })
}

fn integer_field<N>(
    record: &csv::StringRecord,
    index: usize,
    row: usize,
    column: &str,
) -> Result<N, Error>
where
    N: std::str::FromStr,
{
    let raw = field(record, index, row, column)?;
    raw.trim().parse().map_err(|_| Error::InvalidInteger {
        row,
        column: column.to_string(),
        value: raw.to_string(),
    })
}

/// Read transcript rows from a CSV file.
///
/// Fails fast on a missing column, a missing field, or a non-numeric
/// timestamp, speaker code, or count. The text field is taken verbatim, so
/// numeric cells arrive as their string form.
pub fn read_rows(csv_path: &Path, columns: &ColumnMapping) -> Result<Vec<MessageRow>, Error> {
    let mut reader = csv::Reader::from_path(csv_path)?;

    let headers = reader.headers()?.clone();
    let conversation_idx = column_index(&headers, &columns.conversation_id)?;
    let timestamp_idx = column_index(&headers, &columns.timestamp)?;
    let speaker_idx = column_index(&headers, &columns.speaker)?;
    let text_idx = column_index(&headers, &columns.text)?;
    let message_count_idx = column_index(&headers, &columns.message_count)?;
    let voice_count_idx = column_index(&headers, &columns.voice_message_count)?;

    let mut rows = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let record = result?;
        let row_no = i + 1;

        let speaker_code: i64 =
            integer_field(&record, speaker_idx, row_no, &columns.speaker)?;

        rows.push(MessageRow {
            conversation_id: field(&record, conversation_idx, row_no, &columns.conversation_id)?
                .to_string(),
            timestamp: integer_field(&record, timestamp_idx, row_no, &columns.timestamp)?,
            speaker: Speaker::from_code(speaker_code),
            text: field(&record, text_idx, row_no, &columns.text)?.to_string(),
            message_count: integer_field(&record, message_count_idx, row_no, &columns.message_count)?,
            voice_message_count: integer_field(
                &record,
                voice_count_idx,
                row_no,
                &columns.voice_message_count,
            )?,
        });
    }

    Ok(rows)
}

/// Keep only conversations with strictly more than `min_customer_messages`
/// customer messages, preserving row order.
pub fn filter_active_conversations(
    rows: Vec<MessageRow>,
    min_customer_messages: usize,
) -> Vec<MessageRow> {
    let mut customer_counts: HashMap<&str, usize> = HashMap::new();
    for row in &rows {
        if row.speaker == Speaker::Customer {
            *customer_counts.entry(row.conversation_id.as_str()).or_default() += 1;
        }
    }

    let active: std::collections::HashSet<String> = customer_counts
        .into_iter()
        .filter(|(_, count)| *count > min_customer_messages)
        .map(|(id, _)| id.to_string())
        .collect();

    rows.into_iter()
        .filter(|row| active.contains(&row.conversation_id))
        .collect()
}

/// Process a single transcript CSV into training windows.
pub fn process_transcript<T>(
    csv_path: &Path,
    tokenizer: &T,
    config: &PipelineConfig,
) -> Result<Vec<TokenFeature>, Error>
where
    T: Tokenizer,
{
    let mut rows = read_rows(csv_path, &config.columns)?;
    if let Some(min) = config.min_customer_messages {
        rows = filter_active_conversations(rows, min);
    }

    let lines = SessionSegmenter::new(config.segmenter.clone()).segment(&rows);
    WindowPacker::new(config.token_budget).pack(&lines, tokenizer)
}

/// Process all transcript CSVs in a directory in parallel.
///
/// Uses rayon for parallel processing. The tokenizer must be `Sync + Send`
/// to be shared across threads. A transcript that fails to parse is reported
/// and skipped; the per-file `segment`/`pack` calls themselves stay atomic.
pub fn process_all_transcripts<T>(
    csv_root: &Path,
    tokenizer: &T,
    config: &PipelineConfig,
) -> Result<Vec<TranscriptResult>, Error>
where
    T: Tokenizer + Sync + Send,
{
    let csv_files = discover_csv_files(csv_root);

    if csv_files.is_empty() {
        return Err(Error::NoInput(csv_root.to_path_buf()));
    }

    let total_files = csv_files.len();
    let processed_count = AtomicUsize::new(0);
    let error_count = AtomicUsize::new(0);

    let results: Vec<TranscriptResult> = csv_files
        .into_par_iter()
        .filter_map(|csv_path| {
            let result = process_transcript(&csv_path, tokenizer, config);
            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;

            match result {
                Ok(features) => {
                    if count % 100 == 0 || count == total_files {
                        eprintln!("Processed {}/{} transcripts...", count, total_files);
                    }
                    Some(TranscriptResult {
                        features,
                        source_path: csv_path.to_string_lossy().to_string(),
                    })
                }
                Err(e) => {
                    error_count.fetch_add(1, Ordering::Relaxed);
                    eprintln!("Error processing {:?}: {}", csv_path, e);
                    None
                }
            }
        })
        .collect();

    let errors = error_count.load(Ordering::Relaxed);
    if errors > 0 {
        eprintln!("Warning: {} transcripts failed to process", errors);
    }

    Ok(results)
}

/// Write windows to JSONL files (training and validation).
pub fn write_jsonl_output(
    transcript_results: Vec<TranscriptResult>,
    output_dir: &Path,
    val_ratio: f64,
) -> Result<PipelineResult, Error> {
    use std::fs::File;
    use std::io::{BufWriter, Write};

    std::fs::create_dir_all(output_dir)?;

    // Shuffle transcripts for train/val split (simple deterministic shuffle)
    let mut transcripts: Vec<_> = transcript_results.into_iter().enumerate().collect();
    transcripts.sort_by(|(i, a), (j, b)| {
        let hash_a = (i * 2654435761) % 1000;
        let hash_b = (j * 2654435761) % 1000;
        hash_a
            .cmp(&hash_b)
            .then_with(|| a.source_path.cmp(&b.source_path))
    });

    let total_transcripts = transcripts.len();
    let val_count = (total_transcripts as f64 * val_ratio).round() as usize;
    let train_count = total_transcripts - val_count;

    let train_path = output_dir.join("training.jsonl");
    let val_path = output_dir.join("validation.jsonl");

    let mut train_file = BufWriter::new(File::create(&train_path)?);
    let mut val_file = BufWriter::new(File::create(&val_path)?);

    let mut train_windows = 0;
    let mut val_windows = 0;
    let mut total_tokens = 0usize;

    for (idx, (_, transcript)) in transcripts.into_iter().enumerate() {
        let is_validation = idx >= train_count;

        for feature in transcript.features {
            total_tokens += feature.is_masked.iter().filter(|&&m| m != 0).count();
            let json_line = serde_json::to_string(&feature)?;

            if is_validation {
                writeln!(val_file, "{}", json_line)?;
                val_windows += 1;
            } else {
                writeln!(train_file, "{}", json_line)?;
                train_windows += 1;
            }
        }
    }

    train_file.flush()?;
    val_file.flush()?;

    Ok(PipelineResult {
        total_transcripts,
        total_windows: train_windows + val_windows,
        train_windows,
        val_windows,
        total_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedEncoding;
    use std::io::Write;
    use tempfile::TempDir;

    /// Deterministic stub: one token per whitespace-separated word.
    struct WordTokenizer;

    impl Tokenizer for WordTokenizer {
        fn encode(&self, text: &str) -> Result<Vec<i64>, Error> {
            Ok(text
                .split_whitespace()
                .enumerate()
                .map(|(i, _)| i as i64 + 1)
                .collect())
        }

        fn decode(&self, ids: &[i64]) -> Result<String, Error> {
            Ok(ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(" "))
        }

        fn encode_fixed(&self, text: &str, max_length: usize) -> Result<FixedEncoding, Error> {
            let mut ids = self.encode(text)?;
            ids.truncate(max_length);
            let real = ids.len();
            ids.resize(max_length, 0);
            let mut mask = vec![1i64; real];
            mask.resize(max_length, 0);
            Ok(FixedEncoding {
                input_ids: ids,
                attention_mask: mask,
                token_type_ids: vec![0; max_length],
            })
        }
    }

    fn write_transcript(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "customer_id,timestamp,speaker,text,mess_count,voice_count").unwrap();
        write!(file, "{}", body).unwrap();
        path
    }

    #[test]
    fn test_discover_csv_files() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("subdir")).unwrap();
        std::fs::write(temp.path().join("a.csv"), "header\n").unwrap();
        std::fs::write(temp.path().join("subdir/b.csv"), "header\n").unwrap();
        std::fs::write(temp.path().join("notes.txt"), "ignored\n").unwrap();

        let files = discover_csv_files(temp.path());
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_read_rows_parses_fields() {
        let temp = TempDir::new().unwrap();
        let path = write_transcript(
            temp.path(),
            "t.csv",
            "c1,1700000000,0,在吗,1,0\nc1,1700000010,1,在的,2,1\n",
        );

        let rows = read_rows(&path, &ColumnMapping::default()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].speaker, Speaker::Customer);
        assert_eq!(rows[1].speaker, Speaker::Agent);
        assert_eq!(rows[1].timestamp, 1_700_000_010);
        assert_eq!(rows[1].message_count, 2);
        assert_eq!(rows[1].voice_message_count, 1);
    }

    #[test]
    fn test_read_rows_keeps_numeric_text_as_string() {
        let temp = TempDir::new().unwrap();
        let path = write_transcript(temp.path(), "t.csv", "c1,1700000000,0,13900001111,1,0\n");

        let rows = read_rows(&path, &ColumnMapping::default()).unwrap();
        assert_eq!(rows[0].text, "13900001111");
    }

    #[test]
    fn test_read_rows_missing_column_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("t.csv");
        std::fs::write(&path, "customer_id,timestamp,speaker,text\nc1,0,0,hi\n").unwrap();

        let err = read_rows(&path, &ColumnMapping::default()).unwrap_err();
        assert!(matches!(err, Error::MissingColumn(ref c) if c == "mess_count"));
    }

    #[test]
    fn test_read_rows_bad_timestamp_fails() {
        let temp = TempDir::new().unwrap();
        let path = write_transcript(temp.path(), "t.csv", "c1,yesterday,0,hi,1,0\n");

        let err = read_rows(&path, &ColumnMapping::default()).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidInteger { row: 1, ref column, .. } if column == "timestamp"
        ));
    }

    #[test]
    fn test_read_rows_custom_column_mapping() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("t.csv");
        std::fs::write(&path, "cid,ts,who,msg,mc,vc\nc1,5,0,hi,1,0\n").unwrap();

        let columns = ColumnMapping {
            conversation_id: "cid".to_string(),
            timestamp: "ts".to_string(),
            speaker: "who".to_string(),
            text: "msg".to_string(),
            message_count: "mc".to_string(),
            voice_message_count: "vc".to_string(),
        };
        let rows = read_rows(&path, &columns).unwrap();
        assert_eq!(rows[0].conversation_id, "c1");
        assert_eq!(rows[0].text, "hi");
    }

    #[test]
    fn test_filter_active_conversations() {
        let temp = TempDir::new().unwrap();
        let path = write_transcript(
            temp.path(),
            "t.csv",
            "c1,0,0,a,1,0\nc1,1,0,b,1,0\nc1,2,0,c,1,0\nc2,3,0,d,1,0\nc2,4,1,e,1,0\n",
        );

        let rows = read_rows(&path, &ColumnMapping::default()).unwrap();
        let filtered = filter_active_conversations(rows, 2);
        // c1 has 3 customer messages (> 2), c2 only 1
        assert_eq!(filtered.len(), 3);
        assert!(filtered.iter().all(|r| r.conversation_id == "c1"));
    }

    #[test]
    fn test_process_transcript_end_to_end() {
        let temp = TempDir::new().unwrap();
        let path = write_transcript(
            temp.path(),
            "t.csv",
            "c1,0,0,在吗,1,0\nc1,10,1,在的,1,0\nc2,20,0,你好,1,0\n",
        );

        let config = PipelineConfig {
            token_budget: 8,
            ..PipelineConfig::default()
        };
        // Session c1 ends with one agent reply accumulated, so the <eod>
        // emitted before c2 flushes exactly one window.
        let features = process_transcript(&path, &WordTokenizer, &config).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].input.len(), 8);
        assert_eq!(features[0].is_masked.iter().sum::<i64>(), 2);
    }

    #[test]
    fn test_empty_transcript_yields_no_windows() {
        let temp = TempDir::new().unwrap();
        let path = write_transcript(temp.path(), "t.csv", "");

        let features =
            process_transcript(&path, &WordTokenizer, &PipelineConfig::default()).unwrap();
        assert!(features.is_empty());
    }

    #[test]
    fn test_write_jsonl_output_record_shape() {
        let temp = TempDir::new().unwrap();
        let results = vec![TranscriptResult {
            features: vec![TokenFeature {
                input: vec![1, 2, 0],
                is_masked: vec![1, 1, 0],
                target: vec![1, 2, 0],
                seg_id: vec![0, 0, 0],
            }],
            source_path: "t.csv".to_string(),
        }];

        let out = temp.path().join("out");
        let result = write_jsonl_output(results, &out, 0.0).unwrap();
        assert_eq!(result.total_windows, 1);
        assert_eq!(result.train_windows, 1);
        assert_eq!(result.val_windows, 0);
        assert_eq!(result.total_tokens, 2);

        let text = std::fs::read_to_string(out.join("training.jsonl")).unwrap();
        let record: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(record["input"], serde_json::json!([1, 2, 0]));
        assert_eq!(record["is_masked"], serde_json::json!([1, 1, 0]));
        assert_eq!(record["target"], serde_json::json!([1, 2, 0]));
        assert_eq!(record["seg_id"], serde_json::json!([0, 0, 0]));
    }

    #[test]
    fn test_process_all_transcripts_empty_root_errors() {
        let temp = TempDir::new().unwrap();
        let err = process_all_transcripts(temp.path(), &WordTokenizer, &PipelineConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::NoInput(_)));
    }
}
