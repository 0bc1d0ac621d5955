//! Memory store: append-only log of past sessions with keyword retrieval.
//!
//! Each log is JSON Lines on disk, loaded fully into memory and scanned
//! linearly on every retrieval. Scoring is plain keyword overlap with
//! ties broken by recency; there is no semantic matching.

pub mod keywords;

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use keywords::{extract_keywords, overlap};

/// Errors from memory persistence.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode memory record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Which independent log a store reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLog {
    /// The standard discuss/verify/critique/refine/blend pipeline.
    Standard,
    /// The coordinated (named-partner) pipeline.
    Coordinated,
}

impl MemoryLog {
    pub fn file_name(&self) -> &'static str {
        match self {
            MemoryLog::Standard => "memory.jsonl",
            MemoryLog::Coordinated => "coordinated_memory.jsonl",
        }
    }
}

/// One past prompt and the answer it ended with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub prompt: String,
    pub final_answer: String,
    pub timestamp: DateTime<Utc>,
    pub extracted_keywords: BTreeSet<String>,
}

/// A record that matched a query.
#[derive(Debug, Clone)]
pub struct ScoredRecord<'a> {
    pub record: &'a MemoryRecord,
    pub score: usize,
}

/// Append-only store of `MemoryRecord`s.
#[derive(Debug)]
pub struct MemoryStore {
    path: Option<PathBuf>,
    records: Vec<MemoryRecord>,
    min_overlap: usize,
}

impl MemoryStore {
    /// A store that lives only as long as the process.
    pub fn in_memory(min_overlap: usize) -> Self {
        Self {
            path: None,
            records: Vec::new(),
            min_overlap: min_overlap.max(1),
        }
    }

    /// Open `dir/<log file>`, creating the directory if needed.
    pub fn open_log(dir: &Path, log: MemoryLog, min_overlap: usize) -> Result<Self, MemoryError> {
        std::fs::create_dir_all(dir).map_err(|source| MemoryError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Self::open(&dir.join(log.file_name()), min_overlap)
    }

    /// Open a JSON Lines log. A missing file is an empty store; malformed
    /// lines are skipped.
    pub fn open(path: &Path, min_overlap: usize) -> Result<Self, MemoryError> {
        let mut store = Self {
            path: Some(path.to_path_buf()),
            records: Vec::new(),
            min_overlap: min_overlap.max(1),
        };

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(store),
            Err(source) => {
                return Err(MemoryError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MemoryRecord>(line) {
                Ok(record) => store.records.push(record),
                Err(e) => warn!(path = %path.display(), line = lineno + 1, "skipping malformed memory record: {e}"),
            }
        }

        info!(path = %path.display(), records = store.records.len(), "loaded memory log");
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    /// Record a finished session. Persisted before it becomes visible.
    pub fn append(&mut self, prompt: &str, answer: &str) -> Result<&MemoryRecord, MemoryError> {
        let record = MemoryRecord {
            prompt: prompt.to_string(),
            final_answer: answer.to_string(),
            timestamp: Utc::now(),
            extracted_keywords: extract_keywords(prompt),
        };

        if let Some(ref path) = self.path {
            let mut line = serde_json::to_string(&record)?;
            line.push('\n');
            let io_err = |source| MemoryError::Io {
                path: path.clone(),
                source,
            };
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(io_err)?;
            file.write_all(line.as_bytes()).map_err(io_err)?;
        }

        debug!(keywords = record.extracted_keywords.len(), "appended memory record");
        self.records.push(record);
        Ok(&self.records[self.records.len() - 1])
    }

    /// Top `max_records` matches, best overlap first, most recent first on ties.
    pub fn search(&self, prompt: &str, max_records: usize) -> Vec<ScoredRecord<'_>> {
        let query = extract_keywords(prompt);
        if query.is_empty() || max_records == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, ScoredRecord<'_>)> = self
            .records
            .iter()
            .enumerate()
            .filter_map(|(idx, record)| {
                let score = overlap(&query, &record.extracted_keywords);
                (score >= self.min_overlap).then_some((idx, ScoredRecord { record, score }))
            })
            .collect();

        // Insertion order is recency; the log is append-only.
        scored.sort_by(|(ia, a), (ib, b)| b.score.cmp(&a.score).then(ib.cmp(ia)));
        scored.truncate(max_records);
        scored.into_iter().map(|(_, s)| s).collect()
    }

    /// Render the best matches as prompt context. Empty when nothing qualifies.
    pub fn retrieve(&self, prompt: &str, max_records: usize) -> String {
        let hits = self.search(prompt, max_records);
        if hits.is_empty() {
            return String::new();
        }

        let mut context = String::from("Relevant context from previous sessions:");
        for (i, hit) in hits.iter().enumerate() {
            context.push_str(&format!(
                "\n\n{}. Question: {}\nAnswer: {}",
                i + 1,
                hit.record.prompt,
                hit.record.final_answer
            ));
        }
        context
    }
}
