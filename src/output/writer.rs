//! Deduplicating corpus writer
//!
//! Every unique normalized text is written exactly once, to
//! `{output_dir}/{source}/{source}_{YYYYMMDD}_{hash}.txt`. The content index
//! maps content hashes to the file holding them and is seeded from the
//! output directory on startup.

use crate::config::{Config, TextNormalization};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Length of the content hash in hex characters
const CONTENT_HASH_LEN: usize = 16;

/// Errors that can occur while saving a document
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document is empty after normalization")]
    EmptyContent,

    #[error("invalid source name '{0}'")]
    InvalidSource(String),
}

/// Result type for writer operations
pub type WriteResult<T> = Result<T, WriteError>;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// What happened to a saved document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    /// A new file was written
    pub saved: bool,
    /// The text was already in the corpus
    pub duplicate: bool,
    /// The file holding this text (the existing one for duplicates)
    pub file_path: PathBuf,
    pub content_hash: String,
}

/// Size of the corpus on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorpusStats {
    pub files: u64,
    pub bytes: u64,
}

/// Writes normalized documents, skipping content already in the corpus
pub struct ContentWriter {
    output_dir: PathBuf,
    policies: HashMap<String, TextNormalization>,
    index: Mutex<HashMap<String, PathBuf>>,
}

impl ContentWriter {
    /// Opens the output directory, seeding the content index from it
    ///
    /// Leftover `*.tmp` files from an interrupted write are deleted.
    ///
    /// # Arguments
    ///
    /// * `output_dir` - Root of the corpus
    /// * `policies` - Text normalization policy per source name
    pub fn open(
        output_dir: &Path,
        policies: HashMap<String, TextNormalization>,
    ) -> WriteResult<Self> {
        fs::create_dir_all(output_dir).map_err(io_error(output_dir))?;

        let mut index = HashMap::new();
        let mut removed = 0;

        for source_dir in fs::read_dir(output_dir).map_err(io_error(output_dir))? {
            let source_dir = source_dir.map_err(io_error(output_dir))?.path();
            if !source_dir.is_dir() {
                continue;
            }

            for entry in fs::read_dir(&source_dir).map_err(io_error(&source_dir))? {
                let path = entry.map_err(io_error(&source_dir))?.path();
                match path.extension().and_then(|e| e.to_str()) {
                    Some("tmp") => {
                        fs::remove_file(&path).map_err(io_error(&path))?;
                        removed += 1;
                    }
                    Some("txt") => {
                        if let Some(hash) = hash_from_file_name(&path) {
                            index.insert(hash, path);
                        }
                    }
                    _ => {}
                }
            }
        }

        if removed > 0 {
            tracing::warn!("Removed {} partial files from an interrupted write", removed);
        }
        tracing::info!(
            "Content index seeded with {} documents from {}",
            index.len(),
            output_dir.display()
        );

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            policies,
            index: Mutex::new(index),
        })
    }

    /// Opens the writer described by a configuration
    pub fn from_config(config: &Config) -> WriteResult<Self> {
        let policies = config
            .sources
            .iter()
            .map(|s| (s.name.clone(), s.normalization))
            .collect();
        Self::open(Path::new(&config.storage.output_dir), policies)
    }

    fn index(&self) -> MutexGuard<'_, HashMap<String, PathBuf>> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Saves a document unless identical text is already in the corpus
    ///
    /// The index lock is held from the lookup until the file is renamed into
    /// place, so concurrent saves of the same text produce exactly one file
    /// and a duplicate always points at a complete file.
    ///
    /// # Arguments
    ///
    /// * `text` - Extracted text, normalized here with the source's policy
    /// * `source` - Source name (output subdirectory and file prefix)
    /// * `url` - URL the text came from, recorded in the header
    /// * `metadata` - Extra `key: value` header lines
    pub fn save(
        &self,
        text: &str,
        source: &str,
        url: &str,
        metadata: &BTreeMap<String, String>,
    ) -> WriteResult<SaveOutcome> {
        if source.is_empty()
            || !source
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(WriteError::InvalidSource(source.to_string()));
        }

        let policy = self.policies.get(source).copied().unwrap_or_default();
        let normalized = normalize_text(text, policy);
        if normalized.is_empty() {
            return Err(WriteError::EmptyContent);
        }
        let hash = content_hash(&normalized);

        let mut index = self.index();
        if let Some(existing) = index.get(&hash) {
            return Ok(SaveOutcome {
                saved: false,
                duplicate: true,
                file_path: existing.clone(),
                content_hash: hash,
            });
        }

        let source_dir = self.output_dir.join(source);
        fs::create_dir_all(&source_dir).map_err(io_error(&source_dir))?;

        let file_name = format!("{}_{}_{}.txt", source, Utc::now().format("%Y%m%d"), hash);
        let path = source_dir.join(file_name);
        let document = render_document(&normalized, source, url, metadata);
        write_atomically(&path, document.as_bytes())?;

        index.insert(hash.clone(), path.clone());
        Ok(SaveOutcome {
            saved: true,
            duplicate: false,
            file_path: path,
            content_hash: hash,
        })
    }

    /// Number of distinct documents known to the index
    pub fn document_count(&self) -> usize {
        self.index().len()
    }

    /// Counts corpus files and their total size
    pub fn corpus_stats(&self) -> CorpusStats {
        let paths: Vec<PathBuf> = self.index().values().cloned().collect();
        let mut stats = CorpusStats::default();
        for path in paths {
            if let Ok(meta) = fs::metadata(&path) {
                stats.files += 1;
                stats.bytes += meta.len();
            }
        }
        stats
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

/// Measures a corpus directory without opening a writer
///
/// Read-only, so it is safe while another process is harvesting into the
/// same directory. A missing directory is an empty corpus.
pub fn scan_corpus(output_dir: &Path) -> CorpusStats {
    let mut stats = CorpusStats::default();
    let Ok(sources) = fs::read_dir(output_dir) else {
        return stats;
    };

    for source_dir in sources.flatten() {
        let Ok(entries) = fs::read_dir(source_dir.path()) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            if let Ok(meta) = entry.metadata() {
                stats.files += 1;
                stats.bytes += meta.len();
            }
        }
    }
    stats
}

/// Writes to `{path}.tmp`, syncs, then renames over `path`
fn write_atomically(path: &Path, contents: &[u8]) -> WriteResult<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        })
        .and_then(|_| fs::rename(&tmp_path, path));

    if let Err(source) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(WriteError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

fn render_document(
    text: &str,
    source: &str,
    url: &str,
    metadata: &BTreeMap<String, String>,
) -> String {
    let mut out = String::with_capacity(text.len() + 256);
    out.push_str(&format!("# url: {}\n", header_value(url)));
    out.push_str(&format!("# source: {}\n", header_value(source)));
    out.push_str(&format!("# saved_at: {}\n", Utc::now().to_rfc3339()));
    for (key, value) in metadata {
        out.push_str(&format!("# {}: {}\n", header_value(key), header_value(value)));
    }
    out.push('\n');
    out.push_str(text);
    out.push('\n');
    out
}

fn header_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts the content hash from `{source}_{date}_{hash}.txt`
fn hash_from_file_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let (_, hash) = stem.rsplit_once('_')?;
    (hash.len() == CONTENT_HASH_LEN && hash.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| hash.to_string())
}

/// Normalizes text according to a source's policy
pub fn normalize_text(text: &str, policy: TextNormalization) -> String {
    let lines: Vec<String> = match policy {
        TextNormalization::CollapseWhitespace => text
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect(),
        TextNormalization::PreserveLines => {
            text.lines().map(|line| line.trim_end().to_string()).collect()
        }
    };

    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    for line in &lines {
        let blank = line.trim().is_empty();
        if blank {
            let collapse = policy == TextNormalization::CollapseWhitespace;
            if out.is_empty() || (collapse && out.last().map_or(false, |l| l.is_empty())) {
                continue;
            }
            out.push("");
        } else {
            out.push(line);
        }
    }

    while out.last().map_or(false, |l| l.trim().is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Dedup key: the first 16 hex characters of SHA-256 over the normalized text
pub fn content_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    let mut hash = hex::encode(hasher.finalize());
    hash.truncate(CONTENT_HASH_LEN);
    hash
}
