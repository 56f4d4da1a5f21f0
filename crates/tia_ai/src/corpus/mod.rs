//! Supplementary reference tables (per-locale CSV datasets) linearized for prompts.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tia_core::error::AppError;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorpusConfig {
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_files")]
    pub files: Vec<String>,
}

/// Relative to the working directory; the repository ships the regional tables here.
fn default_dir() -> PathBuf {
    PathBuf::from("data/corpus")
}

fn default_files() -> Vec<String> {
    vec![
        "CCPNilganj.csv".to_string(),
        "CCPRampal.csv".to_string(),
        "Kharif1_Crop_Diseases_Data.csv".to_string(),
    ]
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            files: default_files(),
        }
    }
}

/// One non-empty table row with its non-empty cells.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorpusRow {
    pub file: String,
    /// 1-based among kept rows of the file.
    pub row: u32,
    pub fields: Vec<(String, String)>,
}

impl CorpusRow {
    pub fn linearize(&self) -> String {
        let mut out = format!("Entry {}:\n", self.row);
        for (key, value) in self.fields.iter() {
            out.push_str(&format!("{key}: {value}\n"));
        }
        out
    }

    /// Cell values only, for ranking.
    pub fn searchable_text(&self) -> String {
        self.fields
            .iter()
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupplementaryCorpus {
    pub rows: Vec<CorpusRow>,
    pub text: String,
    pub text_sha256: String,
    pub files_loaded: Vec<String>,
}

impl SupplementaryCorpus {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The linearized text cut to at most `max_chars` characters.
    pub fn text_within(&self, max_chars: usize) -> String {
        if self.text.chars().count() <= max_chars {
            return self.text.clone();
        }
        self.text.chars().take(max_chars).collect()
    }
}

/// Parse one CSV table (with header) into rows, dropping rows whose cells are all blank.
pub fn parse_table(file: &str, csv_text: &str) -> Result<Vec<CorpusRow>, AppError> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_text.as_bytes());

    let headers = rdr
        .headers()
        .map_err(|e| {
            AppError::evidence_unavailable("Failed to read corpus table headers")
                .with_details(format!("file={file}; err={e}"))
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result.map_err(|e| {
            AppError::evidence_unavailable("Failed to parse corpus table row")
                .with_details(format!("file={file}; err={e}"))
        })?;
        let fields: Vec<(String, String)> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.trim().to_string()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        if fields.is_empty() {
            continue;
        }
        rows.push(CorpusRow {
            file: file.to_string(),
            row: rows.len() as u32 + 1,
            fields,
        });
    }
    Ok(rows)
}

#[derive(Debug, Clone)]
pub struct CorpusLoader {
    config: CorpusConfig,
}

impl CorpusLoader {
    pub fn new(config: CorpusConfig) -> Self {
        Self { config }
    }

    /// Read every configured table. A missing or malformed file contributes nothing.
    pub fn load(&self) -> SupplementaryCorpus {
        let mut rows = Vec::new();
        let mut text = String::new();
        let mut files_loaded = Vec::new();

        for name in self.config.files.iter() {
            let path = self.config.dir.join(name);
            let csv_text = match fs::read_to_string(&path) {
                Ok(t) => t,
                Err(e) => {
                    warn!(path = %path.display(), err = %e, "corpus table unavailable");
                    continue;
                }
            };
            let file_rows = match parse_table(name, &csv_text) {
                Ok(r) => r,
                Err(e) => {
                    warn!(path = %path.display(), code = %e.code, details = ?e.details, "corpus table skipped");
                    continue;
                }
            };

            text.push_str(&format!("\n=== {name} ===\n"));
            for row in file_rows.iter() {
                text.push_str(&row.linearize());
                text.push('\n');
            }
            debug!(file = %name, rows = file_rows.len(), "corpus table loaded");
            files_loaded.push(name.clone());
            rows.extend(file_rows);
        }

        if files_loaded.is_empty() && !self.config.files.is_empty() {
            warn!(dir = %self.config.dir.display(), "no corpus tables loaded; tier 2 will be skipped");
        }

        let text_sha256 = hex::encode(Sha256::digest(text.as_bytes()));
        SupplementaryCorpus {
            rows,
            text,
            text_sha256,
            files_loaded,
        }
    }
}

/// Loads the corpus once and hands out shared snapshots until invalidated.
#[derive(Debug)]
pub struct CorpusCache {
    loader: CorpusLoader,
    cached: Mutex<Option<Arc<SupplementaryCorpus>>>,
}

impl CorpusCache {
    pub fn new(loader: CorpusLoader) -> Self {
        Self {
            loader,
            cached: Mutex::new(None),
        }
    }

    /// A cache that never touches the filesystem.
    pub fn preloaded(corpus: SupplementaryCorpus) -> Self {
        Self {
            loader: CorpusLoader::new(CorpusConfig {
                dir: PathBuf::new(),
                files: Vec::new(),
            }),
            cached: Mutex::new(Some(Arc::new(corpus))),
        }
    }

    pub fn get_or_load(&self) -> Arc<SupplementaryCorpus> {
        let mut guard = match self.cached.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(corpus) = guard.as_ref() {
            return Arc::clone(corpus);
        }
        let corpus = Arc::new(self.loader.load());
        *guard = Some(Arc::clone(&corpus));
        corpus
    }

    /// The next `get_or_load` rereads the tables.
    pub fn invalidate(&self) {
        let mut guard = match self.cached.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = None;
    }
}
