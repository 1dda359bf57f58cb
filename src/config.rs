//! Configuration management

use std::path::PathBuf;

use anyhow::{self, Context, Result};

use crate::defaults::{DEFAULT_CHUNK_SIZE, DEFAULT_CONVERTER_TIMEOUT_SECS, DEFAULT_SIMILARITY_THRESHOLD};
use crate::services::chipset::MergeMode;
use crate::services::decode::ConverterSettings;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON store location
    pub store_path: PathBuf,

    /// Rows between store checkpoints
    pub chunk_size: usize,

    /// External spreadsheet converters
    pub converter: ConverterSettings,

    /// Default chipset merge mode
    pub merge_mode: MergeMode,

    /// Threshold used when `--similar` is requested explicitly
    pub similarity_threshold: f64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let store_path = PathBuf::from(
            var("STORE_PATH").unwrap_or_else(|| "data/voc-store.json".to_string()),
        );

        let chunk_size = match var("INGEST_CHUNK_SIZE") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("INGEST_CHUNK_SIZE must be a positive integer, got {:?}", raw))?,
            None => DEFAULT_CHUNK_SIZE,
        };
        if chunk_size == 0 {
            anyhow::bail!("INGEST_CHUNK_SIZE must be greater than zero");
        }

        let timeout_secs = match var("CONVERTER_TIMEOUT_SECS") {
            Some(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("CONVERTER_TIMEOUT_SECS must be a number of seconds, got {:?}", raw))?,
            None => DEFAULT_CONVERTER_TIMEOUT_SECS,
        };
        let converter = ConverterSettings {
            soffice_bin: var("SOFFICE_BIN").unwrap_or_else(|| "soffice".to_string()),
            ssconvert_bin: var("SSCONVERT_BIN").unwrap_or_else(|| "ssconvert".to_string()),
            timeout_secs,
        };

        let similarity_threshold = match var("CHIPSET_SIMILARITY_THRESHOLD") {
            Some(raw) => raw
                .parse::<f64>()
                .with_context(|| format!("CHIPSET_SIMILARITY_THRESHOLD must be a number, got {:?}", raw))?,
            None => DEFAULT_SIMILARITY_THRESHOLD,
        };
        if !(similarity_threshold > 0.0 && similarity_threshold <= 1.0) {
            anyhow::bail!(
                "CHIPSET_SIMILARITY_THRESHOLD must be in (0, 1], got {}",
                similarity_threshold
            );
        }

        let merge_mode = match var("CHIPSET_MERGE_MODE").as_deref().map(str::trim) {
            None | Some("") | Some("exact") => MergeMode::Exact,
            Some("similar") => MergeMode::Similar {
                threshold: similarity_threshold,
            },
            Some(other) => anyhow::bail!(
                "CHIPSET_MERGE_MODE must be 'exact' or 'similar', got '{}'",
                other
            ),
        };

        Ok(Self {
            store_path,
            chunk_size,
            converter,
            merge_mode,
            similarity_threshold,
        })
    }

    /// Merge mode for a command; `--similar` forces similarity grouping
    pub fn merge_mode_for(&self, similar: bool) -> MergeMode {
        if similar {
            MergeMode::Similar {
                threshold: self.similarity_threshold,
            }
        } else {
            self.merge_mode
        }
    }
}
