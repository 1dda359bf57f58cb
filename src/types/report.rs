//! Batch reports returned to the caller

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SerialDuplicate;

/// One failed decode strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeAttempt {
    pub strategy: String,
    pub error: String,
}

/// Decoded document summary (the `decode` subcommand)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeReport {
    pub filename: String,
    pub fingerprint: String,
    pub strategy: String,
    pub rows: usize,
    pub failed_attempts: Vec<DecodeAttempt>,
}

/// Result of a general VOC sheet ingest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocIngestReport {
    pub run_id: Uuid,
    pub filename: String,
    pub fingerprint: String,
    pub strategy: String,
    pub total_rows: usize,
    pub succeeded: usize,
    pub inserted: usize,
    pub updated: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Models with no chipset mapping, sorted
    pub unmapped_models: Vec<String>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Result of a Q-data service log ingest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QDataIngestReport {
    pub run_id: Uuid,
    pub filename: String,
    pub fingerprint: String,
    pub strategy: String,
    pub total_rows: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Serial numbers with more than one service row, and how many rows a
/// cleanup removed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QDataDuplicateReport {
    pub has_duplicates: bool,
    pub duplicate_count: usize,
    pub duplicates: Vec<SerialDuplicate>,
    pub removed: usize,
}

/// A chipset name replaced by its representative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChipsetRename {
    pub from: String,
    pub to: String,
}

/// Result of a chipset mapping upload or a single mapping add
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChipsetImportReport {
    pub registered: usize,
    pub updated: usize,
    pub skipped: usize,
    pub records_updated: usize,
    pub renames: Vec<ChipsetRename>,
}

/// Result of a store-wide chipset merge or rename
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub renames: Vec<ChipsetRename>,
    pub records_updated: usize,
    pub mappings_updated: usize,
}

/// Result of re-applying model normalization to stored records
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRefreshReport {
    pub scanned: usize,
    pub updated: usize,
}

/// Result of an app keyword upload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppKeywordImportReport {
    pub rules: usize,
    pub keywords: usize,
    pub skipped: usize,
}

/// Push an error message, keeping only the first `limit`
pub fn push_limited(errors: &mut Vec<String>, limit: usize, message: String) {
    if errors.len() < limit {
        errors.push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voc_report_serializes_camel_case() {
        let report = VocIngestReport {
            unmapped_models: vec!["SM-S921N".to_string()],
            ..Default::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("unmappedModels").is_some());
        assert!(json.get("durationMs").is_some());
    }

    #[test]
    fn test_push_limited_caps_errors() {
        let mut errors = Vec::new();
        for i in 0..30 {
            push_limited(&mut errors, 20, format!("row {}", i));
        }
        assert_eq!(errors.len(), 20);
        assert_eq!(errors[19], "row 19");
    }
}
