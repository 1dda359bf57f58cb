//! Repository interfaces consumed by the ingest pipeline
//!
//! The pipeline never talks to storage directly. It reads lookups and
//! writes results through these traits; `JsonFileStore` is the bundled
//! implementation.

pub mod json_store;

pub use json_store::JsonFileStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{
    AppKeywordRule, CanonicalRecord, ChipsetMapping, QDataRecord, SerialDuplicate, StoredRecord,
    UnmappedModel,
};

/// Result of writing one VOC case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Durable flush point, called between chunks and at the end of a batch
#[async_trait]
pub trait Checkpoint: Send + Sync {
    async fn checkpoint(&self) -> Result<()>;
}

#[async_trait]
pub trait VocRepository: Checkpoint {
    /// Insert a new case. An existing case code only gets its model name,
    /// chipset, cause, solution and upload time replaced.
    async fn upsert_record(&self, record: CanonicalRecord) -> Result<UpsertOutcome>;

    async fn record(&self, case_code: &str) -> Result<Option<StoredRecord>>;

    async fn records(&self) -> Result<Vec<StoredRecord>>;

    /// Returns whether the case exists
    async fn set_model_name(&self, case_code: &str, model_name: &str) -> Result<bool>;

    /// Set the chipset of every case of `model_name`; returns cases touched
    async fn assign_chipset(&self, model_name: &str, chipset: &str) -> Result<usize>;

    /// Replace chipset `from` with `to` on every case; returns cases touched
    async fn rename_record_chipset(&self, from: &str, to: &str) -> Result<usize>;

    /// Non-empty chipset names in use, sorted
    async fn distinct_chipsets(&self) -> Result<Vec<String>>;

    /// Models with no chipset, most frequent first
    async fn unmapped_models(&self) -> Result<Vec<UnmappedModel>>;
}

#[async_trait]
pub trait ServiceLogRepository: Checkpoint {
    /// `false` when `(serial_number, log_id)` is already stored; rows
    /// without a log id are always inserted
    async fn insert_service_record(&self, record: QDataRecord) -> Result<bool>;

    /// Serial numbers on more than one row, most rows first
    async fn serial_duplicates(&self) -> Result<Vec<SerialDuplicate>>;

    /// Keep only the latest stored row of each serial number; returns rows removed
    async fn remove_serial_duplicates(&self) -> Result<usize>;
}

/// Model → chipset table
#[async_trait]
pub trait ChipsetStore: Checkpoint {
    async fn chipset_for_model(&self, model_name: &str) -> Result<Option<String>>;

    /// Returns `true` when the model had no mapping yet
    async fn upsert_mapping(&self, model_name: &str, chipset: &str) -> Result<bool>;

    /// Returns mappings touched
    async fn rename_mapping_chipset(&self, from: &str, to: &str) -> Result<usize>;

    async fn mappings(&self) -> Result<Vec<ChipsetMapping>>;
}

/// App → keywords table
#[async_trait]
pub trait AppKeywordStore: Checkpoint {
    async fn rules(&self) -> Result<Vec<AppKeywordRule>>;

    async fn replace_rules(&self, rules: Vec<AppKeywordRule>) -> Result<()>;
}
