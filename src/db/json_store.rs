//! File-backed repository
//!
//! Everything lives in memory behind one lock and is written to a single
//! JSON document on `checkpoint()`. Writes go to a sibling temp file first
//! and are renamed into place.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    AppKeywordStore, Checkpoint, ChipsetStore, ServiceLogRepository, UpsertOutcome, VocRepository,
};
use crate::types::{
    AppKeywordRule, CanonicalRecord, ChipsetMapping, QDataRecord, SerialDuplicate, StoredRecord,
    UnmappedModel,
};

type ServiceKey = (String, String);

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreData {
    #[serde(default)]
    records: BTreeMap<String, StoredRecord>,
    #[serde(default)]
    service_logs: Vec<QDataRecord>,
    #[serde(default)]
    chipset_mappings: BTreeMap<String, String>,
    #[serde(default)]
    app_keywords: Vec<AppKeywordRule>,
    #[serde(skip)]
    service_keys: HashSet<ServiceKey>,
}

impl StoreData {
    fn index_service_logs(&mut self) {
        self.service_keys = self
            .service_logs
            .iter()
            .filter_map(|r| r.key())
            .map(|(serial_number, log_id)| (serial_number.to_string(), log_id.to_string()))
            .collect();
    }
}

pub struct JsonFileStore {
    path: Option<PathBuf>,
    data: RwLock<StoreData>,
}

impl JsonFileStore {
    /// Open the store at `path`, starting empty when the file does not exist
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut data = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read store file {}", path.display()))?;
            serde_json::from_str::<StoreData>(&content)
                .with_context(|| format!("Failed to parse store file {}", path.display()))?
        } else {
            StoreData::default()
        };
        data.index_service_logs();

        info!(
            path = %path.display(),
            records = data.records.len(),
            service_logs = data.service_logs.len(),
            chipset_mappings = data.chipset_mappings.len(),
            "Opened VOC store"
        );
        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// Store that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(StoreData::default()),
        }
    }
}

#[async_trait]
impl Checkpoint for JsonFileStore {
    async fn checkpoint(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = {
            let data = self.data.read();
            serde_json::to_string_pretty(&*data).context("Failed to serialize store")?
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create store directory {}", dir.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        debug!(path = %path.display(), "Store checkpoint written");
        Ok(())
    }
}

#[async_trait]
impl VocRepository for JsonFileStore {
    async fn upsert_record(&self, record: CanonicalRecord) -> Result<UpsertOutcome> {
        let mut data = self.data.write();
        let now = Utc::now();
        match data.records.get_mut(&record.case_code) {
            Some(existing) => {
                existing.record.model_name = record.model_name;
                existing.record.chipset = record.chipset;
                existing.record.cause = record.cause;
                existing.record.solution = record.solution;
                existing.uploaded_date = now;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                data.records.insert(
                    record.case_code.clone(),
                    StoredRecord {
                        record,
                        uploaded_date: now,
                    },
                );
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn record(&self, case_code: &str) -> Result<Option<StoredRecord>> {
        Ok(self.data.read().records.get(case_code).cloned())
    }

    async fn records(&self) -> Result<Vec<StoredRecord>> {
        Ok(self.data.read().records.values().cloned().collect())
    }

    async fn set_model_name(&self, case_code: &str, model_name: &str) -> Result<bool> {
        let mut data = self.data.write();
        match data.records.get_mut(case_code) {
            Some(stored) => {
                stored.record.model_name = Some(model_name.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn assign_chipset(&self, model_name: &str, chipset: &str) -> Result<usize> {
        let mut data = self.data.write();
        let mut touched = 0;
        for stored in data.records.values_mut() {
            if stored.record.model_name.as_deref() == Some(model_name) {
                stored.record.chipset = Some(chipset.to_string());
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn rename_record_chipset(&self, from: &str, to: &str) -> Result<usize> {
        let mut data = self.data.write();
        let mut touched = 0;
        for stored in data.records.values_mut() {
            if stored.record.chipset.as_deref() == Some(from) {
                stored.record.chipset = Some(to.to_string());
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn distinct_chipsets(&self) -> Result<Vec<String>> {
        let data = self.data.read();
        let mut chipsets: Vec<String> = data
            .records
            .values()
            .filter_map(|s| s.record.chipset.as_deref())
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        chipsets.sort();
        Ok(chipsets)
    }

    async fn unmapped_models(&self) -> Result<Vec<UnmappedModel>> {
        let data = self.data.read();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for stored in data.records.values() {
            let chipset_missing = stored.record.chipset.as_deref().map_or(true, str::is_empty);
            match stored.record.model_name.as_deref() {
                Some(model) if !model.is_empty() && chipset_missing => {
                    *counts.entry(model).or_default() += 1;
                }
                _ => {}
            }
        }
        let mut models: Vec<UnmappedModel> = counts
            .into_iter()
            .map(|(model_name, count)| UnmappedModel {
                model_name: model_name.to_string(),
                count,
            })
            .collect();
        models.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.model_name.cmp(&b.model_name)));
        Ok(models)
    }
}

#[async_trait]
impl ServiceLogRepository for JsonFileStore {
    async fn insert_service_record(&self, record: QDataRecord) -> Result<bool> {
        let mut data = self.data.write();
        if let Some((serial_number, log_id)) = record.key() {
            let key = (serial_number.to_string(), log_id.to_string());
            if !data.service_keys.insert(key) {
                return Ok(false);
            }
        }
        data.service_logs.push(record);
        Ok(true)
    }

    async fn serial_duplicates(&self) -> Result<Vec<SerialDuplicate>> {
        let data = self.data.read();
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for record in &data.service_logs {
            *counts.entry(record.serial_number.as_str()).or_default() += 1;
        }
        let mut duplicates: Vec<SerialDuplicate> = counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(serial_number, count)| SerialDuplicate {
                serial_number: serial_number.to_string(),
                count,
            })
            .collect();
        duplicates.sort_by(|a, b| b.count.cmp(&a.count));
        Ok(duplicates)
    }

    async fn remove_serial_duplicates(&self) -> Result<usize> {
        let mut data = self.data.write();
        let before = data.service_logs.len();

        // Rows are kept in insertion order, so the last one per serial is the latest
        let mut seen: HashSet<String> = HashSet::new();
        let mut kept: Vec<QDataRecord> = Vec::with_capacity(before);
        for record in data.service_logs.drain(..).rev() {
            if seen.insert(record.serial_number.clone()) {
                kept.push(record);
            }
        }
        kept.reverse();
        data.service_logs = kept;
        data.index_service_logs();

        Ok(before - data.service_logs.len())
    }
}

#[async_trait]
impl ChipsetStore for JsonFileStore {
    async fn chipset_for_model(&self, model_name: &str) -> Result<Option<String>> {
        Ok(self.data.read().chipset_mappings.get(model_name).cloned())
    }

    async fn upsert_mapping(&self, model_name: &str, chipset: &str) -> Result<bool> {
        let previous = self
            .data
            .write()
            .chipset_mappings
            .insert(model_name.to_string(), chipset.to_string());
        Ok(previous.is_none())
    }

    async fn rename_mapping_chipset(&self, from: &str, to: &str) -> Result<usize> {
        let mut data = self.data.write();
        let mut touched = 0;
        for chipset in data.chipset_mappings.values_mut() {
            if chipset == from {
                *chipset = to.to_string();
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn mappings(&self) -> Result<Vec<ChipsetMapping>> {
        Ok(self
            .data
            .read()
            .chipset_mappings
            .iter()
            .map(|(model_name, chipset)| ChipsetMapping {
                model_name: model_name.clone(),
                chipset: chipset.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl AppKeywordStore for JsonFileStore {
    async fn rules(&self) -> Result<Vec<AppKeywordRule>> {
        Ok(self.data.read().app_keywords.clone())
    }

    async fn replace_rules(&self, rules: Vec<AppKeywordRule>) -> Result<()> {
        self.data.write().app_keywords = rules;
        Ok(())
    }
}
