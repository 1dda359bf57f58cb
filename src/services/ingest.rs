//! Batch driver
//!
//! Decodes one document, runs its rows through extraction and normalization
//! in fixed-size chunks, and hands the results to the repositories. Row
//! failures are counted and reported; only an undecodable document or a
//! repository failure ends a batch early.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{
    AppKeywordStore, Checkpoint, ChipsetStore, ServiceLogRepository, UpsertOutcome, VocRepository,
};
use crate::defaults::{
    MAX_REPORTED_ROW_ERRORS, QDATA_POS_DETAIL_CONTENT, QDATA_POS_LOG_ID, QDATA_POS_MODEL_NAME,
    QDATA_POS_PROCESS_TYPE, QDATA_POS_REPAIR_DETAIL, QDATA_POS_REPAIR_NAME,
    QDATA_POS_SERIAL_NUMBER, QDATA_POS_SERVICE_DATE, QDATA_POS_SW_AFTER, QDATA_POS_SW_BEFORE,
};
use crate::error::{IngestError, RowError};
use crate::services::app_detect::AppDetector;
use crate::services::chipset::{ChipsetResolver, MergeMode};
use crate::services::decode::FormatDecoder;
use crate::services::extract::{watch_model, FieldExtractor};
use crate::services::model_map::normalize_model;
use crate::types::{
    push_limited, AppKeywordImportReport, AppKeywordRule, CellValue, ChipsetImportReport,
    ChipsetMapping, ChipsetRename, DecodeReport, DecodedRow, MergeReport, ModelRefreshReport,
    QDataDuplicateReport, QDataIngestReport, QDataRecord, RawDocument, UnmappedModel,
    VocIngestReport,
};

/// The repositories a batch reads from and writes to
#[derive(Clone)]
pub struct Repositories {
    pub records: Arc<dyn VocRepository>,
    pub service_logs: Arc<dyn ServiceLogRepository>,
    pub chipsets: Arc<dyn ChipsetStore>,
    pub app_keywords: Arc<dyn AppKeywordStore>,
}

impl Repositories {
    /// All four roles served by one store
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: VocRepository + ServiceLogRepository + ChipsetStore + AppKeywordStore + 'static,
    {
        Self {
            records: store.clone(),
            service_logs: store.clone(),
            chipsets: store.clone(),
            app_keywords: store,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    /// Rows between repository checkpoints
    pub chunk_size: usize,
}

pub struct IngestService {
    decoder: FormatDecoder,
    repos: Repositories,
    settings: IngestSettings,
}

impl IngestService {
    pub fn new(decoder: FormatDecoder, repos: Repositories, mut settings: IngestSettings) -> Self {
        settings.chunk_size = settings.chunk_size.max(1);
        Self {
            decoder,
            repos,
            settings,
        }
    }

    // =========================================================================
    // DOCUMENT BATCHES
    // =========================================================================

    /// Decode only, reporting which strategy won
    pub async fn decode(&self, document: &RawDocument) -> Result<DecodeReport, IngestError> {
        let outcome = self.decoder.decode(document).await?;
        Ok(DecodeReport {
            filename: document.filename.clone(),
            fingerprint: outcome.fingerprint,
            strategy: outcome.strategy,
            rows: outcome.table.len(),
            failed_attempts: outcome.attempts,
        })
    }

    /// General VOC sheet → canonical records, upserted by case code
    pub async fn ingest_voc(&self, document: &RawDocument) -> Result<VocIngestReport, IngestError> {
        let started = Instant::now();
        let outcome = self.decoder.decode(document).await?;

        let resolver = ChipsetResolver::new(self.repos.chipsets.clone());
        let apps = AppDetector::load(&self.repos.app_keywords).await?;
        let extractor = FieldExtractor::new(&resolver, &apps);

        let rows = outcome.table.into_rows();
        let total = rows.len();
        let mut report = VocIngestReport {
            run_id: Uuid::new_v4(),
            filename: document.filename.clone(),
            fingerprint: outcome.fingerprint,
            strategy: outcome.strategy,
            total_rows: total,
            ..Default::default()
        };
        let mut unmapped: BTreeSet<String> = BTreeSet::new();

        info!(run_id = %report.run_id, filename = %document.filename, rows = total, "Starting VOC ingest");

        for (chunk_idx, chunk) in rows.chunks(self.settings.chunk_size).enumerate() {
            let offset = chunk_idx * self.settings.chunk_size;
            info!("Processing rows {}-{}/{}", offset + 1, offset + chunk.len(), total);

            for (i, row) in chunk.iter().enumerate() {
                let row_no = offset + i + 1;
                let record = match extractor.extract(row, &document.filename).await {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        report.skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        let err = RowError::malformed(row_no, e);
                        warn!("{}", err);
                        report.failed += 1;
                        push_limited(&mut report.errors, MAX_REPORTED_ROW_ERRORS, err.to_string());
                        continue;
                    }
                };

                if record.chipset.is_none() {
                    if let Some(model) = &record.model_name {
                        unmapped.insert(model.clone());
                    }
                }

                match self.repos.records.upsert_record(record).await {
                    Ok(UpsertOutcome::Inserted) => {
                        report.succeeded += 1;
                        report.inserted += 1;
                    }
                    Ok(UpsertOutcome::Updated) => {
                        report.succeeded += 1;
                        report.updated += 1;
                    }
                    Err(e) => {
                        let err = RowError::malformed(row_no, e);
                        warn!("{}", err);
                        report.failed += 1;
                        push_limited(&mut report.errors, MAX_REPORTED_ROW_ERRORS, err.to_string());
                    }
                }
            }

            self.repos.records.checkpoint().await?;
        }
        self.repos.records.checkpoint().await?;

        report.unmapped_models = unmapped.into_iter().collect();
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            run_id = %report.run_id,
            succeeded = report.succeeded,
            inserted = report.inserted,
            updated = report.updated,
            failed = report.failed,
            skipped = report.skipped,
            unmapped = report.unmapped_models.len(),
            "VOC ingest complete"
        );
        Ok(report)
    }

    /// Q-data service log → service records, deduplicated on serial and log id
    /// (rows without a log id are always stored)
    pub async fn ingest_qdata(&self, document: &RawDocument) -> Result<QDataIngestReport, IngestError> {
        let started = Instant::now();
        let outcome = self.decoder.decode(document).await?;

        let rows = outcome.table.into_rows();
        let total = rows.len();
        let mut report = QDataIngestReport {
            run_id: Uuid::new_v4(),
            filename: document.filename.clone(),
            fingerprint: outcome.fingerprint,
            strategy: outcome.strategy,
            total_rows: total,
            ..Default::default()
        };

        info!(run_id = %report.run_id, filename = %document.filename, rows = total, "Starting Q-data ingest");

        for (chunk_idx, chunk) in rows.chunks(self.settings.chunk_size).enumerate() {
            let offset = chunk_idx * self.settings.chunk_size;
            for (i, row) in chunk.iter().enumerate() {
                let row_no = offset + i + 1;
                let record = match service_record(row) {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        report.skipped += 1;
                        continue;
                    }
                    Err(message) => {
                        let err = RowError::malformed(row_no, message);
                        warn!("{}", err);
                        report.failed += 1;
                        push_limited(&mut report.errors, MAX_REPORTED_ROW_ERRORS, err.to_string());
                        continue;
                    }
                };

                match self.repos.service_logs.insert_service_record(record).await {
                    Ok(true) => report.inserted += 1,
                    Ok(false) => report.duplicates += 1,
                    Err(e) => {
                        let err = RowError::malformed(row_no, e);
                        warn!("{}", err);
                        report.failed += 1;
                        push_limited(&mut report.errors, MAX_REPORTED_ROW_ERRORS, err.to_string());
                    }
                }
            }
            self.repos.service_logs.checkpoint().await?;
            debug!("Q-data rows {}-{}/{} stored", offset + 1, offset + chunk.len(), total);
        }
        self.repos.service_logs.checkpoint().await?;

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            run_id = %report.run_id,
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped,
            failed = report.failed,
            "Q-data ingest complete"
        );
        Ok(report)
    }

    /// Mapping sheet (model, chipset) → merged chipset names → mappings and records
    pub async fn import_chipsets(
        &self,
        document: &RawDocument,
        mode: MergeMode,
    ) -> Result<ChipsetImportReport, IngestError> {
        let outcome = self.decoder.decode(document).await?;
        let mut report = ChipsetImportReport::default();

        let mut pairs: Vec<(String, String)> = Vec::new();
        for row in outcome.table.rows() {
            match (trimmed(row, 0), trimmed(row, 1)) {
                (Some(model), Some(chipset)) => pairs.push((model, chipset)),
                _ => report.skipped += 1,
            }
        }

        let merged = mode.merge(pairs.iter().map(|(_, chipset)| chipset.as_str()));
        for (from, to) in &merged {
            if from != to {
                info!("Chipset name merged: {} -> {}", from, to);
                report.renames.push(ChipsetRename {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
        }

        for (model, chipset) in &pairs {
            let chipset = merged.get(chipset).unwrap_or(chipset);
            if self.repos.chipsets.upsert_mapping(model, chipset).await? {
                report.registered += 1;
            } else {
                report.updated += 1;
            }
            report.records_updated += self.repos.records.assign_chipset(model, chipset).await?;
            debug!("Chipset mapping: {} -> {}", model, chipset);
        }

        self.repos.chipsets.checkpoint().await?;
        self.repos.records.checkpoint().await?;
        info!(
            registered = report.registered,
            updated = report.updated,
            renames = report.renames.len(),
            records_updated = report.records_updated,
            "Chipset mapping import complete"
        );
        Ok(report)
    }

    /// Keyword sheet (app name, comma-separated keywords); replaces all rules
    pub async fn import_app_keywords(
        &self,
        document: &RawDocument,
    ) -> Result<AppKeywordImportReport, IngestError> {
        let outcome = self.decoder.decode(document).await?;
        let mut report = AppKeywordImportReport::default();

        let mut rules = Vec::new();
        for row in outcome.table.rows() {
            let rule = match (trimmed(row, 0), trimmed(row, 1)) {
                (Some(app), Some(keywords)) => AppKeywordRule::from_keyword_list(app, &keywords),
                _ => {
                    report.skipped += 1;
                    continue;
                }
            };
            if rule.keywords.is_empty() {
                report.skipped += 1;
                continue;
            }
            report.keywords += rule.keywords.len();
            rules.push(rule);
        }
        report.rules = rules.len();

        self.repos.app_keywords.replace_rules(rules).await?;
        self.repos.app_keywords.checkpoint().await?;
        info!(rules = report.rules, keywords = report.keywords, "App keyword rules replaced");
        Ok(report)
    }

    // =========================================================================
    // STORE MAINTENANCE
    // =========================================================================

    /// Add or replace one model's chipset and apply it to that model's records
    pub async fn add_chipset(&self, model: &str, chipset: &str) -> anyhow::Result<ChipsetImportReport> {
        let (model, chipset) = (model.trim(), chipset.trim());
        if model.is_empty() || chipset.is_empty() {
            bail!("Both a model name and a chipset name are required");
        }

        let mut report = ChipsetImportReport::default();
        if self.repos.chipsets.upsert_mapping(model, chipset).await? {
            report.registered = 1;
        } else {
            report.updated = 1;
        }
        report.records_updated = self.repos.records.assign_chipset(model, chipset).await?;

        self.repos.chipsets.checkpoint().await?;
        self.repos.records.checkpoint().await?;
        info!(model, chipset, records_updated = report.records_updated, "Chipset mapping saved");
        Ok(report)
    }

    /// Merge near-duplicate chipset names already in the store
    pub async fn merge_chipsets(&self, mode: MergeMode) -> anyhow::Result<MergeReport> {
        let chipsets = self.repos.records.distinct_chipsets().await?;
        let merged = mode.merge(&chipsets);

        let mut report = MergeReport::default();
        for (from, to) in &merged {
            if from == to {
                continue;
            }
            report.records_updated += self.repos.records.rename_record_chipset(from, to).await?;
            report.mappings_updated += self.repos.chipsets.rename_mapping_chipset(from, to).await?;
            info!("Chipset name merged: {} -> {}", from, to);
            report.renames.push(ChipsetRename {
                from: from.clone(),
                to: to.clone(),
            });
        }

        self.repos.records.checkpoint().await?;
        self.repos.chipsets.checkpoint().await?;
        info!(
            renames = report.renames.len(),
            records_updated = report.records_updated,
            "Chipset merge complete"
        );
        Ok(report)
    }

    pub async fn rename_chipset(&self, from: &str, to: &str) -> anyhow::Result<MergeReport> {
        let (from, to) = (from.trim(), to.trim());
        if from.is_empty() || to.is_empty() {
            bail!("Both the current and the new chipset name are required");
        }
        if from == to {
            bail!("The new chipset name is the same as the current one");
        }

        let report = MergeReport {
            records_updated: self.repos.records.rename_record_chipset(from, to).await?,
            mappings_updated: self.repos.chipsets.rename_mapping_chipset(from, to).await?,
            renames: vec![ChipsetRename {
                from: from.to_string(),
                to: to.to_string(),
            }],
        };

        self.repos.records.checkpoint().await?;
        self.repos.chipsets.checkpoint().await?;
        info!(
            from,
            to,
            records_updated = report.records_updated,
            mappings_updated = report.mappings_updated,
            "Chipset renamed"
        );
        Ok(report)
    }

    /// Re-apply watch detection and the model alias table to stored records
    pub async fn refresh_models(&self) -> anyhow::Result<ModelRefreshReport> {
        let records = self.repos.records.records().await?;
        let mut report = ModelRefreshReport {
            scanned: records.len(),
            ..Default::default()
        };

        for stored in &records {
            let current = stored.record.model_name.as_deref();
            let candidate = watch_model(stored.record.title.as_deref()).or_else(|| current.map(str::to_string));
            let Some(candidate) = candidate else {
                continue;
            };
            let refreshed = normalize_model(&candidate);
            if current != Some(refreshed.as_str()) {
                self.repos
                    .records
                    .set_model_name(&stored.record.case_code, &refreshed)
                    .await?;
                debug!("Model name updated: {:?} -> {}", current, refreshed);
                report.updated += 1;
            }
        }

        self.repos.records.checkpoint().await?;
        info!(scanned = report.scanned, updated = report.updated, "Model names refreshed");
        Ok(report)
    }

    pub async fn unmapped_models(&self) -> anyhow::Result<Vec<UnmappedModel>> {
        self.repos.records.unmapped_models().await
    }

    pub async fn chipset_mappings(&self) -> anyhow::Result<Vec<ChipsetMapping>> {
        self.repos.chipsets.mappings().await
    }

    /// Serial numbers stored more than once; with `remove`, only the latest
    /// row of each is kept
    pub async fn qdata_duplicates(&self, remove: bool) -> anyhow::Result<QDataDuplicateReport> {
        let duplicates = self.repos.service_logs.serial_duplicates().await?;
        let mut report = QDataDuplicateReport {
            has_duplicates: !duplicates.is_empty(),
            duplicate_count: duplicates.len(),
            duplicates,
            removed: 0,
        };

        if remove && report.has_duplicates {
            report.removed = self.repos.service_logs.remove_serial_duplicates().await?;
            self.repos.service_logs.checkpoint().await?;
            info!(
                serials = report.duplicate_count,
                removed = report.removed,
                "Q-data duplicates removed"
            );
        } else {
            debug!(serials = report.duplicate_count, "Q-data duplicates checked");
        }
        Ok(report)
    }
}

// =============================================================================
// ROW HELPERS
// =============================================================================

fn trimmed(row: &DecodedRow, pos: usize) -> Option<String> {
    row.text(pos)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `YYMMDD` as a number or text → 20YY-MM-DD
pub fn parse_service_date(cell: &CellValue) -> Option<NaiveDate> {
    let text = cell.as_text()?;
    let text = text.trim();
    let value = text
        .parse::<u64>()
        .ok()
        .or_else(|| {
            text.parse::<f64>()
                .ok()
                .filter(|f| f.is_finite() && *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as u64)
        })?;
    if value > 999_999 {
        return None;
    }
    let digits = format!("{:06}", value);
    let year: i32 = digits[0..2].parse().ok()?;
    let month: u32 = digits[2..4].parse().ok()?;
    let day: u32 = digits[4..6].parse().ok()?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
}

/// `Ok(None)` for a blank serial number
fn service_record(row: &DecodedRow) -> Result<Option<QDataRecord>, String> {
    let Some(serial_number) = trimmed(row, QDATA_POS_SERIAL_NUMBER) else {
        return Ok(None);
    };
    let raw_date = row.cell(QDATA_POS_SERVICE_DATE);
    let service_date = parse_service_date(raw_date)
        .ok_or_else(|| format!("invalid service date {:?}", raw_date.as_text().unwrap_or_default()))?;
    let model_name = trimmed(row, QDATA_POS_MODEL_NAME).ok_or_else(|| "missing model name".to_string())?;

    Ok(Some(QDataRecord {
        service_date,
        process_type: row.text(QDATA_POS_PROCESS_TYPE),
        repair_name: row.text(QDATA_POS_REPAIR_NAME),
        repair_detail: row.text(QDATA_POS_REPAIR_DETAIL),
        detail_content: row.text(QDATA_POS_DETAIL_CONTENT),
        model_name,
        serial_number,
        log_id: trimmed(row, QDATA_POS_LOG_ID),
        sw_before: row.text(QDATA_POS_SW_BEFORE),
        sw_after: row.text(QDATA_POS_SW_AFTER),
    }))
}
