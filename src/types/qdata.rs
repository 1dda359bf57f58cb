//! Q-data service log types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One service-log row after positional renaming.
///
/// Unique per `(serial_number, log_id)` when a log id is present. Rows
/// without one never collide, so repeated visits of a device all stay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QDataRecord {
    pub service_date: NaiveDate,
    pub process_type: Option<String>,
    pub repair_name: Option<String>,
    pub repair_detail: Option<String>,
    pub detail_content: Option<String>,
    pub model_name: String,
    pub serial_number: String,
    pub log_id: Option<String>,
    pub sw_before: Option<String>,
    pub sw_after: Option<String>,
}

impl QDataRecord {
    /// Dedupe key; `None` for rows without a log id
    pub fn key(&self) -> Option<(&str, &str)> {
        self.log_id
            .as_deref()
            .map(|log_id| (self.serial_number.as_str(), log_id))
    }
}

/// Serial number stored on more than one service row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerialDuplicate {
    pub serial_number: String,
    pub count: usize,
}
