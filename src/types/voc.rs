//! VOC case types

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Raw per-row field bag, read by column position
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFields {
    pub case_code: Option<String>,
    pub title: Option<String>,
    pub problem: Option<String>,
    pub reproduction: Option<String>,
    pub resolver: Option<String>,
    pub resolve_option: Option<String>,
    pub cause: Option<String>,
    pub solution: Option<String>,
}

/// Where a reported issue originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Internal,
    External,
}

/// Fully normalized, upsert-ready VOC case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord {
    pub case_code: String,
    pub title: Option<String>,
    pub model_name: Option<String>,
    pub model_no: Option<String>,
    pub chipset: Option<String>,
    pub build_version: Option<String>,
    pub os_version: Option<String>,
    pub issue_type: IssueType,
    pub problem: Option<String>,
    pub original_content: Option<String>,
    pub reproduction_path: Option<String>,
    pub resolver: Option<String>,
    pub resolve_option: Option<String>,
    pub cause: Option<String>,
    pub solution: Option<String>,
    pub third_party_app: Option<String>,
    pub created_date: Option<NaiveDate>,
}

/// A canonical record as kept by a repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    #[serde(flatten)]
    pub record: CanonicalRecord,
    pub uploaded_date: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_type_serializes_snake_case() {
        let json = serde_json::to_string(&IssueType::External).unwrap();
        assert_eq!(json, "\"external\"");
    }

    #[test]
    fn test_canonical_record_serializes_camel_case() {
        let record = CanonicalRecord {
            case_code: "P240115-001".to_string(),
            title: None,
            model_name: Some("SM-S921N".to_string()),
            model_no: None,
            chipset: None,
            build_version: None,
            os_version: None,
            issue_type: IssueType::Internal,
            problem: None,
            original_content: None,
            reproduction_path: None,
            resolver: None,
            resolve_option: None,
            cause: None,
            solution: None,
            third_party_app: None,
            created_date: NaiveDate::from_ymd_opt(2024, 1, 15),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("caseCode"));
        assert!(json.contains("\"createdDate\":\"2024-01-15\""));
    }
}
