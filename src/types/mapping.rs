//! Lookup table entries: model → chipset, app → keywords

use serde::{Deserialize, Serialize};

/// Canonical model name → canonical chipset name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChipsetMapping {
    pub model_name: String,
    pub chipset: String,
}

/// Third-party app and the keywords that reveal it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppKeywordRule {
    pub app_name: String,
    pub keywords: Vec<String>,
}

impl AppKeywordRule {
    /// Build a rule from a comma-separated keyword cell; blank keywords are dropped
    pub fn from_keyword_list(app_name: impl Into<String>, keywords: &str) -> Self {
        Self {
            app_name: app_name.into(),
            keywords: keywords
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

/// Model still waiting for a chipset mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmappedModel {
    pub model_name: String,
    pub count: usize,
}
