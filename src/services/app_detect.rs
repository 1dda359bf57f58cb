//! Third-party app detection by keyword

use std::sync::Arc;

use crate::db::AppKeywordStore;
use crate::types::AppKeywordRule;

/// Keyword rules loaded once per batch, matched case-insensitively
pub struct AppDetector {
    rules: Vec<(String, Vec<String>)>,
}

impl AppDetector {
    pub fn new(rules: Vec<AppKeywordRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let keywords = rule
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect();
                (rule.app_name, keywords)
            })
            .collect();
        Self { rules }
    }

    pub async fn load(store: &Arc<dyn AppKeywordStore>) -> anyhow::Result<Self> {
        Ok(Self::new(store.rules().await?))
    }

    /// Comma-joined app names in rule order, or `None` when nothing matches
    pub fn detect(&self, text: &str) -> Option<String> {
        if text.trim().is_empty() {
            return None;
        }
        let text = text.to_lowercase();
        let matched: Vec<&str> = self
            .rules
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| text.contains(k.as_str())))
            .map(|(app, _)| app.as_str())
            .collect();

        if matched.is_empty() {
            None
        } else {
            Some(matched.join(", "))
        }
    }
}
