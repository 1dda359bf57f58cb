//! Static model alias table
//!
//! Device codes that belong to one product line are reported under a
//! single label. Lookup is exact and case-insensitive; anything else
//! passes through untouched.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Canonical label → raw tokens (upper case)
const MODEL_ALIAS_GROUPS: &[(&str, &[&str])] = &[
    ("워치울", &["SM-L705N", "SM-L705"]),
    ("워치7", &["SM-L310N", "SM-L310", "SM-L305N", "WATCH7"]),
    ("워치4", &["SM-R890", "SM-R870"]),
    ("워치6", &["SM-R935N", "SM-R960", "SM-R950", "SM-R940", "WATCH6"]),
];

static ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    MODEL_ALIAS_GROUPS
        .iter()
        .flat_map(|(canonical, tokens)| tokens.iter().map(move |token| (*token, *canonical)))
        .collect()
});

pub fn normalize_model(raw: &str) -> String {
    match ALIASES.get(raw.to_uppercase().as_str()) {
        Some(canonical) => canonical.to_string(),
        None => raw.to_string(),
    }
}
