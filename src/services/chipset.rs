//! Chipset name normalization, merging and lookup
//!
//! Chipset names arrive with inconsistent casing, spacing and punctuation.
//! `normalize_key` folds those away so near-duplicates can be grouped, and
//! `merge` picks one representative per group. Short vendor codes
//! (`SM...`, `JDM T618`) are kept verbatim and never grouped with anything.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::db::ChipsetStore;
use crate::defaults::{CHIPSET_LITERAL_EXCEPTION, CHIPSET_PREFIX_EXCEPTION};

// =============================================================================
// NORMALIZATION
// =============================================================================

/// Whether a name bypasses normalization and merging
pub fn is_exempt(chipset: &str) -> bool {
    let trimmed = chipset.trim();
    trimmed.eq_ignore_ascii_case(CHIPSET_LITERAL_EXCEPTION)
        || trimmed.to_uppercase().starts_with(CHIPSET_PREFIX_EXCEPTION)
}

/// Comparison key of a chipset name
pub fn normalize_key(chipset: &str) -> String {
    let trimmed = chipset.trim();
    if trimmed == CHIPSET_LITERAL_EXCEPTION || trimmed.to_uppercase().starts_with(CHIPSET_PREFIX_EXCEPTION) {
        return trimmed.to_lowercase();
    }
    chipset
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Share of the longer string's distinct characters also found in the shorter one
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let (longer, shorter) = if a.chars().count() >= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let longer_set: std::collections::HashSet<char> = longer.chars().collect();
    let shorter_set: std::collections::HashSet<char> = shorter.chars().collect();
    let common = longer_set.intersection(&shorter_set).count();
    common as f64 / longer_set.len() as f64
}

/// First candidate that matches `chipset` by key, key containment or similarity
pub fn find_similar<'c>(chipset: &str, candidates: &[&'c str], threshold: f64) -> Option<&'c str> {
    let key = normalize_key(chipset);
    if key.is_empty() {
        return None;
    }
    candidates.iter().copied().find(|candidate| {
        let other = normalize_key(candidate);
        if other.is_empty() {
            return false;
        }
        key == other
            || key.contains(other.as_str())
            || other.contains(key.as_str())
            || similarity(&key, &other) >= threshold
    })
}

// =============================================================================
// MERGE
// =============================================================================

/// How near-duplicate chipset names are grouped
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MergeMode {
    /// Same normalized key only
    Exact,
    /// Also key containment and character overlap at or above `threshold`
    Similar { threshold: f64 },
}

#[derive(Debug, Hash, PartialEq, Eq)]
enum GroupKey {
    Exempt(String),
    Normalized(String),
}

impl MergeMode {
    /// Map every distinct input name to its group representative
    pub fn merge<S: AsRef<str>>(&self, names: impl IntoIterator<Item = S>) -> BTreeMap<String, String> {
        let mut distinct: Vec<String> = Vec::new();
        for name in names {
            let name = name.as_ref();
            if !distinct.iter().any(|n| n == name) {
                distinct.push(name.to_string());
            }
        }

        let groups = match self {
            MergeMode::Exact => group_exact(distinct),
            MergeMode::Similar { threshold } => group_similar(distinct, *threshold),
        };

        let mut merged = BTreeMap::new();
        for group in groups {
            let representative = representative(&group).to_string();
            if group.len() > 1 {
                debug!(representative = %representative, members = ?group, "Merging chipset names");
            }
            for member in group {
                merged.insert(member, representative.clone());
            }
        }
        merged
    }
}

/// Exact-key merge
pub fn merge<S: AsRef<str>>(names: impl IntoIterator<Item = S>) -> BTreeMap<String, String> {
    MergeMode::Exact.merge(names)
}

fn group_exact(names: Vec<String>) -> Vec<Vec<String>> {
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<Vec<String>> = Vec::new();
    for name in names {
        let key = if is_exempt(&name) {
            GroupKey::Exempt(name.clone())
        } else {
            GroupKey::Normalized(normalize_key(&name))
        };
        match index.get(&key) {
            Some(&i) => groups[i].push(name),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![name]);
            }
        }
    }
    groups
}

fn group_similar(names: Vec<String>, threshold: f64) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    // Index of the mergeable groups, by their first member
    let mut seeds: Vec<(usize, String)> = Vec::new();
    for name in names {
        if is_exempt(&name) {
            groups.push(vec![name]);
            continue;
        }
        let candidates: Vec<&str> = seeds.iter().map(|(_, seed)| seed.as_str()).collect();
        let found = find_similar(&name, &candidates, threshold)
            .and_then(|hit| seeds.iter().find(|(_, seed)| seed == hit))
            .map(|(i, _)| *i);
        match found {
            Some(i) => groups[i].push(name),
            None => {
                seeds.push((groups.len(), name.clone()));
                groups.push(vec![name]);
            }
        }
    }
    groups
}

/// Longest member; the earliest one wins ties
fn representative(group: &[String]) -> &str {
    let mut best = group[0].as_str();
    for name in &group[1..] {
        if name.chars().count() > best.chars().count() {
            best = name;
        }
    }
    best
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Model → chipset lookup with a per-batch cache
pub struct ChipsetResolver {
    store: Arc<dyn ChipsetStore>,
    cache: Mutex<HashMap<String, Option<String>>>,
}

impl ChipsetResolver {
    pub fn new(store: Arc<dyn ChipsetStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn chipset_for(&self, model: &str) -> anyhow::Result<Option<String>> {
        let cached = self.cache.lock().get(model).cloned();
        if let Some(hit) = cached {
            return Ok(hit);
        }
        let chipset = self.store.chipset_for_model(model).await?;
        self.cache.lock().insert(model.to_string(), chipset.clone());
        Ok(chipset)
    }
}
