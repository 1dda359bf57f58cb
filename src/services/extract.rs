//! Field extraction for general VOC rows
//!
//! Cells are read by position. The reproduction text carries bracket-tagged
//! sections (`[Model No.]`, `[Build No.]`, `[OS Ver.]`, `[Original Contents]`)
//! which are pulled out with case-insensitive patterns. Every helper here is
//! total: blank or malformed input yields `None`, never an error.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::defaults::{
    EXTERNAL_ISSUE_KEYWORDS, VOC_COL_CASE_CODE, VOC_COL_CAUSE, VOC_COL_PROBLEM,
    VOC_COL_REPRODUCTION, VOC_COL_RESOLVER, VOC_COL_RESOLVE_OPTION, VOC_COL_SOLUTION,
    VOC_COL_TITLE,
};
use crate::services::app_detect::AppDetector;
use crate::services::chipset::ChipsetResolver;
use crate::services::model_map::normalize_model;
use crate::types::{CanonicalRecord, DecodedRow, ExtractedFields, IssueType};

static WATCH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)watch\d*").unwrap());
static WATCH_KO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"워치\d*").unwrap());
static SM_TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)SM-[A-Z0-9]{4,5}").unwrap());

static MODEL_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[Model No\.\]\s*([^\[\n]+)").unwrap());
static BUILD_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[Build No\.\]\s*([^\[\n]+)").unwrap());
static OS_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\[OS Ver\.\]\s*([^\[\n]+)").unwrap());
// Runs across newlines up to the next tag
static ORIGINAL_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[Original Contents\]\s*([^\[]+)").unwrap());

static CASE_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"P(\d{6})").unwrap());
static FILE_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{8})").unwrap());

// =============================================================================
// ROW ACCESS
// =============================================================================

/// Read the VOC columns of one row
pub fn extract_fields(row: &DecodedRow) -> ExtractedFields {
    ExtractedFields {
        case_code: row.text(VOC_COL_CASE_CODE),
        title: row.text(VOC_COL_TITLE),
        problem: row.text(VOC_COL_PROBLEM),
        reproduction: row.text(VOC_COL_REPRODUCTION),
        resolver: row.text(VOC_COL_RESOLVER),
        resolve_option: row.text(VOC_COL_RESOLVE_OPTION),
        cause: row.text(VOC_COL_CAUSE),
        solution: row.text(VOC_COL_SOLUTION),
    }
}

// =============================================================================
// TEXT PATTERNS
// =============================================================================

fn tagged_section(re: &Regex, text: Option<&str>) -> Option<String> {
    let captured = re.captures(text?)?.get(1)?.as_str().trim();
    if captured.is_empty() {
        None
    } else {
        Some(captured.to_string())
    }
}

/// `WATCH5`, `워치4`, or the bare word when no digits follow
pub fn watch_model(title: Option<&str>) -> Option<String> {
    let title = title?;
    WATCH_RE
        .find(title)
        .or_else(|| WATCH_KO_RE.find(title))
        .map(|m| m.as_str().to_uppercase())
}

/// First `SM-XXXX[X]` token of the title
pub fn model_from_title(title: Option<&str>) -> Option<String> {
    SM_TOKEN_RE.find(title?).map(|m| m.as_str().to_uppercase())
}

/// `[Model No.]` section; reduced to its SM token when it holds one
pub fn model_from_reproduction(text: Option<&str>) -> Option<String> {
    let section = tagged_section(&MODEL_TAG_RE, text)?;
    match SM_TOKEN_RE.find(&section) {
        Some(token) => Some(token.as_str().to_uppercase()),
        None => Some(section),
    }
}

/// Last three characters of the `[Build No.]` section
pub fn build_version(text: Option<&str>) -> Option<String> {
    let section = tagged_section(&BUILD_TAG_RE, text)?;
    let count = section.chars().count();
    Some(section.chars().skip(count.saturating_sub(3)).collect())
}

pub fn os_version(text: Option<&str>) -> Option<String> {
    tagged_section(&OS_TAG_RE, text)
}

pub fn original_content(text: Option<&str>) -> Option<String> {
    tagged_section(&ORIGINAL_TAG_RE, text)
}

pub fn issue_type(problem: Option<&str>, reproduction: Option<&str>) -> IssueType {
    let text = format!("{} {}", problem.unwrap_or_default(), reproduction.unwrap_or_default())
        .to_lowercase();
    if EXTERNAL_ISSUE_KEYWORDS.iter().any(|k| text.contains(k)) {
        IssueType::External
    } else {
        IssueType::Internal
    }
}

/// `P` + YYMMDD in the case code, else a YYYYMMDD run in the upload filename
pub fn created_date(case_code: &str, filename: &str) -> Option<NaiveDate> {
    let from_case = case_code
        .starts_with('P')
        .then(|| CASE_DATE_RE.captures(case_code))
        .flatten()
        .and_then(|caps| NaiveDate::parse_from_str(&caps[1], "%y%m%d").ok());

    from_case.or_else(|| {
        let caps = FILE_DATE_RE.captures(filename)?;
        NaiveDate::parse_from_str(&caps[1], "%Y%m%d").ok()
    })
}

/// Model name by priority: watch token, `[Model No.]` tag, title SM token.
///
/// Returns `(model_name, model_no)`; `model_no` is only kept for non-watch devices.
pub fn select_model(fields: &ExtractedFields) -> (Option<String>, Option<String>) {
    let title = fields.title.as_deref();
    if let Some(watch) = watch_model(title) {
        return (Some(normalize_model(&watch)), None);
    }
    let model_no = model_from_reproduction(fields.reproduction.as_deref());
    let model_name = model_no
        .clone()
        .or_else(|| model_from_title(title))
        .map(|m| normalize_model(&m));
    (model_name, model_no)
}

// =============================================================================
// EXTRACTOR
// =============================================================================

/// Turns decoded rows into canonical records using the lookup tables
pub struct FieldExtractor<'a> {
    chipsets: &'a ChipsetResolver,
    apps: &'a AppDetector,
}

impl<'a> FieldExtractor<'a> {
    pub fn new(chipsets: &'a ChipsetResolver, apps: &'a AppDetector) -> Self {
        Self { chipsets, apps }
    }

    /// `Ok(None)` when the row has no case code
    pub async fn extract(
        &self,
        row: &DecodedRow,
        filename: &str,
    ) -> anyhow::Result<Option<CanonicalRecord>> {
        let fields = extract_fields(row);
        let case_code = match fields.case_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => code.to_string(),
            _ => return Ok(None),
        };

        let (model_name, model_no) = select_model(&fields);
        let chipset = match &model_name {
            Some(model) => self.chipsets.chipset_for(model).await?,
            None => None,
        };

        let reproduction = fields.reproduction.as_deref();
        let original = original_content(reproduction);
        let search_text = format!(
            "{} {}",
            fields.problem.as_deref().unwrap_or_default(),
            original.as_deref().unwrap_or_default()
        );

        Ok(Some(CanonicalRecord {
            created_date: created_date(&case_code, filename),
            model_name,
            model_no,
            chipset,
            build_version: build_version(reproduction),
            os_version: os_version(reproduction),
            issue_type: issue_type(fields.problem.as_deref(), reproduction),
            third_party_app: self.apps.detect(&search_text),
            original_content: original,
            case_code,
            title: fields.title,
            problem: fields.problem,
            reproduction_path: fields.reproduction,
            resolver: fields.resolver,
            resolve_option: fields.resolve_option,
            cause: fields.cause,
            solution: fields.solution,
        }))
    }
}
