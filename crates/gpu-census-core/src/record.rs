//! Per-university document parsing.
//!
//! Turns one validated JSON document into a [`UniversityRecord`]. Missing or
//! null numeric fields default to 0; negative counts, missing retrieval dates
//! and unsourced GPU items reject the document.
//!
//! The fixed `<model>_count` fields and `other_high_vram_gpus` entries describe
//! the inventory left after upstream validation removed shared resources, so
//! they are emitted as university-owned campus items unless an entry carries
//! its own ownership tag. Entries in `gpu_resources.line_items` are tagged
//! explicitly and fail closed when the tag is missing.

use crate::error::RecordError;
use crate::model::{
    Confidence, Facility, GpuLineItem, GpuModel, Ownership, Partition, StudentCount,
    UniversityRecord,
};
use crate::reference::Roster;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::{Number, Value};
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    university_name: Option<String>,
    #[serde(default)]
    data_retrieved_date: Option<String>,
    #[serde(default)]
    sources: Option<Vec<RawSource>>,
    #[serde(default)]
    student_data: Option<RawStudentData>,
    #[serde(default)]
    gpu_resources: Option<RawGpuResources>,
    #[serde(default)]
    compute_credits: Option<RawCredits>,
    #[serde(default)]
    validation_notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStudentData {
    #[serde(default)]
    undergrad_cs_count: Option<Number>,
    #[serde(default)]
    grad_cs_count: Option<Number>,
    #[serde(default)]
    phd_cs_count: Option<Number>,
    #[serde(default)]
    year: Option<Value>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    confidence: Option<String>,
    #[serde(default)]
    estimation_rationale: Option<String>,
    #[serde(default)]
    source_url: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGpuResources {
    #[serde(default)]
    other_high_vram_gpus: Option<Vec<RawOtherGpu>>,
    #[serde(default)]
    line_items: Option<Vec<RawLineItem>>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    source_url: Option<Value>,
    #[serde(flatten)]
    counts: BTreeMap<String, Value>,
}

/// A `sources` entry: a bare URL or an object with a `url` field.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSource {
    Url(String),
    Detailed {
        #[serde(default)]
        url: Option<Value>,
    },
    Unusable(Value),
}

impl RawSource {
    fn into_url(self) -> Option<String> {
        match self {
            RawSource::Url(url) => web_url(&url),
            RawSource::Detailed { url } => {
                url.as_ref().and_then(Value::as_str).and_then(web_url)
            }
            RawSource::Unusable(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawOtherGpu {
    Named(String),
    Detailed(RawLineItem),
}

#[derive(Debug, Deserialize)]
struct RawLineItem {
    #[serde(alias = "name")]
    model: String,
    #[serde(default)]
    count: Option<Number>,
    #[serde(default)]
    ownership: Option<String>,
    #[serde(default)]
    facility: Option<String>,
    #[serde(default)]
    partition: Option<String>,
    #[serde(default)]
    member: Option<String>,
    #[serde(default)]
    source_urls: Option<Vec<RawSource>>,
    #[serde(default)]
    estimated_price_usd: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCredits {
    #[serde(default)]
    total_annual_value_usd: Option<Number>,
    #[serde(default)]
    description: Option<String>,
}

/// Student counts as they appear in any document, clamped at zero.
///
/// Used for per-provider caches, which are read leniently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StudentTotals {
    pub undergrad: u64,
    pub grad: u64,
    pub phd: u64,
}

/// Parse one validated document.
///
/// `fallback_name` (typically the file stem with underscores turned into
/// spaces) identifies documents rejected before their `university_name` is read.
pub fn parse_document(
    json: &str,
    fallback_name: &str,
    roster: &Roster,
) -> Result<UniversityRecord, RecordError> {
    let raw: RawDocument = serde_json::from_str(json).map_err(|e| {
        RecordError::malformed(roster.resolve_id(fallback_name), format!("invalid document: {e}"))
    })?;

    let Some(name) = raw
        .university_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
    else {
        return Err(RecordError::malformed(
            roster.resolve_id(fallback_name),
            "missing university_name",
        ));
    };
    let entry = roster.lookup(&name);
    let university_id = roster.resolve_id(&name);
    let fail = |reason: String| RecordError::malformed(university_id.clone(), reason);

    let retrieved_at = match raw.data_retrieved_date.as_deref() {
        Some(date) if !date.trim().is_empty() => parse_retrieved_date(date)
            .ok_or_else(|| fail(format!("unparseable data_retrieved_date: {date}")))?,
        _ => return Err(fail("missing data_retrieved_date".to_string())),
    };

    let student_data = raw.student_data.unwrap_or_default();
    let gpu = raw.gpu_resources.unwrap_or_default();
    let section_urls = [&student_data.source_url, &gpu.source_url]
        .into_iter()
        .filter_map(|url| url.as_ref().and_then(Value::as_str).and_then(web_url));
    let source_urls = clean_urls(
        raw.sources
            .unwrap_or_default()
            .into_iter()
            .filter_map(RawSource::into_url)
            .chain(section_urls),
    );
    let students = parse_students(student_data).map_err(&fail)?;

    let gpu_notes = gpu.notes.clone().unwrap_or_default();
    let gpu_items = parse_gpu_items(gpu, &source_urls, roster).map_err(&fail)?;

    let credits = raw.compute_credits.unwrap_or_default();
    let compute_credits_usd_per_year = match credits.total_annual_value_usd {
        Some(n) => {
            let value = n.as_f64().unwrap_or(0.0);
            if !value.is_finite() || value < 0.0 {
                return Err(fail(format!("invalid total_annual_value_usd: {n}")));
            }
            value
        }
        None => 0.0,
    };

    let notes = [
        Some(gpu_notes),
        students.rationale.clone().filter(|_| students.confidence == Confidence::Reported),
        credits.description,
        raw.validation_notes,
    ]
    .into_iter()
    .flatten()
    .map(|n| n.trim().to_string())
    .filter(|n| !n.is_empty())
    .collect::<Vec<_>>()
    .join(" ");

    Ok(UniversityRecord {
        university_id,
        name: entry.map(|e| e.name.clone()).unwrap_or(name),
        url: entry.and_then(|e| e.url.clone()),
        retrieved_at,
        gpu_items,
        students,
        compute_credits_usd_per_year,
        notes,
        source_urls,
    })
}

/// Read only the student counts of a document, treating anything missing,
/// negative or malformed as zero.
pub fn parse_student_totals(json: &str) -> Option<StudentTotals> {
    let value: Value = serde_json::from_str(json).ok()?;
    let students = value.get("student_data")?;
    let field = |name: &str| {
        students
            .get(name)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite() && *v > 0.0)
            .map(|v| v as u64)
            .unwrap_or(0)
    };
    Some(StudentTotals {
        undergrad: field("undergrad_cs_count"),
        grad: field("grad_cs_count"),
        phd: field("phd_cs_count"),
    })
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DDTHH:MM:SS` and RFC 3339.
pub fn parse_retrieved_date(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(value, format) {
            return Some(ts);
        }
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.naive_utc())
}

fn parse_count(value: Option<&Number>, field: &str) -> Result<u64, String> {
    let Some(n) = value else {
        return Ok(0);
    };
    if let Some(v) = n.as_u64() {
        return Ok(v);
    }
    let v = n.as_f64().unwrap_or(f64::NAN);
    if v < 0.0 {
        return Err(format!("negative {field}: {n}"));
    }
    if !v.is_finite() || v.fract() != 0.0 {
        return Err(format!("non-integer {field}: {n}"));
    }
    Ok(v as u64)
}

fn parse_count_value(value: &Value, field: &str) -> Result<u64, String> {
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => parse_count(Some(n), field),
        other => Err(format!("{field} is not a number: {other}")),
    }
}

fn parse_students(raw: RawStudentData) -> Result<StudentCount, String> {
    let undergrad = parse_count(raw.undergrad_cs_count.as_ref(), "undergrad_cs_count")?;
    let grad = parse_count(raw.grad_cs_count.as_ref(), "grad_cs_count")?;
    let phd = parse_count(raw.phd_cs_count.as_ref(), "phd_cs_count")?;

    let as_of = match raw.year {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    let confidence = match raw.confidence.as_deref().map(str::trim) {
        None | Some("") => Confidence::Reported,
        Some(tag) if tag.eq_ignore_ascii_case("reported") => Confidence::Reported,
        // Anything that is not explicitly reported needs a rationale.
        Some(_) => Confidence::Estimated,
    };

    let rationale = raw
        .estimation_rationale
        .or(raw.notes)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    if confidence == Confidence::Estimated && rationale.is_none() {
        return Err("estimated student counts without a rationale".to_string());
    }

    Ok(StudentCount {
        undergrad,
        grad,
        phd,
        as_of,
        confidence,
        rationale,
    })
}

fn parse_gpu_items(
    raw: RawGpuResources,
    doc_sources: &[String],
    roster: &Roster,
) -> Result<Vec<GpuLineItem>, String> {
    let mut items = Vec::new();

    for model in GpuModel::KNOWN {
        let Some(field) = model.count_field() else {
            continue;
        };
        let count = match raw.counts.get(field) {
            Some(value) => parse_count_value(value, field)?,
            None => 0,
        };
        items.push(GpuLineItem::owned(model, count, doc_sources.to_vec()));
    }

    // Remaining `<name>_count` fields (gh200_count, a10_count, ...)
    for (field, value) in &raw.counts {
        let Some(stem) = field.strip_suffix("_count") else {
            continue;
        };
        if GpuModel::KNOWN.iter().any(|m| m.count_field() == Some(field.as_str())) {
            continue;
        }
        let count = parse_count_value(value, field)?;
        let model = GpuModel::from_name(&stem.to_ascii_uppercase());
        items.push(GpuLineItem::owned(model, count, doc_sources.to_vec()));
    }

    for other in raw.other_high_vram_gpus.unwrap_or_default() {
        let item = match other {
            RawOtherGpu::Named(name) => {
                GpuLineItem::owned(GpuModel::from_name(&name), 0, doc_sources.to_vec())
            }
            RawOtherGpu::Detailed(raw_item) => {
                let declared = raw_item
                    .ownership
                    .as_deref()
                    .map(|tag| Ownership::from_tag(Some(tag)))
                    .unwrap_or(Ownership::UniversityOwned);
                line_item(raw_item, declared, doc_sources, roster)?
            }
        };
        items.push(item);
    }

    for raw_item in raw.line_items.unwrap_or_default() {
        let declared = Ownership::from_tag(raw_item.ownership.as_deref());
        items.push(line_item(raw_item, declared, doc_sources, roster)?);
    }

    for item in &items {
        if item.count > 0 && item.source_urls.is_empty() {
            return Err(format!(
                "{} x {} has no source URL",
                item.count, item.model
            ));
        }
    }

    Ok(items)
}

fn line_item(
    raw: RawLineItem,
    declared: Ownership,
    doc_sources: &[String],
    roster: &Roster,
) -> Result<GpuLineItem, String> {
    let model = GpuModel::from_name(&raw.model);
    let count = parse_count(raw.count.as_ref(), &format!("{model} count"))?;

    let (facility, ownership) = match raw.facility.as_deref() {
        None => (Facility::Campus, declared),
        Some(tag) => match parse_facility(tag) {
            Some(facility) => (facility, declared),
            None => (Facility::Campus, Ownership::FAIL_CLOSED),
        },
    };

    let partition = match raw.partition.as_deref().map(str::trim) {
        Some(p) if p.eq_ignore_ascii_case("dedicated") => match raw.member.as_deref() {
            Some(member) if !member.trim().is_empty() => Partition::Dedicated {
                member: roster.resolve_id(member),
            },
            _ => return Err(format!("dedicated partition of {model} without a member")),
        },
        _ => Partition::General,
    };

    let item_urls = raw
        .source_urls
        .map(|urls| clean_urls(urls.into_iter().filter_map(RawSource::into_url)));
    let source_urls = match item_urls {
        Some(urls) if !urls.is_empty() => urls,
        _ => doc_sources.to_vec(),
    };

    if let Some(price) = raw.estimated_price_usd {
        if !price.is_finite() || price <= 0.0 {
            return Err(format!("invalid estimated_price_usd for {model}: {price}"));
        }
    }

    Ok(GpuLineItem {
        model,
        count,
        ownership,
        facility,
        partition,
        source_urls,
        estimated_price_usd: raw.estimated_price_usd,
    })
}

fn parse_facility(tag: &str) -> Option<Facility> {
    let facility = match tag.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
        "campus" => Facility::Campus,
        "national_center" | "regional_center" | "supercomputing_center" => {
            Facility::NationalCenter
        }
        "doe_lab" | "national_lab" | "national_laboratory" => Facility::DoeLab,
        "cloud_provider" | "cloud" => Facility::CloudProvider,
        "allocation_system" | "allocation" => Facility::AllocationSystem,
        "consortium" => Facility::Consortium,
        _ => return None,
    };
    Some(facility)
}

/// The trimmed URL when it is an http(s) link. Placeholders such as
/// `NO_VALID_SOURCE` are dropped.
fn web_url(url: &str) -> Option<String> {
    let url = url.trim();
    (url.starts_with("https://") || url.starts_with("http://")).then(|| url.to_string())
}

fn clean_urls(urls: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut urls: Vec<String> = urls.into_iter().collect();
    urls.sort();
    urls.dedup();
    urls
}
