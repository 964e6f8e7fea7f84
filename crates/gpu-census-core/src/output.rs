//! Serialization of the master table.
//!
//! Column order and number formatting are fixed so that identical inputs give
//! byte-identical files and published datasets can be reviewed as diffs.

use crate::aggregate::{MasterTable, RankedUniversity};
use crate::error::RecordError;
use crate::exclusion::ExclusionAudit;
use crate::model::{Confidence, GpuModel};
use crate::normalize::{NormalizedUniversity, UnknownModel};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// Placeholder URL for universities missing from the roster
pub const MISSING_URL: &str = "#";

pub fn header() -> Vec<String> {
    let mut columns: Vec<String> = [
        "rank",
        "university_id",
        "university",
        "url",
        "undergrad",
        "grad",
        "phd",
        "weighted_student_count",
        "h100_equivalent_count",
        "gpus_per_student",
        "undefined_ratio",
        "credit_derived_h100_equivalent",
        "total_gpu_value_usd",
    ]
    .iter()
    .map(|c| c.to_string())
    .collect();
    columns.extend(GpuModel::KNOWN.iter().map(GpuModel::column));
    columns.extend(
        [
            "other_gpu_count",
            "excluded_items",
            "excluded_gpu_count",
            "unpriced_gpu_count",
            "student_confidence",
            "data_quality_note",
            "sources",
            "data_retrieved_date",
            "notes",
        ]
        .iter()
        .map(|c| c.to_string()),
    );
    columns
}

fn fixed(value: f64, decimals: usize) -> String {
    // Rounded zero keeps its sign in format!, strip it.
    let formatted = format!("{value:.decimals$}");
    if formatted.starts_with('-') && formatted[1..].chars().all(|c| c == '0' || c == '.') {
        formatted[1..].to_string()
    } else {
        formatted
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Note shown next to student counts that were not reported directly.
pub fn data_quality_note(university: &NormalizedUniversity) -> String {
    match university.student_confidence {
        Confidence::Reported => String::new(),
        Confidence::Estimated => match &university.student_rationale {
            Some(rationale) => format!("Estimated student counts: {}", single_line(rationale)),
            None => "Estimated student counts".to_string(),
        },
    }
}

fn row(ranked: &RankedUniversity) -> Vec<String> {
    let u = &ranked.university;
    let mut fields = vec![
        ranked.rank.map(|r| r.to_string()).unwrap_or_default(),
        u.university_id.clone(),
        u.name.clone(),
        u.url.clone().unwrap_or_else(|| MISSING_URL.to_string()),
        u.undergrad.to_string(),
        u.grad.to_string(),
        u.phd.to_string(),
        fixed(u.weighted_student_count, 1),
        fixed(u.h100_equivalent_count, 4),
        u.gpus_per_student
            .map(|ratio| fixed(ratio, 4))
            .unwrap_or_default(),
        u.undefined_ratio().to_string(),
        fixed(u.credit_derived_h100_equivalent, 4),
        fixed(u.total_gpu_value_usd, 0),
    ];
    fields.extend(
        GpuModel::KNOWN
            .iter()
            .map(|model| u.gpu_counts.get(model).copied().unwrap_or(0).to_string()),
    );
    fields.extend([
        u.other_gpu_count().to_string(),
        u.exclusions.dropped_items.to_string(),
        u.exclusions.dropped_gpus.to_string(),
        u.unknown_models
            .iter()
            .map(|m| m.count)
            .sum::<u64>()
            .to_string(),
        u.student_confidence.as_str().to_string(),
        data_quality_note(u),
        u.source_count.to_string(),
        u.retrieved_at.format("%Y-%m-%d").to_string(),
        single_line(&u.notes),
    ]);
    fields
}

/// Write the master dataset as CSV.
pub fn write_master_csv<W: Write>(table: &MasterTable, writer: W) -> Result<()> {
    let mut csv = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);
    csv.write_record(header())?;
    for ranked in &table.rows {
        csv.write_record(row(ranked))?;
    }
    csv.flush()?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct AuditIssue<'a> {
    university: &'a str,
    kind: &'static str,
    detail: String,
}

#[derive(Debug, Serialize)]
struct AuditReport<'a> {
    skipped: Vec<AuditIssue<'a>>,
    undefined_ratio: Vec<&'a str>,
    estimated_students: BTreeMap<&'a str, String>,
    exclusions: BTreeMap<&'a str, &'a ExclusionAudit>,
    unpriced_models: BTreeMap<&'a str, &'a [UnknownModel]>,
}

/// Write the run's audit channel as pretty JSON.
pub fn write_audit_json<W: Write>(table: &MasterTable, writer: W) -> Result<()> {
    let skipped = table
        .issues
        .iter()
        .map(|issue| AuditIssue {
            university: issue.university(),
            kind: match issue {
                RecordError::MalformedInput { .. } => "malformed_input",
                RecordError::AmbiguousDuplicate { .. } => "ambiguous_duplicate",
            },
            detail: issue.to_string(),
        })
        .collect();

    let universities = || table.rows.iter().map(|r| &r.university);
    let report = AuditReport {
        skipped,
        undefined_ratio: universities()
            .filter(|u| u.undefined_ratio())
            .map(|u| u.university_id.as_str())
            .collect(),
        estimated_students: universities()
            .filter(|u| u.student_confidence == Confidence::Estimated)
            .map(|u| (u.university_id.as_str(), data_quality_note(u)))
            .collect(),
        exclusions: universities()
            .filter(|u| u.exclusions.dropped_items > 0)
            .map(|u| (u.university_id.as_str(), &u.exclusions))
            .collect(),
        unpriced_models: universities()
            .filter(|u| !u.unknown_models.is_empty())
            .map(|u| (u.university_id.as_str(), u.unknown_models.as_slice()))
            .collect(),
    };

    let mut writer = writer;
    serde_json::to_writer_pretty(&mut writer, &report).context("Failed to serialize audit")?;
    writer.write_all(b"\n")?;
    Ok(())
}

fn create_file(path: &Path) -> Result<std::fs::File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))
}

/// Write the dataset and its audit report.
pub fn write_outputs(table: &MasterTable, dataset: &Path, audit: &Path) -> Result<()> {
    write_master_csv(table, std::io::BufWriter::new(create_file(dataset)?))
        .with_context(|| format!("Failed to write {}", dataset.display()))?;
    write_audit_json(table, std::io::BufWriter::new(create_file(audit)?))
        .with_context(|| format!("Failed to write {}", audit.display()))?;
    tracing::info!(
        "Wrote {} rows to {} (audit: {})",
        table.rows.len(),
        dataset.display(),
        audit.display()
    );
    Ok(())
}

/// Top `n` ranked rows as `(rank, name, gpus_per_student, h100_equivalent, sources)`.
pub fn leaderboard(table: &MasterTable, n: usize) -> Vec<(usize, &str, f64, f64, usize)> {
    table
        .ranked()
        .take(n)
        .filter_map(|r| {
            let u = &r.university;
            Some((
                r.rank?,
                u.name.as_str(),
                u.gpus_per_student?,
                u.h100_equivalent_count,
                u.source_count,
            ))
        })
        .collect()
}
