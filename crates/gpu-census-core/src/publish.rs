//! Copy the dataset and per-university documents to the web data directory.
//!
//! The static site loads files from disk, so both the master CSV and every
//! source document have to sit next to it under predictable names.

use crate::source::{document_paths, name_from_file};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub documents: usize,
}

/// File name the web page uses for a university's document.
///
/// Commas and quotes are dropped, spaces become `_` and hyphens `_-_`.
pub fn web_document_name(university: &str) -> String {
    let cleaned: String = university
        .chars()
        .filter(|c| !matches!(c, ',' | '\'' | '"'))
        .collect();
    format!("{}.json", cleaned.replace(' ', "_").replace('-', "_-_"))
}

fn document_university_name(contents: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(contents).ok()?;
    value
        .get("university_name")?
        .as_str()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn same_file(a: &Path, b: &Path) -> Result<bool> {
    if !b.exists() {
        return Ok(false);
    }
    let a = fs::canonicalize(a).with_context(|| format!("Dataset not found: {}", a.display()))?;
    let b = fs::canonicalize(b)?;
    Ok(a == b)
}

/// Publish `dataset` and the documents in `documents_dir` into `web_dir`.
pub fn publish(dataset: &Path, documents_dir: &Path, web_dir: &Path) -> Result<PublishStats> {
    fs::create_dir_all(web_dir)
        .with_context(|| format!("Failed to create web directory: {}", web_dir.display()))?;

    let dataset_name = dataset
        .file_name()
        .with_context(|| format!("Dataset path has no file name: {}", dataset.display()))?;
    let target = web_dir.join(dataset_name);
    if same_file(dataset, &target)? {
        tracing::debug!("Dataset already written to {}", target.display());
    } else {
        fs::copy(dataset, &target)
            .with_context(|| format!("Failed to copy dataset {}", dataset.display()))?;
    }

    let mut stats = PublishStats::default();
    for path in document_paths(documents_dir)? {
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = document_university_name(&contents).unwrap_or_else(|| name_from_file(&path));
        let target = web_dir.join(web_document_name(&name));
        fs::write(&target, contents)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        stats.documents += 1;
    }

    tracing::info!(
        "Published {} and {} documents to {}",
        dataset.display(),
        stats.documents,
        web_dir.display()
    );
    Ok(stats)
}
