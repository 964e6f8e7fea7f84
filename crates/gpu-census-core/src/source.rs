//! Where validated university records come from.
//!
//! The collection and validation pipeline runs elsewhere and leaves one JSON
//! document per university in a directory. [`RecordSource`] is the only
//! contract the core has with it: hand over validated records, or reject a
//! document with a reason.

use crate::error::RecordError;
use crate::model::UniversityRecord;
use crate::record::{parse_document, parse_student_totals};
use crate::reference::Roster;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Records accepted and documents rejected by a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOutcome {
    pub records: Vec<UniversityRecord>,
    pub rejected: Vec<RecordError>,
}

impl LoadOutcome {
    /// Keep only the given university ids.
    pub fn retain_ids(&mut self, ids: &BTreeSet<String>) {
        self.records.retain(|r| ids.contains(&r.university_id));
        self.rejected.retain(|e| ids.contains(e.university()));
    }
}

pub trait RecordSource {
    /// Produce every validated record, rejecting malformed documents.
    ///
    /// Only failures to reach the source at all are errors; per-document
    /// problems go to [`LoadOutcome::rejected`].
    fn records(&self) -> Result<LoadOutcome>;
}

/// Raise student counts to the per-field maximum found in per-provider caches.
///
/// Individual providers sometimes report enrollment the ensemble dropped to
/// zero. Caches hold documents with the same file name as the validated one.
#[derive(Debug, Clone, Default)]
pub struct StudentCacheMerge {
    dirs: Vec<PathBuf>,
}

impl StudentCacheMerge {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        StudentCacheMerge { dirs }
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    /// Apply the merge to a record parsed from `file_name`.
    /// Returns true when any count was raised.
    pub fn apply(&self, file_name: &std::ffi::OsStr, record: &mut UniversityRecord) -> bool {
        let students = &mut record.students;
        let (ug, grad, phd) = (students.undergrad, students.grad, students.phd);

        for dir in &self.dirs {
            let path = dir.join(file_name);
            let Ok(contents) = fs::read_to_string(&path) else {
                continue;
            };
            let Some(totals) = parse_student_totals(&contents) else {
                tracing::debug!("Ignoring unreadable cache document {}", path.display());
                continue;
            };
            students.undergrad = students.undergrad.max(totals.undergrad);
            students.grad = students.grad.max(totals.grad);
            students.phd = students.phd.max(totals.phd);
        }

        let raised = (students.undergrad, students.grad, students.phd) != (ug, grad, phd);
        if raised {
            tracing::info!(
                "{}: using max from provider caches - UG:{}->{}, MS:{}->{}, PhD:{}->{}",
                record.university_id,
                ug,
                students.undergrad,
                grad,
                students.grad,
                phd,
                students.phd
            );
        }
        raised
    }
}

/// A directory of validated per-university documents.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
    roster: Roster,
    merge: StudentCacheMerge,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>, roster: Roster, merge: StudentCacheMerge) -> Self {
        DirectorySource {
            dir: dir.into(),
            roster,
            merge,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// `*.json` files in a directory, sorted by path.
pub fn document_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to read documents directory: {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Display name implied by a document file name (`Rice_University.json`).
pub fn name_from_file(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().replace('_', " "))
        .unwrap_or_default()
}

impl RecordSource for DirectorySource {
    fn records(&self) -> Result<LoadOutcome> {
        let mut outcome = LoadOutcome::default();
        let mut raised = 0;

        for path in document_paths(&self.dir)? {
            let fallback = name_from_file(&path);
            let contents = match fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(err) => {
                    let err = RecordError::malformed(
                        self.roster.resolve_id(&fallback),
                        format!("unreadable document {}: {err}", path.display()),
                    );
                    tracing::warn!("{err}");
                    outcome.rejected.push(err);
                    continue;
                }
            };

            match parse_document(&contents, &fallback, &self.roster) {
                Ok(mut record) => {
                    if let Some(file_name) = path.file_name() {
                        if self.merge.apply(file_name, &mut record) {
                            raised += 1;
                        }
                    }
                    outcome.records.push(record);
                }
                Err(err) => {
                    tracing::warn!("Rejected {}: {err}", path.display());
                    outcome.rejected.push(err);
                }
            }
        }

        tracing::info!(
            "Loaded {} documents from {} ({} rejected, {} student counts raised from caches)",
            outcome.records.len(),
            self.dir.display(),
            outcome.rejected.len(),
            raised
        );
        Ok(outcome)
    }
}
