//! Reduce per-university records to one ranked master table.
//!
//! Stages:
//! 1. Deduplicate by university id (latest retrieval wins, ties are errors)
//! 2. Exclusion + normalization per university, fanned out with rayon
//! 3. Rank by GPUs per weighted student, undefined ratios last
//!
//! The result depends only on the set of input records, not their order.

use crate::config::CensusConfig;
use crate::error::RecordError;
use crate::model::UniversityRecord;
use crate::normalize::{normalize, NormalizedUniversity};
use crate::reference::PriceTable;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One output row. `rank` is `None` for undefined ratios.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedUniversity {
    pub rank: Option<usize>,
    pub university: NormalizedUniversity,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MasterTable {
    pub rows: Vec<RankedUniversity>,
    /// Universities left out of this run, sorted by university
    pub issues: Vec<RecordError>,
}

impl MasterTable {
    /// Add documents rejected before aggregation to the run's issues.
    pub fn record_rejections(&mut self, rejected: impl IntoIterator<Item = RecordError>) {
        self.issues.extend(rejected);
        self.issues.sort_by(|a, b| {
            a.university()
                .cmp(b.university())
                .then_with(|| a.to_string().cmp(&b.to_string()))
        });
    }

    pub fn ranked(&self) -> impl Iterator<Item = &RankedUniversity> {
        self.rows.iter().filter(|row| row.rank.is_some())
    }

    pub fn malformed_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| matches!(issue, RecordError::MalformedInput { .. }))
            .count()
    }
}

/// Pick one record per university id.
///
/// The most recently retrieved record wins. Several records sharing the latest
/// retrieval time are ambiguous and the university is dropped.
pub fn deduplicate(
    records: &[UniversityRecord],
) -> (Vec<&UniversityRecord>, Vec<RecordError>) {
    let mut groups: BTreeMap<&str, Vec<&UniversityRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.university_id.as_str())
            .or_default()
            .push(record);
    }

    let mut winners = Vec::with_capacity(groups.len());
    let mut errors = Vec::new();
    for (id, group) in groups {
        let Some(latest) = group.iter().map(|r| r.retrieved_at).max() else {
            continue;
        };
        let newest: Vec<_> = group
            .iter()
            .filter(|r| r.retrieved_at == latest)
            .collect();
        if newest.len() > 1 {
            tracing::warn!(
                "{id}: {} documents retrieved at {latest}, skipping until resolved",
                newest.len()
            );
            errors.push(RecordError::AmbiguousDuplicate {
                university: id.to_string(),
                count: newest.len(),
                retrieved_at: latest,
            });
            continue;
        }
        if group.len() > 1 {
            tracing::info!(
                "{id}: keeping document retrieved at {latest}, dropping {} older",
                group.len() - 1
            );
        }
        winners.push(*newest[0]);
    }

    (winners, errors)
}

/// Ranking order: defined ratios descending, then undefined ratios.
/// Ties break on university id.
pub fn rank_order(a: &NormalizedUniversity, b: &NormalizedUniversity) -> Ordering {
    let by_ratio = match (a.gpus_per_student, b.gpus_per_student) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_ratio.then_with(|| a.university_id.cmp(&b.university_id))
}

pub fn aggregate(
    records: &[UniversityRecord],
    prices: &PriceTable,
    config: &CensusConfig,
) -> MasterTable {
    let (winners, issues) = deduplicate(records);

    let mut normalized: Vec<NormalizedUniversity> = winners
        .par_iter()
        .map(|record| normalize(record, prices, config))
        .collect();
    normalized.sort_by(|a, b| a.university_id.cmp(&b.university_id));
    normalized.sort_by(rank_order);

    let mut next_rank = 1;
    let rows = normalized
        .into_iter()
        .map(|university| {
            let rank = university.gpus_per_student.map(|_| {
                let rank = next_rank;
                next_rank += 1;
                rank
            });
            RankedUniversity { rank, university }
        })
        .collect::<Vec<_>>();

    tracing::info!(
        "Aggregated {} universities ({} ranked, {} skipped)",
        rows.len(),
        rows.iter().filter(|r| r.rank.is_some()).count(),
        issues.len()
    );

    let mut table = MasterTable {
        rows,
        issues: Vec::new(),
    };
    table.record_rejections(issues);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GpuLineItem, GpuModel, StudentCount};
    use chrono::NaiveDate;

    fn prices() -> PriceTable {
        PriceTable::new([("H100 SXM", 35000.0), ("A100 80GB", 15000.0)], "H100 SXM").unwrap()
    }

    fn record(id: &str, h100: u64, undergrad: u64, day: u32) -> UniversityRecord {
        UniversityRecord {
            university_id: id.to_string(),
            name: id.to_uppercase(),
            url: None,
            retrieved_at: NaiveDate::from_ymd_opt(2025, 1, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            gpu_items: vec![GpuLineItem::owned(
                GpuModel::H100Sxm,
                h100,
                vec![format!("https://{id}.edu")],
            )],
            students: StudentCount {
                undergrad,
                ..StudentCount::default()
            },
            compute_credits_usd_per_year: 0.0,
            notes: String::new(),
            source_urls: vec![format!("https://{id}.edu")],
        }
    }

    fn ids(table: &MasterTable) -> Vec<&str> {
        table
            .rows
            .iter()
            .map(|r| r.university.university_id.as_str())
            .collect()
    }

    #[test]
    fn test_ranked_descending_with_undefined_last() {
        let records = vec![
            record("low", 1, 100, 1),
            record("none", 50, 0, 1),
            record("high", 10, 100, 1),
            record("zero", 0, 100, 1),
        ];
        let table = aggregate(&records, &prices(), &CensusConfig::default());
        assert_eq!(ids(&table), vec!["high", "low", "zero", "none"]);
        let ranks: Vec<_> = table.rows.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![Some(1), Some(2), Some(3), None]);
        assert_eq!(table.ranked().count(), 3);
    }

    #[test]
    fn test_ties_break_on_id() {
        let records = vec![record("b", 2, 100, 1), record("a", 2, 100, 1)];
        let table = aggregate(&records, &prices(), &CensusConfig::default());
        assert_eq!(ids(&table), vec!["a", "b"]);
    }

    #[test]
    fn test_latest_duplicate_wins() {
        let records = vec![record("u", 1, 100, 1), record("u", 9, 100, 5)];
        let table = aggregate(&records, &prices(), &CensusConfig::default());
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].university.h100_equivalent_count, 9.0);
        assert!(table.issues.is_empty());
    }

    #[test]
    fn test_ambiguous_duplicate_excluded() {
        let records = vec![
            record("dup", 1, 100, 3),
            record("dup", 2, 100, 3),
            record("other", 1, 100, 3),
        ];
        let table = aggregate(&records, &prices(), &CensusConfig::default());
        assert_eq!(ids(&table), vec!["other"]);
        assert_eq!(table.issues.len(), 1);
        assert!(matches!(
            &table.issues[0],
            RecordError::AmbiguousDuplicate { university, count: 2, .. } if university == "dup"
        ));
        assert_eq!(table.malformed_count(), 0);
    }

    #[test]
    fn test_permutation_invariant() {
        let records = vec![
            record("a", 3, 100, 1),
            record("b", 1, 10, 1),
            record("c", 0, 0, 1),
            record("d", 7, 300, 2),
            record("d", 2, 300, 1),
        ];
        let expected = aggregate(&records, &prices(), &CensusConfig::default());
        let mut reversed = records.clone();
        reversed.reverse();
        assert_eq!(
            aggregate(&reversed, &prices(), &CensusConfig::default()),
            expected
        );
        let mut rotated = records.clone();
        rotated.rotate_left(2);
        assert_eq!(
            aggregate(&rotated, &prices(), &CensusConfig::default()),
            expected
        );
    }

    #[test]
    fn test_inputs_not_mutated() {
        let records = vec![record("a", 3, 100, 1)];
        let before = records.clone();
        let _ = aggregate(&records, &prices(), &CensusConfig::default());
        assert_eq!(records, before);
    }
}
