//! Unit conversion: GPUs to H100-equivalents, credits to H100-equivalents,
//! enrollment to a weighted student count.

use crate::config::{CensusConfig, StudentWeights};
use crate::exclusion::{self, ExclusionAudit};
use crate::model::{Confidence, GpuLineItem, GpuModel, UniversityRecord};
use crate::reference::PriceTable;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

pub const HOURS_PER_YEAR: f64 = 24.0 * 365.0;

/// A retained line item that could not be priced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnknownModel {
    pub model: String,
    pub count: u64,
}

/// Result of converting retained line items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conversion {
    pub h100_equivalent_count: f64,
    pub total_value_usd: f64,
    /// Priced GPU counts per model
    pub counts: BTreeMap<GpuModel, u64>,
    pub unknown: Vec<UnknownModel>,
}

/// Convert retained line items into H100-equivalents.
///
/// Each item contributes `count * price(model) / reference_price`. Models the
/// table cannot price fall back to the item's own estimate; without one they
/// are left out of the sum and reported in [`Conversion::unknown`].
pub fn h100_equivalent(items: &[GpuLineItem], prices: &PriceTable) -> Conversion {
    let mut conversion = Conversion::default();
    let reference_price = prices.reference_price();

    for item in items {
        let price = prices.price_of(&item.model).or(item.estimated_price_usd);
        let Some(price) = price else {
            if item.count > 0 {
                tracing::warn!(
                    "No price for {} ({} GPUs); excluded from H100-equivalent",
                    item.model,
                    item.count
                );
                conversion.unknown.push(UnknownModel {
                    model: item.model.name().to_string(),
                    count: item.count,
                });
            }
            continue;
        };
        let value = item.count as f64 * price;
        conversion.total_value_usd += value;
        conversion.h100_equivalent_count += value / reference_price;
        *conversion.counts.entry(item.model.clone()).or_insert(0) += item.count;
    }

    conversion
}

/// Annual credit value expressed as H100s running all year.
pub fn credit_h100_equivalent(annual_usd: f64, hourly_h100_rate_usd: f64) -> f64 {
    if annual_usd <= 0.0 || hourly_h100_rate_usd <= 0.0 {
        return 0.0;
    }
    annual_usd / (hourly_h100_rate_usd * HOURS_PER_YEAR)
}

pub fn weighted_students(undergrad: u64, grad: u64, phd: u64, weights: &StudentWeights) -> f64 {
    weights.undergrad * undergrad as f64 + weights.grad * grad as f64 + weights.phd * phd as f64
}

/// One university after exclusion and conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedUniversity {
    pub university_id: String,
    pub name: String,
    pub url: Option<String>,
    pub h100_equivalent_count: f64,
    pub weighted_student_count: f64,
    /// `None` when there are no weighted students
    pub gpus_per_student: Option<f64>,
    pub credit_derived_h100_equivalent: f64,
    pub total_gpu_value_usd: f64,
    pub gpu_counts: BTreeMap<GpuModel, u64>,
    pub exclusions: ExclusionAudit,
    pub unknown_models: Vec<UnknownModel>,
    pub undergrad: u64,
    pub grad: u64,
    pub phd: u64,
    pub students_as_of: String,
    pub student_confidence: Confidence,
    pub student_rationale: Option<String>,
    pub source_count: usize,
    pub retrieved_at: NaiveDateTime,
    pub notes: String,
}

impl NormalizedUniversity {
    pub fn undefined_ratio(&self) -> bool {
        self.gpus_per_student.is_none()
    }

    /// Retained GPUs of models outside the known set
    pub fn other_gpu_count(&self) -> u64 {
        self.gpu_counts
            .iter()
            .filter(|(model, _)| matches!(model, GpuModel::Other(_)))
            .map(|(_, count)| count)
            .sum()
    }
}

/// Exclusion filter followed by both conversions.
pub fn normalize(
    record: &UniversityRecord,
    prices: &PriceTable,
    config: &CensusConfig,
) -> NormalizedUniversity {
    let filtered = exclusion::filter(&record.university_id, &record.gpu_items);
    let conversion = h100_equivalent(&filtered.retained, prices);

    let students = &record.students;
    let weighted = weighted_students(
        students.undergrad,
        students.grad,
        students.phd,
        &config.weights,
    );
    let gpus_per_student = if weighted > 0.0 {
        Some(conversion.h100_equivalent_count / weighted)
    } else {
        tracing::info!("{}: no weighted students, ratio undefined", record.university_id);
        None
    };

    NormalizedUniversity {
        university_id: record.university_id.clone(),
        name: record.name.clone(),
        url: record.url.clone(),
        h100_equivalent_count: conversion.h100_equivalent_count,
        weighted_student_count: weighted,
        gpus_per_student,
        credit_derived_h100_equivalent: credit_h100_equivalent(
            record.compute_credits_usd_per_year,
            config.hourly_h100_rate_usd,
        ),
        total_gpu_value_usd: conversion.total_value_usd,
        gpu_counts: conversion.counts,
        exclusions: filtered.audit,
        unknown_models: conversion.unknown,
        undergrad: students.undergrad,
        grad: students.grad,
        phd: students.phd,
        students_as_of: students.as_of.clone(),
        student_confidence: students.confidence,
        student_rationale: students.rationale.clone(),
        source_count: record.source_urls.len(),
        retrieved_at: record.retrieved_at,
        notes: record.notes.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Facility, Ownership, Partition, StudentCount};

    fn prices() -> PriceTable {
        PriceTable::new(
            [("H100 SXM", 35000.0), ("A100 80GB", 15000.0), ("V100", 3000.0)],
            "H100 SXM",
        )
        .unwrap()
    }

    fn owned(model: GpuModel, count: u64) -> GpuLineItem {
        GpuLineItem::owned(model, count, vec!["https://example.edu".to_string()])
    }

    fn record(items: Vec<GpuLineItem>, students: (u64, u64, u64)) -> UniversityRecord {
        UniversityRecord {
            university_id: "example".to_string(),
            name: "Example".to_string(),
            url: None,
            retrieved_at: NaiveDateTime::default(),
            gpu_items: items,
            students: StudentCount {
                undergrad: students.0,
                grad: students.1,
                phd: students.2,
                ..StudentCount::default()
            },
            compute_credits_usd_per_year: 0.0,
            notes: String::new(),
            source_urls: vec!["https://example.edu".to_string()],
        }
    }

    #[test]
    fn test_a100_equivalent() {
        let conversion = h100_equivalent(&[owned(GpuModel::A100_80GB, 10)], &prices());
        let expected = 10.0 * (15000.0 / 35000.0);
        assert!((conversion.h100_equivalent_count - expected).abs() < 1e-12);
        assert!((conversion.h100_equivalent_count - 4.285714).abs() < 1e-6);
        assert_eq!(conversion.total_value_usd, 150000.0);
    }

    #[test]
    fn test_weighted_students() {
        let weighted = weighted_students(100, 50, 20, &StudentWeights::default());
        assert!((weighted - 98.0).abs() < 1e-9);
    }

    #[test]
    fn test_credit_equivalent() {
        let credits = credit_h100_equivalent(40000.0, 4.0);
        assert!((credits - 40000.0 / (4.0 * 24.0 * 365.0)).abs() < 1e-12);
        assert!((credits - 1.1416).abs() < 1e-4);
        assert_eq!(credit_h100_equivalent(0.0, 4.0), 0.0);
    }

    #[test]
    fn test_all_zero_counts_is_exactly_zero() {
        let conversion = h100_equivalent(
            &[owned(GpuModel::H100Sxm, 0), owned(GpuModel::V100, 0)],
            &prices(),
        );
        assert_eq!(conversion.h100_equivalent_count, 0.0);
        assert!(conversion.unknown.is_empty());
    }

    #[test]
    fn test_unknown_model_reported_not_zero_priced() {
        let items = [
            owned(GpuModel::H100Sxm, 2),
            owned(GpuModel::Other("MI300X".to_string()), 8),
        ];
        let conversion = h100_equivalent(&items, &prices());
        assert_eq!(conversion.h100_equivalent_count, 2.0);
        assert_eq!(
            conversion.unknown,
            vec![UnknownModel {
                model: "MI300X".to_string(),
                count: 8
            }]
        );
    }

    #[test]
    fn test_estimated_price_fallback() {
        let mut item = owned(GpuModel::Other("MI250".to_string()), 7);
        item.estimated_price_usd = Some(17500.0);
        let conversion = h100_equivalent(&[item], &prices());
        assert!((conversion.h100_equivalent_count - 3.5).abs() < 1e-12);
        assert!(conversion.unknown.is_empty());
    }

    #[test]
    fn test_shared_items_contribute_nothing() {
        let shared = GpuLineItem {
            model: GpuModel::H100Sxm,
            count: 500,
            ownership: Ownership::Shared,
            facility: Facility::Campus,
            partition: Partition::General,
            source_urls: vec!["https://example.edu".to_string()],
            estimated_price_usd: None,
        };
        let normalized = normalize(
            &record(vec![shared], (100, 0, 0)),
            &prices(),
            &CensusConfig::default(),
        );
        assert_eq!(normalized.h100_equivalent_count, 0.0);
        assert_eq!(normalized.exclusions.dropped_gpus, 500);
        assert_eq!(normalized.gpus_per_student, Some(0.0));
    }

    #[test]
    fn test_zero_students_undefined_ratio() {
        let normalized = normalize(
            &record(vec![owned(GpuModel::H100Sxm, 4)], (0, 0, 0)),
            &prices(),
            &CensusConfig::default(),
        );
        assert!(normalized.undefined_ratio());
        assert_eq!(normalized.h100_equivalent_count, 4.0);
    }

    #[test]
    fn test_monotonic_in_retained_count() {
        let mut previous = -1.0;
        for count in [0, 1, 2, 5, 10, 100, 1000] {
            let items = [owned(GpuModel::V100, 3), owned(GpuModel::A100_80GB, count)];
            let value = h100_equivalent(&items, &prices()).h100_equivalent_count;
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn test_credits_kept_separate() {
        let mut rec = record(vec![owned(GpuModel::H100Sxm, 1)], (10, 0, 0));
        rec.compute_credits_usd_per_year = 40000.0;
        let config = CensusConfig {
            hourly_h100_rate_usd: 4.0,
            ..CensusConfig::default()
        };
        let normalized = normalize(&rec, &prices(), &config);
        assert_eq!(normalized.h100_equivalent_count, 1.0);
        assert!((normalized.credit_derived_h100_equivalent - 1.1416).abs() < 1e-4);
    }
}
