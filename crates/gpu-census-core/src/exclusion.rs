//! Ownership policy applied to GPU line items before conversion.
//!
//! Only items that are effectively university-owned count toward a
//! university's score. Facility kind overrides the declared tag:
//!
//! | facility            | effective ownership                        |
//! |---------------------|--------------------------------------------|
//! | national center     | shared                                     |
//! | DOE lab             | shared                                     |
//! | cloud provider      | cloud                                      |
//! | allocation system   | grant                                      |
//! | consortium          | owned for the dedicated member, else shared|
//! | campus              | declared tag                               |
//!
//! Dropped items are reported through [`ExclusionAudit`]; they never feed
//! the ratio.

use crate::model::{Facility, GpuLineItem, Ownership, Partition};
use serde::Serialize;

/// Ownership after the facility policy is applied.
pub fn effective_ownership(university_id: &str, item: &GpuLineItem) -> Ownership {
    match item.facility {
        Facility::NationalCenter | Facility::DoeLab => Ownership::Shared,
        Facility::CloudProvider => Ownership::Cloud,
        Facility::AllocationSystem => Ownership::Grant,
        Facility::Consortium => match &item.partition {
            Partition::Dedicated { member } if member == university_id => {
                Ownership::UniversityOwned
            }
            _ => Ownership::Shared,
        },
        Facility::Campus => item.ownership,
    }
}

/// One dropped line item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedItem {
    pub model: String,
    pub count: u64,
    pub ownership: Ownership,
}

/// Side-channel record of what the filter dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExclusionAudit {
    pub dropped_items: usize,
    pub dropped_gpus: u64,
    pub items: Vec<ExcludedItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filtered {
    pub retained: Vec<GpuLineItem>,
    pub audit: ExclusionAudit,
}

/// Keep the line items that are effectively university-owned.
///
/// Items are kept in input order. Zero-count items that would be dropped are
/// not counted in the audit.
pub fn filter(university_id: &str, items: &[GpuLineItem]) -> Filtered {
    let mut retained = Vec::new();
    let mut audit = ExclusionAudit::default();

    for item in items {
        let ownership = effective_ownership(university_id, item);
        if ownership == Ownership::UniversityOwned {
            let mut kept = item.clone();
            kept.ownership = ownership;
            retained.push(kept);
            continue;
        }
        if item.count == 0 {
            continue;
        }
        tracing::debug!(
            "{university_id}: excluding {} x {} ({})",
            item.count,
            item.model,
            ownership.as_str()
        );
        audit.dropped_items += 1;
        audit.dropped_gpus += item.count;
        audit.items.push(ExcludedItem {
            model: item.model.name().to_string(),
            count: item.count,
            ownership,
        });
    }

    Filtered { retained, audit }
}
