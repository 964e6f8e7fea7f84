//! Data model shared by every stage of a census run.
//!
//! [`UniversityRecord`] is the input contract produced by the upstream
//! collection and validation steps. Everything downstream of it is derived and
//! recomputed from scratch on each run.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// GPU models tracked by the census.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GpuModel {
    H100Sxm,
    H100Pcie,
    H200,
    B100,
    B200,
    A100_80GB,
    A100_40GB,
    A40,
    A6000,
    L40S,
    V100,
    P100,
    /// Any model outside the closed set, keyed by its reported name
    Other(String),
}

impl GpuModel {
    /// Known models in output column order
    pub const KNOWN: [GpuModel; 12] = [
        GpuModel::H100Sxm,
        GpuModel::H100Pcie,
        GpuModel::H200,
        GpuModel::B100,
        GpuModel::B200,
        GpuModel::A100_80GB,
        GpuModel::A100_40GB,
        GpuModel::A40,
        GpuModel::A6000,
        GpuModel::L40S,
        GpuModel::V100,
        GpuModel::P100,
    ];

    /// Name used by the price table
    pub fn name(&self) -> &str {
        match self {
            GpuModel::H100Sxm => "H100 SXM",
            GpuModel::H100Pcie => "H100 PCIe",
            GpuModel::H200 => "H200",
            GpuModel::B100 => "B100",
            GpuModel::B200 => "B200",
            GpuModel::A100_80GB => "A100 80GB",
            GpuModel::A100_40GB => "A100 40GB",
            GpuModel::A40 => "A40",
            GpuModel::A6000 => "RTX A6000",
            GpuModel::L40S => "L40S",
            GpuModel::V100 => "V100",
            GpuModel::P100 => "P100",
            GpuModel::Other(name) => name,
        }
    }

    /// Count field in the per-university document (`h100_sxm_count`, ...)
    pub fn count_field(&self) -> Option<&'static str> {
        let field = match self {
            GpuModel::H100Sxm => "h100_sxm_count",
            GpuModel::H100Pcie => "h100_pcie_count",
            GpuModel::H200 => "h200_count",
            GpuModel::B100 => "b100_count",
            GpuModel::B200 => "b200_count",
            GpuModel::A100_80GB => "a100_80gb_count",
            GpuModel::A100_40GB => "a100_40gb_count",
            GpuModel::A40 => "a40_count",
            GpuModel::A6000 => "a6000_count",
            GpuModel::L40S => "l40s_count",
            GpuModel::V100 => "v100_count",
            GpuModel::P100 => "p100_count",
            GpuModel::Other(_) => return None,
        };
        Some(field)
    }

    /// Output column header for a known model (`H100_SXM`, `RTX_A6000`, ...)
    pub fn column(&self) -> String {
        self.name().replace(' ', "_")
    }

    /// Resolve a free-form model name.
    ///
    /// Matching ignores case, punctuation and an `NVIDIA` prefix, so
    /// `"NVIDIA H100 SXM"`, `"h100_sxm"` and `"H100-SXM"` are the same model.
    /// Unmatched names become [`GpuModel::Other`] with the trimmed input.
    pub fn from_name(name: &str) -> GpuModel {
        let key = model_key(name);
        for model in GpuModel::KNOWN {
            if model_key(model.name()) == key {
                return model;
            }
        }
        let alias = match key.as_str() {
            "h100" => Some(GpuModel::H100Sxm),
            "a6000" => Some(GpuModel::A6000),
            "a10080g" | "a100" => Some(GpuModel::A100_80GB),
            "a10040g" => Some(GpuModel::A100_40GB),
            _ => None,
        };
        alias.unwrap_or_else(|| {
            let trimmed = name.trim();
            GpuModel::Other(trimmed.strip_prefix("NVIDIA ").unwrap_or(trimmed).to_string())
        })
    }
}

pub(crate) fn model_key(name: &str) -> String {
    let key: String = name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match key.strip_prefix("nvidia") {
        Some(rest) => rest.to_string(),
        None => key,
    }
}

impl fmt::Display for GpuModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Who controls access to a GPU line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    UniversityOwned,
    Shared,
    Grant,
    Cloud,
    Restricted,
}

impl Ownership {
    /// Ownership assumed when a tag is absent or unrecognized.
    ///
    /// Undercounting is preferred to overcounting.
    pub const FAIL_CLOSED: Ownership = Ownership::Shared;

    /// Parse an ownership tag, falling back to [`Ownership::FAIL_CLOSED`].
    pub fn from_tag(tag: Option<&str>) -> Ownership {
        let Some(tag) = tag else {
            return Ownership::FAIL_CLOSED;
        };
        match tag.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "university_owned" | "owned" | "university" => Ownership::UniversityOwned,
            "shared" => Ownership::Shared,
            "grant" => Ownership::Grant,
            "cloud" => Ownership::Cloud,
            "restricted" => Ownership::Restricted,
            _ => Ownership::FAIL_CLOSED,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Ownership::UniversityOwned => "university_owned",
            Ownership::Shared => "shared",
            Ownership::Grant => "grant",
            Ownership::Cloud => "cloud",
            Ownership::Restricted => "restricted",
        }
    }
}

/// Kind of facility hosting a GPU line item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facility {
    #[default]
    Campus,
    /// National or regional supercomputing center
    NationalCenter,
    /// DOE national laboratory
    DoeLab,
    CloudProvider,
    /// Allocation or grant-walled national system
    AllocationSystem,
    /// Cluster operated by a consortium of members
    Consortium,
}

/// Partition of a consortium cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Partition {
    #[default]
    General,
    /// Reserved exclusively for one member university (by university id)
    Dedicated { member: String },
}

/// One GPU inventory entry reported for a university.
#[derive(Debug, Clone, PartialEq)]
pub struct GpuLineItem {
    pub model: GpuModel,
    pub count: u64,
    pub ownership: Ownership,
    pub facility: Facility,
    pub partition: Partition,
    pub source_urls: Vec<String>,
    /// Upstream price estimate for models missing from the price table
    pub estimated_price_usd: Option<f64>,
}

impl GpuLineItem {
    /// A university-owned campus item
    pub fn owned(model: GpuModel, count: u64, source_urls: Vec<String>) -> Self {
        GpuLineItem {
            model,
            count,
            ownership: Ownership::UniversityOwned,
            facility: Facility::Campus,
            partition: Partition::General,
            source_urls,
            estimated_price_usd: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    #[default]
    Reported,
    Estimated,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Reported => "reported",
            Confidence::Estimated => "estimated",
        }
    }
}

/// CS department enrollment by level.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StudentCount {
    pub undergrad: u64,
    pub grad: u64,
    pub phd: u64,
    /// Period label (e.g. "2024" or "Fall 2024")
    pub as_of: String,
    pub confidence: Confidence,
    /// Required when `confidence` is [`Confidence::Estimated`]
    pub rationale: Option<String>,
}

/// Validated per-university input.
#[derive(Debug, Clone, PartialEq)]
pub struct UniversityRecord {
    pub university_id: String,
    pub name: String,
    pub url: Option<String>,
    pub retrieved_at: NaiveDateTime,
    pub gpu_items: Vec<GpuLineItem>,
    pub students: StudentCount,
    pub compute_credits_usd_per_year: f64,
    pub notes: String,
    pub source_urls: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_known_variants() {
        assert_eq!(GpuModel::from_name("H100 SXM"), GpuModel::H100Sxm);
        assert_eq!(GpuModel::from_name("NVIDIA H100 SXM"), GpuModel::H100Sxm);
        assert_eq!(GpuModel::from_name("h100_pcie"), GpuModel::H100Pcie);
        assert_eq!(GpuModel::from_name("RTX A6000"), GpuModel::A6000);
        assert_eq!(GpuModel::from_name("A6000"), GpuModel::A6000);
        assert_eq!(GpuModel::from_name("a100-80gb"), GpuModel::A100_80GB);
    }

    #[test]
    fn test_from_name_other() {
        assert_eq!(
            GpuModel::from_name("NVIDIA GH200"),
            GpuModel::Other("GH200".to_string())
        );
        assert_eq!(
            GpuModel::from_name(" MI300X "),
            GpuModel::Other("MI300X".to_string())
        );
    }

    #[test]
    fn test_count_fields_unique() {
        let mut fields: Vec<_> = GpuModel::KNOWN
            .iter()
            .filter_map(GpuModel::count_field)
            .collect();
        fields.sort_unstable();
        fields.dedup();
        assert_eq!(fields.len(), GpuModel::KNOWN.len());
    }

    #[test]
    fn test_ownership_fail_closed() {
        assert_eq!(Ownership::from_tag(None), Ownership::Shared);
        assert_eq!(Ownership::from_tag(Some("mystery")), Ownership::Shared);
        assert_eq!(
            Ownership::from_tag(Some("University-Owned")),
            Ownership::UniversityOwned
        );
        assert_eq!(Ownership::from_tag(Some("cloud")), Ownership::Cloud);
    }

    #[test]
    fn test_column_names() {
        assert_eq!(GpuModel::H100Sxm.column(), "H100_SXM");
        assert_eq!(GpuModel::A6000.column(), "RTX_A6000");
    }
}
