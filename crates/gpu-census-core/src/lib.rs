//! gpu-census-core: GPUs-per-student census engine
//!
//! This crate provides:
//! - Reference tables (GPU market prices, university roster)
//! - Parsing of validated per-university documents
//! - Ownership-based exclusion of shared, cloud and grant-walled GPUs
//! - Conversion to H100-equivalents and weighted student counts
//! - Deterministic aggregation, ranking and CSV/JSON output
//! - Publishing to the static site's data directory
//!
//! The engine is pure: configuration and reference data are passed in
//! explicitly, and identical inputs produce byte-identical output.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod exclusion;
pub mod model;
pub mod normalize;
pub mod output;
pub mod publish;
pub mod record;
pub mod reference;
pub mod source;

// Re-exports
pub use aggregate::{aggregate, deduplicate, rank_order, MasterTable, RankedUniversity};
pub use config::{
    default_config_path, load_config, CensusConfig, Config, Paths, StudentWeights,
};
pub use error::{RecordError, ReferenceError};
pub use exclusion::{effective_ownership, filter, ExclusionAudit, Filtered};
pub use model::{
    Confidence, Facility, GpuLineItem, GpuModel, Ownership, Partition, StudentCount,
    UniversityRecord,
};
pub use normalize::{
    credit_h100_equivalent, h100_equivalent, normalize, weighted_students, Conversion,
    NormalizedUniversity, UnknownModel,
};
pub use output::{leaderboard, write_audit_json, write_master_csv, write_outputs};
pub use publish::{publish, web_document_name, PublishStats};
pub use record::parse_document;
pub use reference::{slugify, PriceTable, Roster, RosterEntry};
pub use source::{DirectorySource, LoadOutcome, RecordSource, StudentCacheMerge};

/// Load, aggregate and return the master table for everything a source yields.
///
/// Rejected documents are carried into the table's issues.
pub fn build_table<S: RecordSource>(
    source: &S,
    prices: &PriceTable,
    config: &CensusConfig,
) -> anyhow::Result<MasterTable> {
    let outcome = source.records()?;
    Ok(table_from_outcome(outcome, prices, config))
}

pub fn table_from_outcome(
    outcome: LoadOutcome,
    prices: &PriceTable,
    config: &CensusConfig,
) -> MasterTable {
    let mut table = aggregate(&outcome.records, prices, config);
    table.record_rejections(outcome.rejected);
    table
}
