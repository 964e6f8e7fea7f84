//! Integration tests for gpu-census-core
//!
//! These tests run the whole batch over a temporary documents directory:
//! - Load documents and reference tables from disk
//! - Aggregate, rank and serialize
//! - Check determinism and per-university failure isolation

use gpu_census_core::{
    aggregate, build_table, write_audit_json, write_master_csv, CensusConfig, DirectorySource,
    MasterTable, PriceTable, RecordError, RecordSource, Roster, StudentCacheMerge,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const PRICES: &str = "GPU,Price_USD\n\
NVIDIA H100 SXM,35000\n\
NVIDIA H100 PCIe,30000\n\
NVIDIA A100 80GB,15000\n\
NVIDIA A100 40GB,10000\n\
NVIDIA V100,3000\n";

const ROSTER: &str = "name,url\n\
Alpha University,https://alpha.edu\n\
Beta Institute of Technology,https://beta.edu\n\
Gamma College,https://gamma.edu\n\
Delta State University,https://delta.edu\n\
Epsilon University,https://epsilon.edu\n";

fn write_documents(dir: &Path) {
    // 10 owned A100 80GB, 100/50/20 students
    fs::write(
        dir.join("Alpha_University.json"),
        r#"{
  "university_name": "Alpha University",
  "data_retrieved_date": "2025-03-01",
  "sources": [
    {"url": "https://alpha.edu/research-computing", "data_found": "10 A100 80GB in the departmental cluster"},
    {"url": "NO_VALID_SOURCE", "data_found": "Cloud credits"}
  ],
  "student_data": {"undergrad_cs_count": 100, "grad_cs_count": 50, "phd_cs_count": 20, "year": "2024",
                   "source_url": "https://alpha.edu/cs/facts", "notes": "CS department fact sheet"},
  "gpu_resources": {"a100_80gb_count": 10, "notes": "Departmental cluster"},
  "compute_credits": {"total_annual_value_usd": 40000, "description": "Cloud research credits"}
}"#,
    )
    .unwrap();

    // Shared national system listed as a tagged line item
    fs::write(
        dir.join("Beta_Institute_of_Technology.json"),
        r#"{
  "university_name": "Beta Institute of Technology",
  "data_retrieved_date": "2025-03-02",
  "sources": ["https://beta.edu/hpc"],
  "student_data": {"undergrad_cs_count": 400, "grad_cs_count": 100, "phd_cs_count": 80},
  "gpu_resources": {
    "h100_sxm_count": 8,
    "line_items": [
      {"model": "H100 SXM", "count": 500, "ownership": "shared", "facility": "national_center",
       "source_urls": ["https://national-center.example/systems"]}
    ]
  }
}"#,
    )
    .unwrap();

    // No students reported: ratio undefined
    fs::write(
        dir.join("Gamma_College.json"),
        r#"{
  "university_name": "Gamma College",
  "data_retrieved_date": "2025-03-03",
  "sources": ["https://gamma.edu/it"],
  "gpu_resources": {"v100_count": 8}
}"#,
    )
    .unwrap();

    // Two documents with the same retrieval date
    for suffix in ["a", "b"] {
        fs::write(
            dir.join(format!("Delta_State_University_{suffix}.json")),
            r#"{
  "university_name": "Delta State University",
  "data_retrieved_date": "2025-03-04",
  "sources": ["https://delta.edu/hpc"],
  "student_data": {"undergrad_cs_count": 200},
  "gpu_resources": {"a100_40gb_count": 4}
}"#,
        )
        .unwrap();
    }

    // Negative count: malformed
    fs::write(
        dir.join("Epsilon_University.json"),
        r#"{
  "university_name": "Epsilon University",
  "data_retrieved_date": "2025-03-05",
  "student_data": {"undergrad_cs_count": -1}
}"#,
    )
    .unwrap();
}

fn setup() -> (TempDir, DirectorySource, PriceTable) {
    let dir = TempDir::new().unwrap();
    write_documents(dir.path());
    let roster = Roster::from_csv(ROSTER.as_bytes()).unwrap();
    let prices = PriceTable::from_csv(PRICES.as_bytes(), "H100 SXM").unwrap();
    let source = DirectorySource::new(dir.path(), roster, StudentCacheMerge::default());
    (dir, source, prices)
}

fn config() -> CensusConfig {
    CensusConfig {
        hourly_h100_rate_usd: 4.0,
        ..CensusConfig::default()
    }
}

fn csv_bytes(table: &MasterTable) -> Vec<u8> {
    let mut buf = Vec::new();
    write_master_csv(table, &mut buf).unwrap();
    buf
}

#[test]
fn test_full_batch() {
    let (_dir, source, prices) = setup();
    let table = build_table(&source, &prices, &config()).unwrap();

    let ids: Vec<_> = table
        .rows
        .iter()
        .map(|r| r.university.university_id.as_str())
        .collect();
    assert_eq!(
        ids,
        vec!["alpha_university", "beta_institute_of_technology", "gamma_college"]
    );

    let alpha = &table.rows[0].university;
    assert!((alpha.h100_equivalent_count - 10.0 * 15000.0 / 35000.0).abs() < 1e-9);
    assert!((alpha.weighted_student_count - 98.0).abs() < 1e-9);
    assert!((alpha.credit_derived_h100_equivalent - 40000.0 / (4.0 * 24.0 * 365.0)).abs() < 1e-12);
    assert_eq!(alpha.url.as_deref(), Some("https://alpha.edu"));
    assert_eq!(alpha.source_count, 2);

    // Shared national center GPUs never count
    let beta = &table.rows[1].university;
    assert_eq!(beta.h100_equivalent_count, 8.0);
    assert_eq!(beta.exclusions.dropped_gpus, 500);

    let gamma = &table.rows[2];
    assert!(gamma.university.undefined_ratio());
    assert_eq!(gamma.rank, None);

    assert_eq!(table.issues.len(), 2);
    assert!(matches!(
        &table.issues[0],
        RecordError::AmbiguousDuplicate { university, .. } if university == "delta_state_university"
    ));
    assert!(matches!(
        &table.issues[1],
        RecordError::MalformedInput { university, .. } if university == "epsilon_university"
    ));
    assert_eq!(table.malformed_count(), 1);
}

#[test]
fn test_output_byte_identical_across_runs() {
    let (_dir, source, prices) = setup();
    let first = build_table(&source, &prices, &config()).unwrap();
    let second = build_table(&source, &prices, &config()).unwrap();
    assert_eq!(csv_bytes(&first), csv_bytes(&second));

    let mut audit_a = Vec::new();
    let mut audit_b = Vec::new();
    write_audit_json(&first, &mut audit_a).unwrap();
    write_audit_json(&second, &mut audit_b).unwrap();
    assert_eq!(audit_a, audit_b);
}

#[test]
fn test_reordered_records_same_output() {
    let (_dir, source, prices) = setup();
    let outcome = source.records().unwrap();
    let expected = csv_bytes(&aggregate(&outcome.records, &prices, &config()));

    let mut records = outcome.records.clone();
    records.reverse();
    assert_eq!(csv_bytes(&aggregate(&records, &prices, &config())), expected);

    records.swap(0, 2);
    assert_eq!(csv_bytes(&aggregate(&records, &prices, &config())), expected);
}

#[test]
fn test_no_nan_or_infinity_in_output() {
    let (_dir, source, prices) = setup();
    let table = build_table(&source, &prices, &config()).unwrap();
    let text = String::from_utf8(csv_bytes(&table)).unwrap();
    assert!(!text.contains("NaN"));
    assert!(!text.contains("inf"));

    let gamma_line = text
        .lines()
        .find(|line| line.contains("gamma_college"))
        .unwrap();
    assert!(gamma_line.starts_with(",gamma_college,"));
    assert!(gamma_line.contains(",true,"));
}
