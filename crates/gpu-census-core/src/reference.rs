//! Static reference tables: GPU market prices and the university roster.
//!
//! Both are plain CSV files refreshed as configuration updates. A price table
//! that cannot price the reference model is fatal to the run.

use crate::error::ReferenceError;
use crate::model::{model_key, GpuModel};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct PriceRow {
    #[serde(rename = "GPU")]
    gpu: String,
    #[serde(rename = "Price_USD")]
    price_usd: f64,
}

/// GPU model to market price (USD), with the reference model that defines
/// one H100-equivalent.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    prices: BTreeMap<String, f64>,
    reference: GpuModel,
    reference_price: f64,
}

fn price_key(model: &GpuModel) -> String {
    model_key(model.name())
}

impl PriceTable {
    /// Build a table from `(model name, price)` pairs.
    ///
    /// Names are resolved through [`GpuModel::from_name`], so `"NVIDIA H100 SXM"`
    /// and `"H100 SXM"` land on the same entry. Rows that collide on one model
    /// are logged; a row naming the model exactly beats one matched through an
    /// alias (`"A100"`), otherwise the later row wins.
    pub fn new<I, S>(entries: I, reference_model: &str) -> Result<Self, ReferenceError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut prices = BTreeMap::new();
        let mut exact = BTreeSet::new();
        for (name, price) in entries {
            let name = name.as_ref();
            let model = GpuModel::from_name(name);
            if !price.is_finite() || price <= 0.0 {
                return Err(ReferenceError::InvalidPrice {
                    model: model.name().to_string(),
                    price,
                });
            }
            let key = price_key(&model);
            let is_exact = model_key(name) == key;
            if let Some(previous) = prices.get(&key) {
                let keep_previous = exact.contains(&key) && !is_exact;
                let used = if keep_previous { *previous } else { price };
                tracing::warn!(
                    "Price row {name:?} (${price}) collides with {} (${previous}), using ${used}",
                    model.name()
                );
                if keep_previous {
                    continue;
                }
            }
            if is_exact {
                exact.insert(key.clone());
            }
            prices.insert(key, price);
        }
        if prices.is_empty() {
            return Err(ReferenceError::EmptyPriceTable);
        }

        let reference = GpuModel::from_name(reference_model);
        let reference_price = prices
            .get(&price_key(&reference))
            .copied()
            .ok_or_else(|| ReferenceError::MissingReferencePrice(reference.name().to_string()))?;

        Ok(PriceTable {
            prices,
            reference,
            reference_price,
        })
    }

    /// Parse a `GPU,Price_USD` CSV.
    pub fn from_csv<R: Read>(reader: R, reference_model: &str) -> Result<Self, ReferenceError> {
        let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut entries = Vec::new();
        for row in csv.deserialize() {
            let row: PriceRow = row?;
            entries.push((row.gpu, row.price_usd));
        }
        Self::new(entries, reference_model)
    }

    pub fn from_path(path: &Path, reference_model: &str) -> Result<Self, ReferenceError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv(file, reference_model)
    }

    pub fn price_of(&self, model: &GpuModel) -> Option<f64> {
        self.prices.get(&price_key(model)).copied()
    }

    pub fn reference(&self) -> &GpuModel {
        &self.reference
    }

    pub fn reference_price(&self) -> f64 {
        self.reference_price
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RosterRow {
    name: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
}

/// University roster, keyed by canonical id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    entries: BTreeMap<String, RosterEntry>,
    by_name: BTreeMap<String, String>,
}

impl Roster {
    pub fn new(entries: impl IntoIterator<Item = RosterEntry>) -> Self {
        let mut roster = Roster::default();
        for entry in entries {
            if roster.entries.contains_key(&entry.id) {
                tracing::warn!("Duplicate roster id {}, keeping first entry", entry.id);
                continue;
            }
            roster.by_name.insert(slugify(&entry.name), entry.id.clone());
            roster.entries.insert(entry.id.clone(), entry);
        }
        roster
    }

    /// Parse a `name,url[,id]` CSV. Rows without an id get the slug of their name.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self, ReferenceError> {
        let mut csv = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut entries = Vec::new();
        for row in csv.deserialize() {
            let row: RosterRow = row?;
            let id = row
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| slugify(&row.name));
            entries.push(RosterEntry {
                id,
                name: row.name,
                url: row.url.filter(|url| !url.is_empty()),
            });
        }
        if entries.is_empty() {
            return Err(ReferenceError::EmptyRoster);
        }
        Ok(Roster::new(entries))
    }

    pub fn from_path(path: &Path) -> Result<Self, ReferenceError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv(file)
    }

    /// Find a university by display name (punctuation and case insensitive)
    pub fn lookup(&self, name: &str) -> Option<&RosterEntry> {
        self.by_name
            .get(&slugify(name))
            .and_then(|id| self.entries.get(id))
    }

    pub fn get(&self, id: &str) -> Option<&RosterEntry> {
        self.entries.get(id)
    }

    /// Canonical id for a university name: the roster id when listed,
    /// otherwise the slug of the name.
    pub fn resolve_id(&self, name: &str) -> String {
        self.lookup(name)
            .map(|entry| entry.id.clone())
            .unwrap_or_else(|| slugify(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lowercase ASCII alphanumeric runs joined by `_`.
pub fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}
