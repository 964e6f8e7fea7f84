//! Configuration loading for gpu-census.
//!
//! Every section is optional; accessors fill in defaults. The resolved
//! [`CensusConfig`] is handed to the core explicitly.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    pub weights: Option<WeightsConfig>,
    pub pricing: Option<PricingConfig>,
    pub paths: Option<PathsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct WeightsConfig {
    pub undergrad: Option<f64>,
    pub grad: Option<f64>,
    pub phd: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PricingConfig {
    pub reference_model: Option<String>,
    pub hourly_h100_rate_usd: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PathsConfig {
    pub documents_dir: Option<PathBuf>,
    pub price_table: Option<PathBuf>,
    pub roster: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub audit: Option<PathBuf>,
    pub web_dir: Option<PathBuf>,
    #[serde(default)]
    pub student_cache_dirs: Vec<PathBuf>,
}

pub const DEFAULT_UNDERGRAD_WEIGHT: f64 = 0.45;
pub const DEFAULT_GRAD_WEIGHT: f64 = 0.7;
pub const DEFAULT_PHD_WEIGHT: f64 = 0.9;

/// Model whose market price defines one H100-equivalent
pub const DEFAULT_REFERENCE_MODEL: &str = "H100 SXM";

/// On-demand cloud price of one H100 hour (USD)
pub const DEFAULT_HOURLY_H100_RATE_USD: f64 = 2.5;

pub const DEFAULT_DOCUMENTS_DIR: &str = "data/cache/final";
pub const DEFAULT_PRICE_TABLE: &str = "data/gpu_prices.csv";
pub const DEFAULT_ROSTER: &str = "data/filtered_national_universities_name_url.csv";
pub const DEFAULT_OUTPUT: &str = "data/master_data.csv";
pub const DEFAULT_AUDIT: &str = "data/master_audit.json";
pub const DEFAULT_WEB_DIR: &str = "web/data";

/// Coefficients of the weighted student count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudentWeights {
    pub undergrad: f64,
    pub grad: f64,
    pub phd: f64,
}

impl Default for StudentWeights {
    fn default() -> Self {
        StudentWeights {
            undergrad: DEFAULT_UNDERGRAD_WEIGHT,
            grad: DEFAULT_GRAD_WEIGHT,
            phd: DEFAULT_PHD_WEIGHT,
        }
    }
}

/// Immutable run configuration consumed by the core.
#[derive(Debug, Clone, PartialEq)]
pub struct CensusConfig {
    pub weights: StudentWeights,
    pub reference_model: String,
    pub hourly_h100_rate_usd: f64,
}

impl Default for CensusConfig {
    fn default() -> Self {
        CensusConfig {
            weights: StudentWeights::default(),
            reference_model: DEFAULT_REFERENCE_MODEL.to_string(),
            hourly_h100_rate_usd: DEFAULT_HOURLY_H100_RATE_USD,
        }
    }
}

/// Resolved file locations for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Paths {
    pub documents_dir: PathBuf,
    pub price_table: PathBuf,
    pub roster: PathBuf,
    pub output: PathBuf,
    pub audit: PathBuf,
    pub web_dir: PathBuf,
    pub student_cache_dirs: Vec<PathBuf>,
}

impl Config {
    pub fn weights(&self) -> StudentWeights {
        let defaults = StudentWeights::default();
        let Some(w) = self.weights.as_ref() else {
            return defaults;
        };
        StudentWeights {
            undergrad: w.undergrad.unwrap_or(defaults.undergrad),
            grad: w.grad.unwrap_or(defaults.grad),
            phd: w.phd.unwrap_or(defaults.phd),
        }
    }

    pub fn reference_model(&self) -> String {
        self.pricing
            .as_ref()
            .and_then(|p| p.reference_model.clone())
            .unwrap_or_else(|| DEFAULT_REFERENCE_MODEL.to_string())
    }

    pub fn hourly_h100_rate_usd(&self) -> f64 {
        self.pricing
            .as_ref()
            .and_then(|p| p.hourly_h100_rate_usd)
            .unwrap_or(DEFAULT_HOURLY_H100_RATE_USD)
    }

    /// Build the core configuration, rejecting values that would make the
    /// arithmetic meaningless.
    pub fn census(&self) -> Result<CensusConfig> {
        let weights = self.weights();
        for (name, value) in [
            ("undergrad", weights.undergrad),
            ("grad", weights.grad),
            ("phd", weights.phd),
        ] {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("Invalid {name} weight: {value}");
            }
        }
        let rate = self.hourly_h100_rate_usd();
        if !rate.is_finite() || rate <= 0.0 {
            anyhow::bail!("Invalid hourly_h100_rate_usd: {rate}");
        }
        Ok(CensusConfig {
            weights,
            reference_model: self.reference_model(),
            hourly_h100_rate_usd: rate,
        })
    }

    pub fn paths(&self) -> Paths {
        let p = self.paths.clone().unwrap_or_default();
        Paths {
            documents_dir: p
                .documents_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCUMENTS_DIR)),
            price_table: p
                .price_table
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PRICE_TABLE)),
            roster: p.roster.unwrap_or_else(|| PathBuf::from(DEFAULT_ROSTER)),
            output: p.output.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            audit: p.audit.unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIT)),
            web_dir: p.web_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_WEB_DIR)),
            student_cache_dirs: p.student_cache_dirs,
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "gpu-census")
        .context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config =
        toml::from_str(&contents).context("Failed to parse config file as TOML")?;
    Ok(config)
}
