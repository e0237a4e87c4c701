use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tally_coda::{CodaConfig, DEFAULT_BASE_URL, PAGE_SIZE};
use tally_core::DEFAULT_KEEP;
use tally_finance::{DimensionSpec, TransactionRecipe};

use crate::state::default_config_path;

/// Overrides `coda.api_key_file` when set.
pub const API_KEY_ENV: &str = "TALLY_CODA_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IANA zone used for export file stamps
    pub timezone: String,
    pub coda: CodaSection,
    pub transactions: TransactionRecipe,
    pub dimensions: Vec<DimensionSpec>,
    pub export: ExportSection,
    pub csv: CsvSection,
    pub mongo: MongoSection,
    pub sheets: SheetsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CodaSection {
    pub base_url: String,
    pub doc_id: String,
    /// File holding the API token, relative to the working directory
    pub api_key_file: PathBuf,
    pub page_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSection {
    pub dir: PathBuf,
    pub prefix: String,
    pub keep: usize,
}

/// Directory of `{collection}.csv` files used by `sync --sink csv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvSection {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MongoSection {
    pub uri: String,
    pub database: String,
    pub connect_timeout_ms: u64,
    /// Create missing collections instead of failing with not-found
    pub create_collections: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetsSection {
    /// Service-account key JSON
    pub service_account: PathBuf,
    /// Spreadsheet id from the sheet URL
    pub doc_id: String,
    /// Worksheet the transactions collection lives in
    pub worksheet: String,
    pub backup_dir: PathBuf,
    pub backup_keep: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: "Asia/Singapore".to_string(),
            coda: CodaSection::default(),
            transactions: TransactionRecipe::default(),
            dimensions: DimensionSpec::defaults(),
            export: ExportSection::default(),
            csv: CsvSection::default(),
            mongo: MongoSection::default(),
            sheets: SheetsSection::default(),
        }
    }
}

impl Default for CodaSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            doc_id: "nADf8mVx-6".to_string(),
            api_key_file: PathBuf::from("API_KEY.txt"),
            page_size: PAGE_SIZE,
        }
    }
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            prefix: "Trans".to_string(),
            keep: DEFAULT_KEEP,
        }
    }
}

impl Default for CsvSection {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("ledger"),
        }
    }
}

impl Default for MongoSection {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "finance".to_string(),
            connect_timeout_ms: 2000,
            create_collections: true,
        }
    }
}

impl Default for SheetsSection {
    fn default() -> Self {
        Self {
            service_account: PathBuf::from("service_account.json"),
            doc_id: String::new(),
            worksheet: "Sheet1".to_string(),
            backup_dir: PathBuf::from("."),
            backup_keep: DEFAULT_KEEP,
        }
    }
}

impl MongoSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Config {
    /// Token from `TALLY_CODA_API_KEY`, else the first line of `api_key_file`.
    pub fn api_key(&self) -> Result<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                return Ok(key.trim().to_string());
            }
        }

        let p = &self.coda.api_key_file;
        let s = fs::read_to_string(p).with_context(|| {
            format!("read {} (or set {API_KEY_ENV})", p.display())
        })?;
        let key = s.lines().next().unwrap_or_default().trim();
        if key.is_empty() {
            bail!("{} is empty", p.display());
        }
        Ok(key.to_string())
    }

    pub fn coda_config(&self) -> Result<CodaConfig> {
        let mut cfg = CodaConfig::new(&self.coda.doc_id, self.api_key()?)
            .with_base_url(&self.coda.base_url);
        cfg.page_size = self.coda.page_size;
        Ok(cfg)
    }
}

pub fn config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(p) => Ok(p.to_path_buf()),
        None => default_config_path(),
    }
}

pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let p = config_path(explicit)?;
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
    let cfg: Config =
        toml::from_str(&s).with_context(|| format!("parse {}", p.display()))?;
    tally_core::time::parse_timezone(&cfg.timezone)?;
    Ok(cfg)
}

pub fn save_config(path: &Path, cfg: &Config) -> Result<()> {
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

pub fn init_config(explicit: Option<&Path>) -> Result<()> {
    let p = config_path(explicit)?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config(&p, &Config::default())?;
    println!("Wrote {}", p.display());
    Ok(())
}
