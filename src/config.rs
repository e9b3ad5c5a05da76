//! Pipeline and report configuration.
//!
//! Every field has a default so an empty TOML file is valid. The CLI layers its
//! flags on top of whatever the file provides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ReportError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding the raw grade exports.
    pub input_dir: PathBuf,
    /// File extension of the raw exports (without the dot).
    pub input_extension: String,
    /// Census roster with a `CPF` column.
    pub roster_path: PathBuf,
    pub output_dir: PathBuf,
    pub snapshot_file: String,
    pub absentee_file: String,
    /// Field separator of the exports and the roster.
    pub separator: char,
    /// Non-data rows above the header in each export.
    pub header_offset: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("Notas"),
            input_extension: "csv".to_string(),
            roster_path: PathBuf::from("censo_escolar.csv"),
            output_dir: PathBuf::from("dados_tratados"),
            snapshot_file: "df_EF_EM_bncc_censo.parquet".to_string(),
            absentee_file: "df_censo_ausentes.csv".to_string(),
            separator: ';',
            header_offset: 2,
        }
    }
}

impl PipelineConfig {
    pub fn snapshot_path(&self) -> PathBuf {
        self.output_dir.join(&self.snapshot_file)
    }

    pub fn absentee_path(&self) -> PathBuf {
        self.output_dir.join(&self.absentee_file)
    }

    /// Separator as the single byte the CSV reader expects.
    pub fn separator_byte(&self) -> Result<u8> {
        u8::try_from(self.separator)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                ReportError::Config(format!(
                    "separator must be a single ASCII character, got {:?}",
                    self.separator
                ))
            })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub snapshot_path: PathBuf,
    /// Lifetime of memoized option lists and filtered frames.
    pub memo_ttl_secs: u64,
    pub page_size: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            snapshot_path: PathBuf::from("dados_tratados/df_EF_EM_bncc_censo.parquet"),
            memo_ttl_secs: 300,
            page_size: 10,
        }
    }
}

impl ReportConfig {
    pub fn memo_ttl(&self) -> Duration {
        Duration::from_secs(self.memo_ttl_secs)
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ReportError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
