//! Monitoring configuration.
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::WsError;

/// Layers monitored when no allow-list is configured.
pub const DEFAULT_LAYERS: [&str; 5] = ["ConvLif2", "ConvLif3", "ConvLif4", "ConvLif5", "ConvLif6"];

/// Where the report is written when no output path is configured.
pub const DEFAULT_OUTPUT: &str = "test_plots/w_s_operation/ws_statistics.csv";

/// How interactions are counted for each observation.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountStrategy {
    /// Stream over the activation without building patches.
    #[default]
    Fused,
    /// Extract patches first, then count.
    Materialized,
}

/// Configuration of a measurement run.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Allow-list of monitored layer identifiers.
    pub layers: Vec<String>,
    pub strategy: CountStrategy,
    /// Path of the CSV report.
    pub output: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            layers: DEFAULT_LAYERS.iter().map(|layer| layer.to_string()).collect(),
            strategy: CountStrategy::default(),
            output: PathBuf::from(DEFAULT_OUTPUT),
        }
    }
}

impl MonitorConfig {
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<(), WsError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Load a configuration from a JSON file; missing fields take their default value.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<MonitorConfig, WsError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
