use crate::pipeline::TrimOptions;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub trim: TrimConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrimConfig {
    /// Per-track read buffer in bytes; larger samples are copied in pieces
    #[serde(default = "default_read_buffer_bytes")]
    pub read_buffer_bytes: usize,

    /// Minimum source time between progress reports, in microseconds
    #[serde(default = "default_progress_interval")]
    pub progress_interval_micros: i64,
}

fn default_read_buffer_bytes() -> usize {
    TrimOptions::default().read_buffer_bytes
}

fn default_progress_interval() -> i64 {
    TrimOptions::default().progress_interval_micros
}

impl Default for TrimConfig {
    fn default() -> Self {
        Self {
            read_buffer_bytes: default_read_buffer_bytes(),
            progress_interval_micros: default_progress_interval(),
        }
    }
}

impl From<&TrimConfig> for TrimOptions {
    fn from(config: &TrimConfig) -> Self {
        TrimOptions {
            read_buffer_bytes: config.read_buffer_bytes,
            progress_interval_micros: config.progress_interval_micros,
        }
    }
}

impl Config {
    pub fn trim_options(&self) -> TrimOptions {
        TrimOptions::from(&self.trim)
    }
}
