mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./trimforge.toml", "~/.config/trimforge/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            tracing::debug!("Using config file {:?}", path);
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.trim.read_buffer_bytes == 0 {
        anyhow::bail!("trim.read_buffer_bytes must be greater than 0");
    }

    if config.trim.progress_interval_micros <= 0 {
        anyhow::bail!("trim.progress_interval_micros must be greater than 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("trimforge.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn empty_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config(&write_config(&dir, "")).unwrap();
        assert_eq!(config.trim.read_buffer_bytes, 1024 * 1024);
        assert_eq!(config.trim.progress_interval_micros, 100_000);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[trim]\nread_buffer_bytes = 4096\n");
        let options = load_config(&path).unwrap().trim_options();
        assert_eq!(options.read_buffer_bytes, 4096);
        assert_eq!(options.progress_interval_micros, 100_000);
    }

    #[test]
    fn zero_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[trim]\nread_buffer_bytes = 0\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("read_buffer_bytes"));

        let path = write_config(&dir, "[trim]\nprogress_interval_micros = 0\n");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn malformed_toml_names_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[trim\n");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn explicit_missing_path_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_config_or_default(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
