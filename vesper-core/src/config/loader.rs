//! # Configuration Loading
//!
//! Loads configuration from defaults, a TOML file found on the search paths
//! and `VESPER_`-prefixed environment variables, then validates the result.

use crate::{
    config::{schema::VesperConfig, validator::ConfigValidator},
    Error, Result,
};
use std::{
    env,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

const CONFIG_NAMES: [&str; 2] = ["vesper.toml", "config.toml"];

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            search_paths: vec![
                PathBuf::from("."),
                PathBuf::from("./config"),
                dirs::config_dir().map_or_else(|| PathBuf::from("/etc"), |d| d.join("vesper")),
            ],
            env_prefix: "VESPER".to_string(),
        }
    }

    /// Add a search path for configuration files
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Replace the search paths
    pub fn with_search_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        self.search_paths = paths.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        self
    }

    /// Set the environment variable prefix
    pub fn with_env_prefix<S: AsRef<str>>(mut self, prefix: S) -> Self {
        self.env_prefix = prefix.as_ref().to_string();
        self
    }

    /// Load configuration from all available sources
    pub fn load(&self) -> Result<VesperConfig> {
        self.load_with_env(env::vars())
    }

    /// Load configuration using the given variables in place of the process
    /// environment
    pub fn load_with_env<I>(&self, vars: I) -> Result<VesperConfig>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config_value = toml::Value::try_from(VesperConfig::default())
            .map_err(|e| Error::configuration(format!("Failed to serialize default config: {e}")))?;

        if let Some(config_path) = self.find_config_file() {
            let file_config = Self::load_config_file(&config_path)?;
            merge_config(&mut config_value, file_config);
            info!("Loaded configuration file: {}", config_path.display());
        } else {
            debug!("No configuration file found in search paths");
        }

        let applied = self.apply_env_vars(&mut config_value, vars);
        debug!("Applied {applied} environment variables");

        let config: VesperConfig = config_value
            .try_into()
            .map_err(|e| Error::configuration(format!("Failed to deserialize config: {e}")))?;

        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, on top of the defaults
    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<VesperConfig> {
        let path = path.as_ref();
        info!("Loading configuration from file: {}", path.display());

        let config: VesperConfig = Self::load_config_file(path)?
            .try_into()
            .map_err(|e| Error::configuration(format!("Failed to parse config file: {e}")))?;

        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, config: &VesperConfig, path: P) -> Result<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| Error::configuration(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path.as_ref(), toml_string)?;
        info!("Configuration saved to: {}", path.as_ref().display());
        Ok(())
    }

    /// Get the effective search paths being used
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Get the environment prefix being used
    pub fn env_prefix(&self) -> &str {
        &self.env_prefix
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .flat_map(|dir| CONFIG_NAMES.iter().map(move |name| dir.join(name)))
            .find(|path| path.is_file())
    }

    fn load_config_file(path: &Path) -> Result<toml::Value> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        content.parse::<toml::Value>().map_err(|e| {
            Error::configuration(format!("Failed to parse config file {}: {e}", path.display()))
        })
    }

    /// Apply `PREFIX_SECTION_KEY=value` variables. The first `_` after the
    /// prefix separates the section from the key, so
    /// `VESPER_ACK_MAX_QUEUE_SIZE` sets `ack.max_queue_size`.
    fn apply_env_vars<I>(&self, config: &mut toml::Value, vars: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let prefix = format!("{}_", self.env_prefix);
        let mut applied = 0;

        for (key, value) in vars {
            let Some(rest) = key.strip_prefix(&prefix) else { continue };
            let rest = rest.to_lowercase();
            let Some((section, field)) = rest.split_once('_') else { continue };

            if let toml::Value::Table(root) = config {
                let entry = root
                    .entry(section.to_string())
                    .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
                if let toml::Value::Table(table) = entry {
                    table.insert(field.to_string(), parse_env_value(&value));
                    applied += 1;
                }
            }
        }

        applied
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_config(base: &mut toml::Value, override_value: toml::Value) {
    match (base, override_value) {
        (toml::Value::Table(base_table), toml::Value::Table(override_table)) => {
            for (key, value) in override_table {
                match base_table.get_mut(&key) {
                    Some(existing) if existing.is_table() && value.is_table() => {
                        merge_config(existing, value);
                    },
                    _ => {
                        base_table.insert(key, value);
                    },
                }
            }
        },
        (base, value) => *base = value,
    }
}

/// Parse environment variable value to the narrowest TOML type
fn parse_env_value(value: &str) -> toml::Value {
    if let Ok(bool_val) = value.parse::<bool>() {
        return toml::Value::Boolean(bool_val);
    }
    if let Ok(int_val) = value.parse::<i64>() {
        return toml::Value::Integer(int_val);
    }
    if let Ok(float_val) = value.parse::<f64>() {
        return toml::Value::Float(float_val);
    }
    toml::Value::String(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_config_loader_creation() {
        let loader = ConfigLoader::new();
        assert!(!loader.search_paths().is_empty());
        assert_eq!(loader.env_prefix(), "VESPER");
    }

    #[test]
    fn test_defaults_without_sources() {
        let dir = TempDir::new().unwrap();
        let config =
            ConfigLoader::new().with_search_paths([dir.path()]).load_with_env(vec![]).unwrap();
        assert_eq!(config, VesperConfig::default());
    }

    #[test]
    fn test_file_then_env_layering() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("vesper.toml"),
            "[ack]\nmax_queue_size = 10\ninitial_capacity = 4\n[logging]\nformat = \"json\"\n",
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_search_paths([dir.path()])
            .load_with_env(vars(&[
                ("VESPER_ACK_MAX_QUEUE_SIZE", "64"),
                ("VESPER_CLUSTER_NODE_URL", "node://a"),
                ("OTHER_ACK_INITIAL_CAPACITY", "1"),
            ]))
            .unwrap();

        assert_eq!(config.ack.max_queue_size, Some(64));
        assert_eq!(config.ack.initial_capacity, 4);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.cluster.node_url.as_deref(), Some("node://a"));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        let result = ConfigLoader::new()
            .with_search_paths([dir.path()])
            .load_with_env(vars(&[("VESPER_ACK_INITIAL_CAPACITY", "0")]));
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_save_and_load_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saved.toml");
        let loader = ConfigLoader::new();

        let mut config = VesperConfig::default();
        config.ack.max_queue_size = Some(32);
        loader.save_to_file(&config, &path).unwrap();

        assert_eq!(loader.load_from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_parse_env_value() {
        assert_eq!(parse_env_value("true"), toml::Value::Boolean(true));
        assert_eq!(parse_env_value("42"), toml::Value::Integer(42));
        assert_eq!(parse_env_value("2.5"), toml::Value::Float(2.5));
        assert_eq!(parse_env_value("hello"), toml::Value::String("hello".to_string()));
    }
}
