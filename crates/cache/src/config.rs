//! Cache configuration with precedence and validation
//!
//! Configuration comes from defaults, then a file, then environment
//! variables. The file is either JSON (`.json` extension) or the classic
//! `cachefilesd.conf` directive format:
//!
//! ```text
//! dir /var/cache/fscache
//! tag mycache
//! brun 10%
//! bcull 7%
//! bstop 3%
//! ```

use crate::errors::{CacheError, RecoveryHint, Result, SerializationOp};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Run/cull/stop thresholds for one resource, as percentages of its total
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermarks {
    /// Culling stops once free space is back above this
    pub run: u8,
    /// Culling starts below this
    pub cull: u8,
    /// New data is refused below this
    pub stop: u8,
}

impl Default for Watermarks {
    fn default() -> Self {
        Self {
            run: 7,
            cull: 5,
            stop: 1,
        }
    }
}

impl Watermarks {
    fn validate(&self, resource: &str) -> Result<()> {
        if self.run >= 100 {
            return Err(CacheError::configuration(format!(
                "{resource} run limit {}% must be below 100%",
                self.run
            )));
        }
        if self.cull >= self.run {
            return Err(CacheError::configuration(format!(
                "{resource} cull limit {}% must be below the run limit {}%",
                self.cull, self.run
            )));
        }
        if self.stop >= self.cull {
            return Err(CacheError::configuration(format!(
                "{resource} stop limit {}% must be below the cull limit {}%",
                self.stop, self.cull
            )));
        }
        Ok(())
    }
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Directory holding the cache
    pub root_dir: PathBuf,
    /// Name of this cache instance
    pub tag: String,
    /// Block (space) watermarks
    pub blocks: Watermarks,
    /// File (inode) watermarks
    pub files: Watermarks,
    /// Number of workers copying pages for completed backing reads
    pub copier_workers: usize,
    /// Pages kept in each backing file's page cache (0 for unbounded)
    pub backing_pages_per_file: usize,
    /// Whether the culler runs at all
    pub culling_enabled: bool,
    /// Seconds between periodic capacity checks; with 0 the culler only
    /// wakes when a request finds free space below a cull limit
    pub cull_interval_secs: u64,
    /// Objects culled per culler pass
    pub cull_batch: usize,
    /// Backing I/O errors tolerated before the cache withdraws (0 for no limit)
    pub io_error_limit: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/var/cache/fscache"),
            tag: "CacheFiles".to_string(),
            blocks: Watermarks::default(),
            files: Watermarks::default(),
            copier_workers: 2,
            backing_pages_per_file: 256,
            culling_enabled: true,
            cull_interval_secs: 30,
            cull_batch: 64,
            io_error_limit: 0,
        }
    }
}

impl CacheConfig {
    /// Check the watermark ordering and worker counts
    pub fn validate(&self) -> Result<()> {
        self.blocks.validate("block")?;
        self.files.validate("file")?;
        if self.copier_workers == 0 {
            return Err(CacheError::configuration(
                "at least one copier worker is required",
            ));
        }
        if self.tag.is_empty() || self.tag.contains(char::is_whitespace) {
            return Err(CacheError::configuration(format!(
                "invalid cache tag '{}'",
                self.tag
            )));
        }
        Ok(())
    }

    pub fn cull_interval(&self) -> Duration {
        Duration::from_secs(self.cull_interval_secs)
    }
}

/// Source of configuration for debugging and precedence tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default configuration
    Default,
    /// Configuration file
    ConfigFile(PathBuf),
    /// Environment variable
    EnvironmentVariable(String),
    /// Command line argument
    CommandLine,
}

/// Builder for creating cache configurations
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
        }
    }

    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.config.root_dir = root_dir.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.config.tag = tag.into();
        self
    }

    pub fn with_block_watermarks(mut self, run: u8, cull: u8, stop: u8) -> Self {
        self.config.blocks = Watermarks { run, cull, stop };
        self
    }

    pub fn with_file_watermarks(mut self, run: u8, cull: u8, stop: u8) -> Self {
        self.config.files = Watermarks { run, cull, stop };
        self
    }

    pub fn with_copier_workers(mut self, workers: usize) -> Self {
        self.config.copier_workers = workers;
        self
    }

    pub fn with_backing_pages_per_file(mut self, pages: usize) -> Self {
        self.config.backing_pages_per_file = pages;
        self
    }

    pub fn with_culling(mut self, enabled: bool) -> Self {
        self.config.culling_enabled = enabled;
        self
    }

    pub fn with_cull_interval(mut self, interval: Duration) -> Self {
        self.config.cull_interval_secs = interval.as_secs();
        self
    }

    pub fn with_cull_batch(mut self, batch: usize) -> Self {
        self.config.cull_batch = batch;
        self
    }

    pub fn with_io_error_limit(mut self, limit: u32) -> Self {
        self.config.io_error_limit = limit;
        self
    }

    /// Validate and build the configuration
    pub fn build(self) -> Result<CacheConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for CacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration loader that handles precedence
pub struct CacheConfigLoader;

impl CacheConfigLoader {
    /// Load defaults, then `path` if given, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<(CacheConfig, ConfigSource)> {
        let mut config = CacheConfig::default();
        let mut source = ConfigSource::Default;

        if let Some(path) = path {
            config = Self::load_from_file(path)?;
            source = ConfigSource::ConfigFile(path.to_path_buf());
        }

        if Self::apply_env(&mut config)? {
            source = ConfigSource::EnvironmentVariable("CACHEFILES_*".to_string());
        }

        config.validate()?;
        Ok((config, source))
    }

    /// Read a JSON or directive-format configuration file
    pub fn load_from_file(path: &Path) -> Result<CacheConfig> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                return Err(CacheError::Io {
                    path: path.to_path_buf(),
                    operation: "read config file",
                    source: e,
                    recovery_hint: RecoveryHint::CheckPermissions {
                        path: path.to_path_buf(),
                    },
                })
            }
        };

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).map_err(|e| CacheError::Serialization {
                context: path.display().to_string(),
                operation: SerializationOp::Deserialize,
                source: Box::new(e),
                recovery_hint: RecoveryHint::Custom("Check config file syntax".to_string()),
            })
        } else {
            Self::parse_directives(&content)
        }
    }

    /// Parse `cachefilesd.conf` style directives
    pub fn parse_directives(content: &str) -> Result<CacheConfig> {
        let mut config = CacheConfig::default();

        for (number, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (command, arg) = match line.split_once(char::is_whitespace) {
                Some((command, arg)) => (command, arg.trim()),
                None => (line, ""),
            };

            match command {
                "dir" => config.root_dir = PathBuf::from(require_arg(number, command, arg)?),
                "tag" => config.tag = require_arg(number, command, arg)?.to_string(),
                "brun" => config.blocks.run = parse_percent(number, command, arg)?,
                "bcull" => config.blocks.cull = parse_percent(number, command, arg)?,
                "bstop" => config.blocks.stop = parse_percent(number, command, arg)?,
                "frun" => config.files.run = parse_percent(number, command, arg)?,
                "fcull" => config.files.cull = parse_percent(number, command, arg)?,
                "fstop" => config.files.stop = parse_percent(number, command, arg)?,
                "nocull" => config.culling_enabled = false,
                "culltable" | "secctx" | "debug" => {
                    tracing::debug!("Ignoring directive '{command}' on line {}", number + 1);
                }
                _ => {
                    return Err(CacheError::configuration(format!(
                        "unknown directive '{command}' on line {}",
                        number + 1
                    )))
                }
            }
        }

        Ok(config)
    }

    /// Apply `CACHEFILES_*` overrides, returning whether any were set
    fn apply_env(config: &mut CacheConfig) -> Result<bool> {
        let mut has_env_config = false;

        if let Ok(dir) = std::env::var("CACHEFILES_DIR") {
            config.root_dir = PathBuf::from(dir);
            has_env_config = true;
        }

        if let Ok(tag) = std::env::var("CACHEFILES_TAG") {
            config.tag = tag;
            has_env_config = true;
        }

        if let Ok(workers) = std::env::var("CACHEFILES_COPIER_WORKERS") {
            config.copier_workers = workers.parse().map_err(|_| {
                CacheError::configuration(format!(
                    "CACHEFILES_COPIER_WORKERS must be a number, got '{workers}'"
                ))
            })?;
            has_env_config = true;
        }

        Ok(has_env_config)
    }
}

fn require_arg<'a>(number: usize, command: &str, arg: &'a str) -> Result<&'a str> {
    if arg.is_empty() {
        return Err(CacheError::configuration(format!(
            "directive '{command}' on line {} needs an argument",
            number + 1
        )));
    }
    Ok(arg)
}

fn parse_percent(number: usize, command: &str, arg: &str) -> Result<u8> {
    let value = require_arg(number, command, arg)?;
    let digits = value.strip_suffix('%').unwrap_or(value);
    match digits.parse::<u8>() {
        Ok(percent) if percent < 100 => Ok(percent),
        _ => Err(CacheError::configuration(format!(
            "directive '{command}' on line {} needs a percentage below 100, got '{value}'",
            number + 1
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_cache_config_builder() {
        let config = CacheConfigBuilder::new()
            .with_tag("test")
            .with_block_watermarks(20, 10, 5)
            .with_copier_workers(4)
            .build()
            .unwrap();

        assert_eq!(config.tag, "test");
        assert_eq!(config.blocks.cull, 10);
        assert_eq!(config.copier_workers, 4);
    }

    #[test]
    fn test_watermark_ordering_is_enforced() {
        let result = CacheConfigBuilder::new()
            .with_file_watermarks(5, 5, 1)
            .build();
        assert!(matches!(result, Err(CacheError::Configuration { .. })));

        let result = CacheConfigBuilder::new()
            .with_block_watermarks(7, 5, 6)
            .build();
        assert!(result.is_err());

        assert!(CacheConfigBuilder::new().with_copier_workers(0).build().is_err());
    }

    #[test]
    fn test_parse_directives() {
        let config = CacheConfigLoader::parse_directives(
            "# cachefilesd configuration\n\
             dir /srv/fscache\n\
             tag mycache\n\
             brun 10%\n\
             bcull 7%\n\
             bstop 3%\n\
             frun 10\n\
             secctx system_u:system_r:cachefiles_kernel_t:s0\n",
        )
        .unwrap();

        assert_eq!(config.root_dir, PathBuf::from("/srv/fscache"));
        assert_eq!(config.tag, "mycache");
        assert_eq!(
            config.blocks,
            Watermarks {
                run: 10,
                cull: 7,
                stop: 3
            }
        );
        assert_eq!(config.files.run, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_directives_rejects_garbage() {
        assert!(CacheConfigLoader::parse_directives("brun 150%").is_err());
        assert!(CacheConfigLoader::parse_directives("brun lots").is_err());
        assert!(CacheConfigLoader::parse_directives("dir").is_err());
        assert!(CacheConfigLoader::parse_directives("frobnicate 1").is_err());
    }

    #[test]
    #[serial]
    fn test_load_json_file_with_env_override() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cachefiles.json");
        std::fs::write(
            &path,
            r#"{ "tag": "fromfile", "copier_workers": 3, "blocks": { "run": 30, "cull": 20, "stop": 10 } }"#,
        )
        .unwrap();

        std::env::remove_var("CACHEFILES_DIR");
        std::env::remove_var("CACHEFILES_COPIER_WORKERS");
        std::env::set_var("CACHEFILES_TAG", "fromenv");
        let loaded = CacheConfigLoader::load(Some(&path));
        std::env::remove_var("CACHEFILES_TAG");

        let (config, source) = loaded?;
        assert_eq!(config.tag, "fromenv");
        assert_eq!(config.copier_workers, 3);
        assert_eq!(config.blocks.stop, 10);
        assert_eq!(config.files, Watermarks::default());
        assert_eq!(
            source,
            ConfigSource::EnvironmentVariable("CACHEFILES_*".to_string())
        );
        Ok(())
    }

    #[test]
    #[serial]
    fn test_load_directive_file() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cachefilesd.conf");
        std::fs::write(&path, "dir /tmp/cache\nnocull\n").unwrap();

        std::env::remove_var("CACHEFILES_DIR");
        std::env::remove_var("CACHEFILES_TAG");
        std::env::remove_var("CACHEFILES_COPIER_WORKERS");
        let (config, source) = CacheConfigLoader::load(Some(&path))?;

        assert_eq!(config.root_dir, PathBuf::from("/tmp/cache"));
        assert!(!config.culling_enabled);
        assert_eq!(source, ConfigSource::ConfigFile(path));
        Ok(())
    }

    #[test]
    #[serial]
    fn test_missing_file_is_an_io_error() {
        let result = CacheConfigLoader::load(Some(Path::new("/nonexistent/cachefilesd.conf")));
        assert!(matches!(result, Err(CacheError::Io { .. })));
    }
}
