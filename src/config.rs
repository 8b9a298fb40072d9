//! Configuration system using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. built-in defaults
//! 2. `timeline.toml` (or the file given on the command line)
//! 3. environment variables prefixed with `RUST_TIMELINE_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use rust_timeline::config::TimelineConfig;
//!
//! // RUST_TIMELINE_TIMELINE__MAXIMUM_SIZE=200 overrides the file value
//! let config = TimelineConfig::load(None)?;
//! config.validate()?;
//! println!("keeping {} frames", config.timeline.maximum_size);
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::tracing_setup::{parse_log_level, OutputFormat};
use anyhow::{ensure, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tl_core::limits::{validate_frame_size, DEFAULT_MAXIMUM_SIZE};
use tl_core::PixelType;
use tl_memory::{DumpPolicy, ManagerConfig, MemoryError};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "timeline.toml";

/// Prefix of overriding environment variables.
pub const ENV_PREFIX: &str = "RUST_TIMELINE_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Logging settings
    pub application: ApplicationConfig,
    /// Frame timeline geometry and capacity
    pub timeline: TimelineSection,
    /// Buffer manager settings
    pub memory: MemoryConfig,
    /// Producer/consumer harness settings
    pub soak: SoakConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format
    pub log_format: OutputFormat,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: OutputFormat::Pretty,
        }
    }
}

/// Frame timeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineSection {
    /// Entries kept before the oldest is evicted
    pub maximum_size: usize,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Components per pixel
    pub components: u32,
    /// Component sample type
    pub pixel_type: PixelType,
}

impl Default for TimelineSection {
    fn default() -> Self {
        Self {
            maximum_size: DEFAULT_MAXIMUM_SIZE,
            width: 640,
            height: 480,
            components: 1,
            pixel_type: PixelType::U16,
        }
    }
}

/// Buffer manager configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Dump file directory (system temp dir if unset)
    pub dump_dir: Option<PathBuf>,
    /// Automatic dumping strategy
    pub dump_policy: DumpPolicyConfig,
}

/// Dump policy as written in configuration files.
///
/// ```toml
/// [memory.dump_policy]
/// kind = "barrier"
/// barrier = "256MiB"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DumpPolicyConfig {
    /// Never dump
    #[default]
    Never,
    /// Dump every idle buffer
    Always,
    /// Cap resident bytes
    Barrier {
        /// Resident byte budget, e.g. "512MB"
        barrier: String,
    },
    /// Dump while free system memory is low
    Valve {
        /// Free-memory threshold
        min_free_mem: String,
        /// Extra bytes to free past the threshold
        hysteresis_offset: String,
    },
}

impl DumpPolicyConfig {
    /// Build the runtime policy, parsing the byte sizes.
    pub fn build(&self) -> Result<DumpPolicy, MemoryError> {
        let policy = match self {
            DumpPolicyConfig::Never => DumpPolicy::Never,
            DumpPolicyConfig::Always => DumpPolicy::Always,
            DumpPolicyConfig::Barrier { barrier } => {
                let mut policy = DumpPolicy::barrier(0);
                policy.set_param("barrier", barrier)?;
                policy
            }
            DumpPolicyConfig::Valve {
                min_free_mem,
                hysteresis_offset,
            } => {
                let mut policy = DumpPolicy::valve(0, 0);
                policy.set_param("min_free_mem", min_free_mem)?;
                policy.set_param("hysteresis_offset", hysteresis_offset)?;
                policy
            }
        };
        Ok(policy)
    }
}

/// Soak harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoakConfig {
    /// Run time in seconds
    pub duration_secs: u64,
    /// Interval between produced frames
    pub producer_period_ms: u64,
    /// Interval between consumer queries
    pub consumer_period_ms: u64,
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            duration_secs: 10,
            producer_period_ms: 10,
            consumer_period_ms: 5,
        }
    }
}

impl TimelineConfig {
    /// Load configuration from `path` (or [`DEFAULT_CONFIG_FILE`]) and the
    /// environment. A missing file is not an error.
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE))).extract()
    }

    /// Provider chain used by [`load`](Self::load).
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.application.log_level)?;

        let timeline = &self.timeline;
        ensure!(timeline.maximum_size > 0, "timeline.maximum_size must be > 0");
        ensure!(
            timeline.width > 0 && timeline.height > 0 && timeline.components > 0,
            "timeline dimensions must be > 0 (got {}x{}x{})",
            timeline.width,
            timeline.height,
            timeline.components
        );
        validate_frame_size(
            timeline.width,
            timeline.height,
            timeline.pixel_type.size() * timeline.components as usize,
        )
        .context("invalid timeline frame geometry")?;

        self.memory
            .dump_policy
            .build()
            .context("invalid memory.dump_policy")?;

        ensure!(
            self.soak.producer_period_ms > 0 && self.soak.consumer_period_ms > 0,
            "soak periods must be > 0"
        );
        Ok(())
    }

    /// Buffer manager settings derived from the `[memory]` section.
    pub fn manager_config(&self) -> Result<ManagerConfig> {
        Ok(ManagerConfig {
            dump_dir: self.memory.dump_dir.clone(),
            policy: self
                .memory
                .dump_policy
                .build()
                .context("invalid memory.dump_policy")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = TimelineConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config, TimelineConfig::default());
        assert_eq!(config.timeline.maximum_size, DEFAULT_MAXIMUM_SIZE);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_load_file() {
        let file = write_config(
            r#"
            [application]
            log_level = "debug"
            log_format = "json"

            [timeline]
            maximum_size = 50
            width = 10
            height = 20
            components = 3
            pixel_type = "u8"

            [memory]
            dump_dir = "/tmp/timeline-dumps"

            [memory.dump_policy]
            kind = "barrier"
            barrier = "1 MiB"
            "#,
        );

        let config = TimelineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.application.log_format, OutputFormat::Json);
        assert_eq!(config.timeline.maximum_size, 50);
        assert_eq!(config.timeline.pixel_type, PixelType::U8);
        assert_eq!(config.memory.dump_dir, Some(PathBuf::from("/tmp/timeline-dumps")));
        // Untouched sections keep defaults
        assert_eq!(config.soak, SoakConfig::default());
        config.validate().unwrap();

        let manager = config.manager_config().unwrap();
        assert_eq!(manager.policy.name(), "barrier");
        assert_eq!(manager.policy.param("barrier").as_deref(), Some("1MiB"));
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let file = write_config("[timeline]\nmaximum_size = 50\n");
        std::env::set_var("RUST_TIMELINE_TIMELINE__MAXIMUM_SIZE", "7");
        std::env::set_var("RUST_TIMELINE_MEMORY__DUMP_POLICY__KIND", "always");
        let config = TimelineConfig::load(Some(file.path()));
        std::env::remove_var("RUST_TIMELINE_TIMELINE__MAXIMUM_SIZE");
        std::env::remove_var("RUST_TIMELINE_MEMORY__DUMP_POLICY__KIND");

        let config = config.unwrap();
        assert_eq!(config.timeline.maximum_size, 7);
        assert_eq!(config.memory.dump_policy, DumpPolicyConfig::Always);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = TimelineConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        let mut config = TimelineConfig::default();
        config.timeline.maximum_size = 0;
        assert!(config.validate().is_err());

        let mut config = TimelineConfig::default();
        config.timeline.width = 100_000;
        assert!(config.validate().is_err());

        let mut config = TimelineConfig::default();
        config.memory.dump_policy = DumpPolicyConfig::Barrier {
            barrier: "-5MB".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valve_policy_build() {
        let policy = DumpPolicyConfig::Valve {
            min_free_mem: "512MiB".to_string(),
            hysteresis_offset: "64MiB".to_string(),
        }
        .build()
        .unwrap();
        assert_eq!(policy.name(), "valve");
        assert_eq!(policy.param("min_free_mem").as_deref(), Some("512MiB"));
        assert_eq!(policy.param("hysteresis_offset").as_deref(), Some("64MiB"));
    }

    #[test]
    fn test_unknown_policy_kind_rejected() {
        let result: Result<TimelineConfig, _> =
            Figment::from(Serialized::defaults(TimelineConfig::default()))
                .merge(Toml::string("[memory.dump_policy]\nkind = \"sometimes\"\n"))
                .extract();
        assert!(result.is_err());
    }
}
