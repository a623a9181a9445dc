//! Configuration loader using figment.
//!
//! This module provides a layered configuration loading system:
//!
//! - **Multiple sources**: TOML files, environment variables, programmatic
//!   defaults
//! - **Layered configuration**: later sources override earlier ones
//! - **Profile support**: development vs production configurations
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Profile-specific config file (`courier.{profile}.toml`)
//! 3. Main config file (`courier.toml` / `config.toml`)
//! 4. Environment variables (`COURIER_*`)
//! 5. Programmatic overrides
//!
//! # Environment Variable Mapping
//!
//! Environment variables use the `COURIER_` prefix with `__` as separator:
//!
//! - `COURIER_TOKEN=1234:abc` → `token = "1234:abc"`
//! - `COURIER_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `COURIER_POLLING__DROP_PENDING=true` → `polling.drop_pending = true`
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_runtime::config::ConfigLoader;
//!
//! // Simple loading from default locations
//! let config = ConfigLoader::new().load()?;
//!
//! // Load from specific file with env overrides
//! let config = ConfigLoader::new()
//!     .file("./config/courier.toml")
//!     .with_env()
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(feature = "toml-config")]
use figment::providers::{Format, Toml};
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::CourierConfig;

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default)]
pub enum Profile {
    /// Development profile (default).
    #[default]
    Development,
    /// Production profile.
    Production,
    /// Custom profile name.
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Creates a profile from `COURIER_PROFILE` or defaults to Development.
    pub fn from_env() -> Self {
        std::env::var("COURIER_PROFILE")
            .map(|p| match p.to_lowercase().as_str() {
                "production" | "prod" => Self::Production,
                "development" | "dev" => Self::Development,
                other => Self::Custom(other.to_string()),
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Loads the configuration from default locations and the environment.
pub fn load_config() -> ConfigResult<CourierConfig> {
    ConfigLoader::new().with_current_dir().load()
}

/// Loads the configuration from a specific file, then the environment.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<CourierConfig> {
    ConfigLoader::new().file(path).load()
}

/// Configuration loader with figment-based multi-source support.
///
/// # Example
///
/// ```rust,ignore
/// let config = ConfigLoader::new()
///     .file("courier.toml")
///     .with_env()
///     .load()?;
/// ```
pub struct ConfigLoader {
    /// Base figment instance.
    figment: Figment,
    /// Configuration profile.
    profile: Profile,
    /// Search paths for configuration files.
    search_paths: Vec<PathBuf>,
    /// Whether to load environment variables.
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        let p = profile.into();
        self.profile = match p.to_lowercase().as_str() {
            "production" | "prod" => Profile::Production,
            "development" | "dev" => Profile::Development,
            _ => Profile::Custom(p),
        };
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds the current directory to search paths.
    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.search_path(cwd)
        } else {
            self
        }
    }

    /// Adds the user config directory to search paths.
    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.search_path(config_dir.join("courier"))
        } else {
            self
        }
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges additional configuration programmatically.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = ConfigLoader::new()
    ///     .merge(CourierConfig {
    ///         token: Some("1234:abc".to_string()),
    ///         ..Default::default()
    ///     })
    ///     .load()?;
    /// ```
    pub fn merge(mut self, config: CourierConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads, validates and returns the configuration.
    pub fn load(self) -> ConfigResult<CourierConfig> {
        let profile = self.profile.clone();
        let figment = self.build_figment()?;

        let config: CourierConfig = figment.extract().map_err(|e| {
            ConfigError::ParseError(format!("Failed to extract configuration: {e}"))
        })?;
        config.validate()?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Builds the figment instance with all sources.
    fn build_figment(mut self) -> ConfigResult<Figment> {
        // Start with defaults
        let mut figment = Figment::from(Serialized::defaults(CourierConfig::default()));

        // Load config files
        if let Some(path) = self.config_file.take() {
            if path.exists() {
                info!(path = %path.display(), "Loading configuration file");
                figment = Self::merge_config_file(figment, &path)?;
            } else {
                return Err(ConfigError::FileNotFound(path));
            }
        } else {
            figment = self.load_config_files(figment);
        }

        // Load environment variables
        if self.load_env {
            trace!("Loading environment variables with COURIER_ prefix");
            figment = figment.merge(
                Env::prefixed("COURIER_")
                    .split("__")
                    .map(|key| key.as_str().replace("__", ".").into()),
            );
        }

        // Programmatic overrides win over everything
        let user_figment = std::mem::take(&mut self.figment);
        figment = figment.merge(user_figment);

        Ok(figment)
    }

    /// Merges a single config file into the figment, dispatching on file
    /// extension. Only extensions enabled via feature flags are accepted.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            _ => Err(ConfigError::ParseError(format!(
                "Unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    /// Resolves the effective list of search paths.
    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if self.search_paths.is_empty() {
            let mut paths = Vec::new();
            if let Ok(cwd) = std::env::current_dir() {
                paths.push(cwd);
            }
            if let Some(config_dir) = dirs::config_dir() {
                paths.push(config_dir.join("courier"));
            }
            paths
        } else {
            self.search_paths.clone()
        }
    }

    /// Searches for and loads configuration files from search paths.
    ///
    /// A profile-specific variant (`courier.production.toml`) is merged
    /// before its base file: the base file overrides the variant on
    /// conflicting keys, while profile-only keys survive. The search stops
    /// at the first base file.
    #[cfg_attr(not(feature = "toml-config"), allow(unused_mut, unused_variables))]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        #[cfg(feature = "toml-config")]
        {
            let search_paths = self.resolve_search_paths();
            for search_path in &search_paths {
                for base_name in ["courier.toml", "config.toml"] {
                    let stem = base_name.trim_end_matches(".toml");

                    // Profile-specific: e.g. courier.production.toml
                    let profile_name = format!("{}.{}.toml", stem, self.profile.as_str());
                    let profile_path = search_path.join(&profile_name);
                    if profile_path.exists() {
                        debug!(path = %profile_path.display(), "Loading profile-specific config");
                        figment = figment.merge(Toml::file(&profile_path));
                    }

                    let base_path = search_path.join(base_name);
                    if base_path.exists() {
                        info!(path = %base_path.display(), "Loading configuration file");
                        return figment.merge(Toml::file(&base_path));
                    }
                }
            }
        }

        warn!("No configuration file found, using defaults");
        figment
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogLevel;

    #[test]
    fn test_default_config() {
        let config = ConfigLoader::new().without_env().load().unwrap();

        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.polling.timeout_secs, 20);
        assert!(config.token.is_none());
    }

    #[test]
    fn test_profile_from_env() {
        // SAFETY: This test is single-threaded and we clean up immediately after
        unsafe {
            std::env::set_var("COURIER_PROFILE", "production");
        }
        let profile = Profile::from_env();
        assert!(matches!(profile, Profile::Production));
        unsafe {
            std::env::remove_var("COURIER_PROFILE");
        }
    }

    #[test]
    fn test_programmatic_overrides_win() {
        let config = ConfigLoader::new()
            .without_env()
            .merge(CourierConfig {
                token: Some("1234567890:override".to_string()),
                ..Default::default()
            })
            .load()
            .unwrap();

        assert_eq!(config.token.as_deref(), Some("1234567890:override"));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join("courier-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("courier.toml");
        std::fs::write(
            &path,
            "token = \"1234567890:fromfile\"\n\n[polling]\ntimeout_secs = 30\ndrop_pending = true\n",
        )
        .unwrap();

        let config = ConfigLoader::new().without_env().file(&path).load().unwrap();
        assert_eq!(config.token.as_deref(), Some("1234567890:fromfile"));
        assert_eq!(config.polling.timeout_secs, 30);
        assert!(config.polling.drop_pending);
        // Untouched sections keep their defaults.
        assert_eq!(config.network.max_retries, 5);

        std::fs::remove_file(&path).unwrap();
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_base_file_overrides_the_profile_variant() {
        let dir = std::env::temp_dir().join("courier-config-profile-test");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("courier.staging.toml"),
            "token = \"1234567890:profile\"\n\n[polling]\nlimit = 25\n",
        )
        .unwrap();
        std::fs::write(dir.join("courier.toml"), "token = \"1234567890:base\"\n").unwrap();

        let config = ConfigLoader::new()
            .without_env()
            .profile("staging")
            .search_path(&dir)
            .load()
            .unwrap();

        // Conflicting keys come from the base file; profile-only keys survive.
        assert_eq!(config.token.as_deref(), Some("1234567890:base"));
        assert_eq!(config.polling.limit, Some(25));

        std::fs::remove_file(dir.join("courier.staging.toml")).unwrap();
        std::fs::remove_file(dir.join("courier.toml")).unwrap();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = ConfigLoader::new()
            .without_env()
            .file("/nonexistent/courier.toml")
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }
}
