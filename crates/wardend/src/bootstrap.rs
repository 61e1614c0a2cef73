//! Configuration loading and the settings shared across a restart.

use std::ffi::OsString;
use std::sync::{Arc, PoisonError, RwLock};

use ortho_config::{OrthoConfig, OrthoError};

use warden_config::Config;

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the node configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader replaying a fixed argument list, so a reload reads the same
/// configuration sources as the initial load.
#[derive(Debug, Clone)]
pub struct ArgsConfigLoader {
    args: Vec<OsString>,
}

impl ArgsConfigLoader {
    /// Builds a loader for `args`, program name first.
    #[must_use]
    pub fn new(args: Vec<OsString>) -> Self {
        Self { args }
    }
}

impl ConfigLoader for ArgsConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load_from_iter(self.args.iter().cloned())
    }
}

/// Loader returning a configuration known up front.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Builds a loader that always yields `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Node settings, replaced wholesale when the node restarts.
#[derive(Debug, Clone)]
pub struct Settings {
    current: Arc<RwLock<Config>>,
}

impl Settings {
    /// Wraps the initial configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            current: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current configuration.
    #[must_use]
    pub fn snapshot(&self) -> Config {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the configuration, returning the previous one.
    pub fn replace(&self, config: Config) -> Config {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn replace_is_visible_to_every_clone() {
        let settings = Settings::new(Config::default());
        let reader = settings.clone();
        let previous = settings.replace(Config {
            temp_path: Some(PathBuf::from("/tmp/next")),
            ..Config::default()
        });
        assert_eq!(previous, Config::default());
        assert_eq!(
            reader.snapshot().temp_path.as_deref(),
            Some(PathBuf::from("/tmp/next").as_path())
        );
    }

    #[test]
    fn static_loader_returns_its_configuration() {
        let config = Config {
            cluster_enabled: Some(true),
            ..Config::default()
        };
        let loader = StaticConfigLoader::new(config.clone());
        assert_eq!(loader.load().expect("static load"), config);
    }
}
