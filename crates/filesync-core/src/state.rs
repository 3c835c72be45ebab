//! Persisted sync binding (`.gadget/sync.json`)
//!
//! Records which application and environment a directory is synced with,
//! and the last remote files version the local tree reflects for each
//! environment. The file has had several shapes over time; all of them are
//! read through [`PersistedState`] and written back in the current one.

use std::collections::BTreeMap;

use filesync_fs::{ConfigStore, Directory, NormalizedPath, ProjectPath};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Error, Result};

/// Environment the legacy single-environment file is migrated into.
pub const LEGACY_ENVIRONMENT: &str = "development";

/// What to bind the directory to.
#[derive(Debug, Clone)]
pub struct StateOptions {
    pub application: String,
    pub environment: String,
    /// Allow starting in a non-empty directory that has no state file.
    pub allow_unknown_directory: bool,
    /// Allow rebinding a directory synced with another application.
    pub allow_different_app: bool,
}

impl StateOptions {
    pub fn new(application: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            environment: environment.into(),
            allow_unknown_directory: false,
            allow_different_app: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentState {
    #[serde(rename = "filesVersion", with = "crate::remote::version_string")]
    pub files_version: u64,
}

/// The in-memory sync binding plus where it is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    application: String,
    environment: String,
    environments: BTreeMap<String, EnvironmentState>,
    path: NormalizedPath,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum PersistedState {
    Current {
        application: String,
        environment: String,
        environments: BTreeMap<String, EnvironmentState>,
    },
    Legacy {
        app: String,
        #[serde(rename = "filesVersion", with = "crate::remote::version_string")]
        files_version: u64,
        #[serde(default)]
        #[allow(dead_code)]
        mtime: Option<f64>,
    },
}

impl SyncState {
    /// Read the state file of `directory`, creating or rebinding it per
    /// `options`, and persist the result.
    pub fn load_or_init(directory: &Directory, options: &StateOptions) -> Result<Self> {
        let path = directory.absolute(ProjectPath::StateFile.as_str());
        let persisted: Option<PersistedState> = ConfigStore::new().load_optional(&path)?;

        let mut state = match persisted {
            Some(persisted) => Self::from_persisted(persisted, path),
            None => {
                if !options.allow_unknown_directory
                    && directory.has_entries_outside(ProjectPath::ReservedDir.as_str())?
                {
                    return Err(Error::UnknownDirectory {
                        path: directory.root().to_native(),
                    });
                }
                info!(application = %options.application, "initializing sync state");
                Self {
                    application: options.application.clone(),
                    environment: options.environment.clone(),
                    environments: BTreeMap::new(),
                    path,
                }
            }
        };

        if state.application != options.application {
            if !options.allow_different_app {
                return Err(Error::DifferentApplication {
                    found: state.application,
                    requested: options.application.clone(),
                });
            }
            warn!(
                from = %state.application,
                to = %options.application,
                "rebinding directory to a different application"
            );
            state.application = options.application.clone();
            state.environments.clear();
        }

        if state.environment != options.environment {
            info!(from = %state.environment, to = %options.environment, "switching environment");
            state.environment = options.environment.clone();
        }
        state.environments.entry(options.environment.clone()).or_default();

        state.write()?;
        Ok(state)
    }

    fn from_persisted(persisted: PersistedState, path: NormalizedPath) -> Self {
        match persisted {
            PersistedState::Current {
                application,
                environment,
                environments,
            } => Self {
                application,
                environment,
                environments,
                path,
            },
            PersistedState::Legacy {
                app, files_version, ..
            } => {
                info!(application = %app, "migrating single-environment sync state");
                Self {
                    application: app,
                    environment: LEGACY_ENVIRONMENT.to_string(),
                    environments: BTreeMap::from([(
                        LEGACY_ENVIRONMENT.to_string(),
                        EnvironmentState { files_version },
                    )]),
                    path,
                }
            }
        }
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Last remote files version recorded for the active environment.
    pub fn files_version(&self) -> u64 {
        self.environments
            .get(&self.environment)
            .map(|env| env.files_version)
            .unwrap_or_default()
    }

    /// Version recorded for any environment, if one was ever bound.
    pub fn environment_version(&self, environment: &str) -> Option<u64> {
        self.environments.get(environment).map(|env| env.files_version)
    }

    /// Record `version` for the active environment and persist atomically.
    pub fn save(&mut self, version: u64) -> Result<()> {
        self.environments
            .entry(self.environment.clone())
            .or_default()
            .files_version = version;
        self.write()
    }

    fn write(&self) -> Result<()> {
        let persisted = PersistedState::Current {
            application: self.application.clone(),
            environment: self.environment.clone(),
            environments: self.environments.clone(),
        };
        ConfigStore::new().save(&self.path, &persisted)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn open(temp: &TempDir) -> Directory {
        Directory::init(temp.path()).unwrap()
    }

    fn read_json(temp: &TempDir) -> serde_json::Value {
        let text = fs::read_to_string(temp.path().join(".gadget/sync.json")).unwrap();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn test_init_in_empty_directory() {
        let temp = TempDir::new().unwrap();
        let state = SyncState::load_or_init(&open(&temp), &StateOptions::new("shop", "development")).unwrap();

        assert_eq!(state.files_version(), 0);
        assert_eq!(
            read_json(&temp),
            serde_json::json!({
                "application": "shop",
                "environment": "development",
                "environments": { "development": { "filesVersion": "0" } }
            })
        );
    }

    #[test]
    fn test_init_refuses_unknown_directory() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("index.js"), "").unwrap();

        let err = SyncState::load_or_init(&open(&temp), &StateOptions::new("shop", "development")).unwrap_err();
        assert!(matches!(err, Error::UnknownDirectory { .. }));

        let options = StateOptions {
            allow_unknown_directory: true,
            ..StateOptions::new("shop", "development")
        };
        assert!(SyncState::load_or_init(&open(&temp), &options).is_ok());
    }

    #[test]
    fn test_ignored_entries_do_not_make_directory_unknown() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("node_modules/x")).unwrap();
        fs::write(temp.path().join("node_modules/x/index.js"), "").unwrap();

        assert!(SyncState::load_or_init(&open(&temp), &StateOptions::new("shop", "development")).is_ok());
    }

    #[test]
    fn test_save_round_trips_large_versions() {
        let temp = TempDir::new().unwrap();
        let options = StateOptions::new("shop", "development");
        let mut state = SyncState::load_or_init(&open(&temp), &options).unwrap();

        state.save(u64::MAX - 1).unwrap();

        let reloaded = SyncState::load_or_init(&open(&temp), &options).unwrap();
        assert_eq!(reloaded.files_version(), u64::MAX - 1);
        assert_eq!(read_json(&temp)["environments"]["development"]["filesVersion"], "18446744073709551614");
    }

    #[test]
    fn test_legacy_shape_is_migrated() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".gadget")).unwrap();
        fs::write(
            temp.path().join(".gadget/sync.json"),
            r#"{"app":"shop","filesVersion":"42","mtime":1700000000000}"#,
        )
        .unwrap();

        let state = SyncState::load_or_init(&open(&temp), &StateOptions::new("shop", "development")).unwrap();

        assert_eq!(state.environment(), LEGACY_ENVIRONMENT);
        assert_eq!(state.files_version(), 42);
        assert!(read_json(&temp).get("app").is_none(), "rewritten in the current shape");
    }

    #[test]
    fn test_environment_switch_preserves_versions() {
        let temp = TempDir::new().unwrap();
        let mut state = SyncState::load_or_init(&open(&temp), &StateOptions::new("shop", "development")).unwrap();
        state.save(7).unwrap();

        let production = SyncState::load_or_init(&open(&temp), &StateOptions::new("shop", "production")).unwrap();
        assert_eq!(production.files_version(), 0);
        assert_eq!(production.environment_version("development"), Some(7));

        let development = SyncState::load_or_init(&open(&temp), &StateOptions::new("shop", "development")).unwrap();
        assert_eq!(development.files_version(), 7);
    }

    #[test]
    fn test_different_application() {
        let temp = TempDir::new().unwrap();
        let mut state = SyncState::load_or_init(&open(&temp), &StateOptions::new("shop", "development")).unwrap();
        state.save(7).unwrap();

        let err = SyncState::load_or_init(&open(&temp), &StateOptions::new("blog", "development")).unwrap_err();
        assert!(matches!(err, Error::DifferentApplication { ref found, .. } if found == "shop"));

        let options = StateOptions {
            allow_different_app: true,
            ..StateOptions::new("blog", "development")
        };
        let rebound = SyncState::load_or_init(&open(&temp), &options).unwrap();
        assert_eq!(rebound.application(), "blog");
        assert_eq!(rebound.files_version(), 0);
    }

    #[test]
    fn test_invalid_version_is_a_parse_error() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join(".gadget")).unwrap();
        fs::write(
            temp.path().join(".gadget/sync.json"),
            r#"{"application":"shop","environment":"development","environments":{"development":{"filesVersion":"-1"}}}"#,
        )
        .unwrap();

        let err = SyncState::load_or_init(&open(&temp), &StateOptions::new("shop", "development")).unwrap_err();
        assert!(matches!(err, Error::Fs(filesync_fs::Error::ConfigParse { .. })));
    }
}
