use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use campusmind_api::{AuthToken, BackendConfig, DEFAULT_BASE_URL, SharedToken};
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::controller::{ControllerSettings, DEFAULT_STREAM_IDLE_TIMEOUT};

pub const SETTINGS_DIRECTORY_NAME: &str = "campusmind";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "CAMPUSMIND_";

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Client settings. Timeouts are whole seconds; `0` disables the timeout.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Settings")
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("stream_idle_timeout_secs", &self.stream_idle_timeout_secs)
            .finish()
    }
}

impl Settings {
    pub fn normalized(mut self) -> Self {
        self.api_base_url = if self.api_base_url.trim().is_empty() {
            default_api_base_url()
        } else {
            self.api_base_url.trim().to_string()
        };
        self.api_token = self
            .api_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        self
    }

    pub fn is_signed_in(&self) -> bool {
        self.api_token.is_some()
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(self.api_base_url.clone())
            .with_request_timeout(seconds(self.request_timeout_secs))
            .with_connect_timeout(seconds(self.connect_timeout_secs))
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            stream_idle_timeout: seconds(self.stream_idle_timeout_secs),
        }
    }

    pub fn token_provider(&self) -> SharedToken {
        SharedToken::new(self.api_token.as_deref().and_then(AuthToken::new))
    }
}

/// Settings loaded from `settings.json` with `CAMPUSMIND_*` environment overrides on top.
pub struct SettingsStore {
    settings: Arc<ArcSwap<Settings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".campusmind"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: Settings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_from_disk(path: &Path) -> Settings {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
        }

        // A missing file contributes nothing; environment overrides still apply.
        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        match figment.extract::<Settings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                Settings::default()
            }
        }
    }

    fn persist(&self, settings: &Settings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

fn default_api_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_stream_idle_timeout_secs() -> u64 {
    DEFAULT_STREAM_IDLE_TIMEOUT.as_secs()
}

#[cfg(test)]
mod tests {
    use campusmind_api::TokenProvider;
    use figment::Jail;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|jail| {
            let store = SettingsStore::new(jail.directory().join(SETTINGS_FILE_NAME));
            assert_eq!(*store.settings(), Settings::default());
            assert!(!store.settings().is_signed_in());
            Ok(())
        });
    }

    #[test]
    fn file_values_fill_in_over_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                SETTINGS_FILE_NAME,
                r#"{ "api_base_url": " https://campus.example/api ", "api_token": "jwt-1" }"#,
            )?;

            let store = SettingsStore::new(jail.directory().join(SETTINGS_FILE_NAME));
            let settings = store.settings();
            assert_eq!(settings.api_base_url, "https://campus.example/api");
            assert_eq!(settings.api_token.as_deref(), Some("jwt-1"));
            assert_eq!(settings.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(SETTINGS_FILE_NAME, r#"{ "stream_idle_timeout_secs": 60 }"#)?;
            jail.set_env("CAMPUSMIND_STREAM_IDLE_TIMEOUT_SECS", "0");
            jail.set_env("CAMPUSMIND_API_BASE_URL", "http://127.0.0.1:9000/api");

            let store = SettingsStore::new(jail.directory().join(SETTINGS_FILE_NAME));
            let settings = store.settings();
            assert_eq!(settings.api_base_url, "http://127.0.0.1:9000/api");
            assert_eq!(settings.controller_settings().stream_idle_timeout, None);
            Ok(())
        });
    }

    #[test]
    fn unparsable_file_falls_back_to_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(SETTINGS_FILE_NAME, "{ not json")?;
            let store = SettingsStore::new(jail.directory().join(SETTINGS_FILE_NAME));
            assert_eq!(*store.settings(), Settings::default());
            Ok(())
        });
    }

    #[test]
    fn update_persists_normalized_settings() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("nested").join(SETTINGS_FILE_NAME);
            let store = SettingsStore::new(path.clone());

            store
                .update(Settings {
                    api_token: Some("  jwt-2  ".to_string()),
                    ..Settings::default()
                })
                .expect("settings saved");
            assert_eq!(store.settings().api_token.as_deref(), Some("jwt-2"));

            let reloaded = SettingsStore::new(path);
            assert_eq!(reloaded.settings().api_token.as_deref(), Some("jwt-2"));
            Ok(())
        });
    }

    #[test]
    fn conversions_honour_zero_as_disabled() {
        let settings = Settings {
            api_token: Some("   ".to_string()),
            request_timeout_secs: 0,
            connect_timeout_secs: 5,
            ..Settings::default()
        }
        .normalized();

        assert!(settings.token_provider().token().is_none());
        assert_eq!(
            settings.backend_config(),
            BackendConfig::new(DEFAULT_BASE_URL)
                .with_request_timeout(None)
                .with_connect_timeout(Some(Duration::from_secs(5)))
        );
        assert_eq!(
            settings.controller_settings().stream_idle_timeout,
            Some(DEFAULT_STREAM_IDLE_TIMEOUT)
        );
    }

    #[test]
    fn debug_output_hides_the_token() {
        let settings = Settings {
            api_token: Some("jwt-secret".to_string()),
            ..Settings::default()
        };
        assert!(!format!("{settings:?}").contains("jwt-secret"));
    }
}
