use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use lucknow_llm::{DEFAULT_OPENAI_ENDPOINT, DEFAULT_OPENAI_MODEL, ProviderConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use super::session::{DEFAULT_HISTORY_LIMIT, SessionConfig};
use super::store::MAX_SUBSCRIPTION_LIMIT;
use super::translation::{DEFAULT_TARGET_LANGUAGE, DEFAULT_TRANSLATION_TIMEOUT};

pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_LOCAL_USER: &str = "c1";
pub const SETTINGS_DIRECTORY_NAME: &str = "lucknow-connect";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DATABASE_FILE_NAME: &str = "chat.db";
pub const ENV_PREFIX: &str = "LUCKNOW_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: DEFAULT_PROVIDER_ID.to_string(),
            api_key: String::new(),
            endpoint: DEFAULT_OPENAI_ENDPOINT.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
            temperature: None,
            max_tokens: None,
        }
    }
}

impl ProviderSettings {
    /// `None` while no API key is configured.
    pub fn to_provider_config(&self) -> Option<ProviderConfig> {
        if self.api_key.trim().is_empty() {
            return None;
        }

        let mut config = ProviderConfig::new(&self.provider_id, &self.api_key, &self.endpoint)
            .with_model(&self.model);
        if let Some(temperature) = self.temperature {
            config = config.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            config = config.with_max_tokens(max_tokens);
        }
        Some(config)
    }

    fn normalized(mut self) -> Self {
        let defaults = Self::default();
        self.provider_id = non_blank_or(&self.provider_id, defaults.provider_id);
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = non_blank_or(&self.endpoint, defaults.endpoint);
        self.model = non_blank_or(&self.model, defaults.model);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatPreferences {
    pub local_user: String,
    pub target_language: String,
    pub history_limit: u32,
    pub translation_timeout_ms: u64,
}

impl Default for ChatPreferences {
    fn default() -> Self {
        Self {
            local_user: DEFAULT_LOCAL_USER.to_string(),
            target_language: DEFAULT_TARGET_LANGUAGE.to_string(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            translation_timeout_ms: DEFAULT_TRANSLATION_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ChatPreferences {
    pub fn translation_timeout(&self) -> Duration {
        Duration::from_millis(self.translation_timeout_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(&self.local_user)
            .with_target_language(&self.target_language)
            .with_history_limit(self.history_limit)
    }

    fn normalized(mut self) -> Self {
        let defaults = Self::default();
        self.local_user = non_blank_or(&self.local_user, defaults.local_user);
        self.target_language = non_blank_or(&self.target_language, defaults.target_language);
        self.history_limit = self.history_limit.clamp(1, MAX_SUBSCRIPTION_LIMIT);
        if self.translation_timeout_ms == 0 {
            self.translation_timeout_ms = defaults.translation_timeout_ms;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub provider: ProviderSettings,
    pub chat: ChatPreferences,
    /// SQLite file or URL; empty means the default data directory.
    pub database: String,
    /// JSON array of user profiles; the built-in fixtures when unset.
    pub profiles_path: Option<PathBuf>,
}

impl ChatSettings {
    pub fn database_location(&self) -> String {
        if self.database.trim().is_empty() {
            SettingsStore::default_data_dir()
                .join(DATABASE_FILE_NAME)
                .to_string_lossy()
                .into_owned()
        } else {
            self.database.trim().to_string()
        }
    }

    pub fn normalized(mut self) -> Self {
        self.provider = self.provider.normalized();
        self.chat = self.chat.normalized();
        self.database = self.database.trim().to_string();
        self
    }
}

/// Settings layered as defaults, then the JSON file, then `LUCKNOW_` environment
/// variables (`__` separates nested keys, e.g. `LUCKNOW_PROVIDER__API_KEY`).
pub struct SettingsStore {
    settings: Arc<ArcSwap<ChatSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".lucknow-connect"))
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".lucknow-connect"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_layers(&config_path);
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

    pub fn settings(&self) -> Arc<ChatSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ChatSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn load_layers(path: &Path) -> ChatSettings {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found, using defaults and environment");
        }

        let figment = Figment::from(Serialized::defaults(ChatSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        match figment.extract::<ChatSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "failed to parse settings, using defaults");
                ChatSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ChatSettings) -> Result<(), SettingsError> {
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

        tracing::info!(path = ?self.config_path, "saved settings");
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

fn non_blank_or(value: &str, fallback: String) -> String {
    let value = value.trim();
    if value.is_empty() {
        fallback
    } else {
        value.to_string()
    }
}
