use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use agri_chat_client::{ClientConfig, Coordinates, DEFAULT_API_BASE_URL};
use agri_chat_session::SessionOptions;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "agri-assistant";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "AGRI_";
pub const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_HISTORY_TURNS: usize = 6;
/// Field location used for weather lookups when none is configured.
pub const DEFAULT_COORDINATES: Coordinates = Coordinates::new(30.19, 71.47);

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_stream_idle_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_latitude")]
    pub latitude: f64,
    #[serde(default = "default_longitude")]
    pub longitude: f64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            bearer_token: None,
            stream_idle_timeout_secs: default_stream_idle_timeout_secs(),
            history_turns: default_history_turns(),
            latitude: default_latitude(),
            longitude: default_longitude(),
        }
    }
}

impl fmt::Debug for AppSettings {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppSettings")
            .field("api_base_url", &self.api_base_url)
            .field(
                "bearer_token",
                &self.bearer_token.as_ref().map(|_| "<redacted>"),
            )
            .field("stream_idle_timeout_secs", &self.stream_idle_timeout_secs)
            .field("history_turns", &self.history_turns)
            .field("latitude", &self.latitude)
            .field("longitude", &self.longitude)
            .finish()
    }
}

impl AppSettings {
    pub fn normalized(mut self) -> Self {
        let client = ClientConfig::new(self.api_base_url, self.bearer_token);
        self.api_base_url = client.base_url;
        self.bearer_token = client.bearer_token;

        if self.stream_idle_timeout_secs == 0 {
            self.stream_idle_timeout_secs = DEFAULT_STREAM_IDLE_TIMEOUT_SECS;
        }
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            self.latitude = DEFAULT_COORDINATES.latitude;
            self.longitude = DEFAULT_COORDINATES.longitude;
        }
        self
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig::new(self.api_base_url.clone(), self.bearer_token.clone())
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            stream_idle_timeout: Duration::from_secs(self.stream_idle_timeout_secs),
            // One turn is a question plus its answer.
            history_limit: self.history_turns.saturating_mul(2),
        }
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join(SETTINGS_DIRECTORY_NAME).join(SETTINGS_FILE_NAME))
    }

    /// Defaults, then the JSON file (when present), then `AGRI_*` variables.
    pub fn try_load(path: Option<&Path>) -> SettingsResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Json::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        let settings = figment
            .extract::<Self>()
            .map_err(Box::new)
            .context(ExtractSnafu {
                stage: "extract-settings",
                path: path.map(Path::to_path_buf),
            })?;
        Ok(settings.normalized())
    }

    /// Like `try_load`, but falls back to defaults with a warning.
    pub fn load(path: Option<&Path>) -> Self {
        if let Some(path) = path
            && !path.exists()
        {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
        }

        match Self::try_load(path) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(error = %error, "failed to load settings, using defaults");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to read settings from {path:?} on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        path: Option<PathBuf>,
        source: Box<figment::Error>,
    },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_stream_idle_timeout_secs() -> u64 {
    DEFAULT_STREAM_IDLE_TIMEOUT_SECS
}

fn default_history_turns() -> usize {
    DEFAULT_HISTORY_TURNS
}

fn default_latitude() -> f64 {
    DEFAULT_COORDINATES.latitude
}

fn default_longitude() -> f64 {
    DEFAULT_COORDINATES.longitude
}
