use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, FileFormat};
use engine::remote::DEFAULT_API_BASE;
use serde::Deserialize;
use store::TrackingConfig;

#[derive(Debug, Deserialize, Default)]
pub struct Remote {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub api_base: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Local {
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Default)]
pub struct Logging {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct Settings {
    pub remote: Remote,
    pub local: Local,
    pub logging: Logging,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("notesync")
}

impl Settings {
    /// Layered load: defaults, then `notesync.toml` (or `path`), then
    /// `NOTESYNC_SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).format(FileFormat::Toml).required(true),
            None => File::with_name(TrackingConfig::filename())
                .format(FileFormat::Toml)
                .required(false),
        };

        let config = Config::builder()
            .set_default("remote.owner", "")?
            .set_default("remote.repo", "")?
            .set_default("remote.branch", "main")?
            .set_default("remote.api_base", DEFAULT_API_BASE)?
            .set_default(
                "local.data_dir",
                default_data_dir().to_string_lossy().into_owned(),
            )?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "text")?
            .add_source(file)
            .add_source(
                Environment::with_prefix("NOTESYNC")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// The remote coordinates, failing when owner or repo were never set.
    pub fn repository(&self) -> Option<(&str, &str)> {
        let owner = self.remote.owner.trim();
        let repo = self.remote.repo.trim();
        if owner.is_empty() || repo.is_empty() {
            None
        } else {
            Some((owner, repo))
        }
    }
}
