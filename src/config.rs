use directories::BaseDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::ConfigError;
use crate::identity::{Role, SessionUser};

pub const BASE_URL_ENV: &str = "GUDJOB_BASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    // TOML is the primary format; an older JSON state file is read once and rewritten as TOML
    pub fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("gudjob.toml"))
    }

    fn legacy_json_path() -> Option<PathBuf> {
        let proj = directories::ProjectDirs::from("io", "gudjob", "GudjobChat")?;
        Some(proj.config_dir().join("state.json"))
    }

    /// Loads from the user's config dir, falling back to defaults, then
    /// applies the `GUDJOB_BASE_URL` override.
    pub fn load() -> Self {
        let mut settings = Self::toml_path()
            .and_then(|p| Self::load_from(&p).map_err(|e| debug!("no settings at {}: {e}", p.display())).ok())
            .or_else(|| Self::legacy_json_path().and_then(|p| Self::migrate_legacy(&p)))
            .unwrap_or_default();
        settings.apply_env_override(std::env::var(BASE_URL_ENV).ok());
        settings
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str::<Settings>(&text)?)
    }

    fn migrate_legacy(path: &Path) -> Option<Self> {
        let bytes = fs::read(path).ok()?;
        let settings = serde_json::from_slice::<Settings>(&bytes).ok()?;
        if let Err(e) = settings.save() {
            warn!("could not migrate legacy settings: {e}");
        }
        Some(settings)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::toml_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn apply_env_override(&mut self, base_url: Option<String>) {
        if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
            self.base_url = crate::utils::normalize_url(&url);
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
    }

    pub fn socket_endpoint(&self) -> Result<Url, ConfigError> {
        if let Some(explicit) = self.socket_url.as_deref().filter(|s| !s.trim().is_empty()) {
            return Ok(Url::parse(explicit.trim())?);
        }
        if !self.is_configured() {
            return Err(ConfigError::MissingBaseUrl);
        }
        Ok(crate::utils::socket_url(&self.base_url)?)
    }

    /// The signed-in user recorded by the sign-in flow, if any.
    pub fn session_user(&self) -> Option<SessionUser> {
        let id = self.user_id.clone().filter(|id| !id.is_empty())?;
        Some(SessionUser { id, role: self.role.unwrap_or(Role::Candidate) })
    }
}
