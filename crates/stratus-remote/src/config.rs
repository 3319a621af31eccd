use crate::RemoteError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Profile used when none is configured.
pub const DEFAULT_PROFILE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl RemoteConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            auth_token: None,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: &str) -> Self {
        self.auth_token = Some(token.to_owned());
        self
    }
}

/// Named control-plane endpoints, selected by the resolved profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProfiles {
    #[serde(default)]
    pub profiles: BTreeMap<String, RemoteConfig>,
}

impl RemoteProfiles {
    /// Load profiles from `~/.config/stratus/remote.json`.
    pub fn load_default() -> Result<Self, RemoteError> {
        let path = default_config_path()?;
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| RemoteError::Config(format!("invalid remote config: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<(), RemoteError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    #[must_use]
    pub fn with_profile(mut self, name: &str, config: RemoteConfig) -> Self {
        self.profiles.insert(name.to_owned(), config);
        self
    }

    /// Endpoint for `profile`, or for [`DEFAULT_PROFILE`] when none is given.
    pub fn profile(&self, profile: Option<&str>) -> Result<RemoteConfig, RemoteError> {
        let name = profile.unwrap_or(DEFAULT_PROFILE);
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| RemoteError::Credentials(format!("no remote profile named '{name}'")))
    }
}

pub fn default_config_path() -> Result<PathBuf, RemoteError> {
    let home = std::env::var("HOME").map_err(|_| RemoteError::Config("HOME not set".to_owned()))?;
    Ok(PathBuf::from(home).join(".config/stratus/remote.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");

        let profiles = RemoteProfiles::default()
            .with_profile(
                "default",
                RemoteConfig::new("https://cp.example.com/v1").with_token("secret123"),
            )
            .with_profile("prod", RemoteConfig::new("https://prod.example.com"));
        profiles.save(&path).unwrap();

        let loaded = RemoteProfiles::load(&path).unwrap();
        assert_eq!(loaded, profiles);
        let default = loaded.profile(None).unwrap();
        assert_eq!(default.url, "https://cp.example.com/v1");
        assert_eq!(default.auth_token.as_deref(), Some("secret123"));
        assert_eq!(
            loaded.profile(Some("prod")).unwrap().url,
            "https://prod.example.com"
        );
    }

    #[test]
    fn unknown_profile_is_a_credentials_error() {
        let err = RemoteProfiles::default().profile(Some("staging")).unwrap_err();
        assert!(matches!(err, RemoteError::Credentials(_)));
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn invalid_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("remote.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            RemoteProfiles::load(&path).unwrap_err(),
            RemoteError::Config(_)
        ));
    }

    #[test]
    fn config_strips_trailing_slash() {
        let config = RemoteConfig::new("https://example.com/");
        assert_eq!(config.url, "https://example.com");
    }
}
