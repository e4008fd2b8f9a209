use crate::compliance::Compliance;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid classpath configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Settings applied when a library is put on the classpath.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClasspathConfig {
    /// Target level deciding which multi-release overlays are visible.
    pub compliance: Compliance,
    /// Only treat an archive as multi-release when its manifest says
    /// `Multi-Release: true`.
    pub require_multi_release_manifest: bool,
}

impl ClasspathConfig {
    pub fn with_compliance(compliance: impl Into<Compliance>) -> Self {
        Self {
            compliance: compliance.into(),
            ..Self::default()
        }
    }

    pub fn require_manifest(mut self, required: bool) -> Self {
        self.require_multi_release_manifest = required;
        self
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }
}
