use crate::backend::BackendKind;
use crate::error::J2cError;
use serde::Deserialize;
use std::path::Path;

/// Process settings: which backend to open and the encode defaults.
///
/// Loaded from TOML; every key is optional. `J2C_BACKEND`, `J2C_RATE`,
/// `J2C_REVERSIBLE` and `J2C_LOG` override the file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct J2cConfig {
    pub backend: BackendKind,
    /// Compressed bytes per raw sample for encodes; 0 selects the default.
    pub rate: f32,
    pub reversible: bool,
    /// `tracing_subscriber::EnvFilter` directive used by the CLI.
    pub log_level: String,
}

impl Default for J2cConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            rate: 0.0,
            reversible: false,
            log_level: "info".to_string(),
        }
    }
}

impl J2cConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, J2cError> {
        let config: Self =
            toml::from_str(content).map_err(|err| J2cError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, J2cError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Applies the `J2C_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), J2cError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), J2cError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup("J2C_BACKEND") {
            self.backend = backend.parse()?;
        }
        if let Some(rate) = lookup("J2C_RATE") {
            self.rate = rate
                .trim()
                .parse()
                .map_err(|_| J2cError::InvalidConfig(format!("J2C_RATE is not a number: {rate}")))?;
        }
        if let Some(reversible) = lookup("J2C_REVERSIBLE") {
            self.reversible = match reversible.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(J2cError::InvalidConfig(format!(
                        "J2C_REVERSIBLE must be a boolean, got {other}"
                    )));
                }
            };
        }
        if let Some(log_level) = lookup("J2C_LOG") {
            self.log_level = log_level;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), J2cError> {
        if !self.rate.is_finite() || self.rate < 0.0 {
            return Err(J2cError::InvalidConfig(
                "rate must be a non-negative number".to_string(),
            ));
        }
        if self.rate > 4.0 {
            return Err(J2cError::InvalidConfig(
                "rate above 4 bytes per sample exceeds raw storage".to_string(),
            ));
        }
        if self.log_level.trim().is_empty() {
            return Err(J2cError::InvalidConfig("log_level cannot be empty".to_string()));
        }
        Ok(())
    }
}
