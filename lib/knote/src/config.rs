// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Knote registry configuration.
//!
//! Sources in priority order (lowest to highest):
//! 1. Code defaults
//! 2. System config file at `/etc/kqueue/knote.toml`
//! 3. TOML file from the `KQUEUE_CONFIG_PATH` environment variable
//! 4. Environment variables (`KQUEUE_*` prefixed)

use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Env, Format, Serialized, Toml},
    value::{Dict, Map},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::{Validate, ValidationErrors};

const CONFIG_PATH_ENV: &str = "KQUEUE_CONFIG_PATH";

const SYSTEM_CONFIG_PATH: &str = "/etc/kqueue/knote.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to extract configuration: {0}")]
    Extraction(#[from] Box<figment::Error>),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Per-context knote settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct KnoteConfig {
    /// Maximum number of knotes a context may hold allocated at once,
    /// counting knotes still waiting in the reclamation queue.
    /// None = unbounded.
    #[validate(range(min = 1))]
    #[serde(default)]
    pub max_knotes: Option<usize>,

    /// Return backend delete failures to the caller instead of logging
    /// and absorbing them. The knote is deleted either way.
    #[serde(default)]
    pub strict_delete: bool,
}

impl KnoteConfig {
    /// Create a Figment configuration with all sources merged.
    pub fn figment() -> Figment {
        let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_default();

        Figment::new()
            .merge(Serialized::defaults(KnoteConfig::default()))
            .merge(Toml::file(SYSTEM_CONFIG_PATH))
            .merge(Toml::file(&config_path))
            // KQUEUE_MAX_KNOTES, KQUEUE_STRICT_DELETE
            .merge(
                Env::prefixed("KQUEUE_")
                    .ignore(&["CONFIG_PATH", "LOG", "LOGGING_CONFIG_PATH"])
                    .map(|k| k.as_str().to_lowercase().into()),
            )
    }

    /// Load configuration from default figment (env and files).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::extract_from(Self::figment())
    }

    /// Extract and validate configuration from any provider.
    pub fn extract_from<T: Provider>(provider: T) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(provider)
            .extract()
            .map_err(|e| ConfigError::Extraction(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a figment from the default sources, then merge `extra` with
    /// highest priority.
    pub fn figment_with<T: Provider>(extra: T) -> Figment {
        Self::figment().merge(extra)
    }
}

impl Provider for KnoteConfig {
    fn metadata(&self) -> Metadata {
        Metadata::named("KnoteConfig")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, figment::Error> {
        Serialized::defaults(self).data()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 3] = ["KQUEUE_CONFIG_PATH", "KQUEUE_MAX_KNOTES", "KQUEUE_STRICT_DELETE"];

    #[test]
    fn test_default_config() {
        let config = KnoteConfig::default();
        assert!(config.max_knotes.is_none());
        assert!(!config.strict_delete);
    }

    #[test]
    fn test_figment_defaults() {
        temp_env::with_vars_unset(VARS, || {
            let config = KnoteConfig::from_env().unwrap();
            assert_eq!(config, KnoteConfig::default());
        });
    }

    #[test]
    fn test_env_override() {
        temp_env::with_vars(
            vec![
                ("KQUEUE_CONFIG_PATH", None),
                ("KQUEUE_MAX_KNOTES", Some("1024")),
                ("KQUEUE_STRICT_DELETE", Some("true")),
            ],
            || {
                let config = KnoteConfig::from_env().unwrap();
                assert_eq!(config.max_knotes, Some(1024));
                assert!(config.strict_delete);
            },
        );
    }

    #[test]
    fn test_figment_with_tuple_override() {
        temp_env::with_vars(vec![("KQUEUE_MAX_KNOTES", Some("8"))], || {
            let figment = KnoteConfig::figment_with(("max_knotes", 64usize));
            let config = KnoteConfig::extract_from(figment).unwrap();
            assert_eq!(config.max_knotes, Some(64));
        });
    }

    #[test]
    fn test_zero_budget_fails_validation() {
        let err = KnoteConfig::extract_from(Figment::new().merge(("max_knotes", 0usize)))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_bad_type_fails_extraction() {
        let err = KnoteConfig::extract_from(Figment::new().merge(("strict_delete", "sometimes")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Extraction(_)));
    }

    #[test]
    fn test_config_as_provider() {
        let original = KnoteConfig {
            max_knotes: Some(16),
            strict_delete: true,
        };
        let extracted = KnoteConfig::extract_from(&original).unwrap();
        assert_eq!(extracted, original);
    }
}
