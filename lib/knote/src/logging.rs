// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide logging setup.
//!
//! - Configuration loaded from:
//!   1. The `KQUEUE_LOG` environment variable (highest priority).
//!   2. Optional TOML file pointed to by the `KQUEUE_LOGGING_CONFIG_PATH` environment variable.
//!   3. `/etc/kqueue/logging.toml`.
//!
//! Filters are comma-separated `module=level` pairs, the same syntax as
//! `RUST_LOG`. The default log level is `warn`; knote lifecycle events are
//! logged at `trace` and `debug`.
//!
//! Example:
//! ```toml
//! log_level = "info"
//!
//! [log_filters]
//! "kqueue_knote::reclaim" = "debug"
//! "kqueue_knote::registry" = "trace"
//! ```

use std::collections::HashMap;
use std::sync::Once;

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// ENV used to set the log filter
const FILTER_ENV: &str = "KQUEUE_LOG";

/// Default log level
const DEFAULT_FILTER_LEVEL: &str = "warn";

/// ENV used to set the path to the logging configuration file
const CONFIG_PATH_ENV: &str = "KQUEUE_LOGGING_CONFIG_PATH";

const SYSTEM_CONFIG_PATH: &str = "/etc/kqueue/logging.toml";

static INIT: Once = Once::new();

#[derive(Serialize, Deserialize, Debug, PartialEq)]
struct LoggingConfig {
    log_level: String,
    #[serde(default)]
    log_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            log_level: DEFAULT_FILTER_LEVEL.to_string(),
            log_filters: HashMap::new(),
        }
    }
}

/// Install the global subscriber. Calls after the first are no-ops, and so
/// is the first call if another subscriber is already installed.
pub fn init() {
    INIT.call_once(setup_logging);
}

fn setup_logging() {
    let layer = fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(filters(load_config()));

    if let Err(e) = tracing_subscriber::registry().with(layer).try_init() {
        eprintln!("kqueue logging not installed: {e}");
    }
}

fn filters(config: LoggingConfig) -> EnvFilter {
    let default_directive = config.log_level.parse::<Directive>().unwrap_or_else(|e| {
        eprintln!(
            "Invalid log level '{}': {e}; using {DEFAULT_FILTER_LEVEL}",
            config.log_level
        );
        LevelFilter::WARN.into()
    });

    let mut filter_layer = EnvFilter::builder()
        .with_default_directive(default_directive)
        .with_env_var(FILTER_ENV)
        .from_env_lossy();

    // apply the log_filters from the config files
    for (module, level) in config.log_filters {
        match format!("{module}={level}").parse::<Directive>() {
            Ok(d) => {
                filter_layer = filter_layer.add_directive(d);
            }
            Err(e) => {
                eprintln!("Failed parsing filter '{level}' for module '{module}': {e}");
            }
        }
    }
    filter_layer
}

fn load_config() -> LoggingConfig {
    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_default();
    let figment = Figment::new()
        .merge(Serialized::defaults(LoggingConfig::default()))
        .merge(Toml::file(SYSTEM_CONFIG_PATH))
        .merge(Toml::file(config_path));

    figment.extract().unwrap_or_else(|e| {
        eprintln!("Failed loading logging config: {e}; using defaults");
        LoggingConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_logging_config() {
        temp_env::with_var_unset(CONFIG_PATH_ENV, || {
            let config = load_config();
            assert_eq!(config.log_level, DEFAULT_FILTER_LEVEL);
        });
    }

    #[test]
    fn test_logging_config_from_file() {
        let path = std::env::temp_dir().join(format!("kqueue-logging-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "log_level = \"debug\"\n\n[log_filters]\n\"kqueue_knote::reclaim\" = \"trace\""
        )
        .unwrap();

        temp_env::with_var(CONFIG_PATH_ENV, Some(&path), || {
            let config = load_config();
            assert_eq!(config.log_level, "debug");
            assert_eq!(
                config.log_filters.get("kqueue_knote::reclaim").map(String::as_str),
                Some("trace")
            );
        });
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_filters_tolerate_bad_entries() {
        temp_env::with_var_unset(FILTER_ENV, || {
            let config = LoggingConfig {
                log_level: "info".to_string(),
                log_filters: HashMap::from([
                    ("kqueue_knote".to_string(), "debug".to_string()),
                    ("bad module".to_string(), "loud".to_string()),
                ]),
            };
            let filter = filters(config);
            let rendered = filter.to_string();
            assert!(rendered.contains("kqueue_knote=debug"));
            assert!(rendered.contains("info"));
            assert!(!rendered.contains("loud"));
        });
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        tracing::warn!("logging initialised twice without panicking");
    }
}
