//! Strongly-typed runtime settings for the rankflow server.
//!
//! Settings are constructed from environment variables (with optional `.env`
//! support) plus defaults. Timing constants are deliberately fixed rather
//! than configurable; the remote site's challenge behaviour does not reward
//! tuning them per deployment.

use std::env;
use std::num::ParseIntError;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;
use thiserror::Error;

/// Default listen port when `PORT` is unset.
pub const DEFAULT_PORT: u16 = 3000;

/// Default document root for static files.
pub const DEFAULT_STATIC_ROOT: &str = "public";

/// Upper bound for the initial navigation to the ranking page.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(60);

/// How long to wait for the interstitial challenge to clear, per cycle.
pub const CHALLENGE_WAIT: Duration = Duration::from_secs(45);

/// Interval between title polls while waiting out the challenge.
pub const CHALLENGE_POLL: Duration = Duration::from_secs(1);

/// Settle time after the challenge title clears.
pub const CHALLENGE_SETTLE: Duration = Duration::from_secs(3);

/// Settle time after re-navigating on a mid-session challenge regression.
pub const REGRESSION_SETTLE: Duration = Duration::from_secs(5);

/// Idle limit for upstream media connections.
pub const PROXY_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can arise while constructing [`Settings`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid number '{value}' for {field}: {source}")]
    InvalidNumber {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("invalid boolean '{value}' for {field}")]
    InvalidBool { field: &'static str, value: String },
}

/// Configuration values for the rankflow server process.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// HTTP listen port.
    pub port: u16,
    /// Explicit Chrome/Chromium executable; when `None` the launch plan
    /// falls back to a per-platform search of common install locations.
    pub chrome_executable: Option<PathBuf>,
    /// Whether to launch the browser headless.
    pub headless: bool,
    /// Document root for static file serving.
    pub static_root: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            port: DEFAULT_PORT,
            chrome_executable: None,
            headless: true,
            static_root: PathBuf::from(DEFAULT_STATIC_ROOT),
        }
    }
}

impl Settings {
    /// Construct settings by reading relevant environment variables, after
    /// loading a `.env` file if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv();
        let mut settings = Settings::default();

        if let Some(value) = env_var("PORT") {
            settings.port = parse_u16("PORT", &value)?;
        }

        if let Some(value) = env_var("RANKFLOW_CHROME_BIN") {
            settings.chrome_executable = Some(PathBuf::from(value));
        }

        if let Some(value) = env_var("RANKFLOW_HEADLESS") {
            settings.headless = parse_bool("RANKFLOW_HEADLESS", &value)?;
        }

        if let Some(value) = env_var("RANKFLOW_STATIC_ROOT") {
            settings.static_root = PathBuf::from(value);
        }

        Ok(settings)
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_u16(field: &'static str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|source| ConfigError::InvalidNumber {
            field,
            value: value.to_string(),
            source,
        })
}

fn parse_bool(field: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            field,
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(vars: &[(&str, Option<&str>)]) -> Self {
            let saved = vars
                .iter()
                .map(|(key, value)| {
                    let original = env::var(key).ok();
                    match value {
                        Some(v) => unsafe {
                            env::set_var(key, v);
                        },
                        None => unsafe {
                            env::remove_var(key);
                        },
                    };
                    ((*key).to_string(), original)
                })
                .collect();
            EnvGuard { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.saved.drain(..) {
                match value {
                    Some(v) => unsafe {
                        env::set_var(&key, v);
                    },
                    None => unsafe {
                        env::remove_var(&key);
                    },
                }
            }
        }
    }

    fn with_env<F, T>(vars: &[(&str, Option<&str>)], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let lock = env_lock().lock().expect("env mutex poisoned");
        let guard = EnvGuard::new(vars);
        let result = f();
        drop(guard);
        drop(lock);
        result
    }

    #[test]
    fn defaults_match_original_server() {
        let settings = Settings::default();
        assert_eq!(settings.port, 3000);
        assert!(settings.chrome_executable.is_none());
        assert!(settings.headless);
        assert_eq!(settings.static_root, PathBuf::from("public"));
    }

    #[test]
    fn from_env_applies_overrides() {
        let vars = [
            ("PORT", Some("8080")),
            ("RANKFLOW_CHROME_BIN", Some("/opt/chrome/chrome")),
            ("RANKFLOW_HEADLESS", Some("false")),
            ("RANKFLOW_STATIC_ROOT", Some("/srv/www")),
        ];

        with_env(&vars, || {
            let settings = Settings::from_env().expect("settings from env");
            assert_eq!(settings.port, 8080);
            assert_eq!(
                settings.chrome_executable,
                Some(PathBuf::from("/opt/chrome/chrome"))
            );
            assert!(!settings.headless);
            assert_eq!(settings.static_root, PathBuf::from("/srv/www"));
        });
    }

    #[test]
    fn invalid_port_is_rejected() {
        with_env(&[("PORT", Some("not-a-port"))], || {
            let err = Settings::from_env().expect_err("should reject port");
            assert!(matches!(err, ConfigError::InvalidNumber { field, .. } if field == "PORT"));
        });
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        with_env(
            &[("PORT", Some("  ")), ("RANKFLOW_CHROME_BIN", Some(""))],
            || {
                let settings = Settings::from_env().expect("settings from env");
                assert_eq!(settings.port, DEFAULT_PORT);
                assert!(settings.chrome_executable.is_none());
            },
        );
    }
}
