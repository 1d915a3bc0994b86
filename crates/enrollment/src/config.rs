//! Configuration for the enrollment pipeline and the audit server.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use session_codec::ClientMetadata;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Per-attempt pipeline settings
    #[serde(default)]
    pub attempt: AttemptConfig,

    /// Credential codec settings
    #[serde(default)]
    pub codec: CodecConfig,

    /// Ledger storage configuration
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Audit server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// What happens to a rented number when its attempt ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberPolicy {
    /// Released to the broker at finalization, whatever the outcome.
    #[default]
    OneTime,
    /// Kept for reuse within its rental window; only rejected numbers are
    /// handed back (and banned).
    Reusable,
}

#[derive(Debug, Deserialize)]
pub struct AttemptConfig {
    /// Country requested from the broker
    #[serde(default = "default_country")]
    pub country: String,

    /// Highest price accepted for a number
    #[serde(default = "default_price_ceiling")]
    pub price_ceiling: f64,

    /// Release/retain decision for rented numbers
    #[serde(default)]
    pub number_policy: NumberPolicy,

    /// Upper bound for any single adapter call without a dedicated timeout
    #[serde(default = "default_step_timeout", with = "humantime_serde")]
    pub step_timeout: Duration,

    /// How long to wait for the broker to hand out a number
    #[serde(default = "default_rent_timeout", with = "humantime_serde")]
    pub rent_timeout: Duration,

    /// Overall deadline for the messaging verification code
    #[serde(default = "default_code_timeout", with = "humantime_serde")]
    pub code_timeout: Duration,

    /// Overall deadline for the mailbox confirmation code
    #[serde(default = "default_email_timeout", with = "humantime_serde")]
    pub email_timeout: Duration,

    /// Deadline for one desktop login try
    #[serde(default = "default_desktop_login_timeout", with = "humantime_serde")]
    pub desktop_login_timeout: Duration,

    /// Desktop login tries before the attempt fails
    #[serde(default = "default_desktop_login_attempts")]
    pub desktop_login_attempts: u32,

    /// Pause between desktop login tries
    #[serde(default = "default_desktop_retry_delay", with = "humantime_serde")]
    pub desktop_retry_delay: Duration,

    /// Password for accounts that prompt for a second factor
    #[serde(default)]
    pub two_factor_password: Option<SecretString>,

    /// Display name set on the new profile
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CodecConfig {
    /// Secret sealing desktop containers (may be empty)
    #[serde(default = "default_local_secret")]
    pub local_secret: SecretString,

    #[serde(default = "default_device_model")]
    pub device_model: String,

    #[serde(default = "default_system_version")]
    pub system_version: String,

    #[serde(default = "default_app_version")]
    pub app_version: String,

    #[serde(default = "default_lang_code")]
    pub lang_code: String,

    #[serde(default = "default_lang_code")]
    pub system_lang_code: String,

    #[serde(default)]
    pub layer: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Path to the JSON Lines ledger file
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,

    /// Enable persistence (if false, the ledger is in-memory only)
    #[serde(default = "default_true")]
    pub persist: bool,

    /// Directory for exported credential containers
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl CodecConfig {
    /// Client metadata written into programmatic sessions.
    pub fn client_metadata(&self) -> ClientMetadata {
        ClientMetadata {
            device_model: self.device_model.clone(),
            system_version: self.system_version.clone(),
            app_version: self.app_version.clone(),
            lang_code: self.lang_code.clone(),
            system_lang_code: self.system_lang_code.clone(),
            layer: self.layer,
        }
    }
}

// Default implementations
impl Default for AttemptConfig {
    fn default() -> Self {
        Self {
            country: default_country(),
            price_ceiling: default_price_ceiling(),
            number_policy: NumberPolicy::default(),
            step_timeout: default_step_timeout(),
            rent_timeout: default_rent_timeout(),
            code_timeout: default_code_timeout(),
            email_timeout: default_email_timeout(),
            desktop_login_timeout: default_desktop_login_timeout(),
            desktop_login_attempts: default_desktop_login_attempts(),
            desktop_retry_delay: default_desktop_retry_delay(),
            two_factor_password: None,
            display_name: None,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            local_secret: default_local_secret(),
            device_model: default_device_model(),
            system_version: default_system_version(),
            app_version: default_app_version(),
            lang_code: default_lang_code(),
            system_lang_code: default_lang_code(),
            layer: 0,
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            persist: true,
            export_dir: default_export_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_country() -> String {
    "US".into()
}

fn default_price_ceiling() -> f64 {
    2.0
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_rent_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_code_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_email_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_desktop_login_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_desktop_login_attempts() -> u32 {
    3
}

fn default_desktop_retry_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_local_secret() -> SecretString {
    SecretString::new(String::new())
}

fn default_device_model() -> String {
    "Desktop".into()
}

fn default_system_version() -> String {
    "Linux".into()
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn default_lang_code() -> String {
    "en".into()
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("/data/ledger.jsonl")
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("/data/credentials")
}

fn default_true() -> bool {
    true
}

fn default_listen_addr() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8090
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_environment(config::Environment::default())
    }

    /// Build from an environment source. Values stay strings until serde
    /// asks for a number, so secrets like `007700` keep their leading zeros.
    fn from_environment(environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment.separator("__").try_parsing(false))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_attempt_defaults() {
        let attempt = AttemptConfig::default();
        assert_eq!(attempt.number_policy, NumberPolicy::OneTime);
        assert_eq!(attempt.desktop_login_attempts, 3);
        assert_eq!(attempt.code_timeout, Duration::from_secs(300));
        assert!(attempt.two_factor_password.is_none());
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let json = serde_json::json!({
            "attempt": {
                "country": "GB",
                "price_ceiling": 0.5,
                "number_policy": "reusable",
                "code_timeout": "2m",
                "two_factor_password": "hunter2"
            },
            "codec": { "local_secret": "s3cret", "layer": 170 }
        });

        let config: Config = serde_json::from_value(json).unwrap();
        assert_eq!(config.attempt.country, "GB");
        assert_eq!(config.attempt.number_policy, NumberPolicy::Reusable);
        assert_eq!(config.attempt.code_timeout, Duration::from_secs(120));
        assert_eq!(config.attempt.desktop_login_attempts, 3);
        assert_eq!(
            config
                .attempt
                .two_factor_password
                .as_ref()
                .unwrap()
                .expose_secret(),
            "hunter2"
        );
        assert_eq!(config.codec.local_secret.expose_secret(), "s3cret");
        assert_eq!(config.codec.client_metadata().layer, 170);
        assert!(config.ledger.persist);
        assert_eq!(config.server.port, 8090);
    }

    fn from_vars(vars: &[(&str, &str)]) -> Config {
        let mut source = config::Map::new();
        for (key, value) in vars {
            source.insert(key.to_string(), value.to_string());
        }
        Config::from_environment(config::Environment::default().source(Some(source))).unwrap()
    }

    #[test]
    fn test_numeric_looking_strings_kept_verbatim() {
        let config = from_vars(&[
            ("ATTEMPT__TWO_FACTOR_PASSWORD", "007700"),
            ("CODEC__LOCAL_SECRET", "+0123"),
            ("CODEC__APP_VERSION", "4.0"),
        ]);

        let password = config.attempt.two_factor_password.as_ref().unwrap();
        assert_eq!(password.expose_secret(), "007700");
        assert_eq!(config.codec.local_secret.expose_secret(), "+0123");
        assert_eq!(config.codec.app_version, "4.0");
    }

    #[test]
    fn test_numeric_fields_parse_from_strings() {
        let config = from_vars(&[
            ("ATTEMPT__PRICE_CEILING", "0.5"),
            ("ATTEMPT__DESKTOP_LOGIN_ATTEMPTS", "4"),
            ("ATTEMPT__CODE_TIMEOUT", "90s"),
            ("LEDGER__PERSIST", "false"),
            ("SERVER__PORT", "9000"),
        ]);

        assert_eq!(config.attempt.price_ceiling, 0.5);
        assert_eq!(config.attempt.desktop_login_attempts, 4);
        assert_eq!(config.attempt.code_timeout, Duration::from_secs(90));
        assert!(!config.ledger.persist);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_secrets_redacted_in_debug() {
        let json = serde_json::json!({ "codec": { "local_secret": "do-not-print" } });
        let config: Config = serde_json::from_value(json).unwrap();
        assert!(!format!("{:?}", config).contains("do-not-print"));
    }
}
