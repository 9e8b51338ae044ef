//! Gateway Configuration Settings
//!
//! Configuration types for the gateway, loaded from environment variables.
//! Loading validates every variable and reports all problems together so a
//! misconfigured process refuses to start with a complete list.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;

use crate::application::ports::MessageTtl;
use crate::domain::policy::{DEFAULT_AUTH_HEADER, OriginRule, PolicyConfig, SharedSecret};
use crate::infrastructure::queue::{
    QueueClientConfig, RetryPolicy, StorageCredentials, retry::MAX_TRIES, retry::MIN_TRIES,
};

// =============================================================================
// Environment Keys
// =============================================================================

const ENV_HTTP_PORT: &str = "GATEWAY_HTTP_PORT";
const ENV_FUNCTIONS_PORT: &str = "FUNCTIONS_CUSTOMHANDLER_PORT";
const ENV_PATH: &str = "GATEWAY_PATH";
const ENV_HEALTH_PORT: &str = "GATEWAY_HEALTH_PORT";
const ENV_REQUEST_TIMEOUT_MS: &str = "GATEWAY_REQUEST_TIMEOUT_MS";
const ENV_LOGGING_LEVEL: &str = "LOGGING_LEVEL";
const ENV_LOG_REQUESTS: &str = "LOG_REQUESTS";
const ENV_HONEY_POT_MODE: &str = "HONEY_POT_MODE";
const ENV_ALLOWED_ORIGIN: &str = "ALLOWED_ORIGIN";
const ENV_AUTHORIZATION_TOKEN: &str = "AUTHORIZATION_TOKEN";
const ENV_AUTH_HEADER_NAME: &str = "AUTH_HEADER_NAME";
const ENV_REQUIRE_AUTH_HEADER: &str = "REQUIRE_AUTH_HEADER";
const ENV_REQUIRE_SIGNAL_KEY: &str = "REQUIRE_SIGNAL_KEY";
const ENV_CORS_MAX_AGE_SECS: &str = "CORS_MAX_AGE_SECS";
const ENV_QUEUE_URL: &str = "SIGNAL_QUEUE_URL";
const ENV_QUEUE_ACCOUNT_NAME: &str = "SIGNAL_QUEUE_ACCOUNT_NAME";
const ENV_QUEUE_ACCOUNT_KEY: &str = "SIGNAL_QUEUE_ACCOUNT_KEY";
const ENV_QUEUE_MESSAGE_TTL_SECS: &str = "SIGNAL_QUEUE_MESSAGE_TTL_SECS";
const ENV_QUEUE_CLIENT_TIMEOUT_MS: &str = "SIGNAL_QUEUE_CLIENT_TIMEOUT_MS";
const ENV_QUEUE_CLIENT_RETRIES: &str = "SIGNAL_QUEUE_CLIENT_RETRIES";

// =============================================================================
// Types
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Informational (default).
    #[default]
    Info,
    /// Debug output.
    Debug,
    /// Everything.
    Trace,
    /// Logging disabled.
    Off,
}

impl LogLevel {
    /// Parse a level name, case-insensitive.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "ERROR" => Some(Self::Error),
            "WARN" => Some(Self::Warn),
            "INFO" => Some(Self::Info),
            "DEBUG" => Some(Self::Debug),
            "TRACE" => Some(Self::Trace),
            "OFF" => Some(Self::Off),
            _ => None,
        }
    }

    /// `EnvFilter` directive for this level.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
            Self::Off => "off",
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Gateway listener port.
    pub http_port: u16,
    /// Health and metrics port (0 = disabled).
    pub health_port: u16,
    /// Endpoint path.
    pub path: String,
    /// Deadline for handling one request, delivery included.
    pub request_timeout: Duration,
    /// `Access-Control-Max-Age` value.
    pub cors_max_age: Duration,
    /// Dump every request to the log.
    pub log_requests: bool,
    /// Answer every request with 200 OK without processing it.
    pub honeypot: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8080,
            health_port: 8082,
            path: "/api/gateway".to_string(),
            request_timeout: Duration::from_secs(30),
            cors_max_age: Duration::from_secs(600),
            log_requests: false,
            honeypot: false,
        }
    }
}

/// Durable queue settings.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Queue URL.
    pub url: Url,
    /// Storage account credentials.
    pub credentials: StorageCredentials,
    /// Message time-to-live.
    pub message_ttl: MessageTtl,
    /// Per-try HTTP timeout.
    pub client_timeout: Duration,
    /// Total attempts per queue call.
    pub max_tries: u32,
}

impl QueueSettings {
    /// Build the queue client configuration.
    #[must_use]
    pub fn client_config(&self) -> QueueClientConfig {
        QueueClientConfig::new(self.url.clone(), self.credentials.clone())
            .with_timeout(self.client_timeout)
            .with_retry(RetryPolicy::with_max_tries(self.max_tries))
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Server settings.
    pub server: ServerSettings,
    /// Log verbosity.
    pub log_level: LogLevel,
    /// Admission policy.
    pub policy: PolicyConfig,
    /// Queue settings.
    pub queue: QueueSettings,
    /// Non-fatal issues found while loading, logged once telemetry is up.
    pub warnings: Vec<String>,
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns every missing or malformed variable.
    pub fn from_env() -> Result<Self, ConfigErrors> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns every missing or malformed variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigErrors>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut env = EnvReader::new(lookup);
        let defaults = ServerSettings::default();

        let http_port = env
            .parse_optional::<u16>(ENV_FUNCTIONS_PORT, |v| v.trim_start_matches(':'))
            .or_else(|| env.parse_optional::<u16>(ENV_HTTP_PORT, str::trim))
            .unwrap_or(defaults.http_port);
        let health_port = env
            .parse_optional(ENV_HEALTH_PORT, str::trim)
            .unwrap_or(defaults.health_port);
        let path = env.optional(ENV_PATH).unwrap_or(defaults.path);
        if !path.starts_with('/') {
            env.invalid(ENV_PATH, "must start with '/'");
        }
        let request_timeout = env
            .parse_optional(ENV_REQUEST_TIMEOUT_MS, str::trim)
            .map_or(defaults.request_timeout, Duration::from_millis);
        if request_timeout.is_zero() {
            env.invalid(ENV_REQUEST_TIMEOUT_MS, "must be greater than zero");
        }
        let cors_max_age = env
            .parse_optional(ENV_CORS_MAX_AGE_SECS, str::trim)
            .map_or(defaults.cors_max_age, Duration::from_secs);

        let server = ServerSettings {
            http_port,
            health_port,
            path,
            request_timeout,
            cors_max_age,
            log_requests: env.flag(ENV_LOG_REQUESTS),
            honeypot: env.flag(ENV_HONEY_POT_MODE),
        };

        let log_level = match env.optional(ENV_LOGGING_LEVEL) {
            None => LogLevel::default(),
            Some(value) => LogLevel::parse(&value).unwrap_or_else(|| {
                env.warn(format!("unknown {ENV_LOGGING_LEVEL} '{value}', using info"));
                LogLevel::default()
            }),
        };

        let origin = env.required(ENV_ALLOWED_ORIGIN).map(|v| OriginRule::parse(&v));
        let secret = env.required(ENV_AUTHORIZATION_TOKEN).map(|v| SharedSecret::parse(&v));
        let auth_header = env
            .optional(ENV_AUTH_HEADER_NAME)
            .unwrap_or_else(|| DEFAULT_AUTH_HEADER.to_string());
        if reqwest::header::HeaderName::from_bytes(auth_header.as_bytes()).is_err() {
            env.invalid(ENV_AUTH_HEADER_NAME, "not a valid header name");
        }
        let require_auth_header = env.flag(ENV_REQUIRE_AUTH_HEADER);
        let require_signal_key = env.flag(ENV_REQUIRE_SIGNAL_KEY);

        let url = env.required_parse::<Url>(ENV_QUEUE_URL);
        if url
            .as_ref()
            .is_some_and(|url| !matches!(url.scheme(), "http" | "https"))
        {
            env.invalid(ENV_QUEUE_URL, "scheme must be http or https");
        }
        let account_name = env.required(ENV_QUEUE_ACCOUNT_NAME);
        let account_key = env.required(ENV_QUEUE_ACCOUNT_KEY);
        let credentials = match (account_name, account_key) {
            (Some(name), Some(key)) => match StorageCredentials::new(&name, &key) {
                Ok(credentials) => Some(credentials),
                Err(e) => env.reject(ENV_QUEUE_ACCOUNT_KEY, &e.to_string()),
            },
            _ => None,
        };
        let message_ttl = env.required_parse::<i64>(ENV_QUEUE_MESSAGE_TTL_SECS).and_then(|secs| {
            MessageTtl::from_secs(secs)
                .or_else(|| env.reject(ENV_QUEUE_MESSAGE_TTL_SECS, "must be -1 or positive"))
        });
        let client_timeout = env
            .required_parse::<u64>(ENV_QUEUE_CLIENT_TIMEOUT_MS)
            .and_then(|ms| {
                (ms > 0)
                    .then(|| Duration::from_millis(ms))
                    .or_else(|| env.reject(ENV_QUEUE_CLIENT_TIMEOUT_MS, "must be greater than zero"))
            });
        let max_tries = env.required_parse::<u32>(ENV_QUEUE_CLIENT_RETRIES).and_then(|n| {
            (MIN_TRIES..=MAX_TRIES)
                .contains(&n)
                .then_some(n)
                .or_else(|| env.reject(ENV_QUEUE_CLIENT_RETRIES, "must be within 1..=10"))
        });

        let warnings = env.warnings.clone();
        env.finish()?;

        match (origin, secret, url, credentials, message_ttl, client_timeout, max_tries) {
            (
                Some(origin),
                Some(secret),
                Some(url),
                Some(credentials),
                Some(message_ttl),
                Some(client_timeout),
                Some(max_tries),
            ) => Ok(Self {
                server,
                log_level,
                policy: PolicyConfig {
                    origin,
                    secret,
                    auth_header,
                    require_auth_header,
                    require_signal_key,
                },
                queue: QueueSettings {
                    url,
                    credentials,
                    message_ttl,
                    client_timeout,
                    max_tries,
                },
                warnings,
            }),
            // Every None above has recorded an error, so finish() returned.
            _ => Err(ConfigErrors(vec![ConfigError::Incomplete])),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be interpreted.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
    /// Loading stopped without a specific error.
    #[error("configuration incomplete")]
    Incomplete,
}

/// Every error found while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct ConfigErrors(pub Vec<ConfigError>);

impl ConfigErrors {
    /// Individual errors.
    #[must_use]
    pub fn errors(&self) -> &[ConfigError] {
        &self.0
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration error(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Environment Reader
// =============================================================================

/// Reads variables through a lookup and accumulates errors.
struct EnvReader<F> {
    lookup: F,
    errors: Vec<ConfigError>,
    warnings: Vec<String>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    const fn new(lookup: F) -> Self {
        Self {
            lookup,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Non-empty trimmed value, if set.
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&mut self, key: &str) -> Option<String> {
        match (self.lookup)(key) {
            None => {
                self.errors.push(ConfigError::MissingEnvVar(key.to_string()));
                None
            }
            Some(v) if v.trim().is_empty() => {
                self.errors.push(ConfigError::EmptyValue(key.to_string()));
                None
            }
            Some(v) => Some(v.trim().to_string()),
        }
    }

    fn parse_optional<T: FromStr>(&mut self, key: &str, clean: fn(&str) -> &str) -> Option<T> {
        let raw = self.optional(key)?;
        clean(&raw)
            .parse()
            .ok()
            .or_else(|| self.reject(key, "could not be parsed"))
    }

    fn required_parse<T: FromStr>(&mut self, key: &str) -> Option<T> {
        let raw = self.required(key)?;
        raw.parse().ok().or_else(|| self.reject(key, "could not be parsed"))
    }

    /// Boolean flag, default false. Accepts `1`/`t`/`true` and `0`/`f`/`false` spellings.
    fn flag(&mut self, key: &str) -> bool {
        let Some(raw) = self.optional(key) else {
            return false;
        };
        match raw.as_str() {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => true,
            "0" | "f" | "F" | "FALSE" | "false" | "False" => false,
            _ => {
                self.invalid(key, "expected a boolean");
                false
            }
        }
    }

    fn invalid(&mut self, key: &str, reason: &str) {
        self.errors.push(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Record an invalid value and yield `None`.
    fn reject<T>(&mut self, key: &str, reason: &str) -> Option<T> {
        self.invalid(key, reason);
        None
    }

    fn warn(&mut self, message: String) {
        self.warnings.push(message);
    }

    fn finish(self) -> Result<(), ConfigErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigErrors(self.errors))
        }
    }
}
