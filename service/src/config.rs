//! Configuration management for the order relay.
//!
//! Loads configuration from environment variables (and a `.env` file, if present) with
//! defaults suitable for a broker on the developer machine.
//!
//! | Variable | Default |
//! |---|---|
//! | `AMQP_CONNECTION_TYPE` | `local` |
//! | `AMQP_{CLOUD,LOCAL}_PROTOCOL` | `amqps` / `amqp` |
//! | `AMQP_{CLOUD,LOCAL}_HOST` | `localhost` |
//! | `AMQP_{CLOUD,LOCAL}_PORT` | `5671` / `5672` |
//! | `AMQP_{CLOUD,LOCAL}_USER` | `guest` |
//! | `AMQP_{CLOUD,LOCAL}_PASS` | `guest` |
//! | `AMQP_{CLOUD,LOCAL}_VHOST` | `/` |
//! | `ORDERS_QUEUE` | `orders` |
//! | `ORDERS_DEAD_LETTER_QUEUE` | `orders.dead-letter` (empty disables) |
//! | `WORKER_PREFETCH` | `16` |
//! | `HOST` / `PORT` | `0.0.0.0` / `3002` |
//! | `SHUTDOWN_TIMEOUT` | `30` (seconds) |

use order_relay_amqp::{AmqpProfile, AmqpSettings, SettingsError};
use order_relay_core::QueueSpec;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default queue name.
pub const DEFAULT_QUEUE: &str = "orders";

/// Default dead-letter queue name.
pub const DEFAULT_DEAD_LETTER_QUEUE: &str = "orders.dead-letter";

/// Errors from loading configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Broker settings are invalid.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// A variable is set but cannot be parsed.
    #[error("Invalid value '{value}' for {key}")]
    Invalid {
        /// Environment variable name
        key: String,
        /// The rejected value
        value: String,
    },
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker connection
    pub amqp: AmqpSettings,
    /// Order queue (and its dead-letter queue)
    pub queue: QueueSpec,
    /// Unacked deliveries the worker may hold
    pub worker_prefetch: u16,
    /// HTTP server
    pub server: ServerConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

impl ServerConfig {
    /// `host:port` to bind.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// How long the worker may take to finish its in-flight message.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout)
    }
}

impl Config {
    /// Load configuration from the process environment, after reading `.env` if present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unparseable value or names an
    /// unknown profile or protocol.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);

        let profile = match vars.get("AMQP_CONNECTION_TYPE") {
            Some(value) => value.parse::<AmqpProfile>()?,
            None => AmqpProfile::default(),
        };
        let amqp = vars.amqp(profile)?;
        // Surface a bad protocol at startup rather than on first connect
        amqp.uri()?;

        let queue_name = vars
            .get("ORDERS_QUEUE")
            .unwrap_or_else(|| DEFAULT_QUEUE.to_string());
        let mut queue = QueueSpec::durable(queue_name);
        match vars.get_raw("ORDERS_DEAD_LETTER_QUEUE") {
            Some(dlq) if dlq.trim().is_empty() => {},
            Some(dlq) => queue = queue.with_dead_letter(dlq.trim()),
            None => queue = queue.with_dead_letter(DEFAULT_DEAD_LETTER_QUEUE),
        }

        Ok(Self {
            amqp,
            queue,
            worker_prefetch: vars.parse("WORKER_PREFETCH", 16)?,
            server: ServerConfig {
                host: vars.get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: vars.parse("PORT", 3002)?,
                shutdown_timeout: vars.parse("SHUTDOWN_TIMEOUT", 30)?,
            },
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn get_raw(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    /// Trimmed value; blank counts as unset.
    fn get(&self, key: &str) -> Option<String> {
        self.get_raw(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value,
            }),
            None => Ok(default),
        }
    }

    fn amqp(&self, profile: AmqpProfile) -> Result<AmqpSettings, ConfigError> {
        let prefix = match profile {
            AmqpProfile::Cloud => "AMQP_CLOUD",
            AmqpProfile::Local => "AMQP_LOCAL",
        };
        let defaults = AmqpSettings::for_profile(profile);
        let key = |name: &str| format!("{prefix}_{name}");

        Ok(AmqpSettings {
            protocol: self.get(&key("PROTOCOL")).unwrap_or(defaults.protocol.clone()),
            host: self.get(&key("HOST")).unwrap_or(defaults.host.clone()),
            port: self.parse(&key("PORT"), defaults.port)?,
            username: self.get(&key("USER")).unwrap_or(defaults.username.clone()),
            password: self.get(&key("PASS")).unwrap_or(defaults.password.clone()),
            vhost: self.get(&key("VHOST")).unwrap_or(defaults.vhost.clone()),
            ..defaults
        })
    }
}
