//! Process configuration, read from the environment (and an optional `.env` file).

use crate::geo::GeoPoint;
use crate::tracker::TrackerSettings;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Which browser origins may open connections.
#[derive(Debug, Clone, PartialEq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

impl AllowedOrigins {
    fn parse(raw: &str) -> Self {
        let origins: Vec<String> = raw
            .split(',')
            .map(|origin| origin.trim().trim_end_matches('/').to_string())
            .filter(|origin| !origin.is_empty())
            .collect();
        if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
            AllowedOrigins::Any
        } else {
            AllowedOrigins::List(origins)
        }
    }

    /// Requests without an `Origin` header come from non-browser clients and are allowed.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        match (self, origin) {
            (AllowedOrigins::Any, _) | (_, None) => true,
            (AllowedOrigins::List(list), Some(origin)) => {
                let origin = origin.trim_end_matches('/');
                list.iter().any(|allowed| allowed == origin)
            }
        }
    }
}

/// Store credentials. Never printed.
#[derive(Clone, PartialEq)]
pub struct Credentials(String);

impl Credentials {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credentials(***)")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub allowed_origins: AllowedOrigins,
    pub store_endpoint: Option<String>,
    pub store_credentials: Option<Credentials>,
    pub store_seed_file: Option<PathBuf>,
    pub store_timeout: Duration,
    pub tracker_idle: Duration,
    pub outbound_buffer: usize,
    pub write_buffer: usize,
    pub origin: Option<GeoPoint>,
    pub map_tile_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            allowed_origins: AllowedOrigins::Any,
            store_endpoint: None,
            store_credentials: None,
            store_seed_file: None,
            store_timeout: Duration::from_millis(3000),
            tracker_idle: Duration::from_secs(300),
            outbound_buffer: 64,
            write_buffer: 16,
            origin: None,
            map_tile_url: None,
        }
    }
}

impl Config {
    /// Read the process environment after loading `.env`, if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; unset or blank keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let origin = match (get("ORIGIN_LAT"), get("ORIGIN_LNG")) {
            (None, None) => None,
            (Some(lat), Some(lng)) => {
                let point = GeoPoint::new(parse("ORIGIN_LAT", &lat)?, parse("ORIGIN_LNG", &lng)?);
                if !point.is_valid() {
                    return Err(invalid("ORIGIN_LAT", format!("{lat},{lng}"), "coordinates out of range"));
                }
                Some(point)
            }
            (Some(lat), None) => return Err(invalid("ORIGIN_LNG", lat, "ORIGIN_LAT and ORIGIN_LNG must be set together")),
            (None, Some(lng)) => return Err(invalid("ORIGIN_LAT", lng, "ORIGIN_LAT and ORIGIN_LNG must be set together")),
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: get("PORT").map(|v| parse("PORT", &v)).transpose()?.unwrap_or(defaults.port),
            allowed_origins: get("ALLOWED_ORIGINS")
                .map(|v| AllowedOrigins::parse(&v))
                .unwrap_or(defaults.allowed_origins),
            store_endpoint: get("STORE_ENDPOINT"),
            store_credentials: get("STORE_CREDENTIALS").map(Credentials),
            store_seed_file: get("STORE_SEED_FILE").map(PathBuf::from),
            store_timeout: get("STORE_TIMEOUT_MS")
                .map(|v| positive("STORE_TIMEOUT_MS", &v).map(Duration::from_millis))
                .transpose()?
                .unwrap_or(defaults.store_timeout),
            tracker_idle: get("TRACKER_IDLE_SECS")
                .map(|v| positive("TRACKER_IDLE_SECS", &v).map(Duration::from_secs))
                .transpose()?
                .unwrap_or(defaults.tracker_idle),
            outbound_buffer: get("OUTBOUND_BUFFER")
                .map(|v| positive("OUTBOUND_BUFFER", &v).map(|n| n as usize))
                .transpose()?
                .unwrap_or(defaults.outbound_buffer),
            write_buffer: get("WRITE_BUFFER")
                .map(|v| positive("WRITE_BUFFER", &v).map(|n| n as usize))
                .transpose()?
                .unwrap_or(defaults.write_buffer),
            origin,
            map_tile_url: get("MAP_TILE_URL"),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            store_timeout: self.store_timeout,
            idle_timeout: self.tracker_idle,
            write_buffer: self.write_buffer,
            origin: self.origin,
            ..TrackerSettings::default()
        }
    }
}

fn invalid(key: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        value,
        reason: reason.into(),
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| invalid(key, value.to_string(), e.to_string()))
}

fn positive(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match parse::<u64>(key, value)? {
        0 => Err(invalid(key, value.to_string(), "must be greater than zero")),
        n => Ok(n),
    }
}
