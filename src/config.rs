use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";
pub const PRIVATE_CONFIG_PATH: &str = "./private/config.yaml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_site_title")]
    pub site_title: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,
    #[serde(default = "default_status_max_age", with = "humantime_duration")]
    pub status_max_age: Duration,
    #[serde(default)]
    pub probes: ProbeConfig,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub internet_services: Vec<ExternalServiceConfig>,
    #[serde(default)]
    pub internet_targets: Vec<String>,
    #[serde(default)]
    pub weather: WeatherConfig,
}

/// A locally hosted service shown on the dashboard.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(from = "RawServiceSpec", into = "RawServiceSpec")]
pub struct ServiceSpec {
    pub name: String,
    pub category: Option<String>,
    pub target: ServiceTarget,
    pub important: bool,
    pub icon: Option<String>,
}

/// What to probe and how. Kinds the prober does not understand are kept
/// as `Unknown` so the dashboard can still list them; a known kind missing
/// its address is `Incomplete` and always reported down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceTarget {
    Http {
        url: String,
    },
    Tcp {
        host: String,
        port: u16,
    },
    Ping {
        host: String,
    },
    Unknown {
        kind: String,
        url: Option<String>,
        host: Option<String>,
        port: Option<u16>,
    },
    Incomplete {
        kind: String,
        url: Option<String>,
        host: Option<String>,
        port: Option<u16>,
    },
}

impl ServiceTarget {
    pub fn kind(&self) -> &str {
        match self {
            Self::Http { .. } => "http",
            Self::Tcp { .. } => "tcp",
            Self::Ping { .. } => "ping",
            Self::Unknown { kind, .. } | Self::Incomplete { kind, .. } => kind,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Http { url } => Some(url),
            Self::Unknown { url, .. } | Self::Incomplete { url, .. } => url.as_deref(),
            _ => None,
        }
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            Self::Tcp { host, .. } | Self::Ping { host } => Some(host),
            Self::Unknown { host, .. } | Self::Incomplete { host, .. } => host.as_deref(),
            Self::Http { .. } => None,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Tcp { port, .. } => Some(*port),
            Self::Unknown { port, .. } | Self::Incomplete { port, .. } => *port,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
struct RawServiceSpec {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    category: Option<String>,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(default)]
    important: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
}

impl From<RawServiceSpec> for ServiceSpec {
    fn from(raw: RawServiceSpec) -> Self {
        let target = match (raw.kind.as_str(), &raw.url, &raw.host, raw.port) {
            ("http", Some(url), _, _) => ServiceTarget::Http { url: url.clone() },
            ("tcp", _, Some(host), Some(port)) => ServiceTarget::Tcp {
                host: host.clone(),
                port,
            },
            ("ping", _, Some(host), _) => ServiceTarget::Ping { host: host.clone() },
            ("http" | "tcp" | "ping", ..) => ServiceTarget::Incomplete {
                kind: raw.kind.clone(),
                url: raw.url.clone(),
                host: raw.host.clone(),
                port: raw.port,
            },
            (other, ..) => ServiceTarget::Unknown {
                kind: other.to_string(),
                url: raw.url.clone(),
                host: raw.host.clone(),
                port: raw.port,
            },
        };

        Self {
            name: raw.name,
            category: raw.category,
            target,
            important: raw.important,
            icon: raw.icon,
        }
    }
}

impl From<ServiceSpec> for RawServiceSpec {
    fn from(spec: ServiceSpec) -> Self {
        Self {
            kind: spec.target.kind().to_string(),
            url: spec.target.url().map(str::to_string),
            host: spec.target.host().map(str::to_string),
            port: spec.target.port(),
            name: spec.name,
            category: spec.category,
            important: spec.important,
            icon: spec.icon,
        }
    }
}

/// A hosted dependency outside the LAN, probed over HTTP only.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExternalServiceConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default = "default_tcp_timeout_ms")]
    pub tcp_timeout_ms: u64,
    #[serde(default = "default_ping_count")]
    pub ping_count: u32,
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
    #[serde(default = "default_ping_program")]
    pub ping_program: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            http_timeout_ms: default_http_timeout_ms(),
            tcp_timeout_ms: default_tcp_timeout_ms(),
            ping_count: default_ping_count(),
            ping_timeout_secs: default_ping_timeout_secs(),
            ping_program: default_ping_program(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WeatherConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub aurora_check: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("файл конфигурации не найден: {path}. Создайте config.yaml или private/config.yaml")]
    NotFound { path: String },
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    /// Picks the config file: an explicit path wins, then
    /// `private/config.yaml`, then `config.yaml`.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        let private = PathBuf::from(PRIVATE_CONFIG_PATH);
        if private.exists() {
            private
        } else {
            PathBuf::from(DEFAULT_CONFIG_PATH)
        }
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        if !path_ref.exists() {
            return Err(ConfigError::NotFound { path: path_display });
        }
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg = Self::from_yaml(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return serde_yaml::from_str("{}");
        }
        serde_yaml::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }
        if self.status_max_age.is_zero() {
            return Err(ConfigError::Validation(
                "status_max_age должно быть > 0".to_string(),
            ));
        }
        if let Some(name) = &self.timezone {
            if Tz::from_str(name).is_err() {
                return Err(ConfigError::Validation(format!(
                    "неизвестный часовой пояс '{name}'"
                )));
            }
        }

        validate_probes(&self.probes)?;
        for svc in &self.services {
            if let ServiceTarget::Incomplete { kind, .. } = &svc.target {
                warn!(service = %svc.name, kind = %kind, "в описании сервиса не хватает адреса, он будет считаться недоступным");
            }
        }
        validate_unique_names(
            "services",
            self.services.iter().map(|s| s.name.as_str()),
        )?;
        validate_unique_names(
            "internet_services",
            self.internet_services.iter().map(|s| s.name.as_str()),
        )?;
        for target in &self.internet_targets {
            if target.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "internet_targets не должен содержать пустых строк".to_string(),
                ));
            }
        }
        if self.weather.enabled && (self.weather.lat.is_none() || self.weather.lon.is_none()) {
            return Err(ConfigError::Validation(
                "weather.lat и weather.lon обязательны, когда weather.enabled = true".to_string(),
            ));
        }

        Ok(())
    }

    /// Zone used to stamp `checked_at` and `last_change`. Falls back to the
    /// host's local time when unset.
    pub fn time_zone(&self) -> Option<Tz> {
        self.timezone
            .as_deref()
            .and_then(|name| Tz::from_str(name).ok())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_probes(cfg: &ProbeConfig) -> Result<(), ConfigError> {
    if cfg.http_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "probes.http_timeout_ms должен быть > 0".to_string(),
        ));
    }
    if cfg.tcp_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "probes.tcp_timeout_ms должен быть > 0".to_string(),
        ));
    }
    if cfg.ping_count < 1 {
        return Err(ConfigError::Validation(
            "probes.ping_count должно быть >= 1".to_string(),
        ));
    }
    if cfg.ping_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "probes.ping_timeout_secs должен быть > 0".to_string(),
        ));
    }
    if cfg.ping_program.trim().is_empty() {
        return Err(ConfigError::Validation(
            "probes.ping_program не должен быть пустым".to_string(),
        ));
    }
    Ok(())
}

fn validate_unique_names<'a>(
    section: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{section}[*].name не должен быть пустым"
            )));
        }
        if !seen.insert(name) {
            return Err(ConfigError::Validation(format!(
                "имя '{name}' в {section} должно быть уникальным"
            )));
        }
    }
    Ok(())
}

mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_site_title() -> String {
    "Home Portal".to_string()
}

fn default_status_file() -> PathBuf {
    PathBuf::from("./status.json")
}

const fn default_status_max_age() -> Duration {
    Duration::from_secs(30)
}

const fn default_http_timeout_ms() -> u64 {
    3000
}

const fn default_tcp_timeout_ms() -> u64 {
    2000
}

const fn default_ping_count() -> u32 {
    2
}

const fn default_ping_timeout_secs() -> u64 {
    1
}

fn default_ping_program() -> String {
    "ping".to_string()
}
