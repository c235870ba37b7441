use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Up,
    Down,
    Unknown,
}

/// Timing reported by a probe. The variant decides which keys appear in the
/// persisted record; each key is present but may be null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProbeMetrics {
    Http {
        #[serde(deserialize_with = "present_nullable")]
        response_time_ms: Option<f64>,
        #[serde(default)]
        http_status: Option<u16>,
    },
    Tcp {
        #[serde(deserialize_with = "present_nullable")]
        latency_ms: Option<f64>,
    },
    Ping {
        #[serde(deserialize_with = "present_nullable")]
        avg_rtt_ms: Option<f64>,
    },
    None {},
}

impl ProbeMetrics {
    /// Single latency figure regardless of protocol.
    pub fn latency_ms(&self) -> Option<f64> {
        match self {
            Self::Http {
                response_time_ms, ..
            } => *response_time_ms,
            Self::Tcp { latency_ms } => *latency_ms,
            Self::Ping { avg_rtt_ms } => *avg_rtt_ms,
            Self::None {} => None,
        }
    }
}

// Untagged variants are told apart by which key exists, so a missing key
// must fail instead of defaulting to None.
fn present_nullable<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub status: ProbeStatus,
    pub metrics: ProbeMetrics,
}

impl ProbeResult {
    pub fn http(status_code: Option<u16>, up: bool, response_time_ms: Option<f64>) -> Self {
        Self {
            status: if up { ProbeStatus::Up } else { ProbeStatus::Down },
            metrics: ProbeMetrics::Http {
                response_time_ms: response_time_ms.map(round_ms),
                http_status: status_code,
            },
        }
    }

    pub fn tcp(latency_ms: Option<f64>) -> Self {
        Self {
            status: status_from(latency_ms.is_some()),
            metrics: ProbeMetrics::Tcp {
                latency_ms: latency_ms.map(round_ms),
            },
        }
    }

    pub fn ping(avg_rtt_ms: Option<f64>) -> Self {
        Self {
            status: status_from(avg_rtt_ms.is_some()),
            metrics: ProbeMetrics::Ping {
                avg_rtt_ms: avg_rtt_ms.map(round_ms),
            },
        }
    }

    pub fn unknown() -> Self {
        Self {
            status: ProbeStatus::Unknown,
            metrics: ProbeMetrics::None {},
        }
    }
}

fn status_from(up: bool) -> ProbeStatus {
    if up {
        ProbeStatus::Up
    } else {
        ProbeStatus::Down
    }
}

pub fn round_ms(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub important: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub status: ProbeStatus,
    pub last_change: DateTime<FixedOffset>,
    #[serde(flatten)]
    pub metrics: ProbeMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternetSummary {
    pub online: bool,
    pub reachable_targets: usize,
    pub total_targets: usize,
    pub avg_rtt_ms: Option<f64>,
}

/// Result of one full probing cycle, as written to the status file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub checked_at: DateTime<FixedOffset>,
    pub internet: InternetSummary,
    #[serde(default)]
    pub services: Vec<ServiceRecord>,
    #[serde(default)]
    pub internet_services: Vec<ServiceRecord>,
}

impl Snapshot {
    pub fn all_records(&self) -> impl Iterator<Item = (&'static str, &ServiceRecord)> {
        self.services
            .iter()
            .map(|r| ("local", r))
            .chain(self.internet_services.iter().map(|r| ("internet", r)))
    }
}
