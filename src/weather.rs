use crate::config::WeatherConfig;
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDateTime, Offset, Utc};
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const OPEN_METEO_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
const OPEN_METEO_AURORA_URL: &str = "https://api.open-meteo.com/v1/aurora";
const NOAA_POINTS_URL: &str = "https://api.weather.gov/points";
const NOAA_USER_AGENT: &str = "HomePortal/1.0 (local)";
const NOAA_ACCEPT: &str = "application/geo+json";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const FORECAST_HOURS: usize = 6;
const NOAA_PERIODS: usize = 12;

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("ошибка запроса погоды: {0}")]
    Request(#[from] reqwest::Error),
    #[error("в ответе нет поля {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WeatherReport {
    Available(Box<Weather>),
    Unavailable { available: bool, reason: &'static str },
}

impl WeatherReport {
    fn unavailable(reason: &'static str) -> Self {
        Self::Unavailable {
            available: false,
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Weather {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<&'static str>,
    pub temperature: Option<f64>,
    pub windspeed: Option<f64>,
    pub weathercode: Option<i64>,
    pub is_day: bool,
    pub hourly: Vec<HourlyForecast>,
    pub aurora: Aurora,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyForecast {
    pub time: String,
    pub temperature: f64,
    pub precipitation_probability: Option<f64>,
    pub weathercode: Option<i64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aurora {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl Aurora {
    fn unavailable(reason: &'static str) -> Self {
        Self {
            available: false,
            reason: Some(reason),
            probability: None,
            time: None,
            active: None,
            degraded: false,
        }
    }

    fn degraded() -> Self {
        Self {
            available: true,
            reason: None,
            probability: Some(0.0),
            time: None,
            active: Some(false),
            degraded: true,
        }
    }
}

#[derive(Clone)]
pub struct WeatherClient {
    client: Client,
}

impl WeatherClient {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    pub async fn report(&self, cfg: &WeatherConfig) -> WeatherReport {
        if !cfg.enabled {
            return WeatherReport::unavailable("weather disabled in config");
        }
        let (Some(lat), Some(lon)) = (cfg.lat, cfg.lon) else {
            return WeatherReport::unavailable("weather location not configured");
        };

        if is_us_location(lat, lon) {
            match self.fetch_noaa(lat, lon).await {
                Ok(Some(weather)) => return WeatherReport::Available(Box::new(weather)),
                Ok(None) => debug!("NOAA returned no forecast, falling back to Open-Meteo"),
                Err(err) => warn!(error = %err, "NOAA request failed"),
            }
        }

        match self.fetch_open_meteo(cfg, lat, lon).await {
            Ok(weather) => WeatherReport::Available(Box::new(weather)),
            Err(err) => {
                warn!(error = %err, "Open-Meteo request failed");
                WeatherReport::unavailable("network error or API unavailable")
            }
        }
    }

    async fn fetch_noaa(&self, lat: f64, lon: f64) -> Result<Option<Weather>, WeatherError> {
        let points: Value = self
            .client
            .get(format!("{NOAA_POINTS_URL}/{lat},{lon}"))
            .header(USER_AGENT, NOAA_USER_AGENT)
            .header(ACCEPT, NOAA_ACCEPT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let Some(hourly_url) = points["properties"]["forecastHourly"].as_str() else {
            return Ok(None);
        };

        let hourly: Value = self
            .client
            .get(hourly_url)
            .header(USER_AGENT, NOAA_USER_AGENT)
            .header(ACCEPT, NOAA_ACCEPT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let periods = hourly["properties"]["periods"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        Ok(noaa_weather(&periods))
    }

    async fn fetch_open_meteo(
        &self,
        cfg: &WeatherConfig,
        lat: f64,
        lon: f64,
    ) -> Result<Weather, WeatherError> {
        let mut params = vec![
            ("latitude", lat.to_string()),
            ("longitude", lon.to_string()),
            ("current_weather", "true".to_string()),
            (
                "hourly",
                "temperature_2m,precipitation_probability,weathercode".to_string(),
            ),
            ("forecast_days", "1".to_string()),
        ];
        if let Some(tz) = &cfg.timezone {
            params.push(("timezone", tz.clone()));
        }

        let data: Value = self
            .client
            .get(OPEN_METEO_FORECAST_URL)
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let current = data
            .get("current_weather")
            .ok_or(WeatherError::Missing("current_weather"))?;
        let offset = data["utc_offset_seconds"]
            .as_i64()
            .and_then(|secs| FixedOffset::east_opt(secs as i32))
            .unwrap_or_else(|| Utc.fix());
        let hourly = build_hourly_forecast(
            data.get("hourly"),
            Some(current),
            offset,
            Utc::now(),
            FORECAST_HOURS,
        );
        let aurora = if cfg.aurora_check {
            self.fetch_aurora(lat, lon).await
        } else {
            Aurora::unavailable("aurora check disabled")
        };

        Ok(Weather {
            available: true,
            provider: None,
            temperature: current["temperature"].as_f64(),
            windspeed: current["windspeed"].as_f64(),
            weathercode: current["weathercode"].as_i64(),
            is_day: current["is_day"].as_i64().map_or(true, |v| v != 0),
            hourly,
            aurora,
            raw: data.clone(),
        })
    }

    async fn fetch_aurora(&self, lat: f64, lon: f64) -> Aurora {
        match self.request_aurora(lat, lon).await {
            Ok(data) => aurora_from_response(&data),
            Err(err) => {
                warn!(error = %err, "aurora request failed");
                Aurora::degraded()
            }
        }
    }

    async fn request_aurora(&self, lat: f64, lon: f64) -> Result<Value, reqwest::Error> {
        let params = [
            ("latitude", lat.to_string()),
            ("longitude", lon.to_string()),
            ("forecast_hours", "1".to_string()),
            ("forecast_days", "1".to_string()),
            ("hourly", "aurora_probability".to_string()),
        ];
        self.client
            .get(OPEN_METEO_AURORA_URL)
            .query(&params)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

impl Default for WeatherClient {
    fn default() -> Self {
        Self::new()
    }
}

fn aurora_from_response(data: &Value) -> Aurora {
    let hourly = &data["hourly"];
    let probs = hourly["aurora_probability"]
        .as_array()
        .filter(|a| !a.is_empty())
        .or_else(|| hourly["probability"].as_array().filter(|a| !a.is_empty()));
    let Some(probs) = probs else {
        return Aurora::unavailable("aurora probability missing");
    };
    let probability = probs[0].as_f64();
    Aurora {
        available: true,
        reason: None,
        probability,
        time: hourly["time"][0].as_str().map(str::to_string),
        active: Some(probability.is_some_and(|p| p >= 50.0)),
        degraded: false,
    }
}

fn noaa_weather(periods: &[Value]) -> Option<Weather> {
    let current = periods.first()?;
    let hourly = periods
        .iter()
        .take(NOAA_PERIODS)
        .filter_map(|period| {
            let temperature = fahrenheit_to_c(period["temperature"].as_f64())?;
            Some(HourlyForecast {
                time: period["startTime"].as_str().unwrap_or_default().to_string(),
                temperature,
                precipitation_probability: period["probabilityOfPrecipitation"]["value"].as_f64(),
                weathercode: Some(map_noaa_condition(period["shortForecast"].as_str())),
                fallback: false,
            })
        })
        .collect();

    Some(Weather {
        available: true,
        provider: Some("noaa"),
        temperature: fahrenheit_to_c(current["temperature"].as_f64()),
        windspeed: current["windSpeed"].as_str().and_then(parse_wind_speed),
        weathercode: Some(map_noaa_condition(current["shortForecast"].as_str())),
        is_day: current["isDaytime"].as_bool().unwrap_or(true),
        hourly,
        aurora: Aurora::unavailable("aurora data not provided for NOAA"),
        raw: json!({ "noaa": { "current": current } }),
    })
}

/// NOAA only covers the continental US, Alaska and nearby territories.
pub fn is_us_location(lat: f64, lon: f64) -> bool {
    (18.0..=72.0).contains(&lat) && (-170.0..=-60.0).contains(&lon)
}

pub fn fahrenheit_to_c(temp: Option<f64>) -> Option<f64> {
    temp.map(|f| round1((f - 32.0) * 5.0 / 9.0))
}

/// "10 to 15 mph" -> km/h of the last number.
pub fn parse_wind_speed(value: &str) -> Option<f64> {
    let mph = value
        .split(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .filter_map(|token| token.parse::<f64>().ok())
        .last()?;
    Some(round1(mph * 1.60934))
}

/// Maps a NOAA short forecast to the closest WMO weather code.
pub fn map_noaa_condition(text: Option<&str>) -> i64 {
    const TABLE: [(&str, i64); 12] = [
        ("thunder", 95),
        ("snow", 85),
        ("sleet", 77),
        ("hail", 96),
        ("rain", 63),
        ("showers", 80),
        ("drizzle", 55),
        ("fog", 45),
        ("cloudy", 3),
        ("overcast", 3),
        ("sunny", 0),
        ("clear", 0),
    ];
    let Some(text) = text else {
        return 0;
    };
    let normalized = text.to_lowercase();
    TABLE
        .iter()
        .find(|(keyword, _)| normalized.contains(keyword))
        .map_or(0, |(_, code)| *code)
}

/// Upcoming hours from an Open-Meteo `hourly` block. Times without an offset
/// are read in `offset`, the zone Open-Meteo answered in.
pub fn build_hourly_forecast(
    hourly: Option<&Value>,
    current: Option<&Value>,
    offset: FixedOffset,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<HourlyForecast> {
    let Some(hourly) = hourly else {
        return fallback_forecast(current, now, limit);
    };
    let times = hourly["time"].as_array().cloned().unwrap_or_default();
    let temps = &hourly["temperature_2m"];
    let pops = &hourly["precipitation_probability"];
    let codes = &hourly["weathercode"];

    let mut forecast = Vec::with_capacity(limit);
    for (idx, time) in times.iter().enumerate() {
        if forecast.len() >= limit {
            break;
        }
        let Some(time) = time.as_str() else {
            continue;
        };
        let Some(at) = parse_forecast_time(time, offset) else {
            continue;
        };
        let Some(temperature) = temps[idx].as_f64() else {
            continue;
        };
        if at < now {
            continue;
        }
        forecast.push(HourlyForecast {
            time: time.to_string(),
            temperature,
            precipitation_probability: pops[idx].as_f64(),
            weathercode: codes[idx].as_i64(),
            fallback: false,
        });
    }

    if forecast.is_empty() {
        fallback_forecast(current, now, limit)
    } else {
        forecast
    }
}

/// Repeats the current temperature for the next hours when no hourly data
/// is usable.
pub fn fallback_forecast(
    current: Option<&Value>,
    now: DateTime<Utc>,
    limit: usize,
) -> Vec<HourlyForecast> {
    let Some(current) = current else {
        return Vec::new();
    };
    let Some(temperature) = current["temperature"].as_f64() else {
        return Vec::new();
    };
    let weathercode = current["weathercode"].as_i64();
    (1..=limit as i64)
        .map(|hours| HourlyForecast {
            time: (now + ChronoDuration::hours(hours)).to_rfc3339(),
            temperature,
            precipitation_probability: None,
            weathercode,
            fallback: true,
        })
        .collect()
}

fn parse_forecast_time(text: &str, offset: FixedOffset) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .and_then(|naive| naive.and_local_timezone(offset).single())
        .map(|at| at.with_timezone(&Utc))
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(text: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(text).unwrap().with_timezone(&Utc)
    }

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn us_bounding_box() {
        assert!(is_us_location(40.7, -74.0));
        assert!(is_us_location(61.2, -149.9));
        assert!(!is_us_location(52.5, 13.4));
        assert!(!is_us_location(21.3, -177.8));
    }

    #[test]
    fn converts_noaa_units() {
        assert_eq!(fahrenheit_to_c(Some(212.0)), Some(100.0));
        assert_eq!(fahrenheit_to_c(Some(70.0)), Some(21.1));
        assert_eq!(fahrenheit_to_c(None), None);
        assert_eq!(parse_wind_speed("10 to 15 mph"), Some(24.1));
        assert_eq!(parse_wind_speed("5 mph"), Some(8.0));
        assert_eq!(parse_wind_speed("calm"), None);
    }

    #[test]
    fn maps_short_forecasts_in_table_order() {
        assert_eq!(map_noaa_condition(Some("Chance Showers And Thunderstorms")), 95);
        assert_eq!(map_noaa_condition(Some("Light Rain")), 63);
        assert_eq!(map_noaa_condition(Some("Mostly Cloudy")), 3);
        assert_eq!(map_noaa_condition(Some("Sunny")), 0);
        assert_eq!(map_noaa_condition(Some("Haze")), 0);
        assert_eq!(map_noaa_condition(None), 0);
    }

    #[test]
    fn hourly_forecast_skips_past_hours_and_gaps() {
        let hourly = json!({
            "time": ["2024-05-01T09:00", "2024-05-01T11:00", "2024-05-01T12:00", "2024-05-01T13:00"],
            "temperature_2m": [10.0, 11.5, null, 13.0],
            "precipitation_probability": [0, 20, 30, 40],
            "weathercode": [0, 3, 61, 63],
        });
        let forecast = build_hourly_forecast(
            Some(&hourly),
            None,
            utc(),
            at("2024-05-01T10:30:00Z"),
            6,
        );

        assert_eq!(forecast.len(), 2);
        assert_eq!(forecast[0].time, "2024-05-01T11:00");
        assert_eq!(forecast[0].temperature, 11.5);
        assert_eq!(forecast[0].precipitation_probability, Some(20.0));
        assert_eq!(forecast[1].weathercode, Some(63));
    }

    #[test]
    fn hourly_forecast_respects_response_offset() {
        let hourly = json!({
            "time": ["2024-05-01T12:00"],
            "temperature_2m": [18.0],
        });
        let berlin_summer = FixedOffset::east_opt(2 * 3600).unwrap();
        // 12:00+02:00 is 10:00Z, already past at 10:30Z.
        let forecast = build_hourly_forecast(
            Some(&hourly),
            Some(&json!({"temperature": 17.0, "weathercode": 1})),
            berlin_summer,
            at("2024-05-01T10:30:00Z"),
            3,
        );
        assert!(forecast.iter().all(|h| h.fallback));
        assert_eq!(forecast.len(), 3);
    }

    #[test]
    fn fallback_repeats_current_conditions() {
        let now = at("2024-05-01T10:00:00Z");
        let current = json!({"temperature": 7.5, "weathercode": 2});
        let forecast = build_hourly_forecast(None, Some(&current), utc(), now, 6);

        assert_eq!(forecast.len(), 6);
        assert!(forecast.iter().all(|h| h.fallback && h.temperature == 7.5));
        assert_eq!(forecast[0].time, at("2024-05-01T11:00:00Z").to_rfc3339());
        assert!(fallback_forecast(Some(&json!({})), now, 6).is_empty());
        assert!(fallback_forecast(None, now, 6).is_empty());
    }

    #[test]
    fn noaa_periods_become_weather() {
        let periods = vec![json!({
            "startTime": "2024-05-01T10:00:00-04:00",
            "temperature": 68,
            "windSpeed": "5 to 10 mph",
            "shortForecast": "Partly Sunny",
            "isDaytime": true,
            "probabilityOfPrecipitation": {"value": 10}
        })];
        let weather = noaa_weather(&periods).unwrap();

        assert_eq!(weather.provider, Some("noaa"));
        assert_eq!(weather.temperature, Some(20.0));
        assert_eq!(weather.windspeed, Some(16.1));
        assert_eq!(weather.weathercode, Some(0));
        assert_eq!(weather.hourly.len(), 1);
        assert!(!weather.aurora.available);
        assert!(noaa_weather(&[]).is_none());
    }

    #[test]
    fn aurora_probability_threshold() {
        let data = json!({"hourly": {"time": ["2024-05-01T22:00"], "aurora_probability": [55]}});
        let aurora = aurora_from_response(&data);
        assert_eq!(aurora.probability, Some(55.0));
        assert_eq!(aurora.active, Some(true));

        let missing = aurora_from_response(&json!({"hourly": {}}));
        assert!(!missing.available);
        assert_eq!(missing.reason, Some("aurora probability missing"));
    }

    #[tokio::test]
    async fn disabled_weather_is_unavailable() {
        let report = WeatherClient::new().report(&WeatherConfig::default()).await;
        let body = serde_json::to_value(&report).unwrap();
        assert_eq!(body["available"], false);
        assert_eq!(body["reason"], "weather disabled in config");
    }
}
