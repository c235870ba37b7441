use crate::state::{ProbeStatus, ServiceRecord};
use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;

pub type PreviousRecords<'a> = HashMap<&'a str, &'a ServiceRecord>;

pub fn index_by_name(records: &[ServiceRecord]) -> PreviousRecords<'_> {
    records.iter().map(|r| (r.name.as_str(), r)).collect()
}

/// Timestamp of the most recent status transition for `name`.
///
/// A service seen for the first time, or whose status differs from the
/// previous cycle, changes now. Otherwise the previous timestamp carries over.
pub fn last_change(
    name: &str,
    status: ProbeStatus,
    previous: &PreviousRecords<'_>,
    now: DateTime<FixedOffset>,
) -> DateTime<FixedOffset> {
    match previous.get(name) {
        Some(prev) if prev.status == status => prev.last_change,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ProbeMetrics;

    fn ts(text: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(text).unwrap()
    }

    fn prev(name: &str, status: ProbeStatus, last_change: &str) -> ServiceRecord {
        ServiceRecord {
            name: name.to_string(),
            category: None,
            kind: "tcp".to_string(),
            important: false,
            icon: None,
            url: None,
            host: Some("nas.lan".to_string()),
            port: Some(22),
            status,
            last_change: ts(last_change),
            metrics: ProbeMetrics::Tcp { latency_ms: None },
        }
    }

    #[test]
    fn stable_status_keeps_previous_timestamp() {
        let records = vec![prev("nas", ProbeStatus::Up, "2024-05-01T08:00:00+00:00")];
        let index = index_by_name(&records);
        let now = ts("2024-05-01T09:00:00+00:00");

        let changed = last_change("nas", ProbeStatus::Up, &index, now);
        assert_eq!(changed, ts("2024-05-01T08:00:00+00:00"));
    }

    #[test]
    fn transition_resets_to_now() {
        let records = vec![prev("nas", ProbeStatus::Up, "2024-05-01T08:00:00+00:00")];
        let index = index_by_name(&records);
        let now = ts("2024-05-01T09:00:00+00:00");

        assert_eq!(last_change("nas", ProbeStatus::Down, &index, now), now);
        assert_eq!(last_change("nas", ProbeStatus::Unknown, &index, now), now);
    }

    #[test]
    fn first_sighting_uses_now() {
        let index = PreviousRecords::new();
        let now = ts("2024-05-01T09:00:00+00:00");
        assert_eq!(last_change("router", ProbeStatus::Down, &index, now), now);
    }

    #[test]
    fn stable_status_is_preserved_across_many_cycles() {
        let mut records = vec![prev("nas", ProbeStatus::Down, "2024-05-01T00:00:00+00:00")];
        for hour in 1..5 {
            let now = ts(&format!("2024-05-01T0{hour}:00:00+00:00"));
            let changed = {
                let index = index_by_name(&records);
                last_change("nas", ProbeStatus::Down, &index, now)
            };
            records[0].last_change = changed;
        }
        assert_eq!(records[0].last_change, ts("2024-05-01T00:00:00+00:00"));
    }
}
