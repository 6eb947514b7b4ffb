use crate::core::{Record, Value};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Occurrences of one `event_hash`.
#[derive(Debug, Clone)]
pub struct HashGroup {
    pub event_hash: String,
    pub count: usize,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    /// Most recent row of the group.
    pub sample: Record,
}

/// Groups rows by `event_hash`, most frequent first. Rows without a hash are
/// skipped.
pub fn summarize_by_hash(rows: &[Record]) -> Vec<HashGroup> {
    let mut groups: HashMap<String, HashGroup> = HashMap::new();

    for row in rows {
        let Some(hash) = row.get("event_hash").and_then(Value::as_str) else {
            continue;
        };
        let seen = row.get("occurred_at").and_then(timestamp_of);

        let group = groups.entry(hash.to_string()).or_insert_with(|| HashGroup {
            event_hash: hash.to_string(),
            count: 0,
            first_seen: None,
            last_seen: None,
            sample: row.clone(),
        });
        group.count += 1;

        if let Some(seen) = seen {
            if group.first_seen.is_none_or(|first| seen < first) {
                group.first_seen = Some(seen);
            }
            if group.last_seen.is_none_or(|last| seen >= last) {
                group.last_seen = Some(seen);
                group.sample = row.clone();
            }
        }
    }

    let mut groups: Vec<HashGroup> = groups.into_values().collect();
    groups.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| b.last_seen.cmp(&a.last_seen))
            .then_with(|| a.event_hash.cmp(&b.event_hash))
    });
    groups
}

fn timestamp_of(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Timestamp(ts) => Some(*ts),
        Value::Text(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        _ => None,
    }
}
