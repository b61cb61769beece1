//! Stats snapshot document.
//!
//! The snapshot is the only artifact of an aggregation run. It is
//! recomputed in full every time and written atomically.

use crate::storage::StoreError;
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Producer name recorded in snapshots.
pub const PRODUCER_NAME: &str = "typing-rhythm";

/// Derived statistics over one or more daily logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub generated_at: DateTime<Local>,
    pub producer: Producer,
    /// Daily log file names the snapshot was computed from
    pub source_files: Vec<String>,
    pub wpm_series: Vec<WpmPoint>,
    pub interval_distribution: IntervalDistribution,
    pub bursts: Vec<Burst>,
    pub summary: Summary,
}

/// Producer metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
}

impl Default for Producer {
    fn default() -> Self {
        Self {
            name: PRODUCER_NAME.to_string(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// Typing speed over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WpmPoint {
    pub window_start: NaiveDateTime,
    pub wpm: f64,
}

/// Histogram and moments of inter-key intervals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalDistribution {
    /// Bucket label to count, in ascending bucket order
    #[serde(with = "bucket_map")]
    pub buckets: Vec<(String, u64)>,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub percentiles: Percentiles,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

/// A maximal run of fast keystrokes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Burst {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub event_count: usize,
    pub duration_ms: u64,
}

/// Headline counters. Computed over all data, before output limits apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_events: usize,
    pub total_sessions: usize,
    pub avg_interval_ms: f64,
    pub median_interval_ms: f64,
    pub backspace_ratio: f64,
    pub avg_wpm: f64,
    pub total_bursts: usize,
    pub avg_burst_length: f64,
    pub skipped_rows: usize,
    pub files_read: usize,
}

/// Write `snapshot` as pretty JSON to `path`.
///
/// The document is written to a sibling temp file, synced, then renamed over
/// `path`, so readers never observe a partial file.
pub fn write_snapshot(snapshot: &StatsSnapshot, path: &Path) -> crate::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(StoreError::io(parent))?;
    }

    let json = serde_json::to_vec_pretty(snapshot)?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);

    let mut file = std::fs::File::create(&tmp_path).map_err(StoreError::io(&tmp_path))?;
    file.write_all(&json)
        .and_then(|()| file.write_all(b"\n"))
        .and_then(|()| file.sync_all())
        .map_err(StoreError::io(&tmp_path))?;
    drop(file);

    std::fs::rename(&tmp_path, path).map_err(StoreError::io(path))?;
    tracing::info!(path = %path.display(), "wrote stats snapshot");
    Ok(())
}

/// Read a previously written snapshot.
pub fn read_snapshot(path: &Path) -> crate::Result<StatsSnapshot> {
    let content = std::fs::read_to_string(path).map_err(StoreError::io(path))?;
    Ok(serde_json::from_str(&content)?)
}

/// Serde support for ordered bucket maps.
///
/// Buckets serialize as a JSON object whose keys keep histogram order.
mod bucket_map {
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(buckets: &[(String, u64)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(buckets.len()))?;
        for (label, count) in buckets {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, u64)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct BucketVisitor;

        impl<'de> Visitor<'de> for BucketVisitor {
            type Value = Vec<(String, u64)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of bucket label to count")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut buckets = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((label, count)) = access.next_entry::<String, u64>()? {
                    buckets.push((label, count));
                }
                Ok(buckets)
            }
        }

        deserializer.deserialize_map(BucketVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn sample() -> StatsSnapshot {
        let start = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        StatsSnapshot {
            generated_at: Local.with_ymd_and_hms(2024, 1, 16, 8, 0, 0).single().unwrap(),
            producer: Producer::default(),
            source_files: vec!["keystrokes_2024-01-15.csv".to_string()],
            wpm_series: vec![WpmPoint {
                window_start: start,
                wpm: 42.0,
            }],
            interval_distribution: IntervalDistribution {
                buckets: vec![
                    ("<50".to_string(), 1),
                    ("50-100".to_string(), 3),
                    ("2000+".to_string(), 0),
                ],
                ..Default::default()
            },
            bursts: vec![],
            summary: Summary::default(),
        }
    }

    #[test]
    fn test_buckets_serialize_as_ordered_object() {
        let json = serde_json::to_value(sample()).unwrap();
        let buckets = &json["interval_distribution"]["buckets"];
        assert_eq!(buckets["<50"], 1);
        assert_eq!(buckets["50-100"], 3);

        let text = serde_json::to_string(&sample()).unwrap();
        let lt = text.find("\"<50\"").unwrap();
        let mid = text.find("\"50-100\"").unwrap();
        let top = text.find("\"2000+\"").unwrap();
        assert!(lt < mid && mid < top);
    }

    #[test]
    fn test_write_is_readable_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("typing_stats.json");

        write_snapshot(&sample(), &path).unwrap();
        assert_eq!(read_snapshot(&path).unwrap(), sample());

        let names: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("typing_stats.json")]);
    }

    #[test]
    fn test_producer_metadata() {
        let producer = Producer::default();
        assert_eq!(producer.name, "typing-rhythm");
        assert_eq!(producer.version, crate::VERSION);
    }
}
