use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::Device;

/// Fixed column set; downstream consumers depend on this exact order
pub const CSV_HEADER: &str = "Timestamp,Device,MAC,IP,Signal,Status,Confidence,FirstSeen,ScanCount";

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed audit row: {0}")]
    MalformedRow(String),
}

pub type Result<T> = std::result::Result<T, AuditError>;

/// Append-only CSV audit trail
///
/// One row per device per cycle, never rewritten or deduplicated; the log
/// is the full observational history, not a snapshot table. A write failure
/// is recoverable: the caller keeps its in-memory cycle state and the next
/// cycle appends again.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one cycle: every device shares the cycle timestamp. Writes
    /// the header first if the destination is empty.
    pub fn append_cycle(&self, devices: &[Device], timestamp: DateTime<Utc>) -> Result<()> {
        if devices.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", CSV_HEADER)?;
        }

        let ts = timestamp.format(TS_FORMAT);
        for device in devices {
            writeln!(
                file,
                "{},{},{},{},{},{},{:.2},{},{}",
                ts,
                sanitize(&device.display_name),
                device.identity,
                device.addr,
                device.signal_score,
                device.status_str(),
                device.confidence,
                device.first_seen.format(TS_FORMAT),
                device.scan_count,
            )?;
        }

        file.flush()?;
        Ok(())
    }

    /// All rows currently in the log, header excluded
    pub fn read_all(&self) -> Result<Vec<AuditRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        content
            .lines()
            .skip(1)
            .filter(|line| !line.trim().is_empty())
            .map(AuditRecord::parse)
            .collect()
    }

    /// Rows belonging to the most recent cycle (the last timestamp group)
    pub fn latest_cycle(&self) -> Result<Vec<AuditRecord>> {
        let records = self.read_all()?;
        let Some(last_ts) = records.last().map(|r| r.timestamp) else {
            return Ok(Vec::new());
        };
        Ok(records
            .into_iter()
            .filter(|r| r.timestamp == last_ts)
            .collect())
    }

    /// The last `limit` signal samples recorded for an identity, oldest
    /// first
    pub fn signal_history(&self, identity: &str, limit: usize) -> Result<Vec<i16>> {
        let mut scores: Vec<i16> = self
            .read_all()?
            .into_iter()
            .filter(|r| r.identity == identity)
            .map(|r| r.signal)
            .collect();
        if scores.len() > limit {
            scores.drain(..scores.len() - limit);
        }
        Ok(scores)
    }
}

/// Commas in free-text fields would break the fixed column count
fn sanitize(field: &str) -> String {
    field.replace(',', " ")
}

/// One parsed audit row
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub display_name: String,
    pub identity: String,
    pub addr: String,
    pub signal: i16,
    pub status: String,
    pub confidence: f64,
    pub first_seen: DateTime<Utc>,
    pub scan_count: u64,
}

impl AuditRecord {
    fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 9 {
            return Err(AuditError::MalformedRow(line.to_string()));
        }

        let parse_ts = |s: &str| -> Result<DateTime<Utc>> {
            NaiveDateTime::parse_from_str(s, TS_FORMAT)
                .map(|naive| naive.and_utc())
                .map_err(|_| AuditError::MalformedRow(line.to_string()))
        };
        let malformed = || AuditError::MalformedRow(line.to_string());

        Ok(Self {
            timestamp: parse_ts(fields[0])?,
            display_name: fields[1].to_string(),
            identity: fields[2].to_string(),
            addr: fields[3].to_string(),
            signal: fields[4].parse().map_err(|_| malformed())?,
            status: fields[5].to_string(),
            confidence: fields[6].parse().map_err(|_| malformed())?,
            first_seen: parse_ts(fields[7])?,
            scan_count: fields[8].parse().map_err(|_| malformed())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identity;
    use chrono::TimeZone;

    fn device(mac: &str, addr: &str, score: i16, online: bool, scans: u64) -> Device {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        Device {
            identity: Identity::Physical(mac.to_string()),
            addr: addr.parse().unwrap(),
            display_name: "Unknown".to_string(),
            signal_score: score,
            online,
            first_seen: ts,
            last_seen: ts,
            scan_count: scans,
            confidence: 0.85,
            authorized: true,
        }
    }

    #[test]
    fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.csv"));
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        log.append_cycle(&[device("aa:bb:cc:11:22:33", "192.168.1.5", -45, true, 1)], ts)
            .unwrap();
        log.append_cycle(
            &[device("aa:bb:cc:11:22:33", "192.168.1.5", -50, true, 2)],
            ts + chrono::Duration::seconds(30),
        )
        .unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].contains("-45"));
        assert!(lines[2].contains("-50"));
    }

    #[test]
    fn test_rows_share_cycle_timestamp_and_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.csv"));
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        log.append_cycle(
            &[
                device("aa:bb:cc:11:22:33", "192.168.1.5", -45, true, 3),
                device("ff:ee:dd:00:11:22", "192.168.1.6", -100, false, 3),
            ],
            ts,
        )
        .unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, records[1].timestamp);
        assert_eq!(records[0].identity, "aa:bb:cc:11:22:33");
        assert_eq!(records[1].status, "Offline");
        assert_eq!(records[1].signal, -100);
        assert_eq!(records[0].confidence, 0.85);
        assert_eq!(records[0].scan_count, 3);
    }

    #[test]
    fn test_append_only_across_cycles() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.csv"));
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let mut expected_rows = 0;
        for cycle in 0..5 {
            let ts = t0 + chrono::Duration::seconds(30 * cycle);
            let devices: Vec<Device> = (0..=cycle)
                .map(|i| {
                    device(
                        &format!("aa:bb:cc:11:22:{:02}", i),
                        &format!("192.168.1.{}", 10 + i),
                        -45,
                        true,
                        1,
                    )
                })
                .collect();
            expected_rows += devices.len();
            log.append_cycle(&devices, ts).unwrap();
        }

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), expected_rows + 1);
    }

    #[test]
    fn test_latest_cycle_and_history_query() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.csv"));
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        for cycle in 0..3i16 {
            log.append_cycle(
                &[device(
                    "aa:bb:cc:11:22:33",
                    "192.168.1.5",
                    -40 - cycle,
                    true,
                    cycle as u64 + 1,
                )],
                t0 + chrono::Duration::seconds(30 * i64::from(cycle)),
            )
            .unwrap();
        }

        let latest = log.latest_cycle().unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].signal, -42);

        let history = log.signal_history("aa:bb:cc:11:22:33", 2).unwrap();
        assert_eq!(history, vec![-41, -42]);
    }

    #[test]
    fn test_comma_in_display_name_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.csv"));
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

        let mut d = device("aa:bb:cc:11:22:33", "192.168.1.5", -45, true, 1);
        d.display_name = "printer, upstairs".to_string();
        log.append_cycle(&[d], ts).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].display_name, "printer  upstairs");
    }

    #[test]
    fn test_empty_cycle_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("audit.csv"));
        log.append_cycle(&[], Utc::now()).unwrap();
        assert!(!log.path().exists());
    }
}
