use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::models::{AlertRecord, Geolocation, Meta, PortSpec, ThreatEvent, ThreatKind, ThreatRecord};

/// Timestamp format of the `threats` view; second precision, matches the
/// legacy CSV so migrated and live rows share the unique index.
const THREAT_TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Filter for alert listing; `kind` wins when both are set
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub kind: Option<String>,
    pub ip: Option<String>,
}

/// Aggregate counts over the alerts view
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AlertStats {
    pub total: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_ip: BTreeMap<String, u64>,
    pub recent_24h: u64,
}

/// Last-24h aggregates over the threats view, used by the chat endpoint
#[derive(Debug, Clone, Default)]
pub struct ThreatSummary {
    pub total_24h: u64,
    pub by_kind: Vec<(String, u64)>,
    pub top_sources: Vec<(String, u64)>,
    pub recent_6h: u64,
    pub previous_6h: u64,
    pub avg_syn_ack_ratio: Option<f64>,
}

impl ThreatSummary {
    /// Average events/hour over the last 6 h vs the 6 h before, with a
    /// 10% dead band.
    pub fn trend(&self) -> &'static str {
        let recent = self.recent_6h as f64 / 6.0;
        let previous = self.previous_6h as f64 / 6.0;
        if recent > previous * 1.1 {
            "increasing"
        } else if recent < previous * 0.9 {
            "decreasing"
        } else {
            "stable"
        }
    }
}

/// A raw row for bulk ingestion from the legacy CSV log
#[derive(Debug, Clone)]
pub struct RawThreatRow {
    pub timestamp: String,
    pub kind: String,
    pub source_ip: String,
    pub destination_ip: String,
    pub ports: Option<String>,
}

/// Thread-safe event log wrapper.
///
/// Writers serialize on the connection mutex; appends to `threats` signal
/// a watch channel so tail subscribers wake without polling.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    notify: Arc<watch::Sender<i64>>,
}

impl Database {
    /// Open or create the event log at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database: {}", path.as_ref().display()))?;

        Self::from_connection(conn)
    }

    /// Open an in-memory event log (for testing)
    pub fn open_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            notify: Arc::new(watch::channel(0).0),
        };
        db.init_schema()?;
        let _ = db.notify.send_replace(db.max_threat_id()?);
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            -- Every detection, throttled or not
            CREATE TABLE IF NOT EXISTS threats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                threat_type TEXT NOT NULL,
                source_ip TEXT NOT NULL,
                destination_ip TEXT,
                ports TEXT,
                meta TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_threats_unique
                ON threats(timestamp, threat_type, source_ip, destination_ip, ports);
            CREATE INDEX IF NOT EXISTS idx_threats_source ON threats(source_ip);
            CREATE INDEX IF NOT EXISTS idx_threats_timestamp ON threats(timestamp);

            -- Detections that passed the throttle and were surfaced
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                source_ip TEXT NOT NULL,
                destination_ip TEXT,
                ports TEXT,
                message TEXT,
                geolocation TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_type ON alerts(alert_type);
            CREATE INDEX IF NOT EXISTS idx_alerts_source ON alerts(source_ip);

            -- Durable scalar counters
            CREATE TABLE IF NOT EXISTS stats (
                key TEXT PRIMARY KEY,
                value TEXT
            );
            "#,
        )?;

        Ok(())
    }

    /// Receiver that observes the highest threat id after each append
    pub fn subscribe(&self) -> watch::Receiver<i64> {
        self.notify.subscribe()
    }

    // ==================== Threat Operations ====================

    /// Append a threat event. Returns the new row id, or `None` when the
    /// unique index swallowed a duplicate.
    pub fn append_threat(&self, event: &ThreatEvent) -> Result<Option<i64>> {
        let id = {
            let conn = self.conn.lock().unwrap();

            let changed = conn.execute(
                "INSERT OR IGNORE INTO threats (timestamp, threat_type, source_ip, destination_ip, ports, meta)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    event.timestamp.format(THREAT_TS_FORMAT).to_string(),
                    event.kind.as_str(),
                    event.source_ip,
                    event.destination_ip,
                    event.ports.to_column(),
                    event.meta.as_ref().map(|m| serde_json::to_string(m).ok()).flatten(),
                ],
            )?;

            if changed == 0 {
                return Ok(None);
            }
            conn.last_insert_rowid()
        };

        let _ = self.notify.send_replace(id);
        Ok(Some(id))
    }

    /// Bulk-append raw rows inside a single transaction, ignoring
    /// duplicates. Returns how many rows were actually inserted.
    pub fn append_raw_rows(&self, rows: &[RawThreatRow]) -> Result<usize> {
        let inserted = {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            let mut inserted = 0usize;
            {
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO threats (timestamp, threat_type, source_ip, destination_ip, ports, meta)
                     VALUES (?, ?, ?, ?, ?, NULL)",
                )?;
                for row in rows {
                    inserted += stmt.execute(params![
                        row.timestamp,
                        row.kind,
                        row.source_ip,
                        row.destination_ip,
                        row.ports,
                    ])?;
                }
            }
            tx.commit()?;
            inserted
        };

        if inserted > 0 {
            let _ = self.notify.send_replace(self.max_threat_id()?);
        }
        Ok(inserted)
    }

    pub fn max_threat_id(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let id: Option<i64> =
            conn.query_row("SELECT MAX(id) FROM threats", [], |row| row.get(0))?;
        Ok(id.unwrap_or(0))
    }

    pub fn read_threat(&self, id: i64) -> Result<Option<ThreatRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, timestamp, threat_type, source_ip, destination_ip, ports, meta
             FROM threats WHERE id = ?",
            [id],
            map_threat_row,
        )
        .optional()
        .map_err(Into::into)
    }

    /// Rows with id greater than the cursor, in id order
    pub fn threats_after(&self, after: i64, limit: usize) -> Result<Vec<ThreatRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, threat_type, source_ip, destination_ip, ports, meta
             FROM threats WHERE id > ? ORDER BY id ASC LIMIT ?",
        )?;
        let rows = stmt
            .query_map(params![after, limit as i64], map_threat_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Full snapshot in append order, optionally capped
    pub fn list_threats(&self, limit: Option<usize>) -> Result<Vec<ThreatRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, threat_type, source_ip, destination_ip, ports, meta
             FROM threats ORDER BY id ASC LIMIT ?",
        )?;
        let cap = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt
            .query_map([cap], map_threat_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn count_threats(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM threats", [], |row| row.get(0))?;
        Ok(count)
    }

    fn count_threats_between(
        conn: &Connection,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> rusqlite::Result<u64> {
        conn.query_row(
            "SELECT COUNT(*) FROM threats WHERE timestamp > ? AND timestamp <= ?",
            params![
                from.format(THREAT_TS_FORMAT).to_string(),
                to.format(THREAT_TS_FORMAT).to_string(),
            ],
            |row| row.get(0),
        )
    }

    /// Aggregates over the last 24 hours for the chat endpoint
    pub fn threat_summary(&self) -> Result<ThreatSummary> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let day_ago = (now - chrono::Duration::hours(24))
            .format(THREAT_TS_FORMAT)
            .to_string();

        let total_24h: u64 = conn.query_row(
            "SELECT COUNT(*) FROM threats WHERE timestamp > ?",
            [&day_ago],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT threat_type, COUNT(*) as cnt FROM threats
             WHERE timestamp > ? GROUP BY threat_type ORDER BY cnt DESC",
        )?;
        let by_kind: Vec<(String, u64)> = stmt
            .query_map([&day_ago], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = conn.prepare(
            "SELECT source_ip, COUNT(*) as cnt FROM threats
             WHERE timestamp > ? GROUP BY source_ip ORDER BY cnt DESC LIMIT 5",
        )?;
        let top_sources: Vec<(String, u64)> = stmt
            .query_map([&day_ago], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let recent_6h =
            Self::count_threats_between(&conn, now - chrono::Duration::hours(6), now)?;
        let previous_6h = Self::count_threats_between(
            &conn,
            now - chrono::Duration::hours(12),
            now - chrono::Duration::hours(6),
        )?;

        // Average ACK/SYN ratio recorded in SYN flood evidence
        let mut stmt = conn.prepare(
            "SELECT meta FROM threats WHERE threat_type = 'SYNFlood' AND meta IS NOT NULL",
        )?;
        let ratios: Vec<f64> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|m| serde_json::from_str::<Meta>(&m).ok())
            .filter_map(|m| m.get("ratio").and_then(|v| v.as_f64()))
            .collect();
        let avg_syn_ack_ratio = if ratios.is_empty() {
            None
        } else {
            Some(ratios.iter().sum::<f64>() / ratios.len() as f64)
        };

        Ok(ThreatSummary {
            total_24h,
            by_kind,
            top_sources,
            recent_6h,
            previous_6h,
            avg_syn_ack_ratio,
        })
    }

    // ==================== Alert Operations ====================

    /// Persist an alert record; returns the new row id
    pub fn append_alert(
        &self,
        event: &ThreatEvent,
        geolocation: Option<&Geolocation>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO alerts (timestamp, alert_type, source_ip, destination_ip, ports, message, geolocation)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                event.kind.as_str(),
                event.source_ip,
                event.destination_ip,
                event.ports.to_column(),
                event.message,
                geolocation.map(|g| serde_json::to_string(g).ok()).flatten(),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Most recent alerts first, filtered by kind or source IP
    pub fn list_alerts(&self, filter: &AlertFilter, limit: usize) -> Result<Vec<AlertRecord>> {
        let conn = self.conn.lock().unwrap();

        let (sql, param): (&str, Option<&str>) = if let Some(kind) = filter.kind.as_deref() {
            (
                "SELECT id, timestamp, alert_type, source_ip, destination_ip, ports, message, geolocation
                 FROM alerts WHERE alert_type = ? ORDER BY id DESC LIMIT ?",
                Some(kind),
            )
        } else if let Some(ip) = filter.ip.as_deref() {
            (
                "SELECT id, timestamp, alert_type, source_ip, destination_ip, ports, message, geolocation
                 FROM alerts WHERE source_ip = ? ORDER BY id DESC LIMIT ?",
                Some(ip),
            )
        } else {
            (
                "SELECT id, timestamp, alert_type, source_ip, destination_ip, ports, message, geolocation
                 FROM alerts ORDER BY id DESC LIMIT ?",
                None,
            )
        };

        let mut stmt = conn.prepare(sql)?;
        let rows = match param {
            Some(p) => stmt
                .query_map(params![p, limit as i64], map_alert_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt
                .query_map(params![limit as i64], map_alert_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    pub fn count_alerts(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn alert_stats(&self) -> Result<AlertStats> {
        let conn = self.conn.lock().unwrap();

        let total: u64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;

        let mut stmt =
            conn.prepare("SELECT alert_type, COUNT(*) FROM alerts GROUP BY alert_type")?;
        let by_type: BTreeMap<String, u64> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let mut stmt = conn.prepare("SELECT source_ip, COUNT(*) FROM alerts GROUP BY source_ip")?;
        let by_ip: BTreeMap<String, u64> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();

        let day_ago = (Utc::now() - chrono::Duration::hours(24))
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let recent_24h: u64 = conn.query_row(
            "SELECT COUNT(*) FROM alerts WHERE timestamp > ?",
            [&day_ago],
            |row| row.get(0),
        )?;

        Ok(AlertStats {
            total,
            by_type,
            by_ip,
            recent_24h,
        })
    }

    // ==================== Stats Counters ====================

    pub fn get_stat(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT value FROM stats WHERE key = ?", [key], |row| row.get(0))
            .optional()
            .map_err(Into::into)
    }

    pub fn set_stat(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO stats(key, value) VALUES(?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Read-modify-write a numeric counter under the connection lock
    pub fn add_stat_u64(&self, key: &str, delta: u64) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let current: Option<String> = conn
            .query_row("SELECT value FROM stats WHERE key = ?", [key], |row| row.get(0))
            .optional()?;
        let total = current
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            .saturating_add(delta);
        conn.execute(
            "INSERT INTO stats(key, value) VALUES(?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, total.to_string()],
        )?;
        Ok(total)
    }
}

fn map_threat_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ThreatRecord> {
    let kind_str: String = row.get(2)?;
    let meta: Option<String> = row.get(6)?;
    Ok(ThreatRecord {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        kind: ThreatKind::from(kind_str.as_str()),
        source_ip: row.get(3)?,
        destination_ip: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        ports: PortSpec::from_column(row.get(5)?),
        meta: meta.and_then(|m| serde_json::from_str(&m).ok()),
    })
}

fn map_alert_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRecord> {
    let kind_str: String = row.get(2)?;
    let geo: Option<String> = row.get(7)?;
    Ok(AlertRecord {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        alert_type: ThreatKind::from(kind_str.as_str()),
        source_ip: row.get(3)?,
        destination_ip: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        ports: PortSpec::from_column(row.get(5)?),
        message: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        geolocation: geo.and_then(|g| serde_json::from_str(&g).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(kind: ThreatKind, src: &str, secs: u32) -> ThreatEvent {
        let ts = Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, secs).unwrap();
        ThreatEvent::new(ts, kind, src, "N/A", PortSpec::Single(80), "test")
    }

    #[test]
    fn test_append_and_read_threat() {
        let db = Database::open_memory().unwrap();

        let mut ev = event(ThreatKind::DDoS, "203.0.113.7", 0);
        let mut meta = Meta::new();
        meta.insert("window_count".into(), serde_json::json!(301));
        ev.meta = Some(meta);

        let id = db.append_threat(&ev).unwrap().unwrap();
        assert_eq!(id, 1);

        let record = db.read_threat(id).unwrap().unwrap();
        assert_eq!(record.kind, ThreatKind::DDoS);
        assert_eq!(record.source_ip, "203.0.113.7");
        assert_eq!(record.ports, PortSpec::Single(80));
        assert_eq!(
            record.meta.unwrap().get("window_count").unwrap().as_u64(),
            Some(301)
        );
    }

    #[test]
    fn test_duplicate_threat_swallowed() {
        let db = Database::open_memory().unwrap();
        let ev = event(ThreatKind::PortScan, "198.51.100.42", 1);

        assert!(db.append_threat(&ev).unwrap().is_some());
        assert!(db.append_threat(&ev).unwrap().is_none());
        assert_eq!(db.count_threats().unwrap(), 1);
    }

    #[test]
    fn test_ids_strictly_increasing() {
        let db = Database::open_memory().unwrap();
        let mut last = 0;
        for i in 0..10 {
            let ev = event(ThreatKind::SynFlood, "198.51.100.9", i);
            let id = db.append_threat(&ev).unwrap().unwrap();
            assert!(id > last);
            last = id;
        }
        assert_eq!(db.max_threat_id().unwrap(), last);
    }

    #[test]
    fn test_threats_after_cursor() {
        let db = Database::open_memory().unwrap();
        for i in 0..5 {
            db.append_threat(&event(ThreatKind::DDoS, "203.0.113.7", i)).unwrap();
        }

        let tail = db.threats_after(3, 100).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].id, 4);
        assert_eq!(tail[1].id, 5);

        assert!(db.threats_after(5, 100).unwrap().is_empty());
    }

    #[test]
    fn test_append_notifies_watch() {
        let db = Database::open_memory().unwrap();
        let rx = db.subscribe();
        assert_eq!(*rx.borrow(), 0);

        db.append_threat(&event(ThreatKind::Xss, "192.0.2.5", 2)).unwrap();
        assert_eq!(*rx.borrow(), 1);
    }

    #[test]
    fn test_alert_filters_and_stats() {
        let db = Database::open_memory().unwrap();

        let a = event(ThreatKind::DDoS, "203.0.113.7", 0);
        let b = event(ThreatKind::PortScan, "198.51.100.42", 1);
        db.append_alert(&a, None).unwrap();
        db.append_alert(&a, Some(&Geolocation::local())).unwrap();
        db.append_alert(&b, None).unwrap();

        let all = db.list_alerts(&AlertFilter::default(), 100).unwrap();
        assert_eq!(all.len(), 3);
        // Newest first
        assert!(all[0].id > all[2].id);

        let ddos_only = db
            .list_alerts(
                &AlertFilter {
                    kind: Some("DDoS".into()),
                    ip: None,
                },
                100,
            )
            .unwrap();
        assert_eq!(ddos_only.len(), 2);
        assert!(ddos_only.iter().all(|a| a.alert_type == ThreatKind::DDoS));

        let by_ip = db
            .list_alerts(
                &AlertFilter {
                    kind: None,
                    ip: Some("198.51.100.42".into()),
                },
                100,
            )
            .unwrap();
        assert_eq!(by_ip.len(), 1);

        let stats = db.alert_stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type.get("DDoS"), Some(&2));
        assert_eq!(stats.by_ip.get("203.0.113.7"), Some(&2));
        assert_eq!(stats.recent_24h, 3);
    }

    #[test]
    fn test_raw_rows_idempotent() {
        let db = Database::open_memory().unwrap();
        let rows = vec![
            RawThreatRow {
                timestamp: "2026-08-01 10:00:00".into(),
                kind: "DDoS".into(),
                source_ip: "203.0.113.7".into(),
                destination_ip: "N/A".into(),
                ports: Some("80".into()),
            },
            RawThreatRow {
                timestamp: "2026-08-01 10:00:01".into(),
                kind: "PortScan".into(),
                source_ip: "198.51.100.42".into(),
                destination_ip: "N/A".into(),
                ports: Some("[20,21]".into()),
            },
        ];

        assert_eq!(db.append_raw_rows(&rows).unwrap(), 2);
        let max = db.max_threat_id().unwrap();
        assert_eq!(db.append_raw_rows(&rows).unwrap(), 0);
        assert_eq!(db.max_threat_id().unwrap(), max);

        // Migrated rows carry no meta
        let all = db.list_threats(None).unwrap();
        assert!(all.iter().all(|t| t.meta.is_none()));
    }

    #[test]
    fn test_stat_counters() {
        let db = Database::open_memory().unwrap();
        assert_eq!(db.get_stat("packet_count").unwrap(), None);

        assert_eq!(db.add_stat_u64("packet_count", 100).unwrap(), 100);
        assert_eq!(db.add_stat_u64("packet_count", 50).unwrap(), 150);
        assert_eq!(db.get_stat("packet_count").unwrap().as_deref(), Some("150"));

        db.set_stat("csv_migrated", "1").unwrap();
        assert_eq!(db.get_stat("csv_migrated").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_threat_summary_ratio() {
        let db = Database::open_memory().unwrap();

        for (i, ratio) in [0.05f64, 0.07].iter().enumerate() {
            let mut ev = ThreatEvent::new(
                Utc::now(),
                ThreatKind::SynFlood,
                "198.51.100.9",
                "10.0.0.1",
                PortSpec::Single(80 + i as u16),
                "SYN flood suspected",
            );
            let mut meta = Meta::new();
            meta.insert("syn_count".into(), serde_json::json!(201));
            meta.insert("ack_count".into(), serde_json::json!(10));
            meta.insert("ratio".into(), serde_json::json!(ratio));
            ev.meta = Some(meta);
            db.append_threat(&ev).unwrap();
        }

        let summary = db.threat_summary().unwrap();
        assert_eq!(summary.total_24h, 2);
        assert_eq!(summary.by_kind[0].0, "SYNFlood");
        let avg = summary.avg_syn_ack_ratio.unwrap();
        assert!((avg - 0.06).abs() < 1e-9);
        assert_eq!(summary.trend(), "increasing");
    }
}
