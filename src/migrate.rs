//! Legacy CSV log migration
//!
//! One-shot import of the old `realtime_logs.csv` into the `threats`
//! view. The unique index makes re-runs idempotent; a `csv_migrated`
//! stats key records completion so the file is only parsed once per
//! database. Migrated rows carry no `meta`.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::database::{Database, RawThreatRow};
use crate::models::ThreatKind;

const EXPECTED_HEADER: [&str; 5] =
    ["Timestamp", "Threat Type", "Source IP", "Destination IP", "Ports"];

/// Import the legacy CSV once. Returns the number of rows inserted
/// (0 when already migrated or the file is absent).
pub fn import_csv(db: &Database, path: &Path) -> Result<usize> {
    if db.get_stat("csv_migrated")?.as_deref() == Some("1") {
        debug!("CSV already migrated, skipping");
        return Ok(0);
    }

    if !path.exists() {
        debug!("No legacy CSV at {}, nothing to migrate", path.display());
        return Ok(0);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read legacy CSV: {}", path.display()))?;

    let mut lines = content.lines();
    match lines.next() {
        Some(header) if is_expected_header(header) => {}
        Some(header) => {
            warn!("Unexpected CSV header '{}', refusing to migrate", header);
            return Ok(0);
        }
        None => {
            db.set_stat("csv_migrated", "1")?;
            return Ok(0);
        }
    }

    let mut rows = Vec::new();
    for (lineno, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_line(line);
        if fields.len() < 4 {
            warn!("Skipping malformed CSV line {}: {}", lineno + 2, line);
            continue;
        }

        // Normalize legacy type names to the canonical wire names so the
        // unique index treats repeated imports identically
        let kind = ThreatKind::from(fields[1].trim()).to_string();

        rows.push(RawThreatRow {
            timestamp: fields[0].trim().to_string(),
            kind,
            source_ip: fields[2].trim().to_string(),
            destination_ip: fields[3].trim().to_string(),
            ports: fields.get(4).map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
        });
    }

    let inserted = db.append_raw_rows(&rows)?;
    db.set_stat("csv_migrated", "1")?;
    info!(
        "Migrated legacy CSV: {} rows read, {} inserted",
        rows.len(),
        inserted
    );
    Ok(inserted)
}

fn is_expected_header(line: &str) -> bool {
    let fields = parse_csv_line(line);
    fields.len() >= EXPECTED_HEADER.len()
        && fields
            .iter()
            .zip(EXPECTED_HEADER.iter())
            .all(|(got, want)| got.trim() == *want)
}

/// Split one CSV line, honoring double-quoted fields (the legacy writer
/// quoted port lists containing commas)
fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.clone());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = "Timestamp, Threat Type, Source IP, Destination IP, Ports\n\
        2026-07-30 10:15:00,Possible DDoS,203.0.113.7,N/A,80\n\
        2026-07-30 10:16:00,Port Scanning,198.51.100.42,N/A,\"[20, 21, 22]\"\n\
        2026-07-30 10:17:00,SYN Flood,198.51.100.9,10.0.0.1,443\n";

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_csv_line_quoted_fields() {
        let fields = parse_csv_line("a,\"b, c\",d");
        assert_eq!(fields, vec!["a", "b, c", "d"]);

        let fields = parse_csv_line("x,\"say \"\"hi\"\"\",y");
        assert_eq!(fields, vec!["x", "say \"hi\"", "y"]);
    }

    #[test]
    fn test_import_inserts_and_normalizes_kinds() {
        let db = Database::open_memory().unwrap();
        let file = write_csv(SAMPLE);

        let inserted = import_csv(&db, file.path()).unwrap();
        assert_eq!(inserted, 3);

        let threats = db.list_threats(None).unwrap();
        assert_eq!(threats.len(), 3);
        assert_eq!(threats[0].kind, ThreatKind::DDoS);
        assert_eq!(threats[1].kind, ThreatKind::PortScan);
        assert_eq!(threats[2].kind, ThreatKind::SynFlood);
        // Migrated rows have no meta
        assert!(threats.iter().all(|t| t.meta.is_none()));
    }

    #[test]
    fn test_import_is_idempotent() {
        let db = Database::open_memory().unwrap();
        let file = write_csv(SAMPLE);

        assert_eq!(import_csv(&db, file.path()).unwrap(), 3);
        let max_id = db.max_threat_id().unwrap();

        // Completion marker short-circuits the second run
        assert_eq!(import_csv(&db, file.path()).unwrap(), 0);
        assert_eq!(db.max_threat_id().unwrap(), max_id);

        // Even with the marker cleared, the unique index holds
        db.set_stat("csv_migrated", "0").unwrap();
        assert_eq!(import_csv(&db, file.path()).unwrap(), 0);
        assert_eq!(db.max_threat_id().unwrap(), max_id);
    }

    #[test]
    fn test_missing_file_is_not_marked_migrated() {
        let db = Database::open_memory().unwrap();
        let missing = std::path::Path::new("/nonexistent/realtime_logs.csv");
        assert_eq!(import_csv(&db, missing).unwrap(), 0);
        assert_eq!(db.get_stat("csv_migrated").unwrap(), None);
    }

    #[test]
    fn test_unexpected_header_refused() {
        let db = Database::open_memory().unwrap();
        let file = write_csv("time,type,src\n1,2,3\n");
        assert_eq!(import_csv(&db, file.path()).unwrap(), 0);
        assert_eq!(db.count_threats().unwrap(), 0);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let csv = "Timestamp, Threat Type, Source IP, Destination IP, Ports\n\
            2026-07-30 10:15:00,Possible DDoS,203.0.113.7,N/A,80\n\
            garbage-line\n";
        let db = Database::open_memory().unwrap();
        let file = write_csv(csv);
        assert_eq!(import_csv(&db, file.path()).unwrap(), 1);
    }
}
