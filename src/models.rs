use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Detector-specific evidence attached to a threat (`window_count`,
/// `syn_count`, `http_host`, ...). Stored as JSON in the `meta` column.
pub type Meta = BTreeMap<String, serde_json::Value>;

/// Classification assigned by the detection engine
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ThreatKind {
    DDoS,
    PortScan,
    SynFlood,
    SqlInjection,
    Xss,
    MaliciousIp,
    MaliciousDomain,
    Other(String),
}

impl ThreatKind {
    pub fn as_str(&self) -> &str {
        match self {
            ThreatKind::DDoS => "DDoS",
            ThreatKind::PortScan => "PortScan",
            ThreatKind::SynFlood => "SYNFlood",
            ThreatKind::SqlInjection => "SQLInjection",
            ThreatKind::Xss => "XSS",
            ThreatKind::MaliciousIp => "MaliciousIP",
            ThreatKind::MaliciousDomain => "MaliciousDomain",
            ThreatKind::Other(s) => s,
        }
    }
}

impl std::fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for ThreatKind {
    /// Canonical names plus the spellings used by the legacy CSV log.
    /// Anything unrecognized is preserved verbatim so old rows survive
    /// round trips.
    fn from(s: &str) -> Self {
        match s {
            "DDoS" | "Possible DDoS" => ThreatKind::DDoS,
            "PortScan" | "Port Scan" | "Port Scanning" => ThreatKind::PortScan,
            "SYNFlood" | "SYN Flood" => ThreatKind::SynFlood,
            "SQLInjection" | "SQL Injection" => ThreatKind::SqlInjection,
            "XSS" | "XSS Attack" => ThreatKind::Xss,
            "MaliciousIP" | "Malicious IP (OSINT)" | "OSINT" => ThreatKind::MaliciousIp,
            "MaliciousDomain" | "Malicious Domain (OSINT)" | "OSINT-Domain" => {
                ThreatKind::MaliciousDomain
            }
            other => ThreatKind::Other(other.to_string()),
        }
    }
}

impl std::str::FromStr for ThreatKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ThreatKind::from(s))
    }
}

impl Serialize for ThreatKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ThreatKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// Ports involved in a detection: a single destination port, the set of
/// ports touched by a scan, or a protocol tag such as `"HTTP"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    None,
    Single(u16),
    Many(Vec<u16>),
    Tag(String),
}

impl PortSpec {
    /// TEXT column representation. Lists are JSON so legacy rows and new
    /// rows compare equal under the unique index.
    pub fn to_column(&self) -> Option<String> {
        match self {
            PortSpec::None => None,
            PortSpec::Single(p) => Some(p.to_string()),
            PortSpec::Many(ps) => serde_json::to_string(ps).ok(),
            PortSpec::Tag(t) => Some(t.clone()),
        }
    }

    pub fn from_column(col: Option<String>) -> Self {
        let Some(col) = col else {
            return PortSpec::None;
        };
        let trimmed = col.trim();
        if trimmed.is_empty() {
            return PortSpec::None;
        }
        if trimmed.starts_with('[') {
            if let Ok(ports) = serde_json::from_str::<Vec<u16>>(trimmed) {
                return PortSpec::Many(ports);
            }
        }
        if let Ok(p) = trimmed.parse::<u16>() {
            return PortSpec::Single(p);
        }
        PortSpec::Tag(trimmed.to_string())
    }
}

impl Serialize for PortSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PortSpec::None => serializer.serialize_none(),
            PortSpec::Single(p) => serializer.serialize_u16(*p),
            PortSpec::Many(ps) => ps.serialize(serializer),
            PortSpec::Tag(t) => serializer.serialize_str(t),
        }
    }
}

/// A detection emitted by the engine, before persistence assigns an id
#[derive(Debug, Clone)]
pub struct ThreatEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: ThreatKind,
    pub source_ip: String,
    pub destination_ip: String,
    pub ports: PortSpec,
    pub meta: Option<Meta>,
    /// Detector-specific one-line summary, used for the alert message
    pub message: String,
}

impl ThreatEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        kind: ThreatKind,
        source_ip: impl Into<String>,
        destination_ip: impl Into<String>,
        ports: PortSpec,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            kind,
            source_ip: source_ip.into(),
            destination_ip: destination_ip.into(),
            ports,
            meta: None,
            message: message.into(),
        }
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// A persisted row from the `threats` view.
///
/// Serialized field names match what the dashboard frontend consumes.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatRecord {
    pub id: i64,
    pub timestamp: String,
    #[serde(rename = "threatType")]
    pub kind: ThreatKind,
    #[serde(rename = "sourceIP")]
    pub source_ip: String,
    #[serde(rename = "destinationIP")]
    pub destination_ip: String,
    pub ports: PortSpec,
    pub meta: Option<Meta>,
}

/// A persisted row from the `alerts` view
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub id: i64,
    pub timestamp: String,
    pub alert_type: ThreatKind,
    pub source_ip: String,
    pub destination_ip: String,
    pub ports: PortSpec,
    pub message: String,
    pub geolocation: Option<Geolocation>,
}

/// Best-effort location data for a source address
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Geolocation {
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub city: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub isp: Option<String>,
    pub org: Option<String>,
}

impl Geolocation {
    /// Synthetic record for private/loopback addresses; no remote call is
    /// made for these.
    pub fn local() -> Self {
        Self {
            country: Some("Local".to_string()),
            country_code: Some("LOCAL".to_string()),
            city: Some("Private Network".to_string()),
            lat: None,
            lon: None,
            isp: Some("Local Network".to_string()),
            org: Some("Private IP Range".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for name in [
            "DDoS",
            "PortScan",
            "SYNFlood",
            "SQLInjection",
            "XSS",
            "MaliciousIP",
            "MaliciousDomain",
        ] {
            let kind: ThreatKind = name.parse().unwrap();
            assert_eq!(kind.to_string(), name);
        }
    }

    #[test]
    fn test_kind_legacy_aliases() {
        assert_eq!("Possible DDoS".parse::<ThreatKind>().unwrap(), ThreatKind::DDoS);
        assert_eq!("Port Scanning".parse::<ThreatKind>().unwrap(), ThreatKind::PortScan);
        assert_eq!("SYN Flood".parse::<ThreatKind>().unwrap(), ThreatKind::SynFlood);
        assert_eq!(
            "Malicious IP (OSINT)".parse::<ThreatKind>().unwrap(),
            ThreatKind::MaliciousIp
        );
    }

    #[test]
    fn test_kind_unknown_preserved() {
        let kind: ThreatKind = "Weird Legacy Type".parse().unwrap();
        assert_eq!(kind.to_string(), "Weird Legacy Type");
    }

    #[test]
    fn test_port_spec_column_round_trip() {
        let single = PortSpec::Single(443);
        assert_eq!(single.to_column().as_deref(), Some("443"));
        assert_eq!(PortSpec::from_column(single.to_column()), single);

        let many = PortSpec::Many(vec![20, 21, 22]);
        assert_eq!(many.to_column().as_deref(), Some("[20,21,22]"));
        assert_eq!(PortSpec::from_column(many.to_column()), many);

        let tag = PortSpec::Tag("HTTP".to_string());
        assert_eq!(PortSpec::from_column(tag.to_column()), tag);

        assert_eq!(PortSpec::from_column(None), PortSpec::None);
    }

    #[test]
    fn test_port_spec_json_shapes() {
        assert_eq!(serde_json::to_string(&PortSpec::Single(80)).unwrap(), "80");
        assert_eq!(
            serde_json::to_string(&PortSpec::Many(vec![1, 2])).unwrap(),
            "[1,2]"
        );
        assert_eq!(
            serde_json::to_string(&PortSpec::Tag("HTTP".into())).unwrap(),
            "\"HTTP\""
        );
    }
}
