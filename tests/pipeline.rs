//! End-to-end pipeline scenarios: packets in, threat rows and alert
//! rows out, tail stream observing appends in order.

use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use netwarden::alert::AlertPipeline;
use netwarden::api::threats::tail_stream;
use netwarden::capture::tcp_flags::{ACK, SYN};
use netwarden::capture::PacketRecord;
use netwarden::config::{AlertsConfig, DetectionConfig, GeolocationConfig};
use netwarden::database::{AlertFilter, Database};
use netwarden::detect::DetectionEngine;
use netwarden::geolocate::GeoService;
use netwarden::models::{PortSpec, ThreatEvent, ThreatKind};
use netwarden::osint::{IndicatorSet, IndicatorStore};

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn tcp(src: &str, dport: u16, flags: u8, secs: i64) -> PacketRecord {
    PacketRecord::tcp(t(secs), ip(src), ip("10.0.0.1"), 50000, dport, flags)
}

fn new_engine(config: DetectionConfig, indicators: Arc<IndicatorStore>, db: Database) -> DetectionEngine {
    DetectionEngine::new(config, indicators, db).unwrap()
}

fn new_pipeline(db: Database) -> AlertPipeline {
    let geo = Arc::new(
        GeoService::new(GeolocationConfig {
            enabled: false,
            api_provider: "ipapi".into(),
            api_key: None,
        })
        .unwrap(),
    );
    AlertPipeline::new(db, geo, None, AlertsConfig::default())
}

async fn drive(
    engine: &mut DetectionEngine,
    pipeline: &mut AlertPipeline,
    packets: impl IntoIterator<Item = PacketRecord>,
) -> Vec<ThreatEvent> {
    let mut fired = Vec::new();
    for packet in packets {
        for event in engine.process(&packet) {
            pipeline.handle(&event).await;
            fired.push(event);
        }
    }
    fired
}

#[tokio::test]
async fn scenario_ddos_trigger_then_throttle() {
    let db = Database::open_memory().unwrap();
    let indicators = Arc::new(IndicatorStore::new());
    let mut engine = new_engine(DetectionConfig::default(), indicators, db.clone());
    let mut pipeline = new_pipeline(db.clone());

    // 301 packets within the 10 s window
    let burst = (0..301).map(|_| tcp("203.0.113.7", 80, ACK, 5));
    let fired = drive(&mut engine, &mut pipeline, burst).await;

    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].kind, ThreatKind::DDoS);
    assert_eq!(
        fired[0].meta.as_ref().unwrap().get("window_count").unwrap().as_u64(),
        Some(301)
    );

    let threats = db.list_threats(None).unwrap();
    assert_eq!(threats.len(), 1);
    assert_eq!(threats[0].kind, ThreatKind::DDoS);
    assert_eq!(threats[0].source_ip, "203.0.113.7");

    let alerts = db.list_alerts(&AlertFilter::default(), 100).unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].alert_type, ThreatKind::DDoS);

    // A second burst fires the detector again but the alert is throttled
    let burst = (0..301).map(|_| tcp("203.0.113.7", 80, ACK, 6));
    let fired = drive(&mut engine, &mut pipeline, burst).await;
    assert_eq!(fired.len(), 1);

    assert_eq!(db.count_threats().unwrap(), 2);
    assert_eq!(db.count_alerts().unwrap(), 1);
}

#[tokio::test]
async fn scenario_port_scan() {
    let db = Database::open_memory().unwrap();
    let indicators = Arc::new(IndicatorStore::new());
    let mut engine = new_engine(
        DetectionConfig {
            port_scan_threshold: 20,
            ..Default::default()
        },
        indicators,
        db.clone(),
    );
    let mut pipeline = new_pipeline(db.clone());

    // One SYN to each of ports 20..=40 within 2 s: 21 unique ports
    let scan = (20..=40u16).enumerate().map(|(i, port)| {
        tcp("198.51.100.42", port, SYN, (i / 11) as i64)
    });
    let fired = drive(&mut engine, &mut pipeline, scan).await;

    assert_eq!(fired.len(), 1);
    let event = &fired[0];
    assert_eq!(event.kind, ThreatKind::PortScan);

    let meta = event.meta.as_ref().unwrap();
    assert_eq!(meta.get("unique_ports").unwrap().as_array().unwrap().len(), 21);
    assert_eq!(meta.get("total_events").unwrap().as_u64(), Some(21));
    assert_eq!(meta.get("ratio").unwrap().as_f64(), Some(1.0));
    assert_eq!(event.ports, PortSpec::Many((20..=40).collect()));
}

#[tokio::test]
async fn scenario_syn_flood() {
    let db = Database::open_memory().unwrap();
    let indicators = Arc::new(IndicatorStore::new());
    let mut engine = new_engine(DetectionConfig::default(), indicators, db.clone());
    let mut pipeline = new_pipeline(db.clone());

    // 200 SYNs, 10 ACKs, then the SYN that crosses the floor
    let mut packets: Vec<PacketRecord> =
        (0..200).map(|i| tcp("198.51.100.9", 80, SYN, i / 25)).collect();
    packets.extend((0..10).map(|_| tcp("198.51.100.9", 80, ACK, 8)));
    packets.push(tcp("198.51.100.9", 80, SYN, 9));

    let fired = drive(&mut engine, &mut pipeline, packets).await;
    assert_eq!(fired.len(), 1);
    let event = &fired[0];
    assert_eq!(event.kind, ThreatKind::SynFlood);

    let meta = event.meta.as_ref().unwrap();
    assert_eq!(meta.get("syn_count").unwrap().as_u64(), Some(201));
    assert_eq!(meta.get("ack_count").unwrap().as_u64(), Some(10));
    let ratio = meta.get("ratio").unwrap().as_f64().unwrap();
    assert!((ratio - 0.0498).abs() < 0.001, "ratio was {}", ratio);
}

#[tokio::test]
async fn scenario_sql_injection_threat_rows_vs_alerts() {
    let db = Database::open_memory().unwrap();
    let indicators = Arc::new(IndicatorStore::new());
    let mut engine = new_engine(DetectionConfig::default(), indicators, db.clone());
    let mut pipeline = new_pipeline(db.clone());

    let payload: &[u8] =
        b"GET /search?q=union%20select%20*%20from%20users HTTP/1.1\r\nHost: shop.example.com\r\n\r\n";
    let request = |secs: i64| tcp("192.0.2.5", 80, ACK, secs).with_payload(payload);

    // Three matching requests within the web window fire once
    let fired = drive(&mut engine, &mut pipeline, (0..3).map(request)).await;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].kind, ThreatKind::SqlInjection);
    assert_eq!(db.count_threats().unwrap(), 1);
    assert_eq!(db.count_alerts().unwrap(), 1);

    // Three more within the throttle window: a new threat row is
    // recorded but no new alert is surfaced
    let fired = drive(&mut engine, &mut pipeline, (3..6).map(request)).await;
    assert_eq!(fired.len(), 1);
    assert_eq!(db.count_threats().unwrap(), 2);
    assert_eq!(db.count_alerts().unwrap(), 1);
}

#[tokio::test]
async fn scenario_osint_ip_hit() {
    let db = Database::open_memory().unwrap();
    let indicators = Arc::new(IndicatorStore::new());
    indicators.replace(IndicatorSet {
        ips: ["5.6.7.8".to_string()].into_iter().collect(),
        domains: Default::default(),
    });
    let mut engine = new_engine(DetectionConfig::default(), indicators, db.clone());
    let mut pipeline = new_pipeline(db.clone());

    let fired = drive(&mut engine, &mut pipeline, [tcp("5.6.7.8", 443, ACK, 0)]).await;
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].kind, ThreatKind::MaliciousIp);
    assert_eq!(
        fired[0].meta.as_ref().unwrap().get("osint").unwrap().as_bool(),
        Some(true)
    );

    let threats = db.list_threats(None).unwrap();
    assert_eq!(threats.len(), 1);
    assert_eq!(threats[0].kind, ThreatKind::MaliciousIp);
    assert_eq!(threats[0].ports, PortSpec::Single(443));
}

#[tokio::test]
async fn scenario_tail_stream_sees_appended_events() {
    let db = Database::open_memory().unwrap();
    let indicators = Arc::new(IndicatorStore::new());
    let mut engine = new_engine(DetectionConfig::default(), indicators, db.clone());
    let mut pipeline = new_pipeline(db.clone());

    let burst: Vec<PacketRecord> = (0..301).map(|_| tcp("203.0.113.7", 80, ACK, 5)).collect();
    drive(&mut engine, &mut pipeline, burst).await;

    // Subscriber starting from 0 replays exactly the DDoS event
    let mut stream = Box::pin(tail_stream(db.clone(), 0));
    let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("stream produced nothing")
        .unwrap();
    assert_eq!(first.kind, ThreatKind::DDoS);
    assert_eq!(first.source_ip, "203.0.113.7");

    // New appends are delivered in id order with no gaps
    let writer = db.clone();
    let appender = tokio::spawn(async move {
        for i in 0..5 {
            let event = ThreatEvent::new(
                t(100 + i),
                ThreatKind::PortScan,
                "198.51.100.42",
                "N/A",
                PortSpec::Single(20 + i as u16),
                "Multiple ports accessed",
            );
            writer.append_threat(&event).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let mut last_id = first.id;
    for _ in 0..5 {
        let record = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("stream stalled")
            .unwrap();
        assert_eq!(record.id, last_id + 1, "gap or reorder in tail stream");
        last_id = record.id;
    }
    appender.await.unwrap();
}

#[tokio::test]
async fn tail_stream_respects_cursor() {
    let db = Database::open_memory().unwrap();

    for i in 0..4 {
        let event = ThreatEvent::new(
            t(i),
            ThreatKind::Xss,
            "192.0.2.5",
            "Web Server",
            PortSpec::Tag("HTTP".into()),
            "Repeated XSS patterns detected",
        );
        db.append_threat(&event).unwrap();
    }

    // Cursor 2: only rows 3 and 4 are eligible
    let mut stream = Box::pin(tail_stream(db.clone(), 2));
    for expected in [3i64, 4] {
        let record = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("stream stalled")
            .unwrap();
        assert_eq!(record.id, expected);
    }
}
