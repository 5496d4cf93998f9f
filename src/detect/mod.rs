//! Per-packet stream detection engine
//!
//! Runs every decoded packet through the OSINT indicator check and the
//! sliding-window detectors (DDoS, port scan, web attack, SYN flood) in
//! order. Every fired event is persisted to the `threats` view here;
//! alerting decisions belong to the alert pipeline downstream.

pub mod state;
pub mod web;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::capture::{tcp_flags, PacketRecord, Transport};
use crate::config::DetectionConfig;
use crate::database::Database;
use crate::models::{Meta, PortSpec, ThreatEvent, ThreatKind};
use crate::osint::IndicatorStore;
use state::SourceTable;
use web::{percent_decode, WebPatterns};

/// Window for the web-attack detectors
const WEB_WINDOW_SECS: i64 = 60;

/// Packets between durable counter flushes
const FLUSH_INTERVAL: u64 = 100;

/// Seconds between eviction sweeps of the source table
const SWEEP_INTERVAL_SECS: i64 = 60;

pub struct DetectionEngine {
    config: DetectionConfig,
    window: Duration,
    web_window: Duration,
    table: SourceTable,
    patterns: WebPatterns,
    indicators: Arc<IndicatorStore>,
    db: Database,
    packets_seen: u64,
    packets_flushed: u64,
    last_sweep: Option<DateTime<Utc>>,
}

impl DetectionEngine {
    pub fn new(
        config: DetectionConfig,
        indicators: Arc<IndicatorStore>,
        db: Database,
    ) -> Result<Self> {
        let window = Duration::seconds(config.time_window_seconds as i64);
        Ok(Self {
            config,
            window,
            web_window: Duration::seconds(WEB_WINDOW_SECS),
            table: SourceTable::new(),
            patterns: WebPatterns::new()?,
            indicators,
            db,
            packets_seen: 0,
            packets_flushed: 0,
            last_sweep: None,
        })
    }

    /// Classify one packet. Fired events are appended to the `threats`
    /// view before being returned for the alert pipeline; nothing in
    /// here may take the engine down on a bad packet.
    pub fn process(&mut self, pkt: &PacketRecord) -> Vec<ThreatEvent> {
        let now = pkt.timestamp;
        let src = pkt.src_ip.to_string();
        let mut events = Vec::new();

        if self.indicators.contains_ip(&src) {
            let mut meta = Meta::new();
            meta.insert("osint".into(), json!(true));
            let ports = match pkt.dport() {
                Some(p) => PortSpec::Single(p),
                None => PortSpec::None,
            };
            events.push(
                ThreatEvent::new(
                    now,
                    ThreatKind::MaliciousIp,
                    src.clone(),
                    pkt.dst_ip.to_string(),
                    ports,
                    "OSINT-listed IP detected",
                )
                .with_meta(meta),
            );
        }

        if let Some(port) = pkt.dport() {
            self.detect_ddos(pkt, port, now, &mut events);
            self.detect_port_scan(pkt, port, now, &mut events);
        }

        if pkt.has_http_request() && !pkt.payload.is_empty() {
            self.detect_web_attacks(pkt, now, &mut events);
        }

        if pkt.is_tcp() {
            self.detect_syn_flood(pkt, now, &mut events);
        }

        self.packets_seen += 1;
        if self.packets_seen - self.packets_flushed >= FLUSH_INTERVAL {
            self.flush_packet_count();
        }
        self.maybe_sweep(now);

        for event in &events {
            match self.db.append_threat(event) {
                Ok(Some(id)) => debug!(id, kind = %event.kind, src = %event.source_ip, "Threat persisted"),
                Ok(None) => debug!(kind = %event.kind, "Duplicate threat swallowed"),
                Err(e) => warn!("Failed to persist threat: {:#}", e),
            }
        }

        events
    }

    fn detect_ddos(
        &mut self,
        pkt: &PacketRecord,
        port: u16,
        now: DateTime<Utc>,
        events: &mut Vec<ThreatEvent>,
    ) {
        let state = self.table.get_or_create(pkt.src_ip);
        let count = state.record_request(port, now, self.window);

        if count > self.config.ddos_threshold {
            let mut meta = Meta::new();
            meta.insert("window_count".into(), json!(count));
            events.push(
                ThreatEvent::new(
                    now,
                    ThreatKind::DDoS,
                    pkt.src_ip.to_string(),
                    "N/A",
                    PortSpec::Single(port),
                    format!("High traffic on port {}", port),
                )
                .with_meta(meta),
            );
            state.clear_requests(port);
        }
    }

    fn detect_port_scan(
        &mut self,
        pkt: &PacketRecord,
        port: u16,
        now: DateTime<Utc>,
        events: &mut Vec<ThreatEvent>,
    ) {
        let state = self.table.get_or_create(pkt.src_ip);
        let (unique, total) = state.record_port(port, now, self.window);
        let uniq = unique.len();
        let ratio = if total > 0 {
            uniq as f64 / total as f64
        } else {
            0.0
        };

        let threshold = self.config.port_scan_threshold;
        if uniq > threshold && total > threshold && ratio > 0.7 {
            let mut meta = Meta::new();
            meta.insert("unique_ports".into(), json!(unique));
            meta.insert("total_events".into(), json!(total));
            meta.insert("ratio".into(), json!(ratio));
            events.push(
                ThreatEvent::new(
                    now,
                    ThreatKind::PortScan,
                    pkt.src_ip.to_string(),
                    "N/A",
                    PortSpec::Many(unique),
                    format!("Multiple ports accessed ({} unique)", uniq),
                )
                .with_meta(meta),
            );
            state.clear_ports();
        }
    }

    fn detect_web_attacks(
        &mut self,
        pkt: &PacketRecord,
        now: DateTime<Utc>,
        events: &mut Vec<ThreatEvent>,
    ) {
        let payload = percent_decode(&pkt.payload);
        let sqli_matches = self.patterns.sqli_matches(&payload);
        let xss_matches = self.patterns.xss_matches(&payload);

        let web_window = self.web_window;
        let state = self.table.get_or_create(pkt.src_ip);

        let mut sqli_count = state.sqli_count(now, web_window);
        for _ in 0..sqli_matches {
            sqli_count = state.record_sqli_hit(now, web_window);
        }
        let mut xss_count = state.xss_count(now, web_window);
        for _ in 0..xss_matches {
            xss_count = state.record_xss_hit(now, web_window);
        }

        if sqli_count >= self.config.sql_injection_threshold {
            let mut meta = self.packet_meta(pkt, &payload);
            meta.insert("attack".into(), json!("SQLi"));
            events.push(
                ThreatEvent::new(
                    now,
                    ThreatKind::SqlInjection,
                    pkt.src_ip.to_string(),
                    "Web Server",
                    PortSpec::Tag("HTTP".into()),
                    "Repeated SQL patterns detected",
                )
                .with_meta(meta),
            );
            self.table.get_or_create(pkt.src_ip).clear_sqli();
        }

        if xss_count >= self.config.xss_threshold {
            let mut meta = self.packet_meta(pkt, &payload);
            meta.insert("attack".into(), json!("XSS"));
            events.push(
                ThreatEvent::new(
                    now,
                    ThreatKind::Xss,
                    pkt.src_ip.to_string(),
                    "Web Server",
                    PortSpec::Tag("HTTP".into()),
                    "Repeated XSS patterns detected",
                )
                .with_meta(meta),
            );
            self.table.get_or_create(pkt.src_ip).clear_xss();
        }

        if let Some(host) = self.patterns.find_host(&payload) {
            if self.indicators.contains_domain(&host) {
                let mut meta = Meta::new();
                meta.insert("domain".into(), json!(host));
                events.push(
                    ThreatEvent::new(
                        now,
                        ThreatKind::MaliciousDomain,
                        pkt.src_ip.to_string(),
                        host,
                        PortSpec::Tag("HTTP".into()),
                        "OSINT-listed domain detected",
                    )
                    .with_meta(meta),
                );
            }
        }
    }

    fn detect_syn_flood(
        &mut self,
        pkt: &PacketRecord,
        now: DateTime<Utc>,
        events: &mut Vec<ThreatEvent>,
    ) {
        let Some(flags) = pkt.tcp_flags() else {
            return;
        };
        let is_syn = flags & tcp_flags::SYN != 0;
        let is_ack = flags & tcp_flags::ACK != 0;

        let window = self.window;
        let state = self.table.get_or_create(pkt.src_ip);
        if is_syn {
            state.record_syn(now, window);
        }
        if is_ack {
            state.record_ack(now, window);
        }

        let syn_count = state.syn_count(now, window);
        let ack_count = state.ack_count(now, window);
        let ratio = if syn_count > 0 {
            ack_count as f64 / syn_count as f64
        } else {
            1.0
        };

        if syn_count > self.config.syn_flood_threshold && ratio < self.config.syn_ack_ratio_threshold
        {
            let mut meta = Meta::new();
            meta.insert("syn_count".into(), json!(syn_count));
            meta.insert("ack_count".into(), json!(ack_count));
            meta.insert("ratio".into(), json!(ratio));
            let ports = match pkt.dport() {
                Some(p) => PortSpec::Single(p),
                None => PortSpec::None,
            };
            events.push(
                ThreatEvent::new(
                    now,
                    ThreatKind::SynFlood,
                    pkt.src_ip.to_string(),
                    pkt.dst_ip.to_string(),
                    ports,
                    "SYN flood suspected",
                )
                .with_meta(meta),
            );
            state.clear_syn_ack();
        }
    }

    /// Evidence common to web-attack events
    fn packet_meta(&self, pkt: &PacketRecord, payload: &str) -> Meta {
        let mut meta = Meta::new();
        meta.insert("ttl".into(), json!(pkt.ttl));
        meta.insert("len".into(), json!(pkt.length));
        match pkt.transport {
            Transport::Tcp { flags, .. } => {
                meta.insert("protocol".into(), json!("TCP"));
                meta.insert("tcp_flags".into(), json!(flags));
            }
            Transport::Udp { .. } => {
                meta.insert("protocol".into(), json!("UDP"));
            }
            Transport::Other => {}
        }
        if !pkt.payload.is_empty() {
            meta.insert("payload_len".into(), json!(pkt.payload.len()));
        }
        if let Some((method, path)) = self.patterns.request_line(payload) {
            meta.insert("http_method".into(), json!(method));
            meta.insert("http_path".into(), json!(path));
        }
        if let Some(host) = self.patterns.find_host(payload) {
            meta.insert("http_host".into(), json!(host));
        }
        meta
    }

    fn flush_packet_count(&mut self) {
        let delta = self.packets_seen - self.packets_flushed;
        match self.db.add_stat_u64("packet_count", delta) {
            Ok(_) => self.packets_flushed = self.packets_seen,
            Err(e) => warn!("Failed to flush packet counter: {:#}", e),
        }
    }

    /// Flush any unflushed packet count; called on shutdown
    pub fn flush(&mut self) {
        if self.packets_seen > self.packets_flushed {
            self.flush_packet_count();
        }
    }

    fn maybe_sweep(&mut self, now: DateTime<Utc>) {
        let due = match self.last_sweep {
            Some(last) => now - last >= Duration::seconds(SWEEP_INTERVAL_SECS),
            None => {
                self.last_sweep = Some(now);
                false
            }
        };
        if due {
            let horizon = std::cmp::max(self.window, self.web_window);
            let evicted = self.table.sweep(now, horizon);
            if evicted > 0 {
                debug!(evicted, remaining = self.table.len(), "Swept idle source state");
            }
            self.last_sweep = Some(now);
        }
    }

    pub fn tracked_sources(&self) -> usize {
        self.table.len()
    }
}
