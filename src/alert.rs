//! Alert pipeline
//!
//! Sits between the detection engine and the outside world. Each
//! incoming threat is throttled per (source, kind), enriched with
//! geolocation, persisted to the `alerts` view, and mailed when a sink
//! is configured. The throttle advances once the alert row is persisted,
//! whether or not delivery succeeded, so a broken SMTP relay cannot turn
//! into notification spam later.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AlertsConfig;
use crate::database::Database;
use crate::geolocate::GeoService;
use crate::mailer::Mailer;
use crate::models::{Geolocation, ThreatEvent};

pub struct AlertPipeline {
    db: Database,
    geo: Arc<GeoService>,
    mailer: Option<Mailer>,
    config: AlertsConfig,
    throttle: HashMap<(String, String), DateTime<Utc>>,
}

impl AlertPipeline {
    pub fn new(
        db: Database,
        geo: Arc<GeoService>,
        mailer: Option<Mailer>,
        config: AlertsConfig,
    ) -> Self {
        Self {
            db,
            geo,
            mailer,
            config,
            throttle: HashMap::new(),
        }
    }

    /// Process one emitted threat. Returns the alert row id, or `None`
    /// when the throttle suppressed it.
    pub async fn handle(&mut self, event: &ThreatEvent) -> Option<i64> {
        let key = (event.source_ip.clone(), event.kind.to_string());
        let now = Utc::now();

        if let Some(last) = self.throttle.get(&key) {
            if now - *last < Duration::seconds(self.config.throttle_seconds as i64) {
                debug!(src = %event.source_ip, kind = %event.kind, "Alert throttled");
                return None;
            }
        }

        let geolocation = self.geo.lookup(&event.source_ip).await;

        let id = match self.db.append_alert(event, geolocation.as_ref()) {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to persist alert: {:#}", e);
                return None;
            }
        };

        if self.config.enabled {
            if let Some(mailer) = &self.mailer {
                let (subject, body) = compose_message(event, geolocation.as_ref());
                match mailer.send(&subject, body).await {
                    Ok(()) => info!(kind = %event.kind, src = %event.source_ip, "Alert sent"),
                    Err(e) => warn!("Alert delivery failed: {:#}", e),
                }
            } else {
                info!(kind = %event.kind, src = %event.source_ip, "Alert logged (email not configured)");
            }
        }

        self.throttle.insert(key, now);
        Some(id)
    }
}

/// Plain-text notification for the email sink
fn compose_message(event: &ThreatEvent, geo: Option<&Geolocation>) -> (String, String) {
    let subject = format!("Security Alert: {}", event.kind);

    let ports = event
        .ports
        .to_column()
        .unwrap_or_else(|| "N/A".to_string());

    let mut geo_info = String::new();
    if let Some(geo) = geo {
        geo_info = format!(
            "\nLocation: {}, {}",
            geo.city.as_deref().unwrap_or("Unknown"),
            geo.country.as_deref().unwrap_or("Unknown"),
        );
        if let Some(isp) = geo.isp.as_deref().filter(|s| !s.is_empty()) {
            geo_info.push_str(&format!("\nISP: {}", isp));
        }
    }

    let body = format!(
        "Threat Detected: {}\n\
         Source IP: {}\n\
         Destination IP: {}\n\
         Ports: {}\n\
         Details: {}\n\
         Time: {}{}\n",
        event.kind,
        event.source_ip,
        event.destination_ip,
        ports,
        event.message,
        event.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        geo_info,
    );

    (subject, body)
}
