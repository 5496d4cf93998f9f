pub mod alert;
pub mod api;
pub mod capture;
pub mod config;
pub mod database;
pub mod detect;
pub mod geolocate;
pub mod llm;
pub mod mailer;
pub mod migrate;
pub mod models;
pub mod osint;

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use alert::AlertPipeline;
use api::AppState;
use capture::{FileCapture, LiveCapture, PacketRecord, PacketSource};
use config::Config;
use database::Database;
use detect::DetectionEngine;
use geolocate::GeoService;
use llm::LlmClient;
use mailer::Mailer;
use models::ThreatEvent;
use osint::{FeedClient, IndicatorStore};

/// Capture channel depth; bounds memory under packet bursts
const PACKET_QUEUE: usize = 1024;

/// Emitted-threat channel depth between engine and alert pipeline
const THREAT_QUEUE: usize = 256;

/// Core netwarden instance: owns the event log, indicator store, and
/// the clients shared between the pipeline and the API surface.
pub struct Warden {
    config: Arc<Config>,
    db: Database,
    indicators: Arc<IndicatorStore>,
    geo: Arc<GeoService>,
    llm: LlmClient,
}

impl Warden {
    pub fn new(config: Config) -> Result<Self> {
        let db = Database::open(config.db_path())?;
        let geo = Arc::new(GeoService::new(config.geolocation.clone())?);
        let llm = LlmClient::new(&config.llm)?;

        Ok(Self {
            config: Arc::new(config),
            db,
            indicators: Arc::new(IndicatorStore::new()),
            geo,
            llm,
        })
    }

    /// One-shot legacy CSV migration
    pub fn import_csv(&self) -> Result<usize> {
        migrate::import_csv(&self.db, &self.config.log_path())
    }

    /// One-shot OSINT refresh; prints nothing, the store is shared
    pub async fn update_feeds(&self) -> Result<()> {
        let client = FeedClient::new(self.config.osint.clone())?;
        client.refresh(&self.indicators).await
    }

    pub fn indicators(&self) -> Arc<IndicatorStore> {
        self.indicators.clone()
    }

    /// Run the full pipeline until interrupted: capture thread, engine
    /// task, alert task, OSINT refresh task, and the HTTP surface.
    pub async fn run(self, pcap_file: Option<String>) -> Result<()> {
        match self.import_csv() {
            Ok(0) => {}
            Ok(n) => info!("Migrated {} legacy CSV rows", n),
            Err(e) => warn!("CSV migration failed: {:#}", e),
        }

        let feed_client = FeedClient::new(self.config.osint.clone())?;
        if let Err(e) = feed_client.refresh(&self.indicators).await {
            warn!("Initial OSINT refresh failed: {:#}", e);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let refresh_handle =
            osint::spawn_refresh_task(feed_client, self.indicators.clone(), shutdown_rx.clone());

        // Capture runs on its own thread; libpcap blocks
        let source: Box<dyn PacketSource> = match &pcap_file {
            Some(path) => Box::new(FileCapture::open(path)?),
            None => Box::new(LiveCapture::open(&self.config.network_interface())?),
        };
        let capture_stop = Arc::new(AtomicBool::new(false));
        let (packet_tx, packet_rx) = mpsc::channel::<PacketRecord>(PACKET_QUEUE);
        let capture_thread = std::thread::Builder::new()
            .name("netwarden-capture".into())
            .spawn({
                let stop = capture_stop.clone();
                move || capture::run_capture(source, packet_tx, stop)
            })
            .context("Failed to spawn capture thread")?;

        let engine = DetectionEngine::new(
            self.config.detection.clone(),
            self.indicators.clone(),
            self.db.clone(),
        )?;
        let (threat_tx, threat_rx) = mpsc::channel::<ThreatEvent>(THREAT_QUEUE);
        let engine_handle = tokio::spawn(run_engine(
            engine,
            packet_rx,
            threat_tx,
            shutdown_rx.clone(),
        ));

        let pipeline = AlertPipeline::new(
            self.db.clone(),
            self.geo.clone(),
            Mailer::from_env(&self.config.alerts)?,
            self.config.alerts.clone(),
        );
        let alert_handle = tokio::spawn(run_alerts(pipeline, threat_rx, shutdown_rx.clone()));

        let state = AppState {
            db: self.db.clone(),
            config: self.config.clone(),
            geo: self.geo.clone(),
            llm: self.llm.clone(),
        };
        let api_handle = tokio::spawn(api::serve(state, shutdown_rx));

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown signal received");

        capture_stop.store(true, Ordering::Relaxed);
        let _ = shutdown_tx.send(true);

        let _ = engine_handle.await;
        let _ = alert_handle.await;
        let _ = refresh_handle.await;
        if let Ok(Err(e)) = api_handle.await {
            warn!("API server error: {:#}", e);
        }
        if capture_thread.join().is_err() {
            warn!("Capture thread panicked");
        }

        info!("Shutdown complete");
        Ok(())
    }
}

/// Engine task: classify packets, forward fired events to the alert
/// pipeline. Persisting threats happens inside the engine.
async fn run_engine(
    mut engine: DetectionEngine,
    mut packets: mpsc::Receiver<PacketRecord>,
    threats: mpsc::Sender<ThreatEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    'outer: loop {
        tokio::select! {
            packet = packets.recv() => match packet {
                Some(packet) => {
                    for event in engine.process(&packet) {
                        if threats.send(event).await.is_err() {
                            break 'outer;
                        }
                    }
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    engine.flush();
    info!("Detection engine stopped");
}

/// Alert task: throttle, enrich, persist, notify
async fn run_alerts(
    mut pipeline: AlertPipeline,
    mut threats: mpsc::Receiver<ThreatEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = threats.recv() => match event {
                Some(event) => {
                    pipeline.handle(&event).await;
                }
                None => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    info!("Alert pipeline stopped");
}
