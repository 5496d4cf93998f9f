//! IP geolocation with provider fallback
//!
//! Three free providers, tried in order starting with the configured
//! one. Private and loopback addresses short-circuit to a synthetic
//! `Local` record without touching the network. Successful lookups are
//! cached for the life of the process.

use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GeolocationConfig;
use crate::models::Geolocation;

/// Supported lookup providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    IpapiCo,
    IpApiCom,
    IpInfo,
}

impl Provider {
    fn from_name(name: &str) -> Provider {
        match name {
            "ip-api" => Provider::IpApiCom,
            "ipinfo" => Provider::IpInfo,
            _ => Provider::IpapiCo,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Provider::IpapiCo => "ipapi",
            Provider::IpApiCom => "ip-api",
            Provider::IpInfo => "ipinfo",
        }
    }
}

pub struct GeoService {
    config: GeolocationConfig,
    client: reqwest::Client,
    cache: Mutex<HashMap<String, Geolocation>>,
}

impl GeoService {
    pub fn new(config: GeolocationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("netwarden/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            config,
            client,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Best-effort lookup; `None` when disabled, unresolvable, or all
    /// providers fail.
    pub async fn lookup(&self, ip: &str) -> Option<Geolocation> {
        if !self.config.enabled {
            return None;
        }

        let ip = ip.trim();
        if ip.is_empty() || ip == "N/A" {
            return None;
        }

        if let Some(cached) = self.cache.lock().get(ip) {
            return Some(cached.clone());
        }

        if is_private(ip) {
            let local = Geolocation::local();
            self.cache.lock().insert(ip.to_string(), local.clone());
            return Some(local);
        }

        for provider in self.provider_chain() {
            match self.query(provider, ip).await {
                Ok(geo) => {
                    debug!(ip, provider = provider.name(), "Geolocation resolved");
                    self.cache.lock().insert(ip.to_string(), geo.clone());
                    return Some(geo);
                }
                Err(e) => {
                    warn!(ip, provider = provider.name(), "Geolocation lookup failed: {:#}", e);
                }
            }
        }

        None
    }

    /// Primary provider first, then the remaining two as fallbacks
    fn provider_chain(&self) -> Vec<Provider> {
        let primary = Provider::from_name(&self.config.api_provider);
        let mut chain = vec![primary];
        for p in [Provider::IpapiCo, Provider::IpApiCom, Provider::IpInfo] {
            if p != primary {
                chain.push(p);
            }
        }
        chain
    }

    async fn query(&self, provider: Provider, ip: &str) -> Result<Geolocation> {
        match provider {
            Provider::IpapiCo => self.query_ipapi_co(ip).await,
            Provider::IpApiCom => self.query_ip_api_com(ip).await,
            Provider::IpInfo => self.query_ipinfo(ip).await,
        }
    }

    async fn query_ipapi_co(&self, ip: &str) -> Result<Geolocation> {
        let mut url = format!("https://ipapi.co/{}/json/", ip);
        if let Some(key) = &self.config.api_key {
            url.push_str(&format!("?key={}", key));
        }

        let resp: IpapiCoResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("ipapi.co returned malformed JSON")?;

        if resp.error.unwrap_or(false) {
            bail!("ipapi.co error: {}", resp.reason.unwrap_or_default());
        }

        Ok(Geolocation {
            country: resp.country_name,
            country_code: resp.country_code,
            city: resp.city,
            lat: resp.latitude,
            lon: resp.longitude,
            isp: resp.org.clone(),
            org: resp.org,
        })
    }

    async fn query_ip_api_com(&self, ip: &str) -> Result<Geolocation> {
        let url = format!(
            "http://ip-api.com/json/{}?fields=status,message,country,countryCode,city,lat,lon,isp,org",
            ip
        );

        let resp: IpApiComResponse = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("ip-api.com returned malformed JSON")?;

        if resp.status != "success" {
            bail!("ip-api.com error: {}", resp.message.unwrap_or_default());
        }

        Ok(Geolocation {
            country: resp.country,
            country_code: resp.country_code,
            city: resp.city,
            lat: resp.lat,
            lon: resp.lon,
            isp: resp.isp,
            org: resp.org,
        })
    }

    async fn query_ipinfo(&self, ip: &str) -> Result<Geolocation> {
        let url = format!("https://ipinfo.io/{}/json", ip);
        let mut req = self.client.get(&url);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let resp: IpInfoResponse = req
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("ipinfo.io returned malformed JSON")?;

        let (lat, lon) = resp
            .loc
            .as_deref()
            .and_then(|loc| {
                let (a, b) = loc.split_once(',')?;
                Some((a.parse().ok(), b.parse().ok()))
            })
            .unwrap_or((None, None));

        Ok(Geolocation {
            country: resp.country.clone(),
            country_code: resp.country,
            city: resp.city,
            lat,
            lon,
            isp: resp.org.clone(),
            org: resp.org,
        })
    }
}

/// Addresses that never leave the local network get the synthetic record
fn is_private(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local()
        }
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}

#[derive(Debug, Deserialize)]
struct IpapiCoResponse {
    error: Option<bool>,
    reason: Option<String>,
    country_name: Option<String>,
    country_code: Option<String>,
    city: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    org: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpApiComResponse {
    status: String,
    message: Option<String>,
    country: Option<String>,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    isp: Option<String>,
    org: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    country: Option<String>,
    city: Option<String>,
    loc: Option<String>,
    org: Option<String>,
}
