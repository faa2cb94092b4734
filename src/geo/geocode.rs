//! Best-effort reverse geocoding.
//!
//! Lookups never fail: any transport, status or decoding problem resolves to
//! the `UNKNOWN_ADDRESS` sentinel.

use super::Coordinate;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Sentinel returned when an address cannot be resolved
pub const UNKNOWN_ADDRESS: &str = "Adresse inconnue";

/// Resolves coordinates to a human-readable address
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Returns the address for `coordinate`, or `UNKNOWN_ADDRESS` on failure.
    async fn reverse_geocode(&self, coordinate: Coordinate) -> String;
}

/// Geocoder that never resolves anything (geocoding disabled)
pub struct NullGeocoder;

#[async_trait]
impl ReverseGeocoder for NullGeocoder {
    async fn reverse_geocode(&self, _coordinate: Coordinate) -> String {
        UNKNOWN_ADDRESS.to_string()
    }
}

#[derive(Deserialize)]
struct NominatimResponse {
    display_name: Option<String>,
}

/// Reverse geocoder backed by a Nominatim-compatible HTTP endpoint
pub struct NominatimGeocoder {
    base_url: String,
    http_client: reqwest::Client,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dispatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build geocoding HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    async fn lookup(&self, coordinate: Coordinate) -> Result<String> {
        let url = format!("{}/reverse", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", coordinate.latitude.to_string()),
                ("lon", coordinate.longitude.to_string()),
            ])
            .send()
            .await
            .context("Reverse geocoding request failed")?
            .error_for_status()
            .context("Reverse geocoding returned an error status")?;

        let body: NominatimResponse = response
            .json()
            .await
            .context("Failed to decode reverse geocoding response")?;

        body.display_name
            .filter(|name| !name.trim().is_empty())
            .context("Reverse geocoding response had no address")
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn reverse_geocode(&self, coordinate: Coordinate) -> String {
        if coordinate.validate().is_err() {
            return UNKNOWN_ADDRESS.to_string();
        }

        match self.lookup(coordinate).await {
            Ok(address) => {
                debug!(address = %address, "Resolved address");
                address
            }
            Err(e) => {
                warn!(
                    error = %e,
                    latitude = coordinate.latitude,
                    longitude = coordinate.longitude,
                    "Reverse geocoding failed, using sentinel address"
                );
                UNKNOWN_ADDRESS.to_string()
            }
        }
    }
}
