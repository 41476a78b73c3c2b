//! Coarse device geolocation via IP lookup.
//!
//! Good enough to pick a default weather location when the farmer does
//! not name one. Failures are reported as strings; the session treats
//! them as a warning and carries on without a location.

use async_trait::async_trait;
use serde::Deserialize;

use agribot_live::GeoPoint;
use agribot_session::LocationProvider;

const LOOKUP_URL: &str = "http://ip-api.com/json";

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
    #[serde(default)]
    message: Option<String>,
}

/// Looks up the device's approximate location from its public IP
#[derive(Debug, Default)]
pub struct IpLocationProvider;

#[async_trait]
impl LocationProvider for IpLocationProvider {
    async fn current(&self) -> Result<GeoPoint, String> {
        let response = reqwest::get(LOOKUP_URL).await.map_err(|e| e.to_string())?;
        let body: IpApiResponse = response.json().await.map_err(|e| e.to_string())?;
        if body.status != "success" {
            return Err(body
                .message
                .unwrap_or_else(|| "lookup rejected".to_string()));
        }
        Ok(GeoPoint {
            latitude: body.lat,
            longitude: body.lon,
        })
    }
}
