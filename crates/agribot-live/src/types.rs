//! Core conversation types shared across the workspace

use serde::{Deserialize, Serialize};

/// Connection state of the live session.
///
/// Owned by the session lifecycle manager and exposed read-only to the
/// presentation layer. Exactly one value at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionState {
    /// Get a human-readable name for this state
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Error => "error",
        }
    }
}

/// Speaker role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// Sky condition reported by the weather provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkyCondition {
    Sunny,
    Cloudy,
    Rainy,
}

/// One day of the weather forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub day: String,
    pub temperature: String,
    pub condition: SkyCondition,
}

/// Weather payload returned by the forecast provider.
///
/// Immutable once attached to a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherData {
    pub location: String,
    pub temperature: String,
    pub condition: SkyCondition,
    pub forecast: Vec<DailyForecast>,
}

/// One market quote for a crop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPrice {
    pub market_name: String,
    pub price: String,
    pub grade: String,
}

/// Crop price payload returned by the market price provider.
///
/// Immutable once attached to a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropPricesData {
    pub crop: String,
    pub district: String,
    pub prices: Vec<MarketPrice>,
}

/// A geographic point, used as the contextual default location for
/// weather lookups.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A structured payload produced by a data tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolPayload {
    Weather(WeatherData),
    CropPrices(CropPricesData),
}

impl ToolPayload {
    /// Serialize the payload for the outbound tool response
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ToolPayload::Weather(data) => serde_json::json!(data),
            ToolPayload::CropPrices(data) => serde_json::json!(data),
        }
    }
}

/// One entry in the conversation log.
///
/// A turn with `is_final == false` is an in-progress utterance whose text
/// is still being appended to. A turn carrying a weather or crop price
/// payload is created already final and is never merged with adjacent text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather: Option<WeatherData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop_prices: Option<CropPricesData>,
    pub is_final: bool,
    /// Creation time in unix milliseconds
    pub timestamp: i64,
}

impl Turn {
    fn new(role: Role, text: Option<String>, is_final: bool) -> Self {
        Self {
            role,
            text,
            weather: None,
            crop_prices: None,
            is_final,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create an in-progress user turn
    pub fn user_partial(text: impl Into<String>) -> Self {
        Self::new(Role::User, Some(text.into()), false)
    }

    /// Create an in-progress model turn
    pub fn model_partial(text: impl Into<String>) -> Self {
        Self::new(Role::Model, Some(text.into()), false)
    }

    /// Create an already-final model turn carrying a tool payload
    pub fn from_payload(payload: ToolPayload) -> Self {
        let mut turn = Self::new(Role::Model, None, true);
        match payload {
            ToolPayload::Weather(data) => turn.weather = Some(data),
            ToolPayload::CropPrices(data) => turn.crop_prices = Some(data),
        }
        turn
    }

    /// Whether this turn carries a weather or crop price payload
    pub fn has_payload(&self) -> bool {
        self.weather.is_some() || self.crop_prices.is_some()
    }
}
