//! Weather forecast tool backed by Open-Meteo

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use agribot_live::{DailyForecast, SkyCondition, ToolPayload, WeatherData};
use agribot_session::{DataTool, ProviderError, ToolContext};

const GEOCODE_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

const DAY_LABELS: [&str; 3] = ["Tomorrow", "In 2 days", "In 3 days"];

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    name: String,
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: CurrentWeather,
    daily: DailyWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature_2m: f64,
    weather_code: u32,
}

#[derive(Debug, Deserialize)]
struct DailyWeather {
    weather_code: Vec<u32>,
    temperature_2m_max: Vec<f64>,
}

/// WMO weather interpretation codes, folded to three buckets
fn condition_from_code(code: u32) -> SkyCondition {
    match code {
        0 | 1 => SkyCondition::Sunny,
        2..=48 => SkyCondition::Cloudy,
        _ => SkyCondition::Rainy,
    }
}

fn format_temperature(celsius: f64) -> String {
    format!("{}°C", celsius.round() as i64)
}

/// Fetches the current weather and a three-day forecast
pub struct WeatherForecastTool {
    client: reqwest::Client,
}

impl WeatherForecastTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn geocode(&self, name: &str) -> Result<GeocodeResult, ProviderError> {
        let response: GeocodeResponse = self
            .client
            .get(GEOCODE_URL)
            .query(&[("name", name), ("count", "1")])
            .send()
            .await
            .map_err(|e| ProviderError::new(format!("geocoding failed: {e}")))?
            .json()
            .await
            .map_err(|e| ProviderError::new(format!("geocoding failed: {e}")))?;
        response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::new(format!("Unknown location: {name}")))
    }

    async fn forecast(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<ForecastResponse, ProviderError> {
        self.client
            .get(FORECAST_URL)
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("current", "temperature_2m,weather_code".to_string()),
                ("daily", "weather_code,temperature_2m_max".to_string()),
                ("forecast_days", "4".to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::new(format!("forecast failed: {e}")))?
            .json()
            .await
            .map_err(|e| ProviderError::new(format!("forecast failed: {e}")))
    }
}

impl Default for WeatherForecastTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataTool for WeatherForecastTool {
    fn name(&self) -> &str {
        "getWeatherForecast"
    }

    fn description(&self) -> &str {
        "Get the current weather and a 3-day forecast for a location. \
         If the farmer does not name a location, their own area is used."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "location": {
                    "type": "string",
                    "description": "City, town, or district to get the weather for"
                }
            }
        })
    }

    async fn call(
        &self,
        arguments: serde_json::Value,
        context: ToolContext,
        _cancel: CancellationToken,
    ) -> Result<ToolPayload, ProviderError> {
        let named = arguments["location"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        let (latitude, longitude, display_name) = match named {
            Some(name) => {
                let place = self.geocode(name).await?;
                (place.latitude, place.longitude, place.name)
            }
            None => {
                let point = context.location.ok_or_else(|| {
                    ProviderError::new(
                        "No location was given and the device location is unknown",
                    )
                })?;
                (point.latitude, point.longitude, "your area".to_string())
            }
        };

        let response = self.forecast(latitude, longitude).await?;

        // daily[0] is today; the spoken forecast covers the next three days.
        let forecast = DAY_LABELS
            .iter()
            .enumerate()
            .filter_map(|(i, label)| {
                let code = response.daily.weather_code.get(i + 1)?;
                let max = response.daily.temperature_2m_max.get(i + 1)?;
                Some(DailyForecast {
                    day: label.to_string(),
                    temperature: format_temperature(*max),
                    condition: condition_from_code(*code),
                })
            })
            .collect();

        Ok(ToolPayload::Weather(WeatherData {
            location: display_name,
            temperature: format_temperature(response.current.temperature_2m),
            condition: condition_from_code(response.current.weather_code),
            forecast,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_buckets() {
        assert_eq!(condition_from_code(0), SkyCondition::Sunny);
        assert_eq!(condition_from_code(3), SkyCondition::Cloudy);
        assert_eq!(condition_from_code(45), SkyCondition::Cloudy);
        assert_eq!(condition_from_code(61), SkyCondition::Rainy);
        assert_eq!(condition_from_code(95), SkyCondition::Rainy);
    }

    #[test]
    fn test_temperature_format() {
        assert_eq!(format_temperature(21.7), "22°C");
        assert_eq!(format_temperature(-2.3), "-2°C");
    }

    #[test]
    fn test_forecast_response_parses() {
        let json = serde_json::json!({
            "current": {"temperature_2m": 24.3, "weather_code": 2},
            "daily": {
                "weather_code": [2, 0, 61, 3],
                "temperature_2m_max": [25.0, 27.1, 22.4, 26.0]
            }
        });
        let response: ForecastResponse = serde_json::from_value(json).unwrap();
        assert_eq!(response.daily.weather_code.len(), 4);
        assert_eq!(response.current.weather_code, 2);
    }
}
