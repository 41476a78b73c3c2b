//! Crop price tool serving synthetic mandi quotes.
//!
//! There is no free realtime mandi price API, so quotes are generated
//! deterministically from the crop and district: the same query always
//! returns the same prices, seeded around a realistic base rate per crop.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use agribot_live::{CropPricesData, MarketPrice, ToolPayload};
use agribot_session::{DataTool, ProviderError, ToolContext};

/// Base rates in rupees per quintal
const BASE_RATES: [(&str, u32); 10] = [
    ("tomato", 2_500),
    ("onion", 1_800),
    ("potato", 1_200),
    ("wheat", 2_200),
    ("rice", 2_800),
    ("paddy", 2_100),
    ("cotton", 7_000),
    ("soybean", 4_500),
    ("maize", 2_000),
    ("sugarcane", 350),
];

const FALLBACK_RATE: u32 = 2_000;

fn base_rate(crop: &str) -> u32 {
    let crop = crop.to_lowercase();
    BASE_RATES
        .iter()
        .find(|(name, _)| crop.contains(name))
        .map(|(_, rate)| *rate)
        .unwrap_or(FALLBACK_RATE)
}

/// FNV-1a, for stable per-market price variation
fn hash(input: &str) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for byte in input.bytes() {
        h ^= byte as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

/// Vary `rate` by up to ±10%, deterministically per seed string
fn varied_rate(rate: u32, seed: &str) -> u32 {
    let spread = rate / 10;
    if spread == 0 {
        return rate;
    }
    let offset = (hash(seed) % (2 * spread as u64 + 1)) as i64 - spread as i64;
    (rate as i64 + offset).max(1) as u32
}

/// Format rupees with Indian digit grouping: ₹2,500 and ₹1,00,000
fn format_rupees(amount: u32) -> String {
    let digits = amount.to_string();
    if digits.len() <= 3 {
        return format!("₹{digits}/quintal");
    }
    let (head, tail) = digits.split_at(digits.len() - 3);
    let mut grouped = String::new();
    let head_bytes = head.as_bytes();
    for (i, &b) in head_bytes.iter().enumerate() {
        if i > 0 && (head_bytes.len() - i) % 2 == 0 {
            grouped.push(',');
        }
        grouped.push(b as char);
    }
    format!("₹{grouped},{tail}/quintal")
}

/// Serves current mandi prices for a crop in a district
#[derive(Debug, Default)]
pub struct CropPricesTool;

impl CropPricesTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DataTool for CropPricesTool {
    fn name(&self) -> &str {
        "getCropPrices"
    }

    fn description(&self) -> &str {
        "Get today's mandi (market) prices for a crop in a district, \
         in rupees per quintal. The district is optional when the farmer \
         has a configured home district."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "crop": {
                    "type": "string",
                    "description": "Crop name, e.g. Tomatoes or Wheat"
                },
                "district": {
                    "type": "string",
                    "description": "District to look up prices in, e.g. Nashik. \
                                    Defaults to the farmer's home district."
                }
            },
            "required": ["crop"]
        })
    }

    async fn call(
        &self,
        arguments: serde_json::Value,
        context: ToolContext,
        _cancel: CancellationToken,
    ) -> Result<ToolPayload, ProviderError> {
        let crop = arguments["crop"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::new("Missing crop name"))?;
        let district = arguments["district"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or(context.district.as_deref())
            .ok_or_else(|| ProviderError::new("Missing district name"))?;

        let rate = base_rate(crop);
        let markets = [
            (format!("{district} Main Market"), "A"),
            (format!("{district} APMC Yard"), "B"),
            (format!("{district} Rural Mandi"), "FAQ"),
        ];
        let prices = markets
            .into_iter()
            .map(|(market_name, grade)| {
                let seed = format!("{crop}:{district}:{market_name}");
                MarketPrice {
                    price: format_rupees(varied_rate(rate, &seed)),
                    market_name,
                    grade: grade.to_string(),
                }
            })
            .collect();

        Ok(ToolPayload::CropPrices(CropPricesData {
            crop: crop.to_string(),
            district: district.to_string(),
            prices,
        }))
    }
}
