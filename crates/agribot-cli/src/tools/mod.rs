//! Data tools exposed to the model

mod crop_prices;
mod weather;

pub use crop_prices::CropPricesTool;
pub use weather::WeatherForecastTool;
