use crate::schema::{ParamType, ParameterSchema};
use crate::tools::{extract_f64_arg, extract_u64_arg_opt};
use crate::traits::{Tool, ToolArgs};
use anyhow::Context;
use async_trait::async_trait;

pub const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1";

pub struct WeatherTool {
    client: reqwest::Client,
    base_url: String,
}

impl WeatherTool {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(20))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for WeatherTool {
    fn default() -> Self {
        Self::new(OPEN_METEO_URL)
    }
}

#[async_trait]
impl Tool for WeatherTool {
    fn name(&self) -> &str {
        "getCurrentWeather"
    }

    fn label(&self) -> &str {
        "Fetching weather"
    }

    fn description(&self) -> &str {
        "Gets the current temperature for a given location."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("latitude", ParamType::Number, "latitude of the location")
            .required("longitude", ParamType::Number, "longitude of the location")
            .optional(
                "forecast_days",
                ParamType::Integer,
                "number of days of hourly forecast to return (default: 1)",
            )
    }

    async fn execute(&self, args: ToolArgs) -> anyhow::Result<serde_json::Value> {
        let latitude = extract_f64_arg(&args, "latitude")?;
        let longitude = extract_f64_arg(&args, "longitude")?;
        let days = extract_u64_arg_opt(&args, "forecast_days", 1).clamp(1, 16);

        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            anyhow::bail!("coordinates out of range: {latitude}, {longitude}");
        }

        let response = self
            .client
            .get(format!("{}/forecast", self.base_url))
            .query(&[
                ("latitude", latitude.to_string()),
                ("longitude", longitude.to_string()),
                ("hourly", "apparent_temperature".to_string()),
                ("forecast_days", days.to_string()),
            ])
            .send()
            .await
            .context("weather request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("weather API error ({}): {}", status, error_text);
        }

        response
            .json::<serde_json::Value>()
            .await
            .context("weather API returned invalid JSON")
    }
}
