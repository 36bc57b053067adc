use crate::config::LocationConfig;
use crate::schema::ParameterSchema;
use crate::traits::{Tool, ToolArgs};
use async_trait::async_trait;
use serde_json::json;

/// Reports the user's home location from configuration.
pub struct LocationTool {
    city: String,
    latitude: f64,
    longitude: f64,
}

impl Default for LocationTool {
    fn default() -> Self {
        Self::from_config(&LocationConfig::default())
    }
}

impl LocationTool {
    pub fn from_config(config: &LocationConfig) -> Self {
        Self {
            city: config.city.clone(),
            latitude: config.latitude,
            longitude: config.longitude,
        }
    }
}

#[async_trait]
impl Tool for LocationTool {
    fn name(&self) -> &str {
        "getLocation"
    }

    fn label(&self) -> &str {
        "Getting location"
    }

    fn description(&self) -> &str {
        "Gets the current location of the user"
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    async fn execute(&self, _args: ToolArgs) -> anyhow::Result<serde_json::Value> {
        Ok(json!({
            "city": self.city,
            "latitude": self.latitude,
            "longitude": self.longitude,
        }))
    }
}
